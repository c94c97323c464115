//! Outbound op batching.
//!
//! ```text
//!  submit_attach ──► attach BatchManager ──┐
//!                                          │  flush(): attach first
//!  submit ─────────► main BatchManager ────┤
//!                                          ▼
//!                            ┌──── compress (≥ threshold) ────┐
//!                            │      still > max? → split      │
//!                            └───────────────┬────────────────┘
//!                                            ▼
//!                     Transport (batch sender │ single-op + flush)
//!                                            │
//!                     PendingLedger ◄── raw (uncompressed) ops
//! ```
//!
//! Attach ops create collaborative objects that main ops refer to, so
//! the attach batch always reaches the transport first.
//!
//! A flush holds `&mut Outbox` until it returns, so nothing can push into
//! a batch the outbox is flushing. `enable_op_reentry_check` only affects
//! hosts that drive a [`BatchManager`] through `start_flush` and
//! `finish_flush` themselves.

use crate::batch_manager::{Batch, BatchCheckpoint, BatchManager};
use crate::compression::{CompressionError, Compressor, Lz4Compressor};
use crate::config::{resolve_batch_limits, CompressionOptions, OutboxConfig};
use crate::ledger::PendingLedger;
use crate::protocol::{Op, OutboundMessage, ProtocolError};
use crate::splitter::{OpSplitter, Splitter};
use crate::transport::Transport;

/// Diagnostics for a batch that cannot be sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchTooLarge {
    /// Size of the op that was being pushed
    pub op_size: Option<usize>,
    /// Size of the batch (before compression)
    pub batch_size: usize,
    /// Ops in the batch
    pub count: usize,
    /// Limit that was exceeded
    pub limit: usize,
    pub compressed_batch_size: Option<usize>,
    pub chunk_count: Option<usize>,
    pub chunking_enabled: Option<bool>,
    pub compression: Option<CompressionOptions>,
}

/// Outbox errors.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboxError {
    BatchTooLarge(BatchTooLarge),
    /// The compressor could not produce a batch
    Compression(CompressionError),
    /// The splitter could not encode chunks
    Chunking(ProtocolError),
}

impl std::fmt::Display for OutboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboxError::BatchTooLarge(details) => {
                write!(
                    f,
                    "Batch too large: {} bytes in {} ops, limit {}",
                    details.batch_size, details.count, details.limit
                )?;
                if let Some(op_size) = details.op_size {
                    write!(f, ", op size {op_size}")?;
                }
                if let Some(compressed) = details.compressed_batch_size {
                    write!(f, ", compressed size {compressed}")?;
                }
                if let Some(chunks) = details.chunk_count {
                    write!(f, ", {chunks} chunks")?;
                }
                Ok(())
            }
            OutboxError::Compression(e) => write!(f, "Compression error: {e}"),
            OutboxError::Chunking(e) => write!(f, "Chunking error: {e}"),
        }
    }
}

impl std::error::Error for OutboxError {}

impl From<CompressionError> for OutboxError {
    fn from(e: CompressionError) -> Self {
        OutboxError::Compression(e)
    }
}

impl From<ProtocolError> for OutboxError {
    fn from(e: ProtocolError) -> Self {
        OutboxError::Chunking(e)
    }
}

/// Checkpoints of both batch managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxCheckpoint {
    pub attach: BatchCheckpoint,
    pub main: BatchCheckpoint,
}

/// Outbox counters.
#[derive(Debug, Clone, Default)]
pub struct OutboxStats {
    pub batches_sent: u64,
    pub ops_sent: u64,
    pub compressed_batches: u64,
    pub chunked_batches: u64,
    /// Batches skipped because the transport was not ready
    pub batches_dropped: u64,
    pub eager_attach_flushes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchKind {
    Attach,
    Main,
}

/// What `compress_batch` decided to put on the wire.
enum PreparedBatch<'a> {
    Raw(&'a Batch),
    Compressed(Batch),
    Chunked { leading_chunks: Vec<Op>, batch: Batch },
}

impl PreparedBatch<'_> {
    fn parts(&self) -> (&[Op], &Batch) {
        match self {
            PreparedBatch::Raw(batch) => (&[], *batch),
            PreparedBatch::Compressed(batch) => (&[], batch),
            PreparedBatch::Chunked {
                leading_chunks,
                batch,
            } => (leading_chunks.as_slice(), batch),
        }
    }
}

/// Outbound batching layer.
///
/// Accumulates ops in an attach batch and a main batch, and on flush
/// compresses, splits and submits them, then records the original ops in
/// the pending ledger.
pub struct Outbox<T: Transport, L: PendingLedger> {
    config: OutboxConfig,
    attach_batch: BatchManager,
    main_batch: BatchManager,
    compressor: Box<dyn Compressor>,
    splitter: Box<dyn Splitter>,
    transport: T,
    ledger: L,
    stats: OutboxStats,
}

impl<T: Transport, L: PendingLedger> Outbox<T, L> {
    /// Create an outbox with the LZ4 compressor and a splitter sized from
    /// `config.chunk_size_in_bytes`.
    pub fn new(config: OutboxConfig, transport: T, ledger: L) -> Self {
        let limits = resolve_batch_limits(&config);
        let splitter = OpSplitter::new(config.chunk_size_in_bytes);
        Self {
            attach_batch: BatchManager::new(limits.attach),
            main_batch: BatchManager::new(limits.main),
            compressor: Box::new(Lz4Compressor::new()),
            splitter: Box::new(splitter),
            config,
            transport,
            ledger,
            stats: OutboxStats::default(),
        }
    }

    pub fn with_compressor(mut self, compressor: Box<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_splitter(mut self, splitter: Box<dyn Splitter>) -> Self {
        self.splitter = splitter;
        self
    }

    /// Queue a main-flow op.
    pub fn submit(&mut self, op: Op) -> Result<(), OutboxError> {
        let op_size = op.size();
        if self.main_batch.push(op).is_err() {
            return Err(push_rejected(&self.main_batch, op_size));
        }
        Ok(())
    }

    /// Queue an attach-flow op.
    ///
    /// If the attach batch is full it is flushed and the push retried
    /// once. Attach batches that reach the compression threshold (or their
    /// soft limit) are flushed right away.
    pub fn submit_attach(&mut self, op: Op) -> Result<(), OutboxError> {
        let op_size = op.size();
        if let Err(op) = self.attach_batch.push(op) {
            log::debug!(
                "Attach batch full ({} bytes), flushing before retry",
                self.attach_batch.content_size_in_bytes()
            );
            self.flush_kind(BatchKind::Attach)?;
            if self.attach_batch.push(op).is_err() {
                return Err(push_rejected(&self.attach_batch, op_size));
            }
        }

        if self.should_flush_attach_eagerly() {
            log::debug!(
                "Eagerly flushing {} byte attach batch",
                self.attach_batch.content_size_in_bytes()
            );
            self.stats.eager_attach_flushes += 1;
            self.flush_kind(BatchKind::Attach)?;
        }
        Ok(())
    }

    /// Flush both batches, attach first.
    pub fn flush(&mut self) -> Result<(), OutboxError> {
        self.flush_kind(BatchKind::Attach)?;
        self.flush_kind(BatchKind::Main)
    }

    /// True iff both batches are empty.
    pub fn is_empty(&self) -> bool {
        self.attach_batch.is_empty() && self.main_batch.is_empty()
    }

    pub fn checkpoint(&self) -> OutboxCheckpoint {
        OutboxCheckpoint {
            attach: self.attach_batch.checkpoint(),
            main: self.main_batch.checkpoint(),
        }
    }

    /// Restore both batches to `checkpoint`. Returns `false` if either
    /// checkpoint was stale.
    pub fn rollback(&mut self, checkpoint: OutboxCheckpoint) -> bool {
        let attach = self.attach_batch.rollback(checkpoint.attach);
        let main = self.main_batch.rollback(checkpoint.main);
        attach && main
    }

    pub fn attach_batch(&self) -> &BatchManager {
        &self.attach_batch
    }

    pub fn main_batch(&self) -> &BatchManager {
        &self.main_batch
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    pub fn stats(&self) -> &OutboxStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    fn manager_mut(&mut self, kind: BatchKind) -> &mut BatchManager {
        match kind {
            BatchKind::Attach => &mut self.attach_batch,
            BatchKind::Main => &mut self.main_batch,
        }
    }

    fn should_flush_attach_eagerly(&self) -> bool {
        let size = self.attach_batch.content_size_in_bytes();
        let over_threshold = self
            .config
            .compression
            .minimum_batch_size_in_bytes
            .is_some_and(|threshold| size >= threshold);
        over_threshold || self.attach_batch.is_over_soft_limit()
    }

    fn flush_kind(&mut self, kind: BatchKind) -> Result<(), OutboxError> {
        let raw = self.manager_mut(kind).start_flush();
        let result = self.flush_internal(&raw);
        self.manager_mut(kind).finish_flush();
        result
    }

    fn flush_internal(&mut self, raw: &Batch) -> Result<(), OutboxError> {
        if raw.is_empty() {
            return Ok(());
        }
        let prepared = self.compress_batch(raw)?;
        self.send_batch(&prepared);
        self.persist_batch(raw);
        Ok(())
    }

    fn compress_batch<'a>(&self, batch: &'a Batch) -> Result<PreparedBatch<'a>, OutboxError> {
        let Some(threshold) = self.config.compression.minimum_batch_size_in_bytes else {
            return Ok(PreparedBatch::Raw(batch));
        };
        if batch.is_empty() || batch.content_size_in_bytes() < threshold {
            return Ok(PreparedBatch::Raw(batch));
        }

        let compressed = self.compressor.compress_batch(batch)?;
        let max = self.config.max_batch_size_in_bytes;
        log::debug!(
            "Compressed batch of {} ops: {} -> {} bytes",
            batch.len(),
            batch.content_size_in_bytes(),
            compressed.content_size_in_bytes()
        );
        if compressed.content_size_in_bytes() <= max {
            return Ok(PreparedBatch::Compressed(compressed));
        }

        let chunking_enabled = self.splitter.is_batch_chunking_enabled();
        let too_large = |compressed_size: usize, chunk_count: usize| {
            OutboxError::BatchTooLarge(BatchTooLarge {
                op_size: None,
                batch_size: batch.content_size_in_bytes(),
                count: batch.len(),
                limit: max,
                compressed_batch_size: Some(compressed_size),
                chunk_count: Some(chunk_count),
                chunking_enabled: Some(chunking_enabled),
                compression: Some(self.config.compression.clone()),
            })
        };

        if !chunking_enabled {
            let compressed_size = compressed.content_size_in_bytes();
            let chunk_count = self
                .splitter
                .chunk_size_in_bytes()
                .filter(|chunk| *chunk > 0)
                .map(|chunk| compressed_size.div_ceil(chunk))
                .unwrap_or(0);
            log::warn!("Compressed batch of {compressed_size} bytes exceeds {max} and chunking is off");
            return Err(too_large(compressed_size, chunk_count));
        }

        let compressed_size = compressed.content_size_in_bytes();
        let split = self.splitter.split_compressed_batch(compressed)?;
        if split.largest_unit_in_bytes() > max {
            log::warn!(
                "Chunked batch still exceeds {max} bytes ({} byte unit)",
                split.largest_unit_in_bytes()
            );
            return Err(too_large(compressed_size, split.chunk_count()));
        }
        Ok(PreparedBatch::Chunked {
            leading_chunks: split.leading_chunks,
            batch: split.batch,
        })
    }

    fn send_batch(&mut self, prepared: &PreparedBatch<'_>) {
        let (leading_chunks, batch) = prepared.parts();
        if batch.is_empty() {
            return;
        }
        if !self.transport.should_send() {
            log::debug!(
                "Transport not ready, leaving {} ops to the pending ledger",
                batch.len()
            );
            self.stats.batches_dropped += 1;
            return;
        }

        if let Some(sender) = self.transport.batch_sender() {
            for chunk in leading_chunks {
                sender.submit_batch(vec![OutboundMessage::from(chunk)]);
            }
            sender.submit_batch(batch.messages().iter().map(OutboundMessage::from).collect());
        } else {
            // The single-op path has no notion of compression; only the
            // flag is dropped, the payload goes out as-is.
            for op in leading_chunks.iter().chain(batch.messages()) {
                let metadata = op.metadata().cloned().map(|mut m| {
                    m.compressed = None;
                    m
                });
                let content = op.deserialized_content();
                self.transport
                    .submit(content.op_type, content.contents, true, metadata.as_ref());
            }
            self.transport.flush();
        }

        self.stats.batches_sent += 1;
        self.stats.ops_sent += (leading_chunks.len() + batch.len()) as u64;
        match prepared {
            PreparedBatch::Raw(_) => {}
            PreparedBatch::Compressed(_) => self.stats.compressed_batches += 1,
            PreparedBatch::Chunked { .. } => {
                self.stats.compressed_batches += 1;
                self.stats.chunked_batches += 1;
            }
        }
    }

    fn persist_batch(&mut self, raw: &Batch) {
        for op in raw.messages() {
            self.ledger.on_submit_message(
                op.op_type(),
                op.reference_sequence_number(),
                op.contents(),
                op.local_op_metadata(),
                op.metadata(),
            );
        }
    }
}

fn push_rejected(manager: &BatchManager, op_size: usize) -> OutboxError {
    OutboxError::BatchTooLarge(BatchTooLarge {
        op_size: Some(op_size),
        batch_size: manager.content_size_in_bytes(),
        count: manager.length(),
        limit: manager.options().hard_limit.unwrap_or(usize::MAX),
        ..Default::default()
    })
}
