//! Submission boundary.
//!
//! A [`Transport`] always accepts single ops. Transports that can put a
//! whole batch on the wire atomically also hand out a [`BatchSender`];
//! the outbox prefers that path whenever it is available.
//!
//! [`ChannelTransport`] is the client-side implementation: it encodes
//! [`WireMessage`]s and pushes them into the channel drained by the
//! WebSocket writer task. The channel is unbounded, so a send only fails
//! once the writer task is gone, and `should_send` reports that first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{OpMetadata, OpType, OutboundMessage, WireMessage};

/// Atomic multi-op submission.
pub trait BatchSender {
    fn submit_batch(&mut self, messages: Vec<OutboundMessage>);
}

/// Network-facing side of the outbox.
pub trait Transport {
    /// Whether the connection can take ops right now.
    fn should_send(&self) -> bool;

    /// Single-op submission.
    fn submit(
        &mut self,
        op_type: OpType,
        contents: &[u8],
        batch: bool,
        metadata: Option<&OpMetadata>,
    );

    /// Push out anything `submit` buffered.
    fn flush(&mut self);

    /// Batch-capable transports return themselves here.
    fn batch_sender(&mut self) -> Option<&mut dyn BatchSender> {
        None
    }
}

/// How a [`ChannelTransport`] submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionMode {
    /// Whole batches as one wire message
    Batch,
    /// One wire message per op, released on flush
    SingleOp,
}

/// Channel transport statistics.
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub bytes_sent: u64,
}

/// Transport over the outgoing WebSocket channel.
pub struct ChannelTransport {
    client_id: Uuid,
    doc_id: Uuid,
    outgoing_tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Shared with the connection task
    connected: Arc<AtomicBool>,
    mode: SubmissionMode,
    /// Encoded single ops waiting for `flush`
    buffered: Vec<Vec<u8>>,
    stats: TransportStats,
}

impl ChannelTransport {
    pub fn new(
        client_id: Uuid,
        doc_id: Uuid,
        outgoing_tx: mpsc::UnboundedSender<Vec<u8>>,
        mode: SubmissionMode,
    ) -> Self {
        Self {
            client_id,
            doc_id,
            outgoing_tx,
            connected: Arc::new(AtomicBool::new(true)),
            mode,
            buffered: Vec::new(),
            stats: TransportStats::default(),
        }
    }

    /// Handle the connection task flips on connect/disconnect.
    pub fn connection_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn mode(&self) -> SubmissionMode {
        self.mode
    }

    pub fn buffered_count(&self) -> usize {
        self.buffered.len()
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    fn send_encoded(&mut self, bytes: Vec<u8>) {
        let len = bytes.len() as u64;
        match self.outgoing_tx.send(bytes) {
            Ok(()) => {
                self.stats.messages_sent += 1;
                self.stats.bytes_sent += len;
            }
            Err(e) => {
                self.stats.messages_dropped += 1;
                log::warn!("Outgoing channel closed, dropped {len} byte message: {e}");
            }
        }
    }

    fn encode(&self, msg: &WireMessage) -> Option<Vec<u8>> {
        match msg.encode() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::error!("Failed to encode outbound message: {e}");
                None
            }
        }
    }
}

impl Transport for ChannelTransport {
    fn should_send(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.outgoing_tx.is_closed()
    }

    fn submit(
        &mut self,
        op_type: OpType,
        contents: &[u8],
        batch: bool,
        metadata: Option<&OpMetadata>,
    ) {
        let msg = WireMessage::single(
            self.client_id,
            self.doc_id,
            op_type,
            contents.to_vec(),
            batch,
            metadata.cloned(),
        );
        if let Some(bytes) = self.encode(&msg) {
            self.buffered.push(bytes);
        }
    }

    fn flush(&mut self) {
        for bytes in std::mem::take(&mut self.buffered) {
            self.send_encoded(bytes);
        }
    }

    fn batch_sender(&mut self) -> Option<&mut dyn BatchSender> {
        match self.mode {
            SubmissionMode::Batch => Some(self),
            SubmissionMode::SingleOp => None,
        }
    }
}

impl BatchSender for ChannelTransport {
    fn submit_batch(&mut self, messages: Vec<OutboundMessage>) {
        let msg = WireMessage::batch(self.client_id, self.doc_id, messages);
        if let Some(bytes) = self.encode(&msg) {
            self.send_encoded(bytes);
        }
    }
}
