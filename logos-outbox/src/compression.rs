//! Batch compression.
//!
//! The LZ4 compressor packs every op's contents into the first op of the
//! batch and leaves the rest as empty placeholders, so the op count (and
//! every op's metadata) survives compression:
//!
//! ```text
//!  before:  [ A (900B) | B (400B) | C (700B) ]
//!  after:   [ lz4([A,B,C]) (~300B, compressed) | B' (0B) | C' (0B) ]
//! ```
//!
//! Reference: Patterson & Hennessy — Section 5.7 (Data Compression)

use crate::batch_manager::Batch;
use crate::protocol::{CompressionAlgorithm, Op, OpMetadata};

/// Compresses an accumulated batch into an equivalent, smaller one.
///
/// Implementations must not mutate the input and must return a batch
/// whose size reflects its actual contents.
pub trait Compressor {
    fn compress_batch(&self, batch: &Batch) -> Result<Batch, CompressionError>;
}

/// LZ4 block compression over the packed contents of a batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

impl Lz4Compressor {
    pub fn new() -> Self {
        Self
    }

    /// Restore the original contents of a batch produced by
    /// [`Compressor::compress_batch`]. Uncompressed batches come back as-is.
    pub fn decompress_batch(&self, batch: &Batch) -> Result<Batch, CompressionError> {
        let Some(first) = batch.messages().first() else {
            return Ok(Batch::empty());
        };
        if first.compression().is_none() {
            return Ok(batch.clone());
        }

        let packed = lz4_flex::decompress_size_prepended(first.contents())
            .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))?;
        let (contents, _): (Vec<Vec<u8>>, _) =
            bincode::serde::decode_from_slice(&packed, bincode::config::standard())
                .map_err(|e| CompressionError::Unpack(e.to_string()))?;

        if contents.len() != batch.len() {
            return Err(CompressionError::OpCountMismatch {
                expected: batch.len(),
                got: contents.len(),
            });
        }

        let messages = batch
            .messages()
            .iter()
            .zip(contents)
            .map(|(op, contents)| {
                let metadata = op.metadata().cloned().and_then(|mut m| {
                    m.compressed = None;
                    (!m.is_empty()).then_some(m)
                });
                rebuild(op, contents, metadata, None)
            })
            .collect();
        Ok(Batch::new(messages))
    }
}

impl Compressor for Lz4Compressor {
    fn compress_batch(&self, batch: &Batch) -> Result<Batch, CompressionError> {
        let Some(first) = batch.messages().first() else {
            return Ok(Batch::empty());
        };

        let contents: Vec<&[u8]> = batch.messages().iter().map(Op::contents).collect();
        let packed = bincode::serde::encode_to_vec(&contents, bincode::config::standard())
            .map_err(|e| CompressionError::Pack(e.to_string()))?;
        let compressed = lz4_flex::compress_prepend_size(&packed);

        log::trace!(
            "Compressed {} ops: {} -> {} bytes",
            batch.len(),
            batch.content_size_in_bytes(),
            compressed.len()
        );

        let mut metadata = first.metadata().cloned().unwrap_or_default();
        metadata.compressed = Some(true);

        let mut messages = Vec::with_capacity(batch.len());
        messages.push(rebuild(
            first,
            compressed,
            Some(metadata),
            Some(CompressionAlgorithm::Lz4),
        ));
        for op in &batch.messages()[1..] {
            messages.push(rebuild(op, Vec::new(), op.metadata().cloned(), None));
        }
        Ok(Batch::new(messages))
    }
}

fn rebuild(
    op: &Op,
    contents: Vec<u8>,
    metadata: Option<OpMetadata>,
    compression: Option<CompressionAlgorithm>,
) -> Op {
    let mut rebuilt = Op::new(op.op_type(), contents, op.reference_sequence_number());
    if let Some(metadata) = metadata {
        rebuilt = rebuilt.with_metadata(metadata);
    }
    if let Some(local) = op.local_op_metadata() {
        rebuilt = rebuilt.with_local_op_metadata(local.clone());
    }
    if let Some(compression) = compression {
        rebuilt = rebuilt.with_compression(compression);
    }
    rebuilt
}

/// Compression errors.
#[derive(Debug, Clone, PartialEq)]
pub enum CompressionError {
    /// Op contents could not be packed for compression
    Pack(String),
    /// LZ4 decompression failed
    DecompressionFailed(String),
    /// Decompressed payload is not a packed op list
    Unpack(String),
    /// Packed op count differs from the batch it arrived in
    OpCountMismatch { expected: usize, got: usize },
}

impl std::fmt::Display for CompressionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionError::Pack(e) => write!(f, "Failed to pack batch contents: {e}"),
            CompressionError::DecompressionFailed(e) => write!(f, "Decompression failed: {e}"),
            CompressionError::Unpack(e) => write!(f, "Failed to unpack batch contents: {e}"),
            CompressionError::OpCountMismatch { expected, got } => {
                write!(f, "Op count mismatch: expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for CompressionError {}
