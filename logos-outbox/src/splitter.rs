//! Chunking of compressed batches that are still over the wire ceiling.
//!
//! After compression the whole payload lives in the first op. The
//! splitter cuts that op into chunk ops; every chunk but the last goes out
//! on its own, and the last chunk takes the first op's place in the batch:
//!
//! ```text
//!  compressed:  [ Z (3.1MB) | p | p ]
//!
//!  leading:     [ chunk 1/4 ] [ chunk 2/4 ] [ chunk 3/4 ]
//!  batch:       [ chunk 4/4 | p | p ]
//! ```
//!
//! The receiver feeds chunk ops through a [`ChunkReassembler`] to get the
//! compressed op back.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch_manager::Batch;
use crate::protocol::{CompressionAlgorithm, Op, OpMetadata, OpType, ProtocolError};

/// Result of splitting a compressed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitBatch {
    /// Chunks submitted one per message, ahead of `batch`
    pub leading_chunks: Vec<Op>,
    /// Final chunk followed by the batch's placeholder ops
    pub batch: Batch,
}

impl SplitBatch {
    pub fn chunk_count(&self) -> usize {
        self.leading_chunks.len() + 1
    }

    /// Size of the largest unit that goes on the wire.
    pub fn largest_unit_in_bytes(&self) -> usize {
        self.leading_chunks
            .iter()
            .map(Op::size)
            .max()
            .unwrap_or(0)
            .max(self.batch.content_size_in_bytes())
    }
}

/// Splits over-large compressed batches into transmittable chunks.
pub trait Splitter {
    fn is_batch_chunking_enabled(&self) -> bool;

    /// Chunk size used, if chunking is configured.
    fn chunk_size_in_bytes(&self) -> Option<usize>;

    fn split_compressed_batch(&self, batch: Batch) -> Result<SplitBatch, ProtocolError>;
}

/// Contents of a `ChunkedOp` op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkedOp {
    /// 1-based
    pub chunk_id: u32,
    pub total_chunks: u32,
    pub contents: Vec<u8>,
    pub original_type: OpType,
    pub original_metadata: Option<OpMetadata>,
    pub original_compression: Option<CompressionAlgorithm>,
}

impl ChunkedOp {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (chunk, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(chunk)
    }
}

/// Fixed-size chunking of the first op's contents.
#[derive(Debug, Clone, Copy)]
pub struct OpSplitter {
    chunk_size_in_bytes: Option<usize>,
}

impl OpSplitter {
    /// `None` (or zero) disables chunking.
    pub fn new(chunk_size_in_bytes: Option<usize>) -> Self {
        Self {
            chunk_size_in_bytes: chunk_size_in_bytes.filter(|size| *size > 0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }
}

impl Splitter for OpSplitter {
    fn is_batch_chunking_enabled(&self) -> bool {
        self.chunk_size_in_bytes.is_some()
    }

    fn chunk_size_in_bytes(&self) -> Option<usize> {
        self.chunk_size_in_bytes
    }

    fn split_compressed_batch(&self, batch: Batch) -> Result<SplitBatch, ProtocolError> {
        let Some(chunk_size) = self.chunk_size_in_bytes else {
            return Ok(SplitBatch {
                leading_chunks: Vec::new(),
                batch,
            });
        };

        let mut messages = batch.into_messages();
        if messages.is_empty() {
            return Ok(SplitBatch {
                leading_chunks: Vec::new(),
                batch: Batch::empty(),
            });
        }
        let first = messages.remove(0);
        let reference_sequence_number = first.reference_sequence_number();

        let mut pieces: Vec<&[u8]> = first.contents().chunks(chunk_size).collect();
        if pieces.is_empty() {
            pieces.push(&[]);
        }
        let total_chunks = pieces.len() as u32;

        let mut chunks: Vec<Op> = pieces
            .iter()
            .enumerate()
            .map(|(i, piece)| -> Result<Op, ProtocolError> {
                let chunk = ChunkedOp {
                    chunk_id: i as u32 + 1,
                    total_chunks,
                    contents: piece.to_vec(),
                    original_type: first.op_type(),
                    original_metadata: first.metadata().cloned(),
                    original_compression: first.compression(),
                };
                Ok(Op::new(
                    OpType::ChunkedOp,
                    chunk.encode()?,
                    reference_sequence_number,
                ))
            })
            .collect::<Result<_, ProtocolError>>()?;

        log::debug!(
            "Split {} byte compressed op into {} chunks of <= {} bytes",
            first.size(),
            total_chunks,
            chunk_size
        );

        let Some(mut last) = chunks.pop() else {
            return Err(ProtocolError::SerializationError("no chunks produced".to_string()));
        };
        if let Some(metadata) = first.metadata() {
            last = last.with_metadata(metadata.clone());
        }

        let mut final_messages = Vec::with_capacity(messages.len() + 1);
        final_messages.push(last);
        final_messages.extend(messages);

        Ok(SplitBatch {
            leading_chunks: chunks,
            batch: Batch::new(final_messages),
        })
    }
}

/// Rebuilds chunked ops on the receiving side, per sending client.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    in_progress: HashMap<Uuid, PartialOp>,
}

#[derive(Debug)]
struct PartialOp {
    next_chunk: u32,
    contents: Vec<u8>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk op from `client_id`.
    ///
    /// Returns the original op once its final chunk arrives.
    pub fn process(&mut self, client_id: Uuid, op: &Op) -> Result<Option<Op>, ProtocolError> {
        if op.op_type() != OpType::ChunkedOp {
            return Err(ProtocolError::InvalidMessageType);
        }
        let chunk = ChunkedOp::decode(op.contents())?;

        let expected = self
            .in_progress
            .get(&client_id)
            .map(|partial| partial.next_chunk)
            .unwrap_or(1);
        if chunk.chunk_id != expected {
            self.in_progress.remove(&client_id);
            return Err(ProtocolError::ChunkOutOfOrder {
                expected,
                got: chunk.chunk_id,
            });
        }

        let partial = self.in_progress.entry(client_id).or_insert_with(|| PartialOp {
            next_chunk: 1,
            contents: Vec::new(),
        });
        partial.contents.extend_from_slice(&chunk.contents);
        partial.next_chunk += 1;

        if chunk.chunk_id < chunk.total_chunks {
            return Ok(None);
        }

        let contents = self
            .in_progress
            .remove(&client_id)
            .map(|partial| partial.contents)
            .unwrap_or_default();
        let mut rebuilt = Op::new(chunk.original_type, contents, op.reference_sequence_number());
        if let Some(metadata) = chunk.original_metadata {
            rebuilt = rebuilt.with_metadata(metadata);
        }
        if let Some(compression) = chunk.original_compression {
            rebuilt = rebuilt.with_compression(compression);
        }
        Ok(Some(rebuilt))
    }

    /// Number of clients with a partially received op.
    pub fn pending_count(&self) -> usize {
        self.in_progress.len()
    }
}
