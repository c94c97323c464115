//! Op model and binary wire envelope for outbound submission.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌───────────┬──────────┬──────────────────────────────────────┐
//! │ client_id │ doc_id   │ payload                              │
//! │ 16 bytes  │ 16 bytes │ Batch([msg, msg, ...]) | Op(single)  │
//! └───────────┴──────────┴──────────────────────────────────────┘
//! ```
//!
//! An [`Op`] is what the client queues; an [`OutboundMessage`] is what a
//! batch-capable transport puts on the wire for it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of container-level ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpType {
    /// Op addressed to a data store inside the document
    DataStoreOp = 1,
    /// Attaches a newly created collaborative object
    Attach = 2,
    /// Attaches an uploaded blob
    BlobAttach = 3,
    /// Assigns an alias to a data store
    Alias = 4,
    /// Reserves a range of ids for this client
    IdAllocation = 5,
    /// One piece of a split compressed batch
    ChunkedOp = 6,
    /// Op resubmitted after a reconnect
    Rejoin = 7,
}

/// Compression applied to an op's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    Lz4,
}

/// Wire-visible flags attached to an op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpMetadata {
    /// `Some(true)` on the first op of a multi-op batch, `Some(false)` on the last
    pub batch: Option<bool>,
    /// Set when `contents` holds a compressed payload
    pub compressed: Option<bool>,
}

impl OpMetadata {
    pub fn is_empty(&self) -> bool {
        self.batch.is_none() && self.compressed.is_none()
    }
}

/// Opaque value the caller gets back when the op is replayed.
pub type LocalOpMetadata = serde_json::Value;

/// A locally generated op waiting to be transmitted.
///
/// `contents` never changes after construction; the outbox only ever
/// adjusts batch markers on `metadata`.
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    op_type: OpType,
    contents: Vec<u8>,
    reference_sequence_number: u64,
    metadata: Option<OpMetadata>,
    local_op_metadata: Option<LocalOpMetadata>,
    compression: Option<CompressionAlgorithm>,
}

/// The `{type, contents}` form submitted on the single-op path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeserializedContent<'a> {
    pub op_type: OpType,
    pub contents: &'a [u8],
}

impl Op {
    pub fn new(op_type: OpType, contents: Vec<u8>, reference_sequence_number: u64) -> Self {
        Self {
            op_type,
            contents,
            reference_sequence_number,
            metadata: None,
            local_op_metadata: None,
            compression: None,
        }
    }

    pub fn with_metadata(mut self, metadata: OpMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_local_op_metadata(mut self, local_op_metadata: LocalOpMetadata) -> Self {
        self.local_op_metadata = Some(local_op_metadata);
        self
    }

    pub fn with_compression(mut self, compression: CompressionAlgorithm) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn op_type(&self) -> OpType {
        self.op_type
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    /// Size used for batch accounting.
    pub fn size(&self) -> usize {
        self.contents.len()
    }

    pub fn reference_sequence_number(&self) -> u64 {
        self.reference_sequence_number
    }

    pub fn metadata(&self) -> Option<&OpMetadata> {
        self.metadata.as_ref()
    }

    pub fn local_op_metadata(&self) -> Option<&LocalOpMetadata> {
        self.local_op_metadata.as_ref()
    }

    pub fn compression(&self) -> Option<CompressionAlgorithm> {
        self.compression
    }

    pub fn is_compressed(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.compressed)
            .unwrap_or(false)
    }

    pub fn deserialized_content(&self) -> DeserializedContent<'_> {
        DeserializedContent {
            op_type: self.op_type,
            contents: &self.contents,
        }
    }

    pub(crate) fn set_batch_marker(&mut self, marker: bool) {
        self.metadata.get_or_insert_with(OpMetadata::default).batch = Some(marker);
    }
}

/// One op as carried by a batch submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub op_type: OpType,
    pub contents: Vec<u8>,
    pub reference_sequence_number: u64,
    pub metadata: Option<OpMetadata>,
    pub compression: Option<CompressionAlgorithm>,
}

impl From<&Op> for OutboundMessage {
    fn from(op: &Op) -> Self {
        Self {
            op_type: op.op_type,
            contents: op.contents.clone(),
            reference_sequence_number: op.reference_sequence_number,
            metadata: op.metadata.clone(),
            compression: op.compression,
        }
    }
}

/// Payload of a [`WireMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WirePayload {
    /// Atomic batch
    Batch(Vec<OutboundMessage>),
    /// Single op from the legacy path
    Op {
        op_type: OpType,
        contents: Vec<u8>,
        batch: bool,
        metadata: Option<OpMetadata>,
    },
}

/// Top-level outbound envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub client_id: Uuid,
    pub doc_id: Uuid,
    pub payload: WirePayload,
}

impl WireMessage {
    pub fn batch(client_id: Uuid, doc_id: Uuid, messages: Vec<OutboundMessage>) -> Self {
        Self {
            client_id,
            doc_id,
            payload: WirePayload::Batch(messages),
        }
    }

    pub fn single(
        client_id: Uuid,
        doc_id: Uuid,
        op_type: OpType,
        contents: Vec<u8>,
        batch: bool,
        metadata: Option<OpMetadata>,
    ) -> Self {
        Self {
            client_id,
            doc_id,
            payload: WirePayload::Op {
                op_type,
                contents,
                batch,
                metadata,
            },
        }
    }

    /// Number of ops carried.
    pub fn op_count(&self) -> usize {
        match &self.payload {
            WirePayload::Batch(messages) => messages.len(),
            WirePayload::Op { .. } => 1,
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    /// Chunk arrived without its predecessors
    ChunkOutOfOrder { expected: u32, got: u32 },
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::ChunkOutOfOrder { expected, got } => {
                write!(f, "Chunk out of order: expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}
