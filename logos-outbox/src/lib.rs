//! # logos-outbox — Outbound op batching for Logos collaboration
//!
//! Groups locally generated ops into size-bounded batches, compresses and
//! splits them when they get large, hands them to the connection, and
//! records every op in a pending ledger for replay after reconnect.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  submit / submit_attach  ┌──────────────────────┐
//! │ Editor ops   │ ───────────────────────► │ Outbox               │
//! └──────────────┘                          │  attach BatchManager │
//!                                           │  main   BatchManager │
//!                                           └──────────┬───────────┘
//!                                                      │ flush()
//!                         ┌────────────────────────────┼─────────────┐
//!                         ▼                            ▼             ▼
//!                   ┌────────────┐              ┌───────────┐  ┌───────────┐
//!                   │ Compressor │ ──► Splitter │ Transport │  │ Ledger    │
//!                   │ (LZ4)      │              │ (channel) │  │ (pending) │
//!                   └────────────┘              └───────────┘  └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Op model and bincode wire envelope
//! - [`batch_manager`] — Size-tracked op accumulator
//! - [`compression`] — LZ4 batch compression
//! - [`splitter`] — Chunking of oversized compressed batches
//! - [`transport`] — Submission boundary and channel transport
//! - [`ledger`] — Pending-op ledger
//! - [`config`] — Outbox configuration and limit resolution
//! - [`outbox`] — The batching pipeline
//!
//! ## Defaults
//!
//! | Setting | Value |
//! |---------|-------|
//! | Compression threshold | 600KB |
//! | Max batch size (wire) | 950KB |
//! | Chunk size | 200KB |
//! | Attach soft limit (no compression) | 64KB |

pub mod protocol;
pub mod batch_manager;
pub mod compression;
pub mod splitter;
pub mod transport;
pub mod ledger;
pub mod config;
pub mod outbox;

// Re-exports for convenience
pub use protocol::{
    CompressionAlgorithm, LocalOpMetadata, Op, OpMetadata, OpType, OutboundMessage,
    ProtocolError, WireMessage, WirePayload,
};
pub use batch_manager::{Batch, BatchCheckpoint, BatchManager, BatchManagerOptions};
pub use compression::{CompressionError, Compressor, Lz4Compressor};
pub use splitter::{ChunkReassembler, ChunkedOp, OpSplitter, SplitBatch, Splitter};
pub use transport::{BatchSender, ChannelTransport, SubmissionMode, Transport, TransportStats};
pub use ledger::{PendingLedger, PendingMessage, PendingStateLedger};
pub use config::{resolve_batch_limits, BatchLimits, CompressionOptions, OutboxConfig};
pub use outbox::{BatchTooLarge, Outbox, OutboxCheckpoint, OutboxError, OutboxStats};
