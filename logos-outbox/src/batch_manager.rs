//! Size-tracked op accumulator.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                BatchManager                   │
//! │                                              │
//! │  pending: [ op | op | op | ... ]  Σ bytes    │
//! │                                              │
//! │  push:  reject if Σ + op > hard_limit        │
//! │  soft:  Σ ≥ soft_limit → owner flushes soon  │
//! │  pop:   take everything, stamp batch markers │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The outbox owns two of these (attach flow and main flow) with
//! different limits.

use crate::protocol::Op;

/// An ordered group of ops and their aggregate size.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    messages: Vec<Op>,
    content_size_in_bytes: usize,
    has_reentrant_ops: bool,
}

impl Batch {
    pub fn new(messages: Vec<Op>) -> Self {
        let content_size_in_bytes = messages.iter().map(Op::size).sum();
        Self {
            messages,
            content_size_in_bytes,
            has_reentrant_ops: false,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Op] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Op> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn content_size_in_bytes(&self) -> usize {
        self.content_size_in_bytes
    }

    /// Reference sequence number of the first op, if any.
    pub fn reference_sequence_number(&self) -> Option<u64> {
        self.messages.first().map(Op::reference_sequence_number)
    }

    /// Whether any op was pushed while the manager was mid-flush.
    pub fn has_reentrant_ops(&self) -> bool {
        self.has_reentrant_ops
    }
}

/// Limits for a [`BatchManager`]. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchManagerOptions {
    pub hard_limit: Option<usize>,
    pub soft_limit: Option<usize>,
    pub enable_op_reentry_check: bool,
}

impl BatchManagerOptions {
    pub fn unbounded() -> Self {
        Self::default()
    }
}

/// Snapshot of a manager's pending state.
///
/// Between two pops the pending list only grows, so its length and size
/// are enough to restore it. `generation` ties the snapshot to the batch
/// it was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCheckpoint {
    length: usize,
    content_size_in_bytes: usize,
    generation: u64,
}

impl BatchCheckpoint {
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn content_size_in_bytes(&self) -> usize {
        self.content_size_in_bytes
    }
}

/// Ordered, size-tracked accumulator of ops.
pub struct BatchManager {
    options: BatchManagerOptions,
    pending: Vec<Op>,
    content_size_in_bytes: usize,
    /// Set between `start_flush` and `finish_flush`
    flushing: bool,
    /// Index of the first op pushed mid-flush
    first_reentrant_index: Option<usize>,
    /// Incremented on every pop
    generation: u64,
}

impl BatchManager {
    pub fn new(options: BatchManagerOptions) -> Self {
        Self {
            options,
            pending: Vec::new(),
            content_size_in_bytes: 0,
            flushing: false,
            first_reentrant_index: None,
            generation: 0,
        }
    }

    /// Append an op.
    ///
    /// Returns the op back untouched if it would push the batch past the
    /// hard limit, or if it arrives mid-flush with the reentry check on.
    /// The manager is not modified on rejection.
    pub fn push(&mut self, op: Op) -> Result<(), Op> {
        if self.flushing && self.options.enable_op_reentry_check {
            log::warn!(
                "Rejected reentrant op ({:?}, {} bytes) pushed during flush",
                op.op_type(),
                op.size()
            );
            return Err(op);
        }

        let new_size = self.content_size_in_bytes.saturating_add(op.size());
        if let Some(hard_limit) = self.options.hard_limit {
            if new_size > hard_limit {
                return Err(op);
            }
        }

        if self.flushing && self.first_reentrant_index.is_none() {
            self.first_reentrant_index = Some(self.pending.len());
        }
        self.content_size_in_bytes = new_size;
        self.pending.push(op);
        Ok(())
    }

    /// Remove and return the whole pending batch.
    ///
    /// Multi-op batches get `batch: true` on the first op and
    /// `batch: false` on the last.
    pub fn pop_batch(&mut self) -> Batch {
        let mut messages = std::mem::take(&mut self.pending);
        let content_size_in_bytes = self.content_size_in_bytes;
        let has_reentrant_ops = self.first_reentrant_index.take().is_some();
        self.content_size_in_bytes = 0;
        self.generation += 1;

        if messages.len() > 1 {
            messages[0].set_batch_marker(true);
            if let Some(last) = messages.last_mut() {
                last.set_batch_marker(false);
            }
        }

        Batch {
            messages,
            content_size_in_bytes,
            has_reentrant_ops,
        }
    }

    /// Pop the batch and mark the manager as flushing until
    /// [`finish_flush`](Self::finish_flush).
    pub fn start_flush(&mut self) -> Batch {
        self.flushing = true;
        self.pop_batch()
    }

    pub fn finish_flush(&mut self) {
        self.flushing = false;
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    pub fn length(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn content_size_in_bytes(&self) -> usize {
        self.content_size_in_bytes
    }

    pub fn options(&self) -> &BatchManagerOptions {
        &self.options
    }

    /// Whether a non-empty batch has reached its soft limit.
    pub fn is_over_soft_limit(&self) -> bool {
        match self.options.soft_limit {
            Some(soft_limit) => !self.is_empty() && self.content_size_in_bytes >= soft_limit,
            None => false,
        }
    }

    pub fn checkpoint(&self) -> BatchCheckpoint {
        BatchCheckpoint {
            length: self.pending.len(),
            content_size_in_bytes: self.content_size_in_bytes,
            generation: self.generation,
        }
    }

    /// Restore the pending batch to `checkpoint`.
    ///
    /// Returns `false` and leaves the manager alone when the checkpoint
    /// belongs to a batch that has since been popped.
    pub fn rollback(&mut self, checkpoint: BatchCheckpoint) -> bool {
        self.rollback_with(checkpoint, |_| {})
    }

    /// Like [`rollback`](Self::rollback), handing each discarded op to
    /// `on_discard`, newest first.
    pub fn rollback_with<F>(&mut self, checkpoint: BatchCheckpoint, mut on_discard: F) -> bool
    where
        F: FnMut(Op),
    {
        if checkpoint.generation != self.generation || checkpoint.length > self.pending.len() {
            log::warn!(
                "Ignoring stale batch checkpoint (generation {} vs {})",
                checkpoint.generation,
                self.generation
            );
            return false;
        }

        while self.pending.len() > checkpoint.length {
            if let Some(op) = self.pending.pop() {
                on_discard(op);
            }
        }
        self.content_size_in_bytes = checkpoint.content_size_in_bytes;
        if self
            .first_reentrant_index
            .is_some_and(|index| index >= checkpoint.length)
        {
            self.first_reentrant_index = None;
        }
        true
    }
}
