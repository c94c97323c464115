//! Pending-op ledger.
//!
//! Every op that leaves the outbox is recorded here in its original,
//! uncompressed form. The ledger is what lets a reconnecting client
//! resubmit ops that were sent (or silently dropped) while the
//! connection was going away.
//!
//! Reference: Kleppmann, Chapter 5 — Replication

use std::collections::VecDeque;
use std::time::Instant;

use crate::protocol::{LocalOpMetadata, OpMetadata, OpType};

/// Append-only sink for submitted ops.
pub trait PendingLedger {
    fn on_submit_message(
        &mut self,
        op_type: OpType,
        reference_sequence_number: u64,
        contents: &[u8],
        local_op_metadata: Option<&LocalOpMetadata>,
        metadata: Option<&OpMetadata>,
    );
}

/// One recorded op.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub op_type: OpType,
    pub reference_sequence_number: u64,
    pub contents: Vec<u8>,
    pub local_op_metadata: Option<LocalOpMetadata>,
    pub metadata: Option<OpMetadata>,
    pub submitted_at: Instant,
}

/// In-memory FIFO ledger.
///
/// Ops are acknowledged from the front in submission order; whatever is
/// left when the connection drops is drained for replay.
#[derive(Debug, Default)]
pub struct PendingStateLedger {
    queue: VecDeque<PendingMessage>,
    total_recorded: u64,
}

impl PendingStateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unacknowledged ops.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Ops recorded since creation, acknowledged or not.
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }

    /// Total content bytes awaiting acknowledgement.
    pub fn total_bytes(&self) -> usize {
        self.queue.iter().map(|m| m.contents.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingMessage> {
        self.queue.iter()
    }

    /// Drop the oldest op once the service has sequenced it.
    pub fn ack_oldest(&mut self) -> Option<PendingMessage> {
        self.queue.pop_front()
    }

    /// Take every unacknowledged op, oldest first, for resubmission.
    pub fn drain_for_replay(&mut self) -> Vec<PendingMessage> {
        let drained: Vec<_> = self.queue.drain(..).collect();
        if !drained.is_empty() {
            log::info!("Draining {} pending ops for replay", drained.len());
        }
        drained
    }
}

impl PendingLedger for PendingStateLedger {
    fn on_submit_message(
        &mut self,
        op_type: OpType,
        reference_sequence_number: u64,
        contents: &[u8],
        local_op_metadata: Option<&LocalOpMetadata>,
        metadata: Option<&OpMetadata>,
    ) {
        self.queue.push_back(PendingMessage {
            op_type,
            reference_sequence_number,
            contents: contents.to_vec(),
            local_op_metadata: local_op_metadata.cloned(),
            metadata: metadata.cloned(),
            submitted_at: Instant::now(),
        });
        self.total_recorded += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ledger: &mut PendingStateLedger, seq: u64, contents: &[u8]) {
        ledger.on_submit_message(OpType::DataStoreOp, seq, contents, None, None);
    }

    #[test]
    fn test_records_in_order() {
        let mut ledger = PendingStateLedger::new();
        record(&mut ledger, 1, b"a");
        record(&mut ledger, 2, b"bb");
        record(&mut ledger, 3, b"ccc");

        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.total_bytes(), 6);
        let seqs: Vec<u64> = ledger.iter().map(|m| m.reference_sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_ack_pops_front() {
        let mut ledger = PendingStateLedger::new();
        record(&mut ledger, 1, b"a");
        record(&mut ledger, 2, b"b");

        let acked = ledger.ack_oldest().unwrap();
        assert_eq!(acked.contents, b"a");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.total_recorded(), 2);
    }

    #[test]
    fn test_drain_for_replay() {
        let mut ledger = PendingStateLedger::new();
        for i in 0..10 {
            record(&mut ledger, i, &[i as u8]);
        }
        let replay = ledger.drain_for_replay();
        assert_eq!(replay.len(), 10);
        assert_eq!(replay[0].contents, vec![0]);
        assert!(ledger.is_empty());
        assert!(ledger.drain_for_replay().is_empty());
    }

    #[test]
    fn test_keeps_local_metadata() {
        let mut ledger = PendingStateLedger::new();
        let local = serde_json::json!({ "handle": 12 });
        ledger.on_submit_message(OpType::Attach, 4, b"x", Some(&local), None);

        let entry = ledger.iter().next().unwrap();
        assert_eq!(entry.op_type, OpType::Attach);
        assert_eq!(entry.local_op_metadata.as_ref(), Some(&local));
    }
}
