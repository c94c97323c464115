use criterion::{criterion_group, criterion_main, Criterion};
use logos_outbox::{
    Batch, BatchManager, BatchManagerOptions, ChannelTransport, Compressor, Lz4Compressor, Op,
    OpSplitter, OpType, Outbox, OutboxConfig, PendingStateLedger, Splitter, SubmissionMode,
};
use std::hint::black_box;
use tokio::sync::mpsc;
use uuid::Uuid;

fn typical_op(i: usize) -> Op {
    // Realistic CRDT delta: header + repetitive structure
    let mut contents = Vec::with_capacity(128);
    contents.extend_from_slice(&[0u8; 16]);
    contents.extend_from_slice(&(i as u64).to_le_bytes());
    for _ in 0..4 {
        contents.extend_from_slice(b"insert_content_block_");
    }
    Op::new(OpType::DataStoreOp, contents, i as u64)
}

fn bench_batch_manager_push_pop(c: &mut Criterion) {
    c.bench_function("batch_manager_push_pop_1k", |b| {
        b.iter(|| {
            let mut manager = BatchManager::new(BatchManagerOptions::unbounded());
            for i in 0..1000 {
                let _ = manager.push(black_box(typical_op(i)));
            }
            black_box(manager.pop_batch());
        })
    });
}

fn bench_lz4_compress_batch(c: &mut Criterion) {
    let batch = Batch::new((0..1000).map(typical_op).collect());
    let compressor = Lz4Compressor::new();

    c.bench_function("lz4_compress_batch_1k_ops", |b| {
        b.iter(|| black_box(compressor.compress_batch(black_box(&batch))))
    });
}

fn bench_split_compressed(c: &mut Criterion) {
    let batch = Batch::new(vec![Op::new(OpType::DataStoreOp, vec![7u8; 1024 * 1024], 0)]);
    let splitter = OpSplitter::new(Some(200 * 1024));

    c.bench_function("split_1MB_into_200KB_chunks", |b| {
        b.iter(|| black_box(splitter.split_compressed_batch(black_box(batch.clone()))))
    });
}

fn bench_outbox_flush(c: &mut Criterion) {
    c.bench_function("outbox_submit_flush_1k_ops", |b| {
        b.iter(|| {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let transport = ChannelTransport::new(Uuid::nil(), Uuid::nil(), tx, SubmissionMode::Batch);
            let mut outbox = Outbox::new(OutboxConfig::default(), transport, PendingStateLedger::new());
            for i in 0..1000 {
                outbox.submit(typical_op(i)).unwrap();
            }
            outbox.flush().unwrap();
            black_box(rx.try_recv().ok());
        })
    });
}

criterion_group!(
    benches,
    bench_batch_manager_push_pop,
    bench_lz4_compress_batch,
    bench_split_compressed,
    bench_outbox_flush
);
criterion_main!(benches);
