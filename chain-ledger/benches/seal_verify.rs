//! Sealing and verification throughput

use chain_ledger::{Config, Ledger, PartitionKey, Payload, TransactionBuilder, TransactionKind};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rust_decimal::Decimal;

fn memory_ledger() -> Ledger {
    let mut config = Config::in_memory();
    config.sealing.max_block_transactions = 100;
    config.sealing.time_sealing_enabled = false;
    Ledger::open(config).expect("open ledger")
}

fn bench_content_hash(c: &mut Criterion) {
    let builder = TransactionBuilder::new();
    let tx = builder
        .build(
            TransactionKind::LoanRepayment,
            "M001",
            "COOP-01",
            Decimal::new(125_050, 2),
            "repayment-311",
            Payload::new()
                .with("loan_id", "L-0042")
                .with("installment", 7i64)
                .with("rate", Decimal::new(1250, 4)),
        )
        .expect("build");

    c.bench_function("content_hash", |b| {
        b.iter(|| black_box(&tx).compute_content_hash())
    });
}

fn bench_record_and_seal(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("record_and_seal");

    for size in [10usize, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let ledger = memory_ledger();
            let partition = PartitionKey::new("COOP-01");
            let mut row = 0u64;
            b.iter(|| {
                rt.block_on(async {
                    for _ in 0..size {
                        row += 1;
                        ledger
                            .record(
                                TransactionKind::Deposit,
                                "M001",
                                partition.clone(),
                                Decimal::from(10),
                                format!("row-{}", row),
                                Payload::new(),
                            )
                            .await
                            .expect("record");
                    }
                    ledger.seal_now(&partition).await.expect("seal");
                })
            });
        });
    }

    group.finish();
}

fn bench_verify_chain(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let ledger = memory_ledger();
    let partition = PartitionKey::new("COOP-01");

    rt.block_on(async {
        for row in 0..1_000 {
            ledger
                .record(
                    TransactionKind::Contribution,
                    "M001",
                    partition.clone(),
                    Decimal::from(5),
                    format!("row-{}", row),
                    Payload::new(),
                )
                .await
                .expect("record");
        }
    });

    c.bench_function("verify_chain_1000_tx", |b| {
        b.iter(|| {
            let report = ledger.verify_chain(&partition).expect("verify");
            assert!(report.valid);
        })
    });
}

criterion_group!(
    benches,
    bench_content_hash,
    bench_record_and_seal,
    bench_verify_chain
);
criterion_main!(benches);
