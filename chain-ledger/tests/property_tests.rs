//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Determinism: building then recomputing a content hash always agrees
//! - Sensitivity: changing a hashed field changes the hash
//! - Linkage: any sequence of seals yields a chain that verifies
//! - Localization: tampering with block k is reported at index k
//! - Sizing: the size trigger cuts blocks of exactly the configured size

use chain_ledger::{
    Config, Hash256, IntegrityViolation, Ledger, PartitionKey, Payload, PayloadValue,
    TransactionBuilder, TransactionKind,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

/// Strategy for generating amounts (signed, two decimal places)
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (-1_000_000_00i64..1_000_000_00i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Strategy for generating transaction kinds
fn kind_strategy() -> impl Strategy<Value = TransactionKind> {
    prop_oneof![
        Just(TransactionKind::Deposit),
        Just(TransactionKind::Withdrawal),
        Just(TransactionKind::Contribution),
        Just(TransactionKind::LoanDisbursement),
        Just(TransactionKind::LoanRepayment),
        Just(TransactionKind::MemberStateChange),
        Just(TransactionKind::Adjustment),
        "[a-z_]{1,12}".prop_map(TransactionKind::Custom),
    ]
}

/// Strategy for generating payload values
fn payload_value_strategy() -> impl Strategy<Value = PayloadValue> {
    prop_oneof![
        "[ -~]{0,16}".prop_map(PayloadValue::Text),
        any::<i64>().prop_map(PayloadValue::Integer),
        amount_strategy().prop_map(PayloadValue::Decimal),
        any::<bool>().prop_map(PayloadValue::Bool),
        any::<i64>().prop_map(PayloadValue::Timestamp),
    ]
}

/// Strategy for generating payload fields
fn payload_fields_strategy() -> impl Strategy<Value = Vec<(String, PayloadValue)>> {
    prop::collection::vec(("[a-z]{1,8}", payload_value_strategy()), 0..6)
}

fn memory_ledger(max_block_transactions: usize) -> Ledger {
    let mut config = Config::in_memory();
    config.sealing.max_block_transactions = max_block_transactions;
    config.sealing.time_sealing_enabled = false;
    Ledger::open(config).unwrap()
}

async fn record(ledger: &Ledger, partition: &PartitionKey, n: usize) {
    ledger
        .record(
            TransactionKind::Contribution,
            "M001",
            partition.clone(),
            Decimal::from(n as i64 + 1),
            format!("row-{}", n),
            Payload::new(),
        )
        .await
        .unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: Content hash is reproducible and independent of payload insertion order
    #[test]
    fn prop_content_hash_deterministic(
        kind in kind_strategy(),
        subject in "[A-Z][0-9]{3}",
        amount in amount_strategy(),
        external in "[a-z0-9-]{1,20}",
        fields in payload_fields_strategy(),
    ) {
        let builder = TransactionBuilder::new();

        let mut forward = Payload::new();
        for (key, value) in &fields {
            forward.insert(key.clone(), value.clone());
        }

        let tx = builder
            .build(kind, subject, "COOP-01", amount, external, forward.clone())
            .unwrap();
        prop_assert!(tx.has_valid_content_hash());
        prop_assert_eq!(tx.compute_content_hash(), tx.content_hash);

        // Same map built in reverse (last write per key wins either way)
        let mut reversed = Payload::new();
        for (key, value) in fields.iter().rev() {
            if !reversed.fields.contains_key(key) {
                reversed.insert(key.clone(), forward.get(key).cloned().unwrap());
            }
        }
        let mut reordered = tx.clone();
        reordered.payload = reversed;
        prop_assert_eq!(reordered.compute_content_hash(), tx.content_hash);
    }

    /// Property: Any amount change is visible in the content hash
    #[test]
    fn prop_amount_change_changes_hash(
        amount in amount_strategy(),
        delta in (1i64..1_000_000).prop_map(|cents| Decimal::new(cents, 2)),
    ) {
        let builder = TransactionBuilder::new();
        let tx = builder
            .build(TransactionKind::Deposit, "M001", "COOP-01", amount, "row-1", Payload::new())
            .unwrap();

        let mut tampered = tx.clone();
        tampered.amount = amount + delta;
        prop_assert_ne!(tampered.compute_content_hash(), tx.content_hash);
    }

    /// Property: Any sequence of seals yields a linked, valid chain
    #[test]
    fn prop_sealed_chain_verifies(batches in prop::collection::vec(1usize..5, 1..8)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = memory_ledger(1000);
            let partition = PartitionKey::new("COOP-01");

            let mut n = 0;
            for batch in &batches {
                for _ in 0..*batch {
                    record(&ledger, &partition, n).await;
                    n += 1;
                }
                ledger.seal_now(&partition).await.unwrap();
            }

            let blocks = ledger.list_blocks(&partition).unwrap();
            prop_assert_eq!(blocks.len(), batches.len());

            let mut previous = Hash256::ZERO;
            for (index, block) in blocks.iter().enumerate() {
                prop_assert_eq!(block.index, index as u64);
                prop_assert_eq!(block.previous_block_hash, previous);
                prop_assert_eq!(block.compute_hash(), block.block_hash);
                previous = block.block_hash;
            }

            let report = ledger.verify_chain(&partition).unwrap();
            prop_assert!(report.valid);
            prop_assert_eq!(report.transactions_checked, n as u64);
            prop_assert_eq!(report.tip, previous);

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: Rewriting block k's stored hash is reported at index k
    #[test]
    fn prop_tampered_block_localized(
        (block_count, k) in (2usize..6).prop_flat_map(|n| (Just(n), 0..n)),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = memory_ledger(1000);
            let partition = PartitionKey::new("COOP-01");

            for n in 0..block_count {
                record(&ledger, &partition, n).await;
                ledger.seal_now(&partition).await.unwrap();
            }

            let mut block = ledger.get_block_at(&partition, k as u64).unwrap().unwrap();
            block.block_hash = Hash256::from_bytes([0xee; 32]);
            ledger.store().put_block(&block).unwrap();

            let report = ledger.verify_chain(&partition).unwrap();
            prop_assert!(!report.valid);
            prop_assert_eq!(report.broken_at_index, Some(k as u64));
            let is_block_hash_mismatch = matches!(
                report.violation,
                Some(IntegrityViolation::BlockHashMismatch { .. })
            );
            prop_assert!(is_block_hash_mismatch);

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: The size trigger produces full blocks and leaves the remainder pending
    #[test]
    fn prop_size_trigger_block_sizes(max in 1usize..6, count in 1usize..30) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = memory_ledger(max);
            let partition = PartitionKey::new("COOP-01");

            for n in 0..count {
                record(&ledger, &partition, n).await;
            }

            let blocks = ledger.list_blocks(&partition).unwrap();
            prop_assert_eq!(blocks.len(), count / max);
            prop_assert!(blocks.iter().all(|block| block.len() == max));
            prop_assert_eq!(ledger.pending_transactions(&partition).unwrap().len(), count % max);

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }
}
