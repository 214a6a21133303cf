//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the ledger. Each [`Metrics`] owns its
//! own registry, so several ledgers can live in one process.
//!
//! # Metrics
//!
//! - `chain_ledger_transactions_submitted_total` - Transactions staged
//! - `chain_ledger_duplicate_submissions_total` - Resubmissions of a known id
//! - `chain_ledger_blocks_sealed_total` - Blocks sealed
//! - `chain_ledger_integrity_violations_total` - Violations found by verification
//! - `chain_ledger_block_size` - Histogram of transactions per sealed block
//! - `chain_ledger_seal_duration_seconds` - Histogram of seal latencies
//! - `chain_ledger_pending_transactions` - Open-block size, all partitions

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transactions staged
    pub transactions_submitted: IntCounter,

    /// Idempotent resubmissions
    pub duplicate_submissions: IntCounter,

    /// Blocks sealed
    pub blocks_sealed: IntCounter,

    /// Integrity violations reported
    pub integrity_violations: IntCounter,

    /// Block size histogram
    pub block_size: Histogram,

    /// Seal duration histogram
    pub seal_duration: Histogram,

    /// Pending transactions across partitions
    pub pending_transactions: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_submitted = IntCounter::new(
            "chain_ledger_transactions_submitted_total",
            "Total number of transactions staged",
        )?;
        registry.register(Box::new(transactions_submitted.clone()))?;

        let duplicate_submissions = IntCounter::new(
            "chain_ledger_duplicate_submissions_total",
            "Total number of resubmissions of an already stored transaction",
        )?;
        registry.register(Box::new(duplicate_submissions.clone()))?;

        let blocks_sealed = IntCounter::new(
            "chain_ledger_blocks_sealed_total",
            "Total number of sealed blocks",
        )?;
        registry.register(Box::new(blocks_sealed.clone()))?;

        let integrity_violations = IntCounter::new(
            "chain_ledger_integrity_violations_total",
            "Total number of integrity violations found by verification",
        )?;
        registry.register(Box::new(integrity_violations.clone()))?;

        let block_size = Histogram::with_opts(
            HistogramOpts::new("chain_ledger_block_size", "Histogram of transactions per block")
                .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]),
        )?;
        registry.register(Box::new(block_size.clone()))?;

        let seal_duration = Histogram::with_opts(
            HistogramOpts::new(
                "chain_ledger_seal_duration_seconds",
                "Histogram of seal latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(seal_duration.clone()))?;

        let pending_transactions = IntGauge::new(
            "chain_ledger_pending_transactions",
            "Transactions staged in open blocks",
        )?;
        registry.register(Box::new(pending_transactions.clone()))?;

        Ok(Self {
            transactions_submitted,
            duplicate_submissions,
            blocks_sealed,
            integrity_violations,
            block_size,
            seal_duration,
            pending_transactions,
            registry,
        })
    }

    /// Record a staged transaction
    pub fn record_submission(&self) {
        self.transactions_submitted.inc();
        self.pending_transactions.inc();
    }

    /// Record an idempotent resubmission
    pub fn record_duplicate(&self) {
        self.duplicate_submissions.inc();
    }

    /// Record a sealed block
    pub fn record_seal(&self, block_size: usize, duration_seconds: f64) {
        self.blocks_sealed.inc();
        self.block_size.observe(block_size as f64);
        self.seal_duration.observe(duration_seconds);
        self.pending_transactions.sub(block_size as i64);
    }

    /// Record transactions found pending during recovery
    pub fn record_recovered_pending(&self, count: usize) {
        self.pending_transactions.add(count as i64);
    }

    /// Record a verification that found a violation
    pub fn record_violation(&self) {
        self.integrity_violations.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("transactions_submitted", &self.transactions_submitted.get())
            .field("blocks_sealed", &self.blocks_sealed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.transactions_submitted.get(), 0);
        assert_eq!(metrics.blocks_sealed.get(), 0);
    }

    #[test]
    fn test_instances_do_not_collide() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_submission();
        assert_eq!(a.transactions_submitted.get(), 1);
        assert_eq!(b.transactions_submitted.get(), 0);
    }

    #[test]
    fn test_record_seal_drains_pending() {
        let metrics = Metrics::new().unwrap();
        for _ in 0..3 {
            metrics.record_submission();
        }
        metrics.record_seal(3, 0.002);
        assert_eq!(metrics.blocks_sealed.get(), 1);
        assert_eq!(metrics.pending_transactions.get(), 0);
        assert_eq!(metrics.block_size.get_sample_count(), 1);
    }

    #[test]
    fn test_registry_gathers_all_families() {
        let metrics = Metrics::new().unwrap();
        metrics.record_duplicate();
        metrics.record_violation();
        assert_eq!(metrics.registry().gather().len(), 7);
    }
}
