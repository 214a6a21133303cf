//! Ledger audit binary
//!
//! Re-verifies a ledger's stored state and prints JSON reports on stdout.
//! Exits with status 2 when any integrity violation is found.

use anyhow::Context;
use chain_ledger::{
    telemetry::init_tracing, Block, Config, Hash256, Ledger, PartitionKey,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "chain-audit")]
#[command(version, about = "Verify a tamper-evident chain ledger", long_about = None)]
struct Cli {
    /// Config file path (defaults to CHAIN_LEDGER_* environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory override
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Hex Ed25519 public key; enables seal signature checks
    #[arg(long, global = true)]
    verifying_key: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify one partition's chain from genesis
    VerifyChain {
        /// Partition (tenant) key
        #[arg(long)]
        partition: String,
    },
    /// Verify one transaction and its block membership
    VerifyTx {
        /// Transaction ID
        #[arg(long)]
        id: Uuid,
    },
    /// List a partition's sealed blocks
    ListBlocks {
        /// Partition (tenant) key
        #[arg(long)]
        partition: String,
    },
    /// Verify every partition's chain
    VerifyAll,
}

#[derive(Serialize)]
struct BlockSummary {
    index: u64,
    block_hash: Hash256,
    previous_block_hash: Hash256,
    sealed_at: DateTime<Utc>,
    transactions: usize,
    signed: bool,
}

impl From<&Block> for BlockSummary {
    fn from(block: &Block) -> Self {
        Self {
            index: block.index,
            block_hash: block.block_hash,
            previous_block_hash: block.previous_block_hash,
            sealed_at: block.sealed_at(),
            transactions: block.len(),
            signed: block.seal_signature.is_some(),
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::from_env().context("Failed to load config from environment")?,
    };

    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if let Some(key) = &cli.verifying_key {
        config.signing.verifying_key_hex = Some(key.clone());
    }
    if cli.json_logs {
        config.logging.json = true;
    }

    // Auditing never seals
    config.sealing.time_sealing_enabled = false;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    init_tracing(&config.logging)?;

    tracing::info!(
        data_dir = %config.storage.data_dir.display(),
        "Starting chain audit"
    );

    let ledger = Ledger::open(config).context("Failed to open ledger")?;

    let clean = match &cli.command {
        Commands::VerifyChain { partition } => {
            let report = ledger.verify_chain(&PartitionKey::new(partition.as_str()))?;
            print_json(&report)?;
            report.valid
        }
        Commands::VerifyTx { id } => {
            let report = ledger.verify_transaction(*id)?;
            print_json(&report)?;
            report.valid
        }
        Commands::ListBlocks { partition } => {
            let blocks = ledger.list_blocks(&PartitionKey::new(partition.as_str()))?;
            let summaries: Vec<BlockSummary> = blocks.iter().map(BlockSummary::from).collect();
            print_json(&summaries)?;
            true
        }
        Commands::VerifyAll => {
            let mut reports = Vec::new();
            for partition in ledger.partitions()? {
                reports.push(ledger.verify_chain(&partition)?);
            }
            print_json(&reports)?;
            reports.iter().all(|report| report.valid)
        }
    };

    ledger.shutdown().await?;

    if clean {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::warn!("Integrity violation found");
        Ok(ExitCode::from(2))
    }
}
