//! attestindex CLI — run, bootstrap, and publish the indexer.
//!
//! Usage:
//! ```bash
//! attestindex index   --config chains.json --chain ethereum --db eth.db
//! attestindex resume  --config chains.json --chain ethereum --db eth.db
//! attestindex publish --config chains.json --chain ethereum --out ./checkpoints
//! attestindex info    --config chains.json --db eth.db
//! ```

use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use attestindex_core::config::ChainConfig;
use attestindex_evm::{HttpRpc, MutationCompiler};
use attestindex_storage::sqlite::SqliteStore;
use attestindex_storage::{keys, IndexStore};
use attestindex_sync::{
    resume, CheckpointPublisher, CheckpointWriter, HttpCheckpointSource, IndexDriver,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "index" => cmd_index(&args[2..]).await,
        "resume" => cmd_resume(&args[2..]).await,
        "publish" => cmd_publish(&args[2..]).await,
        "info" => cmd_info(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("attestindex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    }
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn print_usage() {
    println!("attestindex {}", env!("CARGO_PKG_VERSION"));
    println!("Incremental attestation indexer — mirrors the schema registry and");
    println!("attestation log into a local queryable store\n");
    println!("USAGE:");
    println!("    attestindex <COMMAND> [OPTIONS]\n");
    println!("COMMANDS:");
    println!("    index    Run the live index loop (resumes from published");
    println!("             checkpoints first when the chain has a checkpoint_url)");
    println!("    resume   Bootstrap the local store from published checkpoints");
    println!("    publish  Compile the chain into checkpoint files for a static host");
    println!("    info     Show configured chains and local store state");
    println!("    version  Print version");
    println!("    help     Print this help\n");
    println!("OPTIONS:");
    println!("    --config <path>  JSON chain configuration file");
    println!("    --chain <slug>   Chain to operate on");
    println!("    --db <path>      SQLite store path (default: attestindex-<chain>.db)");
    println!("    --out <dir>      Output directory for publish");
    println!("    --span <blocks>  Blocks per published checkpoint (default: 10000)");
}

fn arg_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn required(args: &[String], name: &str) -> Result<String> {
    arg_value(args, name).with_context(|| format!("missing {name} <value>"))
}

fn load_chain(args: &[String]) -> Result<ChainConfig> {
    let path = required(args, "--config")?;
    let chain = required(args, "--chain")?;
    Ok(ChainConfig::load(&path, &chain)?)
}

async fn open_store(args: &[String], chain: &str) -> Result<SqliteStore> {
    let path = arg_value(args, "--db").unwrap_or_else(|| format!("attestindex-{chain}.db"));
    Ok(SqliteStore::open(&path).await?)
}

/// Flip an [`AtomicBool`] on ctrl-c; the loops poll it between cycles.
fn stop_signal() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    tokio::spawn({
        let stop = Arc::clone(&stop);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("stop requested, finishing the current cycle");
                stop.store(true, Ordering::Relaxed);
            }
        }
    });
    stop
}

async fn cmd_index(args: &[String]) -> Result<()> {
    let config = load_chain(args)?;
    let store = open_store(args, &config.chain).await?;

    if let Some(url) = &config.checkpoint_url {
        let source = HttpCheckpointSource::new(url)?;
        let report = resume(&store, &source).await?;
        tracing::info!(
            batches = report.batches,
            cursor = report.cursor,
            "checkpoint resume complete"
        );
    }

    let rpc = HttpRpc::new(&config)?;
    let driver = IndexDriver::new(MutationCompiler::new(rpc, config));
    let stop = stop_signal();
    driver.run(&store, &stop).await?;
    Ok(())
}

async fn cmd_resume(args: &[String]) -> Result<()> {
    let config = load_chain(args)?;
    let url = config
        .checkpoint_url
        .as_deref()
        .context("chain has no checkpoint_url configured")?;
    let store = open_store(args, &config.chain).await?;

    let source = HttpCheckpointSource::new(url)?;
    let report = resume(&store, &source).await?;
    println!(
        "applied {} checkpoint batch(es), {} mutation(s); cursor at {}",
        report.batches, report.applied, report.cursor
    );
    Ok(())
}

async fn cmd_publish(args: &[String]) -> Result<()> {
    let config = load_chain(args)?;
    let out = required(args, "--out")?;
    let span: u64 = match arg_value(args, "--span") {
        Some(raw) => raw.parse().context("--span must be a block count")?,
        None => 10_000,
    };
    if span == 0 {
        bail!("--span must be positive");
    }

    let writer = CheckpointWriter::open(out)?;
    let rpc = HttpRpc::new(&config)?;
    let mut publisher = CheckpointPublisher::new(MutationCompiler::new(rpc, config), writer, span);
    let stop = stop_signal();
    publisher.run(&stop).await?;
    Ok(())
}

async fn cmd_info(args: &[String]) -> Result<()> {
    let path = required(args, "--config")?;
    let chains = ChainConfig::load_all(&path)?;

    println!("attestindex {}", env!("CARGO_PKG_VERSION"));
    for config in &chains {
        println!("\n{}", config.chain);
        println!("  rpc:         {}", config.rpc_url);
        println!("  registry:    {}", config.registry_address);
        println!("  attestation: {}", config.attestation_address);
        println!("  batch size:  {} blocks", config.batch_size);
        if let Some(url) = &config.checkpoint_url {
            println!("  checkpoints: {url}");
        }
    }

    if let Some(db) = arg_value(args, "--db") {
        let store = SqliteStore::open(&db).await?;
        let counts = store.counts().await?;
        println!("\nstore {db}");
        println!("  schemas:      {}", counts.schemas);
        println!("  attestations: {}", counts.attestations);
        println!("  timestamps:   {}", counts.timestamps);
        match store.cursor().await? {
            Some(block) => println!("  cursor:       {block}"),
            None => println!("  cursor:       (none)"),
        }
        if let Some(hash) = store.get_property(keys::LAST_CHECKPOINT).await? {
            println!("  checkpoint:   {hash}");
        }
    }
    Ok(())
}
