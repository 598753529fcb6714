//! chainstore CLI: inspect persisted chain state.
//!
//! Usage:
//! ```bash
//! chainstore status ./chain.db
//! chainstore status ./chain.db --prefix eth
//! chainstore info
//! ```

use std::env;
use std::process;

use anyhow::Context;
use chainstore_core::{ChainStore, StoreConfig};
use chainstore_storage::SqliteBackend;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "info" => cmd_info(),
        "status" => {
            if let Err(e) = cmd_status(&args[2..]) {
                eprintln!("error: {e:#}");
                process::exit(1);
            }
        }
        "version" | "--version" | "-V" => {
            println!("chainstore {}", env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("chainstore {}", env!("CARGO_PKG_VERSION"));
    println!("Reorg-tolerant persistence for blockchain indexers\n");
    println!("USAGE:");
    println!("    chainstore <COMMAND>\n");
    println!("COMMANDS:");
    println!("    status <DB> [--prefix P]  Print finalized head and hot window as JSON");
    println!("    info                      Show ChainStore defaults");
    println!("    version                   Print version");
    println!("    help                      Print this help");
}

fn cmd_info() {
    let cfg = StoreConfig::default();
    println!("ChainStore v{}", env!("CARGO_PKG_VERSION"));
    println!("  Head keys: {} / {}", cfg.head_height_key, cfg.head_hash_key);
    println!("  Hot window key: {}", cfg.top_blocks_key);
    match cfg.top_window_limit {
        Some(n) => println!("  Finalized window bound: {n} entries"),
        None => println!("  Finalized window bound: none"),
    }
    println!("  Backends: memory, SQLite");
}

fn cmd_status(args: &[String]) -> anyhow::Result<()> {
    let path = args.first().context("missing database path")?;
    let mut config = StoreConfig::default();
    if let Some(i) = args.iter().position(|a| a == "--prefix") {
        let prefix = args.get(i + 1).context("--prefix needs a value")?;
        config = config.with_prefix(prefix.as_str());
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let mut store = ChainStore::new(Box::new(SqliteBackend::open(path)), config);
        let state = store
            .connect()
            .await
            .with_context(|| format!("opening {path}"))?;
        println!("{}", serde_json::to_string_pretty(&state)?);
        store.disconnect().await?;
        Ok::<(), anyhow::Error>(())
    })
}
