//! Rewind CLI

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use rewind::storage::Storage;
use rewind::{CacheKey, DirectoryStorage};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!("Rewind v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("Usage: rewind <command> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  list <recording-dir>          List recorded exchanges");
    eprintln!("  show <recording-dir> <key>    Show one recorded exchange");
    process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        usage();
    }

    let result = match (args[1].as_str(), args.len()) {
        ("list", 3) => list(PathBuf::from(&args[2])).await,
        ("show", 4) => show(PathBuf::from(&args[2]), &args[3]).await,
        ("list" | "show", _) => usage(),
        (command, _) => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'rewind' for usage information.");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn open(dir: PathBuf) -> Result<DirectoryStorage> {
    if !dir.is_dir() {
        anyhow::bail!("Directory not found: {}", dir.display());
    }
    DirectoryStorage::open(&dir).with_context(|| format!("opening {}", dir.display()))
}

async fn list(dir: PathBuf) -> Result<()> {
    let storage = open(dir)?;
    let cancel = CancellationToken::new();
    let keys = storage.keys().await.context("listing recordings")?;

    println!("Recording directory: {}", storage.dir().display());
    println!("{} exchange(s)", keys.len());
    println!();

    for key in keys {
        match storage.get(&key, &cancel).await {
            Ok(Some(exchange)) => println!(
                "{}  {:<7} {:<60} {} ({} bytes)",
                &key.as_str()[..16],
                exchange.request.method,
                exchange.request.url,
                exchange.response.status,
                exchange.response.body.len()
            ),
            Ok(None) => {}
            Err(e) => println!("{}  <unreadable: {e}>", &key.as_str()[..16]),
        }
    }

    Ok(())
}

async fn show(dir: PathBuf, key: &str) -> Result<()> {
    let storage = open(dir)?;
    let key: CacheKey = key.parse()?;

    let exchange = storage
        .get(&key, &CancellationToken::new())
        .await?
        .with_context(|| format!("no exchange stored under {key}"))?;

    println!("Key:      {key}");
    println!("Recorded: {} ns since epoch", exchange.recorded_at);
    println!();
    println!("> {} {}", exchange.request.method, exchange.request.url);
    for (name, values) in exchange.request.headers.iter() {
        for value in values {
            println!("> {name}: {value}");
        }
    }
    println!("> ({} byte body)", exchange.request.body.len());
    println!();
    println!("< {}", exchange.response.status);
    for (name, values) in exchange.response.headers.iter() {
        for value in values {
            println!("< {name}: {value}");
        }
    }
    println!("< ({} byte body)", exchange.response.body.len());

    Ok(())
}
