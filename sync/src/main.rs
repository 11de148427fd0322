mod api;
mod cache;
mod config;
mod content;
mod items;
mod storage;
mod sync;

use anyhow::{anyhow, Result};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::ApiClient;
use crate::cache::SyncCache;
use crate::config::Config;
use crate::storage::FsStorage;
use crate::sync::Orchestrator;

fn main() -> Result<()> {
    // Pretty logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("register") => {
            let code = args
                .get(2)
                .ok_or_else(|| anyhow!("usage: slate-sync register <one-time-code>"))?;
            register(code)
        }
        Some("sync") => run_sync(),
        Some("status") => status(),
        _ => {
            eprintln!("usage: slate-sync <register <one-time-code> | sync | status>");
            std::process::exit(2);
        }
    }
}

fn register(code: &str) -> Result<()> {
    let mut config = Config::load()?.unwrap_or_else(Config::new);
    let token = ApiClient::register(&config::auth_base(), code, &config.device_id)?;
    config.device_token = token;
    config.persist()?;
    info!(
        "device registered; credentials stored at {}",
        config::config_path()?.display()
    );
    Ok(())
}

fn run_sync() -> Result<()> {
    let config = Config::load()?
        .filter(|c| !c.device_token.is_empty())
        .ok_or_else(|| anyhow!("not registered; run `slate-sync register <one-time-code>` first"))?;

    let mut client = ApiClient::new(
        &config::auth_base(),
        &config::sync_base(),
        &config.device_token,
    )?;
    let cache_path = config::cache_path()?;
    let mut cache = SyncCache::load(&cache_path);
    let output_root = config::output_dir()?;
    info!("mirroring into {}", output_root.display());

    let storage = FsStorage;
    let mut orchestrator =
        Orchestrator::new(&mut client, &storage, &mut cache, cache_path, output_root);
    orchestrator.run()?;
    Ok(())
}

fn status() -> Result<()> {
    let cache = SyncCache::load(&config::cache_path()?);
    match cache.last_run {
        Some(stamp) => println!("last sync: {}", stamp.to_rfc3339()),
        None => println!("last sync: never"),
    }
    println!("{} documents tracked", cache.records.len());

    let mut ids: Vec<&String> = cache.records.keys().collect();
    ids.sort();
    for id in ids {
        println!("  {} -> {}", id, cache.records[id].output.display());
    }
    Ok(())
}
