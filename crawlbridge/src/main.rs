//! crawlbridge — external file crawler agent.
//!
//! Walks one file tree, extracts metadata and access rights, and keeps
//! the remote indexing platform in sync over the crawler RPC channel.

mod args;

use anyhow::{bail, Context, Result};
use args::Args;
use clap::Parser;
use crawlbridge_cache::DedupCache;
use crawlbridge_client::{ApiClient, ClientConfig};
use crawlbridge_crypto::SharedSecrets;
use crawlbridge_engine::{
    CrawlOrchestrator, LocalFileProvider, OrchestratorConfig, StandardMimePolicy,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ClientConfig {
        endpoint: args.server.clone(),
        crawler_type: args.crawler.clone(),
        organisation_id: args.org.clone(),
        kb_id: args.kb.clone(),
        sid: args.sid.clone(),
        system_key: args.aes.clone().unwrap_or_default(),
        source_id: args.source,
        use_encryption: args.encryption,
        exit_after_run: args.exit_when_done,
        use_cache: !args.disable_cache,
        ..Default::default()
    };
    config.validate().context("bad starting parameters")?;

    let secrets = if config.use_encryption {
        Some(Arc::new(
            SharedSecrets::new(&config.system_key).context("bad starting parameters")?,
        ))
    } else {
        None
    };

    // One stop flag shared by every component; flipped on ctrl-c.
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("stop requested, finishing up");
            let _ = stop_tx.send(true);
        }
    });

    let api = Arc::new(ApiClient::new(config.clone(), secrets, stop_rx.clone())?);
    let source = api.source().await.context("could not load the source")?;
    info!(
        "source \"{}\" loaded (kb {}, source {})",
        source.name, source.kb_id, source.source_id
    );

    // The walk root: explicit flag first, then the source's own settings.
    let root = match &args.root {
        Some(root) => root.clone(),
        None => {
            let props = source.properties()?;
            if props.share_path.trim().is_empty() {
                bail!("no walk root: pass --root or set sharePath on the source");
            }
            props.share_path.clone().into()
        }
    };

    let cache = if config.use_cache {
        let cache = DedupCache::open(&args.cache_path)?;
        info!("using crawler cache: {}", cache.path().display());
        Some(cache)
    } else {
        None
    };

    let mut orchestrator = CrawlOrchestrator::new(
        api,
        cache,
        Arc::new(LocalFileProvider::new(root)),
        None,
        Arc::new(StandardMimePolicy::default()),
        OrchestratorConfig::default(),
        stop_rx,
    );
    orchestrator.run().await?;

    info!("crawler stopped");
    Ok(())
}
