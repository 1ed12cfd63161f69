//! Demo CLI: register a handful of streams against the in-memory Registry,
//! let them tick for a while, and print periodic snapshots. Exercises the
//! same API a real control surface (HTTP/CLI) would sit on top of, without
//! committing this crate to any particular one (§1 Non-goals).

use clap::Parser;
use hls_sentinel::registry::{ConfigStore, StoredStream};
use hls_sentinel::thumbnail::NoopThumbnailCapture;
use hls_sentinel::{Config, Registry};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sentinel-demo", about = "Run the HLS sentinel against a small fleet")]
struct Args {
    /// HLS manifest URLs to watch, one stream per URL.
    #[arg(long = "manifest", required = true)]
    manifests: Vec<String>,

    /// How long to run before exiting, in seconds.
    #[arg(long, default_value_t = 60)]
    duration_s: u64,

    /// Where to persist the registered stream list between runs.
    #[arg(long, default_value = "sentinel-streams.json")]
    state_file: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let prober: Arc<dyn hls_sentinel::probe::Prober> = Arc::new(hls_sentinel::probe::IsahcProber::new()?);
    let registry = Registry::new(Config::default(), prober, Arc::new(NoopThumbnailCapture));

    let store = ConfigStore::new(&args.state_file);
    let mut restored = 0;
    for stored in store.load().unwrap_or_default() {
        if registry
            .create_stream(stored.name.clone(), stored.manifest_url.clone())
            .await
            .is_ok()
        {
            restored += 1;
        }
    }
    tracing::info!(restored, "restored streams from state file");

    for (i, manifest_url) in args.manifests.iter().enumerate() {
        match registry
            .create_stream(format!("stream-{i}"), manifest_url.clone())
            .await
        {
            Ok(id) => tracing::info!(%id, manifest_url, "stream registered"),
            Err(e) => tracing::warn!(manifest_url, error = %e, "failed to register stream"),
        }
    }

    let mut subscriber = registry.subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(event) = subscriber.recv().await {
            tracing::info!(?event, "fleet event");
        }
    });

    let mut ticks = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.duration_s);
    while tokio::time::Instant::now() < deadline {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(10)) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, shutting down early");
                break;
            }
        }
        ticks += 1;
        for summary in registry.list_streams().await {
            let state = summary
                .health
                .map(|h| format!("{:?}: {}", h.state, h.reason))
                .unwrap_or_else(|| "no data yet".to_string());
            println!("[{}] {} -> {}", ticks, summary.stream.name, state);
        }
    }

    let to_persist: Vec<StoredStream> = registry
        .list_streams()
        .await
        .into_iter()
        .map(|s| StoredStream {
            id: s.stream.id,
            name: s.stream.name,
            manifest_url: s.stream.manifest_url,
            created_at: s.stream.created_at,
        })
        .collect();
    if let Err(e) = store.save(&to_persist) {
        tracing::warn!(error = %e, "failed to persist stream list");
    }

    registry.shutdown().await;
    watcher.abort();
    Ok(())
}
