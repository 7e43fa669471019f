use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use wabot_core::{archive::ArchiveStore, config::Config};

mod console;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wabot_core::logging::init("wabot")?;

    let cfg = Config::load().context("failed to load config")?;
    let store = Arc::new(
        ArchiveStore::open(cfg.archive.clone())
            .await
            .context("failed to open archive store")?,
    );

    if cfg.janitor_on_start {
        let report = store.run_maintenance().await;
        info!(
            media_removed = report.janitor.purge.media_removed,
            text_dropped = report.janitor.purge.text_dropped,
            evicted = report.sweep.total_removed(),
            "startup maintenance done"
        );
    }

    store.start_background().await;
    info!("archive bot running; type `help` for commands");

    tokio::select! {
        res = console::run(store.clone()) => {
            if let Err(e) = res {
                error!(error = %e, "console failed");
            }
        }
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
    }

    store.stop_background().await;
    Ok(())
}
