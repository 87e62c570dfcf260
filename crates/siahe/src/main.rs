use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use siahe_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), siahe_core::Error> {
    siahe_core::logging::init("siahe")?;

    let cfg = Arc::new(Config::load()?);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received, shutting down");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "cannot listen for interrupts"),
            }
        }
    });

    if let Err(e) = siahe_telegram::router::run(cfg, shutdown).await {
        error!(error = ?e, "siahe failed");
        return Err(siahe_core::Error::External(format!("bot failed: {e:#}")));
    }

    Ok(())
}
