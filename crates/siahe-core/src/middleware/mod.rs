//! Outbound request pacing.
//!
//! Every call to the platform goes through a [`MiddlewareChain`]: an explicit,
//! ordered list of stages that may suspend the caller before the transport is
//! reached. The standard chain is rate limiting first, then flood wait.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    transport::{OutboundRequest, Reply, Transport},
    Error, Result,
};

pub mod flood_wait;
pub mod rate_limit;

pub use flood_wait::FloodWaiter;
pub use rate_limit::RateLimiter;

/// One wrapper stage around the transport.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    /// Suspend until the request may proceed. Fails only with `Error::Cancelled`.
    async fn admit(&self, req: &OutboundRequest, cancel: &CancellationToken) -> Result<()>;

    /// Called with every transport outcome, in stage order.
    fn observe(&self, _req: &OutboundRequest, _outcome: &Result<Reply>) {}
}

#[derive(Clone, Copy, Debug)]
pub struct ChainConfig {
    /// Steady spacing between requests. Zero disables rate limiting.
    pub rate_interval: Duration,
    /// Requests allowed back-to-back before spacing applies.
    pub rate_burst: u32,
    /// How many times a flood-waited request is re-submitted before giving up.
    pub flood_max_retries: u32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rate_interval: Duration::from_millis(100),
            rate_burst: 3,
            flood_max_retries: 5,
        }
    }
}

/// The single path from any component to the transport.
///
/// Safe for concurrent use; the stages hold their own synchronization.
pub struct MiddlewareChain {
    transport: Arc<dyn Transport>,
    stages: Vec<Arc<dyn Middleware>>,
    cancel: CancellationToken,
    flood_max_retries: u32,
}

impl MiddlewareChain {
    pub fn new(
        transport: Arc<dyn Transport>,
        stages: Vec<Arc<dyn Middleware>>,
        cancel: CancellationToken,
        flood_max_retries: u32,
    ) -> Self {
        Self {
            transport,
            stages,
            cancel,
            flood_max_retries,
        }
    }

    /// Rate limiting, then flood wait.
    pub fn standard(
        transport: Arc<dyn Transport>,
        cfg: ChainConfig,
        cancel: CancellationToken,
    ) -> Self {
        let stages: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(RateLimiter::new(cfg.rate_interval, cfg.rate_burst)),
            Arc::new(FloodWaiter::new()),
        ];
        Self::new(transport, stages, cancel, cfg.flood_max_retries)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run `req` through every stage and the transport.
    ///
    /// A flood-waited request is re-submitted through all stages (so it also
    /// waits out the window it triggered) up to `flood_max_retries` times.
    /// Authorization is never re-submitted.
    pub async fn invoke(&self, req: OutboundRequest) -> Result<Reply> {
        let mut floods = 0u32;
        loop {
            for stage in &self.stages {
                stage.admit(&req, &self.cancel).await?;
            }

            let outcome = suspend(&self.cancel, self.transport.invoke(req.call.clone()))
                .await
                .and_then(|r| r);

            if matches!(outcome, Err(Error::Cancelled)) {
                return outcome;
            }
            for stage in &self.stages {
                stage.observe(&req, &outcome);
            }

            match outcome {
                Err(Error::FloodWait(wait))
                    if floods < self.flood_max_retries && req.call.resubmits_after_flood() =>
                {
                    floods += 1;
                    debug!(
                        call = req.call.name(),
                        attempt = floods,
                        wait = ?wait,
                        "re-submitting after flood wait"
                    );
                }
                other => return other,
            }
        }
    }
}

/// Await `fut` unless `cancel` fires first.
pub(crate) async fn suspend<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        out = fut => Ok(out),
    }
}
