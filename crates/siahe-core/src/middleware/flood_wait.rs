use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    middleware::{suspend, Middleware},
    transport::{OutboundRequest, Reply},
    Error, Result,
};

/// Suspends all outbound traffic while a platform flood wait is in effect.
///
/// A flood signal observed on any response pushes `resume_at` forward; every
/// later request waits until it has passed. Overlapping signals keep the
/// longest window.
#[derive(Default)]
pub struct FloodWaiter {
    resume_at: Mutex<Option<Instant>>,
}

impl FloodWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// End of the current flood window, if one is still running.
    pub fn resume_at(&self) -> Option<Instant> {
        let until = *self.resume_at.lock().unwrap_or_else(|e| e.into_inner());
        until.filter(|t| *t > Instant::now())
    }
}

#[async_trait]
impl Middleware for FloodWaiter {
    fn name(&self) -> &'static str {
        "flood_wait"
    }

    async fn admit(&self, _req: &OutboundRequest, cancel: &CancellationToken) -> Result<()> {
        // Re-check after each sleep: the window may have been extended meanwhile.
        while let Some(until) = self.resume_at() {
            suspend(cancel, sleep_until(until)).await?;
        }
        Ok(())
    }

    fn observe(&self, req: &OutboundRequest, outcome: &Result<Reply>) {
        let Err(Error::FloodWait(wait)) = outcome else {
            return;
        };

        let until = Instant::now() + *wait;
        let mut guard = self.resume_at.lock().unwrap_or_else(|e| e.into_inner());
        if guard.map_or(true, |current| until > current) {
            *guard = Some(until);
        }
        drop(guard);

        warn!(
            wait = ?wait,
            issuer = %req.issuer,
            call = req.call.name(),
            "flood wait"
        );
    }
}
