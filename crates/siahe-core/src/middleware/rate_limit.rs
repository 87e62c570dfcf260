use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    middleware::{suspend, Middleware},
    transport::{OutboundRequest, Reply},
    Error, Result,
};

/// Reservation-based token bucket (GCRA).
///
/// `tat` is the theoretical arrival time of the next request. A request may go
/// out once `now >= tat - tolerance`, where the tolerance allows `burst - 1`
/// extra requests back-to-back.
#[derive(Debug)]
struct Gcra {
    interval: Duration,
    tolerance: Duration,
    tat: Instant,
    /// Bumped whenever a flood wait invalidates outstanding reservations.
    generation: u64,
}

impl Gcra {
    fn new(interval: Duration, burst: u32, now: Instant) -> Self {
        Self {
            interval,
            tolerance: interval
                .checked_mul(burst.saturating_sub(1))
                .unwrap_or(Duration::MAX),
            tat: now,
            generation: 0,
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self, now: Instant) -> Duration {
        let tat = self.tat.max(now);
        let allowed_at = tat
            .checked_sub(self.tolerance)
            .map_or(now, |t| t.max(now));
        self.tat = tat.checked_add(self.interval).unwrap_or(tat);
        allowed_at.saturating_duration_since(now)
    }

    /// No slot is handed out before `until`; earlier reservations must be
    /// taken again.
    fn hold_until(&mut self, until: Instant) {
        self.tat = self.tat.max(until);
        self.generation += 1;
    }
}

/// Caps outbound requests to one per `interval` with a `burst` allowance.
///
/// Callers that find no token are suspended, never rejected. Reservations are
/// handed out in lock order. A flood wait pushes every slot past the window,
/// so queued callers leave it spaced instead of all at once.
pub struct RateLimiter {
    bucket: Mutex<Gcra>,
}

impl RateLimiter {
    pub fn new(interval: Duration, burst: u32) -> Self {
        Self {
            bucket: Mutex::new(Gcra::new(interval, burst.max(1), Instant::now())),
        }
    }

    fn with_bucket<T>(&self, f: impl FnOnce(&mut Gcra) -> T) -> T {
        f(&mut self.bucket.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl Middleware for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn admit(&self, _req: &OutboundRequest, cancel: &CancellationToken) -> Result<()> {
        loop {
            let (wait, generation) =
                self.with_bucket(|b| (b.reserve(Instant::now()), b.generation));
            if wait > Duration::ZERO {
                suspend(cancel, sleep(wait)).await?;
            }
            if self.with_bucket(|b| b.generation) == generation {
                return Ok(());
            }
        }
    }

    fn observe(&self, _req: &OutboundRequest, outcome: &Result<Reply>) {
        if let Err(Error::FloodWait(wait)) = outcome {
            let now = Instant::now();
            let until = now.checked_add(*wait).unwrap_or(now);
            self.with_bucket(|b| b.hold_until(until));
        }
    }
}
