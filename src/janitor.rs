//! Periodic removal of expired grants and access tokens.
//!
//! Access tokens still referenced by a refresh token survive the sweep so that
//! refreshing an expired token keeps working.

use crate::errors::OAuthError;
use crate::oauth::types::Clock;
use crate::storage::traits::OAuthStorage;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// Counts from a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub grants: usize,
    pub access_tokens: usize,
}

pub struct Janitor {
    storage: Arc<dyn OAuthStorage>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl Janitor {
    pub fn new(storage: Arc<dyn OAuthStorage>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            storage,
            clock,
            interval,
        }
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, OAuthError> {
        let now = self.clock.now();
        let report = SweepReport {
            grants: self.storage.cleanup_expired_grants(now).await?,
            access_tokens: self.storage.cleanup_expired_access_tokens(now).await?,
        };

        if report != SweepReport::default() {
            tracing::debug!(
                grants = report.grants,
                access_tokens = report.access_tokens,
                "swept expired records"
            );
        }
        Ok(report)
    }

    /// Sweep on every tick until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval = ?self.interval, "janitor started");
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        tracing::error!(error = ?err, "janitor sweep failed");
                    }
                }
            }
        }
        tracing::info!("janitor stopped");
    }
}
