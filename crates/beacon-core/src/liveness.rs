//! Liveness monitoring.
//!
//! Two mechanisms keep the durable presence flag honest:
//!
//! - a per-connection heartbeat task that emits `heartbeat` envelopes on a
//!   fixed period, and
//! - a process-wide sweep that demotes users flagged online whose last
//!   activity is older than the inactivity threshold.

use crate::presence::{OfflineCause, PresenceLifecycle};
use crate::store::{StoreError, StoreProvider};
use beacon_protocol::Envelope;
use beacon_transport::{OutboundHandle, TransportError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Liveness timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Period of server heartbeats on each connection.
    pub heartbeat_interval: Duration,
    /// Period of the staleness sweep.
    pub sweep_interval: Duration,
    /// Silence after which an online user is demoted.
    pub inactivity_timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            inactivity_timeout: Duration::from_secs(300),
        }
    }
}

/// Spawn the heartbeat task for a connection.
///
/// The first heartbeat goes out one period after the call. The task stops
/// when `cancel` fires or the channel is closed.
pub fn spawn_heartbeat(
    handle: OutboundHandle,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_heartbeat(handle, period, cancel))
}

async fn run_heartbeat(handle: OutboundHandle, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let heartbeat = Arc::new(Envelope::Heartbeat);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = ticker.tick() => match handle.send(Arc::clone(&heartbeat)) {
                Ok(()) => trace!(connection = %handle.id(), "Heartbeat"),
                Err(TransportError::QueueFull) => {
                    warn!(connection = %handle.id(), "Outbound queue full, heartbeat skipped");
                }
                Err(_) => break,
            },
        }
    }

    debug!(connection = %handle.id(), "Heartbeat stopped");
}

/// Result of one sweep iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Users the store reported as stale.
    pub stale: usize,
    /// Users this iteration actually moved to offline.
    pub demoted: Vec<String>,
    /// Demotions that failed.
    pub failed: usize,
}

/// Periodic staleness sweep.
pub struct LivenessMonitor {
    presence: PresenceLifecycle,
    stores: Arc<dyn StoreProvider>,
    config: LivenessConfig,
}

impl LivenessMonitor {
    #[must_use]
    pub fn new(
        presence: PresenceLifecycle,
        stores: Arc<dyn StoreProvider>,
        config: LivenessConfig,
    ) -> Self {
        Self {
            presence,
            stores,
            config,
        }
    }

    /// Run a single sweep against a fresh store handle.
    ///
    /// # Errors
    ///
    /// Returns an error if no store handle can be acquired or the stale
    /// query fails. Individual demotion failures are counted instead.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let store = self.stores.open().await?;

        let Some(cutoff) = chrono::Duration::from_std(self.config.inactivity_timeout)
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
        else {
            return Ok(SweepReport::default());
        };

        let stale = store.stale_online_users(cutoff).await?;
        let mut report = SweepReport {
            stale: stale.len(),
            ..SweepReport::default()
        };

        for identity in stale {
            match self
                .presence
                .go_offline(store.as_ref(), &identity, OfflineCause::Inactive)
                .await
            {
                Ok(change) if change.is_changed() => report.demoted.push(identity),
                Ok(_) => {}
                Err(e) => {
                    error!(identity = %identity, error = %e, "Failed to demote inactive user");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Sweep on the configured interval until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let period = self.config.sweep_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = period.as_secs(),
            timeout_secs = self.config.inactivity_timeout.as_secs(),
            "Liveness sweep started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = ticker.tick() => match self.sweep_once(Utc::now()).await {
                    Ok(report) if !report.demoted.is_empty() => {
                        info!(demoted = ?report.demoted, failed = report.failed, "Demoted inactive users");
                    }
                    Ok(report) => debug!(stale = report.stale, "Liveness sweep found nothing to do"),
                    Err(e) => error!(error = %e, "Liveness sweep failed"),
                },
            }
        }

        info!("Liveness sweep stopped");
    }

    /// Spawn [`run`](Self::run) as a task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
