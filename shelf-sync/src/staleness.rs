//! Generic staleness driver.
//!
//! Each updatable datum (the catalog, one manifest, one module folder) is a
//! plain value implementing [`Datum`]. The driver decides whether it is due
//! ([`needs_update`]) and runs it ([`update`]), stamping the outcome into the
//! catalog's timestamps and checkpointing.

use async_trait::async_trait;
use chrono::Duration;

use shelf_core::{Catalog, ShelfConfig};

use crate::context::SyncContext;
use crate::SyncError;

/// How often a datum is re-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Refresh once `interval` has passed, or sooner if incomplete.
    Periodic(Duration),
    /// Only incomplete data is refreshed, at most once per `window` after
    /// the last success or punt.
    RetryWindow(Duration),
}

/// Result of one successful [`Datum::perform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Performed {
    Completed,
    /// Completed, and the datum now lives under a new staleness id.
    Renamed { id: String },
    /// The user declined; nothing changed. Recorded as a punt.
    Deferred,
    /// Another task is already updating this datum.
    Busy,
}

/// What [`update`] did, for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateReport {
    Completed,
    Deferred,
    Failed(String),
    InProgress,
}

impl UpdateReport {
    pub fn is_failure(&self) -> bool {
        matches!(self, UpdateReport::Failed(_))
    }
}

#[async_trait]
pub trait Datum: Send + Sync {
    /// Key into [`shelf_core::Timestamps`].
    fn id(&self) -> String;

    fn cadence(&self, config: &ShelfConfig) -> Cadence;

    fn is_incomplete(&self, catalog: &Catalog) -> bool;

    /// Whether the datum should be considered at all (e.g. subscribed).
    fn is_eligible(&self, _catalog: &Catalog) -> bool {
        true
    }

    async fn perform(&self, ctx: &SyncContext) -> Result<Performed, SyncError>;
}

/// The last success is older than the datum's interval and the last punt is
/// older than the retry window. A datum that never ran is always expired.
pub fn is_expired<D: Datum + ?Sized>(
    datum: &D,
    catalog: &Catalog,
    config: &ShelfConfig,
    now_ms: i64,
) -> bool {
    let id = datum.id();
    let interval = match datum.cadence(config) {
        Cadence::Periodic(interval) | Cadence::RetryWindow(interval) => interval,
    };
    let older_than = |at: Option<i64>, span: Duration| match at {
        None => true,
        Some(at) => now_ms - at > span.num_milliseconds(),
    };
    older_than(catalog.timestamps.last_success(&id), interval)
        && older_than(
            catalog.timestamps.last_punt(&id),
            config.module_retry_window(),
        )
}

pub fn needs_update<D: Datum + ?Sized>(
    datum: &D,
    catalog: &Catalog,
    config: &ShelfConfig,
    now_ms: i64,
) -> bool {
    if !datum.is_eligible(catalog) {
        return false;
    }
    match datum.cadence(config) {
        Cadence::Periodic(_) => {
            datum.is_incomplete(catalog) || is_expired(datum, catalog, config, now_ms)
        }
        Cadence::RetryWindow(_) => {
            datum.is_incomplete(catalog) && is_expired(datum, catalog, config, now_ms)
        }
    }
}

/// Run `datum` once.
///
/// Success stamps `last_success(id)`; a deferral stamps the punt instead.
/// A failure is logged and notified and leaves every timestamp untouched,
/// so the normal cadence retries it.
pub async fn update<D: Datum + ?Sized>(datum: &D, ctx: &SyncContext) -> UpdateReport {
    let id = datum.id();
    tracing::debug!(id = %id, "running updater");

    let stamped = match datum.perform(ctx).await {
        Ok(Performed::Completed) => stamp_success(ctx, &id).await.map(|_| UpdateReport::Completed),
        Ok(Performed::Renamed { id: renamed }) => {
            stamp_success(ctx, &renamed).await.map(|_| UpdateReport::Completed)
        }
        Ok(Performed::Deferred) => {
            let now = ctx.now_ms();
            ctx.state
                .mutate(|c| c.timestamps.record_punt(&id, now))
                .await
                .map(|_| UpdateReport::Deferred)
        }
        Ok(Performed::Busy) => {
            tracing::info!(id = %id, "update already in progress, skipping");
            return UpdateReport::InProgress;
        }
        Err(err) => Err(err),
    };

    match stamped {
        Ok(report) => report,
        Err(err) => {
            tracing::error!(id = %id, error = %err, "update failed");
            ctx.notify(&format!("Error updating {id}: {err}"));
            UpdateReport::Failed(err.to_string())
        }
    }
}

async fn stamp_success(ctx: &SyncContext, id: &str) -> Result<(), SyncError> {
    let now = ctx.now_ms();
    ctx.state
        .mutate(|c| c.timestamps.record_success(id, now))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A datum whose behaviour is scripted per test.
    struct Probe {
        cadence: Cadence,
        incomplete: bool,
        outcome: fn() -> Result<Performed, SyncError>,
        calls: AtomicUsize,
    }

    impl Probe {
        fn periodic(outcome: fn() -> Result<Performed, SyncError>) -> Self {
            Self {
                cadence: Cadence::Periodic(Duration::days(7)),
                incomplete: false,
                outcome,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Datum for Probe {
        fn id(&self) -> String {
            "Probe".to_string()
        }

        fn cadence(&self, _config: &ShelfConfig) -> Cadence {
            self.cadence
        }

        fn is_incomplete(&self, _catalog: &Catalog) -> bool {
            self.incomplete
        }

        async fn perform(&self, _ctx: &SyncContext) -> Result<Performed, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn ok() -> Result<Performed, SyncError> {
        Ok(Performed::Completed)
    }

    fn deferred() -> Result<Performed, SyncError> {
        Ok(Performed::Deferred)
    }

    fn failing() -> Result<Performed, SyncError> {
        Err(SyncError::Network {
            url: "https://example.org".to_string(),
            message: "timed out".to_string(),
        })
    }

    async fn due(h: &Harness, probe: &Probe) -> bool {
        let catalog = h.ctx.state.snapshot().await;
        needs_update(probe, &catalog, &h.ctx.config, h.ctx.now_ms())
    }

    #[tokio::test]
    async fn never_run_is_expired() {
        let h = Harness::new();
        assert!(due(&h, &Probe::periodic(ok)).await);
    }

    #[tokio::test]
    async fn success_stamps_and_clears_until_interval_elapses() {
        let h = Harness::new();
        let probe = Probe::periodic(ok);

        assert_eq!(update(&probe, &h.ctx).await, UpdateReport::Completed);
        assert!(!due(&h, &probe).await);

        h.clock.advance(Duration::days(7));
        assert!(!due(&h, &probe).await, "interval must be exceeded, not met");
        h.clock.advance(Duration::seconds(1));
        assert!(due(&h, &probe).await);
    }

    #[tokio::test]
    async fn incomplete_periodic_is_always_due() {
        let h = Harness::new();
        let mut probe = Probe::periodic(ok);
        update(&probe, &h.ctx).await;
        probe.incomplete = true;
        assert!(due(&h, &probe).await);
    }

    #[tokio::test]
    async fn failure_notifies_and_leaves_timestamp() {
        let h = Harness::new();
        let probe = Probe::periodic(failing);

        let report = update(&probe, &h.ctx).await;
        assert!(report.is_failure());
        assert!(h.ctx.state.read(|c| c.timestamps.last_success("Probe")).await.is_none());
        assert_eq!(h.prompter.notices().len(), 1);
        assert!(h.prompter.notices()[0].starts_with("Error updating Probe"));
        assert!(due(&h, &probe).await);
    }

    #[tokio::test]
    async fn periodic_punt_holds_for_the_retry_window_only() {
        let h = Harness::new();
        let probe = Probe::periodic(deferred);

        assert_eq!(update(&probe, &h.ctx).await, UpdateReport::Deferred);
        assert!(!due(&h, &probe).await);

        h.clock.advance(Duration::hours(23));
        assert!(!due(&h, &probe).await);
        h.clock.advance(Duration::hours(2));
        assert!(due(&h, &probe).await, "a punt must not wait out the 7-day interval");
    }

    #[tokio::test]
    async fn retry_window_requires_incomplete_and_throttles_punts() {
        let h = Harness::new();
        let mut probe = Probe::periodic(deferred);
        probe.cadence = Cadence::RetryWindow(Duration::days(1));
        assert!(!due(&h, &probe).await, "complete data is never retried");

        probe.incomplete = true;
        assert!(due(&h, &probe).await);
        assert_eq!(update(&probe, &h.ctx).await, UpdateReport::Deferred);
        assert!(h.ctx.state.read(|c| c.timestamps.last_punt("Probe")).await.is_some());
        assert!(h.ctx.state.read(|c| c.timestamps.last_success("Probe")).await.is_none());
        assert!(!due(&h, &probe).await);

        h.clock.advance(Duration::hours(25));
        assert!(due(&h, &probe).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }
}
