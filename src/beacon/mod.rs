//! Usage beacon.
//!
//! Every authenticated tool call is counted in a [`UsageMeter`]. A
//! [`BeaconReporter`] task sends the cumulative counts to the tracker on a
//! fixed interval, and only when something changed since the last accepted
//! report. Failed deliveries keep the counts pending for the next tick.

mod tracker;

pub use tracker::{HttpTracker, InMemoryTracker, Tracker, TrackerError, UsageReport};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::auth::AuthContext;
use crate::config::BeaconConfig;
use crate::metrics;
use crate::principal::Principal;
use crate::{Error, Result};

#[derive(Default)]
struct MeterState {
    total: u64,
    by_user: BTreeMap<Principal, u64>,
    generation: u64,
    delivered: u64,
}

/// Counts not yet acknowledged by the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageSnapshot {
    /// Change counter the snapshot was taken at
    pub generation: u64,
    /// Total invocations
    pub total: u64,
    /// Invocations per caller
    pub by_user: Vec<(Principal, u64)>,
}

/// In-memory invocation counters
#[derive(Default)]
pub struct UsageMeter {
    state: Mutex<MeterState>,
}

impl UsageMeter {
    /// Empty meter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one invocation by `caller`. Unauthenticated contexts are not
    /// counted.
    pub fn record(&self, caller: &AuthContext) {
        if !caller.is_authenticated() {
            return;
        }
        let mut state = self.state.lock();
        state.total += 1;
        *state.by_user.entry(caller.principal.clone()).or_default() += 1;
        state.generation += 1;
    }

    /// Cumulative counts, if anything changed since the last delivery
    #[must_use]
    pub fn pending(&self) -> Option<UsageSnapshot> {
        let state = self.state.lock();
        (state.generation > state.delivered).then(|| UsageSnapshot {
            generation: state.generation,
            total: state.total,
            by_user: state
                .by_user
                .iter()
                .map(|(p, n)| (p.clone(), *n))
                .collect(),
        })
    }

    /// Acknowledge delivery of the snapshot taken at `generation`
    pub fn mark_delivered(&self, generation: u64) {
        let mut state = self.state.lock();
        state.delivered = state.delivered.max(generation);
    }
}

/// Periodic reporter of a [`UsageMeter`]
pub struct BeaconReporter {
    meter: Arc<UsageMeter>,
    tracker: Arc<dyn Tracker>,
    server_id: String,
    code_hash: String,
    interval: Duration,
    timeout: Duration,
}

impl BeaconReporter {
    /// Create a reporter
    #[must_use]
    pub fn new(
        meter: Arc<UsageMeter>,
        tracker: Arc<dyn Tracker>,
        server_id: impl Into<String>,
        code_hash: impl Into<String>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            meter,
            tracker,
            server_id: server_id.into(),
            code_hash: code_hash.into(),
            interval,
            timeout,
        }
    }

    /// Reporter for `config`, or `None` when the beacon is disabled.
    ///
    /// `tracker` overrides the HTTP tracker built from `tracker_url`.
    ///
    /// # Errors
    ///
    /// Fails if the tracker client cannot be built or the executable
    /// cannot be hashed.
    pub async fn from_config(
        config: &BeaconConfig,
        meter: Arc<UsageMeter>,
        tracker: Option<Arc<dyn Tracker>>,
    ) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }

        let tracker: Arc<dyn Tracker> = match (tracker, &config.tracker_url) {
            (Some(t), _) => t,
            (None, Some(url)) => Arc::new(
                HttpTracker::new(url, config.timeout).map_err(|e| Error::Config(e.to_string()))?,
            ),
            (None, None) => {
                return Err(Error::Config(
                    "beacon.tracker_url must be set when the beacon is enabled".to_string(),
                ));
            }
        };

        let code_hash = match &config.code_hash {
            Some(hash) => hash.to_ascii_lowercase(),
            None => executable_code_hash().await?,
        };

        Ok(Some(Self::new(
            meter,
            tracker,
            config.server_id.clone(),
            code_hash,
            config.interval,
            config.timeout,
        )))
    }

    /// Code hash sent with every report
    #[must_use]
    pub fn code_hash(&self) -> &str {
        &self.code_hash
    }

    /// Send pending counts. Returns `false` when nothing was pending.
    ///
    /// # Errors
    ///
    /// Returns the delivery failure; the counts stay pending.
    pub async fn flush(&self) -> std::result::Result<bool, TrackerError> {
        let Some(snapshot) = self.meter.pending() else {
            return Ok(false);
        };

        let report = UsageReport {
            server_id: self.server_id.clone(),
            code_hash: self.code_hash.clone(),
            total_invocations: snapshot.total,
            invocations_by_user: snapshot.by_user,
        };
        tokio::time::timeout(self.timeout, self.tracker.record(&report))
            .await
            .unwrap_or(Err(TrackerError::Timeout(self.timeout)))?;

        self.meter.mark_delivered(snapshot.generation);
        debug!(total = report.total_invocations, "Usage report delivered");
        Ok(true)
    }

    async fn flush_logged(&self) {
        match self.flush().await {
            Ok(true) => metrics::beacon_flush("delivered"),
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "Usage report not delivered, will retry");
                metrics::beacon_flush("failed");
            }
        }
    }

    /// Run the reporter until `shutdown` fires, then flush once more.
    ///
    /// The first report is due one full interval after start.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        info!(
            server_id = %self.server_id,
            interval = ?self.interval,
            "Usage beacon started"
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.flush_logged().await,
                    _ = shutdown.recv() => {
                        debug!("Usage beacon shutting down");
                        self.flush_logged().await;
                        break;
                    }
                }
            }
        })
    }
}

/// Hex SHA-256 of the file at `path`
///
/// # Errors
///
/// Fails if the file cannot be read.
pub async fn file_code_hash(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Hex SHA-256 of the running executable
///
/// # Errors
///
/// Fails if the executable cannot be located or read.
pub async fn executable_code_hash() -> Result<String> {
    file_code_hash(&std::env::current_exe()?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::VerifiedToken;
    use std::collections::BTreeSet;

    fn alice() -> Principal {
        Principal::new("alice")
    }

    fn signed_in(principal: Principal) -> AuthContext {
        AuthContext::bearer(VerifiedToken {
            subject: principal,
            scopes: BTreeSet::new(),
        })
    }

    fn reporter(meter: &Arc<UsageMeter>, tracker: &Arc<InMemoryTracker>) -> BeaconReporter {
        BeaconReporter::new(
            Arc::clone(meter),
            Arc::clone(tracker) as Arc<dyn Tracker>,
            "tollgate-1",
            "abc123",
            Duration::from_secs(60),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn meter_counts_per_user_and_skips_anonymous() {
        let meter = UsageMeter::new();
        meter.record(&signed_in(alice()));
        meter.record(&signed_in(alice()));
        meter.record(&signed_in(Principal::new("bob")));
        meter.record(&AuthContext::anonymous());

        let snapshot = meter.pending().unwrap();
        assert_eq!(snapshot.total, 3);
        assert_eq!(
            snapshot.by_user,
            vec![(alice(), 2), (Principal::new("bob"), 1)]
        );
    }

    #[test]
    fn authenticated_subject_named_anonymous_is_counted() {
        let meter = UsageMeter::new();

        meter.record(&signed_in(Principal::anonymous()));

        let snapshot = meter.pending().unwrap();
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.by_user, vec![(Principal::anonymous(), 1)]);
    }

    #[test]
    fn delivered_snapshot_is_no_longer_pending() {
        let meter = UsageMeter::new();
        meter.record(&signed_in(alice()));
        let snapshot = meter.pending().unwrap();

        meter.mark_delivered(snapshot.generation);
        assert!(meter.pending().is_none());

        meter.record(&signed_in(alice()));
        assert_eq!(meter.pending().unwrap().total, 2);
    }

    #[tokio::test]
    async fn failed_delivery_keeps_counts_pending() {
        // GIVEN: a tracker that has not approved our hash
        let meter = Arc::new(UsageMeter::new());
        let tracker = Arc::new(InMemoryTracker::new());
        let reporter = reporter(&meter, &tracker);
        meter.record(&signed_in(alice()));

        // WHEN: the flush is refused
        assert!(matches!(reporter.flush().await, Err(TrackerError::Unapproved(_))));

        // THEN: once approved, the next flush delivers the same counts
        tracker.approve("abc123");
        assert!(reporter.flush().await.unwrap());
        assert_eq!(tracker.metrics("tollgate-1").unwrap().total_invocations, 1);
        assert!(!reporter.flush().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_reported_before_the_interval() {
        // GIVEN: a running reporter and one call
        let meter = Arc::new(UsageMeter::new());
        let tracker = Arc::new(InMemoryTracker::new());
        tracker.approve("abc123");
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = reporter(&meter, &tracker).spawn(shutdown_rx);
        meter.record(&signed_in(alice()));

        // WHEN: half an interval passes
        tokio::time::sleep(Duration::from_secs(30)).await;

        // THEN: nothing is visible yet
        assert!(tracker.metrics("tollgate-1").is_none());

        // WHEN: the interval elapses
        tokio::time::sleep(Duration::from_secs(31)).await;

        // THEN: exactly one call by alice is recorded
        let report = tracker.metrics("tollgate-1").unwrap();
        assert_eq!(report.total_invocations, 1);
        assert_eq!(report.invocations_by_user, vec![(alice(), 1)]);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_pending_counts() {
        let meter = Arc::new(UsageMeter::new());
        let tracker = Arc::new(InMemoryTracker::new());
        tracker.approve("abc123");
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = reporter(&meter, &tracker).spawn(shutdown_rx);
        meter.record(&signed_in(alice()));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(tracker.metrics("tollgate-1").unwrap().total_invocations, 1);
    }

    #[tokio::test]
    async fn file_hash_is_hex_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            file_code_hash(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn disabled_beacon_builds_no_reporter() {
        let reporter = BeaconReporter::from_config(&BeaconConfig::default(), Arc::new(UsageMeter::new()), None)
            .await
            .unwrap();
        assert!(reporter.is_none());
    }
}
