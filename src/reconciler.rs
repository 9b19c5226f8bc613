// 🔁 Reconciler - timer-driven population control for the stations collection
//
// Every interval:
//   count < threshold  → add one station
//   count >= threshold → delete every listed station, then add one
//
// It never converges to a fixed count; the collection oscillates between
// "grow by one" and "wipe and reseed". No state is carried between ticks.

use crate::error::StationResult;
use crate::service::StationService;
use crate::station::Station;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const DEFAULT_THRESHOLD: usize = 20;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// CONFIG
// ============================================================================

/// What to do when the timer fires while the previous tick is still running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Start another tick anyway
    Allow,
    /// Drop this firing
    Skip,
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    pub threshold: usize,
    /// Fire on wall-clock multiples of `interval` (top of the minute for 60s)
    pub align_to_wall_clock: bool,
    pub overlap: OverlapPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            interval: DEFAULT_INTERVAL,
            threshold: DEFAULT_THRESHOLD,
            align_to_wall_clock: true,
            overlap: OverlapPolicy::Skip,
        }
    }
}

// ============================================================================
// TICK OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Below threshold: one station added
    Added {
        previous_count: usize,
        station: Station,
    },

    /// At/above threshold: every listed station deleted, one added
    Purged {
        previous_count: usize,
        deleted: u64,
        failed_deletes: usize,
        station: Station,
    },
}

impl TickOutcome {
    pub fn station(&self) -> &Station {
        match self {
            TickOutcome::Added { station, .. } => station,
            TickOutcome::Purged { station, .. } => station,
        }
    }

    pub fn is_purge(&self) -> bool {
        matches!(self, TickOutcome::Purged { .. })
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct Reconciler {
    service: StationService,
    config: ReconcilerConfig,
    in_flight: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(service: StationService, config: ReconcilerConfig) -> Self {
        Reconciler {
            service,
            config,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one reconciliation pass.
    ///
    /// A failure to list stations aborts the pass before any write. A failing
    /// delete is logged and the purge carries on with the remaining ids.
    pub fn tick(&self) -> StationResult<TickOutcome> {
        let ids = self.service.list_ids()?;
        let previous_count = ids.len();

        if previous_count < self.config.threshold {
            let station = self.service.create()?;
            info!(
                previous_count,
                station_id = station.id,
                "another Station was added"
            );
            return Ok(TickOutcome::Added {
                previous_count,
                station,
            });
        }

        let mut deleted = 0;
        let mut failed_deletes = 0;
        for id in &ids {
            match self.service.delete(*id) {
                Ok(ack) => deleted += ack.deleted_count,
                Err(e) => {
                    failed_deletes += 1;
                    warn!(station_id = id, error = %e, "Failed to delete station");
                }
            }
        }

        let station = self.service.create()?;
        info!(
            previous_count,
            deleted,
            failed_deletes,
            station_id = station.id,
            "all Stations were deleted"
        );

        Ok(TickOutcome::Purged {
            previous_count,
            deleted,
            failed_deletes,
            station,
        })
    }

    /// Drive `tick` from the timer until `shutdown` flips to true.
    ///
    /// Ticks run on the blocking pool; the timer never waits for one to finish.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let first_delay = if self.config.align_to_wall_clock {
            delay_until_next_boundary(Utc::now(), self.config.interval)
        } else {
            self.config.interval
        };

        let mut ticker = interval_at(Instant::now() + first_delay, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.config.interval.as_secs(),
            threshold = self.config.threshold,
            first_tick_in_ms = first_delay.as_millis() as u64,
            "Reconciler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.clone().spawn_tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconciler stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Start one tick in the background; `None` when skipped by the overlap policy
    fn spawn_tick(self: Arc<Self>) -> Option<JoinHandle<()>> {
        let guard = match self.config.overlap {
            OverlapPolicy::Allow => None,
            OverlapPolicy::Skip => match InFlightGuard::acquire(&self.in_flight) {
                Some(guard) => Some(guard),
                None => {
                    debug!("Previous tick still running, skipping this one");
                    return None;
                }
            },
        };

        Some(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            if let Err(e) = self.tick() {
                error!(error = %e, "Reconciliation tick failed");
            }
        }))
    }
}

/// Clears the in-flight flag when the tick ends, even on panic
struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(Arc::clone(flag)))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Time from `now` to the next wall-clock multiple of `period`
pub fn delay_until_next_boundary(now: DateTime<Utc>, period: Duration) -> Duration {
    let period_ms = period.as_millis() as i64;
    if period_ms <= 0 {
        return Duration::ZERO;
    }

    match now.timestamp_millis().rem_euclid(period_ms) {
        0 => Duration::ZERO,
        rem => Duration::from_millis((period_ms - rem) as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{SqliteStationStore, StationStore};
    use crate::error::StationError;
    use crate::station::{DeleteAck, NewStation, StationUpdate, UpdateAck};
    use chrono::TimeZone;
    use std::io::Write;
    use std::sync::Mutex;

    /// Shared buffer that collects formatted log lines
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    /// Run `f` with a subscriber that writes into the returned buffer
    fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let value = tracing::subscriber::with_default(subscriber, f);
        (value, buffer.contents())
    }

    fn test_service() -> StationService {
        StationService::new(Arc::new(SqliteStationStore::open_in_memory().unwrap()))
    }

    fn seed(service: &StationService, ids: impl IntoIterator<Item = i64>) {
        for id in ids {
            service.insert(NewStation::new(id, 50, 50)).unwrap();
        }
    }

    /// Store whose reads always fail
    struct UnreachableStore;

    impl StationStore for UnreachableStore {
        fn insert(&self, _station: NewStation) -> StationResult<Station> {
            Err(StationError::LockPoisoned)
        }
        fn list_ids(&self) -> StationResult<Vec<i64>> {
            Err(StationError::LockPoisoned)
        }
        fn find_one(&self, _id: i64) -> StationResult<Option<Station>> {
            Err(StationError::LockPoisoned)
        }
        fn update_one(&self, _id: i64, _update: &StationUpdate) -> StationResult<UpdateAck> {
            Err(StationError::LockPoisoned)
        }
        fn delete_one(&self, _id: i64) -> StationResult<DeleteAck> {
            Err(StationError::LockPoisoned)
        }
        fn count(&self) -> StationResult<usize> {
            Err(StationError::LockPoisoned)
        }
    }

    /// SQLite store that refuses to delete one particular id
    struct StubbornStore {
        inner: SqliteStationStore,
        undeletable: i64,
    }

    impl StationStore for StubbornStore {
        fn insert(&self, station: NewStation) -> StationResult<Station> {
            self.inner.insert(station)
        }
        fn list_ids(&self) -> StationResult<Vec<i64>> {
            self.inner.list_ids()
        }
        fn find_one(&self, id: i64) -> StationResult<Option<Station>> {
            self.inner.find_one(id)
        }
        fn update_one(&self, id: i64, update: &StationUpdate) -> StationResult<UpdateAck> {
            self.inner.update_one(id, update)
        }
        fn delete_one(&self, id: i64) -> StationResult<DeleteAck> {
            if id == self.undeletable {
                return Err(StationError::Corrupt("refused".to_string()));
            }
            self.inner.delete_one(id)
        }
        fn count(&self) -> StationResult<usize> {
            self.inner.count()
        }
    }

    #[test]
    fn test_below_threshold_adds_one() {
        let service = test_service();
        seed(&service, 1..=19);
        let reconciler = Reconciler::new(service.clone(), ReconcilerConfig::default());

        let (outcome, logs) = with_captured_logs(|| reconciler.tick().unwrap());

        assert!(!outcome.is_purge());
        assert!(logs.contains("another Station was added"), "{}", logs);
        assert!(!logs.contains("all Stations were deleted"), "{}", logs);
        assert_eq!(service.count().unwrap(), 20);
        let ids = service.list_ids().unwrap();
        assert_eq!(&ids[..19], (1..=19).collect::<Vec<_>>().as_slice());
        assert_eq!(ids[19], outcome.station().id);
    }

    #[test]
    fn test_empty_store_grows_by_one_per_tick() {
        let service = test_service();
        let reconciler = Reconciler::new(service.clone(), ReconcilerConfig::default());

        for expected in 1..=DEFAULT_THRESHOLD {
            reconciler.tick().unwrap();
            assert_eq!(service.count().unwrap(), expected);
        }
    }

    #[test]
    fn test_at_threshold_purges_and_reseeds() {
        let service = test_service();
        seed(&service, 1..=20);
        let reconciler = Reconciler::new(service.clone(), ReconcilerConfig::default());

        let (outcome, logs) = with_captured_logs(|| reconciler.tick().unwrap());
        assert!(logs.contains("all Stations were deleted"), "{}", logs);
        assert!(!logs.contains("another Station was added"), "{}", logs);

        match &outcome {
            TickOutcome::Purged {
                previous_count,
                deleted,
                failed_deletes,
                ..
            } => {
                assert_eq!(*previous_count, 20);
                assert_eq!(*deleted, 20);
                assert_eq!(*failed_deletes, 0);
            }
            other => panic!("expected purge, got {:?}", other),
        }
        assert_eq!(service.count().unwrap(), 1);
        assert_eq!(service.list_ids().unwrap(), vec![outcome.station().id]);
    }

    #[test]
    fn test_above_threshold_with_duplicate_ids_purges_everything() {
        let service = test_service();
        seed(&service, std::iter::repeat(5).take(25));
        let reconciler = Reconciler::new(service.clone(), ReconcilerConfig::default());

        reconciler.tick().unwrap();

        assert_eq!(service.count().unwrap(), 1);
    }

    #[test]
    fn test_oscillates_between_add_and_purge() {
        let service = test_service();
        let config = ReconcilerConfig {
            threshold: 3,
            ..ReconcilerConfig::default()
        };
        let reconciler = Reconciler::new(service.clone(), config);

        let counts: Vec<usize> = (0..8)
            .map(|_| {
                reconciler.tick().unwrap();
                service.count().unwrap()
            })
            .collect();

        assert_eq!(counts, vec![1, 2, 3, 1, 2, 3, 1, 2]);
    }

    #[test]
    fn test_list_failure_aborts_tick() {
        let service = StationService::new(Arc::new(UnreachableStore));
        let reconciler = Reconciler::new(service, ReconcilerConfig::default());

        assert!(matches!(reconciler.tick(), Err(StationError::LockPoisoned)));
    }

    #[test]
    fn test_failed_delete_does_not_stop_purge() {
        let store = StubbornStore {
            inner: SqliteStationStore::open_in_memory().unwrap(),
            undeletable: 7,
        };
        let service = StationService::new(Arc::new(store));
        seed(&service, 1..=20);
        let reconciler = Reconciler::new(service.clone(), ReconcilerConfig::default());

        let (outcome, logs) = with_captured_logs(|| reconciler.tick().unwrap());
        assert!(logs.contains("Failed to delete station"), "{}", logs);
        assert!(logs.contains("all Stations were deleted"), "{}", logs);

        match outcome {
            TickOutcome::Purged {
                deleted,
                failed_deletes,
                ..
            } => {
                assert_eq!(deleted, 19);
                assert_eq!(failed_deletes, 1);
            }
            other => panic!("expected purge, got {:?}", other),
        }
        // Station 7 survived, plus the fresh one
        assert_eq!(service.count().unwrap(), 2);
        assert!(service.get(7).unwrap().is_some());
    }

    #[test]
    fn test_delay_until_next_boundary() {
        let minute = Duration::from_secs(60);

        let on_boundary = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(delay_until_next_boundary(on_boundary, minute), Duration::ZERO);

        let mid_minute = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 45).unwrap();
        assert_eq!(
            delay_until_next_boundary(mid_minute, minute),
            Duration::from_secs(15)
        );

        assert_eq!(
            delay_until_next_boundary(mid_minute, Duration::ZERO),
            Duration::ZERO
        );
    }

    #[test]
    fn test_in_flight_guard_is_exclusive() {
        let flag = Arc::new(AtomicBool::new(false));

        let guard = InFlightGuard::acquire(&flag).unwrap();
        assert!(InFlightGuard::acquire(&flag).is_none());

        drop(guard);
        assert!(InFlightGuard::acquire(&flag).is_some());
    }

    #[tokio::test]
    async fn test_skip_policy_drops_overlapping_tick() {
        let reconciler = Arc::new(Reconciler::new(
            test_service(),
            ReconcilerConfig::default(),
        ));

        let held = InFlightGuard::acquire(&reconciler.in_flight).unwrap();
        assert!(reconciler.clone().spawn_tick().is_none());
        drop(held);

        let handle = reconciler.clone().spawn_tick().unwrap();
        handle.await.unwrap();
        assert_eq!(reconciler.service.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_allow_policy_ignores_in_flight_flag() {
        let config = ReconcilerConfig {
            overlap: OverlapPolicy::Allow,
            ..ReconcilerConfig::default()
        };
        let reconciler = Arc::new(Reconciler::new(test_service(), config));

        let _held = InFlightGuard::acquire(&reconciler.in_flight).unwrap();
        let handle = reconciler.clone().spawn_tick().unwrap();
        handle.await.unwrap();

        assert_eq!(reconciler.service.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_ticks_and_stops_on_shutdown() {
        let service = test_service();
        let config = ReconcilerConfig {
            interval: Duration::from_millis(20),
            align_to_wall_clock: false,
            ..ReconcilerConfig::default()
        };
        let reconciler = Arc::new(Reconciler::new(service.clone(), config));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(reconciler.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(300)).await;

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(service.count().unwrap() >= 1);
    }
}
