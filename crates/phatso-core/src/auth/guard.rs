//! Session guard: watches the stored credential and reports when it stops
//! being valid.
//!
//! A started guard owns two timers. One re-checks the credential on a fixed
//! interval. The other fires once, shortly before the decoded expiry. Either
//! one invalidates the guard and runs the callback; the callback runs at most
//! once per guard. Dropping or cancelling the `GuardHandle` stops both timers.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::session::Session;

/// How often the stored credential is re-checked
pub const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// How long before expiry the pre-expiry timer fires
pub const EXPIRY_WARNING_LEAD: Duration = Duration::from_secs(60);

/// Lower bound for the pre-expiry delay
pub const MIN_WARNING_DELAY: Duration = Duration::from_secs(1);

/// Shortest accepted re-check interval
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(1);

const UNCHECKED: u8 = 0;
const VALID: u8 = 1;
const INVALID: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Unchecked,
    Valid,
    /// Terminal. Start a new guard after re-authenticating.
    Invalid,
}

impl GuardState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            VALID => GuardState::Valid,
            INVALID => GuardState::Invalid,
            _ => GuardState::Unchecked,
        }
    }
}

/// Delay before the pre-expiry callback: one minute before expiry, but never
/// sooner than one second from now.
pub fn pre_expiry_delay(remaining: chrono::Duration) -> Duration {
    warning_delay(remaining, EXPIRY_WARNING_LEAD, MIN_WARNING_DELAY)
}

fn warning_delay(remaining: chrono::Duration, lead: Duration, floor: Duration) -> Duration {
    let lead_ms = i64::try_from(lead.as_millis()).unwrap_or(i64::MAX);
    let floor_ms = i64::try_from(floor.as_millis()).unwrap_or(i64::MAX);
    let delay_ms = remaining
        .num_milliseconds()
        .saturating_sub(lead_ms)
        .max(floor_ms);
    Duration::from_millis(delay_ms.max(0) as u64)
}

struct GuardShared {
    state: AtomicU8,
    /// `true` once cancelled. Held for the whole callback, so `cancel`
    /// waits for an in-flight delivery to finish.
    cancelled: Mutex<bool>,
    on_invalid: Box<dyn Fn() + Send + Sync>,
}

impl GuardShared {
    fn state(&self) -> GuardState {
        GuardState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn lock_cancelled(&self) -> MutexGuard<'_, bool> {
        self.cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_settled(&self) -> bool {
        *self.lock_cancelled() || self.state() == GuardState::Invalid
    }

    /// Move Valid -> Invalid and notify. Later calls, and calls after
    /// cancellation, do nothing.
    fn invalidate(&self, reason: &'static str) {
        let cancelled = self.lock_cancelled();
        if *cancelled {
            return;
        }
        if self
            .state
            .compare_exchange(VALID, INVALID, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        info!(reason, "Session no longer valid");
        (self.on_invalid)();
    }
}

/// Starts guards over one session.
#[derive(Debug, Clone)]
pub struct SessionGuard {
    session: Session,
    check_interval: Duration,
    warning_lead: Duration,
    min_delay: Duration,
}

impl SessionGuard {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            check_interval: CHECK_INTERVAL,
            warning_lead: EXPIRY_WARNING_LEAD,
            min_delay: MIN_WARNING_DELAY,
        }
    }

    /// Intervals below one millisecond are raised to one millisecond.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    pub fn with_warning_lead(mut self, lead: Duration) -> Self {
        self.warning_lead = lead;
        self
    }

    pub fn with_min_delay(mut self, floor: Duration) -> Self {
        self.min_delay = floor;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Check the credential now and, if it is valid, schedule the periodic
    /// re-check and the pre-expiry timer.
    ///
    /// If the credential is already invalid, `on_invalid` runs before this
    /// returns and nothing is scheduled. Must be called inside a tokio
    /// runtime. `on_invalid` must not cancel or drop its own handle.
    pub fn start<F>(&self, on_invalid: F) -> GuardHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let shared = Arc::new(GuardShared {
            state: AtomicU8::new(UNCHECKED),
            cancelled: Mutex::new(false),
            on_invalid: Box::new(on_invalid),
        });

        if !self.session.is_authenticated() {
            shared.state.store(INVALID, Ordering::SeqCst);
            info!("Session invalid at guard start");
            (shared.on_invalid)();
            return GuardHandle {
                shared,
                tasks: Vec::new(),
            };
        }

        shared.state.store(VALID, Ordering::SeqCst);
        let mut tasks = Vec::with_capacity(2);
        tasks.push(self.spawn_periodic_check(Arc::clone(&shared)));

        match self.session.remaining() {
            Some(remaining) if remaining > chrono::Duration::zero() => {
                let delay = warning_delay(remaining, self.warning_lead, self.min_delay);
                debug!(
                    remaining_ms = remaining.num_milliseconds(),
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling pre-expiry timer"
                );
                tasks.push(Self::spawn_pre_expiry(Arc::clone(&shared), delay));
            }
            _ => debug!("Expiry unknown, relying on periodic checks"),
        }

        GuardHandle { shared, tasks }
    }

    fn spawn_periodic_check(&self, shared: Arc<GuardShared>) -> JoinHandle<()> {
        let session = self.session.clone();
        let period = self.check_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if shared.is_settled() {
                    break;
                }

                if !session.is_authenticated() {
                    shared.invalidate("credential expired during session");
                    break;
                }
                debug!("Periodic session check passed");
            }
        })
    }

    fn spawn_pre_expiry(shared: Arc<GuardShared>, delay: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            sleep(delay).await;
            shared.invalidate("credential about to expire");
        })
    }
}

/// Owns the timers of one started guard. Dropping the handle cancels both.
pub struct GuardHandle {
    shared: Arc<GuardShared>,
    tasks: Vec<JoinHandle<()>>,
}

impl fmt::Debug for GuardHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardHandle")
            .field("state", &self.state())
            .field("scheduled", &self.tasks.len())
            .finish()
    }
}

impl GuardHandle {
    pub fn state(&self) -> GuardState {
        self.shared.state()
    }

    /// True while at least one timer is still pending
    pub fn is_active(&self) -> bool {
        !self.shared.is_settled() && self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Cancel both timers. Waits for a callback that is already running;
    /// the callback will not start after this returns.
    pub fn cancel(&mut self) {
        *self.shared.lock_cancelled() = true;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for GuardHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use anyhow::Result;
    use serde_json::json;

    use crate::auth::claims::unsigned_token;
    use crate::auth::clock::ManualClock;
    use crate::auth::credentials::{CredentialStore, MemoryCredentialStore};

    const NOW_MS: i64 = 1_700_000_000_000;

    /// Memory store that counts reads, to observe periodic checks
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryCredentialStore,
        reads: AtomicUsize,
    }

    impl CredentialStore for CountingStore {
        fn get(&self) -> Option<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get()
        }

        fn set(&self, credential: &str) -> Result<()> {
            self.inner.set(credential)
        }

        fn clear(&self) -> Result<()> {
            self.inner.clear()
        }
    }

    struct Fixture {
        guard: SessionGuard,
        clock: Arc<ManualClock>,
        store: Arc<CountingStore>,
        calls: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn expiring_in(secs: i64) -> Self {
            let store = Arc::new(CountingStore::default());
            store
                .set(&unsigned_token(&json!({"exp": NOW_MS / 1000 + secs})))
                .unwrap();
            Self::with_store(store)
        }

        fn with_store(store: Arc<CountingStore>) -> Self {
            let clock = Arc::new(ManualClock::new(NOW_MS));
            let session = Session::with_clock(store.clone(), clock.clone());
            Self {
                guard: SessionGuard::new(session),
                clock,
                store,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn start(&self) -> GuardHandle {
            let calls = Arc::clone(&self.calls);
            self.guard.start(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    async fn sleep_ms(ms: u64) {
        sleep(Duration::from_millis(ms)).await;
        tokio::task::yield_now().await;
    }

    #[test]
    fn test_pre_expiry_delay() {
        let delay = |ms| pre_expiry_delay(chrono::Duration::milliseconds(ms));

        assert_eq!(delay(600_000), Duration::from_millis(540_000));
        assert_eq!(delay(5_000), Duration::from_millis(1_000));
        assert_eq!(delay(61_000), Duration::from_millis(1_000));
        assert_eq!(delay(61_001), Duration::from_millis(1_001));
        assert_eq!(delay(1), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_credential_notifies_synchronously() {
        let fixture = Fixture::expiring_in(-10);
        let handle = fixture.start();

        assert_eq!(fixture.calls(), 1);
        assert_eq!(handle.state(), GuardState::Invalid);
        assert!(!handle.is_active());
        assert_eq!(format!("{:?}", handle), "GuardHandle { state: Invalid, scheduled: 0 }");

        sleep_ms(3_600_000).await;
        assert_eq!(fixture.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_and_malformed_credentials_notify() {
        let empty = Fixture::with_store(Arc::new(CountingStore::default()));
        let handle = empty.start();
        assert_eq!(empty.calls(), 1);
        assert_eq!(handle.state(), GuardState::Invalid);

        let store = Arc::new(CountingStore::default());
        store.set("garbage").unwrap();
        let malformed = Fixture::with_store(store);
        let handle = malformed.start();
        assert_eq!(malformed.calls(), 1);
        assert!(!handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_expiry_timer_fires_one_minute_early() {
        let fixture = Fixture::expiring_in(600);
        let handle = fixture.start();
        assert_eq!(handle.state(), GuardState::Valid);
        assert!(handle.is_active());

        sleep_ms(539_999).await;
        assert_eq!(fixture.calls(), 0);
        assert_eq!(handle.state(), GuardState::Valid);

        sleep_ms(2).await;
        assert_eq!(fixture.calls(), 1);
        assert_eq!(handle.state(), GuardState::Invalid);
        assert!(!handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_lived_credential_waits_one_second() {
        let fixture = Fixture::expiring_in(5);
        let _handle = fixture.start();

        sleep_ms(999).await;
        assert_eq!(fixture.calls(), 0);

        sleep_ms(2).await;
        assert_eq!(fixture.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_check_runs_every_interval_until_cancelled() {
        let fixture = Fixture::expiring_in(3_600);
        let mut handle = fixture.start();
        let reads_at_start = fixture.store.reads.load(Ordering::SeqCst);

        sleep_ms(95_000).await;
        let reads = fixture.store.reads.load(Ordering::SeqCst) - reads_at_start;
        assert_eq!(reads, 3, "checks at 30s, 60s and 90s");

        handle.cancel();
        assert!(!handle.is_active());
        sleep_ms(120_000).await;
        let reads_after = fixture.store.reads.load(Ordering::SeqCst) - reads_at_start;
        assert_eq!(reads_after, 3);
        assert_eq!(fixture.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_check_detects_expiry() {
        let fixture = Fixture::expiring_in(3_600);
        let _handle = fixture.start();

        // Wall clock jumps past expiry; only the periodic check can notice
        fixture.clock.advance(Duration::from_secs(7_200));

        sleep_ms(29_999).await;
        assert_eq!(fixture.calls(), 0);

        sleep_ms(2).await;
        assert_eq!(fixture.calls(), 1);

        sleep_ms(3_600_000).await;
        assert_eq!(fixture.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_check_detects_cleared_credential() {
        let fixture = Fixture::expiring_in(3_600);
        let handle = fixture.start();

        // Signed out elsewhere; expiry is still an hour away
        fixture.store.clear().unwrap();

        sleep_ms(29_999).await;
        assert_eq!(fixture.calls(), 0);
        assert_eq!(handle.state(), GuardState::Valid);

        sleep_ms(2).await;
        assert_eq!(fixture.calls(), 1);
        assert_eq!(handle.state(), GuardState::Invalid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_check_interval_is_clamped() {
        let mut fixture = Fixture::expiring_in(3_600);
        fixture.guard = fixture.guard.clone().with_check_interval(Duration::ZERO);
        let handle = fixture.start();
        assert!(handle.is_active());

        fixture.store.clear().unwrap();
        sleep_ms(5).await;
        assert_eq!(fixture.calls(), 1);
        assert_eq!(handle.state(), GuardState::Invalid);
    }

    #[test]
    fn test_debug_does_not_read_store() {
        let fixture = Fixture::expiring_in(600);
        let reads = fixture.store.reads.load(Ordering::SeqCst);

        let guard = format!("{:?}", fixture.guard);
        let session = format!("{:?}", fixture.guard.session());
        assert!(guard.starts_with("SessionGuard"));
        assert_eq!(session, "Session { .. }");
        assert_eq!(fixture.store.reads.load(Ordering::SeqCst), reads);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_waits_for_running_callback() {
        use std::sync::atomic::AtomicBool;

        let mut fixture = Fixture::expiring_in(5);
        fixture.guard = fixture.guard.clone().with_min_delay(Duration::from_millis(10));

        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let mut handle = {
            let started = Arc::clone(&started);
            let finished = Arc::clone(&finished);
            fixture.guard.start(move || {
                started.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                finished.store(true, Ordering::SeqCst);
            })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while !started.load(Ordering::SeqCst) {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("pre-expiry callback never started");

        handle.cancel();
        assert!(finished.load(Ordering::SeqCst), "cancel returned mid-callback");
        assert_eq!(handle.state(), GuardState::Invalid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_runs_once_when_both_timers_fire() {
        // Pre-expiry lands at 30s, same instant as the first periodic check
        let fixture = Fixture::expiring_in(90);
        let handle = fixture.start();
        fixture.clock.advance(Duration::from_secs(120));

        sleep_ms(31_000).await;
        assert_eq!(fixture.calls(), 1);
        assert_eq!(handle.state(), GuardState::Invalid);

        sleep_ms(120_000).await;
        assert_eq!(fixture.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_prevents_callback() {
        let fixture = Fixture::expiring_in(600);
        let handle = fixture.start();
        fixture.clock.advance(Duration::from_secs(7_200));
        drop(handle);

        sleep_ms(3_600_000).await;
        assert_eq!(fixture.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guards_are_independent() {
        let fixture = Fixture::expiring_in(600);
        let mut first = fixture.start();
        let _second = fixture.start();
        first.cancel();

        sleep_ms(541_000).await;
        assert_eq!(fixture.calls(), 1, "only the live guard notifies");
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_timings() {
        let mut fixture = Fixture::expiring_in(600);
        fixture.guard = fixture
            .guard
            .clone()
            .with_check_interval(Duration::from_secs(5))
            .with_warning_lead(Duration::from_secs(300))
            .with_min_delay(Duration::from_millis(10));
        let _handle = fixture.start();

        sleep_ms(299_999).await;
        assert_eq!(fixture.calls(), 0);
        sleep_ms(2).await;
        assert_eq!(fixture.calls(), 1);
    }
}
