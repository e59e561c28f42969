//! Polling synchronizer
//!
//! Watches the remote table's modification token and reloads the snapshot when
//! it changes.
//!
//! ## States
//!
//! ```text
//!            sign-in                      check failed (timer)
//!   Idle ────────────▶ Active ───────────────────────────────▶ BackoffWait
//!    ▲                  ▲  │ token changed → reload               │
//!    │                  │  └─ token unchanged → nothing           │
//!    │                  └──────────── deferred retry fires ───────┘
//!    └──────────── sign-out / drop (from Active or BackoffWait)
//! ```
//!
//! - **Active**: one repeating timer (default 30 s). The first tick fires
//!   immediately; with no token known yet it always reloads, which is how the
//!   initial load happens.
//! - **BackoffWait**: a failed timer-driven check schedules one deferred retry
//!   (default 60 s) while the repeating timer keeps ticking. Only one deferred
//!   retry is ever pending, and a deferred retry never schedules another one.
//!   Timer-driven checks run one at a time, so at most two checks (one from the
//!   timer, one deferred) are outstanding.
//! - **Idle**: no timer. Stopping aborts the timer and any pending retry and
//!   bumps a generation counter; work that was already in flight sees the new
//!   generation and drops its result.
//!
//! A failed reload after a token change forgets the token, so the next tick
//! retries the reload instead of treating the table as up to date.

use crate::config::PollSettings;
use crate::session::SessionGateway;
use crate::sheets::TableStore;
use crate::table::{ModifiedToken, SnapshotStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SyncState {
    Idle,
    Active,
    BackoffWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckOrigin {
    Timer,
    Deferred,
}

#[derive(Default)]
struct PollTimer {
    interval: Option<JoinHandle<()>>,
    backoff: Option<JoinHandle<()>>,
    last_known: Option<ModifiedToken>,
    generation: u64,
}

/// Counts live repeating timers; decremented when the timer task is dropped.
struct TimerGuard(Arc<AtomicUsize>);

impl TimerGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Inner {
    table: Arc<dyn TableStore>,
    store: Arc<SnapshotStore>,
    settings: PollSettings,
    timer: Mutex<PollTimer>,
    live_timers: Arc<AtomicUsize>,
    checks_in_flight: AtomicUsize,
    peak_checks: AtomicUsize,
}

impl Inner {
    fn lock_timer(&self) -> MutexGuard<'_, PollTimer> {
        match self.timer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn start(self: &Arc<Self>) {
        let mut timer = self.lock_timer();
        Self::halt(&mut timer);
        timer.generation += 1;
        let generation = timer.generation;

        let inner = Arc::clone(self);
        let guard = TimerGuard::new(&self.live_timers);
        let period = self.settings.interval;
        timer.interval = Some(tokio::spawn(async move {
            let _guard = guard;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.check(generation, CheckOrigin::Timer).await;
            }
        }));
        log::info!("Auto-refresh started with interval: {:?}", period);
    }

    fn stop(&self) {
        let mut timer = self.lock_timer();
        if Self::halt(&mut timer) {
            log::info!("Auto-refresh stopped");
        }
    }

    /// Cancel both timers and invalidate in-flight work.
    fn halt(timer: &mut PollTimer) -> bool {
        let was_running = timer.interval.is_some();
        if let Some(handle) = timer.interval.take() {
            handle.abort();
        }
        if let Some(handle) = timer.backoff.take() {
            handle.abort();
        }
        timer.last_known = None;
        timer.generation += 1;
        was_running
    }

    fn is_current(timer: &PollTimer, generation: u64) -> bool {
        timer.generation == generation && timer.interval.is_some()
    }

    async fn check(self: &Arc<Self>, generation: u64, origin: CheckOrigin) {
        let _in_flight = InFlight::enter(&self.checks_in_flight, &self.peak_checks);

        let token = match self.table.fetch_modified_timestamp().await {
            Ok(token) => token,
            Err(e) => {
                log::error!("Error checking for updates: {}", e);
                match origin {
                    CheckOrigin::Timer => self.schedule_retry(generation),
                    CheckOrigin::Deferred => {
                        log::debug!("Deferred check failed; waiting for the next tick")
                    }
                }
                return;
            }
        };

        {
            let mut timer = self.lock_timer();
            if !Self::is_current(&timer, generation) {
                return;
            }
            if timer.last_known.as_ref() == Some(&token) {
                log::debug!("No changes since {}", token);
                return;
            }
            timer.last_known = Some(token.clone());
        }

        log::info!("Sheet changes detected ({}), refreshing data", token);
        if self.store.reload(Some(token.clone())).await.is_err() {
            let mut timer = self.lock_timer();
            if Self::is_current(&timer, generation) && timer.last_known.as_ref() == Some(&token) {
                timer.last_known = None;
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, generation: u64) {
        let mut timer = self.lock_timer();
        if !Self::is_current(&timer, generation) {
            return;
        }
        if timer.backoff.is_some() {
            log::debug!("Deferred check already pending");
            return;
        }

        let delay = self.settings.backoff;
        log::warn!(
            "Will try to check for updates again in {} seconds",
            delay.as_secs()
        );
        let inner = Arc::clone(self);
        timer.backoff = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut timer = inner.lock_timer();
                if !Self::is_current(&timer, generation) {
                    return;
                }
                timer.backoff = None;
            }
            inner.check(generation, CheckOrigin::Deferred).await;
        }));
    }

    fn state(&self) -> SyncState {
        let timer = self.lock_timer();
        match (&timer.interval, &timer.backoff) {
            (None, _) => SyncState::Idle,
            (Some(_), None) => SyncState::Active,
            (Some(_), Some(_)) => SyncState::BackoffWait,
        }
    }
}

/// Owns the repeating check timer for one signed-in session at a time.
///
/// Dropping the synchronizer stops it.
pub struct Synchronizer {
    inner: Arc<Inner>,
    follower: Mutex<Option<JoinHandle<()>>>,
}

impl Synchronizer {
    pub fn new(table: Arc<dyn TableStore>, store: Arc<SnapshotStore>, settings: PollSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                table,
                store,
                settings,
                timer: Mutex::new(PollTimer::default()),
                live_timers: Arc::new(AtomicUsize::new(0)),
                checks_in_flight: AtomicUsize::new(0),
                peak_checks: AtomicUsize::new(0),
            }),
            follower: Mutex::new(None),
        }
    }

    /// Start polling. Any previous timer is stopped first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.inner.start();
    }

    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn state(&self) -> SyncState {
        self.inner.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() != SyncState::Idle
    }

    pub fn last_known_token(&self) -> Option<ModifiedToken> {
        self.inner.lock_timer().last_known.clone()
    }

    /// Repeating timer tasks that are still alive.
    pub fn live_timers(&self) -> usize {
        self.inner.live_timers.load(Ordering::SeqCst)
    }

    /// Largest number of checks observed running at the same time.
    pub fn peak_concurrent_checks(&self) -> usize {
        self.inner.peak_checks.load(Ordering::SeqCst)
    }

    /// Start and stop with the session, and drop the snapshot on sign-out.
    pub fn follow_session(&self, gateway: Arc<SessionGateway>) {
        let mut changes = gateway.subscribe();
        let inner = Arc::clone(&self.inner);
        if gateway.currently_signed_in() {
            inner.start();
        }

        let handle = tokio::spawn(async move {
            loop {
                let signed_in = match changes.recv().await {
                    // A sign-in that was already undone is not acted on.
                    Ok(true) => gateway.currently_signed_in(),
                    Ok(false) => false,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Missed {} session changes; resynchronizing", skipped);
                        gateway.currently_signed_in()
                    }
                    Err(RecvError::Closed) => break,
                };

                let active = inner.state() != SyncState::Idle;
                if signed_in && !active {
                    inner.start();
                } else if !signed_in {
                    inner.stop();
                    inner.store.clear();
                }
            }
        });

        let mut follower = match self.follower.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = follower.replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        let follower = match self.follower.get_mut() {
            Ok(follower) => follower.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = follower {
            handle.abort();
        }
        self.inner.stop();
    }
}
