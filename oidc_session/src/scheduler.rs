//! Background renewal of the current session

use std::{
    error, fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use oidc_session_clock::{Clock, System, UnixMillis};
use tokio::sync::watch;

use crate::{
    acquire::SessionAcquirer,
    config::{CheckMode, SessionConfig},
    freshness::{self, SessionStatus},
    watcher::{SessionPublisher, SessionWatcher},
    Session,
};

/// Identifies one run of the refresh loop
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LoopId(u64);

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "refresh-loop-{}", self.0)
    }
}

/// The result of asking the scheduler to start
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum StartOutcome {
    /// A new loop was started
    Started(LoopId),
    /// A loop was already running, and was left in place
    AlreadyRunning(LoopId),
}

impl StartOutcome {
    /// The loop that is now running
    pub fn loop_id(self) -> LoopId {
        match self {
            StartOutcome::Started(id) | StartOutcome::AlreadyRunning(id) => id,
        }
    }
}

/// Why the refresh loop stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// There was no session to keep alive
    NoSession,
    /// The session had already expired, and was revoked and removed
    Expired,
    /// A renewal inside the renewal window failed
    RenewalFailed,
    /// The session could not be obtained from the identity provider
    AcquireFailed,
    /// The loop's task panicked or was cancelled
    Aborted,
}

/// The scheduler's position in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    /// Never started
    Idle,
    /// Evaluating the current session
    Checking,
    /// Waiting until the next check
    Scheduled {
        /// When the next check is due
        next_check: UnixMillis,
    },
    /// The loop has ended
    Stopped(StopReason),
}

/// The outcome of a single check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// Another check should run at `next_check`
    Scheduled {
        /// When the next check is due
        next_check: UnixMillis,
        /// Whether the session was renewed during this check
        renewed: bool,
    },
    /// The loop should stop
    Stopped(StopReason),
}

/// Allows a stopped refresh loop to be started again
///
/// Handed to the on-stop callback, typically held until the user has signed
/// in again.
pub struct RestartHandle<C = System> {
    scheduler: RefreshScheduler<C>,
}

impl<C> RestartHandle<C>
where
    C: Clock + Clone + Send + Sync + 'static,
{
    /// Restarts the refresh loop, beginning with an immediate check
    pub fn restart(self) -> StartOutcome {
        self.scheduler.start()
    }
}

impl<C> fmt::Debug for RestartHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RestartHandle").finish_non_exhaustive()
    }
}

type OnStop<C> = dyn Fn(StopReason, RestartHandle<C>) + Send + Sync;

struct Inner<C> {
    acquirer: SessionAcquirer<C>,
    config: SessionConfig,
    publisher: SessionPublisher,
    on_stop: Box<OnStop<C>>,
    active: Mutex<Option<LoopId>>,
    next_loop: AtomicU64,
    state: watch::Sender<SchedulerState>,
}

/// A single background loop that keeps the current session fresh
///
/// Each check reads the session, works out how long it has left, and either
/// renews it silently once inside the renewal threshold, revokes and removes
/// it if it has already expired, or waits until the threshold is reached.
/// Only one loop runs at a time; starting a running scheduler is a no-op.
pub struct RefreshScheduler<C = System> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for RefreshScheduler<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

impl<C> RefreshScheduler<C> {
    /// Constructs a new scheduler
    ///
    /// `on_stop` is invoked each time a loop stops, along with a handle that
    /// can restart it.
    pub fn new<F>(
        acquirer: SessionAcquirer<C>,
        config: SessionConfig,
        publisher: SessionPublisher,
        on_stop: F,
    ) -> Self
    where
        F: Fn(StopReason, RestartHandle<C>) + Send + Sync + 'static,
    {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            inner: Arc::new(Inner {
                acquirer,
                config,
                publisher,
                on_stop: Box::new(on_stop),
                active: Mutex::new(None),
                next_loop: AtomicU64::new(1),
                state,
            }),
        }
    }

    /// The scheduler's current state
    pub fn state(&self) -> SchedulerState {
        *self.inner.state.borrow()
    }

    /// Observes changes to the scheduler's state
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.inner.state.subscribe()
    }

    /// Observes the session kept alive by this scheduler
    pub fn watch(&self) -> SessionWatcher {
        self.inner.publisher.subscribe()
    }

    /// The loop currently running, if any
    pub fn active_loop(&self) -> Option<LoopId> {
        *lock(&self.inner.active)
    }

    fn set_state(&self, state: SchedulerState) {
        self.inner.state.send_replace(state);
    }

    fn stop(&self, id: LoopId, reason: StopReason) {
        {
            let mut active = lock(&self.inner.active);
            if *active == Some(id) {
                *active = None;
            }
        }

        self.inner.publisher.publish(None);
        tracing::info!(loop_id = %id, ?reason, "session refresh loop stopped");

        (self.inner.on_stop)(
            reason,
            RestartHandle {
                scheduler: self.clone(),
            },
        );
    }
}

impl<C> RefreshScheduler<C>
where
    C: Clock + Clone + Send + Sync + 'static,
{
    /// Starts the refresh loop in the background
    ///
    /// The first check runs immediately. Must be called from within a Tokio
    /// runtime.
    pub fn start(&self) -> StartOutcome {
        let id = {
            let mut active = lock(&self.inner.active);
            if let Some(running) = *active {
                tracing::debug!(loop_id = %running, "session refresh loop already running");
                return StartOutcome::AlreadyRunning(running);
            }

            let id = LoopId(self.inner.next_loop.fetch_add(1, Ordering::Relaxed));
            *active = Some(id);
            id
        };

        let join = tokio::spawn(self.clone().run(id));

        let monitor = self.clone();
        tokio::spawn(async move {
            match join.await {
                Ok(()) => tracing::debug!(loop_id = %id, "session refresh loop ended"),
                Err(err) => {
                    if err.is_panic() {
                        tracing::error!(loop_id = %id, "session refresh loop panicked!")
                    } else if err.is_cancelled() {
                        tracing::info!(loop_id = %id, "session refresh loop was cancelled")
                    }

                    monitor.set_state(SchedulerState::Stopped(StopReason::Aborted));
                    monitor.stop(id, StopReason::Aborted);
                }
            }
        });

        tracing::info!(loop_id = %id, "session refresh loop started");
        StartOutcome::Started(id)
    }

    async fn run(self, id: LoopId) {
        loop {
            match self.check_once().await {
                Tick::Scheduled { next_check, .. } => self.sleep_until(next_check).await,
                Tick::Stopped(reason) => {
                    self.stop(id, reason);
                    return;
                }
            }
        }
    }

    async fn sleep_until(&self, deadline: UnixMillis) {
        // The timer does not advance while the host is suspended, so sleep in
        // short slices and compare against the wall clock after each one.
        const HEARTBEAT: Duration = Duration::from_secs(30);

        let clock = self.inner.acquirer.clock();
        loop {
            let now = clock.now();
            if now >= deadline {
                tracing::trace!("session check now due");
                break;
            }

            let until_due = deadline - now;
            let delay = until_due.min(HEARTBEAT);
            tracing::trace!(
                delay_ms = delay.as_millis() as u64,
                until_due_ms = until_due.as_millis() as u64,
                "session check not yet due, sleeping…"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Runs a single check of the current session
    ///
    /// This is the body of the refresh loop. It does not start or stop the
    /// loop, nor invoke the on-stop callback.
    #[tracing::instrument(skip(self))]
    pub async fn check_once(&self) -> Tick {
        self.set_state(SchedulerState::Checking);

        let tick = self.check().await;

        self.set_state(match tick {
            Tick::Scheduled { next_check, .. } => SchedulerState::Scheduled { next_check },
            Tick::Stopped(reason) => SchedulerState::Stopped(reason),
        });

        tick
    }

    async fn check(&self) -> Tick {
        let session = match self.read_session().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::info!("no session to keep alive");
                return Tick::Stopped(StopReason::NoSession);
            }
            Err(reason) => return Tick::Stopped(reason),
        };

        let config = &self.inner.config;
        let threshold = config.renew_threshold();
        let now = self.inner.acquirer.clock().now();

        if !freshness::is_fresh_at(Some(&session), now) {
            return self.expire().await;
        }

        let expiry = match session.expiry() {
            Some(expiry) => expiry,
            None => {
                let recheck = config.unknown_expiry_recheck();
                tracing::debug!(
                    recheck_ms = recheck.as_millis() as u64,
                    "session expiry unknown, re-checking later"
                );
                self.inner.publisher.publish(Some(session));
                return Tick::Scheduled {
                    next_check: now + recheck,
                    renewed: false,
                };
            }
        };

        let time_left = now.millis_until(expiry);
        let renew_at = time_left.saturating_sub(millis(threshold));

        let renewed = match SessionStatus::classify(time_left, threshold) {
            SessionStatus::Expired => return self.expire().await,
            SessionStatus::Stale => {
                tracing::debug!(time_left_ms = time_left, "session inside renewal window");
                if let Err(reason) = self.renew().await {
                    return Tick::Stopped(reason);
                }
                true
            }
            SessionStatus::Fresh => {
                self.inner.publisher.publish(Some(session));
                false
            }
        };

        // Floored so that a session sitting exactly on the threshold, or one
        // renewed into another short lifetime, does not spin.
        let delay = Duration::from_millis(renew_at.min(time_left).max(0).unsigned_abs())
            .max(config.min_recheck_interval());

        tracing::debug!(
            time_left_ms = time_left,
            delay_ms = delay.as_millis() as u64,
            renewed,
            "waiting for next session check"
        );

        Tick::Scheduled {
            next_check: now + delay,
            renewed,
        }
    }

    async fn read_session(&self) -> Result<Option<Session>, StopReason> {
        match self.inner.config.check_mode() {
            CheckMode::CachedOnly => self
                .inner
                .acquirer
                .provider()
                .cached_session()
                .await
                .map_err(|error| {
                    tracing::warn!(
                        error = (&error as &dyn error::Error),
                        "unable to read cached session"
                    );
                    StopReason::AcquireFailed
                }),
            CheckMode::FullChain => self.inner.acquirer.acquire().await.map_err(|error| {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "unable to acquire session"
                );
                StopReason::AcquireFailed
            }),
        }
    }

    async fn renew(&self) -> Result<(), StopReason> {
        let provider = self.inner.acquirer.provider();

        let session = match provider.renew_silently().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::warn!("silent renewal produced no session");
                return Err(StopReason::RenewalFailed);
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "silent renewal failed"
                );
                return Err(StopReason::RenewalFailed);
            }
        };

        if let Err(error) = provider.store_session(&session).await {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to store renewed session"
            );
            return Err(StopReason::RenewalFailed);
        }

        tracing::info!(
            expiry = session.expiry().map(|e| e.0),
            "session renewed"
        );
        self.inner.publisher.publish(Some(session));
        Ok(())
    }

    async fn expire(&self) -> Tick {
        tracing::info!("session has expired, revoking");
        let provider = self.inner.acquirer.provider();

        if let Err(error) = provider.revoke_access_token().await {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to revoke access token"
            );
        }

        if let Err(error) = provider.remove_session().await {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to remove expired session"
            );
        }

        Tick::Stopped(StopReason::Expired)
    }
}

impl<C: fmt::Debug> fmt::Debug for RefreshScheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("acquirer", &self.inner.acquirer)
            .field("config", &self.inner.config)
            .field("active", &*lock(&self.inner.active))
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}
