//! Session lifecycle driver.
//!
//! Two producers move a session from active to ended: the periodic tick and a
//! per-session end timer armed when the session opens. Both go through
//! [`SessionScheduler::close_expired`], whose compare-and-set on `is_active`
//! lets exactly one of them win.

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{sync::watch, task::AbortHandle, task::JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::SessionEntity,
    error::ServiceError,
    services::{result_engine, sse_events},
    state::{
        SharedState,
        lifecycle::{self, LifecycleAction},
    },
};

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still running.
    Skipped,
    /// The tick hit an error and stopped early. The next tick starts over.
    Failed,
    /// A new session was opened.
    Opened {
        /// Id of the new session.
        session_id: Uuid,
    },
    /// The expired session was closed.
    Closed {
        /// Id of the closed session.
        session_id: Uuid,
    },
    /// Nothing to do: a session is running, or the cooldown is not over.
    Unchanged,
}

/// Result of [`SessionScheduler::open_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A session was created by this call.
    Created(SessionEntity),
    /// A session was already active and is returned untouched.
    Existing(SessionEntity),
}

/// Resets the single-flight latch when the tick finishes, even on panic.
struct TickLatch<'a>(&'a AtomicBool);

impl Drop for TickLatch<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the session lifecycle. One instance per deployment.
pub struct SessionScheduler {
    state: SharedState,
    ticking: AtomicBool,
    /// Timers still sleeping, by session. A timer leaves the map when it fires.
    end_timers: DashMap<Uuid, AbortHandle>,
    /// Every spawned timer task, including those busy closing a session.
    timer_tasks: Mutex<JoinSet<()>>,
}

impl SessionScheduler {
    /// Build a scheduler over `state`. Nothing runs until [`SessionScheduler::run`] or a tick.
    pub fn new(state: SharedState) -> Arc<Self> {
        Arc::new(Self {
            state,
            ticking: AtomicBool::new(false),
            end_timers: DashMap::new(),
            timer_tasks: Mutex::new(JoinSet::new()),
        })
    }

    fn timer_tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.timer_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Evaluate the lifecycle once. Overlapping calls return [`TickOutcome::Skipped`].
    pub async fn tick(self: &Arc<Self>) -> TickOutcome {
        if self
            .ticking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("previous tick still running; skipping");
            return TickOutcome::Skipped;
        }
        let _latch = TickLatch(&self.ticking);

        match self.step().await {
            Ok(outcome) => outcome,
            Err(ServiceError::Degraded) => {
                debug!("storage unavailable; tick skipped");
                TickOutcome::Failed
            }
            Err(err) => {
                warn!(error = %err, "scheduler tick failed");
                TickOutcome::Failed
            }
        }
    }

    async fn step(self: &Arc<Self>) -> Result<TickOutcome, ServiceError> {
        let store = self.state.require_session_store().await?;
        let now = self.state.now();

        // Read-only snapshot; the transaction is dropped before acting on it.
        let (active, last_ended) = {
            let mut tx = store.begin().await?;
            let active = tx.find_active_session().await?;
            let last_ended = match active {
                Some(_) => None,
                None => tx.find_last_ended_session().await?,
            };
            (active, last_ended)
        };

        let action = lifecycle::decide(
            now,
            active.as_ref(),
            last_ended.as_ref(),
            self.state.config().cooldown,
        );

        let outcome = match action {
            LifecycleAction::Open => match self.open_session().await? {
                OpenOutcome::Created(session) => TickOutcome::Opened {
                    session_id: session.id,
                },
                OpenOutcome::Existing(_) => TickOutcome::Unchanged,
            },
            LifecycleAction::Close(_) => match self.close_expired().await? {
                Some(session) => TickOutcome::Closed {
                    session_id: session.id,
                },
                None => TickOutcome::Unchanged,
            },
            LifecycleAction::Hold { time_left } => {
                // Sessions inherited from a previous run have no timer yet.
                if let Some(session) = &active {
                    self.arm_end_timer(session);
                }
                debug!(time_left_secs = time_left.as_secs(), "session running");
                TickOutcome::Unchanged
            }
            LifecycleAction::Wait { next_session_in } => {
                debug!(
                    next_session_in_secs = next_session_in.as_secs(),
                    "cooling down"
                );
                TickOutcome::Unchanged
            }
        };
        Ok(outcome)
    }

    /// Open a session unless one is already active.
    ///
    /// The cooldown is not checked here; callers decide when opening is due.
    pub async fn open_session(self: &Arc<Self>) -> Result<OpenOutcome, ServiceError> {
        let store = self.state.require_session_store().await?;
        let now = self.state.now();

        let mut tx = store.begin().await?;
        if let Some(existing) = tx.find_active_session().await? {
            return Ok(OpenOutcome::Existing(existing));
        }

        let session = SessionEntity::open(
            Uuid::new_v4().simple().to_string(),
            now,
            self.state.config().session_duration.as_secs(),
        );
        tx.create_session(session.clone()).await?;
        tx.commit().await?;

        info!(
            session_id = %session.id,
            duration_secs = session.duration_secs,
            "session opened"
        );
        sse_events::broadcast_session_started(&self.state, &session);
        self.arm_end_timer(&session);
        Ok(OpenOutcome::Created(session))
    }

    /// Close the active session if it is past its deadline, then settle it.
    ///
    /// Returns `None` when there is nothing to close, including when another
    /// producer closed the session first.
    pub async fn close_expired(&self) -> Result<Option<SessionEntity>, ServiceError> {
        let store = self.state.require_session_store().await?;
        let now = self.state.now();

        let mut tx = store.begin().await?;
        let Some(session) = tx.find_active_session().await? else {
            return Ok(None);
        };
        if !session.is_expired_at(now) {
            return Ok(None);
        }

        let winning_number = self.state.draw_number();
        if !tx.end_session(session.id, winning_number, now).await? {
            return Ok(None);
        }
        tx.commit().await?;

        if let Some((_, timer)) = self.end_timers.remove(&session.id) {
            timer.abort();
        }

        info!(session_id = %session.id, winning_number, "session ended");
        sse_events::broadcast_session_ended(&self.state, &session, winning_number);

        match result_engine::settle(&self.state, session.id, None).await {
            Ok(snapshot) => sse_events::broadcast_game_result(&self.state, &snapshot),
            Err(err) => warn!(
                session_id = %session.id,
                error = %err,
                retryable = err.is_retryable(),
                "settlement deferred until the result is requested"
            ),
        }

        let mut closed = session;
        closed.is_active = false;
        closed.ended_at = Some(now);
        closed.winning_number = Some(winning_number);
        Ok(Some(closed))
    }

    /// Spawn the end timer of `session` unless one is already armed.
    fn arm_end_timer(self: &Arc<Self>, session: &SessionEntity) {
        if self.end_timers.contains_key(&session.id) {
            return;
        }
        self.end_timers.retain(|_, timer| !timer.is_finished());
        // The slot stays locked until the handle is stored, so the timer cannot
        // unregister before it was registered.
        let Entry::Vacant(slot) = self.end_timers.entry(session.id) else {
            return;
        };

        let fire_at = session.deadline() + self.state.config().end_grace;
        let delay = fire_at
            .duration_since(self.state.now())
            .unwrap_or(Duration::ZERO);
        let clock = self.state.clock();
        let scheduler = Arc::clone(self);
        let session_id = session.id;

        let mut tasks = self.timer_tasks();
        while tasks.try_join_next().is_some() {}
        let timer = tasks.spawn(async move {
            clock.sleep(delay).await;
            // Unregister first so close_expired never aborts the running timer.
            scheduler.end_timers.remove(&session_id);
            match scheduler.close_expired().await {
                Ok(Some(_)) => debug!(%session_id, "end timer closed session"),
                Ok(None) => debug!(%session_id, "session already closed when end timer fired"),
                Err(err) => warn!(%session_id, error = %err, "end timer failed to close session"),
            }
        });
        drop(tasks);
        slot.insert(timer);
        debug!(%session_id, delay_ms = delay.as_millis() as u64, "end timer armed");
    }

    /// Number of end timers currently registered.
    pub fn pending_end_timers(&self) -> usize {
        self.end_timers.len()
    }

    /// Number of timer tasks not yet joined, sleeping or closing.
    pub fn running_end_timers(&self) -> usize {
        let mut tasks = self.timer_tasks();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Cancel sleeping timers and wait for those already closing a session.
    async fn stop_end_timers(&self) {
        for timer in self.end_timers.iter() {
            timer.value().abort();
        }
        self.end_timers.clear();

        let mut tasks = std::mem::take(&mut *self.timer_tasks());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Err(err) if err.is_panic() => error!(error = %err, "end timer panicked"),
                _ => {}
            }
        }
    }

    /// Tick every `tick_interval` until `shutdown` flips to `true` or its sender drops.
    ///
    /// Each tick runs in its own task so a slow tick overlaps the next trigger
    /// instead of delaying it. On shutdown in-flight ticks and end timers that
    /// already started closing a session are awaited.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let clock = self.state.clock();
        let interval = self.state.config().tick_interval;
        let mut ticks = JoinSet::new();

        info!(
            tick_interval_ms = interval.as_millis() as u64,
            "session scheduler started"
        );

        let first = Arc::clone(&self);
        ticks.spawn(async move { first.tick().await });
        let mut next_tick = clock.sleep(interval);

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = &mut next_tick => {
                    next_tick = clock.sleep(interval);
                    let scheduler = Arc::clone(&self);
                    ticks.spawn(async move { scheduler.tick().await });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(joined) = ticks.join_next(), if !ticks.is_empty() => {
                    log_tick(joined);
                }
            }
        }

        info!(in_flight = ticks.len(), "session scheduler stopping");
        // Ticks first: a tick still opening a session may arm one more timer.
        while let Some(joined) = ticks.join_next().await {
            log_tick(joined);
        }
        self.stop_end_timers().await;
        info!("session scheduler stopped");
    }
}

fn log_tick(joined: Result<TickOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(TickOutcome::Opened { session_id }) => debug!(%session_id, "tick opened session"),
        Ok(TickOutcome::Closed { session_id }) => debug!(%session_id, "tick closed session"),
        Ok(_) => {}
        Err(err) => error!(error = %err, "scheduler tick panicked"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::future::join_all;
    use tokio::sync::broadcast;

    use super::*;
    use crate::{
        dto::sse::ServerEvent,
        services::test_support::{WINNING_NUMBER, fixture, fixture_with_draw},
        state::draw::NumberDraw,
    };

    fn drain(receiver: &mut broadcast::Receiver<ServerEvent>) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            names.extend(event.event);
        }
        names
    }

    /// Let spawned timers run to completion on the real runtime.
    async fn settle_tasks() {
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[derive(Default)]
    struct CountingDraw(AtomicUsize);

    impl NumberDraw for CountingDraw {
        fn draw(&self) -> u8 {
            self.0.fetch_add(1, Ordering::SeqCst);
            WINNING_NUMBER
        }
    }

    #[tokio::test]
    async fn first_tick_opens_a_session() {
        let fx = fixture().await;
        let mut events = fx.state.public_sse().subscribe();
        let scheduler = SessionScheduler::new(fx.state.clone());

        let outcome = scheduler.tick().await;
        assert!(matches!(outcome, TickOutcome::Opened { .. }));
        assert_eq!(fx.store.active_session_count().await, 1);
        assert_eq!(scheduler.pending_end_timers(), 1);

        let sessions = fx.store.sessions().await;
        let session = &sessions[0];
        assert_eq!(session.token.len(), 32);
        assert!(session.token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(drain(&mut events), vec!["session.started".to_string()]);

        assert_eq!(scheduler.tick().await, TickOutcome::Unchanged);
        assert_eq!(fx.store.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let fx = fixture().await;
        let scheduler = SessionScheduler::new(fx.state.clone());

        scheduler.ticking.store(true, Ordering::SeqCst);
        assert_eq!(scheduler.tick().await, TickOutcome::Skipped);
        assert_eq!(fx.store.sessions().await.len(), 0);

        scheduler.ticking.store(false, Ordering::SeqCst);
        assert!(matches!(scheduler.tick().await, TickOutcome::Opened { .. }));
        assert!(!scheduler.ticking.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ticks_open_exactly_one_session() {
        let fx = fixture().await;
        let scheduler = SessionScheduler::new(fx.state.clone());

        let handles = (0..16).map(|_| {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.tick().await })
        });
        let outcomes: Vec<TickOutcome> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let opened = outcomes
            .iter()
            .filter(|o| matches!(o, TickOutcome::Opened { .. }))
            .count();
        assert_eq!(opened, 1);
        assert_eq!(fx.store.sessions().await.len(), 1);
        assert_eq!(fx.store.active_session_count().await, 1);
    }

    #[tokio::test]
    async fn expired_session_closes_then_cooldown_gates_the_next_one() {
        let fx = fixture().await;
        let scheduler = SessionScheduler::new(fx.state.clone());
        let mut events = fx.state.public_sse().subscribe();

        let TickOutcome::Opened { session_id } = scheduler.tick().await else {
            panic!("expected a session to open");
        };
        // Deadline reached, end timer (deadline + grace) not yet due.
        fx.clock.advance(Duration::from_secs(30));
        assert_eq!(scheduler.tick().await, TickOutcome::Closed { session_id });
        assert_eq!(scheduler.pending_end_timers(), 0);

        let sessions = fx.store.sessions().await;
        let closed = &sessions[0];
        assert!(!closed.is_active);
        assert_eq!(closed.winning_number, Some(WINNING_NUMBER));
        assert_eq!(
            drain(&mut events),
            vec![
                "session.started".to_string(),
                "session.ended".to_string(),
                "game.result".to_string()
            ]
        );

        fx.clock.advance(Duration::from_secs(3));
        assert_eq!(scheduler.tick().await, TickOutcome::Unchanged);
        fx.clock.advance(Duration::from_secs(7));
        assert!(matches!(scheduler.tick().await, TickOutcome::Opened { .. }));
        assert_eq!(fx.store.sessions().await.len(), 2);
    }

    #[tokio::test]
    async fn end_timer_closes_without_a_tick() {
        let fx = fixture().await;
        let scheduler = SessionScheduler::new(fx.state.clone());
        let mut events = fx.state.public_sse().subscribe();
        assert!(matches!(scheduler.tick().await, TickOutcome::Opened { .. }));

        fx.clock.advance(Duration::from_secs(31));
        settle_tasks().await;

        assert_eq!(fx.store.active_session_count().await, 0);
        assert_eq!(scheduler.pending_end_timers(), 0);
        let names = drain(&mut events);
        assert_eq!(names.iter().filter(|n| *n == "session.ended").count(), 1);
        assert_eq!(names.iter().filter(|n| *n == "game.result").count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn end_timer_racing_a_tick_draws_once() {
        let draw = Arc::new(CountingDraw::default());
        let fx = fixture_with_draw(draw.clone()).await;
        let scheduler = SessionScheduler::new(fx.state.clone());
        let mut events = fx.state.public_sse().subscribe();
        assert!(matches!(scheduler.tick().await, TickOutcome::Opened { .. }));

        // Wakes the timer and makes the tick want to close at the same time.
        fx.clock.advance(Duration::from_secs(31));
        let outcome = scheduler.tick().await;
        assert!(matches!(
            outcome,
            TickOutcome::Closed { .. } | TickOutcome::Unchanged
        ));
        settle_tasks().await;

        assert_eq!(draw.0.load(Ordering::SeqCst), 1);
        let names = drain(&mut events);
        assert_eq!(names.iter().filter(|n| *n == "session.ended").count(), 1);
        assert_eq!(fx.store.active_session_count().await, 0);
        assert_eq!(fx.store.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn closing_before_the_deadline_is_a_no_op() {
        let fx = fixture().await;
        let scheduler = SessionScheduler::new(fx.state.clone());
        assert!(matches!(scheduler.tick().await, TickOutcome::Opened { .. }));

        fx.clock.advance(Duration::from_secs(29));
        assert_eq!(scheduler.close_expired().await.unwrap(), None);
        assert_eq!(fx.store.active_session_count().await, 1);
    }

    #[tokio::test]
    async fn open_session_is_idempotent() {
        let fx = fixture().await;
        let scheduler = SessionScheduler::new(fx.state.clone());

        let OpenOutcome::Created(created) = scheduler.open_session().await.unwrap() else {
            panic!("expected a new session");
        };
        let OpenOutcome::Existing(existing) = scheduler.open_session().await.unwrap() else {
            panic!("expected the active session back");
        };
        assert_eq!(created.id, existing.id);
        assert_eq!(fx.store.sessions().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_open_attempts_create_one_session() {
        let fx = fixture().await;
        let scheduler = SessionScheduler::new(fx.state.clone());

        let handles = (0..8).map(|_| {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.open_session().await })
        });
        let outcomes: Vec<OpenOutcome> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let created: Vec<&SessionEntity> = outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                OpenOutcome::Created(session) => Some(session),
                OpenOutcome::Existing(_) => None,
            })
            .collect();
        assert_eq!(created.len(), 1);
        for outcome in &outcomes {
            if let OpenOutcome::Existing(session) = outcome {
                assert_eq!(session.id, created[0].id);
            }
        }
        assert_eq!(fx.store.sessions().await.len(), 1);
        assert_eq!(scheduler.pending_end_timers(), 1);
    }

    #[tokio::test]
    async fn failing_store_recovers_on_the_next_tick() {
        let fx = fixture().await;
        let scheduler = SessionScheduler::new(fx.state.clone());

        fx.store.set_online(false);
        assert_eq!(scheduler.tick().await, TickOutcome::Failed);
        assert!(!scheduler.ticking.load(Ordering::SeqCst));

        fx.store.set_online(true);
        assert!(matches!(scheduler.tick().await, TickOutcome::Opened { .. }));
    }

    #[tokio::test]
    async fn degraded_mode_fails_ticks() {
        let fx = fixture().await;
        fx.state.clear_session_store().await;
        let scheduler = SessionScheduler::new(fx.state.clone());
        assert_eq!(scheduler.tick().await, TickOutcome::Failed);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let fx = fixture().await;
        let scheduler = SessionScheduler::new(fx.state.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = tokio::spawn(Arc::clone(&scheduler).run(shutdown_rx));

        for _ in 0..100 {
            if fx.store.active_session_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(fx.store.active_session_count().await, 1);

        shutdown_tx.send_replace(true);
        driver.await.unwrap();
        assert_eq!(scheduler.pending_end_timers(), 0);
        assert_eq!(scheduler.running_end_timers(), 0);
    }

    #[tokio::test]
    async fn shutdown_lets_a_firing_end_timer_finish() {
        let fx = fixture().await;
        let scheduler = SessionScheduler::new(fx.state.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = tokio::spawn(Arc::clone(&scheduler).run(shutdown_rx));

        for _ in 0..100 {
            if scheduler.pending_end_timers() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(scheduler.pending_end_timers(), 1);

        // Once unregistered the timer is past its sleep and closing the session.
        fx.clock.advance(Duration::from_secs(31));
        for _ in 0..100 {
            if scheduler.pending_end_timers() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(scheduler.pending_end_timers(), 0);
        shutdown_tx.send_replace(true);
        driver.await.unwrap();

        assert_eq!(scheduler.running_end_timers(), 0);
        let sessions = fx.store.sessions().await;
        assert!(!sessions[0].is_active);
        assert_eq!(sessions[0].winning_number, Some(WINNING_NUMBER));
    }
}
