//! The sync orchestrator.
//!
//! [`SyncEngine`] owns the sync lifecycle. It gates every cycle behind the
//! policy, connectivity and authentication checks, runs push then pull,
//! and turns every outcome into a status, a diagnostic event and, after a
//! failure, a backoff retry. Errors never escape to the caller.

mod pull;
mod push;

use bujo_sync_protocol::EntityKind;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backoff::{BackoffScheduler, ScheduledRetry};
use crate::config::SyncConfig;
use crate::environment::{LifecycleEvent, SyncEnvironment};
use crate::error::{SyncError, SyncResult};
use crate::events::{EventLevel, EventLog, SyncEvent, SyncEventKind};
use crate::status::{StatusMachine, SyncStatus};
use crate::store::LocalStore;
use crate::transport::SyncTransport;

/// Cumulative counters since construction or the last reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Cycles that finished successfully.
    pub cycles_completed: u64,
    /// Cycles that ended in an error.
    pub cycles_failed: u64,
    /// Mutations accepted by the remote.
    pub mutations_pushed: u64,
    /// Mutations dropped because their payload could not be decoded.
    pub mutations_dropped: u64,
    /// Pulled rows committed locally.
    pub rows_pulled: u64,
    /// Pulled rows skipped because their parent is missing.
    pub rows_skipped: u64,
    /// Pull pages aborted by a decode failure.
    pub decode_failures: u64,
    /// Backoff retries scheduled.
    pub retries_scheduled: u64,
    /// Time of the last successful cycle.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Message of the last failure, cleared by a success.
    pub last_error: Option<String>,
}

/// Summary of one successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Mutations pushed.
    pub pushed: usize,
    /// Mutations dropped as undecodable.
    pub dropped: usize,
    /// Rows pulled and committed.
    pub pulled: usize,
    /// Rows skipped for a missing parent.
    pub skipped: usize,
    /// Entity kinds whose pull stopped on a decode failure.
    pub decode_failures: usize,
    /// Wall time of the cycle.
    pub duration: Duration,
}

/// What a call to [`SyncEngine::trigger_now`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A cycle ran to completion.
    Completed(CycleReport),
    /// Another cycle was already running; nothing was done.
    AlreadyRunning,
    /// Sync is disabled for this build.
    Disabled,
    /// The sync policy declined the trigger.
    Declined,
    /// The device is offline.
    Offline,
    /// Nobody is signed in, or the remote rejected the session.
    AuthRequired,
    /// The cycle failed.
    Failed {
        /// Error message.
        message: String,
        /// Delay of the scheduled retry, if one was scheduled.
        retry_in: Option<Duration>,
    },
    /// The cycle was cancelled.
    Cancelled,
}

#[derive(Debug)]
struct EngineState {
    status: StatusMachine,
    backoff: BackoffScheduler,
    stats: SyncStats,
    events: EventLog,
    listener: Option<JoinHandle<()>>,
}

impl EngineState {
    fn set_status(&mut self, to: SyncStatus) {
        if let Err(err) = self.status.transition(to) {
            tracing::warn!(error = %err, "status transition rejected");
        }
    }
}

struct EngineInner<S, T> {
    config: SyncConfig,
    store: Arc<S>,
    transport: Arc<T>,
    env: SyncEnvironment,
    state: Mutex<EngineState>,
    cancelled: AtomicBool,
}

enum Signal {
    Connectivity(bool),
    Lifecycle(LifecycleEvent),
}

/// Offline-first sync engine.
///
/// The handle is cheap to clone; clones share the same state. At most one
/// cycle runs at a time: the check and the move into `Syncing` happen in
/// one critical section.
pub struct SyncEngine<S, T> {
    inner: Arc<EngineInner<S, T>>,
}

impl<S, T> Clone for SyncEngine<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, T> std::fmt::Debug for SyncEngine<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.inner.config)
            .field("status", self.inner.state.lock().status.current())
            .finish_non_exhaustive()
    }
}

impl<S, T> SyncEngine<S, T>
where
    S: LocalStore + 'static,
    T: SyncTransport + 'static,
{
    /// Creates an engine. A configuration with sync switched off starts
    /// in `Disabled` and stays there.
    pub fn new(
        config: SyncConfig,
        store: Arc<S>,
        transport: Arc<T>,
        env: SyncEnvironment,
    ) -> Self {
        let initial = if config.enabled {
            SyncStatus::Idle
        } else {
            SyncStatus::Disabled
        };
        let state = EngineState {
            status: StatusMachine::new(initial),
            backoff: BackoffScheduler::new(config.retry.clone()),
            stats: SyncStats::default(),
            events: EventLog::new(config.event_log_capacity),
            listener: None,
        };
        Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                transport,
                env,
                state: Mutex::new(state),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The local store.
    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    /// The transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.inner.transport
    }

    /// The host environment.
    pub fn environment(&self) -> &SyncEnvironment {
        &self.inner.env
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        self.inner.state.lock().status.current().clone()
    }

    /// A receiver that observes every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.state.lock().status.subscribe()
    }

    /// Counters since construction or the last reset.
    pub fn stats(&self) -> SyncStats {
        self.inner.state.lock().stats.clone()
    }

    /// Recent diagnostic events, oldest first.
    pub fn events(&self) -> Vec<SyncEvent> {
        self.inner.state.lock().events.snapshot()
    }

    /// Number of mutations waiting to be pushed.
    pub fn pending_mutations(&self) -> SyncResult<usize> {
        self.inner.store.count()
    }

    /// The pending backoff retry, if any.
    pub fn scheduled_retry(&self) -> Option<ScheduledRetry> {
        self.inner.state.lock().backoff.scheduled()
    }

    /// Consecutive failed cycles since the last success.
    pub fn failure_count(&self) -> u32 {
        self.inner.state.lock().backoff.failure_count()
    }

    /// Starts observing connectivity and lifecycle signals, then runs one
    /// cycle. Does nothing if sync is disabled or the engine is started.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.status.current().is_disabled() {
                tracing::debug!("sync disabled, not starting");
                return;
            }
            if state.listener.is_some() {
                return;
            }
            let network = self.inner.env.network.subscribe();
            let lifecycle = self.inner.env.lifecycle.subscribe();
            let weak = Arc::downgrade(&self.inner);
            state.listener = Some(tokio::spawn(Self::listen(weak, network, lifecycle)));
        }
        tracing::info!(device_id = %self.inner.config.device_id, "sync engine started");
        self.spawn_cycle();
    }

    /// Stops observing signals and cancels the pending retry. A cycle that
    /// is already running finishes normally.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if let Some(listener) = state.listener.take() {
            listener.abort();
            tracing::info!("sync engine stopped");
        }
        state.backoff.cancel();
    }

    /// Asks the running cycle, if any, to stop at its next checkpoint.
    ///
    /// Returns true if a cycle was running.
    pub fn cancel(&self) -> bool {
        let state = self.inner.state.lock();
        let running = state.status.current().is_syncing();
        if running {
            self.inner.cancelled.store(true, Ordering::SeqCst);
        }
        running
    }

    /// Runs one cycle now, unless a guard refuses it.
    ///
    /// Guards are checked in order: disabled, already running, policy,
    /// connectivity, authentication. A pending backoff retry is superseded.
    pub async fn trigger_now(&self) -> TriggerOutcome {
        if let Some(outcome) = self.begin_cycle() {
            return outcome;
        }
        let result = self.run_cycle().await;
        self.finish_cycle(result)
    }

    /// Wipes the outbox and every cursor, cancels scheduling, and resets
    /// counters and status.
    ///
    /// A running cycle is cancelled and ends in `Idle`. Local entities are
    /// kept.
    pub fn reset_state(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let reset = self.inner.store.reset_sync_state();

        let mut state = self.inner.state.lock();
        state.backoff.reset();
        state.stats = SyncStats::default();
        match reset {
            Ok(()) => {
                state
                    .events
                    .record(EventLevel::Info, SyncEventKind::StateReset, "sync state reset");
                tracing::info!("sync state reset");
            }
            Err(err) => {
                let message = format!("sync state reset failed: {err}");
                tracing::error!(error = %err, "sync state reset failed");
                state.stats.last_error = Some(message.clone());
                state
                    .events
                    .record(EventLevel::Error, SyncEventKind::StateReset, message);
            }
        }
        let current = state.status.current();
        if !current.is_syncing() && !current.is_disabled() {
            state.set_status(SyncStatus::Idle);
        }
    }

    /// Applies the guard sequence. Returns the outcome if the cycle must
    /// not run; otherwise moves to `Syncing`.
    fn begin_cycle(&self) -> Option<TriggerOutcome> {
        let env = &self.inner.env;
        let mut state = self.inner.state.lock();
        let current = state.status.current();

        if current.is_disabled() {
            return Some(TriggerOutcome::Disabled);
        }
        if current.is_syncing() {
            tracing::debug!("sync already running");
            return Some(TriggerOutcome::AlreadyRunning);
        }
        if !env.policy.should_sync() {
            state.events.record(
                EventLevel::Info,
                SyncEventKind::TriggerSkipped,
                "trigger declined by sync policy",
            );
            return Some(TriggerOutcome::Declined);
        }
        if !env.network.is_connected() {
            state.backoff.cancel();
            state.set_status(SyncStatus::Offline);
            return Some(TriggerOutcome::Offline);
        }
        if !env.auth.is_signed_in() {
            state.backoff.cancel();
            state.set_status(SyncStatus::AuthRequired);
            return Some(TriggerOutcome::AuthRequired);
        }

        state.backoff.cancel();
        state.set_status(SyncStatus::Syncing);
        self.inner.cancelled.store(false, Ordering::SeqCst);
        state.events.record(
            EventLevel::Info,
            SyncEventKind::CycleStarted,
            "sync cycle started",
        );
        None
    }

    async fn run_cycle(&self) -> SyncResult<CycleReport> {
        let started = Instant::now();
        let policy = &self.inner.env.policy;
        if let Some(delay) = policy.force_duration() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = policy.force_failure() {
            return Err(SyncError::Forced(message));
        }
        let user_id = self
            .inner
            .env
            .auth
            .current_user_id()
            .ok_or(SyncError::NotAuthenticated)?;

        let push = self.push_pending(user_id).await?;
        self.check_cancelled()?;
        let pull = self.pull_changes().await?;

        Ok(CycleReport {
            pushed: push.pushed,
            dropped: push.dropped,
            pulled: pull.pulled,
            skipped: pull.skipped,
            decode_failures: pull.decode_failures,
            duration: started.elapsed(),
        })
    }

    fn finish_cycle(&self, result: SyncResult<CycleReport>) -> TriggerOutcome {
        let connected = self.inner.env.network.is_connected();
        let mut state = self.inner.state.lock();

        // A cancellation raised mid-cycle overrides the cycle's own result.
        let result = match result {
            Err(SyncError::Cancelled) => Err(SyncError::Cancelled),
            _ if self.inner.cancelled.load(Ordering::SeqCst) => {
                if let Err(err) = &result {
                    tracing::debug!(error = %err, "failure after cancellation ignored");
                }
                Err(SyncError::Cancelled)
            }
            other => other,
        };

        let err = match result {
            Ok(report) => {
                let at = Utc::now();
                state.backoff.reset();
                state.stats.cycles_completed += 1;
                state.stats.last_synced_at = Some(at);
                state.stats.last_error = None;
                state.set_status(SyncStatus::Synced { at });
                state.events.record(
                    EventLevel::Info,
                    SyncEventKind::CycleCompleted,
                    format!(
                        "pushed {}, pulled {}, skipped {}",
                        report.pushed, report.pulled, report.skipped
                    ),
                );
                tracing::info!(
                    pushed = report.pushed,
                    pulled = report.pulled,
                    skipped = report.skipped,
                    duration_ms = report.duration.as_millis() as u64,
                    "sync cycle completed"
                );
                return TriggerOutcome::Completed(report);
            }
            Err(SyncError::Cancelled) => {
                state.set_status(SyncStatus::Idle);
                state.events.record(
                    EventLevel::Info,
                    SyncEventKind::CycleCancelled,
                    "sync cycle cancelled",
                );
                tracing::info!("sync cycle cancelled");
                return TriggerOutcome::Cancelled;
            }
            Err(err) => err,
        };

        let message = err.to_string();
        state.stats.cycles_failed += 1;
        state.stats.last_error = Some(message.clone());
        let level = if err.is_retryable() {
            EventLevel::Warning
        } else {
            EventLevel::Error
        };
        state
            .events
            .record(level, SyncEventKind::CycleFailed, message.clone());

        match err {
            SyncError::NotAuthenticated => {
                tracing::warn!("sync cycle failed: not authenticated");
                state.backoff.cancel();
                state.set_status(SyncStatus::AuthRequired);
                TriggerOutcome::AuthRequired
            }
            _ if !connected => {
                tracing::warn!(error = %err, "sync cycle failed while offline");
                state.set_status(SyncStatus::Offline);
                TriggerOutcome::Offline
            }
            err => {
                if err.is_retryable() {
                    tracing::warn!(error = %err, "sync cycle failed");
                } else {
                    tracing::error!(error = %err, "sync cycle failed");
                }
                let delay = state.backoff.record_failure();
                self.schedule_retry(&mut state, delay);
                state.stats.retries_scheduled += 1;
                state.events.record(
                    EventLevel::Info,
                    SyncEventKind::RetryScheduled,
                    format!("retry in {}s", delay.as_secs()),
                );
                state.set_status(SyncStatus::Error {
                    message: message.clone(),
                });
                TriggerOutcome::Failed {
                    message,
                    retry_in: Some(delay),
                }
            }
        }
    }

    /// Arms the single retry slot. Called with the state lock held, so the
    /// timer cannot observe the slot before it is armed.
    fn schedule_retry(&self, state: &mut EngineState, delay: Duration) {
        let generation = state.backoff.next_generation();
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.fire_retry(generation).await;
        });
        state.backoff.arm(generation, delay, handle);
        tracing::debug!(
            delay_ms = delay.as_millis() as u64,
            failures = state.backoff.failure_count(),
            "retry scheduled"
        );
    }

    async fn fire_retry(&self, generation: u64) {
        let current = self.inner.state.lock().backoff.take_if_current(generation);
        if current {
            tracing::debug!("retry timer fired");
            self.trigger_now().await;
        }
    }

    fn spawn_cycle(&self) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.trigger_now().await;
        });
    }

    /// Moves to `Offline` unless a cycle is running.
    fn mark_offline(&self) {
        let mut state = self.inner.state.lock();
        let current = state.status.current();
        if current.is_syncing() || current.is_disabled() {
            return;
        }
        state.backoff.cancel();
        state.set_status(SyncStatus::Offline);
    }

    async fn listen(
        weak: Weak<EngineInner<S, T>>,
        mut network: watch::Receiver<bool>,
        mut lifecycle: broadcast::Receiver<LifecycleEvent>,
    ) {
        loop {
            let signal = tokio::select! {
                changed = network.changed() => match changed {
                    Ok(()) => {
                        let connected = *network.borrow_and_update();
                        Signal::Connectivity(connected)
                    }
                    Err(_) => break,
                },
                event = lifecycle.recv() => match event {
                    Ok(event) => Signal::Lifecycle(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "lifecycle events lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            let Some(inner) = weak.upgrade() else {
                break;
            };
            let engine = SyncEngine { inner };
            match signal {
                Signal::Connectivity(true) => {
                    tracing::debug!("connectivity regained");
                    engine.spawn_cycle();
                }
                Signal::Connectivity(false) => {
                    tracing::debug!("connectivity lost");
                    engine.mark_offline();
                }
                Signal::Lifecycle(LifecycleEvent::Foreground) => engine.spawn_cycle(),
                Signal::Lifecycle(LifecycleEvent::Background) => {}
            }
        }
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    fn record_event(&self, level: EventLevel, kind: SyncEventKind, message: impl Into<String>) {
        self.inner.state.lock().events.record(level, kind, message);
    }

    fn update_stats(&self, f: impl FnOnce(&mut SyncStats)) {
        f(&mut self.inner.state.lock().stats);
    }
}

/// Kinds in the order both phases visit them.
fn phase_order() -> impl Iterator<Item = EntityKind> {
    EntityKind::PUSH_ORDER.into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{NetworkMonitor, StaticAuth};
    use crate::policy::DebugPolicy;
    use crate::store::{LocalWriter, MemoryStore};
    use crate::transport::{MockFailure, MockTransport};
    use bujo_sync_protocol::{Collection, LocalEntity, MutationOperation};
    use uuid::Uuid;

    struct Harness {
        engine: SyncEngine<MemoryStore, MockTransport>,
        network: NetworkMonitor,
        auth: Arc<StaticAuth>,
        policy: Arc<DebugPolicy>,
    }

    fn harness(config: SyncConfig) -> Harness {
        let auth = Arc::new(StaticAuth::signed_in(Uuid::new_v4(), "token"));
        let network = NetworkMonitor::new(true);
        let policy = Arc::new(DebugPolicy::new());
        let env = SyncEnvironment::new(auth.clone())
            .with_network(network.clone())
            .with_policy(policy.clone());
        let engine = SyncEngine::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MockTransport::new()),
            env,
        );
        Harness {
            engine,
            network,
            auth,
            policy,
        }
    }

    fn collection() -> LocalEntity {
        LocalEntity::Collection(Collection {
            id: Uuid::new_v4(),
            title: "Books".into(),
            content: String::new(),
            created_at: Utc::now(),
            deleted_at: None,
        })
    }

    #[tokio::test]
    async fn successful_cycle_reports_and_resets() {
        let h = harness(SyncConfig::new(Uuid::new_v4()));
        h.engine
            .store()
            .write_entity(&collection(), MutationOperation::Create, &[])
            .unwrap();

        let outcome = h.engine.trigger_now().await;

        let TriggerOutcome::Completed(report) = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(report.pushed, 1);
        assert_eq!(report.pulled, 1);
        assert!(matches!(h.engine.status(), SyncStatus::Synced { .. }));
        assert_eq!(h.engine.pending_mutations().unwrap(), 0);
        assert_eq!(h.engine.stats().cycles_completed, 1);
    }

    #[tokio::test]
    async fn disabled_engine_never_runs() {
        let h = harness(SyncConfig::disabled());

        assert_eq!(h.engine.trigger_now().await, TriggerOutcome::Disabled);
        h.engine.start();
        assert_eq!(h.engine.status(), SyncStatus::Disabled);
        assert!(h.engine.transport().fetch_calls().is_empty());
    }

    #[tokio::test]
    async fn guards_move_to_offline_and_auth_required() {
        let h = harness(SyncConfig::new(Uuid::new_v4()));

        h.network.set_connected(false);
        assert_eq!(h.engine.trigger_now().await, TriggerOutcome::Offline);
        assert_eq!(h.engine.status(), SyncStatus::Offline);

        h.network.set_connected(true);
        h.auth.sign_out();
        assert_eq!(h.engine.trigger_now().await, TriggerOutcome::AuthRequired);
        assert_eq!(h.engine.status(), SyncStatus::AuthRequired);
        assert!(h.engine.transport().merge_calls().is_empty());
    }

    #[tokio::test]
    async fn declined_trigger_is_logged() {
        let h = harness(SyncConfig::new(Uuid::new_v4()));
        h.policy.set_declined(true);

        assert_eq!(h.engine.trigger_now().await, TriggerOutcome::Declined);
        assert_eq!(h.engine.status(), SyncStatus::Idle);
        let events = h.engine.events();
        assert_eq!(events.last().unwrap().kind, SyncEventKind::TriggerSkipped);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_schedules_retry() {
        let h = harness(SyncConfig::new(Uuid::new_v4()));
        h.engine
            .transport()
            .fail_next_fetches(MockFailure::Status(503), 1);

        let outcome = h.engine.trigger_now().await;

        assert!(matches!(
            outcome,
            TriggerOutcome::Failed {
                retry_in: Some(d),
                ..
            } if d == Duration::from_secs(2)
        ));
        assert!(matches!(h.engine.status(), SyncStatus::Error { .. }));
        assert_eq!(h.engine.scheduled_retry().unwrap().failure_count, 1);
    }

    #[tokio::test]
    async fn unauthorized_response_requires_auth_without_retry() {
        let h = harness(SyncConfig::new(Uuid::new_v4()));
        h.engine
            .transport()
            .fail_next_fetches(MockFailure::Status(401), 1);

        assert_eq!(h.engine.trigger_now().await, TriggerOutcome::AuthRequired);
        assert_eq!(h.engine.status(), SyncStatus::AuthRequired);
        assert!(h.engine.scheduled_retry().is_none());
    }

    #[tokio::test]
    async fn reset_restores_idle() {
        let h = harness(SyncConfig::new(Uuid::new_v4()));
        h.engine
            .store()
            .write_entity(&collection(), MutationOperation::Create, &[])
            .unwrap();
        h.network.set_connected(false);
        h.engine.trigger_now().await;

        h.engine.reset_state();

        assert_eq!(h.engine.status(), SyncStatus::Idle);
        assert_eq!(h.engine.pending_mutations().unwrap(), 0);
        assert_eq!(h.engine.stats(), SyncStats::default());
    }
}
