//! Run controller -- drives one TWAMP run from start to cleanup.
//!
//! ```text
//! Idle ─start()─▶ StartingResponder ─ok─▶ StartingSender ─started─▶ Running ─completed─▶ Completed
//!                        │                      │                      ├─unknown/poll error─▶ Errored
//!                        └──────fail────────────┴──────fail──────▶ Errored
//!                                                                     └─deadline─▶ Errored (timeout)
//! any active state ─cancel()─▶ Stopped
//! ```
//!
//! Every terminal transition is followed by exactly one cleanup pass that
//! sends the stop commands. Only one run may be active per controller; use one
//! controller per node pair to run tests in parallel. A cancelled run reads
//! `Stopped` at once but keeps the controller busy until its stop commands
//! have been sent, so the next run's responder is never hit by them.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::command::{self, CommandSet};
use super::report::{format_report, CleanupFailure, CleanupOutcome, RunResult};
use super::validate::validate;
use super::{
    DerivedConfig, RawTestParameters, Role, RunFailure, RunState, StartError, TerminalReason,
    TestRunParameters,
};
use crate::config::ControllerConfig;
use crate::gateway::{CommandGateway, GatewayError, SessionStatus, StatusQuery};
use crate::registry::NodeRegistry;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Timing and policy knobs, see [`ControllerConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub grace_period: Duration,
    pub poll_interval: Duration,
    pub call_timeout: Duration,
    pub cleanup_timeout: Duration,
    pub wait_buffer_ms: u64,
    pub stop_sender_on_completion: bool,
}

impl From<&ControllerConfig> for ControllerSettings {
    fn from(c: &ControllerConfig) -> Self {
        Self {
            grace_period: Duration::from_millis(c.grace_period_ms),
            // A zero period would make `interval` panic.
            poll_interval: Duration::from_millis(c.poll_interval_ms.max(1)),
            call_timeout: Duration::from_millis(c.call_timeout_ms),
            cleanup_timeout: Duration::from_millis(c.cleanup_timeout_ms),
            wait_buffer_ms: c.wait_buffer_ms,
            stop_sender_on_completion: c.stop_sender_on_completion,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal record of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub state: RunState,
    pub reason: TerminalReason,
    /// Human-readable cause of the terminal state.
    pub cause: String,
    pub failure: Option<RunFailure>,
    pub result: Option<RunResult>,
    pub report: Option<String>,
    pub cleanup: CleanupOutcome,
    pub commands: CommandSet,
    pub params: TestRunParameters,
    pub derived: DerivedConfig,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Handle to a run spawned by [`RunController::start`].
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: Uuid,
    pub commands: CommandSet,
    pub derived: DerivedConfig,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    /// Wait for the run, including its cleanup, to finish.
    pub async fn wait(self) -> Result<RunOutcome, JoinError> {
        self.task.await
    }
}

// ---------------------------------------------------------------------------
// RunController
// ---------------------------------------------------------------------------

struct CurrentRun {
    id: Uuid,
    token: CancellationToken,
    /// Set once cleanup is done and the outcome is recorded.
    finished: bool,
}

impl CurrentRun {
    fn owned_by(&self, id: Uuid) -> bool {
        self.id == id && !self.finished
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the lifecycle of at most one active run. Cheap to clone; clones
/// share state.
#[derive(Clone)]
pub struct RunController {
    gateway: Arc<dyn CommandGateway>,
    registry: Arc<dyn NodeRegistry>,
    settings: Arc<ControllerSettings>,
    state: Arc<watch::Sender<RunState>>,
    current: Arc<Mutex<Option<CurrentRun>>>,
    last_outcome: Arc<Mutex<Option<RunOutcome>>>,
}

impl RunController {
    pub fn new(
        gateway: Arc<dyn CommandGateway>,
        registry: Arc<dyn NodeRegistry>,
        settings: ControllerSettings,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            gateway,
            registry,
            settings: Arc::new(settings),
            state: Arc::new(state),
            current: Arc::new(Mutex::new(None)),
            last_outcome: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Follow state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Outcome of the most recently finished run, if any.
    pub fn last_outcome(&self) -> Option<RunOutcome> {
        lock(&self.last_outcome).clone()
    }

    pub fn registry(&self) -> &Arc<dyn NodeRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Validate `raw` and spawn a run on the current tokio runtime.
    ///
    /// Fails without side effects on invalid parameters, when a run is
    /// already active, or while a cancelled run is still cleaning up.
    pub fn start(&self, raw: &RawTestParameters) -> Result<RunHandle, StartError> {
        let (params, derived) = validate(raw, self.registry.as_ref(), self.settings.wait_buffer_ms)?;
        let commands = CommandSet::build(&params);
        let run_id = Uuid::new_v4();
        let token = CancellationToken::new();

        {
            let mut current = lock(&self.current);
            if current.as_ref().is_some_and(|c| !c.finished) {
                let state = *self.state.borrow();
                if state.is_active() {
                    warn!(%state, "rejecting run: controller busy");
                } else {
                    warn!(%state, "rejecting run: previous run still cleaning up");
                }
                return Err(StartError::Busy { state });
            }
            self.state.send_replace(RunState::StartingResponder);
            *current = Some(CurrentRun {
                id: run_id,
                token: token.clone(),
                finished: false,
            });
        }

        info!(
            %run_id,
            sender = %params.sender_node_id,
            responder = %params.responder_node_id,
            responder_ip = %params.responder_ip,
            max_wait_ms = derived.max_wait_ms,
            on_the_wire_bytes = derived.on_the_wire_bytes,
            "starting twamp run"
        );

        let run = Run {
            controller: self.clone(),
            id: run_id,
            params,
            derived,
            commands: commands.clone(),
            token,
            started_at: Utc::now(),
        };
        let task = tokio::spawn(run.execute());

        Ok(RunHandle {
            run_id,
            commands,
            derived,
            task,
        })
    }

    /// Start a run and wait for its outcome.
    pub async fn run(&self, raw: &RawTestParameters) -> anyhow::Result<RunOutcome> {
        let handle = self.start(raw)?;
        Ok(handle.wait().await?)
    }

    /// Cancel the active run. The state reads `Stopped` as soon as this
    /// returns, even though cleanup is still in flight. Returns `false` if
    /// there was nothing to cancel.
    pub fn cancel(&self) -> bool {
        let current = lock(&self.current);
        let Some(run) = current.as_ref().filter(|c| !c.finished) else {
            return false;
        };
        let cancelled = self.state.send_if_modified(|s| {
            if s.is_active() {
                *s = RunState::Stopped;
                true
            } else {
                false
            }
        });
        if cancelled {
            info!(run_id = %run.id, "cancellation requested");
            run.token.cancel();
        }
        cancelled
    }

    /// Apply `update` to the state on behalf of run `id`. Runs that are no
    /// longer current never touch the state.
    fn transition(&self, id: Uuid, update: impl FnOnce(&mut RunState) -> bool) -> bool {
        let current = lock(&self.current);
        if !current.as_ref().is_some_and(|c| c.owned_by(id)) {
            return false;
        }
        self.state.send_if_modified(update)
    }

    /// Move `from` -> `to`. Fails only if a cancel got there first.
    fn advance(&self, id: Uuid, from: RunState, to: RunState) -> bool {
        self.transition(id, |s| {
            if *s == from {
                *s = to;
                true
            } else {
                false
            }
        })
    }

    /// Record a terminal state unless the run already left the active states.
    fn settle(&self, id: Uuid, to: RunState) -> bool {
        self.transition(id, |s| {
            if s.is_active() {
                *s = to;
                true
            } else {
                false
            }
        })
    }

    /// Store the outcome and release the controller for the next run.
    fn finish(&self, outcome: &RunOutcome) {
        let mut current = lock(&self.current);
        if let Some(run) = current.as_mut().filter(|c| c.id == outcome.run_id) {
            run.finished = true;
            *lock(&self.last_outcome) = Some(outcome.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
enum CallError {
    #[error("cancelled")]
    Cancelled,
    #[error("timed out after {0} ms")]
    TimedOut(u128),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl CallError {
    fn into_start_failure(self, role: Role, node_id: &str) -> RunFailure {
        match self {
            CallError::Cancelled => RunFailure::UserCancelled,
            other => RunFailure::StartFailure {
                role,
                node_id: node_id.to_string(),
                detail: other.to_string(),
            },
        }
    }
}

/// State of a single spawned run. Keeps the parameters alive until cleanup
/// has finished.
struct Run {
    controller: RunController,
    id: Uuid,
    params: TestRunParameters,
    derived: DerivedConfig,
    commands: CommandSet,
    token: CancellationToken,
    started_at: DateTime<Utc>,
}

impl Run {
    async fn execute(self) -> RunOutcome {
        let (mut reason, mut failure, mut result) = match self.drive().await {
            Ok(result) => (TerminalReason::Completed, None, Some(result)),
            Err(failure) => (failure.reason(), Some(failure), None),
        };

        if !self.controller.settle(self.id, reason.state()) && reason != TerminalReason::Stopped {
            // cancel() won the race after the run had already decided.
            reason = TerminalReason::Stopped;
            failure = Some(RunFailure::UserCancelled);
            result = None;
        }

        let state = reason.state();
        let cause = match &failure {
            Some(f) => f.to_string(),
            None => "run completed".to_string(),
        };
        match &failure {
            None => info!(run_id = %self.id, %state, "twamp run completed"),
            Some(RunFailure::UserCancelled) => info!(run_id = %self.id, %state, "twamp run stopped"),
            Some(f) => warn!(run_id = %self.id, %state, %reason, error = %f, "twamp run failed"),
        }

        let cleanup = self.cleanup(reason).await;
        let report = result.as_ref().map(format_report);

        let outcome = RunOutcome {
            run_id: self.id,
            state,
            reason,
            cause,
            failure,
            result,
            report,
            cleanup,
            commands: self.commands.clone(),
            params: self.params.clone(),
            derived: self.derived,
            started_at: self.started_at,
            finished_at: Utc::now(),
        };
        self.controller.finish(&outcome);
        outcome
    }

    async fn drive(&self) -> Result<RunResult, RunFailure> {
        let p = &self.params;
        let settings = &self.controller.settings;
        let gateway = &self.controller.gateway;

        info!(run_id = %self.id, node_id = %p.responder_node_id, command = %self.commands.start_responder, "starting responder");
        self.bounded(gateway.execute(&p.responder_node_id, &self.commands.start_responder))
            .await
            .map_err(|e| e.into_start_failure(Role::Responder, &p.responder_node_id))?;

        if !self
            .controller
            .advance(self.id, RunState::StartingResponder, RunState::StartingSender)
        {
            return Err(RunFailure::UserCancelled);
        }

        tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(RunFailure::UserCancelled),
            _ = tokio::time::sleep(settings.grace_period) => {}
        }

        info!(run_id = %self.id, node_id = %p.sender_node_id, command = %self.commands.start_sender, "starting sender");
        let started = self
            .bounded(gateway.execute(&p.sender_node_id, &self.commands.start_sender))
            .await
            .map_err(|e| e.into_start_failure(Role::Sender, &p.sender_node_id))?;
        if !command::sender_started(&started.output) {
            return Err(RunFailure::StartFailure {
                role: Role::Sender,
                node_id: p.sender_node_id.clone(),
                detail: format!("unexpected output: {}", started.output.trim()),
            });
        }

        if !self
            .controller
            .advance(self.id, RunState::StartingSender, RunState::Running)
        {
            return Err(RunFailure::UserCancelled);
        }

        self.poll_until_done().await
    }

    /// Race the poll cadence, the overall deadline and cancellation.
    async fn poll_until_done(&self) -> Result<RunResult, RunFailure> {
        let p = &self.params;
        let poll_interval = self.controller.settings.poll_interval;
        let max_wait_ms = self.derived.max_wait_ms;

        let deadline = tokio::time::sleep(Duration::from_millis(max_wait_ms));
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let query = StatusQuery {
            ip_version: p.ip_version,
            dest_ip: p.responder_ip,
            port: p.port,
        };

        info!(run_id = %self.id, max_wait_ms, poll_interval_ms = poll_interval.as_millis() as u64, "sender running, polling for results");

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(RunFailure::UserCancelled),
                _ = &mut deadline => {
                    warn!(run_id = %self.id, max_wait_ms, "no terminal status before deadline");
                    return Err(RunFailure::Timeout { max_wait_ms });
                }
                _ = ticker.tick() => {}
            }

            let polled = tokio::select! {
                biased;
                _ = &mut deadline => return Err(RunFailure::Timeout { max_wait_ms }),
                r = self.bounded(self.controller.gateway.status(&p.sender_node_id, &query)) => r,
            };

            match polled {
                Ok(report) => match report.status {
                    SessionStatus::Running => {
                        debug!(run_id = %self.id, "sender still running");
                    }
                    SessionStatus::Completed => {
                        let mut result = report.results.unwrap_or_default();
                        if result.error.is_none() {
                            result.error = report.error;
                        }
                        return Ok(result);
                    }
                    SessionStatus::Unknown => {
                        return Err(RunFailure::PollError {
                            detail: report
                                .error
                                .unwrap_or_else(|| "sender reported unknown status".to_string()),
                        });
                    }
                },
                Err(CallError::Cancelled) => return Err(RunFailure::UserCancelled),
                Err(e) => return Err(RunFailure::PollError { detail: e.to_string() }),
            }
        }
    }

    /// One timeout-bounded, cancellable attempt at a gateway call.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, CallError> {
        let timeout = self.controller.settings.call_timeout;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(CallError::Cancelled),
            r = tokio::time::timeout(timeout, call) => match r {
                Ok(res) => res.map_err(CallError::from),
                Err(_) => Err(CallError::TimedOut(timeout.as_millis())),
            },
        }
    }

    /// Send the stop commands. Independent of the run's cancellation token.
    async fn cleanup(&self, reason: TerminalReason) -> CleanupOutcome {
        let p = &self.params;
        let stop_sender = reason != TerminalReason::Completed
            || self.controller.settings.stop_sender_on_completion;

        let responder = self.stop(&p.responder_node_id, &self.commands.stop_responder);
        let sender = async {
            if stop_sender {
                Some(self.stop(&p.sender_node_id, &self.commands.stop_sender).await)
            } else {
                None
            }
        };
        let (responder, sender) = tokio::join!(responder, sender);

        let mut outcome = CleanupOutcome::default();
        outcome.sent.push(self.commands.stop_responder.clone());
        if let Err(f) = responder {
            outcome.failures.push(f);
        }
        if let Some(res) = sender {
            outcome.sent.push(self.commands.stop_sender.clone());
            if let Err(f) = res {
                outcome.failures.push(f);
            }
        }

        if outcome.is_clean() {
            info!(run_id = %self.id, %reason, "cleanup complete");
        } else {
            error!(run_id = %self.id, %reason, failures = outcome.failures.len(), "cleanup incomplete");
        }
        outcome
    }

    async fn stop(&self, node_id: &str, command: &str) -> Result<(), CleanupFailure> {
        let timeout = self.controller.settings.cleanup_timeout;
        info!(run_id = %self.id, node_id, command, "sending stop");
        let detail = match tokio::time::timeout(timeout, self.controller.gateway.execute(node_id, command)).await {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {} ms", timeout.as_millis()),
        };
        warn!(run_id = %self.id, node_id, command, error = %detail, "stop command failed");
        Err(CleanupFailure {
            node_id: node_id.to_string(),
            command: command.to_string(),
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let cfg = ControllerConfig {
            poll_interval_ms: 0,
            grace_period_ms: 250,
            ..ControllerConfig::default()
        };
        let s = ControllerSettings::from(&cfg);
        assert_eq!(s.poll_interval, Duration::from_millis(1));
        assert_eq!(s.grace_period, Duration::from_millis(250));
        assert_eq!(s.cleanup_timeout, Duration::from_secs(5));
        assert!(!s.stop_sender_on_completion);
    }

    #[test]
    fn test_call_error_maps_to_start_failure() {
        let f = CallError::TimedOut(10_000).into_start_failure(Role::Responder, "edge-b");
        assert_eq!(
            f.to_string(),
            "failed to start responder on 'edge-b': timed out after 10000 ms"
        );
        assert_eq!(
            CallError::Cancelled.into_start_failure(Role::Sender, "edge-a"),
            RunFailure::UserCancelled
        );
    }
}
