use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::capture::{self, CaptureConfig};
use crate::decision::{Action, Decision, DecisionRequest, HistoryEntry};
use crate::notify::{NoticeBus, Role};
use crate::page::{is_privileged, PageContext};
use crate::resolver::{self, Resolution};
use crate::supervisor::Supervisor;

// ========================= Core Types =========================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AgentError {
    #[error("user declined")]
    UserDeclined,
    #[error("cannot instrument privileged page: {0}")]
    PrivilegedPageDenied(String),
    #[error("backend returned {status}: {body}")]
    BackendUnavailable { status: u16, body: String },
    #[error("backend refused: {0}")]
    BackendRefused(String),
    #[error("backend returned no choices")]
    BackendEmpty,
    #[error("malformed backend response: {0}")]
    BackendMalformed(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("page error: {0}")]
    Page(String),
    #[error("a run is already in progress")]
    AlreadyRunning,
    #[error("step budget of {0} exhausted")]
    StepBudgetExceeded(usize),
    #[error("config error: {0}")]
    Config(String),
}

impl AgentError {
    /// Text surfaced on the display surface when the run stops on this error.
    pub fn user_message(&self) -> String {
        match self {
            AgentError::UserDeclined => "Run cancelled.".to_string(),
            AgentError::PrivilegedPageDenied(_) => {
                "This page cannot be automated (browser-internal URL).".to_string()
            }
            AgentError::BackendUnavailable { .. } | AgentError::Transport(_) => {
                "The assistant is unavailable. Please try again.".to_string()
            }
            AgentError::BackendRefused(_) => {
                "The assistant refused to provide an action. Please try again.".to_string()
            }
            AgentError::BackendEmpty => "No response from the assistant. Please try again.".to_string(),
            AgentError::BackendMalformed(_) => {
                "Invalid response format from the assistant. Please try again.".to_string()
            }
            AgentError::StepBudgetExceeded(n) => format!("Stopped after {n} steps without reaching the objective."),
            other => format!("{other}. Please try again."),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Achieved,
    Aborted,
    Failed,
}

#[derive(Clone, Debug)]
pub struct RunReport {
    pub run_id: String,
    pub objective: String,
    pub status: RunStatus,
    pub history: Vec<HistoryEntry>,
    pub steps: usize,
    pub time_ms: u128,
    pub error: Option<AgentError>,
}

// ========================= Pluggable Subsystems =========================

#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Free-text step-by-step plan for the objective.
    async fn plan(&self, objective: &str) -> Result<String, AgentError>;

    async fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision, AgentError>;
}

/// The human in the loop: consent before the first backend call, and
/// confirmation when the backend claims the objective is achieved.
#[async_trait]
pub trait Operator: Send + Sync {
    async fn approve_run(&self, objective: &str) -> bool;
    async fn confirm_achieved(&self, decision: &Decision) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AutoApprove;

#[async_trait]
impl Operator for AutoApprove {
    async fn approve_run(&self, _objective: &str) -> bool {
        true
    }

    async fn confirm_achieved(&self, _decision: &Decision) -> bool {
        true
    }
}

// ========================= Agent Core =========================

#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Send the larger HTML budget and no screenshot.
    pub send_full_html: bool,
    pub settle_delay: Duration,
    pub history_window: usize,
    pub max_steps: Option<usize>,
    pub capture: CaptureConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            send_full_html: false,
            settle_delay: Duration::from_secs(1),
            history_window: 3,
            max_steps: None,
            capture: CaptureConfig::default(),
        }
    }
}

pub struct Agent<P, R, O>
where
    P: PageContext,
    R: Reasoner,
    O: Operator,
{
    page: P,
    reasoner: R,
    operator: O,
    bus: NoticeBus,
    supervisor: Supervisor,
    cfg: AgentConfig,
}

impl<P, R, O> Agent<P, R, O>
where
    P: PageContext,
    R: Reasoner,
    O: Operator,
{
    pub fn new(page: P, reasoner: R, operator: O, cfg: AgentConfig) -> Self {
        Self {
            page,
            reasoner,
            operator,
            bus: NoticeBus::default(),
            supervisor: Supervisor::default(),
            cfg,
        }
    }

    pub fn with_bus(mut self, bus: NoticeBus) -> Self {
        self.bus = bus;
        self
    }

    /// Share a run guard with other agents driving the same surface.
    pub fn with_supervisor(mut self, supervisor: Supervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    pub fn reasoner(&self) -> &R {
        &self.reasoner
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    pub fn bus(&self) -> &NoticeBus {
        &self.bus
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Drive one run to completion. A request made while another run holds
    /// the supervisor is rejected with `AlreadyRunning` and changes nothing.
    pub async fn run(&self, objective: &str) -> Result<RunReport, AgentError> {
        let handle = match self.supervisor.try_acquire() {
            Some(h) => h,
            None => {
                info!("run request ignored, another run is in progress");
                return Err(AgentError::AlreadyRunning);
            }
        };
        let mut run = Run {
            run_id: handle.run_id().to_string(),
            objective: objective.to_string(),
            history: Vec::new(),
            steps: 0,
            start: Instant::now(),
        };
        info!(run_id = %run.run_id, objective, "run started");
        self.bus.publish(Role::User, format!("Action saved: {objective}"));

        let start_url = match self.page.url().await {
            Ok(url) => url,
            Err(e) => return Ok(self.fail(run, e)),
        };
        if is_privileged(&start_url) {
            warn!(url = %start_url, "refusing to instrument privileged page");
            return Ok(self.abort(run, AgentError::PrivilegedPageDenied(start_url)));
        }
        if !self.operator.approve_run(objective).await {
            info!(run_id = %run.run_id, "operator declined the run");
            return Ok(self.abort(run, AgentError::UserDeclined));
        }

        match self.reasoner.plan(objective).await {
            Ok(plan) => {
                info!(run_id = %run.run_id, "detailed plan received");
                self.bus.publish(Role::Assistant, format!("Detailed Plan:\n{plan}"));
                run.history.push(HistoryEntry::Plan(plan));
            }
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "failed to generate a detailed plan");
                self.bus.publish(Role::Assistant, "Failed to generate a detailed plan.");
            }
        }

        loop {
            if let Some(max) = self.cfg.max_steps {
                if run.steps >= max {
                    return Ok(self.fail(run, AgentError::StepBudgetExceeded(max)));
                }
            }
            run.steps += 1;
            let step = run.steps;

            let state = match capture::capture(&self.page, &self.cfg.capture, self.cfg.send_full_html).await {
                Ok(s) => s,
                Err(e) => return Ok(self.fail(run, e)),
            };
            let window_start = run.history.len().saturating_sub(self.cfg.history_window);
            let request = DecisionRequest {
                objective,
                current_url: &state.url,
                history: &run.history[window_start..],
                state: &state,
            };
            let decision = match self.reasoner.decide(&request).await {
                Ok(d) => d,
                Err(e) => return Ok(self.fail(run, e)),
            };
            self.bus.publish(Role::Assistant, decision.summary());

            match decision.result.action() {
                Action::Achieved => {
                    if self.operator.confirm_achieved(&decision).await {
                        run.history.push(HistoryEntry::Action(decision.result));
                        self.bus.publish(Role::Assistant, "Task achieved. Stopping further actions.");
                        return Ok(self.finish(run, RunStatus::Achieved, None));
                    }
                    info!(step, "operator did not confirm task completion");
                    continue;
                }
                Action::Unrecognized(tag) => {
                    warn!(step, action_type = %tag, "unknown action type, nothing executed");
                }
                action => {
                    info!(step, action = ?action, "performing action");
                    match resolver::perform(&self.page, &action).await {
                        Ok(Resolution::Done { tag }) => info!(step, tag = %tag, "action performed"),
                        Ok(Resolution::Navigated) => info!(step, "navigated"),
                        Ok(Resolution::NotFound) => warn!(step, action = ?action, "element not found"),
                        Ok(Resolution::UnknownKind { kind }) => {
                            warn!(step, kind = %kind, "unknown target type")
                        }
                        Ok(Resolution::NoOp) => {}
                        Err(e) => {
                            error!(step, error = %e, "error performing action");
                            self.bus.publish(
                                Role::Assistant,
                                "An error occurred while performing the action.",
                            );
                        }
                    }
                }
            }
            run.history.push(HistoryEntry::Action(decision.result));
            sleep(self.cfg.settle_delay).await;
        }
    }

    fn abort(&self, run: Run, err: AgentError) -> RunReport {
        self.bus.publish(Role::Assistant, err.user_message());
        self.finish(run, RunStatus::Aborted, Some(err))
    }

    fn fail(&self, run: Run, err: AgentError) -> RunReport {
        error!(run_id = %run.run_id, error = %err, "run failed");
        self.bus.publish(Role::Assistant, err.user_message());
        self.finish(run, RunStatus::Failed, Some(err))
    }

    fn finish(&self, run: Run, status: RunStatus, error: Option<AgentError>) -> RunReport {
        let report = RunReport {
            run_id: run.run_id,
            objective: run.objective,
            status,
            history: run.history,
            steps: run.steps,
            time_ms: run.start.elapsed().as_millis(),
            error,
        };
        info!(run_id = %report.run_id, status = ?report.status, steps = report.steps, "run finished");
        report
    }
}

struct Run {
    run_id: String,
    objective: String,
    history: Vec<HistoryEntry>,
    steps: usize,
    start: Instant,
}
