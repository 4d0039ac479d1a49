pub mod oracle;

use log::{error, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::actions::{ActionKind, ActionOutcome, ActionRequest};
use crate::bridge::{self, BridgeClient, PageAgent};
use crate::client::{Host, TabId};
use crate::gate::SecurityGate;
use crate::memory::{ActionHistory, HistoryEntry, MemoryHistory};
use crate::types::{AgentError, AgentOptions, PageElement};
use oracle::{Decision, DecisionRequest, Oracle};

const APPROVED_NOTE: &str = "User APPROVED the critical action. Proceed immediately.";
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AgentState {
    Idle,
    Running,
}

/// How a run ended. Every outcome returns the agent to [`AgentState::Idle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Finished,
    Denied,
    Aborted(String),
    Cancelled,
    StepBudgetExhausted,
    /// The page refused the page agent (e.g. a browser-internal page).
    SurfaceUnavailable,
}

/// Progress notifications for whoever is watching the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AgentEvent {
    Started { task: String },
    Step { number: usize },
    Injecting,
    Reasoning(String),
    ConfirmationRequired { reason: String },
    Approved,
    Action { description: String },
    ActionFailed { status: String },
    MemorySaved(String),
    Navigating(String),
    Stopped(RunOutcome),
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Finished => f.write_str("task finished"),
            RunOutcome::Denied => f.write_str("stopped: action denied"),
            RunOutcome::Aborted(reason) => write!(f, "aborted: {reason}"),
            RunOutcome::Cancelled => f.write_str("stopped by user"),
            RunOutcome::StepBudgetExhausted => f.write_str("step budget exhausted"),
            RunOutcome::SurfaceUnavailable => f.write_str("cannot operate on this page"),
        }
    }
}

impl fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentEvent::Started { task } => write!(f, "START: {task}"),
            AgentEvent::Step { number } => write!(f, "--- STEP {number} ---"),
            AgentEvent::Injecting => f.write_str("Injecting page agent..."),
            AgentEvent::Reasoning(reasoning) => write!(f, "Reasoning: {reasoning}"),
            AgentEvent::ConfirmationRequired { reason } => {
                write!(f, "Confirmation required: {reason} (y/n)")
            }
            AgentEvent::Approved => f.write_str("Approved, resuming"),
            AgentEvent::Action { description } => write!(f, "Action: {description}"),
            AgentEvent::ActionFailed { status } => write!(f, "UI error: {status}"),
            AgentEvent::MemorySaved(fact) => write!(f, "Remembered: {fact}"),
            AgentEvent::Navigating(url) => write!(f, "Navigating to {url}"),
            AgentEvent::Stopped(outcome) => write!(f, "Done: {outcome}"),
        }
    }
}

/// Per-run context threaded through every step.
#[derive(Debug)]
pub struct Session {
    pub task: String,
    pub step_count: usize,
    pub history: ActionHistory,
    pub memory: MemoryHistory,
}

impl Session {
    fn new(task: &str, history_window: usize) -> Self {
        Self {
            task: task.to_string(),
            step_count: 0,
            history: ActionHistory::new(history_window),
            memory: MemoryHistory::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub steps: usize,
    pub action_history: Vec<HistoryEntry>,
    pub memory: Vec<String>,
}

enum Flow {
    Continue,
    Stop(RunOutcome),
}

/// Drives one page through observe, decide, confirm and act until the task ends.
pub struct Agent<H: Host, O: Oracle> {
    host: H,
    oracle: O,
    gate: Arc<SecurityGate>,
    options: AgentOptions,
    events: broadcast::Sender<AgentEvent>,
    bridge: Option<(TabId, BridgeClient)>,
    state: AgentState,
}

impl<H: Host, O: Oracle> Agent<H, O> {
    pub fn new(host: H, oracle: O, options: AgentOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            host,
            oracle,
            gate: Arc::new(SecurityGate::new()),
            options,
            events,
            bridge: None,
            state: AgentState::Idle,
        }
    }

    pub fn gate(&self) -> Arc<SecurityGate> {
        self.gate.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Runs `task` to a terminal outcome.
    ///
    /// Cancellation is cooperative: `cancel` is only checked at the top of each
    /// step, so an in-flight step always completes.
    pub async fn run(
        &mut self,
        task: &str,
        cancel: CancellationToken,
    ) -> Result<RunReport, AgentError> {
        let task = task.trim();
        if task.is_empty() {
            return Err(AgentError::ConfigError("task is empty".into()));
        }
        self.options.validate()?;

        let mut session = Session::new(task, self.options.history_window);
        self.state = AgentState::Running;
        info!("START: {task}");
        self.emit(AgentEvent::Started {
            task: task.to_string(),
        });

        let outcome = match self.drive(&mut session, &cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Critical error: {e}");
                RunOutcome::Aborted(e.to_string())
            }
        };

        self.state = AgentState::Idle;
        info!("Run ended after {} steps: {outcome:?}", session.step_count);
        self.emit(AgentEvent::Stopped(outcome.clone()));

        Ok(RunReport {
            outcome,
            steps: session.step_count,
            action_history: session.history.entries(),
            memory: session.memory.facts().into_iter().map(str::to_string).collect(),
        })
    }

    async fn drive(
        &mut self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, AgentError> {
        while session.step_count < self.options.max_steps && !cancel.is_cancelled() {
            session.step_count += 1;
            info!("--- STEP {} ---", session.step_count);
            self.emit(AgentEvent::Step {
                number: session.step_count,
            });

            if let Flow::Stop(outcome) = self.step(session).await? {
                return Ok(outcome);
            }
        }

        if cancel.is_cancelled() {
            info!("Stopped by user");
            Ok(RunOutcome::Cancelled)
        } else {
            warn!("Step budget of {} exhausted", self.options.max_steps);
            Ok(RunOutcome::StepBudgetExhausted)
        }
    }

    async fn step(&mut self, session: &mut Session) -> Result<Flow, AgentError> {
        let tab = self
            .host
            .active_tab()
            .await?
            .ok_or(AgentError::NoActiveSurface)?;

        let Some(bridge) = self.ensure_bridge(&tab).await else {
            error!("Cannot operate on this page (browser-internal?)");
            return Ok(Flow::Stop(RunOutcome::SurfaceUnavailable));
        };

        let (elements, screenshot) = match self.observe(&tab, &bridge).await {
            Ok(observation) => observation,
            Err(e) => {
                warn!("Failed to read the page: {e}");
                sleep(self.options.snapshot_retry_delay).await;
                return Ok(Flow::Continue);
            }
        };

        let request = DecisionRequest {
            task: session.task.clone(),
            dom: serde_json::to_string(&elements)
                .map_err(|e| AgentError::DomExtractionError(e.to_string()))?,
            screenshot: Some(screenshot),
            action_history: session.history.entries(),
            chat_history: session.memory.messages().to_vec(),
        };
        let decision = self.oracle.decide(&request).await?;

        if let Some(reasoning) = &decision.reasoning {
            info!("Reasoning: {reasoning}");
            self.emit(AgentEvent::Reasoning(reasoning.clone()));
        }

        if decision.needs_confirmation {
            return self.confirm(session, &decision).await;
        }

        let request = match decision.to_request() {
            Ok(request) => request,
            Err(problem) => {
                let status = format!("Error: {problem}");
                self.record_failure(session, &status);
                sleep(self.options.action_settle).await;
                return Ok(Flow::Continue);
            }
        };

        match request {
            ActionRequest::Finish => {
                info!("Task finished");
                Ok(Flow::Stop(RunOutcome::Finished))
            }
            ActionRequest::SaveMemory { content } => {
                info!("Remembered: {content}");
                session.memory.save(&content);
                session.history.push(HistoryEntry::succeeded(&decision));
                self.emit(AgentEvent::MemorySaved(content));
                sleep(self.options.memory_settle).await;
                Ok(Flow::Continue)
            }
            ActionRequest::OpenUrl { url } => {
                self.open_url(session, &tab, &decision, &url).await;
                Ok(Flow::Continue)
            }
            other => {
                self.act(session, &bridge, &decision, &other).await;
                Ok(Flow::Continue)
            }
        }
    }

    /// Probes the page agent and injects a fresh one when it does not answer.
    async fn ensure_bridge(&mut self, tab: &TabId) -> Option<BridgeClient> {
        if let Some((bound, bridge)) = &self.bridge {
            if bound == tab && !bridge.is_closed() && bridge.ping().await.is_ok() {
                return Some(bridge.clone());
            }
        }

        info!("Injecting page agent...");
        self.emit(AgentEvent::Injecting);
        match self.host.attach(tab).await {
            Ok(page) => {
                let bridge = bridge::serve(PageAgent::new(page, self.options.executor));
                self.bridge = Some((tab.clone(), bridge.clone()));
                sleep(self.options.bridge_settle).await;
                Some(bridge)
            }
            Err(e) => {
                error!("Injection failed: {e}");
                self.bridge = None;
                None
            }
        }
    }

    async fn observe(
        &self,
        tab: &TabId,
        bridge: &BridgeClient,
    ) -> Result<(Vec<PageElement>, String), AgentError> {
        let elements = bridge.get_dom().await?;
        let screenshot = self.host.capture_visible_tab(tab).await?;
        Ok((elements, screenshot))
    }

    async fn confirm(&mut self, session: &mut Session, decision: &Decision) -> Result<Flow, AgentError> {
        let reason = decision
            .reasoning
            .clone()
            .unwrap_or_else(|| "Security Check Required".to_string());
        warn!("STOP: confirmation required: {reason}");
        self.emit(AgentEvent::ConfirmationRequired {
            reason: reason.clone(),
        });

        if !self.gate.request_confirmation(&reason).await? {
            error!("User denied the action. Stopping.");
            return Ok(Flow::Stop(RunOutcome::Denied));
        }

        info!("User approved the action.");
        self.emit(AgentEvent::Approved);
        session.history.push(HistoryEntry::note(APPROVED_NOTE));
        Ok(Flow::Continue)
    }

    async fn open_url(&mut self, session: &mut Session, tab: &TabId, decision: &Decision, url: &str) {
        info!("Navigating to {url}");
        self.emit(AgentEvent::Navigating(url.to_string()));

        match self.host.navigate(tab, url).await {
            Ok(()) => {
                session.history.push(HistoryEntry::succeeded(decision));
                // Navigation tears down the page agent; the next step re-injects.
                self.bridge = None;
                info!("Waiting for the page to load...");
                sleep(self.options.navigation_settle).await;
            }
            Err(e) => {
                let status = format!("Error executing {}: {e}", ActionKind::OpenUrl);
                self.record_failure(session, &status);
                sleep(self.options.action_settle).await;
            }
        }
    }

    async fn act(
        &mut self,
        session: &mut Session,
        bridge: &BridgeClient,
        decision: &Decision,
        request: &ActionRequest,
    ) {
        info!("{request}");
        self.emit(AgentEvent::Action {
            description: request.to_string(),
        });

        let status = match request.page_action() {
            Some(action) => match bridge.act(action).await {
                Ok(status) => status,
                Err(e) => format!("Error: {e}"),
            },
            None => format!("Error: {} is not a page action", request.kind()),
        };

        match ActionOutcome::from_status(&status) {
            ActionOutcome::Success => session.history.push(HistoryEntry::succeeded(decision)),
            ActionOutcome::Error(status) => self.record_failure(session, &status),
        }

        if request.kind() == ActionKind::Scroll {
            sleep(self.options.scroll_settle).await;
        } else {
            sleep(self.options.action_settle).await;
        }
    }

    fn record_failure(&self, session: &mut Session, status: &str) {
        warn!("UI error: {status}");
        self.emit(AgentEvent::ActionFailed {
            status: status.to_string(),
        });
        session
            .history
            .push(HistoryEntry::note(format!("Previous action failed: {status}")));
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }
}
