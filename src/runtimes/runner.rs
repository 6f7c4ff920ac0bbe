use std::sync::Arc;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::checkpointer::{
    Checkpoint, CheckpointSource, Checkpointer, CheckpointerError, restore_session_state,
};
use crate::app::App;
use crate::event_bus::{Event, EventBus};
use crate::node::{NodeContext, NodeError, NodePartial};
use crate::reducers::ReducerError;
use crate::state::{EssayState, StateError, StateField};
use crate::types::NodeKind;

const RUNNER_SCOPE: &str = "runner";

/// Result of executing one step in a session.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: u64,
    pub ran_nodes: Vec<NodeKind>,
    pub updated_fields: Vec<StateField>,
    pub next_frontier: Vec<NodeKind>,
    pub checkpoint_id: String,
    /// True when nothing is scheduled after this step.
    pub completed: bool,
}

/// Session state kept between steps.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub state: EssayState,
    pub step: u64,
    pub frontier: Vec<NodeKind>,
    pub interrupt_after: Vec<NodeKind>,
}

impl SessionState {
    pub fn is_finished(&self) -> bool {
        self.frontier.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PausedReason {
    AfterNode(NodeKind),
}

#[derive(Debug, Clone)]
pub struct PausedReport {
    pub report: StepReport,
    pub reason: PausedReason,
}

/// Result of attempting to run a step.
#[derive(Debug, Clone)]
pub enum StepResult {
    /// A step ran and the next one may follow immediately.
    Completed(StepReport),
    /// A step ran and it is a pause point for this session.
    Paused(PausedReport),
    /// Nothing is scheduled; the workflow had already finished.
    Finished { step: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Paused { after: NodeKind },
    Finished,
}

/// Result of running a session until it pauses or finishes.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub steps: Vec<StepReport>,
    pub status: RunStatus,
    pub state: EssayState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInit {
    Fresh,
    Resumed { checkpoint_step: u64 },
}

/// Latest checkpoint of a session, as shown to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct StateView {
    pub session_id: String,
    pub values: EssayState,
    /// Next step names; empty once finished.
    pub next: Vec<String>,
    pub step: u64,
    pub source: CheckpointSource,
    pub writer: Option<String>,
    pub checkpoint_id: String,
    pub interrupt_after: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl StateView {
    pub fn is_finished(&self) -> bool {
        self.next.is_empty()
    }
}

impl From<Checkpoint> for StateView {
    fn from(cp: Checkpoint) -> Self {
        Self {
            session_id: cp.session_id,
            next: names(&cp.frontier),
            step: cp.step,
            source: cp.source,
            writer: cp.writer.map(|w| w.name().to_string()),
            checkpoint_id: cp.checkpoint_id,
            interrupt_after: names(&cp.interrupt_after),
            created_at: cp.created_at,
            values: cp.state,
        }
    }
}

/// One row of a session's checkpoint history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub step: u64,
    /// `lnode` at that checkpoint.
    pub node: String,
    pub next: Vec<String>,
    pub revision_number: u32,
    pub count: u64,
    pub checkpoint_id: String,
    pub source: CheckpointSource,
    pub writer: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Checkpoint> for HistoryEntry {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            step: cp.step,
            node: cp.state.lnode.clone(),
            next: names(&cp.frontier),
            revision_number: cp.state.revision_number,
            count: cp.state.count,
            checkpoint_id: cp.checkpoint_id.clone(),
            source: cp.source,
            writer: cp.writer.as_ref().map(|w| w.name().to_string()),
            created_at: cp.created_at,
        }
    }
}

fn names(kinds: &[NodeKind]) -> Vec<String> {
    kinds.iter().map(|k| k.name().to_string()).collect()
}

#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    #[error("session not found: {session_id}")]
    #[diagnostic(
        code(essay_graph::runner::session_not_found),
        help("Create the session first or check the session id.")
    )]
    SessionNotFound { session_id: String },

    #[error("no nodes to run from START (empty frontier)")]
    #[diagnostic(
        code(essay_graph::runner::no_start_nodes),
        help("Add edges from Start or set the entry node correctly.")
    )]
    NoStartNodes,

    #[error("invalid pause point `{name}` (valid steps: {valid})")]
    #[diagnostic(code(essay_graph::runner::invalid_interrupt))]
    InvalidInterrupt { name: String, valid: String },

    #[error("unknown step `{name}` (valid steps: {valid})")]
    #[diagnostic(code(essay_graph::runner::unknown_node))]
    UnknownNode { name: String, valid: String },

    #[error("step `{node}` failed at step {step}: {source}")]
    #[diagnostic(
        code(essay_graph::runner::node),
        help("The session is unchanged; continuing retries the failed step.")
    )]
    Node {
        node: String,
        step: u64,
        #[source]
        source: NodeError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpointer(#[from] CheckpointerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Barrier(#[from] ReducerError),
}

/// Stepwise execution wrapper around [`App`] with per-session pause points.
pub struct AppRunner {
    app: Arc<App>,
    sessions: FxHashMap<String, SessionState>,
    checkpointer: Arc<dyn Checkpointer>,
    event_bus: EventBus,
}

impl AppRunner {
    /// Wraps `app` with an explicit checkpointer and starts the event listener.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn with_checkpointer(
        app: Arc<App>,
        checkpointer: Arc<dyn Checkpointer>,
        event_bus: EventBus,
    ) -> Self {
        event_bus.listen_for_events();
        Self {
            app,
            sessions: FxHashMap::default(),
            checkpointer,
            event_bus,
        }
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Registered step names, sorted.
    pub fn step_names(&self) -> Vec<String> {
        self.app.node_names()
    }

    fn valid_steps(&self) -> String {
        self.step_names().join(", ")
    }

    /// Maps pause-point names to node kinds, rejecting unknown names.
    pub fn validate_interrupts(&self, names: &[String]) -> Result<Vec<NodeKind>, RunnerError> {
        let mut kinds = Vec::with_capacity(names.len());
        for name in names {
            let name = name.trim();
            if !self.app.has_node(name) {
                return Err(RunnerError::InvalidInterrupt {
                    name: name.to_string(),
                    valid: self.valid_steps(),
                });
            }
            let kind = NodeKind::named(name);
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }

    /// Creates a session, or resumes it if a checkpoint already exists.
    ///
    /// A resumed session keeps its stored state and pause points; the
    /// arguments only apply to fresh sessions.
    #[instrument(skip(self, initial_state, interrupt_after), err)]
    pub async fn create_session(
        &mut self,
        session_id: &str,
        initial_state: EssayState,
        interrupt_after: &[String],
    ) -> Result<SessionInit, RunnerError> {
        let interrupt_after = self.validate_interrupts(interrupt_after)?;

        if let Some(stored) = self.checkpointer.load_latest(session_id).await? {
            self.sessions
                .insert(session_id.to_string(), restore_session_state(&stored));
            info!(session_id, step = stored.step, "resumed session");
            return Ok(SessionInit::Resumed {
                checkpoint_step: stored.step,
            });
        }

        let frontier = self.app.entry_frontier();
        if frontier.is_empty() {
            return Err(RunnerError::NoStartNodes);
        }
        let session_state = SessionState {
            state: initial_state,
            step: 0,
            frontier,
            interrupt_after,
        };
        let checkpoint = Checkpoint::from_session(
            session_id,
            &session_state,
            CheckpointSource::Input,
            None,
        );
        self.checkpointer.save(checkpoint).await?;
        self.sessions.insert(session_id.to_string(), session_state);
        info!(session_id, "created session");
        Ok(SessionInit::Fresh)
    }

    /// Cached session, falling back to the latest checkpoint.
    async fn session(&mut self, session_id: &str) -> Result<SessionState, RunnerError> {
        if let Some(s) = self.sessions.get(session_id) {
            return Ok(s.clone());
        }
        let stored = self.checkpointer.load_latest(session_id).await?.ok_or_else(|| {
            RunnerError::SessionNotFound {
                session_id: session_id.to_string(),
            }
        })?;
        let restored = restore_session_state(&stored);
        self.sessions
            .insert(session_id.to_string(), restored.clone());
        Ok(restored)
    }

    /// Persists `session` as a new checkpoint, then caches it.
    async fn commit(
        &mut self,
        session_id: &str,
        session: SessionState,
        source: CheckpointSource,
        writer: Option<NodeKind>,
    ) -> Result<Checkpoint, RunnerError> {
        let checkpoint = Checkpoint::from_session(session_id, &session, source, writer);
        self.checkpointer.save(checkpoint.clone()).await?;
        self.sessions.insert(session_id.to_string(), session);
        Ok(checkpoint)
    }

    fn diagnostic(&self, message: String) {
        if self
            .event_bus
            .get_sender()
            .send(Event::diagnostic(RUNNER_SCOPE, message))
            .is_err()
        {
            warn!("event bus closed; dropping runner diagnostic");
        }
    }

    /// Runs every node in the frontier once and merges their partials.
    ///
    /// On failure the session is left at its previous checkpoint.
    #[instrument(skip(self), err)]
    pub async fn run_step(&mut self, session_id: &str) -> Result<StepResult, RunnerError> {
        let mut session = self.session(session_id).await?;
        if session.is_finished() {
            return Ok(StepResult::Finished { step: session.step });
        }

        let step = session.step + 1;
        let run_ids = session.frontier.clone();
        let mut partials: Vec<NodePartial> = Vec::with_capacity(run_ids.len());
        for kind in &run_ids {
            let Some(node) = self.app.node(kind) else {
                return Err(RunnerError::UnknownNode {
                    name: kind.to_string(),
                    valid: self.valid_steps(),
                });
            };
            let ctx = NodeContext {
                node_id: kind.name().to_string(),
                step,
                event_bus_sender: self.event_bus.get_sender(),
            };
            match node.run(session.state.clone(), ctx).await {
                Ok(partial) => partials.push(partial),
                Err(source) => {
                    warn!(session_id, node = %kind, step, error = %source, "step failed");
                    self.diagnostic(format!("{kind} failed at step {step}: {source}"));
                    return Err(RunnerError::Node {
                        node: kind.name().to_string(),
                        step,
                        source,
                    });
                }
            }
        }

        let updated_fields = self
            .app
            .apply_barrier(&mut session.state, &run_ids, partials)?;
        let next_frontier = self.app.next_frontier(&run_ids, &session.state);
        session.step = step;
        session.frontier = next_frontier.clone();
        let pause_on = run_ids
            .iter()
            .find(|k| session.interrupt_after.contains(k))
            .cloned();

        let writer = run_ids.last().cloned();
        let checkpoint = self
            .commit(session_id, session, CheckpointSource::Step, writer)
            .await?;

        let report = StepReport {
            step,
            ran_nodes: run_ids,
            updated_fields,
            completed: next_frontier.is_empty(),
            next_frontier,
            checkpoint_id: checkpoint.checkpoint_id,
        };
        info!(
            session_id,
            step,
            ran = ?names(&report.ran_nodes),
            next = ?names(&report.next_frontier),
            "step complete"
        );

        match pause_on {
            Some(node) if !report.completed => {
                self.diagnostic(format!("paused after {node} (step {step})"));
                Ok(StepResult::Paused(PausedReport {
                    report,
                    reason: PausedReason::AfterNode(node),
                }))
            }
            _ => Ok(StepResult::Completed(report)),
        }
    }

    /// Runs steps until a pause point fires or the workflow finishes.
    ///
    /// Resuming a paused session does not re-run the paused step; it
    /// continues with the step scheduled after it.
    #[instrument(skip(self), err)]
    pub async fn run_until_pause(&mut self, session_id: &str) -> Result<RunOutcome, RunnerError> {
        let mut steps = Vec::new();
        let status = loop {
            match self.run_step(session_id).await? {
                StepResult::Completed(report) => {
                    let done = report.completed;
                    steps.push(report);
                    if done {
                        break RunStatus::Finished;
                    }
                }
                StepResult::Paused(paused) => {
                    steps.push(paused.report);
                    let PausedReason::AfterNode(after) = paused.reason;
                    break RunStatus::Paused { after };
                }
                StepResult::Finished { .. } => break RunStatus::Finished,
            }
        };
        if status == RunStatus::Finished {
            self.diagnostic(format!("session {session_id} finished"));
        }
        let state = self.session(session_id).await?.state;
        Ok(RunOutcome {
            steps,
            status,
            state,
        })
    }

    /// Runs to the end, ignoring pause points.
    #[instrument(skip(self), err)]
    pub async fn run_until_complete(&mut self, session_id: &str) -> Result<EssayState, RunnerError> {
        loop {
            match self.run_step(session_id).await? {
                StepResult::Completed(report) if report.completed => break,
                StepResult::Paused(_) | StepResult::Completed(_) => continue,
                StepResult::Finished { .. } => break,
            }
        }
        Ok(self.session(session_id).await?.state)
    }

    /// Values, next steps and metadata of the latest checkpoint.
    #[instrument(skip(self), err)]
    pub async fn get_state(&self, session_id: &str) -> Result<StateView, RunnerError> {
        let latest = self.checkpointer.load_latest(session_id).await?.ok_or_else(|| {
            RunnerError::SessionNotFound {
                session_id: session_id.to_string(),
            }
        })?;
        Ok(StateView::from(latest))
    }

    /// Overwrites one field and records the edit as a new checkpoint.
    ///
    /// The edit is attributed to `as_node`, or else the field's producing
    /// step, or else the last step that ran. The frontier is recomputed from
    /// that step's outgoing edges against the edited state.
    #[instrument(skip(self, value), err)]
    pub async fn update_state(
        &mut self,
        session_id: &str,
        field: StateField,
        value: Value,
        as_node: Option<&str>,
    ) -> Result<StateView, RunnerError> {
        let mut session = self.session(session_id).await?;

        let writer_name = as_node
            .map(str::to_string)
            .or_else(|| field.default_writer().map(str::to_string))
            .unwrap_or_else(|| session.state.lnode.clone());
        let writer = if writer_name.is_empty() {
            NodeKind::Start
        } else if self.app.has_node(&writer_name) {
            NodeKind::named(writer_name)
        } else {
            return Err(RunnerError::UnknownNode {
                name: writer_name,
                valid: self.valid_steps(),
            });
        };

        session.state.overwrite(field, value)?;
        session.frontier = self
            .app
            .next_frontier(std::slice::from_ref(&writer), &session.state);
        session.step += 1;

        self.diagnostic(format!("{field} updated as {writer}"));
        let checkpoint = self
            .commit(session_id, session, CheckpointSource::Update, Some(writer))
            .await?;
        Ok(StateView::from(checkpoint))
    }

    /// Checkpoint history, newest first, without the input checkpoint.
    #[instrument(skip(self), err)]
    pub async fn history(&self, session_id: &str) -> Result<Vec<HistoryEntry>, RunnerError> {
        let checkpoints = self.checkpointer.history(session_id).await?;
        if checkpoints.is_empty() {
            return Err(RunnerError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }
        Ok(checkpoints
            .iter()
            .filter(|cp| cp.step >= 1)
            .map(HistoryEntry::from)
            .collect())
    }

    /// Stops the event listener after flushing queued events.
    pub async fn shutdown(&self) {
        self.event_bus.stop_listener().await;
    }
}
