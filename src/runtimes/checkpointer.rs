//! Checkpointer infrastructure.
//!
//! Every session keeps a full history: the input checkpoint at step 0, one
//! checkpoint per executed step and one per manual edit. The latest entry is
//! what the runner resumes from.

use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use crate::runtimes::persistence::PersistenceError;
use crate::runtimes::runner::SessionState;
use crate::state::EssayState;
use crate::types::NodeKind;
use crate::utils::id_generator::IdGenerator;

/// What produced a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckpointSource {
    /// Written by session creation.
    Input,
    /// Written after a node ran.
    Step,
    /// Written by a manual state edit.
    Update,
}

impl CheckpointSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointSource::Input => "input",
            CheckpointSource::Step => "step",
            CheckpointSource::Update => "update",
        }
    }
}

impl fmt::Display for CheckpointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointSource {
    type Err = PersistenceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "input" => Ok(CheckpointSource::Input),
            "step" => Ok(CheckpointSource::Step),
            "update" => Ok(CheckpointSource::Update),
            other => Err(PersistenceError::UnknownSource(other.to_string())),
        }
    }
}

/// A durable snapshot of a session at a step boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub session_id: String,
    pub checkpoint_id: String,
    pub step: u64,
    pub state: EssayState,
    /// Steps scheduled next. Empty once the workflow has finished.
    pub frontier: Vec<NodeKind>,
    pub interrupt_after: Vec<NodeKind>,
    pub source: CheckpointSource,
    /// Node that ran (or that an edit was attributed to).
    pub writer: Option<NodeKind>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Snapshot of the session with a fresh checkpoint id.
    #[must_use]
    pub fn from_session(
        session_id: &str,
        session: &SessionState,
        source: CheckpointSource,
        writer: Option<NodeKind>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            checkpoint_id: IdGenerator::new().generate_checkpoint_id(),
            step: session.step,
            state: session.state.clone(),
            frontier: session.frontier.clone(),
            interrupt_after: session.interrupt_after.clone(),
            source,
            writer,
            created_at: Utc::now(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.frontier.is_empty()
    }
}

/// Errors from checkpointer operations.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CheckpointerError {
    #[error("session not found: {session_id}")]
    #[diagnostic(
        code(essay_graph::checkpointer::not_found),
        help("Ensure the session ID is correct and the session has been created.")
    )]
    NotFound { session_id: String },

    #[error("backend error: {message}")]
    #[diagnostic(
        code(essay_graph::checkpointer::backend),
        help("Check backend connectivity and permissions.")
    )]
    Backend { message: String },

    #[error("checkpointer error: {message}")]
    #[diagnostic(code(essay_graph::checkpointer::other))]
    Other { message: String },
}

/// Selects the backing implementation of [`Checkpointer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointerType {
    /// Volatile, process-local. Tests and one-shot runs.
    InMemory,
    /// Durable; see `SQLiteCheckpointer`.
    SQLite,
}

impl FromStr for CheckpointerType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "inmemory" | "in_memory" => Ok(CheckpointerType::InMemory),
            "sqlite" => Ok(CheckpointerType::SQLite),
            other => Err(format!("unknown checkpointer `{other}` (expected sqlite or memory)")),
        }
    }
}

pub type Result<T> = std::result::Result<T, CheckpointerError>;

/// Persistent storage for a session's checkpoint history.
///
/// `save` is idempotent per `(session_id, step)`: re-saving the same step
/// replaces it.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Highest-step checkpoint, or `None` for an unknown session.
    async fn load_latest(&self, session_id: &str) -> Result<Option<Checkpoint>>;

    /// All checkpoints of a session, newest first. Empty for unknown sessions.
    async fn history(&self, session_id: &str) -> Result<Vec<Checkpoint>>;
}

/// In-memory checkpointer keeping the full per-session history.
#[derive(Default)]
pub struct InMemoryCheckpointer {
    inner: RwLock<FxHashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(FxHashMap::default()),
        }
    }
}

fn poisoned<E: fmt::Display>(e: E) -> CheckpointerError {
    CheckpointerError::Backend {
        message: format!("lock poisoned: {e}"),
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut map = self.inner.write().map_err(poisoned)?;
        let history = map.entry(checkpoint.session_id.clone()).or_default();
        match history.iter().position(|c| c.step == checkpoint.step) {
            Some(i) => history[i] = checkpoint,
            None => {
                history.push(checkpoint);
                history.sort_by_key(|c| c.step);
            }
        }
        Ok(())
    }

    async fn load_latest(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map.get(session_id).and_then(|h| h.last().cloned()))
    }

    async fn history(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map
            .get(session_id)
            .map(|h| h.iter().rev().cloned().collect())
            .unwrap_or_default())
    }
}

/// Rebuilds the runner's in-memory session from a checkpoint.
#[must_use]
pub fn restore_session_state(cp: &Checkpoint) -> SessionState {
    SessionState {
        state: cp.state.clone(),
        step: cp.step,
        frontier: cp.frontier.clone(),
        interrupt_after: cp.interrupt_after.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(step: u64) -> SessionState {
        SessionState {
            state: EssayState::new("tea", 2),
            step,
            frontier: vec![NodeKind::named("planner")],
            interrupt_after: vec![NodeKind::named("generate")],
        }
    }

    #[tokio::test]
    async fn save_and_load_latest() {
        let store = InMemoryCheckpointer::new();
        for step in 0..3 {
            let cp = Checkpoint::from_session("s1", &session(step), CheckpointSource::Step, None);
            store.save(cp).await.unwrap();
        }
        let latest = store.load_latest("s1").await.unwrap().unwrap();
        assert_eq!(latest.step, 2);
        assert_eq!(latest.interrupt_after, vec![NodeKind::named("generate")]);
        assert!(store.load_latest("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let store = InMemoryCheckpointer::new();
        for step in [0, 2, 1] {
            let cp = Checkpoint::from_session("s1", &session(step), CheckpointSource::Step, None);
            store.save(cp).await.unwrap();
        }
        let steps: Vec<u64> = store
            .history("s1")
            .await
            .unwrap()
            .iter()
            .map(|c| c.step)
            .collect();
        assert_eq!(steps, vec![2, 1, 0]);
        assert!(store.history("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resaving_a_step_replaces_it() {
        let store = InMemoryCheckpointer::new();
        let first = Checkpoint::from_session("s1", &session(1), CheckpointSource::Step, None);
        let second = Checkpoint::from_session("s1", &session(1), CheckpointSource::Update, None);
        store.save(first).await.unwrap();
        store.save(second.clone()).await.unwrap();
        let history = store.history("s1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].checkpoint_id, second.checkpoint_id);
    }

    #[test]
    fn restore_copies_resume_fields() {
        let cp = Checkpoint::from_session("s1", &session(4), CheckpointSource::Step, None);
        let restored = restore_session_state(&cp);
        assert_eq!(restored.step, 4);
        assert_eq!(restored.frontier, cp.frontier);
        assert_eq!(restored.interrupt_after, cp.interrupt_after);
    }

    #[test]
    fn source_and_type_parse() {
        for s in [
            CheckpointSource::Input,
            CheckpointSource::Step,
            CheckpointSource::Update,
        ] {
            assert_eq!(s.as_str().parse::<CheckpointSource>().unwrap(), s);
        }
        assert!("fork".parse::<CheckpointSource>().is_err());
        assert_eq!("SQLite".parse::<CheckpointerType>(), Ok(CheckpointerType::SQLite));
        assert_eq!("memory".parse::<CheckpointerType>(), Ok(CheckpointerType::InMemory));
        assert!("redis".parse::<CheckpointerType>().is_err());
    }
}
