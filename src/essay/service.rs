//! The essay-writing service.
//!
//! [`EssayWriter`] owns the runner behind one `tokio::sync::Mutex`, so every
//! step, inspection and edit across all users and sessions is serialized.
//! After each step or edit the session's essay record (if any) is brought
//! up to date from the latest state.

use std::sync::Arc;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::workflow::build_app;
use crate::db;
use crate::event_bus::EventBus;
use crate::graph::GraphError;
use crate::providers::{LanguageModel, ProviderError, SearchProvider};
use crate::runtimes::{
    AppRunner, Checkpointer, CheckpointerType, HistoryEntry, InMemoryCheckpointer, PausedReason,
    RunOutcome, RunStatus, RunnerError, RuntimeConfig, SQLiteCheckpointer, SessionId, StateView, StepResult,
};
use crate::state::{EssayState, StateError, StateField};
use crate::store::{
    EssayProgress, EssayRecord, EssaySort, EssayStore, InMemoryEssayStore, SqliteEssayStore,
    StoreError, UserPreferences,
};
use crate::types::NodeKind;

#[derive(Debug, Error, Diagnostic)]
pub enum WriterError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error("no essay store is configured")]
    #[diagnostic(
        code(essay_graph::writer::no_store),
        help("Construct the writer with an essay store to manage essays and preferences.")
    )]
    NoStore,
}

/// Caller-facing result of advancing a session.
///
/// Failures are reported through `success`/`error` instead of an `Err`, so
/// a front end can display them next to the last known state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub session_id: String,
    /// Steps that ran during this call, in order.
    pub ran: Vec<String>,
    /// Checkpoint step after the call.
    pub step: u64,
    pub state: Option<EssayState>,
    /// Steps scheduled next; empty once finished.
    pub next: Vec<String>,
    pub paused_after: Option<String>,
    pub finished: bool,
}

impl StepOutcome {
    fn failure(session_id: &str, error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            session_id: session_id.to_string(),
            ..Self::default()
        }
    }

    fn from_view(view: StateView, ran: Vec<String>, paused_after: Option<String>) -> Self {
        Self {
            success: true,
            error: None,
            finished: view.is_finished(),
            session_id: view.session_id,
            ran,
            step: view.step,
            next: view.next,
            paused_after,
            state: Some(view.values),
        }
    }
}

/// A freshly started essay.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedEssay {
    pub essay: Option<EssayRecord>,
    pub session_id: String,
    pub outcome: StepOutcome,
}

/// Options for a new session. Unset values fall back to the user's stored
/// preferences, then to the built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub max_revisions: Option<u32>,
    pub interrupt_after: Option<Vec<String>>,
}

pub struct EssayWriter {
    runner: Mutex<AppRunner>,
    store: Option<Arc<dyn EssayStore>>,
}

impl EssayWriter {
    pub fn new(runner: AppRunner, store: Option<Arc<dyn EssayStore>>) -> Self {
        Self {
            runner: Mutex::new(runner),
            store,
        }
    }

    /// Builds the essay graph and opens checkpoints and essays on the backend
    /// named by `config`. SQLite backends share one pool.
    #[instrument(skip(model, search, event_bus), err)]
    pub async fn connect(
        model: Arc<dyn LanguageModel>,
        search: Arc<dyn SearchProvider>,
        config: &RuntimeConfig,
        event_bus: EventBus,
    ) -> Result<Self, WriterError> {
        let app = Arc::new(build_app(model, search)?);
        let (checkpointer, store): (Arc<dyn Checkpointer>, Arc<dyn EssayStore>) =
            match config.checkpointer {
                CheckpointerType::InMemory => {
                    let checkpointer: Arc<dyn Checkpointer> = Arc::new(InMemoryCheckpointer::new());
                    let store: Arc<dyn EssayStore> = Arc::new(InMemoryEssayStore::new());
                    (checkpointer, store)
                }
                CheckpointerType::SQLite => {
                    let pool = db::connect_pool(&config.database_url)
                        .await
                        .map_err(StoreError::from)?;
                    let checkpointer: Arc<dyn Checkpointer> =
                        Arc::new(SQLiteCheckpointer::from_pool(pool.clone()));
                    let store: Arc<dyn EssayStore> = Arc::new(SqliteEssayStore::from_pool(pool));
                    (checkpointer, store)
                }
            };
        let runner = AppRunner::with_checkpointer(app, checkpointer, event_bus);
        Ok(Self::new(runner, Some(store)))
    }

    fn store(&self) -> Result<&Arc<dyn EssayStore>, WriterError> {
        self.store.as_ref().ok_or(WriterError::NoStore)
    }

    /// Registered step names, sorted.
    pub async fn steps(&self) -> Vec<String> {
        self.runner.lock().await.step_names()
    }

    async fn resolve_options(
        &self,
        user_id: Option<i64>,
        options: SessionOptions,
    ) -> Result<(u32, Vec<String>), WriterError> {
        let prefs = match (&self.store, user_id) {
            (Some(store), Some(user)) => store.get_preferences(user).await?,
            _ => UserPreferences::defaults(user_id.unwrap_or_default()),
        };
        Ok((
            options.max_revisions.unwrap_or(prefs.default_max_revisions),
            options
                .interrupt_after
                .unwrap_or(prefs.default_interrupt_after),
        ))
    }

    /// Creates a session for `topic` and returns its id.
    ///
    /// Pause points are validated before anything is written.
    #[instrument(skip(self, topic, options), err)]
    pub async fn create_session(
        &self,
        user_id: Option<i64>,
        essay_id: Option<i64>,
        topic: &str,
        options: SessionOptions,
    ) -> Result<String, WriterError> {
        let (max_revisions, interrupt_after) = self.resolve_options(user_id, options).await?;
        let session_id = SessionId::generate().into_inner();
        let state = EssayState::new(topic, max_revisions)
            .with_owner(user_id, essay_id)
            .with_session(session_id.clone());
        self.runner
            .lock()
            .await
            .create_session(&session_id, state, &interrupt_after)
            .await?;
        info!(session_id, max_revisions, ?interrupt_after, "session created");
        Ok(session_id)
    }

    /// Creates the essay record and its session, then runs until the first
    /// pause point or the end.
    #[instrument(skip(self, topic, options), err)]
    pub async fn start_essay(
        &self,
        user_id: i64,
        topic: &str,
        options: SessionOptions,
    ) -> Result<StartedEssay, WriterError> {
        // Validate pause points before creating a record for them.
        if let Some(names) = &options.interrupt_after {
            self.runner.lock().await.validate_interrupts(names)?;
        }
        let essay = match &self.store {
            Some(store) => Some(store.create_essay(user_id, topic, None).await?),
            None => None,
        };
        let essay_id = essay.as_ref().map(|e| e.id);
        let session_id = self
            .create_session(Some(user_id), essay_id, topic, options)
            .await?;
        let essay = match (&self.store, essay) {
            (Some(store), Some(record)) => {
                store.attach_session(record.id, &session_id).await?;
                Some(store.get_essay(record.id).await?)
            }
            (_, essay) => essay,
        };
        let outcome = self.continue_session(&session_id).await;
        Ok(StartedEssay {
            essay,
            session_id,
            outcome,
        })
    }

    /// Runs exactly one step.
    #[instrument(skip(self))]
    pub async fn run_step(&self, session_id: &str) -> StepOutcome {
        let mut runner = self.runner.lock().await;
        let (ran, paused_after) = match runner.run_step(session_id).await {
            Ok(StepResult::Completed(report)) => (names(&report.ran_nodes), None),
            Ok(StepResult::Paused(paused)) => {
                let PausedReason::AfterNode(after) = paused.reason;
                (names(&paused.report.ran_nodes), Some(after.to_string()))
            }
            Ok(StepResult::Finished { .. }) => (Vec::new(), None),
            Err(e) => return StepOutcome::failure(session_id, e),
        };
        self.finish_call(&runner, session_id, ran, paused_after).await
    }

    /// Runs steps until a pause point fires or the workflow finishes.
    #[instrument(skip(self))]
    pub async fn continue_session(&self, session_id: &str) -> StepOutcome {
        let mut runner = self.runner.lock().await;
        let (ran, paused_after) = match runner.run_until_pause(session_id).await {
            Ok(RunOutcome { steps, status, .. }) => {
                let ran = steps.iter().flat_map(|r| names(&r.ran_nodes)).collect();
                let paused_after = match status {
                    RunStatus::Paused { after } => Some(after.to_string()),
                    RunStatus::Finished => None,
                };
                (ran, paused_after)
            }
            Err(e) => {
                // Steps that succeeded before the failure are already
                // checkpointed; keep the record in line with them.
                if let Err(sync) = self.sync_latest(&runner, session_id).await {
                    warn!(session_id, error = %sync, "essay sync after failure failed");
                }
                return StepOutcome::failure(session_id, e);
            }
        };
        self.finish_call(&runner, session_id, ran, paused_after).await
    }

    async fn finish_call(
        &self,
        runner: &AppRunner,
        session_id: &str,
        ran: Vec<String>,
        paused_after: Option<String>,
    ) -> StepOutcome {
        match self.sync_latest(runner, session_id).await {
            Ok(view) => StepOutcome::from_view(view, ran, paused_after),
            Err(e) => StepOutcome::failure(session_id, e),
        }
    }

    /// Reads the latest checkpoint and mirrors it onto the essay record.
    async fn sync_latest(
        &self,
        runner: &AppRunner,
        session_id: &str,
    ) -> Result<StateView, WriterError> {
        let view = runner.get_state(session_id).await?;
        self.sync_record(&view).await?;
        Ok(view)
    }

    async fn sync_record(&self, view: &StateView) -> Result<(), WriterError> {
        let (Some(store), Some(essay_id)) = (&self.store, view.values.essay_id) else {
            return Ok(());
        };
        let progress = EssayProgress::from_state(&view.values, view.is_finished());
        match store.record_progress(essay_id, &progress).await {
            Ok(record) => {
                if record.is_completed() && progress.completed {
                    info!(essay_id, words = record.word_count, "essay completed");
                }
                Ok(())
            }
            // A deleted essay leaves its session runnable; only the mirror is skipped.
            Err(StoreError::NotFound { .. }) => {
                warn!(essay_id, session_id = %view.session_id, "essay record is gone, not syncing");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_state(&self, session_id: &str) -> Result<StateView, WriterError> {
        Ok(self.runner.lock().await.get_state(session_id).await?)
    }

    /// Overwrites one field; `field` is the state field name.
    #[instrument(skip(self, value), err)]
    pub async fn update_state(
        &self,
        session_id: &str,
        field: &str,
        value: Value,
        as_node: Option<&str>,
    ) -> Result<StateView, WriterError> {
        let field: StateField = field.parse()?;
        let mut runner = self.runner.lock().await;
        let view = runner.update_state(session_id, field, value, as_node).await?;
        // Held until the record is written so edits land in order.
        self.sync_record(&view).await?;
        drop(runner);
        Ok(view)
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<HistoryEntry>, WriterError> {
        Ok(self.runner.lock().await.history(session_id).await?)
    }

    pub async fn list_essays(
        &self,
        user_id: i64,
        sort: EssaySort,
    ) -> Result<Vec<EssayRecord>, WriterError> {
        Ok(self.store()?.list_essays(user_id, sort).await?)
    }

    pub async fn get_essay(&self, id: i64) -> Result<EssayRecord, WriterError> {
        Ok(self.store()?.get_essay(id).await?)
    }

    /// One of `user_id`'s essays; another user's essay reads as not found.
    pub async fn user_essay(&self, user_id: i64, id: i64) -> Result<EssayRecord, WriterError> {
        let essay = self.store()?.get_essay(id).await?;
        if essay.user_id != user_id {
            return Err(StoreError::NotFound { id }.into());
        }
        Ok(essay)
    }

    pub async fn delete_essay(&self, user_id: i64, id: i64) -> Result<(), WriterError> {
        Ok(self.store()?.delete_essay(user_id, id).await?)
    }

    pub async fn preferences(&self, user_id: i64) -> Result<UserPreferences, WriterError> {
        Ok(self.store()?.get_preferences(user_id).await?)
    }

    /// Saves preferences after checking their pause points.
    pub async fn save_preferences(&self, prefs: &UserPreferences) -> Result<(), WriterError> {
        self.runner
            .lock()
            .await
            .validate_interrupts(&prefs.default_interrupt_after)?;
        Ok(self.store()?.save_preferences(prefs).await?)
    }

    /// Flushes progress events and stops the listener.
    pub async fn shutdown(&self) {
        self.runner.lock().await.shutdown().await;
    }
}

fn names(kinds: &[NodeKind]) -> Vec<String> {
    kinds.iter().map(|k| k.name().to_string()).collect()
}
