//! Workflow runtime: stepwise execution, sessions and checkpoint persistence.
//!
//! - [`AppRunner`] drives a compiled [`crate::app::App`] one step at a time,
//!   honouring per-session pause points.
//! - [`Checkpointer`] abstracts history storage, with
//!   [`InMemoryCheckpointer`] and [`SQLiteCheckpointer`] backends.
//! - [`persistence`] holds the serde shapes stored by durable backends.

pub mod checkpointer;
pub mod checkpointer_sqlite;
mod checkpointer_sqlite_helpers;
pub mod persistence;
pub mod runner;
pub mod runtime_config;
pub mod types;

pub use checkpointer::{
    Checkpoint, CheckpointSource, Checkpointer, CheckpointerError, CheckpointerType,
    InMemoryCheckpointer, restore_session_state,
};
pub use checkpointer_sqlite::SQLiteCheckpointer;
pub use persistence::{PersistedCheckpoint, PersistenceError};
pub use runner::{
    AppRunner, HistoryEntry, PausedReason, PausedReport, RunOutcome, RunStatus, RunnerError,
    SessionInit, SessionState, StateView, StepReport, StepResult,
};
pub use runtime_config::RuntimeConfig;
pub use types::SessionId;
