//! Essay records and per-user preferences.
//!
//! The workflow itself only knows about checkpoints; the essay service
//! mirrors each checkpoint's plan, draft and critique onto an
//! [`EssayRecord`] so users can list and revisit their essays.

mod memory;
mod sqlite;

pub use memory::InMemoryEssayStore;
pub use sqlite::SqliteEssayStore;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::EssayState;

pub const DEFAULT_MAX_REVISIONS: u32 = 2;
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

const TITLE_TOPIC_CHARS: usize = 50;

/// `"Essay: "` plus the first 50 characters of the topic and an ellipsis.
pub fn essay_title(topic: &str) -> String {
    let head: String = topic.chars().take(TITLE_TOPIC_CHARS).collect();
    format!("Essay: {head}...")
}

/// Current time at the precision timestamps are stored with.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EssayStatus {
    Draft,
    InProgress,
    Completed,
}

impl EssayStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EssayStatus::Draft => "draft",
            EssayStatus::InProgress => "in_progress",
            EssayStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for EssayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EssayStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EssayStatus::Draft),
            "in_progress" => Ok(EssayStatus::InProgress),
            "completed" => Ok(EssayStatus::Completed),
            other => Err(StoreError::Corrupt {
                message: format!("unknown essay status `{other}`"),
            }),
        }
    }
}

/// Ordering for essay listings. Both are newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EssaySort {
    #[default]
    Updated,
    Created,
}

impl FromStr for EssaySort {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "updated" | "updated_at" => Ok(EssaySort::Updated),
            "created" | "created_at" => Ok(EssaySort::Created),
            other => Err(format!("unknown sort `{other}` (expected updated or created)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EssayRecord {
    pub id: i64,
    pub user_id: i64,
    pub session_id: Option<String>,
    pub title: String,
    pub topic: String,
    pub plan: String,
    pub draft: String,
    pub critique: String,
    pub final_essay: Option<String>,
    pub status: EssayStatus,
    pub revision_number: u32,
    pub word_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl EssayRecord {
    pub fn is_completed(&self) -> bool {
        self.status == EssayStatus::Completed
    }

    /// Copies `progress` onto the record and moves the status forward.
    pub(crate) fn apply(&mut self, progress: &EssayProgress, now: DateTime<Utc>) {
        self.plan = progress.plan.clone();
        self.draft = progress.draft.clone();
        self.critique = progress.critique.clone();
        self.revision_number = progress.revision_number;
        self.word_count = progress.word_count;
        self.updated_at = now;
        if progress.completed {
            if self.status != EssayStatus::Completed {
                self.completed_at = Some(now);
            }
            self.status = EssayStatus::Completed;
            self.final_essay = Some(progress.draft.clone());
        } else if self.status == EssayStatus::Draft {
            self.status = EssayStatus::InProgress;
        }
    }
}

/// Workflow output mirrored onto an essay record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EssayProgress {
    pub plan: String,
    pub draft: String,
    pub critique: String,
    pub revision_number: u32,
    pub word_count: u64,
    /// Set once nothing is scheduled after the latest checkpoint.
    pub completed: bool,
}

impl EssayProgress {
    pub fn from_state(state: &EssayState, completed: bool) -> Self {
        Self {
            plan: state.plan.clone(),
            draft: state.draft.clone(),
            critique: state.critique.clone(),
            revision_number: state.revision_number,
            word_count: state.word_count() as u64,
            completed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: i64,
    pub default_max_revisions: u32,
    pub preferred_model: String,
    /// Step names to pause after when none are given explicitly.
    pub default_interrupt_after: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl UserPreferences {
    pub fn defaults(user_id: i64) -> Self {
        Self {
            user_id,
            default_max_revisions: DEFAULT_MAX_REVISIONS,
            preferred_model: DEFAULT_MODEL.to_string(),
            default_interrupt_after: Vec::new(),
            updated_at: now(),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("essay {id} not found")]
    #[diagnostic(
        code(essay_graph::store::not_found),
        help("List your essays to see the available ids.")
    )]
    NotFound { id: i64 },

    #[error("database error: {message}")]
    #[diagnostic(
        code(essay_graph::store::database),
        help("Check the database URL and file permissions.")
    )]
    Database { message: String },

    #[error("corrupt essay row: {message}")]
    #[diagnostic(code(essay_graph::store::corrupt))]
    Corrupt { message: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database {
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence for essays and preferences.
#[async_trait]
pub trait EssayStore: Send + Sync {
    /// New record in `draft` status with a title derived from `topic`.
    async fn create_essay(
        &self,
        user_id: i64,
        topic: &str,
        session_id: Option<&str>,
    ) -> Result<EssayRecord>;

    async fn get_essay(&self, id: i64) -> Result<EssayRecord>;

    async fn attach_session(&self, id: i64, session_id: &str) -> Result<()>;

    /// Mirrors workflow output onto the record.
    async fn record_progress(&self, id: i64, progress: &EssayProgress) -> Result<EssayRecord>;

    /// A user's essays, newest first.
    async fn list_essays(&self, user_id: i64, sort: EssaySort) -> Result<Vec<EssayRecord>>;

    /// Deletes an essay owned by `user_id`.
    async fn delete_essay(&self, user_id: i64, id: i64) -> Result<()>;

    /// Stored preferences, or the defaults for a user who never saved any.
    async fn get_preferences(&self, user_id: i64) -> Result<UserPreferences>;

    async fn save_preferences(&self, prefs: &UserPreferences) -> Result<()>;
}

#[cfg(test)]
mod tests;
