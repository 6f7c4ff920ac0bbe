/*!
Serde-friendly persistence models for checkpoints.

Nothing here does I/O. The SQLite checkpointer stores these shapes as JSON
columns and converts with `From` / `TryFrom`. `NodeKind`s are stored through
`NodeKind::encode`, timestamps as RFC 3339 strings.
*/

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    runtimes::checkpointer::{Checkpoint, CheckpointSource},
    state::EssayState,
    types::NodeKind,
    utils::json_ext::JsonSerializable,
};

#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("invalid timestamp `{value}`: {source}")]
    #[diagnostic(
        code(essay_graph::persistence::bad_timestamp),
        help("Timestamps are stored as RFC 3339 strings.")
    )]
    BadTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("unknown checkpoint source: {0}")]
    #[diagnostic(
        code(essay_graph::persistence::unknown_source),
        help("Valid sources are input, step and update.")
    )]
    UnknownSource(String),

    #[error("JSON serialization/deserialization failed: {source}")]
    #[diagnostic(code(essay_graph::persistence::serde))]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

impl<T> JsonSerializable<PersistenceError> for T
where
    T: serde::Serialize + for<'de> serde::de::DeserializeOwned,
{
    fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| PersistenceError::Serde { source: e })
    }

    fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| PersistenceError::Serde { source: e })
    }
}

/// Full persisted checkpoint shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedCheckpoint {
    pub session_id: String,
    pub checkpoint_id: String,
    pub step: u64,
    pub state: EssayState,
    /// Encoded with `NodeKind::encode`.
    pub frontier: Vec<String>,
    #[serde(default)]
    pub interrupt_after: Vec<String>,
    pub source: String,
    #[serde(default)]
    pub writer: Option<String>,
    pub created_at: String,
}

pub fn encode_kinds(kinds: &[NodeKind]) -> Vec<String> {
    kinds.iter().map(NodeKind::encode).collect()
}

pub fn decode_kinds(raw: &[String]) -> Vec<NodeKind> {
    raw.iter().map(|s| NodeKind::decode(s)).collect()
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| PersistenceError::BadTimestamp {
            value: value.to_string(),
            source,
        })
}

impl From<&Checkpoint> for PersistedCheckpoint {
    fn from(cp: &Checkpoint) -> Self {
        PersistedCheckpoint {
            session_id: cp.session_id.clone(),
            checkpoint_id: cp.checkpoint_id.clone(),
            step: cp.step,
            state: cp.state.clone(),
            frontier: encode_kinds(&cp.frontier),
            interrupt_after: encode_kinds(&cp.interrupt_after),
            source: cp.source.as_str().to_string(),
            writer: cp.writer.as_ref().map(NodeKind::encode),
            created_at: cp.created_at.to_rfc3339(),
        }
    }
}

impl TryFrom<PersistedCheckpoint> for Checkpoint {
    type Error = PersistenceError;

    fn try_from(p: PersistedCheckpoint) -> Result<Self> {
        Ok(Checkpoint {
            session_id: p.session_id,
            checkpoint_id: p.checkpoint_id,
            step: p.step,
            state: p.state,
            frontier: decode_kinds(&p.frontier),
            interrupt_after: decode_kinds(&p.interrupt_after),
            source: p.source.parse::<CheckpointSource>()?,
            writer: p.writer.as_deref().map(NodeKind::decode),
            created_at: parse_timestamp(&p.created_at)?,
        })
    }
}
