//! Workflow state for an essay run.
//!
//! [`EssayState`] is the single value threaded through every step. Steps
//! never mutate it directly: they return a [`crate::node::NodePartial`] and
//! the app merges it through the reducer registry at the step barrier.
//!
//! Manual edits go through [`EssayState::overwrite`], which enforces the
//! field rules (read-only fields, typed values, monotonic revisions).
//!
//! ```
//! use essay_graph::state::{EssayState, StateField};
//! use serde_json::json;
//!
//! let mut state = EssayState::new("Why bees matter", 2);
//! state.overwrite(StateField::Plan, json!("I. Pollination")).unwrap();
//! assert_eq!(state.get(StateField::Plan), json!("I. Pollination"));
//! assert!(state.overwrite(StateField::Task, json!("other")).is_err());
//! ```

use std::fmt;
use std::str::FromStr;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Values carried between workflow steps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EssayState {
    /// Topic description supplied at session creation. Never changes.
    pub task: String,
    /// Name of the last step that executed.
    #[serde(default)]
    pub lnode: String,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub draft: String,
    #[serde(default)]
    pub critique: String,
    /// Research snippets, appended by both research steps.
    #[serde(default)]
    pub content: Vec<String>,
    /// Queries from the last research-plan step.
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default)]
    pub revision_number: u32,
    pub max_revisions: u32,
    /// One per executed step.
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub essay_id: Option<i64>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl EssayState {
    pub fn new(task: impl Into<String>, max_revisions: u32) -> Self {
        Self {
            task: task.into(),
            max_revisions,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_owner(mut self, user_id: Option<i64>, essay_id: Option<i64>) -> Self {
        self.user_id = user_id;
        self.essay_id = essay_id;
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// True once generation has run past the revision limit.
    pub fn revisions_exhausted(&self) -> bool {
        self.revision_number > self.max_revisions
    }

    /// Whitespace-delimited word count of the current draft.
    pub fn word_count(&self) -> usize {
        self.draft.split_whitespace().count()
    }

    /// Research content joined the way the writer prompt expects it.
    pub fn joined_content(&self) -> String {
        self.content.join("\n\n")
    }

    /// Reads a field as JSON.
    pub fn get(&self, field: StateField) -> Value {
        match field {
            StateField::Task => json!(self.task),
            StateField::Lnode => json!(self.lnode),
            StateField::Plan => json!(self.plan),
            StateField::Draft => json!(self.draft),
            StateField::Critique => json!(self.critique),
            StateField::Content => json!(self.content),
            StateField::Queries => json!(self.queries),
            StateField::RevisionNumber => json!(self.revision_number),
            StateField::MaxRevisions => json!(self.max_revisions),
            StateField::Count => json!(self.count),
        }
    }

    /// All workflow fields as a JSON object, in declaration order.
    pub fn values(&self) -> serde_json::Map<String, Value> {
        StateField::ALL
            .iter()
            .map(|f| (f.as_str().to_string(), self.get(*f)))
            .collect()
    }

    /// Replaces a single editable field.
    ///
    /// # Errors
    ///
    /// - [`StateError::ReadOnly`] for `task`, `content`, `count`, `lnode`
    /// - [`StateError::TypeMismatch`] when `value` has the wrong JSON shape
    /// - [`StateError::RevisionRegression`] when lowering `revision_number`
    pub fn overwrite(&mut self, field: StateField, value: Value) -> Result<(), StateError> {
        if !field.is_editable() {
            return Err(StateError::ReadOnly { field });
        }
        match field {
            StateField::Plan => self.plan = expect_text(field, value)?,
            StateField::Draft => self.draft = expect_text(field, value)?,
            StateField::Critique => self.critique = expect_text(field, value)?,
            StateField::Queries => self.queries = expect_list(field, value)?,
            StateField::MaxRevisions => self.max_revisions = expect_u32(field, value)?,
            StateField::RevisionNumber => {
                let requested = expect_u32(field, value)?;
                if requested < self.revision_number {
                    return Err(StateError::RevisionRegression {
                        current: self.revision_number,
                        requested,
                    });
                }
                self.revision_number = requested;
            }
            StateField::Task | StateField::Lnode | StateField::Content | StateField::Count => {
                return Err(StateError::ReadOnly { field });
            }
        }
        Ok(())
    }
}

fn expect_text(field: StateField, value: Value) -> Result<String, StateError> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(StateError::TypeMismatch {
            field,
            expected: "string",
        }),
    }
}

fn expect_list(field: StateField, value: Value) -> Result<Vec<String>, StateError> {
    serde_json::from_value::<Vec<String>>(value).map_err(|_| StateError::TypeMismatch {
        field,
        expected: "array of strings",
    })
}

fn expect_u32(field: StateField, value: Value) -> Result<u32, StateError> {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or(StateError::TypeMismatch {
            field,
            expected: "non-negative integer",
        })
}

/// Named fields of [`EssayState`] that callers can inspect or edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateField {
    Task,
    Lnode,
    Plan,
    Draft,
    Critique,
    Content,
    Queries,
    RevisionNumber,
    MaxRevisions,
    Count,
}

impl StateField {
    pub const ALL: [StateField; 10] = [
        StateField::Task,
        StateField::Lnode,
        StateField::Plan,
        StateField::Draft,
        StateField::Critique,
        StateField::Content,
        StateField::Queries,
        StateField::RevisionNumber,
        StateField::MaxRevisions,
        StateField::Count,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StateField::Task => "task",
            StateField::Lnode => "lnode",
            StateField::Plan => "plan",
            StateField::Draft => "draft",
            StateField::Critique => "critique",
            StateField::Content => "content",
            StateField::Queries => "queries",
            StateField::RevisionNumber => "revision_number",
            StateField::MaxRevisions => "max_revisions",
            StateField::Count => "count",
        }
    }

    pub fn is_editable(self) -> bool {
        matches!(
            self,
            StateField::Plan
                | StateField::Draft
                | StateField::Critique
                | StateField::Queries
                | StateField::RevisionNumber
                | StateField::MaxRevisions
        )
    }

    /// Step that normally produces this field; used to tag manual edits.
    pub fn default_writer(self) -> Option<&'static str> {
        match self {
            StateField::Plan => Some("planner"),
            StateField::Draft => Some("generate"),
            StateField::Critique => Some("reflect"),
            StateField::Queries => Some("research_plan"),
            _ => None,
        }
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateField {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateField::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| StateError::UnknownField {
                name: s.to_string(),
            })
    }
}

#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum StateError {
    #[error("unknown state field: {name}")]
    #[diagnostic(
        code(essay_graph::state::unknown_field),
        help("Valid fields: task, lnode, plan, draft, critique, content, queries, revision_number, max_revisions, count.")
    )]
    UnknownField { name: String },

    #[error("state field `{field}` is read-only")]
    #[diagnostic(
        code(essay_graph::state::read_only),
        help("Only plan, draft, critique, queries, revision_number and max_revisions can be edited.")
    )]
    ReadOnly { field: StateField },

    #[error("state field `{field}` expects a {expected}")]
    #[diagnostic(code(essay_graph::state::type_mismatch))]
    TypeMismatch {
        field: StateField,
        expected: &'static str,
    },

    #[error("revision_number cannot decrease (current {current}, requested {requested})")]
    #[diagnostic(code(essay_graph::state::revision_regression))]
    RevisionRegression { current: u32, requested: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_starts_empty() {
        let s = EssayState::new("tea", 3);
        assert_eq!(s.task, "tea");
        assert_eq!(s.max_revisions, 3);
        assert_eq!(s.revision_number, 0);
        assert_eq!(s.count, 0);
        assert!(s.content.is_empty());
        assert!(s.lnode.is_empty());
        assert!(!s.revisions_exhausted());
    }

    #[test]
    fn field_names_parse_back() {
        for field in StateField::ALL {
            assert_eq!(field.as_str().parse::<StateField>(), Ok(field));
        }
        assert!(matches!(
            "essay".parse::<StateField>(),
            Err(StateError::UnknownField { .. })
        ));
    }

    #[test]
    fn overwrite_rejects_read_only_fields() {
        let mut s = EssayState::new("tea", 1);
        for field in [
            StateField::Task,
            StateField::Content,
            StateField::Count,
            StateField::Lnode,
        ] {
            assert_eq!(
                s.overwrite(field, json!("x")),
                Err(StateError::ReadOnly { field })
            );
        }
        assert_eq!(s.task, "tea");
    }

    #[test]
    fn overwrite_checks_types() {
        let mut s = EssayState::new("tea", 1);
        assert!(matches!(
            s.overwrite(StateField::Plan, json!(5)),
            Err(StateError::TypeMismatch { .. })
        ));
        assert!(matches!(
            s.overwrite(StateField::Queries, json!(["a", 1])),
            Err(StateError::TypeMismatch { .. })
        ));
        assert!(matches!(
            s.overwrite(StateField::MaxRevisions, json!(-1)),
            Err(StateError::TypeMismatch { .. })
        ));
        s.overwrite(StateField::Queries, json!(["a", "b"])).unwrap();
        assert_eq!(s.queries, vec!["a", "b"]);
    }

    #[test]
    fn revision_number_edits_are_monotonic() {
        let mut s = EssayState::new("tea", 5);
        s.overwrite(StateField::RevisionNumber, json!(2)).unwrap();
        assert_eq!(
            s.overwrite(StateField::RevisionNumber, json!(1)),
            Err(StateError::RevisionRegression {
                current: 2,
                requested: 1
            })
        );
        s.overwrite(StateField::RevisionNumber, json!(2)).unwrap();
        assert_eq!(s.revision_number, 2);
    }

    #[test]
    fn values_lists_every_field() {
        let s = EssayState::new("tea", 1);
        let values = s.values();
        assert_eq!(values.len(), StateField::ALL.len());
        assert_eq!(values["task"], json!("tea"));
        assert_eq!(values["content"], json!([]));
    }

    #[test]
    fn word_count_uses_whitespace() {
        let mut s = EssayState::new("tea", 1);
        s.draft = "one two\nthree   four".into();
        assert_eq!(s.word_count(), 4);
    }

    #[test]
    fn serde_roundtrip_keeps_correlation_ids() {
        let s = EssayState::new("tea", 1)
            .with_owner(Some(7), Some(11))
            .with_session("sess");
        let back: EssayState = serde_json::from_str(&serde_json::to_string(&s).unwrap()).unwrap();
        assert_eq!(back, s);
    }
}
