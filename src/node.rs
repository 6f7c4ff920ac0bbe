use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::event_bus::Event;
use crate::providers::ProviderError;
use crate::state::EssayState;

/*****************
  Node abstraction
******************/

/// Execution context handed to a node for the duration of one step.
#[derive(Clone, Debug)]
pub struct NodeContext {
    pub node_id: String,
    pub step: u64,
    pub event_bus_sender: flume::Sender<Event>,
}

impl NodeContext {
    /// Emits a progress line tagged with this node and step.
    pub fn emit(
        &self,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), NodeError> {
        self.event_bus_sender
            .send(Event::node_message_with_meta(
                self.node_id.clone(),
                self.step,
                scope,
                message,
            ))
            .map_err(|_| NodeError::EventBus(self.node_id.clone()))
    }
}

/// Partial state update returned by a node.
///
/// Every field is optional; `None` leaves the state untouched. How a present
/// value is merged is decided by the reducer registered for that field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodePartial {
    pub lnode: Option<String>,
    pub plan: Option<String>,
    pub draft: Option<String>,
    pub critique: Option<String>,
    /// Appended to `content`.
    pub content: Option<Vec<String>>,
    pub queries: Option<Vec<String>>,
    pub revision_number: Option<u32>,
    /// Added to `count`.
    pub count: Option<u64>,
}

impl NodePartial {
    /// Partial carrying the bookkeeping every step contributes.
    pub fn for_step(name: &str) -> Self {
        Self {
            lnode: Some(name.to_string()),
            count: Some(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    #[must_use]
    pub fn with_draft(mut self, draft: impl Into<String>) -> Self {
        self.draft = Some(draft.into());
        self
    }

    #[must_use]
    pub fn with_critique(mut self, critique: impl Into<String>) -> Self {
        self.critique = Some(critique.into());
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: Vec<String>) -> Self {
        self.content = Some(content);
        self
    }

    #[must_use]
    pub fn with_queries(mut self, queries: Vec<String>) -> Self {
        self.queries = Some(queries);
        self
    }

    #[must_use]
    pub fn with_revision(mut self, revision_number: u32) -> Self {
        self.revision_number = Some(revision_number);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, snapshot: EssayState, ctx: NodeContext) -> Result<NodePartial, NodeError>;
}

#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(essay_graph::node::missing_input),
        help("Check that the previous step produced the required data.")
    )]
    MissingInput { what: &'static str },

    #[error("revision number {current} cannot be incremented")]
    #[diagnostic(
        code(essay_graph::node::revision_overflow),
        help("Lower revision_number or max_revisions on the session.")
    )]
    RevisionOverflow { current: u32 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    #[diagnostic(code(essay_graph::node::serde_json))]
    Serde(#[from] serde_json::Error),

    #[error("event bus closed while node `{0}` was emitting")]
    #[diagnostic(code(essay_graph::node::event_bus))]
    EventBus(String),
}
