//! Deterministic nodes and providers for tests.
//!
//! Available to this crate's unit tests and, with the `testing` feature, to
//! downstream integration tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::message::Message;
use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::providers::{LanguageModel, ProviderError, SearchProvider};
use crate::state::EssayState;

/// Node that records its own name and optionally writes a plan or a draft.
#[derive(Debug, Clone)]
pub struct StepNode {
    name: String,
    writes_plan: bool,
    bumps_revision: bool,
}

impl StepNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            writes_plan: false,
            bumps_revision: false,
        }
    }

    #[must_use]
    pub fn writes_plan(mut self) -> Self {
        self.writes_plan = true;
        self
    }

    /// Writes a draft and increments `revision_number`, like a writer step.
    #[must_use]
    pub fn bumps_revision(mut self) -> Self {
        self.bumps_revision = true;
        self
    }
}

#[async_trait]
impl Node for StepNode {
    async fn run(&self, snapshot: EssayState, ctx: NodeContext) -> Result<NodePartial, NodeError> {
        ctx.emit(self.name.clone(), format!("running {}", self.name))?;
        let mut partial = NodePartial::for_step(&self.name);
        if self.writes_plan {
            partial = partial.with_plan(format!("plan for {}", snapshot.task));
        }
        if self.bumps_revision {
            let revision = snapshot.revision_number + 1;
            partial = partial
                .with_draft(format!("draft {revision}"))
                .with_revision(revision);
        }
        Ok(partial)
    }
}

/// Node that always fails.
#[derive(Debug, Clone, Default)]
pub struct FailingNode;

#[async_trait]
impl Node for FailingNode {
    async fn run(&self, _snapshot: EssayState, _ctx: NodeContext) -> Result<NodePartial, NodeError> {
        Err(NodeError::MissingInput {
            what: "test fixture input",
        })
    }
}

/// Language model replying from a fixed script, in order.
///
/// Once the script runs out the fallback reply is used, or an error is
/// returned when there is none. Every conversation received is recorded.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Model that gives the same reply to every call.
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self::default().with_fallback(reply)
    }

    #[must_use]
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, messages: &[Message]) -> Result<String, ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let next = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        next.or_else(|| self.fallback.clone())
            .ok_or_else(|| ProviderError::Llm {
                provider: "scripted",
                message: "script exhausted".to_string(),
            })
    }
}

/// Language model that always fails.
#[derive(Debug, Clone, Default)]
pub struct FailingModel;

#[async_trait]
impl LanguageModel for FailingModel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn invoke(&self, _messages: &[Message]) -> Result<String, ProviderError> {
        Err(ProviderError::Llm {
            provider: "failing",
            message: "model unavailable".to_string(),
        })
    }
}

/// Search provider with canned results.
///
/// Queries without a canned entry get `"{query} result {n}"` snippets.
#[derive(Debug, Default)]
pub struct StaticSearch {
    canned: FxHashMap<String, Vec<String>>,
    queries: Mutex<Vec<(String, usize)>>,
}

impl StaticSearch {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_results<S: Into<String>>(mut self, query: &str, results: Vec<S>) -> Self {
        self.canned
            .insert(query.to_string(), results.into_iter().map(Into::into).collect());
        self
    }

    /// Queries received so far with the result limit each one was sent with.
    pub fn queries(&self) -> Vec<(String, usize)> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, ProviderError> {
        if let Ok(mut seen) = self.queries.lock() {
            seen.push((query.to_string(), max_results));
        }
        let results = match self.canned.get(query) {
            Some(canned) => canned.iter().take(max_results).cloned().collect(),
            None => (1..=max_results)
                .map(|n| format!("{query} result {n}"))
                .collect(),
        };
        Ok(results)
    }
}

/// Search provider that always fails.
#[derive(Debug, Clone, Default)]
pub struct FailingSearch;

#[async_trait]
impl SearchProvider for FailingSearch {
    fn name(&self) -> &str {
        "failing"
    }

    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<String>, ProviderError> {
        Err(ProviderError::Status {
            provider: "failing",
            status: 503,
            body: "search unavailable".to_string(),
        })
    }
}
