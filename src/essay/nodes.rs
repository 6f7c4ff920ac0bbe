use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::prompts;
use super::workflow::steps;
use crate::message::Message;
use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::providers::{LanguageModel, SearchProvider, generate_queries};
use crate::state::EssayState;

/// Query budget for the research-plan step.
pub const PLAN_QUERY_LIMIT: usize = 3;
/// Query budget for the research-critique step.
pub const CRITIQUE_QUERY_LIMIT: usize = 2;
/// Results requested from the search provider per query.
pub const SEARCH_RESULT_LIMIT: usize = 2;

fn require<'a>(value: &'a str, what: &'static str) -> Result<&'a str, NodeError> {
    if value.trim().is_empty() {
        Err(NodeError::MissingInput { what })
    } else {
        Ok(value)
    }
}

/// Writes the outline.
pub struct PlannerNode {
    model: Arc<dyn LanguageModel>,
}

impl PlannerNode {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Node for PlannerNode {
    async fn run(&self, snapshot: EssayState, ctx: NodeContext) -> Result<NodePartial, NodeError> {
        let task = require(&snapshot.task, "task")?;
        ctx.emit(steps::PLANNER, "drafting outline")?;
        let plan = self
            .model
            .invoke(&[Message::system(prompts::PLAN_PROMPT), Message::user(task)])
            .await?;
        Ok(NodePartial::for_step(steps::PLANNER).with_plan(plan))
    }
}

/// Generates queries from `prompt` + `subject`, searches each one and
/// returns the queries with every snippet found.
async fn research(
    model: &dyn LanguageModel,
    search: &dyn SearchProvider,
    ctx: &NodeContext,
    prompt: &str,
    subject: &str,
    max_queries: usize,
) -> Result<(Vec<String>, Vec<String>), NodeError> {
    let queries = generate_queries(
        model,
        &[Message::system(prompt), Message::user(subject)],
        max_queries,
    )
    .await?;
    let mut snippets = Vec::new();
    for query in &queries {
        ctx.emit(ctx.node_id.clone(), format!("searching: {query}"))?;
        let found = search.search(query, SEARCH_RESULT_LIMIT).await?;
        debug!(query = %query, results = found.len(), "search done");
        snippets.extend(found);
    }
    ctx.emit(
        ctx.node_id.clone(),
        format!("collected {} snippets from {} queries", snippets.len(), queries.len()),
    )?;
    Ok((queries, snippets))
}

/// Researches the topic before the first draft.
pub struct ResearchPlanNode {
    model: Arc<dyn LanguageModel>,
    search: Arc<dyn SearchProvider>,
}

impl ResearchPlanNode {
    pub fn new(model: Arc<dyn LanguageModel>, search: Arc<dyn SearchProvider>) -> Self {
        Self { model, search }
    }
}

#[async_trait]
impl Node for ResearchPlanNode {
    async fn run(&self, snapshot: EssayState, ctx: NodeContext) -> Result<NodePartial, NodeError> {
        let task = require(&snapshot.task, "task")?;
        let (queries, snippets) = research(
            self.model.as_ref(),
            self.search.as_ref(),
            &ctx,
            prompts::RESEARCH_PLAN_PROMPT,
            task,
            PLAN_QUERY_LIMIT,
        )
        .await?;
        Ok(NodePartial::for_step(steps::RESEARCH_PLAN)
            .with_queries(queries)
            .with_content(snippets))
    }
}

/// Writes a draft from the plan and the research so far.
pub struct GenerateNode {
    model: Arc<dyn LanguageModel>,
}

impl GenerateNode {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Node for GenerateNode {
    async fn run(&self, snapshot: EssayState, ctx: NodeContext) -> Result<NodePartial, NodeError> {
        let task = require(&snapshot.task, "task")?;
        let revision = snapshot
            .revision_number
            .checked_add(1)
            .ok_or(NodeError::RevisionOverflow {
                current: snapshot.revision_number,
            })?;
        ctx.emit(steps::GENERATE, format!("writing revision {revision}"))?;
        let messages = [
            Message::system(prompts::writer_prompt(&snapshot.joined_content())),
            Message::user(prompts::writer_request(task, &snapshot.plan)),
        ];
        let draft = self.model.invoke(&messages).await?;
        Ok(NodePartial::for_step(steps::GENERATE)
            .with_draft(draft)
            .with_revision(revision))
    }
}

/// Critiques the current draft.
pub struct ReflectNode {
    model: Arc<dyn LanguageModel>,
}

impl ReflectNode {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Node for ReflectNode {
    async fn run(&self, snapshot: EssayState, ctx: NodeContext) -> Result<NodePartial, NodeError> {
        let draft = require(&snapshot.draft, "draft")?;
        ctx.emit(steps::REFLECT, "reviewing draft")?;
        let critique = self
            .model
            .invoke(&[
                Message::system(prompts::REFLECTION_PROMPT),
                Message::user(draft),
            ])
            .await?;
        Ok(NodePartial::for_step(steps::REFLECT).with_critique(critique))
    }
}

/// Researches what the critique asks for. Leaves `queries` untouched.
pub struct ResearchCritiqueNode {
    model: Arc<dyn LanguageModel>,
    search: Arc<dyn SearchProvider>,
}

impl ResearchCritiqueNode {
    pub fn new(model: Arc<dyn LanguageModel>, search: Arc<dyn SearchProvider>) -> Self {
        Self { model, search }
    }
}

#[async_trait]
impl Node for ResearchCritiqueNode {
    async fn run(&self, snapshot: EssayState, ctx: NodeContext) -> Result<NodePartial, NodeError> {
        let critique = require(&snapshot.critique, "critique")?;
        let (_, snippets) = research(
            self.model.as_ref(),
            self.search.as_ref(),
            &ctx,
            prompts::RESEARCH_CRITIQUE_PROMPT,
            critique,
            CRITIQUE_QUERY_LIMIT,
        )
        .await?;
        Ok(NodePartial::for_step(steps::RESEARCH_CRITIQUE).with_content(snippets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use crate::utils::testing::{FailingSearch, ScriptedModel, StaticSearch};

    fn ctx(node: &str) -> (NodeContext, flume::Receiver<crate::event_bus::Event>) {
        let (tx, rx) = flume::unbounded();
        (
            NodeContext {
                node_id: node.to_string(),
                step: 1,
                event_bus_sender: tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn planner_sends_plan_prompt_and_task() {
        let model = Arc::new(ScriptedModel::new(["I. Intro\nII. Body\nIII. End"]));
        let node = PlannerNode::new(model.clone());
        let (ctx, _rx) = ctx(steps::PLANNER);
        let partial = node.run(EssayState::new("Tea", 1), ctx).await.unwrap();
        assert_eq!(partial.plan.as_deref(), Some("I. Intro\nII. Body\nIII. End"));
        assert_eq!(partial.lnode.as_deref(), Some("planner"));
        assert_eq!(partial.count, Some(1));

        let calls = model.calls();
        assert_eq!(calls[0][0].content, prompts::PLAN_PROMPT);
        assert_eq!(calls[0][1].content, "Tea");
    }

    #[tokio::test]
    async fn research_plan_limits_queries_and_results() {
        let model = Arc::new(ScriptedModel::new([
            r#"{"queries": ["q1", "q2", "q3", "q4"]}"#,
        ]));
        let search = Arc::new(StaticSearch::new().with_results("q2", vec!["only one"]));
        let node = ResearchPlanNode::new(model, search.clone());
        let (ctx, rx) = ctx(steps::RESEARCH_PLAN);
        let partial = node.run(EssayState::new("Tea", 1), ctx).await.unwrap();

        assert_eq!(partial.queries, Some(vec!["q1".into(), "q2".into(), "q3".into()]));
        assert_eq!(
            partial.content,
            Some(vec![
                "q1 result 1".to_string(),
                "q1 result 2".to_string(),
                "only one".to_string(),
                "q3 result 1".to_string(),
                "q3 result 2".to_string(),
            ])
        );
        assert!(search.queries().iter().all(|(_, limit)| *limit == SEARCH_RESULT_LIMIT));
        let progress: Vec<String> = rx.drain().map(|e| e.to_string()).collect();
        assert!(progress.iter().any(|l| l.contains("searching: q2")));
    }

    #[tokio::test]
    async fn generate_uses_research_and_bumps_revision() {
        let model = Arc::new(ScriptedModel::new(["Tea is old."]));
        let node = GenerateNode::new(model.clone());
        let mut state = EssayState::new("Tea", 2);
        state.plan = "I. Origins".into();
        state.content = vec!["a".into(), "b".into()];
        state.revision_number = 1;
        let (ctx, _rx) = ctx(steps::GENERATE);
        let partial = node.run(state, ctx).await.unwrap();
        assert_eq!(partial.draft.as_deref(), Some("Tea is old."));
        assert_eq!(partial.revision_number, Some(2));

        let calls = model.calls();
        assert!(calls[0][0].content.ends_with("------\na\n\nb"));
        assert_eq!(calls[0][1].content, "Tea\n\nHere is my plan:\n\nI. Origins");
    }

    #[tokio::test]
    async fn generate_refuses_to_wrap_the_revision_number() {
        let model = Arc::new(ScriptedModel::repeating("never used"));
        let node = GenerateNode::new(model.clone());
        let mut state = EssayState::new("Tea", u32::MAX);
        state.revision_number = u32::MAX;
        let (ctx, _rx) = ctx(steps::GENERATE);
        let err = node.run(state, ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::RevisionOverflow { current: u32::MAX }));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn reflect_requires_a_draft() {
        let node = ReflectNode::new(Arc::new(ScriptedModel::repeating("fine")));
        let (ctx, _rx) = ctx(steps::REFLECT);
        let err = node.run(EssayState::new("Tea", 1), ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::MissingInput { what: "draft" }));
    }

    #[tokio::test]
    async fn research_critique_only_appends_content() {
        let model = Arc::new(ScriptedModel::new(["[\"c1\", \"c2\", \"c3\"]"]));
        let node = ResearchCritiqueNode::new(model, Arc::new(StaticSearch::new()));
        let mut state = EssayState::new("Tea", 1);
        state.critique = "Needs more history.".into();
        let (ctx, _rx) = ctx(steps::RESEARCH_CRITIQUE);
        let partial = node.run(state, ctx).await.unwrap();
        assert!(partial.queries.is_none());
        assert_eq!(partial.content.map(|c| c.len()), Some(4));
    }

    #[tokio::test]
    async fn search_failure_is_a_provider_error() {
        let model = Arc::new(ScriptedModel::new(["[\"q\"]"]));
        let node = ResearchPlanNode::new(model, Arc::new(FailingSearch));
        let (ctx, _rx) = ctx(steps::RESEARCH_PLAN);
        let err = node.run(EssayState::new("Tea", 1), ctx).await.unwrap_err();
        assert!(matches!(
            err,
            NodeError::Provider(ProviderError::Status { status: 503, .. })
        ));
    }
}
