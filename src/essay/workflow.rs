//! Wiring of the essay graph.
//!
//! ```text
//! planner -> research_plan -> generate -?-> reflect -> research_critique -> generate
//!                                       \-> END (revision_number > max_revisions)
//! ```

use std::sync::Arc;

use crate::app::App;
use crate::graph::{EdgePredicate, GraphBuilder, GraphError};
use crate::providers::{LanguageModel, SearchProvider};
use crate::state::EssayState;
use crate::types::NodeKind;

use super::nodes::{
    GenerateNode, PlannerNode, ReflectNode, ResearchCritiqueNode, ResearchPlanNode,
};

pub mod steps {
    pub const PLANNER: &str = "planner";
    pub const RESEARCH_PLAN: &str = "research_plan";
    pub const GENERATE: &str = "generate";
    pub const REFLECT: &str = "reflect";
    pub const RESEARCH_CRITIQUE: &str = "research_critique";

    /// Execution order of a single pass.
    pub const ALL: [&str; 5] = [PLANNER, RESEARCH_PLAN, GENERATE, REFLECT, RESEARCH_CRITIQUE];
}

/// Stop once generation has run past the revision limit.
pub fn should_finish(state: &EssayState) -> bool {
    state.revisions_exhausted()
}

/// Builds the five-step essay app around the given providers.
pub fn build_app(
    model: Arc<dyn LanguageModel>,
    search: Arc<dyn SearchProvider>,
) -> Result<App, GraphError> {
    let done: EdgePredicate = Arc::new(should_finish);
    GraphBuilder::new()
        .add_node(NodeKind::named(steps::PLANNER), PlannerNode::new(model.clone()))
        .add_node(
            NodeKind::named(steps::RESEARCH_PLAN),
            ResearchPlanNode::new(model.clone(), search.clone()),
        )
        .add_node(NodeKind::named(steps::GENERATE), GenerateNode::new(model.clone()))
        .add_node(NodeKind::named(steps::REFLECT), ReflectNode::new(model.clone()))
        .add_node(
            NodeKind::named(steps::RESEARCH_CRITIQUE),
            ResearchCritiqueNode::new(model, search),
        )
        .set_entry(NodeKind::named(steps::PLANNER))
        .add_edge(
            NodeKind::named(steps::PLANNER),
            NodeKind::named(steps::RESEARCH_PLAN),
        )
        .add_edge(
            NodeKind::named(steps::RESEARCH_PLAN),
            NodeKind::named(steps::GENERATE),
        )
        .add_conditional_edge(
            NodeKind::named(steps::GENERATE),
            NodeKind::End,
            NodeKind::named(steps::REFLECT),
            done,
        )
        .add_edge(
            NodeKind::named(steps::REFLECT),
            NodeKind::named(steps::RESEARCH_CRITIQUE),
        )
        .add_edge(
            NodeKind::named(steps::RESEARCH_CRITIQUE),
            NodeKind::named(steps::GENERATE),
        )
        .compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::{ScriptedModel, StaticSearch};

    fn app() -> App {
        build_app(
            Arc::new(ScriptedModel::repeating("x")),
            Arc::new(StaticSearch::new()),
        )
        .unwrap()
    }

    #[test]
    fn registers_the_five_steps() {
        let mut expected: Vec<String> = steps::ALL.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(app().node_names(), expected);
    }

    #[test]
    fn generate_routes_on_revision_limit() {
        let app = app();
        let generate = [NodeKind::named(steps::GENERATE)];
        let mut state = EssayState::new("t", 1);
        state.revision_number = 1;
        assert_eq!(
            app.next_frontier(&generate, &state),
            vec![NodeKind::named(steps::REFLECT)]
        );
        state.revision_number = 2;
        assert!(app.next_frontier(&generate, &state).is_empty());
    }

    #[test]
    fn critique_research_loops_back_to_generate() {
        let app = app();
        let state = EssayState::new("t", 1);
        assert_eq!(
            app.next_frontier(&[NodeKind::named(steps::RESEARCH_CRITIQUE)], &state),
            vec![NodeKind::named(steps::GENERATE)]
        );
        assert_eq!(app.entry_frontier(), vec![NodeKind::named(steps::PLANNER)]);
    }
}
