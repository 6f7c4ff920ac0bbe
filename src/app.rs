use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::graph::ConditionalEdge;
use crate::node::{Node, NodePartial};
use crate::reducers::{ReducerError, ReducerRegistry};
use crate::state::{EssayState, StateField};
use crate::types::NodeKind;

/// A compiled workflow graph. Built by [`crate::graph::GraphBuilder::compile`].
pub struct App {
    nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    conditional_edges: Vec<ConditionalEdge>,
    reducers: ReducerRegistry,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("nodes", &self.node_names())
            .field("edges", &self.edges)
            .field("conditional_edges", &self.conditional_edges)
            .finish_non_exhaustive()
    }
}

impl App {
    pub(crate) fn from_parts(
        nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
        edges: FxHashMap<NodeKind, Vec<NodeKind>>,
        conditional_edges: Vec<ConditionalEdge>,
        reducers: ReducerRegistry,
    ) -> Self {
        Self {
            nodes,
            edges,
            conditional_edges,
            reducers,
        }
    }

    pub fn nodes(&self) -> &FxHashMap<NodeKind, Arc<dyn Node>> {
        &self.nodes
    }

    pub fn edges(&self) -> &FxHashMap<NodeKind, Vec<NodeKind>> {
        &self.edges
    }

    pub fn conditional_edges(&self) -> &[ConditionalEdge] {
        &self.conditional_edges
    }

    pub fn node(&self, kind: &NodeKind) -> Option<Arc<dyn Node>> {
        self.nodes.get(kind).cloned()
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(&NodeKind::named(name))
    }

    /// Registered step names, sorted.
    pub fn node_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .nodes
            .keys()
            .filter(|k| !k.is_virtual())
            .map(|k| k.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Steps scheduled when a session starts.
    pub fn entry_frontier(&self) -> Vec<NodeKind> {
        self.edges
            .get(&NodeKind::Start)
            .map(|dests| dests.iter().filter(|d| !d.is_end()).cloned().collect())
            .unwrap_or_default()
    }

    /// Merges node partials into `state` in run order.
    ///
    /// Returns the fields that changed, deduplicated, in declaration order.
    pub fn apply_barrier(
        &self,
        state: &mut EssayState,
        run_ids: &[NodeKind],
        node_partials: Vec<NodePartial>,
    ) -> Result<Vec<StateField>, ReducerError> {
        let mut updated: Vec<StateField> = Vec::new();
        for (id, partial) in run_ids.iter().zip(node_partials) {
            let changed = self.reducers.apply_all(state, &partial)?;
            debug!(node = %id, ?changed, "merged partial");
            for field in changed {
                if !updated.contains(&field) {
                    updated.push(field);
                }
            }
        }
        updated.sort();
        Ok(updated)
    }

    /// Next steps after `ran`, evaluated against the merged state.
    ///
    /// `End` is dropped, so an empty result means the workflow is finished.
    pub fn next_frontier(&self, ran: &[NodeKind], state: &EssayState) -> Vec<NodeKind> {
        let mut next: Vec<NodeKind> = Vec::new();
        let mut push = |d: &NodeKind| {
            if !d.is_end() && !next.contains(d) {
                next.push(d.clone());
            }
        };
        for id in ran {
            if let Some(dests) = self.edges.get(id) {
                dests.iter().for_each(&mut push);
            }
            for ce in self.conditional_edges.iter().filter(|ce| &ce.from == id) {
                let target = ce.route(state);
                debug!(from = %ce.from, to = %target, "conditional edge routed");
                push(target);
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgePredicate, GraphBuilder};
    use crate::node::{NodeContext, NodeError};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Node for Noop {
        async fn run(&self, _: EssayState, _: NodeContext) -> Result<NodePartial, NodeError> {
            Ok(NodePartial::default())
        }
    }

    fn looped_app() -> App {
        let done: EdgePredicate = Arc::new(|s: &EssayState| s.revisions_exhausted());
        GraphBuilder::new()
            .add_node(NodeKind::named("write"), Noop)
            .add_node(NodeKind::named("review"), Noop)
            .add_conditional_edge(
                NodeKind::named("write"),
                NodeKind::End,
                NodeKind::named("review"),
                done,
            )
            .add_edge(NodeKind::named("review"), NodeKind::named("write"))
            .set_entry(NodeKind::named("write"))
            .compile()
            .unwrap()
    }

    #[test]
    fn entry_frontier_follows_start_edges() {
        let app = looped_app();
        assert_eq!(app.entry_frontier(), vec![NodeKind::named("write")]);
        assert_eq!(app.node_names(), vec!["review", "write"]);
        assert!(app.has_node("review"));
        assert!(!app.has_node("__end__"));
    }

    #[test]
    fn debug_lists_step_names() {
        let rendered = format!("{:?}", looped_app());
        assert!(rendered.starts_with("App {"));
        assert!(rendered.contains(r#"nodes: ["review", "write"]"#));
        assert!(rendered.contains("ConditionalEdge"));
    }

    #[test]
    fn next_frontier_routes_and_drops_end() {
        let app = looped_app();
        let mut state = EssayState::new("t", 1);
        let write = [NodeKind::named("write")];
        assert_eq!(app.next_frontier(&write, &state), vec![NodeKind::named("review")]);
        state.revision_number = 2;
        assert!(app.next_frontier(&write, &state).is_empty());
        assert_eq!(
            app.next_frontier(&[NodeKind::named("review")], &state),
            vec![NodeKind::named("write")]
        );
    }

    #[test]
    fn apply_barrier_merges_in_order() {
        let app = looped_app();
        let mut state = EssayState::new("t", 1);
        let updated = app
            .apply_barrier(
                &mut state,
                &[NodeKind::named("write")],
                vec![NodePartial::for_step("write").with_draft("d").with_revision(1)],
            )
            .unwrap();
        assert_eq!(
            updated,
            vec![
                StateField::Lnode,
                StateField::Draft,
                StateField::RevisionNumber,
                StateField::Count
            ]
        );
        assert_eq!(state.draft, "d");
        assert_eq!(state.count, 1);
    }
}
