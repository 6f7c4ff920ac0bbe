use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::app::App;
use crate::node::Node;
use crate::reducers::ReducerRegistry;
use crate::state::EssayState;
use crate::types::NodeKind;

/// Routing decision evaluated against the state after the source node ran.
pub type EdgePredicate = Arc<dyn Fn(&EssayState) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct ConditionalEdge {
    pub from: NodeKind,
    pub yes: NodeKind,
    pub no: NodeKind,
    pub predicate: EdgePredicate,
}

impl ConditionalEdge {
    pub fn route(&self, state: &EssayState) -> &NodeKind {
        if (self.predicate)(state) {
            &self.yes
        } else {
            &self.no
        }
    }
}

impl std::fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("from", &self.from)
            .field("yes", &self.yes)
            .field("no", &self.no)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum GraphError {
    #[error("graph has no entry node")]
    #[diagnostic(
        code(essay_graph::graph::missing_entry),
        help("Call GraphBuilder::set_entry with the first step.")
    )]
    MissingEntry,

    #[error("edge {from} -> {to} references an unregistered node")]
    #[diagnostic(
        code(essay_graph::graph::unknown_node),
        help("Register every edge endpoint with add_node before compiling.")
    )]
    UnknownNode { from: String, to: String },
}

pub struct GraphBuilder {
    pub nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    pub edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    pub conditional_edges: Vec<ConditionalEdge>,
    pub entry: Option<NodeKind>,
    pub reducers: ReducerRegistry,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: FxHashMap::default(),
            edges: FxHashMap::default(),
            conditional_edges: Vec::new(),
            entry: None,
            reducers: ReducerRegistry::default(),
        }
    }

    pub fn add_node(mut self, id: NodeKind, node: impl Node + 'static) -> Self {
        self.nodes.insert(id, Arc::new(node));
        self
    }

    pub fn add_edge(mut self, from: NodeKind, to: NodeKind) -> Self {
        let dests = self.edges.entry(from).or_default();
        if !dests.contains(&to) {
            dests.push(to);
        }
        self
    }

    pub fn add_conditional_edge(
        mut self,
        from: NodeKind,
        yes: NodeKind,
        no: NodeKind,
        predicate: EdgePredicate,
    ) -> Self {
        self.conditional_edges.push(ConditionalEdge {
            from,
            yes,
            no,
            predicate,
        });
        self
    }

    /// Marks the first step and wires it from `Start`.
    pub fn set_entry(mut self, entry: NodeKind) -> Self {
        self = self.add_edge(NodeKind::Start, entry.clone());
        self.entry = Some(entry);
        self
    }

    pub fn compile(self) -> Result<App, GraphError> {
        if self.entry.is_none() {
            return Err(GraphError::MissingEntry);
        }
        let known = |k: &NodeKind| k.is_virtual() || self.nodes.contains_key(k);
        for (from, dests) in &self.edges {
            for to in dests {
                if !known(from) || !known(to) {
                    return Err(GraphError::UnknownNode {
                        from: from.to_string(),
                        to: to.to_string(),
                    });
                }
            }
        }
        for ce in &self.conditional_edges {
            for to in [&ce.yes, &ce.no] {
                if !known(&ce.from) || !known(to) {
                    return Err(GraphError::UnknownNode {
                        from: ce.from.to_string(),
                        to: to.to_string(),
                    });
                }
            }
        }
        Ok(App::from_parts(
            self.nodes,
            self.edges,
            self.conditional_edges,
            self.reducers,
        ))
    }
}
