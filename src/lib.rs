//! # essay-graph: checkpointed essay workflows
//!
//! essay-graph drives an LLM through a fixed essay-writing loop:
//!
//! ```text
//! planner -> research_plan -> generate -> reflect -> research_critique -> generate ...
//! ```
//!
//! The loop ends once `revision_number` exceeds `max_revisions`. Every step
//! is checkpointed, so a session can pause after chosen steps, be inspected
//! or edited, and resume later (even from another process when the SQLite
//! checkpointer is used).
//!
//! ## Core Concepts
//!
//! - **Nodes**: async steps that read an [`state::EssayState`] snapshot and
//!   return a [`node::NodePartial`]
//! - **Reducers**: per-field merge rules applied at the step barrier
//! - **Graph**: nodes, edges and conditional edges compiled into an [`app::App`]
//! - **Runner**: [`runtimes::AppRunner`] executes one step at a time, honours
//!   pause points and writes checkpoints
//! - **Service**: [`essay::EssayWriter`] wires the essay nodes, the runner
//!   and the essay store behind one lock
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use essay_graph::event_bus::{EventBus, MemorySink};
//! use essay_graph::graph::GraphBuilder;
//! use essay_graph::node::{Node, NodeContext, NodeError, NodePartial};
//! use essay_graph::runtimes::{AppRunner, InMemoryCheckpointer, RunStatus};
//! use essay_graph::state::EssayState;
//! use essay_graph::types::NodeKind;
//!
//! struct Outline;
//!
//! #[async_trait]
//! impl Node for Outline {
//!     async fn run(&self, state: EssayState, _ctx: NodeContext) -> Result<NodePartial, NodeError> {
//!         Ok(NodePartial::for_step("outline").with_plan(format!("I. {}", state.task)))
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> miette::Result<()> {
//! let app = GraphBuilder::new()
//!     .add_node(NodeKind::named("outline"), Outline)
//!     .set_entry(NodeKind::named("outline"))
//!     .add_edge(NodeKind::named("outline"), NodeKind::End)
//!     .compile()?;
//!
//! let mut runner = AppRunner::with_checkpointer(
//!     Arc::new(app),
//!     Arc::new(InMemoryCheckpointer::new()),
//!     EventBus::with_sink(MemorySink::new()),
//! );
//! runner.create_session("demo", EssayState::new("Tea", 0), &[]).await?;
//! let outcome = runner.run_until_pause("demo").await?;
//! assert_eq!(outcome.status, RunStatus::Finished);
//! assert_eq!(outcome.state.plan, "I. Tea");
//! assert_eq!(outcome.state.count, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Each layer has its own error enum deriving `thiserror::Error` and
//! `miette::Diagnostic`. Higher layers wrap lower ones transparently, so a
//! node failure reaches the CLI with its original code and help text.

pub mod app;
pub mod cli;
pub mod config;
pub mod db;
pub mod essay;
pub mod event_bus;
pub mod graph;
pub mod message;
pub mod node;
pub mod providers;
pub mod reducers;
pub mod runtimes;
pub mod state;
pub mod store;
pub mod types;
pub mod utils;
