//! The essay workflow: prompts, step nodes, graph wiring and the service
//! that drives it.

pub mod nodes;
pub mod prompts;
pub mod service;
pub mod workflow;

pub use service::{EssayWriter, SessionOptions, StartedEssay, StepOutcome, WriterError};
pub use workflow::{build_app, should_finish, steps};
