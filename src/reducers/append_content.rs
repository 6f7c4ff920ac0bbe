use super::Reducer;
use crate::{node::NodePartial, state::EssayState};

/// Research snippets only ever grow.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AppendContent;

impl Reducer for AppendContent {
    fn apply(&self, state: &mut EssayState, update: &NodePartial) {
        if let Some(snippets) = &update.content {
            state.content.extend(snippets.iter().cloned());
        }
    }
}
