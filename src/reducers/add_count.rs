use super::Reducer;
use crate::{node::NodePartial, state::EssayState};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AddCount;

impl Reducer for AddCount {
    fn apply(&self, state: &mut EssayState, update: &NodePartial) {
        if let Some(n) = update.count {
            state.count = state.count.saturating_add(n);
        }
    }
}
