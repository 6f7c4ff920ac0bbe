use super::Reducer;
use crate::{node::NodePartial, state::EssayState};

/// Keeps `revision_number` from ever going backwards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MonotonicMax;

impl Reducer for MonotonicMax {
    fn apply(&self, state: &mut EssayState, update: &NodePartial) {
        if let Some(rev) = update.revision_number {
            state.revision_number = state.revision_number.max(rev);
        }
    }
}
