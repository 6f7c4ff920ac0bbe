use super::Reducer;
use crate::{node::NodePartial, state::EssayState, state::StateField};

/// Last-writer-wins for a single text or list field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Overwrite(pub StateField);

impl Reducer for Overwrite {
    fn apply(&self, state: &mut EssayState, update: &NodePartial) {
        match self.0 {
            StateField::Lnode => {
                if let Some(v) = &update.lnode {
                    state.lnode.clone_from(v);
                }
            }
            StateField::Plan => {
                if let Some(v) = &update.plan {
                    state.plan.clone_from(v);
                }
            }
            StateField::Draft => {
                if let Some(v) = &update.draft {
                    state.draft.clone_from(v);
                }
            }
            StateField::Critique => {
                if let Some(v) = &update.critique {
                    state.critique.clone_from(v);
                }
            }
            StateField::Queries => {
                if let Some(v) = &update.queries {
                    state.queries.clone_from(v);
                }
            }
            // Not carried by partials.
            StateField::Task
            | StateField::Content
            | StateField::RevisionNumber
            | StateField::MaxRevisions
            | StateField::Count => {}
        }
    }
}
