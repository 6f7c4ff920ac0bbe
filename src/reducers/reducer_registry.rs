use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::{
    node::NodePartial,
    reducers::{AddCount, AppendContent, MonotonicMax, Overwrite, Reducer},
    state::{EssayState, StateField},
};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReducerType {
    Overwrite(Overwrite),
    AppendContent(AppendContent),
    AddCount(AddCount),
    MonotonicMax(MonotonicMax),
}

impl ReducerType {
    pub fn apply(&self, state: &mut EssayState, update: &NodePartial) {
        match self {
            ReducerType::Overwrite(r) => r.apply(state, update),
            ReducerType::AppendContent(r) => r.apply(state, update),
            ReducerType::AddCount(r) => r.apply(state, update),
            ReducerType::MonotonicMax(r) => r.apply(state, update),
        }
    }
}

#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum ReducerError {
    #[error("no reducer registered for state field `{field}`")]
    #[diagnostic(
        code(essay_graph::reducers::missing),
        help("Register a reducer for the field in ReducerRegistry::default().")
    )]
    NoReducer { field: StateField },
}

#[derive(Clone)]
pub struct ReducerRegistry {
    reducer_map: FxHashMap<StateField, Vec<ReducerType>>,
}

/// Whether the partial carries data for `field`. Lets the registry skip
/// reducers with nothing to do.
fn field_guard(field: StateField, partial: &NodePartial) -> bool {
    match field {
        StateField::Lnode => partial.lnode.is_some(),
        StateField::Plan => partial.plan.is_some(),
        StateField::Draft => partial.draft.is_some(),
        StateField::Critique => partial.critique.is_some(),
        StateField::Content => partial.content.as_ref().is_some_and(|v| !v.is_empty()),
        StateField::Queries => partial.queries.is_some(),
        StateField::RevisionNumber => partial.revision_number.is_some(),
        StateField::Count => partial.count.is_some_and(|n| n > 0),
        StateField::Task | StateField::MaxRevisions => false,
    }
}

impl Default for ReducerRegistry {
    fn default() -> Self {
        let mut reducer_map: FxHashMap<StateField, Vec<ReducerType>> = FxHashMap::default();

        for field in [
            StateField::Lnode,
            StateField::Plan,
            StateField::Draft,
            StateField::Critique,
            StateField::Queries,
        ] {
            reducer_map.insert(field, vec![ReducerType::Overwrite(Overwrite(field))]);
        }
        reducer_map.insert(
            StateField::Content,
            vec![ReducerType::AppendContent(AppendContent)],
        );
        reducer_map.insert(StateField::Count, vec![ReducerType::AddCount(AddCount)]);
        reducer_map.insert(
            StateField::RevisionNumber,
            vec![ReducerType::MonotonicMax(MonotonicMax)],
        );

        ReducerRegistry { reducer_map }
    }
}

impl ReducerRegistry {
    /// Empty registry; every field with data in a partial will fail to merge.
    pub fn empty() -> Self {
        Self {
            reducer_map: FxHashMap::default(),
        }
    }

    pub fn register(mut self, field: StateField, reducer: ReducerType) -> Self {
        self.reducer_map.entry(field).or_default().push(reducer);
        self
    }

    /// Applies the reducers for one field. Returns whether anything ran.
    pub fn try_update(
        &self,
        field: StateField,
        state: &mut EssayState,
        to_update: &NodePartial,
    ) -> Result<bool, ReducerError> {
        if !field_guard(field, to_update) {
            return Ok(false);
        }

        let reducers = self
            .reducer_map
            .get(&field)
            .ok_or(ReducerError::NoReducer { field })?;
        for r in reducers {
            r.apply(state, to_update);
        }
        Ok(true)
    }

    /// Merges a partial into the state and returns the fields that changed,
    /// in `StateField::ALL` order.
    pub fn apply_all(
        &self,
        state: &mut EssayState,
        update: &NodePartial,
    ) -> Result<Vec<StateField>, ReducerError> {
        let mut changed = Vec::new();
        for field in StateField::ALL {
            let before = state.get(field);
            if self.try_update(field, state, update)? && state.get(field) != before {
                changed.push(field);
            }
        }
        Ok(changed)
    }
}
