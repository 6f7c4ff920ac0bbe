use super::*;
use crate::{
    node::NodePartial,
    state::{EssayState, StateField},
};

fn base_state() -> EssayState {
    let mut s = EssayState::new("topic", 2);
    s.content = vec!["first".into()];
    s.revision_number = 2;
    s.count = 3;
    s
}

#[test]
fn append_content_extends_in_order() {
    let mut state = base_state();
    let partial = NodePartial::default().with_content(vec!["second".into(), "third".into()]);
    AppendContent.apply(&mut state, &partial);
    assert_eq!(state.content, vec!["first", "second", "third"]);
}

#[test]
fn add_count_accumulates() {
    let mut state = base_state();
    AddCount.apply(&mut state, &NodePartial::for_step("planner"));
    assert_eq!(state.count, 4);
}

#[test]
fn monotonic_max_never_lowers_revision() {
    let mut state = base_state();
    MonotonicMax.apply(&mut state, &NodePartial::default().with_revision(1));
    assert_eq!(state.revision_number, 2);
    MonotonicMax.apply(&mut state, &NodePartial::default().with_revision(3));
    assert_eq!(state.revision_number, 3);
}

#[test]
fn overwrite_only_touches_its_field() {
    let mut state = base_state();
    let partial = NodePartial::default().with_plan("new plan").with_draft("d");
    Overwrite(StateField::Plan).apply(&mut state, &partial);
    assert_eq!(state.plan, "new plan");
    assert!(state.draft.is_empty());
}

#[test]
fn registry_reports_changed_fields() {
    let registry = ReducerRegistry::default();
    let mut state = base_state();
    let partial = NodePartial::for_step("generate")
        .with_draft("essay")
        .with_revision(3);
    let changed = registry.apply_all(&mut state, &partial).unwrap();
    assert_eq!(
        changed,
        vec![
            StateField::Lnode,
            StateField::Draft,
            StateField::RevisionNumber,
            StateField::Count
        ]
    );
    assert_eq!(state.lnode, "generate");
    assert_eq!(state.count, 4);
}

#[test]
fn registry_skips_empty_partials() {
    let registry = ReducerRegistry::default();
    let mut state = base_state();
    let before = state.clone();
    let changed = registry
        .apply_all(&mut state, &NodePartial::default().with_content(vec![]))
        .unwrap();
    assert!(changed.is_empty());
    assert_eq!(state, before);
}

#[test]
fn unchanged_overwrite_is_not_reported() {
    let registry = ReducerRegistry::default();
    let mut state = base_state();
    state.plan = "same".into();
    let changed = registry
        .apply_all(&mut state, &NodePartial::default().with_plan("same"))
        .unwrap();
    assert!(changed.is_empty());
}

#[test]
fn missing_reducer_is_an_error() {
    let registry = ReducerRegistry::empty();
    let mut state = base_state();
    let err = registry
        .apply_all(&mut state, &NodePartial::default().with_plan("p"))
        .unwrap_err();
    assert_eq!(
        err,
        ReducerError::NoReducer {
            field: StateField::Plan
        }
    );
}

#[test]
fn custom_registration_is_applied() {
    let registry =
        ReducerRegistry::empty().register(StateField::Content, ReducerType::AppendContent(AppendContent));
    let mut state = base_state();
    registry
        .try_update(
            StateField::Content,
            &mut state,
            &NodePartial::default().with_content(vec!["x".into()]),
        )
        .unwrap();
    assert_eq!(state.content.len(), 2);
}
