use std::time::Duration;

use super::*;

async fn sqlite_store() -> SqliteEssayStore {
    SqliteEssayStore::connect("sqlite::memory:").await.unwrap()
}

async fn tick() {
    tokio::time::sleep(Duration::from_millis(2)).await;
}

async fn create_and_fetch(store: &dyn EssayStore) {
    let record = store
        .create_essay(7, "The role of mycorrhizal networks in forest ecology", None)
        .await
        .unwrap();
    assert_eq!(record.user_id, 7);
    assert_eq!(record.status, EssayStatus::Draft);
    assert_eq!(
        record.title,
        "Essay: The role of mycorrhizal networks in forest ecology..."
    );
    assert!(record.session_id.is_none());

    store.attach_session(record.id, "essay-abc").await.unwrap();
    let fetched = store.get_essay(record.id).await.unwrap();
    assert_eq!(fetched.session_id.as_deref(), Some("essay-abc"));
    assert!(matches!(
        store.get_essay(9999).await,
        Err(StoreError::NotFound { id: 9999 })
    ));
}

async fn progress_moves_status(store: &dyn EssayStore) {
    let record = store.create_essay(1, "tea", Some("s1")).await.unwrap();
    let mut progress = EssayProgress {
        plan: "I. Origins".into(),
        draft: "Tea began in China.".into(),
        critique: String::new(),
        revision_number: 1,
        word_count: 4,
        completed: false,
    };
    let updated = store.record_progress(record.id, &progress).await.unwrap();
    assert_eq!(updated.status, EssayStatus::InProgress);
    assert!(updated.final_essay.is_none());
    assert_eq!(updated.revision_number, 1);

    progress.completed = true;
    progress.revision_number = 3;
    let done = store.record_progress(record.id, &progress).await.unwrap();
    assert!(done.is_completed());
    assert_eq!(done.final_essay.as_deref(), Some("Tea began in China."));
    assert!(done.completed_at.is_some());

    let reloaded = store.get_essay(record.id).await.unwrap();
    assert_eq!(reloaded, done);

    tick().await;
    progress.draft = "Tea began in southwest China.".into();
    let edited = store.record_progress(record.id, &progress).await.unwrap();
    assert_eq!(edited.completed_at, done.completed_at);
    assert!(edited.updated_at > done.updated_at);
    assert_eq!(
        edited.final_essay.as_deref(),
        Some("Tea began in southwest China.")
    );
}

async fn listing_is_newest_first(store: &dyn EssayStore) {
    let a = store.create_essay(3, "a", None).await.unwrap();
    tick().await;
    let b = store.create_essay(3, "b", None).await.unwrap();
    store.create_essay(4, "other user", None).await.unwrap();
    tick().await;
    store
        .record_progress(a.id, &EssayProgress::default())
        .await
        .unwrap();

    let by_updated: Vec<i64> = store
        .list_essays(3, EssaySort::Updated)
        .await
        .unwrap()
        .iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(by_updated, vec![a.id, b.id]);

    let by_created: Vec<i64> = store
        .list_essays(3, EssaySort::Created)
        .await
        .unwrap()
        .iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(by_created, vec![b.id, a.id]);
}

async fn delete_checks_owner(store: &dyn EssayStore) {
    let record = store.create_essay(5, "owned", None).await.unwrap();
    assert!(matches!(
        store.delete_essay(6, record.id).await,
        Err(StoreError::NotFound { .. })
    ));
    store.delete_essay(5, record.id).await.unwrap();
    assert!(store.list_essays(5, EssaySort::Updated).await.unwrap().is_empty());
}

async fn preferences_default_then_persist(store: &dyn EssayStore) {
    let prefs = store.get_preferences(42).await.unwrap();
    assert_eq!(prefs.default_max_revisions, DEFAULT_MAX_REVISIONS);
    assert_eq!(prefs.preferred_model, DEFAULT_MODEL);
    assert!(prefs.default_interrupt_after.is_empty());

    let custom = UserPreferences {
        default_max_revisions: 4,
        preferred_model: "llama3.1".into(),
        default_interrupt_after: vec!["planner".into(), "reflect".into()],
        ..prefs
    };
    store.save_preferences(&custom).await.unwrap();
    let loaded = store.get_preferences(42).await.unwrap();
    assert_eq!(loaded.default_max_revisions, 4);
    assert_eq!(loaded.preferred_model, "llama3.1");
    assert_eq!(loaded.default_interrupt_after, vec!["planner", "reflect"]);
}

#[tokio::test]
async fn memory_store_behaviour() {
    let store = InMemoryEssayStore::new();
    create_and_fetch(&store).await;
    progress_moves_status(&store).await;
    listing_is_newest_first(&store).await;
    delete_checks_owner(&store).await;
    preferences_default_then_persist(&store).await;
}

#[tokio::test]
async fn sqlite_store_behaviour() {
    let store = sqlite_store().await;
    create_and_fetch(&store).await;
    progress_moves_status(&store).await;
    listing_is_newest_first(&store).await;
    delete_checks_owner(&store).await;
    preferences_default_then_persist(&store).await;
}

#[tokio::test]
async fn sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("essays.db").display());
    let id = {
        let store = SqliteEssayStore::connect(&url).await.unwrap();
        store.create_essay(1, "persisted", None).await.unwrap().id
    };
    let store = SqliteEssayStore::connect(&url).await.unwrap();
    assert_eq!(store.get_essay(id).await.unwrap().topic, "persisted");
}

#[test]
fn title_truncates_by_characters() {
    assert_eq!(essay_title("short"), "Essay: short...");
    assert_eq!(
        essay_title("The role of mycorrhizal networks in forest ecology and soil"),
        "Essay: The role of mycorrhizal networks in forest ecology..."
    );
    let long = "é".repeat(60);
    assert_eq!(essay_title(&long), format!("Essay: {}...", "é".repeat(50)));
}

#[test]
fn status_and_sort_parse() {
    for s in [
        EssayStatus::Draft,
        EssayStatus::InProgress,
        EssayStatus::Completed,
    ] {
        assert_eq!(s.as_str().parse::<EssayStatus>().unwrap(), s);
    }
    assert!("archived".parse::<EssayStatus>().is_err());
    assert_eq!("created".parse::<EssaySort>(), Ok(EssaySort::Created));
    assert!("title".parse::<EssaySort>().is_err());
}

#[test]
fn progress_from_state_counts_words() {
    let mut state = EssayState::new("tea", 2);
    state.draft = "one two three".into();
    state.revision_number = 2;
    let progress = EssayProgress::from_state(&state, true);
    assert_eq!(progress.word_count, 3);
    assert_eq!(progress.revision_number, 2);
    assert!(progress.completed);
}
