use std::sync::RwLock;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use super::{
    EssayProgress, EssayRecord, EssaySort, EssayStatus, EssayStore, Result, StoreError,
    UserPreferences, essay_title, now,
};

#[derive(Default)]
struct Inner {
    last_id: i64,
    essays: FxHashMap<i64, EssayRecord>,
    preferences: FxHashMap<i64, UserPreferences>,
}

/// Process-local essay store for tests and `memory` runs.
#[derive(Default)]
pub struct InMemoryEssayStore {
    inner: RwLock<Inner>,
}

impl InMemoryEssayStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Database {
        message: format!("lock poisoned: {e}"),
    }
}

#[async_trait]
impl EssayStore for InMemoryEssayStore {
    async fn create_essay(
        &self,
        user_id: i64,
        topic: &str,
        session_id: Option<&str>,
    ) -> Result<EssayRecord> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.last_id += 1;
        let created = now();
        let record = EssayRecord {
            id: inner.last_id,
            user_id,
            session_id: session_id.map(str::to_string),
            title: essay_title(topic),
            topic: topic.to_string(),
            plan: String::new(),
            draft: String::new(),
            critique: String::new(),
            final_essay: None,
            status: EssayStatus::Draft,
            revision_number: 0,
            word_count: 0,
            created_at: created,
            updated_at: created,
            completed_at: None,
        };
        inner.essays.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_essay(&self, id: i64) -> Result<EssayRecord> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner
            .essays
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }

    async fn attach_session(&self, id: i64, session_id: &str) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let record = inner
            .essays
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;
        record.session_id = Some(session_id.to_string());
        record.updated_at = now();
        Ok(())
    }

    async fn record_progress(&self, id: i64, progress: &EssayProgress) -> Result<EssayRecord> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let record = inner
            .essays
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;
        record.apply(progress, now());
        Ok(record.clone())
    }

    async fn list_essays(&self, user_id: i64, sort: EssaySort) -> Result<Vec<EssayRecord>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut essays: Vec<EssayRecord> = inner
            .essays
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        match sort {
            EssaySort::Updated => essays.sort_by(|a, b| {
                b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id))
            }),
            EssaySort::Created => essays.sort_by(|a, b| {
                b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))
            }),
        }
        Ok(essays)
    }

    async fn delete_essay(&self, user_id: i64, id: i64) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        match inner.essays.get(&id) {
            Some(record) if record.user_id == user_id => {
                inner.essays.remove(&id);
                Ok(())
            }
            _ => Err(StoreError::NotFound { id }),
        }
    }

    async fn get_preferences(&self, user_id: i64) -> Result<UserPreferences> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .preferences
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| UserPreferences::defaults(user_id)))
    }

    async fn save_preferences(&self, prefs: &UserPreferences) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let mut prefs = prefs.clone();
        prefs.updated_at = now();
        inner.preferences.insert(prefs.user_id, prefs);
        Ok(())
    }
}
