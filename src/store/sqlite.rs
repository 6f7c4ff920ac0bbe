/*!
SQLite essay store.

Shares the database (and usually the pool) with `SQLiteCheckpointer`; the
`essays` and `user_preferences` tables come from the same migrations.
Timestamps are stored as fixed-width RFC 3339 text so `ORDER BY` on them
is chronological.
*/

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use super::{
    EssayProgress, EssayRecord, EssaySort, EssayStatus, EssayStore, Result, StoreError,
    UserPreferences, essay_title, now, timestamp,
};
use crate::db;

const ESSAY_COLUMNS: &str = r#"
    SELECT id, user_id, session_id, title, topic, plan, draft, critique,
           final_essay, status, revision_number, word_count,
           created_at, updated_at, completed_at
    FROM essays
"#;

#[derive(Clone)]
pub struct SqliteEssayStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteEssayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEssayStore").finish()
    }
}

impl SqliteEssayStore {
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str) -> Result<Self> {
        Ok(Self::from_pool(db::connect_pool(database_url).await?))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_time(value: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt {
                message: format!("bad timestamp `{value}`: {e}"),
            })
    }

    fn row_to_record(row: &SqliteRow) -> Result<EssayRecord> {
        let status: String = row.try_get("status")?;
        let revision: i64 = row.try_get("revision_number")?;
        let words: i64 = row.try_get("word_count")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        let completed_at: Option<String> = row.try_get("completed_at")?;
        Ok(EssayRecord {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            session_id: row.try_get("session_id")?,
            title: row.try_get("title")?,
            topic: row.try_get("topic")?,
            plan: row.try_get::<Option<String>, _>("plan")?.unwrap_or_default(),
            draft: row.try_get::<Option<String>, _>("draft")?.unwrap_or_default(),
            critique: row
                .try_get::<Option<String>, _>("critique")?
                .unwrap_or_default(),
            final_essay: row.try_get("final_essay")?,
            status: status.parse::<EssayStatus>()?,
            revision_number: u32::try_from(revision).map_err(|_| StoreError::Corrupt {
                message: format!("revision_number {revision} out of range"),
            })?,
            word_count: u64::try_from(words).map_err(|_| StoreError::Corrupt {
                message: format!("word_count {words} out of range"),
            })?,
            created_at: Self::parse_time(&created_at)?,
            updated_at: Self::parse_time(&updated_at)?,
            completed_at: completed_at.as_deref().map(Self::parse_time).transpose()?,
        })
    }
}

#[async_trait]
impl EssayStore for SqliteEssayStore {
    #[instrument(skip(self, topic), err)]
    async fn create_essay(
        &self,
        user_id: i64,
        topic: &str,
        session_id: Option<&str>,
    ) -> Result<EssayRecord> {
        let created = timestamp(now());
        let result = sqlx::query(
            r#"
            INSERT INTO essays (user_id, session_id, title, topic, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'draft', ?5, ?5)
            "#,
        )
        .bind(user_id)
        .bind(session_id)
        .bind(essay_title(topic))
        .bind(topic)
        .bind(&created)
        .execute(&self.pool)
        .await?;
        self.get_essay(result.last_insert_rowid()).await
    }

    async fn get_essay(&self, id: i64) -> Result<EssayRecord> {
        let row = sqlx::query(&format!("{ESSAY_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { id })?;
        Self::row_to_record(&row)
    }

    async fn attach_session(&self, id: i64, session_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE essays SET session_id = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(session_id)
            .bind(timestamp(now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self, progress), fields(completed = progress.completed), err)]
    async fn record_progress(&self, id: i64, progress: &EssayProgress) -> Result<EssayRecord> {
        let mut record = self.get_essay(id).await?;
        record.apply(progress, now());
        sqlx::query(
            r#"
            UPDATE essays SET
                plan = ?1, draft = ?2, critique = ?3, final_essay = ?4, status = ?5,
                revision_number = ?6, word_count = ?7, updated_at = ?8, completed_at = ?9
            WHERE id = ?10
            "#,
        )
        .bind(&record.plan)
        .bind(&record.draft)
        .bind(&record.critique)
        .bind(&record.final_essay)
        .bind(record.status.as_str())
        .bind(i64::from(record.revision_number))
        .bind(record.word_count as i64)
        .bind(timestamp(record.updated_at))
        .bind(record.completed_at.map(timestamp))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_essays(&self, user_id: i64, sort: EssaySort) -> Result<Vec<EssayRecord>> {
        let order = match sort {
            EssaySort::Updated => "updated_at",
            EssaySort::Created => "created_at",
        };
        let rows = sqlx::query(&format!(
            "{ESSAY_COLUMNS} WHERE user_id = ?1 ORDER BY {order} DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    #[instrument(skip(self), err)]
    async fn delete_essay(&self, user_id: i64, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM essays WHERE id = ?1 AND user_id = ?2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { id });
        }
        Ok(())
    }

    async fn get_preferences(&self, user_id: i64) -> Result<UserPreferences> {
        let row = sqlx::query(
            r#"
            SELECT default_max_revisions, preferred_model, default_interrupt_after, updated_at
            FROM user_preferences WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(UserPreferences::defaults(user_id));
        };

        let max: i64 = row.try_get("default_max_revisions")?;
        let interrupt_json: String = row.try_get("default_interrupt_after")?;
        let updated_at: String = row.try_get("updated_at")?;
        Ok(UserPreferences {
            user_id,
            default_max_revisions: u32::try_from(max).map_err(|_| StoreError::Corrupt {
                message: format!("default_max_revisions {max} out of range"),
            })?,
            preferred_model: row.try_get("preferred_model")?,
            default_interrupt_after: serde_json::from_str(&interrupt_json).map_err(|e| {
                StoreError::Corrupt {
                    message: format!("default_interrupt_after parse: {e}"),
                }
            })?,
            updated_at: Self::parse_time(&updated_at)?,
        })
    }

    #[instrument(skip(self, prefs), fields(user_id = prefs.user_id), err)]
    async fn save_preferences(&self, prefs: &UserPreferences) -> Result<()> {
        let interrupt_json =
            serde_json::to_string(&prefs.default_interrupt_after).map_err(|e| {
                StoreError::Corrupt {
                    message: format!("default_interrupt_after serialize: {e}"),
                }
            })?;
        sqlx::query(
            r#"
            INSERT INTO user_preferences
                (user_id, default_max_revisions, preferred_model, default_interrupt_after, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id) DO UPDATE SET
                default_max_revisions = excluded.default_max_revisions,
                preferred_model = excluded.preferred_model,
                default_interrupt_after = excluded.default_interrupt_after,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(prefs.user_id)
        .bind(i64::from(prefs.default_max_revisions))
        .bind(&prefs.preferred_model)
        .bind(interrupt_json)
        .bind(timestamp(now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
