/*!
SQLite Checkpointer

`SQLiteCheckpointer` implements `Checkpointer` on top of a `sqlx`
`SqlitePool`. Each checkpoint is one row in `checkpoints`. `sessions`
tracks the latest step of each session.

## Database Schema

- `sessions.id` ← `checkpoint.session_id`
- `sessions.last_step` / `last_checkpoint_id` ← latest saved checkpoint
- `checkpoints.state_json` ← serialized `EssayState`
- `checkpoints.frontier_json` / `interrupt_after_json` ← JSON arrays of
  encoded `NodeKind`
- `checkpoints.source` ← `input`, `step` or `update`
- `checkpoints.writer` ← encoded `NodeKind` or NULL

When the `sqlite-migrations` feature is enabled (default) the embedded
migrations run on connect.
*/

use std::sync::Arc;

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use crate::{
    db,
    runtimes::checkpointer::{Checkpoint, Checkpointer, CheckpointerError, Result},
    runtimes::persistence::{PersistedCheckpoint, encode_kinds},
    state::EssayState,
    types::NodeKind,
};

use super::checkpointer_sqlite_helpers::{backend, deserialize_json, serialize_json};

const SELECT_COLUMNS: &str = r#"
    SELECT session_id, checkpoint_id, step, source, writer,
           state_json, frontier_json, interrupt_after_json, created_at
    FROM checkpoints
"#;

pub struct SQLiteCheckpointer {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SQLiteCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SQLiteCheckpointer").finish()
    }
}

impl SQLiteCheckpointer {
    /// Connect (or create) a SQLite database, e.g. `sqlite://essay_writer.db`.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = db::connect_pool(database_url)
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("connect error: {e}"),
            })?;
        Ok(Self::from_pool(pool))
    }

    /// Reuses a pool that already has the schema applied.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_checkpoint(row: &SqliteRow) -> Result<Checkpoint> {
        let get_text = |col: &'static str| -> Result<String> {
            row.try_get::<String, _>(col)
                .map_err(|e| CheckpointerError::Backend {
                    message: format!("{col} read: {e}"),
                })
        };
        let step: i64 = row
            .try_get("step")
            .map_err(|e| CheckpointerError::Backend {
                message: format!("step read: {e}"),
            })?;
        let writer: Option<String> =
            row.try_get("writer")
                .map_err(|e| CheckpointerError::Backend {
                    message: format!("writer read: {e}"),
                })?;

        let state: EssayState = deserialize_json(&get_text("state_json")?, "state")?;
        let frontier: Vec<String> = deserialize_json(&get_text("frontier_json")?, "frontier")?;
        let interrupt_after: Vec<String> =
            deserialize_json(&get_text("interrupt_after_json")?, "interrupt_after")?;

        let persisted = PersistedCheckpoint {
            session_id: get_text("session_id")?,
            checkpoint_id: get_text("checkpoint_id")?,
            step: u64::try_from(step).map_err(|_| CheckpointerError::Other {
                message: format!("negative step {step}"),
            })?,
            state,
            frontier,
            interrupt_after,
            source: get_text("source")?,
            writer,
            created_at: get_text("created_at")?,
        };
        Checkpoint::try_from(persisted).map_err(|e| CheckpointerError::Other {
            message: format!("checkpoint convert: {e}"),
        })
    }
}

#[async_trait::async_trait]
impl Checkpointer for SQLiteCheckpointer {
    #[instrument(skip(self, checkpoint), fields(session = %checkpoint.session_id, step = checkpoint.step), err)]
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let state_json = serialize_json(&checkpoint.state, "state")?;
        let frontier_json = serialize_json(&encode_kinds(&checkpoint.frontier), "frontier")?;
        let interrupt_json =
            serialize_json(&encode_kinds(&checkpoint.interrupt_after), "interrupt_after")?;
        let writer = checkpoint.writer.as_ref().map(NodeKind::encode);
        let created_at = checkpoint.created_at.to_rfc3339();
        let step = checkpoint.step as i64;

        let mut tx = self.pool.begin().await.map_err(backend("tx begin"))?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, last_step, last_checkpoint_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(id) DO UPDATE SET
                last_step = MAX(sessions.last_step, excluded.last_step),
                last_checkpoint_id = CASE
                    WHEN excluded.last_step >= sessions.last_step THEN excluded.last_checkpoint_id
                    ELSE sessions.last_checkpoint_id
                END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&checkpoint.session_id)
        .bind(step)
        .bind(&checkpoint.checkpoint_id)
        .bind(&created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend("upsert session"))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO checkpoints (
                checkpoint_id, session_id, step, source, writer,
                state_json, frontier_json, interrupt_after_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&checkpoint.checkpoint_id)
        .bind(&checkpoint.session_id)
        .bind(step)
        .bind(checkpoint.source.as_str())
        .bind(writer)
        .bind(&state_json)
        .bind(&frontier_json)
        .bind(&interrupt_json)
        .bind(&created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend("insert checkpoint"))?;

        tx.commit().await.map_err(backend("tx commit"))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn load_latest(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let sql = format!("{SELECT_COLUMNS} WHERE session_id = ?1 ORDER BY step DESC LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(session_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(backend("select latest"))?;
        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    #[instrument(skip(self), err)]
    async fn history(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        let sql = format!("{SELECT_COLUMNS} WHERE session_id = ?1 ORDER BY step DESC");
        let rows = sqlx::query(&sql)
            .bind(session_id)
            .fetch_all(&*self.pool)
            .await
            .map_err(backend("select history"))?;
        rows.iter().map(Self::row_to_checkpoint).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtimes::checkpointer::CheckpointSource;
    use crate::runtimes::runner::SessionState;

    fn session(step: u64, plan: &str) -> SessionState {
        let mut state = EssayState::new("tea", 2);
        state.plan = plan.into();
        SessionState {
            state,
            step,
            frontier: vec![NodeKind::named("research_plan")],
            interrupt_after: vec![NodeKind::named("planner")],
        }
    }

    #[tokio::test]
    async fn save_load_and_history() {
        let cp = SQLiteCheckpointer::connect("sqlite::memory:").await.unwrap();
        for step in 0..3 {
            let c = Checkpoint::from_session(
                "s1",
                &session(step, &format!("plan {step}")),
                CheckpointSource::Step,
                Some(NodeKind::named("planner")),
            );
            cp.save(c).await.unwrap();
        }

        let latest = cp.load_latest("s1").await.unwrap().unwrap();
        assert_eq!(latest.step, 2);
        assert_eq!(latest.state.plan, "plan 2");
        assert_eq!(latest.writer, Some(NodeKind::named("planner")));
        assert_eq!(latest.interrupt_after, vec![NodeKind::named("planner")]);

        let steps: Vec<u64> = cp.history("s1").await.unwrap().iter().map(|c| c.step).collect();
        assert_eq!(steps, vec![2, 1, 0]);
        assert!(cp.load_latest("missing").await.unwrap().is_none());
        let (last_step,): (i64,) = sqlx::query_as("SELECT last_step FROM sessions WHERE id = 's1'")
            .fetch_one(cp.pool())
            .await
            .unwrap();
        assert_eq!(last_step, 2);
    }

    #[tokio::test]
    async fn resave_same_step_replaces_row() {
        let cp = SQLiteCheckpointer::connect("sqlite::memory:").await.unwrap();
        let a = Checkpoint::from_session("s1", &session(1, "a"), CheckpointSource::Step, None);
        let mut b = a.clone();
        b.state.plan = "b".into();
        cp.save(a).await.unwrap();
        cp.save(b).await.unwrap();
        let history = cp.history("s1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state.plan, "b");
    }

    #[tokio::test]
    async fn sessions_survive_reopening_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("cp.db").display());
        {
            let cp = SQLiteCheckpointer::connect(&url).await.unwrap();
            let c = Checkpoint::from_session("s1", &session(0, "p"), CheckpointSource::Input, None);
            cp.save(c).await.unwrap();
            cp.pool().close().await;
        }
        let reopened = SQLiteCheckpointer::connect(&url).await.unwrap();
        let latest = reopened.load_latest("s1").await.unwrap().unwrap();
        assert_eq!(latest.source, CheckpointSource::Input);
        assert_eq!(latest.state.plan, "p");
    }
}
