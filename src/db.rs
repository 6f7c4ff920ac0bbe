//! Shared SQLite pool setup for the checkpointer and the essay store.

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::instrument;

/// Opens (creating if needed) the database at `database_url`.
///
/// In-memory URLs get a single long-lived connection so every query sees the
/// same database.
#[instrument(err)]
pub async fn connect_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = if is_memory_url(database_url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?
    };
    run_migrations(&pool).await?;
    Ok(pool)
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

#[cfg(feature = "sqlite-migrations")]
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

#[cfg(not(feature = "sqlite-migrations"))]
async fn run_migrations(_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Schema is managed externally.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_memory_urls() {
        assert!(is_memory_url("sqlite::memory:"));
        assert!(is_memory_url("sqlite://file:x?mode=memory&cache=shared"));
        assert!(!is_memory_url("sqlite://essay_writer.db"));
    }

    #[tokio::test]
    async fn memory_pool_runs_migrations() {
        let pool = connect_pool("sqlite::memory:").await.unwrap();
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('sessions', 'checkpoints', 'essays', 'user_preferences')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(n, 4);
    }
}
