use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::application::{RepoResult, RepositoryError, WatchRepository};
use crate::domain::{Digest, NewWatch, Watch, WatchId, WatchPatch};

const SELECT_WATCH: &str = r#"
    SELECT id, url, interval_secs, active, last_digest,
           last_checked_at, last_changed_at, consecutive_failures, created_at
    FROM watches
"#;

type WatchRow = (
    i64,
    String,
    i64,
    bool,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    String,
);

pub struct SqliteWatchRepository {
    pool: SqlitePool,
}

impl SqliteWatchRepository {
    /// db_url examples
    /// - "sqlite:pagewatch.db"
    /// - "sqlite:/data/pagewatch.db" (docker volume)
    /// - "sqlite::memory:" (tests; a single connection keeps the database alive)
    pub async fn new(db_url: &str) -> RepoResult<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(storage_err)?
            .create_if_missing(true);

        let in_memory = db_url.contains(":memory:");
        let mut pool = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            pool = pool.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool.connect_with(options).await.map_err(storage_err)?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> RepoResult<()> {
        // AUTOINCREMENT: ids of deleted watches are never handed out again.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS watches (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              url TEXT NOT NULL,
              interval_secs INTEGER NOT NULL,
              active INTEGER NOT NULL DEFAULT 0,
              last_digest TEXT,
              last_checked_at TEXT,
              last_changed_at TEXT,
              consecutive_failures INTEGER NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }
}

#[async_trait]
impl WatchRepository for SqliteWatchRepository {
    async fn create(&self, new: NewWatch) -> RepoResult<WatchId> {
        let result = sqlx::query(
            "INSERT INTO watches(url, interval_secs, active, consecutive_failures, created_at) \
             VALUES (?, ?, 0, 0, ?)",
        )
        .bind(&new.url)
        .bind(to_i64(new.interval_secs))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(WatchId::new(result.last_insert_rowid()))
    }

    async fn get(&self, id: WatchId) -> RepoResult<Option<Watch>> {
        let row: Option<WatchRow> = sqlx::query_as(&format!("{SELECT_WATCH} WHERE id = ?"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(watch_from_row).transpose()
    }

    async fn list(&self) -> RepoResult<Vec<Watch>> {
        let rows: Vec<WatchRow> = sqlx::query_as(&format!("{SELECT_WATCH} ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        rows.into_iter().map(watch_from_row).collect()
    }

    async fn update_fields(&self, id: WatchId, patch: &WatchPatch) -> RepoResult<bool> {
        if patch.is_empty() {
            return Ok(self.get(id).await?.is_some());
        }

        // One UPDATE naming only the supplied columns.
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE watches SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(secs) = patch.interval_secs {
                set.push("interval_secs = ").push_bind_unseparated(to_i64(secs));
            }
            if let Some(digest) = patch.last_digest {
                set.push("last_digest = ").push_bind_unseparated(digest.to_string());
            }
            if let Some(t) = patch.last_checked_at {
                set.push("last_checked_at = ").push_bind_unseparated(t.to_rfc3339());
            }
            if let Some(t) = patch.last_changed_at {
                set.push("last_changed_at = ").push_bind_unseparated(t.to_rfc3339());
            }
            if let Some(n) = patch.consecutive_failures {
                set.push("consecutive_failures = ").push_bind_unseparated(i64::from(n));
            }
        }
        qb.push(" WHERE id = ").push_bind(id.get());

        let result = qb.build().execute(&self.pool).await.map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: WatchId) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM watches WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_active(&self, id: WatchId, active: bool) -> RepoResult<bool> {
        let result = sqlx::query("UPDATE watches SET active = ? WHERE id = ?")
            .bind(active)
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(result.rows_affected() > 0)
    }
}

fn watch_from_row(row: WatchRow) -> RepoResult<Watch> {
    let (id, url, interval_secs, active, digest, checked, changed, failures, created) = row;
    Ok(Watch {
        id: WatchId::new(id),
        url,
        interval_secs: u64::try_from(interval_secs).unwrap_or(0),
        active,
        last_digest: digest
            .map(|d| Digest::from_str(&d))
            .transpose()
            .map_err(|e| RepositoryError::Io(e.to_string()))?,
        last_checked_at: checked.as_deref().map(parse_time).transpose()?,
        last_changed_at: changed.as_deref().map(parse_time).transpose()?,
        consecutive_failures: u32::try_from(failures).unwrap_or(u32::MAX),
        created_at: parse_time(&created)?,
    })
}

fn parse_time(raw: &str) -> RepoResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Io(format!("bad timestamp {raw:?}: {e}")))
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn storage_err(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.message().to_string())
        }
        _ => RepositoryError::Io(e.to_string()),
    }
}
