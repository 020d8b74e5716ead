//! libSQL storage layer for the fetch cache, robots.txt cache and run history.
//!
//! The [`Storage`] handle is shared by every row of a run. Reads may happen
//! concurrently; cache writes are upserts keyed by URL hash, so the last
//! writer wins.

mod migrations;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use linkintel_shared::{LinkIntelError, Result};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

/// A cached fetch outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFetch {
    pub url: String,
    /// Serialized `FetchStatus` (`success`, `partial`, ...).
    pub status: String,
    pub http_status: Option<u16>,
    pub content: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// A cached robots.txt response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRobots {
    pub http_status: u16,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// One row of run history.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    pub sheet: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub stats_json: Option<String>,
}

fn storage_err(e: impl std::fmt::Display) -> LinkIntelError {
    LinkIntelError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LinkIntelError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        LinkIntelError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Fetch cache
    // -----------------------------------------------------------------------

    /// Get a cached fetch younger than `ttl`.
    pub async fn get_fetch_cache(&self, url_hash: &str, ttl: Duration) -> Result<Option<CachedFetch>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, status, http_status, content, fetched_at
                 FROM fetch_cache WHERE url_hash = ?1",
                params![url_hash],
            )
            .await
            .map_err(storage_err)?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(storage_err(e)),
        };

        let fetched_at = parse_timestamp(&row.get::<String>(4).map_err(storage_err)?)?;
        if !is_fresh(fetched_at, ttl) {
            return Ok(None);
        }

        Ok(Some(CachedFetch {
            url: row.get::<String>(0).map_err(storage_err)?,
            status: row.get::<String>(1).map_err(storage_err)?,
            http_status: row.get::<i64>(2).ok().map(|v| v as u16),
            content: row.get::<String>(3).ok(),
            fetched_at,
        }))
    }

    /// Store a fetch outcome (upserts on `url_hash`).
    pub async fn put_fetch_cache(&self, url_hash: &str, entry: &CachedFetch) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO fetch_cache (url_hash, url, status, http_status, content, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(url_hash) DO UPDATE SET
                   url = excluded.url,
                   status = excluded.status,
                   http_status = excluded.http_status,
                   content = excluded.content,
                   fetched_at = excluded.fetched_at",
                params![
                    url_hash,
                    entry.url.as_str(),
                    entry.status.as_str(),
                    entry.http_status.map(i64::from),
                    entry.content.as_deref(),
                    timestamp(entry.fetched_at),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Delete cache entries older than `ttl`. Returns the number removed.
    pub async fn prune_fetch_cache(&self, ttl: Duration) -> Result<u64> {
        let threshold = timestamp(cutoff(ttl));
        let fetch = self
            .conn
            .execute(
                "DELETE FROM fetch_cache WHERE fetched_at < ?1",
                params![threshold.as_str()],
            )
            .await
            .map_err(storage_err)?;
        let robots = self
            .conn
            .execute(
                "DELETE FROM robots_cache WHERE fetched_at < ?1",
                params![threshold.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(fetch + robots)
    }

    /// Remove every cached fetch and robots.txt body.
    pub async fn clear_fetch_cache(&self) -> Result<u64> {
        let fetch = self
            .conn
            .execute("DELETE FROM fetch_cache", params![])
            .await
            .map_err(storage_err)?;
        let robots = self
            .conn
            .execute("DELETE FROM robots_cache", params![])
            .await
            .map_err(storage_err)?;
        Ok(fetch + robots)
    }

    // -----------------------------------------------------------------------
    // robots.txt cache
    // -----------------------------------------------------------------------

    /// Get a cached robots.txt response for `origin` younger than `ttl`.
    pub async fn get_robots(&self, origin: &str, ttl: Duration) -> Result<Option<CachedRobots>> {
        let mut rows = self
            .conn
            .query(
                "SELECT http_status, body, fetched_at FROM robots_cache WHERE origin = ?1",
                params![origin],
            )
            .await
            .map_err(storage_err)?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(storage_err(e)),
        };

        let fetched_at = parse_timestamp(&row.get::<String>(2).map_err(storage_err)?)?;
        if !is_fresh(fetched_at, ttl) {
            return Ok(None);
        }

        Ok(Some(CachedRobots {
            http_status: row.get::<i64>(0).map_err(storage_err)? as u16,
            body: row.get::<String>(1).map_err(storage_err)?,
            fetched_at,
        }))
    }

    /// Store a robots.txt response (upserts on `origin`).
    pub async fn put_robots(&self, origin: &str, http_status: u16, body: &str) -> Result<()> {
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "INSERT INTO robots_cache (origin, http_status, body, fetched_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(origin) DO UPDATE SET
                   http_status = excluded.http_status,
                   body = excluded.body,
                   fetched_at = excluded.fetched_at",
                params![origin, i64::from(http_status), body, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record the start of a run. Returns the generated run ID.
    pub async fn insert_run(&self, sheet: &str) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "INSERT INTO runs (id, sheet, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), sheet, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(id)
    }

    /// Mark a run finished and attach its summary.
    pub async fn finish_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, sheet, started_at, finished_at, stats_json
                 FROM runs ORDER BY id DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(RunRecord {
                id: row.get::<String>(0).map_err(storage_err)?,
                sheet: row.get::<String>(1).map_err(storage_err)?,
                started_at: row.get::<String>(2).map_err(storage_err)?,
                finished_at: row.get::<String>(3).ok(),
                stats_json: row.get::<String>(4).ok(),
            });
        }
        Ok(results)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LinkIntelError::Storage(format!("invalid date: {e}")))
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn cutoff(ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
    Utc::now()
        .checked_sub_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn is_fresh(fetched_at: DateTime<Utc>, ttl: Duration) -> bool {
    fetched_at > cutoff(ttl)
}
