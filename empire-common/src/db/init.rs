//! Database initialization
//!
//! `connect` opens a pool without touching the schema (engines, health
//! checks). `init_database` additionally deploys every declared table and is
//! what `empire-admin deploy-schema` and the server's first start run.

use crate::db::schema::{SchemaSync, SyncReport, TableDefinition};
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);
const MAX_CONNECTIONS: u32 = 10;

/// True for `sqlite::memory:` and `mode=memory` URLs
pub fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Filesystem path of a `sqlite://` URL, without query parameters
fn database_file(url: &str) -> Option<&Path> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next()?;
    if path.is_empty() {
        None
    } else {
        Some(Path::new(path))
    }
}

/// Open a connection pool
///
/// File databases are created on demand with WAL journaling. In-memory
/// databases use a single connection that is never recycled, so every query
/// sees the same database.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    if is_memory_url(url) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        return Ok(pool);
    }

    if let Some(parent) = database_file(url).and_then(Path::parent) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(
            options
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
        )
        .await?;

    info!("Opened database: {}", url);
    Ok(pool)
}

/// Open the database and deploy every declared table
pub async fn init_database(url: &str, tables: &[TableDefinition]) -> Result<(SqlitePool, SyncReport)> {
    let pool = connect(url).await?;
    let report = SchemaSync::ensure_all(&pool, tables).await?;

    if report.created_tables.is_empty() {
        info!("Database schema present ({} tables)", tables.len());
    } else {
        info!(
            "Initialized database schema: {}",
            report.created_tables.join(", ")
        );
    }

    Ok((pool, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_file_parsing() {
        assert_eq!(
            database_file("sqlite:///tmp/empire/empire.db?mode=rwc"),
            Some(Path::new("/tmp/empire/empire.db"))
        );
        assert_eq!(database_file("sqlite:data.db"), Some(Path::new("data.db")));
        assert_eq!(database_file("postgres://localhost/db"), None);
    }

    #[test]
    fn test_memory_detection() {
        assert!(is_memory_url("sqlite::memory:"));
        assert!(is_memory_url("sqlite://shared?mode=memory&cache=shared"));
        assert!(!is_memory_url("sqlite://empire.db"));
    }

    #[tokio::test]
    async fn test_memory_pool_shares_state() {
        let pool = connect("sqlite::memory:").await.unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER)").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO t VALUES (1)").execute(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
