//! Database initialization against real files
//!
//! Covers first-run creation (including missing parent directories),
//! reopening an existing database, and schema growth between releases.

use empire_common::db::{init_database, ColumnDefinition, SchemaIntrospector, SchemaVerifier, TableDefinition};
use tempfile::TempDir;

fn notes_table() -> TableDefinition {
    TableDefinition::new("notes")
        .column(ColumnDefinition::id())
        .column(ColumnDefinition::new("body", "TEXT").not_null())
}

fn url_for(dir: &TempDir, file: &str) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join(file).display())
}

#[tokio::test]
async fn test_creates_database_and_parent_dirs() {
    let dir = TempDir::new().unwrap();
    let url = url_for(&dir, "nested/deeper/empire.db");

    let (pool, report) = init_database(&url, &[notes_table()]).await.unwrap();

    assert!(dir.path().join("nested/deeper/empire.db").exists());
    assert_eq!(report.created_tables, vec!["notes".to_string()]);
    SchemaVerifier::verify(&pool, &["notes"]).await.unwrap();
}

#[tokio::test]
async fn test_reopen_keeps_data() {
    let dir = TempDir::new().unwrap();
    let url = url_for(&dir, "empire.db");

    let (pool, _) = init_database(&url, &[notes_table()]).await.unwrap();
    sqlx::query("INSERT INTO notes (body) VALUES ('kept')")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let (pool, report) = init_database(&url, &[notes_table()]).await.unwrap();
    assert!(report.is_noop());

    let body: String = sqlx::query_scalar("SELECT body FROM notes")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(body, "kept");
}

#[tokio::test]
async fn test_schema_growth_adds_columns() {
    let dir = TempDir::new().unwrap();
    let url = url_for(&dir, "empire.db");

    let (pool, _) = init_database(&url, &[notes_table()]).await.unwrap();
    pool.close().await;

    let grown = notes_table().column(ColumnDefinition::new("pinned", "INTEGER").not_null().default("0"));
    let (pool, report) = init_database(&url, &[grown]).await.unwrap();

    assert_eq!(report.added_columns, vec!["notes.pinned".to_string()]);
    let columns = SchemaIntrospector::introspect_table(&pool, "notes").await.unwrap();
    assert!(columns.iter().any(|c| c.name == "pinned"));
}
