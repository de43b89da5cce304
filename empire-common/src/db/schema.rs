//! Declarative table definitions, schema synchronization and verification
//!
//! Each feature area declares its tables as [`TableDefinition`]s. Deployment
//! runs [`SchemaSync::ensure_all`]:
//! 1. **CREATE TABLE** for tables that do not exist yet
//! 2. **ALTER TABLE ADD COLUMN** for columns added to a definition later
//!
//! Engines never create tables themselves; on startup they only run
//! [`SchemaVerifier::verify`] and refuse to initialize when a table is missing.

use crate::{Error, Result};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

/// Column definition with SQL constraints
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,
    /// SQL type (e.g., "TEXT", "INTEGER", "REAL", "TIMESTAMP")
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    /// `INTEGER PRIMARY KEY AUTOINCREMENT`
    pub autoincrement: bool,
    pub unique: bool,
    /// DEFAULT value, as SQL text
    pub default_value: Option<String>,
    /// `REFERENCES table(column)`
    pub references: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            autoincrement: false,
            unique: false,
            default_value: None,
            references: None,
        }
    }

    /// Shorthand for an `INTEGER PRIMARY KEY AUTOINCREMENT` id column
    pub fn id() -> Self {
        let mut col = Self::new("id", "INTEGER").primary_key();
        col.autoincrement = true;
        col
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Foreign key to `table(id)`
    pub fn references(mut self, table: &str) -> Self {
        self.references = Some(format!("{}(id)", table));
        self
    }

    /// Column clause used inside CREATE TABLE
    fn create_clause(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type);
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.autoincrement {
                sql.push_str(" AUTOINCREMENT");
            }
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        if let Some(target) = &self.references {
            sql.push_str(&format!(" REFERENCES {}", target));
        }
        sql
    }
}

/// Expected schema for one table
#[derive(Debug, Clone)]
pub struct TableDefinition {
    pub name: &'static str,
    pub columns: Vec<ColumnDefinition>,
    /// Table-level constraints such as `UNIQUE (a, b)`
    pub constraints: Vec<String>,
}

impl TableDefinition {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            columns: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    /// CREATE TABLE IF NOT EXISTS statement for this definition
    pub fn create_sql(&self) -> String {
        let clauses: Vec<String> = self
            .columns
            .iter()
            .map(ColumnDefinition::create_clause)
            .chain(self.constraints.iter().cloned())
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.name,
            clauses.join(",\n    ")
        )
    }
}

/// Actual column from database introspection (PRAGMA table_info result)
#[derive(Debug, Clone)]
pub struct ActualColumn {
    pub cid: i32,
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub pk: bool,
}

/// Table and column names are compiled-in identifiers; refuse anything else
fn check_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid identifier: {}", name)))
    }
}

/// Schema introspection via sqlite_master and PRAGMA table_info
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Read actual columns from a table, ordered by cid
    pub async fn introspect_table(pool: &SqlitePool, table_name: &str) -> Result<Vec<ActualColumn>> {
        check_identifier(table_name)?;
        let query = format!("PRAGMA table_info({})", table_name);
        let rows = sqlx::query(&query).fetch_all(pool).await?;

        let mut columns: Vec<ActualColumn> = rows
            .iter()
            .map(|row| ActualColumn {
                cid: row.get("cid"),
                name: row.get("name"),
                type_name: row.get("type"),
                not_null: row.get::<i32, _>("notnull") != 0,
                default_value: row.get("dflt_value"),
                pk: row.get::<i32, _>("pk") != 0,
            })
            .collect();

        columns.sort_by_key(|c| c.cid);
        Ok(columns)
    }

    pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sqlite_master
                WHERE type='table' AND name = ?
            )
            "#,
        )
        .bind(table_name)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }
}

/// Outcome of a schema deployment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Tables created by this run
    pub created_tables: Vec<String>,
    /// `table.column` entries added by this run
    pub added_columns: Vec<String>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.created_tables.is_empty() && self.added_columns.is_empty()
    }
}

/// Schema synchronization: create missing tables, add missing columns
///
/// Type and constraint changes on existing columns are not applied; they
/// are logged as warnings.
pub struct SchemaSync;

impl SchemaSync {
    /// Ensure every table in `tables` exists with all declared columns
    pub async fn ensure_all(pool: &SqlitePool, tables: &[TableDefinition]) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for table in tables {
            Self::ensure_table(pool, table, &mut report).await?;
        }

        if report.is_noop() {
            debug!("Schema sync: {} tables up to date", tables.len());
        } else {
            info!(
                "Schema sync: created {} tables, added {} columns",
                report.created_tables.len(),
                report.added_columns.len()
            );
        }
        Ok(report)
    }

    /// Ensure a single table exists and carries every declared column
    pub async fn ensure_table(
        pool: &SqlitePool,
        table: &TableDefinition,
        report: &mut SyncReport,
    ) -> Result<()> {
        check_identifier(table.name)?;

        if !SchemaIntrospector::table_exists(pool, table.name).await? {
            sqlx::query(&table.create_sql()).execute(pool).await?;
            info!("  ✓ Created table '{}'", table.name);
            report.created_tables.push(table.name.to_string());
            return Ok(());
        }

        let actual = SchemaIntrospector::introspect_table(pool, table.name).await?;
        for expected in &table.columns {
            match actual.iter().find(|c| c.name == expected.name) {
                Some(found) => {
                    if !types_compatible(&expected.sql_type, &found.type_name) {
                        warn!(
                            "  ⚠ Type mismatch in {}.{}: expected '{}', found '{}'. Manual migration required.",
                            table.name, expected.name, expected.sql_type, found.type_name
                        );
                    }
                }
                None => {
                    Self::add_column(pool, table.name, expected).await?;
                    report
                        .added_columns
                        .push(format!("{}.{}", table.name, expected.name));
                }
            }
        }

        Ok(())
    }

    /// Add missing column via ALTER TABLE ADD COLUMN
    ///
    /// SQLite cannot add PRIMARY KEY or UNIQUE columns, nor NOT NULL
    /// columns without a DEFAULT; those constraints are dropped with a warning.
    async fn add_column(pool: &SqlitePool, table: &str, column: &ColumnDefinition) -> Result<()> {
        check_identifier(&column.name)?;
        let mut sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column.name, column.sql_type);

        if column.primary_key || column.unique {
            warn!(
                "  ⚠ Cannot add key/unique column {}.{} via ALTER TABLE; constraint skipped",
                table, column.name
            );
        }

        match (&column.default_value, column.not_null) {
            (Some(default), true) => sql.push_str(&format!(" NOT NULL DEFAULT {}", default)),
            (Some(default), false) => sql.push_str(&format!(" DEFAULT {}", default)),
            (None, true) => warn!(
                "  ⚠ Cannot add NOT NULL column {}.{} without DEFAULT; column will be nullable",
                table, column.name
            ),
            (None, false) => {}
        }

        info!("  ✓ Adding column: {}.{} ({})", table, column.name, column.sql_type);

        match sqlx::query(&sql).execute(pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {
                info!("  Column {}.{} already added (concurrent initialization)", table, column.name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// SQLite type affinity compatibility
fn types_compatible(expected: &str, actual: &str) -> bool {
    let exp = expected.to_uppercase();
    let act = actual.to_uppercase();

    if exp == act {
        return true;
    }

    let affinity = |t: &str| {
        if t.contains("INT") {
            "INTEGER"
        } else if t.contains("CHAR") || t.contains("CLOB") || t.contains("TEXT") {
            "TEXT"
        } else if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") {
            "REAL"
        } else {
            "NUMERIC"
        }
    };

    affinity(&exp) == affinity(&act)
}

/// Startup check that every table an engine depends on is present
pub struct SchemaVerifier;

impl SchemaVerifier {
    /// Run `SELECT 1 FROM <table> LIMIT 1` for each table
    ///
    /// Returns [`Error::SchemaVerification`] naming the first table that
    /// cannot be queried.
    pub async fn verify(pool: &SqlitePool, tables: &[&str]) -> Result<()> {
        for table in tables {
            check_identifier(table)?;
            let probe = format!("SELECT 1 FROM {} LIMIT 1", table);
            if let Err(e) = sqlx::query(&probe).fetch_optional(pool).await {
                warn!("Schema verification failed for '{}': {}", table, e);
                return Err(Error::SchemaVerification {
                    table: table.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Names of the given tables that are missing, without failing
    pub async fn missing_tables(pool: &SqlitePool, tables: &[&str]) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for table in tables {
            if !SchemaIntrospector::table_exists(pool, table).await? {
                missing.push(table.to_string());
            }
        }
        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect;

    fn widgets_v1() -> TableDefinition {
        TableDefinition::new("widgets")
            .column(ColumnDefinition::id())
            .column(ColumnDefinition::new("name", "TEXT").not_null().unique())
            .column(ColumnDefinition::new("view_count", "INTEGER").not_null().default("0"))
    }

    fn widgets_v2() -> TableDefinition {
        widgets_v1()
            .column(ColumnDefinition::new("color", "TEXT").default("'blue'"))
            .column(ColumnDefinition::new("weight", "REAL").not_null().default("0"))
    }

    #[test]
    fn test_create_sql() {
        let sql = TableDefinition::new("parts")
            .column(ColumnDefinition::id())
            .column(ColumnDefinition::new("widget_id", "INTEGER").not_null().references("widgets"))
            .constraint("UNIQUE (widget_id, id)")
            .create_sql();

        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS parts ("));
        assert!(sql.contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("widget_id INTEGER NOT NULL REFERENCES widgets(id)"));
        assert!(sql.contains("UNIQUE (widget_id, id)"));
    }

    #[test]
    fn test_types_compatible() {
        assert!(types_compatible("TEXT", "text"));
        assert!(types_compatible("INTEGER", "INT"));
        assert!(types_compatible("TEXT", "VARCHAR"));
        assert!(types_compatible("REAL", "DOUBLE"));
        assert!(!types_compatible("TEXT", "INTEGER"));
    }

    #[test]
    fn test_identifier_check() {
        assert!(check_identifier("forum_posts").is_ok());
        assert!(check_identifier("posts; DROP TABLE x").is_err());
        assert!(check_identifier("").is_err());
    }

    #[tokio::test]
    async fn test_ensure_creates_then_noop() {
        let pool = connect("sqlite::memory:").await.unwrap();

        let first = SchemaSync::ensure_all(&pool, &[widgets_v1()]).await.unwrap();
        assert_eq!(first.created_tables, vec!["widgets".to_string()]);

        let second = SchemaSync::ensure_all(&pool, &[widgets_v1()]).await.unwrap();
        assert!(second.is_noop());
    }

    #[tokio::test]
    async fn test_ensure_adds_missing_columns() {
        let pool = connect("sqlite::memory:").await.unwrap();
        SchemaSync::ensure_all(&pool, &[widgets_v1()]).await.unwrap();

        let report = SchemaSync::ensure_all(&pool, &[widgets_v2()]).await.unwrap();
        assert_eq!(
            report.added_columns,
            vec!["widgets.color".to_string(), "widgets.weight".to_string()]
        );

        let columns = SchemaIntrospector::introspect_table(&pool, "widgets").await.unwrap();
        assert_eq!(columns.len(), 5);
        assert!(columns.iter().any(|c| c.name == "weight" && c.not_null));
    }

    #[tokio::test]
    async fn test_verify_missing_table_errors() {
        let pool = connect("sqlite::memory:").await.unwrap();

        let err = SchemaVerifier::verify(&pool, &["widgets"]).await.unwrap_err();
        match err {
            Error::SchemaVerification { table } => assert_eq!(table, "widgets"),
            other => panic!("unexpected error {:?}", other),
        }

        SchemaSync::ensure_all(&pool, &[widgets_v1()]).await.unwrap();
        SchemaVerifier::verify(&pool, &["widgets"]).await.unwrap();
        assert!(SchemaVerifier::missing_tables(&pool, &["widgets", "gadgets"])
            .await
            .unwrap()
            .contains(&"gadgets".to_string()));
    }
}
