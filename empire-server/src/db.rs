//! Schema of every feature area served by this crate

use crate::api_keys;
use crate::engines::{challenges, forum, newsletter, ugc_video};
use empire_common::db::{init_database, SyncReport, TableDefinition};
use empire_common::Result;
use sqlx::SqlitePool;

/// Every table, in dependency order
pub fn all_tables() -> Vec<TableDefinition> {
    let mut tables = forum::tables();
    tables.extend(challenges::tables());
    tables.extend(newsletter::tables());
    tables.extend(ugc_video::tables());
    tables.extend(api_keys::tables());
    tables
}

pub fn all_table_names() -> Vec<&'static str> {
    all_tables().iter().map(|t| t.name).collect()
}

/// Create missing tables and columns, then return the open pool
pub async fn deploy_schema(database_url: &str) -> Result<(SqlitePool, SyncReport)> {
    init_database(database_url, &all_tables()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use empire_common::db::SchemaVerifier;

    #[tokio::test]
    async fn test_deploy_schema_is_repeatable() {
        let (pool, first) = deploy_schema("sqlite::memory:").await.unwrap();
        assert_eq!(first.created_tables.len(), all_tables().len());

        let second = empire_common::db::SchemaSync::ensure_all(&pool, &all_tables()).await.unwrap();
        assert!(second.is_noop());

        SchemaVerifier::verify(&pool, &all_table_names()).await.unwrap();
    }

    #[test]
    fn test_table_names_are_unique() {
        let mut names = all_table_names();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
