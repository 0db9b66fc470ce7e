use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    QueryBuilder, Sqlite, SqlitePool,
};
use std::{collections::HashMap, time::Duration};

use crate::{
    owned_url::DELIMITER,
    persistence::{DurableBackend, PersistError},
    store::DELETED_PREFIX,
};

/// Relational storage for the `urls` table.
///
/// The pool connects lazily, so a database that is down at startup only
/// shows up as an unavailable backend rather than a failed launch.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Build a lazily-connecting pool for `dsn`, e.g. `sqlite:./data/urls.db`.
    pub fn connect_lazy(dsn: &str) -> Result<Self, PersistError> {
        let options = dsn
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy_with(options);

        Ok(Self { pool })
    }

    /// Run embedded migrations (files in migrations/).
    pub async fn migrate(&self) -> Result<(), PersistError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// Prefix the caller's matching rows with the deleted marker.
    ///
    /// Rows owned by somebody else, and rows already marked, are left alone.
    pub async fn mark_deleted(&self, owner: &str, keys: &[String]) -> Result<u64, PersistError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let owner_prefix = format!("{owner}{DELIMITER}");

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE urls SET short_id = ");
        query
            .push_bind(DELETED_PREFIX)
            .push(" || short_id WHERE substr(original_url, 1, ")
            .push_bind(owner_prefix.chars().count() as i64)
            .push(") = ")
            .push_bind(owner_prefix)
            .push(" AND substr(short_id, 1, 1) <> ")
            .push_bind(DELETED_PREFIX)
            .push(" AND short_id IN (");
        let mut ids = query.separated(", ");
        for key in keys {
            ids.push_bind(key.clone());
        }
        ids.push_unseparated(")");

        let affected = query.build().execute(&self.pool).await?.rows_affected();
        Ok(affected)
    }
}

#[async_trait]
impl DurableBackend for Database {
    async fn store(&self, short_id: &str, original_url: &str) -> Result<(), PersistError> {
        sqlx::query("INSERT INTO urls (short_id, original_url) VALUES (?1, ?2)")
            .bind(short_id)
            .bind(original_url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<HashMap<String, String>, PersistError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT short_id, original_url FROM urls")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().collect())
    }

    async fn is_available(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn database(dir: &tempfile::TempDir) -> Database {
        let dsn = format!("sqlite://{}", dir.path().join("urls.db").display());
        let db = Database::connect_lazy(&dsn).unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn store_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir).await;

        assert!(db.is_available().await);
        db.store("F870F1E9", "u1@https://www.google.com").await.unwrap();
        db.store("4AED1C05", "u1@https://www.youtube.com").await.unwrap();

        let data = db.get_all().await.unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(
            data.get("F870F1E9").map(String::as_str),
            Some("u1@https://www.google.com")
        );
    }

    #[tokio::test]
    async fn duplicate_short_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir).await;

        db.store("A", "u1@https://a").await.unwrap();
        assert!(db.store("A", "u1@https://b").await.is_err());
    }

    #[tokio::test]
    async fn mark_deleted_only_touches_owner_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir).await;
        db.store("A", "u1@https://a").await.unwrap();
        db.store("B", "u2@https://b").await.unwrap();
        db.store("C", "u10@https://c").await.unwrap();

        let keys = vec!["A".to_owned(), "B".to_owned(), "C".to_owned()];
        assert_eq!(db.mark_deleted("u1", &keys).await.unwrap(), 1);
        // Already marked rows are not prefixed twice.
        assert_eq!(db.mark_deleted("u1", &["-A".to_owned()]).await.unwrap(), 0);

        let data = db.get_all().await.unwrap();
        assert!(data.contains_key("-A"));
        assert!(data.contains_key("B"));
        assert!(data.contains_key("C"));
    }

    #[tokio::test]
    async fn unreachable_database_is_unavailable() {
        let db = Database::connect_lazy("sqlite:///nonexistent-dir/deeper/urls.db").unwrap();
        assert!(!db.is_available().await);
    }
}
