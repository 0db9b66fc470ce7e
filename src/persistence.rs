use async_trait::async_trait;
use std::collections::HashMap;

use crate::{config::AppConfig, db::Database, file_storage::FileStorage, store::UrlStore};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("{0} is not available")]
    Unavailable(&'static str),

    #[error("file storage I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("file storage record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Durable copy of the short ID → stored value mapping.
#[async_trait]
pub trait DurableBackend: Send + Sync {
    async fn store(&self, short_id: &str, original_url: &str) -> Result<(), PersistError>;

    async fn get_all(&self) -> Result<HashMap<String, String>, PersistError>;

    async fn is_available(&self) -> bool;
}

// ── Fan-out policy ─────────────────────────────────────────────────────────

/// The database as configured.
#[derive(Debug, Default)]
enum DatabaseSlot {
    #[default]
    Disabled,
    Ready(Database),
    /// A DSN was given but could not be used. The database still takes
    /// precedence and reports itself unavailable.
    Invalid,
}

/// Decides where a new mapping is replicated and where startup data comes
/// from.
///
/// The database wins when both backends are configured; with neither the
/// service runs from memory only. Deletions go to every configured backend:
/// the database renames the rows, the file is rewritten from the store.
#[derive(Debug, Default)]
pub struct Persistence {
    database: DatabaseSlot,
    file: Option<FileStorage>,
}

impl Persistence {
    pub fn new(database: Option<Database>, file: Option<FileStorage>) -> Self {
        let database = database.map_or(DatabaseSlot::Disabled, DatabaseSlot::Ready);
        Self { database, file }
    }

    pub fn memory_only() -> Self {
        Self::default()
    }

    /// Build the configured backends. Database problems are logged and leave
    /// the database in charge; it reports itself unavailable until it
    /// recovers, or for good when the DSN cannot be parsed.
    pub async fn from_config(config: &AppConfig) -> Self {
        let database = match config.database_dsn.as_deref() {
            Some(dsn) => match Database::connect_lazy(dsn) {
                Ok(db) => {
                    if let Err(e) = db.migrate().await {
                        tracing::warn!("Cannot apply database migrations: {}", e);
                    }
                    DatabaseSlot::Ready(db)
                }
                Err(e) => {
                    tracing::warn!("Invalid database DSN: {}", e);
                    DatabaseSlot::Invalid
                }
            },
            None => DatabaseSlot::Disabled,
        };

        let file = config
            .file_storage_path
            .as_ref()
            .map(|path| FileStorage::new(path, config.base_url.clone()));

        Self { database, file }
    }

    /// The backend that receives writes and serves the startup load.
    fn primary(&self) -> Result<Option<(&'static str, &dyn DurableBackend)>, PersistError> {
        match (&self.database, &self.file) {
            (DatabaseSlot::Ready(db), _) => Ok(Some(("database", db as &dyn DurableBackend))),
            (DatabaseSlot::Invalid, _) => Err(PersistError::Unavailable("database")),
            (DatabaseSlot::Disabled, Some(file)) => {
                Ok(Some(("file storage", file as &dyn DurableBackend)))
            }
            (DatabaseSlot::Disabled, None) => Ok(None),
        }
    }

    /// Replicate a freshly created mapping.
    pub async fn store(&self, short_id: &str, original_url: &str) -> Result<(), PersistError> {
        let Some((_, backend)) = self.primary()? else {
            tracing::info!("No persistent data store specified, keeping {} in memory", short_id);
            return Ok(());
        };

        backend.store(short_id, original_url).await
    }

    /// Load everything from the primary backend into `store`.
    ///
    /// Returns the number of records read.
    pub async fn load_into(&self, store: &UrlStore) -> Result<usize, PersistError> {
        let Some((name, backend)) = self.primary()? else {
            tracing::info!("No persistent data store specified, starting empty");
            return Ok(0);
        };

        if !backend.is_available().await {
            return Err(PersistError::Unavailable(name));
        }

        let data = backend.get_all().await?;
        let count = data.len();
        store.load(data);

        tracing::info!("{} record(s) loaded from {}", count, name);
        Ok(count)
    }

    /// Reflect completed in-memory deletions in every configured backend.
    ///
    /// Both backends are attempted; the first failure is returned.
    pub async fn reflect_deletions(
        &self,
        owner: &str,
        keys: &[String],
        store: &UrlStore,
    ) -> Result<(), PersistError> {
        let mut first_error = None;

        match &self.database {
            DatabaseSlot::Ready(db) => match db.mark_deleted(owner, keys).await {
                Ok(marked) => {
                    tracing::info!("{} row(s) marked deleted for user {}", marked, owner)
                }
                Err(e) => first_error = Some(e),
            },
            DatabaseSlot::Invalid => first_error = Some(PersistError::Unavailable("database")),
            DatabaseSlot::Disabled => {}
        }

        if let Some(file) = &self.file {
            if let Err(e) = file.rewrite(store).await {
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Whether the database answers. `false` when none is configured.
    pub async fn ping_database(&self) -> bool {
        match &self.database {
            DatabaseSlot::Ready(db) => db.is_available().await,
            DatabaseSlot::Invalid | DatabaseSlot::Disabled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Cli, owned_url::join};
    use clap::Parser;
    use std::sync::Arc;

    const BASE: &str = "http://localhost:8080";

    fn file_only(dir: &tempfile::TempDir) -> Persistence {
        Persistence::new(
            None,
            Some(FileStorage::new(dir.path().join("storage.txt"), BASE)),
        )
    }

    async fn database(dir: &tempfile::TempDir) -> Database {
        let dsn = format!("sqlite://{}", dir.path().join("urls.db").display());
        let db = Database::connect_lazy(&dsn).unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn memory_only_skips_persistence() {
        let persistence = Persistence::memory_only();
        let store = UrlStore::new();

        persistence.store("A", "u1@https://a").await.unwrap();
        assert_eq!(persistence.load_into(&store).await.unwrap(), 0);
        assert!(!persistence.ping_database().await);
    }

    #[tokio::test]
    async fn file_round_trip_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = file_only(&dir);

        persistence.store("A", &join("u1", "https://a")).await.unwrap();
        persistence.store("B", &join("u2", "https://b")).await.unwrap();

        let store = UrlStore::new();
        assert_eq!(persistence.load_into(&store).await.unwrap(), 2);
        assert_eq!(store.get("A").as_deref(), Some("u1@https://a"));
        assert_eq!(store.get("B").as_deref(), Some("u2@https://b"));
    }

    #[tokio::test]
    async fn database_takes_precedence_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("storage.txt");
        let persistence = Persistence::new(
            Some(database(&dir).await),
            Some(FileStorage::new(&file_path, BASE)),
        );

        persistence.store("A", "u1@https://a").await.unwrap();
        assert!(!file_path.exists());

        let store = UrlStore::new();
        assert_eq!(persistence.load_into(&store).await.unwrap(), 1);
        assert!(persistence.ping_database().await);
    }

    #[tokio::test]
    async fn unavailable_database_fails_load() {
        let db = Database::connect_lazy("sqlite:///nonexistent-dir/deeper/urls.db").unwrap();
        let persistence = Persistence::new(Some(db), None);
        let store = UrlStore::new();

        assert!(matches!(
            persistence.load_into(&store).await,
            Err(PersistError::Unavailable("database"))
        ));
        assert!(persistence.store("A", "u1@https://a").await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn deletions_rewrite_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = file_only(&dir);
        let store = Arc::new(UrlStore::new());

        for (key, url) in [("A", "https://a"), ("B", "https://b")] {
            let value = join("u1", url);
            store.set(key, &value);
            persistence.store(key, &value).await.unwrap();
        }

        let keys = vec!["A".to_owned()];
        store.delete_keys("u1", keys.clone()).unwrap().wait().await;
        persistence.reflect_deletions("u1", &keys, &store).await.unwrap();

        let reloaded = UrlStore::new();
        persistence.load_into(&reloaded).await.unwrap();
        assert!(reloaded.is_deleted("A"));
        assert_eq!(reloaded.get("B").as_deref(), Some("u1@https://b"));
    }

    #[tokio::test]
    async fn deletions_mark_database_rows() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Persistence::new(Some(database(&dir).await), None);
        let store = UrlStore::new();

        persistence.store("A", "u1@https://a").await.unwrap();
        persistence
            .reflect_deletions("u1", &["A".to_owned()], &store)
            .await
            .unwrap();

        let reloaded = UrlStore::new();
        persistence.load_into(&reloaded).await.unwrap();
        assert!(reloaded.is_deleted("A"));
        assert_eq!(reloaded.get("A"), None);
    }

    #[tokio::test]
    async fn invalid_dsn_keeps_database_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("storage.txt");
        let cli = Cli::try_parse_from([
            "shortener",
            "-d",
            "sqlite://urls.db?no_such_option=1",
            "-f",
            file_path.to_str().unwrap(),
        ])
        .unwrap();
        let persistence = Persistence::from_config(&AppConfig::from_cli(cli).unwrap()).await;

        assert!(matches!(
            persistence.store("A", "u1@https://a").await,
            Err(PersistError::Unavailable("database"))
        ));
        assert!(!file_path.exists());

        let store = UrlStore::new();
        assert!(persistence.load_into(&store).await.is_err());
        assert!(!persistence.ping_database().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn appends_survive_concurrent_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Arc::new(file_only(&dir));
        let store = Arc::new(UrlStore::new());

        for i in 0..50 {
            let value = join("u1", &format!("https://seed.example/{i}"));
            store.set(&format!("S{i}"), &value);
            persistence.store(&format!("S{i}"), &value).await.unwrap();
        }

        let mut tasks = Vec::new();
        for i in 0..200 {
            let (store, persistence) = (Arc::clone(&store), Arc::clone(&persistence));
            tasks.push(tokio::spawn(async move {
                let key = format!("N{i}");
                let value = join("u2", &format!("https://new.example/{i}"));
                store.set(&key, &value);
                persistence.store(&key, &value).await.unwrap();
            }));
        }
        for i in 0..50 {
            let (store, persistence) = (Arc::clone(&store), Arc::clone(&persistence));
            tasks.push(tokio::spawn(async move {
                let keys = vec![format!("S{i}")];
                store.delete_keys("u1", keys.clone()).unwrap().wait().await;
                persistence.reflect_deletions("u1", &keys, &store).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let reloaded = UrlStore::new();
        persistence.load_into(&reloaded).await.unwrap();
        assert_eq!(reloaded.snapshot(), store.snapshot());
        assert_eq!(reloaded.len(), 250);
        assert!((0..50).all(|i| reloaded.is_deleted(&format!("S{i}"))));
    }
}
