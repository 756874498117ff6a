use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use directories::ProjectDirs;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{FlagListener, FlagStore, StorageError, Subscribers};

/// Flag store persisted in sqlite. Values are kept as JSON and read back with
/// truthiness rules, so a store written by other tools still yields a flag.
pub struct SqliteFlagStore {
    pool: Pool<SqliteConnectionManager>,
    subscribers: Subscribers,
}

#[derive(Debug)]
struct SqliteCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for SqliteCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_secs(1))
    }
}

impl SqliteFlagStore {
    pub fn new() -> Result<Self, StorageError> {
        Self::open(&database_path()?)
    }

    /// Create storage under a custom directory (primarily for testing).
    pub fn new_with_path(dir: &Path) -> Result<Self, StorageError> {
        Self::open(&dir.join("flags.sqlite3"))
    }

    fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| StorageError::DataDir)?;
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(2)
            .connection_customizer(Box::new(SqliteCustomizer))
            .build(manager)?;

        let conn = pool.get()?;
        initialise_schema(&conn)?;

        Ok(Self {
            pool,
            subscribers: Subscribers::default(),
        })
    }
}

impl FlagStore for SqliteFlagStore {
    fn load(&self, key: &str) -> Result<Option<bool>, StorageError> {
        let conn = self.pool.get()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM flags WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(truthy(&serde_json::from_str(&raw)?))),
            None => Ok(None),
        }
    }

    fn store(&self, key: &str, value: bool) -> Result<(), StorageError> {
        {
            let conn = self.pool.get()?;
            conn.execute(
                "INSERT OR REPLACE INTO flags (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, serde_json::to_string(&Value::Bool(value))?, unix_timestamp()],
            )?;
        }
        self.subscribers.notify(key, value);
        Ok(())
    }

    fn subscribe(&self, key: &str, listener: FlagListener) {
        self.subscribers.add(key, listener);
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map_or(false, |n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn database_path() -> Result<PathBuf, StorageError> {
    if let Ok(dir) = std::env::var("AUTOPLAY_GUARD_DATA_DIR") {
        let mut path = PathBuf::from(dir);
        path.push("flags.sqlite3");
        return Ok(path);
    }

    if let Some(dirs) = ProjectDirs::from("org", "AutoplayGuard", "AutoplayGuard") {
        let mut data_dir = dirs.data_dir().to_path_buf();
        data_dir.push("flags.sqlite3");
        Ok(data_dir)
    } else {
        Err(StorageError::DataDir)
    }
}

fn initialise_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        CREATE TABLE IF NOT EXISTS flags (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[test]
    fn persists_across_instances() {
        let dir = TempDir::new().unwrap();
        {
            let store = SqliteFlagStore::new_with_path(dir.path()).unwrap();
            assert_eq!(store.load("globalEnabled").unwrap(), None);
            store.store("globalEnabled", true).unwrap();
        }
        let reopened = SqliteFlagStore::new_with_path(dir.path()).unwrap();
        assert_eq!(reopened.load("globalEnabled").unwrap(), Some(true));
    }

    #[test]
    fn notifies_subscribers_after_write() {
        let dir = TempDir::new().unwrap();
        let store = SqliteFlagStore::new_with_path(dir.path()).unwrap();
        let last = Rc::new(Cell::new(None));
        let sink = Rc::clone(&last);
        store.subscribe("globalEnabled", Rc::new(move |value| sink.set(Some(value))));

        store.store("globalEnabled", false).unwrap();
        assert_eq!(last.get(), Some(false));
    }

    #[test]
    fn reads_foreign_values_by_truthiness() {
        let dir = TempDir::new().unwrap();
        let store = SqliteFlagStore::new_with_path(dir.path()).unwrap();
        let conn = store.pool.get().unwrap();
        for (key, raw) in [("a", "1"), ("b", "\"\""), ("c", "null"), ("d", "{}")] {
            conn.execute(
                "INSERT INTO flags (key, value, updated_at) VALUES (?1, ?2, 0)",
                params![key, raw],
            )
            .unwrap();
        }
        drop(conn);

        assert_eq!(store.load("a").unwrap(), Some(true));
        assert_eq!(store.load("b").unwrap(), Some(false));
        assert_eq!(store.load("c").unwrap(), Some(false));
        assert_eq!(store.load("d").unwrap(), Some(true));
    }
}
