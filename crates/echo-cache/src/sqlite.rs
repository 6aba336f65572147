//! SQLite-backed cache store.

use std::path::Path;
use std::sync::Mutex;

use hashbrown::HashMap;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::{CacheError, CacheKey, CacheStore, CachedEntry};

fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> CacheError {
    move |e| CacheError::Storage(format!("{}: {}", context, e))
}

/// Cache store persisted in a SQLite database.
pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
}

impl SqliteCacheStore {
    /// Open or create the store at `path`.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        info!("Opening cache store at {:?}", path.as_ref());
        let conn = Connection::open(path).map_err(db_err("Failed to open cache database"))?;
        Self::init(conn)
    }

    /// Create a store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory().map_err(db_err("Failed to open cache database"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS containers (
                name TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entries (
                container TEXT NOT NULL REFERENCES containers(name) ON DELETE CASCADE,
                key TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                stored_at INTEGER NOT NULL,
                PRIMARY KEY (container, key)
            );
            "#,
        )
        .map_err(db_err("Failed to create cache schema"))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn ensure_container(conn: &Connection, name: &str) -> Result<(), CacheError> {
    conn.execute(
        "INSERT OR IGNORE INTO containers (name, created_at) VALUES (?1, ?2)",
        params![name, echo_common::now_millis()],
    )
    .map_err(db_err("Failed to create container"))?;
    Ok(())
}

impl CacheStore for SqliteCacheStore {
    fn open(&self, name: &str) -> Result<(), CacheError> {
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        ensure_container(&conn, name)
    }

    fn has(&self, name: &str) -> Result<bool, CacheError> {
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        let found = conn
            .query_row(
                "SELECT 1 FROM containers WHERE name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()
            .map_err(db_err("Failed to look up container"))?;
        Ok(found.is_some())
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        let mut stmt = conn
            .prepare("SELECT name FROM containers ORDER BY name")
            .map_err(db_err("Failed to prepare query"))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err("Failed to list containers"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err("Failed to read container row"))?;
        Ok(names)
    }

    fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        let removed = conn
            .execute("DELETE FROM containers WHERE name = ?1", params![name])
            .map_err(db_err("Failed to delete container"))?;
        Ok(removed > 0)
    }

    fn match_entry(&self, name: &str, key: &CacheKey) -> Result<Option<CachedEntry>, CacheError> {
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        let row = conn
            .query_row(
                "SELECT method, url, status, headers, body, stored_at
                 FROM entries WHERE container = ?1 AND key = ?2",
                params![name, key.encoded()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u16>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err("Failed to read entry"))?;

        let Some((method, url, status, headers, body, stored_at)) = row else {
            return Ok(None);
        };

        let headers: HashMap<String, String> = serde_json::from_str(&headers)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        Ok(Some(CachedEntry {
            key: CacheKey { method, url },
            status,
            headers,
            body,
            stored_at,
        }))
    }

    fn put(&self, name: &str, entry: CachedEntry) -> Result<(), CacheError> {
        let headers = serde_json::to_string(&entry.headers)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let mut conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        let tx = conn
            .transaction()
            .map_err(db_err("Failed to begin transaction"))?;

        ensure_container(&tx, name)?;
        tx.execute(
            "INSERT OR REPLACE INTO entries
                (container, key, method, url, status, headers, body, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                name,
                entry.key.encoded(),
                entry.key.method,
                entry.key.url,
                entry.status,
                headers,
                entry.body,
                entry.stored_at
            ],
        )
        .map_err(db_err("Failed to store entry"))?;

        tx.commit().map_err(db_err("Failed to commit entry"))?;
        Ok(())
    }

    fn delete_entry(&self, name: &str, key: &CacheKey) -> Result<bool, CacheError> {
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        let removed = conn
            .execute(
                "DELETE FROM entries WHERE container = ?1 AND key = ?2",
                params![name, key.encoded()],
            )
            .map_err(db_err("Failed to delete entry"))?;
        Ok(removed > 0)
    }

    fn entry_keys(&self, name: &str) -> Result<Vec<CacheKey>, CacheError> {
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        let mut stmt = conn
            .prepare("SELECT method, url FROM entries WHERE container = ?1 ORDER BY key")
            .map_err(db_err("Failed to prepare query"))?;
        let keys = stmt
            .query_map(params![name], |row| {
                Ok(CacheKey {
                    method: row.get(0)?,
                    url: row.get(1)?,
                })
            })
            .map_err(db_err("Failed to list entries"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err("Failed to read entry row"))?;
        Ok(keys)
    }
}
