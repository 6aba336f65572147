//! SQLite-backed outbox.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, ErrorCode};
use tracing::info;

use crate::{Outbox, OutboxError, OutboxRecord};

fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> OutboxError {
    move |e| OutboxError::Storage(format!("{}: {}", context, e))
}

/// Outbox persisted in a SQLite database.
pub struct SqliteOutbox {
    conn: Mutex<Connection>,
}

impl SqliteOutbox {
    /// Open or create the outbox at `path`.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, OutboxError> {
        info!("Opening outbox at {:?}", path.as_ref());
        let conn = Connection::open(path).map_err(db_err("Failed to open outbox database"))?;
        Self::init(conn)
    }

    /// Create an outbox that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self, OutboxError> {
        let conn =
            Connection::open_in_memory().map_err(db_err("Failed to open outbox database"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, OutboxError> {
        // `seq` keeps insertion order independent of id shape.
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS outbox (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(db_err("Failed to create outbox schema"))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Outbox for SqliteOutbox {
    fn add(&self, record: &OutboxRecord) -> Result<(), OutboxError> {
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| OutboxError::Serialization(e.to_string()))?;

        let mut conn = self.conn.lock().map_err(|_| OutboxError::Poisoned)?;
        let tx = conn
            .transaction()
            .map_err(db_err("Failed to begin transaction"))?;

        match tx.execute(
            "INSERT INTO outbox (id, payload, created_at) VALUES (?1, ?2, ?3)",
            params![record.id, payload, record.created_at],
        ) {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(OutboxError::Duplicate(record.id.clone()));
            }
            Err(e) => return Err(db_err("Failed to queue record")(e)),
        }

        tx.commit().map_err(db_err("Failed to commit record"))?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<OutboxRecord>, OutboxError> {
        let conn = self.conn.lock().map_err(|_| OutboxError::Poisoned)?;
        let mut stmt = conn
            .prepare("SELECT id, payload, created_at FROM outbox ORDER BY seq")
            .map_err(db_err("Failed to prepare query"))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(db_err("Failed to list records"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err("Failed to read record row"))?;

        rows.into_iter()
            .map(|(id, payload, created_at)| {
                let payload = serde_json::from_str(&payload)
                    .map_err(|e| OutboxError::Serialization(e.to_string()))?;
                Ok(OutboxRecord {
                    id,
                    payload,
                    created_at,
                })
            })
            .collect()
    }

    fn delete(&self, id: &str) -> Result<bool, OutboxError> {
        let conn = self.conn.lock().map_err(|_| OutboxError::Poisoned)?;
        let removed = conn
            .execute("DELETE FROM outbox WHERE id = ?1", params![id])
            .map_err(db_err("Failed to delete record"))?;
        Ok(removed > 0)
    }

    fn len(&self) -> Result<usize, OutboxError> {
        let conn = self.conn.lock().map_err(|_| OutboxError::Poisoned)?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))
            .map_err(db_err("Failed to count records"))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_insertion_order() {
        let outbox = SqliteOutbox::open_in_memory().unwrap();
        for id in ["z", "a", "m"] {
            outbox.add(&OutboxRecord::new(json!({ "id": id }))).unwrap();
        }
        let ids: Vec<_> = outbox.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let outbox = SqliteOutbox::open_in_memory().unwrap();
        let record = OutboxRecord::new(json!({ "id": "dup", "text": "hi" }));
        outbox.add(&record).unwrap();
        assert_eq!(
            outbox.add(&record).unwrap_err(),
            OutboxError::Duplicate("dup".to_string())
        );
        assert_eq!(outbox.len().unwrap(), 1);
    }

    #[test]
    fn test_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.db");
        let record = OutboxRecord::new(json!({ "chatId": "c1", "text": "sent offline" }));

        {
            let outbox = SqliteOutbox::open_path(&path).unwrap();
            outbox.add(&record).unwrap();
        }

        let outbox = SqliteOutbox::open_path(&path).unwrap();
        assert_eq!(outbox.list().unwrap(), vec![record.clone()]);

        assert!(outbox.delete(&record.id).unwrap());
        assert!(outbox.is_empty().unwrap());
    }
}
