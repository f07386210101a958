//! SQLite persistence for the unpushed queue, cursors and documents.

use std::path::Path;

use datawallet_types::{DatawalletCollection, LocalModification, LocalModificationId, ObjectId};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use crate::store::{CollectionStore, CursorKey, StoreError, SyncStore};

const SCHEMA: &str = r#"
-- Local modifications waiting to be pushed (drained only by the controller)
CREATE TABLE IF NOT EXISTS unpushed_modifications (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    local_id TEXT NOT NULL UNIQUE,
    body TEXT NOT NULL,
    created_at INTEGER DEFAULT (unixepoch())
);

-- Durable cursors (index, versions, last completed syncs)
CREATE TABLE IF NOT EXISTS sync_info (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

-- Synchronized documents
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);
"#;

/// Database handle implementing [`SyncStore`] and [`CollectionStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl SyncStore for SqliteStore {
    fn enqueue(&self, modification: &LocalModification) -> Result<(), StoreError> {
        let body = serde_json::to_string(modification)?;
        self.conn.lock().execute(
            "INSERT INTO unpushed_modifications (local_id, body) VALUES (?1, ?2)",
            params![modification.local_id.to_string(), body],
        )?;
        Ok(())
    }

    fn unpushed(&self) -> Result<Vec<LocalModification>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT body FROM unpushed_modifications ORDER BY seq")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(StoreError::from))
            .collect()
    }

    fn unpushed_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM unpushed_modifications",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn delete_unpushed(&self, ids: &[LocalModificationId]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM unpushed_modifications WHERE local_id = ?1")?;
            for id in ids {
                stmt.execute(params![id.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn cursor(&self, key: CursorKey) -> Result<Option<i64>, StoreError> {
        let value = self
            .conn
            .lock()
            .query_row(
                "SELECT value FROM sync_info WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_cursor(&self, key: CursorKey, value: i64) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO sync_info (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key.as_str(), value],
        )?;
        Ok(())
    }
}

impl CollectionStore for SqliteStore {
    fn read(
        &self,
        collection: DatawalletCollection,
        id: &ObjectId,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let body: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
            .transpose()
    }

    fn write(
        &self,
        collection: DatawalletCollection,
        id: &ObjectId,
        document: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(document)?;
        self.conn.lock().execute(
            "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body",
            params![collection.as_str(), id.as_str(), body],
        )?;
        Ok(())
    }

    fn delete(&self, collection: DatawalletCollection, id: &ObjectId) -> Result<bool, StoreError> {
        let changed = self.conn.lock().execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection.as_str(), id.as_str()],
        )?;
        Ok(changed > 0)
    }

    fn list(
        &self,
        collection: DatawalletCollection,
    ) -> Result<Vec<(ObjectId, serde_json::Value)>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, body FROM documents WHERE collection = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![collection.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, body)| {
                let value = serde_json::from_str(&body).map_err(|e| {
                    StoreError::Corrupt(format!("{collection}/{id}: {e}"))
                })?;
                Ok((ObjectId::new(id), value))
            })
            .collect()
    }
}
