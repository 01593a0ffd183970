use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::registration::CameraRegistration;

/// One persisted camera registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CameraRecord {
    pub id: i64,
    pub rtsp_url: String,
    pub device_id: String,
    pub event_id: String,
}

impl CameraRecord {
    fn from_registration(id: i64, registration: &CameraRegistration) -> Self {
        Self {
            id,
            rtsp_url: registration.rtsp_url().to_string(),
            device_id: registration.device_id().to_string(),
            event_id: registration.event_id().to_string(),
        }
    }
}

/// Keyed record table of registrations. Never read by the streaming path.
pub trait CameraStore: Send {
    /// Returns the new record id.
    fn insert(&mut self, registration: &CameraRegistration) -> Result<i64>;

    /// All records in id order.
    fn list(&mut self) -> Result<Vec<CameraRecord>>;

    /// Returns `false` when no record has `id`.
    fn update(&mut self, id: i64, registration: &CameraRegistration) -> Result<bool>;

    /// Returns `false` when no record has `id`.
    fn delete(&mut self, id: i64) -> Result<bool>;
}

pub struct SqliteCameraStore {
    conn: Connection,
}

impl SqliteCameraStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn =
            Connection::open(db_path).with_context(|| format!("open camera store {db_path}"))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory camera store")?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS cameras (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              rtsp_url TEXT NOT NULL,
              device_id TEXT NOT NULL,
              event_id TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl CameraStore for SqliteCameraStore {
    fn insert(&mut self, registration: &CameraRegistration) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO cameras(rtsp_url, device_id, event_id) VALUES (?1, ?2, ?3)",
            params![
                registration.rtsp_url(),
                registration.device_id(),
                registration.event_id()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list(&mut self) -> Result<Vec<CameraRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, rtsp_url, device_id, event_id FROM cameras ORDER BY id ASC")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(CameraRecord {
                id: row.get(0)?,
                rtsp_url: row.get(1)?,
                device_id: row.get(2)?,
                event_id: row.get(3)?,
            });
        }
        Ok(out)
    }

    fn update(&mut self, id: i64, registration: &CameraRegistration) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE cameras SET rtsp_url = ?1, device_id = ?2, event_id = ?3 WHERE id = ?4",
            params![
                registration.rtsp_url(),
                registration.device_id(),
                registration.event_id(),
                id
            ],
        )?;
        Ok(changed > 0)
    }

    fn delete(&mut self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM cameras WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryCameraStore {
    records: Vec<CameraRecord>,
    last_id: i64,
}

impl InMemoryCameraStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CameraStore for InMemoryCameraStore {
    fn insert(&mut self, registration: &CameraRegistration) -> Result<i64> {
        self.last_id += 1;
        self.records
            .push(CameraRecord::from_registration(self.last_id, registration));
        Ok(self.last_id)
    }

    fn list(&mut self) -> Result<Vec<CameraRecord>> {
        Ok(self.records.clone())
    }

    fn update(&mut self, id: i64, registration: &CameraRegistration) -> Result<bool> {
        match self.records.iter_mut().find(|record| record.id == id) {
            Some(record) => {
                *record = CameraRecord::from_registration(id, registration);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&mut self, id: i64) -> Result<bool> {
        let before = self.records.len();
        self.records.retain(|record| record.id != id);
        Ok(self.records.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(device: &str) -> CameraRegistration {
        CameraRegistration::new(format!("rtsp://{device}/live"), device, "evt-1").unwrap()
    }

    fn exercise(store: &mut dyn CameraStore) -> Result<()> {
        let first = store.insert(&reg("cam-a"))?;
        let second = store.insert(&reg("cam-b"))?;
        assert!(second > first);

        let records = store.list()?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].device_id, "cam-a");
        assert_eq!(records[1].rtsp_url, "rtsp://cam-b/live");

        assert!(store.update(first, &reg("cam-c"))?);
        assert!(!store.update(9999, &reg("cam-x"))?);
        assert_eq!(store.list()?[0].device_id, "cam-c");

        assert!(store.delete(second)?);
        assert!(!store.delete(second)?);
        assert_eq!(store.list()?.len(), 1);
        Ok(())
    }

    #[test]
    fn sqlite_store_round_trips_records() -> Result<()> {
        let mut store = SqliteCameraStore::open_in_memory()?;
        exercise(&mut store)
    }

    #[test]
    fn in_memory_store_matches_sqlite_semantics() -> Result<()> {
        let mut store = InMemoryCameraStore::new();
        exercise(&mut store)
    }

    #[test]
    fn sqlite_store_persists_across_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cameras.db");
        let path = path.to_str().unwrap();
        {
            let mut store = SqliteCameraStore::open(path)?;
            store.insert(&reg("cam-a"))?;
        }
        let mut store = SqliteCameraStore::open(path)?;
        let records = store.list()?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_id, "evt-1");
        Ok(())
    }
}
