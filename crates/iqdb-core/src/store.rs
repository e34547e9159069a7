//! SQLite persistence for image signatures
//!
//! One table, keyed by an auto-assigned integer primary key that doubles
//! as the image's internal index. The signature coefficient blob is
//! stored verbatim; the store never interprets it.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::signature::HaarSignature;

// AUTOINCREMENT keeps a persistent high-water mark in sqlite_sequence,
// so a freed row id is never reissued; internal indices stay retired.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    post_id INTEGER NOT NULL UNIQUE,
    avglf1 REAL NOT NULL,
    avglf2 REAL NOT NULL,
    avglf3 REAL NOT NULL,
    sig BLOB NOT NULL
);
";

/// One row of the `images` table.
#[derive(Debug, Clone)]
pub struct PersistedImage {
    /// Primary key; the image's internal index.
    pub id: u32,
    /// External id.
    pub post_id: u64,
    pub signature: HaarSignature,
}

pub struct SqliteStore {
    // The connection's statement cache is not Sync; queries never touch
    // the store, so this lock only serializes point lookups and writes.
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// A private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Point lookup by external id.
    pub fn get_by_post_id(&self, post_id: u64) -> Result<Option<PersistedImage>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached(
                "SELECT id, post_id, avglf1, avglf2, avglf3, sig FROM images WHERE post_id = ?",
            )?
            .query_row(params![post_id as i64], row_parts)
            .optional()?;

        row.map(persisted_from_parts).transpose()
    }

    /// Insert a signature, replacing any existing row with the same
    /// `post_id` inside a single transaction. Returns the assigned
    /// primary key.
    pub fn insert(&self, post_id: u64, signature: &HaarSignature) -> Result<u32> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM images WHERE post_id = ?", params![post_id as i64])?;
        tx.execute(
            "INSERT INTO images (post_id, avglf1, avglf2, avglf3, sig) VALUES (?, ?, ?, ?, ?)",
            params![
                post_id as i64,
                signature.avglf[0],
                signature.avglf[1],
                signature.avglf[2],
                signature.sig_blob().as_slice(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        u32::try_from(id).map_err(|_| Error::Fatal(format!("row id {id} exceeds index range")))
    }

    /// Delete by external id. Deleting an absent row is a no-op.
    pub fn delete_by_post_id(&self, post_id: u64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM images WHERE post_id = ?", params![post_id as i64])?;
        Ok(())
    }

    /// Stream every row in primary-key order.
    pub fn for_each(&self, mut f: impl FnMut(PersistedImage) -> Result<()>) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, post_id, avglf1, avglf2, avglf3, sig FROM images ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_parts)?;
        for row in rows {
            f(persisted_from_parts(row?)?)?;
        }
        Ok(())
    }
}

type RowParts = (i64, i64, f64, f64, f64, Vec<u8>);

fn row_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn persisted_from_parts(parts: RowParts) -> Result<PersistedImage> {
    let (id, post_id, avglf1, avglf2, avglf3, blob) = parts;
    let id =
        u32::try_from(id).map_err(|_| Error::Fatal(format!("row id {id} exceeds index range")))?;
    Ok(PersistedImage {
        id,
        post_id: post_id as u64,
        signature: HaarSignature::from_parts([avglf1, avglf2, avglf3], &blob)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::haar::NUM_PIXELS_SQUARED;
    use crate::signature::HaarSignature;

    fn signature(seed: u8) -> HaarSignature {
        let r: Vec<u8> = (0..NUM_PIXELS_SQUARED)
            .map(|i| (i as u8).wrapping_mul(seed).wrapping_add(seed))
            .collect();
        let g: Vec<u8> = (0..NUM_PIXELS_SQUARED)
            .map(|i| ((i / 7) as u8).wrapping_add(seed))
            .collect();
        let b: Vec<u8> = (0..NUM_PIXELS_SQUARED).map(|i| (i % 131) as u8).collect();
        HaarSignature::from_channels(&r, &g, &b).unwrap()
    }

    #[test]
    fn insert_then_lookup() {
        let store = SqliteStore::open_in_memory().unwrap();
        let sig = signature(3);

        let id = store.insert(10, &sig).unwrap();
        let row = store.get_by_post_id(10).unwrap().unwrap();
        assert_eq!(row.id, id);
        assert_eq!(row.post_id, 10);
        assert_eq!(row.signature, sig);
    }

    #[test]
    fn insert_replaces_and_assigns_fresh_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store.insert(10, &signature(3)).unwrap();
        let second = store.insert(10, &signature(5)).unwrap();
        assert!(second > first);

        let row = store.get_by_post_id(10).unwrap().unwrap();
        assert_eq!(row.id, second);
        assert_eq!(row.signature, signature(5));
    }

    #[test]
    fn deleting_the_max_id_row_does_not_free_its_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store.insert(1, &signature(3)).unwrap();
        store.delete_by_post_id(1).unwrap();
        let second = store.insert(1, &signature(3)).unwrap();
        assert!(second > first);
    }

    #[test]
    fn delete_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(10, &signature(3)).unwrap();
        store.delete_by_post_id(10).unwrap();
        store.delete_by_post_id(10).unwrap();
        assert!(store.get_by_post_id(10).unwrap().is_none());
    }

    #[test]
    fn for_each_scans_in_id_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        for post_id in [30u64, 10, 20] {
            store.insert(post_id, &signature(post_id as u8)).unwrap();
        }

        let mut ids = Vec::new();
        store
            .for_each(|row| {
                ids.push(row.id);
                Ok(())
            })
            .unwrap();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iqdb.db");
        let sig = signature(9);

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert(77, &sig).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let row = store.get_by_post_id(77).unwrap().unwrap();
        assert_eq!(row.signature.to_hash(), sig.to_hash());
    }
}
