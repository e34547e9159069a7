//! The image database: query engine and mutation manager
//!
//! Combines the signature builder, inverted bucket index, image table,
//! and SQLite store into the five operations the HTTP adapter needs:
//! add, remove, get, query, count. Mutations keep the persistent store
//! and the in-memory structures consistent; a crash between the two is
//! healed by the next load.
//!
//! The database itself performs no locking. The adapter wraps it in a
//! single readers-writer lock: queries share, mutations exclude.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;

use crate::bucket::BucketIndex;
use crate::error::{Error, Result};
use crate::haar::{band_of, WEIGHTS};
use crate::signature::HaarSignature;
use crate::store::{PersistedImage, SqliteStore};
use crate::table::{ImageRecord, ImageTable};

/// One ranked query result.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub post_id: u64,
    /// Similarity in roughly [0, 100]; identity queries score ~100.
    pub score: f32,
}

/// Bounded top-K heap entry. The heap top is the worst candidate seen
/// so far (largest score), so a better candidate replaces it in O(log K).
#[derive(Clone, Copy)]
struct Candidate {
    score: f32,
    index: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.index == other.index
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.index.cmp(&other.index))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct ImageDb {
    store: SqliteStore,
    table: ImageTable,
    index: BucketIndex,
}

impl ImageDb {
    /// Open the database file at `path` and load every persisted
    /// signature into the in-memory table and bucket index.
    pub fn open(path: &Path) -> Result<Self> {
        let mut db = Self {
            store: SqliteStore::open(path)?,
            table: ImageTable::new(),
            index: BucketIndex::new(),
        };
        db.load()?;
        Ok(db)
    }

    /// An empty private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let mut db = Self {
            store: SqliteStore::open_in_memory()?,
            table: ImageTable::new(),
            index: BucketIndex::new(),
        };
        db.load()?;
        Ok(db)
    }

    /// Reset in-memory state and rebuild it from the store, placing each
    /// row at its primary-key slot.
    fn load(&mut self) -> Result<()> {
        self.table.clear();
        self.index = BucketIndex::new();

        let Self { store, table, index } = self;
        let mut loaded: u64 = 0;
        store.for_each(|row| {
            let slot = row.id as usize;
            table.ensure_slot(slot);
            if table.get(slot).is_some() {
                return Err(Error::Fatal(format!(
                    "duplicate internal index {} on load",
                    row.id
                )));
            }
            table.set(
                slot,
                ImageRecord {
                    post_id: row.post_id,
                    avgl: row.signature.avglf,
                },
            );
            index.add(&row.signature, row.id);

            loaded += 1;
            if loaded % 250_000 == 0 {
                tracing::info!("loaded {} images (post #{})...", loaded, row.post_id);
            }
            Ok(())
        })?;

        tracing::info!("database loaded: {} live images, {} slots", loaded, table.len());
        Ok(())
    }

    /// Insert a signature under `post_id`, replacing any existing image
    /// with the same id. Returns the assigned internal index.
    pub fn add(&mut self, post_id: u64, signature: &HaarSignature) -> Result<u32> {
        if self.store.get_by_post_id(post_id)?.is_some() {
            self.remove(post_id)?;
        }

        let id = self.store.insert(post_id, signature)?;
        let slot = id as usize;
        self.table.ensure_slot(slot);
        self.table.set(
            slot,
            ImageRecord {
                post_id,
                avgl: signature.avglf,
            },
        );
        self.index.add(signature, id);
        Ok(id)
    }

    /// Remove `post_id`. Removing an unknown post is a warning-logged
    /// no-op.
    pub fn remove(&mut self, post_id: u64) -> Result<()> {
        let Some(row) = self.store.get_by_post_id(post_id)? else {
            tracing::warn!("removing unknown post #{}, ignored", post_id);
            return Ok(());
        };

        self.index.remove(&row.signature, row.id);
        self.table.tombstone(row.id as usize);
        self.store.delete_by_post_id(post_id)?;
        Ok(())
    }

    /// Read-through lookup of a stored image.
    pub fn get(&self, post_id: u64) -> Result<Option<PersistedImage>> {
        self.store.get_by_post_id(post_id)
    }

    /// Image table length: highest-ever assigned internal index plus
    /// one, tombstones included.
    pub fn count(&self) -> usize {
        self.table.len()
    }

    /// Number of live (non-tombstoned) images.
    pub fn live_count(&self) -> usize {
        self.table.live()
    }

    /// Rank the stored images by similarity to `signature` and return
    /// the best `limit` of them, best first.
    pub fn query(&self, signature: &HaarSignature, limit: usize) -> Vec<Match> {
        if limit == 0 || self.table.is_empty() {
            return Vec::new();
        }

        let colors = signature.num_colors();
        let mut scores = vec![0f32; self.table.len()];

        // Luminance seed: DC distance, smaller is better.
        for (slot, score) in scores.iter_mut().enumerate() {
            if let Some(record) = self.table.get(slot) {
                let mut s = 0f32;
                for c in 0..colors {
                    s += WEIGHTS[0][c] * (record.avgl[c] - signature.avglf[c]).abs() as f32;
                }
                *score = s;
            }
        }

        // Every shared coefficient subtracts its band weight; `scale`
        // accumulates the total subtractable weight for normalization.
        let mut scale = 0f32;
        for c in 0..colors {
            for &coef in &signature.sig[c] {
                let bucket = self.index.bucket(c, coef);
                if bucket.is_empty() {
                    continue;
                }

                let weight = WEIGHTS[band_of(coef.unsigned_abs() as usize)][c];
                scale -= weight;
                for &index in bucket {
                    scores[index as usize] -= weight;
                }
            }
        }

        // Single pass top-K: bounded max-heap over (score, index),
        // tombstoned slots skipped.
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(limit + 1);
        for (slot, &score) in scores.iter().enumerate() {
            if self.table.get(slot).is_none() {
                continue;
            }
            if heap.len() < limit {
                heap.push(Candidate {
                    score,
                    index: slot as u32,
                });
            } else if heap.peek().is_some_and(|worst| score < worst.score) {
                heap.pop();
                heap.push(Candidate {
                    score,
                    index: slot as u32,
                });
            }
        }

        let scale = if scale != 0.0 { 1.0 / scale } else { 0.0 };
        let mut matches = Vec::with_capacity(heap.len());
        while let Some(candidate) = heap.pop() {
            let record = self
                .table
                .get(candidate.index as usize)
                .expect("top-K candidates are live slots");
            matches.push(Match {
                post_id: record.post_id,
                score: candidate.score * 100.0 * scale,
            });
        }
        matches.reverse();
        matches
    }
}
