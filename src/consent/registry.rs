//! In-memory registry of consented faces.
//!
//! Maps logical person names to the union of embeddings derived from their
//! capture files. Guarded by a readers-writer lock: the video worker holds a
//! read guard for the duration of one frame's lookups, the consent monitor
//! takes the write lock for insert/delete.

use crate::vision::types::FaceEmbedding;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};

/// One capture file's contribution to the registry.
#[derive(Debug, Clone)]
pub struct ConsentRecord {
    pub path: PathBuf,
    pub name: String,
    pub embedding: FaceEmbedding,
}

#[derive(Default)]
struct RegistryInner {
    by_name: HashMap<String, Vec<ConsentRecord>>,
}

/// Snapshot handle for per-frame lookups; holds the read lock.
pub struct RegistrySnapshot<'a> {
    guard: RwLockReadGuard<'a, RegistryInner>,
}

impl RegistrySnapshot<'_> {
    /// Best match over every embedding of every name. Returns the name and
    /// similarity when the best cosine similarity meets `threshold`.
    pub fn match_embedding(
        &self,
        embedding: &FaceEmbedding,
        threshold: f32,
    ) -> Option<(String, f32)> {
        let mut best: Option<(&str, f32)> = None;
        for (name, records) in &self.guard.by_name {
            for record in records {
                let score = embedding.cosine_similarity(&record.embedding);
                if score >= threshold && best.map(|(_, s)| score > s).unwrap_or(true) {
                    best = Some((name, score));
                }
            }
        }
        best.map(|(name, score)| (name.to_string(), score))
    }

    pub fn is_empty(&self) -> bool {
        self.guard.by_name.is_empty()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.guard.by_name.contains_key(name)
    }
}

#[derive(Default)]
pub struct ConsentRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConsentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a read snapshot. The video worker holds this for one frame so
    /// all of the frame's lookups see a consistent state.
    pub fn snapshot(&self) -> RegistrySnapshot<'_> {
        RegistrySnapshot {
            guard: self.inner.read().unwrap(),
        }
    }

    /// Inserts a record. Re-inserting the same path replaces the previous
    /// record for that path, so the monitor's duplicate create events and
    /// the pipeline's own writes stay idempotent.
    pub fn insert(&self, record: ConsentRecord) {
        let mut inner = self.inner.write().unwrap();
        remove_path(&mut inner, &record.path);
        inner
            .by_name
            .entry(record.name.clone())
            .or_default()
            .push(record);
    }

    /// Removes the single record backed by `path`. The name's key is dropped
    /// when its last record goes. Returns the name if a record was removed.
    pub fn remove_file(&self, path: &Path) -> Option<String> {
        let mut inner = self.inner.write().unwrap();
        remove_path(&mut inner, path)
    }

    /// Distinct names currently consented.
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        let mut names: Vec<String> = inner.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Total number of embeddings across all names.
    pub fn embedding_count(&self) -> usize {
        let inner = self.inner.read().unwrap();
        inner.by_name.values().map(|records| records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().by_name.is_empty()
    }
}

fn remove_path(inner: &mut RegistryInner, path: &Path) -> Option<String> {
    let mut removed_name = None;
    inner.by_name.retain(|name, records| {
        let before = records.len();
        records.retain(|record| record.path != path);
        if records.len() < before {
            removed_name = Some(name.clone());
        }
        !records.is_empty()
    });
    removed_name
}
