//! C4 — Semantic Index: a flat `Vec<f32>` embedding array plus a parallel
//! item-id vector, searched by cosine similarity. Embeddings are
//! L2-normalized at write time so search is a pure dot product, and the
//! store is a single contiguous buffer rather than one allocation per vector.

use crate::error::{EngineError, EngineResult};
use crate::item::ItemId;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Serialize, Deserialize, Default)]
struct OnDisk {
    dim: usize,
    ids: Vec<ItemId>,
    created_at_millis: Vec<i64>,
    embeddings: Vec<f32>,
}

/// In-memory semantic index, mirrored to `embeddings.bin` via `bincode`.
pub struct SemanticIndex {
    dim: usize,
    ids: Vec<ItemId>,
    created_at_millis: Vec<i64>,
    embeddings: Vec<f32>,
}

impl SemanticIndex {
    pub fn new(dim: usize) -> Self {
        Self { dim, ids: Vec::new(), created_at_millis: Vec::new(), embeddings: Vec::new() }
    }

    fn path(vault_dir: &Path) -> std::path::PathBuf {
        vault_dir.join("embeddings.bin")
    }

    /// Load the on-disk index, or an empty one of `dim` width if absent.
    /// A dimension mismatch between the file and `dim` (e.g. after switching
    /// `embedding_model`) discards the stale file rather than erroring —
    /// the startup backfill migration (engine.rs) repopulates it.
    pub fn open(vault_dir: &Path, dim: usize) -> EngineResult<Self> {
        let path = Self::path(vault_dir);
        let Ok(bytes) = std::fs::read(&path) else {
            return Ok(Self::new(dim));
        };
        let on_disk: OnDisk = match bincode::deserialize(&bytes) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Corrupt embeddings.bin, starting empty index");
                return Ok(Self::new(dim));
            }
        };
        if on_disk.dim != dim {
            tracing::warn!(on_disk = on_disk.dim, expected = dim, "Embedding dimension changed, discarding index");
            return Ok(Self::new(dim));
        }
        Ok(Self {
            dim,
            ids: on_disk.ids,
            created_at_millis: on_disk.created_at_millis,
            embeddings: on_disk.embeddings,
        })
    }

    pub fn save(&self, vault_dir: &Path) -> EngineResult<()> {
        let on_disk = OnDisk {
            dim: self.dim,
            ids: self.ids.clone(),
            created_at_millis: self.created_at_millis.clone(),
            embeddings: self.embeddings.clone(),
        };
        let bytes = bincode::serialize(&on_disk).map_err(|e| EngineError::Corruption(e.to_string()))?;
        let path = Self::path(vault_dir);
        let mut tmp = tempfile::NamedTempFile::new_in(vault_dir)?;
        std::io::Write::write_all(&mut tmp, &bytes)?;
        tmp.persist(&path).map_err(|e| EngineError::Io(e.error))?;
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn size(&self) -> usize {
        self.ids.len()
    }

    fn position(&self, id: ItemId) -> Option<usize> {
        self.ids.iter().position(|&x| x == id)
    }

    /// Insert or replace the embedding for `id`. `created_at_millis` feeds
    /// the deterministic tie-break in `query`.
    pub fn upsert(&mut self, id: ItemId, created_at_millis: i64, vector: Vec<f32>) -> EngineResult<()> {
        if vector.len() != self.dim {
            return Err(EngineError::Corruption(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dim,
                vector.len()
            )));
        }
        if let Some(pos) = self.position(id) {
            let start = pos * self.dim;
            self.embeddings[start..start + self.dim].copy_from_slice(&vector);
            self.created_at_millis[pos] = created_at_millis;
        } else {
            self.ids.push(id);
            self.created_at_millis.push(created_at_millis);
            self.embeddings.extend_from_slice(&vector);
        }
        Ok(())
    }

    pub fn remove(&mut self, id: ItemId) {
        if let Some(pos) = self.position(id) {
            let start = pos * self.dim;
            self.embeddings.drain(start..start + self.dim);
            self.ids.remove(pos);
            self.created_at_millis.remove(pos);
        }
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.position(id).is_some()
    }

    /// Cosine similarity search (dot product on L2-normalized vectors).
    /// Ties break by descending `created_at` then ascending `id` so results
    /// are stable across repeated queries.
    pub fn query(&self, vector: &[f32], k: usize) -> EngineResult<Vec<(ItemId, f32)>> {
        if vector.len() != self.dim {
            return Err(EngineError::Corruption(format!(
                "query dimension mismatch: expected {}, got {}",
                self.dim,
                vector.len()
            )));
        }
        let mut scored: Vec<(usize, f32)> = Vec::with_capacity(self.ids.len());
        for i in 0..self.ids.len() {
            let start = i * self.dim;
            let candidate = &self.embeddings[start..start + self.dim];
            let dot: f32 = vector.iter().zip(candidate.iter()).map(|(a, b)| a * b).sum();
            scored.push((i, dot));
        }
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.created_at_millis[b.0].cmp(&self.created_at_millis[a.0]))
                .then_with(|| self.ids[a.0].cmp(&self.ids[b.0]))
        });
        scored.truncate(k);
        Ok(scored.into_iter().map(|(i, score)| (self.ids[i], score)).collect())
    }
}
