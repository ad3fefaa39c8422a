//! C1 — Content Store: content-addressed blob storage + derived artifacts.
//!
//! Every write is either fully visible or invisible: bytes land in a
//! `tempfile::NamedTempFile` next to the destination, then `persist()`
//! (rename) makes them visible atomically. Two concurrent `put` calls for
//! the same hash both succeed — the later persist is either a no-op or
//! replaces identical content.

use crate::error::{EngineError, EngineResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedKind {
    ImageThumb,
    PdfCover,
    VideoPoster,
}

impl DerivedKind {
    fn as_str(&self) -> &'static str {
        match self {
            DerivedKind::ImageThumb => "image-thumb",
            DerivedKind::PdfCover => "pdf-cover",
            DerivedKind::VideoPoster => "video-poster",
        }
    }
}

pub struct ContentStore {
    root: PathBuf,
    thumbs: PathBuf,
}

/// SHA-256 hex digest of the empty byte string — deduplicated by `put`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

impl ContentStore {
    pub fn open(vault_dir: &Path) -> EngineResult<Self> {
        let root = vault_dir.join("blobs");
        let thumbs = root.join("thumbnails");
        fs::create_dir_all(&thumbs)?;
        Ok(Self { root, thumbs })
    }

    fn blob_path(&self, hash: &str, ext: Option<&str>) -> PathBuf {
        match ext {
            Some(ext) if !ext.is_empty() => self.root.join(format!("{hash}.{ext}")),
            _ => self.root.join(hash),
        }
    }

    /// Find an existing blob for `hash`, trying the extensionless name first
    /// then scanning for `<hash>.*` (original extension is preserved for
    /// OS-level previews).
    fn find_existing(&self, hash: &str) -> Option<PathBuf> {
        let bare = self.root.join(hash);
        if bare.is_file() {
            return Some(bare);
        }
        let entries = fs::read_dir(&self.root).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(hash) && name.as_ref() != hash {
                return Some(entry.path());
            }
        }
        None
    }

    /// Write a blob keyed by the SHA-256 of its contents. Idempotent: if a
    /// blob with that hash already exists, returns the existing hash without
    /// rewriting.
    pub fn put(&self, bytes: &[u8], ext: Option<&str>) -> EngineResult<String> {
        let hash = hash_bytes(bytes);
        if self.find_existing(&hash).is_some() {
            return Ok(hash);
        }

        let dest = self.blob_path(&hash, ext);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        std::io::Write::write_all(&mut tmp, bytes)?;
        tmp.persist(&dest).map_err(|e| EngineError::Io(e.error))?;
        Ok(hash)
    }

    /// Local path for a blob, used by consumers that stream raw bytes
    /// (thumbnailing, OCR, PDF parsing). Does not open the file.
    pub fn path_of(&self, hash: &str) -> EngineResult<PathBuf> {
        self.find_existing(hash).ok_or(EngineError::NotFound)
    }

    /// Write a derived artifact whose name is a deterministic function of
    /// `(parent_hash, kind)` so repeated generation is idempotent.
    pub fn put_derived(
        &self,
        parent_hash: &str,
        kind: DerivedKind,
        bytes: &[u8],
        ext: &str,
    ) -> EngineResult<String> {
        let name = format!("{parent_hash}-{}.{ext}", kind.as_str());
        let dest = self.thumbs.join(&name);
        if dest.is_file() {
            return Ok(name);
        }
        let mut tmp = tempfile::NamedTempFile::new_in(&self.thumbs)?;
        std::io::Write::write_all(&mut tmp, bytes)?;
        tmp.persist(&dest).map_err(|e| EngineError::Io(e.error))?;
        Ok(name)
    }

    pub fn derived_path(&self, derived_ref: &str) -> PathBuf {
        self.thumbs.join(derived_ref)
    }

    /// Remove a blob and all its derived artifacts. Caller ensures no item
    /// references remain.
    pub fn remove(&self, hash: &str) -> EngineResult<()> {
        if let Some(path) = self.find_existing(hash) {
            fs::remove_file(path)?;
        }
        if let Ok(entries) = fs::read_dir(&self.thumbs) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with(&format!("{hash}-")) {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
        Ok(())
    }

    /// Remove any primary blob that no referencing item names via `keep_hash`.
    /// Runs once at daemon startup, never on a request path.
    pub fn sweep_orphans(&self, keep: impl Fn(&str) -> bool) -> EngineResult<usize> {
        let mut removed = 0usize;
        let Ok(entries) = fs::read_dir(&self.root) else { return Ok(0) };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let hash = name.split('.').next().unwrap_or(&name).to_string();
            if hash.len() == 64 && !keep(&hash) {
                let _ = fs::remove_file(&path);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_is_idempotent_and_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        let h1 = store.put(b"hello", None).unwrap();
        let h2 = store.put(b"hello", None).unwrap();
        assert_eq!(h1, h2);
        let entries: Vec<_> = fs::read_dir(dir.path().join("blobs")).unwrap().flatten().collect();
        // exactly one blob file (plus the thumbnails dir)
        let files: Vec<_> = entries.iter().filter(|e| e.path().is_file()).collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn empty_bytes_hash_to_known_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        let h = store.put(b"", None).unwrap();
        assert_eq!(h, "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }

    #[test]
    fn path_of_missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        assert!(matches!(store.path_of("deadbeef"), Err(EngineError::NotFound)));
    }
}
