//! The engine facade: wires the content store, item index, enrichment
//! pipeline, and semantic index behind the entry points the overlay
//! controller and HTTP daemon both call.
//!
//! `ingest_*` always returns with the item's primary fields final and its
//! initial embedding written, before enrichment is scheduled, so the
//! controller's confirmation state reflects real, queryable data.

use crate::config::Config;
use crate::embed::{resolve_embedder, Embedder};
use crate::enrich::EnrichmentQueue;
use crate::error::{EngineError, EngineResult};
use crate::index::ItemIndex;
use crate::item::{Category, Item, ItemId, Kind, Metadata};
use crate::semantic::SemanticIndex;
use crate::store::ContentStore;
use crate::validate;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Minimum query length, in characters, before `search` will call the
/// embedding function at all.
const MIN_QUERY_LEN: usize = 2;

/// Shared state reachable from enrichment workers and the facade alike.
/// Kept as its own struct (rather than folded into `Engine`) so
/// `EnrichmentQueue::start` can hold an `Arc` to it without holding an
/// `Arc<Engine>` that would also need to own the queue.
pub struct EngineHandles {
    pub vault_dir: PathBuf,
    pub index: ItemIndex,
    pub store: ContentStore,
    pub semantic: Mutex<SemanticIndex>,
    pub embedder: Box<dyn Embedder>,
    pub config: Config,
    /// Broadcasts an item id whenever the index changes (insert, enrichment
    /// update, delete) — a one-way engine-to-subscriber channel; the UI never
    /// calls back into the engine from within a notification handler.
    /// Lagging subscribers just miss intermediate ids; they can always
    /// re-`list()` to resync.
    pub notify: tokio::sync::broadcast::Sender<ItemId>,
}

/// A change to an item that subscribers may want to react to — always
/// followed by a fresh `get`/`list` rather than carrying the item inline, so
/// a slow subscriber can't hold a stale copy.
pub type ItemsUpdated = ItemId;

const NOTIFY_CAPACITY: usize = 256;

pub struct Engine {
    handles: Arc<EngineHandles>,
    queue: EnrichmentQueue,
}

impl Engine {
    pub fn open(config: Config) -> EngineResult<Self> {
        let vault_dir = config.resolved_vault_dir();
        std::fs::create_dir_all(&vault_dir)?;

        let index = ItemIndex::open(&vault_dir)?;
        let store = ContentStore::open(&vault_dir)?;
        let embedder = resolve_embedder(&config.embedding_model);
        let semantic = SemanticIndex::open(&vault_dir, embedder.dim())?;

        // sweep orphaned blobs once, at startup, never on a request path
        let hashes = index.all_hashes()?;
        let removed = store.sweep_orphans(|h| hashes.contains(h))?;
        if removed > 0 {
            tracing::info!(removed, "Swept orphaned blobs at startup");
        }

        let (notify, _) = tokio::sync::broadcast::channel(NOTIFY_CAPACITY);
        let handles = Arc::new(EngineHandles {
            vault_dir: vault_dir.clone(),
            index,
            store,
            semantic: Mutex::new(semantic),
            embedder,
            config: config.clone(),
            notify,
        });

        let workers = config.enrichment_workers.unwrap_or_else(|| {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        });
        let queue = EnrichmentQueue::start(Arc::clone(&handles), workers);

        let engine = Self { handles, queue };
        engine.backfill_missing_embeddings()?;
        Ok(engine)
    }

    /// Items persisted before an embedding model change (or before the
    /// semantic index ever ran) have no vector. Enqueue them once at startup
    /// rather than on the query path — every item should have *some*
    /// embedding.
    fn backfill_missing_embeddings(&self) -> EngineResult<()> {
        let items = self.handles.index.list()?;
        let semantic = self.handles.semantic.lock().unwrap();
        let missing: Vec<ItemId> = items.iter().map(|i| i.id).filter(|id| !semantic.contains(*id)).collect();
        drop(semantic);
        for id in missing {
            self.queue.submit(id);
        }
        Ok(())
    }

    fn write_initial_embedding(&self, item: &Item) -> EngineResult<()> {
        let text = item.compute_searchable_text();
        if let Some(vector) = self.handles.embedder.embed(&text) {
            let mut semantic = self.handles.semantic.lock().unwrap();
            semantic.upsert(item.id, item.created_at.timestamp_millis(), vector)?;
            semantic.save(&self.handles.vault_dir)?;
        }
        Ok(())
    }

    fn finish_ingest(&self, item: Item) -> EngineResult<Item> {
        self.handles.index.insert(&item)?;
        self.write_initial_embedding(&item)?;
        self.queue.submit(item.id);
        let _ = self.handles.notify.send(item.id);
        Ok(item)
    }

    /// Subscribe to `items_updated` notifications — fires after every
    /// insert, enrichment update, and delete.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ItemId> {
        self.handles.notify.subscribe()
    }

    /// Root directory this vault's blobs and index live under.
    pub fn vault_dir(&self) -> &Path {
        &self.handles.vault_dir
    }

    /// Ingest pasted or typed text that is not a URL. Category is heuristic.
    pub fn ingest_text(&self, text: &str) -> EngineResult<Item> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidInput("text is empty".into()));
        }
        let category = validate::classify_text(trimmed);
        let title = first_line_title(trimmed);
        let now = chrono::Utc::now();
        let item = Item {
            id: ItemId::new_v4(),
            kind: Kind::Text,
            category,
            title,
            content: Some(trimmed.to_string()),
            blob_ref: None,
            hash: None,
            mime_type: Some("text/plain".to_string()),
            created_at: now,
            updated_at: now,
            metadata: Metadata::new(),
        };
        self.finish_ingest(item)
    }

    pub fn ingest_link(&self, url: &str, title: Option<&str>) -> EngineResult<Item> {
        let trimmed = url.trim();
        if !validate::looks_like_url(trimmed) {
            return Err(EngineError::InvalidInput("not a valid url".into()));
        }
        let now = chrono::Utc::now();
        let mut metadata = Metadata::new();
        metadata.url = Some(trimmed.to_string());
        let display_title = title.map(|t| t.to_string()).unwrap_or_else(|| trimmed.to_string());
        metadata.page_title = Some(display_title.clone());
        let item = Item {
            id: ItemId::new_v4(),
            kind: Kind::Link,
            category: Category::Links,
            title: display_title,
            content: None,
            blob_ref: None,
            hash: None,
            mime_type: None,
            created_at: now,
            updated_at: now,
            metadata,
        };
        self.finish_ingest(item)
    }

    /// Ingest a file by path. The controller already classified the
    /// extension (§4.5.5); the engine independently re-derives category and
    /// re-validates as defence in depth (§4.5.6).
    pub fn ingest_file(&self, path: &Path) -> EngineResult<Item> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| EngineError::InvalidInput("path has no filename".into()))?;
        validate::validate_extension(&filename)?;
        let metadata = std::fs::metadata(path).map_err(EngineError::Io)?;
        validate::validate_file_size(metadata.len())?;

        let bytes = std::fs::read(path).map_err(EngineError::Io)?;

        let ext = validate::extension_of(&filename);
        let category = ext.as_deref().map(validate::category_for_extension).unwrap_or(Category::Documents);
        let mime_type = mime_guess_from_ext(ext.as_deref());

        let hash = self.handles.store.put(&bytes, ext.as_deref())?;
        let now = chrono::Utc::now();
        let mut metadata = Metadata::new();
        metadata.filename = Some(filename.clone());
        metadata.size_bytes = Some(bytes.len() as u64);

        let item = Item {
            id: ItemId::new_v4(),
            kind: Kind::File,
            category,
            title: filename,
            content: None,
            blob_ref: Some(hash.clone()),
            hash: Some(hash),
            mime_type,
            created_at: now,
            updated_at: now,
            metadata,
        };
        self.finish_ingest(item)
    }

    /// Search by embedding similarity over `query`, falling back to an
    /// empty result set if the embedder rejects the query text (e.g. blank
    /// after trimming) rather than erroring — an empty query is a valid,
    /// if useless, search. Queries shorter than `MIN_QUERY_LEN` return empty
    /// without ever calling the embedding function.
    pub fn search(&self, query: &str, k: usize) -> EngineResult<Vec<(Item, f32)>> {
        if query.trim().chars().count() < MIN_QUERY_LEN {
            return Ok(Vec::new());
        }
        let Some(vector) = self.handles.embedder.embed(query) else {
            return Ok(Vec::new());
        };
        let semantic = self.handles.semantic.lock().unwrap();
        let hits = semantic.query(&vector, k)?;
        drop(semantic);

        let mut results = Vec::with_capacity(hits.len());
        for (id, score) in hits {
            match self.handles.index.get(id) {
                Ok(item) => results.push((item, score)),
                Err(EngineError::NotFound) => continue, // index/semantic drift; skip
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    pub fn list(&self) -> EngineResult<Vec<Item>> {
        self.handles.index.list()
    }

    pub fn get(&self, id: ItemId) -> EngineResult<Item> {
        self.handles.index.get(id)
    }

    /// Remove an item and garbage-collect its blob if no other item
    /// references the same content hash.
    pub fn delete(&self, id: ItemId) -> EngineResult<()> {
        let item = self.handles.index.get(id)?;
        self.handles.index.delete(id)?;
        {
            let mut semantic = self.handles.semantic.lock().unwrap();
            semantic.remove(id);
            semantic.save(&self.handles.vault_dir)?;
        }
        if let Some(hash) = &item.hash {
            if self.handles.index.count_references(hash)? == 0 {
                self.handles.store.remove(hash)?;
            }
        }
        let _ = self.handles.notify.send(id);
        Ok(())
    }

    pub fn enrichment_state(&self, id: ItemId) -> Option<crate::enrich::TaskState> {
        self.queue.state_of(id)
    }
}

/// The first line of pasted text, truncated, as a human-readable title.
fn first_line_title(text: &str) -> String {
    let line = text.lines().next().unwrap_or(text);
    crate::item::truncate_bytes(line.to_string(), 140)
}

fn mime_guess_from_ext(ext: Option<&str>) -> Option<String> {
    let ext = ext?;
    let mime = match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        _ => return None,
    };
    Some(mime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine() -> (Engine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.vault_dir = Some(dir.path().to_path_buf());
        config.enrichment_workers = Some(1);
        (Engine::open(config).unwrap(), dir)
    }

    #[test]
    fn ingest_text_is_immediately_searchable() {
        let (engine, _dir) = test_engine();
        let item = engine.ingest_text("Remember to review PR #123").unwrap();
        // single short line, no code markers: classify_text falls to Ideas.
        assert_eq!(item.category, Category::Ideas);
        let results = engine.search("review PR", 5).unwrap();
        assert!(results.iter().any(|(i, _)| i.id == item.id));
    }

    #[test]
    fn ingest_link_requires_url_shape() {
        let (engine, _dir) = test_engine();
        assert!(engine.ingest_link("not a url", None).is_err());
        let item = engine.ingest_link("https://example.com/article", Some("An Article")).unwrap();
        assert_eq!(item.kind, Kind::Link);
        assert_eq!(item.title, "An Article");
    }

    #[test]
    fn ingest_file_dedupes_identical_bytes_and_delete_gcs_blob() {
        let (engine, dir) = test_engine();
        let file_path = dir.path().join("note.txt");
        std::fs::write(&file_path, b"shared content").unwrap();

        let a = engine.ingest_file(&file_path).unwrap();
        let b = engine.ingest_file(&file_path).unwrap();
        assert_eq!(a.hash, b.hash);

        engine.delete(a.id).unwrap();
        // b still references the same hash; blob must survive
        assert!(engine.handles.store.path_of(b.hash.as_ref().unwrap()).is_ok());

        engine.delete(b.id).unwrap();
        assert!(engine.handles.store.path_of(a.hash.as_ref().unwrap()).is_err());
    }

    #[test]
    fn ingest_zero_byte_file_succeeds_and_dedupes() {
        let (engine, dir) = test_engine();
        let file_path = dir.path().join("empty.txt");
        std::fs::write(&file_path, b"").unwrap();
        let item = engine.ingest_file(&file_path).unwrap();
        assert_eq!(
            item.hash.as_deref(),
            Some("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
        );
    }

    #[test]
    fn ingest_file_rejects_executables() {
        let (engine, dir) = test_engine();
        let file_path = dir.path().join("setup.exe");
        std::fs::write(&file_path, b"MZ\x90\x00").unwrap();
        assert!(matches!(engine.ingest_file(&file_path), Err(EngineError::FileRejected(_))));
    }

    #[test]
    fn delete_missing_item_is_not_found() {
        let (engine, _dir) = test_engine();
        assert!(matches!(engine.delete(ItemId::new_v4()), Err(EngineError::NotFound)));
    }

    #[test]
    fn ingest_and_delete_notify_subscribers() {
        let (engine, _dir) = test_engine();
        let mut rx = engine.subscribe();
        let item = engine.ingest_text("notify me").unwrap();
        assert_eq!(rx.try_recv().unwrap(), item.id);
        engine.delete(item.id).unwrap();
        assert_eq!(rx.try_recv().unwrap(), item.id);
    }

    #[test]
    fn short_query_returns_empty_without_embedding() {
        let (engine, _dir) = test_engine();
        engine.ingest_text("a").unwrap();
        assert!(engine.search("a", 5).unwrap().is_empty());
        assert!(engine.search("", 5).unwrap().is_empty());
    }

    #[test]
    fn query_against_empty_index_is_empty_not_error() {
        let (engine, _dir) = test_engine();
        assert!(engine.search("anything at all", 5).unwrap().is_empty());
    }

    #[test]
    fn list_orders_newest_first() {
        let (engine, _dir) = test_engine();
        let a = engine.ingest_text("first").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = engine.ingest_text("second").unwrap();
        let items = engine.list().unwrap();
        assert_eq!(items[0].id, b.id);
        assert_eq!(items[1].id, a.id);
    }
}
