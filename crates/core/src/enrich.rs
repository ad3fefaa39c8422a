//! C3 — Enrichment Pipeline: background extraction of derivable facts and
//! embedding refresh. Never on the critical path of ingest or search.
//!
//! Scheduling follows a bounded-channel worker-pool idiom: a bounded work
//! queue drained by a small worker pool, one task per item rather than one
//! per file event, since enrichment work (OCR, PDF parsing) is heavier than
//! a debounce tick.

use crate::embed::Embedder;
use crate::engine::EngineHandles;
use crate::item::{Category, ItemId, ItemPatch, Metadata};
use crate::store::DerivedKind;
use dashmap::DashMap;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Bounded FIFO queue of enrichment tasks plus a pool of worker threads.
/// Queue depth is bounded so a burst of ingests applies backpressure to the
/// caller rather than growing without limit; `submit` blocks the enrichment
/// scheduler, never the ingest caller, since `Engine::ingest_*` only ever
/// sends, it does not wait on a reply.
pub struct EnrichmentQueue {
    tx: SyncSender<ItemId>,
    pub task_states: Arc<DashMap<ItemId, TaskState>>,
}

const QUEUE_CAPACITY: usize = 256;

impl EnrichmentQueue {
    /// Start `workers` threads draining the queue against `handles`. One
    /// worker per core is a reasonable default; a single worker is also
    /// correct, just slower.
    pub fn start(handles: Arc<EngineHandles>, workers: usize) -> Self {
        let (tx, rx) = sync_channel::<ItemId>(QUEUE_CAPACITY);
        let task_states: Arc<DashMap<ItemId, TaskState>> = Arc::new(DashMap::new());
        let rx = Arc::new(std::sync::Mutex::new(rx));

        let workers = workers.max(1);
        for worker_id in 0..workers {
            let rx = Arc::clone(&rx);
            let handles = Arc::clone(&handles);
            let task_states = Arc::clone(&task_states);
            std::thread::spawn(move || worker_loop(worker_id, rx, handles, task_states));
        }

        Self { tx, task_states }
    }

    /// Enqueue `id` for enrichment. Marks the task `pending` before the
    /// worker picks it up so `task_states` never misses a submitted item.
    pub fn submit(&self, id: ItemId) {
        self.task_states.insert(id, TaskState::Pending);
        if self.tx.send(id).is_err() {
            tracing::warn!(item_id = %id, "Enrichment queue closed, dropping task");
            self.task_states.insert(id, TaskState::Failed);
        }
    }

    pub fn state_of(&self, id: ItemId) -> Option<TaskState> {
        self.task_states.get(&id).map(|r| *r)
    }
}

fn worker_loop(
    worker_id: usize,
    rx: Arc<std::sync::Mutex<Receiver<ItemId>>>,
    handles: Arc<EngineHandles>,
    task_states: Arc<DashMap<ItemId, TaskState>>,
) {
    loop {
        let id = {
            let rx = rx.lock().unwrap();
            match rx.recv() {
                Ok(id) => id,
                Err(_) => return,
            }
        };
        task_states.insert(id, TaskState::Running);
        match run_pipeline(&handles, id) {
            Ok(()) => {
                task_states.insert(id, TaskState::Succeeded);
            }
            Err(e) => {
                tracing::warn!(worker = worker_id, item_id = %id, error = %e, "Enrichment stage failed");
                task_states.insert(id, TaskState::Failed);
            }
        }
    }
}

/// Run every stage in order for one item. Each stage swallows its own
/// failure — every stage is independent and its failure does not abort
/// later stages — only I/O against the item index itself is allowed to
/// bubble up and mark the whole task failed.
fn run_pipeline(handles: &EngineHandles, id: ItemId) -> crate::error::EngineResult<()> {
    let mut item = handles.index.get(id)?;
    let mut metadata = item.metadata.clone();

    // Stage 1: size/format probe. `size_bytes`/`mime_type` are already final
    // from ingest; the only thing left to confirm here is `category` itself,
    // which may be narrowed from the catch-all `Documents` (assigned at
    // ingest for any extension `validate::category_for_extension` doesn't
    // recognise) once the blob's actual magic bytes are known.
    let mut category = item.category;
    if category == Category::Documents {
        if let Some(sniffed) = sniff_category(handles, &item) {
            category = sniffed;
        }
    }

    if category == Category::Images {
        stage_image_thumbnail(handles, &item, &mut metadata);
    }

    if category == Category::Documents && has_ext(&metadata, "pdf") {
        stage_pdf(handles, &item, &mut metadata);
    }

    if matches!(category, Category::Documents | Category::Csv)
        && (has_ext(&metadata, "txt") || has_ext(&metadata, "csv") || has_ext(&metadata, "tsv"))
    {
        stage_plain_text(handles, &item, &mut metadata);
    }

    if category == Category::Images {
        stage_ocr(handles, &item, &mut metadata);
    }

    if category == Category::Videos {
        stage_video_poster(handles, &item, &mut metadata);
    }

    #[cfg(feature = "llm-enrich")]
    if item.kind == crate::item::Kind::Text {
        crate::llm::enrich(handles, &item, &mut metadata);
    }

    item.metadata = metadata;
    let category_patch = if category != item.category { Some(category) } else { None };
    let updated = handles.index.update(
        id,
        ItemPatch { category: category_patch, title: None, metadata: Some(item.metadata.clone()) },
    )?;
    item = updated;

    // Rebuild searchable text and refresh the embedding, replacing the
    // initial embedding written at ingest.
    let searchable_text = item.compute_searchable_text();
    if let Some(vector) = handles.embedder.embed(&searchable_text) {
        let mut semantic = handles.semantic.lock().unwrap();
        semantic.upsert(id, item.created_at.timestamp_millis(), vector)?;
        semantic.save(&handles.vault_dir)?;
    }

    let _ = handles.notify.send(id);
    Ok(())
}

/// Inspect a blob's leading bytes to narrow the catch-all `Documents`
/// category assigned at ingest for extensions `validate::category_for_extension`
/// doesn't recognise. Returns `None` (leave as `Documents`) unless a known
/// signature matches.
fn sniff_category(handles: &EngineHandles, item: &crate::item::Item) -> Option<Category> {
    let hash = item.hash.as_deref()?;
    let path = handles.store.path_of(hash).ok()?;
    let mut buf = [0u8; 16];
    let n = {
        use std::io::Read;
        let mut f = std::fs::File::open(&path).ok()?;
        f.read(&mut buf).ok()?
    };
    let head = &buf[..n];
    if head.starts_with(b"\x89PNG\r\n\x1a\n")
        || head.starts_with(b"\xff\xd8\xff")
        || head.starts_with(b"GIF87a")
        || head.starts_with(b"GIF89a")
        || (head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP")
    {
        return Some(Category::Images);
    }
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return Some(Category::Videos);
    }
    None
}

fn has_ext(metadata: &Metadata, ext: &str) -> bool {
    metadata
        .filename
        .as_deref()
        .and_then(crate::validate::extension_of)
        .map(|e| e == ext)
        .unwrap_or(false)
}

fn stage_image_thumbnail(handles: &EngineHandles, item: &crate::item::Item, metadata: &mut Metadata) {
    if metadata.thumbnail_ref.is_some() {
        return; // idempotent: already generated
    }
    let Some(hash) = &item.hash else { return };
    let Ok(path) = handles.store.path_of(hash) else { return };
    let result = (|| -> Result<String, image::ImageError> {
        let img = image::open(&path)?;
        let thumb = img.resize_to_fill(480, 320, image::imageops::FilterType::Triangle);
        let mut bytes = Vec::new();
        thumb.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Jpeg)?;
        handles
            .store
            .put_derived(hash, DerivedKind::ImageThumb, &bytes, "jpg")
            .map_err(|_| image::ImageError::IoError(std::io::Error::other("store write failed")))
    })();
    match result {
        Ok(derived_ref) => metadata.thumbnail_ref = Some(derived_ref),
        Err(e) => tracing::debug!(item_id = %item.id, error = %e, "Thumbnail generation failed"),
    }
}

fn stage_pdf(handles: &EngineHandles, item: &crate::item::Item, metadata: &mut Metadata) {
    let Some(hash) = &item.hash else { return };
    let Ok(path) = handles.store.path_of(hash) else { return };

    if let Ok(doc) = lopdf::Document::load(&path) {
        metadata.page_count = Some(doc.get_pages().len() as u32);
        if let Ok(info) = doc.trailer.get(b"Info").and_then(|o| o.as_reference()) {
            if let Ok(info_dict) = doc.get_object(info).and_then(|o| o.as_dict()) {
                metadata.doc_title = pdf_string_field(info_dict, b"Title");
                metadata.author = pdf_string_field(info_dict, b"Author");
                metadata.creation_date = pdf_string_field(info_dict, b"CreationDate");
            }
        }
    }

    if let Ok(text) = pdf_extract::extract_text(&path) {
        metadata.set_extracted_text(text, handles.config.extracted_text_cap_bytes);
    }

    stage_pdf_cover(handles, item, hash, &path, metadata);
}

/// Render page 1 as a cover preview by shelling out to the system `pdftoppm`
/// (poppler-utils) — the same "shell out to an external tool when there's no
/// pure-Rust library for it" pattern `stage_video_poster` below uses for
/// `ffmpeg`. Absence of `pdftoppm` is not fatal; the cover is best-effort and
/// may be absent.
fn stage_pdf_cover(
    handles: &EngineHandles,
    item: &crate::item::Item,
    hash: &str,
    path: &std::path::Path,
    metadata: &mut Metadata,
) {
    if metadata.thumbnail_ref.is_some() {
        return; // idempotent: already generated
    }
    let Ok(out_dir) = tempfile::tempdir() else { return };
    let prefix = out_dir.path().join("cover");
    let status = std::process::Command::new("pdftoppm")
        .args(["-jpeg", "-f", "1", "-l", "1", "-scale-to", "480", "-singlefile"])
        .arg(path)
        .arg(&prefix)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => {
            let rendered = prefix.with_extension("jpg");
            if let Ok(bytes) = std::fs::read(&rendered) {
                if let Ok(derived_ref) = handles.store.put_derived(hash, DerivedKind::PdfCover, &bytes, "jpg") {
                    metadata.thumbnail_ref = Some(derived_ref);
                }
            }
        }
        Ok(_) => tracing::debug!(item_id = %item.id, "pdftoppm exited non-zero, no pdf cover"),
        Err(e) => tracing::debug!(item_id = %item.id, error = %e, "pdftoppm not available, skipping pdf cover"),
    }
}

/// Read a PDF info-dictionary entry as text, regardless of whether lopdf
/// stored it as a literal or hex string — matched on the raw variant rather
/// than a string-coercing accessor, since the exact bytes/format depend on
/// the producing application.
fn pdf_string_field(dict: &lopdf::Dictionary, key: &[u8]) -> Option<String> {
    match dict.get(key).ok()? {
        lopdf::Object::String(bytes, _) => Some(String::from_utf8_lossy(bytes).to_string()),
        _ => None,
    }
}

fn stage_plain_text(handles: &EngineHandles, item: &crate::item::Item, metadata: &mut Metadata) {
    let Some(hash) = &item.hash else { return };
    let Ok(path) = handles.store.path_of(hash) else { return };
    if let Ok(text) = std::fs::read_to_string(&path) {
        metadata.set_extracted_text(text, handles.config.extracted_text_cap_bytes);
    }
}

fn stage_ocr(handles: &EngineHandles, item: &crate::item::Item, metadata: &mut Metadata) {
    #[cfg(feature = "ocr")]
    {
        let Some(hash) = &item.hash else { return };
        let Ok(path) = handles.store.path_of(hash) else { return };
        let Ok(image) = rusty_tesseract::Image::from_path(&path) else {
            tracing::debug!(item_id = %item.id, "OCR input image unreadable, skipping");
            return;
        };
        let args = rusty_tesseract::Args::default();
        match rusty_tesseract::image_to_string(&image, &args) {
            Ok(text) if !text.trim().is_empty() => {
                let caption = text.lines().next().unwrap_or("").trim().to_string();
                metadata.set_extracted_text(text, handles.config.extracted_text_cap_bytes);
                if !caption.is_empty() {
                    metadata.caption = Some(crate::item::truncate_bytes(caption, 140));
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(item_id = %item.id, error = %e, "OCR failed"),
        }
    }
    #[cfg(not(feature = "ocr"))]
    {
        let _ = (handles, item, metadata);
    }
}

/// Capture a single frame near t=1s by shelling out to the system `ffmpeg`,
/// if present — this is enrichment from
/// the pack's broader "shell out to an external tool when the platform
/// doesn't expose a library" pattern. Absence of `ffmpeg` is not fatal.
fn stage_video_poster(handles: &EngineHandles, item: &crate::item::Item, metadata: &mut Metadata) {
    let Some(hash) = &item.hash else { return };
    let Ok(path) = handles.store.path_of(hash) else { return };
    let out = tempfile::Builder::new().suffix(".jpg").tempfile();
    let Ok(out) = out else { return };
    let status = std::process::Command::new("ffmpeg")
        .args(["-y", "-ss", "1", "-i"])
        .arg(&path)
        .args(["-frames:v", "1"])
        .arg(out.path())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => {
            if let Ok(bytes) = std::fs::read(out.path()) {
                if let Ok(derived_ref) = handles.store.put_derived(hash, DerivedKind::VideoPoster, &bytes, "jpg") {
                    metadata.thumbnail_ref = Some(derived_ref);
                }
            }
        }
        Ok(_) => tracing::debug!(item_id = %item.id, "ffmpeg exited non-zero, no video poster"),
        Err(e) => tracing::debug!(item_id = %item.id, error = %e, "ffmpeg not available, skipping video poster"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_ext_matches_case_insensitively() {
        let mut m = Metadata::new();
        m.filename = Some("Report.PDF".to_string());
        assert!(has_ext(&m, "pdf"));
        assert!(!has_ext(&m, "txt"));
    }
}
