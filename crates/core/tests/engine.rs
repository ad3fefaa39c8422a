//! Integration suite exercising the full `Engine` through real vaults on
//! disk, each in its own `tempfile::tempdir()` vault so the bounded
//! enrichment worker pool never interferes across tests.

use dumpvault_core::{Category, Config, Engine, EngineError, Kind};
use std::thread;
use std::time::{Duration, Instant};

fn open_engine() -> (Engine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.vault_dir = Some(dir.path().to_path_buf());
    config.enrichment_workers = Some(1);
    (Engine::open(config).unwrap(), dir)
}

/// Poll until `pred` holds or the deadline passes, re-fetching the item each
/// time — used to wait for background enrichment without a fixed sleep.
fn wait_for(engine: &Engine, id: uuid::Uuid, pred: impl Fn(&dumpvault_core::Item) -> bool) -> dumpvault_core::Item {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let item = engine.get(id).unwrap();
        if pred(&item) {
            return item;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for enrichment");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn tiny_png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

// Ingest text, then search finds it by content.
#[test]
fn ingest_text_then_search_finds_it_first() {
    let (engine, _dir) = open_engine();
    let item = engine.ingest_text("Remember to review PR #123").unwrap();
    assert_eq!(item.kind, Kind::Text);

    let results = engine.search("review pr", 5).unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].0.id, item.id);
}

// Scenario 3: pasting a URL produces a link item findable by its title words.
#[test]
fn paste_url_ingests_as_link_and_is_searchable() {
    let (engine, _dir) = open_engine();
    let item = engine.ingest_link("https://example.com/docs", None).unwrap();
    assert_eq!(item.kind, Kind::Link);
    assert_eq!(item.category, Category::Links);
    assert_eq!(item.metadata.url.as_deref(), Some("https://example.com/docs"));

    let results = engine.search("example docs", 5).unwrap();
    assert!(results.iter().any(|(i, _)| i.id == item.id));
}

// Scenario 2: the same file ingested three times produces three items
// sharing one blob; deleting two leaves the blob, deleting the third
// removes it (and its thumbnail, once enrichment has produced one).
#[test]
fn repeated_file_ingest_dedupes_blob_and_gcs_on_last_delete() {
    let (engine, dir) = open_engine();
    let path = dir.path().join("capture.png");
    std::fs::write(&path, tiny_png_bytes()).unwrap();

    let a = engine.ingest_file(&path).unwrap();
    let b = engine.ingest_file(&path).unwrap();
    let c = engine.ingest_file(&path).unwrap();
    assert_eq!(a.category, Category::Images);
    assert_eq!(a.hash, b.hash);
    assert_eq!(b.hash, c.hash);

    let all = engine.list().unwrap();
    assert_eq!(all.len(), 3);

    // wait for enrichment to produce a thumbnail on at least one of them
    let enriched = wait_for(&engine, a.id, |item| item.metadata.thumbnail_ref.is_some());
    let thumb_ref = enriched.metadata.thumbnail_ref.clone().unwrap();

    engine.delete(a.id).unwrap();
    engine.delete(b.id).unwrap();
    // c still references the hash; blob must survive
    let hash = c.hash.clone().unwrap();
    assert!(engine_store_has_blob(&dir, &hash));
    assert!(engine_store_has_thumb(&dir, &thumb_ref));

    engine.delete(c.id).unwrap();
    assert!(!engine_store_has_blob(&dir, &hash));
    assert!(!engine_store_has_thumb(&dir, &thumb_ref));
}

fn engine_store_has_blob(dir: &tempfile::TempDir, hash: &str) -> bool {
    std::fs::read_dir(dir.path().join("blobs"))
        .unwrap()
        .flatten()
        .any(|e| e.file_name().to_string_lossy().starts_with(hash))
}

fn engine_store_has_thumb(dir: &tempfile::TempDir, thumb_ref: &str) -> bool {
    dir.path().join("blobs").join("thumbnails").join(thumb_ref).is_file()
}

// Plain-text enrichment stage: a .txt file's body is folded into
// `extracted_text` and becomes searchable once enrichment completes, even
// though it was not part of the filename or title at ingest time.
#[test]
fn text_file_body_becomes_searchable_after_enrichment() {
    let (engine, dir) = open_engine();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "the body mentions zephyrwombat only here").unwrap();

    let item = engine.ingest_file(&path).unwrap();
    assert_eq!(item.category, Category::Documents);

    // immediately after ingest, the item is findable by filename...
    let immediate = engine.search("notes", 5).unwrap();
    assert!(immediate.iter().any(|(i, _)| i.id == item.id));

    // ...and after enrichment, by body text that never appeared in the title.
    wait_for(&engine, item.id, |i| i.metadata.extracted_text.is_some());
    let by_body = engine.search("zephyrwombat", 5).unwrap();
    assert!(by_body.iter().any(|(i, _)| i.id == item.id));
}

// A file with an unrecognised extension lands in the catch-all `Documents`
// category at ingest, then gets narrowed to `Images` once enrichment sniffs
// the blob's real magic bytes.
#[test]
fn unrecognised_extension_is_reclassified_as_images_after_enrichment() {
    let (engine, dir) = open_engine();
    let path = dir.path().join("attachment.bin");
    std::fs::write(&path, tiny_png_bytes()).unwrap();

    let item = engine.ingest_file(&path).unwrap();
    assert_eq!(item.category, Category::Documents);

    let enriched = wait_for(&engine, item.id, |i| i.category == Category::Images);
    assert_eq!(enriched.category, Category::Images);
}

#[test]
fn ingest_file_rejects_reject_list_extension_without_side_effects() {
    let (engine, dir) = open_engine();
    let path = dir.path().join("installer.exe");
    std::fs::write(&path, b"MZ\x90\x00").unwrap();

    let before = engine.list().unwrap().len();
    let err = engine.ingest_file(&path).unwrap_err();
    assert!(matches!(err, EngineError::FileRejected(_)));
    assert_eq!(engine.list().unwrap().len(), before);
}

// Zero-byte files succeed and hash to the SHA-256 of the empty string,
// deduplicating like any other blob.
#[test]
fn zero_byte_file_succeeds_and_dedupes() {
    let (engine, dir) = open_engine();
    let path = dir.path().join("empty.txt");
    std::fs::write(&path, b"").unwrap();
    let a = engine.ingest_file(&path).unwrap();
    let b = engine.ingest_file(&path).unwrap();
    assert_eq!(
        a.hash.as_deref(),
        Some("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
    );
    assert_eq!(a.hash, b.hash);
}

#[test]
fn delete_unknown_id_is_not_found() {
    let (engine, _dir) = open_engine();
    assert!(matches!(engine.delete(uuid::Uuid::new_v4()), Err(EngineError::NotFound)));
}

// Restarting the engine against the same vault directory must not lose
// items, their blobs, or their embeddings — durability across restarts is
// durability across restarts is a hard requirement, not an optimization.
#[test]
fn items_and_embeddings_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let make_config = || {
        let mut c = Config::default();
        c.vault_dir = Some(dir.path().to_path_buf());
        c.enrichment_workers = Some(1);
        c
    };

    let item_id = {
        let engine = Engine::open(make_config()).unwrap();
        let item = engine.ingest_text("durable across restarts").unwrap();
        item.id
    };

    let engine = Engine::open(make_config()).unwrap();
    let fetched = engine.get(item_id).unwrap();
    assert_eq!(fetched.content.as_deref(), Some("durable across restarts"));
    let results = engine.search("durable across restarts", 5).unwrap();
    assert!(results.iter().any(|(i, _)| i.id == item_id));
}
