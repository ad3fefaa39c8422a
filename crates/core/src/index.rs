//! C2 — Item Index: persistent, consistent record of all items.
//!
//! Backed by SQLite (`rusqlite`, bundled) rather than an in-memory rescan,
//! since this engine needs durability across restarts and a secondary index
//! on `hash` and `created_at`, which SQLite gives for free.
//! A single `Mutex<Connection>` serialises writers — a single writer is
//! sufficient at this scale.

use crate::error::{EngineError, EngineResult};
use crate::item::{Category, Item, ItemId, ItemPatch, Kind, Metadata};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

pub struct ItemIndex {
    conn: Mutex<Connection>,
}

impl ItemIndex {
    pub fn open(vault_dir: &Path) -> EngineResult<Self> {
        std::fs::create_dir_all(vault_dir)?;
        let conn = Connection::open(vault_dir.join("items.db"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                category TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT,
                blob_ref TEXT,
                hash TEXT,
                mime_type TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                metadata TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_items_hash ON items(hash);
             CREATE INDEX IF NOT EXISTS idx_items_created_at ON items(created_at);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory index for tests that don't need a file on disk.
    #[cfg(test)]
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE items (
                id TEXT PRIMARY KEY, kind TEXT NOT NULL, category TEXT NOT NULL,
                title TEXT NOT NULL, content TEXT, blob_ref TEXT, hash TEXT,
                mime_type TEXT, created_at TEXT NOT NULL, updated_at TEXT NOT NULL,
                metadata TEXT NOT NULL
             );
             CREATE INDEX idx_items_hash ON items(hash);
             CREATE INDEX idx_items_created_at ON items(created_at);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn insert(&self, item: &Item) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<String> =
            conn.query_row("SELECT id FROM items WHERE id = ?1", params![item.id.to_string()], |r| r.get(0))
                .optional()?;
        if existing.is_some() {
            return Err(EngineError::DuplicateId);
        }
        conn.execute(
            "INSERT INTO items (id, kind, category, title, content, blob_ref, hash, mime_type, created_at, updated_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                item.id.to_string(),
                item.kind.as_str(),
                item.category.as_str(),
                item.title,
                item.content,
                item.blob_ref,
                item.hash,
                item.mime_type,
                item.created_at.to_rfc3339(),
                item.updated_at.to_rfc3339(),
                serde_json::to_string(&item.metadata).map_err(|e| EngineError::Corruption(e.to_string()))?,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: ItemId) -> EngineResult<Item> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM items WHERE id = ?1", params![id.to_string()], row_to_item)
            .optional()?
            .ok_or(EngineError::NotFound)
    }

    /// All items ordered by `created_at` descending.
    pub fn list(&self) -> EngineResult<Vec<Item>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM items ORDER BY created_at DESC")?;
        let rows = stmt.query_map([], row_to_item)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Merge `patch` into the record and bump `updated_at`. Used only by
    /// enrichment.
    pub fn update(&self, id: ItemId, patch: ItemPatch) -> EngineResult<Item> {
        let conn = self.conn.lock().unwrap();
        let mut item: Item = conn
            .query_row("SELECT * FROM items WHERE id = ?1", params![id.to_string()], row_to_item)
            .optional()?
            .ok_or(EngineError::NotFound)?;

        if let Some(category) = patch.category {
            item.category = category;
        }
        if let Some(title) = patch.title {
            item.title = title;
        }
        if let Some(metadata) = patch.metadata {
            item.metadata = metadata;
        }
        item.updated_at = chrono::Utc::now();

        conn.execute(
            "UPDATE items SET category = ?1, title = ?2, metadata = ?3, updated_at = ?4 WHERE id = ?5",
            params![
                item.category.as_str(),
                item.title,
                serde_json::to_string(&item.metadata).map_err(|e| EngineError::Corruption(e.to_string()))?,
                item.updated_at.to_rfc3339(),
                id.to_string(),
            ],
        )?;
        Ok(item)
    }

    pub fn delete(&self, id: ItemId) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM items WHERE id = ?1", params![id.to_string()])?;
        if affected == 0 {
            return Err(EngineError::NotFound);
        }
        Ok(())
    }

    /// Count items whose `blob_ref` equals `hash` — used by delete to decide
    /// whether to garbage-collect the blob.
    pub fn count_references(&self, hash: &str) -> EngineResult<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM items WHERE hash = ?1", params![hash], |r| r.get(0))?;
        Ok(count as u64)
    }

    pub fn all_hashes(&self) -> EngineResult<std::collections::HashSet<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT hash FROM items WHERE hash IS NOT NULL")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = std::collections::HashSet::new();
        for row in rows {
            out.insert(row?);
        }
        Ok(out)
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
    let id: String = row.get("id")?;
    let kind: String = row.get("kind")?;
    let category: String = row.get("category")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let metadata_json: String = row.get("metadata")?;

    let kind = match kind.as_str() {
        "text" => Kind::Text,
        "image" => Kind::Image,
        "file" => Kind::File,
        "link" => Kind::Link,
        _ => Kind::Text,
    };
    let category = parse_category(&category);
    let metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();

    Ok(Item {
        id: id.parse().unwrap_or_else(|_| uuid::Uuid::nil()),
        kind,
        category,
        title: row.get("title")?,
        content: row.get("content")?,
        blob_ref: row.get("blob_ref")?,
        hash: row.get("hash")?,
        mime_type: row.get("mime_type")?,
        created_at: created_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
        updated_at: updated_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
        metadata,
    })
}

pub fn parse_category(s: &str) -> Category {
    match s {
        "ideas" => Category::Ideas,
        "links" => Category::Links,
        "code" => Category::Code,
        "notes" => Category::Notes,
        "images" => Category::Images,
        "documents" => Category::Documents,
        "videos" => Category::Videos,
        "csv" => Category::Csv,
        _ => Category::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Metadata;

    fn sample_item() -> Item {
        let now = chrono::Utc::now();
        Item {
            id: uuid::Uuid::new_v4(),
            kind: Kind::Text,
            category: Category::Notes,
            title: "Remember to review PR".into(),
            content: Some("Remember to review PR #123".into()),
            blob_ref: None,
            hash: None,
            mime_type: None,
            created_at: now,
            updated_at: now,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn insert_get_roundtrip() {
        let index = ItemIndex::open_in_memory().unwrap();
        let item = sample_item();
        index.insert(&item).unwrap();
        let fetched = index.get(item.id).unwrap();
        assert_eq!(fetched.title, item.title);
        assert_eq!(fetched.content, item.content);
    }

    #[test]
    fn duplicate_insert_fails() {
        let index = ItemIndex::open_in_memory().unwrap();
        let item = sample_item();
        index.insert(&item).unwrap();
        assert!(matches!(index.insert(&item), Err(EngineError::DuplicateId)));
    }

    #[test]
    fn update_bumps_updated_at_and_persists_patch() {
        let index = ItemIndex::open_in_memory().unwrap();
        let item = sample_item();
        index.insert(&item).unwrap();
        let patch = ItemPatch { title: Some("New title".into()), ..Default::default() };
        let updated = index.update(item.id, patch).unwrap();
        assert_eq!(updated.title, "New title");
        assert!(updated.updated_at >= item.updated_at);
        let fetched = index.get(item.id).unwrap();
        assert_eq!(fetched.title, "New title");
    }

    #[test]
    fn delete_removes_record() {
        let index = ItemIndex::open_in_memory().unwrap();
        let item = sample_item();
        index.insert(&item).unwrap();
        index.delete(item.id).unwrap();
        assert!(matches!(index.get(item.id), Err(EngineError::NotFound)));
    }

    #[test]
    fn list_orders_by_created_at_desc() {
        let index = ItemIndex::open_in_memory().unwrap();
        let mut a = sample_item();
        a.created_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        let b = sample_item();
        index.insert(&a).unwrap();
        index.insert(&b).unwrap();
        let all = index.list().unwrap();
        assert_eq!(all[0].id, b.id);
        assert_eq!(all[1].id, a.id);
    }
}
