//! The item data model — the unit of capture.
//!
//! `Kind` and `Category` are closed tagged variants: unknown values at a
//! serde boundary are rejected rather than coerced.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of `metadata.extracted_text`, in bytes. Extraction output
/// is unbounded in principle, so a cap of 1 MiB is enforced and documented here.
pub const MAX_EXTRACTED_TEXT_BYTES: usize = 1024 * 1024;

pub type ItemId = uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Text,
    Image,
    File,
    Link,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Text => "text",
            Kind::Image => "image",
            Kind::File => "file",
            Kind::Link => "link",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Closed classification tag, derived at ingest and possibly refined by
/// enrichment (only `Documents` may be narrowed further, see §4.3 stage 3/4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Ideas,
    Links,
    Code,
    Notes,
    Images,
    Documents,
    Videos,
    Csv,
    Text,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Ideas => "ideas",
            Category::Links => "links",
            Category::Code => "code",
            Category::Notes => "notes",
            Category::Images => "images",
            Category::Documents => "documents",
            Category::Videos => "videos",
            Category::Csv => "csv",
            Category::Text => "text",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Semi-structured metadata bag. Recognised keys are named fields; anything
/// enrichment discovers later that isn't anticipated here still survives via
/// `extra` (serde's `flatten`), so unknown keys round-trip without loss.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    /// Always "overlay" in this engine — the sole capture surface.
    #[serde(default = "source_overlay")]
    pub source: String,
    /// Optional LLM-derived fields (§4.3), appended to searchable text but
    /// never surfaced as item content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_keywords: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_summary: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn source_overlay() -> String {
    "overlay".to_string()
}

impl Metadata {
    pub fn new() -> Self {
        Self { source: source_overlay(), ..Default::default() }
    }

    /// Set `extracted_text`, truncating at a char boundary to stay under
    /// `max_bytes` (`Config::extracted_text_cap_bytes`, `MAX_EXTRACTED_TEXT_BYTES`
    /// by default).
    pub fn set_extracted_text(&mut self, text: String, max_bytes: usize) {
        self.extracted_text = Some(truncate_bytes(text, max_bytes));
    }
}

/// Truncate a string to at most `max_bytes`, backing off to the previous
/// char boundary, so truncation never splits a multi-byte UTF-8 sequence.
pub fn truncate_bytes(s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    s[..end].to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub kind: Kind,
    pub category: Category,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub metadata: Metadata,
}

impl Item {
    /// Lowercase concatenation of title, content, filename, extracted text,
    /// caption — the sole input to embedding.
    pub fn compute_searchable_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        parts.push(self.title.as_str());
        if let Some(c) = &self.content {
            parts.push(c.as_str());
        }
        if let Some(f) = &self.metadata.filename {
            parts.push(f.as_str());
        }
        if let Some(t) = &self.metadata.extracted_text {
            parts.push(t.as_str());
        }
        if let Some(c) = &self.metadata.caption {
            parts.push(c.as_str());
        }
        if let Some(t) = &self.metadata.llm_title {
            parts.push(t.as_str());
        }
        if let Some(k) = &self.metadata.llm_keywords {
            parts.push(k.as_str());
        }
        if let Some(s) = &self.metadata.llm_summary {
            parts.push(s.as_str());
        }
        parts.join(" ").to_lowercase()
    }
}

/// A partial update to an item, applied by `ItemIndex::update`. Only
/// enrichment and `delete` mutate items after ingest.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub category: Option<Category>,
    pub title: Option<String>,
    pub metadata: Option<Metadata>,
}
