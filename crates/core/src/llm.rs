//! Optional language-model enrichment (`llm-enrich` feature, disabled by
//! default). Adds `llm_title`/`llm_keywords`/`llm_summary` to a text item's
//! metadata from a local, user-configured endpoint. Never called from the
//! search path; never surfaced as item content, only folded into searchable
//! text.

use crate::engine::EngineHandles;
use crate::item::{Item, Metadata};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct EnrichRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EnrichResponse {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    keywords: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

/// Best-effort: any failure (no endpoint configured, network error, bad
/// response, timeout) leaves `metadata` untouched and is logged, never
/// propagated — this enrichment stage is explicitly optional.
pub fn enrich(handles: &EngineHandles, item: &Item, metadata: &mut Metadata) {
    let Some(endpoint) = handles.config.llm_endpoint.as_deref() else { return };
    let Some(text) = &item.content else { return };

    let client = match reqwest::blocking::Client::builder().timeout(TIMEOUT).build() {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to build LLM client");
            return;
        }
    };

    let response = client.post(endpoint).json(&EnrichRequest { text }).send();
    match response.and_then(|r| r.json::<EnrichResponse>()) {
        Ok(parsed) => {
            metadata.llm_title = parsed.title;
            metadata.llm_keywords = parsed.keywords;
            metadata.llm_summary = parsed.summary;
        }
        Err(e) => tracing::debug!(item_id = %item.id, error = %e, "LLM enrichment failed"),
    }
}
