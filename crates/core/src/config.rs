//! Vault configuration — loaded from `dumpvault.toml`, falling back to
//! defaults. Platform data/config directories are resolved with `dirs`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the vault (defaults to the platform data dir / "dumpvault").
    pub vault_dir: Option<PathBuf>,
    pub chord: ChordConfig,
    pub hold_threshold_ms: u64,
    pub confirmation_ms: u64,
    pub debounce_ms: u64,
    pub embedding_model: String,
    pub llm_endpoint: Option<String>,
    pub extracted_text_cap_bytes: usize,
    pub enrichment_workers: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault_dir: None,
            chord: ChordConfig::default(),
            hold_threshold_ms: 400,
            confirmation_ms: 1500,
            debounce_ms: 50,
            embedding_model: "hash".to_string(),
            llm_endpoint: None,
            extracted_text_cap_bytes: crate::item::MAX_EXTRACTED_TEXT_BYTES,
            enrichment_workers: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChordConfig {
    pub modifier: String,
    pub activator: String,
}

impl Default for ChordConfig {
    fn default() -> Self {
        Self { modifier: "Alt".to_string(), activator: "D".to_string() }
    }
}

impl Config {
    /// Load `dumpvault.toml` from `path` if given, else from the data
    /// directory, falling back to defaults when absent or unparsable.
    pub fn load(path: Option<&Path>) -> Self {
        let candidate = path.map(PathBuf::from).or_else(|| config_dir().map(|d| d.join("dumpvault.toml")));

        let Some(candidate) = candidate else { return Self::default() };
        let Ok(raw) = std::fs::read_to_string(&candidate) else { return Self::default() };
        match toml::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(path = %candidate.display(), error = %e, "Failed to parse config, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve the vault directory: explicit config, else the platform data
    /// directory joined with "dumpvault/vault".
    pub fn resolved_vault_dir(&self) -> PathBuf {
        self.vault_dir.clone().unwrap_or_else(|| data_dir().join("vault"))
    }
}

/// Platform data directory for dumpvault (`~/.local/share/dumpvault` on Linux,
/// `~/Library/Application Support/dumpvault` on macOS, `%APPDATA%\dumpvault` on
/// Windows), resolved with the `dirs` crate.
pub fn data_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("dumpvault")
}

pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dumpvault"))
}
