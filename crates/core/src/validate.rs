//! Input validation and category classification. Pure, independently
//! unit-testable functions — no I/O.

use crate::error::{EngineError, EngineResult};
use crate::item::Category;

/// Files larger than this are rejected outright at ingest.
pub const MAX_FILE_BYTES: u64 = 200 * 1024 * 1024;

/// Extensions this engine refuses to store — executables and archives are
/// out of scope; this is a capture vault, not arbitrary file storage.
const REJECTED_EXTENSIONS: &[&str] =
    &["exe", "dll", "so", "dylib", "app", "msi", "sh", "bat", "cmd", "ps1"];

/// Zero-byte files are accepted (hash to the SHA-256 of the empty string
/// and dedupe like any other blob); only oversized files are rejected.
pub fn validate_file_size(size_bytes: u64) -> EngineResult<()> {
    if size_bytes > MAX_FILE_BYTES {
        return Err(EngineError::FileRejected(format!(
            "file exceeds the {}MB limit",
            MAX_FILE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

pub fn validate_extension(filename: &str) -> EngineResult<()> {
    if let Some(ext) = extension_of(filename) {
        if REJECTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(EngineError::FileRejected(format!("'.{ext}' files are not accepted")));
        }
    }
    Ok(())
}

pub fn extension_of(filename: &str) -> Option<String> {
    filename.rsplit_once('.').map(|(_, ext)| ext.to_lowercase())
}

/// Category implied by a file's extension, falling back to `Documents` for
/// unrecognised but accepted extensions.
pub fn category_for_extension(ext: &str) -> Category {
    match ext.to_lowercase().as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "tiff" => Category::Images,
        "mp4" | "mov" | "avi" | "mkv" | "webm" => Category::Videos,
        "csv" | "tsv" => Category::Csv,
        "pdf" | "doc" | "docx" | "odt" | "rtf" => Category::Documents,
        "rs" | "py" | "js" | "ts" | "go" | "java" | "c" | "cpp" | "rb" | "swift" | "kt" => {
            Category::Code
        }
        "md" | "txt" => Category::Notes,
        _ => Category::Documents,
    }
}

/// A pasted string looks like a URL.
pub fn looks_like_url(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.contains(char::is_whitespace) {
        return false;
    }
    trimmed.starts_with("http://") || trimmed.starts_with("https://") || trimmed.starts_with("www.")
}

/// Heuristic category for pasted text that is not a URL: code-like
/// indentation/punctuation density nudges toward `Code`, a short single
/// line with no sentence punctuation nudges toward `Ideas`, otherwise `Notes`.
pub fn classify_text(text: &str) -> Category {
    let trimmed = text.trim();
    let code_markers = ["fn ", "function ", "def ", "class ", "{", "}", "=>", "::", ";\n"];
    if code_markers.iter().any(|m| trimmed.contains(m)) {
        return Category::Code;
    }
    let line_count = trimmed.lines().count();
    if line_count <= 1 && trimmed.len() <= 140 {
        return Category::Ideas;
    }
    Category::Notes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_empty_files_rejects_oversized() {
        assert!(validate_file_size(0).is_ok());
        assert!(validate_file_size(MAX_FILE_BYTES + 1).is_err());
        assert!(validate_file_size(1024).is_ok());
    }

    #[test]
    fn rejects_executable_extensions() {
        assert!(validate_extension("setup.exe").is_err());
        assert!(validate_extension("notes.txt").is_ok());
        assert!(validate_extension("no_extension").is_ok());
    }

    #[test]
    fn detects_urls_but_not_plain_text() {
        assert!(looks_like_url("https://example.com/path"));
        assert!(looks_like_url("www.example.com"));
        assert!(!looks_like_url("remember to review PR #123"));
        assert!(!looks_like_url("https://example.com has a note after it"));
    }

    #[test]
    fn classifies_code_and_ideas_and_notes() {
        assert_eq!(classify_text("fn main() {\n  println!(\"hi\");\n}"), Category::Code);
        assert_eq!(classify_text("buy milk"), Category::Ideas);
        assert_eq!(
            classify_text("This is a longer note.\nIt spans multiple lines.\nAnd has real sentences."),
            Category::Notes
        );
    }

    #[test]
    fn category_for_extension_covers_common_types() {
        assert_eq!(category_for_extension("PNG"), Category::Images);
        assert_eq!(category_for_extension("pdf"), Category::Documents);
        assert_eq!(category_for_extension("rs"), Category::Code);
        assert_eq!(category_for_extension("csv"), Category::Csv);
    }
}
