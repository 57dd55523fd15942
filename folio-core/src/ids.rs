use chrono::Utc;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use uuid::Uuid;

use crate::types::{ChapterId, DocumentId, ImageId};

// Applied after lowercasing; ids must stay within the storage-safe ASCII set
static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9_\s-]").unwrap());
static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-\s]+").unwrap());

const MAX_SLUG_CHARS: usize = 30;

/// URL-safe slug of at most 30 characters.
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, "");
    let joined = SEPARATORS.replace_all(&stripped, "_");
    let truncated: String = joined.chars().take(MAX_SLUG_CHARS).collect();
    truncated.trim_matches('_').to_string()
}

/// `doc_<YYYYMMDD>_<slug>_<6 hex>`, slug taken from the filename hint's stem.
pub fn generate_document_id(filename_hint: Option<&str>) -> DocumentId {
    let stem = filename_hint
        .and_then(|h| Path::new(h).file_stem())
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let mut slug = slugify(stem);
    if slug.is_empty() {
        slug = "document".to_string();
    }

    let date = Utc::now().format("%Y%m%d");
    let short = &Uuid::new_v4().simple().to_string()[..6];
    format!("doc_{date}_{slug}_{short}")
}

pub fn chapter_id(document_id: &str, order: u32) -> ChapterId {
    format!("{document_id}_ch{order}")
}

pub fn image_id(document_id: &str, n: usize) -> ImageId {
    format!("{document_id}_img{n}")
}
