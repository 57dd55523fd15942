// Preprocessor abstraction for source formats
//
// This module defines the boundary between format-specific parsing
// (container -> outline + per-unit content) and the format-agnostic stages
// that follow (tree building, image store, normalization). Each source
// format implements the same capability contract; the pipeline never looks
// past it.

use std::collections::BTreeMap;

use crate::config::IngestConfig;
use crate::error::IngestResult;
use crate::outline::Outline;
use crate::types::{ExtractedTable, Footnote, ProcessingWarning, SourceFormat, UnitKey};

/// Everything extracted from one content unit, before hierarchy assembly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedUnit {
    pub key: UnitKey,
    /// First h1, else h2, else h3 of the unit
    pub heading: Option<String>,
    /// Cleaned markup; image `src` attributes hold in-unit references
    pub html: String,
    pub text: String,
    pub footnotes: Vec<Footnote>,
    pub tables: Vec<ExtractedTable>,
    /// In-unit image references (archive paths, PDF object ids), document order
    pub image_refs: Vec<String>,
    pub warnings: Vec<ProcessingWarning>,
}

impl ExtractedUnit {
    pub fn empty(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Self::default()
        }
    }

    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty() || !self.image_refs.is_empty() || !self.tables.is_empty()
    }
}

/// A binary asset looked up by in-unit reference.
#[derive(Debug, Clone, Copy)]
pub struct Asset<'a> {
    pub data: &'a [u8],
    /// Declared media type, if the container declares one
    pub media_type: Option<&'a str>,
}

/// Preprocessor trait - the shared capability contract of every source format
///
/// Preprocessors handle:
/// - Container metadata
/// - Navigation / outline resolution
/// - Per-unit content extraction
/// - Asset lookup for image references
///
/// `extract_unit` must be safe to call concurrently for different units.
pub trait Preprocessor: Send + Sync {
    fn format(&self) -> SourceFormat;

    /// Format-specific metadata (Dublin Core, PDF Info dictionary, ...)
    fn metadata(&self) -> BTreeMap<String, String>;

    fn title(&self) -> Option<String>;

    fn author(&self) -> Option<String>;

    /// Ordered, nested outline with opaque unit references.
    fn resolve_outline(&self, config: &IngestConfig) -> IngestResult<Outline>;

    /// Units in reading order. Includes every unit the outline references
    /// plus units only reachable through reading order.
    fn content_units(&self, outline: &Outline, config: &IngestConfig) -> Vec<UnitKey>;

    /// Extract one unit. Malformed content degrades inside the returned
    /// unit; `Err` is reserved for units that cannot be located at all.
    fn extract_unit(&self, key: &str, config: &IngestConfig) -> IngestResult<ExtractedUnit>;

    fn asset(&self, reference: &str) -> Option<Asset<'_>>;

    /// Preprocessor name for debugging/logging
    fn name(&self) -> &str;
}
