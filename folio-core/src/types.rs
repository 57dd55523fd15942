use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{ErrorDetail, IngestError};

pub type DocumentId = String;
pub type ChapterId = String;
pub type ImageId = String;

/// Key of one content unit inside its container: an archive path for EPUB,
/// an encoded page/line span for PDF.
pub type UnitKey = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Epub2,
    Epub3,
    Pdf,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Epub2 => "epub2",
            SourceFormat::Epub3 => "epub3",
            SourceFormat::Pdf => "pdf",
        }
    }

    pub fn is_epub(&self) -> bool {
        matches!(self, SourceFormat::Epub2 | SourceFormat::Epub3)
    }
}

// ===== PROCESSING STATE MACHINE =====

/// `Pending → Processing → {Completed, Failed}`. Both terminal states are final.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }

    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }

    /// Validated transition; terminal states reject every move.
    pub fn transition(&mut self, next: ProcessingStatus) -> Result<(), IngestError> {
        if !self.can_transition_to(next) {
            return Err(IngestError::InvalidTransition { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }
}

// ===== WARNINGS =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WarningKind {
    MissingAsset,
    MalformedContentUnit,
    MissingNavigation,
    LowConfidenceSections,
}

/// Degraded-but-successful extraction, surfaced on `DocumentInfo`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingWarning {
    pub kind: WarningKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ProcessingWarning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            unit: None,
        }
    }

    pub fn for_unit(kind: WarningKind, unit: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            unit: Some(unit.to_string()),
        }
    }
}

/// Where the chapter outline came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NavigationKind {
    /// EPUB 3 navigation document
    NavDocument,
    /// EPUB 2 (or legacy EPUB 3) NCX
    Ncx,
    /// Flat outline in spine order, no usable navigation
    SpineFallback,
    /// PDF bookmark tree
    PdfOutline,
    /// Section breaks inferred from font size and heading patterns
    PdfHeuristic,
    /// Whole PDF as one chapter
    PdfSingleChapter,
}

/// Information *about* the document, the `doc_info` of the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// Format-specific metadata (Dublin Core fields, PDF Info dictionary, page count)
    pub metadata: BTreeMap<String, String>,
    pub warnings: Vec<ProcessingWarning>,
    pub navigation: NavigationKind,
    /// Confidence of PDF section inference, when heuristics ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_confidence: Option<f32>,
    pub source_sha256: String,
    pub config_hash: String,
}

// ===== DOCUMENT AGGREGATE =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub author: Option<String>,
    pub format: SourceFormat,
    pub status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub info: DocumentInfo,
    /// Ascending by `order`
    pub chapters: Vec<Chapter>,
    pub images: BTreeMap<ImageId, Image>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn chapter(&self, id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == id)
    }

    pub fn warnings(&self) -> &[ProcessingWarning] {
        &self.info.warnings
    }

    pub fn has_warning(&self, kind: WarningKind) -> bool {
        self.info.warnings.iter().any(|w| w.kind == kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chapter {
    pub id: ChapterId,
    /// Back-reference, not an ownership edge
    pub document_id: DocumentId,
    pub title: String,
    /// Position in the flattened pre-order of the whole chapter forest
    pub order: u32,
    /// Nesting depth, roots are 0
    pub level: u32,
    pub parent_id: Option<ChapterId>,
    pub children: Vec<ChapterId>,
    /// Content unit this chapter was materialised from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<UnitKey>,
    /// Set on placeholders created for a content unit already materialised elsewhere
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares_content_with: Option<ChapterId>,
    pub content: ChapterContent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChapterContent {
    /// Cleaned markup preserving block/inline structure
    pub html: String,
    /// Normalized plain text used for search
    pub text: String,
    pub footnotes: Vec<Footnote>,
    /// Image ids into `Document::images`, first-occurrence order
    pub images: Vec<ImageId>,
    pub tables: Vec<ExtractedTable>,
}

impl ChapterContent {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.images.is_empty() && self.tables.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Footnote {
    pub anchor_id: String,
    pub marker: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractedTable {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Image {
    pub id: ImageId,
    pub document_id: DocumentId,
    pub media_type: String,
    /// Hex SHA-256 of `data`, the deduplication key
    pub content_hash: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ===== RESULT SURFACE =====

/// What `get_processing_result` reports for one document id.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub document_id: DocumentId,
    pub status: ProcessingStatus,
    /// Stage progress in [0, 1]
    pub progress: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Arc<Document>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_happy_path() {
        let mut status = ProcessingStatus::Pending;
        status.transition(ProcessingStatus::Processing).unwrap();
        status.transition(ProcessingStatus::Completed).unwrap();
        assert!(status.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut completed = ProcessingStatus::Completed;
        assert!(completed.transition(ProcessingStatus::Failed).is_err());
        assert!(completed.transition(ProcessingStatus::Processing).is_err());

        let mut failed = ProcessingStatus::Failed;
        assert!(failed.transition(ProcessingStatus::Completed).is_err());
        assert_eq!(failed, ProcessingStatus::Failed);
    }

    #[test]
    fn test_pending_cannot_skip_to_completed() {
        let mut status = ProcessingStatus::Pending;
        assert!(status.transition(ProcessingStatus::Completed).is_err());
        // cancellation before the run starts goes straight to Failed
        assert!(status.transition(ProcessingStatus::Failed).is_ok());
    }

    #[test]
    fn test_image_bytes_serialize_as_base64() {
        let image = Image {
            id: "doc_img1".into(),
            document_id: "doc".into(),
            media_type: "image/png".into(),
            content_hash: "abc".into(),
            data: vec![0x89, b'P', b'N', b'G'],
        };
        let json = serde_json::to_value(&image).unwrap();
        assert_eq!(json["data"], "iVBORw==");

        let back: Image = serde_json::from_value(json).unwrap();
        assert_eq!(back.data, image.data);
    }
}
