use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::calculate_config_hash;

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}

fn default_max_concurrent_documents() -> usize {
    2
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub epub: EpubConfig,
    #[serde(default)]
    pub pdf: PdfSectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Bound of the shared per-unit extraction pool
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// How many documents may run their pipeline at once
    #[serde(default = "default_max_concurrent_documents")]
    pub max_concurrent_documents: usize,
    /// Keep footnote/endnote bodies in the chapter's plain text
    #[serde(default)]
    pub keep_footnote_bodies_in_text: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            max_concurrent_documents: default_max_concurrent_documents(),
            keep_footnote_bodies_in_text: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpubConfig {
    /// Spine items the outline never references become root chapters
    #[serde(default = "default_true")]
    pub include_unlisted_spine_items: bool,
    /// Include `linear="no"` spine items in the spine fallback outline
    #[serde(default)]
    pub include_non_linear_items: bool,
}

impl Default for EpubConfig {
    fn default() -> Self {
        Self {
            include_unlisted_spine_items: true,
            include_non_linear_items: false,
        }
    }
}

fn default_heading_patterns() -> Vec<String> {
    vec![
        r"(?i)^(chapter|part|section|book)\s+([0-9]+|[ivxlc]+)\b".to_string(),
        r"^[0-9]+(\.[0-9]+)*\.?\s+\p{Lu}".to_string(),
        r"(?i)^(prologue|epilogue|introduction|preface|foreword|afterword|appendix)\b".to_string(),
    ]
}

/// Section inference for PDFs without a usable bookmark tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfSectionConfig {
    /// Below this confidence the whole document becomes one chapter (0.0-1.0)
    pub min_confidence: f32,
    /// Relative font-size increase over body text that marks a heading candidate
    pub font_jump_ratio: f32,
    /// Weight of the font-size signal in a line's score
    pub size_weight: f32,
    /// Weight of the heading-pattern signal in a line's score
    pub pattern_weight: f32,
    /// Regex patterns matching heading text
    pub heading_patterns: Vec<String>,
    pub min_heading_chars: usize,
    pub max_heading_chars: usize,
    /// Maximum heading depth to create
    pub max_depth: u32,
    /// Font size difference tolerance for considering headings at the same level (points)
    pub font_size_tolerance: f32,
    /// Use the bookmark outline when the PDF has one
    pub prefer_outline: bool,
}

impl Default for PdfSectionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.45,
            font_jump_ratio: 0.15,
            size_weight: 0.65,
            pattern_weight: 0.35,
            heading_patterns: default_heading_patterns(),
            min_heading_chars: 2,
            max_heading_chars: 120,
            max_depth: 4,
            font_size_tolerance: 0.5,
            prefer_outline: true,
        }
    }
}

impl IngestConfig {
    /// Load config from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: IngestConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load config with fallback to default
    pub fn load_with_fallback(path: Option<&str>) -> Self {
        match path {
            Some(p) => Self::load_from_file(p).unwrap_or_else(|e| {
                warn!("Failed to load config from {}: {}, using defaults", p, e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Hash of the settings that shape output; thread counts are excluded.
    pub fn output_hash(&self) -> String {
        #[derive(Serialize)]
        struct Shaping<'a> {
            keep_footnote_bodies_in_text: bool,
            epub: &'a EpubConfig,
            pdf: &'a PdfSectionConfig,
        }
        calculate_config_hash(&Shaping {
            keep_footnote_bodies_in_text: self.extraction.keep_footnote_bodies_in_text,
            epub: &self.epub,
            pdf: &self.pdf,
        })
        .unwrap_or_default()
    }
}
