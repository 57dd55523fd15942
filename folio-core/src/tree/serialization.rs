use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use super::hierarchy::ChapterHierarchy;
use crate::types::{Document, DocumentId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyDocument {
    pub format: String,
    pub document_id: DocumentId,
    pub title: String,
    pub author: Option<String>,
    pub chapters: Vec<ChapterHierarchy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatChunk {
    pub chapter_id: String,
    pub title: String,
    pub order: u32,
    pub level: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatDocument {
    pub format: String,
    pub document_id: DocumentId,
    pub chunks: Vec<FlatChunk>,
}

/// Output shapes for a processed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Full document record
    Document,
    /// Nested chapter tree without content
    Hierarchy,
    /// Ordered plain-text chunks
    Flat,
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "document" => Ok(Self::Document),
            "hierarchy" => Ok(Self::Hierarchy),
            "flat" => Ok(Self::Flat),
            other => Err(anyhow!(
                "unknown output format '{}', expected document, hierarchy or flat",
                other
            )),
        }
    }
}

impl Document {
    pub fn to_hierarchy_format(&self) -> HierarchyDocument {
        HierarchyDocument {
            format: "hierarchy".to_string(),
            document_id: self.id.clone(),
            title: self.title.clone(),
            author: self.author.clone(),
            chapters: self.chapter_hierarchy(),
        }
    }

    pub fn to_flat_format(&self) -> FlatDocument {
        let chunks = self
            .flattened()
            .into_iter()
            .map(|c| FlatChunk {
                chapter_id: c.id.clone(),
                title: c.title.clone(),
                order: c.order,
                level: c.level,
                text: c.content.text.clone(),
            })
            .collect();

        FlatDocument {
            format: "flat".to_string(),
            document_id: self.id.clone(),
            chunks,
        }
    }

    pub fn to_json(&self, format: OutputFormat) -> Result<String> {
        let json = match format {
            OutputFormat::Document => serde_json::to_string_pretty(self)?,
            OutputFormat::Hierarchy => serde_json::to_string_pretty(&self.to_hierarchy_format())?,
            OutputFormat::Flat => serde_json::to_string_pretty(&self.to_flat_format())?,
        };
        Ok(json)
    }

    pub fn save_with_format(&self, path: &str, format: OutputFormat) -> Result<()> {
        std::fs::write(path, self.to_json(format)?)?;
        Ok(())
    }
}
