use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Chapter, ChapterId, Document};

/// Nested view of the chapter forest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChapterHierarchy {
    pub id: ChapterId,
    pub title: String,
    pub level: u32,
    pub order: u32,
    pub children: Vec<ChapterHierarchy>,
}

/// Chapter listing entry with a short text preview.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChapterPreview {
    pub id: ChapterId,
    pub title: String,
    pub order: u32,
    pub level: u32,
    pub preview: String,
    pub word_count: usize,
    pub image_count: usize,
}

const PREVIEW_CHARS: usize = 200;

fn preview_of(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

impl Document {
    /// Chapters ascending by `order`.
    pub fn flattened(&self) -> Vec<&Chapter> {
        let mut chapters: Vec<&Chapter> = self.chapters.iter().collect();
        chapters.sort_by_key(|c| c.order);
        chapters
    }

    pub fn root_chapters(&self) -> impl Iterator<Item = &Chapter> {
        self.flattened().into_iter().filter(|c| c.parent_id.is_none())
    }

    /// Nested tree built bottom-up over the flattened order, so deep
    /// outlines never recurse.
    pub fn chapter_hierarchy(&self) -> Vec<ChapterHierarchy> {
        let flat = self.flattened();
        let mut built: HashMap<&str, ChapterHierarchy> = HashMap::new();

        for chapter in flat.iter().rev() {
            let children = chapter
                .children
                .iter()
                .filter_map(|id| built.remove(id.as_str()))
                .collect();
            built.insert(
                chapter.id.as_str(),
                ChapterHierarchy {
                    id: chapter.id.clone(),
                    title: chapter.title.clone(),
                    level: chapter.level,
                    order: chapter.order,
                    children,
                },
            );
        }

        flat.iter()
            .filter(|c| c.parent_id.is_none())
            .filter_map(|c| built.remove(c.id.as_str()))
            .collect()
    }

    pub fn chapter_previews(&self) -> Vec<ChapterPreview> {
        self.flattened()
            .into_iter()
            .map(|c| ChapterPreview {
                id: c.id.clone(),
                title: c.title.clone(),
                order: c.order,
                level: c.level,
                preview: preview_of(&c.content.text),
                word_count: c.content.text.split_whitespace().count(),
                image_count: c.content.images.len(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_support::sample_document;

    #[test]
    fn test_hierarchy_nests_children() {
        let doc = sample_document();
        let hierarchy = doc.chapter_hierarchy();

        assert_eq!(hierarchy.len(), 3);
        assert_eq!(hierarchy[1].title, "Two");
        let nested: Vec<&str> = hierarchy[1].children.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(nested, vec!["Two A", "Two B"]);
        assert!(hierarchy[2].children.is_empty());
    }

    #[test]
    fn test_flattened_sorts_by_order() {
        let mut doc = sample_document();
        doc.chapters.reverse();
        let orders: Vec<u32> = doc.flattened().iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![1, 2, 3, 4, 5]);
        assert_eq!(doc.root_chapters().count(), 3);
    }

    #[test]
    fn test_previews_truncate_on_char_boundary() {
        let mut doc = sample_document();
        doc.chapters[0].content.text = "é".repeat(300);
        let previews = doc.chapter_previews();
        assert_eq!(previews[0].preview.chars().count(), PREVIEW_CHARS + 3);
        assert!(previews[0].preview.ends_with("..."));
        assert_eq!(previews[1].word_count, 2);
    }
}
