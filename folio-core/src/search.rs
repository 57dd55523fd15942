//! Substring search over normalized chapter text.
//!
//! No index and no ranking: hits come back in document order, then chapter
//! order, and stop at `limit`.

use serde::Serialize;

use crate::types::{ChapterId, Document, DocumentId};

const ELLIPSIS: char = '…';

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Characters of context kept on each side of the match
    pub snippet_radius: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            snippet_radius: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchHit {
    pub document_id: DocumentId,
    pub document_title: String,
    pub chapter_id: ChapterId,
    pub chapter_title: String,
    pub chapter_order: u32,
    pub chapter_level: u32,
    pub snippet: String,
}

/// Case-insensitive search; one hit per matching chapter, first match only.
pub fn search_documents<'a, I>(documents: I, query: &str, options: &SearchOptions) -> Vec<SearchHit>
where
    I: IntoIterator<Item = &'a Document>,
{
    let needle = fold_case(query.trim());
    let mut hits = Vec::new();
    if needle.is_empty() || options.limit == 0 {
        return hits;
    }

    for document in documents {
        for chapter in document.flattened() {
            let Some(snippet) = find_snippet(&chapter.content.text, &needle, options.snippet_radius) else {
                continue;
            };
            hits.push(SearchHit {
                document_id: document.id.clone(),
                document_title: document.title.clone(),
                chapter_id: chapter.id.clone(),
                chapter_title: chapter.title.clone(),
                chapter_order: chapter.order,
                chapter_level: chapter.level,
                snippet,
            });
            if hits.len() >= options.limit {
                return hits;
            }
        }
    }
    hits
}

fn fold_case(text: &str) -> Vec<char> {
    text.chars().flat_map(char::to_lowercase).collect()
}

/// Matching runs over chars rather than bytes, so lowercasing that changes
/// byte lengths cannot shift the cut points off a char boundary. The
/// haystack folds exactly like the needle; `origin` maps each folded char
/// back to the char it came from.
fn find_snippet(text: &str, needle: &[char], radius: usize) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut lowered = Vec::with_capacity(chars.len());
    let mut origin = Vec::with_capacity(chars.len());
    for (i, c) in chars.iter().enumerate() {
        for folded in c.to_lowercase() {
            lowered.push(folded);
            origin.push(i);
        }
    }
    if needle.is_empty() || needle.len() > lowered.len() {
        return None;
    }

    let hit = lowered.windows(needle.len()).position(|w| w == needle)?;
    let start = origin[hit];
    let end = origin[hit + needle.len() - 1] + 1;
    let from = start.saturating_sub(radius);
    let to = (end + radius).min(chars.len());

    let mut snippet = String::new();
    if from > 0 {
        snippet.push(ELLIPSIS);
    }
    snippet.extend(chars[from..to].iter().map(|c| if *c == '\n' { ' ' } else { *c }));
    if to < chars.len() {
        snippet.push(ELLIPSIS);
    }
    Some(snippet)
}
