//! Document outline (bookmarks) and Info-dictionary metadata.

use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use super::page_reader::{decode_pdf_string, resolve, resolve_dict};
use crate::error::{IngestError, IngestResult};

/// Bound on name-tree recursion; real trees are a handful of levels deep.
const MAX_NAME_TREE_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct Bookmark {
    pub title: String,
    /// 1-based target page, when the destination resolves
    pub page: Option<u32>,
    pub level: usize,
}

fn catalog(doc: &Document) -> Option<&Dictionary> {
    doc.trailer.get(b"Root").ok().and_then(|r| resolve_dict(doc, r))
}

fn string_value(doc: &Document, obj: &Object) -> Option<String> {
    match resolve(doc, obj)? {
        Object::String(bytes, _) => Some(crate::text::clean_text(&decode_pdf_string(bytes))),
        Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
        _ => None,
    }
}

fn name_key(obj: &Object) -> Option<Vec<u8>> {
    match obj {
        Object::String(bytes, _) | Object::Name(bytes) => Some(bytes.clone()),
        _ => None,
    }
}

/// Destinations named in the catalog `/Dests` dictionary and `/Names` tree.
fn named_destinations(doc: &Document) -> HashMap<Vec<u8>, Object> {
    let mut dests = HashMap::new();
    let Some(catalog) = catalog(doc) else {
        return dests;
    };

    if let Some(dict) = catalog.get(b"Dests").ok().and_then(|d| resolve_dict(doc, d)) {
        for (name, value) in dict.iter() {
            if let Some(value) = resolve(doc, value) {
                dests.insert(name.clone(), value.clone());
            }
        }
    }

    let tree_root = catalog
        .get(b"Names")
        .ok()
        .and_then(|n| resolve_dict(doc, n))
        .and_then(|names| names.get(b"Dests").ok())
        .and_then(|d| resolve_dict(doc, d));
    if let Some(root) = tree_root {
        let mut stack = vec![(root, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            if let Ok(Object::Array(pairs)) = node.get(b"Names") {
                for pair in pairs.chunks(2) {
                    if let [key, value] = pair {
                        if let (Some(key), Some(value)) = (name_key(key), resolve(doc, value)) {
                            dests.insert(key, value.clone());
                        }
                    }
                }
            }
            if depth >= MAX_NAME_TREE_DEPTH {
                continue;
            }
            if let Ok(Object::Array(kids)) = node.get(b"Kids") {
                for kid in kids {
                    if let Some(kid) = resolve_dict(doc, kid) {
                        stack.push((kid, depth + 1));
                    }
                }
            }
        }
    }

    dests
}

struct DestResolver<'a> {
    doc: &'a Document,
    page_numbers: HashMap<ObjectId, u32>,
    named: HashMap<Vec<u8>, Object>,
}

impl<'a> DestResolver<'a> {
    fn new(doc: &'a Document) -> Self {
        let page_numbers = doc
            .get_pages()
            .into_iter()
            .map(|(number, id)| (id, number))
            .collect();
        Self {
            doc,
            page_numbers,
            named: named_destinations(doc),
        }
    }

    fn page_of(&self, dest: &Object) -> Option<u32> {
        self.page_of_bounded(dest, 0)
    }

    /// Named destinations may point at other names; a chain deeper than
    /// the name-tree bound is treated as unresolvable.
    fn page_of_bounded(&self, dest: &Object, hops: usize) -> Option<u32> {
        if hops > MAX_NAME_TREE_DEPTH {
            return None;
        }
        match resolve(self.doc, dest)? {
            Object::Array(items) => match items.first()? {
                Object::Reference(id) => self.page_numbers.get(id).copied(),
                Object::Integer(index) => u32::try_from(*index).ok()?.checked_add(1),
                _ => None,
            },
            Object::String(name, _) | Object::Name(name) => {
                let target = self.named.get(name)?;
                match target {
                    Object::Dictionary(d) => self.page_of_bounded(d.get(b"D").ok()?, hops + 1),
                    other => self.page_of_bounded(other, hops + 1),
                }
            }
            Object::Dictionary(d) => self.page_of_bounded(d.get(b"D").ok()?, hops + 1),
            _ => None,
        }
    }

    fn item_page(&self, item: &Dictionary) -> Option<u32> {
        if let Ok(dest) = item.get(b"Dest") {
            return self.page_of(dest);
        }
        let action = item.get(b"A").ok().and_then(|a| resolve_dict(self.doc, a))?;
        match action.get(b"S") {
            Ok(Object::Name(s)) if s == b"GoTo" => self.page_of(action.get(b"D").ok()?),
            _ => None,
        }
    }
}

/// Read the outline tree in pre-order. A `First`/`Next` chain that revisits
/// an item is a corrupt hierarchy.
pub fn read_bookmarks(doc: &Document) -> IngestResult<Vec<Bookmark>> {
    let Some(outlines) = catalog(doc)
        .and_then(|c| c.get(b"Outlines").ok())
        .and_then(|o| resolve_dict(doc, o))
    else {
        return Ok(Vec::new());
    };
    let Ok(Object::Reference(first)) = outlines.get(b"First") else {
        return Ok(Vec::new());
    };

    let resolver = DestResolver::new(doc);
    let mut bookmarks = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![(*first, 0usize)];

    while let Some((id, level)) = stack.pop() {
        if !visited.insert(id) {
            return Err(IngestError::Hierarchy(format!(
                "outline item {} {} is reachable twice",
                id.0, id.1
            )));
        }
        let item = doc
            .get_dictionary(id)
            .map_err(|e| IngestError::Hierarchy(format!("outline item {} {}: {}", id.0, id.1, e)))?;

        let title = item
            .get(b"Title")
            .ok()
            .and_then(|t| string_value(doc, t))
            .unwrap_or_default();
        bookmarks.push(Bookmark {
            title,
            page: resolver.item_page(item),
            level,
        });

        if let Ok(Object::Reference(next)) = item.get(b"Next") {
            stack.push((*next, level));
        }
        if let Ok(Object::Reference(child)) = item.get(b"First") {
            stack.push((*child, level + 1));
        }
    }

    debug!("Read {} bookmarks", bookmarks.len());
    Ok(bookmarks)
}

/// Info-dictionary fields under snake_case keys, plus `page_count`.
pub fn info_metadata(doc: &Document) -> BTreeMap<String, String> {
    const FIELDS: [(&[u8], &str); 8] = [
        (b"Title", "title"),
        (b"Author", "author"),
        (b"Subject", "subject"),
        (b"Keywords", "keywords"),
        (b"Creator", "creator"),
        (b"Producer", "producer"),
        (b"CreationDate", "creation_date"),
        (b"ModDate", "modification_date"),
    ];

    let mut metadata = BTreeMap::new();
    metadata.insert("page_count".to_string(), doc.get_pages().len().to_string());

    let Some(info) = doc.trailer.get(b"Info").ok().and_then(|i| resolve_dict(doc, i)) else {
        return metadata;
    };
    for (key, name) in FIELDS {
        if let Some(value) = info.get(key).ok().and_then(|v| string_value(doc, v)) {
            if !value.is_empty() {
                metadata.insert(name.to_string(), value);
            }
        }
    }
    metadata
}
