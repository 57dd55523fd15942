//! XHTML content document extraction
//!
//! Walks one content document and produces:
//! - Normalized plain text, one line per block
//! - Cleaned markup restricted to structural tags
//! - Footnote records (noteref marker + note body)
//! - Tables as rows of cell text
//! - Image references resolved to archive paths
//!
//! Markup that is not well-formed XML degrades to regex-stripped plain text
//! with a `MalformedContentUnit` warning.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::warn;

use super::archive::{parent_dir, resolve_href};
use super::xml::{attr, attr_tokens, local_name, resolve_entity, text_of};
use crate::preprocessors::preprocessor::ExtractedUnit;
use crate::text::{clean_text, join_blocks};
use crate::types::{ExtractedTable, Footnote, ProcessingWarning, WarningKind};

// Fallback path for markup quick-xml rejects
static SKIPPED_BLOCK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(head|script|style)\b[^>]*>.*?</(head|script|style)\s*>").unwrap()
});

static BLOCK_BREAK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(p|div|h[1-6]|li|tr|td|th|br|blockquote|section|article|pre|dt|dd)\b[^>]*>")
        .unwrap()
});

static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

static ENTITY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z][A-Za-z0-9]*);").unwrap());

const NOTE_TYPES: &[&str] = &["footnote", "endnote", "rearnote", "note"];

/// Elements whose whole subtree is dropped.
fn is_skipped(name: &str) -> bool {
    matches!(name, "head" | "script" | "style" | "template" | "noscript")
}

/// Elements that end the current plain-text block.
fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "section"
            | "article"
            | "aside"
            | "header"
            | "footer"
            | "blockquote"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "ul"
            | "ol"
            | "li"
            | "dl"
            | "dt"
            | "dd"
            | "pre"
            | "table"
            | "caption"
            | "tr"
            | "td"
            | "th"
            | "figure"
            | "figcaption"
            | "hr"
            | "br"
    )
}

/// Tags kept in the cleaned markup; everything else is unwrapped.
fn kept_tag(name: &str) -> Option<&'static str> {
    Some(match name {
        "p" => "p",
        "div" => "div",
        "section" => "section",
        "article" => "article",
        "aside" => "aside",
        "blockquote" => "blockquote",
        "h1" => "h1",
        "h2" => "h2",
        "h3" => "h3",
        "h4" => "h4",
        "h5" => "h5",
        "h6" => "h6",
        "ul" => "ul",
        "ol" => "ol",
        "li" => "li",
        "dl" => "dl",
        "dt" => "dt",
        "dd" => "dd",
        "pre" => "pre",
        "code" => "code",
        "table" => "table",
        "caption" => "caption",
        "thead" => "thead",
        "tbody" => "tbody",
        "tfoot" => "tfoot",
        "tr" => "tr",
        "td" => "td",
        "th" => "th",
        "figure" => "figure",
        "figcaption" => "figcaption",
        "em" | "i" => "em",
        "strong" | "b" => "strong",
        "u" => "u",
        "sub" => "sub",
        "sup" => "sup",
        "small" => "small",
        "a" => "a",
        "br" => "br",
        "hr" => "hr",
        _ => return None,
    })
}

fn is_void(tag: &str) -> bool {
    matches!(tag, "br" | "hr" | "img")
}

fn heading_rank(name: &str) -> Option<usize> {
    match name {
        "h1" => Some(0),
        "h2" => Some(1),
        "h3" => Some(2),
        _ => None,
    }
}

/// Extract one XHTML content document.
pub fn extract_xhtml(unit_path: &str, xml: &str, keep_note_text: bool) -> ExtractedUnit {
    match extract_structured(unit_path, xml, keep_note_text) {
        Ok(unit) => unit,
        Err(e) => {
            warn!("Malformed markup in {}: {}, using plain text", unit_path, e);
            let mut unit = extract_plain_text(unit_path, xml);
            unit.warnings.push(ProcessingWarning::for_unit(
                WarningKind::MalformedContentUnit,
                unit_path,
                format!("markup could not be parsed, kept plain text only: {e}"),
            ));
            unit
        }
    }
}

/// Note references in document order: (target id, marker text).
fn collect_noterefs(xml: &str) -> Result<Vec<(String, String)>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut refs = Vec::new();
    let mut sup_depth = 0usize;
    // (target, marker buffer, element depth inside the anchor)
    let mut current: Option<(String, String, usize)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = local_name(&e);
                if let Some((_, _, depth)) = current.as_mut() {
                    *depth += 1;
                    continue;
                }
                match name.as_str() {
                    "sup" => sup_depth += 1,
                    "a" => {
                        if let Some(target) = noteref_target(&e, sup_depth > 0) {
                            current = Some((target, String::new(), 1));
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                if let Some((_, marker, _)) = current.as_mut() {
                    marker.push_str(&text_of(&e));
                }
            }
            Event::End(e) => {
                if let Some((_, _, depth)) = current.as_mut() {
                    *depth -= 1;
                    if *depth == 0 {
                        if let Some((target, marker, _)) = current.take() {
                            refs.push((target, clean_text(&marker)));
                        }
                    }
                    continue;
                }
                if e.local_name().as_ref() == b"sup" {
                    sup_depth = sup_depth.saturating_sub(1);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(refs)
}

/// In-document target of a footnote reference anchor.
fn noteref_target(e: &BytesStart, in_sup: bool) -> Option<String> {
    let href = attr(e, b"href")?;
    let target = href.strip_prefix('#')?;
    if target.is_empty() {
        return None;
    }
    let typed = attr_tokens(e, b"type").iter().any(|t| t == "noteref");
    let role = attr(e, b"role").as_deref() == Some("doc-noteref");
    (typed || role || in_sup).then(|| target.to_string())
}

#[derive(Default)]
struct TableBuilder {
    caption: Option<String>,
    in_caption: bool,
    rows: Vec<Vec<String>>,
    row: Option<Vec<String>>,
    cell: Option<String>,
}

/// Per-element state pushed on Start and popped on the matching End.
struct OpenElement {
    name: String,
    emitted: Option<&'static str>,
    skipped: bool,
    note_body: bool,
    captures: bool,
}

struct ContentWalker<'a> {
    base: &'a str,
    note_targets: HashSet<&'a str>,
    keep_note_text: bool,

    html: String,
    blocks: Vec<String>,
    block: String,

    open: Vec<OpenElement>,
    skip_depth: usize,
    note_depth: usize,
    pre_depth: usize,

    headings: [Option<String>; 3],
    heading_buf: Option<(usize, String)>,

    /// Open note-body captures: (anchor id, text)
    captures: Vec<(String, String)>,
    note_bodies: HashMap<String, String>,
    typed_notes: Vec<String>,
    anonymous_notes: usize,

    tables: Vec<TableBuilder>,
    finished_tables: Vec<ExtractedTable>,
    image_refs: Vec<String>,
}

impl<'a> ContentWalker<'a> {
    fn new(base: &'a str, note_targets: HashSet<&'a str>, keep_note_text: bool) -> Self {
        Self {
            base,
            note_targets,
            keep_note_text,
            html: String::new(),
            blocks: Vec::new(),
            block: String::new(),
            open: Vec::new(),
            skip_depth: 0,
            note_depth: 0,
            pre_depth: 0,
            headings: [None, None, None],
            heading_buf: None,
            captures: Vec::new(),
            note_bodies: HashMap::new(),
            typed_notes: Vec::new(),
            anonymous_notes: 0,
            tables: Vec::new(),
            finished_tables: Vec::new(),
            image_refs: Vec::new(),
        }
    }

    fn flush_block(&mut self) {
        if !self.block.trim().is_empty() {
            self.blocks.push(std::mem::take(&mut self.block));
        } else {
            self.block.clear();
        }
    }

    fn start(&mut self, e: &BytesStart, empty: bool) {
        let name = local_name(e);

        if self.skip_depth > 0 || is_skipped(&name) {
            if !empty {
                self.skip_depth += 1;
                self.open.push(OpenElement {
                    name,
                    emitted: None,
                    skipped: true,
                    note_body: false,
                    captures: false,
                });
            }
            return;
        }

        if is_block(&name) {
            self.flush_block();
        }

        if name == "img" || name == "image" {
            self.image(e);
            if !empty {
                self.open.push(OpenElement {
                    name,
                    emitted: None,
                    skipped: false,
                    note_body: false,
                    captures: false,
                });
            }
            return;
        }

        let id = attr(e, b"id");
        let typed_note = attr_tokens(e, b"type")
            .iter()
            .any(|t| NOTE_TYPES.contains(&t.as_str()))
            || matches!(attr(e, b"role").as_deref(), Some("doc-footnote" | "doc-endnote"));
        let targeted = id.as_deref().is_some_and(|i| self.note_targets.contains(i));
        let note_body = !empty && (typed_note || targeted);

        let mut captures = false;
        if note_body {
            let anchor = match id.clone() {
                Some(id) => id,
                None => {
                    self.anonymous_notes += 1;
                    format!("note-{}", self.anonymous_notes)
                }
            };
            if typed_note {
                self.typed_notes.push(anchor.clone());
            }
            self.captures.push((anchor, String::new()));
            self.note_depth += 1;
            captures = true;
        }

        if let Some(rank) = heading_rank(&name) {
            if self.headings[rank].is_none() && self.heading_buf.is_none() {
                self.heading_buf = Some((rank, String::new()));
            }
        }

        match name.as_str() {
            "table" => self.tables.push(TableBuilder::default()),
            "caption" => {
                if let Some(t) = self.tables.last_mut() {
                    t.in_caption = true;
                }
            }
            "tr" => {
                if let Some(t) = self.tables.last_mut() {
                    t.row = Some(Vec::new());
                }
            }
            "td" | "th" => {
                if let Some(t) = self.tables.last_mut() {
                    if t.row.is_none() {
                        t.row = Some(Vec::new());
                    }
                    t.cell = Some(String::new());
                }
            }
            "pre" => self.pre_depth += 1,
            _ => {}
        }

        let emitted = kept_tag(&name);
        if let Some(tag) = emitted {
            self.html.push('<');
            self.html.push_str(tag);
            if let Some(id) = &id {
                push_attr(&mut self.html, "id", id);
            }
            match tag {
                "a" => {
                    if let Some(href) = attr(e, b"href") {
                        push_attr(&mut self.html, "href", &href);
                    }
                }
                "td" | "th" => {
                    for key in ["colspan", "rowspan"] {
                        if let Some(v) = attr(e, key.as_bytes()) {
                            push_attr(&mut self.html, key, &v);
                        }
                    }
                }
                _ => {}
            }
            if is_void(tag) {
                self.html.push_str("/>");
            } else if empty {
                self.html.push_str("></");
                self.html.push_str(tag);
                self.html.push('>');
            } else {
                self.html.push('>');
            }
        }

        if empty {
            self.finish_element(&name, None, note_body);
        } else {
            self.open.push(OpenElement {
                name,
                emitted: emitted.filter(|t| !is_void(t)),
                skipped: false,
                note_body,
                captures,
            });
        }
    }

    fn image(&mut self, e: &BytesStart) {
        let Some(src) = attr(e, b"src").or_else(|| attr(e, b"href")) else {
            return;
        };
        let Some(path) = resolve_href(self.base, &src) else {
            return;
        };
        self.html.push_str("<img");
        push_attr(&mut self.html, "src", &path);
        if let Some(alt) = attr(e, b"alt") {
            push_attr(&mut self.html, "alt", &alt);
        }
        self.html.push_str("/>");
        self.image_refs.push(path);
    }

    fn end(&mut self) {
        let Some(el) = self.open.pop() else {
            return;
        };
        if el.skipped {
            self.skip_depth = self.skip_depth.saturating_sub(1);
            return;
        }
        if let Some(tag) = el.emitted {
            self.html.push_str("</");
            self.html.push_str(tag);
            self.html.push('>');
        }
        self.finish_element(&el.name, Some(el.captures), el.note_body);
    }

    fn finish_element(&mut self, name: &str, captures: Option<bool>, note_body: bool) {
        if is_block(name) {
            self.flush_block();
        }

        if let Some(rank) = heading_rank(name) {
            if let Some((open_rank, buf)) = self.heading_buf.take() {
                if open_rank == rank {
                    let title = clean_text(&buf);
                    if !title.is_empty() {
                        self.headings[rank] = Some(title);
                    }
                } else {
                    self.heading_buf = Some((open_rank, buf));
                }
            }
        }

        match name {
            "td" | "th" => {
                if let Some(t) = self.tables.last_mut() {
                    if let (Some(cell), Some(row)) = (t.cell.take(), t.row.as_mut()) {
                        row.push(clean_text(&cell));
                    }
                }
            }
            "tr" => {
                if let Some(t) = self.tables.last_mut() {
                    if let Some(row) = t.row.take().filter(|r| !r.is_empty()) {
                        t.rows.push(row);
                    }
                }
            }
            "caption" => {
                if let Some(t) = self.tables.last_mut() {
                    t.in_caption = false;
                }
            }
            "table" => {
                if let Some(mut t) = self.tables.pop() {
                    if let Some(row) = t.row.take().filter(|r| !r.is_empty()) {
                        t.rows.push(row);
                    }
                    if !t.rows.is_empty() {
                        self.finished_tables.push(ExtractedTable {
                            caption: t.caption.map(|c| clean_text(&c)).filter(|c| !c.is_empty()),
                            rows: t.rows,
                        });
                    }
                }
            }
            "pre" => self.pre_depth = self.pre_depth.saturating_sub(1),
            _ => {}
        }

        if note_body && captures == Some(true) {
            if let Some((anchor, body)) = self.captures.pop() {
                self.note_bodies.insert(anchor, clean_text(&body));
            }
            self.note_depth = self.note_depth.saturating_sub(1);
        }
    }

    fn text(&mut self, text: &str) {
        if self.skip_depth > 0 || text.is_empty() {
            return;
        }

        if self.pre_depth > 0 {
            self.html.push_str(&escape(text));
        } else {
            self.html.push_str(&escape(collapse_whitespace(text).as_str()));
        }

        for (_, buf) in self.captures.iter_mut() {
            buf.push_str(text);
        }
        if let Some((_, buf)) = self.heading_buf.as_mut() {
            buf.push_str(text);
        }
        if let Some(t) = self.tables.last_mut() {
            if t.in_caption {
                t.caption.get_or_insert_with(String::new).push_str(text);
            } else if let Some(cell) = t.cell.as_mut() {
                cell.push_str(text);
            }
        }
        if self.note_depth == 0 || self.keep_note_text {
            self.block.push_str(text);
        }
    }

    fn finish(mut self, key: &str, noterefs: Vec<(String, String)>) -> ExtractedUnit {
        // unclosed elements at EOF
        while !self.open.is_empty() {
            self.end();
        }
        self.flush_block();

        let mut footnotes = Vec::new();
        let mut used: HashSet<String> = HashSet::new();
        for (target, marker) in noterefs {
            if used.contains(&target) {
                continue;
            }
            if let Some(body) = self.note_bodies.get(&target) {
                footnotes.push(Footnote {
                    anchor_id: target.clone(),
                    marker,
                    body: body.clone(),
                });
                used.insert(target);
            }
        }
        for anchor in &self.typed_notes {
            if used.contains(anchor) {
                continue;
            }
            if let Some(body) = self.note_bodies.get(anchor).filter(|b| !b.is_empty()) {
                footnotes.push(Footnote {
                    anchor_id: anchor.clone(),
                    marker: String::new(),
                    body: body.clone(),
                });
                used.insert(anchor.clone());
            }
        }

        let [h1, h2, h3] = self.headings;
        ExtractedUnit {
            key: key.to_string(),
            heading: h1.or(h2).or(h3),
            html: self.html.trim().to_string(),
            text: join_blocks(&self.blocks),
            footnotes,
            tables: self.finished_tables,
            image_refs: self.image_refs,
            warnings: Vec::new(),
        }
    }
}

fn push_attr(html: &mut String, key: &str, value: &str) {
    html.push(' ');
    html.push_str(key);
    html.push_str("=\"");
    html.push_str(&escape(value));
    html.push('"');
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() && ch != '\u{00A0}' {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}

fn extract_structured(
    unit_path: &str,
    xml: &str,
    keep_note_text: bool,
) -> Result<ExtractedUnit, quick_xml::Error> {
    let noterefs = collect_noterefs(xml)?;
    let targets: HashSet<&str> = noterefs.iter().map(|(t, _)| t.as_str()).collect();

    let mut walker = ContentWalker::new(parent_dir(unit_path), targets, keep_note_text);
    let mut reader = Reader::from_str(xml);

    loop {
        match reader.read_event()? {
            Event::Start(e) => walker.start(&e, false),
            Event::Empty(e) => walker.start(&e, true),
            Event::End(_) => walker.end(),
            Event::Text(e) => walker.text(&text_of(&e)),
            Event::CData(e) => walker.text(&String::from_utf8_lossy(&e)),
            Event::Eof => break,
            _ => {}
        }
    }

    let unit = walker.finish(unit_path, noterefs.clone());
    Ok(unit)
}

/// Best-effort plain text for markup that is not well-formed.
fn extract_plain_text(unit_path: &str, markup: &str) -> ExtractedUnit {
    let without_skipped = SKIPPED_BLOCK_REGEX.replace_all(markup, " ");
    let with_breaks = BLOCK_BREAK_REGEX.replace_all(&without_skipped, "\n");
    let stripped = TAG_REGEX.replace_all(&with_breaks, "");
    let decoded = ENTITY_REGEX.replace_all(&stripped, |caps: &regex::Captures| {
        decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });

    let text = join_blocks(decoded.lines());
    let html = text
        .lines()
        .map(|line| format!("<p>{}</p>", escape(line)))
        .collect::<Vec<_>>()
        .join("");

    ExtractedUnit {
        key: unit_path.to_string(),
        html,
        text,
        ..ExtractedUnit::default()
    }
}

fn decode_entity(entity: &str) -> Option<String> {
    if let Some(num) = entity.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    match entity {
        "amp" => Some("&".to_string()),
        "lt" => Some("<".to_string()),
        "gt" => Some(">".to_string()),
        "quot" => Some("\"".to_string()),
        "apos" => Some("'".to_string()),
        other => resolve_entity(other).map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Ignored Title</title><style>p {{ color: red; }}</style></head>
<body>{body}</body>
</html>"#
        )
    }

    #[test]
    fn test_text_and_heading() {
        let xml = wrap(
            "<h2>Part Two</h2><h1>The  Opening</h1><p>First <em>para</em>graph.</p>\n<p>Second\n   paragraph.</p><script>var x = 1;</script>",
        );
        let unit = extract_xhtml("OPS/c1.xhtml", &xml, false);

        assert_eq!(unit.heading.as_deref(), Some("The Opening"));
        assert_eq!(
            unit.text,
            "Part Two\nThe Opening\nFirst paragraph.\nSecond paragraph."
        );
        assert!(!unit.text.contains("Ignored Title"));
        assert!(!unit.text.contains("var x"));
        assert!(unit.html.contains("<em>para</em>"));
        assert!(!unit.html.contains("<script"));
        assert!(!unit.html.contains("<body"));
        assert!(unit.warnings.is_empty());
    }

    #[test]
    fn test_escaped_text_is_decoded_once() {
        let xml = wrap("<h1>Tom &amp; Jerry</h1><p>a &lt; b &#8217;</p>");
        let unit = extract_xhtml("OPS/c.xhtml", &xml, false);

        assert_eq!(unit.heading.as_deref(), Some("Tom & Jerry"));
        assert_eq!(unit.text, "Tom & Jerry\na < b '");
        assert!(unit.html.contains("Tom &amp; Jerry"));
        assert!(unit.html.contains("a &lt; b"));
        assert!(!unit.html.contains("&amp;amp;"));
        assert!(unit.warnings.is_empty());
    }

    #[test]
    fn test_images_resolve_against_unit_directory() {
        let xml = wrap(
            r#"<p><img src="../images/fig%201.png" alt="Figure"/></p>
<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink"><image xlink:href="../images/cover.jpg"/></svg>
<p><img src="https://example.com/remote.png"/></p>"#,
        );
        let unit = extract_xhtml("OPS/text/c1.xhtml", &xml, false);

        assert_eq!(
            unit.image_refs,
            vec!["OPS/images/fig 1.png".to_string(), "OPS/images/cover.jpg".to_string()]
        );
        assert!(unit.html.contains(r#"<img src="OPS/images/fig 1.png" alt="Figure"/>"#));
        assert!(!unit.html.contains("example.com"));
    }

    #[test]
    fn test_tables() {
        let xml = wrap(
            r#"<table><caption>Scores</caption>
<thead><tr><th>Name</th><th>Score</th></tr></thead>
<tbody><tr><td>Ann</td><td> 10 </td></tr><tr><td>Bob</td><td>7</td></tr></tbody>
</table>"#,
        );
        let unit = extract_xhtml("c.xhtml", &xml, false);

        assert_eq!(unit.tables.len(), 1);
        let table = &unit.tables[0];
        assert_eq!(table.caption.as_deref(), Some("Scores"));
        assert_eq!(
            table.rows,
            vec![
                vec!["Name".to_string(), "Score".to_string()],
                vec!["Ann".to_string(), "10".to_string()],
                vec!["Bob".to_string(), "7".to_string()],
            ]
        );
        assert!(unit.text.contains("Ann\n10"));
    }

    #[test]
    fn test_footnotes_typed_and_sup_references() {
        let xml = wrap(
            r##"<p>Claim<a epub:type="noteref" href="#fn1">1</a> and another<sup><a href="#fn2">2</a></sup>.</p>
<aside epub:type="footnote" id="fn1"><p>First note body.</p></aside>
<div id="fn2"><p>Second note body.</p></div>
<aside epub:type="endnote" id="en9"><p>Orphan endnote.</p></aside>"##,
        );
        let unit = extract_xhtml("c.xhtml", &xml, false);

        assert_eq!(unit.footnotes.len(), 3);
        assert_eq!(unit.footnotes[0].anchor_id, "fn1");
        assert_eq!(unit.footnotes[0].marker, "1");
        assert_eq!(unit.footnotes[0].body, "First note body.");
        assert_eq!(unit.footnotes[1].anchor_id, "fn2");
        assert_eq!(unit.footnotes[1].body, "Second note body.");
        assert_eq!(unit.footnotes[2].anchor_id, "en9");
        assert_eq!(unit.footnotes[2].marker, "");

        // bodies stay in the markup but leave the searchable text
        assert_eq!(unit.text, "Claim1 and another2.");
        assert!(unit.html.contains("First note body."));
    }

    #[test]
    fn test_footnote_bodies_kept_in_text_when_configured() {
        let xml = wrap(
            r##"<p>Claim<a epub:type="noteref" href="#fn1">1</a></p><aside epub:type="footnote" id="fn1">Body.</aside>"##,
        );
        let unit = extract_xhtml("c.xhtml", &xml, true);
        assert_eq!(unit.text, "Claim1\nBody.");
        assert_eq!(unit.footnotes.len(), 1);
    }

    #[test]
    fn test_links_are_not_footnotes() {
        let xml = wrap(r##"<p>See <a href="#sec2">section 2</a> and <a href="c2.xhtml">next</a>.</p><h2 id="sec2">Two</h2>"##);
        let unit = extract_xhtml("c.xhtml", &xml, false);
        assert!(unit.footnotes.is_empty());
        assert!(unit.text.contains("Two"));
        assert!(unit.html.contains(r##"<a href="#sec2">section 2</a>"##));
    }

    #[test]
    fn test_malformed_markup_degrades_to_plain_text() {
        let html = "<html><head><title>T</title></head><body><p>One<br>Two &amp; three</p><table><tr><td>cell</td></tr></table></body></html>";
        let unit = extract_xhtml("bad.xhtml", html, false);

        assert_eq!(unit.text, "One\nTwo & three\ncell");
        assert!(unit.tables.is_empty());
        assert!(unit.footnotes.is_empty());
        assert_eq!(unit.warnings.len(), 1);
        assert_eq!(unit.warnings[0].kind, WarningKind::MalformedContentUnit);
        assert_eq!(unit.warnings[0].unit.as_deref(), Some("bad.xhtml"));
        assert!(unit.html.starts_with("<p>One</p>"));
    }

    #[test]
    fn test_empty_body_yields_empty_unit() {
        let unit = extract_xhtml("e.xhtml", &wrap(""), false);
        assert!(!unit.has_content());
        assert_eq!(unit.heading, None);
    }

    #[test]
    fn test_decode_entity() {
        assert_eq!(decode_entity("#8217").as_deref(), Some("\u{2019}"));
        assert_eq!(decode_entity("#x41").as_deref(), Some("A"));
        assert_eq!(decode_entity("nbsp").as_deref(), Some("\u{00A0}"));
        assert_eq!(decode_entity("bogus"), None);
    }
}
