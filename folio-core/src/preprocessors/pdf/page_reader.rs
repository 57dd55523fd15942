//! Page content-stream reader
//!
//! Turns each page's content stream into text lines with an effective font
//! size, plus the image XObjects the page paints. Text is decoded as
//! UTF-16BE when a BOM is present, otherwise as WinAnsi (windows-1252);
//! composite fonts without a usable encoding come through as best-effort
//! bytes.

use encoding_rs::{UTF_16BE, WINDOWS_1252};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use crate::error::IngestResult;
use crate::types::{ProcessingWarning, WarningKind};

/// Horizontal TJ adjustment (thousandths of an em) treated as a word gap.
const TJ_SPACE_THRESHOLD: f32 = -200.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    /// Effective size in points (Tf size scaled by the text matrix)
    pub font_size: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfPage {
    /// 1-based page number
    pub number: u32,
    pub lines: Vec<TextLine>,
    /// `pdf-object:<num>-<gen>` references, paint order
    pub image_refs: Vec<String>,
}

/// An image XObject referenced by some page.
#[derive(Debug, Clone)]
pub struct PdfImage {
    pub data: Vec<u8>,
    pub media_type: &'static str,
}

pub fn image_ref(id: ObjectId) -> String {
    format!("pdf-object:{}-{}", id.0, id.1)
}

/// Decode a PDF text string (Info values, outline titles, shown text).
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let (text, _) = UTF_16BE.decode_without_bom_handling(&bytes[2..]);
        return text.into_owned();
    }
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(&bytes[3..]).into_owned();
    }
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    text.into_owned()
}

pub fn as_number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Follow a reference to the object it names; non-references pass through.
pub fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

pub fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj)? {
        Object::Dictionary(d) => Some(d),
        Object::Stream(s) => Some(&s.dict),
        _ => None,
    }
}

fn media_type_for_filter(dict: &Dictionary) -> &'static str {
    let filters: Vec<&[u8]> = match dict.get(b"Filter") {
        Ok(Object::Name(n)) => vec![n.as_slice()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|o| match o {
                Object::Name(n) => Some(n.as_slice()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    match filters.last().copied() {
        Some(b"DCTDecode") => "image/jpeg",
        Some(b"JPXDecode") => "image/jp2",
        _ => "application/octet-stream",
    }
}

/// Resources of a page, inherited through `Parent` when absent.
fn page_resources<'a>(doc: &'a Document, page_id: ObjectId) -> Option<&'a Dictionary> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    let mut seen = HashSet::new();
    loop {
        if let Ok(res) = current.get(b"Resources") {
            return resolve_dict(doc, res);
        }
        let parent = match current.get(b"Parent") {
            Ok(Object::Reference(id)) if seen.insert(*id) => *id,
            _ => return None,
        };
        current = doc.get_dictionary(parent).ok()?;
    }
}

/// Image XObjects in a page's resources, by resource name.
fn image_xobjects(doc: &Document, page_id: ObjectId) -> BTreeMap<Vec<u8>, ObjectId> {
    let mut images = BTreeMap::new();
    let Some(xobjects) = page_resources(doc, page_id)
        .and_then(|res| res.get(b"XObject").ok())
        .and_then(|x| resolve_dict(doc, x))
    else {
        return images;
    };

    for (name, obj) in xobjects.iter() {
        let Object::Reference(id) = obj else {
            continue;
        };
        if let Ok(Object::Stream(stream)) = doc.get_object(*id) {
            if matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image") {
                images.insert(name.clone(), *id);
            }
        }
    }
    images
}

/// Accumulates shown text into lines while walking operators.
struct LineBuilder {
    lines: Vec<TextLine>,
    current: String,
    current_size: f32,
    font_size: f32,
    matrix_scale: f32,
    last_y: Option<f32>,
}

impl LineBuilder {
    fn new() -> Self {
        Self {
            lines: Vec::new(),
            current: String::new(),
            current_size: 0.0,
            font_size: 0.0,
            matrix_scale: 1.0,
            last_y: None,
        }
    }

    fn effective_size(&self) -> f32 {
        (self.font_size * self.matrix_scale).abs()
    }

    fn show(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.current.push_str(text);
        self.current_size = self.current_size.max(self.effective_size());
    }

    fn space(&mut self) {
        if !self.current.is_empty() && !self.current.ends_with(' ') {
            self.current.push(' ');
        }
    }

    fn break_line(&mut self) {
        let text = crate::text::clean_text(&self.current);
        if !text.is_empty() {
            self.lines.push(TextLine {
                text,
                font_size: (self.current_size * 10.0).round() / 10.0,
            });
        }
        self.current.clear();
        self.current_size = 0.0;
    }

    fn move_to_y(&mut self, y: f32) {
        match self.last_y {
            Some(prev) if (prev - y).abs() < 0.01 => self.space(),
            _ => self.break_line(),
        }
        self.last_y = Some(y);
    }
}

fn show_operand(builder: &mut LineBuilder, obj: &Object) {
    match obj {
        Object::String(bytes, _) => builder.show(&decode_pdf_string(bytes)),
        Object::Array(items) => {
            for item in items {
                match item {
                    Object::String(bytes, _) => builder.show(&decode_pdf_string(bytes)),
                    other => {
                        if as_number(other).is_some_and(|n| n < TJ_SPACE_THRESHOLD) {
                            builder.space();
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

/// Read every page. A page whose content cannot be decoded yields no lines
/// and a `MalformedContentUnit` warning.
pub fn read_pages(
    doc: &Document,
) -> IngestResult<(Vec<PdfPage>, BTreeMap<String, PdfImage>, Vec<ProcessingWarning>)> {
    let mut pages = Vec::new();
    let mut images = BTreeMap::new();
    let mut warnings = Vec::new();

    for (number, page_id) in doc.get_pages() {
        let xobjects = image_xobjects(doc, page_id);
        let mut page = PdfPage {
            number,
            ..PdfPage::default()
        };

        let content = doc
            .get_page_content(page_id)
            .and_then(|bytes| Content::decode(&bytes));
        let content = match content {
            Ok(content) => content,
            Err(e) => {
                warn!("Page {} content unreadable: {}", number, e);
                warnings.push(ProcessingWarning::for_unit(
                    WarningKind::MalformedContentUnit,
                    &format!("page {number}"),
                    format!("page content stream could not be decoded: {e}"),
                ));
                pages.push(page);
                continue;
            }
        };

        let mut builder = LineBuilder::new();
        for op in &content.operations {
            let operands = &op.operands;
            match op.operator.as_str() {
                "BT" => {
                    builder.matrix_scale = 1.0;
                    builder.last_y = None;
                    builder.break_line();
                }
                "ET" => {}
                "Tf" => {
                    if let Some(size) = operands.get(1).and_then(as_number) {
                        builder.font_size = size;
                    }
                }
                "Tm" => {
                    let nums: Vec<f32> = operands.iter().filter_map(as_number).collect();
                    if nums.len() == 6 {
                        let scale = (nums[2] * nums[2] + nums[3] * nums[3]).sqrt();
                        builder.matrix_scale = if scale > 0.0 { scale } else { 1.0 };
                        builder.move_to_y(nums[5]);
                    }
                }
                "Td" | "TD" => {
                    let ty = operands.get(1).and_then(as_number).unwrap_or(0.0);
                    if ty.abs() > 0.01 {
                        builder.break_line();
                        builder.last_y = None;
                    } else {
                        builder.space();
                    }
                }
                "T*" => builder.break_line(),
                "Tj" | "TJ" => {
                    if let Some(obj) = operands.first() {
                        show_operand(&mut builder, obj);
                    }
                }
                "'" => {
                    builder.break_line();
                    if let Some(obj) = operands.first() {
                        show_operand(&mut builder, obj);
                    }
                }
                "\"" => {
                    builder.break_line();
                    if let Some(obj) = operands.get(2) {
                        show_operand(&mut builder, obj);
                    }
                }
                "Do" => {
                    let Some(Object::Name(name)) = operands.first() else {
                        continue;
                    };
                    if let Some(id) = xobjects.get(name) {
                        let reference = image_ref(*id);
                        if !images.contains_key(&reference) {
                            if let Ok(Object::Stream(stream)) = doc.get_object(*id) {
                                images.insert(
                                    reference.clone(),
                                    PdfImage {
                                        data: stream.content.clone(),
                                        media_type: media_type_for_filter(&stream.dict),
                                    },
                                );
                            }
                        }
                        page.image_refs.push(reference);
                    }
                }
                _ => {}
            }
        }
        builder.break_line();
        page.lines = builder.lines;

        debug!(
            "Page {}: {} lines, {} images",
            number,
            page.lines.len(),
            page.image_refs.len()
        );
        pages.push(page);
    }

    Ok((pages, images, warnings))
}
