pub mod bookmarks;
pub mod page_reader;

use lopdf::Document as PdfDocument;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use self::bookmarks::{info_metadata, read_bookmarks, Bookmark};
use self::page_reader::{read_pages, PdfImage, PdfPage};
use super::preprocessor::{Asset, ExtractedUnit, Preprocessor};
use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::outline::Outline;
use crate::rules::section_detection::SectionDetectionRule;
use crate::types::{NavigationKind, ProcessingWarning, SourceFormat, UnitKey, WarningKind};

/// (page, line) position; page is 1-based.
type Position = (u32, usize);

/// A contiguous run of lines, end exclusive. Keys look like
/// `pdf:3.0-7.12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: Position,
    end: Position,
}

impl Span {
    fn key(&self) -> UnitKey {
        format!(
            "pdf:{}.{}-{}.{}",
            self.start.0, self.start.1, self.end.0, self.end.1
        )
    }

    fn parse(key: &str) -> Option<Self> {
        let (start, end) = key.strip_prefix("pdf:")?.split_once('-')?;
        let position = |s: &str| -> Option<Position> {
            let (page, line) = s.split_once('.')?;
            Some((page.parse().ok()?, line.parse().ok()?))
        };
        let span = Self {
            start: position(start)?,
            end: position(end)?,
        };
        (span.start < span.end).then_some(span)
    }

    fn contains(&self, pos: Position) -> bool {
        self.start <= pos && pos < self.end
    }
}

/// Spans from sorted distinct start positions. The first span always begins
/// at the top of the first page so front matter is never dropped.
fn spans_from_starts(starts: &[Position], page_count: u32) -> Vec<Span> {
    let end_of_document = (page_count + 1, 0);
    starts
        .iter()
        .enumerate()
        .map(|(i, start)| Span {
            start: if i == 0 { (1, 0) } else { *start },
            end: starts.get(i + 1).copied().unwrap_or(end_of_document),
        })
        .collect()
}

/// PDF source: page text, bookmarks and image XObjects, read once at open.
pub struct PdfSource {
    pages: Vec<PdfPage>,
    images: BTreeMap<String, PdfImage>,
    bookmarks: Vec<Bookmark>,
    metadata: BTreeMap<String, String>,
    page_warnings: Vec<ProcessingWarning>,
}

impl PdfSource {
    pub fn open(bytes: &[u8]) -> IngestResult<Self> {
        let doc = PdfDocument::load_mem(bytes)?;
        if doc.is_encrypted() {
            return Err(IngestError::ContainerRead(
                "encrypted PDFs are not supported".to_string(),
            ));
        }

        let (pages, images, page_warnings) = read_pages(&doc)?;
        let bookmarks = read_bookmarks(&doc)?;
        let metadata = info_metadata(&doc);

        info!(
            "Opened PDF: {} pages, {} bookmarks, {} images",
            pages.len(),
            bookmarks.len(),
            images.len()
        );

        Ok(Self {
            pages,
            images,
            bookmarks,
            metadata,
            page_warnings,
        })
    }

    fn page_count(&self) -> u32 {
        self.pages.iter().map(|p| p.number).max().unwrap_or(0)
    }

    fn page(&self, number: u32) -> Option<&PdfPage> {
        self.pages.iter().find(|p| p.number == number)
    }

    /// Outline from bookmarks. Each distinct start page becomes one span;
    /// when several entries start on the same page, the last one in
    /// reading order owns the content and the others are title-only.
    fn bookmark_outline(&self) -> Option<Outline> {
        let mut starts: Vec<Position> = self
            .bookmarks
            .iter()
            .filter_map(|b| b.page)
            .filter(|p| *p >= 1 && *p <= self.page_count())
            .map(|p| (p, 0))
            .collect();
        starts.sort_unstable();
        starts.dedup();
        if starts.is_empty() {
            return None;
        }
        let spans = spans_from_starts(&starts, self.page_count());

        let owner_of_start: BTreeMap<u32, usize> = self
            .bookmarks
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.page.map(|p| (p, i)))
            .collect();

        let mut outline = Outline::new(NavigationKind::PdfOutline);
        let mut stack = Vec::new();
        for (i, bookmark) in self.bookmarks.iter().enumerate() {
            let unit = bookmark
                .page
                .filter(|p| owner_of_start.get(p) == Some(&i))
                .and_then(|p| starts.iter().position(|s| s.0 == p))
                .map(|idx| spans[idx].key());
            outline.push_at_level(&mut stack, bookmark.level, Some(bookmark.title.clone()), unit);
        }
        Some(outline)
    }

    fn heuristic_outline(&self, config: &IngestConfig) -> Option<Outline> {
        let rule = SectionDetectionRule::new(&config.pdf);
        let detection = rule.detect(&self.pages);

        if detection.candidates.is_empty() || detection.confidence < config.pdf.min_confidence {
            debug!(
                "Section inference below threshold ({:.2} < {:.2})",
                detection.confidence, config.pdf.min_confidence
            );
            return None;
        }

        let starts: Vec<Position> = detection
            .candidates
            .iter()
            .map(|c| (c.page, c.line))
            .collect();
        let spans = spans_from_starts(&starts, self.page_count());

        let mut outline = Outline::new(NavigationKind::PdfHeuristic);
        outline.confidence = Some(detection.confidence);
        let mut stack = Vec::new();
        for (candidate, span) in detection.candidates.iter().zip(&spans) {
            outline.push_at_level(
                &mut stack,
                candidate.level,
                Some(candidate.title.clone()),
                Some(span.key()),
            );
        }
        Some(outline)
    }

    fn single_chapter_outline(&self, confidence: Option<f32>) -> Outline {
        let mut outline = Outline::new(NavigationKind::PdfSingleChapter);
        let span = Span {
            start: (1, 0),
            end: (self.page_count() + 1, 0),
        };
        outline.push(self.title(), Some(span.key()), None);
        outline.confidence = confidence;
        let message = "no reliable section structure found; document kept as one chapter";
        warn!("{}", message);
        outline
            .warnings
            .push(ProcessingWarning::new(WarningKind::LowConfidenceSections, message));
        outline
    }
}

impl Preprocessor for PdfSource {
    fn format(&self) -> SourceFormat {
        SourceFormat::Pdf
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.metadata.clone()
    }

    fn title(&self) -> Option<String> {
        self.metadata.get("title").cloned()
    }

    fn author(&self) -> Option<String> {
        self.metadata.get("author").cloned()
    }

    fn resolve_outline(&self, config: &IngestConfig) -> IngestResult<Outline> {
        let from_bookmarks = if config.pdf.prefer_outline {
            self.bookmark_outline()
        } else {
            None
        };

        let mut outline = match from_bookmarks.or_else(|| self.heuristic_outline(config)) {
            Some(outline) => outline,
            None => {
                let confidence = SectionDetectionRule::new(&config.pdf)
                    .detect(&self.pages)
                    .confidence;
                self.single_chapter_outline(Some(confidence))
            }
        };
        outline.warnings.extend(self.page_warnings.iter().cloned());
        Ok(outline)
    }

    /// Spans tile the document, so the outline's units are all of them.
    fn content_units(&self, outline: &Outline, _config: &IngestConfig) -> Vec<UnitKey> {
        outline.units()
    }

    fn extract_unit(&self, key: &str, _config: &IngestConfig) -> IngestResult<ExtractedUnit> {
        let span = Span::parse(key)
            .filter(|s| s.start.0 >= 1 && s.start.0 <= self.page_count().max(1))
            .ok_or_else(|| IngestError::MissingAsset(format!("no such page span: {key}")))?;

        let mut unit = ExtractedUnit::empty(key);
        let mut lines = Vec::new();
        let mut html = String::new();

        for number in span.start.0..=span.end.0 {
            let Some(page) = self.page(number) else {
                continue;
            };
            if span.contains((number, 0)) {
                unit.image_refs.extend(page.image_refs.iter().cloned());
            }
            for (idx, line) in page.lines.iter().enumerate() {
                if span.contains((number, idx)) {
                    html.push_str("<p>");
                    html.push_str(&quick_xml::escape::escape(line.text.as_str()));
                    html.push_str("</p>\n");
                    lines.push(line.text.as_str());
                }
            }
            if span.contains((number, 0)) {
                for reference in &page.image_refs {
                    html.push_str(&format!("<img src=\"{reference}\" alt=\"\"/>\n"));
                }
            }
        }

        unit.text = crate::text::join_blocks(lines);
        unit.html = html;
        Ok(unit)
    }

    fn asset(&self, reference: &str) -> Option<Asset<'_>> {
        self.images.get(reference).map(|image| Asset {
            data: &image.data,
            media_type: Some(image.media_type),
        })
    }

    fn name(&self) -> &str {
        "pdf"
    }
}

#[cfg(test)]
mod tests {
    use super::page_reader::test_support::{build_pdf, build_pdf_with};
    use super::*;
    use lopdf::{dictionary, Object};

    const BODY: &str = "The committee met at dawn and argued until the lamps were lit.";

    #[test]
    fn test_span_keys() {
        let span = Span { start: (3, 0), end: (7, 12) };
        assert_eq!(span.key(), "pdf:3.0-7.12");
        assert_eq!(Span::parse("pdf:3.0-7.12"), Some(span));
        assert_eq!(Span::parse("pdf:7.0-3.0"), None);
        assert_eq!(Span::parse("chapter1.xhtml"), None);
        assert!(span.contains((5, 40)));
        assert!(!span.contains((7, 12)));
    }

    #[test]
    fn test_heuristic_sections() {
        let bytes = build_pdf(&[
            vec![(11.0, "Front matter line."), (18.0, "Chapter 1"), (11.0, BODY)],
            vec![(11.0, BODY), (18.0, "Chapter 2"), (11.0, BODY)],
        ]);
        let source = PdfSource::open(&bytes).unwrap();
        let config = IngestConfig::default();
        let outline = source.resolve_outline(&config).unwrap();

        assert_eq!(outline.kind, NavigationKind::PdfHeuristic);
        assert_eq!(outline.len(), 2);
        assert!(outline.confidence.unwrap() >= config.pdf.min_confidence);

        let units = source.content_units(&outline, &config);
        assert_eq!(units, vec!["pdf:1.0-2.1".to_string(), "pdf:2.1-3.0".to_string()]);

        let first = source.extract_unit(&units[0], &config).unwrap();
        assert!(first.text.starts_with("Front matter line.\nChapter 1\n"));
        assert!(first.text.ends_with(BODY));
        let second = source.extract_unit(&units[1], &config).unwrap();
        assert!(second.text.starts_with("Chapter 2\n"));
    }

    #[test]
    fn test_uniform_text_is_single_chapter() {
        let bytes = build_pdf(&[vec![(11.0, BODY), (11.0, BODY)], vec![(11.0, BODY)]]);
        let source = PdfSource::open(&bytes).unwrap();
        let outline = source.resolve_outline(&IngestConfig::default()).unwrap();

        assert_eq!(outline.kind, NavigationKind::PdfSingleChapter);
        assert_eq!(outline.entries[0].unit.as_deref(), Some("pdf:1.0-3.0"));
        assert!(outline
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::LowConfidenceSections));
    }

    #[test]
    fn test_bookmarks_preferred_and_shared_start_page() {
        let pages = vec![
            vec![(11.0, BODY)],
            vec![(11.0, BODY)],
            vec![(11.0, BODY)],
        ];
        let bytes = build_pdf_with(&pages, |doc, page_ids| {
            let outlines_id = doc.new_object_id();
            let part_id = doc.new_object_id();
            let ch1_id = doc.new_object_id();
            let ch2_id = doc.new_object_id();
            doc.objects.insert(
                ch2_id,
                Object::Dictionary(dictionary! {
                    "Title" => Object::string_literal("Chapter Two"),
                    "Parent" => part_id,
                    "Prev" => ch1_id,
                    "Dest" => vec![Object::Reference(page_ids[2]), "Fit".into()],
                }),
            );
            doc.objects.insert(
                ch1_id,
                Object::Dictionary(dictionary! {
                    "Title" => Object::string_literal("Chapter One"),
                    "Parent" => part_id,
                    "Next" => ch2_id,
                    "Dest" => vec![Object::Reference(page_ids[1]), "Fit".into()],
                }),
            );
            doc.objects.insert(
                part_id,
                Object::Dictionary(dictionary! {
                    "Title" => Object::string_literal("Part One"),
                    "Parent" => outlines_id,
                    "First" => ch1_id,
                    "Last" => ch2_id,
                    "Dest" => vec![Object::Reference(page_ids[1]), "Fit".into()],
                }),
            );
            doc.objects.insert(
                outlines_id,
                Object::Dictionary(dictionary! { "First" => part_id, "Last" => part_id }),
            );
            Some(dictionary! { "Outlines" => outlines_id })
        });
        let source = PdfSource::open(&bytes).unwrap();
        let config = IngestConfig::default();
        let outline = source.resolve_outline(&config).unwrap();

        assert_eq!(outline.kind, NavigationKind::PdfOutline);
        let entries: Vec<(Option<&str>, Option<&str>, Option<usize>)> = outline
            .entries
            .iter()
            .map(|e| (e.title.as_deref(), e.unit.as_deref(), e.parent))
            .collect();
        assert_eq!(
            entries,
            vec![
                (Some("Part One"), None, None),
                (Some("Chapter One"), Some("pdf:1.0-3.0"), Some(0)),
                (Some("Chapter Two"), Some("pdf:3.0-4.0"), Some(0)),
            ]
        );
    }

    #[test]
    fn test_unknown_span_is_missing_asset() {
        let bytes = build_pdf(&[vec![(11.0, BODY)]]);
        let source = PdfSource::open(&bytes).unwrap();
        let err = source
            .extract_unit("pdf:9.0-10.0", &IngestConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MissingAsset);
    }

    #[test]
    fn test_garbage_is_container_error() {
        let err = PdfSource::open(b"%PDF-1.4 truncated").err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::ContainerReadError);
    }
}
