pub mod epub;
pub mod pdf;
pub mod preprocessor;

pub use epub::EpubSource;
pub use pdf::PdfSource;
pub use preprocessor::{Asset, ExtractedUnit, Preprocessor};

use std::collections::BTreeMap;

use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::outline::Outline;
use crate::types::{SourceFormat, UnitKey};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const PDF_MAGIC: &[u8] = b"%PDF-";
/// How far into the file a `%PDF-` header may start
const PDF_HEADER_WINDOW: usize = 1024;

/// Detect the source format from content, falling back to the filename
/// extension hint. EPUB 2 and 3 share a container; the package version
/// decides between them at open.
///
/// A readable zip without EPUB markers is rejected. An unreadable one is
/// still routed to the EPUB reader so the container error surfaces.
pub fn detect_format(bytes: &[u8], filename_hint: Option<&str>) -> IngestResult<SourceFormat> {
    if bytes.starts_with(ZIP_MAGIC) {
        return match epub::archive::is_epub_container(bytes) {
            Some(true) | None => Ok(SourceFormat::Epub3),
            Some(false) => Err(IngestError::UnsupportedFormat(format!(
                "zip archive without an EPUB container{}",
                filename_hint
                    .map(|n| format!(" in {n}"))
                    .unwrap_or_default()
            ))),
        };
    }
    let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    if window.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC) {
        return Ok(SourceFormat::Pdf);
    }

    let extension = filename_hint
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("epub") if !bytes.is_empty() => Ok(SourceFormat::Epub3),
        Some("pdf") if !bytes.is_empty() => Ok(SourceFormat::Pdf),
        _ => Err(IngestError::UnsupportedFormat(format!(
            "unrecognised content{}",
            filename_hint
                .map(|n| format!(" in {n}"))
                .unwrap_or_default()
        ))),
    }
}

/// Opened source, one variant per supported format.
pub enum Source {
    Epub2(EpubSource),
    Epub3(EpubSource),
    Pdf(PdfSource),
}

impl Source {
    /// Open `bytes` as the detected format. Any EPUB format opens the
    /// container and lets the package pick the variant.
    pub fn open(format: SourceFormat, bytes: &[u8]) -> IngestResult<Self> {
        match format {
            SourceFormat::Epub2 | SourceFormat::Epub3 => {
                let source = EpubSource::open(bytes)?;
                Ok(match source.format() {
                    SourceFormat::Epub2 => Source::Epub2(source),
                    _ => Source::Epub3(source),
                })
            }
            SourceFormat::Pdf => Ok(Source::Pdf(PdfSource::open(bytes)?)),
        }
    }

    fn inner(&self) -> &dyn Preprocessor {
        match self {
            Source::Epub2(source) | Source::Epub3(source) => source,
            Source::Pdf(source) => source,
        }
    }
}

impl Preprocessor for Source {
    fn format(&self) -> SourceFormat {
        self.inner().format()
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.inner().metadata()
    }

    fn title(&self) -> Option<String> {
        self.inner().title()
    }

    fn author(&self) -> Option<String> {
        self.inner().author()
    }

    fn resolve_outline(&self, config: &IngestConfig) -> IngestResult<Outline> {
        self.inner().resolve_outline(config)
    }

    fn content_units(&self, outline: &Outline, config: &IngestConfig) -> Vec<UnitKey> {
        self.inner().content_units(outline, config)
    }

    fn extract_unit(&self, key: &str, config: &IngestConfig) -> IngestResult<ExtractedUnit> {
        self.inner().extract_unit(key, config)
    }

    fn asset(&self, reference: &str) -> Option<Asset<'_>> {
        self.inner().asset(reference)
    }

    fn name(&self) -> &str {
        self.inner().name()
    }
}
