pub mod archive;
pub mod navigation;
pub mod package;
pub mod xhtml_parser;
pub mod xml;

use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use self::archive::{resolve_href, EpubArchive};
use self::package::{parse_container, Package, CONTAINER_PATH};
use super::preprocessor::{Asset, ExtractedUnit, Preprocessor};
use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::outline::Outline;
use crate::types::{SourceFormat, UnitKey};

/// EPUB 2 or 3 package opened from a zip container.
pub struct EpubSource {
    archive: EpubArchive,
    package: Package,
    format: SourceFormat,
}

impl EpubSource {
    pub fn open(bytes: &[u8]) -> IngestResult<Self> {
        let archive = EpubArchive::open(bytes)?;
        let container = archive.read_text(CONTAINER_PATH)?;
        let rootfile = parse_container(&container)?;
        let opf_path = resolve_href("", &rootfile).ok_or_else(|| {
            IngestError::ContainerRead(format!("invalid rootfile path {rootfile:?}"))
        })?;
        let opf = archive.read_text(&opf_path)?;
        let package = Package::parse(&opf_path, &opf)?;

        let format = if package.is_epub3() {
            SourceFormat::Epub3
        } else {
            SourceFormat::Epub2
        };
        info!(
            "Opened {} package {}: {} manifest items, {} spine items",
            format.as_str(),
            opf_path,
            package.manifest.len(),
            package.spine.len()
        );

        Ok(Self {
            archive,
            package,
            format,
        })
    }

    pub fn package(&self) -> &Package {
        &self.package
    }
}

impl Preprocessor for EpubSource {
    fn format(&self) -> SourceFormat {
        self.format
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        let mut metadata = self.package.metadata.clone();
        metadata.insert("epub_version".to_string(), self.package.version.clone());
        metadata
    }

    fn title(&self) -> Option<String> {
        self.package.title().map(str::to_string)
    }

    fn author(&self) -> Option<String> {
        self.package.creator().map(str::to_string)
    }

    fn resolve_outline(&self, config: &IngestConfig) -> IngestResult<Outline> {
        Ok(navigation::resolve_outline(
            &self.archive,
            &self.package,
            &config.epub,
        ))
    }

    fn content_units(&self, outline: &Outline, config: &IngestConfig) -> Vec<UnitKey> {
        let referenced: HashSet<UnitKey> = outline.units().into_iter().collect();
        let mut seen = HashSet::new();
        let mut units = Vec::new();

        for item in &self.package.spine {
            let listed = referenced.contains(&item.path);
            let reachable = config.epub.include_unlisted_spine_items
                && (item.linear || config.epub.include_non_linear_items);
            if (listed || reachable) && seen.insert(item.path.clone()) {
                units.push(item.path.clone());
            }
        }
        // Navigation may point outside the spine
        for unit in outline.units() {
            if seen.insert(unit.clone()) {
                debug!("Outline references {} outside the spine", unit);
                units.push(unit);
            }
        }
        units
    }

    fn extract_unit(&self, key: &str, config: &IngestConfig) -> IngestResult<ExtractedUnit> {
        let data = self
            .archive
            .get(key)
            .ok_or_else(|| IngestError::MissingAsset(format!("content document {key} not in container")))?;

        let media_type = self.package.item_by_path(key).map(|i| i.media_type.as_str());
        if media_type.is_some_and(|m| m.starts_with("image/")) {
            let mut unit = ExtractedUnit::empty(key);
            unit.html = format!("<img src=\"{key}\" alt=\"\"/>");
            unit.image_refs.push(key.to_string());
            return Ok(unit);
        }

        let xml = archive::decode_text(data);
        Ok(xhtml_parser::extract_xhtml(
            key,
            &xml,
            config.extraction.keep_footnote_bodies_in_text,
        ))
    }

    fn asset(&self, reference: &str) -> Option<Asset<'_>> {
        let data = self.archive.get(reference)?;
        Some(Asset {
            data,
            media_type: self
                .package
                .item_by_path(reference)
                .map(|i| i.media_type.as_str()),
        })
    }

    fn name(&self) -> &str {
        "epub"
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{build_epub, xhtml};
    use super::*;
    use crate::types::NavigationKind;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:uuid:1234</dc:identifier>
    <dc:title>The Lighthouse</dc:title>
    <dc:creator>Ada Keeper</dc:creator>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="c1" href="text/c1.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="text/c2.xhtml" media-type="application/xhtml+xml"/>
    <item id="plate" href="images/plate.png" media-type="image/png"/>
  </manifest>
  <spine>
    <itemref idref="c1"/>
    <itemref idref="plate"/>
    <itemref idref="c2"/>
  </spine>
</package>"#;

    const NAV: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body><nav epub:type="toc"><ol>
  <li><a href="text/c1.xhtml">One</a></li>
  <li><a href="text/c2.xhtml">Two</a></li>
</ol></nav></body></html>"#;

    fn sample() -> EpubSource {
        let c1 = xhtml("c1", "<h1>One</h1><p>First light.</p>");
        let c2 = xhtml("c2", "<h1>Two</h1><p>Second light.</p>");
        let bytes = build_epub(&[
            ("OEBPS/content.opf", OPF.as_bytes()),
            ("OEBPS/nav.xhtml", NAV.as_bytes()),
            ("OEBPS/text/c1.xhtml", &c1),
            ("OEBPS/text/c2.xhtml", &c2),
            ("OEBPS/images/plate.png", b"\x89PNG\r\n\x1a\nplate"),
        ]);
        EpubSource::open(&bytes).unwrap()
    }

    #[test]
    fn test_open_reads_package() {
        let source = sample();
        assert_eq!(source.format(), SourceFormat::Epub3);
        assert_eq!(source.title().as_deref(), Some("The Lighthouse"));
        assert_eq!(source.author().as_deref(), Some("Ada Keeper"));
        assert_eq!(source.metadata()["epub_version"], "3.0");
    }

    #[test]
    fn test_content_units_follow_spine() {
        let source = sample();
        let config = IngestConfig::default();
        let outline = source.resolve_outline(&config).unwrap();
        assert_eq!(outline.kind, NavigationKind::NavDocument);

        let units = source.content_units(&outline, &config);
        assert_eq!(
            units,
            vec![
                "OEBPS/text/c1.xhtml".to_string(),
                "OEBPS/images/plate.png".to_string(),
                "OEBPS/text/c2.xhtml".to_string(),
            ]
        );

        let mut strict = IngestConfig::default();
        strict.epub.include_unlisted_spine_items = false;
        assert_eq!(source.content_units(&outline, &strict).len(), 2);
    }

    #[test]
    fn test_image_spine_item_is_image_only_unit() {
        let source = sample();
        let unit = source
            .extract_unit("OEBPS/images/plate.png", &IngestConfig::default())
            .unwrap();
        assert_eq!(unit.image_refs, vec!["OEBPS/images/plate.png".to_string()]);
        assert!(unit.text.is_empty());
        assert!(unit.has_content());

        let asset = source.asset("OEBPS/images/plate.png").unwrap();
        assert_eq!(asset.media_type, Some("image/png"));
    }

    #[test]
    fn test_missing_unit_is_missing_asset() {
        let source = sample();
        let err = source
            .extract_unit("OEBPS/text/gone.xhtml", &IngestConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MissingAsset);
    }

    #[test]
    fn test_not_a_zip_is_container_error() {
        let err = EpubSource::open(b"PK\x03\x04 not really").err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::ContainerReadError);
    }

    #[test]
    fn test_missing_container_xml() {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        zip.start_file("mimetype", zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(&mut zip, b"application/epub+zip").unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        let err = EpubSource::open(&bytes).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::ContainerReadError);
    }
}
