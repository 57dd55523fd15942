//! `META-INF/container.xml` and OPF package document parsing.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;

use super::archive::{parent_dir, resolve_href};
use super::xml::{attr, attr_tokens, local_name, text_of};
use crate::error::{IngestError, IngestResult};

pub const CONTAINER_PATH: &str = "META-INF/container.xml";
pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";
const OPF_MEDIA_TYPE: &str = "application/oebps-package+xml";

/// Dublin Core elements copied into document metadata.
const DC_FIELDS: &[&str] = &[
    "title",
    "creator",
    "description",
    "publisher",
    "identifier",
    "language",
    "rights",
    "date",
    "subject",
];

#[derive(Debug, Clone)]
pub struct ManifestItem {
    pub id: String,
    /// Archive path, resolved against the OPF directory
    pub path: String,
    pub media_type: String,
    pub properties: Vec<String>,
}

impl ManifestItem {
    pub fn is_content_document(&self) -> bool {
        matches!(
            self.media_type.as_str(),
            "application/xhtml+xml" | "text/html" | "application/x-dtbook+xml"
        )
    }
}

#[derive(Debug, Clone)]
pub struct SpineItem {
    pub idref: String,
    pub path: String,
    pub linear: bool,
}

#[derive(Debug, Clone)]
pub struct GuideReference {
    pub kind: String,
    pub title: Option<String>,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct Package {
    pub opf_path: String,
    /// `package@version`, "2.0" when missing
    pub version: String,
    pub metadata: BTreeMap<String, String>,
    /// Manifest items in document order
    pub manifest: Vec<ManifestItem>,
    pub spine: Vec<SpineItem>,
    /// `spine@toc`, the NCX manifest id
    pub toc_id: Option<String>,
    pub guide: Vec<GuideReference>,
}

impl Package {
    pub fn is_epub3(&self) -> bool {
        self.version.trim_start().starts_with('3')
    }

    pub fn item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|i| i.id == id)
    }

    pub fn item_by_path(&self, path: &str) -> Option<&ManifestItem> {
        self.manifest
            .iter()
            .find(|i| i.path == path)
            .or_else(|| self.manifest.iter().find(|i| i.path.eq_ignore_ascii_case(path)))
    }

    /// EPUB 3 navigation document (`properties="nav"`).
    pub fn nav_item(&self) -> Option<&ManifestItem> {
        self.manifest
            .iter()
            .find(|i| i.properties.iter().any(|p| p == "nav"))
    }

    /// NCX named by `spine@toc`, else the first item with the NCX media type.
    pub fn ncx_item(&self) -> Option<&ManifestItem> {
        self.toc_id
            .as_deref()
            .and_then(|id| self.item(id))
            .or_else(|| self.manifest.iter().find(|i| i.media_type == NCX_MEDIA_TYPE))
    }

    pub fn spine_position(&self, path: &str) -> Option<usize> {
        self.spine.iter().position(|s| s.path == path)
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").map(String::as_str)
    }

    pub fn creator(&self) -> Option<&str> {
        self.metadata.get("creator").map(String::as_str)
    }
}

/// Path of the default rendition's package document.
pub fn parse_container(xml: &str) -> IngestResult<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut fallback = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if local_name(&e) == "rootfile" => {
                let Some(path) = attr(&e, b"full-path") else {
                    continue;
                };
                // Only the first OPF rootfile is the default rendition
                match attr(&e, b"media-type").as_deref() {
                    Some(OPF_MEDIA_TYPE) => return Ok(path),
                    _ => {
                        fallback.get_or_insert(path);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(IngestError::ContainerRead(format!(
                    "malformed container.xml: {e}"
                )))
            }
            _ => {}
        }
    }

    fallback.ok_or_else(|| {
        IngestError::ContainerRead("no rootfile found in container.xml".to_string())
    })
}

/// `package@version` without parsing the rest of the document.
pub fn package_version(opf: &str) -> Option<String> {
    let mut reader = Reader::from_str(opf);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if local_name(&e) == "package" => {
                return attr(&e, b"version");
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

impl Package {
    pub fn parse(opf_path: &str, opf: &str) -> IngestResult<Self> {
        let base = parent_dir(opf_path);
        let mut reader = Reader::from_str(opf);
        reader.config_mut().trim_text(true);

        let mut package = Package {
            opf_path: opf_path.to_string(),
            version: "2.0".to_string(),
            metadata: BTreeMap::new(),
            manifest: Vec::new(),
            spine: Vec::new(),
            toc_id: None,
            guide: Vec::new(),
        };
        let mut multi: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut in_metadata = false;
        let mut current: Option<String> = None;
        let mut buf = String::new();

        loop {
            let event = reader.read_event().map_err(|e| {
                IngestError::ContainerRead(format!("malformed package document {opf_path}: {e}"))
            })?;

            match event {
                Event::Start(e) => {
                    let name = local_name(&e);
                    match name.as_str() {
                        "package" => {
                            if let Some(v) = attr(&e, b"version") {
                                package.version = v;
                            }
                        }
                        "metadata" => in_metadata = true,
                        "spine" => package.toc_id = attr(&e, b"toc"),
                        n if in_metadata && DC_FIELDS.contains(&n) => {
                            current = Some(n.to_string());
                            buf.clear();
                        }
                        _ => package.read_item(&e, &name, base),
                    }
                }
                Event::Empty(e) => {
                    let name = local_name(&e);
                    if name == "spine" {
                        package.toc_id = attr(&e, b"toc");
                    } else {
                        package.read_item(&e, &name, base);
                    }
                }
                Event::Text(e) if current.is_some() => buf.push_str(&text_of(&e)),
                Event::CData(e) if current.is_some() => {
                    buf.push_str(&String::from_utf8_lossy(&e));
                }
                Event::End(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
                    if name == "metadata" {
                        in_metadata = false;
                    }
                    if current.as_deref() == Some(name.as_str()) {
                        let value = crate::text::clean_text(&buf);
                        if !value.is_empty() {
                            multi.entry(name).or_default().push(value);
                        }
                        current = None;
                        buf.clear();
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        for (field, values) in multi {
            // the first identifier is the unique one; other fields list all values
            let value = match field.as_str() {
                "identifier" | "title" | "language" => values[0].clone(),
                _ => values.join("; "),
            };
            package.metadata.insert(field, value);
        }

        Ok(package)
    }

    fn read_item(&mut self, e: &quick_xml::events::BytesStart, name: &str, base: &str) {
        match name {
            "item" => {
                let (Some(id), Some(href)) = (attr(e, b"id"), attr(e, b"href")) else {
                    return;
                };
                let Some(path) = resolve_href(base, &href) else {
                    return;
                };
                self.manifest.push(ManifestItem {
                    id,
                    path,
                    media_type: attr(e, b"media-type").unwrap_or_default(),
                    properties: attr_tokens(e, b"properties"),
                });
            }
            "itemref" => {
                let Some(idref) = attr(e, b"idref") else {
                    return;
                };
                // spine entries whose idref is missing from the manifest are skipped
                let Some(path) = self.item(&idref).map(|i| i.path.clone()) else {
                    return;
                };
                let linear = attr(e, b"linear").as_deref() != Some("no");
                self.spine.push(SpineItem { idref, path, linear });
            }
            "reference" => {
                let (Some(kind), Some(href)) = (attr(e, b"type"), attr(e, b"href")) else {
                    return;
                };
                if let Some(path) = resolve_href(base, &href) {
                    self.guide.push(GuideReference {
                        kind,
                        title: attr(e, b"title").filter(|t| !t.trim().is_empty()),
                        path,
                    });
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:isbn:123</dc:identifier>
    <dc:title>The  Test &amp; Book</dc:title>
    <dc:creator>Ann Author</dc:creator>
    <dc:creator>Bob Writer</dc:creator>
    <dc:language>en</dc:language>
    <meta property="dcterms:modified">2024-01-01T00:00:00Z</meta>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="c1" href="text/ch%201.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="img" href="images/a.png" media-type="image/png"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="c1"/>
    <itemref idref="ghost"/>
    <itemref idref="c2" linear="no"/>
  </spine>
  <guide>
    <reference type="text" title="Start" href="text/ch%201.xhtml#top"/>
  </guide>
</package>"#;

    #[test]
    fn test_parse_container() {
        let xml = r#"<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container" version="1.0">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;
        assert_eq!(parse_container(xml).unwrap(), "OEBPS/content.opf");
        assert!(parse_container("<container/>").is_err());
    }

    #[test]
    fn test_package_version() {
        assert_eq!(package_version(OPF).as_deref(), Some("3.0"));
        assert_eq!(package_version("<nothing/>"), None);
    }

    #[test]
    fn test_parse_package() {
        let package = Package::parse("OEBPS/content.opf", OPF).unwrap();
        assert!(package.is_epub3());
        assert_eq!(package.title(), Some("The Test & Book"));
        assert_eq!(package.creator(), Some("Ann Author; Bob Writer"));
        assert_eq!(package.metadata.get("identifier").map(String::as_str), Some("urn:isbn:123"));
        assert!(!package.metadata.contains_key("meta"));

        assert_eq!(package.manifest.len(), 5);
        assert_eq!(package.item("c1").unwrap().path, "OEBPS/text/ch 1.xhtml");
        assert_eq!(package.nav_item().unwrap().id, "nav");
        assert_eq!(package.ncx_item().unwrap().path, "OEBPS/toc.ncx");

        // the dangling itemref is dropped
        assert_eq!(package.spine.len(), 2);
        assert!(package.spine[0].linear);
        assert!(!package.spine[1].linear);
        assert_eq!(package.spine_position("OEBPS/text/ch2.xhtml"), Some(1));

        assert_eq!(package.guide.len(), 1);
        assert_eq!(package.guide[0].path, "OEBPS/text/ch 1.xhtml");
        assert_eq!(package.guide[0].title.as_deref(), Some("Start"));
    }

    #[test]
    fn test_malformed_package_is_container_error() {
        let err = Package::parse("content.opf", "<package><metadata></package>").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ContainerReadError);
    }
}
