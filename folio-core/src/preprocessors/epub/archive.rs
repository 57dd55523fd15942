//! Zip container access and href resolution for EPUB packages.

use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::LazyLock;
use zip::ZipArchive;

use crate::error::{IngestError, IngestResult};

static XML_ENCODING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^<\?xml[^>]*encoding\s*=\s*["']([A-Za-z0-9._-]+)["']"#).unwrap());

const EPUB_MIMETYPE: &str = "application/epub+zip";
const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Inflation bounds for a container. Declared sizes in the zip directory
/// are not trusted; entries are cut off while reading.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_entry_bytes: u64,
    pub max_total_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_entry_bytes: 256 * 1024 * 1024,
            max_total_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// Whether a zip archive carries the EPUB `mimetype` marker or an OCF
/// container document. `None` when the bytes are not a readable zip.
pub fn is_epub_container(bytes: &[u8]) -> Option<bool> {
    let mut zip = ZipArchive::new(Cursor::new(bytes)).ok()?;
    if zip.file_names().any(|name| normalize_path(name) == CONTAINER_PATH) {
        return Some(true);
    }
    let mut marker = String::new();
    let read = match zip.by_name("mimetype") {
        Ok(file) => file.take(64).read_to_string(&mut marker).is_ok(),
        Err(_) => false,
    };
    Some(read && marker.trim() == EPUB_MIMETYPE)
}

/// Every file entry of the container, keyed by its normalized path.
pub struct EpubArchive {
    entries: BTreeMap<String, Vec<u8>>,
}

impl EpubArchive {
    pub fn open(bytes: &[u8]) -> IngestResult<Self> {
        Self::open_with_limits(bytes, ArchiveLimits::default())
    }

    pub fn open_with_limits(bytes: &[u8], limits: ArchiveLimits) -> IngestResult<Self> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = BTreeMap::new();
        let mut total: u64 = 0;

        for i in 0..zip.len() {
            let file = zip.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = normalize_path(file.name());
            let budget = limits
                .max_entry_bytes
                .min(limits.max_total_bytes.saturating_sub(total));
            let mut data = Vec::with_capacity(file.size().min(budget) as usize);
            file.take(budget + 1).read_to_end(&mut data).map_err(|e| {
                IngestError::ContainerRead(format!("failed to read entry {name}: {e}"))
            })?;

            let len = data.len() as u64;
            if len > limits.max_entry_bytes {
                return Err(IngestError::ContainerRead(format!(
                    "entry {name} inflates past {} bytes",
                    limits.max_entry_bytes
                )));
            }
            if len > budget {
                return Err(IngestError::ContainerRead(format!(
                    "container inflates past {} bytes",
                    limits.max_total_bytes
                )));
            }
            total += len;
            entries.insert(name, data);
        }

        Ok(Self { entries })
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        if let Some(data) = self.entries.get(path) {
            return Some(data.as_slice());
        }
        // Producers on case-insensitive filesystems get href casing wrong
        self.entries
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(path))
            .map(|(_, data)| data.as_slice())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn read_text(&self, path: &str) -> IngestResult<String> {
        self.get(path)
            .map(decode_text)
            .ok_or_else(|| IngestError::ContainerRead(format!("missing container entry {path}")))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Decode markup honouring a BOM, then the XML declaration, then UTF-8.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }

    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(200)]);
    let encoding = XML_ENCODING
        .captures(head.trim_start())
        .and_then(|c| Encoding::for_label(c[1].as_bytes()))
        .unwrap_or(UTF_8);

    let (text, _) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Directory part of an archive path, without the trailing slash.
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map_or("", |i| &path[..i])
}

/// Split `href#fragment` into its path and optional fragment.
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.find('#') {
        Some(i) => (&href[..i], Some(&href[i + 1..]).filter(|f| !f.is_empty())),
        None => (href, None),
    }
}

/// Resolve an href found in a document at `base_dir` to an archive path.
///
/// The query and fragment are dropped and percent escapes decoded. Returns
/// `None` for external links and empty hrefs.
pub fn resolve_href(base_dir: &str, href: &str) -> Option<String> {
    let href = href.trim();
    let end = href.find(['?', '#']).unwrap_or(href.len());
    let main = &href[..end];
    if main.is_empty() || has_scheme(main) {
        return None;
    }

    let decoded = percent_encoding::percent_decode_str(main).decode_utf8_lossy();
    if let Some(absolute) = decoded.strip_prefix('/') {
        return Some(normalize_path(absolute));
    }
    if base_dir.is_empty() {
        Some(normalize_path(&decoded))
    } else {
        Some(normalize_path(&format!("{base_dir}/{decoded}")))
    }
}

/// Collapse `.`, `..` and repeated separators.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn has_scheme(href: &str) -> bool {
    match href.find(':') {
        // a colon after the first slash belongs to the path
        Some(i) => !href[..i].contains('/'),
        None => false,
    }
}
