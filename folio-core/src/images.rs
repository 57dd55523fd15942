//! Image store: deduplicates image payloads referenced by chapters and
//! rewrites in-unit references into document-wide image ids.

use quick_xml::escape::escape;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::ids::image_id;
use crate::preprocessors::Preprocessor;
use crate::types::{Chapter, Image, ImageId, ProcessingWarning, WarningKind};

/// Prefix of rewritten `src` attributes in chapter markup.
pub const IMAGE_SRC_PREFIX: &str = "image:";

#[derive(Debug, Default)]
pub struct ImageStore {
    pub images: BTreeMap<ImageId, Image>,
    pub warnings: Vec<ProcessingWarning>,
}

pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Media type from magic bytes, for assets whose container declares none
/// or declares something that is not an image type.
pub fn sniff_media_type(data: &[u8]) -> Option<&'static str> {
    const SIGNATURES: [(&[u8], &str); 6] = [
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xFF\xD8\xFF", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"BM", "image/bmp"),
        (b"\x00\x00\x00\x0CjP  ", "image/jp2"),
    ];
    if let Some((_, media_type)) = SIGNATURES.iter().find(|(magic, _)| data.starts_with(magic)) {
        return Some(*media_type);
    }
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    let head = String::from_utf8_lossy(&data[..data.len().min(256)]);
    if head.contains("<svg") {
        return Some("image/svg+xml");
    }
    None
}

fn media_type_for(declared: Option<&str>, data: &[u8]) -> String {
    match declared {
        Some(m) if m.starts_with("image/") => m.to_string(),
        _ => sniff_media_type(data)
            .or(declared)
            .unwrap_or("application/octet-stream")
            .to_string(),
    }
}

fn rewrite_src(html: &mut String, reference: &str, replacement: &str) {
    let needle = format!("src=\"{}\"", escape(reference));
    if html.contains(&needle) {
        *html = html.replace(&needle, &format!("src=\"{replacement}\""));
    }
}

pub struct ImageStoreBuilder<'a> {
    document_id: &'a str,
}

impl<'a> ImageStoreBuilder<'a> {
    pub fn new(document_id: &'a str) -> Self {
        Self { document_id }
    }

    /// Resolve every chapter's in-unit references through `source`, in
    /// chapter order. Identical bytes share one image; ids count first
    /// sightings. Unresolvable references are dropped with a warning.
    pub fn build(&self, chapters: &mut [Chapter], source: &dyn Preprocessor) -> ImageStore {
        let mut store = ImageStore::default();
        let mut by_hash: HashMap<String, ImageId> = HashMap::new();
        let mut by_reference: HashMap<String, Option<ImageId>> = HashMap::new();

        for chapter in chapters.iter_mut() {
            let references = std::mem::take(&mut chapter.content.images);
            let mut resolved: Vec<ImageId> = Vec::new();

            for reference in references {
                let id = match by_reference.get(&reference) {
                    Some(known) => known.clone(),
                    None => {
                        let id = match source.asset(&reference) {
                            Some(asset) => {
                                let hash = content_hash(asset.data);
                                let id = by_hash
                                    .entry(hash.clone())
                                    .or_insert_with(|| image_id(self.document_id, store.images.len() + 1))
                                    .clone();
                                if !store.images.contains_key(&id) {
                                    store.images.insert(
                                        id.clone(),
                                        Image {
                                            id: id.clone(),
                                            document_id: self.document_id.to_string(),
                                            media_type: media_type_for(asset.media_type, asset.data),
                                            content_hash: hash,
                                            data: asset.data.to_vec(),
                                        },
                                    );
                                }
                                Some(id)
                            }
                            None => None,
                        };
                        by_reference.insert(reference.clone(), id.clone());
                        id
                    }
                };

                match id {
                    Some(id) => {
                        rewrite_src(
                            &mut chapter.content.html,
                            &reference,
                            &format!("{IMAGE_SRC_PREFIX}{id}"),
                        );
                        if !resolved.contains(&id) {
                            resolved.push(id);
                        }
                    }
                    None => {
                        let message = format!("image {reference} not found in container");
                        warn!("{}: {}", chapter.id, message);
                        rewrite_src(&mut chapter.content.html, &reference, "");
                        let unit = chapter.source.as_deref().unwrap_or(chapter.id.as_str());
                        store.warnings.push(ProcessingWarning::for_unit(
                            WarningKind::MissingAsset,
                            unit,
                            message,
                        ));
                    }
                }
            }
            chapter.content.images = resolved;
        }

        debug!(
            "Image store: {} unique images, {} references",
            store.images.len(),
            by_reference.len()
        );
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::error::IngestResult;
    use crate::outline::Outline;
    use crate::preprocessors::{Asset, ExtractedUnit};
    use crate::types::{ChapterContent, SourceFormat, UnitKey};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nbody";

    struct Assets(HashMap<&'static str, (&'static [u8], Option<&'static str>)>);

    impl Preprocessor for Assets {
        fn format(&self) -> SourceFormat {
            SourceFormat::Epub3
        }
        fn metadata(&self) -> BTreeMap<String, String> {
            BTreeMap::new()
        }
        fn title(&self) -> Option<String> {
            None
        }
        fn author(&self) -> Option<String> {
            None
        }
        fn resolve_outline(&self, _: &IngestConfig) -> IngestResult<Outline> {
            unreachable!()
        }
        fn content_units(&self, _: &Outline, _: &IngestConfig) -> Vec<UnitKey> {
            Vec::new()
        }
        fn extract_unit(&self, key: &str, _: &IngestConfig) -> IngestResult<ExtractedUnit> {
            Ok(ExtractedUnit::empty(key))
        }
        fn asset(&self, reference: &str) -> Option<Asset<'_>> {
            self.0
                .get(reference)
                .map(|(data, media_type)| Asset { data, media_type: *media_type })
        }
        fn name(&self) -> &str {
            "assets"
        }
    }

    fn chapter(order: u32, refs: &[&str]) -> Chapter {
        let html = refs
            .iter()
            .map(|r| format!("<img src=\"{r}\"/>"))
            .collect::<String>();
        Chapter {
            id: format!("d_ch{order}"),
            document_id: "d".into(),
            title: format!("Chapter {order}"),
            order,
            level: 0,
            parent_id: None,
            children: Vec::new(),
            source: Some(format!("c{order}.xhtml")),
            shares_content_with: None,
            content: ChapterContent {
                html,
                images: refs.iter().map(|r| r.to_string()).collect(),
                ..ChapterContent::default()
            },
        }
    }

    fn assets() -> Assets {
        let mut map = HashMap::new();
        map.insert("img/a.png", (PNG, Some("image/png")));
        map.insert("img/copy-of-a.png", (PNG, None));
        map.insert("img/b.bin", (b"GIF89a....".as_slice(), Some("application/octet-stream")));
        Assets(map)
    }

    #[test]
    fn test_identical_bytes_share_one_image() {
        let mut chapters = vec![chapter(1, &["img/a.png"]), chapter(2, &["img/copy-of-a.png"])];
        let store = ImageStoreBuilder::new("d").build(&mut chapters, &assets());

        assert_eq!(store.images.len(), 1);
        assert_eq!(chapters[0].content.images, vec!["d_img1".to_string()]);
        assert_eq!(chapters[1].content.images, vec!["d_img1".to_string()]);
        assert_eq!(chapters[1].content.html, "<img src=\"image:d_img1\"/>");
        assert_eq!(store.images["d_img1"].media_type, "image/png");
        assert_eq!(store.images["d_img1"].content_hash, content_hash(PNG));
    }

    #[test]
    fn test_ids_count_first_sightings() {
        let mut chapters = vec![chapter(1, &["img/b.bin", "img/a.png", "img/b.bin"])];
        let store = ImageStoreBuilder::new("d").build(&mut chapters, &assets());

        assert_eq!(
            chapters[0].content.images,
            vec!["d_img1".to_string(), "d_img2".to_string()]
        );
        assert_eq!(store.images["d_img1"].media_type, "image/gif");
    }

    #[test]
    fn test_missing_asset_is_dropped_with_warning() {
        let mut chapters = vec![chapter(1, &["img/gone.png", "img/a.png"])];
        let store = ImageStoreBuilder::new("d").build(&mut chapters, &assets());

        assert_eq!(chapters[0].content.images, vec!["d_img1".to_string()]);
        assert!(chapters[0].content.html.starts_with("<img src=\"\"/>"));
        assert_eq!(store.warnings.len(), 1);
        assert_eq!(store.warnings[0].kind, WarningKind::MissingAsset);
        assert_eq!(store.warnings[0].unit.as_deref(), Some("c1.xhtml"));
    }

    #[test]
    fn test_sniff_media_type() {
        assert_eq!(sniff_media_type(PNG), Some("image/png"));
        assert_eq!(sniff_media_type(b"\xFF\xD8\xFF\xE0"), Some("image/jpeg"));
        assert_eq!(sniff_media_type(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(
            sniff_media_type(b"<?xml version=\"1.0\"?><svg xmlns=\"http://www.w3.org/2000/svg\"/>"),
            Some("image/svg+xml")
        );
        assert_eq!(sniff_media_type(b"plain"), None);
    }
}
