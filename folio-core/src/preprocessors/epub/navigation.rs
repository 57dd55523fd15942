//! Table-of-contents resolution for EPUB packages.
//!
//! Preference order: the EPUB 3 navigation document, then the NCX, then a
//! flat outline in spine order. Falling back is never an error; the
//! spine outline carries a `MissingNavigation` warning instead.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use super::archive::{parent_dir, resolve_href, EpubArchive};
use super::package::Package;
use super::xml::{attr, attr_tokens, local_name, text_of};
use crate::config::EpubConfig;
use crate::error::{IngestError, IngestResult};
use crate::outline::Outline;
use crate::text::clean_text;
use crate::types::{NavigationKind, ProcessingWarning, WarningKind};

/// Resolve the outline of a package, degrading to spine order.
pub fn resolve_outline(archive: &EpubArchive, package: &Package, config: &EpubConfig) -> Outline {
    let mut notes: Vec<String> = Vec::new();

    if package.is_epub3() {
        match package.nav_item() {
            Some(item) => match archive
                .read_text(&item.path)
                .and_then(|xml| parse_nav_document(&xml, &item.path))
            {
                Ok(outline) if !outline.is_empty() => return outline,
                Ok(_) => notes.push(format!("navigation document {} has no toc entries", item.path)),
                Err(e) => notes.push(format!("navigation document {} unreadable: {e}", item.path)),
            },
            None => notes.push("no navigation document in manifest".to_string()),
        }
    }

    match package.ncx_item() {
        Some(item) => match archive
            .read_text(&item.path)
            .and_then(|xml| parse_ncx(&xml, &item.path))
        {
            Ok(outline) if !outline.is_empty() => {
                // legacy NCX in an EPUB 3 package is still complete navigation
                for note in &notes {
                    debug!("{}", note);
                }
                return outline;
            }
            Ok(_) => notes.push(format!("NCX {} has no navPoints", item.path)),
            Err(e) => notes.push(format!("NCX {} unreadable: {e}", item.path)),
        },
        None => notes.push("no NCX in manifest".to_string()),
    }

    let message = format!("falling back to spine order: {}", notes.join("; "));
    warn!("{}", message);
    let mut outline = spine_outline(package, config);
    outline
        .warnings
        .push(ProcessingWarning::new(WarningKind::MissingNavigation, message));
    outline
}

/// Flat outline in spine order, named by guide references where available.
pub fn spine_outline(package: &Package, config: &EpubConfig) -> Outline {
    let mut outline = Outline::new(NavigationKind::SpineFallback);
    for item in &package.spine {
        if !item.linear && !config.include_non_linear_items {
            continue;
        }
        let title = package
            .guide
            .iter()
            .find(|g| g.path == item.path)
            .and_then(|g| g.title.clone());
        outline.push(title, Some(item.path.clone()), None);
    }
    outline
}

/// An open `li` / `navPoint` whose outline entry is created lazily, so that
/// empty list items never become chapters while pre-order is preserved.
#[derive(Default)]
struct NavFrame {
    idx: Option<usize>,
    title: Option<String>,
    unit: Option<String>,
}

impl NavFrame {
    fn is_meaningful(&self) -> bool {
        self.title.is_some() || self.unit.is_some()
    }
}

/// Allocate entries for every open frame that has none yet.
fn materialize(outline: &mut Outline, frames: &mut [NavFrame]) {
    let mut parent = None;
    for frame in frames.iter_mut() {
        let idx = match frame.idx {
            Some(idx) => idx,
            None => {
                let idx = outline.push(frame.title.clone(), frame.unit.clone(), parent);
                frame.idx = Some(idx);
                idx
            }
        };
        parent = Some(idx);
    }
}

/// Title or unit learned after the entry was allocated.
fn update_entry(outline: &mut Outline, frame: &NavFrame) {
    if let Some(idx) = frame.idx {
        let entry = &mut outline.entries[idx];
        if entry.title.is_none() {
            entry.title = frame.title.clone();
        }
        if entry.unit.is_none() {
            entry.unit = frame.unit.clone();
        }
    }
}

fn xml_error(path: &str, e: quick_xml::Error) -> IngestError {
    IngestError::ContainerRead(format!("malformed navigation {path}: {e}"))
}

/// Parse the `toc` nav of an EPUB 3 navigation document.
pub fn parse_nav_document(xml: &str, nav_path: &str) -> IngestResult<Outline> {
    let base = parent_dir(nav_path);
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut outline = Outline::new(NavigationKind::NavDocument);
    let mut frames: Vec<NavFrame> = Vec::new();
    // nav nesting depth while inside the toc nav
    let mut toc_depth = 0usize;
    let mut toc_seen = false;
    // element depth inside the current label (`a` or `span`)
    let mut label_depth = 0usize;
    let mut label = String::new();

    loop {
        match reader.read_event().map_err(|e| xml_error(nav_path, e))? {
            Event::Start(e) => {
                let name = local_name(&e);
                if toc_depth == 0 {
                    if name == "nav" && is_toc_nav(&e, toc_seen) {
                        toc_depth = 1;
                        toc_seen = true;
                    }
                    continue;
                }
                if label_depth > 0 {
                    label_depth += 1;
                    continue;
                }
                match name.as_str() {
                    "nav" => toc_depth += 1,
                    "li" => {
                        // a nested item forces its ancestors into the outline first
                        if !frames.is_empty() && frames.iter().any(NavFrame::is_meaningful) {
                            materialize(&mut outline, &mut frames);
                        }
                        frames.push(NavFrame::default());
                    }
                    "a" | "span" => {
                        if let Some(frame) = frames.last_mut() {
                            if frame.title.is_none() && frame.idx.is_none() {
                                if name == "a" {
                                    frame.unit = attr(&e, b"href")
                                        .and_then(|h| resolve_href(base, &h));
                                }
                                label_depth = 1;
                                label.clear();
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                // <a href="..."/> carries a target without a label
                if toc_depth > 0 && label_depth == 0 && local_name(&e) == "a" {
                    if let Some(frame) = frames.last_mut() {
                        if frame.unit.is_none() {
                            frame.unit = attr(&e, b"href").and_then(|h| resolve_href(base, &h));
                        }
                    }
                }
            }
            Event::Text(e) if label_depth > 0 => label.push_str(&text_of(&e)),
            Event::CData(e) if label_depth > 0 => label.push_str(&String::from_utf8_lossy(&e)),
            Event::End(e) => {
                if toc_depth == 0 {
                    continue;
                }
                if label_depth > 0 {
                    label_depth -= 1;
                    if label_depth == 0 {
                        if let Some(frame) = frames.last_mut() {
                            let title = clean_text(&label);
                            frame.title = (!title.is_empty()).then_some(title);
                        }
                    }
                    continue;
                }
                match e.local_name().as_ref() {
                    b"li" => {
                        if let Some(frame) = frames.last() {
                            if frame.idx.is_some() {
                                update_entry(&mut outline, frame);
                            } else if frame.is_meaningful() {
                                materialize(&mut outline, &mut frames);
                            }
                        }
                        frames.pop();
                    }
                    b"nav" => toc_depth -= 1,
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(outline)
}

/// `epub:type="toc"`; an untyped first nav is accepted when no toc nav exists yet.
fn is_toc_nav(e: &BytesStart, toc_seen: bool) -> bool {
    let types = attr_tokens(e, b"type");
    if types.iter().any(|t| t == "toc") {
        return true;
    }
    !toc_seen && types.is_empty() && attr(e, b"role").as_deref() == Some("doc-toc")
}

/// Parse an NCX `navMap` into an outline.
pub fn parse_ncx(xml: &str, ncx_path: &str) -> IngestResult<Outline> {
    let base = parent_dir(ncx_path);
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut outline = Outline::new(NavigationKind::Ncx);
    let mut frames: Vec<NavFrame> = Vec::new();
    let mut in_nav_map = false;
    let mut in_label = false;
    let mut in_text = false;
    let mut label = String::new();

    let on_content = |e: &BytesStart, frames: &mut Vec<NavFrame>| {
        if let Some(frame) = frames.last_mut() {
            if frame.unit.is_none() {
                frame.unit = attr(e, b"src").and_then(|s| resolve_href(base, &s));
            }
        }
    };

    loop {
        match reader.read_event().map_err(|e| xml_error(ncx_path, e))? {
            Event::Start(e) => match local_name(&e).as_str() {
                "navmap" => in_nav_map = true,
                "navpoint" if in_nav_map => {
                    if frames.iter().any(NavFrame::is_meaningful) {
                        materialize(&mut outline, &mut frames);
                    }
                    frames.push(NavFrame::default());
                }
                "navlabel" if !frames.is_empty() => {
                    in_label = true;
                    label.clear();
                }
                "text" if in_label => in_text = true,
                "content" if !frames.is_empty() => on_content(&e, &mut frames),
                _ => {}
            },
            Event::Empty(e) => {
                if !frames.is_empty() && local_name(&e) == "content" {
                    on_content(&e, &mut frames);
                }
            }
            Event::Text(e) if in_text => label.push_str(&text_of(&e)),
            Event::End(e) => match e.local_name().as_ref() {
                b"text" => in_text = false,
                b"navLabel" | b"navlabel" => {
                    in_label = false;
                    if let Some(frame) = frames.last_mut() {
                        if frame.title.is_none() {
                            let title = clean_text(&label);
                            frame.title = (!title.is_empty()).then_some(title);
                        }
                    }
                }
                b"navPoint" | b"navpoint" => {
                    if let Some(frame) = frames.last() {
                        if frame.idx.is_some() {
                            update_entry(&mut outline, frame);
                        } else if frame.is_meaningful() {
                            materialize(&mut outline, &mut frames);
                        }
                    }
                    frames.pop();
                }
                b"navMap" | b"navmap" => in_nav_map = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(outline)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(outline: &Outline) -> Vec<(Option<&str>, Option<&str>, Option<usize>)> {
        outline
            .entries
            .iter()
            .map(|e| (e.title.as_deref(), e.unit.as_deref(), e.parent))
            .collect()
    }

    #[test]
    fn test_parse_nav_document_nested() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Nav</title></head>
<body>
  <nav epub:type="landmarks"><ol><li><a href="cover.xhtml">Cover</a></li></ol></nav>
  <nav epub:type="toc" id="toc">
    <h1>Contents</h1>
    <ol>
      <li><a href="text/c1.xhtml">One</a></li>
      <li><a href="text/c2.xhtml#start"><span>Two</span> &amp; More</a>
        <ol>
          <li><a href="text/c2a.xhtml">Two A</a></li>
          <li><a href="text/c2b.xhtml">Two B</a></li>
        </ol>
      </li>
      <li><span>Part Label</span>
        <ol><li><a href="text/c3.xhtml">Three</a></li></ol>
      </li>
      <li></li>
    </ol>
  </nav>
</body>
</html>"#;
        let outline = parse_nav_document(xml, "OPS/nav.xhtml").unwrap();
        assert_eq!(outline.kind, NavigationKind::NavDocument);
        assert_eq!(
            shape(&outline),
            vec![
                (Some("One"), Some("OPS/text/c1.xhtml"), None),
                (Some("Two & More"), Some("OPS/text/c2.xhtml"), None),
                (Some("Two A"), Some("OPS/text/c2a.xhtml"), Some(1)),
                (Some("Two B"), Some("OPS/text/c2b.xhtml"), Some(1)),
                (Some("Part Label"), None, None),
                (Some("Three"), Some("OPS/text/c3.xhtml"), Some(4)),
            ]
        );
    }

    #[test]
    fn test_parse_nav_without_toc_is_empty() {
        let xml = r#"<html><body><nav epub:type="landmarks"><ol><li><a href="a.xhtml">A</a></li></ol></nav></body></html>"#;
        let outline = parse_nav_document(xml, "nav.xhtml").unwrap();
        assert!(outline.is_empty());
    }

    #[test]
    fn test_parse_malformed_nav_errors() {
        let xml = r#"<html><body><nav epub:type="toc"><ol><li><a href="a.xhtml">A</li></ol></nav></body></html>"#;
        assert!(parse_nav_document(xml, "nav.xhtml").is_err());
    }

    #[test]
    fn test_parse_ncx_nested() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head><meta name="dtb:uid" content="x"/></head>
  <docTitle><text>Book</text></docTitle>
  <navMap>
    <navPoint id="n1" playOrder="1">
      <navLabel><text>Chapter 1</text></navLabel>
      <content src="c1.xhtml"/>
    </navPoint>
    <navPoint id="n2" playOrder="2">
      <navLabel><text>Chapter 2</text></navLabel>
      <content src="c2.xhtml"/>
      <navPoint id="n3" playOrder="3">
        <navLabel><text>Section 2.1</text></navLabel>
        <content src="c2.xhtml#s1"/>
      </navPoint>
    </navPoint>
  </navMap>
</ncx>"#;
        let outline = parse_ncx(xml, "OEBPS/toc.ncx").unwrap();
        assert_eq!(
            shape(&outline),
            vec![
                (Some("Chapter 1"), Some("OEBPS/c1.xhtml"), None),
                (Some("Chapter 2"), Some("OEBPS/c2.xhtml"), None),
                (Some("Section 2.1"), Some("OEBPS/c2.xhtml"), Some(1)),
            ]
        );
    }

    #[test]
    fn test_spine_outline_uses_guide_titles_and_skips_non_linear() {
        let opf = r#"<package version="2.0"><metadata/><manifest>
  <item id="a" href="a.xhtml" media-type="application/xhtml+xml"/>
  <item id="b" href="b.xhtml" media-type="application/xhtml+xml"/>
  <item id="c" href="c.xhtml" media-type="application/xhtml+xml"/>
</manifest><spine><itemref idref="a"/><itemref idref="b" linear="no"/><itemref idref="c"/></spine>
<guide><reference type="toc" title="Contents" href="c.xhtml"/></guide></package>"#;
        let package = Package::parse("content.opf", opf).unwrap();

        let outline = spine_outline(&package, &EpubConfig::default());
        assert_eq!(
            shape(&outline),
            vec![(None, Some("a.xhtml"), None), (Some("Contents"), Some("c.xhtml"), None)]
        );

        let config = EpubConfig {
            include_non_linear_items: true,
            ..EpubConfig::default()
        };
        assert_eq!(spine_outline(&package, &config).len(), 3);
    }
}
