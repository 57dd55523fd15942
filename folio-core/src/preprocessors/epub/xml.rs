//! quick-xml helpers shared by the package, navigation and content parsers.

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, BytesText};

/// Named HTML entities that XHTML content documents use without declaring.
pub fn resolve_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "nbsp" => "\u{00A0}",
        "ensp" => "\u{2002}",
        "emsp" => "\u{2003}",
        "thinsp" => "\u{2009}",
        "shy" => "\u{00AD}",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201C}",
        "rdquo" => "\u{201D}",
        "laquo" => "\u{00AB}",
        "raquo" => "\u{00BB}",
        "copy" => "\u{00A9}",
        "reg" => "\u{00AE}",
        "trade" => "\u{2122}",
        "deg" => "\u{00B0}",
        "middot" => "\u{00B7}",
        "bull" => "\u{2022}",
        "dagger" => "\u{2020}",
        "Dagger" => "\u{2021}",
        "sect" => "\u{00A7}",
        "para" => "\u{00B6}",
        "times" => "\u{00D7}",
        "eacute" => "\u{00E9}",
        "egrave" => "\u{00E8}",
        "aacute" => "\u{00E1}",
        "agrave" => "\u{00E0}",
        "ouml" => "\u{00F6}",
        "uuml" => "\u{00FC}",
        "auml" => "\u{00E4}",
        "szlig" => "\u{00DF}",
        "ccedil" => "\u{00E7}",
        _ => return None,
    })
}

/// The five XML entities first, then the HTML names above.
fn resolve_any_entity(name: &str) -> Option<&'static str> {
    resolve_predefined_entity(name).or_else(|| resolve_entity(name))
}

/// Unescaped text of a text event, raw text when an entity is unknown.
pub fn text_of(e: &BytesText) -> String {
    match e.unescape_with(resolve_any_entity) {
        Ok(text) => text.into_owned(),
        Err(_) => String::from_utf8_lossy(e.as_ref()).into_owned(),
    }
}

/// Value of the attribute whose local name is `local` (prefix ignored).
pub fn attr(e: &BytesStart, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .map(|a| match a.unescape_value_with(resolve_any_entity) {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
        })
}

/// Whitespace-separated tokens of an attribute such as `epub:type` or `properties`.
pub fn attr_tokens(e: &BytesStart, local: &[u8]) -> Vec<String> {
    attr(e, local)
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

pub fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase()
}
