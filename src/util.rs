//! Text decoding and archive path helpers shared by the container parsers.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;

/// Decode bytes to a string, handling the encodings old ebooks ship with.
///
/// Tries UTF-8 first, then the hint encoding (an XML declaration or the MOBI
/// codepage), and finally Windows-1252.
pub fn decode_text<'a>(bytes: &'a [u8], hint_encoding: Option<&str>) -> Cow<'a, str> {
    let (result, _encoding, malformed) = encoding_rs::UTF_8.decode(bytes);
    if !malformed {
        return result;
    }

    if let Some(name) = hint_encoding
        && let Some(encoding) = encoding_rs::Encoding::for_label(name.as_bytes())
    {
        let (result, _, _) = encoding.decode(bytes);
        return result;
    }

    let (result, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    result
}

/// Decode an XML document, honouring its `<?xml encoding="..."?>` declaration.
pub fn decode_xml(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = strip_bom(bytes);
    decode_text(bytes, extract_xml_encoding(bytes))
}

/// Extract the encoding name from an XML declaration in the first 100 bytes.
pub fn extract_xml_encoding(bytes: &[u8]) -> Option<&str> {
    let prefix = &bytes[..bytes.len().min(100)];

    let xml_start = memchr::memmem::find(prefix, b"<?xml")?;
    let after_xml = &prefix[xml_start..];

    let enc_pos = after_xml
        .windows(9)
        .position(|w| w.eq_ignore_ascii_case(b"encoding="))?;
    let after_enc = &after_xml[enc_pos + 9..];

    let quote = *after_enc.first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let value_end = after_enc[1..].iter().position(|&b| b == quote)? + 1;

    std::str::from_utf8(&after_enc[1..value_end]).ok()
}

/// Strip a UTF-8 BOM if present.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}

/// Local part of a namespaced XML name (`dc:title` -> `title`).
pub fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// Resolve the predefined XML entities and numeric character references.
pub fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        _ => {}
    }

    let code = if let Some(hex) = entity.strip_prefix("#x") {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        entity.strip_prefix('#')?.parse::<u32>().ok()?
    };
    char::from_u32(code).map(String::from)
}

/// Directory part of an archive path, with trailing slash (`OEBPS/text/`).
pub fn archive_dir(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..=i]).unwrap_or("")
}

/// Resolve an href found in a document at `base_dir` to a normalised
/// archive path.
///
/// Strips fragments and queries, percent-decodes, and collapses `.` and
/// `..` segments. Returns `None` for external URLs, `data:` URIs, empty
/// hrefs and paths that climb above the archive root.
pub fn resolve_href(base_dir: &str, href: &str) -> Option<String> {
    let href = href.trim();
    let href = href.split(['#', '?']).next().unwrap_or("");
    if href.is_empty() || is_external(href) {
        return None;
    }

    let decoded = percent_decode_str(href).decode_utf8_lossy();
    let joined = match decoded.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("{base_dir}{decoded}"),
    };
    normalize_path(&joined)
}

/// True for hrefs that point outside the book (`http:`, `data:`, `//host`).
pub fn is_external(href: &str) -> bool {
    // A scheme is letters followed by ':' before any '/'.
    match href.find(':') {
        Some(colon) => {
            let scheme = &href[..colon];
            !scheme.is_empty()
                && !scheme.contains('/')
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => href.starts_with("//"),
    }
}

/// Collapse `.`/`..` segments and duplicate slashes in an archive path.
pub fn normalize_path(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_fallbacks() {
        assert_eq!(decode_text("Café".as_bytes(), None), "Café");
        // 0xE9 is é in Windows-1252 and invalid as UTF-8
        assert_eq!(decode_text(b"Caf\xE9", None), "Café");
        assert_eq!(decode_text(b"\xC0\xE1\xE2", Some("windows-1251")), "Абв");
    }

    #[test]
    fn test_extract_xml_encoding() {
        assert_eq!(
            extract_xml_encoding(br#"<?xml version="1.0" encoding="ISO-8859-1"?><a/>"#),
            Some("ISO-8859-1")
        );
        assert_eq!(
            extract_xml_encoding(b"<?xml version='1.0' ENCODING='utf-8'?>"),
            Some("utf-8")
        );
        assert_eq!(extract_xml_encoding(b"<html/>"), None);
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom(&[0xEF, 0xBB, 0xBF, b'h', b'i']), b"hi");
        assert_eq!(strip_bom(b"hello"), b"hello");
        assert_eq!(strip_bom(&[0xEF, 0xBB, b'x']), &[0xEF, 0xBB, b'x']);
    }

    #[test]
    fn test_local_name() {
        assert_eq!(local_name(b"title"), b"title");
        assert_eq!(local_name(b"dc:title"), b"title");
        assert_eq!(local_name(b""), b"");
    }

    #[test]
    fn test_resolve_entity() {
        assert_eq!(resolve_entity("amp"), Some("&".to_string()));
        assert_eq!(resolve_entity("#65"), Some("A".to_string()));
        assert_eq!(resolve_entity("#x2019"), Some("\u{2019}".to_string()));
        assert_eq!(resolve_entity("nbsp"), None);
    }

    #[test]
    fn test_resolve_href_relative() {
        assert_eq!(
            resolve_href("OEBPS/text/", "../images/p%2001.jpg#frag"),
            Some("OEBPS/images/p 01.jpg".to_string())
        );
        assert_eq!(
            resolve_href("OEBPS/", "./img/a.png"),
            Some("OEBPS/img/a.png".to_string())
        );
        assert_eq!(resolve_href("OEBPS/", "/cover.jpg"), Some("cover.jpg".to_string()));
    }

    #[test]
    fn test_resolve_href_rejects_external() {
        assert_eq!(resolve_href("", "http://example.com/a.jpg"), None);
        assert_eq!(resolve_href("", "data:image/png;base64,AAAA"), None);
        assert_eq!(resolve_href("", "//cdn.example.com/a.jpg"), None);
        assert_eq!(resolve_href("", "#anchor"), None);
        assert_eq!(resolve_href("", "../../escape.jpg"), None);
    }

    #[test]
    fn test_archive_dir() {
        assert_eq!(archive_dir("OEBPS/content.opf"), "OEBPS/");
        assert_eq!(archive_dir("content.opf"), "");
    }
}
