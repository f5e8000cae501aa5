//! `container.xml` and OPF package document parsing.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::discover::Metadata;
use crate::error::{Error, Result};
use crate::util::{decode_xml, local_name, resolve_entity};

/// One `<item>` of the OPF manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestItem {
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
}

impl ManifestItem {
    pub fn is_document(&self) -> bool {
        matches!(
            self.media_type.as_str(),
            "application/xhtml+xml" | "text/html" | "application/html"
        ) || {
            let href = self.href.to_ascii_lowercase();
            self.media_type.is_empty()
                && (href.ends_with(".xhtml") || href.ends_with(".html") || href.ends_with(".htm"))
        }
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

/// Parsed OPF package.
#[derive(Debug, Default)]
pub struct Package {
    pub metadata: Metadata,
    /// Manifest id -> item. Hrefs are relative to the OPF.
    pub manifest: HashMap<String, ManifestItem>,
    /// Spine idrefs in reading order.
    pub spine: Vec<String>,
    /// Href of the cover image, relative to the OPF.
    pub cover_href: Option<String>,
}

/// Find the package document path in `META-INF/container.xml`.
pub fn parse_container_xml(bytes: &[u8]) -> Result<String> {
    let content = decode_xml(bytes);
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e))
                if local_name(e.name().as_ref()) == b"rootfile" =>
            {
                if let Some(path) = attr_value(&e, b"full-path")
                    && !path.is_empty()
                {
                    return Ok(path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::MalformedContainer(format!(
                    "unparsable container.xml: {e}"
                )));
            }
            _ => {}
        }
    }

    Err(Error::MalformedContainer(
        "no rootfile in container.xml".into(),
    ))
}

/// Parse an OPF package document.
pub fn parse_opf(content: &str) -> Result<Package> {
    // Text is trimmed per field; trimming per event would eat the spaces
    // around entity references.
    let mut reader = Reader::from_str(content);

    let mut package = Package::default();
    let mut epub2_cover_id: Option<String> = None;

    let mut in_metadata = false;
    let mut current_element: Option<&'static str> = None;
    let mut buf_text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::MalformedContainer(format!("unparsable package document: {e}")))?;

        match event {
            Event::Start(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if local == b"metadata" {
                    in_metadata = true;
                } else if in_metadata {
                    current_element = metadata_field(local);
                    buf_text.clear();
                }
                read_package_element(&e, &mut package, &mut epub2_cover_id);
            }
            Event::Empty(e) => read_package_element(&e, &mut package, &mut epub2_cover_id),
            Event::Text(e) if current_element.is_some() => {
                buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Event::GeneralRef(e) if current_element.is_some() => {
                if let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref())) {
                    buf_text.push_str(&resolved);
                }
            }
            Event::End(e) => {
                if local_name(e.name().as_ref()) == b"metadata" {
                    in_metadata = false;
                }
                if let Some(elem) = current_element.take() {
                    let text = buf_text.trim().to_string();
                    buf_text.clear();
                    if !text.is_empty() {
                        set_metadata_field(&mut package.metadata, elem, text);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    // EPUB3 property takes priority over the EPUB2 meta.
    let epub3_cover = package.manifest.values().find(|item| {
        item.properties
            .as_ref()
            .is_some_and(|props| props.split_ascii_whitespace().any(|p| p == "cover-image"))
    });
    package.cover_href = match epub3_cover {
        Some(item) => Some(item.href.clone()),
        None => epub2_cover_id
            .and_then(|id| package.manifest.get(&id))
            .map(|item| item.href.clone()),
    };
    package.metadata.cover = package.cover_href.clone();

    Ok(package)
}

fn metadata_field(local: &[u8]) -> Option<&'static str> {
    match local {
        b"title" => Some("title"),
        b"creator" => Some("creator"),
        b"publisher" => Some("publisher"),
        b"language" => Some("language"),
        _ => None,
    }
}

fn set_metadata_field(metadata: &mut Metadata, field: &str, text: String) {
    match field {
        "title" if metadata.title.is_none() => metadata.title = Some(text),
        "creator" => metadata.authors.push(text),
        "publisher" if metadata.publisher.is_none() => metadata.publisher = Some(text),
        "language" if metadata.language.is_none() => metadata.language = Some(text),
        _ => {}
    }
}

/// Record manifest items, spine itemrefs and the EPUB2 cover meta.
fn read_package_element(
    e: &BytesStart<'_>,
    package: &mut Package,
    epub2_cover_id: &mut Option<String>,
) {
    let name = e.name();
    match local_name(name.as_ref()) {
        b"item" => {
            let id = attr_value(e, b"id").unwrap_or_default();
            if !id.is_empty() {
                package.manifest.insert(
                    id,
                    ManifestItem {
                        href: attr_value(e, b"href").unwrap_or_default(),
                        media_type: attr_value(e, b"media-type")
                            .unwrap_or_default()
                            .to_ascii_lowercase(),
                        properties: attr_value(e, b"properties"),
                    },
                );
            }
        }
        b"itemref" => {
            if let Some(idref) = attr_value(e, b"idref") {
                package.spine.push(idref);
            }
        }
        b"meta" => {
            if attr_value(e, b"name").as_deref() == Some("cover")
                && let Some(content) = attr_value(e, b"content")
            {
                *epub2_cover_id = Some(content);
            }
        }
        _ => {}
    }
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| local_name(attr.key.as_ref()) == key)
        .map(|attr| {
            let raw = String::from_utf8_lossy(&attr.value);
            match quick_xml::escape::unescape(&raw) {
                Ok(value) => value.into_owned(),
                Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
            }
        })
}
