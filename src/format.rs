//! Container format detection.
//!
//! The family (ZIP or Palm database) is decided by content. The extension
//! only refines the label of a Mobipocket file whose header cannot tell
//! MOBI and AZW apart.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::discover::Discover;
use crate::epub::EpubContainer;
use crate::error::{Error, Result};
use crate::io::{ByteSource, open_file};
use crate::mobi::MobiContainer;

/// Supported container variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Epub,
    Mobi,
    Azw,
    Azw3,
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContainerFormat::Epub => "EPUB",
            ContainerFormat::Mobi => "MOBI",
            ContainerFormat::Azw => "AZW",
            ContainerFormat::Azw3 => "AZW3",
        })
    }
}

/// Container family decided from the first bytes of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Zip,
    PalmDatabase,
}

/// Identify the container family from the leading bytes.
pub fn detect_family(prefix: &[u8]) -> Option<Family> {
    if prefix.starts_with(b"PK\x03\x04") {
        Some(Family::Zip)
    } else if prefix.len() >= 68 && &prefix[60..68] == b"BOOKMOBI" {
        Some(Family::PalmDatabase)
    } else {
        None
    }
}

/// Label a Mobipocket file from its header version and extension.
pub fn mobi_variant(mobi_version: u32, path: Option<&Path>) -> ContainerFormat {
    let ext = path
        .and_then(|p| p.extension())
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match (mobi_version, ext.as_deref()) {
        (8, _) | (_, Some("azw3")) => ContainerFormat::Azw3,
        (_, Some("azw")) => ContainerFormat::Azw,
        _ => ContainerFormat::Mobi,
    }
}

/// Open `path` with the parser matching its content.
pub fn open_container(path: &Path) -> Result<Box<dyn Discover>> {
    let source = open_file(path)?;
    open_source(source, Some(path))
}

/// Open an already loaded byte source. `path` only refines the MOBI label.
pub fn open_source(source: Arc<dyn ByteSource>, path: Option<&Path>) -> Result<Box<dyn Discover>> {
    let prefix = source.read_prefix(68)?;
    match detect_family(&prefix) {
        Some(Family::Zip) => Ok(Box::new(EpubContainer::from_source(source)?)),
        Some(Family::PalmDatabase) => Ok(Box::new(MobiContainer::from_source(source, path)?)),
        None => Err(Error::InvalidFile(
            "neither a ZIP archive nor a Mobipocket database".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_family() {
        assert_eq!(detect_family(b"PK\x03\x04rest"), Some(Family::Zip));

        let mut pdb = vec![0u8; 78];
        pdb[60..68].copy_from_slice(b"BOOKMOBI");
        assert_eq!(detect_family(&pdb), Some(Family::PalmDatabase));

        pdb[60..68].copy_from_slice(b"TEXtREAd");
        assert_eq!(detect_family(&pdb), None);
        assert_eq!(detect_family(b"%PDF-1.7"), None);
    }

    #[test]
    fn test_mobi_variant_prefers_header_version() {
        assert_eq!(
            mobi_variant(8, Some(Path::new("book.mobi"))),
            ContainerFormat::Azw3
        );
        assert_eq!(mobi_variant(6, Some(Path::new("book.AZW"))), ContainerFormat::Azw);
        assert_eq!(mobi_variant(6, Some(Path::new("book.prc"))), ContainerFormat::Mobi);
        assert_eq!(mobi_variant(6, None), ContainerFormat::Mobi);
    }

    #[test]
    fn test_open_source_rejects_unknown_content() {
        let source: Arc<dyn ByteSource> =
            Arc::new(crate::io::MemorySource::new(b"just some text".to_vec()));
        let err = open_source(source, None).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidFile);
    }
}
