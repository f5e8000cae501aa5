//! MOBI / AZW / AZW3 discovery.
//!
//! Image records follow the text records in a Palm database. Record 0's MOBI
//! header names the first of them; from there every record is checked
//! against the raster signature table, and anything that is not an image
//! (fonts, resource and index records, padding) is skipped.

mod headers;
mod pdb;

pub use headers::{ExthHeader, MobiHeader, NULL_INDEX};
pub use pdb::PdbInfo;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::DiscoveryMode;
use crate::discover::{
    CandidateImage, Discover, Discovery, Metadata, ReadingOrder, Role, StructuralHint,
};
use crate::error::{Error, Result};
use crate::format::{ContainerFormat, mobi_variant};
use crate::image::ImageFormat;
use crate::io::ByteSource;

/// Bytes read from each record to decide whether it is an image.
const SNIFF_LEN: usize = 32;

/// End-of-file marker record.
const EOF_RECORD: [u8; 4] = [0xE9, 0x8E, 0x0D, 0x0A];

/// Records that are known not to hold images.
pub fn is_metadata_record(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    matches!(
        &data[..4],
        b"FLIS" | b"FCIS" | b"SRCS" | b"BOUN" | b"FDST" | b"DATP"
        | b"AUDI" | b"VIDE" | b"RESC" | b"CMET" | b"PAGE" | b"CONT"
        | b"CRES" | b"FONT" | b"INDX"
    ) || data.starts_with(b"BOUNDARY") || data.starts_with(&EOF_RECORD)
}

/// An opened Mobipocket file.
pub struct MobiContainer {
    source: Arc<dyn ByteSource>,
    pdb: PdbInfo,
    header: MobiHeader,
    exth: Option<ExthHeader>,
    format: ContainerFormat,
    metadata: Metadata,
}

impl MobiContainer {
    /// Parse the record table and record 0. `path` only refines the
    /// MOBI/AZW label.
    pub fn from_source(source: Arc<dyn ByteSource>, path: Option<&Path>) -> Result<Self> {
        let pdb = PdbInfo::read(&*source)?;
        if pdb.num_records() < 2 {
            return Err(Error::InvalidFile(format!(
                "database has {} records; a book needs at least 2",
                pdb.num_records()
            )));
        }

        let (start, end) = pdb
            .record_range(0, source.len())
            .map_err(|e| Error::InvalidFile(format!("unreadable record 0: {e}")))?;
        let record0 = source.read_range(start, end)?;
        let header = MobiHeader::parse(&record0)?;

        if header.encryption != 0 {
            return Err(Error::InvalidFile(format!(
                "DRM-protected book (encryption type {})",
                header.encryption
            )));
        }

        let exth = if header.has_exth() {
            match record0
                .get(header.exth_offset()..)
                .ok_or_else(|| Error::MalformedContainer("EXTH offset past record 0".into()))
                .and_then(|data| ExthHeader::parse(data, header.encoding_label()))
            {
                Ok(exth) => Some(exth),
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable EXTH header");
                    None
                }
            }
        } else {
            None
        };

        let format = mobi_variant(header.mobi_version, path);
        let metadata = build_metadata(&header, exth.as_ref());

        debug!(
            records = pdb.num_records(),
            first_image = header.first_image_index,
            version = header.mobi_version,
            exth = exth.is_some(),
            "parsed Mobipocket headers"
        );

        Ok(Self {
            source,
            pdb,
            header,
            exth,
            format,
            metadata,
        })
    }

    /// Absolute record index of the EXTH cover image.
    pub fn cover_record(&self) -> Option<usize> {
        self.exth_record(|exth| exth.cover_offset)
    }

    /// Absolute record index of the EXTH thumbnail image.
    pub fn thumbnail_record(&self) -> Option<usize> {
        self.exth_record(|exth| exth.thumbnail_offset)
    }

    fn exth_record(&self, offset: impl Fn(&ExthHeader) -> Option<u32>) -> Option<usize> {
        let first = self.first_image_record()?;
        let offset = offset(self.exth.as_ref()?)? as usize;
        first.checked_add(offset)
    }

    fn first_image_record(&self) -> Option<usize> {
        let first = self.header.first_image_index;
        (self.header.has_mobi_magic && first != NULL_INDEX).then_some(first as usize)
    }

    /// Where the image scan starts, and why it starts there when the
    /// header could not say.
    fn scan_start(&self) -> (Option<usize>, Option<String>) {
        if !self.header.has_mobi_magic {
            let after_text = 1 + self.header.text_record_count as usize;
            return (
                Some(after_text),
                Some("record 0 has no MOBI header; scanning after the text records".into()),
            );
        }
        match self.first_image_record() {
            Some(first) if first < self.pdb.num_records() => (Some(first), None),
            Some(first) => {
                warn!(
                    first_image = first,
                    records = self.pdb.num_records(),
                    "first image index outside the record table"
                );
                (None, None)
            }
            None => (None, None),
        }
    }

    /// Read a record if it is an image, `Ok(None)` if it is something else.
    fn read_image_record(&self, index: usize) -> Result<Option<(ImageFormat, Vec<u8>)>> {
        let (start, end) = self.pdb.record_range(index, self.source.len())?;
        let len = (end - start) as usize;
        let head = self.source.read_at(start, len.min(SNIFF_LEN))?;

        if is_metadata_record(&head) {
            return Ok(None);
        }
        if ImageFormat::sniff_raster(&head).is_none() {
            return Ok(None);
        }

        let data = self.source.read_at(start, len)?;
        Ok(ImageFormat::sniff_raster(&data).map(|format| (format, data)))
    }
}

impl Discover for MobiContainer {
    fn format(&self) -> ContainerFormat {
        self.format
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn discover(&mut self, mode: DiscoveryMode) -> Result<Discovery> {
        let count = self.pdb.num_records();
        let (first, fallback) = self.scan_start();
        if let Some(reason) = &fallback {
            warn!(reason = %reason, "MOBI header missing");
        }

        let cover = self.cover_record();
        let thumbnail = self.thumbnail_record();

        let mut candidates = Vec::new();
        let mut missing = Vec::new();
        let first = first.unwrap_or(count);

        for index in first..count {
            let (format, data) = match self.read_image_record(index) {
                Ok(Some(image)) => image,
                Ok(None) => {
                    debug!(record = index, "not an image record");
                    continue;
                }
                Err(e) => {
                    warn!(record = index, error = %e, "skipping unreadable record");
                    missing.push(format!("record {index}"));
                    continue;
                }
            };

            let seeded_role = if Some(index) == cover {
                Some(Role::Cover)
            } else if Some(index) == thumbnail {
                Some(Role::Thumbnail)
            } else {
                None
            };

            candidates.push(CandidateImage {
                data,
                discovery_index: candidates.len(),
                hint: Some(StructuralHint::Record { index }),
                format,
                source_ref: format!("record {index}"),
                seeded_role,
            });
        }

        Ok(Discovery {
            candidates,
            reading_order: ReadingOrder::Records { first, count },
            cover_ref: cover.map(|index| format!("record {index}")),
            missing,
            mode,
            fallback,
        })
    }
}

fn build_metadata(header: &MobiHeader, exth: Option<&ExthHeader>) -> Metadata {
    let full_name = (!header.title.is_empty()).then(|| header.title.clone());
    let Some(exth) = exth else {
        return Metadata {
            title: full_name,
            ..Metadata::default()
        };
    };

    let cover = match (header.first_image_index, exth.cover_offset) {
        (first, Some(offset)) if header.has_mobi_magic && first != NULL_INDEX => {
            (first as usize).checked_add(offset as usize).map(|i| format!("record {i}"))
        }
        _ => None,
    };

    Metadata {
        title: exth.title.clone().or(full_name),
        authors: exth.authors.clone(),
        publisher: exth.publisher.clone(),
        language: exth.language.clone(),
        cover,
    }
}
