//! Random-access ZIP entry index.
//!
//! The central directory is scanned once; entries are then read straight
//! from the byte source and inflated on demand.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::io::{ByteSource, ByteSourceCursor};

const STORED: u16 = 0;
const DEFLATED: u16 = 8;

/// Location of one entry's data inside the archive.
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    data_offset: u64,
    compressed_size: u64,
    size: u64,
    compression: u16,
}

impl ZipEntry {
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }
}

pub struct ZipIndex {
    /// Entries in physical order (local header position, then path).
    entries: Vec<ZipEntry>,
    by_name: HashMap<String, usize>,
    by_lower_name: HashMap<String, usize>,
}

impl ZipIndex {
    pub fn build(source: &Arc<dyn ByteSource>) -> Result<Self> {
        let cursor = ByteSourceCursor::new(source.clone());
        let mut archive = ZipArchive::new(cursor)
            .map_err(|e| Error::InvalidFile(format!("unreadable ZIP directory: {e}")))?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let file = archive.by_index_raw(i)?;
            let data_offset = file.data_start().ok_or_else(|| {
                Error::MalformedContainer(format!("ZIP entry {} has no local header", file.name()))
            })?;
            entries.push(ZipEntry {
                name: file.name().to_string(),
                data_offset,
                compressed_size: file.compressed_size(),
                size: file.size(),
                compression: compression_to_u16(file.compression()),
            });
        }
        entries.sort_by(|a, b| {
            a.data_offset
                .cmp(&b.data_offset)
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut by_name = HashMap::with_capacity(entries.len());
        let mut by_lower_name = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            by_name.entry(entry.name.clone()).or_insert(i);
            by_lower_name.entry(entry.name.to_lowercase()).or_insert(i);
        }

        Ok(Self {
            entries,
            by_name,
            by_lower_name,
        })
    }

    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Look up an entry, tolerating case mismatches between references
    /// and stored paths.
    pub fn find(&self, name: &str) -> Option<&ZipEntry> {
        self.by_name
            .get(name)
            .or_else(|| self.by_lower_name.get(&name.to_lowercase()))
            .map(|&i| &self.entries[i])
    }

    /// Read and inflate the entry stored under `name`.
    pub fn read(&self, source: &dyn ByteSource, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find(name)
            .ok_or_else(|| Error::MissingResource(name.to_string()))?;
        read_entry(source, entry)
    }
}

pub fn read_entry(source: &dyn ByteSource, entry: &ZipEntry) -> Result<Vec<u8>> {
    let compressed = source.read_at(entry.data_offset, entry.compressed_size as usize)?;

    match entry.compression {
        STORED => Ok(compressed),
        DEFLATED => {
            // Never inflate past the size the directory declares.
            let decoder = flate2::read::DeflateDecoder::new(&compressed[..]);
            let mut out = Vec::with_capacity(entry.size.min(64 << 20) as usize);
            decoder.take(entry.size).read_to_end(&mut out)?;
            Ok(out)
        }
        method => Err(Error::Extraction(format!(
            "{}: unsupported compression method {method}",
            entry.name
        ))),
    }
}

fn compression_to_u16(method: zip::CompressionMethod) -> u16 {
    match method {
        zip::CompressionMethod::Stored => STORED,
        zip::CompressionMethod::Deflated => DEFLATED,
        _ => 255,
    }
}
