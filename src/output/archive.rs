//! Comic archive export.
//!
//! Receives the accepted images in final reading order and packs them into
//! a single archive. Both `.cbz` and `.cbr` are written with the ZIP layout;
//! comic readers detect the container by content.

use std::io::{self, Seek, Write};

use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// One file of an archive, in reading order.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveEntry<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
}

/// Trait for writing an ordered image list as a single container.
pub trait ArchiveExporter {
    /// Write `entries` in the order given.
    fn export<W: Write + Seek>(&self, entries: &[ArchiveEntry<'_>], writer: &mut W) -> io::Result<()>;
}

/// Configuration for CBZ export.
#[derive(Debug, Clone, Default)]
pub struct CbzConfig {
    /// Deflate level for entries. `None` stores them; images are already
    /// compressed.
    pub compression_level: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct CbzExporter {
    config: CbzConfig,
}

impl CbzExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: CbzConfig) -> Self {
        self.config = config;
        self
    }
}

impl ArchiveExporter for CbzExporter {
    fn export<W: Write + Seek>(&self, entries: &[ArchiveEntry<'_>], writer: &mut W) -> io::Result<()> {
        let mut zip = ZipWriter::new(writer);

        let options = match self.config.compression_level {
            Some(level) => SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(level as i64)),
            None => SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        };

        for entry in entries {
            zip.start_file(entry.name, options).map_err(io_error)?;
            zip.write_all(entry.data)?;
        }

        zip.finish().map_err(io_error)?;
        Ok(())
    }
}

fn io_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> io::Error {
    io::Error::other(e)
}
