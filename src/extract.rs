//! The per-book pipeline: discover, rank, filter, write.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::cache::HashCache;
use crate::config::{DiscoveryMode, ExtractConfig};
use crate::discover::{Discover, Metadata};
use crate::error::Result;
use crate::filter::{CrossBookDedup, FilterPipeline, Screened};
use crate::format::{ContainerFormat, open_container, open_source};
use crate::io::ByteSource;
use crate::manifest::{Manifest, ManifestImage};
use crate::order::{OrderBasis, rank};
use crate::output::{
    ArchiveEntry, BookWriter, archive_path, book_output_dir, image_filename, rank_width,
    write_archive,
};

/// What extracting one book produced.
#[derive(Debug, Clone)]
pub struct BookReport {
    pub source: PathBuf,
    pub manifest: Manifest,
    /// Directory the images were written to; `None` on dry runs.
    pub output_dir: Option<PathBuf>,
    pub archive: Option<PathBuf>,
}

impl BookReport {
    pub fn accepted(&self) -> usize {
        self.manifest.counts.accepted
    }
}

/// Container metadata, as shown by `--info`.
#[derive(Debug, Clone, Serialize)]
pub struct BookInfo {
    pub source_file: String,
    pub format: ContainerFormat,
    #[serde(flatten)]
    pub metadata: Metadata,
}

/// Read a container's metadata without extracting anything.
pub fn inspect(path: &Path) -> Result<BookInfo> {
    let container = open_container(path)?;
    Ok(BookInfo {
        source_file: path.display().to_string(),
        format: container.format(),
        metadata: container.metadata().clone(),
    })
}

/// Identity of a book in the hash cache: its canonical path.
pub fn book_id(path: &Path) -> String {
    fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// A book that has been discovered, ranked and screened but not written.
#[derive(Debug, Clone)]
pub struct PreparedBook {
    pub source: PathBuf,
    /// See [`book_id`].
    pub id: String,
    pub format: ContainerFormat,
    pub metadata: Metadata,
    pub discovery: DiscoveryMode,
    pub order_basis: OrderBasis,
    pub fallback: Option<String>,
    pub missing: Vec<String>,
    pub screened: Screened,
}

impl PreparedBook {
    pub fn digests(&self) -> Vec<String> {
        self.screened.digests().map(str::to_string).collect()
    }
}

/// Runs the pipeline for single books. Cheap to create; one per worker is
/// fine.
pub struct Extractor<'a> {
    config: &'a ExtractConfig,
    cache: Option<&'a HashCache>,
}

impl<'a> Extractor<'a> {
    pub fn new(config: &'a ExtractConfig) -> Self {
        Self {
            config,
            cache: None,
        }
    }

    /// Deduplicate against a cache shared across books. The book's digests
    /// are recorded once its files are written.
    pub fn with_cache(mut self, cache: &'a HashCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn extract(&self, path: &Path) -> Result<BookReport> {
        let book = self.prepare(path)?;
        self.complete(book)
    }

    /// Extract from an already loaded source. `path` names the book in the
    /// manifest and decides where output goes.
    pub fn extract_source(&self, source: Arc<dyn ByteSource>, path: &Path) -> Result<BookReport> {
        let book = self.prepare_source(source, path)?;
        self.complete(book)
    }

    /// Discover, rank and screen a book without touching the cache or the
    /// output directory.
    pub fn prepare(&self, path: &Path) -> Result<PreparedBook> {
        let container = open_container(path)?;
        self.screen(container, path)
    }

    pub fn prepare_source(&self, source: Arc<dyn ByteSource>, path: &Path) -> Result<PreparedBook> {
        let container = open_source(source, Some(path))?;
        self.screen(container, path)
    }

    fn complete(&self, mut book: PreparedBook) -> Result<BookReport> {
        let config = self.config;
        let claims = match self.cache {
            Some(cache) if config.deduplicate => {
                let digests = book.digests();
                let held = CrossBookDedup::new(cache).settle(&book.id, digests.iter().map(String::as_str));
                book.screened.drop_held(&held);
                Some((cache, book.screened.claims(&book.id)))
            }
            _ => None,
        };

        let output_dir = (!config.dry_run)
            .then(|| book_output_dir(&book.source, config.output_root.as_deref()));
        let report = self.write(book, output_dir)?;
        if let Some((cache, claims)) = claims {
            cache.commit(&claims);
        }
        Ok(report)
    }

    fn screen(&self, mut container: Box<dyn Discover>, path: &Path) -> Result<PreparedBook> {
        let format = container.format();
        let metadata = container.metadata().clone();

        let discovery = container.discover(self.config.discovery)?;
        drop(container);

        let mode = discovery.mode;
        let fallback = discovery.fallback.clone();
        let missing = discovery.missing.clone();
        debug!(
            path = %path.display(),
            candidates = discovery.candidates.len(),
            missing = missing.len(),
            "discovered candidates"
        );

        let ranking = rank(discovery);
        let mut screened = FilterPipeline::new(self.config).screen_all(ranking.candidates);
        screened.counts.missing = missing.len();

        Ok(PreparedBook {
            source: path.to_path_buf(),
            id: book_id(path),
            format,
            metadata,
            discovery: mode,
            order_basis: ranking.basis,
            fallback,
            missing,
            screened,
        })
    }

    /// Name the accepted images and write them, with the manifest and the
    /// optional archive, into `output_dir`. `None` writes nothing.
    pub fn write(&self, book: PreparedBook, output_dir: Option<PathBuf>) -> Result<BookReport> {
        let config = self.config;
        let PreparedBook {
            source,
            format,
            metadata,
            discovery,
            order_basis,
            fallback,
            missing,
            screened,
            ..
        } = book;
        let Screened { images, counts } = screened;

        let width = rank_width(images.len());
        let filenames: Vec<String> = images
            .iter()
            .map(|image| image_filename(image.order_rank, width, image.role, image.metrics.format))
            .collect();

        let manifest = Manifest {
            source_file: source.display().to_string(),
            format,
            title: metadata.title,
            authors: metadata.authors,
            publisher: metadata.publisher,
            language: metadata.language,
            output_dir: output_dir.as_ref().map(|dir| dir.display().to_string()),
            discovery,
            order_basis,
            fallback,
            counts,
            missing,
            images: images
                .iter()
                .zip(&filenames)
                .map(|(image, name)| ManifestImage::new(image, name.clone(), config.debug_order))
                .collect(),
        };

        let Some(dir) = output_dir else {
            info!(
                path = %source.display(),
                images = counts.accepted,
                "dry run; nothing written"
            );
            return Ok(BookReport {
                source,
                manifest,
                output_dir: None,
                archive: None,
            });
        };

        let writer = BookWriter::prepare(&dir, config.clean_output)?;
        for (image, name) in images.iter().zip(&filenames) {
            writer.write_image(name, &image.candidate.data)?;
        }
        writer.write_manifest(&manifest)?;

        let archive = match config.archive {
            Some(archive_format) => {
                let entries: Vec<ArchiveEntry<'_>> = images
                    .iter()
                    .zip(&filenames)
                    .map(|(image, name)| ArchiveEntry {
                        name,
                        data: &image.candidate.data,
                    })
                    .collect();
                let path = archive_path(&dir, archive_format);
                write_archive(&path, archive_format, &entries)?;
                Some(path)
            }
            None => None,
        };

        info!(
            path = %source.display(),
            format = %format,
            images = counts.accepted,
            duplicates = counts.duplicates,
            missing = counts.missing,
            output = %dir.display(),
            "extracted book"
        );

        Ok(BookReport {
            source,
            manifest,
            output_dir: Some(dir),
            archive,
        })
    }
}
