//! # plates
//!
//! Extract the images of EPUB and Kindle (MOBI, AZW, AZW3) ebooks in reading
//! order.
//!
//! Each book goes through the same pipeline:
//!
//! 1. **Discovery**: a container parser finds candidate images. EPUBs follow
//!    the spine and the `<img>`/`<svg:image>` references of each content
//!    document; Mobipocket files scan the image records from the header's
//!    first image index.
//! 2. **Ordering**: candidates are ranked by their structural position
//!    (spine item and position, or record index), falling back to discovery
//!    order when that position cannot be trusted. The declared cover is
//!    marked.
//! 3. **Filtering**: ignored digests, small or badly shaped images and
//!    duplicates are rejected. Survivors get gapless ranks and a role.
//! 4. **Output**: images are written as `0000_cover.jpg`, `0001.jpg`, ...
//!    together with a `manifest.json`, optionally packed into a CBZ.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use plates::{ExtractConfig, Extractor};
//!
//! let config = ExtractConfig::default().with_output_root("out");
//! let report = Extractor::new(&config).extract(Path::new("comic.epub"))?;
//! for image in &report.manifest.images {
//!     println!("{} {}", image.filename, image.role);
//! }
//! # Ok::<(), plates::Error>(())
//! ```
//!
//! ## Many books
//!
//! [`Coordinator`] runs books in parallel, one book per worker, and shares
//! an optional persistent hash cache between them. An image found in
//! several books stays with the book whose path sorts first:
//!
//! ```no_run
//! use std::path::PathBuf;
//! use plates::{Coordinator, ExtractConfig, collect_inputs};
//!
//! let books = collect_inputs(&[PathBuf::from("library")], true);
//! let config = ExtractConfig::default().with_hash_cache("hashes.json");
//! let report = Coordinator::new(config)?.run(&books)?;
//! println!("{} images", report.images());
//! # Ok::<(), plates::Error>(())
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod discover;
pub mod epub;
pub mod error;
pub mod extract;
pub mod filter;
pub mod format;
pub mod image;
pub mod io;
pub mod manifest;
pub mod mobi;
pub mod order;
pub mod output;
pub(crate) mod util;

#[cfg(test)]
mod test_helpers;

pub use batch::{BookOutcome, Coordinator, RunReport, collect_inputs};
pub use cache::HashCache;
pub use config::{ArchiveFormat, DiscoveryMode, ExtractConfig, RoleThresholds};
pub use discover::{CandidateImage, Discover, Discovery, Metadata, Role, StructuralHint};
pub use error::{Error, ErrorKind, FailureRecord, Result};
pub use extract::{BookInfo, BookReport, Extractor, PreparedBook, inspect};
pub use filter::{Counts, FilterVerdict};
pub use format::{ContainerFormat, open_container};
pub use image::ImageFormat;
pub use manifest::{Manifest, ManifestImage};
pub use order::OrderBasis;
