//! The contract between container parsers and the shared pipeline.
//!
//! A parser turns one container into a [`Discovery`]: candidate images in
//! the order it found them, each carrying whatever structural position the
//! container format provides. Ordering, filtering and output never look at
//! the container again, so a new format only has to implement [`Discover`].

use std::fmt;

use serde::Serialize;

use crate::config::DiscoveryMode;
use crate::error::Result;
use crate::format::ContainerFormat;
use crate::image::ImageFormat;

/// What an extracted image is, from the reader's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Cover,
    Page,
    Thumbnail,
    Decoration,
}

impl Role {
    /// Filename suffix; pages carry none.
    pub fn suffix(self) -> &'static str {
        match self {
            Role::Cover => "_cover",
            Role::Page => "",
            Role::Thumbnail => "_thumbnail",
            Role::Decoration => "_decoration",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Cover => "cover",
            Role::Page => "page",
            Role::Thumbnail => "thumbnail",
            Role::Decoration => "decoration",
        })
    }
}

/// Position of a candidate in the container's own reading structure.
///
/// Hints of the same kind compare in reading order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralHint {
    /// `item`-th spine entry, `position`-th image reference inside it.
    Spine { item: usize, position: usize },
    /// PDB record index.
    Record { index: usize },
}

/// The reading structure a container declares, used to judge whether the
/// hints of its candidates can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingOrder {
    /// An EPUB spine with `items` entries.
    Spine { items: usize },
    /// PDB image records from `first` up to (excluding) `count`.
    Records { first: usize, count: usize },
    /// No reading structure (exhaustive or downgraded discovery).
    Archive,
}

impl ReadingOrder {
    /// Whether `hint` is of the kind this structure declares and falls
    /// inside it.
    pub fn admits(&self, hint: &StructuralHint) -> bool {
        match (self, hint) {
            (ReadingOrder::Spine { items }, StructuralHint::Spine { item, .. }) => item < items,
            (ReadingOrder::Records { first, count }, StructuralHint::Record { index }) => {
                (*first..*count).contains(index)
            }
            _ => false,
        }
    }
}

/// One image found in a container, before ordering and filtering.
#[derive(Debug, Clone)]
pub struct CandidateImage {
    pub data: Vec<u8>,
    /// Position in the order the parser found it.
    pub discovery_index: usize,
    pub hint: Option<StructuralHint>,
    /// Detected from the payload, never from a filename.
    pub format: ImageFormat,
    /// Where the payload came from: an archive path or `record N`.
    pub source_ref: String,
    /// Role the container declares outright (EXTH cover/thumbnail records).
    pub seeded_role: Option<Role>,
}

impl CandidateImage {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Descriptive metadata of a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    /// Cover reference as the container names it (archive path or record).
    pub cover: Option<String>,
}

/// Everything one container yields for the pipeline.
#[derive(Debug)]
pub struct Discovery {
    pub candidates: Vec<CandidateImage>,
    pub reading_order: ReadingOrder,
    /// `source_ref` of the declared cover image, if any.
    pub cover_ref: Option<String>,
    /// References that pointed at nothing.
    pub missing: Vec<String>,
    /// The mode that actually produced the candidates.
    pub mode: DiscoveryMode,
    /// Why discovery was downgraded, when it was.
    pub fallback: Option<String>,
}

/// A container parser.
pub trait Discover: Send {
    fn format(&self) -> ContainerFormat;

    fn metadata(&self) -> &Metadata;

    /// Collect candidate images in discovery order.
    fn discover(&mut self, mode: DiscoveryMode) -> Result<Discovery>;
}
