//! Filtering and deduplication.
//!
//! Every ranked candidate passes through a fixed, short-circuiting chain of
//! predicates and leaves with exactly one [`FilterVerdict`]:
//!
//! 1. ignore-hash membership
//! 2. minimum payload size
//! 3. minimum width/height and maximum aspect ratio
//! 4. duplicate of an earlier candidate of this book
//!
//! Candidates must be fed in rank order; the first occurrence of a digest
//! is the one that survives, and accepted candidates are numbered in the
//! order they are accepted.
//!
//! Duplicates across books are settled afterwards by [`CrossBookDedup`],
//! which visits books one at a time in book-id order.

use std::collections::{HashMap, HashSet};
use std::ops::AddAssign;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::cache::{HashCache, StagedClaims};
use crate::config::{ExtractConfig, RoleThresholds};
use crate::discover::{CandidateImage, Role};
use crate::image::{Dimensions, ImageMetrics};
use crate::order::RankedCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterVerdict {
    Accepted,
    RejectedByHash,
    RejectedBySize,
    RejectedByDimension,
    RejectedByDuplicate,
}

impl fmt::Display for FilterVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FilterVerdict::Accepted => "accepted",
            FilterVerdict::RejectedByHash => "rejected by hash",
            FilterVerdict::RejectedBySize => "rejected by size",
            FilterVerdict::RejectedByDimension => "rejected by dimension",
            FilterVerdict::RejectedByDuplicate => "rejected as duplicate",
        })
    }
}

/// An accepted candidate with its final rank and role.
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub candidate: CandidateImage,
    /// Gapless 0-based position among the accepted images of the book.
    pub order_rank: usize,
    pub role: Role,
    /// Position among all ranked candidates, rejected ones included.
    pub sequence: usize,
    pub metrics: ImageMetrics,
}

/// A candidate that did not make it.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub verdict: FilterVerdict,
    pub source_ref: String,
    pub hash: String,
}

#[derive(Debug, Clone)]
pub enum Screening {
    Accepted(ResolvedImage),
    Rejected(Rejection),
}

impl Screening {
    pub fn verdict(&self) -> FilterVerdict {
        match self {
            Screening::Accepted(_) => FilterVerdict::Accepted,
            Screening::Rejected(rejection) => rejection.verdict,
        }
    }
}

/// Per-book verdict counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub accepted: usize,
    pub ignored_by_hash: usize,
    pub duplicates: usize,
    pub filtered_by_size: usize,
    pub filtered_by_dimension: usize,
    /// References that resolved to nothing during discovery.
    pub missing: usize,
}

impl Counts {
    pub fn record(&mut self, verdict: FilterVerdict) {
        match verdict {
            FilterVerdict::Accepted => self.accepted += 1,
            FilterVerdict::RejectedByHash => self.ignored_by_hash += 1,
            FilterVerdict::RejectedBySize => self.filtered_by_size += 1,
            FilterVerdict::RejectedByDimension => self.filtered_by_dimension += 1,
            FilterVerdict::RejectedByDuplicate => self.duplicates += 1,
        }
    }

    /// Candidates that reached the filter.
    pub fn screened(&self) -> usize {
        self.accepted
            + self.ignored_by_hash
            + self.duplicates
            + self.filtered_by_size
            + self.filtered_by_dimension
    }
}

impl AddAssign for Counts {
    fn add_assign(&mut self, other: Counts) {
        self.accepted += other.accepted;
        self.ignored_by_hash += other.ignored_by_hash;
        self.duplicates += other.duplicates;
        self.filtered_by_size += other.filtered_by_size;
        self.filtered_by_dimension += other.filtered_by_dimension;
        self.missing += other.missing;
    }
}

/// The accepted images of one book in rank order, with its counts.
#[derive(Debug, Clone, Default)]
pub struct Screened {
    pub images: Vec<ResolvedImage>,
    pub counts: Counts,
}

impl Screened {
    pub fn digests(&self) -> impl Iterator<Item = &str> {
        self.images.iter().map(|image| image.metrics.hash.as_str())
    }

    /// Turn accepted images whose digest is in `held` into duplicates and
    /// renumber the survivors. Returns how many were dropped.
    pub fn drop_held(&mut self, held: &HashSet<String>) -> usize {
        if held.is_empty() {
            return 0;
        }
        let before = self.images.len();
        self.images.retain(|image| !held.contains(&image.metrics.hash));
        let dropped = before - self.images.len();
        for (rank, image) in self.images.iter_mut().enumerate() {
            image.order_rank = rank;
        }
        self.counts.accepted -= dropped;
        self.counts.duplicates += dropped;
        dropped
    }

    /// The digests `book` records in the hash cache once it is written.
    pub fn claims(&self, book: &str) -> StagedClaims {
        let mut claims = StagedClaims::new(book);
        for image in &self.images {
            claims.push(image.metrics.hash.clone(), image.order_rank);
        }
        claims
    }
}

/// The predicate chain for one book.
pub struct FilterPipeline<'a> {
    config: &'a ExtractConfig,
    seen: HashSet<String>,
    counts: Counts,
}

impl<'a> FilterPipeline<'a> {
    pub fn new(config: &'a ExtractConfig) -> Self {
        Self {
            config,
            seen: HashSet::new(),
            counts: Counts::default(),
        }
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    /// Screen the next candidate in rank order.
    pub fn screen(&mut self, ranked: RankedCandidate) -> Screening {
        let RankedCandidate {
            candidate,
            sequence,
            role,
        } = ranked;
        let metrics = ImageMetrics::measure(candidate.format, &candidate.data);
        let verdict = self.verdict(&metrics);
        self.counts.record(verdict);

        debug!(
            source = %candidate.source_ref,
            hash = %metrics.hash,
            bytes = metrics.bytes,
            verdict = %verdict,
            "screened candidate"
        );

        if verdict != FilterVerdict::Accepted {
            return Screening::Rejected(Rejection {
                verdict,
                source_ref: candidate.source_ref,
                hash: metrics.hash,
            });
        }

        let order_rank = self.counts.accepted - 1;
        let role = finalize_role(role, &metrics, &self.config.roles);
        Screening::Accepted(ResolvedImage {
            candidate,
            order_rank,
            role,
            sequence,
            metrics,
        })
    }

    /// Screen a whole ranked book, keeping only what was accepted.
    pub fn screen_all(mut self, ranked: impl IntoIterator<Item = RankedCandidate>) -> Screened {
        let images = ranked
            .into_iter()
            .filter_map(|candidate| match self.screen(candidate) {
                Screening::Accepted(image) => Some(image),
                Screening::Rejected(_) => None,
            })
            .collect();
        Screened {
            images,
            counts: self.counts,
        }
    }

    fn verdict(&mut self, metrics: &ImageMetrics) -> FilterVerdict {
        let config = self.config;

        if config.ignored_hashes.contains(&metrics.hash) {
            return FilterVerdict::RejectedByHash;
        }
        if metrics.bytes < config.min_bytes {
            return FilterVerdict::RejectedBySize;
        }
        if let Some(dimensions) = metrics.dimensions
            && !dimensions_allowed(dimensions, config)
        {
            return FilterVerdict::RejectedByDimension;
        }
        if config.deduplicate && !self.seen.insert(metrics.hash.clone()) {
            return FilterVerdict::RejectedByDuplicate;
        }
        FilterVerdict::Accepted
    }
}

/// Decides which book keeps a digest that several books share.
///
/// A digest the cache holds for another book is always given up. Within a
/// run, the first book settled keeps it. Callers settle books in book-id
/// order, so the outcome never depends on which worker finished first.
pub struct CrossBookDedup<'a> {
    cache: &'a HashCache,
    reserved: HashMap<String, String>,
}

impl<'a> CrossBookDedup<'a> {
    pub fn new(cache: &'a HashCache) -> Self {
        Self {
            cache,
            reserved: HashMap::new(),
        }
    }

    /// The digests among `digests` that `book` must give up.
    pub fn settle<'d>(
        &mut self,
        book: &str,
        digests: impl IntoIterator<Item = &'d str>,
    ) -> HashSet<String> {
        let mut held = HashSet::new();
        for hash in digests {
            if let Some(entry) = self.cache.held_by_other(hash, book) {
                debug!(hash, holder = %entry.book, rank = entry.rank, "digest held by another book");
                held.insert(hash.to_string());
                continue;
            }
            match self.reserved.get(hash) {
                Some(owner) if owner != book => {
                    debug!(hash, holder = %owner, "digest taken earlier in this run");
                    held.insert(hash.to_string());
                }
                Some(_) => {}
                None => {
                    self.reserved.insert(hash.to_string(), book.to_string());
                }
            }
        }
        held
    }
}

fn dimensions_allowed(dimensions: Dimensions, config: &ExtractConfig) -> bool {
    if dimensions.width < config.min_width || dimensions.height < config.min_height {
        return false;
    }
    match (config.max_aspect_ratio, dimensions.elongation()) {
        (Some(max), Some(elongation)) => elongation <= max,
        _ => true,
    }
}

/// Final role of an accepted image. Covers and seeded thumbnails keep their
/// role; everything else is classified by size and shape.
pub fn finalize_role(seeded: Role, metrics: &ImageMetrics, thresholds: &RoleThresholds) -> Role {
    if matches!(seeded, Role::Cover | Role::Thumbnail) {
        return seeded;
    }
    if let Some(dimensions) = metrics.dimensions {
        if dimensions.width <= thresholds.thumbnail_max_edge
            || dimensions.height <= thresholds.thumbnail_max_edge
        {
            return Role::Thumbnail;
        }
        if dimensions
            .elongation()
            .is_some_and(|e| e >= thresholds.decoration_elongation)
        {
            return Role::Decoration;
        }
    }
    if metrics.bytes < thresholds.decoration_max_bytes {
        return Role::Decoration;
    }
    Role::Page
}
