//! Ranking and role seeding.
//!
//! Turns the candidates of one [`Discovery`] into a single book-global
//! sequence. Structural hints decide the order when every candidate carries
//! one the container's reading structure admits; otherwise the whole book
//! falls back to discovery order.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::discover::{CandidateImage, Discovery, ReadingOrder, Role};

/// What a book's ranking was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBasis {
    /// Structural hints, discovery index as tie-break.
    Structural,
    /// Discovery index only.
    Discovery,
}

/// A candidate placed in reading order, with its provisional role.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub candidate: CandidateImage,
    /// Position among all candidates, before filtering.
    pub sequence: usize,
    /// `Cover`, a seeded `Thumbnail`, or `Page`. Filtering finalises it.
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct Ranking {
    pub basis: OrderBasis,
    pub candidates: Vec<RankedCandidate>,
}

/// Pick the ranking basis for a set of candidates.
///
/// Hints are trusted only when all of them are present, admitted by the
/// reading order and pairwise distinct.
pub fn ranking_basis(candidates: &[CandidateImage], reading_order: &ReadingOrder) -> OrderBasis {
    let mut seen = HashSet::with_capacity(candidates.len());
    let consistent = candidates.iter().all(|candidate| {
        candidate
            .hint
            .is_some_and(|hint| reading_order.admits(&hint) && seen.insert(hint))
    });
    if consistent {
        OrderBasis::Structural
    } else {
        OrderBasis::Discovery
    }
}

/// Rank the candidates of one book and seed their roles.
pub fn rank(discovery: Discovery) -> Ranking {
    let Discovery {
        mut candidates,
        reading_order,
        cover_ref,
        ..
    } = discovery;

    let basis = ranking_basis(&candidates, &reading_order);
    match basis {
        OrderBasis::Structural => {
            candidates.sort_by_key(|c| (c.hint, c.discovery_index));
        }
        OrderBasis::Discovery => {
            if candidates.iter().any(|c| c.hint.is_some()) {
                warn!(
                    candidates = candidates.len(),
                    "structural hints inconsistent with reading order; using discovery order"
                );
            }
            candidates.sort_by_key(|c| c.discovery_index);
        }
    }

    let mut cover_assigned = false;
    let candidates = candidates
        .into_iter()
        .enumerate()
        .map(|(sequence, candidate)| {
            let is_cover = candidate.seeded_role == Some(Role::Cover)
                || cover_ref.as_deref() == Some(candidate.source_ref.as_str());
            let role = if is_cover && !cover_assigned {
                cover_assigned = true;
                Role::Cover
            } else if candidate.seeded_role == Some(Role::Thumbnail) {
                Role::Thumbnail
            } else {
                Role::Page
            };
            RankedCandidate {
                candidate,
                sequence,
                role,
            }
        })
        .collect::<Vec<_>>();

    debug!(basis = ?basis, candidates = candidates.len(), "ranked candidates");
    Ranking { basis, candidates }
}
