//! Per-book extraction manifest.
//!
//! Written as `manifest.json` in the book's output directory. The document
//! carries no timestamps, so extracting the same book twice with the same
//! settings produces identical bytes.

use serde::Serialize;

use crate::config::DiscoveryMode;
use crate::discover::{Role, StructuralHint};
use crate::error::Result;
use crate::filter::{Counts, ResolvedImage};
use crate::format::ContainerFormat;
use crate::order::OrderBasis;

pub const MANIFEST_FILE: &str = "manifest.json";

/// How one image got its rank, recorded when order debugging is on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderTrail {
    pub discovery_index: usize,
    pub hint: Option<StructuralHint>,
    /// Position among all ranked candidates, rejected ones included.
    pub sequence: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestImage {
    pub index: usize,
    pub filename: String,
    pub role: Role,
    pub source_ref: String,
    pub hash: String,
    pub bytes: usize,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub mime_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trail: Option<OrderTrail>,
}

impl ManifestImage {
    pub fn new(image: &ResolvedImage, filename: String, debug_order: bool) -> Self {
        let dimensions = image.metrics.dimensions;
        Self {
            index: image.order_rank,
            filename,
            role: image.role,
            source_ref: image.candidate.source_ref.clone(),
            hash: image.metrics.hash.clone(),
            bytes: image.metrics.bytes,
            width: dimensions.map(|d| d.width),
            height: dimensions.map(|d| d.height),
            mime_type: image.metrics.format.mime_type(),
            trail: debug_order.then(|| OrderTrail {
                discovery_index: image.candidate.discovery_index,
                hint: image.candidate.hint,
                sequence: image.sequence,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub source_file: String,
    pub format: ContainerFormat,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    /// `None` on dry runs.
    pub output_dir: Option<String>,
    /// The discovery mode that actually produced the candidates.
    pub discovery: DiscoveryMode,
    pub order_basis: OrderBasis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    pub counts: Counts,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    pub images: Vec<ManifestImage>,
}

impl Manifest {
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Files in reading order.
    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.images.iter().map(|image| image.filename.as_str())
    }

    pub fn total_bytes(&self) -> usize {
        self.images.iter().map(|image| image.bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discover::CandidateImage;
    use crate::image::{ImageFormat, ImageMetrics};
    use crate::test_helpers::png;

    fn resolved() -> ResolvedImage {
        let data = png(600, 800, 0);
        ResolvedImage {
            metrics: ImageMetrics::measure(ImageFormat::Png, &data),
            candidate: CandidateImage {
                data,
                discovery_index: 4,
                hint: Some(StructuralHint::Spine { item: 2, position: 1 }),
                format: ImageFormat::Png,
                source_ref: "OEBPS/images/p1.png".into(),
                seeded_role: None,
            },
            order_rank: 0,
            role: Role::Page,
            sequence: 1,
        }
    }

    fn manifest(images: Vec<ManifestImage>) -> Manifest {
        Manifest {
            source_file: "book.epub".into(),
            format: ContainerFormat::Epub,
            title: Some("Book".into()),
            authors: vec!["Author".into()],
            publisher: None,
            language: None,
            output_dir: None,
            discovery: DiscoveryMode::Referenced,
            order_basis: OrderBasis::Structural,
            fallback: None,
            counts: Counts {
                accepted: images.len(),
                ..Counts::default()
            },
            missing: Vec::new(),
            images,
        }
    }

    #[test]
    fn test_image_entry_fields() {
        let entry = ManifestImage::new(&resolved(), "0000.png".into(), false);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["index"], 0);
        assert_eq!(value["role"], "page");
        assert_eq!(value["width"], 600);
        assert_eq!(value["height"], 800);
        assert_eq!(value["mime_type"], "image/png");
        assert!(value.get("trail").is_none());
    }

    #[test]
    fn test_trail_only_when_debugging_order() {
        let entry = ManifestImage::new(&resolved(), "0000.png".into(), true);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["trail"]["discovery_index"], 4);
        assert_eq!(value["trail"]["sequence"], 1);
        assert_eq!(value["trail"]["hint"]["kind"], "spine");
        assert_eq!(value["trail"]["hint"]["item"], 2);
    }

    #[test]
    fn test_book_level_fields() {
        let entry = ManifestImage::new(&resolved(), "0000.png".into(), false);
        let manifest = manifest(vec![entry]);
        let value: serde_json::Value = serde_json::from_str(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(value["format"], "epub");
        assert_eq!(value["discovery"], "referenced");
        assert_eq!(value["order_basis"], "structural");
        assert_eq!(value["counts"]["accepted"], 1);
        assert!(value.get("fallback").is_none());
        assert_eq!(manifest.filenames().collect::<Vec<_>>(), ["0000.png"]);
    }

    #[test]
    fn test_serialization_is_stable() {
        let a = manifest(vec![ManifestImage::new(&resolved(), "0000.png".into(), true)]);
        let b = a.clone();
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }
}
