//! Extraction settings.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Error, Result};

/// Digests of stock images (blank pages, publisher logos) that are never
/// worth extracting.
pub const DEFAULT_IGNORED_HASHES: [&str; 3] = [
    "1fcf4c601de84ae1d66e36f93b83b33b453f77aeb345be830f1fc66439fdb50d",
    "933f630f9a34dd68d5047813ec3272b8b3634011e5ed90be50dfd765a1303263",
    "ff1e53b8a020868ad267555daf1091ddafdb103a6364a87275bbf34a78ba7c84",
];

/// Which images an EPUB contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Only images referenced from spine documents, in reading order.
    #[default]
    Referenced,
    /// Every image stored in the archive, in entry order.
    Exhaustive,
}

/// Comic archive container written next to the extracted files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Cbz,
    /// Written with the CBZ (ZIP) layout; readers sniff the content.
    Cbr,
}

impl ArchiveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Cbz => "cbz",
            ArchiveFormat::Cbr => "cbr",
        }
    }
}

/// Thresholds that turn an accepted image into a thumbnail or decoration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoleThresholds {
    /// Images with either edge at or below this are thumbnails.
    pub thumbnail_max_edge: u32,
    /// Images at least this elongated (either orientation) are decorations.
    pub decoration_elongation: f64,
    /// Payloads smaller than this are decorations.
    pub decoration_max_bytes: usize,
}

impl Default for RoleThresholds {
    fn default() -> Self {
        Self {
            thumbnail_max_edge: 140,
            decoration_elongation: 4.0,
            decoration_max_bytes: 4096,
        }
    }
}

/// Configuration for one extraction run.
///
/// Build with [`ExtractConfig::default`] and the `with_*` methods, then call
/// [`ExtractConfig::validate`] before handing it to an extractor.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub discovery: DiscoveryMode,
    /// Minimum payload size in bytes (0 disables).
    pub min_bytes: usize,
    /// Minimum width in pixels (0 disables).
    pub min_width: u32,
    /// Minimum height in pixels (0 disables).
    pub min_height: u32,
    /// Maximum long-edge / short-edge ratio.
    pub max_aspect_ratio: Option<f64>,
    pub deduplicate: bool,
    /// Lowercase hex SHA-256 digests to reject.
    pub ignored_hashes: BTreeSet<String>,
    pub dry_run: bool,
    /// Worker count; 0 uses one worker per core.
    pub parallelism: usize,
    /// Record the structural hint trail in manifests.
    pub debug_order: bool,
    /// Root for per-book output directories. `None` writes next to each
    /// source file.
    pub output_root: Option<PathBuf>,
    /// Remove stale files from a book's output directory before writing.
    pub clean_output: bool,
    pub archive: Option<ArchiveFormat>,
    /// Persistent cross-run hash cache.
    pub hash_cache: Option<PathBuf>,
    pub roles: RoleThresholds,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryMode::default(),
            min_bytes: 0,
            min_width: 0,
            min_height: 0,
            max_aspect_ratio: None,
            deduplicate: true,
            ignored_hashes: DEFAULT_IGNORED_HASHES.iter().map(|h| h.to_string()).collect(),
            dry_run: false,
            parallelism: 0,
            debug_order: false,
            output_root: None,
            clean_output: true,
            archive: None,
            hash_cache: None,
            roles: RoleThresholds::default(),
        }
    }
}

impl ExtractConfig {
    pub fn with_discovery(mut self, discovery: DiscoveryMode) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_min_bytes(mut self, min_bytes: usize) -> Self {
        self.min_bytes = min_bytes;
        self
    }

    pub fn with_min_dimensions(mut self, min_width: u32, min_height: u32) -> Self {
        self.min_width = min_width;
        self.min_height = min_height;
        self
    }

    pub fn with_max_aspect_ratio(mut self, ratio: f64) -> Self {
        self.max_aspect_ratio = Some(ratio);
        self
    }

    pub fn with_deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    /// Add a digest to the ignore set.
    pub fn with_ignored_hash(mut self, hash: impl AsRef<str>) -> Self {
        self.ignored_hashes.insert(hash.as_ref().trim().to_ascii_lowercase());
        self
    }

    /// Drop the built-in ignore digests, keeping any added explicitly.
    pub fn without_default_ignores(mut self) -> Self {
        for hash in DEFAULT_IGNORED_HASHES {
            self.ignored_hashes.remove(hash);
        }
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_parallelism(mut self, workers: usize) -> Self {
        self.parallelism = workers;
        self
    }

    pub fn with_debug_order(mut self, debug_order: bool) -> Self {
        self.debug_order = debug_order;
        self
    }

    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = Some(root.into());
        self
    }

    pub fn with_clean_output(mut self, clean: bool) -> Self {
        self.clean_output = clean;
        self
    }

    pub fn with_archive(mut self, archive: ArchiveFormat) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_hash_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.hash_cache = Some(path.into());
        self
    }

    /// Normalise ignore digests and reject settings no book could satisfy.
    pub fn validate(&mut self) -> Result<()> {
        let mut normalized = BTreeSet::new();
        for hash in &self.ignored_hashes {
            let hash = hash.trim().to_ascii_lowercase();
            if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(Error::Config(format!(
                    "ignore hash {hash:?} is not a 64-digit SHA-256 hex digest"
                )));
            }
            normalized.insert(hash);
        }
        self.ignored_hashes = normalized;

        if let Some(ratio) = self.max_aspect_ratio
            && (!ratio.is_finite() || ratio < 1.0)
        {
            return Err(Error::Config(format!(
                "maximum aspect ratio must be a finite value >= 1.0, got {ratio}"
            )));
        }

        let elongation = self.roles.decoration_elongation;
        if !elongation.is_finite() || elongation < 1.0 {
            return Err(Error::Config(format!(
                "decoration aspect threshold must be a finite value >= 1.0, got {elongation}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_carry_builtin_ignores() {
        let config = ExtractConfig::default();
        assert_eq!(config.discovery, DiscoveryMode::Referenced);
        assert!(config.deduplicate);
        assert_eq!(config.ignored_hashes.len(), 3);
        assert!(
            ExtractConfig::default()
                .without_default_ignores()
                .ignored_hashes
                .is_empty()
        );
    }

    #[test]
    fn test_validate_normalizes_hash_case() {
        let upper = "AB".repeat(32);
        let mut config = ExtractConfig::default()
            .without_default_ignores()
            .with_ignored_hash(&upper);
        config.ignored_hashes.insert(format!("  {upper} "));
        config.validate().unwrap();
        assert_eq!(config.ignored_hashes.len(), 1);
        assert!(config.ignored_hashes.contains(&"ab".repeat(32)));
    }

    #[test]
    fn test_validate_rejects_bad_hash() {
        let mut config = ExtractConfig::default().with_ignored_hash("deadbeef");
        let err = config.validate().unwrap_err();
        assert!(err.is_run_fatal());
    }

    #[test]
    fn test_validate_rejects_bad_aspect() {
        let mut config = ExtractConfig::default().with_max_aspect_ratio(0.5);
        assert!(config.validate().is_err());

        let mut config = ExtractConfig::default().with_max_aspect_ratio(f64::NAN);
        assert!(config.validate().is_err());

        let mut config = ExtractConfig::default().with_max_aspect_ratio(3.0);
        assert!(config.validate().is_ok());
    }
}
