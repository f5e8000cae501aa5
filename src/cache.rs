//! Persistent cross-run hash cache.
//!
//! Maps image digests to the book (and rank) that first produced them.
//! Books never write to the cache while they are being extracted: their
//! digests are staged in [`StagedClaims`] and committed only after the
//! book's files are on disk, so a book that fails leaves no trace here.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

const CACHE_VERSION: u32 = 1;

/// First known occurrence of a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Canonical path of the source book.
    pub book: String,
    pub rank: usize,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: BTreeMap<String, CacheEntry>,
}

/// Digests one book will record once its files are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedClaims {
    book: String,
    digests: Vec<(String, usize)>,
}

impl StagedClaims {
    pub fn new(book: impl Into<String>) -> Self {
        Self {
            book: book.into(),
            digests: Vec::new(),
        }
    }

    pub fn push(&mut self, hash: impl Into<String>, rank: usize) {
        self.digests.push((hash.into(), rank));
    }

    pub fn book(&self) -> &str {
        &self.book
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

#[derive(Debug)]
pub struct HashCache {
    path: Option<PathBuf>,
    entries: RwLock<BTreeMap<String, CacheEntry>>,
    dirty: AtomicBool,
}

impl HashCache {
    /// A cache that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(BTreeMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Load the cache at `path`. A missing or unreadable file starts an
    /// empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<CacheFile>(&bytes) {
                Ok(file) if file.version == CACHE_VERSION => file.entries,
                Ok(file) => {
                    warn!(path = %path.display(), version = file.version, "unsupported hash cache version; starting empty");
                    BTreeMap::new()
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt hash cache; starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "hash cache unreadable; starting empty");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "loaded hash cache");

        Self {
            path: Some(path),
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, hash: &str) -> Option<CacheEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
            .cloned()
    }

    /// The entry for `hash` when a book other than `book` holds it.
    pub fn held_by_other(&self, hash: &str, book: &str) -> Option<CacheEntry> {
        self.get(hash).filter(|entry| entry.book != book)
    }

    /// Record a book's staged digests under one write guard. Digests already
    /// held by another book stay with that book; the book's own entries get
    /// their rank refreshed. Returns how many digests were newly recorded.
    pub fn commit(&self, claims: &StagedClaims) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut recorded = 0;
        let mut changed = false;
        for (hash, rank) in &claims.digests {
            match entries.get_mut(hash) {
                Some(entry) if entry.book != claims.book => {
                    debug!(hash = %hash, holder = %entry.book, "digest already held by another book");
                }
                Some(entry) => {
                    if entry.rank != *rank {
                        entry.rank = *rank;
                        changed = true;
                    }
                }
                None => {
                    entries.insert(
                        hash.clone(),
                        CacheEntry {
                            book: claims.book.clone(),
                            rank: *rank,
                        },
                    );
                    recorded += 1;
                    changed = true;
                }
            }
        }
        if changed {
            self.dirty.store(true, Ordering::Relaxed);
        }
        recorded
    }

    /// Write the cache back atomically if it changed. In-memory caches are
    /// never written.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty.load(Ordering::Relaxed) && path.exists() {
            return Ok(());
        }

        let file = CacheFile {
            version: CACHE_VERSION,
            entries: self.entries.read().unwrap_or_else(PoisonError::into_inner).clone(),
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        // Write beside the target and rename over it, so readers never see a
        // partial file.
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &file)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        tmp.persist(path).map_err(|e| e.error)?;

        self.dirty.store(false, Ordering::Relaxed);
        debug!(path = %path.display(), entries = file.entries.len(), "saved hash cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const HASH: &str = "aa00000000000000000000000000000000000000000000000000000000000000";
    const OTHER: &str = "bb00000000000000000000000000000000000000000000000000000000000000";

    fn claims(book: &str, digests: &[(&str, usize)]) -> StagedClaims {
        let mut claims = StagedClaims::new(book);
        for (hash, rank) in digests {
            claims.push(*hash, *rank);
        }
        claims
    }

    #[test]
    fn test_commit_semantics() {
        let cache = HashCache::in_memory();
        assert_eq!(cache.commit(&claims("/books/a.epub", &[(HASH, 3)])), 1);
        assert_eq!(cache.commit(&claims("/books/a.epub", &[(HASH, 2)])), 0);
        assert_eq!(cache.get(HASH).unwrap().rank, 2);

        let recorded = cache.commit(&claims("/books/b.epub", &[(HASH, 0), (OTHER, 1)]));
        assert_eq!(recorded, 1);
        assert_eq!(
            cache.get(HASH),
            Some(CacheEntry {
                book: "/books/a.epub".into(),
                rank: 2
            })
        );
        assert_eq!(cache.get(OTHER).unwrap().book, "/books/b.epub");
    }

    #[test]
    fn test_held_by_other_ignores_own_entries() {
        let cache = HashCache::in_memory();
        cache.commit(&claims("a.epub", &[(HASH, 0)]));
        assert_eq!(cache.held_by_other(HASH, "a.epub"), None);
        assert_eq!(cache.held_by_other(HASH, "b.epub").unwrap().book, "a.epub");
        assert_eq!(cache.held_by_other(OTHER, "b.epub"), None);
    }

    #[test]
    fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = HashCache::load(&path);
        assert!(cache.is_empty());
        cache.commit(&claims("book", &[(HASH, 4)]));
        cache.save().unwrap();

        let reloaded = HashCache::load(&path);
        assert_eq!(
            reloaded.get(HASH),
            Some(CacheEntry {
                book: "book".into(),
                rank: 4
            })
        );
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, b"{ not json").unwrap();

        let cache = HashCache::load(&path);
        assert!(cache.is_empty());
        cache.commit(&claims("book", &[(HASH, 0)]));
        cache.save().unwrap();
        assert_eq!(HashCache::load(&path).len(), 1);
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        let cache = HashCache::load(&path);
        cache.commit(&claims("book", &[(HASH, 0)]));
        cache.save().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_concurrent_commits_have_one_winner() {
        let cache = Arc::new(HashCache::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.commit(&claims(&format!("book-{i}"), &[(HASH, 0)])))
            })
            .collect();
        let recorded: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(recorded, 1);
        assert_eq!(cache.len(), 1);
    }
}
