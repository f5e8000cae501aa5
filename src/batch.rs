//! Parallel extraction over many books.
//!
//! Each worker takes one whole book and runs the pipeline on it
//! sequentially. A failed book becomes a [`FailureRecord`] and never
//! disturbs its siblings; only configuration problems stop a run.
//!
//! With a persistent hash cache, books that share an image must agree on
//! which of them keeps it. A first parallel pass screens every book; the
//! shared digests are then settled one book at a time in book-id order;
//! a second parallel pass writes. Each book's digests are committed to the
//! cache only after its files are on disk.

use std::collections::HashSet;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::cache::{HashCache, StagedClaims};
use crate::config::ExtractConfig;
use crate::error::{Error, FailureRecord, Result};
use crate::extract::{BookReport, Extractor};
use crate::filter::{Counts, CrossBookDedup};
use crate::output::plan_output_dirs;

/// Extensions picked up when expanding directory inputs.
pub const BOOK_EXTENSIONS: &[&str] = &["epub", "mobi", "azw", "azw3", "prc"];

/// Expand inputs into the list of books to process.
///
/// Files are taken as given, whatever their extension; the content decides
/// the format later. Directories contribute the files with an ebook
/// extension, sorted by path, descending only when `recursive` is set.
pub fn collect_inputs(inputs: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    let mut books = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            books.push(input.clone());
            continue;
        }

        let walker = WalkDir::new(input)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .sort_by_file_name();
        let before = books.len();
        for entry in walker.into_iter().filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                None
            }
        }) {
            if entry.file_type().is_file() && has_book_extension(entry.path()) {
                books.push(entry.into_path());
            }
        }
        debug!(dir = %input.display(), books = books.len() - before, "expanded directory");
    }
    books
}

fn has_book_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| BOOK_EXTENSIONS.iter().any(|b| ext.eq_ignore_ascii_case(b)))
}

/// What happened to one input.
#[derive(Debug, Clone)]
pub enum BookOutcome {
    Extracted(BookReport),
    Failed(FailureRecord),
    /// Not started because the run was stopped.
    Skipped(PathBuf),
}

impl BookOutcome {
    pub fn path(&self) -> &Path {
        match self {
            BookOutcome::Extracted(report) => &report.source,
            BookOutcome::Failed(failure) => &failure.path,
            BookOutcome::Skipped(path) => path,
        }
    }
}

/// Where a book stands between the two passes of a run.
enum Settlement {
    /// Digests the book gives up to other books.
    Settled(HashSet<String>),
    /// Failed or skipped while being screened.
    Finished(BookOutcome),
}

/// Outcomes of a run, in input order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<BookOutcome>,
}

impl RunReport {
    pub fn extracted(&self) -> impl Iterator<Item = &BookReport> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            BookOutcome::Extracted(report) => Some(report),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &FailureRecord> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            BookOutcome::Failed(failure) => Some(failure),
            _ => None,
        })
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, BookOutcome::Skipped(_)))
            .count()
    }

    pub fn images(&self) -> usize {
        self.extracted().map(BookReport::accepted).sum()
    }

    /// Verdict counts summed over every extracted book.
    pub fn totals(&self) -> Counts {
        let mut totals = Counts::default();
        for report in self.extracted() {
            totals += report.manifest.counts;
        }
        totals
    }

    /// A run fails only when it had inputs and every one of them failed.
    pub fn is_success(&self) -> bool {
        self.outcomes.is_empty()
            || self
                .outcomes
                .iter()
                .any(|outcome| !matches!(outcome, BookOutcome::Failed(_)))
    }
}

/// Fans the per-book pipeline out over a bounded worker pool.
#[derive(Debug)]
pub struct Coordinator {
    config: ExtractConfig,
    fail_fast: bool,
    stop: Arc<AtomicBool>,
}

impl Coordinator {
    /// Validate `config` and build a coordinator for it.
    pub fn new(mut config: ExtractConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            fail_fast: false,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Stop dispatching books after the first failure.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Flag that, once set, stops books that have not started yet. Books
    /// already in flight finish.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Extract every book. Errors only when the run cannot start at all.
    pub fn run(&self, books: &[PathBuf]) -> Result<RunReport> {
        self.run_with_progress(books, |_| {})
    }

    /// Like [`run`](Self::run), calling `on_book` once per book as soon as
    /// its outcome is final.
    pub fn run_with_progress<F>(&self, books: &[PathBuf], on_book: F) -> Result<RunReport>
    where
        F: Fn(&BookOutcome) + Sync,
    {
        let config = &self.config;
        if !config.dry_run
            && let Some(root) = &config.output_root
        {
            check_output_root(root)?;
        }

        let cache = match &config.hash_cache {
            Some(path) => HashCache::load(path),
            None => HashCache::in_memory(),
        };
        let persistent = config.hash_cache.is_some();
        let cross_book = persistent && config.deduplicate;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallelism)
            .build()
            .map_err(|e| Error::Config(format!("cannot start worker pool: {e}")))?;

        info!(
            books = books.len(),
            workers = pool.current_num_threads(),
            dry_run = config.dry_run,
            "starting extraction"
        );

        let dirs = plan_output_dirs(books, config.output_root.as_deref());
        let extractor = Extractor::new(config);

        let settlements: Vec<Option<Settlement>> = if cross_book {
            self.settle(&pool, &extractor, &cache, books, &on_book)
                .into_iter()
                .map(Some)
                .collect()
        } else {
            books.iter().map(|_| None).collect()
        };

        let results: Vec<(BookOutcome, Option<StagedClaims>)> = pool.install(|| {
            books
                .par_iter()
                .zip(dirs.into_par_iter())
                .zip(settlements.into_par_iter())
                .map(|((path, dir), settlement)| {
                    let held = match settlement {
                        Some(Settlement::Finished(outcome)) => return (outcome, None),
                        Some(Settlement::Settled(held)) => Some(held),
                        None => None,
                    };
                    let (outcome, claims) = if self.stop.load(Ordering::Relaxed) {
                        (BookOutcome::Skipped(path.clone()), None)
                    } else {
                        let output_dir = (!config.dry_run).then_some(dir);
                        match isolated(|| {
                            let mut book = extractor.prepare(path)?;
                            let claims = held.map(|held| {
                                book.screened.drop_held(&held);
                                book.screened.claims(&book.id)
                            });
                            Ok((extractor.write(book, output_dir)?, claims))
                        }) {
                            Ok((report, claims)) => (BookOutcome::Extracted(report), claims),
                            Err(e) => (self.failed(path, &e), None),
                        }
                    };
                    on_book(&outcome);
                    (outcome, claims)
                })
                .collect()
        });

        let mut staged: Vec<StagedClaims> = Vec::new();
        let mut outcomes = Vec::with_capacity(results.len());
        for (outcome, claims) in results {
            staged.extend(claims);
            outcomes.push(outcome);
        }
        staged.sort_by(|a, b| a.book().cmp(b.book()));
        for claims in &staged {
            cache.commit(claims);
        }

        if persistent && !config.dry_run {
            // Images are already on disk; a cache that cannot be saved only
            // costs deduplication on the next run.
            if let Err(e) = cache.save() {
                warn!(error = %e, "could not save hash cache");
            }
        }

        let report = RunReport { outcomes };
        info!(
            extracted = report.extracted().count(),
            failed = report.failures().count(),
            skipped = report.skipped(),
            images = report.images(),
            "run finished"
        );
        Ok(report)
    }

    /// Screen every book and decide, in book-id order, which digests each
    /// one gives up. Only digests are kept between passes, not payloads.
    fn settle<F>(
        &self,
        pool: &rayon::ThreadPool,
        extractor: &Extractor<'_>,
        cache: &HashCache,
        books: &[PathBuf],
        on_book: &F,
    ) -> Vec<Settlement>
    where
        F: Fn(&BookOutcome) + Sync,
    {
        let scans: Vec<std::result::Result<(String, Vec<String>), BookOutcome>> = pool.install(|| {
            books
                .par_iter()
                .map(|path| {
                    let outcome = if self.stop.load(Ordering::Relaxed) {
                        BookOutcome::Skipped(path.clone())
                    } else {
                        match isolated(|| extractor.prepare(path)) {
                            Ok(book) => return Ok((book.id.clone(), book.digests())),
                            Err(e) => self.failed(path, &e),
                        }
                    };
                    on_book(&outcome);
                    Err(outcome)
                })
                .collect()
        });

        let ids: Vec<&str> = scans
            .iter()
            .map(|scan| scan.as_ref().map_or("", |(id, _)| id.as_str()))
            .collect();
        let mut order: Vec<usize> = (0..scans.len()).filter(|&i| scans[i].is_ok()).collect();
        order.sort_by(|&a, &b| ids[a].cmp(ids[b]).then(a.cmp(&b)));

        let mut dedup = CrossBookDedup::new(cache);
        let mut held: Vec<HashSet<String>> = vec![HashSet::new(); scans.len()];
        for &i in &order {
            if let Ok((id, digests)) = &scans[i] {
                held[i] = dedup.settle(id, digests.iter().map(String::as_str));
                if !held[i].is_empty() {
                    debug!(book = %id, held = held[i].len(), "digests kept by other books");
                }
            }
        }

        scans
            .into_iter()
            .zip(held)
            .map(|(scan, held)| match scan {
                Ok(_) => Settlement::Settled(held),
                Err(outcome) => Settlement::Finished(outcome),
            })
            .collect()
    }

    fn failed(&self, path: &Path, e: &Error) -> BookOutcome {
        error!(path = %path.display(), error = %e, "extraction failed");
        if self.fail_fast {
            self.stop.store(true, Ordering::Relaxed);
        }
        BookOutcome::Failed(FailureRecord::new(path, e))
    }
}

/// Run one step of a book's pipeline, turning a panic into a failure.
fn isolated<T>(step: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(step)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(Error::Extraction(format!("panic while extracting: {message}")))
    })
}

/// The output root must exist (or be creatable) and accept new files.
fn check_output_root(root: &Path) -> Result<()> {
    fs::create_dir_all(root).map_err(|e| {
        Error::Config(format!("cannot create output root {}: {e}", root.display()))
    })?;
    tempfile::Builder::new()
        .prefix(".plates-write-check")
        .tempfile_in(root)
        .map_err(|e| Error::Config(format!("output root {} is not writable: {e}", root.display())))?;
    Ok(())
}
