//! plates - extract ebook images in reading order

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use plates::{
    ArchiveFormat, BookOutcome, Coordinator, DiscoveryMode, ExtractConfig, RunReport,
    collect_inputs, inspect,
};

#[derive(Clone, Copy, ValueEnum)]
enum ArchiveArg {
    Cbz,
    Cbr,
}

impl From<ArchiveArg> for ArchiveFormat {
    fn from(arg: ArchiveArg) -> Self {
        match arg {
            ArchiveArg::Cbz => ArchiveFormat::Cbz,
            ArchiveArg::Cbr => ArchiveFormat::Cbr,
        }
    }
}

#[derive(Parser)]
#[command(name = "plates")]
#[command(version, about = "Extract images from EPUB and Kindle ebooks in reading order", long_about = None)]
#[command(after_help = "EXAMPLES:
    plates comic.epub                   Extract next to the book, into comic/
    plates -o out -r library/           Extract every book under library/
    plates --archive cbz vol1.azw3      Also pack the images into vol1.cbz
    plates --info book.mobi             Show book metadata")]
struct Cli {
    /// Ebook files or directories (EPUB, MOBI, AZW, AZW3)
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// Root directory for per-book output (default: next to each book)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Descend into subdirectories of directory inputs
    #[arg(short, long)]
    recursive: bool,

    /// Take every image in an EPUB archive, not only those the text references
    #[arg(long)]
    all_images: bool,

    /// Skip images smaller than this many bytes
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    min_size: usize,

    /// Skip images narrower than this many pixels
    #[arg(long, value_name = "PX", default_value_t = 0)]
    min_width: u32,

    /// Skip images shorter than this many pixels
    #[arg(long, value_name = "PX", default_value_t = 0)]
    min_height: u32,

    /// Skip images whose long edge exceeds this multiple of the short edge
    #[arg(long, value_name = "RATIO")]
    max_aspect: Option<f64>,

    /// Keep repeated images
    #[arg(long)]
    no_dedup: bool,

    /// Never extract images with this SHA-256 digest (repeatable)
    #[arg(long = "ignore-hash", value_name = "SHA256")]
    ignore_hashes: Vec<String>,

    /// Do not ignore the built-in stock image digests
    #[arg(long)]
    no_default_ignores: bool,

    /// Persistent hash cache shared across runs
    #[arg(long, value_name = "FILE")]
    hash_cache: Option<PathBuf>,

    /// Run the whole pipeline but write nothing
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Number of books processed in parallel (0 = one per core)
    #[arg(short, long, value_name = "N", default_value_t = 0)]
    jobs: usize,

    /// Also pack each book's images into a comic archive
    #[arg(long, value_enum, value_name = "FORMAT")]
    archive: Option<ArchiveArg>,

    /// Record how each image got its rank in the manifest
    #[arg(long)]
    debug_order: bool,

    /// Keep existing files in output directories
    #[arg(long)]
    no_clean: bool,

    /// Stop starting new books after the first failure
    #[arg(long)]
    fail_fast: bool,

    /// Show book metadata without extracting
    #[arg(short, long)]
    info: bool,

    /// Log per-image decisions
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn config(&self) -> ExtractConfig {
        let mut config = ExtractConfig::default()
            .with_discovery(if self.all_images {
                DiscoveryMode::Exhaustive
            } else {
                DiscoveryMode::Referenced
            })
            .with_min_bytes(self.min_size)
            .with_min_dimensions(self.min_width, self.min_height)
            .with_deduplicate(!self.no_dedup)
            .with_dry_run(self.dry_run)
            .with_parallelism(self.jobs)
            .with_debug_order(self.debug_order)
            .with_clean_output(!self.no_clean);

        if self.no_default_ignores {
            config = config.without_default_ignores();
        }
        for hash in &self.ignore_hashes {
            config = config.with_ignored_hash(hash);
        }
        if let Some(ratio) = self.max_aspect {
            config = config.with_max_aspect_ratio(ratio);
        }
        if let Some(root) = &self.output {
            config = config.with_output_root(root);
        }
        if let Some(path) = &self.hash_cache {
            config = config.with_hash_cache(path);
        }
        if let Some(archive) = self.archive {
            config = config.with_archive(archive.into());
        }
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let books = collect_inputs(&cli.inputs, cli.recursive);
    if books.is_empty() {
        eprintln!("error: no ebooks found in the given inputs");
        return ExitCode::FAILURE;
    }

    if cli.info {
        return show_info(&books);
    }

    let coordinator = match Coordinator::new(cli.config()) {
        Ok(coordinator) => coordinator.with_fail_fast(cli.fail_fast),
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let pb = progress_bar(books.len(), cli.quiet || cli.verbose);
    let result = coordinator.run_with_progress(&books, |outcome| {
        if let Some(name) = outcome.path().file_name() {
            pb.set_message(name.to_string_lossy().into_owned());
        }
        pb.inc(1);
    });
    pb.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if !cli.quiet {
        for outcome in &report.outcomes {
            match outcome {
                BookOutcome::Extracted(book) => {
                    let target = book
                        .output_dir
                        .as_ref()
                        .map(|dir| dir.display().to_string())
                        .unwrap_or_else(|| "dry run".to_string());
                    println!(
                        "{}: {} images -> {}",
                        book.source.display(),
                        book.accepted(),
                        target
                    );
                }
                BookOutcome::Failed(failure) => eprintln!("failed: {failure}"),
                BookOutcome::Skipped(path) => eprintln!("skipped: {}", path.display()),
            }
        }
        print_stats(&report);
    }

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn progress_bar(books: usize, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(books as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

fn print_stats(report: &RunReport) {
    let totals = report.totals();
    println!();
    println!("Total images extracted: {}", totals.accepted);
    if totals.ignored_by_hash > 0 {
        println!("{} image(s) ignored by hash.", totals.ignored_by_hash);
    }
    if totals.duplicates > 0 {
        println!("{} duplicate image(s) skipped.", totals.duplicates);
    }
    if totals.filtered_by_size > 0 {
        println!("{} image(s) filtered by size.", totals.filtered_by_size);
    }
    if totals.filtered_by_dimension > 0 {
        println!("{} image(s) filtered by dimensions.", totals.filtered_by_dimension);
    }
    if totals.missing > 0 {
        println!("{} image(s) not found.", totals.missing);
    } else {
        println!("No missing images.");
    }
    let failed = report.failures().count();
    if failed > 0 {
        println!("{failed} book(s) failed.");
    }
}

fn init_logging(cli: &Cli) {
    let default = if cli.verbose {
        "plates=debug"
    } else if cli.quiet {
        "error"
    } else {
        "plates=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn show_info(books: &[PathBuf]) -> ExitCode {
    let mut failed = 0;
    for path in books {
        match inspect(path) {
            Ok(info) => {
                let meta = &info.metadata;
                println!("File: {}", path.display());
                println!("Format: {}", info.format);
                if let Some(title) = &meta.title {
                    println!("Title: {title}");
                }
                if !meta.authors.is_empty() {
                    println!("Authors: {}", meta.authors.join(", "));
                }
                if let Some(publisher) = &meta.publisher {
                    println!("Publisher: {publisher}");
                }
                if let Some(language) = &meta.language {
                    println!("Language: {language}");
                }
                if let Some(cover) = &meta.cover {
                    println!("Cover: {cover}");
                }
                println!();
            }
            Err(e) => {
                eprintln!("error: {}: {e}", path.display());
                failed += 1;
            }
        }
    }
    if failed == books.len() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
