//! Output assembly: file naming, per-book directories and archive export.

mod archive;

pub use archive::{ArchiveEntry, ArchiveExporter, CbzConfig, CbzExporter};

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::ArchiveFormat;
use crate::discover::Role;
use crate::error::{Error, Result};
use crate::image::ImageFormat;
use crate::manifest::{MANIFEST_FILE, Manifest};

const MIN_RANK_WIDTH: usize = 4;

/// Zero-padding width for a book with `total` accepted images: at least
/// four digits, more when the last rank needs them.
pub fn rank_width(total: usize) -> usize {
    let last = total.saturating_sub(1);
    let digits = last.checked_ilog10().map_or(1, |d| d as usize + 1);
    digits.max(MIN_RANK_WIDTH)
}

/// `0007.jpg`, `0000_cover.png`, `0012_thumbnail.gif`.
pub fn image_filename(rank: usize, width: usize, role: Role, format: ImageFormat) -> String {
    format!("{rank:0width$}{}.{}", role.suffix(), format.extension())
}

/// `<root>/<stem>/`, or `<source dir>/<stem>/` without a root.
pub fn book_output_dir(source: &Path, root: Option<&Path>) -> PathBuf {
    let stem = source
        .file_stem()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("book"));
    let base = match root {
        Some(root) => root,
        None => source.parent().unwrap_or_else(|| Path::new("")),
    };
    base.join(stem)
}

/// Output directory of every book in a run, in input order.
///
/// Books whose default directories coincide (`vol.epub` next to `vol.mobi`,
/// or same-named books from different folders under one root) are named
/// `<stem>-<ext>` instead, with `-2`, `-3`, ... appended if that is taken
/// too. Names are handed out in path order, so reordering the inputs does
/// not move any book's output.
pub fn plan_output_dirs(books: &[PathBuf], root: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = books.iter().map(|book| book_output_dir(book, root)).collect();

    let mut uses: HashMap<String, usize> = HashMap::new();
    for dir in &dirs {
        *uses.entry(dir_key(dir)).or_default() += 1;
    }
    let shared: Vec<bool> = dirs.iter().map(|dir| uses[&dir_key(dir)] > 1).collect();
    let mut taken: HashSet<String> = dirs
        .iter()
        .zip(&shared)
        .filter(|(_, shared)| !**shared)
        .map(|(dir, _)| dir_key(dir))
        .collect();

    let mut order: Vec<usize> = (0..books.len()).filter(|&i| shared[i]).collect();
    order.sort_by(|&a, &b| books[a].cmp(&books[b]).then(a.cmp(&b)));
    for i in order {
        let base = distinct_name(&books[i]);
        let mut candidate = dirs[i].with_file_name(&base);
        let mut n = 1;
        while !taken.insert(dir_key(&candidate)) {
            n += 1;
            let mut name = base.clone();
            name.push(format!("-{n}"));
            candidate = dirs[i].with_file_name(name);
        }
        info!(
            book = %books[i].display(),
            dir = %candidate.display(),
            "output directory shared with another book; using a distinct name"
        );
        dirs[i] = candidate;
    }
    dirs
}

// Case-insensitive file systems treat `Vol` and `vol` as one directory.
fn dir_key(dir: &Path) -> String {
    dir.to_string_lossy().to_lowercase()
}

fn distinct_name(source: &Path) -> OsString {
    let mut name = source
        .file_stem()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("book"));
    if let Some(ext) = source.extension() {
        name.push("-");
        name.push(ext.to_string_lossy().to_lowercase());
    }
    name
}

/// Archive written beside a book's output directory: `<dir>.cbz`.
pub fn archive_path(output_dir: &Path, format: ArchiveFormat) -> PathBuf {
    let mut name = output_dir
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("book"));
    name.push(".");
    name.push(format.extension());
    output_dir.with_file_name(name)
}

/// Writes one book's files into its output directory.
#[derive(Debug)]
pub struct BookWriter {
    dir: PathBuf,
}

impl BookWriter {
    /// Create the directory, first removing it when `clean` is set.
    pub fn prepare(dir: impl Into<PathBuf>, clean: bool) -> Result<Self> {
        let dir = dir.into();
        if dir.is_file() {
            return Err(Error::Extraction(format!(
                "output path {} exists and is not a directory",
                dir.display()
            )));
        }
        if clean && dir.is_dir() {
            debug!(dir = %dir.display(), "cleaning output directory");
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn write_image(&self, filename: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.dir.join(filename);
        fs::write(&path, data)?;
        Ok(path)
    }

    pub fn write_manifest(&self, manifest: &Manifest) -> Result<PathBuf> {
        let path = self.dir.join(MANIFEST_FILE);
        fs::write(&path, manifest.to_json()?)?;
        Ok(path)
    }
}

/// Pack `entries` into an archive at `path`.
pub fn write_archive(path: &Path, format: ArchiveFormat, entries: &[ArchiveEntry<'_>]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    match format {
        ArchiveFormat::Cbz | ArchiveFormat::Cbr => CbzExporter::new().export(entries, &mut writer)?,
    }
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    debug!(path = %path.display(), entries = entries.len(), "wrote archive");
    Ok(())
}
