//! Error types for plates operations.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while extracting images from an ebook.
#[derive(Error, Debug)]
pub enum Error {
    /// The file failed format validation (bad signature, truncated header).
    #[error("invalid file: {0}")]
    InvalidFile(String),

    /// The container is present but internally inconsistent.
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    /// A referenced image path or record could not be located.
    #[error("missing resource: {0}")]
    MissingResource(String),

    /// Unexpected failure while decoding or writing one book.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Invalid configuration or unusable output root. Fatal for the whole run.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], as reported in failure records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidFile,
    MalformedContainer,
    MissingResource,
    Extraction,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidFile => "invalid file",
            ErrorKind::MalformedContainer => "malformed container",
            ErrorKind::MissingResource => "missing resource",
            ErrorKind::Extraction => "extraction error",
            ErrorKind::Config => "configuration error",
        };
        f.write_str(name)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidFile(_) => ErrorKind::InvalidFile,
            Error::MalformedContainer(_) => ErrorKind::MalformedContainer,
            Error::MissingResource(_) => ErrorKind::MissingResource,
            Error::Config(_) => ErrorKind::Config,
            Error::Extraction(_)
            | Error::Io(_)
            | Error::Zip(_)
            | Error::Xml(_)
            | Error::Json(_) => ErrorKind::Extraction,
        }
    }

    /// Whether this error must stop the whole run rather than one file.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

/// Outcome of a container that could not be extracted.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub path: PathBuf,
    pub kind: ErrorKind,
    pub message: String,
}

impl FailureRecord {
    pub fn new(path: impl Into<PathBuf>, error: &Error) -> Self {
        Self {
            path: path.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}
