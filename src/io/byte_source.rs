use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// A thread-safe, random-access source of bytes.
///
/// Reads never move a shared cursor, so parsers can jump between the record
/// table, record 0 and image records without coordinating.
pub trait ByteSource: Send + Sync {
    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` from `offset`. Fails with `UnexpectedEof` if the source is
    /// shorter than `offset + buf.len()`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Read exactly `len` bytes starting at `offset`.
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Read the half-open range `start..end`.
    fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        if end < start || end > self.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {start}..{end} outside source of {} bytes", self.len()),
            ));
        }
        self.read_at(start, (end - start) as usize)
    }

    /// Read up to `len` bytes from the start of the source.
    fn read_prefix(&self, len: usize) -> io::Result<Vec<u8>> {
        let len = (len as u64).min(self.len()) as usize;
        self.read_at(0, len)
    }
}

/// Open `path` read-only as a shared byte source.
pub fn open_file(path: &Path) -> io::Result<Arc<dyn ByteSource>> {
    let file = File::open(path)?;
    Ok(Arc::new(FileSource::new(file)?))
}

/// A `ByteSource` over a local file handle. The handle closes on drop.
pub struct FileSource {
    file: File,
    len: u64,
}

impl FileSource {
    pub fn new(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

#[cfg(unix)]
impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)
    }
}

#[cfg(windows)]
impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        let mut filled = 0;
        while filled < buf.len() {
            let read = self
                .file
                .seek_read(&mut buf[filled..], offset + filled as u64)?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "not enough data",
                ));
            }
            filled += read;
        }
        Ok(())
    }
}

#[cfg(all(not(unix), not(windows)))]
impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let mut handle = self.file.try_clone()?;
        handle.seek(SeekFrom::Start(offset))?;
        handle.read_exact(buf)
    }
}

/// An in-memory `ByteSource`, used for tests and for payloads already loaded.
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(buf.len());
        if end > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "not enough data",
            ));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_read_at() {
        let source = MemorySource::new(b"hello world".to_vec());
        assert_eq!(source.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn test_memory_source_short_read_is_eof() {
        let source = MemorySource::new(b"abc".to_vec());
        let err = source.read_at(2, 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_range_rejects_inverted_range() {
        let source = MemorySource::new(b"abcdef".to_vec());
        assert_eq!(source.read_range(1, 4).unwrap(), b"bcd");
        assert!(source.read_range(4, 1).is_err());
        assert!(source.read_range(0, 7).is_err());
    }

    #[test]
    fn test_read_prefix_clamps_to_length() {
        let source = MemorySource::new(b"PK".to_vec());
        assert_eq!(source.read_prefix(68).unwrap(), b"PK");
    }

    #[test]
    fn test_file_source_reads_without_cursor() {
        use std::io::Write;

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        let source = open_file(tmp.path()).unwrap();
        assert_eq!(source.len(), 10);
        assert_eq!(source.read_at(7, 3).unwrap(), b"789");
        assert_eq!(source.read_at(0, 2).unwrap(), b"01");
    }
}
