//! Palm Database container: header and record table.

use crate::error::{Error, Result};
use crate::io::ByteSource;

/// Length of the fixed PDB header preceding the record table.
pub const PDB_HEADER_LEN: usize = 78;
const RECORD_ENTRY_LEN: usize = 8;

/// PDB header info and record table.
#[derive(Debug)]
pub struct PdbInfo {
    pub name: String,
    /// Record start offsets within the file.
    pub record_offsets: Vec<u32>,
}

impl PdbInfo {
    /// Read the header and record table from the start of `source`.
    pub fn read(source: &dyn ByteSource) -> Result<Self> {
        let header = source.read_prefix(PDB_HEADER_LEN)?;
        let count = Self::check_header(&header)?;
        let table_len = PDB_HEADER_LEN + count * RECORD_ENTRY_LEN;
        if (table_len as u64) > source.len() {
            return Err(Error::InvalidFile(format!(
                "record table of {count} entries runs past end of file"
            )));
        }
        Self::parse(&source.read_at(0, table_len)?)
    }

    /// Parse the header and record table from the first bytes of a file.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let count = Self::check_header(data)?;
        let table_end = PDB_HEADER_LEN + count * RECORD_ENTRY_LEN;
        if data.len() < table_end {
            return Err(Error::InvalidFile("PDB record table truncated".into()));
        }

        // Bytes 0-31: database name (null-terminated)
        let name_end = data[..32].iter().position(|&b| b == 0).unwrap_or(32);
        let name = String::from_utf8_lossy(&data[..name_end]).into_owned();

        let record_offsets = data[PDB_HEADER_LEN..table_end]
            .chunks_exact(RECORD_ENTRY_LEN)
            .map(|entry| u32::from_be_bytes([entry[0], entry[1], entry[2], entry[3]]))
            .collect();

        Ok(Self {
            name,
            record_offsets,
        })
    }

    /// Validate the signature and return the declared record count.
    fn check_header(data: &[u8]) -> Result<usize> {
        if data.len() < PDB_HEADER_LEN {
            return Err(Error::InvalidFile("PDB header too short".into()));
        }
        let ident = &data[60..68];
        if ident != b"BOOKMOBI" {
            return Err(Error::InvalidFile(format!(
                "not a Mobipocket database (type/creator {:?})",
                String::from_utf8_lossy(ident)
            )));
        }
        Ok(u16::from_be_bytes([data[76], data[77]]) as usize)
    }

    pub fn num_records(&self) -> usize {
        self.record_offsets.len()
    }

    /// Byte range of a record: up to the next record's offset, the last one
    /// up to end of file.
    pub fn record_range(&self, index: usize, file_len: u64) -> Result<(u64, u64)> {
        let start = *self
            .record_offsets
            .get(index)
            .ok_or_else(|| Error::MissingResource(format!("record {index}")))?
            as u64;
        let end = self
            .record_offsets
            .get(index + 1)
            .map(|&next| next as u64)
            .unwrap_or(file_len);

        if start > end || end > file_len {
            return Err(Error::MalformedContainer(format!(
                "record {index} spans {start}..{end} in a file of {file_len} bytes"
            )));
        }
        Ok((start, end))
    }
}
