use crate::error::{Error, Result};
use crate::util::decode_text;

pub const NULL_INDEX: u32 = 0xFFFFFFFF;

/// Length of the PalmDOC header at the start of record 0.
const PALMDOC_HEADER_LEN: usize = 16;

/// PalmDOC + MOBI header (record 0).
#[derive(Debug, Clone)]
pub struct MobiHeader {
    pub text_record_count: u16,
    pub encryption: u16,
    /// False when record 0 carries only the PalmDOC header.
    pub has_mobi_magic: bool,
    pub header_length: u32,
    pub codepage: u32,
    pub mobi_version: u32,
    pub first_image_index: u32,
    pub title: String,
    pub exth_flags: u32,
}

impl MobiHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < PALMDOC_HEADER_LEN {
            return Err(Error::InvalidFile("record 0 too short for a PalmDOC header".into()));
        }

        let text_record_count = u16::from_be_bytes([data[8], data[9]]);
        let encryption = u16::from_be_bytes([data[12], data[13]]);

        let mut header = Self {
            text_record_count,
            encryption,
            has_mobi_magic: false,
            header_length: 0,
            codepage: 1252,
            mobi_version: 1,
            first_image_index: NULL_INDEX,
            title: String::new(),
            exth_flags: 0,
        };

        if data.len() < 0x20 || &data[16..20] != b"MOBI" {
            return Ok(header);
        }
        header.has_mobi_magic = true;

        let be32 = |at: usize| -> Option<u32> {
            data.get(at..at + 4)
                .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        };

        header.header_length = be32(20).unwrap_or(0);
        header.codepage = be32(28).unwrap_or(1252);
        header.mobi_version = be32(0x68).unwrap_or(1);
        header.first_image_index = be32(0x6C).unwrap_or(NULL_INDEX);
        header.exth_flags = be32(0x80).unwrap_or(0);

        // Full name: offset and length at 0x54/0x58, relative to record 0
        if let (Some(offset), Some(len)) = (be32(0x54), be32(0x58)) {
            let (offset, len) = (offset as usize, len as usize);
            if let Some(bytes) = offset
                .checked_add(len)
                .and_then(|end| data.get(offset..end))
            {
                header.title = decode_text(bytes, header.encoding_label()).trim().to_string();
            }
        }

        Ok(header)
    }

    pub fn has_exth(&self) -> bool {
        self.has_mobi_magic && self.exth_flags & 0x40 != 0
    }

    /// Encoding label for [`decode_text`], from the header codepage.
    pub fn encoding_label(&self) -> Option<&'static str> {
        match self.codepage {
            65001 => Some("utf-8"),
            1252 => Some("windows-1252"),
            _ => None,
        }
    }

    /// Offset of the EXTH block within record 0.
    pub fn exth_offset(&self) -> usize {
        PALMDOC_HEADER_LEN + self.header_length as usize
    }
}

/// EXTH header (extended metadata)
#[derive(Debug, Default, PartialEq)]
pub struct ExthHeader {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    /// Cover record, relative to the first image record.
    pub cover_offset: Option<u32>,
    /// Thumbnail record, relative to the first image record.
    pub thumbnail_offset: Option<u32>,
}

impl ExthHeader {
    pub fn parse(data: &[u8], encoding: Option<&str>) -> Result<Self> {
        if data.len() < 12 {
            return Err(Error::MalformedContainer("EXTH header too short".into()));
        }
        if &data[0..4] != b"EXTH" {
            return Err(Error::MalformedContainer("invalid EXTH signature".into()));
        }

        let record_count = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut exth = ExthHeader::default();
        let mut pos = 12;

        let decode = |bytes: &[u8]| -> Option<String> {
            let text = decode_text(bytes, encoding).trim().to_string();
            (!text.is_empty()).then_some(text)
        };
        let index = |bytes: &[u8]| -> Option<u32> {
            let value = u32::from_be_bytes(bytes.get(..4)?.try_into().ok()?);
            (value != NULL_INDEX).then_some(value)
        };

        for _ in 0..record_count {
            if pos + 8 > data.len() {
                break;
            }

            let record_type =
                u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
            let record_len =
                u32::from_be_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
                    as usize;

            if record_len < 8 || pos + record_len > data.len() {
                break;
            }

            let content = &data[pos + 8..pos + record_len];

            match record_type {
                100 => exth.authors.extend(decode(content)),
                101 => exth.publisher = decode(content),
                201 => exth.cover_offset = index(content),
                202 => exth.thumbnail_offset = index(content),
                503 => exth.title = decode(content),
                524 => exth.language = decode(content),
                _ => {}
            }

            pos += record_len;
        }

        Ok(exth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exth(records: &[(u32, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (tag, content) in records {
            body.extend_from_slice(&tag.to_be_bytes());
            body.extend_from_slice(&(8 + content.len() as u32).to_be_bytes());
            body.extend_from_slice(content);
        }
        let mut data = Vec::new();
        data.extend_from_slice(b"EXTH");
        data.extend_from_slice(&(12 + body.len() as u32).to_be_bytes());
        data.extend_from_slice(&(records.len() as u32).to_be_bytes());
        data.extend_from_slice(&body);
        data
    }

    #[test]
    fn test_palmdoc_only_record0() {
        let mut data = vec![0u8; 16];
        data[8..10].copy_from_slice(&10u16.to_be_bytes());

        let header = MobiHeader::parse(&data).unwrap();
        assert!(!header.has_mobi_magic);
        assert_eq!(header.text_record_count, 10);
        assert_eq!(header.first_image_index, NULL_INDEX);
        assert!(!header.has_exth());
    }

    #[test]
    fn test_mobi_header_fields() {
        let mut data = vec![0u8; 0x100];
        data[16..20].copy_from_slice(b"MOBI");
        data[20..24].copy_from_slice(&0xE8u32.to_be_bytes());
        data[28..32].copy_from_slice(&65001u32.to_be_bytes());
        data[0x54..0x58].copy_from_slice(&0xF0u32.to_be_bytes());
        data[0x58..0x5C].copy_from_slice(&5u32.to_be_bytes());
        data[0x68..0x6C].copy_from_slice(&6u32.to_be_bytes());
        data[0x6C..0x70].copy_from_slice(&7u32.to_be_bytes());
        data[0x80..0x84].copy_from_slice(&0x50u32.to_be_bytes());
        data[0xF0..0xF5].copy_from_slice(b"Title");

        let header = MobiHeader::parse(&data).unwrap();
        assert!(header.has_mobi_magic);
        assert_eq!(header.encoding_label(), Some("utf-8"));
        assert_eq!(header.mobi_version, 6);
        assert_eq!(header.first_image_index, 7);
        assert_eq!(header.title, "Title");
        assert!(header.has_exth());
        assert_eq!(header.exth_offset(), 16 + 0xE8);
    }

    #[test]
    fn test_title_out_of_bounds_is_empty() {
        let mut data = vec![0u8; 0x84];
        data[16..20].copy_from_slice(b"MOBI");
        data[0x54..0x58].copy_from_slice(&u32::MAX.to_be_bytes());
        data[0x58..0x5C].copy_from_slice(&10u32.to_be_bytes());
        assert_eq!(MobiHeader::parse(&data).unwrap().title, "");
    }

    #[test]
    fn test_header_too_short() {
        assert!(MobiHeader::parse(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_exth_metadata_and_offsets() {
        let data = exth(&[
            (100, b"Test Author"),
            (101, b"Publisher"),
            (503, b"Test Title"),
            (201, &3u32.to_be_bytes()),
            (202, &NULL_INDEX.to_be_bytes()),
        ]);
        let exth = ExthHeader::parse(&data, Some("utf-8")).unwrap();
        assert_eq!(exth.authors, vec!["Test Author"]);
        assert_eq!(exth.publisher.as_deref(), Some("Publisher"));
        assert_eq!(exth.title.as_deref(), Some("Test Title"));
        assert_eq!(exth.cover_offset, Some(3));
        assert_eq!(exth.thumbnail_offset, None);
    }

    #[test]
    fn test_exth_cp1252_text() {
        let data = exth(&[(100, b"Ren\xE9e")]);
        let exth = ExthHeader::parse(&data, Some("windows-1252")).unwrap();
        assert_eq!(exth.authors, vec!["Renée"]);
    }

    #[test]
    fn test_exth_zero_length_record_stops() {
        let mut data = exth(&[(100, b"A")]);
        data[8..12].copy_from_slice(&5u32.to_be_bytes());
        data.extend_from_slice(&100u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        let exth = ExthHeader::parse(&data, None).unwrap();
        assert_eq!(exth.authors, vec!["A"]);
    }

    #[test]
    fn test_exth_invalid_signature() {
        assert!(ExthHeader::parse(b"NOTEXTH_____", None).is_err());
        assert!(ExthHeader::parse(b"EXTH", None).is_err());
    }
}
