//! Synthetic fixtures: image headers, EPUB archives and Mobipocket databases.
//!
//! These utilities are used by both unit tests and integration tests, so
//! the images carry valid headers (dimensions can be probed) but no pixel
//! data. `padding` bytes make otherwise identical images distinct.

use std::io::{Cursor, Write};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

fn filler(len: usize) -> impl Iterator<Item = u8> {
    (0..len).map(|i| (i % 251) as u8)
}

/// Baseline JPEG: SOI, APP0, COM padding segments, SOF0, EOI.
pub fn jpeg(width: u16, height: u16, padding: usize) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8];
    data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
    data.extend_from_slice(b"JFIF\0\x01\x01\0\0\x01\0\x01\0\0");

    let mut remaining = padding;
    while remaining > 0 {
        let chunk = remaining.min(60_000);
        data.extend_from_slice(&[0xFF, 0xFE]);
        data.extend_from_slice(&((chunk + 2) as u16).to_be_bytes());
        data.extend(filler(chunk));
        remaining -= chunk;
    }

    data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08]);
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&[0x03, 0x01, 0x22, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01]);
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

/// PNG with an IHDR chunk and an optional tEXt chunk of padding.
pub fn png(width: u32, height: u32, padding: usize) -> Vec<u8> {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend_from_slice(&13u32.to_be_bytes());
    data.extend_from_slice(b"IHDR");
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&[8, 2, 0, 0, 0]);
    data.extend_from_slice(&[0; 4]);
    if padding > 0 {
        data.extend_from_slice(&(padding as u32).to_be_bytes());
        data.extend_from_slice(b"tEXt");
        data.extend(filler(padding));
        data.extend_from_slice(&[0; 4]);
    }
    data.extend_from_slice(&0u32.to_be_bytes());
    data.extend_from_slice(b"IEND");
    data.extend_from_slice(&[0xAE, 0x42, 0x60, 0x82]);
    data
}

pub fn gif(width: u16, height: u16) -> Vec<u8> {
    let mut data = b"GIF89a".to_vec();
    data.extend_from_slice(&width.to_le_bytes());
    data.extend_from_slice(&height.to_le_bytes());
    data.extend_from_slice(&[0, 0, 0, 0x3B]);
    data
}

/// Uncompressed 24-bit BMP header with a BITMAPINFOHEADER.
pub fn bmp(width: i32, height: i32) -> Vec<u8> {
    let mut data = b"BM".to_vec();
    data.extend_from_slice(&54u32.to_le_bytes());
    data.extend_from_slice(&[0; 4]);
    data.extend_from_slice(&54u32.to_le_bytes());
    data.extend_from_slice(&40u32.to_le_bytes());
    data.extend_from_slice(&width.to_le_bytes());
    data.extend_from_slice(&height.to_le_bytes());
    data.extend_from_slice(&1u16.to_le_bytes());
    data.extend_from_slice(&24u16.to_le_bytes());
    data.resize(54, 0);
    data
}

/// Extended-format WebP header (VP8X chunk only).
pub fn webp_vp8x(width: u32, height: u32) -> Vec<u8> {
    let mut data = b"RIFF".to_vec();
    data.extend_from_slice(&22u32.to_le_bytes());
    data.extend_from_slice(b"WEBP");
    data.extend_from_slice(b"VP8X");
    data.extend_from_slice(&10u32.to_le_bytes());
    data.extend_from_slice(&[0; 4]);
    data.extend_from_slice(&(width - 1).to_le_bytes()[..3]);
    data.extend_from_slice(&(height - 1).to_le_bytes()[..3]);
    data
}

/// Builds an EPUB with its package at `OEBPS/content.opf`.
#[derive(Default)]
pub struct EpubBuilder {
    title: Option<String>,
    files: Vec<(String, Vec<u8>)>,
    manifest: Vec<String>,
    spine: Vec<String>,
    metadata_extra: Vec<String>,
    omit_container: bool,
    omit_package: bool,
}

impl EpubBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Add an XHTML document to the manifest and the spine. `body` is the
    /// inner HTML of `<body>`; `href` is relative to the package.
    pub fn chapter(mut self, id: &str, href: &str, body: &str) -> Self {
        let document = format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
             <html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>{id}</title></head>\
             <body>{body}</body></html>"
        );
        self.files.push((format!("OEBPS/{href}"), document.into_bytes()));
        self.manifest.push(format!(
            r#"<item id="{id}" href="{href}" media-type="application/xhtml+xml"/>"#
        ));
        self.spine.push(id.to_string());
        self
    }

    /// Add an image to the manifest; `href` is relative to the package.
    pub fn image(mut self, id: &str, href: &str, media_type: &str, data: Vec<u8>) -> Self {
        self.files.push((format!("OEBPS/{href}"), data));
        self.manifest.push(format!(
            r#"<item id="{id}" href="{href}" media-type="{media_type}"/>"#
        ));
        self
    }

    /// Add an image declared as the EPUB3 cover.
    pub fn cover_image(mut self, id: &str, href: &str, data: Vec<u8>) -> Self {
        self.files.push((format!("OEBPS/{href}"), data));
        self.manifest.push(format!(
            r#"<item id="{id}" href="{href}" media-type="image/jpeg" properties="cover-image"/>"#
        ));
        self
    }

    /// Declare the EPUB2 cover meta pointing at a manifest id.
    pub fn cover_meta(mut self, id: &str) -> Self {
        self.metadata_extra
            .push(format!(r#"<meta name="cover" content="{id}"/>"#));
        self
    }

    /// Add a raw archive entry with no manifest item.
    pub fn file(mut self, path: &str, data: Vec<u8>) -> Self {
        self.files.push((path.to_string(), data));
        self
    }

    /// Add a spine itemref without a manifest item.
    pub fn spine_ref(mut self, idref: &str) -> Self {
        self.spine.push(idref.to_string());
        self
    }

    pub fn without_container(mut self) -> Self {
        self.omit_container = true;
        self
    }

    pub fn without_package(mut self) -> Self {
        self.omit_package = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let deflated =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        let mut write = |name: &str, data: &[u8], options: SimpleFileOptions| {
            zip.start_file(name, options).expect("start zip entry");
            zip.write_all(data).expect("write zip entry");
        };

        write("mimetype", b"application/epub+zip", stored);
        if !self.omit_container {
            write(
                "META-INF/container.xml",
                br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
                deflated,
            );
        }
        if !self.omit_package {
            let title = self.title.as_deref().unwrap_or("Untitled");
            let spine: String = self
                .spine
                .iter()
                .map(|id| format!(r#"<itemref idref="{id}"/>"#))
                .collect();
            let opf = format!(
                r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>{title}</dc:title>
    <dc:creator>Test Author</dc:creator>
    <dc:language>en</dc:language>
    {extra}
  </metadata>
  <manifest>{manifest}</manifest>
  <spine>{spine}</spine>
</package>"#,
                extra = self.metadata_extra.concat(),
                manifest = self.manifest.concat(),
            );
            write("OEBPS/content.opf", opf.as_bytes(), deflated);
        }
        for (name, data) in &self.files {
            write(name, data, deflated);
        }

        zip.finish().expect("finish zip").into_inner()
    }
}

/// Builds a Mobipocket database: record 0, text records, then image (or
/// arbitrary) records.
pub struct MobiBuilder {
    text_records: Vec<Vec<u8>>,
    trailing_records: Vec<Vec<u8>>,
    title: String,
    authors: Vec<String>,
    cover_offset: Option<u32>,
    thumbnail_offset: Option<u32>,
    first_image_index: Option<u32>,
    mobi_version: u32,
    encryption: u16,
    exth: bool,
    palmdoc_only: bool,
}

impl Default for MobiBuilder {
    fn default() -> Self {
        Self {
            text_records: Vec::new(),
            trailing_records: Vec::new(),
            title: "Synthetic Book".to_string(),
            authors: Vec::new(),
            cover_offset: None,
            thumbnail_offset: None,
            first_image_index: None,
            mobi_version: 6,
            encryption: 0,
            exth: true,
            palmdoc_only: false,
        }
    }
}

impl MobiBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text_record(mut self, data: &[u8]) -> Self {
        self.text_records.push(data.to_vec());
        self
    }

    pub fn image(mut self, data: Vec<u8>) -> Self {
        self.trailing_records.push(data);
        self
    }

    /// A record after the text records that need not be an image.
    pub fn raw_record(mut self, data: Vec<u8>) -> Self {
        self.trailing_records.push(data);
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn author(mut self, author: &str) -> Self {
        self.authors.push(author.to_string());
        self
    }

    pub fn cover_offset(mut self, offset: u32) -> Self {
        self.cover_offset = Some(offset);
        self
    }

    pub fn thumbnail_offset(mut self, offset: u32) -> Self {
        self.thumbnail_offset = Some(offset);
        self
    }

    /// Override the header's first image index (defaults to the first
    /// record after the text records).
    pub fn first_image_index(mut self, index: u32) -> Self {
        self.first_image_index = Some(index);
        self
    }

    pub fn mobi_version(mut self, version: u32) -> Self {
        self.mobi_version = version;
        self
    }

    pub fn encryption(mut self, kind: u16) -> Self {
        self.encryption = kind;
        self
    }

    pub fn without_exth(mut self) -> Self {
        self.exth = false;
        self
    }

    /// Record 0 carries only the 16-byte PalmDOC header.
    pub fn palmdoc_only(mut self) -> Self {
        self.palmdoc_only = true;
        self
    }

    fn record0(&self) -> Vec<u8> {
        let text_len: usize = self.text_records.iter().map(Vec::len).sum();
        let mut record = Vec::new();
        record.extend_from_slice(&1u16.to_be_bytes());
        record.extend_from_slice(&[0, 0]);
        record.extend_from_slice(&(text_len as u32).to_be_bytes());
        record.extend_from_slice(&(self.text_records.len() as u16).to_be_bytes());
        record.extend_from_slice(&4096u16.to_be_bytes());
        record.extend_from_slice(&self.encryption.to_be_bytes());
        record.extend_from_slice(&[0, 0]);
        if self.palmdoc_only {
            return record;
        }

        const HEADER_LEN: usize = 0xE8;
        let first_image = self
            .first_image_index
            .unwrap_or(1 + self.text_records.len() as u32);

        let mut mobi = vec![0u8; HEADER_LEN];
        mobi[0..4].copy_from_slice(b"MOBI");
        mobi[4..8].copy_from_slice(&(HEADER_LEN as u32).to_be_bytes());
        mobi[8..12].copy_from_slice(&2u32.to_be_bytes());
        mobi[12..16].copy_from_slice(&65001u32.to_be_bytes());
        mobi[0x68 - 16..0x6C - 16].copy_from_slice(&self.mobi_version.to_be_bytes());
        mobi[0x6C - 16..0x70 - 16].copy_from_slice(&first_image.to_be_bytes());
        let exth_flags: u32 = if self.exth { 0x40 } else { 0 };
        mobi[0x80 - 16..0x84 - 16].copy_from_slice(&exth_flags.to_be_bytes());

        let exth = if self.exth { self.exth_block() } else { Vec::new() };
        let title_offset = 16 + HEADER_LEN + exth.len();
        mobi[0x54 - 16..0x58 - 16].copy_from_slice(&(title_offset as u32).to_be_bytes());
        mobi[0x58 - 16..0x5C - 16].copy_from_slice(&(self.title.len() as u32).to_be_bytes());

        record.extend_from_slice(&mobi);
        record.extend_from_slice(&exth);
        record.extend_from_slice(self.title.as_bytes());
        record.extend_from_slice(&[0, 0]);
        record
    }

    fn exth_block(&self) -> Vec<u8> {
        let mut entries: Vec<(u32, Vec<u8>)> = self
            .authors
            .iter()
            .map(|a| (100, a.as_bytes().to_vec()))
            .collect();
        entries.push((503, self.title.as_bytes().to_vec()));
        if let Some(offset) = self.cover_offset {
            entries.push((201, offset.to_be_bytes().to_vec()));
        }
        if let Some(offset) = self.thumbnail_offset {
            entries.push((202, offset.to_be_bytes().to_vec()));
        }

        let mut body = Vec::new();
        for (tag, content) in &entries {
            body.extend_from_slice(&tag.to_be_bytes());
            body.extend_from_slice(&(8 + content.len() as u32).to_be_bytes());
            body.extend_from_slice(content);
        }
        let mut block = b"EXTH".to_vec();
        block.extend_from_slice(&(12 + body.len() as u32).to_be_bytes());
        block.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        block.extend_from_slice(&body);
        while block.len() % 4 != 0 {
            block.push(0);
        }
        block
    }

    pub fn build(self) -> Vec<u8> {
        let mut records = vec![self.record0()];
        records.extend(self.text_records.iter().cloned());
        records.extend(self.trailing_records.iter().cloned());

        let mut header = vec![0u8; 78];
        let name = self.title.replace(' ', "_");
        let name = &name.as_bytes()[..name.len().min(31)];
        header[..name.len()].copy_from_slice(name);
        header[60..68].copy_from_slice(b"BOOKMOBI");
        header[76..78].copy_from_slice(&(records.len() as u16).to_be_bytes());

        let mut offset = 78 + records.len() * 8 + 2;
        for (i, record) in records.iter().enumerate() {
            header.extend_from_slice(&(offset as u32).to_be_bytes());
            header.extend_from_slice(&((i as u32) * 2).to_be_bytes());
            offset += record.len();
        }
        header.extend_from_slice(&[0, 0]);

        for record in records {
            header.extend_from_slice(&record);
        }
        header
    }
}
