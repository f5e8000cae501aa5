//! EPUB discovery.
//!
//! Referenced mode walks the spine and collects images in the order the
//! content documents reference them. Exhaustive mode takes every image entry
//! in the archive. A package that cannot be located or parsed downgrades the
//! book to exhaustive mode instead of failing it.

mod archive;
mod package;
mod references;

pub use archive::{ZipEntry, ZipIndex};
pub use package::{ManifestItem, Package, parse_container_xml, parse_opf};
pub use references::image_references;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::DiscoveryMode;
use crate::discover::{CandidateImage, Discover, Discovery, Metadata, ReadingOrder, StructuralHint};
use crate::error::{Error, Result};
use crate::format::ContainerFormat;
use crate::image::ImageFormat;
use crate::io::ByteSource;
use crate::util::{archive_dir, decode_xml, is_external, normalize_path, resolve_href};

const CONTAINER_PATH: &str = "META-INF/container.xml";

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg"];

/// The package with every href resolved to an archive path.
struct Layout {
    /// Manifest id -> item with `href` rewritten to a full archive path.
    manifest: HashMap<String, ManifestItem>,
    spine: Vec<String>,
    cover_path: Option<String>,
}

/// An image reference found while walking the spine.
struct SpineReference {
    path: String,
    hint: StructuralHint,
}

#[derive(Default)]
struct SpineWalk {
    references: Vec<SpineReference>,
    missing: Vec<String>,
}

/// An opened EPUB archive.
pub struct EpubContainer {
    source: Arc<dyn ByteSource>,
    index: ZipIndex,
    layout: Result<Layout>,
    metadata: Metadata,
}

impl EpubContainer {
    pub fn from_source(source: Arc<dyn ByteSource>) -> Result<Self> {
        let index = ZipIndex::build(&source)?;
        let (layout, metadata) = match load_package(&*source, &index) {
            Ok((layout, metadata)) => (Ok(layout), metadata),
            Err(e) => (Err(e), Metadata::default()),
        };
        Ok(Self {
            source,
            index,
            layout,
            metadata,
        })
    }

    /// Walk the spine in reading order and resolve every image reference to
    /// an archive path, without reading image payloads.
    fn walk_spine(&self, layout: &Layout) -> SpineWalk {
        let mut walk = SpineWalk::default();
        let mut seen = HashSet::new();

        for (item_index, idref) in layout.spine.iter().enumerate() {
            let Some(item) = layout.manifest.get(idref) else {
                debug!(idref = %idref, "spine item has no manifest entry");
                walk.missing.push(format!("spine item {idref}"));
                continue;
            };

            if item.is_image() {
                if seen.insert(item.href.clone()) {
                    walk.references.push(SpineReference {
                        path: item.href.clone(),
                        hint: StructuralHint::Spine {
                            item: item_index,
                            position: 0,
                        },
                    });
                }
                continue;
            }
            if !item.is_document() {
                continue;
            }

            let document = match self.index.read(&*self.source, &item.href) {
                Ok(document) => document,
                Err(e) => {
                    debug!(path = %item.href, error = %e, "spine document unreadable");
                    walk.missing.push(item.href.clone());
                    continue;
                }
            };

            let base = archive_dir(&item.href);
            let mut position = 0;
            for reference in image_references(&document) {
                let Some(path) = resolve_href(base, &reference) else {
                    let href = reference.trim();
                    if !href.is_empty() && !href.starts_with('#') && !is_external(href) {
                        debug!(href, document = %item.href, "image reference leaves the archive");
                        walk.missing.push(href.to_string());
                    }
                    continue;
                };
                if !seen.insert(path.clone()) {
                    continue;
                }
                walk.references.push(SpineReference {
                    path,
                    hint: StructuralHint::Spine {
                        item: item_index,
                        position,
                    },
                });
                position += 1;
            }
        }

        walk
    }

    fn referenced(&self, layout: &Layout) -> Discovery {
        let walk = self.walk_spine(layout);
        let mut missing = walk.missing;
        let mut candidates = Vec::with_capacity(walk.references.len());

        for reference in walk.references {
            let Some(entry) = self.index.find(&reference.path) else {
                debug!(path = %reference.path, "referenced image not in archive");
                missing.push(reference.path);
                continue;
            };
            let data = match archive::read_entry(&*self.source, entry) {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %reference.path, error = %e, "referenced image unreadable");
                    missing.push(reference.path);
                    continue;
                }
            };
            let Some(format) = ImageFormat::sniff(&data) else {
                debug!(path = %reference.path, "referenced resource is not an image");
                continue;
            };
            candidates.push(CandidateImage {
                data,
                discovery_index: candidates.len(),
                hint: Some(reference.hint),
                format,
                source_ref: entry.name.clone(),
                seeded_role: None,
            });
        }

        let cover_ref = layout
            .cover_path
            .as_ref()
            .and_then(|cover| self.index.find(cover))
            .map(|entry| entry.name.clone());

        if candidates.is_empty() {
            let reason = "no images referenced from the spine".to_string();
            debug!("{reason}; falling back to exhaustive discovery");
            let mut discovery = self.exhaustive(Some(layout), None, Some(reason));
            discovery.missing = missing;
            return discovery;
        }

        Discovery {
            candidates,
            reading_order: ReadingOrder::Spine {
                items: layout.spine.len(),
            },
            cover_ref,
            missing,
            mode: DiscoveryMode::Referenced,
            fallback: None,
        }
    }

    /// Every image entry in physical archive order.
    fn exhaustive(
        &self,
        layout: Option<&Layout>,
        cover_ref: Option<String>,
        fallback: Option<String>,
    ) -> Discovery {
        let manifest_images: HashSet<&str> = layout
            .map(|layout| {
                layout
                    .manifest
                    .values()
                    .filter(|item| item.is_image())
                    .map(|item| item.href.as_str())
                    .collect()
            })
            .unwrap_or_default();

        let mut candidates = Vec::new();
        let mut missing = Vec::new();
        for entry in self.index.entries() {
            let declared = manifest_images.contains(entry.name.as_str());
            if entry.is_dir() || !(declared || has_image_extension(&entry.name)) {
                continue;
            }
            let data = match archive::read_entry(&*self.source, entry) {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %entry.name, error = %e, "image entry unreadable");
                    missing.push(entry.name.clone());
                    continue;
                }
            };
            let Some(format) = ImageFormat::sniff(&data) else {
                debug!(path = %entry.name, "entry named like an image is not one");
                continue;
            };
            candidates.push(CandidateImage {
                data,
                discovery_index: candidates.len(),
                hint: None,
                format,
                source_ref: entry.name.clone(),
                seeded_role: None,
            });
        }

        Discovery {
            candidates,
            reading_order: ReadingOrder::Archive,
            cover_ref,
            missing,
            mode: DiscoveryMode::Exhaustive,
            fallback,
        }
    }
}

impl Discover for EpubContainer {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Epub
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn discover(&mut self, mode: DiscoveryMode) -> Result<Discovery> {
        let layout = match &self.layout {
            Ok(layout) => layout,
            Err(e) => {
                let reason = e.to_string();
                warn!(reason = %reason, "package unusable; extracting every archive image");
                return Ok(self.exhaustive(None, None, Some(reason)));
            }
        };

        Ok(match mode {
            DiscoveryMode::Referenced => self.referenced(layout),
            DiscoveryMode::Exhaustive => {
                // The cover role is only trusted when reading order reaches it.
                let cover_ref = layout.cover_path.as_ref().and_then(|cover| {
                    self.walk_spine(layout)
                        .references
                        .iter()
                        .any(|r| r.path.eq_ignore_ascii_case(cover))
                        .then(|| self.index.find(cover).map(|e| e.name.clone()))
                        .flatten()
                });
                self.exhaustive(Some(layout), cover_ref, None)
            }
        })
    }
}

fn has_image_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// Locate and parse the package document, resolving hrefs against it.
fn load_package(source: &dyn ByteSource, index: &ZipIndex) -> Result<(Layout, Metadata)> {
    let container = index.read(source, CONTAINER_PATH).map_err(|e| match e {
        Error::MissingResource(_) => Error::MalformedContainer(format!("{CONTAINER_PATH} missing")),
        other => other,
    })?;
    let opf_path = parse_container_xml(&container)?;
    let opf_path = normalize_path(&opf_path)
        .ok_or_else(|| Error::MalformedContainer(format!("bad package path {opf_path:?}")))?;

    let opf = index.read(source, &opf_path).map_err(|e| match e {
        Error::MissingResource(_) => {
            Error::MalformedContainer(format!("package document {opf_path} missing"))
        }
        other => other,
    })?;
    let package = parse_opf(&decode_xml(&opf))?;
    if package.spine.is_empty() {
        return Err(Error::MalformedContainer(
            "package document declares no spine".into(),
        ));
    }

    let base = archive_dir(&opf_path);
    let manifest = package
        .manifest
        .into_iter()
        .filter_map(|(id, mut item)| {
            item.href = resolve_href(base, &item.href)?;
            Some((id, item))
        })
        .collect();
    let cover_path = package
        .cover_href
        .as_deref()
        .and_then(|href| resolve_href(base, href));

    let mut metadata = package.metadata;
    metadata.cover = cover_path.clone();

    debug!(package = %opf_path, spine = package.spine.len(), "parsed package document");
    Ok((
        Layout {
            manifest,
            spine: package.spine,
            cover_path,
        },
        metadata,
    ))
}
