//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

#[path = "../../src/test_helpers.rs"]
mod fixtures;

pub use fixtures::*;

/// Write `data` to `dir/name` and return the path.
pub fn write_book(dir: &Path, name: &str, data: Vec<u8>) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

/// A page-sized JPEG, distinct for every `seed`.
pub fn page(seed: usize) -> Vec<u8> {
    jpeg(600, 800, 5000 + seed)
}

/// A comic-style EPUB: one chapter per page, each showing one image.
pub fn comic_epub(pages: &[Vec<u8>]) -> Vec<u8> {
    let mut builder = EpubBuilder::new().title("Comic");
    for (i, data) in pages.iter().enumerate() {
        builder = builder
            .chapter(
                &format!("p{i}"),
                &format!("text/p{i}.xhtml"),
                &format!(r#"<div><img src="../images/p{i}.jpg" alt=""/></div>"#),
            )
            .image(&format!("img{i}"), &format!("images/p{i}.jpg"), "image/jpeg", data.clone());
    }
    builder.build()
}

pub fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}
