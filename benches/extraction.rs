//! Benchmarks for the extraction pipeline.
//!
//! Run with: cargo bench

use std::hint::black_box;
use std::path::Path;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};

use plates::image::{ImageFormat, ImageMetrics, probe_dimensions};
use plates::io::{ByteSource, MemorySource};
use plates::{ExtractConfig, Extractor};

#[allow(dead_code)]
#[path = "../src/test_helpers.rs"]
mod fixtures;

use fixtures::{EpubBuilder, MobiBuilder, jpeg, png};

const PAGES: usize = 64;

fn synthetic_epub() -> Vec<u8> {
    let mut builder = EpubBuilder::new().title("Benchmark Comic");
    for i in 0..PAGES {
        builder = builder
            .chapter(
                &format!("p{i}"),
                &format!("text/p{i}.xhtml"),
                &format!(r#"<div><img src="../images/p{i}.jpg"/></div>"#),
            )
            .image(
                &format!("img{i}"),
                &format!("images/p{i}.jpg"),
                "image/jpeg",
                jpeg(1200, 1800, 64 * 1024 + i),
            );
    }
    builder.build()
}

fn synthetic_mobi() -> Vec<u8> {
    let mut builder = MobiBuilder::new().text_record(b"<html><body>text</body></html>");
    for i in 0..PAGES {
        builder = builder.image(png(1200, 1800, 64 * 1024 + i));
    }
    builder.cover_offset(0).build()
}

// ============================================================================
// Pipeline Benchmarks
// ============================================================================

fn bench_extract_epub(c: &mut Criterion) {
    let bytes = synthetic_epub();
    let config = ExtractConfig::default().with_dry_run(true);
    c.bench_function("extract_epub_dry_run", |b| {
        b.iter(|| {
            let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(bytes.clone()));
            Extractor::new(&config)
                .extract_source(source, Path::new("bench.epub"))
                .unwrap()
        });
    });
}

fn bench_extract_mobi(c: &mut Criterion) {
    let bytes = synthetic_mobi();
    let config = ExtractConfig::default().with_dry_run(true);
    c.bench_function("extract_mobi_dry_run", |b| {
        b.iter(|| {
            let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(bytes.clone()));
            Extractor::new(&config)
                .extract_source(source, Path::new("bench.mobi"))
                .unwrap()
        });
    });
}

// ============================================================================
// Per-image Benchmarks
// ============================================================================

fn bench_probe_dimensions(c: &mut Criterion) {
    let data = jpeg(1200, 1800, 256 * 1024);
    c.bench_function("probe_jpeg_dimensions", |b| {
        b.iter(|| probe_dimensions(ImageFormat::Jpeg, black_box(&data)));
    });
}

fn bench_measure(c: &mut Criterion) {
    let data = jpeg(1200, 1800, 256 * 1024);
    c.bench_function("measure_256k_jpeg", |b| {
        b.iter(|| ImageMetrics::measure(ImageFormat::Jpeg, black_box(&data)));
    });
}

criterion_group!(pipeline, bench_extract_epub, bench_extract_mobi);
criterion_group!(images, bench_probe_dimensions, bench_measure);
criterion_main!(pipeline, images);
