#![allow(unused_must_use)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gpugrep::{BackendOverride, DispatchTuning, SearchOptions, Searcher};

fn make_text(lines: usize) -> Vec<u8> {
    let mut text = Vec::new();
    for i in 0..lines {
        text.extend_from_slice(
            format!("line {i} with the usual filler words and a needle sometimes\n").as_bytes(),
        );
        if i % 7 == 0 {
            text.extend_from_slice(b"a stray NEEDLE_9 token and some more text\n");
        }
    }
    text
}

fn cpu_searcher(options: SearchOptions) -> Searcher {
    Searcher::with_config(options, DispatchTuning::default(), BackendOverride::Cpu)
}

fn bench_literal(c: &mut Criterion) {
    let text = make_text(20_000);
    let mut group = c.benchmark_group("Literal Search");

    let searcher = cpu_searcher(SearchOptions::default());
    group.bench_function("plain", |b| {
        b.iter(|| black_box(searcher.search(&text, b"needle").unwrap()));
    });

    let searcher = cpu_searcher(SearchOptions {
        case_insensitive: true,
        ..Default::default()
    });
    group.bench_function("case_insensitive", |b| {
        b.iter(|| black_box(searcher.search(&text, b"NEEDLE").unwrap()));
    });

    let searcher = cpu_searcher(SearchOptions {
        word_boundary: true,
        ..Default::default()
    });
    group.bench_function("word_boundary", |b| {
        b.iter(|| black_box(searcher.search(&text, b"needle").unwrap()));
    });

    let searcher = cpu_searcher(SearchOptions {
        invert_match: true,
        ..Default::default()
    });
    group.bench_function("invert", |b| {
        b.iter(|| black_box(searcher.search(&text, b"needle").unwrap()));
    });

    group.finish();
}

fn bench_regex(c: &mut Criterion) {
    let text = make_text(5_000);
    let searcher = cpu_searcher(SearchOptions {
        extended: true,
        ..Default::default()
    });

    let patterns: &[(&str, &[u8])] = &[
        ("alternation", b"needle|NEEDLE"),
        ("class_plus", b"[A-Z]+_[0-9]"),
        ("anchored", b"^line [0-9]+"),
        ("interval", b"e{2}"),
    ];

    let mut group = c.benchmark_group("Regex Search");
    for (name, pattern) in patterns {
        group.bench_function(*name, |b| {
            b.iter(|| black_box(searcher.search(&text, pattern).unwrap()));
        });
    }
    group.finish();
}

fn bench_text_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("Text Scaling");
    for lines in [1_000usize, 10_000, 100_000] {
        let text = make_text(lines);
        let searcher = cpu_searcher(SearchOptions::default());
        group.bench_function(format!("lines_{lines}"), |b| {
            b.iter(|| black_box(searcher.search(&text, b"needle").unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_literal, bench_regex, bench_text_scaling);
criterion_main!(benches);
