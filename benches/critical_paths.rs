//! Criterion benchmarks for assetline critical paths
//!
//! Benchmarks the operations on the watch loop's hot path:
//! - Incremental cache: invalidation over a large include graph
//! - Path table: classifying a changed path into its category
//! - Mirror: right-to-left rewrite of a stylesheet bundle

use assetline::build::{CacheEntry, DependencyGraph, IncrementalCache};
use assetline::config::SiteConfig;
use assetline::paths::PathTable;
use assetline::tools::{Mirror, RegexMirror};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// Test Data Generators
// =============================================================================

fn partial(i: usize) -> PathBuf {
    PathBuf::from(format!("/site/src/sass/partials/_p{}.scss", i))
}

fn root(i: usize) -> PathBuf {
    PathBuf::from(format!("/site/src/sass/page{}.scss", i))
}

/// A cache with `roots` cached roots over a chain of `depth` partials.
///
/// Root `i` includes partial `i % depth`; partial `j` includes `j + 1`, so
/// the last partial reaches every root.
fn make_cache(roots: usize, depth: usize) -> IncrementalCache {
    let mut cache = IncrementalCache::new();
    for j in 0..depth.saturating_sub(1) {
        cache.record_dependency(&partial(j), &partial(j + 1));
    }
    for i in 0..roots {
        let path = root(i);
        cache.record_dependency(&path, &partial(i % depth));
        let entry = CacheEntry {
            source_hash: format!("{:064x}", i),
            css: format!(".page{} {{ color: red; }}", i),
            includes: BTreeMap::from([(partial(i % depth), format!("{:064x}", i % depth))]),
        };
        cache.put(&path, entry);
    }
    cache
}

/// A stylesheet with `rules` direction-sensitive rules.
fn make_stylesheet(rules: usize) -> String {
    (0..rules)
        .map(|i| {
            format!(
                ".r{} {{ float: left; margin: 1px 2px 3px 4px; padding-left: {}px; text-align: right; }}\n",
                i, i
            )
        })
        .collect()
}

// =============================================================================
// Incremental Cache Benchmarks
// =============================================================================

fn bench_invalidation(c: &mut Criterion) {
    let mut group = c.benchmark_group("invalidate");

    for roots in [100, 1_000, 10_000].iter() {
        let cache = make_cache(*roots, 32);
        group.throughput(Throughput::Elements(*roots as u64));

        // Deepest partial: every root is affected.
        group.bench_with_input(BenchmarkId::new("deep_partial", roots), &cache, |b, cache| {
            b.iter_batched(
                || cache.clone(),
                |mut cache| cache.invalidate(black_box(&partial(31))),
                BatchSize::LargeInput,
            )
        });

        // A root no one includes.
        group.bench_with_input(BenchmarkId::new("single_root", roots), &cache, |b, cache| {
            b.iter_batched(
                || cache.clone(),
                |mut cache| cache.invalidate(black_box(&root(0))),
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

fn bench_dependents(c: &mut Criterion) {
    let mut group = c.benchmark_group("dependency_graph");

    for depth in [8, 64, 512].iter() {
        let mut graph = DependencyGraph::new();
        for j in 0..depth - 1 {
            graph.record(&partial(j), &partial(j + 1));
        }
        group.bench_with_input(BenchmarkId::new("transitive_dependents", depth), &graph, |b, graph| {
            b.iter(|| graph.transitive_dependents(black_box(&partial(depth - 1))))
        });
    }

    group.finish();
}

// =============================================================================
// Classification Benchmarks
// =============================================================================

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let table = PathTable::from_config(&SiteConfig::default(), Path::new("/site")).expect("default path table");

    let changes = [
        ("markup", "/site/src/pug/index.pug"),
        ("stylesheet", "/site/src/sass/components/_button.scss"),
        ("image", "/site/src/img/icons/logo.png"),
        ("unmatched", "/site/README.md"),
    ];
    for (name, path) in changes {
        let path = PathBuf::from(path);
        group.bench_with_input(BenchmarkId::new("category_for", name), &path, |b, path| {
            b.iter(|| table.category_for(black_box(path)))
        });
    }

    group.finish();
}

// =============================================================================
// Mirror Benchmarks
// =============================================================================

fn bench_mirror(c: &mut Criterion) {
    let mut group = c.benchmark_group("mirror");

    for rules in [100, 1_000].iter() {
        let css = make_stylesheet(*rules);
        group.throughput(Throughput::Bytes(css.len() as u64));
        group.bench_with_input(BenchmarkId::new("rtl", rules), &css, |b, css| {
            b.iter(|| RegexMirror.mirror(black_box(css)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_invalidation, bench_dependents, bench_classify, bench_mirror);

criterion_main!(benches);
