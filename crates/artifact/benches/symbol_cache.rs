use artifact::{
    ArtifactCache, ArtifactRef, JsonSymbolLoader, LocalCacheDirectory, MemoryStore, SymbolCache,
};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use tempfile::tempdir;

/// Document with `n` top-level symbols, each a small schema
fn schema_document(n: usize) -> Vec<u8> {
    let body: Vec<String> = (0..n)
        .map(|i| format!(r#""Symbol{i}": {{"name": "str", "timestamp": "float", "width": "int"}}"#))
        .collect();
    format!("{{{}}}", body.join(", ")).into_bytes()
}

/// Memo hits: the path every event takes after warm-up
fn benchmark_symbol_hit(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.put("schemas/frame.json", schema_document(8));
    let symbols = SymbolCache::new(
        ArtifactCache::new(store, LocalCacheDirectory::open(dir.path()).unwrap()),
        JsonSymbolLoader,
    );
    let artifact = ArtifactRef::latest("schemas/frame.json");
    symbols.get(&artifact, "Symbol0").unwrap();

    c.bench_function("symbol_hit", |b| {
        b.iter(|| black_box(symbols.get(black_box(&artifact), "Symbol0").unwrap()))
    });
}

/// Freshness check against an unchanged artifact: one head plus a stamp read
fn benchmark_ensure_current_unchanged(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.put("models/detr.onnx", vec![0u8; 1024 * 1024]);
    let cache = ArtifactCache::new(store, LocalCacheDirectory::open(dir.path()).unwrap());
    let artifact = ArtifactRef::latest("models/detr.onnx");
    cache.ensure_current(&artifact).unwrap();

    c.bench_function("ensure_current_unchanged", |b| {
        b.iter(|| black_box(cache.ensure_current(black_box(&artifact)).unwrap()))
    });
}

/// Cold miss: sync plus parse, by document size
fn benchmark_symbol_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("symbol_miss");

    for symbols_in_document in [1, 16, 256] {
        group.bench_with_input(
            BenchmarkId::from_parameter(symbols_in_document),
            &symbols_in_document,
            |b, &n| {
                b.iter_with_setup(
                    || {
                        let dir = tempdir().unwrap();
                        let store = Arc::new(MemoryStore::new());
                        store.put("schemas/frame.json", schema_document(n));
                        let local = LocalCacheDirectory::open(dir.path()).unwrap();
                        let symbols =
                            SymbolCache::new(ArtifactCache::new(store, local), JsonSymbolLoader);
                        (dir, symbols)
                    },
                    |(_dir, symbols)| {
                        black_box(
                            symbols
                                .get(&ArtifactRef::latest("schemas/frame.json"), "Symbol0")
                                .unwrap(),
                        )
                    },
                )
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_symbol_hit,
    benchmark_ensure_current_unchanged,
    benchmark_symbol_miss
);
criterion_main!(benches);
