use criterion::{criterion_group, criterion_main, Criterion};
use reftrack::index::{build_lookup, index_file, CandidateKeys};
use reftrack::{discover_source_files, MatchRuleSet, ReferenceTracker, Resource, ScanConfig};
use std::fs;
use std::hint::black_box;
use std::sync::Arc;
use tempfile::TempDir;

const FILES: usize = 200;
const KEYS: usize = 500;

fn synthetic_tree() -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    for i in 0..FILES {
        let mut content = String::new();
        for line in 0..100 {
            let key = (i * 31 + line * 7) % (KEYS * 2);
            content.push_str(&format!("    var v{line} = Resources.Key{key}; // line {line}\n"));
        }
        fs::write(temp_dir.path().join(format!("File{i}.cs")), content)
            .expect("Failed to write test file");
    }
    temp_dir
}

fn criterion_benchmark(c: &mut Criterion) {
    let temp_dir = synthetic_tree();
    let config = ScanConfig::default();
    let files = discover_source_files(temp_dir.path(), &config);
    let rules = MatchRuleSet::default();
    let keys: Vec<String> = (0..KEYS).map(|k| format!("Key{k}")).collect();

    c.bench_function("index_and_lookup", |b| {
        let candidates = CandidateKeys::new(keys.iter().map(String::as_str));
        b.iter(|| {
            let indexes = files
                .iter()
                .map(|f| index_file(Arc::new(f.clone()), &rules, &candidates))
                .collect();
            black_box(build_lookup(indexes))
        });
    });

    let tracker = ReferenceTracker::new(config).expect("Failed to create tracker");
    let entries: Vec<Arc<Resource>> = keys
        .iter()
        .map(|k| Arc::new(Resource::new("Resources", k.as_str())))
        .collect();

    c.bench_function("full_scan", |b| {
        b.iter(|| black_box(tracker.begin_find(&entries, &files, &rules).wait()));
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
