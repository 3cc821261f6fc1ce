use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    pub files_indexed: IntCounter,
    pub files_skipped: IntCounter,
    pub entries_matched: IntCounter,
    pub references_found: IntCounter,
    pub template_errors: IntCounter,
    registry: Arc<Registry>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::with_opts(Opts::new(name, help).namespace("reftrack"))
        .expect("metric names are static and valid");
    registry.register(Box::new(counter.clone())).ok();
    counter
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        Metrics {
            files_indexed: counter(&registry, "files_indexed", "Source files read and tokenized"),
            files_skipped: counter(
                &registry,
                "files_skipped",
                "Source files no match rule applies to",
            ),
            entries_matched: counter(
                &registry,
                "entries_matched",
                "Resource entries whose references were published",
            ),
            references_found: counter(&registry, "references_found", "Code references found"),
            template_errors: counter(
                &registry,
                "template_errors",
                "Match templates that failed to compile",
            ),
            registry: Arc::new(registry),
        }
    }

    pub fn gather(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            log::warn!("Failed to encode metrics: {e}");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
