//! Background code-reference scans.
//!
//! A scan runs in two phases on a dedicated rayon pool: every source file is
//! indexed, then every resource entry is matched against the files its key
//! may occur in. Only one scan is current at a time; starting another one
//! bumps the tracker generation, which every worker of the old scan checks
//! before doing more work or publishing a result.
use crate::config::ScanConfig;
use crate::error::Result as ReftrackResult;
use crate::index::{build_lookup, index_file_until, CandidateKeys, FileIndex, KeyLookup};
use crate::matcher::LineMatcher;
use crate::metrics::Metrics;
use crate::progress::{ScanProgress, ScanState};
use crate::resource::{CodeReference, ResourceEntry};
use crate::rules::{MatchRuleSet, RuleId};
use crate::source::{is_scannable, SourceFile};
use anyhow::Context;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{debug, error, info};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counts for a scan that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub entries_matched: usize,
    pub references_found: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed(ScanSummary),
    Cancelled,
}

/// State shared between the tracker, a handle and the scan's workers.
#[derive(Debug, Clone)]
struct ScanControl {
    generation: u64,
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    progress: Arc<ScanProgress>,
}

impl ScanControl {
    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) && self.progress.state().is_active() {
            self.progress.advance(ScanState::Cancelled);
            debug!("Cancelling scan #{}", self.generation);
        }
    }
}

/// Caller's view of one scan.
#[derive(Debug)]
pub struct ScanHandle {
    control: ScanControl,
    outcome: Receiver<ScanOutcome>,
}

impl ScanHandle {
    pub fn generation(&self) -> u64 {
        self.control.generation
    }

    /// Asks the scan to stop; returns immediately.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.cancelled.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.control.finished.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> u8 {
        self.control.progress.percent()
    }

    pub fn state(&self) -> ScanState {
        self.control.progress.state()
    }

    /// Blocks until the scan finishes.
    pub fn wait(self) -> ScanOutcome {
        self.outcome.recv().unwrap_or(ScanOutcome::Cancelled)
    }

    /// Waits up to `timeout`; `None` if the scan is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ScanOutcome> {
        match self.outcome.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(ScanOutcome::Cancelled),
        }
    }
}

/// Owns the current scan and the worker pool.
pub struct ReferenceTracker {
    active: Mutex<Option<ScanControl>>,
    generation: Arc<AtomicU64>,
    pool: Arc<rayon::ThreadPool>,
    metrics: Arc<Metrics>,
    config: ScanConfig,
}

impl ReferenceTracker {
    pub fn new(config: ScanConfig) -> ReftrackResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads())
            .thread_name(|i| format!("reftrack-worker-{i}"))
            .build()
            .context("Failed to create scan thread pool")?;

        Ok(Self {
            active: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
            pool: Arc::new(pool),
            metrics: Arc::new(Metrics::new()),
            config,
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Starts a scan over snapshots of `entries`, `files` and `rules`,
    /// cancelling any scan still running. Every entry is marked pending but
    /// keeps its previous references until the new scan publishes.
    pub fn begin_find<E: ResourceEntry + 'static>(
        &self,
        entries: &[Arc<E>],
        files: &[SourceFile],
        rules: &MatchRuleSet,
    ) -> ScanHandle {
        let entries: Vec<Arc<dyn ResourceEntry>> = entries
            .iter()
            .map(|e| Arc::clone(e) as Arc<dyn ResourceEntry>)
            .collect();
        let mut files: Vec<SourceFile> = files
            .iter()
            .filter(|f| is_scannable(f, &self.config))
            .cloned()
            .collect();
        files.sort();
        files.dedup();
        let files: Vec<Arc<SourceFile>> = files.into_iter().map(Arc::new).collect();

        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            previous.cancel();
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        for entry in &entries {
            entry.code_references().mark_pending(generation);
        }

        let control = ScanControl {
            generation,
            cancelled: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(ScanProgress::new(entries.len() + files.len())),
        };
        control.progress.advance(ScanState::Indexing);
        info!(
            "Scan #{generation}: {} resource entries, {} source files, {} rules",
            entries.len(),
            files.len(),
            rules.len()
        );

        let job = ScanJob {
            control: control.clone(),
            current_generation: Arc::clone(&self.generation),
            entries,
            files,
            rules: Arc::new(rules.clone()),
            metrics: Arc::clone(&self.metrics),
            regex_size_limit: self.config.regex_size_limit,
        };

        let (tx, rx) = bounded(1);
        let pool = Arc::clone(&self.pool);
        let spawned = std::thread::Builder::new()
            .name(format!("reftrack-scan-{generation}"))
            .spawn(move || {
                let outcome = pool.install(|| job.run());
                job.control.finished.store(true, Ordering::Release);
                let _ = tx.send(outcome);
            });
        if let Err(e) = spawned {
            error!("Failed to start scan #{generation}: {e}");
            control.cancel();
            control.progress.advance(ScanState::Idle);
            control.finished.store(true, Ordering::Release);
        }

        *active = Some(control.clone());
        ScanHandle {
            control,
            outcome: rx,
        }
    }

    /// Requests cancellation of the current scan without waiting for it.
    /// References already published stay as they are.
    pub fn stop_find(&self) {
        if let Some(control) = self.active.lock().take() {
            control.cancel();
        }
    }

    /// 0..=100 while a scan runs, 0 when idle.
    pub fn progress(&self) -> u8 {
        self.active
            .lock()
            .as_ref()
            .map_or(0, |control| control.progress.percent())
    }

    pub fn state(&self) -> ScanState {
        self.active
            .lock()
            .as_ref()
            .map_or(ScanState::Idle, |control| control.progress.state())
    }

    pub fn is_busy(&self) -> bool {
        self.state().is_active()
    }
}

impl Drop for ReferenceTracker {
    fn drop(&mut self) {
        self.stop_find();
    }
}

struct ScanJob {
    control: ScanControl,
    current_generation: Arc<AtomicU64>,
    entries: Vec<Arc<dyn ResourceEntry>>,
    files: Vec<Arc<SourceFile>>,
    rules: Arc<MatchRuleSet>,
    metrics: Arc<Metrics>,
    regex_size_limit: usize,
}

impl ScanJob {
    fn should_stop(&self) -> bool {
        self.control.cancelled.load(Ordering::Acquire)
            || self.current_generation.load(Ordering::Acquire) != self.control.generation
    }

    fn cancelled(&self) -> ScanOutcome {
        self.control.progress.advance(ScanState::Cancelled);
        self.control.progress.advance(ScanState::Idle);
        debug!("Scan #{} stopped", self.control.generation);
        ScanOutcome::Cancelled
    }

    fn run(&self) -> ScanOutcome {
        let started = Instant::now();
        let progress = &self.control.progress;
        let candidates = CandidateKeys::new(self.entries.iter().map(|e| e.key()));

        let indexes: Vec<FileIndex> = self
            .files
            .par_iter()
            .filter_map(|file| {
                if self.should_stop() {
                    return None;
                }
                let index = index_file_until(Arc::clone(file), &self.rules, &candidates, || {
                    self.should_stop()
                });
                if index.is_applicable() {
                    self.metrics.files_indexed.inc();
                } else {
                    self.metrics.files_skipped.inc();
                }
                progress.visit();
                Some(index)
            })
            .collect();
        if self.should_stop() {
            return self.cancelled();
        }

        let lookup = build_lookup(indexes);
        let files_indexed = lookup.file_count();
        debug!(
            "Scan #{}: {} files indexed, {} keys with candidates",
            self.control.generation,
            files_indexed,
            lookup.key_count()
        );
        progress.advance(ScanState::Matching);

        let entries_matched = AtomicUsize::new(0);
        let references_found = AtomicUsize::new(0);
        self.entries.par_iter().for_each(|entry| {
            if self.should_stop() {
                return;
            }
            let references = self.find_references(entry.as_ref(), &lookup);
            if self.should_stop() {
                return;
            }
            let found = references.len();
            if entry
                .code_references()
                .publish(self.control.generation, references)
            {
                entries_matched.fetch_add(1, Ordering::Relaxed);
                references_found.fetch_add(found, Ordering::Relaxed);
                self.metrics.entries_matched.inc();
                self.metrics.references_found.inc_by(found as u64);
            }
            progress.visit();
        });
        if self.should_stop() {
            return self.cancelled();
        }

        progress.advance(ScanState::Idle);
        let summary = ScanSummary {
            files_indexed,
            files_skipped: self.files.len() - files_indexed,
            entries_matched: entries_matched.into_inner(),
            references_found: references_found.into_inner(),
            elapsed: started.elapsed(),
        };
        info!(
            "Scan #{} finished in {:.2}s: {} references for {} entries",
            self.control.generation,
            summary.elapsed.as_secs_f64(),
            summary.references_found,
            summary.entries_matched
        );
        ScanOutcome::Completed(summary)
    }

    /// References to one entry, in file then line order. For each candidate
    /// line the first applicable rule that matches wins.
    fn find_references(&self, entry: &dyn ResourceEntry, lookup: &KeyLookup) -> Vec<CodeReference> {
        let key = entry.key();
        let container = entry.container_base_name();
        let mut matchers: HashMap<RuleId, Option<LineMatcher>> = HashMap::new();
        let mut references = Vec::new();

        for index in lookup.candidates(key) {
            for line_index in index.lines_for(key) {
                if self.should_stop() {
                    return references;
                }
                let Some(line) = index.line(line_index) else {
                    continue;
                };
                for &rule_id in &index.applicable_rules {
                    let matcher = matchers.entry(rule_id).or_insert_with(|| {
                        self.compile(rule_id, container, key, index, line_index)
                    });
                    let Some(matcher) = matcher else {
                        continue;
                    };
                    let outcome = matcher.match_line(line);
                    if outcome.success {
                        references.push(CodeReference {
                            file: Arc::clone(&index.file),
                            line_number: line_index + 1,
                            segments: outcome.segments,
                        });
                        break;
                    }
                }
            }
        }

        references
    }

    fn compile(
        &self,
        rule_id: RuleId,
        container: &str,
        key: &str,
        index: &FileIndex,
        line_index: usize,
    ) -> Option<LineMatcher> {
        let rule = self.rules.rule(rule_id);
        match LineMatcher::with_size_limit(rule, container, key, self.regex_size_limit) {
            Ok(matcher) => Some(matcher),
            Err(e) => {
                error!(
                    "{}:{}: rule '{}' skipped for key '{}.{}': {}",
                    index.file.path().display(),
                    line_index + 1,
                    rule,
                    container,
                    key,
                    e
                );
                self.metrics.template_errors.inc();
                None
            }
        }
    }
}
