//! Per-file token index and the key to candidate-file lookup built from it.
//!
//! Indexing turns "every key against every line of every file" into one
//! tokenizing pass per file plus hash lookups: a line is only handed to the
//! matcher for a key when it contains that key's probe token.
use crate::rules::{MatchRuleSet, RuleId};
use crate::source::SourceFile;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Splits on runs of `[^A-Za-z0-9_]`.
pub fn tokenize(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| !is_word_char(c))
        .filter(|token| !token.is_empty())
}

/// Token a key is indexed under: the key itself when it is one word token,
/// otherwise its longest word token.
pub fn probe_token(key: &str) -> Option<&str> {
    tokenize(key).fold(None, |best: Option<&str>, token| match best {
        Some(b) if b.len() >= token.len() => Some(b),
        _ => Some(token),
    })
}

/// All keys being searched, reachable from their probe token.
#[derive(Debug, Default)]
pub struct CandidateKeys {
    exact: HashMap<String, Vec<Arc<str>>>,
    folded: HashMap<String, Vec<Arc<str>>>,
    len: usize,
}

impl CandidateKeys {
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut candidates = Self::default();
        let distinct: BTreeSet<&str> = keys.into_iter().collect();

        for key in distinct {
            let Some(probe) = probe_token(key) else {
                log::debug!("Key {key:?} has no word characters and cannot be indexed");
                continue;
            };
            let key: Arc<str> = Arc::from(key);
            candidates
                .exact
                .entry(probe.to_string())
                .or_default()
                .push(Arc::clone(&key));
            candidates
                .folded
                .entry(probe.to_lowercase())
                .or_default()
                .push(key);
            candidates.len += 1;
        }
        candidates
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn keys_for(&self, token: &str, ignore_case: bool) -> Option<&[Arc<str>]> {
        if ignore_case {
            self.folded.get(&token.to_lowercase()).map(Vec::as_slice)
        } else {
            self.exact.get(token).map(Vec::as_slice)
        }
    }
}

/// Index of one source file, alive for a single scan.
#[derive(Debug)]
pub struct FileIndex {
    pub file: Arc<SourceFile>,
    pub applicable_rules: Vec<RuleId>,
    lines: Vec<String>,
    key_to_lines: HashMap<Arc<str>, BTreeSet<usize>>,
}

impl FileIndex {
    /// False when no rule covers the file's extension; such files are
    /// never read.
    pub fn is_applicable(&self) -> bool {
        !self.applicable_rules.is_empty()
    }

    /// 0-based indexes of the lines that may reference `key`, ascending.
    pub fn lines_for(&self, key: &str) -> impl Iterator<Item = usize> + '_ {
        self.key_to_lines
            .get(key)
            .into_iter()
            .flat_map(|lines| lines.iter().copied())
    }

    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Arc<str>> {
        self.key_to_lines.keys()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.key_to_lines.contains_key(key)
    }
}

/// Builds the index for one file. Files without applicable rules come back
/// empty and unread; unreadable files come back with zero lines.
pub fn index_file(
    file: Arc<SourceFile>,
    rules: &MatchRuleSet,
    candidates: &CandidateKeys,
) -> FileIndex {
    index_file_until(file, rules, candidates, || false)
}

/// Like [`index_file`], but polls `should_stop` between lines and returns
/// the partial index once it answers true.
pub fn index_file_until(
    file: Arc<SourceFile>,
    rules: &MatchRuleSet,
    candidates: &CandidateKeys,
    should_stop: impl Fn() -> bool,
) -> FileIndex {
    let applicable_rules = rules.rule_ids_for(file.extension()).to_vec();
    if applicable_rules.is_empty() {
        return FileIndex {
            file,
            applicable_rules,
            lines: Vec::new(),
            key_to_lines: HashMap::new(),
        };
    }

    let ignore_case = applicable_rules
        .iter()
        .any(|&id| !rules.rule(id).case_sensitive);
    let lines = file.read_all_lines();
    let mut key_to_lines: HashMap<Arc<str>, BTreeSet<usize>> = HashMap::new();

    for (line_index, line) in lines.iter().enumerate() {
        if should_stop() {
            break;
        }
        for token in tokenize(line) {
            let exact = candidates.keys_for(token, false).unwrap_or(&[]);
            let folded: &[Arc<str>] = if ignore_case {
                candidates.keys_for(token, true).unwrap_or(&[])
            } else {
                &[]
            };
            for key in exact.iter().chain(folded) {
                key_to_lines
                    .entry(Arc::clone(key))
                    .or_default()
                    .insert(line_index);
            }
        }
    }

    FileIndex {
        file,
        applicable_rules,
        lines,
        key_to_lines,
    }
}

/// Key to candidate files. Built once after every file is indexed and read
/// only afterwards.
#[derive(Debug, Default)]
pub struct KeyLookup {
    files: Vec<FileIndex>,
    by_key: HashMap<Arc<str>, Vec<usize>>,
}

impl KeyLookup {
    /// Files that may reference `key`, in the order they were indexed.
    pub fn candidates<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a FileIndex> + 'a {
        self.by_key
            .get(key)
            .into_iter()
            .flat_map(move |ids| ids.iter().map(move |&id| &self.files[id]))
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }
}

/// Aggregates file indexes into the lookup. Inapplicable indexes are
/// dropped.
pub fn build_lookup(indexes: Vec<FileIndex>) -> KeyLookup {
    let files: Vec<FileIndex> = indexes
        .into_iter()
        .filter(FileIndex::is_applicable)
        .collect();
    let mut by_key: HashMap<Arc<str>, Vec<usize>> = HashMap::new();

    for (id, index) in files.iter().enumerate() {
        for key in index.keys() {
            by_key.entry(Arc::clone(key)).or_default().push(id);
        }
    }

    KeyLookup { files, by_key }
}
