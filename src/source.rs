//! Source files handed to the tracker.
use crate::config::ScanConfig;
use crate::rules::normalize_extension;
use crate::walker::walk_files;
use log::{debug, warn};
use memchr::memchr2;
use std::fs;
use std::path::{Path, PathBuf};

const UTF8_BOM: char = '\u{feff}';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceFile {
    path: PathBuf,
    extension: String,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(normalize_extension)
            .unwrap_or_default();
        Self { path, extension }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lowercased, dot-prefixed extension; empty when the file has none.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Reads the whole file. Never fails: unreadable files are logged and
    /// yield no lines.
    pub fn read_all_lines(&self) -> Vec<String> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let text = text.strip_prefix(UTF8_BOM).unwrap_or(text.as_ref());
                split_lines(text)
            }
            Err(e) => {
                warn!("Cannot read {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    /// Generated code-behind such as `Resources.Designer.cs`.
    pub fn is_designer_file(&self) -> bool {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|stem| stem.to_lowercase().ends_with(".designer"))
    }

    pub fn is_resource_file(&self, resource_extensions: &[String]) -> bool {
        !self.extension.is_empty()
            && resource_extensions
                .iter()
                .filter_map(|e| normalize_extension(e))
                .any(|e| e == self.extension)
    }
}

/// Splits on `\r\n`, `\n` and a lone `\r`. A trailing terminator does not
/// start another line.
fn split_lines(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    while start < bytes.len() {
        let Some(offset) = memchr2(b'\r', b'\n', &bytes[start..]) else {
            lines.push(text[start..].to_string());
            break;
        };
        let end = start + offset;
        lines.push(text[start..end].to_string());
        start = if bytes[end] == b'\r' && bytes.get(end + 1) == Some(&b'\n') {
            end + 2
        } else {
            end + 1
        };
    }
    lines
}

/// Whether the tracker should look at `file` at all.
pub fn is_scannable(file: &SourceFile, config: &ScanConfig) -> bool {
    if config.exclude_designer_files && file.is_designer_file() {
        return false;
    }
    !file.is_resource_file(&config.resource_extensions)
}

/// Collects the source files below `root`, sorted by path.
pub fn discover_source_files(root: &Path, config: &ScanConfig) -> Vec<SourceFile> {
    let mut files: Vec<SourceFile> =
        walk_files(root, config.respect_gitignore, config.include_hidden)
            .map(SourceFile::new)
            .filter(|file| {
                let keep = is_scannable(file, config);
                if !keep {
                    debug!("Skipping generated or resource file: {}", file.path.display());
                }
                keep
            })
            .collect();
    files.sort();
    debug!("Discovered {} source files under {}", files.len(), root.display());
    files
}
