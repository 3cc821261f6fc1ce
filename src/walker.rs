use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Yields every regular file below `path`. Ignore files (`.gitignore`,
/// `.ignore`, global excludes) are honoured unless `respect_ignore_files`
/// is off; hidden entries are skipped unless `include_hidden` is on.
pub fn walk_files(
    path: &Path,
    respect_ignore_files: bool,
    include_hidden: bool,
) -> impl Iterator<Item = PathBuf> {
    WalkBuilder::new(path)
        .hidden(!include_hidden)
        .git_global(respect_ignore_files)
        .git_ignore(respect_ignore_files)
        .git_exclude(respect_ignore_files)
        .ignore(respect_ignore_files)
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
}
