//! Working-tree walker: enumerates the working directory against the
//! index, honoring `.gitignore`/`.witignore` plus baked-in ignores, and
//! classifies every path.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use memchr::memchr;

use crate::errors::GitError;
use crate::internal::index::Index;

/// Directories always ignored regardless of `.gitignore`/`.witignore`
/// content (`SPEC_FULL.md` §E: "applied first and are not overridable").
const BAKED_IN_IGNORES: &[&str] = &[".wit", ".git", "node_modules"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkdirStatus {
    Unchanged,
    Modified,
    Deleted,
    Untracked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkdirEntry {
    pub path: String,
    pub status: WorkdirStatus,
}

/// Walks `repo_root`, classifying each tracked path as
/// `unchanged|modified|deleted` and each untracked path as `untracked`.
///
/// Ignore precedence (`SPEC_FULL.md` §E): baked-in patterns apply first and
/// cannot be overridden; `.gitignore` is read per directory, then
/// `.witignore` entries for the same directory are applied after it (so a
/// `.witignore` re-include can override a `.gitignore` exclude).
pub fn walk(repo_root: &Path, index: &Index) -> Result<Vec<WorkdirEntry>, GitError> {
    let mut seen = std::collections::HashSet::new();
    let mut entries = Vec::new();

    let walker = WalkBuilder::new(repo_root)
        .hidden(false)
        .git_ignore(false)
        .git_exclude(false)
        .add_custom_ignore_filename(".gitignore")
        .add_custom_ignore_filename(".witignore")
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !BAKED_IN_IGNORES.contains(&name.as_ref())
        })
        .build();

    for result in walker {
        let dir_entry = match result {
            Ok(e) => e,
            Err(_) => continue,
        };
        if dir_entry.file_type().is_none_or(|ft| ft.is_dir()) {
            continue;
        }
        let relative = match dir_entry.path().strip_prefix(repo_root) {
            Ok(p) => crate::internal::index::normalize_path(p),
            Err(_) => continue,
        };
        seen.insert(relative.clone());

        let status = match index.get(&relative) {
            None => WorkdirStatus::Untracked,
            Some(_) => {
                if index.is_modified(&relative, repo_root)? {
                    WorkdirStatus::Modified
                } else {
                    WorkdirStatus::Unchanged
                }
            }
        };
        entries.push(WorkdirEntry { path: relative, status });
    }

    for (path, _) in index.get_all() {
        if !seen.contains(path) {
            entries.push(WorkdirEntry {
                path: path.to_string(),
                status: WorkdirStatus::Deleted,
            });
        }
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Binary detection: a NUL byte anywhere in the first 8 KiB.
pub fn looks_binary(data: &[u8]) -> bool {
    let probe_len = data.len().min(8 * 1024);
    memchr(0x00, &data[..probe_len]).is_some()
}

/// Absolute path of an entry under `repo_root`, convenience for callers
/// that need to open the file directly.
pub fn absolute_path(repo_root: &Path, relative: &str) -> PathBuf {
    repo_root.join(relative)
}
