//! The stash: a named, ordered stack of working-tree/index snapshots a
//! caller can set aside and reapply later.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::errors::GitError;
use crate::internal::workdir::{self, WorkdirStatus};
use crate::utils::{base64_decode, base64_encode};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StashedFile {
    pub path: String,
    pub base64_bytes: String,
    pub was_staged: bool,
    pub was_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StashEntry {
    pub message: String,
    pub base_commit: Option<String>,
    pub branch: String,
    pub files: Vec<StashedFile>,
    pub created_at: i64,
}

/// `<repo>/stash.json`: a LIFO stack, index 0 is the most recently pushed
/// entry.
pub struct StashStore {
    path: PathBuf,
}

impl StashStore {
    pub const FILE_NAME: &'static str = "stash.json";

    pub fn new(repo_root: &Path) -> StashStore {
        StashStore { path: repo_root.join(Self::FILE_NAME) }
    }

    fn read_stack(&self) -> Result<Vec<StashEntry>, GitError> {
        if !self.path.is_file() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).map_err(|e| GitError::Corrupt(format!("malformed stash: {e}")))
    }

    fn write_stack(&self, stack: &[StashEntry]) -> Result<(), GitError> {
        let json = serde_json::to_string_pretty(stack)
            .map_err(|e| GitError::Corrupt(format!("failed to serialize stash: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Snapshots every modified/untracked/deleted path in the working tree
    /// and pushes it onto the stack.
    #[instrument(skip(self, index))]
    pub fn save(
        &self,
        repo_root: &Path,
        index: &crate::internal::index::Index,
        branch: &str,
        base_commit: Option<&str>,
        staged_paths: &[String],
        message: Option<&str>,
    ) -> Result<StashEntry, GitError> {
        let staged: std::collections::HashSet<&str> =
            staged_paths.iter().map(|s| s.as_str()).collect();
        let entries = workdir::walk(repo_root, index)?;

        let mut files = Vec::new();
        for entry in &entries {
            if entry.status == WorkdirStatus::Unchanged {
                continue;
            }
            let was_deleted = entry.status == WorkdirStatus::Deleted;
            let bytes = if was_deleted {
                Vec::new()
            } else {
                fs::read(repo_root.join(&entry.path))?
            };
            files.push(StashedFile {
                path: entry.path.clone(),
                base64_bytes: base64_encode(&bytes),
                was_staged: staged.contains(entry.path.as_str()),
                was_deleted,
            });
        }

        if files.is_empty() {
            return Err(GitError::InvalidArgument("nothing to stash: working tree is clean".to_string()));
        }

        let stash = StashEntry {
            message: message.unwrap_or("WIP").to_string(),
            base_commit: base_commit.map(str::to_string),
            branch: branch.to_string(),
            files,
            created_at: chrono::Utc::now().timestamp(),
        };

        let mut stack = self.read_stack()?;
        stack.insert(0, stash.clone());
        self.write_stack(&stack)?;
        Ok(stash)
    }

    /// Every stash, newest first.
    pub fn list(&self) -> Result<Vec<StashEntry>, GitError> {
        self.read_stack()
    }

    /// A single stash's file diffs without removing it.
    pub fn show(&self, index: usize) -> Result<StashEntry, GitError> {
        self.read_stack()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| GitError::NotFound(format!("stash@{{{index}}}")))
    }

    fn materialize(entry: &StashEntry, repo_root: &Path) -> Result<(), GitError> {
        for file in &entry.files {
            let full_path = repo_root.join(&file.path);
            if file.was_deleted {
                let _ = fs::remove_file(&full_path);
                continue;
            }
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let bytes = base64_decode(&file.base64_bytes)
                .map_err(|e| GitError::Corrupt(format!("malformed stash file bytes: {e}")))?;
            fs::write(&full_path, bytes)?;
        }
        Ok(())
    }

    /// Writes `stash@{index}`'s files back into the working tree without
    /// removing it from the stack.
    #[instrument(skip(self))]
    pub fn apply(&self, index: usize, repo_root: &Path) -> Result<StashEntry, GitError> {
        let entry = self.show(index)?;
        Self::materialize(&entry, repo_root)?;
        Ok(entry)
    }

    /// `apply` followed by removing the entry from the stack (spec §4.14
    /// `pop`).
    #[instrument(skip(self))]
    pub fn pop(&self, index: usize, repo_root: &Path) -> Result<StashEntry, GitError> {
        let entry = self.apply(index, repo_root)?;
        let mut stack = self.read_stack()?;
        if index >= stack.len() {
            return Err(GitError::NotFound(format!("stash@{{{index}}}")));
        }
        stack.remove(index);
        self.write_stack(&stack)?;
        Ok(entry)
    }

    /// Removes `stash@{index}` without touching the working tree.
    pub fn drop_entry(&self, index: usize) -> Result<StashEntry, GitError> {
        let mut stack = self.read_stack()?;
        if index >= stack.len() {
            return Err(GitError::NotFound(format!("stash@{{{index}}}")));
        }
        let entry = stack.remove(index);
        self.write_stack(&stack)?;
        Ok(entry)
    }

    /// Empties the stack entirely.
    pub fn clear(&self) -> Result<(), GitError> {
        self.write_stack(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::index::Index;
    use tempfile::tempdir;

    #[test]
    fn save_pop_round_trips_and_removes_entry() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"dirty").unwrap();
        let store = StashStore::new(dir.path());
        let index = Index::new();

        store
            .save(dir.path(), &index, "main", Some("abc123"), &[], Some("wip work"))
            .unwrap();
        assert_eq!(store.list().unwrap().len(), 1);

        fs::write(dir.path().join("a.txt"), b"clean").unwrap();
        let popped = store.pop(0, dir.path()).unwrap();
        assert_eq!(popped.message, "wip work");
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"dirty");
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn apply_keeps_entry_on_stack() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"dirty").unwrap();
        let store = StashStore::new(dir.path());
        let index = Index::new();
        store.save(dir.path(), &index, "main", None, &[], None).unwrap();

        store.apply(0, dir.path()).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn stack_is_lifo() {
        let dir = tempdir().unwrap();
        let store = StashStore::new(dir.path());
        let index = Index::new();

        fs::write(dir.path().join("a.txt"), b"first").unwrap();
        store.save(dir.path(), &index, "main", None, &[], Some("first")).unwrap();
        fs::write(dir.path().join("a.txt"), b"second").unwrap();
        store.save(dir.path(), &index, "main", None, &[], Some("second")).unwrap();

        let stack = store.list().unwrap();
        assert_eq!(stack[0].message, "second");
        assert_eq!(stack[1].message, "first");
    }

    #[test]
    fn saving_clean_tree_is_an_error() {
        let dir = tempdir().unwrap();
        let store = StashStore::new(dir.path());
        let index = Index::new();
        let err = store.save(dir.path(), &index, "main", None, &[], None).unwrap_err();
        assert!(matches!(err, GitError::InvalidArgument(_)));
    }

    #[test]
    fn drop_entry_does_not_touch_working_tree() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"dirty").unwrap();
        let store = StashStore::new(dir.path());
        let index = Index::new();
        store.save(dir.path(), &index, "main", None, &[], None).unwrap();

        store.drop_entry(0).unwrap();
        assert!(store.list().unwrap().is_empty());
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"dirty");
    }

    #[test]
    fn clear_empties_stack() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"dirty").unwrap();
        let store = StashStore::new(dir.path());
        let index = Index::new();
        store.save(dir.path(), &index, "main", None, &[], None).unwrap();
        store.clear().unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
