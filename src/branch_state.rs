//! Branch state: a per-branch snapshot of uncommitted work, auto-saved and
//! restored across branch switches.

use std::collections::HashSet;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::BranchStateConfig;
use crate::errors::GitError;
use crate::internal::workdir::{self, WorkdirStatus};
use crate::utils::{base64_decode, base64_encode};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotFile {
    pub path: String,
    pub base64_bytes: String,
    pub mode: String,
    pub mtime: u64,
    pub is_staged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchSnapshot {
    pub branch: String,
    pub saved_at: i64,
    pub files: Vec<SnapshotFile>,
    pub staged_paths: Vec<String>,
    pub message: Option<String>,
}

/// Result of `on_branch_switch`: what was saved from the old branch and
/// what was restored onto the new one, if anything.
#[derive(Debug, Clone, Default)]
pub struct SwitchResult {
    pub saved_from: bool,
    pub restored_to: bool,
}

fn sanitize_branch_name(branch: &str) -> String {
    branch
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

#[cfg(unix)]
fn file_mode_string(metadata: &fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:o}", metadata.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn file_mode_string(_metadata: &fs::Metadata) -> String {
    "644".to_string()
}

fn compress(data: &[u8]) -> Result<Vec<u8>, GitError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, GitError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| GitError::Corrupt(format!("failed to inflate branch state: {e}")))?;
    Ok(out)
}

/// `<repo>/branch-states/`: snapshot-per-branch plus a bounded history ring
/// alongside each.
pub struct BranchStateStore {
    root: PathBuf,
    config: BranchStateConfig,
}

impl BranchStateStore {
    pub fn new(repo_root: &Path, config: BranchStateConfig) -> BranchStateStore {
        BranchStateStore { root: repo_root.join("branch-states"), config }
    }

    fn snapshot_path(&self, branch: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_branch_name(branch)))
    }

    fn history_path(&self, branch: &str) -> PathBuf {
        self.root.join(format!("{}.history.json", sanitize_branch_name(branch)))
    }

    /// Walks the working tree (respecting ignore rules), captures every
    /// modified, staged, or untracked file's bytes/mode/mtime, and writes a
    /// compressed snapshot.
    #[instrument(skip(self, index))]
    pub fn save(
        &self,
        branch: &str,
        repo_root: &Path,
        index: &crate::internal::index::Index,
        staged_paths: &[String],
        message: Option<&str>,
    ) -> Result<BranchSnapshot, GitError> {
        let staged: HashSet<&str> = staged_paths.iter().map(|s| s.as_str()).collect();
        let entries = workdir::walk(repo_root, index)?;

        let mut files = Vec::new();
        for entry in &entries {
            if entry.status == WorkdirStatus::Unchanged {
                continue;
            }
            let full_path = repo_root.join(&entry.path);
            let (bytes, mtime, mode) = match entry.status {
                WorkdirStatus::Deleted => (Vec::new(), 0, "000644".to_string()),
                _ => {
                    let bytes = fs::read(&full_path)?;
                    let metadata = fs::metadata(&full_path)?;
                    let mtime = metadata
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| d.as_secs())
                        .unwrap_or(0);
                    (bytes, mtime, file_mode_string(&metadata))
                }
            };
            files.push(SnapshotFile {
                path: entry.path.clone(),
                base64_bytes: base64_encode(&bytes),
                mode,
                mtime,
                is_staged: staged.contains(entry.path.as_str()),
            });
        }

        let snapshot = BranchSnapshot {
            branch: branch.to_string(),
            saved_at: chrono::Utc::now().timestamp(),
            files,
            staged_paths: staged_paths.to_vec(),
            message: message.map(str::to_string),
        };

        self.write_snapshot(branch, &snapshot)?;
        self.push_history(branch, &snapshot)?;
        Ok(snapshot)
    }

    fn write_snapshot(&self, branch: &str, snapshot: &BranchSnapshot) -> Result<(), GitError> {
        fs::create_dir_all(&self.root)?;
        let json = serde_json::to_vec(snapshot)
            .map_err(|e| GitError::Corrupt(format!("failed to serialize branch state: {e}")))?;
        fs::write(self.snapshot_path(branch), compress(&json)?)?;
        Ok(())
    }

    fn push_history(&self, branch: &str, snapshot: &BranchSnapshot) -> Result<(), GitError> {
        let mut history = self.history(branch)?;
        history.insert(0, snapshot.clone());
        history.truncate(self.config.max_states);
        let json = serde_json::to_vec(&history)
            .map_err(|e| GitError::Corrupt(format!("failed to serialize branch state history: {e}")))?;
        fs::write(self.history_path(branch), compress(&json)?)?;
        Ok(())
    }

    /// The bounded history ring for `branch`, newest first.
    pub fn history(&self, branch: &str) -> Result<Vec<BranchSnapshot>, GitError> {
        let path = self.history_path(branch);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let compressed = fs::read(&path)?;
        let json = decompress(&compressed)?;
        serde_json::from_slice(&json)
            .map_err(|e| GitError::Corrupt(format!("malformed branch state history: {e}")))
    }

    /// Loads the current snapshot for `branch`, if one was ever saved.
    pub fn load(&self, branch: &str) -> Result<Option<BranchSnapshot>, GitError> {
        let path = self.snapshot_path(branch);
        if !path.is_file() {
            return Ok(None);
        }
        let compressed = fs::read(&path)?;
        let json = decompress(&compressed)?;
        let snapshot = serde_json::from_slice(&json)
            .map_err(|e| GitError::Corrupt(format!("malformed branch state: {e}")))?;
        Ok(Some(snapshot))
    }

    /// Decompresses and materializes `branch`'s snapshot into the working
    /// tree, returning the paths that were staged at save time so the
    /// caller can re-stage them.
    #[instrument(skip(self))]
    pub fn restore(&self, branch: &str, repo_root: &Path) -> Result<Option<BranchSnapshot>, GitError> {
        let Some(snapshot) = self.load(branch)? else {
            return Ok(None);
        };

        for file in &snapshot.files {
            let full_path = repo_root.join(&file.path);
            if file.base64_bytes.is_empty() && file.mode == "000644" {
                let _ = fs::remove_file(&full_path);
                continue;
            }
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let bytes = base64_decode(&file.base64_bytes)
                .map_err(|e| GitError::Corrupt(format!("malformed branch state file bytes: {e}")))?;
            fs::write(&full_path, bytes)?;
        }

        Ok(Some(snapshot))
    }

    /// Removes a branch's current snapshot and history, on explicit user
    /// action or when the branch itself is deleted.
    pub fn remove(&self, branch: &str) -> Result<(), GitError> {
        let _ = fs::remove_file(self.snapshot_path(branch));
        let _ = fs::remove_file(self.history_path(branch));
        Ok(())
    }

    /// Performs the save-then-restore dance when switching branches, gated
    /// by `auto_save`/`auto_restore`.
    #[instrument(skip(self, index))]
    pub fn on_branch_switch(
        &self,
        from: &str,
        to: &str,
        repo_root: &Path,
        index: &crate::internal::index::Index,
        staged_paths: &[String],
        dirty: bool,
    ) -> Result<SwitchResult, GitError> {
        let mut result = SwitchResult::default();

        if dirty && self.config.auto_save {
            self.save(from, repo_root, index, staged_paths, Some("auto-save on branch switch"))?;
            result.saved_from = true;
        }

        if self.config.auto_restore && self.load(to)?.is_some() {
            self.restore(to, repo_root)?;
            result.restored_to = true;
        }

        Ok(result)
    }
}
