//! Repository configuration: the closed enumerations and tunable thresholds
//! Design Notes §9 calls for in place of dynamic config objects, loaded
//! from `<repo>/config.json` with documented defaults when absent
//! (`SPEC_FULL.md` §C).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::HashKind;

/// Rename-detection tuning.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct RenameConfig {
    pub enabled: bool,
    pub threshold: f64,
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.5,
        }
    }
}

/// Large-file chunker thresholds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ChunkConfig {
    /// Blobs at or below this size bypass the chunker entirely.
    pub threshold_bytes: u64,
    /// Fixed chunk boundary size.
    pub chunk_size_bytes: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: 2 * 1024 * 1024,
            chunk_size_bytes: 1024 * 1024,
        }
    }
}

/// Branch-state snapshot tuning (spec §4.11, Design Notes §9
/// `branch-state config`).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BranchStateConfig {
    pub auto_save: bool,
    pub auto_restore: bool,
    pub max_states: usize,
}

impl Default for BranchStateConfig {
    fn default() -> Self {
        Self {
            auto_save: true,
            auto_restore: true,
            max_states: 5,
        }
    }
}

/// Per-hook timeout and enable flags.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct HookConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 30,
        }
    }
}

/// Merge-queue conflict-prediction weights, kept in one table so they can
/// be tuned on real corpora without touching the scoring code.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct QueueWeights {
    /// Weight for a file touched directly by both PRs.
    pub direct_overlap: f64,
    /// Weight for a shared "conflict area" file (lockfile, migration, etc).
    pub conflict_area_overlap: f64,
    /// Weight for PRs touching a common directory without a shared file.
    pub directory_overlap: f64,
    /// Normalization divisor applied to the weighted sum before clamping
    /// to `[0, 1]`.
    pub normalization: f64,
    /// Probability above which a pair is flagged `manual_required`.
    pub manual_required_threshold: f64,
}

impl Default for QueueWeights {
    fn default() -> Self {
        Self {
            direct_overlap: 20.0,
            conflict_area_overlap: 30.0,
            directory_overlap: 2.0,
            normalization: 100.0,
            manual_required_threshold: 0.7,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RepoConfig {
    pub hash_kind: HashKind,
    pub rename: RenameConfig,
    pub chunk: ChunkConfig,
    pub branch_state: BranchStateConfig,
    pub hooks: HookConfig,
    pub queue_weights: QueueWeights,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            hash_kind: HashKind::default(),
            rename: RenameConfig::default(),
            chunk: ChunkConfig::default(),
            branch_state: BranchStateConfig::default(),
            hooks: HookConfig::default(),
            queue_weights: QueueWeights::default(),
        }
    }
}

impl RepoConfig {
    pub const FILE_NAME: &'static str = "config.json";

    pub fn path_for(repo_root: &Path) -> PathBuf {
        repo_root.join(Self::FILE_NAME)
    }

    /// Loads `<repo>/config.json`, falling back to defaults when the file
    /// is absent (not when it exists but is malformed — that is `Corrupt`).
    pub fn load(repo_root: &Path) -> Result<RepoConfig, GitError> {
        let path = Self::path_for(repo_root);
        if !path.exists() {
            return Ok(RepoConfig::default());
        }
        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text)
            .map_err(|e| GitError::Corrupt(format!("malformed config.json: {e}")))
    }

    pub fn save(&self, repo_root: &Path) -> Result<(), GitError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| GitError::Corrupt(format!("failed to serialize config: {e}")))?;
        std::fs::write(Self::path_for(repo_root), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_without_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = RepoConfig::load(dir.path()).unwrap();
        assert_eq!(config, RepoConfig::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let mut config = RepoConfig::default();
        config.rename.threshold = 0.75;
        config.save(dir.path()).unwrap();

        let loaded = RepoConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn malformed_config_is_corrupt_not_default() {
        let dir = tempdir().unwrap();
        std::fs::write(RepoConfig::path_for(dir.path()), "not json").unwrap();
        let err = RepoConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, GitError::Corrupt(_)));
    }
}
