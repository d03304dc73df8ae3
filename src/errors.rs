//! Error types for the witrs engine.
//!
//! This module defines a unified error enumeration used across object
//! storage, the index, refs, diff/merge, the merge queue, branch state,
//! hooks, and the ACL layer. It integrates with `thiserror` to provide rich
//! `Display` implementations and error source chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - Variants follow a fixed taxonomy: NotFound, AlreadyExists,
//!   InvalidArgument, Conflict, Corrupt, Io, PermissionDenied, HookFailed,
//!   Cancelled.
//! - Every error additionally exposes zero or more `Hint`s via
//!   `GitError::hints`, actionable next steps a CLI can render; formatting
//!   itself stays the CLI's responsibility, not the engine's.

use std::path::PathBuf;

use thiserror::Error;

/// A short, actionable next step attached to an error.
pub type Hint = String;

/// Per-file detail for a merge/cherry-pick conflict.
#[derive(Debug, Clone)]
pub struct ConflictFile {
    pub path: PathBuf,
    pub kind: ConflictKind,
    pub ours: Option<String>,
    pub theirs: Option<String>,
    pub base: Option<String>,
}

/// The shape of a single-file conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Both sides changed overlapping lines.
    ContentDivergence,
    /// One side deleted the file, the other modified it.
    ModifyDelete,
    /// One or both sides renamed the path.
    RenameConflict,
    /// A safe-mode checkout would overwrite untracked or modified work.
    WorkingTreeClobber,
}

#[derive(Error, Debug)]
/// Unified error enumeration for the witrs engine.
///
/// Implements `std::error::Error` via `thiserror`. The engine never aborts
/// the process — every fallible operation returns one of these variants
/// instead, and callers see typed values rather than exceptions.
pub enum GitError {
    /// Unknown ref, unknown object, or missing path.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate branch/tag, or re-init of an existing repository.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed ref name, bad hash, empty commit message, or similar.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A ref compare-and-set lost the race: the ref moved since it was read.
    #[error("ref `{name}` moved: expected {expected}, found {actual}")]
    RefMoved {
        name: String,
        expected: String,
        actual: String,
    },

    /// Merge, cherry-pick, or rebase conflict with structured per-file detail.
    #[error("conflict in {} file(s)", .files.len())]
    Conflict { files: Vec<ConflictFile> },

    /// Deleting the branch HEAD currently points at.
    #[error("cannot delete the currently checked out branch `{0}`")]
    DeleteOfCurrentBranch(String),

    /// Object decompress/parse failure, hash mismatch, or truncated index.
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// Filesystem failure. Transient vs. permanent is distinguished by the
    /// wrapped `io::ErrorKind` where the OS permits.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// ACL rejection. `reason` is the human-readable string; `code` is a
    /// stable short identifier a caller can match on.
    #[error("permission denied ({code}): {reason}")]
    PermissionDenied { reason: String, code: String },

    /// A hook exited non-zero or timed out. `stderr` is whatever the hook
    /// wrote, captured up to a bounded size.
    #[error("hook `{hook}` failed: {stderr}")]
    HookFailed { hook: String, stderr: String },

    /// Cooperative cancellation was observed at a loop head or I/O boundary.
    #[error("operation cancelled")]
    Cancelled,
}

impl GitError {
    /// Stable short kind string, useful for callers that want to branch
    /// on the error category without matching the full enum.
    pub fn kind(&self) -> &'static str {
        match self {
            GitError::NotFound(_) => "not_found",
            GitError::AlreadyExists(_) => "already_exists",
            GitError::InvalidArgument(_) => "invalid_argument",
            GitError::RefMoved { .. } => "ref_moved",
            GitError::Conflict { .. } => "conflict",
            GitError::DeleteOfCurrentBranch(_) => "conflict",
            GitError::Corrupt(_) => "corrupt",
            GitError::Io(_) => "io",
            GitError::PermissionDenied { .. } => "permission_denied",
            GitError::HookFailed { .. } => "hook_failed",
            GitError::Cancelled => "cancelled",
        }
    }

    /// Hints a CLI might render after the message.
    pub fn hints(&self) -> Vec<Hint> {
        match self {
            GitError::RefMoved { name, .. } => {
                vec![format!("re-read `{name}` and retry the operation")]
            }
            GitError::Conflict { .. } => vec![
                "resolve conflict markers in the listed files".into(),
                "stage the resolved files and commit".into(),
            ],
            GitError::DeleteOfCurrentBranch(_) => {
                vec!["switch to another branch first".into()]
            }
            GitError::Corrupt(_) => vec!["run fsck to locate all corrupt objects".into()],
            _ => Vec::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GitError>;
