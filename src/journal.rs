//! The journal: an append-only, structured log of high-level operations,
//! distinct from the low-level per-ref reflog in `internal::refs` (spec
//! §4.12). It exists for a human operator to review what happened and,
//! where the recorded state allows it, to undo it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::GitError;
use crate::hash::ObjectHash;

/// One high-level operation the engine performed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Operation name, e.g. `"commit"`, `"merge"`, `"checkout"`, `"rebase"`.
    pub op: String,
    pub args: Value,
    /// Ref values (or other identifying state) before the operation ran.
    pub before_state: Value,
    /// Ref values (or other identifying state) after the operation ran.
    pub after_state: Value,
    pub metadata: Value,
    pub timestamp: i64,
}

/// Append-only log of [`JournalEntry`] values, one JSON object per line,
/// rooted at `<repo>/journal.log`.
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub const FILE_NAME: &'static str = "journal.log";

    pub fn new(repo_root: &Path) -> Journal {
        Journal { path: repo_root.join(Self::FILE_NAME) }
    }

    /// Appends `entry` to the journal. Journaling is best-effort
    /// bookkeeping for the human operator, not part of the linearizable
    /// ref transaction — callers record after the mutating
    /// operation's ref CAS has already succeeded.
    pub fn record(&self, entry: &JournalEntry) -> Result<(), GitError> {
        use std::io::Write;
        let line = serde_json::to_string(entry)
            .map_err(|e| GitError::Corrupt(format!("failed to serialize journal entry: {e}")))?;
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Reads every entry, oldest first.
    pub fn read_all(&self) -> Result<Vec<JournalEntry>, GitError> {
        if !self.path.is_file() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)?;
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                serde_json::from_str(l)
                    .map_err(|e| GitError::Corrupt(format!("malformed journal line: {e}")))
            })
            .collect()
    }

    /// The most recent entry, if any.
    pub fn last(&self) -> Result<Option<JournalEntry>, GitError> {
        Ok(self.read_all()?.into_iter().last())
    }

    /// Entries whose timestamp falls within `[since, until]` inclusive,
    /// supporting the time-range queries spec §4.12 calls for.
    pub fn query_range(&self, since: i64, until: i64) -> Result<Vec<JournalEntry>, GitError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.timestamp >= since && e.timestamp <= until)
            .collect())
    }
}

/// Convenience builder for a ref-mutating operation's before/after state,
/// the shape every `commit`/`merge`/`checkout`/`rebase` entry uses.
pub fn ref_state(branch: Option<&str>, hash: Option<ObjectHash>) -> Value {
    serde_json::json!({
        "branch": branch,
        "hash": hash.map(|h| h.to_string()),
    })
}
