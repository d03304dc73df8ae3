//! The reference store: branches, tags, and HEAD, plus the append-only
//! reflog. Ref writes are atomic per ref (write-temp +
//! rename); updating a branch appends a reflog line, a failed
//! compare-and-set does not.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, instrument};

use crate::errors::GitError;
use crate::hash::{HashKind, ObjectHash};

const HEADS_DIR: &str = "refs/heads";
const TAGS_DIR: &str = "refs/tags";
const HEAD_FILE: &str = "HEAD";

fn validate_ref_name(name: &str) -> Result<(), GitError> {
    let invalid = name.is_empty()
        || name.contains("..")
        || name.starts_with('/')
        || name.ends_with('/')
        || name.contains(' ')
        || name.contains("@{")
        || name.contains("//")
        || name.chars().any(|c| c.is_control());
    if invalid {
        return Err(GitError::InvalidArgument(format!(
            "`{name}` is not a valid ref name"
        )));
    }
    Ok(())
}

/// Where HEAD currently points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// HEAD is a symbolic ref to a branch (which may or may not yet exist).
    Symbolic(String),
    /// HEAD points directly at a commit hash (detached).
    Detached(ObjectHash),
}

/// One line of a ref's reflog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    pub old_hash: ObjectHash,
    pub new_hash: ObjectHash,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: i64,
    pub timezone: String,
    pub message: String,
}

impl ReflogEntry {
    fn format_line(&self) -> String {
        format!(
            "{} {} {} <{}> {} {}\t{}",
            self.old_hash,
            self.new_hash,
            self.author_name,
            self.author_email,
            self.timestamp,
            self.timezone,
            self.message
        )
    }

    fn parse_line(kind: HashKind, line: &str) -> Result<ReflogEntry, GitError> {
        let bad_line = || GitError::Corrupt(format!("malformed reflog line: `{line}`"));

        let (header, message) = line.split_once('\t').ok_or_else(bad_line)?;
        let hash_len = kind.hex_len();
        if header.len() < 2 * hash_len + 1 {
            return Err(bad_line());
        }
        let old_hash: ObjectHash = header[..hash_len].parse().map_err(|_| bad_line())?;
        let rest = &header[hash_len + 1..];
        let new_hash: ObjectHash = rest[..hash_len].parse().map_err(|_| bad_line())?;
        let rest = rest[hash_len + 1..].trim();

        let email_start = rest.find('<').ok_or_else(bad_line)?;
        let email_end = rest.find('>').ok_or_else(bad_line)?;
        let author_name = rest[..email_start].trim().to_string();
        let author_email = rest[email_start + 1..email_end].to_string();
        let mut tail = rest[email_end + 1..].trim().splitn(2, ' ');
        let timestamp: i64 = tail.next().ok_or_else(bad_line)?.parse().map_err(|_| bad_line())?;
        let timezone = tail.next().unwrap_or("+0000").to_string();

        Ok(ReflogEntry {
            old_hash,
            new_hash,
            author_name,
            author_email,
            timestamp,
            timezone,
            message: message.to_string(),
        })
    }
}

impl fmt::Display for ReflogEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.format_line())
    }
}

/// A relative or absolute point in reflog history, as accepted by
/// `ref@{...}` syntax.
pub enum RefQuery {
    /// `ref@{N}`: the N-th previous value, zero-based, newest first.
    Nth(usize),
    /// `ref@{<unix seconds>}`: newest entry whose timestamp is ≤ target,
    /// else the oldest.
    AtOrBefore(i64),
}

pub struct RefStore {
    root: PathBuf,
}

impl RefStore {
    pub fn new(repo_root: &Path) -> RefStore {
        RefStore {
            root: repo_root.to_path_buf(),
        }
    }

    fn branch_path(&self, name: &str) -> PathBuf {
        self.root.join(HEADS_DIR).join(name)
    }

    fn tag_path(&self, name: &str) -> PathBuf {
        self.root.join(TAGS_DIR).join(name)
    }

    fn reflog_path_for_branch(&self, name: &str) -> PathBuf {
        self.root.join("logs").join(HEADS_DIR).join(name)
    }

    fn reflog_path_for_head(&self) -> PathBuf {
        self.root.join("logs").join(HEAD_FILE)
    }

    fn atomic_write(&self, path: &Path, contents: &str) -> Result<(), GitError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn append_reflog(
        &self,
        path: &Path,
        old_hash: ObjectHash,
        new_hash: ObjectHash,
        author_name: &str,
        author_email: &str,
        message: &str,
    ) -> Result<(), GitError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entry = ReflogEntry {
            old_hash,
            new_hash,
            author_name: author_name.to_string(),
            author_email: author_email.to_string(),
            timestamp: Utc::now().timestamp(),
            timezone: "+0000".to_string(),
            message: message.to_string(),
        };
        use std::io::Write;
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry.format_line())?;
        Ok(())
    }

    /// Resolves a branch or tag name to its hash, or `None` if it doesn't
    /// exist.
    pub fn resolve(&self, name: &str) -> Result<Option<ObjectHash>, GitError> {
        for path in [self.branch_path(name), self.tag_path(name)] {
            if path.is_file() {
                let text = fs::read_to_string(&path)?;
                let hash = text
                    .trim()
                    .parse::<ObjectHash>()
                    .map_err(GitError::Corrupt)?;
                return Ok(Some(hash));
            }
        }
        Ok(None)
    }

    /// Atomically sets a branch ref. If `expected_old_hash` is `Some`, the
    /// update is a compare-and-set against the ref's current value; a
    /// mismatch surfaces `RefMoved` and performs no write.
    #[instrument(skip(self))]
    pub fn set_branch(
        &self,
        name: &str,
        new_hash: ObjectHash,
        expected_old_hash: Option<ObjectHash>,
        author_name: &str,
        author_email: &str,
        message: &str,
    ) -> Result<(), GitError> {
        validate_ref_name(name)?;
        let current = self.resolve_branch(name)?;
        if let Some(expected) = expected_old_hash {
            let actual = current.unwrap_or_else(|| ObjectHash::from_str_zero(expected.kind()));
            if actual != expected {
                return Err(GitError::RefMoved {
                    name: name.to_string(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        self.atomic_write(&self.branch_path(name), &new_hash.to_string())?;
        let old_hash = current.unwrap_or_else(|| {
            ObjectHash::from_str_zero(new_hash.kind())
        });
        self.append_reflog(
            &self.reflog_path_for_branch(name),
            old_hash,
            new_hash,
            author_name,
            author_email,
            message,
        )?;
        debug!(branch = name, %new_hash, "updated branch ref");
        Ok(())
    }

    pub fn resolve_branch(&self, name: &str) -> Result<Option<ObjectHash>, GitError> {
        let path = self.branch_path(name);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        Ok(Some(text.trim().parse().map_err(GitError::Corrupt)?))
    }

    pub fn set_tag(&self, name: &str, hash: ObjectHash) -> Result<(), GitError> {
        validate_ref_name(name)?;
        let path = self.tag_path(name);
        if path.is_file() {
            return Err(GitError::AlreadyExists(format!("tag `{name}` already exists")));
        }
        self.atomic_write(&path, &hash.to_string())
    }

    pub fn delete_branch(&self, name: &str) -> Result<(), GitError> {
        let head = self.get_head()?;
        if let Head::Symbolic(current) = &head {
            if current == name {
                return Err(GitError::DeleteOfCurrentBranch(name.to_string()));
            }
        }
        let path = self.branch_path(name);
        fs::remove_file(&path).map_err(|_| GitError::NotFound(format!("branch `{name}` not found")))?;
        let _ = fs::remove_file(self.reflog_path_for_branch(name));
        Ok(())
    }

    pub fn delete_tag(&self, name: &str) -> Result<(), GitError> {
        let path = self.tag_path(name);
        fs::remove_file(&path).map_err(|_| GitError::NotFound(format!("tag `{name}` not found")))
    }

    pub fn list_branches(&self) -> Result<Vec<String>, GitError> {
        list_names_under(&self.root.join(HEADS_DIR))
    }

    pub fn list_tags(&self) -> Result<Vec<String>, GitError> {
        list_names_under(&self.root.join(TAGS_DIR))
    }

    pub fn get_head(&self) -> Result<Head, GitError> {
        let path = self.root.join(HEAD_FILE);
        let text = fs::read_to_string(&path)
            .map_err(|_| GitError::NotFound("HEAD not found".to_string()))?;
        let text = text.trim();
        if let Some(branch) = text.strip_prefix("ref: refs/heads/") {
            Ok(Head::Symbolic(branch.to_string()))
        } else {
            Ok(Head::Detached(text.parse().map_err(GitError::Corrupt)?))
        }
    }

    pub fn set_head_to_branch(&self, branch: &str) -> Result<(), GitError> {
        self.atomic_write(
            &self.root.join(HEAD_FILE),
            &format!("ref: refs/heads/{branch}"),
        )
    }

    pub fn set_head_detached(&self, hash: ObjectHash) -> Result<(), GitError> {
        self.atomic_write(&self.root.join(HEAD_FILE), &hash.to_string())
    }

    /// Updates HEAD's own reflog, recorded separately from the branch's
    /// reflog (spec §3 "one append-only textual log per ref ... and one
    /// for HEAD").
    pub fn append_head_reflog(
        &self,
        old_hash: ObjectHash,
        new_hash: ObjectHash,
        author_name: &str,
        author_email: &str,
        message: &str,
    ) -> Result<(), GitError> {
        self.append_reflog(
            &self.reflog_path_for_head(),
            old_hash,
            new_hash,
            author_name,
            author_email,
            message,
        )
    }

    fn read_reflog(&self, path: &Path, kind: HashKind) -> Result<Vec<ReflogEntry>, GitError> {
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(path)?;
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| ReflogEntry::parse_line(kind, l))
            .collect()
    }

    pub fn reflog_for_branch(&self, name: &str, kind: HashKind) -> Result<Vec<ReflogEntry>, GitError> {
        self.read_reflog(&self.reflog_path_for_branch(name), kind)
    }

    pub fn reflog_for_head(&self, kind: HashKind) -> Result<Vec<ReflogEntry>, GitError> {
        self.read_reflog(&self.reflog_path_for_head(), kind)
    }

    /// Resolves `ref@{N}` or `ref@{<unix seconds>}` against a branch's
    /// reflog.
    pub fn resolve_at(
        &self,
        name: &str,
        query: RefQuery,
        kind: HashKind,
    ) -> Result<Option<ObjectHash>, GitError> {
        let entries = self.reflog_for_branch(name, kind)?;
        if entries.is_empty() {
            return Ok(None);
        }
        match query {
            RefQuery::Nth(n) => {
                // Newest first: the last entry written is the 0th.
                Ok(entries.iter().rev().nth(n).map(|e| e.new_hash))
            }
            RefQuery::AtOrBefore(target) => {
                let newest_at_or_before = entries
                    .iter()
                    .rev()
                    .find(|e| e.timestamp <= target)
                    .map(|e| e.new_hash);
                Ok(newest_at_or_before.or_else(|| entries.first().map(|e| e.new_hash)))
            }
        }
    }
}

impl ObjectHash {
    fn from_str_zero(kind: HashKind) -> ObjectHash {
        ObjectHash::zero_str(kind).parse().expect("zero hash always parses")
    }
}

fn list_names_under(root: &Path) -> Result<Vec<String>, GitError> {
    let mut names = Vec::new();
    if !root.is_dir() {
        return Ok(names);
    }
    collect_names(root, root, &mut names)?;
    names.sort();
    Ok(names)
}

fn collect_names(base: &Path, dir: &Path, names: &mut Vec<String>) -> Result<(), GitError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_names(base, &path, names)?;
        } else if let Ok(relative) = path.strip_prefix(base) {
            names.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};
    use tempfile::tempdir;

    #[test]
    fn rejects_malformed_ref_names() {
        assert!(validate_ref_name("feat/../x").is_err());
        assert!(validate_ref_name("/leading").is_err());
        assert!(validate_ref_name("trailing/").is_err());
        assert!(validate_ref_name("has space").is_err());
        assert!(validate_ref_name("weird@{0}").is_err());
        assert!(validate_ref_name("feature/login").is_ok());
    }

    #[test]
    fn set_and_resolve_branch_round_trips() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        let hash = ObjectHash::new(b"commit 1");

        refs.set_branch("main", hash, None, "me", "me@example.com", "init")
            .unwrap();
        assert_eq!(refs.resolve("main").unwrap(), Some(hash));
    }

    #[test]
    fn cas_mismatch_is_ref_moved_and_does_not_write() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        let first = ObjectHash::new(b"first");
        let second = ObjectHash::new(b"second");
        let wrong_expected = ObjectHash::new(b"wrong");

        refs.set_branch("main", first, None, "me", "me@example.com", "init")
            .unwrap();

        let err = refs
            .set_branch(
                "main",
                second,
                Some(wrong_expected),
                "me",
                "me@example.com",
                "should fail",
            )
            .unwrap_err();
        assert!(matches!(err, GitError::RefMoved { .. }));
        assert_eq!(refs.resolve("main").unwrap(), Some(first));
    }

    #[test]
    fn cannot_delete_the_current_branch() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        refs.set_head_to_branch("main").unwrap();
        refs.set_branch("main", ObjectHash::new(b"x"), None, "me", "me@x.com", "init")
            .unwrap();

        assert!(matches!(
            refs.delete_branch("main"),
            Err(GitError::DeleteOfCurrentBranch(_))
        ));
    }

    #[test]
    fn reflog_nth_returns_newest_first() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        let c1 = ObjectHash::new(b"c1");
        let c2 = ObjectHash::new(b"c2");
        let c3 = ObjectHash::new(b"c3");

        refs.set_branch("main", c1, None, "me", "me@x.com", "m1").unwrap();
        refs.set_branch("main", c2, Some(c1), "me", "me@x.com", "m2").unwrap();
        refs.set_branch("main", c3, Some(c2), "me", "me@x.com", "m3").unwrap();

        assert_eq!(
            refs.resolve_at("main", RefQuery::Nth(0), HashKind::Sha1).unwrap(),
            Some(c3)
        );
        assert_eq!(
            refs.resolve_at("main", RefQuery::Nth(1), HashKind::Sha1).unwrap(),
            Some(c2)
        );
        assert_eq!(
            refs.resolve_at("main", RefQuery::Nth(2), HashKind::Sha1).unwrap(),
            Some(c1)
        );
    }

    #[test]
    fn reflog_entries_chain_old_to_new() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        let c1 = ObjectHash::new(b"c1");
        let c2 = ObjectHash::new(b"c2");
        refs.set_branch("main", c1, None, "me", "me@x.com", "m1").unwrap();
        refs.set_branch("main", c2, Some(c1), "me", "me@x.com", "m2").unwrap();

        let entries = refs.reflog_for_branch("main", HashKind::Sha1).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].old_hash, entries[0].new_hash);
    }

    /// Reflog monotonicity: successive appends to the same ref
    /// never record an earlier timestamp than the entry before them.
    #[quickcheck_macros::quickcheck]
    fn reflog_timestamps_are_monotonically_non_decreasing(steps: Vec<u8>) -> bool {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let refs = RefStore::new(dir.path());

        let mut expected = None;
        for (i, byte) in steps.iter().take(8).enumerate() {
            let next = ObjectHash::new(&[*byte, i as u8]);
            refs.set_branch("main", next, expected, "me", "me@x.com", "step").unwrap();
            expected = Some(next);
        }

        let entries = refs.reflog_for_branch("main", HashKind::Sha1).unwrap();
        entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
    }
}
