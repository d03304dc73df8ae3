//! The Tree object records one directory level: an ordered list of named
//! entries, each pointing at a Blob (file) or another Tree (subdirectory)
//!.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::{ObjectTrait, ObjectType};

/// Either a blob (regular/executable file or symlink) or a nested tree.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum TreeEntryMode {
    /// Regular file, `100644`.
    Blob,
    /// Executable file, `100755`.
    BlobExecutable,
    /// Symbolic link, `120000`.
    Symlink,
    /// Subdirectory, `40000`.
    Tree,
}

impl TreeEntryMode {
    pub fn as_octal_str(&self) -> &'static str {
        match self {
            TreeEntryMode::Blob => "100644",
            TreeEntryMode::BlobExecutable => "100755",
            TreeEntryMode::Symlink => "120000",
            TreeEntryMode::Tree => "40000",
        }
    }

    pub fn from_octal_str(s: &str) -> Result<TreeEntryMode, GitError> {
        match s {
            "100644" => Ok(TreeEntryMode::Blob),
            "100755" => Ok(TreeEntryMode::BlobExecutable),
            "120000" => Ok(TreeEntryMode::Symlink),
            "40000" | "040000" => Ok(TreeEntryMode::Tree),
            other => Err(GitError::InvalidArgument(format!(
                "`{other}` is not a recognized tree entry mode"
            ))),
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, TreeEntryMode::Tree)
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct TreeEntry {
    pub mode: TreeEntryMode,
    pub name: String,
    pub id: ObjectHash,
}

/// The key used to sort entries within a tree: directory names sort as if
/// they carried a trailing `/`, so `"foo"` (a file) sorts before
/// `"foo.txt"` but after `"foo/"` would if `"foo"` were a directory —
/// matching the Git convention that avoids ties between a file and a
/// directory that share a literal prefix.
fn sort_key(entry: &TreeEntry) -> String {
    if entry.mode.is_tree() {
        format!("{}/", entry.name)
    } else {
        entry.name.clone()
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub id: ObjectHash,
    pub entries: Vec<TreeEntry>,
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for entry in &self.entries {
            writeln!(
                f,
                "{:o} {} {}\t{}",
                entry.mode.as_octal_str().parse::<u32>().unwrap_or(0),
                if entry.mode.is_tree() { "tree" } else { "blob" },
                entry.id,
                entry.name
            )?;
        }
        Ok(())
    }
}

impl Tree {
    /// Builds a tree from entries, sorting them and computing the content
    /// hash. Rejects duplicate names (spec §4.1 "a tree that names the
    /// same entry twice is invalid").
    pub fn new(mut entries: Vec<TreeEntry>) -> Result<Tree, GitError> {
        entries.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        for pair in entries.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(GitError::InvalidArgument(format!(
                    "tree has duplicate entry name `{}`",
                    pair[0].name
                )));
            }
        }
        let mut tree = Tree {
            id: ObjectHash::default(),
            entries,
        };
        let data = tree.to_data()?;
        tree.id = ObjectHash::from_type_and_data(ObjectType::Tree, &data);
        Ok(tree)
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

impl ObjectTrait for Tree {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError>
    where
        Self: Sized,
    {
        let mut entries = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let space = rest
                .find_byte(b' ')
                .ok_or_else(|| GitError::Corrupt("tree entry missing mode separator".into()))?;
            let mode = TreeEntryMode::from_octal_str(
                std::str::from_utf8(&rest[..space])
                    .map_err(|e| GitError::Corrupt(format!("tree mode is not utf-8: {e}")))?,
            )?;

            let nul = rest
                .find_byte(0x00)
                .ok_or_else(|| GitError::Corrupt("tree entry missing name terminator".into()))?;
            let name = String::from_utf8(rest[space + 1..nul].to_vec())
                .map_err(|e| GitError::Corrupt(format!("tree entry name is not utf-8: {e}")))?;

            let hash_len = crate::hash::get_hash_kind().size();
            if rest.len() < nul + 1 + hash_len {
                return Err(GitError::Corrupt("truncated tree entry hash".into()));
            }
            let id = ObjectHash::from_bytes(&rest[nul + 1..nul + 1 + hash_len])
                .map_err(GitError::Corrupt)?;

            entries.push(TreeEntry { mode, name, id });
            rest = &rest[nul + 1 + hash_len..];
        }
        Ok(Tree { id: hash, entries })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn get_size(&self) -> usize {
        self.entries.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        for entry in &self.entries {
            data.extend(entry.mode.as_octal_str().as_bytes());
            data.extend(b" ");
            data.extend(entry.name.as_bytes());
            data.extend(&[0x00]);
            data.extend(entry.id.to_data());
        }
        Ok(data)
    }
}

impl FromStr for TreeEntryMode {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TreeEntryMode::from_octal_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};

    fn entry(name: &str, mode: TreeEntryMode) -> TreeEntry {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        TreeEntry {
            mode,
            name: name.to_string(),
            id: ObjectHash::new(name.as_bytes()),
        }
    }

    #[test]
    fn sorts_entries_treating_dirs_as_slash_suffixed() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let tree = Tree::new(vec![
            entry("foo.txt", TreeEntryMode::Blob),
            entry("foo", TreeEntryMode::Tree),
        ])
        .unwrap();
        assert_eq!(tree.entries[0].name, "foo");
        assert_eq!(tree.entries[1].name, "foo.txt");
    }

    #[test]
    fn rejects_duplicate_names() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let err = Tree::new(vec![
            entry("a", TreeEntryMode::Blob),
            entry("a", TreeEntryMode::Blob),
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn round_trips_through_bytes() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let tree = Tree::new(vec![
            entry("a.txt", TreeEntryMode::Blob),
            entry("bin", TreeEntryMode::BlobExecutable),
            entry("sub", TreeEntryMode::Tree),
        ])
        .unwrap();
        let decoded = Tree::from_bytes(&tree.to_data().unwrap(), tree.id.clone()).unwrap();
        assert_eq!(decoded, tree);
    }
}
