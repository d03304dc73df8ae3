//! The staging area: an ordered (by path) mapping from repository-relative
//! path to a stat-cached entry, the sole input to tree construction at
//! commit time.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::chunk::ChunkStore;
use crate::internal::object::blob::Blob;
use crate::internal::object::tree::{Tree, TreeEntry, TreeEntryMode};
use crate::internal::odb::{Object, ObjectStore};

/// Merge stage a conflicted entry occupies: 0 outside a
/// conflict, 1/2/3 for base/ours/theirs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Normal,
    Base,
    Ours,
    Theirs,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub mode: TreeEntryMode,
    pub blob_hash: ObjectHash,
    pub stage: Stage,
    /// Seconds since the epoch, truncated (`SPEC_FULL.md` §E documents
    /// whole-second mtime granularity).
    pub ctime: u64,
    pub mtime: u64,
    pub dev: u64,
    pub ino: u64,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

/// Ordered by path; `IndexMap` preserves insertion order while `add`
/// keeps paths sorted so `get_all` is stable
/// mapping").
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Index {
    entries: IndexMap<String, IndexEntry>,
}

#[cfg(unix)]
fn stat_fields(metadata: &fs::Metadata) -> (u64, u64, u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (metadata.dev(), metadata.ino(), metadata.uid(), metadata.gid())
}

#[cfg(not(unix))]
fn stat_fields(_metadata: &fs::Metadata) -> (u64, u64, u32, u32) {
    (0, 0, 0, 0)
}

fn whole_seconds(time: std::time::SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> TreeEntryMode {
    use std::os::unix::fs::PermissionsExt;
    if metadata.file_type().is_symlink() {
        TreeEntryMode::Symlink
    } else if metadata.permissions().mode() & 0o111 != 0 {
        TreeEntryMode::BlobExecutable
    } else {
        TreeEntryMode::Blob
    }
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> TreeEntryMode {
    TreeEntryMode::Blob
}

impl Index {
    pub const FILE_NAME: &'static str = "index";

    pub fn new() -> Index {
        Index::default()
    }

    fn sort(&mut self) {
        self.entries.sort_unstable_keys();
    }

    /// Hashes the file at `repo_root/path` (routing content above the
    /// chunker's threshold through `chunks` instead of a single oversized
    /// blob, spec §4.5 "large-file path when applicable"), persists it,
    /// and inserts/replaces its entry with a fresh stat cache.
    pub fn add(
        &mut self,
        path: &str,
        repo_root: &Path,
        objects: &ObjectStore,
        chunks: &ChunkStore,
    ) -> Result<ObjectHash, GitError> {
        let full_path = repo_root.join(path);
        let contents = fs::read(&full_path)?;
        let metadata = fs::symlink_metadata(&full_path)?;

        let blob_hash = if chunks.should_chunk(contents.len() as u64) {
            chunks.store(&contents)?
        } else {
            let blob = Blob::new(contents);
            objects.put(&Object::Blob(blob.clone()))?;
            blob.id
        };

        let (dev, ino, uid, gid) = stat_fields(&metadata);
        let entry = IndexEntry {
            mode: file_mode(&metadata),
            blob_hash,
            stage: Stage::Normal,
            ctime: whole_seconds(metadata.created().unwrap_or(metadata.modified()?)),
            mtime: whole_seconds(metadata.modified()?),
            dev,
            ino,
            uid,
            gid,
            size: metadata.len(),
        };
        self.entries.insert(path.to_string(), entry);
        self.sort();
        Ok(blob_hash)
    }

    pub fn remove(&mut self, path: &str) -> Option<IndexEntry> {
        self.entries.shift_remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.get(path)
    }

    pub fn get_all(&self) -> Vec<(&str, &IndexEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the entry's cached size or mtime disagree with the file
    /// currently on disk. Stat fields are acceleration only, never
    /// authoritative; callers that need certainty re-hash.
    pub fn is_modified(&self, path: &str, repo_root: &Path) -> Result<bool, GitError> {
        let Some(entry) = self.entries.get(path) else {
            return Ok(true);
        };
        let full_path = repo_root.join(path);
        let metadata = match fs::symlink_metadata(&full_path) {
            Ok(m) => m,
            Err(_) => return Ok(true),
        };
        let mtime = whole_seconds(metadata.modified()?);
        Ok(metadata.len() != entry.size || mtime != entry.mtime)
    }

    pub fn save(&self, repo_root: &Path) -> Result<(), GitError> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| GitError::Corrupt(format!("failed to serialize index: {e}")))?;
        let path = repo_root.join(Self::FILE_NAME);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn load(repo_root: &Path) -> Result<Index, GitError> {
        let path = repo_root.join(Self::FILE_NAME);
        if !path.is_file() {
            return Ok(Index::new());
        }
        let bytes = fs::read(&path)?;
        let (index, _): (Index, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| GitError::Corrupt(format!("malformed index: {e}")))?;
        Ok(index)
    }

    /// Builds the directory tree bottom-up from staged paths, writing each
    /// tree via `write_tree`, and returns the root tree hash.
    pub fn build_tree(
        &self,
        mut write_tree: impl FnMut(Tree) -> Result<ObjectHash, GitError>,
    ) -> Result<ObjectHash, GitError> {
        #[derive(Default)]
        struct DirNode {
            files: BTreeMap<String, (TreeEntryMode, ObjectHash)>,
            dirs: BTreeMap<String, DirNode>,
        }

        let mut root = DirNode::default();
        for (path, entry) in self.get_all() {
            if entry.stage != Stage::Normal {
                continue;
            }
            let mut node = &mut root;
            let mut components: Vec<&str> = path.split('/').collect();
            let file_name = components.pop().expect("path has at least one component");
            for dir_name in components {
                node = node.dirs.entry(dir_name.to_string()).or_default();
            }
            node.files
                .insert(file_name.to_string(), (entry.mode, entry.blob_hash));
        }

        fn build(node: &DirNode, write_tree: &mut impl FnMut(Tree) -> Result<ObjectHash, GitError>) -> Result<ObjectHash, GitError> {
            let mut entries = Vec::new();
            for (name, (mode, hash)) in &node.files {
                entries.push(TreeEntry {
                    mode: *mode,
                    name: name.clone(),
                    id: *hash,
                });
            }
            for (name, child) in &node.dirs {
                let child_hash = build(child, write_tree)?;
                entries.push(TreeEntry {
                    mode: TreeEntryMode::Tree,
                    name: name.clone(),
                    id: child_hash,
                });
            }
            let tree = Tree::new(entries)?;
            write_tree(tree)
        }

        build(&root, &mut write_tree)
    }
}

/// Sanitizes an index/working-tree-relative path for display or for
/// building a branch-state snapshot key; not used for on-disk addressing.
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
