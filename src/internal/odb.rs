//! The object store: `objects/<first 2 hex>/<remaining hex>` holding
//! compressed framed object bytes. Writes are idempotent —
//! content hashing means a second writer of identical bytes is a no-op —
//! and reads can optionally re-verify the hash, which `fsck --full` always
//! does.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::blob::Blob;
use crate::internal::object::commit::Commit;
use crate::internal::object::tag::Tag;
use crate::internal::object::tree::Tree;
use crate::internal::object::{ObjectTrait, ObjectType};
use crate::internal::zlib::{compress_object, decompress_object};

/// One decoded object, tagged by variant (Design Notes §9: "a tagged sum
/// over Blob | Tree | Commit | Tag with a single exhaustive decode/encode
/// table").
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl Object {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Object::Blob(b) => b.get_type(),
            Object::Tree(t) => t.get_type(),
            Object::Commit(c) => c.get_type(),
            Object::Tag(t) => t.get_type(),
        }
    }

    pub fn hash(&self) -> ObjectHash {
        match self {
            Object::Blob(b) => b.id,
            Object::Tree(t) => t.id,
            Object::Commit(c) => c.id,
            Object::Tag(t) => t.id,
        }
    }

    pub fn to_data(&self) -> Result<Vec<u8>, GitError> {
        match self {
            Object::Blob(b) => b.to_data(),
            Object::Tree(t) => t.to_data(),
            Object::Commit(c) => c.to_data(),
            Object::Tag(t) => t.to_data(),
        }
    }

    fn decode(object_type: ObjectType, payload: &[u8], hash: ObjectHash) -> Result<Object, GitError> {
        Ok(match object_type {
            ObjectType::Blob => Object::Blob(Blob::from_bytes(payload, hash)?),
            ObjectType::Tree => Object::Tree(Tree::from_bytes(payload, hash)?),
            ObjectType::Commit => Object::Commit(Commit::from_bytes(payload, hash)?),
            ObjectType::Tag => Object::Tag(Tag::from_bytes(payload, hash)?),
        })
    }

    pub fn as_commit(&self) -> Option<&Commit> {
        match self {
            Object::Commit(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            Object::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Object::Blob(b) => Some(b),
            _ => None,
        }
    }
}

impl From<Blob> for Object {
    fn from(b: Blob) -> Self {
        Object::Blob(b)
    }
}
impl From<Tree> for Object {
    fn from(t: Tree) -> Self {
        Object::Tree(t)
    }
}
impl From<Commit> for Object {
    fn from(c: Commit) -> Self {
        Object::Commit(c)
    }
}
impl From<Tag> for Object {
    fn from(t: Tag) -> Self {
        Object::Tag(t)
    }
}

/// Loose-object store rooted at `<repo>/objects`.
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(repo_root: &Path) -> ObjectStore {
        ObjectStore {
            root: repo_root.join("objects"),
        }
    }

    pub fn path_for(&self, hash: &ObjectHash) -> PathBuf {
        let (dir, rest) = hash.split_for_storage();
        self.root.join(dir).join(rest)
    }

    pub fn exists(&self, hash: &ObjectHash) -> bool {
        self.path_for(hash).is_file()
    }

    /// Writes an object if absent; a no-op (not an error) if it already
    /// exists, since identical content always hashes identically (spec §3
    /// "Writing an object that already exists is a no-op").
    #[instrument(skip(self, object))]
    pub fn put(&self, object: &Object) -> Result<ObjectHash, GitError> {
        let hash = object.hash();
        let path = self.path_for(&hash);
        if path.is_file() {
            debug!(%hash, "object already present, skipping write");
            return Ok(hash);
        }

        let payload = object.to_data()?;
        let compressed = compress_object(object.object_type(), &payload)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&compressed)?;
        }
        fs::rename(&tmp_path, &path)?;
        debug!(%hash, "wrote object");
        Ok(hash)
    }

    /// Reads and decodes an object without hash verification.
    pub fn get(&self, hash: &ObjectHash) -> Result<Object, GitError> {
        let (object_type, payload) = self.get_raw(hash)?;
        Object::decode(object_type, &payload, *hash)
    }

    /// Reads and decodes an object, then verifies the payload actually
    /// hashes to `hash`.
    pub fn get_verified(&self, hash: &ObjectHash) -> Result<Object, GitError> {
        let (object_type, payload) = self.get_raw(hash)?;
        let recomputed = ObjectHash::from_type_and_data(object_type, &payload);
        if recomputed != *hash {
            return Err(GitError::Corrupt(format!(
                "object {hash} re-hashes to {recomputed}"
            )));
        }
        Object::decode(object_type, &payload, *hash)
    }

    /// Reads the raw framed type/payload pair without decoding into a
    /// typed [`Object`].
    pub fn get_raw(&self, hash: &ObjectHash) -> Result<(ObjectType, Vec<u8>), GitError> {
        let path = self.path_for(hash);
        let compressed = fs::read(&path)
            .map_err(|_| GitError::NotFound(format!("object {hash} not found")))?;
        decompress_object(&compressed)
    }

    /// Iterates every hash currently present in the store, for `fsck`/`gc`.
    pub fn list_hashes(&self) -> Result<Vec<ObjectHash>, GitError> {
        let mut hashes = Vec::new();
        if !self.root.is_dir() {
            return Ok(hashes);
        }
        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            let prefix = dir_entry.file_name().to_string_lossy().to_string();
            if prefix.len() != 2 {
                continue;
            }
            for file_entry in fs::read_dir(dir_entry.path())? {
                let file_entry = file_entry?;
                let suffix = file_entry.file_name().to_string_lossy().to_string();
                let hex = format!("{prefix}{suffix}");
                if let Ok(hash) = hex.parse::<ObjectHash>() {
                    hashes.push(hash);
                }
            }
        }
        Ok(hashes)
    }

    /// Removes every object not in `reachable`, used by `gc` (`SPEC_FULL.md`
    /// §E).
    pub fn sweep_unreachable(&self, reachable: &std::collections::HashSet<ObjectHash>) -> Result<usize, GitError> {
        let mut removed = 0;
        for hash in self.list_hashes()? {
            if !reachable.contains(&hash) {
                fs::remove_file(self.path_for(&hash))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
