//! Large-file chunker: blobs over the configured threshold are split at
//! fixed chunk boundaries into content-addressed pieces plus a manifest,
//! rather than being stored as one oversized blob.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::ChunkConfig;
use crate::errors::GitError;
use crate::hash::ObjectHash;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChunkRef {
    pub index: usize,
    pub hash: ObjectHash,
    pub size: u64,
    pub offset: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChunkedFile {
    pub original_size: u64,
    pub chunk_size: u64,
    pub chunks: Vec<ChunkRef>,
    pub content_hash: ObjectHash,
}

/// Chunk/manifest store rooted at `<repo>/chunks` and `<repo>/manifests`.
pub struct ChunkStore {
    chunks_root: PathBuf,
    manifests_root: PathBuf,
    config: ChunkConfig,
}

fn path_for(root: &Path, hash: &ObjectHash) -> PathBuf {
    let (dir, rest) = hash.split_for_storage();
    root.join(dir).join(rest)
}

impl ChunkStore {
    pub fn new(repo_root: &Path, config: ChunkConfig) -> ChunkStore {
        ChunkStore {
            chunks_root: repo_root.join("chunks"),
            manifests_root: repo_root.join("manifests"),
            config,
        }
    }

    pub fn should_chunk(&self, size: u64) -> bool {
        size > self.config.threshold_bytes
    }

    /// Splits `data` into fixed-size chunks, writes each (deduplicated by
    /// content hash) alongside a manifest, and returns the manifest's own
    /// hash.
    #[instrument(skip(self, data))]
    pub fn store(&self, data: &[u8]) -> Result<ObjectHash, GitError> {
        let content_hash = ObjectHash::new(data);
        let chunk_size = self.config.chunk_size_bytes.max(1);

        let mut chunks = Vec::new();
        let mut offset = 0u64;
        for (index, piece) in data.chunks(chunk_size as usize).enumerate() {
            let hash = ObjectHash::new(piece);
            let path = path_for(&self.chunks_root, &hash);
            if !path.is_file() {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, piece)?;
            }
            chunks.push(ChunkRef {
                index,
                hash,
                size: piece.len() as u64,
                offset,
            });
            offset += piece.len() as u64;
        }

        let manifest = ChunkedFile {
            original_size: data.len() as u64,
            chunk_size,
            chunks,
            content_hash,
        };
        let manifest_hash = ObjectHash::new(&self.encode_manifest(&manifest)?);
        let manifest_path = path_for(&self.manifests_root, &manifest_hash);
        if !manifest_path.is_file() {
            if let Some(parent) = manifest_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&manifest_path, self.encode_manifest(&manifest)?)?;
        }
        Ok(manifest_hash)
    }

    fn encode_manifest(&self, manifest: &ChunkedFile) -> Result<Vec<u8>, GitError> {
        serde_json::to_vec(manifest)
            .map_err(|e| GitError::Corrupt(format!("failed to serialize chunk manifest: {e}")))
    }

    pub fn load_manifest(&self, manifest_hash: &ObjectHash) -> Result<ChunkedFile, GitError> {
        let path = path_for(&self.manifests_root, manifest_hash);
        let bytes = fs::read(&path)
            .map_err(|_| GitError::NotFound(format!("chunk manifest {manifest_hash} not found")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GitError::Corrupt(format!("malformed chunk manifest: {e}")))
    }

    /// Reassembles the original bytes from a manifest, re-hashing the
    /// result against `content_hash`.
    pub fn reassemble(&self, manifest_hash: &ObjectHash) -> Result<Vec<u8>, GitError> {
        let manifest = self.load_manifest(manifest_hash)?;
        let mut data = Vec::with_capacity(manifest.original_size as usize);
        for chunk in &manifest.chunks {
            let path = path_for(&self.chunks_root, &chunk.hash);
            let bytes = fs::read(&path)
                .map_err(|_| GitError::NotFound(format!("chunk {} not found", chunk.hash)))?;
            if bytes.len() as u64 != chunk.size {
                return Err(GitError::Corrupt(format!(
                    "chunk {} declares size {} but is {} bytes on disk",
                    chunk.hash,
                    chunk.size,
                    bytes.len()
                )));
            }
            data.extend(bytes);
        }

        let recomputed = ObjectHash::new(&data);
        if recomputed != manifest.content_hash {
            return Err(GitError::Corrupt(format!(
                "reassembled content hashes to {recomputed}, manifest declares {}",
                manifest.content_hash
            )));
        }
        Ok(data)
    }

    /// All chunk and manifest hashes currently on disk, for `gc`.
    pub fn list_chunk_hashes(&self) -> Result<HashSet<ObjectHash>, GitError> {
        list_hashes_under(&self.chunks_root)
    }

    pub fn list_manifest_hashes(&self) -> Result<HashSet<ObjectHash>, GitError> {
        list_hashes_under(&self.manifests_root)
    }

    pub fn sweep_unreachable(
        &self,
        reachable_manifests: &HashSet<ObjectHash>,
    ) -> Result<usize, GitError> {
        let mut reachable_chunks = HashSet::new();
        for manifest_hash in reachable_manifests {
            if let Ok(manifest) = self.load_manifest(manifest_hash) {
                reachable_chunks.extend(manifest.chunks.iter().map(|c| c.hash));
            }
        }

        let mut removed = 0;
        for hash in self.list_manifest_hashes()? {
            if !reachable_manifests.contains(&hash) {
                fs::remove_file(path_for(&self.manifests_root, &hash))?;
                removed += 1;
            }
        }
        for hash in self.list_chunk_hashes()? {
            if !reachable_chunks.contains(&hash) {
                fs::remove_file(path_for(&self.chunks_root, &hash))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn list_hashes_under(root: &Path) -> Result<HashSet<ObjectHash>, GitError> {
    let mut hashes = HashSet::new();
    if !root.is_dir() {
        return Ok(hashes);
    }
    for dir_entry in fs::read_dir(root)? {
        let dir_entry = dir_entry?;
        if !dir_entry.file_type()?.is_dir() {
            continue;
        }
        let prefix = dir_entry.file_name().to_string_lossy().to_string();
        for file_entry in fs::read_dir(dir_entry.path())? {
            let file_entry = file_entry?;
            let suffix = file_entry.file_name().to_string_lossy().to_string();
            if let Ok(hash) = format!("{prefix}{suffix}").parse::<ObjectHash>() {
                hashes.insert(hash);
            }
        }
    }
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};
    use tempfile::tempdir;

    fn small_config() -> ChunkConfig {
        ChunkConfig {
            threshold_bytes: 10,
            chunk_size_bytes: 4,
        }
    }

    #[test]
    fn should_chunk_respects_threshold() {
        let store = ChunkStore::new(Path::new("/tmp"), small_config());
        assert!(!store.should_chunk(5));
        assert!(store.should_chunk(11));
    }

    #[test]
    fn store_then_reassemble_round_trips_large_content() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let store = ChunkStore::new(dir.path(), small_config());

        let data = b"abcdefghijklmnopqrstuvwxyz".to_vec();
        let manifest_hash = store.store(&data).unwrap();
        let reassembled = store.reassemble(&manifest_hash).unwrap();
        assert_eq!(reassembled, data);
    }

    #[test]
    fn reassemble_detects_corrupted_chunk() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let store = ChunkStore::new(dir.path(), small_config());

        let data = b"0123456789abcdef".to_vec();
        let manifest_hash = store.store(&data).unwrap();
        let manifest = store.load_manifest(&manifest_hash).unwrap();

        let victim = &manifest.chunks[0];
        fs::write(path_for(&store.chunks_root, &victim.hash), b"XXXX").unwrap();

        assert!(store.reassemble(&manifest_hash).is_err());
    }

    #[test]
    fn sweep_unreachable_drops_chunks_of_unreferenced_manifests() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let store = ChunkStore::new(dir.path(), small_config());

        let kept = store.store(b"keep this content").unwrap();
        let dropped = store.store(b"drop this content instead").unwrap();

        let reachable: HashSet<_> = [kept].into_iter().collect();
        let removed = store.sweep_unreachable(&reachable).unwrap();
        assert!(removed > 0);
        assert!(store.load_manifest(&kept).is_ok());
        assert!(store.load_manifest(&dropped).is_err());
    }
}
