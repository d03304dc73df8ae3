//! The engine facade. `Repository` wires
//! together every lower component (object store, refs, index, chunker,
//! hooks, journal, branch state, stash) behind the operations a caller
//! (CLI, service tier) actually drives: init/open, add/remove/status,
//! commit, branch/checkout, diff, merge, fsck/gc.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::config::RepoConfig;
use crate::diff::{Diff, DiffItem};
use crate::errors::{ConflictFile, ConflictKind, GitError};
use crate::hash::{HashKind, ObjectHash, set_hash_kind};
use crate::hooks::{HookContext, HookDispatcher, HookPoint};
use crate::internal::chunk::ChunkStore;
use crate::internal::index::Index;
use crate::internal::object::blob::Blob;
use crate::internal::object::commit::Commit;
use crate::internal::object::signature::{Signature, SignatureKind};
use crate::internal::object::tree::TreeEntryMode;
use crate::internal::odb::{Object, ObjectStore};
use crate::internal::refs::{Head, RefStore};
use crate::internal::workdir::{self, WorkdirStatus};
use crate::journal::{Journal, JournalEntry, ref_state};
use crate::merge::{self, MergeOutcome, MergeStrategy};

pub const GIT_DIR_NAME: &str = ".wit";
pub const DEFAULT_BRANCH: &str = "main";

/// Where a `checkout` should land.
pub enum CheckoutTarget<'a> {
    Branch(&'a str),
    Detached(ObjectHash),
}

/// How a `checkout` should treat untracked/modified files in its way
/// (spec §4.8: `mode ∈ {safe, force}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    /// Refuse to clobber untracked or modified files; report them.
    Safe,
    /// Overwrite and remove working-tree files unconditionally.
    Force,
}

/// Options for a single commit.
pub struct CommitOptions<'a> {
    pub message: &'a str,
    pub identity: (&'a str, &'a str),
    pub amend: bool,
    pub bypass_hooks: bool,
}

pub struct FsckReport {
    pub reachable_objects: usize,
    pub corrupt_objects: Vec<ObjectHash>,
}

pub struct GcReport {
    pub objects_removed: usize,
    pub chunks_removed: usize,
}

/// A single repository: a working directory paired with its `.wit`
/// metadata directory.
pub struct Repository {
    pub work_dir: PathBuf,
    pub git_dir: PathBuf,
    pub config: RepoConfig,
    pub objects: ObjectStore,
    pub refs: RefStore,
    pub chunks: ChunkStore,
    pub hooks: HookDispatcher,
}

/// Reads a blob's content, falling back to the chunk store for
/// large-file manifests (spec §4.3: chunked content shares the object
/// hash's address space but lives outside `objects/`).
fn read_content(objects: &ObjectStore, chunks: &ChunkStore, hash: &ObjectHash) -> Result<Vec<u8>, GitError> {
    if objects.exists(hash) {
        match objects.get(hash)? {
            Object::Blob(blob) => Ok(blob.data),
            other => Err(GitError::InvalidArgument(format!("{} is a {:?}, not a blob", hash, other.object_type()))),
        }
    } else {
        chunks.reassemble(hash)
    }
}

impl Repository {
    /// Initializes a new repository at `path`: lays out `objects/`,
    /// `refs/heads/`, `refs/tags/`, `logs/refs/heads/`, `hooks/`, writes
    /// `HEAD` pointing at the default branch, and persists `config.json`
    ///.
    #[instrument(skip(hash_kind))]
    pub fn init(path: &Path, hash_kind: HashKind) -> Result<Repository, GitError> {
        let git_dir = path.join(GIT_DIR_NAME);
        if git_dir.is_dir() {
            return Err(GitError::AlreadyExists(format!("repository already exists at {}", git_dir.display())));
        }

        fs::create_dir_all(path)?;
        fs::create_dir_all(git_dir.join("objects"))?;
        fs::create_dir_all(git_dir.join("refs/heads"))?;
        fs::create_dir_all(git_dir.join("refs/tags"))?;
        fs::create_dir_all(git_dir.join("logs/refs/heads"))?;
        fs::create_dir_all(git_dir.join("hooks"))?;

        let mut config = RepoConfig::default();
        config.hash_kind = hash_kind;
        config.save(&git_dir)?;

        fs::write(git_dir.join("HEAD"), format!("ref: refs/heads/{DEFAULT_BRANCH}\n"))?;

        let index = Index::new();
        index.save(&git_dir)?;

        Self::open(path)
    }

    /// Opens an existing repository rooted at `path` (its `.wit` must
    /// already exist directly inside it).
    pub fn open(path: &Path) -> Result<Repository, GitError> {
        let git_dir = path.join(GIT_DIR_NAME);
        if !git_dir.is_dir() {
            return Err(GitError::NotFound(format!("no repository found at {}", path.display())));
        }
        let config = RepoConfig::load(&git_dir)?;
        set_hash_kind(config.hash_kind);

        Ok(Repository {
            work_dir: path.to_path_buf(),
            objects: ObjectStore::new(&git_dir),
            refs: RefStore::new(&git_dir),
            chunks: ChunkStore::new(&git_dir, config.chunk),
            hooks: HookDispatcher::new(&git_dir, config.hooks),
            git_dir,
            config,
        })
    }

    /// Walks upward from `cwd` looking for a `.wit` directory (spec §6
    /// "repository discovery").
    pub fn find(cwd: &Path) -> Result<Repository, GitError> {
        let mut dir = cwd.to_path_buf();
        loop {
            if dir.join(GIT_DIR_NAME).is_dir() {
                return Self::open(&dir);
            }
            match dir.parent() {
                Some(parent) => dir = parent.to_path_buf(),
                None => return Err(GitError::NotFound(format!("no repository found above {}", cwd.display()))),
            }
        }
    }

    fn index(&self) -> Result<Index, GitError> {
        Index::load(&self.git_dir)
    }

    /// Current branch name, or `None` when HEAD is detached.
    pub fn current_branch(&self) -> Result<Option<String>, GitError> {
        match self.refs.get_head()? {
            Head::Symbolic(name) => Ok(Some(name)),
            Head::Detached(_) => Ok(None),
        }
    }

    /// The commit HEAD currently resolves to, if any (a freshly
    /// initialized branch with no commits resolves to `None`).
    pub fn head_commit(&self) -> Result<Option<ObjectHash>, GitError> {
        match self.refs.get_head()? {
            Head::Symbolic(name) => self.refs.resolve_branch(&name),
            Head::Detached(hash) => Ok(Some(hash)),
        }
    }

    /// Working-tree status against the staged index.
    pub fn status(&self) -> Result<Vec<workdir::WorkdirEntry>, GitError> {
        workdir::walk(&self.work_dir, &self.index()?)
    }

    /// Stages `path`, persisting its blob (or chunk manifest) and
    /// updating the index.
    #[instrument(skip(self))]
    pub fn add(&self, path: &str) -> Result<ObjectHash, GitError> {
        let mut index = self.index()?;
        let hash = index.add(path, &self.work_dir, &self.objects, &self.chunks)?;
        index.save(&self.git_dir)?;
        Ok(hash)
    }

    /// Stages every modified or untracked path, and removes from the
    /// index any path that no longer exists on disk.
    pub fn add_all(&self) -> Result<(), GitError> {
        let mut index = self.index()?;
        let entries = workdir::walk(&self.work_dir, &index)?;
        for entry in entries {
            match entry.status {
                WorkdirStatus::Modified | WorkdirStatus::Untracked => {
                    index.add(&entry.path, &self.work_dir, &self.objects, &self.chunks)?;
                }
                WorkdirStatus::Deleted => {
                    index.remove(&entry.path);
                }
                WorkdirStatus::Unchanged => {}
            }
        }
        index.save(&self.git_dir)
    }

    /// Unstages `path`.
    pub fn remove(&self, path: &str) -> Result<(), GitError> {
        let mut index = self.index()?;
        index.remove(path);
        index.save(&self.git_dir)
    }

    /// Creates a commit from the current index atop HEAD, or (when
    /// `options.amend` is set) rewrites HEAD's commit with the current
    /// index and message (spec §4.9, "amend" Open Question — resolved in
    /// `DESIGN.md`: amend keeps the original author, replaces the tree and
    /// message, and does not touch parents).
    #[instrument(skip(self, options))]
    pub fn commit(&self, options: CommitOptions) -> Result<ObjectHash, GitError> {
        let ctx = HookContext {
            repo_root: self.work_dir.clone(),
            args: Vec::new(),
            message: Some(options.message.to_string()),
        };
        self.hooks.run(HookPoint::PreCommit, &ctx, options.bypass_hooks)?;
        self.hooks.run(HookPoint::CommitMsg, &ctx, options.bypass_hooks)?;

        let index = self.index()?;
        let objects = &self.objects;
        let tree_id = index.build_tree(|tree| objects.put(&Object::Tree(tree)))?;

        let head = self.refs.get_head()?;
        let parent = self.head_commit()?;

        let (name, email) = options.identity;
        let now = chrono::Utc::now().timestamp();

        let commit = if options.amend {
            let Some(parent_hash) = parent else {
                return Err(GitError::InvalidArgument("cannot amend: no existing commit".to_string()));
            };
            let Object::Commit(existing) = self.objects.get(&parent_hash)? else {
                return Err(GitError::Corrupt(format!("{parent_hash} is not a commit")));
            };
            let committer = Signature::new(SignatureKind::Committer, name, email, now);
            existing.amend(tree_id, committer, options.message)
        } else {
            let author = Signature::new(SignatureKind::Author, name, email, now);
            let committer = Signature::new(SignatureKind::Committer, name, email, now);
            let parents = parent.into_iter().collect();
            Commit::new(author, committer, tree_id, parents, options.message)
        };
        self.objects.put(&Object::Commit(commit.clone()))?;

        let before = ref_state(self.current_branch()?.as_deref(), parent);
        match head {
            Head::Symbolic(branch) => {
                self.refs.set_branch(&branch, commit.id, parent, name, email, options.message)?;
                self.refs.append_head_reflog(
                    parent.unwrap_or_default(),
                    commit.id,
                    name,
                    email,
                    options.message,
                )?;
            }
            Head::Detached(_) => {
                self.refs.set_head_detached(commit.id)?;
                self.refs.append_head_reflog(
                    parent.unwrap_or_default(),
                    commit.id,
                    name,
                    email,
                    options.message,
                )?;
            }
        }

        let journal = Journal::new(&self.git_dir);
        journal.record(&JournalEntry {
            op: if options.amend { "commit --amend".to_string() } else { "commit".to_string() },
            args: serde_json::json!({ "message": options.message }),
            before_state: before,
            after_state: ref_state(self.current_branch()?.as_deref(), Some(commit.id)),
            metadata: serde_json::Value::Null,
            timestamp: now,
        })?;

        self.hooks.run(HookPoint::PostCommit, &ctx, options.bypass_hooks)?;
        Ok(commit.id)
    }

    pub fn create_branch(&self, name: &str, at: Option<ObjectHash>) -> Result<(), GitError> {
        let target = match at {
            Some(hash) => hash,
            None => self.head_commit()?.ok_or_else(|| {
                GitError::InvalidArgument("cannot branch: HEAD has no commits yet".to_string())
            })?,
        };
        if self.refs.resolve_branch(name)?.is_some() {
            return Err(GitError::AlreadyExists(format!("branch `{name}` already exists")));
        }
        self.refs.set_branch(name, target, None, "witrs", "witrs@local", &format!("branch: created from {target}"))
    }

    pub fn delete_branch(&self, name: &str) -> Result<(), GitError> {
        self.refs.delete_branch(name)
    }

    pub fn list_branches(&self) -> Result<Vec<String>, GitError> {
        self.refs.list_branches()
    }

    fn materialize_tree(&self, tree_id: ObjectHash, into: &Path) -> Result<(), GitError> {
        let Object::Tree(tree) = self.objects.get(&tree_id)? else {
            return Err(GitError::Corrupt(format!("{tree_id} is not a tree")));
        };
        fs::create_dir_all(into)?;
        for entry in &tree.entries {
            let target = into.join(&entry.name);
            match entry.mode {
                TreeEntryMode::Tree => self.materialize_tree(entry.id, &target)?,
                TreeEntryMode::Blob | TreeEntryMode::BlobExecutable => {
                    let data = read_content(&self.objects, &self.chunks, &entry.id)?;
                    fs::write(&target, data)?;
                    #[cfg(unix)]
                    if entry.mode == TreeEntryMode::BlobExecutable {
                        use std::os::unix::fs::PermissionsExt;
                        fs::set_permissions(&target, fs::Permissions::from_mode(0o755))?;
                    }
                }
                TreeEntryMode::Symlink => {
                    let data = read_content(&self.objects, &self.chunks, &entry.id)?;
                    #[cfg(unix)]
                    {
                        let link_target = String::from_utf8_lossy(&data).to_string();
                        let _ = fs::remove_file(&target);
                        std::os::unix::fs::symlink(link_target, &target)?;
                    }
                    #[cfg(not(unix))]
                    fs::write(&target, data)?;
                }
            }
        }
        Ok(())
    }

    /// Removes working-tree files that were tracked in `old_index` but
    /// have no counterpart in `target_paths`, pruning directories left
    /// empty behind them. Part of checkout's "creating, overwriting, and
    /// removing files as needed" (spec §4.8).
    fn remove_paths_absent_from(
        &self,
        old_index: &Index,
        target_paths: &merge::PathMap,
    ) -> Result<(), GitError> {
        for (path, _) in old_index.get_all() {
            if target_paths.contains_key(path) {
                continue;
            }
            let full = self.work_dir.join(path);
            if full.is_file() || full.is_symlink() {
                fs::remove_file(&full)?;
            }
            let mut dir = full.parent();
            while let Some(d) = dir {
                if d == self.work_dir || d.as_os_str().is_empty() {
                    break;
                }
                match fs::read_dir(d) {
                    Ok(mut entries) if entries.next().is_none() => {
                        let _ = fs::remove_dir(d);
                        dir = d.parent();
                    }
                    _ => break,
                }
            }
        }
        Ok(())
    }

    /// Checks out a branch or a detached commit: materializes its tree
    /// into the working directory and updates HEAD, re-staging the index
    /// to match. In `Safe` mode, refuses to clobber untracked or modified
    /// files and reports them as a conflict instead of touching the
    /// working tree; `Force` proceeds unconditionally (spec §4.8).
    #[instrument(skip(self))]
    pub fn checkout(&self, target: CheckoutTarget, mode: CheckoutMode) -> Result<(), GitError> {
        let (commit_hash, new_head_branch) = match target {
            CheckoutTarget::Branch(name) => {
                let hash = self.refs.resolve_branch(name)?.ok_or_else(|| GitError::NotFound(format!("branch `{name}`")))?;
                (hash, Some(name.to_string()))
            }
            CheckoutTarget::Detached(hash) => (hash, None),
        };

        let Object::Commit(commit) = self.objects.get(&commit_hash)? else {
            return Err(GitError::InvalidArgument(format!("{commit_hash} is not a commit")));
        };

        let old_index = self.index()?;
        let target_paths = merge::flatten_tree(&self.objects, commit.tree_id)?;

        if mode == CheckoutMode::Safe {
            let status = workdir::walk(&self.work_dir, &old_index)?;
            let mut blockers = Vec::new();
            for entry in &status {
                match entry.status {
                    WorkdirStatus::Untracked => {
                        if target_paths.contains_key(&entry.path) {
                            blockers.push(entry.path.clone());
                        }
                    }
                    WorkdirStatus::Modified => {
                        let clobbered = match target_paths.get(&entry.path) {
                            Some((_, target_hash)) => old_index
                                .get(&entry.path)
                                .is_none_or(|e| e.blob_hash != *target_hash),
                            None => true,
                        };
                        if clobbered {
                            blockers.push(entry.path.clone());
                        }
                    }
                    WorkdirStatus::Unchanged | WorkdirStatus::Deleted => {}
                }
            }
            if !blockers.is_empty() {
                blockers.sort();
                blockers.dedup();
                return Err(GitError::Conflict {
                    files: blockers
                        .into_iter()
                        .map(|path| ConflictFile {
                            path: PathBuf::from(path),
                            kind: ConflictKind::WorkingTreeClobber,
                            ours: None,
                            theirs: None,
                            base: None,
                        })
                        .collect(),
                });
            }
        }

        self.materialize_tree(commit.tree_id, &self.work_dir)?;
        self.remove_paths_absent_from(&old_index, &target_paths)?;

        let mut index = Index::new();
        fn stage_tree(
            repo: &Repository,
            index: &mut Index,
            tree_id: ObjectHash,
            prefix: &str,
        ) -> Result<(), GitError> {
            let Object::Tree(tree) = repo.objects.get(&tree_id)? else {
                return Err(GitError::Corrupt(format!("{tree_id} is not a tree")));
            };
            for entry in &tree.entries {
                let path = if prefix.is_empty() { entry.name.clone() } else { format!("{prefix}/{}", entry.name) };
                if entry.mode.is_tree() {
                    stage_tree(repo, index, entry.id, &path)?;
                } else {
                    index.add(&path, &repo.work_dir, &repo.objects, &repo.chunks)?;
                }
            }
            Ok(())
        }
        stage_tree(self, &mut index, commit.tree_id, "")?;
        index.save(&self.git_dir)?;

        match new_head_branch {
            Some(branch) => self.refs.set_head_to_branch(&branch)?,
            None => self.refs.set_head_detached(commit_hash)?,
        }

        let ctx = HookContext { repo_root: self.work_dir.clone(), args: Vec::new(), message: None };
        self.hooks.run(HookPoint::PostCheckout, &ctx, false)?;
        Ok(())
    }

    /// Unified diffs between two commits' trees.
    pub fn diff(&self, from: ObjectHash, to: ObjectHash) -> Result<Vec<DiffItem>, GitError> {
        let from_files = self.collect_blob_paths(from)?;
        let to_files = self.collect_blob_paths(to)?;
        let objects = &self.objects;
        let chunks = &self.chunks;
        Ok(Diff::diff(from_files, to_files, Vec::new(), |_, hash| {
            read_content(objects, chunks, hash).unwrap_or_default()
        }))
    }

    fn collect_blob_paths(&self, commit_hash: ObjectHash) -> Result<Vec<(PathBuf, ObjectHash)>, GitError> {
        let Object::Commit(commit) = self.objects.get(&commit_hash)? else {
            return Err(GitError::InvalidArgument(format!("{commit_hash} is not a commit")));
        };
        let mut out = Vec::new();
        self.collect_blob_paths_from_tree(commit.tree_id, Path::new(""), &mut out)?;
        Ok(out)
    }

    fn collect_blob_paths_from_tree(
        &self,
        tree_id: ObjectHash,
        prefix: &Path,
        out: &mut Vec<(PathBuf, ObjectHash)>,
    ) -> Result<(), GitError> {
        let Object::Tree(tree) = self.objects.get(&tree_id)? else {
            return Err(GitError::Corrupt(format!("{tree_id} is not a tree")));
        };
        for entry in &tree.entries {
            let path = prefix.join(&entry.name);
            if entry.mode.is_tree() {
                self.collect_blob_paths_from_tree(entry.id, &path, out)?;
            } else {
                out.push((path, entry.id));
            }
        }
        Ok(())
    }

    pub fn merge_base(&self, a: ObjectHash, b: ObjectHash) -> Result<Option<ObjectHash>, GitError> {
        merge::merge_base(&self.objects, a, b)
    }

    /// Merges `branch` into the current branch, advancing the ref on
    /// success.
    #[instrument(skip(self, identity))]
    pub fn merge(
        &self,
        branch: &str,
        strategy: MergeStrategy,
        identity: (&str, &str),
        message: &str,
    ) -> Result<MergeOutcome, GitError> {
        let ours = self.head_commit()?.ok_or_else(|| GitError::InvalidArgument("HEAD has no commits yet".to_string()))?;
        let theirs = self.refs.resolve_branch(branch)?.ok_or_else(|| GitError::NotFound(format!("branch `{branch}`")))?;
        let current_branch = self.current_branch()?.ok_or_else(|| {
            GitError::InvalidArgument("cannot merge onto a detached HEAD".to_string())
        })?;

        let outcome = merge::merge(&self.objects, ours, theirs, strategy, identity, message)?;
        let new_head = match outcome {
            MergeOutcome::AlreadyUpToDate => return Ok(outcome),
            MergeOutcome::FastForward(hash) | MergeOutcome::Merged(hash) => hash,
        };

        let (name, email) = identity;
        self.refs.set_branch(&current_branch, new_head, Some(ours), name, email, message)?;
        self.materialize_tree(self.objects.get(&new_head)?.as_commit().unwrap().tree_id, &self.work_dir)?;

        let ctx = HookContext { repo_root: self.work_dir.clone(), args: Vec::new(), message: Some(message.to_string()) };
        self.hooks.run(HookPoint::PostMerge, &ctx, false)?;

        Ok(outcome)
    }

    /// Checks the object graph and index for consistency: re-hashes every
    /// object, confirms every commit's tree and parents resolve, and
    /// reports anything corrupt (`SPEC_FULL.md` §E `fsck`).
    #[instrument(skip(self))]
    pub fn fsck(&self, full: bool) -> Result<FsckReport, GitError> {
        let mut corrupt = Vec::new();
        let mut reachable = 0;
        for hash in self.objects.list_hashes()? {
            let result = if full { self.objects.get_verified(&hash) } else { self.objects.get(&hash) };
            match result {
                Ok(_) => reachable += 1,
                Err(_) => corrupt.push(hash),
            }
        }
        Ok(FsckReport { reachable_objects: reachable, corrupt_objects: corrupt })
    }

    /// Computes the reachable closure from every branch/tag tip (spec §5
    /// "on cancellation ... objects written so far remain but are
    /// unreferenced; `gc` recovers them") and sweeps everything else from
    /// both the object store and the chunk/manifest store.
    #[instrument(skip(self))]
    pub fn gc(&self) -> Result<GcReport, GitError> {
        let mut reachable_commits = HashSet::new();
        let mut reachable_objects = HashSet::new();
        let mut reachable_manifests = HashSet::new();

        let mut tips = Vec::new();
        for branch in self.refs.list_branches()? {
            if let Some(hash) = self.refs.resolve_branch(&branch)? {
                tips.push(hash);
            }
        }
        for tag in self.refs.list_tags()? {
            if let Some(hash) = self.refs.resolve(&tag)? {
                tips.push(hash);
            }
        }

        let mut queue: Vec<ObjectHash> = tips;
        while let Some(hash) = queue.pop() {
            if !reachable_commits.insert(hash) {
                continue;
            }
            reachable_objects.insert(hash);
            let commit = match self.objects.get(&hash) {
                Ok(Object::Commit(c)) => c,
                Ok(Object::Tag(t)) => {
                    queue.push(t.target);
                    continue;
                }
                _ => continue,
            };
            queue.extend(commit.parent_commit_ids.iter().copied());
            self.mark_tree_reachable(commit.tree_id, &mut reachable_objects, &mut reachable_manifests)?;
        }

        let objects_removed = self.objects.sweep_unreachable(&reachable_objects)?;
        let chunks_removed = self.chunks.sweep_unreachable(&reachable_manifests)?;
        Ok(GcReport { objects_removed, chunks_removed })
    }

    fn mark_tree_reachable(
        &self,
        tree_id: ObjectHash,
        reachable_objects: &mut HashSet<ObjectHash>,
        reachable_manifests: &mut HashSet<ObjectHash>,
    ) -> Result<(), GitError> {
        if !reachable_objects.insert(tree_id) {
            return Ok(());
        }
        let Ok(Object::Tree(tree)) = self.objects.get(&tree_id) else {
            return Ok(());
        };
        for entry in &tree.entries {
            if entry.mode.is_tree() {
                self.mark_tree_reachable(entry.id, reachable_objects, reachable_manifests)?;
            } else if self.objects.exists(&entry.id) {
                reachable_objects.insert(entry.id);
            } else {
                reachable_manifests.insert(entry.id);
            }
        }
        Ok(())
    }
}

/// Writes a single blob and returns its hash, a convenience for callers
/// (tests, the service tier) that need to seed content without going
/// through the working tree.
pub fn write_blob(objects: &ObjectStore, data: Vec<u8>) -> Result<ObjectHash, GitError> {
    let blob = Blob::new(data);
    objects.put(&Object::Blob(blob))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::set_hash_kind_for_test;
    use tempfile::tempdir;

    fn identity() -> (&'static str, &'static str) {
        ("Test User", "test@example.com")
    }

    #[test]
    fn init_creates_default_branch_and_empty_index() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();
        assert_eq!(repo.current_branch().unwrap(), Some(DEFAULT_BRANCH.to_string()));
        assert!(repo.head_commit().unwrap().is_none());
    }

    #[test]
    fn init_twice_is_already_exists() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        Repository::init(dir.path(), HashKind::Sha1).unwrap();
        let err = Repository::init(dir.path(), HashKind::Sha1).unwrap_err();
        assert!(matches!(err, GitError::AlreadyExists(_)));
    }

    #[test]
    fn find_walks_up_from_a_subdirectory() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        Repository::init(dir.path(), HashKind::Sha1).unwrap();
        let nested = dir.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();

        let repo = Repository::find(&nested).unwrap();
        assert_eq!(repo.work_dir, dir.path());
    }

    #[test]
    fn add_and_commit_advances_the_branch() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        repo.add("a.txt").unwrap();

        let commit_hash = repo
            .commit(CommitOptions { message: "initial commit", identity: identity(), amend: false, bypass_hooks: false })
            .unwrap();

        assert_eq!(repo.head_commit().unwrap(), Some(commit_hash));
        let log = repo.refs.reflog_for_branch(DEFAULT_BRANCH, HashKind::Sha1).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn amend_replaces_message_and_tree_without_new_parent() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();
        fs::write(dir.path().join("a.txt"), b"v1").unwrap();
        repo.add("a.txt").unwrap();
        let first = repo
            .commit(CommitOptions { message: "first", identity: identity(), amend: false, bypass_hooks: false })
            .unwrap();

        fs::write(dir.path().join("a.txt"), b"v2").unwrap();
        repo.add("a.txt").unwrap();
        let amended = repo
            .commit(CommitOptions { message: "first (amended)", identity: identity(), amend: true, bypass_hooks: false })
            .unwrap();

        assert_ne!(first, amended);
        let Object::Commit(commit) = repo.objects.get(&amended).unwrap() else { panic!("not a commit") };
        assert!(commit.parent_commit_ids.is_empty());
        assert_eq!(commit.message, "first (amended)");
    }

    #[test]
    fn checkout_materializes_branch_contents() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();
        fs::write(dir.path().join("a.txt"), b"on main").unwrap();
        repo.add("a.txt").unwrap();
        repo.commit(CommitOptions { message: "c1", identity: identity(), amend: false, bypass_hooks: false }).unwrap();

        let base = repo.head_commit().unwrap().unwrap();
        repo.create_branch("feature", None).unwrap();
        repo.checkout(CheckoutTarget::Branch("feature"), CheckoutMode::Force).unwrap();
        fs::write(dir.path().join("a.txt"), b"on feature").unwrap();
        repo.add("a.txt").unwrap();
        repo.commit(CommitOptions { message: "c2", identity: identity(), amend: false, bypass_hooks: false }).unwrap();

        repo.checkout(CheckoutTarget::Detached(base), CheckoutMode::Force).unwrap();
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"on main");
    }

    #[test]
    fn checkout_force_removes_files_absent_from_target_tree() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();
        fs::write(dir.path().join("a.txt"), b"on main").unwrap();
        repo.add("a.txt").unwrap();
        let base = repo.commit(CommitOptions { message: "c1", identity: identity(), amend: false, bypass_hooks: false }).unwrap();

        repo.create_branch("feature", None).unwrap();
        repo.checkout(CheckoutTarget::Branch("feature"), CheckoutMode::Force).unwrap();
        fs::write(dir.path().join("b.txt"), b"only on feature").unwrap();
        repo.add("b.txt").unwrap();
        repo.commit(CommitOptions { message: "c2", identity: identity(), amend: false, bypass_hooks: false }).unwrap();
        assert!(dir.path().join("b.txt").exists());

        repo.checkout(CheckoutTarget::Detached(base), CheckoutMode::Force).unwrap();
        assert!(!dir.path().join("b.txt").exists());
        assert!(dir.path().join("a.txt").exists());
    }

    #[test]
    fn checkout_safe_refuses_to_clobber_modified_file() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();
        fs::write(dir.path().join("a.txt"), b"original").unwrap();
        repo.add("a.txt").unwrap();
        repo.commit(CommitOptions { message: "c1", identity: identity(), amend: false, bypass_hooks: false }).unwrap();

        repo.create_branch("feature", None).unwrap();
        repo.checkout(CheckoutTarget::Branch("feature"), CheckoutMode::Force).unwrap();
        fs::write(dir.path().join("a.txt"), b"changed on feature").unwrap();
        repo.add("a.txt").unwrap();
        repo.commit(CommitOptions { message: "c2", identity: identity(), amend: false, bypass_hooks: false }).unwrap();

        fs::write(dir.path().join("a.txt"), b"uncommitted local edit").unwrap();
        let err = repo
            .checkout(CheckoutTarget::Branch(DEFAULT_BRANCH), CheckoutMode::Safe)
            .expect_err("safe checkout must refuse to clobber a modified file");
        match err {
            GitError::Conflict { files } => {
                assert_eq!(files.len(), 1);
                assert_eq!(files[0].path, Path::new("a.txt"));
                assert_eq!(files[0].kind, ConflictKind::WorkingTreeClobber);
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"uncommitted local edit");

        repo.checkout(CheckoutTarget::Branch(DEFAULT_BRANCH), CheckoutMode::Force).unwrap();
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"original");
    }

    #[test]
    fn gc_removes_only_unreachable_objects() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();
        fs::write(dir.path().join("a.txt"), b"kept").unwrap();
        repo.add("a.txt").unwrap();
        repo.commit(CommitOptions { message: "c1", identity: identity(), amend: false, bypass_hooks: false }).unwrap();

        // An orphan blob with no referencing tree/commit.
        let orphan = write_blob(&repo.objects, b"orphan".to_vec()).unwrap();
        assert!(repo.objects.exists(&orphan));

        let report = repo.gc().unwrap();
        assert_eq!(report.objects_removed, 1);
        assert!(!repo.objects.exists(&orphan));
    }

    #[test]
    fn fsck_reports_no_corruption_on_a_healthy_repo() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        repo.add("a.txt").unwrap();
        repo.commit(CommitOptions { message: "c1", identity: identity(), amend: false, bypass_hooks: false }).unwrap();

        let report = repo.fsck(true).unwrap();
        assert!(report.corrupt_objects.is_empty());
        assert!(report.reachable_objects >= 3);
    }
}
