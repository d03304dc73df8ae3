//! The merge engine: ancestry queries, fast-forward/already-merged
//! short-circuits, and three-way content merge with line-level conflict
//! detection.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use similar::{Algorithm, ChangeTag, TextDiff};
use tracing::instrument;

use crate::errors::{ConflictFile, ConflictKind, GitError};
use crate::hash::ObjectHash;
use crate::internal::object::blob::Blob;
use crate::internal::object::commit::Commit;
use crate::internal::object::signature::{Signature, SignatureKind};
use crate::internal::object::tree::{Tree, TreeEntry, TreeEntryMode};
use crate::internal::odb::{Object, ObjectStore};

/// Closed enumeration of merge strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    FastForwardOnly,
    ThreeWay,
    Squash,
    Rebase,
}

/// What a successful merge did, as distinct from a conflict (surfaced
/// through `GitError::Conflict` instead of this type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// `theirs` is already an ancestor of `ours`; nothing to do.
    AlreadyUpToDate,
    /// The ref can simply advance to `theirs`; no new object was created.
    FastForward(ObjectHash),
    /// A new commit (three-way, squash, or the final commit of a rebase)
    /// was created and is returned here.
    Merged(ObjectHash),
}

fn load_commit(store: &ObjectStore, hash: &ObjectHash) -> Result<Commit, GitError> {
    match store.get(hash)? {
        Object::Commit(c) => Ok(c),
        other => Err(GitError::InvalidArgument(format!(
            "{} is a {:?}, not a commit",
            hash,
            other.object_type()
        ))),
    }
}

fn parents_of(store: &ObjectStore, hash: &ObjectHash) -> Result<Vec<ObjectHash>, GitError> {
    Ok(load_commit(store, hash)?.parent_commit_ids)
}

/// Every commit reachable from `start` (`start` included), via BFS over
/// `parent_commit_ids`.
fn ancestor_closure(store: &ObjectStore, start: ObjectHash) -> Result<HashSet<ObjectHash>, GitError> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(start);
    queue.push_back(start);
    while let Some(hash) = queue.pop_front() {
        for parent in parents_of(store, &hash)? {
            if visited.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(visited)
}

/// Lowest common ancestor of `a` and `b` via BFS from `b` over the ancestor
/// closure of `a`.
#[instrument(skip(store))]
pub fn merge_base(
    store: &ObjectStore,
    a: ObjectHash,
    b: ObjectHash,
) -> Result<Option<ObjectHash>, GitError> {
    let ancestors_of_a = ancestor_closure(store, a)?;
    if ancestors_of_a.contains(&b) {
        return Ok(Some(b));
    }

    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(b);
    queue.push_back(b);
    while let Some(hash) = queue.pop_front() {
        if ancestors_of_a.contains(&hash) {
            return Ok(Some(hash));
        }
        for parent in parents_of(store, &hash)? {
            if visited.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(None)
}

/// True iff `a` is reachable from `b` by following parents (`a == b`
/// counts as an ancestor of itself).
pub fn is_ancestor(store: &ObjectStore, a: ObjectHash, b: ObjectHash) -> Result<bool, GitError> {
    if a == b {
        return Ok(true);
    }
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(b);
    queue.push_back(b);
    while let Some(hash) = queue.pop_front() {
        for parent in parents_of(store, &hash)? {
            if parent == a {
                return Ok(true);
            }
            if visited.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(false)
}

/// A path's entry flattened out of a tree: mode plus blob/tree hash.
pub(crate) type PathMap = BTreeMap<String, (TreeEntryMode, ObjectHash)>;

pub(crate) fn flatten_tree(store: &ObjectStore, tree_hash: ObjectHash) -> Result<PathMap, GitError> {
    let mut out = BTreeMap::new();
    flatten_into(store, tree_hash, "", &mut out)?;
    Ok(out)
}

fn flatten_into(
    store: &ObjectStore,
    tree_hash: ObjectHash,
    prefix: &str,
    out: &mut PathMap,
) -> Result<(), GitError> {
    let tree = match store.get(&tree_hash)? {
        Object::Tree(t) => t,
        other => {
            return Err(GitError::Corrupt(format!(
                "{tree_hash} is a {:?}, not a tree",
                other.object_type()
            )));
        }
    };
    for entry in tree.entries {
        let path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{prefix}/{}", entry.name)
        };
        if entry.mode.is_tree() {
            flatten_into(store, entry.id, &path, out)?;
        } else {
            out.insert(path, (entry.mode, entry.id));
        }
    }
    Ok(())
}

fn read_blob_text(store: &ObjectStore, hash: ObjectHash) -> Result<Option<String>, GitError> {
    match store.get(&hash)? {
        Object::Blob(b) => Ok(String::from_utf8(b.data).ok()),
        other => Err(GitError::Corrupt(format!(
            "{hash} is a {:?}, not a blob",
            other.object_type()
        ))),
    }
}

/// Per-side line edits relative to a common base, keyed by base line number
/// (1-based); insertions are anchored to the last *unchanged* base line
/// that preceded them, so a same-position replacement on one side and a
/// trailing addition on the other don't collide at the same anchor.
struct SideEdits {
    deleted: HashSet<usize>,
    insertions: Vec<(usize, String)>,
}

fn diff_against_base(base_lines: &[&str], other_lines: &[&str]) -> SideEdits {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_slices(base_lines, other_lines);

    let mut deleted = HashSet::new();
    let mut insertions = Vec::new();
    let mut base_line_no = 0usize;
    let mut last_equal = 0usize;

    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Equal => {
                base_line_no += 1;
                last_equal = base_line_no;
            }
            ChangeTag::Delete => {
                base_line_no += 1;
                deleted.insert(base_line_no);
            }
            ChangeTag::Insert => {
                insertions.push((last_equal, change.value().to_string()));
            }
        }
    }
    SideEdits { deleted, insertions }
}

/// Attempts a clean three-way text merge; `None` means the two sides
/// touched the same base line and a human must resolve it.
fn three_way_text_merge(base: &str, ours: &str, theirs: &str) -> Option<String> {
    let base_lines: Vec<&str> = base.lines().collect();
    let ours_lines: Vec<&str> = ours.lines().collect();
    let theirs_lines: Vec<&str> = theirs.lines().collect();

    let ours_edits = diff_against_base(&base_lines, &ours_lines);
    let theirs_edits = diff_against_base(&base_lines, &theirs_lines);

    if ours_edits.deleted.intersection(&theirs_edits.deleted).next().is_some() {
        return None;
    }

    let mut output = Vec::new();
    for anchor in 0..=base_lines.len() {
        if anchor > 0
            && !ours_edits.deleted.contains(&anchor)
            && !theirs_edits.deleted.contains(&anchor)
        {
            output.push(base_lines[anchor - 1].to_string());
        }
        for (a, text) in &ours_edits.insertions {
            if *a == anchor {
                output.push(text.clone());
            }
        }
        for (a, text) in &theirs_edits.insertions {
            if *a == anchor {
                output.push(text.clone());
            }
        }
    }

    let mut merged = output.join("\n");
    if base.ends_with('\n') || ours.ends_with('\n') || theirs.ends_with('\n') {
        merged.push('\n');
    }
    Some(merged)
}

/// Renders the classic conflict-marker block for a path; callers write
/// this into the working tree in place of the file's usual content
/// (`<<<<<<< ours … ||||||| base … ======= … >>>>>>> theirs`).
pub fn format_conflict_markers(conflict: &ConflictFile) -> String {
    let mut out = String::new();
    out.push_str("<<<<<<< ours\n");
    if let Some(ours) = &conflict.ours {
        out.push_str(ours);
        if !ours.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str("||||||| base\n");
    if let Some(base) = &conflict.base {
        out.push_str(base);
        if !base.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str("=======\n");
    if let Some(theirs) = &conflict.theirs {
        out.push_str(theirs);
        if !theirs.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str(">>>>>>> theirs\n");
    out
}

/// Result of merging two trees against a common base: either a clean tree
/// hash, or the structured conflicts blocking one.
pub struct TreeMergeResult {
    pub tree: Option<ObjectHash>,
    pub conflicts: Vec<ConflictFile>,
}

/// Exact (content-identical) renames: a path present in `base` but absent
/// from `side`, whose blob hash reappears at a different path in `side`.
fn exact_renames(base: &PathMap, side: &PathMap) -> HashMap<String, String> {
    let mut by_hash: HashMap<ObjectHash, Vec<&String>> = HashMap::new();
    for (path, (_, hash)) in side {
        by_hash.entry(*hash).or_default().push(path);
    }
    let mut renames = HashMap::new();
    for (old_path, (_, hash)) in base {
        if side.contains_key(old_path) {
            continue;
        }
        if let Some(candidates) = by_hash.get(hash) {
            if let Some(new_path) = candidates.iter().find(|p| !base.contains_key(p.as_str())) {
                renames.insert(old_path.clone(), (*new_path).clone());
            }
        }
    }
    renames
}

/// Three-way merge of two trees against their common base.
/// Writes no objects itself other than the new blobs produced by clean
/// text merges and the tree objects assembled from the result.
pub fn merge_trees(
    store: &ObjectStore,
    base_tree: Option<ObjectHash>,
    ours_tree: ObjectHash,
    theirs_tree: ObjectHash,
) -> Result<TreeMergeResult, GitError> {
    let base_map = match base_tree {
        Some(h) => flatten_tree(store, h)?,
        None => BTreeMap::new(),
    };
    let ours_map = flatten_tree(store, ours_tree)?;
    let theirs_map = flatten_tree(store, theirs_tree)?;

    let renamed_in_ours = exact_renames(&base_map, &ours_map);
    let renamed_in_theirs = exact_renames(&base_map, &theirs_map);

    let mut paths: std::collections::BTreeSet<String> = base_map
        .keys()
        .chain(ours_map.keys())
        .chain(theirs_map.keys())
        .cloned()
        .collect();
    // Renamed-away base paths are handled through their new path, not the
    // vacated old one.
    for old in renamed_in_ours.keys().chain(renamed_in_theirs.keys()) {
        paths.remove(old);
    }

    let mut merged_entries: BTreeMap<String, (TreeEntryMode, ObjectHash)> = BTreeMap::new();
    let mut conflicts = Vec::new();

    for path in paths {
        let base_entry = base_map.get(&path).copied();
        let ours_entry = ours_map.get(&path).copied();
        let theirs_entry = theirs_map.get(&path).copied();

        if ours_entry == theirs_entry {
            if let Some(entry) = ours_entry {
                merged_entries.insert(path, entry);
            }
            continue;
        }
        if ours_entry == base_entry {
            if let Some(entry) = theirs_entry {
                merged_entries.insert(path, entry);
            }
            continue;
        }
        if theirs_entry == base_entry {
            if let Some(entry) = ours_entry {
                merged_entries.insert(path, entry);
            }
            continue;
        }

        let renamed = renamed_in_ours.values().any(|p| *p == path)
            || renamed_in_theirs.values().any(|p| *p == path);
        if renamed {
            conflicts.push(ConflictFile {
                path: path.clone().into(),
                kind: ConflictKind::RenameConflict,
                ours: ours_entry.map(|_| path.clone()),
                theirs: theirs_entry.map(|_| path.clone()),
                base: base_entry.map(|_| path.clone()),
            });
            continue;
        }

        match (ours_entry, theirs_entry) {
            (None, Some(_)) | (Some(_), None) => {
                conflicts.push(ConflictFile {
                    path: path.clone().into(),
                    kind: ConflictKind::ModifyDelete,
                    ours: ours_entry.and_then(|(_, h)| read_blob_text(store, h).ok().flatten()),
                    theirs: theirs_entry.and_then(|(_, h)| read_blob_text(store, h).ok().flatten()),
                    base: base_entry.and_then(|(_, h)| read_blob_text(store, h).ok().flatten()),
                });
            }
            (Some((ours_mode, ours_hash)), Some((theirs_mode, theirs_hash))) => {
                let base_text = base_entry.and_then(|(_, h)| read_blob_text(store, h).ok().flatten());
                let ours_text = read_blob_text(store, ours_hash)?;
                let theirs_text = read_blob_text(store, theirs_hash)?;

                match (base_text.as_deref(), ours_text.as_deref(), theirs_text.as_deref()) {
                    (Some(base_text), Some(ours_text), Some(theirs_text)) => {
                        match three_way_text_merge(base_text, ours_text, theirs_text) {
                            Some(merged_text) => {
                                let blob = Blob::new(merged_text.into_bytes());
                                // Mode conflicts (e.g. exec bit flipped on one side only)
                                // aren't tracked separately; ours wins silently.
                                let _ = theirs_mode;
                                merged_entries.insert(path, (ours_mode, blob.id));
                            }
                            None => conflicts.push(ConflictFile {
                                path: path.clone().into(),
                                kind: ConflictKind::ContentDivergence,
                                ours: Some(ours_text.to_string()),
                                theirs: Some(theirs_text.to_string()),
                                base: Some(base_text.to_string()),
                            }),
                        }
                    }
                    _ => conflicts.push(ConflictFile {
                        path: path.clone().into(),
                        kind: ConflictKind::ContentDivergence,
                        ours: ours_text,
                        theirs: theirs_text,
                        base: base_text,
                    }),
                }
            }
            (None, None) => {}
        }
    }

    if !conflicts.is_empty() {
        return Ok(TreeMergeResult { tree: None, conflicts });
    }

    let tree_hash = write_tree_from_paths(store, &merged_entries)?;
    Ok(TreeMergeResult { tree: Some(tree_hash), conflicts: Vec::new() })
}

/// Rebuilds a nested tree structure from a flat path map and writes every
/// level through `store`, mirroring `Index::build_tree`'s bottom-up
/// construction but over merge output instead of staged paths.
fn write_tree_from_paths(
    store: &ObjectStore,
    paths: &BTreeMap<String, (TreeEntryMode, ObjectHash)>,
) -> Result<ObjectHash, GitError> {
    #[derive(Default)]
    struct DirNode {
        files: BTreeMap<String, (TreeEntryMode, ObjectHash)>,
        dirs: BTreeMap<String, DirNode>,
    }

    let mut root = DirNode::default();
    for (path, entry) in paths {
        let mut node = &mut root;
        let mut components: Vec<&str> = path.split('/').collect();
        let file_name = components.pop().expect("path has at least one component");
        for dir_name in components {
            node = node.dirs.entry(dir_name.to_string()).or_default();
        }
        node.files.insert(file_name.to_string(), *entry);
    }

    fn build(node: &DirNode, store: &ObjectStore) -> Result<ObjectHash, GitError> {
        let mut entries = Vec::new();
        for (name, (mode, hash)) in &node.files {
            entries.push(TreeEntry { mode: *mode, name: name.clone(), id: *hash });
        }
        for (name, child) in &node.dirs {
            let child_hash = build(child, store)?;
            entries.push(TreeEntry { mode: TreeEntryMode::Tree, name: name.clone(), id: child_hash });
        }
        let tree = Tree::new(entries)?;
        store.put(&Object::Tree(tree.clone()))?;
        Ok(tree.id)
    }

    build(&root, store)
}

/// Top-level merge entry point. `identity` stamps the merge
/// commit's author/committer when a new commit is produced.
#[instrument(skip(store))]
pub fn merge(
    store: &ObjectStore,
    ours: ObjectHash,
    theirs: ObjectHash,
    strategy: MergeStrategy,
    identity: (&str, &str),
    message: &str,
) -> Result<MergeOutcome, GitError> {
    if is_ancestor(store, theirs, ours)? {
        return Ok(MergeOutcome::AlreadyUpToDate);
    }
    if is_ancestor(store, ours, theirs)? {
        return Ok(MergeOutcome::FastForward(theirs));
    }
    if strategy == MergeStrategy::FastForwardOnly {
        return Err(GitError::InvalidArgument(
            "fast-forward-only merge requested but histories have diverged".to_string(),
        ));
    }
    if strategy == MergeStrategy::Rebase {
        return rebase_pr(store, theirs, ours, identity);
    }

    let base = merge_base(store, ours, theirs)?;
    let ours_commit = load_commit(store, &ours)?;
    let theirs_commit = load_commit(store, &theirs)?;
    let base_tree = match base {
        Some(b) => Some(load_commit(store, &b)?.tree_id),
        None => None,
    };

    let result = merge_trees(store, base_tree, ours_commit.tree_id, theirs_commit.tree_id)?;
    let Some(merged_tree) = result.tree else {
        return Err(GitError::Conflict { files: result.conflicts });
    };

    let (name, email) = identity;
    let now = chrono::Utc::now().timestamp();
    let author = Signature::new(SignatureKind::Author, name, email, now);
    let committer = Signature::new(SignatureKind::Committer, name, email, now);

    let parents = match strategy {
        MergeStrategy::Squash => vec![ours],
        _ => vec![ours, theirs],
    };
    let commit = Commit::new(author, committer, merged_tree, parents, message);
    store.put(&Object::Commit(commit.clone()))?;
    Ok(MergeOutcome::Merged(commit.id))
}

/// Cherry-picks a single commit onto `onto`, reusing three-way merge logic
/// with the cherry-picked commit's first parent as the base.
#[instrument(skip(store))]
pub fn cherry_pick(
    store: &ObjectStore,
    onto: ObjectHash,
    commit_hash: ObjectHash,
    identity: (&str, &str),
) -> Result<MergeOutcome, GitError> {
    let picked = load_commit(store, &commit_hash)?;
    let parent_tree = match picked.parent_commit_ids.first() {
        Some(p) => Some(load_commit(store, p)?.tree_id),
        None => None,
    };
    let onto_tree = load_commit(store, &onto)?.tree_id;

    let result = merge_trees(store, parent_tree, onto_tree, picked.tree_id)?;
    let Some(merged_tree) = result.tree else {
        return Err(GitError::Conflict { files: result.conflicts });
    };

    if merged_tree == onto_tree {
        return Ok(MergeOutcome::AlreadyUpToDate);
    }

    let (name, email) = identity;
    let now = chrono::Utc::now().timestamp();
    let author = picked.author.clone();
    let committer = Signature::new(SignatureKind::Committer, name, email, now);
    let commit = Commit::new(author, committer, merged_tree, vec![onto], &picked.message);
    store.put(&Object::Commit(commit.clone()))?;
    Ok(MergeOutcome::Merged(commit.id))
}

/// Rebases every commit unique to `head` (relative to `base`) onto `base`
/// in chronological (parent-to-child) order, stopping at the first
/// conflict.
pub fn rebase_pr(
    store: &ObjectStore,
    head: ObjectHash,
    base: ObjectHash,
    identity: (&str, &str),
) -> Result<MergeOutcome, GitError> {
    let merge_point = merge_base(store, head, base)?;
    let mut chain = Vec::new();
    let mut cursor = head;
    loop {
        if Some(cursor) == merge_point {
            break;
        }
        let commit = load_commit(store, &cursor)?;
        chain.push(cursor);
        match commit.parent_commit_ids.first() {
            Some(p) => cursor = *p,
            None => break,
        }
    }
    chain.reverse();

    let mut onto = base;
    for commit_hash in chain {
        match cherry_pick(store, onto, commit_hash, identity)? {
            MergeOutcome::Merged(new_hash) => onto = new_hash,
            MergeOutcome::AlreadyUpToDate => {}
            MergeOutcome::FastForward(_) => unreachable!("cherry_pick never fast-forwards"),
        }
    }
    Ok(MergeOutcome::Merged(onto))
}

/// Whether `head` can be fast-forwarded onto `base` without a merge commit.
pub fn can_fast_forward(store: &ObjectStore, head: ObjectHash, base: ObjectHash) -> Result<bool, GitError> {
    is_ancestor(store, head, base)
}
