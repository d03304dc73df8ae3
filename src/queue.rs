//! The merge queue: analyzes a batch of pull requests against a common
//! target, predicts pairwise conflicts, orders them to minimize predicted
//! conflict, and reassembles them into a linear sequence of commits (spec
//! §4.10, "the hardest subsystem"). Composes C2/C4/C7/C9: it reads objects,
//! drives C9's three-way merge, and leaves the ref update to the caller.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::instrument;

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::tree::TreeEntryMode;
use crate::internal::odb::{Object, ObjectStore};
use crate::merge;

/// One pull request under consideration, identified against a common
/// target branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PrId(pub u64);

#[derive(Debug, Clone)]
pub struct PrRecord {
    pub pr_id: PrId,
    pub head_hash: ObjectHash,
    pub base_hash: ObjectHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: String,
    pub change_type: ChangeType,
    pub additions: usize,
    pub deletions: usize,
    pub old_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub hash: ObjectHash,
    pub message: String,
    pub author: String,
    pub files: Vec<String>,
}

/// Per-PR analysis: every file touched, every commit, the directories
/// involved, and the subset of files flagged as conflict-prone (spec
/// §4.10 "Per-PR analysis").
#[derive(Debug, Clone)]
pub struct PrAnalysis {
    pub pr_id: PrId,
    pub files: Vec<FileChange>,
    pub commits: Vec<CommitInfo>,
    pub directories: BTreeSet<String>,
    pub conflict_areas: BTreeSet<String>,
}

/// Recognizable lockfile/generated-file names that always count as a
/// conflict area regardless of churn.
const LOCKFILE_NAMES: &[&str] = &[
    "Cargo.lock",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Gemfile.lock",
    "poetry.lock",
];

fn is_conflict_area(path: &str, additions: usize, deletions: usize) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    if LOCKFILE_NAMES.contains(&file_name) {
        return true;
    }
    if path.contains("/migrations/") || path.contains("schema") {
        return true;
    }
    if path.ends_with(".generated.rs") || path.ends_with(".min.js") || path.contains("/generated/") {
        return true;
    }
    additions + deletions > 100
}

fn directory_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

/// Flattens a tree into `path -> (mode, blob_hash)`, recursing through
/// subtrees. Paths use `/` regardless of platform.
fn flatten_tree(
    store: &ObjectStore,
    tree_id: ObjectHash,
    prefix: &str,
    out: &mut BTreeMap<String, (TreeEntryMode, ObjectHash)>,
) -> Result<(), GitError> {
    let Object::Tree(tree) = store.get(&tree_id)? else {
        return Err(GitError::InvalidArgument(format!("{tree_id} is not a tree")));
    };
    for entry in &tree.entries {
        let path = if prefix.is_empty() { entry.name.clone() } else { format!("{prefix}/{}", entry.name) };
        if entry.mode.is_tree() {
            flatten_tree(store, entry.id, &path, out)?;
        } else {
            out.insert(path, (entry.mode, entry.id));
        }
    }
    Ok(())
}

fn line_count(store: &ObjectStore, hash: ObjectHash) -> Result<usize, GitError> {
    match store.get(&hash)? {
        Object::Blob(blob) => Ok(String::from_utf8_lossy(&blob.data).lines().count()),
        other => Err(GitError::InvalidArgument(format!("{} is a {:?}, not a blob", hash, other.object_type()))),
    }
}

/// Walks `base_hash..head_hash`'s first-parent chain for commit metadata,
/// and diffs `base_hash`'s tree against `head_hash`'s tree for file-level
/// changes.
#[instrument(skip(store))]
pub fn analyze_pr(store: &ObjectStore, record: &PrRecord) -> Result<PrAnalysis, GitError> {
    let base_commit = match store.get(&record.base_hash)? {
        Object::Commit(c) => c,
        other => return Err(GitError::InvalidArgument(format!("{} is not a commit", other.object_type()))),
    };
    let head_commit = match store.get(&record.head_hash)? {
        Object::Commit(c) => c,
        other => return Err(GitError::InvalidArgument(format!("{} is not a commit", other.object_type()))),
    };

    let mut base_files = BTreeMap::new();
    flatten_tree(store, base_commit.tree_id, "", &mut base_files)?;
    let mut head_files = BTreeMap::new();
    flatten_tree(store, head_commit.tree_id, "", &mut head_files)?;

    let mut files = Vec::new();
    let mut directories = BTreeSet::new();
    let mut conflict_areas = BTreeSet::new();

    let all_paths: BTreeSet<&String> = base_files.keys().chain(head_files.keys()).collect();
    for path in all_paths {
        let in_base = base_files.get(path);
        let in_head = head_files.get(path);
        let (change_type, additions, deletions) = match (in_base, in_head) {
            (None, Some((_, hash))) => (ChangeType::Added, line_count(store, *hash)?, 0),
            (Some(_), None) => (ChangeType::Deleted, 0, line_count(store, in_base.unwrap().1)?),
            (Some((_, b)), Some((_, h))) if b == h => continue,
            (Some((_, b)), Some((_, h))) => {
                (ChangeType::Modified, line_count(store, *h)?, line_count(store, *b)?)
            }
            (None, None) => unreachable!(),
        };

        if is_conflict_area(path, additions, deletions) {
            conflict_areas.insert(path.clone());
        }
        directories.insert(directory_of(path));
        files.push(FileChange {
            path: path.clone(),
            change_type,
            additions,
            deletions,
            old_path: None,
        });
    }

    let mut commits = Vec::new();
    let mut cursor = record.head_hash;
    while cursor != record.base_hash {
        let commit = match store.get(&cursor)? {
            Object::Commit(c) => c,
            other => return Err(GitError::InvalidArgument(format!("{} is not a commit", other.object_type()))),
        };
        let mut commit_files = BTreeMap::new();
        flatten_tree(store, commit.tree_id, "", &mut commit_files)?;
        commits.push(CommitInfo {
            hash: commit.id,
            message: commit.message.clone(),
            author: commit.author.to_string(),
            files: commit_files.keys().cloned().collect(),
        });
        match commit.parent_commit_ids.first() {
            Some(parent) => cursor = *parent,
            None => break,
        }
    }
    commits.reverse();

    Ok(PrAnalysis { pr_id: record.pr_id, files, commits, directories, conflict_areas })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Pr1First,
    Pr2First,
    ManualRequired,
}

#[derive(Debug, Clone)]
pub struct ConflictPrediction {
    pub probability: f64,
    pub conflicting_files: Vec<String>,
    pub resolution: Resolution,
}

fn total_churn(analysis: &PrAnalysis) -> usize {
    analysis.files.iter().map(|f| f.additions + f.deletions).sum()
}

/// Scores the predicted conflict between two PRs' analyses from direct
/// file overlap, shared conflict-area files, and directory overlap (spec
/// §4.10 "Conflict prediction").
pub fn predict_conflicts(
    pr1: &PrAnalysis,
    pr2: &PrAnalysis,
    weights: &crate::config::QueueWeights,
) -> ConflictPrediction {
    let pr1_paths: HashSet<&str> = pr1.files.iter().map(|f| f.path.as_str()).collect();
    let pr2_paths: HashSet<&str> = pr2.files.iter().map(|f| f.path.as_str()).collect();
    let direct_overlap: Vec<&str> = pr1_paths.intersection(&pr2_paths).copied().collect();

    let conflict_area_overlap: Vec<&str> = pr1
        .conflict_areas
        .iter()
        .filter(|p| pr2.conflict_areas.contains(p.as_str()))
        .map(|p| p.as_str())
        .collect();

    let directory_overlap = pr1.directories.intersection(&pr2.directories).count();

    let weighted_sum = direct_overlap.len() as f64 * weights.direct_overlap
        + conflict_area_overlap.len() as f64 * weights.conflict_area_overlap
        + directory_overlap as f64 * weights.directory_overlap;
    let probability = (weighted_sum / weights.normalization).clamp(0.0, 1.0);

    let mut conflicting_files: Vec<String> = direct_overlap
        .iter()
        .chain(conflict_area_overlap.iter())
        .map(|s| s.to_string())
        .collect();
    conflicting_files.sort();
    conflicting_files.dedup();

    let resolution = if probability > weights.manual_required_threshold {
        Resolution::ManualRequired
    } else if total_churn(pr1) <= total_churn(pr2) {
        Resolution::Pr1First
    } else {
        Resolution::Pr2First
    };

    ConflictPrediction { probability, conflicting_files, resolution }
}

/// Greedily orders PRs: at each step, picks the remaining PR whose
/// predicted-conflict score against already-ordered PRs (weight x2) plus
/// still-remaining PRs (weight x1) is minimal. Ties broken by PR id (spec
/// §4.10 "Ordering").
pub fn order(analyses: &[PrAnalysis], weights: &crate::config::QueueWeights) -> Vec<PrId> {
    let mut remaining: Vec<&PrAnalysis> = analyses.iter().collect();
    let mut ordered: Vec<&PrAnalysis> = Vec::new();

    while !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f64::MAX;
        for (idx, candidate) in remaining.iter().enumerate() {
            let ordered_score: f64 = ordered
                .iter()
                .map(|o| predict_conflicts(candidate, o, weights).probability * 2.0)
                .sum();
            let remaining_score: f64 = remaining
                .iter()
                .filter(|other| other.pr_id != candidate.pr_id)
                .map(|other| predict_conflicts(candidate, other, weights).probability)
                .sum();
            let score = ordered_score + remaining_score;
            if score < best_score || (score == best_score && candidate.pr_id < remaining[best_idx].pr_id) {
                best_score = score;
                best_idx = idx;
            }
        }
        ordered.push(remaining.remove(best_idx));
    }

    ordered.into_iter().map(|a| a.pr_id).collect()
}

/// One commit produced during reassembly.
#[derive(Debug, Clone)]
pub struct ReassembledCommit {
    pub original_hash: ObjectHash,
    pub new_hash: ObjectHash,
    pub pr_id: PrId,
    pub order: usize,
}

#[derive(Debug, Clone)]
pub struct ReassemblyFailure {
    pub failed_pr: PrId,
    pub partial_reassembly: Vec<ReassembledCommit>,
}

/// Cherry-picks each PR's commits in chronological order onto a running
/// head, starting from `target`. On a clean cherry-pick, records the
/// mapping; on failure, collapses the remainder of that PR into a single
/// merge commit; any unresolvable conflict aborts the whole reassembly
///.
#[instrument(skip(store, records, identity))]
pub fn reassemble(
    store: &ObjectStore,
    target: ObjectHash,
    ordered_ids: &[PrId],
    records: &[PrRecord],
    identity: (&str, &str),
) -> Result<(ObjectHash, Vec<ReassembledCommit>), ReassemblyFailure> {
    let mut head = target;
    let mut produced = Vec::new();

    for &pr_id in ordered_ids {
        let record = records
            .iter()
            .find(|r| r.pr_id == pr_id)
            .expect("ordered_ids must be drawn from records");

        let analysis = analyze_pr(store, record).map_err(|_| ReassemblyFailure {
            failed_pr: pr_id,
            partial_reassembly: produced.clone(),
        })?;

        let mut pr_failed = false;
        for (order_idx, commit) in analysis.commits.iter().enumerate() {
            match merge::cherry_pick(store, head, commit.hash, identity) {
                Ok(merge::MergeOutcome::Merged(new_hash)) => {
                    produced.push(ReassembledCommit {
                        original_hash: commit.hash,
                        new_hash,
                        pr_id,
                        order: order_idx,
                    });
                    head = new_hash;
                }
                Ok(merge::MergeOutcome::AlreadyUpToDate) => {}
                Ok(merge::MergeOutcome::FastForward(_)) => unreachable!("cherry_pick never fast-forwards"),
                Err(GitError::Conflict { .. }) => {
                    pr_failed = true;
                    break;
                }
                Err(_) => {
                    return Err(ReassemblyFailure { failed_pr: pr_id, partial_reassembly: produced });
                }
            }
        }

        if pr_failed {
            match merge::merge(store, head, record.head_hash, merge::MergeStrategy::Squash, identity, &format!("merge remainder of PR {}", pr_id.0)) {
                Ok(merge::MergeOutcome::Merged(new_hash)) => {
                    produced.push(ReassembledCommit {
                        original_hash: record.head_hash,
                        new_hash,
                        pr_id,
                        order: analysis.commits.len(),
                    });
                    head = new_hash;
                }
                Ok(merge::MergeOutcome::AlreadyUpToDate) => {}
                Ok(merge::MergeOutcome::FastForward(new_hash)) => {
                    head = new_hash;
                }
                Err(_) => {
                    return Err(ReassemblyFailure { failed_pr: pr_id, partial_reassembly: produced });
                }
            }
        }
    }

    Ok((head, produced))
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub merged: Vec<PrId>,
    pub failed: Vec<PrId>,
    pub new_head: ObjectHash,
}

/// Attempts the whole batch; on failure (and size > 1) recursively bisects
/// in half, running each half in sequence atop the previous success, to
/// isolate the failing PR(s) without redoing work already proven good
///.
#[instrument(skip(store, records, identity))]
pub fn process_batch(
    store: &ObjectStore,
    target: ObjectHash,
    ids: &[PrId],
    records: &[PrRecord],
    identity: (&str, &str),
) -> BatchResult {
    if ids.is_empty() {
        return BatchResult { merged: Vec::new(), failed: Vec::new(), new_head: target };
    }

    match reassemble(store, target, ids, records, identity) {
        Ok((new_head, _)) => BatchResult { merged: ids.to_vec(), failed: Vec::new(), new_head },
        Err(failure) if ids.len() == 1 => {
            BatchResult { merged: Vec::new(), failed: vec![failure.failed_pr], new_head: target }
        }
        Err(_) => {
            let mid = ids.len() / 2;
            let (left, right) = ids.split_at(mid);
            let left_result = process_batch(store, target, left, records, identity);
            let right_result = process_batch(store, left_result.new_head, right, records, identity);
            BatchResult {
                merged: left_result.merged.into_iter().chain(right_result.merged).collect(),
                failed: left_result.failed.into_iter().chain(right_result.failed).collect(),
                new_head: right_result.new_head,
            }
        }
    }
}

/// Re-exposes C9's fast-forward check for queue callers (spec §4.10
/// "Rebase and fast-forward helpers").
pub fn can_fast_forward(store: &ObjectStore, head: ObjectHash, base: ObjectHash) -> Result<bool, GitError> {
    merge::can_fast_forward(store, head, base)
}

/// Re-exposes C9's rebase for queue callers.
pub fn rebase_pr(
    store: &ObjectStore,
    head: ObjectHash,
    base: ObjectHash,
    identity: (&str, &str),
) -> Result<merge::MergeOutcome, GitError> {
    merge::rebase_pr(store, head, base, identity)
}
