//! Whole-repository scenario tests (`SPEC_FULL.md` §D, scenarios S1-S7
//! from the distilled spec plus fsck/gc round-trips).

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::tempdir;

use witrs::errors::GitError;
use witrs::hash::{set_hash_kind_for_test, HashKind};
use witrs::internal::odb::{Object, ObjectStore};
use witrs::merge::MergeStrategy;
use witrs::queue::{self, PrId, PrRecord};
use witrs::repository::{CheckoutMode, CheckoutTarget, CommitOptions, Repository};

fn identity() -> (&'static str, &'static str) {
    ("Test User", "test@example.com")
}

fn commit(repo: &Repository, message: &str) -> witrs::hash::ObjectHash {
    repo.commit(CommitOptions {
        message,
        identity: identity(),
        amend: false,
        bypass_hooks: false,
    })
    .unwrap()
}

/// Walks a commit's tree into a flat list of `(path, blob_hash)`, mirroring
/// what the facade does internally to feed the diff engine.
fn blob_paths(objects: &ObjectStore, commit_hash: witrs::hash::ObjectHash) -> Vec<(PathBuf, witrs::hash::ObjectHash)> {
    fn walk(objects: &ObjectStore, tree_id: witrs::hash::ObjectHash, prefix: &Path, out: &mut Vec<(PathBuf, witrs::hash::ObjectHash)>) {
        let Object::Tree(tree) = objects.get(&tree_id).unwrap() else { panic!("not a tree") };
        for entry in &tree.entries {
            let path = prefix.join(&entry.name);
            if entry.mode.is_tree() {
                walk(objects, entry.id, &path, out);
            } else {
                out.push((path, entry.id));
            }
        }
    }
    let Object::Commit(c) = objects.get(&commit_hash).unwrap() else { panic!("not a commit") };
    let mut out = Vec::new();
    walk(objects, c.tree_id, Path::new(""), &mut out);
    out
}

#[test]
fn s1_basic_commit_round_trip() {
    let _guard = set_hash_kind_for_test(HashKind::Sha1);
    let dir = tempdir().unwrap();
    let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();

    fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();
    repo.add("a.txt").unwrap();
    let commit_hash = commit(&repo, "m1");

    let Object::Commit(c) = repo.objects.get(&commit_hash).unwrap() else { panic!("not a commit") };
    let Object::Tree(tree) = repo.objects.get(&c.tree_id).unwrap() else { panic!("not a tree") };
    assert_eq!(tree.entries.len(), 1);
    assert_eq!(tree.entries[0].name, "a.txt");

    let expected_hash = witrs::repository::write_blob(&repo.objects, b"hello\n".to_vec()).unwrap();
    assert_eq!(tree.entries[0].id, expected_hash);

    repo.checkout(CheckoutTarget::Detached(commit_hash), CheckoutMode::Force).unwrap();
    assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"hello\n");
}

#[test]
fn s2_fast_forward_merge_advances_ref_without_a_new_commit() {
    let _guard = set_hash_kind_for_test(HashKind::Sha1);
    let dir = tempdir().unwrap();
    let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();

    fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();
    repo.add("a.txt").unwrap();
    commit(&repo, "m1");

    repo.create_branch("feat", None).unwrap();
    repo.checkout(CheckoutTarget::Branch("feat"), CheckoutMode::Force).unwrap();
    fs::write(dir.path().join("b.txt"), b"x").unwrap();
    repo.add("b.txt").unwrap();
    let feat_head = commit(&repo, "m2");

    repo.checkout(CheckoutTarget::Branch(witrs::repository::DEFAULT_BRANCH), CheckoutMode::Force).unwrap();
    let outcome = repo.merge("feat", MergeStrategy::FastForwardOnly, identity(), "merge feat").unwrap();
    assert_eq!(outcome, witrs::merge::MergeOutcome::FastForward(feat_head));
    assert_eq!(repo.head_commit().unwrap(), Some(feat_head));
}

#[test]
fn s3_three_way_non_conflicting_merge() {
    let _guard = set_hash_kind_for_test(HashKind::Sha1);
    let dir = tempdir().unwrap();
    let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();

    fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();
    repo.add("a.txt").unwrap();
    commit(&repo, "m1");

    repo.create_branch("feat", None).unwrap();
    repo.checkout(CheckoutTarget::Branch("feat"), CheckoutMode::Force).unwrap();
    fs::write(dir.path().join("a.txt"), b"HELLO\n").unwrap();
    repo.add("a.txt").unwrap();
    commit(&repo, "feat: uppercase line 1");

    repo.checkout(CheckoutTarget::Branch(witrs::repository::DEFAULT_BRANCH), CheckoutMode::Force).unwrap();
    fs::write(dir.path().join("a.txt"), b"hello\nworld\n").unwrap();
    repo.add("a.txt").unwrap();
    commit(&repo, "main: append world");

    let outcome = repo.merge("feat", MergeStrategy::ThreeWay, identity(), "merge feat").unwrap();
    let witrs::merge::MergeOutcome::Merged(merge_commit) = outcome else { panic!("expected a merge commit") };

    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "HELLO\nworld\n");

    let Object::Commit(c) = repo.objects.get(&merge_commit).unwrap() else { panic!("not a commit") };
    assert_eq!(c.parent_commit_ids.len(), 2);
}

#[test]
fn s4_three_way_conflicting_merge_reports_both_alternatives() {
    let _guard = set_hash_kind_for_test(HashKind::Sha1);
    let dir = tempdir().unwrap();
    let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();

    fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();
    repo.add("a.txt").unwrap();
    commit(&repo, "m1");

    repo.create_branch("feat", None).unwrap();
    repo.checkout(CheckoutTarget::Branch("feat"), CheckoutMode::Force).unwrap();
    fs::write(dir.path().join("a.txt"), b"feature says hi\n").unwrap();
    repo.add("a.txt").unwrap();
    commit(&repo, "feat: change line 1");

    repo.checkout(CheckoutTarget::Branch(witrs::repository::DEFAULT_BRANCH), CheckoutMode::Force).unwrap();
    fs::write(dir.path().join("a.txt"), b"main says hi\n").unwrap();
    repo.add("a.txt").unwrap();
    commit(&repo, "main: change line 1 differently");

    let err = repo.merge("feat", MergeStrategy::ThreeWay, identity(), "merge feat").unwrap_err();
    let GitError::Conflict { files } = err else { panic!("expected a conflict error") };
    assert_eq!(files.len(), 1);

    let conflict = &files[0];
    assert_eq!(conflict.path, Path::new("a.txt"));
    let marker_block = witrs::merge::format_conflict_markers(conflict);
    assert!(marker_block.contains("main says hi"));
    assert!(marker_block.contains("feature says hi"));
    assert!(marker_block.contains("<<<<<<< ours"));
    assert!(marker_block.contains("||||||| base"));
    assert!(marker_block.contains(">>>>>>> theirs"));
}

#[test]
fn s5_rename_detection_pairs_similar_content_across_paths() {
    let _guard = set_hash_kind_for_test(HashKind::Sha1);
    let dir = tempdir().unwrap();
    let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();

    let original = "line one\nline two\nline three\nline four\nline five\n\
                     line six\nline seven\nline eight\nline nine\nline ten\n";
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/alpha.ts"), original).unwrap();
    repo.add("src/alpha.ts").unwrap();
    let before = commit(&repo, "add alpha");

    fs::remove_file(dir.path().join("src/alpha.ts")).unwrap();
    repo.remove("src/alpha.ts").unwrap();
    // 90% identical: drop the last line, keep everything else.
    let modified = "line one\nline two\nline three\nline four\nline five\n\
                     line six\nline seven\nline eight\nline nine\n";
    fs::write(dir.path().join("src/beta.ts"), modified).unwrap();
    repo.add("src/beta.ts").unwrap();
    let after = commit(&repo, "rename alpha to beta");

    let old_blobs = blob_paths(&repo.objects, before);
    let new_blobs = blob_paths(&repo.objects, after);
    let objects = &repo.objects;
    let renames = witrs::diff::Diff::detect_renames(&old_blobs, &new_blobs, |_path, hash| {
        let Object::Blob(blob) = objects.get(hash).unwrap() else { panic!("not a blob") };
        blob.data
    });

    assert_eq!(renames.len(), 1);
    assert_eq!(renames[0].from, Path::new("src/alpha.ts"));
    assert_eq!(renames[0].to, Path::new("src/beta.ts"));
    assert!(renames[0].similarity >= 0.5);

    // No stray add/delete entries for alpha/beta outside the rename pairing.
    assert!(!old_blobs.iter().any(|(p, _)| p == Path::new("src/beta.ts")));
    assert!(!new_blobs.iter().any(|(p, _)| p == Path::new("src/alpha.ts")));
}

#[test]
fn s6_merge_queue_orders_by_predicted_conflict() {
    let _guard = set_hash_kind_for_test(HashKind::Sha1);
    let dir = tempdir().unwrap();
    let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();

    fs::write(dir.path().join("README.md"), "readme\n".repeat(5)).unwrap();
    fs::write(dir.path().join("package-lock.json"), "lockfile\n").unwrap();
    fs::create_dir_all(dir.path().join("docs")).unwrap();
    fs::write(dir.path().join("docs/x.md"), "docs\n").unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/a.ts"), "export const a = 1;\n").unwrap();
    repo.add_all().unwrap();
    let base = commit(&repo, "base");

    // P1 touches README.md (+20 lines).
    let mut readme = fs::read_to_string(dir.path().join("README.md")).unwrap();
    for i in 0..20 {
        readme.push_str(&format!("extra line {i}\n"));
    }
    fs::write(dir.path().join("README.md"), &readme).unwrap();
    repo.add("README.md").unwrap();
    let p1_head = commit(&repo, "p1: expand README");
    repo.checkout(CheckoutTarget::Detached(base), CheckoutMode::Force).unwrap();

    // P2 touches package-lock.json and src/a.ts.
    fs::write(dir.path().join("package-lock.json"), "lockfile changed\n").unwrap();
    fs::write(dir.path().join("src/a.ts"), "export const a = 2;\n").unwrap();
    repo.add("package-lock.json").unwrap();
    repo.add("src/a.ts").unwrap();
    let p2_head = commit(&repo, "p2: bump dep and touch a.ts");
    repo.checkout(CheckoutTarget::Detached(base), CheckoutMode::Force).unwrap();

    // P3 touches docs/x.md only.
    fs::write(dir.path().join("docs/x.md"), "docs changed\n").unwrap();
    repo.add("docs/x.md").unwrap();
    let p3_head = commit(&repo, "p3: edit docs");

    let records = vec![
        PrRecord { pr_id: PrId(1), head_hash: p1_head, base_hash: base },
        PrRecord { pr_id: PrId(2), head_hash: p2_head, base_hash: base },
        PrRecord { pr_id: PrId(3), head_hash: p3_head, base_hash: base },
    ];
    let analyses: Vec<_> = records.iter().map(|r| queue::analyze_pr(&repo.objects, r).unwrap()).collect();
    let ordered = queue::order(&analyses, &witrs::config::QueueWeights::default());

    assert_eq!(ordered[0], PrId(3));
    assert_eq!(ordered[2], PrId(2));
}

#[test]
fn s7_queue_bisection_isolates_the_one_conflicting_pr() {
    let _guard = set_hash_kind_for_test(HashKind::Sha1);
    let dir = tempdir().unwrap();
    let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();

    fs::write(dir.path().join("a.txt"), "base").unwrap();
    fs::write(dir.path().join("b.txt"), "base").unwrap();
    fs::write(dir.path().join("c.txt"), "base").unwrap();
    fs::write(dir.path().join("d.txt"), "base").unwrap();
    repo.add_all().unwrap();
    let base = commit(&repo, "base");

    fn branch_from(repo: &Repository, base: witrs::hash::ObjectHash, path: &str, content: &str, message: &str) -> witrs::hash::ObjectHash {
        repo.checkout(CheckoutTarget::Detached(base), CheckoutMode::Force).unwrap();
        fs::write(repo.work_dir.join(path), content).unwrap();
        repo.add(path).unwrap();
        commit(repo, message)
    }

    let p1 = branch_from(&repo, base, "a.txt", "p1", "p1");
    let p2 = branch_from(&repo, base, "b.txt", "p2", "p2");
    let p3 = branch_from(&repo, base, "c.txt", "p3", "p3");
    let p4 = branch_from(&repo, base, "d.txt", "p4", "p4");

    // Target has already diverged on c.txt, so only p3 conflicts at reassembly.
    let target = branch_from(&repo, base, "c.txt", "target-diverged", "target");

    let records = vec![
        PrRecord { pr_id: PrId(1), head_hash: p1, base_hash: base },
        PrRecord { pr_id: PrId(2), head_hash: p2, base_hash: base },
        PrRecord { pr_id: PrId(3), head_hash: p3, base_hash: base },
        PrRecord { pr_id: PrId(4), head_hash: p4, base_hash: base },
    ];

    let result = queue::process_batch(
        &repo.objects,
        target,
        &[PrId(1), PrId(2), PrId(3), PrId(4)],
        &records,
        identity(),
    );

    assert_eq!(result.failed, vec![PrId(3)]);
    assert_eq!(result.merged, vec![PrId(1), PrId(2), PrId(4)]);
    assert_ne!(result.new_head, target);
}

#[test]
fn fsck_and_gc_round_trip_after_a_merge() {
    let _guard = set_hash_kind_for_test(HashKind::Sha1);
    let dir = tempdir().unwrap();
    let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();

    fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();
    repo.add("a.txt").unwrap();
    commit(&repo, "m1");

    repo.create_branch("feat", None).unwrap();
    repo.checkout(CheckoutTarget::Branch("feat"), CheckoutMode::Force).unwrap();
    fs::write(dir.path().join("b.txt"), b"feature file\n").unwrap();
    repo.add("b.txt").unwrap();
    commit(&repo, "m2");

    repo.checkout(CheckoutTarget::Branch(witrs::repository::DEFAULT_BRANCH), CheckoutMode::Force).unwrap();
    repo.merge("feat", MergeStrategy::FastForwardOnly, identity(), "merge feat").unwrap();

    let before_gc = repo.fsck(true).unwrap();
    assert!(before_gc.corrupt_objects.is_empty());

    // Leave an orphan blob lying around before collecting.
    let orphan = witrs::repository::write_blob(&repo.objects, b"nobody references me".to_vec()).unwrap();
    assert!(repo.objects.exists(&orphan));

    let gc_report = repo.gc().unwrap();
    assert_eq!(gc_report.objects_removed, 1);
    assert!(!repo.objects.exists(&orphan));

    let after_gc = repo.fsck(true).unwrap();
    assert!(after_gc.corrupt_objects.is_empty());
    assert_eq!(after_gc.reachable_objects, before_gc.reachable_objects);

    assert_eq!(fs::read(dir.path().join("b.txt")).unwrap(), b"feature file\n");
}

#[test]
fn delete_branch_and_acl_denial_are_enforced_by_the_facade() {
    let _guard = set_hash_kind_for_test(HashKind::Sha1);
    let dir = tempdir().unwrap();
    let repo = Repository::init(dir.path(), HashKind::Sha1).unwrap();

    fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();
    repo.add("a.txt").unwrap();
    commit(&repo, "m1");
    repo.create_branch("throwaway", None).unwrap();

    repo.delete_branch("throwaway").unwrap();
    assert!(!repo.list_branches().unwrap().contains(&"throwaway".to_string()));

    let grants = witrs::acl::CollaboratorGrants {
        collaborators: vec![("bob".to_string(), witrs::acl::Role::Viewer)],
        ..Default::default()
    };
    let context = witrs::acl::AccessContext {
        user_id: Some("bob".to_string()),
        ..Default::default()
    };
    let decision = witrs::acl::decide(witrs::acl::Permission::Write, &grants, &context);
    assert!(!decision.allowed);
}
