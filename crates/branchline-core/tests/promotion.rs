//! Promotion Pipeline tests.

use std::sync::Arc;

use branchline_core::{Branchline, BranchlineError, Stage, StageBranches};
use branchline_store::fakes::{MemoryAuditLog, MemoryObjectStore};
use branchline_store::{CommitId, MergeOutcome};

fn pipeline_with(branches: StageBranches) -> (Arc<MemoryObjectStore>, Branchline, CommitId) {
    let store = Arc::new(MemoryObjectStore::new());
    let root = store.seed_branch(&branches.dev, &[("Files/config.yml", "v1")]);
    store.force_ref(&branches.uat, &root);
    store.force_ref(&branches.main, &root);
    let core = Branchline::new(store.clone(), Arc::new(MemoryAuditLog::new()), branches);
    (store, core, root)
}

fn pipeline() -> (Arc<MemoryObjectStore>, Branchline, CommitId) {
    pipeline_with(StageBranches::default())
}

// ===========================================================================
// Full promotion
// ===========================================================================

#[tokio::test]
async fn full_promotion_creates_two_parent_merge() {
    let (store, core, root) = pipeline();
    let dev_tip = store.commit_files("dev", &[("Files/feature.txt", Some("f"))], "feature");

    let outcome = core.pipeline.promote(Stage::Dev).await.unwrap();

    assert_eq!(outcome.from, Stage::Dev);
    assert_eq!(outcome.to, Stage::Uat);
    let merge = outcome.merge_commit().cloned().expect("merge commit");
    let info = store.commit_info(&merge).unwrap();
    assert_eq!(info.parents, vec![root, dev_tip]);
    assert_eq!(info.message, "Merging dev into uat");
    assert_eq!(store.ref_target("uat"), Some(merge.clone()));

    let records = core.audit().records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].commit_id, merge);
    assert_eq!(records[0].branch, "uat");
    assert_eq!(records[0].files, vec!["Files/feature.txt".to_string()]);
}

#[tokio::test]
async fn promotion_when_up_to_date_changes_nothing() {
    let (store, core, root) = pipeline();

    let outcome = core.pipeline.promote(Stage::Dev).await.unwrap();

    assert_eq!(outcome.merge, MergeOutcome::UpToDate);
    assert_eq!(outcome.merge_commit(), None);
    assert_eq!(store.ref_target("uat"), Some(root));
    assert!(core.audit().records().await.unwrap().is_empty());
}

#[tokio::test]
async fn uat_promotes_into_main() {
    let (store, core, _) = pipeline();
    store.commit_files("uat", &[("Files/release.txt", Some("r"))], "release notes");

    let outcome = core.pipeline.promote(Stage::Uat).await.unwrap();

    assert_eq!(outcome.target_branch, "main");
    assert_eq!(store.read_path("main", "Files/release.txt").as_deref(), Some("r"));
    let merge = outcome.merge_commit().unwrap();
    assert_eq!(
        store.commit_info(merge).unwrap().message,
        "Merging uat into main"
    );
}

#[tokio::test]
async fn main_has_no_downstream_stage() {
    let (_, core, _) = pipeline();
    let err = core.pipeline.promote(Stage::Main).await.unwrap_err();
    assert!(matches!(err, BranchlineError::InvalidChangeSet(_)));
}

#[tokio::test]
async fn diverged_stages_report_merge_conflict() {
    let (store, core, root) = pipeline();
    store.commit_files("dev", &[("Files/config.yml", Some("dev"))], "dev config");
    store.commit_files("uat", &[("Files/config.yml", Some("uat"))], "uat config");
    let uat_tip = store.ref_target("uat").unwrap();

    let err = core.pipeline.promote(Stage::Dev).await.unwrap_err();

    match err {
        BranchlineError::MergeConflict { base, head } => {
            assert_eq!(base, "uat");
            assert_eq!(head, "dev");
        }
        other => panic!("expected MergeConflict, got {other:?}"),
    }
    assert_eq!(store.ref_target("uat"), Some(uat_tip));
    assert_ne!(store.ref_target("uat"), Some(root));
}

#[tokio::test]
async fn promotion_retry_after_outage_succeeds() {
    let (store, core, _) = pipeline();
    store.commit_files("dev", &[("Files/feature.txt", Some("f"))], "feature");

    store.set_unavailable(true);
    let err = core.pipeline.promote(Stage::Dev).await.unwrap_err();
    assert_eq!(err.kind(), "upstream_unavailable");

    store.set_unavailable(false);
    let outcome = core.pipeline.promote(Stage::Dev).await.unwrap();
    assert!(outcome.merge_commit().is_some());

    // a second retry finds nothing left to promote
    let again = core.pipeline.promote(Stage::Dev).await.unwrap();
    assert_eq!(again.merge, MergeOutcome::UpToDate);
}

#[tokio::test]
async fn custom_stage_branch_names() {
    let branches = StageBranches {
        dev: "dev".to_string(),
        uat: "UAT".to_string(),
        main: "main".to_string(),
    };
    let (store, core, _) = pipeline_with(branches);
    store.commit_files("dev", &[("Files/x.txt", Some("x"))], "x");

    let outcome = core.pipeline.promote(Stage::Dev).await.unwrap();

    assert_eq!(outcome.target_branch, "UAT");
    let merge = outcome.merge_commit().unwrap();
    assert_eq!(
        store.commit_info(merge).unwrap().message,
        "Merging dev into UAT"
    );
}

// ===========================================================================
// Selective promotion
// ===========================================================================

#[tokio::test]
async fn selective_promotion_keeps_picks_before_conflict() {
    let (store, core, _) = pipeline();
    let sha1 = store.commit_files("dev", &[("Files/one.txt", Some("1"))], "one");
    let sha2 = store.commit_files("dev", &[("Files/config.yml", Some("v2"))], "config v2");
    let sha3 = store.commit_files("dev", &[("Files/three.txt", Some("3"))], "three");
    store.commit_files("uat", &[("Files/config.yml", Some("uat"))], "uat config");

    let result = core
        .pipeline
        .promote_selected(vec![sha1.clone(), sha2.clone(), sha3])
        .await
        .unwrap();

    assert!(!result.is_complete());
    assert_eq!(result.promoted.len(), 1);
    assert_eq!(result.promoted[0].source, sha1);
    let failure = result.failure.unwrap();
    assert_eq!(failure.commit, sha2);
    assert_eq!(failure.kind, "conflict_on_apply");

    assert_eq!(store.ref_target("uat"), Some(result.promoted[0].commit_id.clone()));
    assert_eq!(store.read_path("uat", "Files/one.txt").as_deref(), Some("1"));
    assert_eq!(store.read_path("uat", "Files/config.yml").as_deref(), Some("uat"));
    assert_eq!(store.read_path("uat", "Files/three.txt"), None);

    let records = core.audit().records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].commit_id, result.promoted[0].commit_id);
    assert_eq!(records[0].files, vec!["Files/one.txt".to_string()]);
}

#[tokio::test]
async fn selective_promotion_applies_every_clean_commit() {
    let (store, core, root) = pipeline();
    let sha1 = store.commit_files("dev", &[("Files/one.txt", Some("1"))], "one");
    let sha2 = store.commit_files("dev", &[("Files/two.txt", Some("2"))], "two");

    let result = core
        .pipeline
        .promote_selected(vec![sha2.clone(), sha1.clone()])
        .await
        .unwrap();

    assert!(result.is_complete());
    assert_eq!(result.source_branch, "dev");
    assert_eq!(result.target_branch, "uat");
    let sources: Vec<&CommitId> = result.promoted.iter().map(|p| &p.source).collect();
    assert_eq!(sources, vec![&sha2, &sha1]);

    let first = store.commit_info(&result.promoted[0].commit_id).unwrap();
    assert_eq!(first.parents, vec![root]);
    assert_eq!(core.audit().records().await.unwrap().len(), 2);
}

#[tokio::test]
async fn selective_promotion_requires_commits() {
    let (_, core, _) = pipeline();
    let err = core.pipeline.promote_selected(vec![]).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_change_set");
}

#[tokio::test]
async fn selective_promotion_refuses_commits_off_dev() {
    let (store, core, root) = pipeline();
    let on_dev = store.commit_files("dev", &[("Files/one.txt", Some("1"))], "one");
    store.force_ref("feature", &root);
    let off_dev = store.commit_files("feature", &[("Files/secret.txt", Some("s"))], "unreviewed");

    let result = core
        .pipeline
        .promote_selected(vec![on_dev.clone(), off_dev.clone()])
        .await
        .unwrap();

    assert_eq!(result.promoted.len(), 1);
    assert_eq!(result.promoted[0].source, on_dev);
    let failure = result.failure.unwrap();
    assert_eq!(failure.commit, off_dev);
    assert_eq!(failure.kind, "invalid_change_set");
    assert!(failure.error.contains("not on branch 'dev'"));
    assert_eq!(store.read_path("uat", "Files/secret.txt"), None);
    assert_eq!(store.ref_target("uat"), Some(result.promoted[0].commit_id.clone()));
}

#[tokio::test]
async fn selective_promotion_rejects_malformed_commit_ids() {
    let (store, core, root) = pipeline();

    let result = core
        .pipeline
        .promote_selected(vec![CommitId::new("dev/../main")])
        .await
        .unwrap();

    assert!(result.promoted.is_empty());
    assert_eq!(result.failure.unwrap().kind, "invalid_change_set");
    assert_eq!(store.ref_target("uat"), Some(root));
}
