//! HTTP surface tests against the in-memory store.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use branchline_core::{Branchline, StageBranches, StagingArea};
use branchline_store::fakes::{MemoryAuditLog, MemoryObjectStore};
use branchline_store::CommitId;
use branchlined::{router, AppState};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "branchline-test-boundary";

struct Harness {
    store: Arc<MemoryObjectStore>,
    app: Router,
    root: CommitId,
    _uploads: TempDir,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryObjectStore::new());
    let root = store.seed_branch("dev", &[("Files/config.yml", "v1")]);
    store.force_ref("uat", &root);
    store.force_ref("main", &root);

    let uploads = TempDir::new().unwrap();
    let core = Branchline::new(
        store.clone(),
        Arc::new(MemoryAuditLog::new()),
        StageBranches::default(),
    );
    let state = AppState::new(core, StagingArea::new(uploads.path()));
    Harness {
        store,
        app: router(state, 1024 * 1024),
        root,
        _uploads: uploads,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn upload(field: &str, file_name: &str, content: &str) -> Request<Body> {
    let body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         {content}\r\n\
         --{BOUNDARY}--\r\n"
    );
    Request::builder()
        .method("POST")
        .uri("/upload-file")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

// ===========================================================================
// Health and uploads
// ===========================================================================

#[tokio::test]
async fn health_reports_healthy() {
    let h = harness();
    let (status, body) = send(&h.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn uploaded_file_is_committed_under_files() {
    let h = harness();

    let (status, body) = send(&h.app, upload("file", "docs/notes.txt", "hello")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fileName"], "notes.txt");

    let (status, body) = send(
        &h.app,
        post(
            "/git/commit",
            json!({"branch": "dev", "files": ["notes.txt"], "message": "add notes"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["commitMessage"], "add notes");
    assert_eq!(body["parent"], h.root.as_str());
    assert_eq!(body["changed"], true);

    let tip = h.store.ref_target("dev").unwrap();
    assert_eq!(body["commitId"], tip.as_str());
    assert_eq!(h.store.read_path("dev", "Files/notes.txt").as_deref(), Some("hello"));
    assert_eq!(h.store.commit_info(&tip).unwrap().message, "add notes");
}

#[tokio::test]
async fn commit_defaults_to_dev_and_api_message() {
    let h = harness();
    send(&h.app, upload("file", "a.txt", "a")).await;

    let (status, body) = send(&h.app, post("/git/commit", json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["branch"], "dev");
    assert_eq!(body["commitMessage"], "Commit from API");
    assert_eq!(h.store.read_path("dev", "Files/a.txt").as_deref(), Some("a"));
}

#[tokio::test]
async fn upload_without_file_field_is_rejected() {
    let h = harness();
    let (status, body) = send(&h.app, upload("attachment", "a.txt", "a")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_change_set");
}

#[tokio::test]
async fn committing_unstaged_file_is_not_found() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        post("/git/commit", json!({"branch": "dev", "files": ["ghost.txt"]})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
    assert_eq!(h.store.ref_target("dev"), Some(h.root));
}

// ===========================================================================
// Inline commits
// ===========================================================================

#[tokio::test]
async fn inline_change_set_writes_and_deletes() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        post(
            "/git/commit/contents",
            json!({
                "branch": "dev",
                "message": "rework",
                "changes": [
                    {"path": "/Files/bin.dat", "content": "aGk=", "encoding": "base64"},
                    {"path": "Files/config.yml", "delete": true}
                ]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["changed"], true);
    assert_eq!(h.store.read_path("dev", "Files/bin.dat").as_deref(), Some("hi"));
    assert_eq!(h.store.read_path("dev", "Files/config.yml"), None);
}

#[tokio::test]
async fn stale_expected_tip_is_conflict() {
    let h = harness();
    h.store
        .commit_files("dev", &[("Files/other.txt", Some("o"))], "someone else");

    let (status, body) = send(
        &h.app,
        post(
            "/git/commit/contents",
            json!({
                "branch": "dev",
                "expectedTip": h.root.as_str(),
                "changes": [{"path": "Files/x.txt", "content": "x"}]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "stale_ref");
    assert_eq!(h.store.read_path("dev", "Files/x.txt"), None);
}

#[tokio::test]
async fn empty_change_set_reports_nothing_to_commit() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        post("/git/commit/contents", json!({"branch": "dev", "changes": []})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], false);
    assert_eq!(body["commitId"], h.root.as_str());
}

#[tokio::test]
async fn outage_maps_to_bad_gateway() {
    let h = harness();
    h.store.set_unavailable(true);
    let (status, body) = send(
        &h.app,
        post(
            "/git/commit/contents",
            json!({"branch": "dev", "changes": [{"path": "a", "content": "a"}]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "upstream_unavailable");
}

// ===========================================================================
// Cherry-pick and reviews
// ===========================================================================

#[tokio::test]
async fn cherry_pick_applies_commits_in_order() {
    let h = harness();
    let a = h.store.commit_files("dev", &[("Files/a.txt", Some("a"))], "a");
    let b = h.store.commit_files("dev", &[("Files/b.txt", Some("b"))], "b");

    let (status, body) = send(
        &h.app,
        post(
            "/git/cherrypick",
            json!({"commits": [a.as_str(), b.as_str()], "targetBranch": "uat"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["previousTip"], h.root.as_str());
    let applied = body["applied"].as_array().unwrap();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0]["source"], a.as_str());
    assert_eq!(applied[1]["message"], "[Cherry-pick] b");
    assert_eq!(
        h.store.ref_target("uat").unwrap().as_str(),
        applied[1]["commitId"].as_str().unwrap()
    );
}

#[tokio::test]
async fn cherry_pick_conflict_leaves_target_untouched() {
    let h = harness();
    let a = h.store.commit_files("dev", &[("Files/a.txt", Some("a"))], "a");
    let b = h
        .store
        .commit_files("dev", &[("Files/config.yml", Some("v2"))], "config");
    let uat = h
        .store
        .commit_files("uat", &[("Files/config.yml", Some("uat"))], "uat config");

    let (status, body) = send(
        &h.app,
        post(
            "/git/cherrypick",
            json!({"commits": [a.as_str(), b.as_str()], "targetBranch": "uat"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict_on_apply");
    assert!(body["error"].as_str().unwrap().contains("Files/config.yml"));
    assert_eq!(h.store.ref_target("uat"), Some(uat));
}

#[tokio::test]
async fn cherry_pick_requires_target_and_commits() {
    let h = harness();
    let (status, body) = send(&h.app, post("/git/cherrypick", json!({"commits": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_change_set");
}

#[tokio::test]
async fn review_is_opened_then_approved() {
    let h = harness();
    let a = h.store.commit_files("dev", &[("Files/a.txt", Some("a"))], "a");

    let (status, opened) = send(
        &h.app,
        post(
            "/git/cherrypick/review",
            json!({"commits": [a.as_str()], "targetBranch": "uat"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{opened}");
    assert_eq!(h.store.ref_target("uat"), Some(h.root.clone()));

    let id = opened["review"]["id"].as_u64().unwrap();
    let branch = opened["branch"].as_str().unwrap().to_string();
    assert!(branch.starts_with("cherry-pick/uat/"));

    let (status, merged) = send(
        &h.app,
        post(
            &format!("/git/reviews/{id}/approve"),
            json!({"branch": branch, "method": "squash"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{merged}");
    assert_eq!(merged["review"], id);
    let tip = h.store.ref_target("uat").unwrap();
    assert_eq!(merged["commitId"], tip.as_str());
    assert_eq!(h.store.read_path("uat", "Files/a.txt").as_deref(), Some("a"));
    assert_eq!(h.store.ref_target(&branch), None);
}

#[tokio::test]
async fn approval_checks_branch_against_stored_review() {
    let h = harness();
    let a = h.store.commit_files("dev", &[("Files/a.txt", Some("a"))], "a");

    let (_, opened) = send(
        &h.app,
        post(
            "/git/cherrypick/review",
            json!({"commits": [a.as_str()], "targetBranch": "uat"}),
        ),
    )
    .await;
    let id = opened["review"]["id"].as_u64().unwrap();
    let branch = opened["branch"].as_str().unwrap().to_string();

    let (status, body) = send(
        &h.app,
        post(&format!("/git/reviews/{id}/approve"), json!({"branch": "main"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["kind"], "invalid_change_set");
    assert_eq!(h.store.ref_target("main"), Some(h.root.clone()));
    assert_eq!(h.store.ref_target("uat"), Some(h.root.clone()));
    assert!(h.store.ref_target(&branch).is_some());

    let (status, merged) = send(&h.app, post(&format!("/git/reviews/{id}/approve"), json!({}))).await;
    assert_eq!(status, StatusCode::OK, "{merged}");
    assert_eq!(h.store.read_path("uat", "Files/a.txt").as_deref(), Some("a"));
    assert_eq!(h.store.ref_target(&branch), None);
}

// ===========================================================================
// Promotion
// ===========================================================================

#[tokio::test]
async fn dev_to_uat_merges() {
    let h = harness();
    h.store.commit_files("dev", &[("Files/f.txt", Some("f"))], "f");

    let (status, body) = send(&h.app, post("/git/promote/dev-to-uat", json!({}))).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["message"], "dev merged into uat");
    assert_eq!(body["merge"]["result"], "merged");
    assert_eq!(h.store.read_path("uat", "Files/f.txt").as_deref(), Some("f"));
}

#[tokio::test]
async fn uat_to_main_when_up_to_date() {
    let h = harness();
    let (status, body) = send(&h.app, post("/git/promote/uat-to-main", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["merge"]["result"], "up_to_date");
    assert_eq!(h.store.ref_target("main"), Some(h.root));
}

#[tokio::test]
async fn diverged_promotion_is_conflict() {
    let h = harness();
    h.store
        .commit_files("dev", &[("Files/config.yml", Some("dev"))], "dev");
    h.store
        .commit_files("uat", &[("Files/config.yml", Some("uat"))], "uat");

    let (status, body) = send(&h.app, post("/git/promote/dev-to-uat", json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "merge_conflict");
}

#[tokio::test]
async fn selective_promotion_reports_partial_progress() {
    let h = harness();
    let one = h.store.commit_files("dev", &[("Files/one.txt", Some("1"))], "one");
    let two = h
        .store
        .commit_files("dev", &[("Files/config.yml", Some("v2"))], "two");
    h.store
        .commit_files("uat", &[("Files/config.yml", Some("uat"))], "uat");

    let (status, body) = send(
        &h.app,
        post(
            "/git/promote/selective",
            json!({"commits": [one.as_str(), two.as_str()]}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["promoted"].as_array().unwrap().len(), 1);
    assert_eq!(body["failure"]["commit"], two.as_str());
    assert_eq!(body["failure"]["kind"], "conflict_on_apply");
    assert_eq!(h.store.read_path("uat", "Files/one.txt").as_deref(), Some("1"));
}

// ===========================================================================
// Branches and audit
// ===========================================================================

#[tokio::test]
async fn branch_lookup_accepts_slashes() {
    let h = harness();
    h.store.force_ref("feature/login", &h.root);

    let (status, body) = send(&h.app, get("/git/branches/feature/login")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["branch"], "feature/login");
    assert_eq!(body["head"]["id"], h.root.as_str());

    let (status, body) = send(&h.app, get("/git/branches/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn traversal_in_branch_names_is_rejected() {
    let h = harness();

    for uri in [
        "/git/branches/x/../../../../user",
        "/git/branches/dev%2F..%2F..%2Fpulls",
    ] {
        let (status, body) = send(&h.app, get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}: {body}");
        assert_eq!(body["kind"], "invalid_change_set");
    }

    let (status, body) = send(
        &h.app,
        post(
            "/git/commit/contents",
            json!({"branch": "dev/../main", "changes": [{"path": "a.txt", "content": "a"}]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["kind"], "invalid_change_set");
    assert_eq!(h.store.ref_target("main"), Some(h.root.clone()));

    let (status, _) = send(
        &h.app,
        post("/git/branches", json!({"name": "hotfix", "from": "main/../dev"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.store.ref_target("hotfix"), None);

    let (status, _) = send(
        &h.app,
        post(
            "/git/cherrypick",
            json!({"commits": [h.root.as_str()], "targetBranch": "uat/../main"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_branch_defaults_to_main() {
    let h = harness();
    let (status, body) = send(&h.app, post("/git/branches", json!({"name": "hotfix"}))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["from"], "main");
    assert_eq!(body["tip"], h.root.as_str());
    assert_eq!(h.store.ref_target("hotfix"), Some(h.root));
}

#[tokio::test]
async fn audit_lists_recent_records() {
    let h = harness();
    for (path, content) in [("a.txt", "a"), ("b.txt", "b"), ("c.txt", "c")] {
        let (status, _) = send(
            &h.app,
            post(
                "/git/commit/contents",
                json!({"branch": "dev", "message": path, "changes": [{"path": path, "content": content}]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&h.app, get("/git/audit?limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["message"], "b.txt");
    assert_eq!(records[1]["message"], "c.txt");
    assert_eq!(records[1]["branch"], "dev");
}
