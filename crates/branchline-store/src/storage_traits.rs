//! Storage trait definitions for Branchline
//!
//! These traits define the two external collaborators of the core:
//! - `ObjectStore`: the remote commit graph (blobs, trees, commits, refs,
//!   review requests, merges)
//! - `AuditSink`: the append-only record of successful graph mutations
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::*;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// ObjectStore: remote commit graph
// ---------------------------------------------------------------------------

/// Typed request/response access to a remote commit graph.
///
/// Guarantees expected from implementations:
/// - `create_blob` is idempotent: identical bytes yield the same `BlobId`.
/// - `create_tree` applies `entries` on top of `base`; every path not named
///   in `entries` is inherited unchanged.
/// - `update_ref` is a compare-and-set: it only moves the ref when it still
///   points at `expected`, otherwise it reports `RefUpdate::Conflict`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Resolve a branch to its tip commit. `NotFound` if the branch is absent.
    async fn branch_tip(&self, branch: &str) -> StorageResult<CommitId>;

    /// Fetch a commit's tree, parents and message.
    async fn commit(&self, id: &CommitId) -> StorageResult<CommitInfo>;

    /// Whether `ancestor` is reachable from `descendant` through parent
    /// links. A commit counts as its own ancestor.
    async fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId)
        -> StorageResult<bool>;

    /// File-level change set of a commit relative to its first parent.
    async fn commit_file_changes(&self, id: &CommitId) -> StorageResult<Vec<FileChange>>;

    /// Look up the entry stored at `path` in a tree, if any.
    async fn tree_entry(&self, tree: &TreeId, path: &str) -> StorageResult<Option<PathEntry>>;

    /// Store bytes, returning their content address.
    async fn create_blob(&self, content: &[u8]) -> StorageResult<BlobId>;

    /// Create a tree that is `base` with `entries` overridden or removed.
    async fn create_tree(&self, base: &TreeId, entries: &[TreeEntry]) -> StorageResult<TreeId>;

    /// Create a commit object. Does not move any ref.
    async fn create_commit(
        &self,
        tree: &TreeId,
        parents: &[CommitId],
        message: &str,
    ) -> StorageResult<CommitId>;

    /// Move `branch` from `expected` to `new`.
    async fn update_ref(
        &self,
        branch: &str,
        expected: &CommitId,
        new: &CommitId,
    ) -> StorageResult<RefUpdate>;

    /// Create a new branch pointing at `from`. `RefConflict` if it exists.
    async fn create_ref(&self, branch: &str, from: &CommitId) -> StorageResult<()>;

    /// Delete a branch ref. Objects it pointed at are left in place.
    async fn delete_ref(&self, branch: &str) -> StorageResult<()>;

    /// Open a review request proposing `head` be merged into `base`.
    async fn create_review_request(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> StorageResult<ReviewRequest>;

    /// Look up an open or merged review request.
    async fn review_request(&self, review_id: u64) -> StorageResult<ReviewRequest>;

    /// Approve a review request and merge it, returning the resulting commit.
    async fn approve_and_merge(&self, review_id: u64, method: MergeMethod)
        -> StorageResult<CommitId>;

    /// Three-way merge of `head` into `base`. `MergeConflict` when the remote
    /// cannot merge automatically.
    async fn merge_branches(
        &self,
        base: &str,
        head: &str,
        message: &str,
    ) -> StorageResult<MergeOutcome>;
}

// ---------------------------------------------------------------------------
// AuditSink: append-only mutation log
// ---------------------------------------------------------------------------

/// A single successful graph mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Commit the branch was advanced to
    #[serde(alias = "sha")]
    pub commit_id: CommitId,
    /// Paths touched by the mutation
    pub files: Vec<String>,
    pub message: String,
    pub branch: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        commit_id: CommitId,
        files: Vec<String>,
        message: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            commit_id,
            files,
            message: message.into(),
            branch: branch.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only audit log.
///
/// Semantics:
/// - `append` adds one record at the end; records are never rewritten.
/// - `records` returns every record in append order (oldest first).
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append a record.
    async fn append(&self, record: AuditRecord) -> StorageResult<()>;

    /// All records, oldest first.
    async fn records(&self) -> StorageResult<Vec<AuditRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_record_uses_camel_case_and_accepts_sha_alias() {
        let record = AuditRecord::new(
            CommitId::new("abc123"),
            vec!["Files/readme.txt".to_string()],
            "add readme",
            "dev",
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["commitId"], "abc123");
        assert_eq!(value["files"][0], "Files/readme.txt");

        let legacy = serde_json::json!({
            "sha": "def456",
            "files": [],
            "message": "m",
            "branch": "uat",
            "timestamp": "2024-01-01T00:00:00Z",
        });
        let parsed: AuditRecord = serde_json::from_value(legacy).unwrap();
        assert_eq!(parsed.commit_id.as_str(), "def456");
    }
}
