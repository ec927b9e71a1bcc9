//! Commit Graph Builder.
//!
//! Turns a set of path changes into exactly one new commit on a branch:
//! blobs first, then a partial tree over the branch's current tree, then
//! the commit, then a compare-and-set of the branch ref. Paths not named in
//! the change set are inherited from the base tree untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use branchline_store::{
    BlobId, CommitId, CommitInfo, FileMode, ObjectStore, RefUpdate, TreeEntry, TreeId,
};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::audit::AuditTrail;
use crate::error::{BranchlineError, Result};
use crate::obs;
use crate::staging::{sanitize_file_name, StagingArea};

/// Repository directory staged uploads are committed under.
pub const UPLOAD_PREFIX: &str = "Files";

// ---------------------------------------------------------------------------
// Change sets
// ---------------------------------------------------------------------------

/// New content for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Bytes(Vec<u8>),
    /// A blob already present in the store; no upload needed.
    Existing(BlobId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeAction {
    Write { content: Content, mode: FileMode },
    Delete,
}

/// One path override in a change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: String,
    pub action: ChangeAction,
}

impl Change {
    /// Write `content` at `path` as a regular file.
    pub fn write(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            action: ChangeAction::Write {
                content: Content::Bytes(content.into()),
                mode: FileMode::File,
            },
        }
    }

    /// Point `path` at a blob the store already holds.
    pub fn write_existing(path: impl Into<String>, blob: BlobId, mode: FileMode) -> Self {
        Self {
            path: path.into(),
            action: ChangeAction::Write {
                content: Content::Existing(blob),
                mode,
            },
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            action: ChangeAction::Delete,
        }
    }
}

/// Normalize a repository path: strip leading `/`, reject empty, `.` and
/// `..` segments.
pub fn normalize_path(path: &str) -> Result<String> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(BranchlineError::invalid("path must not be empty"));
    }
    for segment in trimmed.split('/') {
        match segment {
            "" => {
                return Err(BranchlineError::invalid(format!(
                    "path '{}' contains an empty segment",
                    path
                )))
            }
            "." | ".." => {
                return Err(BranchlineError::invalid(format!(
                    "path '{}' contains a relative segment",
                    path
                )))
            }
            _ => {}
        }
    }
    Ok(trimmed.to_string())
}

/// Check `name` against git ref-name rules before it reaches a ref or URL.
///
/// Rejects empty names and leading, trailing or doubled `/`. Also rejects
/// `..`, segments starting with `.` or ending in `.lock`, `@{`, a bare `@`,
/// a trailing `.`, and whitespace or `~ ^ : ? * [ \`.
pub fn validate_branch_name(name: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(BranchlineError::invalid(format!(
            "invalid branch name '{}': {}",
            name, reason
        )))
    };
    if name.trim().is_empty() {
        return Err(BranchlineError::invalid("branch is required"));
    }
    if name == "@" || name.contains("@{") {
        return reject("'@' forms are reserved");
    }
    if name.contains("..") {
        return reject("contains '..'");
    }
    if name.ends_with('.') {
        return reject("ends with '.'");
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(*c))
    {
        return reject(&format!("contains {:?}", c));
    }
    for segment in name.split('/') {
        if segment.is_empty() {
            return reject("contains an empty segment");
        }
        if segment.starts_with('.') || segment.ends_with(".lock") {
            return reject(&format!("segment '{}' is not allowed", segment));
        }
    }
    Ok(())
}

/// Normalize every path and collapse duplicates.
///
/// Identical repeated changes collapse to one. A path that is both written
/// and deleted, or written with two different contents, is rejected.
/// The result is ordered by path.
pub fn normalize_changes(changes: Vec<Change>) -> Result<Vec<Change>> {
    let mut by_path: BTreeMap<String, ChangeAction> = BTreeMap::new();
    for change in changes {
        let path = normalize_path(&change.path)?;
        match by_path.get(&path) {
            None => {
                by_path.insert(path, change.action);
            }
            Some(existing) if *existing == change.action => {}
            Some(existing) => {
                let reason = match (existing, &change.action) {
                    (ChangeAction::Delete, _) | (_, ChangeAction::Delete) => {
                        "is both written and deleted"
                    }
                    _ => "is written twice with different content",
                };
                return Err(BranchlineError::invalid(format!("path '{}' {}", path, reason)));
            }
        }
    }
    Ok(by_path
        .into_iter()
        .map(|(path, action)| Change { path, action })
        .collect())
}

fn changed_paths(changes: &[Change]) -> Vec<String> {
    changes.iter().map(|c| c.path.clone()).collect()
}

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// Input to [`CommitGraphBuilder::commit_changes`].
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub branch: String,
    /// When set, the commit is refused if the branch tip differs.
    pub expected_tip: Option<CommitId>,
    pub changes: Vec<Change>,
    pub message: String,
}

impl CommitRequest {
    pub fn new(branch: impl Into<String>, changes: Vec<Change>, message: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            expected_tip: None,
            changes,
            message: message.into(),
        }
    }

    pub fn expecting(mut self, tip: CommitId) -> Self {
        self.expected_tip = Some(tip);
        self
    }
}

/// Result of a commit. For an empty change set `commit_id == parent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitOutcome {
    pub commit_id: CommitId,
    pub parent: CommitId,
    pub tree: TreeId,
    /// False when the resulting tree equals the parent's tree.
    pub changed: bool,
}

/// A branch tip and its tree, as resolved at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSnapshot {
    pub branch: String,
    pub tip: CommitId,
    pub tree: TreeId,
}

// ---------------------------------------------------------------------------
// CommitGraphBuilder
// ---------------------------------------------------------------------------

/// Builds commits against an [`ObjectStore`] and records them in the audit trail.
#[derive(Clone)]
pub struct CommitGraphBuilder {
    store: Arc<dyn ObjectStore>,
    audit: AuditTrail,
}

impl CommitGraphBuilder {
    pub fn new(store: Arc<dyn ObjectStore>, audit: AuditTrail) -> Self {
        Self { store, audit }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Resolve `branch` to its tip and the tip's tree.
    pub async fn snapshot(&self, branch: &str) -> Result<BranchSnapshot> {
        validate_branch_name(branch)?;
        let tip = self.store.branch_tip(branch).await?;
        let info = self.store.commit(&tip).await?;
        Ok(BranchSnapshot {
            branch: branch.to_string(),
            tip,
            tree: info.tree,
        })
    }

    /// Commit `request.changes` on top of the branch tip and advance the ref.
    ///
    /// An empty change set returns the current tip without writing anything.
    #[instrument(skip(self, request), fields(branch = %request.branch, changes = request.changes.len()))]
    pub async fn commit_changes(&self, request: CommitRequest) -> Result<CommitOutcome> {
        let CommitRequest {
            branch,
            expected_tip,
            changes,
            message,
        } = request;

        validate_branch_name(&branch)?;
        if message.trim().is_empty() {
            return Err(BranchlineError::invalid("commit message is required"));
        }
        let changes = normalize_changes(changes)?;

        let base = self.snapshot(&branch).await?;
        if let Some(expected) = expected_tip {
            if expected != base.tip {
                return Err(BranchlineError::StaleRef {
                    branch,
                    expected,
                    actual: base.tip,
                });
            }
        }

        if changes.is_empty() {
            debug!(tip = %base.tip.short(), "empty change set, branch left as is");
            return Ok(CommitOutcome {
                commit_id: base.tip.clone(),
                parent: base.tip,
                tree: base.tree,
                changed: false,
            });
        }

        let next = self.write_commit(&base, &changes, &message).await?;
        self.advance(&base, &next.tip).await?;
        self.audit
            .record(&next.tip, changed_paths(&changes), &message, &branch)
            .await;

        Ok(CommitOutcome {
            changed: next.tree != base.tree,
            commit_id: next.tip,
            parent: base.tip,
            tree: next.tree,
        })
    }

    /// Create the commit for `changes` on top of `base` without moving any ref.
    ///
    /// Returns the snapshot the branch would have after advancing to it.
    pub async fn prepare_commit(
        &self,
        base: &BranchSnapshot,
        changes: Vec<Change>,
        message: &str,
    ) -> Result<BranchSnapshot> {
        let changes = normalize_changes(changes)?;
        self.write_commit(base, &changes, message).await
    }

    /// Commit staged uploads as `Files/<name>`.
    ///
    /// With no file names, every file currently in the staging area is
    /// committed.
    pub async fn commit_staged(
        &self,
        staging: &StagingArea,
        branch: &str,
        file_names: &[String],
        message: &str,
        expected_tip: Option<CommitId>,
    ) -> Result<CommitOutcome> {
        let names = if file_names.is_empty() {
            staging.list().await?
        } else {
            file_names.to_vec()
        };
        if names.is_empty() {
            return Err(BranchlineError::invalid("no staged files to commit"));
        }

        let mut changes = Vec::with_capacity(names.len());
        for name in &names {
            let name = sanitize_file_name(name)?;
            let bytes = staging.load(&name).await?;
            changes.push(Change::write(format!("{}/{}", UPLOAD_PREFIX, name), bytes));
        }

        let mut request = CommitRequest::new(branch, changes, message);
        request.expected_tip = expected_tip;
        self.commit_changes(request).await
    }

    /// Head commit of `branch`.
    pub async fn branch_head(&self, branch: &str) -> Result<CommitInfo> {
        validate_branch_name(branch)?;
        let tip = self.store.branch_tip(branch).await?;
        Ok(self.store.commit(&tip).await?)
    }

    /// Create branch `name` at the tip of `from`.
    #[instrument(skip(self))]
    pub async fn create_branch(&self, name: &str, from: &str) -> Result<BranchSnapshot> {
        validate_branch_name(name)?;
        validate_branch_name(from)?;

        let source = self.snapshot(from).await?;
        self.store.create_ref(name, &source.tip).await?;
        self.audit
            .record(
                &source.tip,
                Vec::new(),
                &format!("Created branch {} from {}", name, from),
                name,
            )
            .await;

        Ok(BranchSnapshot {
            branch: name.to_string(),
            ..source
        })
    }

    /// Blobs, tree and commit for already-normalized `changes`.
    pub(crate) async fn write_commit(
        &self,
        base: &BranchSnapshot,
        changes: &[Change],
        message: &str,
    ) -> Result<BranchSnapshot> {
        let mut entries = Vec::with_capacity(changes.len());
        for change in changes {
            match &change.action {
                ChangeAction::Write { content, mode } => {
                    let blob = match content {
                        Content::Bytes(bytes) => self.store.create_blob(bytes).await?,
                        Content::Existing(blob) => blob.clone(),
                    };
                    entries.push(TreeEntry::blob(&change.path, blob, *mode));
                }
                ChangeAction::Delete => {
                    if self.store.tree_entry(&base.tree, &change.path).await?.is_none() {
                        return Err(BranchlineError::NotFound(format!(
                            "path '{}' on branch '{}'",
                            change.path, base.branch
                        )));
                    }
                    entries.push(TreeEntry::deleted(&change.path));
                }
            }
        }

        let tree = if entries.is_empty() {
            base.tree.clone()
        } else {
            self.store.create_tree(&base.tree, &entries).await?
        };
        let commit = self
            .store
            .create_commit(&tree, std::slice::from_ref(&base.tip), message)
            .await?;
        obs::emit_commit_created(&base.branch, &commit, &base.tip, changes.len());

        Ok(BranchSnapshot {
            branch: base.branch.clone(),
            tip: commit,
            tree,
        })
    }

    /// Move `from.branch` from `from.tip` to `to`.
    pub(crate) async fn advance(&self, from: &BranchSnapshot, to: &CommitId) -> Result<()> {
        match self.store.update_ref(&from.branch, &from.tip, to).await? {
            RefUpdate::Updated => {
                obs::emit_ref_advanced(&from.branch, &from.tip, to);
                Ok(())
            }
            RefUpdate::Conflict { actual } => Err(BranchlineError::RefConflict {
                branch: from.branch.clone(),
                expected: from.tip.to_string(),
                actual: actual.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for CommitGraphBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitGraphBuilder").finish_non_exhaustive()
    }
}
