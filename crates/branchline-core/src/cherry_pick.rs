//! Cherry-Pick Engine.
//!
//! Replays the file-level change set of each source commit, in order, onto
//! a target branch. Picks chain on a rolling base held in memory; the target
//! ref is advanced once, from the tip observed at the start, after every
//! pick succeeded. A conflicting pick therefore leaves the target untouched.
//!
//! For each path a source commit touched:
//! - target already holds the source's result: nothing to apply;
//! - target holds what the source's parent held: apply the source's result;
//! - anything else: conflict, the whole request is aborted.
//!
//! A pick with nothing left to apply still produces a commit whose tree is
//! its parent's tree, so every requested pick maps to exactly one commit.

use std::collections::BTreeSet;

use branchline_store::{CommitId, FileStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::builder::{validate_branch_name, BranchSnapshot, Change, CommitGraphBuilder};
use crate::error::{BranchlineError, Result};
use crate::obs;

/// Prefix marking the provenance of a replayed commit message.
pub const PICK_PREFIX: &str = "[Cherry-pick] ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CherryPickRequest {
    pub commits: Vec<CommitId>,
    pub target_branch: String,
}

impl CherryPickRequest {
    pub fn new(commits: Vec<CommitId>, target_branch: impl Into<String>) -> Self {
        Self {
            commits,
            target_branch: target_branch.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.target_branch.trim().is_empty() {
            return Err(BranchlineError::invalid("targetBranch is required"));
        }
        validate_branch_name(&self.target_branch)?;
        if self.commits.is_empty() {
            return Err(BranchlineError::invalid("at least one commit is required"));
        }
        self.commits.iter().try_for_each(validate_commit_id)
    }
}

/// Commit ids are hex object names.
pub fn validate_commit_id(id: &CommitId) -> Result<()> {
    let hex = id.as_str();
    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(BranchlineError::invalid(format!(
            "commit id '{}' is not a hex object name",
            hex
        )));
    }
    Ok(())
}

/// One source commit and the commit that replays it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickedCommit {
    pub source: CommitId,
    pub commit_id: CommitId,
    /// The target already held every change of the source.
    pub empty: bool,
    /// Paths written or removed by the replayed commit.
    pub paths: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CherryPickOutcome {
    pub target_branch: String,
    pub previous_tip: CommitId,
    pub applied: Vec<PickedCommit>,
}

impl CherryPickOutcome {
    /// Tip of the target branch after the request.
    pub fn tip(&self) -> &CommitId {
        self.applied
            .last()
            .map(|p| &p.commit_id)
            .unwrap_or(&self.previous_tip)
    }

    pub fn applied_ids(&self) -> Vec<CommitId> {
        self.applied.iter().map(|p| p.commit_id.clone()).collect()
    }
}

/// Replays commits onto a branch through a [`CommitGraphBuilder`].
#[derive(Debug, Clone)]
pub struct CherryPickEngine {
    builder: CommitGraphBuilder,
}

impl CherryPickEngine {
    pub fn new(builder: CommitGraphBuilder) -> Self {
        Self { builder }
    }

    pub fn builder(&self) -> &CommitGraphBuilder {
        &self.builder
    }

    /// Apply every commit of `request` or none of them.
    #[instrument(skip(self, request), fields(target = %request.target_branch, picks = request.commits.len()))]
    pub async fn cherry_pick(&self, request: CherryPickRequest) -> Result<CherryPickOutcome> {
        request.validate()?;
        let target = request.target_branch;

        let base = self.builder.snapshot(&target).await?;
        let mut rolling = base.clone();
        let mut applied = Vec::with_capacity(request.commits.len());
        for source in &request.commits {
            let (next, picked) = self.pick_onto(&rolling, source).await?;
            rolling = next;
            applied.push(picked);
        }

        self.builder.advance(&base, &rolling.tip).await?;

        for pick in &applied {
            obs::emit_pick_applied(&pick.source, &pick.commit_id, &target, pick.empty);
            self.builder
                .audit()
                .record(&pick.commit_id, pick.paths.clone(), &pick.message, &target)
                .await;
        }

        Ok(CherryPickOutcome {
            target_branch: target,
            previous_tip: base.tip,
            applied,
        })
    }

    /// Build the commit replaying `source` on top of `base`. No ref moves.
    ///
    /// Merge commits are replayed relative to their first parent.
    pub(crate) async fn pick_onto(
        &self,
        base: &BranchSnapshot,
        source: &CommitId,
    ) -> Result<(BranchSnapshot, PickedCommit)> {
        let store = self.builder.store();
        let info = store.commit(source).await?;
        let parent_tree = match info.first_parent() {
            Some(parent) => Some(store.commit(parent).await?.tree),
            None => None,
        };

        // A rename touches both its old and new path.
        let mut touched = BTreeSet::new();
        for change in store.commit_file_changes(source).await? {
            if let FileStatus::Renamed { previous_path } = change.status {
                touched.insert(previous_path);
            }
            touched.insert(change.path);
        }

        let mut changes = Vec::new();
        for path in touched {
            let wanted = store.tree_entry(&info.tree, &path).await?;
            let current = store.tree_entry(&base.tree, &path).await?;
            if current == wanted {
                continue;
            }
            let prior = match &parent_tree {
                Some(tree) => store.tree_entry(tree, &path).await?,
                None => None,
            };
            if current != prior {
                return Err(BranchlineError::ConflictOnApply {
                    source_commit: source.clone(),
                    path,
                    target_branch: base.branch.clone(),
                });
            }
            changes.push(match wanted {
                Some(entry) => Change::write_existing(path, entry.blob, entry.mode),
                None => Change::delete(path),
            });
        }

        let message = format!("{}{}", PICK_PREFIX, info.message);
        let next = self.builder.write_commit(base, &changes, &message).await?;
        debug!(
            source = %source.short(),
            commit = %next.tip.short(),
            paths = changes.len(),
            "built cherry-pick commit"
        );

        let picked = PickedCommit {
            source: source.clone(),
            commit_id: next.tip.clone(),
            empty: changes.is_empty(),
            paths: changes.into_iter().map(|c| c.path).collect(),
            message,
        };
        Ok((next, picked))
    }
}
