//! Promotion Pipeline: `dev -> uat -> main`.
//!
//! Two modes:
//! - full promotion merges a stage's tip into the next stage;
//! - selective promotion replays chosen dev commits onto uat one at a time,
//!   keeping every pick that succeeded before the first failure.
//!
//! Both re-resolve branch tips on every call, so retrying after a transient
//! failure is safe.

use std::fmt;
use std::str::FromStr;

use branchline_store::{CommitId, MergeOutcome};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::builder::validate_branch_name;
use crate::cherry_pick::{validate_commit_id, CherryPickEngine, CherryPickRequest, PickedCommit};
use crate::error::{BranchlineError, Result};
use crate::obs;

/// Pipeline stages in promotion order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Dev,
    Uat,
    Main,
}

impl Stage {
    /// The stage this one promotes into, if any.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Dev => Some(Stage::Uat),
            Stage::Uat => Some(Stage::Main),
            Stage::Main => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Dev => "dev",
            Stage::Uat => "uat",
            Stage::Main => "main",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = BranchlineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(Stage::Dev),
            "uat" => Ok(Stage::Uat),
            "main" => Ok(Stage::Main),
            other => Err(BranchlineError::invalid(format!("unknown stage '{}'", other))),
        }
    }
}

/// Branch backing each stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageBranches {
    pub dev: String,
    pub uat: String,
    pub main: String,
}

impl Default for StageBranches {
    fn default() -> Self {
        Self {
            dev: "dev".to_string(),
            uat: "uat".to_string(),
            main: "main".to_string(),
        }
    }
}

impl StageBranches {
    pub fn branch(&self, stage: Stage) -> &str {
        match stage {
            Stage::Dev => &self.dev,
            Stage::Uat => &self.uat,
            Stage::Main => &self.main,
        }
    }
}

/// Result of a full promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionOutcome {
    pub from: Stage,
    pub to: Stage,
    pub source_branch: String,
    pub target_branch: String,
    pub merge: MergeOutcome,
}

impl PromotionOutcome {
    /// Merge commit created, or `None` when the target was already up to date.
    pub fn merge_commit(&self) -> Option<&CommitId> {
        match &self.merge {
            MergeOutcome::Merged(id) => Some(id),
            MergeOutcome::UpToDate => None,
        }
    }
}

/// The pick that stopped a selective promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionFailure {
    pub commit: CommitId,
    pub kind: String,
    pub error: String,
}

/// Result of a selective promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectivePromotion {
    pub source_branch: String,
    pub target_branch: String,
    /// Picks that landed, in request order.
    pub promoted: Vec<PickedCommit>,
    /// First failing commit. Later commits were not attempted.
    pub failure: Option<PromotionFailure>,
}

impl SelectivePromotion {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct PromotionPipeline {
    engine: CherryPickEngine,
    branches: StageBranches,
}

impl PromotionPipeline {
    pub fn new(engine: CherryPickEngine, branches: StageBranches) -> Self {
        Self { engine, branches }
    }

    pub fn branches(&self) -> &StageBranches {
        &self.branches
    }

    /// Merge `from`'s tip into the next stage.
    #[instrument(skip(self))]
    pub async fn promote(&self, from: Stage) -> Result<PromotionOutcome> {
        let to = from.next().ok_or_else(|| {
            BranchlineError::invalid(format!("stage '{}' has no downstream stage", from))
        })?;
        let source = self.branches.branch(from);
        let target = self.branches.branch(to);
        validate_branch_name(source)?;
        validate_branch_name(target)?;
        let message = format!("Merging {} into {}", source, target);

        let builder = self.engine.builder();
        let store = builder.store();
        let merge = store.merge_branches(target, source, &message).await?;
        let outcome = PromotionOutcome {
            from,
            to,
            source_branch: source.to_string(),
            target_branch: target.to_string(),
            merge,
        };

        if let Some(commit) = outcome.merge_commit() {
            let files = match store.commit_file_changes(commit).await {
                Ok(changes) => changes.into_iter().map(|c| c.path).collect(),
                Err(e) => {
                    warn!(commit = %commit, error = %e, "could not list promoted files");
                    Vec::new()
                }
            };
            builder.audit().record(commit, files, &message, target).await;
        }
        obs::emit_promotion(source, target, "merge", outcome.merge_commit());

        Ok(outcome)
    }

    /// Replay `commits` from dev onto uat, each as its own promotion.
    ///
    /// Every commit must be reachable from the dev tip as resolved at the
    /// start of the call. Stops at the first failure and keeps earlier picks.
    #[instrument(skip(self, commits), fields(commits = commits.len()))]
    pub async fn promote_selected(&self, commits: Vec<CommitId>) -> Result<SelectivePromotion> {
        if commits.is_empty() {
            return Err(BranchlineError::invalid("at least one commit is required"));
        }
        let source = self.branches.branch(Stage::Dev);
        let target = self.branches.branch(Stage::Uat);

        validate_branch_name(source)?;
        let source_tip = self.engine.builder().store().branch_tip(source).await?;

        let mut result = SelectivePromotion {
            source_branch: source.to_string(),
            target_branch: target.to_string(),
            promoted: Vec::with_capacity(commits.len()),
            failure: None,
        };

        for commit in commits {
            match self.promote_one(&commit, source, &source_tip, target).await {
                Ok(applied) => {
                    for pick in applied {
                        obs::emit_promotion(source, target, "cherry_pick", Some(&pick.commit_id));
                        result.promoted.push(pick);
                    }
                }
                Err(e) => {
                    warn!(commit = %commit, error = %e, "selective promotion stopped");
                    result.failure = Some(PromotionFailure {
                        commit,
                        kind: e.kind().to_string(),
                        error: e.to_string(),
                    });
                    break;
                }
            }
        }

        Ok(result)
    }

    async fn promote_one(
        &self,
        commit: &CommitId,
        source: &str,
        source_tip: &CommitId,
        target: &str,
    ) -> Result<Vec<PickedCommit>> {
        validate_commit_id(commit)?;
        let store = self.engine.builder().store();
        if !store.is_ancestor(commit, source_tip).await? {
            return Err(BranchlineError::invalid(format!(
                "commit {} is not on branch '{}'",
                commit, source
            )));
        }
        let request = CherryPickRequest::new(vec![commit.clone()], target);
        Ok(self.engine.cherry_pick(request).await?.applied)
    }
}
