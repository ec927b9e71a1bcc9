//! Review-gated cherry-pick.
//!
//! Instead of writing to the target branch, picks land on a fresh branch
//! `cherry-pick/<target>/<suffix>` cut from the target tip, and a review
//! request proposes merging it back. Integration happens later through
//! [`ReviewGate::approve_and_integrate`].

use branchline_store::{CommitId, MergeMethod, ReviewRequest};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::cherry_pick::{CherryPickEngine, CherryPickOutcome, CherryPickRequest};
use crate::error::{BranchlineError, Result};

/// Namespace of ephemeral review branches.
pub const REVIEW_BRANCH_PREFIX: &str = "cherry-pick";

/// Name of a new ephemeral review branch for `target`.
pub fn review_branch_name(target: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}/{}/{}", REVIEW_BRANCH_PREFIX, target, &suffix[..8])
}

/// Target branch encoded in an ephemeral review branch name.
pub fn review_target(branch: &str) -> Option<&str> {
    let rest = branch.strip_prefix(REVIEW_BRANCH_PREFIX)?.strip_prefix('/')?;
    let (target, suffix) = rest.rsplit_once('/')?;
    if target.is_empty() || suffix.is_empty() {
        return None;
    }
    Some(target)
}

/// An opened review over picked commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewedPick {
    pub review: ReviewRequest,
    /// Ephemeral branch holding the picks.
    pub branch: String,
    pub outcome: CherryPickOutcome,
}

#[derive(Debug, Clone)]
pub struct ReviewGate {
    engine: CherryPickEngine,
}

impl ReviewGate {
    pub fn new(engine: CherryPickEngine) -> Self {
        Self { engine }
    }

    /// Pick `request.commits` onto an ephemeral branch and open a review
    /// into `request.target_branch`. The target itself is not touched.
    #[instrument(skip(self, request), fields(target = %request.target_branch))]
    pub async fn open(&self, request: CherryPickRequest) -> Result<ReviewedPick> {
        request.validate()?;
        let store = self.engine.builder().store();
        let target = request.target_branch.clone();

        let tip = store.branch_tip(&target).await?;
        let branch = review_branch_name(&target);
        store.create_ref(&branch, &tip).await?;

        let picks = CherryPickRequest::new(request.commits.clone(), branch.clone());
        let outcome = match self.engine.cherry_pick(picks).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.discard(&branch).await;
                return Err(e);
            }
        };

        let title = format!(
            "Cherry-pick {} commit(s) into {}",
            request.commits.len(),
            target
        );
        let body = request
            .commits
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n");
        let review = match store
            .create_review_request(&branch, &target, &title, &body)
            .await
        {
            Ok(review) => review,
            Err(e) => {
                self.discard(&branch).await;
                return Err(e.into());
            }
        };

        info!(review = review.id, branch = %branch, "opened cherry-pick review");
        Ok(ReviewedPick {
            review,
            branch,
            outcome,
        })
    }

    /// Approve and merge review `review_id`, then drop its ephemeral branch.
    ///
    /// The head and base branches come from the stored review. When the
    /// caller names a branch it must be that review's head. Failure to delete
    /// the branch is logged only; the merge stands.
    #[instrument(skip(self))]
    pub async fn approve_and_integrate(
        &self,
        review_id: u64,
        branch: Option<&str>,
        method: MergeMethod,
    ) -> Result<CommitId> {
        let builder = self.engine.builder();
        let store = builder.store();

        let review = store.review_request(review_id).await?;
        if let Some(branch) = branch {
            if branch != review.head {
                return Err(BranchlineError::invalid(format!(
                    "review #{} was opened from '{}', not '{}'",
                    review_id, review.head, branch
                )));
            }
        }
        if review_target(&review.head) != Some(review.base.as_str()) {
            return Err(BranchlineError::invalid(format!(
                "review #{} ('{}' into '{}') is not a cherry-pick review",
                review_id, review.head, review.base
            )));
        }

        let merged = store.approve_and_merge(review_id, method).await?;
        self.discard(&review.head).await;

        let files = match store.commit_file_changes(&merged).await {
            Ok(changes) => changes.into_iter().map(|c| c.path).collect(),
            Err(e) => {
                warn!(commit = %merged, error = %e, "could not list merged files");
                Vec::new()
            }
        };
        builder
            .audit()
            .record(
                &merged,
                files,
                &format!("Merged review #{} from {}", review_id, review.head),
                &review.base,
            )
            .await;

        info!(
            review = review_id,
            commit = %merged.short(),
            target = %review.base,
            "integrated review"
        );
        Ok(merged)
    }

    async fn discard(&self, branch: &str) {
        if let Err(e) = self.engine.builder().store().delete_ref(branch).await {
            warn!(branch = %branch, error = %e, "failed to delete review branch");
        }
    }
}
