//! Error taxonomy for Branchline operations.

use branchline_store::{CommitId, StoreError};

/// Branchline domain errors.
///
/// Every variant names the branch, commit or path that caused it so the
/// caller can tell which identifier to re-resolve before retrying.
#[derive(Debug, thiserror::Error)]
pub enum BranchlineError {
    #[error("branch '{branch}' moved: expected tip {expected}, found {actual}")]
    StaleRef {
        branch: String,
        expected: CommitId,
        actual: CommitId,
    },

    #[error("lost ref update race on branch '{branch}': expected {expected}, found {actual}")]
    RefConflict {
        branch: String,
        expected: String,
        actual: String,
    },

    #[error("invalid change set: {0}")]
    InvalidChangeSet(String),

    #[error("cherry-pick of {source_commit} onto '{target_branch}' conflicts at '{path}'")]
    ConflictOnApply {
        source_commit: CommitId,
        path: String,
        target_branch: String,
    },

    #[error("cannot merge '{head}' into '{base}' automatically")]
    MergeConflict { base: String, head: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("object store unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The store answered but refused the request (4xx other than not-found).
    #[error("object store rejected the request ({status}): {message}")]
    UpstreamRejected { status: u16, message: String },

    #[error("staging area error: {0}")]
    Staging(#[from] std::io::Error),
}

impl BranchlineError {
    /// Stable snake_case name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            BranchlineError::StaleRef { .. } => "stale_ref",
            BranchlineError::RefConflict { .. } => "ref_conflict",
            BranchlineError::InvalidChangeSet(_) => "invalid_change_set",
            BranchlineError::ConflictOnApply { .. } => "conflict_on_apply",
            BranchlineError::MergeConflict { .. } => "merge_conflict",
            BranchlineError::NotFound(_) => "not_found",
            BranchlineError::UpstreamUnavailable(_) => "upstream_unavailable",
            BranchlineError::UpstreamRejected { .. } => "upstream_rejected",
            BranchlineError::Staging(_) => "staging",
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        BranchlineError::InvalidChangeSet(message.into())
    }
}

impl From<StoreError> for BranchlineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { what } => BranchlineError::NotFound(what),
            StoreError::RefConflict {
                branch,
                expected,
                actual,
            } => BranchlineError::RefConflict {
                branch,
                expected,
                actual,
            },
            StoreError::MergeConflict { base, head } => {
                BranchlineError::MergeConflict { base, head }
            }
            StoreError::Io(e) => BranchlineError::Staging(e),
            StoreError::Unavailable(reason) => BranchlineError::UpstreamUnavailable(reason),
            StoreError::Rejected { status, message } => {
                BranchlineError::UpstreamRejected { status, message }
            }
            other @ (StoreError::Decode(_) | StoreError::Config(_)) => {
                BranchlineError::UpstreamUnavailable(other.to_string())
            }
        }
    }
}

/// Result type for Branchline operations.
pub type Result<T> = std::result::Result<T, BranchlineError>;
