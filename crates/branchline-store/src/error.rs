//! Error types for branchline-store

use thiserror::Error;

/// Errors raised by object store and audit sink backends
#[derive(Error, Debug)]
pub enum StoreError {
    /// Branch, commit, tree, blob or review request does not exist
    #[error("not found: {what}")]
    NotFound { what: String },

    /// A ref update or creation lost a race with another writer
    #[error("ref conflict on '{branch}': expected {expected}, found {actual}")]
    RefConflict {
        branch: String,
        expected: String,
        actual: String,
    },

    /// The remote could not merge `head` into `base` automatically
    #[error("merge conflict merging '{head}' into '{base}'")]
    MergeConflict { base: String, head: String },

    /// The remote understood the request but refused it
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Transport failure or server-side error
    #[error("object store unavailable: {0}")]
    Unavailable(String),

    /// Response body did not have the expected shape
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Local persistence failure (audit log file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or malformed configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound { what: what.into() }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_conflict_names_branch_and_both_tips() {
        let err = StoreError::RefConflict {
            branch: "dev".to_string(),
            expected: "aaa111".to_string(),
            actual: "bbb222".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("dev"));
        assert!(msg.contains("aaa111"));
        assert!(msg.contains("bbb222"));
    }

    #[test]
    fn not_found_helper() {
        let err = StoreError::not_found("branch 'uat'");
        assert!(matches!(err, StoreError::NotFound { ref what } if what == "branch 'uat'"));
    }
}
