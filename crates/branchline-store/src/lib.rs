//! Branchline-Store: commit graph transport and audit persistence
//!
//! This crate provides the external collaborators of the Branchline core:
//! the remote commit graph (blobs, trees, commits, branch refs, review
//! requests) and the append-only audit log.
//!
//! ## Key Components
//!
//! - `ObjectStore`: typed request/response access to the remote graph
//! - `GithubStore`: `ObjectStore` over the GitHub git-data REST API
//! - `AuditSink` / `JsonFileAuditLog`: append-only mutation record
//! - `fakes`: in-memory implementations used by tests

mod audit_log;
mod error;
pub mod fakes;
pub mod github;
pub mod storage_traits;
pub mod types;

pub use audit_log::JsonFileAuditLog;
pub use error::StoreError;
pub use github::{GithubConfig, GithubStore};
pub use storage_traits::{AuditRecord, AuditSink, ObjectStore, StorageResult};
pub use types::{
    BlobId, CommitId, CommitInfo, EntryTarget, FileChange, FileMode, FileStatus, MergeMethod,
    MergeOutcome, PathEntry, RefUpdate, ReviewRequest, TreeEntry, TreeId,
};
