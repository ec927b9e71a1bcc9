//! Branchline Core Library
//!
//! Commit graph construction over a remote content-addressed store:
//! committing change sets onto a branch, cherry-picking commit sequences,
//! review-gated picks and the `dev -> uat -> main` promotion pipeline.

pub mod audit;
pub mod builder;
pub mod cherry_pick;
pub mod error;
pub mod obs;
pub mod pipeline;
pub mod review;
pub mod service;
pub mod staging;
pub mod telemetry;

pub use audit::AuditTrail;
pub use builder::{
    normalize_changes, normalize_path, validate_branch_name, BranchSnapshot, Change,
    ChangeAction, CommitGraphBuilder, CommitOutcome, CommitRequest, Content, UPLOAD_PREFIX,
};
pub use cherry_pick::{
    validate_commit_id, CherryPickEngine, CherryPickOutcome, CherryPickRequest, PickedCommit,
    PICK_PREFIX,
};
pub use error::{BranchlineError, Result};
pub use obs::{
    emit_audit_append_failed, emit_commit_created, emit_pick_applied, emit_promotion,
    emit_ref_advanced,
};
pub use pipeline::{
    PromotionFailure, PromotionOutcome, PromotionPipeline, SelectivePromotion, Stage,
    StageBranches,
};
pub use review::{review_branch_name, review_target, ReviewGate, ReviewedPick};
pub use service::Branchline;
pub use staging::{sanitize_file_name, StagingArea};
pub use telemetry::{init_tracing, LOG_ENV};

pub use branchline_store::{
    AuditRecord, AuditSink, CommitId, CommitInfo, FileMode, MergeMethod, MergeOutcome,
    ObjectStore, ReviewRequest, TreeId,
};
