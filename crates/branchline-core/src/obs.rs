//! Structured events for graph mutations.
//!
//! Every successful mutation emits one `info!` event tagged with an
//! `event` field so log pipelines can filter on it. Audit failures are
//! emitted at `warn!`.

use branchline_store::CommitId;
use tracing::{info, warn};

/// A commit object was created (the ref may not have moved yet).
pub fn emit_commit_created(branch: &str, commit: &CommitId, parent: &CommitId, paths: usize) {
    info!(
        event = "commit.created",
        branch = %branch,
        commit = %commit.short(),
        parent = %parent.short(),
        paths = paths,
    );
}

/// A branch ref moved from `from` to `to`.
pub fn emit_ref_advanced(branch: &str, from: &CommitId, to: &CommitId) {
    info!(
        event = "ref.advanced",
        branch = %branch,
        from = %from.short(),
        to = %to.short(),
    );
}

/// A source commit was replayed onto `target`.
pub fn emit_pick_applied(source: &CommitId, commit: &CommitId, target: &str, empty: bool) {
    info!(
        event = "cherry_pick.applied",
        source = %source.short(),
        commit = %commit.short(),
        target = %target,
        empty = empty,
    );
}

/// A stage promotion finished. `commit` is `None` when already up to date.
pub fn emit_promotion(from: &str, to: &str, mode: &str, commit: Option<&CommitId>) {
    info!(
        event = "promotion.completed",
        from = %from,
        to = %to,
        mode = %mode,
        commit = commit.map(|c| c.short()).unwrap_or("up-to-date"),
    );
}

/// The audit sink rejected a record. The graph mutation stands.
pub fn emit_audit_append_failed(commit: &CommitId, branch: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "audit.append_failed",
        commit = %commit,
        branch = %branch,
        error = %error,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitters_do_not_panic_without_subscriber() {
        let a = CommitId::new("0123456789abcdef");
        let b = CommitId::new("fedcba9876543210");
        emit_commit_created("dev", &a, &b, 2);
        emit_ref_advanced("dev", &b, &a);
        emit_pick_applied(&a, &b, "uat", true);
        emit_promotion("dev", "uat", "merge", None);
        emit_promotion("dev", "uat", "merge", Some(&a));
        emit_audit_append_failed(&a, "dev", &"disk full");
    }
}
