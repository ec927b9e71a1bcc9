//! Best-effort audit trail over an [`AuditSink`].
//!
//! The commit graph is the source of truth. A failed append is logged and
//! swallowed so it can never undo or mask a mutation that already landed.

use std::sync::Arc;

use branchline_store::{AuditRecord, AuditSink, CommitId};

use crate::error::Result;
use crate::obs;

/// Records successful graph mutations.
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Append one record. Never fails the caller.
    pub async fn record(
        &self,
        commit_id: &CommitId,
        files: Vec<String>,
        message: &str,
        branch: &str,
    ) {
        let record = AuditRecord::new(commit_id.clone(), files, message, branch);
        if let Err(e) = self.sink.append(record).await {
            obs::emit_audit_append_failed(commit_id, branch, &e);
        }
    }

    /// Every record appended so far, oldest first.
    pub async fn records(&self) -> Result<Vec<AuditRecord>> {
        Ok(self.sink.records().await?)
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchline_store::fakes::MemoryAuditLog;

    #[tokio::test]
    async fn record_appends_to_sink() {
        let sink = Arc::new(MemoryAuditLog::new());
        let trail = AuditTrail::new(sink.clone());

        trail
            .record(&CommitId::new("abc"), vec!["Files/a.txt".into()], "msg", "dev")
            .await;

        let records = trail.records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].files, vec!["Files/a.txt".to_string()]);
        assert_eq!(records[0].branch, "dev");
    }

    #[tokio::test]
    async fn failing_sink_is_swallowed() {
        let trail = AuditTrail::new(Arc::new(MemoryAuditLog::failing()));
        trail.record(&CommitId::new("abc"), vec![], "msg", "dev").await;
        assert!(trail.records().await.unwrap().is_empty());
    }
}
