//! One handle over every Branchline operation, sharing a store and audit
//! trail. Binaries build one of these at startup.

use std::sync::Arc;

use branchline_store::{AuditSink, ObjectStore};

use crate::audit::AuditTrail;
use crate::builder::CommitGraphBuilder;
use crate::cherry_pick::CherryPickEngine;
use crate::pipeline::{PromotionPipeline, StageBranches};
use crate::review::ReviewGate;

#[derive(Debug, Clone)]
pub struct Branchline {
    pub builder: CommitGraphBuilder,
    pub cherry_pick: CherryPickEngine,
    pub reviews: ReviewGate,
    pub pipeline: PromotionPipeline,
}

impl Branchline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        audit: Arc<dyn AuditSink>,
        branches: StageBranches,
    ) -> Self {
        let builder = CommitGraphBuilder::new(store, AuditTrail::new(audit));
        let cherry_pick = CherryPickEngine::new(builder.clone());
        Self {
            reviews: ReviewGate::new(cherry_pick.clone()),
            pipeline: PromotionPipeline::new(cherry_pick.clone(), branches),
            cherry_pick,
            builder,
        }
    }

    pub fn audit(&self) -> &AuditTrail {
        self.builder.audit()
    }
}
