//! Branchline HTTP service.
//!
//! Thin JSON surface over [`branchline_core::Branchline`]: uploads land in a
//! local staging area, every other route maps onto one core operation.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;

use std::sync::Arc;

use branchline_core::{Branchline, StagingArea};

pub use config::Config;
pub use error::{ApiError, ErrorResponse};
pub use routes::router;

/// Shared state handed to every handler.
#[derive(Debug)]
pub struct AppState {
    pub core: Branchline,
    pub staging: StagingArea,
}

impl AppState {
    pub fn new(core: Branchline, staging: StagingArea) -> Self {
        Self { core, staging }
    }
}

pub type SharedState = Arc<AppState>;
