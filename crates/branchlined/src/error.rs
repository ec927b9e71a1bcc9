//! Mapping of core errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use branchline_core::BranchlineError;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

/// A core error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub BranchlineError);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError(BranchlineError::InvalidChangeSet(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BranchlineError::StaleRef { .. }
            | BranchlineError::RefConflict { .. }
            | BranchlineError::ConflictOnApply { .. }
            | BranchlineError::MergeConflict { .. } => StatusCode::CONFLICT,
            BranchlineError::InvalidChangeSet(_) => StatusCode::BAD_REQUEST,
            BranchlineError::NotFound(_) => StatusCode::NOT_FOUND,
            BranchlineError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            BranchlineError::UpstreamRejected { status, .. } => match *status {
                401 | 403 => StatusCode::FORBIDDEN,
                409 | 405 => StatusCode::CONFLICT,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            },
            BranchlineError::Staging(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BranchlineError> for ApiError {
    fn from(err: BranchlineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.0.kind(), error = %self.0, "request failed");
        } else {
            warn!(kind = self.0.kind(), error = %self.0, "request rejected");
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
            kind: self.0.kind().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchline_core::CommitId;

    #[test]
    fn test_status_per_error_class() {
        let stale = ApiError(BranchlineError::StaleRef {
            branch: "dev".to_string(),
            expected: CommitId::new("a"),
            actual: CommitId::new("b"),
        });
        assert_eq!(stale.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError(BranchlineError::NotFound("branch 'qa'".to_string())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(BranchlineError::UpstreamUnavailable("timeout".to_string())).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_upstream_rejections_are_client_errors() {
        let rejected = |status| {
            ApiError(BranchlineError::UpstreamRejected {
                status,
                message: "create tree: tree.sha is invalid".to_string(),
            })
            .status()
        };
        assert_eq!(rejected(422), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(rejected(403), StatusCode::FORBIDDEN);
        assert_eq!(rejected(405), StatusCode::CONFLICT);
        assert!(!rejected(400).is_server_error());
    }
}
