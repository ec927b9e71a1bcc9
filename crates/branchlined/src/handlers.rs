//! Request handlers and their JSON bodies.

use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use branchline_core::{
    AuditRecord, BranchlineError, Change, ChangeAction, CherryPickOutcome, CherryPickRequest,
    CommitId, CommitInfo, CommitOutcome, CommitRequest, Content, FileMode, MergeMethod,
    PromotionOutcome, ReviewedPick, SelectivePromotion, Stage,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::SharedState;

pub const DEFAULT_COMMIT_MESSAGE: &str = "Commit from API";

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub file_name: String,
}

/// Stage the multipart field `file` under its sanitized name.
pub async fn upload_file(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> ApiResult<UploadResponse> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("uploaded file has no name"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        let file_name = state.staging.stage(&name, &bytes).await?;
        info!(file = %file_name, size = bytes.len(), "file staged");
        return Ok(Json(UploadResponse {
            message: "File uploaded successfully".to_string(),
            file_name,
        }));
    }
    Err(ApiError::bad_request("No file uploaded"))
}

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    pub message: String,
    pub branch: String,
    pub commit_message: String,
    #[serde(flatten)]
    pub outcome: CommitOutcome,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitFilesBody {
    pub branch: Option<String>,
    /// Staged file names. Empty commits every staged file.
    #[serde(default)]
    pub files: Vec<String>,
    pub message: Option<String>,
    pub expected_tip: Option<CommitId>,
}

/// Commit staged uploads as `Files/<name>`.
pub async fn commit_files(
    State(state): State<SharedState>,
    Json(body): Json<CommitFilesBody>,
) -> ApiResult<CommitResponse> {
    let branch = body
        .branch
        .unwrap_or_else(|| state.core.pipeline.branches().dev.clone());
    let message = body
        .message
        .unwrap_or_else(|| DEFAULT_COMMIT_MESSAGE.to_string());

    let outcome = state
        .core
        .builder
        .commit_staged(&state.staging, &branch, &body.files, &message, body.expected_tip)
        .await?;

    Ok(Json(CommitResponse {
        message: "Files committed".to_string(),
        branch,
        commit_message: message,
        outcome,
    }))
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    Base64,
}

#[derive(Debug, Deserialize)]
pub struct ContentChange {
    pub path: String,
    pub content: Option<String>,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default)]
    pub mode: FileMode,
    #[serde(default)]
    pub delete: bool,
}

impl TryFrom<ContentChange> for Change {
    type Error = BranchlineError;

    fn try_from(change: ContentChange) -> Result<Self, Self::Error> {
        if change.delete {
            if change.content.is_some() {
                return Err(BranchlineError::InvalidChangeSet(format!(
                    "path '{}' carries content but is marked for deletion",
                    change.path
                )));
            }
            return Ok(Change::delete(change.path));
        }
        let text = change.content.ok_or_else(|| {
            BranchlineError::InvalidChangeSet(format!("path '{}' has no content", change.path))
        })?;
        let bytes = match change.encoding {
            Encoding::Utf8 => text.into_bytes(),
            Encoding::Base64 => STANDARD.decode(text.as_bytes()).map_err(|e| {
                BranchlineError::InvalidChangeSet(format!(
                    "path '{}' is not valid base64: {e}",
                    change.path
                ))
            })?,
        };
        Ok(Change {
            path: change.path,
            action: ChangeAction::Write {
                content: Content::Bytes(bytes),
                mode: change.mode,
            },
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitContentsBody {
    pub branch: String,
    #[serde(default)]
    pub changes: Vec<ContentChange>,
    pub message: Option<String>,
    pub expected_tip: Option<CommitId>,
}

/// Commit an inline change set.
pub async fn commit_contents(
    State(state): State<SharedState>,
    Json(body): Json<CommitContentsBody>,
) -> ApiResult<CommitResponse> {
    let changes = body
        .changes
        .into_iter()
        .map(Change::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    let message = body
        .message
        .unwrap_or_else(|| DEFAULT_COMMIT_MESSAGE.to_string());

    let mut request = CommitRequest::new(body.branch.clone(), changes, message.clone());
    if let Some(tip) = body.expected_tip {
        request = request.expecting(tip);
    }
    let outcome = state.core.builder.commit_changes(request).await?;

    Ok(Json(CommitResponse {
        message: if outcome.changed {
            "Changes committed".to_string()
        } else {
            "Nothing to commit".to_string()
        },
        branch: body.branch,
        commit_message: message,
        outcome,
    }))
}

// ---------------------------------------------------------------------------
// Cherry-pick and reviews
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CherryPickBody {
    #[serde(default)]
    pub commits: Vec<CommitId>,
    #[serde(default)]
    pub target_branch: String,
}

impl From<CherryPickBody> for CherryPickRequest {
    fn from(body: CherryPickBody) -> Self {
        CherryPickRequest::new(body.commits, body.target_branch)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CherryPickResponse {
    pub message: String,
    #[serde(flatten)]
    pub outcome: CherryPickOutcome,
}

pub async fn cherry_pick(
    State(state): State<SharedState>,
    Json(body): Json<CherryPickBody>,
) -> ApiResult<CherryPickResponse> {
    let outcome = state.core.cherry_pick.cherry_pick(body.into()).await?;
    Ok(Json(CherryPickResponse {
        message: "Commits cherry-picked".to_string(),
        outcome,
    }))
}

pub async fn open_review(
    State(state): State<SharedState>,
    Json(body): Json<CherryPickBody>,
) -> ApiResult<ReviewedPick> {
    let opened = state.core.reviews.open(body.into()).await?;
    Ok(Json(opened))
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveBody {
    /// When given, must be the branch the review was opened from.
    pub branch: Option<String>,
    #[serde(default)]
    pub method: MergeMethod,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveResponse {
    pub message: String,
    pub review: u64,
    pub commit_id: CommitId,
}

pub async fn approve_review(
    State(state): State<SharedState>,
    Path(review): Path<u64>,
    Json(body): Json<ApproveBody>,
) -> ApiResult<ApproveResponse> {
    let commit_id = state
        .core
        .reviews
        .approve_and_integrate(review, body.branch.as_deref(), body.method)
        .await?;
    Ok(Json(ApproveResponse {
        message: format!("Review #{review} merged"),
        review,
        commit_id,
    }))
}

// ---------------------------------------------------------------------------
// Promotion
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct PromotionResponse {
    pub message: String,
    #[serde(flatten)]
    pub outcome: PromotionOutcome,
}

async fn promote(state: &SharedState, from: Stage) -> ApiResult<PromotionResponse> {
    let outcome = state.core.pipeline.promote(from).await?;
    let message = match outcome.merge_commit() {
        Some(_) => format!(
            "{} merged into {}",
            outcome.source_branch, outcome.target_branch
        ),
        None => format!(
            "{} already contains {}",
            outcome.target_branch, outcome.source_branch
        ),
    };
    Ok(Json(PromotionResponse { message, outcome }))
}

pub async fn promote_dev_to_uat(State(state): State<SharedState>) -> ApiResult<PromotionResponse> {
    promote(&state, Stage::Dev).await
}

pub async fn promote_uat_to_main(
    State(state): State<SharedState>,
) -> ApiResult<PromotionResponse> {
    promote(&state, Stage::Uat).await
}

#[derive(Debug, Default, Deserialize)]
pub struct SelectiveBody {
    #[serde(default)]
    pub commits: Vec<CommitId>,
}

/// Best-effort per commit: a failure mid-way still answers 200 with the
/// picks that landed and the commit that stopped the run.
pub async fn promote_selective(
    State(state): State<SharedState>,
    Json(body): Json<SelectiveBody>,
) -> ApiResult<SelectivePromotion> {
    let result = state.core.pipeline.promote_selected(body.commits).await?;
    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// Branches and audit
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct BranchResponse {
    pub branch: String,
    pub head: CommitInfo,
}

pub async fn get_branch(
    State(state): State<SharedState>,
    Path(branch): Path<String>,
) -> ApiResult<BranchResponse> {
    let head = state.core.builder.branch_head(&branch).await?;
    Ok(Json(BranchResponse { branch, head }))
}

#[derive(Debug, Deserialize)]
pub struct CreateBranchBody {
    pub name: String,
    pub from: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedBranch {
    pub branch: String,
    pub from: String,
    pub tip: CommitId,
}

pub async fn create_branch(
    State(state): State<SharedState>,
    Json(body): Json<CreateBranchBody>,
) -> ApiResult<CreatedBranch> {
    let from = body
        .from
        .unwrap_or_else(|| state.core.pipeline.branches().main.clone());
    let snapshot = state.core.builder.create_branch(&body.name, &from).await?;
    Ok(Json(CreatedBranch {
        branch: snapshot.branch,
        from,
        tip: snapshot.tip,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

/// Audit records oldest first; `limit` keeps the most recent ones.
pub async fn audit_log(
    State(state): State<SharedState>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Vec<AuditRecord>> {
    let mut records = state.core.audit().records().await?;
    if let Some(limit) = query.limit {
        let skip = records.len().saturating_sub(limit);
        records.drain(..skip);
    }
    Ok(Json(records))
}
