//! GitHub git-data REST client
//!
//! Implements [`ObjectStore`] on top of the GitHub REST API. Every method is
//! a single logical round trip (the tree lookup walks one request per path
//! segment); nothing is cached between calls.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::error::StoreError;
use crate::storage_traits::{ObjectStore, StorageResult};
use crate::types::*;

const DEFAULT_API_BASE: &str = "https://api.github.com";
const FILES_PER_PAGE: usize = 100;

/// GitHub connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// API root, e.g. `https://api.github.com`
    pub api_base: String,
    /// Repository owner (user or organisation)
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Bearer token; anonymous access when `None`
    pub token: Option<String>,
    /// User agent sent with every request
    pub user_agent: String,
}

impl GithubConfig {
    /// Create config for a specific repository
    pub fn new(owner: &str, repo: &str) -> Self {
        GithubConfig {
            api_base: DEFAULT_API_BASE.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: None,
            user_agent: format!("branchline/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Read `GITHUB_OWNER`, `GITHUB_REPO`, `GITHUB_TOKEN` and optionally
    /// `GITHUB_API_URL` from the environment.
    pub fn from_env() -> StorageResult<Self> {
        let owner = std::env::var("GITHUB_OWNER")
            .map_err(|_| StoreError::Config("GITHUB_OWNER is not set".to_string()))?;
        let repo = std::env::var("GITHUB_REPO")
            .map_err(|_| StoreError::Config("GITHUB_REPO is not set".to_string()))?;

        let mut config = Self::new(&owner, &repo);
        if let Ok(api_base) = std::env::var("GITHUB_API_URL") {
            config.api_base = api_base;
        }
        config.token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        Ok(config)
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Point at a different API root (GitHub Enterprise, test servers)
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.to_string();
        self
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo,
            suffix.trim_start_matches('/')
        )
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ShaRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaRef,
}

#[derive(Debug, Deserialize)]
struct GitCommitResponse {
    sha: String,
    tree: ShaRef,
    #[serde(default)]
    parents: Vec<ShaRef>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CommitFilesResponse {
    #[serde(default)]
    files: Vec<CommitFile>,
}

#[derive(Debug, Deserialize)]
struct CommitFile {
    filename: String,
    status: String,
    sha: Option<String>,
    previous_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeItem>,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    path: String,
    mode: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Debug, Serialize)]
struct TreeItemRequest<'a> {
    path: &'a str,
    mode: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    /// `null` deletes the path from the base tree
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    html_url: Option<String>,
    title: String,
    head: PullBranch,
    base: PullBranch,
}

#[derive(Debug, Deserialize)]
struct PullBranch {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

fn file_change(file: CommitFile) -> Option<FileChange> {
    let blob = file.sha.map(BlobId);
    let status = match file.status.as_str() {
        "added" | "copied" => FileStatus::Added,
        "modified" | "changed" => FileStatus::Modified,
        "removed" => FileStatus::Removed,
        "renamed" => FileStatus::Renamed {
            previous_path: file.previous_filename.unwrap_or_default(),
        },
        _ => return None,
    };
    let blob = if status == FileStatus::Removed { None } else { blob };
    Some(FileChange {
        path: file.filename,
        status,
        blob,
    })
}

/// Entry for the last segment of a path lookup. Symlinks and other modes
/// the store cannot write back are refused rather than read as absent.
fn leaf_entry(path: &str, item: TreeItem) -> StorageResult<Option<PathEntry>> {
    if item.kind == "tree" {
        return Ok(None);
    }
    match FileMode::from_octal(&item.mode) {
        Some(mode) => Ok(Some(PathEntry {
            blob: BlobId(item.sha),
            mode,
        })),
        None => Err(StoreError::Decode(format!(
            "path '{}' has unsupported mode {}",
            path, item.mode
        ))),
    }
}

/// Ref write refusals worth re-reading the tip for.
fn may_be_lost_race(status: StatusCode) -> bool {
    matches!(status, StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY)
}

/// Decide a refused branch creation from a fresh read of that branch.
/// An absent branch means the request itself was bad.
fn refuse_existing_branch(branch: &str, reread: StorageResult<CommitId>) -> StorageResult<()> {
    match reread {
        Ok(actual) => Err(StoreError::RefConflict {
            branch: branch.to_string(),
            expected: "<absent>".to_string(),
            actual: actual.0,
        }),
        Err(StoreError::NotFound { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

/// `compare/{base}...{head}` statuses under which `base` is an ancestor of `head`.
fn compare_means_ancestor(status: &str) -> bool {
    matches!(status, "ahead" | "identical")
}

// ---------------------------------------------------------------------------
// GithubStore
// ---------------------------------------------------------------------------

/// [`ObjectStore`] backed by one GitHub repository
pub struct GithubStore {
    config: GithubConfig,
    http_client: reqwest::Client,
}

impl GithubStore {
    /// Create a new GitHub client
    pub fn new(config: GithubConfig) -> StorageResult<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = &config.token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| StoreError::Config(format!("invalid token: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| StoreError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(GithubStore {
            config,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> StorageResult<Self> {
        Self::new(GithubConfig::from_env()?)
    }

    pub fn config(&self) -> &GithubConfig {
        &self.config
    }

    fn request(&self, method: Method, suffix: &str) -> RequestBuilder {
        self.http_client.request(method, self.config.repo_url(suffix))
    }

    /// Map non-success statuses onto the store error taxonomy.
    async fn check(response: Response, what: &str) -> StorageResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| status.to_string());

        debug!(status = status.as_u16(), %message, what, "GitHub request failed");
        Err(match status {
            StatusCode::NOT_FOUND => StoreError::not_found(what),
            s if s.is_server_error() => {
                StoreError::Unavailable(format!("{} ({}): {}", what, s.as_u16(), message))
            }
            s => StoreError::Rejected {
                status: s.as_u16(),
                message: format!("{}: {}", what, message),
            },
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        suffix: &str,
        what: &str,
    ) -> StorageResult<T> {
        let response = self.request(Method::GET, suffix).send().await?;
        let response = Self::check(response, what).await?;
        Ok(response.json().await?)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        suffix: &str,
        body: &serde_json::Value,
        what: &str,
    ) -> StorageResult<T> {
        let response = self.request(method, suffix).json(body).send().await?;
        let response = Self::check(response, what).await?;
        Ok(response.json().await?)
    }

    async fn pull(&self, number: u64) -> StorageResult<PullResponse> {
        self.get_json(
            &format!("pulls/{}", number),
            &format!("review request #{}", number),
        )
        .await
    }
}

#[async_trait]
impl ObjectStore for GithubStore {
    #[instrument(skip(self))]
    async fn branch_tip(&self, branch: &str) -> StorageResult<CommitId> {
        let reference: RefResponse = self
            .get_json(
                &format!("git/ref/heads/{}", branch),
                &format!("branch '{}'", branch),
            )
            .await?;
        Ok(CommitId(reference.object.sha))
    }

    #[instrument(skip(self, id), fields(commit = %id))]
    async fn commit(&self, id: &CommitId) -> StorageResult<CommitInfo> {
        let commit: GitCommitResponse = self
            .get_json(&format!("git/commits/{}", id), &format!("commit {}", id))
            .await?;
        Ok(CommitInfo {
            id: CommitId(commit.sha),
            tree: TreeId(commit.tree.sha),
            parents: commit.parents.into_iter().map(|p| CommitId(p.sha)).collect(),
            message: commit.message,
        })
    }

    #[instrument(skip(self, ancestor, descendant), fields(ancestor = %ancestor, descendant = %descendant))]
    async fn is_ancestor(
        &self,
        ancestor: &CommitId,
        descendant: &CommitId,
    ) -> StorageResult<bool> {
        let compare: CompareResponse = self
            .get_json(
                &format!("compare/{}...{}", ancestor, descendant),
                &format!("comparison of {} with {}", ancestor, descendant),
            )
            .await?;
        Ok(compare_means_ancestor(&compare.status))
    }

    #[instrument(skip(self, id), fields(commit = %id))]
    async fn commit_file_changes(&self, id: &CommitId) -> StorageResult<Vec<FileChange>> {
        let mut changes = Vec::new();
        let mut page = 1;
        loop {
            let response: CommitFilesResponse = self
                .get_json(
                    &format!("commits/{}?per_page={}&page={}", id, FILES_PER_PAGE, page),
                    &format!("commit {}", id),
                )
                .await?;
            let count = response.files.len();
            changes.extend(response.files.into_iter().filter_map(file_change));
            if count < FILES_PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(changes)
    }

    #[instrument(skip(self, tree), fields(tree = %tree))]
    async fn tree_entry(&self, tree: &TreeId, path: &str) -> StorageResult<Option<PathEntry>> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut current = tree.clone();

        for (i, segment) in segments.iter().enumerate() {
            let listing: TreeResponse = self
                .get_json(&format!("git/trees/{}", current), &format!("tree {}", current))
                .await?;
            let Some(item) = listing.tree.into_iter().find(|e| e.path == *segment) else {
                return Ok(None);
            };

            if i == segments.len() - 1 {
                return leaf_entry(path, item);
            }
            if item.kind != "tree" {
                return Ok(None);
            }
            current = TreeId(item.sha);
        }
        Ok(None)
    }

    #[instrument(skip(self, content), fields(bytes = content.len()))]
    async fn create_blob(&self, content: &[u8]) -> StorageResult<BlobId> {
        let body = json!({
            "content": base64::engine::general_purpose::STANDARD.encode(content),
            "encoding": "base64",
        });
        let blob: ShaRef = self
            .send_json(Method::POST, "git/blobs", &body, "create blob")
            .await?;
        Ok(BlobId(blob.sha))
    }

    #[instrument(skip(self, base, entries), fields(base = %base, entries = entries.len()))]
    async fn create_tree(&self, base: &TreeId, entries: &[TreeEntry]) -> StorageResult<TreeId> {
        let items: Vec<TreeItemRequest<'_>> = entries
            .iter()
            .map(|entry| TreeItemRequest {
                path: &entry.path,
                mode: entry.mode.as_octal(),
                kind: entry.mode.object_type(),
                sha: match &entry.target {
                    EntryTarget::Blob(blob) => Some(blob.as_str()),
                    EntryTarget::Deleted => None,
                },
            })
            .collect();
        let body = json!({ "base_tree": base, "tree": items });
        let tree: ShaRef = self
            .send_json(Method::POST, "git/trees", &body, "create tree")
            .await?;
        Ok(TreeId(tree.sha))
    }

    #[instrument(skip(self, tree, parents, message), fields(tree = %tree))]
    async fn create_commit(
        &self,
        tree: &TreeId,
        parents: &[CommitId],
        message: &str,
    ) -> StorageResult<CommitId> {
        let body = json!({ "message": message, "tree": tree, "parents": parents });
        let commit: ShaRef = self
            .send_json(Method::POST, "git/commits", &body, "create commit")
            .await?;
        Ok(CommitId(commit.sha))
    }

    /// The REST API has no compare-and-set on refs. The expected tip is
    /// checked first, then the ref is moved with `force: false`, which the
    /// server only accepts as a fast-forward of the current tip.
    #[instrument(skip(self, expected, new), fields(expected = %expected, new = %new))]
    async fn update_ref(
        &self,
        branch: &str,
        expected: &CommitId,
        new: &CommitId,
    ) -> StorageResult<RefUpdate> {
        let actual = self.branch_tip(branch).await?;
        if &actual != expected {
            return Ok(RefUpdate::Conflict { actual });
        }

        let body = json!({ "sha": new, "force": false });
        let response = self
            .request(Method::PATCH, &format!("git/refs/heads/{}", branch))
            .json(&body)
            .send()
            .await?;
        if may_be_lost_race(response.status()) {
            // Only a moved ref is a lost race; anything else is a plain rejection.
            let actual = self.branch_tip(branch).await?;
            if &actual != expected {
                warn!(branch, actual = %actual, "ref moved during update");
                return Ok(RefUpdate::Conflict { actual });
            }
        }
        Self::check(response, &format!("branch '{}'", branch)).await?;
        Ok(RefUpdate::Updated)
    }

    #[instrument(skip(self, from), fields(from = %from))]
    async fn create_ref(&self, branch: &str, from: &CommitId) -> StorageResult<()> {
        let body = json!({ "ref": format!("refs/heads/{}", branch), "sha": from });
        let response = self
            .request(Method::POST, "git/refs")
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            // 422 covers both an existing ref and a malformed request.
            refuse_existing_branch(branch, self.branch_tip(branch).await)?;
        }
        Self::check(response, &format!("branch '{}' at {}", branch, from)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_ref(&self, branch: &str) -> StorageResult<()> {
        let response = self
            .request(Method::DELETE, &format!("git/refs/heads/{}", branch))
            .send()
            .await?;
        Self::check(response, &format!("branch '{}'", branch)).await?;
        Ok(())
    }

    #[instrument(skip(self, body))]
    async fn create_review_request(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> StorageResult<ReviewRequest> {
        let payload = json!({ "title": title, "head": head, "base": base, "body": body });
        let pull: PullResponse = self
            .send_json(Method::POST, "pulls", &payload, "create review request")
            .await?;
        Ok(ReviewRequest {
            id: pull.number,
            head: pull.head.name,
            base: pull.base.name,
            title: pull.title,
            url: pull.html_url,
        })
    }

    #[instrument(skip(self))]
    async fn review_request(&self, review_id: u64) -> StorageResult<ReviewRequest> {
        let pull = self.pull(review_id).await?;
        Ok(ReviewRequest {
            id: pull.number,
            head: pull.head.name,
            base: pull.base.name,
            title: pull.title,
            url: pull.html_url,
        })
    }

    #[instrument(skip(self))]
    async fn approve_and_merge(
        &self,
        review_id: u64,
        method: MergeMethod,
    ) -> StorageResult<CommitId> {
        let pull = self.pull(review_id).await?;
        let what = format!("review request #{}", review_id);

        let approval = json!({ "event": "APPROVE" });
        let _: serde_json::Value = self
            .send_json(
                Method::POST,
                &format!("pulls/{}/reviews", review_id),
                &approval,
                &what,
            )
            .await?;

        let merge = json!({ "merge_method": method.as_str() });
        let response = self
            .request(Method::PUT, &format!("pulls/{}/merge", review_id))
            .json(&merge)
            .send()
            .await?;
        if matches!(
            response.status(),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::CONFLICT
        ) {
            return Err(StoreError::MergeConflict {
                base: pull.base.name,
                head: pull.head.name,
            });
        }
        let merged: ShaRef = Self::check(response, &what).await?.json().await?;
        Ok(CommitId(merged.sha))
    }

    #[instrument(skip(self, message))]
    async fn merge_branches(
        &self,
        base: &str,
        head: &str,
        message: &str,
    ) -> StorageResult<MergeOutcome> {
        let body = json!({ "base": base, "head": head, "commit_message": message });
        let response = self.request(Method::POST, "merges").json(&body).send().await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(MergeOutcome::UpToDate),
            StatusCode::CONFLICT => Err(StoreError::MergeConflict {
                base: base.to_string(),
                head: head.to_string(),
            }),
            _ => {
                let what = format!("merge of '{}' into '{}'", head, base);
                let merged: ShaRef = Self::check(response, &what).await?.json().await?;
                Ok(MergeOutcome::Merged(CommitId(merged.sha)))
            }
        }
    }
}
