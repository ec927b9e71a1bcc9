//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryObjectStore` and `MemoryAuditLog` that satisfy the trait
//! contracts without any network access.
//!
//! `MemoryObjectStore` keeps trees flat (full path -> entry) and hashes
//! every object with SHA-256, so identical content yields identical ids the
//! same way the remote store does. Commit ids also fold in a per-store
//! creation counter, standing in for the committer timestamp.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::storage_traits::*;
use crate::types::*;

type FlatTree = BTreeMap<String, PathEntry>;

fn digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

fn blob_id(content: &[u8]) -> BlobId {
    BlobId(digest(&[b"blob\0", content]))
}

fn tree_id(tree: &FlatTree) -> TreeId {
    let mut listing = String::new();
    for (path, entry) in tree {
        listing.push_str(entry.mode.as_octal());
        listing.push(' ');
        listing.push_str(path);
        listing.push('\0');
        listing.push_str(entry.blob.as_str());
        listing.push('\n');
    }
    TreeId(digest(&[b"tree\0", listing.as_bytes()]))
}

#[derive(Debug, Clone)]
struct StoredReview {
    request: ReviewRequest,
    merged: bool,
}

#[derive(Debug, Default)]
struct Graph {
    blobs: HashMap<BlobId, Vec<u8>>,
    trees: HashMap<TreeId, FlatTree>,
    commits: HashMap<CommitId, CommitInfo>,
    refs: HashMap<String, CommitId>,
    reviews: HashMap<u64, StoredReview>,
    sequence: u64,
    unavailable: bool,
    race_next_update: Option<CommitId>,
}

impl Graph {
    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable {
            return Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn put_blob(&mut self, content: &[u8]) -> BlobId {
        let id = blob_id(content);
        self.blobs.entry(id.clone()).or_insert_with(|| content.to_vec());
        id
    }

    fn put_tree(&mut self, tree: FlatTree) -> TreeId {
        let id = tree_id(&tree);
        self.trees.entry(id.clone()).or_insert(tree);
        id
    }

    fn put_commit(&mut self, tree: TreeId, parents: Vec<CommitId>, message: &str) -> CommitId {
        self.sequence += 1;
        let mut header = format!("tree {}\n", tree);
        for parent in &parents {
            header.push_str(&format!("parent {}\n", parent));
        }
        header.push_str(&format!("sequence {}\n\n", self.sequence));
        let id = CommitId(digest(&[b"commit\0", header.as_bytes(), message.as_bytes()]));
        self.commits.insert(
            id.clone(),
            CommitInfo {
                id: id.clone(),
                tree,
                parents,
                message: message.to_string(),
            },
        );
        id
    }

    fn tip(&self, branch: &str) -> StorageResult<CommitId> {
        self.refs
            .get(branch)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("branch '{}'", branch)))
    }

    fn commit(&self, id: &CommitId) -> StorageResult<&CommitInfo> {
        self.commits
            .get(id)
            .ok_or_else(|| StoreError::not_found(format!("commit {}", id)))
    }

    fn tree(&self, id: &TreeId) -> StorageResult<&FlatTree> {
        self.trees
            .get(id)
            .ok_or_else(|| StoreError::not_found(format!("tree {}", id)))
    }

    fn commit_tree(&self, id: &CommitId) -> StorageResult<FlatTree> {
        let commit = self.commit(id)?;
        Ok(self.tree(&commit.tree)?.clone())
    }

    /// All commits reachable from `start`, including `start`.
    fn ancestors(&self, start: &CommitId) -> HashSet<CommitId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&id) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        seen
    }

    /// Nearest common ancestor found by breadth-first search from `b`.
    fn merge_base(&self, a: &CommitId, b: &CommitId) -> Option<CommitId> {
        let of_a = self.ancestors(a);
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([b.clone()]);
        while let Some(id) = queue.pop_front() {
            if of_a.contains(&id) {
                return Some(id);
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&id) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        None
    }

    /// File-level three-way merge. Returns `None` on a conflicting path.
    fn three_way(&self, ours: &CommitId, theirs: &CommitId) -> StorageResult<Option<FlatTree>> {
        let base = match self.merge_base(ours, theirs) {
            Some(id) => self.commit_tree(&id)?,
            None => FlatTree::new(),
        };
        let ours = self.commit_tree(ours)?;
        let theirs = self.commit_tree(theirs)?;

        let paths: std::collections::BTreeSet<&String> =
            base.keys().chain(ours.keys()).chain(theirs.keys()).collect();

        let mut merged = FlatTree::new();
        for path in paths {
            let b = base.get(path);
            let o = ours.get(path);
            let t = theirs.get(path);
            let pick = if o == t || t == b {
                o
            } else if o == b {
                t
            } else {
                return Ok(None);
            };
            if let Some(entry) = pick {
                merged.insert(path.clone(), entry.clone());
            }
        }
        Ok(Some(merged))
    }
}

/// In-memory commit graph with compare-and-set refs.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    graph: Mutex<Graph>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `branch` with a root commit containing `files`.
    pub fn seed_branch(&self, branch: &str, files: &[(&str, &str)]) -> CommitId {
        let mut graph = self.graph.lock().unwrap();
        let mut tree = FlatTree::new();
        for (path, content) in files {
            let blob = graph.put_blob(content.as_bytes());
            tree.insert(
                path.to_string(),
                PathEntry {
                    blob,
                    mode: FileMode::File,
                },
            );
        }
        let tree = graph.put_tree(tree);
        let id = graph.put_commit(tree, Vec::new(), "Initial commit");
        graph.refs.insert(branch.to_string(), id.clone());
        id
    }

    /// Commit directly on `branch` without going through the trait.
    ///
    /// `None` content removes the path. Used to set up source histories.
    pub fn commit_files(
        &self,
        branch: &str,
        files: &[(&str, Option<&str>)],
        message: &str,
    ) -> CommitId {
        let mut graph = self.graph.lock().unwrap();
        let parent = graph.tip(branch).expect("branch exists");
        let mut tree = graph.commit_tree(&parent).expect("parent tree");
        for (path, content) in files {
            match content {
                Some(content) => {
                    let blob = graph.put_blob(content.as_bytes());
                    tree.insert(
                        path.to_string(),
                        PathEntry {
                            blob,
                            mode: FileMode::File,
                        },
                    );
                }
                None => {
                    tree.remove(*path);
                }
            }
        }
        let tree = graph.put_tree(tree);
        let id = graph.put_commit(tree, vec![parent], message);
        graph.refs.insert(branch.to_string(), id.clone());
        id
    }

    /// Point `branch` at `commit` unconditionally, creating it if needed.
    pub fn force_ref(&self, branch: &str, commit: &CommitId) {
        let mut graph = self.graph.lock().unwrap();
        graph.refs.insert(branch.to_string(), commit.clone());
    }

    /// Current target of `branch`, if it exists.
    pub fn ref_target(&self, branch: &str) -> Option<CommitId> {
        self.graph.lock().unwrap().refs.get(branch).cloned()
    }

    /// Full path listing of a tree.
    pub fn flat_tree(&self, tree: &TreeId) -> BTreeMap<String, PathEntry> {
        self.graph
            .lock()
            .unwrap()
            .trees
            .get(tree)
            .cloned()
            .unwrap_or_default()
    }

    /// Content at `path` on the tip of `branch`, as UTF-8.
    pub fn read_path(&self, branch: &str, path: &str) -> Option<String> {
        let graph = self.graph.lock().unwrap();
        let tip = graph.refs.get(branch)?;
        let tree = graph.commit_tree(tip).ok()?;
        let entry = tree.get(path)?;
        let bytes = graph.blobs.get(&entry.blob)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Fetch a commit without going through the async trait.
    pub fn commit_info(&self, id: &CommitId) -> Option<CommitInfo> {
        self.graph.lock().unwrap().commits.get(id).cloned()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.graph.lock().unwrap().unavailable = unavailable;
    }

    /// Simulate a concurrent writer: just before the next `update_ref`, the
    /// target branch is moved to `commit`.
    pub fn race_next_ref_update(&self, commit: &CommitId) {
        self.graph.lock().unwrap().race_next_update = Some(commit.clone());
    }

    /// Review request state: `(request, merged)`.
    pub fn review(&self, id: u64) -> Option<(ReviewRequest, bool)> {
        self.graph
            .lock()
            .unwrap()
            .reviews
            .get(&id)
            .map(|r| (r.request.clone(), r.merged))
    }

    pub fn blob_count(&self) -> usize {
        self.graph.lock().unwrap().blobs.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn branch_tip(&self, branch: &str) -> StorageResult<CommitId> {
        let graph = self.graph.lock().unwrap();
        graph.check_available()?;
        graph.tip(branch)
    }

    async fn commit(&self, id: &CommitId) -> StorageResult<CommitInfo> {
        let graph = self.graph.lock().unwrap();
        graph.check_available()?;
        graph.commit(id).cloned()
    }

    async fn is_ancestor(
        &self,
        ancestor: &CommitId,
        descendant: &CommitId,
    ) -> StorageResult<bool> {
        let graph = self.graph.lock().unwrap();
        graph.check_available()?;
        graph.commit(ancestor)?;
        graph.commit(descendant)?;
        Ok(graph.ancestors(descendant).contains(ancestor))
    }

    async fn commit_file_changes(&self, id: &CommitId) -> StorageResult<Vec<FileChange>> {
        let graph = self.graph.lock().unwrap();
        graph.check_available()?;
        let commit = graph.commit(id)?;
        let after = graph.tree(&commit.tree)?;
        let before = match commit.first_parent() {
            Some(parent) => graph.commit_tree(parent)?,
            None => FlatTree::new(),
        };

        let mut changes = Vec::new();
        for (path, entry) in after {
            match before.get(path) {
                None => changes.push(FileChange {
                    path: path.clone(),
                    status: FileStatus::Added,
                    blob: Some(entry.blob.clone()),
                }),
                Some(old) if old != entry => changes.push(FileChange {
                    path: path.clone(),
                    status: FileStatus::Modified,
                    blob: Some(entry.blob.clone()),
                }),
                Some(_) => {}
            }
        }
        for path in before.keys() {
            if !after.contains_key(path) {
                changes.push(FileChange {
                    path: path.clone(),
                    status: FileStatus::Removed,
                    blob: None,
                });
            }
        }
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(changes)
    }

    async fn tree_entry(&self, tree: &TreeId, path: &str) -> StorageResult<Option<PathEntry>> {
        let graph = self.graph.lock().unwrap();
        graph.check_available()?;
        Ok(graph.tree(tree)?.get(path).cloned())
    }

    async fn create_blob(&self, content: &[u8]) -> StorageResult<BlobId> {
        let mut graph = self.graph.lock().unwrap();
        graph.check_available()?;
        Ok(graph.put_blob(content))
    }

    async fn create_tree(&self, base: &TreeId, entries: &[TreeEntry]) -> StorageResult<TreeId> {
        let mut graph = self.graph.lock().unwrap();
        graph.check_available()?;
        let mut tree = graph.tree(base)?.clone();
        for entry in entries {
            match &entry.target {
                EntryTarget::Blob(blob) => {
                    if !graph.blobs.contains_key(blob) {
                        return Err(StoreError::not_found(format!("blob {}", blob)));
                    }
                    tree.insert(
                        entry.path.clone(),
                        PathEntry {
                            blob: blob.clone(),
                            mode: entry.mode,
                        },
                    );
                }
                EntryTarget::Deleted => {
                    tree.remove(&entry.path);
                }
            }
        }
        Ok(graph.put_tree(tree))
    }

    async fn create_commit(
        &self,
        tree: &TreeId,
        parents: &[CommitId],
        message: &str,
    ) -> StorageResult<CommitId> {
        let mut graph = self.graph.lock().unwrap();
        graph.check_available()?;
        graph.tree(tree)?;
        for parent in parents {
            graph.commit(parent)?;
        }
        Ok(graph.put_commit(tree.clone(), parents.to_vec(), message))
    }

    async fn update_ref(
        &self,
        branch: &str,
        expected: &CommitId,
        new: &CommitId,
    ) -> StorageResult<RefUpdate> {
        let mut graph = self.graph.lock().unwrap();
        graph.check_available()?;
        if let Some(raced) = graph.race_next_update.take() {
            graph.refs.insert(branch.to_string(), raced);
        }
        graph.commit(new)?;
        let actual = graph.tip(branch)?;
        if &actual != expected {
            return Ok(RefUpdate::Conflict { actual });
        }
        graph.refs.insert(branch.to_string(), new.clone());
        Ok(RefUpdate::Updated)
    }

    async fn create_ref(&self, branch: &str, from: &CommitId) -> StorageResult<()> {
        let mut graph = self.graph.lock().unwrap();
        graph.check_available()?;
        graph.commit(from)?;
        if let Some(existing) = graph.refs.get(branch) {
            return Err(StoreError::RefConflict {
                branch: branch.to_string(),
                expected: "<absent>".to_string(),
                actual: existing.to_string(),
            });
        }
        graph.refs.insert(branch.to_string(), from.clone());
        Ok(())
    }

    async fn delete_ref(&self, branch: &str) -> StorageResult<()> {
        let mut graph = self.graph.lock().unwrap();
        graph.check_available()?;
        graph
            .refs
            .remove(branch)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(format!("branch '{}'", branch)))
    }

    async fn create_review_request(
        &self,
        head: &str,
        base: &str,
        title: &str,
        _body: &str,
    ) -> StorageResult<ReviewRequest> {
        let mut graph = self.graph.lock().unwrap();
        graph.check_available()?;
        graph.tip(head)?;
        graph.tip(base)?;
        let id = graph.reviews.len() as u64 + 1;
        let request = ReviewRequest {
            id,
            head: head.to_string(),
            base: base.to_string(),
            title: title.to_string(),
            url: Some(format!("memory://reviews/{}", id)),
        };
        graph.reviews.insert(
            id,
            StoredReview {
                request: request.clone(),
                merged: false,
            },
        );
        Ok(request)
    }

    async fn review_request(&self, review_id: u64) -> StorageResult<ReviewRequest> {
        let graph = self.graph.lock().unwrap();
        graph.check_available()?;
        graph
            .reviews
            .get(&review_id)
            .map(|r| r.request.clone())
            .ok_or_else(|| StoreError::not_found(format!("review request #{}", review_id)))
    }

    async fn approve_and_merge(
        &self,
        review_id: u64,
        method: MergeMethod,
    ) -> StorageResult<CommitId> {
        let mut graph = self.graph.lock().unwrap();
        graph.check_available()?;
        let review = graph
            .reviews
            .get(&review_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("review request #{}", review_id)))?;
        if review.merged {
            return Err(StoreError::Rejected {
                status: 405,
                message: format!("review request #{} is already merged", review_id),
            });
        }
        let ReviewRequest { head, base, .. } = &review.request;
        let base_tip = graph.tip(base)?;
        let head_tip = graph.tip(head)?;

        let merged = graph
            .three_way(&base_tip, &head_tip)?
            .ok_or_else(|| StoreError::MergeConflict {
                base: base.clone(),
                head: head.clone(),
            })?;
        let tree = graph.put_tree(merged);
        let message = format!("Merge pull request #{} from {}", review_id, head);
        // Squash and rebase both land as a single commit on top of base.
        let parents = match method {
            MergeMethod::Merge => vec![base_tip, head_tip],
            MergeMethod::Squash | MergeMethod::Rebase => vec![base_tip],
        };
        let id = graph.put_commit(tree, parents, &message);
        graph.refs.insert(base.clone(), id.clone());
        if let Some(stored) = graph.reviews.get_mut(&review_id) {
            stored.merged = true;
        }
        Ok(id)
    }

    async fn merge_branches(
        &self,
        base: &str,
        head: &str,
        message: &str,
    ) -> StorageResult<MergeOutcome> {
        let mut graph = self.graph.lock().unwrap();
        graph.check_available()?;
        let base_tip = graph.tip(base)?;
        let head_tip = graph.tip(head)?;

        if graph.ancestors(&base_tip).contains(&head_tip) {
            return Ok(MergeOutcome::UpToDate);
        }

        let merged = graph
            .three_way(&base_tip, &head_tip)?
            .ok_or_else(|| StoreError::MergeConflict {
                base: base.to_string(),
                head: head.to_string(),
            })?;
        let tree = graph.put_tree(merged);
        let id = graph.put_commit(tree, vec![base_tip, head_tip], message);
        graph.refs.insert(base.to_string(), id.clone());
        Ok(MergeOutcome::Merged(id))
    }
}

// ---------------------------------------------------------------------------
// MemoryAuditLog
// ---------------------------------------------------------------------------

/// In-memory audit log backed by a `Vec<AuditRecord>`.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
    failing: bool,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log whose appends always fail, for exercising best-effort auditing.
    pub fn failing() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            failing: true,
        }
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn append(&self, record: AuditRecord) -> StorageResult<()> {
        if self.failing {
            return Err(StoreError::Io(std::io::Error::other(
                "audit log is not writable",
            )));
        }
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    async fn records(&self) -> StorageResult<Vec<AuditRecord>> {
        Ok(self.records.lock().unwrap().clone())
    }
}
