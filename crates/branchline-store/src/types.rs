//! Value types of the remote commit graph.
//!
//! Blobs, trees and commits are immutable and content addressed; the only
//! mutable entity is a branch ref, which is updated through
//! [`ObjectStore::update_ref`](crate::storage_traits::ObjectStore::update_ref).

use serde::{Deserialize, Serialize};

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            /// Return the full hex string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Short form (first 8 hex chars).
            pub fn short(&self) -> &str {
                &self.0[..8.min(self.0.len())]
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }
    };
}

object_id!(
    /// Identifier of a commit object.
    CommitId
);
object_id!(
    /// Identifier of a tree object.
    TreeId
);
object_id!(
    /// Identifier of a blob object.
    BlobId
);

// ---------------------------------------------------------------------------
// FileMode
// ---------------------------------------------------------------------------

/// Mode of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileMode {
    #[default]
    File,
    Executable,
    Submodule,
}

impl FileMode {
    /// Octal mode string as used by the git data API.
    pub fn as_octal(&self) -> &'static str {
        match self {
            FileMode::File => "100644",
            FileMode::Executable => "100755",
            FileMode::Submodule => "160000",
        }
    }

    pub fn from_octal(mode: &str) -> Option<Self> {
        match mode {
            "100644" => Some(FileMode::File),
            "100755" => Some(FileMode::Executable),
            "160000" => Some(FileMode::Submodule),
            _ => None,
        }
    }

    /// Object type the git data API expects alongside this mode.
    pub fn object_type(&self) -> &'static str {
        match self {
            FileMode::Submodule => "commit",
            _ => "blob",
        }
    }
}

// ---------------------------------------------------------------------------
// Trees
// ---------------------------------------------------------------------------

/// What a tree entry points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryTarget {
    Blob(BlobId),
    /// Removes the path from the base tree.
    Deleted,
}

/// One path override applied on top of a base tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: FileMode,
    pub target: EntryTarget,
}

impl TreeEntry {
    pub fn blob(path: impl Into<String>, blob: BlobId, mode: FileMode) -> Self {
        Self {
            path: path.into(),
            mode,
            target: EntryTarget::Blob(blob),
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: FileMode::File,
            target: EntryTarget::Deleted,
        }
    }
}

/// Blob and mode currently stored at a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    pub blob: BlobId,
    pub mode: FileMode,
}

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

/// A commit as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: CommitId,
    pub tree: TreeId,
    pub parents: Vec<CommitId>,
    pub message: String,
}

impl CommitInfo {
    /// First parent, the one a file-level change set is computed against.
    pub fn first_parent(&self) -> Option<&CommitId> {
        self.parents.first()
    }
}

/// How a path changed in a commit relative to its first parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed { previous_path: String },
}

/// One entry of a commit's file-level change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(flatten)]
    pub status: FileStatus,
    /// New content id; `None` for removals.
    pub blob: Option<BlobId>,
}

// ---------------------------------------------------------------------------
// Refs, merges, reviews
// ---------------------------------------------------------------------------

/// Result of a compare-and-set ref update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefUpdate {
    Updated,
    /// The ref no longer pointed at the expected commit.
    Conflict { actual: CommitId },
}

/// Result of merging one branch into another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "commit")]
pub enum MergeOutcome {
    Merged(CommitId),
    /// `base` already contains `head`.
    UpToDate,
}

/// An open review (pull) request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub id: u64,
    pub head: String,
    pub base: String,
    pub title: String,
    pub url: Option<String>,
}

/// How an approved review request is integrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    #[default]
    Merge,
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        }
    }
}

impl std::str::FromStr for MergeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merge" => Ok(MergeMethod::Merge),
            "squash" => Ok(MergeMethod::Squash),
            "rebase" => Ok(MergeMethod::Rebase),
            other => Err(format!("unknown merge method: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_mode_octal_round_trip() {
        for mode in [FileMode::File, FileMode::Executable, FileMode::Submodule] {
            assert_eq!(FileMode::from_octal(mode.as_octal()), Some(mode));
        }
        assert_eq!(FileMode::from_octal("040000"), None);
    }

    #[test]
    fn short_id_is_eight_chars() {
        let id = CommitId::new("0123456789abcdef");
        assert_eq!(id.short(), "01234567");
        assert_eq!(CommitId::new("abc").short(), "abc");
    }

    #[test]
    fn file_change_serializes_status_inline() {
        let change = FileChange {
            path: "Files/new.txt".to_string(),
            status: FileStatus::Renamed {
                previous_path: "Files/old.txt".to_string(),
            },
            blob: Some(BlobId::new("b1")),
        };
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["status"], "renamed");
        assert_eq!(value["previous_path"], "Files/old.txt");
        assert_eq!(value["blob"], "b1");
    }

    #[test]
    fn merge_method_parses() {
        assert_eq!("squash".parse::<MergeMethod>().unwrap(), MergeMethod::Squash);
        assert!("octopus".parse::<MergeMethod>().is_err());
    }
}
