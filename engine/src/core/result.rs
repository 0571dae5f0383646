//! The `commit`/`rollback` return value.

use super::conflict::ConflictInfo;

/// Why a `commit` did not apply any buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    Conflict,
    AncestorCommitted,
    Backend(String),
}

impl std::fmt::Display for CommitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitError::Conflict => write!(f, "write-write conflict"),
            CommitError::AncestorCommitted => write!(f, "an ancestor scope has already committed"),
            CommitError::Backend(msg) => write!(f, "backend error: {msg}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommitResult<K, V> {
    pub label: Option<String>,
    pub success: bool,
    pub error: Option<CommitError>,
    pub conflict: Option<ConflictInfo<K, V>>,
    pub created: Vec<(K, V)>,
    pub updated: Vec<(K, V)>,
    pub deleted: Vec<(K, V)>,
}

impl<K, V> CommitResult<K, V> {
    pub fn success(label: Option<String>, created: Vec<(K, V)>, updated: Vec<(K, V)>, deleted: Vec<(K, V)>) -> Self {
        CommitResult { label, success: true, error: None, conflict: None, created, updated, deleted }
    }

    /// A conflict result. Per the spec's final §4.5 paragraph, the
    /// classified lists are empty at the Root (no partial apply ever
    /// reaches the backend) but identical to the child's would-be
    /// contribution at a nested merge (the caller classifies the child's
    /// buffers before they're discarded and passes them in here; a root
    /// conflict passes empty vectors).
    pub fn conflict(
        label: Option<String>,
        conflict: ConflictInfo<K, V>,
        created: Vec<(K, V)>,
        updated: Vec<(K, V)>,
        deleted: Vec<(K, V)>,
    ) -> Self {
        CommitResult { label, success: false, error: Some(CommitError::Conflict), conflict: Some(conflict), created, updated, deleted }
    }

    /// An `AncestorCommitted` result: the classified lists still report
    /// what this scope would have contributed (so callers may log them),
    /// even though none of it propagates anywhere.
    pub fn ancestor_committed(label: Option<String>, created: Vec<(K, V)>, updated: Vec<(K, V)>, deleted: Vec<(K, V)>) -> Self {
        CommitResult { label, success: false, error: Some(CommitError::AncestorCommitted), conflict: None, created, updated, deleted }
    }

    /// A rollback result: never fails, reports nothing.
    pub fn rolled_back(label: Option<String>) -> Self {
        CommitResult {
            label,
            success: true,
            error: None,
            conflict: None,
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }
}
