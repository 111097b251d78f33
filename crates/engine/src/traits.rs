use crate::error::TaskResult;
use crate::tasks::AbortSignal;
use std::path::Path;

// ---------------------------------------------------------------------------
// Directory scanning
// ---------------------------------------------------------------------------

/// Recursive directory listing. Called on a blocking worker thread.
pub trait DirectoryScanner: Send + Sync {
    /// Every file below `directory`, in a stable order. Implementations
    /// must check `abort` before each entry and return
    /// `TaskError::Aborted` once it trips.
    fn scan(&self, directory: &Path, abort: &AbortSignal) -> TaskResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// Fuzzy ranking
// ---------------------------------------------------------------------------

pub trait FuzzyRanker: Send + Sync {
    /// Best `limit` candidates for `query`, best first. Non-matches are
    /// dropped.
    fn rank(&self, candidates: &[String], query: &str, limit: usize) -> Vec<String>;
}
