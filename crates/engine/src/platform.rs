//! Real implementations of the engine's capability traits.
//!
//! - [`WalkdirScanner`]: recursive listing via `walkdir`
//! - [`NucleoRanker`]: fuzzy path ranking via `nucleo-matcher`

use crate::error::{TaskError, TaskResult};
use crate::settings::SearchSettings;
use crate::tasks::AbortSignal;
use crate::traits::*;
use nucleo_matcher::pattern::{CaseMatching, Normalization, Pattern};
use nucleo_matcher::{Config, Matcher};
use std::path::Path;

// ===========================================================================
// Scanner – wraps walkdir
// ===========================================================================

pub struct WalkdirScanner {
    ignored_dirs: Vec<String>,
    follow_links: bool,
}

impl WalkdirScanner {
    pub fn new(settings: &SearchSettings) -> Self {
        Self {
            ignored_dirs: settings.ignored_dirs.clone(),
            follow_links: settings.follow_links,
        }
    }

    fn is_ignored(&self, entry: &walkdir::DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && self
                .ignored_dirs
                .iter()
                .any(|name| entry.file_name() == name.as_str())
    }
}

impl DirectoryScanner for WalkdirScanner {
    fn scan(&self, directory: &Path, abort: &AbortSignal) -> TaskResult<Vec<String>> {
        if !directory.is_dir() {
            return Err(TaskError::Validation(format!(
                "{} is not a directory",
                directory.display()
            )));
        }

        let walker = walkdir::WalkDir::new(directory)
            .follow_links(self.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.is_ignored(e));

        let mut files = Vec::new();
        for entry in walker {
            abort.check()?;
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file() {
                files.push(entry.path().to_string_lossy().into_owned());
            }
        }
        tracing::debug!(directory = %directory.display(), files = files.len(), "scan finished");
        Ok(files)
    }
}

// ===========================================================================
// Ranker – wraps nucleo-matcher
// ===========================================================================

pub struct NucleoRanker;

impl FuzzyRanker for NucleoRanker {
    fn rank(&self, candidates: &[String], query: &str, limit: usize) -> Vec<String> {
        let mut matcher = Matcher::new(Config::DEFAULT.match_paths());
        let pattern = Pattern::parse(query, CaseMatching::Ignore, Normalization::Smart);
        pattern
            .match_list(candidates.iter().map(String::as_str), &mut matcher)
            .into_iter()
            .take(limit)
            .map(|(path, _score)| path.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_scan_lists_files_sorted_and_skips_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("b.txt"));
        touch(&tmp.path().join("a/inner.rs"));
        touch(&tmp.path().join(".git/HEAD"));
        touch(&tmp.path().join("node_modules/pkg/index.js"));

        let scanner = WalkdirScanner::new(&SearchSettings::default());
        let files = scanner.scan(tmp.path(), &AbortSignal::never()).unwrap();
        let rel: Vec<String> = files
            .iter()
            .map(|f| {
                Path::new(f)
                    .strip_prefix(tmp.path())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        assert_eq!(rel, vec!["a/inner.rs", "b.txt"]);
    }

    #[test]
    fn test_scan_rejects_missing_directory() {
        let scanner = WalkdirScanner::new(&SearchSettings::default());
        let err = scanner
            .scan(Path::new("/definitely/not/here"), &AbortSignal::never())
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[test]
    fn test_ranker_prefers_closer_match_and_drops_misses() {
        let candidates = vec![
            "/p/docs/manual.pdf".to_string(),
            "/p/src/main.rs".to_string(),
            "/p/zzz.txt".to_string(),
        ];
        let ranked = NucleoRanker.rank(&candidates, "main.rs", 10);
        assert_eq!(ranked.first().map(String::as_str), Some("/p/src/main.rs"));
        assert!(!ranked.contains(&"/p/zzz.txt".to_string()));
    }

    #[test]
    fn test_ranker_respects_limit() {
        let candidates: Vec<String> = (0..20).map(|i| format!("/p/file{}.txt", i)).collect();
        assert_eq!(NucleoRanker.rank(&candidates, "file", 5).len(), 5);
    }
}
