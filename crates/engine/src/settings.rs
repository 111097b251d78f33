//! Engine tunables. The host deserialises these from its config file and
//! hands them to [`crate::AppContext`]; nothing in the engine reads config
//! on its own.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    pub tasks: TaskSettings,
    pub search: SearchSettings,
    pub archive: ArchiveSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskSettings {
    /// How long non-archive tasks stay readable after they settle.
    pub grace_period_ms: u64,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: 30_000,
        }
    }
}

impl TaskSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchSettings {
    pub ttl_ms: u64,
    pub result_limit: usize,
    pub ignored_dirs: Vec<String>,
    pub follow_links: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            ttl_ms: 5_000,
            result_limit: 100,
            ignored_dirs: vec![".git".to_string(), "node_modules".to_string()],
            follow_links: false,
        }
    }
}

impl SearchSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Progress reported as soon as a job starts running. Most archivers
    /// say nothing useful before they are well underway.
    pub initial_progress: u8,
    pub tools: ToolPaths,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            initial_progress: 10,
            tools: ToolPaths::default(),
        }
    }
}

/// Program names (or absolute paths) of the external archivers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolPaths {
    pub zip: String,
    pub unzip: String,
    pub seven_zip: String,
    pub tar: String,
    pub gzip: String,
    pub bzip2: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            zip: "zip".to_string(),
            unzip: "unzip".to_string(),
            seven_zip: "7z".to_string(),
            tar: "tar".to_string(),
            gzip: "gzip".to_string(),
            bzip2: "bzip2".to_string(),
        }
    }
}

impl ToolPaths {
    /// `(label, program)` pairs, in a stable order.
    pub fn all(&self) -> [(&'static str, &str); 6] {
        [
            ("zip", &self.zip),
            ("unzip", &self.unzip),
            ("7z", &self.seven_zip),
            ("tar", &self.tar),
            ("gzip", &self.gzip),
            ("bzip2", &self.bzip2),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "search:\n  ttl_ms: 250\narchive:\n  tools:\n    seven_zip: 7zz\n";
        let s: EngineSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(s.search.ttl(), Duration::from_millis(250));
        assert_eq!(s.search.result_limit, 100);
        assert_eq!(s.archive.tools.seven_zip, "7zz");
        assert_eq!(s.archive.tools.tar, "tar");
        assert_eq!(s.tasks.grace_period(), Duration::from_secs(30));
    }
}
