use config::{Config, ConfigError, Environment, File};
use engine::EngineSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "shelf_config.yaml";
const PRODUCTION_FILE: &str = "production_config.yaml";
const LOCAL_FILE: &str = ".shelf_config.yaml";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LoggingFormatConfig,
    #[serde(default)]
    pub levels: LoggingLevelsConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingFormatConfig {
    #[serde(default = "true_default")]
    pub show_time: bool,
    #[serde(default)]
    pub location: LoggingLocationConfig,
}

impl Default for LoggingFormatConfig {
    fn default() -> Self {
        Self {
            show_time: true,
            location: LoggingLocationConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LoggingLocationConfig {
    #[serde(default)]
    pub show_file: bool,
    #[serde(default)]
    pub show_line: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingLevelsConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "true_default")]
    pub info: bool,
    #[serde(default = "true_default")]
    pub warning: bool,
    #[serde(default = "true_default")]
    pub error: bool,
    #[serde(default = "true_default")]
    pub critical: bool,
}

impl Default for LoggingLevelsConfig {
    fn default() -> Self {
        Self {
            debug: false,
            info: true,
            warning: true,
            error: true,
            critical: true,
        }
    }
}

impl LoggingLevelsConfig {
    /// The most verbose enabled level, as an `EnvFilter` directive.
    pub fn filter_directive(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.info {
            "info"
        } else if self.warning {
            "warn"
        } else if self.error || self.critical {
            "error"
        } else {
            "off"
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedactionConfig {
    #[serde(default = "true_default")]
    pub enabled: bool,
    #[serde(default = "true_default")]
    pub use_default_pii: bool,
    #[serde(default)]
    pub patterns: Vec<RedactionPattern>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_default_pii: true,
            patterns: Vec::new(),
        }
    }
}

fn true_default() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedactionPattern {
    pub name: String,
    pub regex: String,
    pub placeholder: String,
}

/// `shelf_config.yaml` next to the CLI crate, falling back to the repo
/// root layout when run from the workspace.
fn default_config_dir() -> PathBuf {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let base = PathBuf::from(manifest_dir);
    if base.join(CONFIG_FILE).exists() {
        base
    } else {
        Path::new("crates").join("cli")
    }
}

/// Layer the config files and `SHELF__*` environment variables.
///
/// An explicit `path` must exist. Without one, a missing base file leaves
/// the built-in defaults in place.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let (base_file, dir, required) = match path {
        Some(p) => (
            p.to_path_buf(),
            p.parent().map(Path::to_path_buf).unwrap_or_default(),
            true,
        ),
        None => {
            let dir = default_config_dir();
            (dir.join(CONFIG_FILE), dir, false)
        }
    };

    let builder = Config::builder()
        .add_source(File::from(base_file).required(required))
        .add_source(File::from(dir.join(PRODUCTION_FILE)).required(false))
        .add_source(File::from(dir.join(LOCAL_FILE)).required(false))
        // Nested keys: SHELF__ENGINE__SEARCH__TTL_MS=250
        .add_source(
            Environment::with_prefix("SHELF")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("engine.search.ignored_dirs"),
        );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    struct EnvGuard(&'static str);
    impl EnvGuard {
        fn new(key: &'static str, val: &str) -> Self {
            env::set_var(key, val);
            Self(key)
        }
    }
    impl Drop for EnvGuard {
        fn drop(&mut self) {
            env::remove_var(self.0);
        }
    }

    fn shipped_config() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join(CONFIG_FILE)
    }

    #[test]
    #[serial]
    fn test_load_config() {
        let config = load_config(Some(&shipped_config()));
        assert!(config.is_ok(), "Failed to load config: {:?}", config.err());

        let config = config.unwrap();
        assert_eq!(config.engine.tasks.grace_period_ms, 30_000);
        assert_eq!(config.engine.search.result_limit, 100);
        assert_eq!(config.engine.archive.initial_progress, 10);
        assert_eq!(config.logging.levels.filter_directive(), "info");
    }

    #[test]
    #[serial]
    fn test_env_var_override_precedence() {
        let _guard = EnvGuard::new("SHELF__ENGINE__SEARCH__TTL_MS", "250");

        let config = load_config(Some(&shipped_config())).expect("Should load config");
        assert_eq!(config.engine.search.ttl_ms, 250);
    }

    #[test]
    #[serial]
    fn test_type_coercion_boolean() {
        {
            let _guard = EnvGuard::new("SHELF__ENGINE__SEARCH__FOLLOW_LINKS", "true");
            let config = load_config(Some(&shipped_config())).expect("Should load config");
            assert!(config.engine.search.follow_links);
        }

        {
            let _guard = EnvGuard::new("SHELF__LOGGING__LEVELS__DEBUG", "true");
            let config = load_config(Some(&shipped_config())).expect("Should load config");
            assert_eq!(config.logging.levels.filter_directive(), "debug");
        }
    }

    #[test]
    #[serial]
    fn test_env_list_override() {
        let _guard = EnvGuard::new("SHELF__ENGINE__SEARCH__IGNORED_DIRS", "target,.cache");

        let config = load_config(Some(&shipped_config())).expect("Should load config");
        assert_eq!(config.engine.search.ignored_dirs, vec!["target", ".cache"]);
    }

    #[test]
    #[serial]
    fn test_tool_path_override() {
        let _guard = EnvGuard::new("SHELF__ENGINE__ARCHIVE__TOOLS__SEVEN_ZIP", "/opt/bin/7zz");

        let config = load_config(Some(&shipped_config())).expect("Should load config");
        assert_eq!(config.engine.archive.tools.seven_zip, "/opt/bin/7zz");
        assert_eq!(config.engine.archive.tools.tar, "tar");
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_error() {
        let result = load_config(Some(Path::new("/definitely/not/shelf_config.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_level_directive() {
        let levels = LoggingLevelsConfig {
            debug: false,
            info: false,
            warning: true,
            error: true,
            critical: true,
        };
        assert_eq!(levels.filter_directive(), "warn");

        let silent = LoggingLevelsConfig {
            debug: false,
            info: false,
            warning: false,
            error: false,
            critical: false,
        };
        assert_eq!(silent.filter_directive(), "off");
    }
}
