// src/config.rs
//
// Engine configuration: TOML on disk, defaults in code.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "unitforge.toml";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
}

/// Which AI backend to talk to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Hosted chat/completions API
    Http {
        provider: Provider,
        model: String,
        /// Name of the environment variable holding the API key
        api_key_env: String,
        base_url: Option<String>,
    },
    /// Local process reading the prompt on stdin, answering on stdout
    Command { program: String, args: Vec<String> },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Http {
            provider: Provider::OpenAI,
            model: "gpt-5.2".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
        }
    }
}

/// Shell command templates for one language.
///
/// Placeholders: `{test_file}`, `{test_name}`, `{workdir}`,
/// `{per_test_timeout_secs}`, `{coverage_file}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSet {
    pub compile: String,
    pub execute: String,
    /// Run used for coverage passes; falls back to `execute`
    #[serde(default)]
    pub coverage: Option<String>,
    /// Compile and run tests appended to a source file, used for
    /// crate-private Rust targets; fall back to `compile` and `execute`
    #[serde(default)]
    pub inline_compile: Option<String>,
    #[serde(default)]
    pub inline_execute: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    pub rust: CommandSet,
    pub python: CommandSet,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            rust: CommandSet {
                compile: "cargo test --no-run --color never --test {test_name}".into(),
                execute: "cargo test --color never --test {test_name}".into(),
                coverage: None,
                inline_compile: Some("cargo test --no-run --color never".into()),
                inline_execute: Some("cargo test --color never unitforge_tests".into()),
            },
            python: CommandSet {
                compile: "python -m py_compile {test_file}".into(),
                execute: "python -m pytest -q -rA {test_file}".into(),
                coverage: None,
                inline_compile: None,
                inline_execute: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub max_attempts: u32,
    pub concurrency_limit: usize,
    pub per_test_timeout_ms: u64,
    pub per_suite_timeout_ms: u64,
    pub include_accessors: bool,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,

    pub generation_timeout_ms: u64,
    pub max_generation_retries: u32,
    pub history_window: usize,
    pub history_char_budget: usize,
    pub max_tokens: u32,

    pub collect_coverage: bool,
    pub accumulate_coverage: bool,

    /// Parent directory for per-verification scratch areas
    pub scratch_root: Option<PathBuf>,
    /// Hard deadline for a whole batch
    pub batch_deadline_ms: Option<u64>,

    pub backend: BackendConfig,
    pub toolchain: ToolchainConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            concurrency_limit: 4,
            per_test_timeout_ms: 10_000,
            per_suite_timeout_ms: 120_000,
            include_accessors: false,
            backoff_base_ms: 500,
            backoff_cap_ms: 8_000,

            generation_timeout_ms: 60_000,
            max_generation_retries: 3,
            history_window: 3,
            history_char_budget: 12_000,
            max_tokens: 2048,

            collect_coverage: true,
            accumulate_coverage: false,

            scratch_root: None,
            batch_deadline_ms: None,

            backend: BackendConfig::default(),
            toolchain: ToolchainConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration.
    ///
    /// Lookup order: explicit path, `<project>/unitforge.toml`,
    /// `<config dir>/unitforge/config.toml`, then defaults.
    pub fn load(explicit: Option<&Path>, project_root: &Path) -> Result<Self, ConfigError> {
        let cfg = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let local = project_root.join(CONFIG_FILE_NAME);
                let global = user_config_path();

                if local.is_file() {
                    Self::from_file(&local)?
                } else if global.is_file() {
                    Self::from_file(&global)?
                } else {
                    tracing::debug!("no config file found, using defaults");
                    Self::default()
                }
            }
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let cfg: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if self.concurrency_limit < 1 {
            return Err(ConfigError::invalid("concurrency_limit", "must be at least 1"));
        }
        for (field, value) in [
            ("per_test_timeout_ms", self.per_test_timeout_ms),
            ("per_suite_timeout_ms", self.per_suite_timeout_ms),
            ("generation_timeout_ms", self.generation_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        if self.backoff_base_ms > self.backoff_cap_ms {
            return Err(ConfigError::invalid(
                "backoff_base_ms",
                format!(
                    "{} exceeds backoff_cap_ms {}",
                    self.backoff_base_ms, self.backoff_cap_ms
                ),
            ));
        }
        if self.history_char_budget == 0 {
            return Err(ConfigError::invalid("history_char_budget", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn per_test_timeout(&self) -> Duration {
        Duration::from_millis(self.per_test_timeout_ms)
    }

    pub fn per_suite_timeout(&self) -> Duration {
        Duration::from_millis(self.per_suite_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn batch_deadline(&self) -> Option<Duration> {
        self.batch_deadline_ms.map(Duration::from_millis)
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("unitforge"))
    }
}

pub fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("unitforge/config.toml")
}

pub fn save_config(path: &Path, cfg: &EngineConfig) -> Result<(), ConfigError> {
    let text = toml::to_string_pretty(cfg)
        .map_err(|e| ConfigError::invalid("config", e.to_string()))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Read {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    fs::write(path, text).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_attempts, 3);
    }

    #[test]
    fn rejects_zero_attempts_and_inverted_backoff() {
        let cfg = EngineConfig {
            max_attempts: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { field: "max_attempts", .. })
        ));

        let cfg = EngineConfig {
            backoff_base_ms: 10_000,
            backoff_cap_ms: 100,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
max_attempts = 5
include_accessors = true

[backend]
kind = "command"
program = "ollama-bridge"
args = ["--model", "qwen"]
"#,
        )
        .unwrap();

        assert_eq!(cfg.max_attempts, 5);
        assert!(cfg.include_accessors);
        assert_eq!(cfg.concurrency_limit, 4);
        assert_eq!(
            cfg.backend,
            BackendConfig::Command {
                program: "ollama-bridge".into(),
                args: vec!["--model".into(), "qwen".into()],
            }
        );
    }

    #[test]
    fn project_file_wins_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "concurrency_limit = 7\n").unwrap();

        let cfg = EngineConfig::load(None, dir.path()).unwrap();
        assert_eq!(cfg.concurrency_limit, 7);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let cfg = EngineConfig {
            max_attempts: 4,
            ..EngineConfig::default()
        };

        save_config(&path, &cfg).unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap(), cfg);
    }
}
