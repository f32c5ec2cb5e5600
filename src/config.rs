use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub coverage: CoverageConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Queue,
    Tooling,
}

/// Controls how test runs are submitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Strategies to try, in order.
    pub strategies: Vec<StrategyKind>,
    /// Return an analysis-only job instead of an error when every strategy fails.
    pub analysis_fallback: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            strategies: vec![StrategyKind::Queue, StrategyKind::Tooling],
            analysis_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub max_wait_secs: u64,
    pub poll_interval_secs: u64,
    /// Attempts per poll before a transient failure is surfaced.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: 600,
            poll_interval_secs: 5,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 8_000,
        }
    }
}

impl PollingConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Per-source budget. A source that exceeds it contributes no records.
    pub source_timeout_secs: u64,
    /// Look-back window for the recent-coverage source. The source is not
    /// queried until a window is configured.
    /// Example: 60
    pub recent_window_minutes: Option<u64>,
    /// Query method-level coverage for the whole org.
    pub detailed: bool,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            source_timeout_secs: 30,
            recent_window_minutes: None,
            detailed: true,
        }
    }
}

impl CoverageConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }
}

/// Controls failure diagnostics.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Messages longer than this many characters are truncated.
    pub message_cap: usize,
    /// Glob patterns of frames that are never attributed as the failure location.
    /// Example: ["System.*", "fflib_*"]
    pub platform_frames: Vec<String>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            message_cap: 4_000,
            platform_frames: [
                "System.*",
                "Database.*",
                "Schema.*",
                "AnonymousBlock*",
                "External entry point*",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Config {
    /// Parse a config file, failing on missing or malformed input.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Load `forcelens.toml` from `dir`, falling back to defaults if absent or invalid.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join("forcelens.toml");
        if !path.exists() {
            return Self::default();
        }
        Self::from_file(&path).unwrap_or_else(|e| {
            let error = format!("{:#}", e);
            warn!(path = %path.display(), %error, "ignoring invalid config");
            Self::default()
        })
    }
}
