//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/scrivener/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/scrivener/` (~/.config/scrivener/)
//! - Data: `$XDG_DATA_HOME/scrivener/` (~/.local/share/scrivener/)
//! - State/Logs: `$XDG_STATE_HOME/scrivener/` (~/.local/state/scrivener/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that pins the active project for one process.
pub const PROJECT_ROOT_ENV: &str = "SCRIVENER_PROJECT_ROOT";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Where the active-project pointer and default project live
    #[serde(default)]
    pub context: ContextConfig,

    /// Progress, milestone and recommendation heuristics
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Session lifecycle settings
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Taxonomy table override
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Context pointer configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ContextConfig {
    /// Override for the pointer file location
    pub pointer_path: Option<PathBuf>,
    /// Override for the well-known default project root
    pub default_project_root: Option<PathBuf>,
}

impl ContextConfig {
    /// Pointer file path, falling back to the data directory
    pub fn pointer_path(&self) -> PathBuf {
        self.pointer_path
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("active_project.json"))
    }

    /// Default project root, falling back to the data directory
    pub fn default_project_root(&self) -> PathBuf {
        self.default_project_root
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("default-project"))
    }
}

/// Workflow intelligence thresholds.
///
/// These are policy, not behavior: every number here can be overridden from
/// the config file or directly in tests.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    /// Completion percentages that award a milestone, ascending
    #[serde(default = "default_milestone_thresholds")]
    pub milestone_thresholds: Vec<u8>,

    /// Number of recent events examined for pattern classification
    #[serde(default = "default_pattern_window")]
    pub pattern_window: usize,

    /// Same-tool count within the window that counts as repetitive
    #[serde(default = "default_repetition_threshold")]
    pub repetition_threshold: usize,

    /// Distinct acts within the window that counts as exploratory
    #[serde(default = "default_exploration_min_acts")]
    pub exploration_min_acts: usize,

    /// Distinct tools within one act that award the diversity milestone
    #[serde(default = "default_tool_diversity_count")]
    pub tool_diversity_count: usize,

    /// Budget for the post-invocation recompute in milliseconds
    #[serde(default = "default_recompute_timeout")]
    pub recompute_timeout_ms: u64,

    /// Maximum characters kept from a tool result
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,

    /// Maximum tools listed on a recommendation
    #[serde(default = "default_recommended_tools_limit")]
    pub recommended_tools_limit: usize,

    /// Completion below which a category in the current act is urgent
    #[serde(default = "default_low_completion_threshold")]
    pub low_completion_threshold: f64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            milestone_thresholds: default_milestone_thresholds(),
            pattern_window: default_pattern_window(),
            repetition_threshold: default_repetition_threshold(),
            exploration_min_acts: default_exploration_min_acts(),
            tool_diversity_count: default_tool_diversity_count(),
            recompute_timeout_ms: default_recompute_timeout(),
            summary_max_chars: default_summary_max_chars(),
            recommended_tools_limit: default_recommended_tools_limit(),
            low_completion_threshold: default_low_completion_threshold(),
        }
    }
}

impl WorkflowConfig {
    /// Validate thresholds, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.milestone_thresholds.is_empty() {
            return Err(Error::Config(
                "workflow.milestone_thresholds must not be empty".to_string(),
            ));
        }
        if self.milestone_thresholds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Config(
                "workflow.milestone_thresholds must be strictly ascending".to_string(),
            ));
        }
        if self.milestone_thresholds.iter().any(|t| *t == 0 || *t > 100) {
            return Err(Error::Config(
                "workflow.milestone_thresholds must be between 1 and 100".to_string(),
            ));
        }
        if self.pattern_window < 2 {
            return Err(Error::Config(
                "workflow.pattern_window must be at least 2".to_string(),
            ));
        }
        if self.repetition_threshold < 2 {
            return Err(Error::Config(
                "workflow.repetition_threshold must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_milestone_thresholds() -> Vec<u8> {
    vec![25, 50, 75, 100]
}

fn default_pattern_window() -> usize {
    5
}

fn default_repetition_threshold() -> usize {
    3
}

fn default_exploration_min_acts() -> usize {
    3
}

fn default_tool_diversity_count() -> usize {
    5
}

fn default_recompute_timeout() -> u64 {
    250
}

fn default_summary_max_chars() -> usize {
    500
}

fn default_recommended_tools_limit() -> usize {
    3
}

fn default_low_completion_threshold() -> f64 {
    25.0
}

/// Session lifecycle configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Minutes without events before an active session reads as abandoned
    #[serde(default = "default_inactivity_minutes")]
    pub inactivity_minutes: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_minutes: default_inactivity_minutes(),
        }
    }
}

fn default_inactivity_minutes() -> u32 {
    120
}

/// Taxonomy configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct TaxonomyConfig {
    /// TOML file replacing the built-in taxonomy table
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.workflow.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/scrivener/config.toml` (~/.config/scrivener/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("scrivener").join("config.toml")
    }

    /// Returns the data directory path (pointer file, default project)
    ///
    /// `$XDG_DATA_HOME/scrivener/` (~/.local/share/scrivener/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("scrivener")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/scrivener/` (~/.local/state/scrivener/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("scrivener")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/scrivener/scrivener.log` (~/.local/state/scrivener/scrivener.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("scrivener.log")
    }
}
