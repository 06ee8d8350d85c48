use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "healer.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub results: ResultsConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub fixer: FixerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub runs: RunsConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Listen port; the `PORT` environment variable takes precedence
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Resolved listen address.
    pub fn addr(&self) -> String {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(self.port);
        format!("{}:{}", self.bind, port)
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

/// Where per-run working directories are created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "std::env::temp_dir")]
    pub root: PathBuf,

    /// Keep working directories after a run finalizes
    #[serde(default)]
    pub keep: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir(),
            keep: false,
        }
    }
}

/// Where finalized run snapshots are written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsConfig {
    #[serde(default = "std::env::temp_dir")]
    pub dir: PathBuf,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_user_name")]
    pub user_name: String,

    #[serde(default = "default_user_email")]
    pub user_email: String,

    /// Prefix marking automated commits and PR titles
    #[serde(default = "default_commit_prefix")]
    pub commit_prefix: String,

    /// Base branch for pull requests
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// GitHub CLI used to open pull requests
    #[serde(default = "default_pr_command")]
    pub pr_command: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            user_name: default_user_name(),
            user_email: default_user_email(),
            commit_prefix: default_commit_prefix(),
            base_branch: default_base_branch(),
            pr_command: default_pr_command(),
        }
    }
}

fn default_user_name() -> String {
    "AI Agent".to_string()
}

fn default_user_email() -> String {
    "agent@healer.local".to_string()
}

fn default_commit_prefix() -> String {
    "[AI-AGENT]".to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_pr_command() -> String {
    "gh".to_string()
}

/// Fix provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixerConfig {
    /// Environment variable holding the Gemini API key.
    /// When unset, fixes use the pattern-based fallback.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Lines of context either side of the issue line
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
            endpoint: default_endpoint(),
            context_lines: default_context_lines(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash-exp".to_string()
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_context_lines() -> usize {
    10
}

fn default_request_timeout() -> u64 {
    60
}

/// Per-step time budgets, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_git_secs")]
    pub git_secs: u64,
    #[serde(default = "default_clone_secs")]
    pub clone_secs: u64,
    #[serde(default = "default_scan_secs")]
    pub scan_secs: u64,
    #[serde(default = "default_fix_secs")]
    pub fix_secs: u64,
    #[serde(default = "default_test_secs")]
    pub test_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            git_secs: default_git_secs(),
            clone_secs: default_clone_secs(),
            scan_secs: default_scan_secs(),
            fix_secs: default_fix_secs(),
            test_secs: default_test_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_secs)
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_secs(self.fix_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_secs)
    }
}

fn default_git_secs() -> u64 {
    120
}

fn default_clone_secs() -> u64 {
    300
}

fn default_scan_secs() -> u64 {
    300
}

fn default_fix_secs() -> u64 {
    120
}

fn default_test_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsConfig {
    #[serde(default = "default_retry_limit")]
    pub default_retry_limit: u32,

    /// Upper bound accepted for a requested retry limit
    #[serde(default = "default_max_retry_limit")]
    pub max_retry_limit: u32,

    #[serde(default = "default_log_limit")]
    pub log_limit_default: usize,
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            default_retry_limit: default_retry_limit(),
            max_retry_limit: default_max_retry_limit(),
            log_limit_default: default_log_limit(),
        }
    }
}

fn default_retry_limit() -> u32 {
    5
}

fn default_max_retry_limit() -> u32 {
    20
}

fn default_log_limit() -> usize {
    100
}

/// Notification targets for finalized runs.
///
/// Values: `"webhook:<url>"`, a bare `http(s)://` URL, or `"none"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Target for runs ending PASSED or FAILED
    #[serde(default)]
    pub on_complete: Option<String>,

    /// Target for runs ending ERROR
    #[serde(default)]
    pub on_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for a daily-rolling log file; stderr only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Config {
    /// Load configuration from an explicit path, or search the working
    /// directory and then the user config directory, using defaults if
    /// nothing is found.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_file(path);
        }

        match Self::search_paths().into_iter().find(|p| p.exists()) {
            Some(path) => Self::load_file(&path),
            None => Ok(Self::default()),
        }
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("healer").join(CONFIG_FILE));
        }
        paths
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
