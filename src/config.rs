use crate::error::{StagelineError, StagelineResult};
use crate::logger::{self, LogLevel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable names read by [`RunnerConfig::from_env`]
pub mod env_vars {
    pub const ARTIFACT_DIR: &str = "STAGELINE_ARTIFACT_DIR";
    pub const LOG_LEVEL: &str = "STAGELINE_LOG_LEVEL";
    pub const TRACK_PROGRESS: &str = "STAGELINE_TRACK_PROGRESS";
    pub const EVENT_BUFFER: &str = "STAGELINE_EVENT_BUFFER";
}

const DEFAULT_EVENT_BUFFER: usize = 256;

/// Pipeline runner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Where artifacts are persisted
    pub artifact_backend: ArtifactBackendConfig,

    /// Install the progress hook on every stage
    pub track_progress: bool,

    /// Artifact persistence hooks log and continue instead of aborting the run
    pub advisory_artifact_hooks: bool,

    pub log_level: LogLevel,

    /// Capacity of the lifecycle event broadcast channel
    pub event_buffer: usize,
}

/// Artifact persistence backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ArtifactBackendConfig {
    /// Kept in process memory for the lifetime of the sink
    #[default]
    Memory,

    /// One directory per artifact name under `root`
    Filesystem { root: PathBuf },
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            artifact_backend: ArtifactBackendConfig::Memory,
            track_progress: true,
            advisory_artifact_hooks: true,
            log_level: LogLevel::Info,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl RunnerConfig {
    /// Start a builder
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::new()
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> StagelineResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            StagelineError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_slice(&bytes).map_err(|e| {
            StagelineError::ConfigError(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `STAGELINE_*` environment variables
    pub fn from_env() -> StagelineResult<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// File (when given) or defaults, then environment overrides
    pub fn load(path: Option<&Path>) -> StagelineResult<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup
    pub fn with_env_overrides<F>(mut self, lookup: F) -> StagelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(env_vars::ARTIFACT_DIR) {
            self.artifact_backend = ArtifactBackendConfig::Filesystem {
                root: PathBuf::from(dir),
            };
        }

        if let Some(level) = lookup(env_vars::LOG_LEVEL) {
            self.log_level = LogLevel::parse(&level).ok_or_else(|| {
                StagelineError::ConfigError(format!(
                    "{} must be debug, info, warn or error (got {:?})",
                    env_vars::LOG_LEVEL,
                    level
                ))
            })?;
        }

        if let Some(track) = lookup(env_vars::TRACK_PROGRESS) {
            self.track_progress = parse_bool(&track).ok_or_else(|| {
                StagelineError::ConfigError(format!(
                    "{} must be a boolean (got {:?})",
                    env_vars::TRACK_PROGRESS,
                    track
                ))
            })?;
        }

        if let Some(buffer) = lookup(env_vars::EVENT_BUFFER) {
            self.event_buffer = buffer.parse().map_err(|_| {
                StagelineError::ConfigError(format!(
                    "{} must be a positive integer (got {:?})",
                    env_vars::EVENT_BUFFER,
                    buffer
                ))
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Install the tracing subscriber and apply `log_level` to the global logger
    pub fn init_logging(&self) {
        logger::init_tracing(self.log_level);
    }

    fn validate(&self) -> StagelineResult<()> {
        if self.event_buffer == 0 {
            return Err(StagelineError::ConfigError(
                "event_buffer must be greater than zero".to_string(),
            ));
        }
        if let ArtifactBackendConfig::Filesystem { root } = &self.artifact_backend {
            if root.as_os_str().is_empty() {
                return Err(StagelineError::ConfigError(
                    "filesystem artifact backend requires a root directory".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Builder for constructing RunnerConfig instances with a fluent API
///
/// # Example
/// ```
/// use stageline::config::RunnerConfig;
///
/// let config = RunnerConfig::builder()
///     .artifact_dir("/tmp/stageline-artifacts")
///     .track_progress(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Default)]
pub struct RunnerConfigBuilder {
    artifact_backend: Option<ArtifactBackendConfig>,
    track_progress: Option<bool>,
    advisory_artifact_hooks: Option<bool>,
    log_level: Option<LogLevel>,
    event_buffer: Option<usize>,
}

impl RunnerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist artifacts under `root`
    pub fn artifact_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifact_backend = Some(ArtifactBackendConfig::Filesystem { root: root.into() });
        self
    }

    /// Keep artifacts in memory
    pub fn in_memory_artifacts(mut self) -> Self {
        self.artifact_backend = Some(ArtifactBackendConfig::Memory);
        self
    }

    pub fn track_progress(mut self, enabled: bool) -> Self {
        self.track_progress = Some(enabled);
        self
    }

    pub fn advisory_artifact_hooks(mut self, advisory: bool) -> Self {
        self.advisory_artifact_hooks = Some(advisory);
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = Some(capacity);
        self
    }

    /// Build the RunnerConfig instance
    ///
    /// # Errors
    /// Returns `StagelineError::BuilderError` if a value is out of range
    pub fn build(self) -> StagelineResult<RunnerConfig> {
        let defaults = RunnerConfig::default();

        let event_buffer = self.event_buffer.unwrap_or(defaults.event_buffer);
        if event_buffer == 0 {
            return Err(StagelineError::BuilderError(
                "event_buffer must be greater than zero".to_string(),
            ));
        }

        let artifact_backend = self.artifact_backend.unwrap_or(defaults.artifact_backend);
        if let ArtifactBackendConfig::Filesystem { root } = &artifact_backend {
            if root.as_os_str().is_empty() {
                return Err(StagelineError::BuilderError(
                    "artifact_dir must not be empty".to_string(),
                ));
            }
        }

        Ok(RunnerConfig {
            artifact_backend,
            track_progress: self.track_progress.unwrap_or(defaults.track_progress),
            advisory_artifact_hooks: self
                .advisory_artifact_hooks
                .unwrap_or(defaults.advisory_artifact_hooks),
            log_level: self.log_level.unwrap_or(defaults.log_level),
            event_buffer,
        })
    }
}
