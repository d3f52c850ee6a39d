use thiserror::Error;

/// Central error type for stageline
#[derive(Error, Debug)]
pub enum StagelineError {
    // ============================================================================
    // Pipeline Errors
    // ============================================================================
    #[error("Stage '{stage}' is missing required input keys: {}", missing.join(", "))]
    Configuration { stage: String, missing: Vec<String> },

    #[error("Stage '{stage}' cannot write key '{key}': already written by '{written_by}'")]
    KeyConflict {
        key: String,
        stage: String,
        written_by: String,
    },

    #[error("Stage '{stage}' failed: {source}")]
    StageExecution {
        stage: String,
        #[source]
        source: Box<StagelineError>,
    },

    #[error("Hook '{hook}' failed on stage '{stage}': {source}")]
    Hook {
        stage: String,
        hook: String,
        #[source]
        source: Box<StagelineError>,
    },

    #[error("Pipeline has no stages")]
    EmptyPipeline,

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    // ============================================================================
    // Lookup Errors
    // ============================================================================
    #[error("State key not found: {0}")]
    KeyNotFound(String),

    #[error("State key '{key}' is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("Artifact not found: {name} (version: {})", version.map(|v| v.to_string()).unwrap_or_else(|| "latest".to_string()))]
    ArtifactNotFound { name: String, version: Option<u32> },

    // ============================================================================
    // Storage Errors
    // ============================================================================
    #[error("Failed to save to storage: {0}")]
    StorageSaveFailed(String),

    /// The backend already holds this version; the caller should allocate another
    #[error("Artifact {name} v{version} already exists")]
    VersionExists { name: String, version: u32 },

    #[error("Failed to load from storage: {0}")]
    StorageLoadFailed(String),

    #[error("Integrity check failed for {name} v{version}: expected {expected}, got {actual}")]
    IntegrityCheckFailed {
        name: String,
        version: u32,
        expected: String,
        actual: String,
    },

    // ============================================================================
    // Stage Implementation Errors
    // ============================================================================
    #[error("External call failed: {0}")]
    External(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Template error: {0}")]
    Template(String),

    // ============================================================================
    // Generic/System Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Mutex lock error")]
    LockError,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    GenericError(String),

    /// Builder pattern validation error
    #[error("Builder error: {0}")]
    BuilderError(String),
}

impl StagelineError {
    /// Name of the stage a fatal pipeline error is attributed to
    pub fn failed_stage(&self) -> Option<&str> {
        match self {
            Self::Configuration { stage, .. }
            | Self::KeyConflict { stage, .. }
            | Self::StageExecution { stage, .. }
            | Self::Hook { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Whether this error aborts a pipeline run
    pub fn is_fatal(&self) -> bool {
        self.failed_stage().is_some() || matches!(self, Self::EmptyPipeline)
    }
}

// Implement conversion from PoisonError for Mutex/RwLock guards
impl<T> From<std::sync::PoisonError<T>> for StagelineError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StagelineError::LockError
    }
}

impl From<handlebars::RenderError> for StagelineError {
    fn from(err: handlebars::RenderError) -> Self {
        StagelineError::Template(err.to_string())
    }
}

impl From<handlebars::TemplateError> for StagelineError {
    fn from(err: handlebars::TemplateError) -> Self {
        StagelineError::Template(err.to_string())
    }
}

impl From<String> for StagelineError {
    fn from(err: String) -> Self {
        StagelineError::GenericError(err)
    }
}

impl From<&str> for StagelineError {
    fn from(err: &str) -> Self {
        StagelineError::GenericError(err.to_string())
    }
}

// Helper type alias for Results
pub type StagelineResult<T> = Result<T, StagelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let err = StagelineError::Configuration {
            stage: "fetch".to_string(),
            missing: vec!["id".to_string(), "region".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Stage 'fetch' is missing required input keys: id, region"
        );
        assert_eq!(err.failed_stage(), Some("fetch"));
    }

    #[test]
    fn test_stage_execution_wraps_cause() {
        let err = StagelineError::StageExecution {
            stage: "analyze".to_string(),
            source: Box::new(StagelineError::External("quota exceeded".to_string())),
        };
        assert!(err.to_string().contains("analyze"));
        assert!(err.to_string().contains("quota exceeded"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_artifact_not_found_display() {
        let latest = StagelineError::ArtifactNotFound {
            name: "report.html".to_string(),
            version: None,
        };
        assert_eq!(latest.to_string(), "Artifact not found: report.html (version: latest)");

        let pinned = StagelineError::ArtifactNotFound {
            name: "report.html".to_string(),
            version: Some(3),
        };
        assert!(pinned.to_string().ends_with("(version: 3)"));
    }

    #[test]
    fn test_lookup_errors_are_not_fatal() {
        let err = StagelineError::KeyNotFound("summary".to_string());
        assert!(!err.is_fatal());
        assert!(err.failed_stage().is_none());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StagelineError = io_err.into();
        assert!(matches!(err, StagelineError::Io(_)));
    }
}
