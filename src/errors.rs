use thiserror::Error;

/// Errors raised by the analysis core.
///
/// Variants follow the failure families callers need to tell apart:
/// configuration mistakes are fatal and never retried, backend failures fail a
/// single job, lookup errors signal caller misuse, and storage errors come from
/// the distribution cache or the statistics source.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Unknown backend kind, missing executable, or an out-of-range parameter
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Engine process could not be started or did not complete its handshake
    #[error("Backend launch error: {0}")]
    BackendLaunch(String),

    /// Engine crashed or produced output that could not be understood
    #[error("Backend protocol error: {0}")]
    BackendProtocol(String),

    /// Job id was never issued, was already retrieved, or is stale
    #[error("Job '{0}' not found or already retrieved")]
    JobNotFound(String),

    /// Opening corpus has no continuation for the requested position
    #[error("Position '{0}' not found in corpus")]
    PositionNotInCorpus(String),

    /// Move sequence rejected by the rules library
    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    /// Statistics source could not produce a move distribution
    #[error("Statistics source error: {0}")]
    Statistics(String),

    /// Cache or game database failure
    #[error("Database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Work was submitted after the worker pool stopped accepting jobs
    #[error("Worker pool has been shut down")]
    PoolShutdown,

    /// Job body panicked inside a worker thread
    #[error("Worker panicked while running job: {0}")]
    WorkerPanicked(String),
}

// Convenience type alias
pub type Result<T> = std::result::Result<T, AnalysisError>;

impl From<std::io::Error> for AnalysisError {
    fn from(error: std::io::Error) -> Self {
        AnalysisError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(error: serde_json::Error) -> Self {
        AnalysisError::Serialization(format!("JSON: {}", error))
    }
}

impl From<bincode::Error> for AnalysisError {
    fn from(error: bincode::Error) -> Self {
        AnalysisError::Serialization(format!("bincode: {}", error))
    }
}

impl From<rusqlite::Error> for AnalysisError {
    fn from(error: rusqlite::Error) -> Self {
        AnalysisError::Database(error.to_string())
    }
}

impl AnalysisError {
    /// Configuration errors are never worth retrying with the same input.
    pub fn is_configuration(&self) -> bool {
        matches!(self, AnalysisError::Configuration(_))
    }

    /// True for failures that originate in an engine process.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            AnalysisError::BackendLaunch(_)
                | AnalysisError::BackendProtocol(_)
                | AnalysisError::WorkerPanicked(_)
        )
    }
}

// Helper macros for error creation
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::errors::AnalysisError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::errors::AnalysisError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! backend_error {
    ($msg:expr) => {
        $crate::errors::AnalysisError::BackendProtocol($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::errors::AnalysisError::BackendProtocol(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AnalysisError::JobNotFound("stockfish:1:e2e4#3".to_string());
        assert_eq!(
            error.to_string(),
            "Job 'stockfish:1:e2e4#3' not found or already retrieved"
        );
    }

    #[test]
    fn test_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "book missing");
        let error: AnalysisError = io_error.into();

        match error {
            AnalysisError::Io(msg) => assert!(msg.contains("book missing")),
            _ => panic!("Expected Io"),
        }
    }

    #[test]
    fn test_error_macros() {
        let error = config_error!("unknown backend kind: {}", "komodo");
        assert!(error.is_configuration());
        assert!(error.to_string().contains("komodo"));

        let error = backend_error!("engine exited before bestmove");
        assert!(error.is_backend_failure());
        assert!(!error.is_configuration());
    }
}
