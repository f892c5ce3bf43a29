//! Error types for imageinf

/// Result type alias using imageinf's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for imageinf operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Requested model id is not in the registry
    #[error("Model '{0}' is not supported.")]
    UnknownModel(String),

    /// Remote retrieval or cache errors for a single file
    #[error("retrieval error for {system_id}/{path}: {message}")]
    Retrieval {
        system_id: String,
        path: String,
        message: String,
    },

    /// A file failed somewhere in the per-file pipeline
    #[error("Failed to process {path}: {message}")]
    Processing { path: String, message: String },

    /// Classifier construction or execution errors
    #[error("classifier error: {0}")]
    Classifier(String),

    /// Image decoding errors
    #[error("image error: {0}")]
    Image(String),

    /// Malformed caller input that is not tied to a specific file
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Synchronous request exceeded the file cap
    #[error("Too many files ({count}). Use async endpoint for >{max}.")]
    TooManyFiles { count: usize, max: usize },

    /// No job with this id exists in the result store
    #[error("job '{0}' not found")]
    JobNotFound(String),

    /// The job queue has no room for another submission
    #[error("job queue is full ({capacity} jobs waiting), retry later")]
    QueueFull { capacity: usize },

    /// A job state change that the lifecycle does not allow
    #[error("invalid job transition for '{job_id}': {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timeout errors
    #[error("operation timed out")]
    Timeout,

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new retrieval error
    pub fn retrieval(
        system_id: impl Into<String>,
        path: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Retrieval {
            system_id: system_id.into(),
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Wrap any failure with the path of the file being processed
    pub fn processing(path: impl Into<String>, cause: &Error) -> Self {
        Self::Processing {
            path: path.into(),
            message: cause.to_string(),
        }
    }

    /// Create a new classifier error
    pub fn classifier(msg: impl Into<String>) -> Self {
        Self::Classifier(msg.into())
    }

    /// Create a new image error
    pub fn image(msg: impl Into<String>) -> Self {
        Self::Image(msg.into())
    }

    /// Create a new invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Errors the caller can fix by changing the request
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownModel(_) | Self::TooManyFiles { .. } | Self::InvalidRequest(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_message() {
        let err = Error::UnknownModel("nope/model".to_string());
        assert_eq!(err.to_string(), "Model 'nope/model' is not supported.");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_processing_wraps_cause_with_path() {
        let cause = Error::retrieval("sys", "/a/b.jpg", "not found");
        let err = Error::processing("/a/b.jpg", &cause);
        let msg = err.to_string();
        assert!(msg.starts_with("Failed to process /a/b.jpg: "));
        assert!(msg.contains("not found"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_timeout_is_not_client_error() {
        assert!(!Error::Timeout.is_client_error());
        assert!(Error::TooManyFiles { count: 6, max: 5 }.is_client_error());
    }

    #[test]
    fn test_queue_full_message() {
        let err = Error::QueueFull { capacity: 4 };
        assert_eq!(err.to_string(), "job queue is full (4 jobs waiting), retry later");
        assert!(!err.is_client_error());
    }
}
