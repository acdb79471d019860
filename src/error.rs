use thiserror::Error;

pub type Result<T> = std::result::Result<T, BenchError>;

/// Errors raised while configuring, building, or driving a generation engine
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("Configuration error for {parameter}: {message}")]
    ConfigurationError {
        parameter: String,
        message: String,
    },

    #[error("Model error: {message}")]
    ModelError {
        message: String,
    },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Processing error: {message}")]
    ProcessingError {
        message: String,
    },

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BenchError {
    pub(crate) fn config(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        BenchError::ConfigurationError {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    pub(crate) fn model(message: impl Into<String>) -> Self {
        BenchError::ModelError {
            message: message.into(),
        }
    }

    pub(crate) fn processing(message: impl Into<String>) -> Self {
        BenchError::ProcessingError {
            message: message.into(),
        }
    }

    /// Name of the offending parameter for configuration errors
    pub fn parameter(&self) -> Option<&str> {
        match self {
            BenchError::ConfigurationError { parameter, .. } => Some(parameter),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = BenchError::config("batch_size", "must be at least 1");
        assert_eq!(error.to_string(), "Configuration error for batch_size: must be at least 1");
        assert_eq!(error.parameter(), Some("batch_size"));

        let error = BenchError::Unsupported("awq quantization".to_string());
        assert_eq!(error.to_string(), "Unsupported: awq quantization");
        assert_eq!(error.parameter(), None);
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "config.json");
        let error: BenchError = io.into();
        assert!(matches!(error, BenchError::Io(_)));
        assert_eq!(error.to_string(), "config.json");
    }
}
