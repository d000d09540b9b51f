//! Error types for the ingestion and retrieval pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Parse failure: {0}")]
    ParseFailure(String),

    #[error("Extraction failure: {0}")]
    ExtractionFailure(String),

    #[error("Load failure on {sink} (batch {batch}): {reason}")]
    LoadFailure {
        sink: String,
        batch: usize,
        reason: String,
    },

    #[error("Query failure: {0}")]
    QueryFailure(String),

    #[error("Ingestion state unreadable: {0}")]
    StateCorruption(String),

    #[error("Circuit open for {0}")]
    CircuitOpen(String),

    #[error("Ingestion run already in progress: {0}")]
    RunInProgress(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Graph store error: {0}")]
    GraphError(String),

    #[error("MySQL error: {0}")]
    MySqlError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a retry of the same operation can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ConnectionError(_)
                | Error::GraphError(_)
                | Error::MySqlError(_)
                | Error::ExtractionFailure(_)
                | Error::IoError(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}

impl From<neo4rs::Error> for Error {
    fn from(err: neo4rs::Error) -> Self {
        Error::GraphError(err.to_string())
    }
}

impl From<mysql_async::Error> for Error {
    fn from(err: mysql_async::Error) -> Self {
        Error::MySqlError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::ConnectionError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_load_failure() {
        let err = Error::LoadFailure {
            sink: "neo4j".to_string(),
            batch: 3,
            reason: "deadlock".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("neo4j"));
        assert!(msg.contains("batch 3"));
        assert!(msg.contains("deadlock"));
    }

    #[test]
    fn test_error_display_query_failure() {
        let err = Error::QueryFailure("empty query".to_string());
        assert!(err.to_string().contains("Query failure"));
        assert!(err.to_string().contains("empty query"));
    }

    #[test]
    fn test_error_display_circuit_open() {
        let err = Error::CircuitOpen("openai".to_string());
        assert_eq!(err.to_string(), "Circuit open for openai");
    }

    #[test]
    fn test_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();

        assert!(matches!(err, Error::SerializationError(_)));
    }

    #[test]
    fn test_error_from_serde_yaml() {
        let yaml_err = serde_yaml::from_str::<Vec<i32>>("{ not: [a list").unwrap_err();
        let err: Error = yaml_err.into();

        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::ConnectionError("reset".into()).is_transient());
        assert!(Error::GraphError("deadlock".into()).is_transient());
        assert!(!Error::InvalidArgument("bad".into()).is_transient());
        assert!(!Error::CircuitOpen("openai".into()).is_transient());
        assert!(!Error::QueryFailure("empty".into()).is_transient());
    }
}
