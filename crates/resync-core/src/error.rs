use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResyncError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("processing key={key} failed: {message}")]
    Processing { key: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl ResyncError {
    /// Build a processing failure for `key`.
    ///
    /// Processors use this to report drift they could not fix; the worker
    /// only looks at `Err` vs `Ok`, the message is for logs.
    pub fn processing(key: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::Processing {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ResyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_error_mentions_key() {
        let err = ResyncError::processing("member-42", "role mismatch");
        let msg = err.to_string();
        assert!(msg.contains("member-42"));
        assert!(msg.contains("role mismatch"));
    }
}
