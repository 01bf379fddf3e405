/// Failure signal returned by task handlers.
///
/// The dispatcher never retries on its own; the `Retry`/`Fatal` split is
/// metadata attached to the pending residue so an external sweep can decide
/// whether re-submission makes sense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Transient failure; the task is a candidate for re-submission.
    Retry(String),
    /// Permanent failure; re-running the handler would fail again.
    Fatal(String),
}

impl HandlerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Retry(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            HandlerError::Retry(msg) | HandlerError::Fatal(msg) => msg,
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerError::Retry(msg) => write!(f, "retryable handler error: {}", msg),
            HandlerError::Fatal(msg) => write!(f, "fatal handler error: {}", msg),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        if error.is_retryable() {
            HandlerError::Retry(format!("JSON error: {}", error))
        } else {
            HandlerError::Fatal(format!("JSON error: {}", error))
        }
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(error: std::io::Error) -> Self {
        if error.is_retryable() {
            HandlerError::Retry(format!("IO error: {}", error))
        } else {
            HandlerError::Fatal(format!("IO error: {}", error))
        }
    }
}

/// Classifies whether an error is worth retrying when converted into a
/// [`HandlerError`].
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

impl RetryableError for std::io::Error {
    fn is_retryable(&self) -> bool {
        match self.kind() {
            std::io::ErrorKind::TimedOut => true,
            std::io::ErrorKind::Interrupted => true,
            std::io::ErrorKind::WouldBlock => true,
            std::io::ErrorKind::ConnectionRefused => true,
            std::io::ErrorKind::ConnectionAborted => true,
            std::io::ErrorKind::ConnectionReset => true,
            std::io::ErrorKind::PermissionDenied => false,
            std::io::ErrorKind::NotFound => false,
            std::io::ErrorKind::AlreadyExists => false,
            _ => true,
        }
    }
}

impl RetryableError for serde_json::Error {
    fn is_retryable(&self) -> bool {
        // Malformed JSON stays malformed.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_classify_by_kind() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert!(HandlerError::from(timeout).is_retryable());

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(!HandlerError::from(missing).is_retryable());
    }

    #[test]
    fn json_errors_are_fatal() {
        let err = serde_json::from_str::<serde_json::Value>("{broken").unwrap_err();
        let converted = HandlerError::from(err);
        assert!(!converted.is_retryable());
        assert!(converted.reason().starts_with("JSON error"));
    }
}
