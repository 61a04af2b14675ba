use thiserror::Error;

use crate::proto::{ErrorBody, ErrorCode};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    /// The post-restore restart failed. `restore_error` is set when the restore
    /// itself had already failed before the restart was attempted.
    #[error("{}", restart_failure_message(.restore_error.as_deref(), .restart_error))]
    RestartFailed {
        restore_error: Option<String>,
        restart_error: String,
    },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Process(_) => ErrorCode::Process,
            Self::Archive(_) => ErrorCode::Archive,
            Self::Connection(_) => ErrorCode::Connection,
            Self::Persistence(_) => ErrorCode::Persistence,
            Self::RestartFailed { .. } => ErrorCode::RestartFailed,
            Self::Io { .. } => ErrorCode::IoError,
        }
    }
}

fn restart_failure_message(restore_error: Option<&str>, restart_error: &str) -> String {
    match restore_error {
        Some(restore) => {
            format!("restore failed: {restore}; server restart also failed: {restart_error}")
        }
        None => format!("restore succeeded but server restart failed: {restart_error}"),
    }
}

/// Map internal errors -> stable outward errors.
impl From<CoreError> for ErrorBody {
    fn from(e: CoreError) -> Self {
        ErrorBody {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_failure_distinguishes_restore_outcome() {
        let after_success = CoreError::RestartFailed {
            restore_error: None,
            restart_error: "spawn failed".into(),
        };
        assert!(after_success.to_string().starts_with("restore succeeded"));

        let after_failure = CoreError::RestartFailed {
            restore_error: Some("extract failed".into()),
            restart_error: "spawn failed".into(),
        };
        let message = after_failure.to_string();
        assert!(message.contains("restore failed: extract failed"));
        assert!(message.contains("restart also failed: spawn failed"));
    }

    #[test]
    fn error_body_carries_code() {
        let body = ErrorBody::from(CoreError::NotFound("backup x".into()));
        assert_eq!(body.code, ErrorCode::NotFound);
        assert_eq!(body.message, "not found: backup x");
    }
}
