use serde::{Deserialize, Serialize};

/// Stable error shape handed to outer layers (CLI output, a REST adapter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Process,
    Archive,
    Connection,
    Persistence,
    RestartFailed,
    IoError,
}
