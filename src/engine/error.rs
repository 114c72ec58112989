use std::error::Error;
use std::fmt::{Display, Formatter};

use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MagnetarErrorCode {
    /// Malformed module path, or a path whose parity disagrees with the handle type.
    InvalidPath,
    /// A store plugin rejected an action.
    StoreAction,
    /// Restoring a backup after a failed action failed itself.
    Revert,
    InvalidArgument,
    NotFound,
    Internal,
}

impl MagnetarErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MagnetarErrorCode::InvalidPath => "magnetar/invalid-path",
            MagnetarErrorCode::StoreAction => "magnetar/store-action",
            MagnetarErrorCode::Revert => "magnetar/revert",
            MagnetarErrorCode::InvalidArgument => "magnetar/invalid-argument",
            MagnetarErrorCode::NotFound => "magnetar/not-found",
            MagnetarErrorCode::Internal => "magnetar/internal",
        }
    }
}

#[derive(Clone, Debug)]
pub struct MagnetarError {
    pub code: MagnetarErrorCode,
    message: String,
    store_name: Option<String>,
    payload: Option<Value>,
}

impl MagnetarError {
    pub fn new(code: MagnetarErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            store_name: None,
            payload: None,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The store whose action (or revert) produced this error, if any.
    pub fn store_name(&self) -> Option<&str> {
        self.store_name.as_deref()
    }

    /// The action payload that was being processed when the error occurred.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn with_store(mut self, store_name: impl Into<String>) -> Self {
        self.store_name = Some(store_name.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

impl Display for MagnetarError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.store_name {
            Some(store) => write!(f, "[{store}] {} ({})", self.message, self.code_str()),
            None => write!(f, "{} ({})", self.message, self.code_str()),
        }
    }
}

impl Error for MagnetarError {}

impl From<serde_json::Error> for MagnetarError {
    fn from(err: serde_json::Error) -> Self {
        internal_error(format!("serialization failed: {err}"))
    }
}

pub type MagnetarResult<T> = Result<T, MagnetarError>;

pub fn invalid_path(message: impl Into<String>) -> MagnetarError {
    MagnetarError::new(MagnetarErrorCode::InvalidPath, message)
}

pub fn store_action(store_name: &str, message: impl Into<String>) -> MagnetarError {
    MagnetarError::new(MagnetarErrorCode::StoreAction, message).with_store(store_name)
}

pub fn revert_error(store_name: &str, message: impl Into<String>) -> MagnetarError {
    MagnetarError::new(MagnetarErrorCode::Revert, message).with_store(store_name)
}

pub fn invalid_argument(message: impl Into<String>) -> MagnetarError {
    MagnetarError::new(MagnetarErrorCode::InvalidArgument, message)
}

pub fn not_found(message: impl Into<String>) -> MagnetarError {
    MagnetarError::new(MagnetarErrorCode::NotFound, message)
}

pub fn internal_error(message: impl Into<String>) -> MagnetarError {
    MagnetarError::new(MagnetarErrorCode::Internal, message)
}
