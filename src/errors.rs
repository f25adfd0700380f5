use {
    crate::{codec::mp4::Mp4Error, error::TransportError, session::SessionId},
    axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    },
    serde::Serialize,
    thiserror::Error,
};

/// Errors surfaced to API callers.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("File too large: {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Stream key must not be empty")]
    EmptyStreamKey,

    #[error("Stream key is already live on {destination}")]
    DuplicateStreamKey { destination: String },

    #[error("Session capacity of {limit} reached")]
    CapacityExceeded { limit: usize },

    #[error("Pipeline failed to start: {message}")]
    PipelineStartFailed { message: String },

    #[error("Transient transport error: {source}")]
    TransientTransportError { source: TransportError },

    #[error("Fatal transport error: {message}")]
    FatalTransportError { message: String },

    #[error("Session {id} is still active")]
    SessionStillActive { id: SessionId },

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Cannot {action} a session in state {state}")]
    InvalidTransition { state: String, action: &'static str },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Storage error: {source}")]
    StorageError {
        #[from]
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl From<config::ConfigError> for RelayError {
    fn from(err: config::ConfigError) -> Self {
        RelayError::ConfigError {
            message: err.to_string(),
        }
    }
}

impl From<Mp4Error> for RelayError {
    fn from(err: Mp4Error) -> Self {
        match err {
            Mp4Error::Io(source) => RelayError::StorageError { source },
            err => RelayError::InvalidFormat {
                message: err.to_string(),
            },
        }
    }
}

impl From<TransportError> for RelayError {
    fn from(err: TransportError) -> Self {
        if err.is_transient() {
            RelayError::TransientTransportError { source: err }
        } else {
            RelayError::FatalTransportError {
                message: err.to_string(),
            }
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for RelayError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        RelayError::InvalidRequest {
            message: err.body_text(),
        }
    }
}

impl RelayError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RelayError::InvalidFormat { .. } => "INVALID_FORMAT",
            RelayError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            RelayError::EmptyStreamKey => "EMPTY_STREAM_KEY",
            RelayError::DuplicateStreamKey { .. } => "DUPLICATE_STREAM_KEY",
            RelayError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            RelayError::PipelineStartFailed { .. } => "PIPELINE_START_FAILED",
            RelayError::TransientTransportError { .. } => "TRANSIENT_TRANSPORT_ERROR",
            RelayError::FatalTransportError { .. } => "FATAL_TRANSPORT_ERROR",
            RelayError::SessionStillActive { .. } => "SESSION_STILL_ACTIVE",
            RelayError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            RelayError::InvalidTransition { .. } => "INVALID_TRANSITION",
            RelayError::InvalidRequest { .. } => "INVALID_REQUEST",
            RelayError::StorageError { .. } => "STORAGE_ERROR",
            RelayError::ConfigError { .. } => "CONFIG_ERROR",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            RelayError::InvalidFormat { .. }
            | RelayError::FileTooLarge { .. }
            | RelayError::EmptyStreamKey
            | RelayError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            RelayError::DuplicateStreamKey { .. }
            | RelayError::SessionStillActive { .. }
            | RelayError::InvalidTransition { .. } => StatusCode::CONFLICT,
            RelayError::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            RelayError::PipelineStartFailed { .. }
            | RelayError::TransientTransportError { .. }
            | RelayError::FatalTransportError { .. } => StatusCode::BAD_GATEWAY,
            RelayError::StorageError { .. } | RelayError::ConfigError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::TransientTransportError { .. } | RelayError::CapacityExceeded { .. }
        )
    }

    pub fn should_log_error(&self) -> bool {
        matches!(
            self,
            RelayError::PipelineStartFailed { .. }
                | RelayError::FatalTransportError { .. }
                | RelayError::StorageError { .. }
                | RelayError::ConfigError { .. }
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn from_error(error: &RelayError) -> Self {
        Self {
            error: "RelayError".to_string(),
            code: error.error_code().to_string(),
            message: error.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        if self.should_log_error() {
            log::error!("Relay error: {}", self);
        } else {
            log::warn!("Client error: {}", self);
        }

        let mut response = (self.http_status(), Json(ErrorResponse::from_error(&self))).into_response();
        if self.is_retryable() {
            if let Ok(value) = "5".parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
