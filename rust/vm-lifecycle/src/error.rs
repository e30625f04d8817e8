use thiserror::Error;

use crate::client::codes;
use crate::types::{ObjectClass, OpaqueRef};

/// Core error type for VM lifecycle operations
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Policy rejections, raised before any mutating call
    #[error("Operation '{operation}' is blocked on VM {reference}")]
    PermissionDenied {
        reference: OpaqueRef,
        operation: String,
    },

    #[error("VM {reference} is a default template")]
    ProtectedTemplate { reference: OpaqueRef },

    /// The object was destroyed or never existed in this session
    #[error("{class} {reference} no longer exists")]
    RecordNotFound {
        class: ObjectClass,
        reference: OpaqueRef,
    },

    /// Failure reported by the hypervisor control plane
    #[error("XAPI error {code}: {params:?}")]
    Api { code: String, params: Vec<String> },

    #[error("VDI {reference} still attached to other VMs after {attempts} checks")]
    DiskInUse { reference: OpaqueRef, attempts: u32 },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Network/HTTP errors
    #[error("Network request failed: {0}")]
    NetworkError(String),

    #[error("HTTP error {status}: {message}")]
    HttpError { status: u16, message: String },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;

impl From<serde_json::Error> for LifecycleError {
    fn from(err: serde_json::Error) -> Self {
        LifecycleError::InvalidRecord(err.to_string())
    }
}

impl From<reqwest::Error> for LifecycleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            LifecycleError::NetworkError(format!("Connection failed: {err}"))
        } else if let Some(status) = err.status() {
            LifecycleError::HttpError {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            LifecycleError::NetworkError(err.to_string())
        }
    }
}

impl From<::config::ConfigError> for LifecycleError {
    fn from(err: ::config::ConfigError) -> Self {
        LifecycleError::ConfigurationError(err.to_string())
    }
}

impl LifecycleError {
    /// Build an API error from a code and its parameters
    pub fn api(code: impl Into<String>, params: impl IntoIterator<Item = impl Into<String>>) -> Self {
        LifecycleError::Api {
            code: code.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// XAPI error code carried by this error, if it came from the control plane
    pub fn code(&self) -> Option<&str> {
        match self {
            LifecycleError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_code(&self, expected: &str) -> bool {
        self.code() == Some(expected)
    }

    pub(crate) fn is_handle_invalid(&self) -> bool {
        self.is_code(codes::HANDLE_INVALID)
    }
}
