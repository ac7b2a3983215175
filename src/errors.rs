// Copyright (c) 2025 - Cowboy AI, Inc.
//! Error types for deployment operations

use thiserror::Error;

use crate::state_machine::TransitionError;

/// Provider error codes that mean "the resource is absent"
const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFoundException",
    "NoSuchBucket",
    "NotFoundException",
    "NoSuchDistribution",
    "DBInstanceNotFound",
    "DBInstanceNotFoundFault",
    "InvalidInstanceID.NotFound",
    "ServiceNotFoundException",
    "ChangeSetNotFound",
    "ChangeSetNotFoundException",
    "NoSuchEntity",
];

const CONFLICT_CODES: &[&str] = &["ResourceConflictException", "ConflictException"];

const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "ServiceUnavailable",
    "InternalError",
    "InternalFailure",
    "ServiceException",
];

/// A single failed remote call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{service}.{operation} failed with {code}: {message}")]
pub struct CloudError {
    /// Service the call was issued against (e.g. `lambda`)
    pub service: String,

    /// Operation name as the provider spells it (e.g. `add_permission`)
    pub operation: String,

    /// Provider error code
    pub code: String,

    /// Provider error message
    pub message: String,

    /// HTTP status, when the transport reports one
    pub status: Option<u16>,
}

impl CloudError {
    /// Create an error without an HTTP status
    pub fn new(
        service: impl Into<String>,
        operation: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Attach the HTTP status reported by the transport
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// The remote resource does not exist
    pub fn is_not_found(&self) -> bool {
        if NOT_FOUND_CODES.contains(&self.code.as_str()) || self.status == Some(404) {
            return true;
        }
        // stacks report absence as a validation failure
        self.code == "ValidationError" && self.message.contains("does not exist")
    }

    /// The resource being created already exists
    pub fn is_conflict(&self) -> bool {
        CONFLICT_CODES.contains(&self.code.as_str()) || self.status == Some(409)
    }

    /// Eligible for bounded retry
    pub fn is_transient(&self) -> bool {
        TRANSIENT_CODES.contains(&self.code.as_str())
            || matches!(self.status, Some(429) | Some(500..=599))
    }

    /// A stack update with nothing to change
    pub fn is_no_updates(&self) -> bool {
        self.code == "ValidationError" && self.message.contains("No updates are to be performed")
    }
}

/// Errors that can occur in deployment operations
#[derive(Debug, Error)]
pub enum DeployError {
    /// Remote call failed
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// Declared configuration is malformed or incomplete
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The function to wire does not exist
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    /// The resource an event source points at does not exist
    #[error("Event source not found: {0}")]
    SourceNotFound(String),

    /// The stack to operate on does not exist
    #[error("Stack not found: {0}")]
    StackNotFound(String),

    /// Cancellation was requested
    #[error("Operation cancelled")]
    Cancelled,

    /// A bounded wait ran out of attempts
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A remote response did not have the expected shape
    #[error("Malformed response from {operation}: {message}")]
    MalformedResponse { operation: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A phase machine rejected its input
    #[error("Phase error: {0}")]
    Transition(#[from] TransitionError),

    /// Logging could not be initialized
    #[error("Logging error: {0}")]
    Logging(String),
}

impl DeployError {
    /// Shorthand for a malformed response error
    pub fn malformed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        DeployError::MalformedResponse {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// True for the cancellation condition
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeployError::Cancelled)
    }

    /// True when the remote resource is absent
    pub fn is_not_found(&self) -> bool {
        match self {
            DeployError::Cloud(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Errors that abort a whole call instead of a single entry
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeployError::Cancelled
                | DeployError::Configuration(_)
                | DeployError::FunctionNotFound(_)
                | DeployError::Transition(_)
                | DeployError::Logging(_)
        )
    }
}

/// Result type for deployment operations
pub type DeployResult<T> = Result<T, DeployError>;

impl From<serde_json::Error> for DeployError {
    fn from(err: serde_json::Error) -> Self {
        DeployError::Serialization(err.to_string())
    }
}
