use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::executor::RequestError;
use crate::poller::PollError;

/// Configuration decode failures. Fatal for the one source being decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("source name cannot be empty")]
    EmptyName,
    #[error("source '{source_name}': document must be a mapping")]
    NotAMapping { source_name: String },
    #[error("source '{source_name}': missing required field 'kind'")]
    MissingKind { source_name: String },
    #[error("source '{source_name}': unknown kind '{kind}'")]
    UnknownKind { source_name: String, kind: String },
    #[error("source '{source_name}': decoder for '{expected}' produced kind '{actual}'")]
    KindMismatch {
        source_name: String,
        expected: String,
        actual: String,
    },
    #[error("source '{source_name}': missing required field '{field}'")]
    MissingField { source_name: String, field: String },
    #[error("source '{source_name}': invalid field '{field}': {reason}")]
    InvalidField {
        source_name: String,
        field: String,
        reason: String,
    },
    #[error("source '{source_name}': {message}")]
    Invalid {
        source_name: String,
        message: String,
    },
    #[error("source '{source_name}': environment variable '{variable}' is not set")]
    UnsetVariable {
        source_name: String,
        variable: String,
    },
    #[error("sources file is not valid yaml: {0}")]
    Yaml(String),
    #[error("failed to read sources file '{path}': {message}")]
    Io { path: String, message: String },
}

impl DecodeError {
    /// Name of the source the error belongs to, if it is source-scoped.
    pub fn source_name(&self) -> Option<&str> {
        match self {
            Self::NotAMapping { source_name }
            | Self::MissingKind { source_name }
            | Self::UnknownKind { source_name, .. }
            | Self::KindMismatch { source_name, .. }
            | Self::MissingField { source_name, .. }
            | Self::InvalidField { source_name, .. }
            | Self::Invalid { source_name, .. }
            | Self::UnsetVariable { source_name, .. } => Some(source_name),
            Self::EmptyName | Self::Yaml(_) | Self::Io { .. } => None,
        }
    }
}

/// Registry invariant violations. These are programming errors raised at bootstrap.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("source kind '{kind}' is already registered")]
    DuplicateKind { kind: String },
    #[error("source kind cannot be empty")]
    EmptyKind,
}

/// Source-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceErrorKind {
    /// The verification call failed during construction.
    Connection,
    /// A request got a non-retryable failure or an unusable response.
    Request,
    /// The backend reported an explicit job failure.
    RemoteJob,
    /// A poll or retry ceiling was reached; the same call may succeed later.
    BudgetExhausted,
    /// The caller withdrew interest.
    Cancelled,
    /// The caller supplied an unusable argument.
    InvalidRequest,
    /// The source was closed before the call.
    Closed,
    Internal,
}

/// Structured source error carrying enough context to diagnose the failure
/// without re-entering the failing component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    source_name: String,
    source_kind: String,
    operation: &'static str,
    message: String,
    retryable: bool,
}

impl SourceError {
    fn new(
        kind: SourceErrorKind,
        source_name: impl Into<String>,
        source_kind: impl Into<String>,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        let retryable = matches!(
            kind,
            SourceErrorKind::Connection | SourceErrorKind::Request | SourceErrorKind::BudgetExhausted
        );
        Self {
            kind,
            source_name: source_name.into(),
            source_kind: source_kind.into(),
            operation,
            message: message.into(),
            retryable,
        }
    }

    pub fn connection(
        source_name: impl Into<String>,
        source_kind: impl Into<String>,
        cause: impl Display,
    ) -> Self {
        Self::new(
            SourceErrorKind::Connection,
            source_name,
            source_kind,
            "verify",
            format!("unable to connect: {cause}"),
        )
    }

    pub fn invalid_request(
        source_name: impl Into<String>,
        source_kind: impl Into<String>,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            SourceErrorKind::InvalidRequest,
            source_name,
            source_kind,
            operation,
            message,
        )
    }

    pub fn internal(
        source_name: impl Into<String>,
        source_kind: impl Into<String>,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            SourceErrorKind::Internal,
            source_name,
            source_kind,
            operation,
            message,
        )
    }

    /// Wraps an executor failure, keeping cancellation distinct.
    pub fn from_request(
        source_name: impl Into<String>,
        source_kind: impl Into<String>,
        operation: &'static str,
        error: RequestError,
    ) -> Self {
        let kind = match &error {
            RequestError::Cancelled { .. } => SourceErrorKind::Cancelled,
            RequestError::Closed => SourceErrorKind::Closed,
            RequestError::Exhausted { .. } => SourceErrorKind::BudgetExhausted,
            RequestError::Transport(_)
            | RequestError::Status { .. }
            | RequestError::Decode(_) => SourceErrorKind::Request,
        };
        Self::new(kind, source_name, source_kind, operation, error.to_string())
    }

    /// Wraps a poll failure; fetch errors are already source errors.
    pub fn from_poll(
        source_name: impl Into<String>,
        source_kind: impl Into<String>,
        operation: &'static str,
        error: PollError<SourceError>,
    ) -> Self {
        let kind = match &error {
            PollError::Fetch(inner) => return inner.clone(),
            PollError::Failed { .. } => SourceErrorKind::RemoteJob,
            PollError::Exhausted { .. } => SourceErrorKind::BudgetExhausted,
            PollError::Cancelled { .. } => SourceErrorKind::Cancelled,
        };
        Self::new(kind, source_name, source_kind, operation, error.to_string())
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn source_kind(&self) -> &str {
        &self.source_kind
    }

    pub const fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, SourceErrorKind::Cancelled)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Connection => "source.connection",
            SourceErrorKind::Request => "source.request",
            SourceErrorKind::RemoteJob => "source.remote_job",
            SourceErrorKind::BudgetExhausted => "source.budget_exhausted",
            SourceErrorKind::Cancelled => "source.cancelled",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::Closed => "source.closed",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "source '{}' ({}) {}: {} ({})",
            self.source_name,
            self.source_kind,
            self.operation,
            self.message,
            self.code()
        )
    }
}

impl std::error::Error for SourceError {}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
