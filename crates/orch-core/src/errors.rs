//! Structured error types shared across orch crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`OrchError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (paths, sizes, counts, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Identifier of the entity the failure belongs to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Rendered downstream cause, when the failure wraps another error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
            entity_id: None,
            cause: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Records the offending entity identifier.
    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Records the downstream cause.
    pub fn with_cause(mut self, cause: impl Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if let Some(entity) = &self.entity_id {
            write!(f, " | entity: {entity}")?;
        }
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, " | caused by: {cause}")?;
        }
        Ok(())
    }
}

/// Discriminant of an [`OrchError`], usable without matching on payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Two assets share a path but not their content.
    DuplicateAssetConflict,
    /// Common assets gathered from several tasks disagree.
    ConflictingCommonAsset,
    /// Mutation attempted on a persisted collection.
    FrozenCollection,
    /// Backend refused to create an entity.
    BackendCreateFailure,
    /// Some entities of a batch were not created.
    BackendBatchPartialFailure,
    /// Requested file does not exist on the backend.
    AssetNotFound,
    /// Requested entity does not exist on the backend.
    NotFound,
    /// Waiting for completion exceeded the deadline.
    WaitTimeout,
    /// Cooperative cancellation was requested.
    CancelRequested,
    /// A user hook failed.
    HookError,
    /// Retryable backend or network failure.
    BackendNetworkTransient,
    /// Operation not implemented by the backend.
    Unsupported,
    /// Caller supplied invalid input.
    Invalid,
    /// Local filesystem failure.
    Io,
    /// Encoding or decoding failure.
    Serde,
}

/// Canonical error type for the orchestration core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", content = "detail")]
pub enum OrchError {
    /// Conflicting content at an identical asset path.
    #[error("duplicate asset conflict: {0}")]
    DuplicateAsset(ErrorInfo),
    /// Conflicting common assets across sibling tasks.
    #[error("conflicting common asset: {0}")]
    ConflictingCommonAsset(ErrorInfo),
    /// Mutation of a frozen asset collection.
    #[error("frozen collection: {0}")]
    FrozenCollection(ErrorInfo),
    /// Entity creation failed on the backend.
    #[error("backend create failure: {0}")]
    BackendCreate(ErrorInfo),
    /// Batch creation partially failed.
    #[error("backend batch partial failure: {0}")]
    BatchPartial(ErrorInfo),
    /// Requested file missing on the backend.
    #[error("asset not found: {0}")]
    AssetNotFound(ErrorInfo),
    /// Requested entity missing on the backend.
    #[error("not found: {0}")]
    NotFound(ErrorInfo),
    /// Wait deadline exceeded.
    #[error("wait timeout: {0}")]
    WaitTimeout(ErrorInfo),
    /// Cooperative cancellation observed.
    #[error("cancel requested: {0}")]
    Cancelled(ErrorInfo),
    /// User supplied hook failed.
    #[error("hook error: {0}")]
    Hook(ErrorInfo),
    /// Retryable backend failure.
    #[error("transient backend error: {0}")]
    Transient(ErrorInfo),
    /// Operation not supported by the backend.
    #[error("unsupported operation: {0}")]
    Unsupported(ErrorInfo),
    /// Invalid caller input.
    #[error("invalid input: {0}")]
    Invalid(ErrorInfo),
    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(ErrorInfo),
    /// Serialization failure.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl OrchError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            OrchError::DuplicateAsset(info)
            | OrchError::ConflictingCommonAsset(info)
            | OrchError::FrozenCollection(info)
            | OrchError::BackendCreate(info)
            | OrchError::BatchPartial(info)
            | OrchError::AssetNotFound(info)
            | OrchError::NotFound(info)
            | OrchError::WaitTimeout(info)
            | OrchError::Cancelled(info)
            | OrchError::Hook(info)
            | OrchError::Transient(info)
            | OrchError::Unsupported(info)
            | OrchError::Invalid(info)
            | OrchError::Io(info)
            | OrchError::Serde(info) => info,
        }
    }

    /// Mutable access to the payload, used to enrich errors while propagating.
    pub fn info_mut(&mut self) -> &mut ErrorInfo {
        match self {
            OrchError::DuplicateAsset(info)
            | OrchError::ConflictingCommonAsset(info)
            | OrchError::FrozenCollection(info)
            | OrchError::BackendCreate(info)
            | OrchError::BatchPartial(info)
            | OrchError::AssetNotFound(info)
            | OrchError::NotFound(info)
            | OrchError::WaitTimeout(info)
            | OrchError::Cancelled(info)
            | OrchError::Hook(info)
            | OrchError::Transient(info)
            | OrchError::Unsupported(info)
            | OrchError::Invalid(info)
            | OrchError::Io(info)
            | OrchError::Serde(info) => info,
        }
    }

    /// Returns the kind discriminant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchError::DuplicateAsset(_) => ErrorKind::DuplicateAssetConflict,
            OrchError::ConflictingCommonAsset(_) => ErrorKind::ConflictingCommonAsset,
            OrchError::FrozenCollection(_) => ErrorKind::FrozenCollection,
            OrchError::BackendCreate(_) => ErrorKind::BackendCreateFailure,
            OrchError::BatchPartial(_) => ErrorKind::BackendBatchPartialFailure,
            OrchError::AssetNotFound(_) => ErrorKind::AssetNotFound,
            OrchError::NotFound(_) => ErrorKind::NotFound,
            OrchError::WaitTimeout(_) => ErrorKind::WaitTimeout,
            OrchError::Cancelled(_) => ErrorKind::CancelRequested,
            OrchError::Hook(_) => ErrorKind::HookError,
            OrchError::Transient(_) => ErrorKind::BackendNetworkTransient,
            OrchError::Unsupported(_) => ErrorKind::Unsupported,
            OrchError::Invalid(_) => ErrorKind::Invalid,
            OrchError::Io(_) => ErrorKind::Io,
            OrchError::Serde(_) => ErrorKind::Serde,
        }
    }

    /// True when retrying the failed call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, OrchError::Transient(_))
    }

    /// Turns a transient failure whose retries ran out into a
    /// `BackendCreate` error carrying the transient one as its cause. Other
    /// errors are returned unchanged.
    pub fn into_create_failure(self) -> Self {
        match self {
            OrchError::Transient(info) => {
                let mut failure = ErrorInfo::new("backend.retries_exhausted", "creation failed after transient errors")
                    .with_cause(&info);
                failure.context = info.context;
                failure.entity_id = info.entity_id;
                OrchError::BackendCreate(failure)
            }
            other => other,
        }
    }

    /// Attaches an entity identifier unless one is already recorded.
    pub fn for_entity(mut self, entity_id: impl Into<String>) -> Self {
        let info = self.info_mut();
        if info.entity_id.is_none() {
            info.entity_id = Some(entity_id.into());
        }
        self
    }
}

/// Wraps a filesystem error with a stable code and the offending path.
pub fn io_error(code: &str, path: impl Display, err: impl Display) -> OrchError {
    OrchError::Io(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.to_string()),
    )
}

/// Wraps an encoding error with a stable code.
pub fn serde_error(code: &str, err: impl ToString) -> OrchError {
    OrchError::Serde(ErrorInfo::new(code, err.to_string()))
}

/// Builds an [`OrchError::Invalid`] from a code and message.
pub fn invalid(code: &str, message: impl Into<String>) -> OrchError {
    OrchError::Invalid(ErrorInfo::new(code, message))
}
