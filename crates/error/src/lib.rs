//! Stable error taxonomy for the Loomflow engine.
//!
//! Every error that can reach a caller is one of the named types below.
//! Each maps to exactly one [`ErrorCode`], the stable identifier carried in
//! `node-error`/`flow-error` stream events and in the `code` field of
//! engine-facing errors. Message text is for humans; the code is the
//! contract other systems are allowed to match on.

use std::fmt;

use loomflow_core::NodeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable identifier for an error's origin, independent of message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Duplicate or invalid tool registration.
    Registration,
    /// Lookup of an unregistered tool or join.
    ToolNotFound,
    /// Schema decode of tool input/output, or resume input, failed.
    Validation,
    /// IR build/validation failed.
    Compilation,
    /// Tool runtime or expression evaluation failed.
    Execution,
    /// A node's configured timeout elapsed.
    Timeout,
    /// The caller cancelled the flow.
    Cancelled,
    /// A loop's safety ceiling was exceeded.
    LoopLimit,
    /// Persistence backend failure or envelope corruption.
    Persistence,
    /// Encryption key missing or decrypt failed.
    Encryption,
    /// A suspension key was malformed or failed validation.
    Key,
}

impl ErrorCode {
    /// The wire-stable string form, as it appears in stream events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "REGISTRATION",
            Self::ToolNotFound => "TOOL_NOT_FOUND",
            Self::Validation => "VALIDATION",
            Self::Compilation => "COMPILATION",
            Self::Execution => "EXECUTION",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::LoopLimit => "LOOP_LIMIT",
            Self::Persistence => "PERSISTENCE",
            Self::Encryption => "ENCRYPTION",
            Self::Key => "KEY",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool's `id` failed to register: the id was already taken, or the tool
/// was missing one of `id`/`name`/`execute`/`inputSchema`/`outputSchema`.
#[derive(Debug, Error)]
#[error("tool registration failed: {0}")]
pub struct RegistrationError(pub String);

/// Lookup of a tool, join, or LLM-tool id that is not registered.
#[derive(Debug, Error)]
#[error("not found: {0}")]
pub struct ToolNotFoundError(pub String);

/// Which side of a tool's schema a [`ValidationError`] concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationField {
    /// The value failed to decode against `inputSchema`.
    Input,
    /// The value failed to decode against `outputSchema`.
    Output,
}

impl fmt::Display for ValidationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Output => "output",
        })
    }
}

/// A value failed schema decoding.
#[derive(Debug, Error)]
#[error("validation failed for tool '{tool_id}' ({field}): {message}")]
pub struct ValidationError {
    /// The tool whose schema rejected the value.
    pub tool_id: String,
    /// Input or output side.
    pub field: ValidationField,
    /// Human-readable decode failure.
    pub message: String,
}

impl ValidationError {
    /// Construct an input-side validation error.
    #[must_use]
    pub fn input(tool_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            field: ValidationField::Input,
            message: message.into(),
        }
    }

    /// Construct an output-side validation error.
    #[must_use]
    pub fn output(tool_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            field: ValidationField::Output,
            message: message.into(),
        }
    }
}

/// The IR builder's `build` step found structural problems.
#[derive(Debug, Error)]
#[error("IR validation failed: {}", self.errors.join("; "))]
pub struct IrValidationError {
    /// One message per violated invariant (see the IR builder).
    pub errors: Vec<String>,
}

/// Flow-JSON compilation failed: unknown tags, dangling references, cycles.
#[derive(Debug, Error)]
#[error("compilation failed: {0}")]
pub struct CompilationError(pub String);

/// A variable-store operation violated a store invariant (bad path, pop of
/// an empty scope stack, malformed `fromJSON` input).
#[derive(Debug, Error)]
#[error("state error: {0}")]
pub struct StateError(pub String);

/// Errors raised while the scheduler is evaluating a node.
///
/// These are the only error kinds that are *retryable*: [`Self::Failed`]
/// and [`Self::Timeout`] are retried when `config.retries > 0`;
/// [`Self::Cancelled`] and [`Self::LoopLimit`] never are.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A tool raised an error, or the sandboxed expression evaluator hit
    /// unsupported syntax.
    #[error("node {node_id} ({node_type}) failed: {message}")]
    Failed {
        /// The node that failed.
        node_id: NodeId,
        /// The node's kind (`tool`, `conditional`, ...), for diagnostics.
        node_type: String,
        /// Human-readable failure description.
        message: String,
    },
    /// The node's `config.timeoutMs` elapsed before it completed.
    #[error("node {node_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// The node that timed out.
        node_id: NodeId,
        /// The configured timeout.
        timeout_ms: u64,
    },
    /// The caller cancelled the flow while this node was in flight.
    #[error("execution cancelled")]
    Cancelled,
    /// A `while` loop exceeded its safety ceiling without its condition
    /// going false.
    #[error("loop safety ceiling ({limit} iterations) exceeded at node {node_id}")]
    LoopLimit {
        /// The loop node that exceeded its ceiling.
        node_id: NodeId,
        /// The configured (or default) ceiling.
        limit: usize,
    },
}

impl ExecutionError {
    /// The stable [`ErrorCode`] for this variant.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Failed { .. } => ErrorCode::Execution,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::LoopLimit { .. } => ErrorCode::LoopLimit,
        }
    }

    /// Whether this error kind may be retried when `config.retries > 0`.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Timeout { .. })
    }

    /// The node this error occurred at, if any.
    #[must_use]
    pub const fn node_id(&self) -> Option<&NodeId> {
        match self {
            Self::Failed { node_id, .. } | Self::Timeout { node_id, .. } | Self::LoopLimit { node_id, .. } => {
                Some(node_id)
            }
            Self::Cancelled => None,
        }
    }
}

/// Which backend-facing stage of the persistence pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistenceErrorKind {
    /// Captured state exceeded the configured size ceiling.
    StateTooLarge,
    /// Checksum mismatch, or malformed envelope, on retrieval.
    Corrupted,
    /// The storage backend itself failed (after its retry budget).
    BackendUnavailable,
    /// No key for the requested suspension was found.
    NotFound,
    /// Envelope `version` is not one this engine understands.
    UnsupportedVersion,
}

/// Errors from the persistence pipeline (serialise/compress/encrypt/store
/// and their inverses).
#[derive(Debug, Error)]
#[error("persistence error ({kind:?}): {message}")]
pub struct PersistenceError {
    /// Which stage failed.
    pub kind: PersistenceErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl PersistenceError {
    /// Construct a [`PersistenceErrorKind::StateTooLarge`] error.
    #[must_use]
    pub fn state_too_large(size: usize, limit: usize) -> Self {
        Self {
            kind: PersistenceErrorKind::StateTooLarge,
            message: format!("captured state is {size} bytes, ceiling is {limit} bytes"),
        }
    }

    /// Construct a [`PersistenceErrorKind::Corrupted`] error.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self {
            kind: PersistenceErrorKind::Corrupted,
            message: message.into(),
        }
    }
}

/// Key material missing, or AES-GCM decrypt/authentication failed.
#[derive(Debug, Error)]
#[error("encryption error: {0}")]
pub struct EncryptionError(pub String);

/// A suspension key failed structural or checksum validation.
#[derive(Debug, Error)]
#[error("malformed suspension key: {0}")]
pub struct KeyError(pub String);

/// Umbrella error returned at the public API boundary (flow run/resume).
///
/// Internal components return their specific error type; this is the type
/// that crosses the `loomflow` facade and appears in `flow-error` /
/// `flow-complete` terminal results.
#[derive(Debug, Error)]
pub enum EngineError {
    /// See [`RegistrationError`].
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    /// See [`ToolNotFoundError`].
    #[error(transparent)]
    ToolNotFound(#[from] ToolNotFoundError),
    /// See [`ValidationError`].
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// See [`IrValidationError`].
    #[error(transparent)]
    IrValidation(#[from] IrValidationError),
    /// See [`CompilationError`].
    #[error(transparent)]
    Compilation(#[from] CompilationError),
    /// See [`StateError`].
    #[error(transparent)]
    State(#[from] StateError),
    /// See [`ExecutionError`].
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// See [`PersistenceError`].
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    /// See [`EncryptionError`].
    #[error(transparent)]
    Encryption(#[from] EncryptionError),
    /// See [`KeyError`].
    #[error(transparent)]
    Key(#[from] KeyError),
}

impl EngineError {
    /// The stable [`ErrorCode`] for this error, regardless of variant.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Registration(_) => ErrorCode::Registration,
            Self::ToolNotFound(_) => ErrorCode::ToolNotFound,
            Self::Validation(_) | Self::IrValidation(_) => ErrorCode::Validation,
            Self::Compilation(_) => ErrorCode::Compilation,
            Self::State(_) => ErrorCode::Execution,
            Self::Execution(e) => e.code(),
            Self::Persistence(_) => ErrorCode::Persistence,
            Self::Encryption(_) => ErrorCode::Encryption,
            Self::Key(_) => ErrorCode::Key,
        }
    }
}
