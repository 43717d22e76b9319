//! Error definitions for resolution, validation and dispatch.

use std::fmt;

use thiserror::Error;

/// One step of a [`Violation`] path into a checked value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Mapping key.
    Field(String),
    /// Sequence position.
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => write!(f, ".{name}"),
            PathSegment::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// Structural validation failure: where in the value it happened and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Path from the root of the validated value to the failing node.
    pub path: Vec<PathSegment>,
    /// Human-readable reason.
    pub reason: String,
}

impl Violation {
    pub fn new(path: Vec<PathSegment>, reason: impl Into<String>) -> Self {
        Self {
            path,
            reason: reason.into(),
        }
    }

    /// Prepends `segment`, re-rooting the violation one level up.
    pub fn within(mut self, segment: PathSegment) -> Self {
        self.path.insert(0, segment);
        self
    }

    /// Path rendered as plain segment labels (`["a", "0", "b"]`).
    pub fn path_labels(&self) -> Vec<String> {
        self.path
            .iter()
            .map(|segment| match segment {
                PathSegment::Field(name) => name.clone(),
                PathSegment::Index(index) => index.to_string(),
            })
            .collect()
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for segment in &self.path {
            write!(f, "{segment}")?;
        }
        write!(f, ": {}", self.reason)
    }
}

/// Classification of communication failures reported by invokers/publishers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    Timeout,
    AccessDenied,
    Unavailable,
    MalformedResponse,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::AccessDenied => "access denied",
            TransportErrorKind::Unavailable => "unavailable",
            TransportErrorKind::MalformedResponse => "malformed response",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
/// Top-level error type returned by public APIs.
pub enum SkyhookError {
    /// A declared name is not valid kebab-case.
    #[error("naming error: {0}")]
    Naming(String),
    /// Two declarations share a name or derive the same target identifier.
    #[error("identifier collision: {0}")]
    IdentifierCollision(String),
    /// A reference chain loops back onto itself outside a named-type boundary.
    #[error("cyclic reference at {location}: {cycle}")]
    CyclicReference { location: String, cycle: String },
    /// A `$ref` names something that does not exist.
    #[error("unresolved reference at {location}: {reference}")]
    UnresolvedReference { location: String, reference: String },
    /// Malformed document shape, description or version.
    #[error("document error at {location}: {message}")]
    Document { location: String, message: String },
    /// A document could not be read or decoded by its loader.
    #[error("failed to load document '{document}': {message}")]
    Load { document: String, message: String },
    /// No binding is active, or the active binding has no endpoint for the name.
    #[error("no binding active for '{0}'")]
    Unbound(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("unknown message '{0}'")]
    UnknownMessage(String),
    #[error("unknown argument '{argument}' for function '{function}'")]
    UnknownArgument { function: String, argument: String },
    #[error("function '{function}' called without arguments: {}", missing.join(", "))]
    Arity {
        function: String,
        missing: Vec<String>,
    },
    /// Caller-side payload does not satisfy the declared schema.
    #[error("validation error: {0}")]
    Validation(Violation),
    /// The implementing side broke its own declared contract.
    #[error("contract violation in '{name}': {violation}")]
    ContractViolation { name: String, violation: Violation },
    /// Communication, permission or infrastructure failure.
    #[error("transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    /// The remote side reported a failure through the response envelope.
    #[error("remote error ({kind}): {message}")]
    Remote { kind: String, message: String },
    /// A local handler returned an error.
    #[error("handler error: {0}")]
    Handler(String),
    /// Invalid runtime configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Boundary payload encoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Filesystem I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SkyhookError {
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        SkyhookError::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Only transport failures are safe to retry; everything else is a
    /// contract or usage problem that a retry cannot fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SkyhookError::Transport { .. })
    }

    /// Short machine-readable label used in boundary error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            SkyhookError::Naming(_) => "naming",
            SkyhookError::IdentifierCollision(_) => "identifier-collision",
            SkyhookError::CyclicReference { .. } => "cyclic-reference",
            SkyhookError::UnresolvedReference { .. } => "unresolved-reference",
            SkyhookError::Document { .. } => "document",
            SkyhookError::Load { .. } => "load",
            SkyhookError::Unbound(_) => "unbound",
            SkyhookError::UnknownFunction(_) => "unknown-function",
            SkyhookError::UnknownMessage(_) => "unknown-message",
            SkyhookError::UnknownArgument { .. } => "unknown-argument",
            SkyhookError::Arity { .. } => "arity",
            SkyhookError::Validation(_) => "validation",
            SkyhookError::ContractViolation { .. } => "contract-violation",
            SkyhookError::Transport { .. } => "transport",
            SkyhookError::Remote { .. } => "remote",
            SkyhookError::Handler(_) => "handler",
            SkyhookError::Config(_) => "config",
            SkyhookError::Serialization(_) => "serialization",
            SkyhookError::Io(_) => "io",
        }
    }

    /// The violation carried by validation or contract errors, if any.
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            SkyhookError::Validation(violation) => Some(violation),
            SkyhookError::ContractViolation { violation, .. } => Some(violation),
            _ => None,
        }
    }
}
