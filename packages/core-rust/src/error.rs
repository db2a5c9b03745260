//! Error taxonomy shared by the registry, the request lifecycle, and bindings.
//!
//! Two families exist:
//! - [`DeclarationError`]: setup-time misconfiguration, returned synchronously
//!   to whoever is registering services or attaching bindings.
//! - [`RequestError`]: a per-request terminal failure tagged with an
//!   [`ErrorKind`]. Bindings translate the kind into a transport status.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DeclarationError
// ---------------------------------------------------------------------------

/// Errors raised while declaring services or wiring bindings.
///
/// Always fatal for the operation that produced them. Nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeclarationError {
    #[error("registry is frozen: cannot {action} after a binding has been attached")]
    Frozen { action: &'static str },
    #[error("duplicate procedure path {path}")]
    DuplicatePath { path: String },
    #[error("invalid {what} name {name:?}: expected an ASCII identifier")]
    InvalidName { what: &'static str, name: String },
    #[error("cannot attach binding {binding}: no procedures are registered")]
    EmptyTable { binding: String },
    #[error("binding {binding} is already attached")]
    AlreadyAttached { binding: String },
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Kind tag of a per-request failure.
///
/// `FilterDenied` is a business denial; every other kind is a fault or a
/// client mistake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownProcedure,
    ContextInitFailed,
    FilterDenied,
    FilterFault,
    MalformedPayload,
    InvocationFault,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::UnknownProcedure,
        ErrorKind::ContextInitFailed,
        ErrorKind::FilterDenied,
        ErrorKind::FilterFault,
        ErrorKind::MalformedPayload,
        ErrorKind::InvocationFault,
    ];

    /// Stable wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UnknownProcedure => "UnknownProcedure",
            ErrorKind::ContextInitFailed => "ContextInitFailed",
            ErrorKind::FilterDenied => "FilterDenied",
            ErrorKind::FilterFault => "FilterFault",
            ErrorKind::MalformedPayload => "MalformedPayload",
            ErrorKind::InvocationFault => "InvocationFault",
        }
    }

    /// Returns `true` for kinds that represent a server-side fault rather
    /// than a denial or a bad request.
    #[must_use]
    pub fn is_fault(self) -> bool {
        matches!(
            self,
            ErrorKind::ContextInitFailed | ErrorKind::FilterFault | ErrorKind::InvocationFault
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RequestError
// ---------------------------------------------------------------------------

/// Terminal failure of a single request: kind, message, and optional cause.
#[derive(Debug)]
pub struct RequestError {
    kind: ErrorKind,
    message: String,
    source: Option<anyhow::Error>,
}

impl RequestError {
    /// Creates an error without an underlying cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error wrapping an underlying fault.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The wrapped fault, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }

    /// Converts into the body a binding serializes for the client.
    ///
    /// The wrapped cause is not exposed to clients.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind,
            message: self.message.clone(),
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| AsRef::<dyn std::error::Error + 'static>::as_ref(e))
    }
}

/// Serialized body of a non-success response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn kind_names_are_stable() {
        let names: Vec<_> = ErrorKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "UnknownProcedure",
                "ContextInitFailed",
                "FilterDenied",
                "FilterFault",
                "MalformedPayload",
                "InvocationFault",
            ]
        );
    }

    #[test]
    fn only_faults_are_faults() {
        assert!(!ErrorKind::FilterDenied.is_fault());
        assert!(!ErrorKind::UnknownProcedure.is_fault());
        assert!(!ErrorKind::MalformedPayload.is_fault());
        assert!(ErrorKind::InvocationFault.is_fault());
        assert!(ErrorKind::FilterFault.is_fault());
        assert!(ErrorKind::ContextInitFailed.is_fault());
    }

    #[test]
    fn request_error_exposes_wrapped_cause() {
        let err = RequestError::with_source(
            ErrorKind::InvocationFault,
            "handler failed",
            anyhow::anyhow!("disk on fire"),
        );
        assert_eq!(err.kind(), ErrorKind::InvocationFault);
        assert_eq!(err.to_string(), "InvocationFault: handler failed");
        assert_eq!(err.source().unwrap().to_string(), "disk on fire");
        assert_eq!(err.cause().unwrap().to_string(), "disk on fire");
    }

    #[test]
    fn error_body_omits_cause() {
        let err = RequestError::with_source(
            ErrorKind::FilterFault,
            "filter auth failed",
            anyhow::anyhow!("secret detail"),
        );
        let body = err.to_body();
        assert_eq!(body.kind, ErrorKind::FilterFault);
        assert_eq!(body.message, "filter auth failed");
    }

    #[test]
    fn declaration_error_messages() {
        let err = DeclarationError::Frozen { action: "register" };
        assert_eq!(
            err.to_string(),
            "registry is frozen: cannot register after a binding has been attached"
        );
        let err = DeclarationError::DuplicatePath {
            path: "/Echo.Repeat".to_string(),
        };
        assert_eq!(err.to_string(), "duplicate procedure path /Echo.Repeat");
    }
}
