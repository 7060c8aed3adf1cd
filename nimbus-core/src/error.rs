#![forbid(unsafe_code)]

use miette::Diagnostic;
use nimbus_ast::{LookupError, Span};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SemaError {
    #[error("name error: {message}")]
    #[diagnostic(code(nimbus::sema::name))]
    Name {
        message: String,
        #[label]
        span: Span,
    },

    #[error("type error: {message}")]
    #[diagnostic(code(nimbus::sema::types))]
    Type {
        message: String,
        #[label]
        span: Span,
    },

    #[error("call error: {message}")]
    #[diagnostic(code(nimbus::sema::call))]
    Call {
        message: String,
        #[label]
        span: Span,
    },

    #[error("invalid syntax: {message}")]
    #[diagnostic(code(nimbus::sema::syntax))]
    Syntax {
        message: String,
        #[label]
        span: Span,
    },

    /// A broken invariant in a tree that already passed type checking.
    /// Always a compiler bug, never user error.
    #[error("internal error: {message}")]
    #[diagnostic(code(nimbus::sema::internal))]
    Internal {
        message: String,
        #[label]
        span: Span,
    },
}

impl SemaError {
    pub fn internal(span: Span, message: impl Into<String>) -> Self {
        SemaError::Internal {
            message: message.into(),
            span,
        }
    }

    pub fn from_lookup(err: LookupError) -> Self {
        match err {
            LookupError::NotFound { name, span } => SemaError::Name {
                message: format!("variable {name} does not exist"),
                span,
            },
            LookupError::NotAVariable { name, span } => SemaError::Syntax {
                message: format!("{name} is a function; expected a variable"),
                span,
            },
            LookupError::Unresolved { name, span } => SemaError::Type {
                message: format!("variable {name} has unresolved type"),
                span,
            },
        }
    }
}
