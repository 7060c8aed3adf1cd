#![forbid(unsafe_code)]

use miette::Diagnostic;
use nimbus_ast::Span;
use thiserror::Error;

/// Lowering failures are internal-error class: the analyzer and checker are
/// supposed to rule these trees out before they reach the backend.
#[derive(Debug, Error, Diagnostic)]
#[error("cuda backend error: {message}")]
#[diagnostic(code(nimbus::backend_cuda))]
pub struct CudaBackendError {
    pub message: String,
    #[label]
    pub span: Option<Span>,
}

impl CudaBackendError {
    pub fn at(span: Span, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span: Some(span),
        }
    }
}
