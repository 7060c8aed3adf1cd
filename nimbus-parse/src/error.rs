#![forbid(unsafe_code)]

use miette::Diagnostic;
use nimbus_ast::Span;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("parse error: {message}")]
#[diagnostic(code(nimbus::parse))]
pub struct ParseError {
    pub message: String,
    #[label]
    pub span: Span,
}
