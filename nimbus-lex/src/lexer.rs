#![forbid(unsafe_code)]

use logos::Logos;
use miette::Diagnostic;
use nimbus_ast::{span_between, Span};
use thiserror::Error;

use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Diagnostic)]
#[error("lex error: {message}")]
#[diagnostic(code(nimbus::lex))]
pub struct LexError {
    pub message: String,
    #[label]
    pub span: Span,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
enum RawToken {
    #[token("lit")]
    KwLit,
    #[token("val")]
    KwVal,
    #[token("set")]
    KwSet,
    #[token("get")]
    KwGet,
    #[token("define")]
    KwDefine,
    #[token("call")]
    KwCall,
    #[token("if")]
    KwIf,
    #[token("then")]
    KwThen,
    #[token("else")]
    KwElse,
    #[token("loop")]
    KwLoop,
    #[token("do")]
    KwDo,
    #[token("list")]
    KwList,
    #[token("list_at")]
    KwListAt,
    #[token("list_set")]
    KwListSet,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(":")]
    Colon,

    #[regex(r"-?[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(Option<f64>),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(Option<i64>),

    // String literals use single quotes and have no escapes.
    #[regex(r"'[^']*'", |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].to_string()
    })]
    Str(String),

    // Alphanumeric names may carry a `.size` style suffix; operator names
    // are symbol runs.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_.]*", |lex| lex.slice().to_string())]
    #[regex(r"[+\-*/%<>=!]+", |lex| lex.slice().to_string())]
    Ident(String),
}

pub struct Lexer<'a> {
    src: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src }
    }

    pub fn lex(&self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        let mut lexer = RawToken::lexer(self.src);

        while let Some(raw) = lexer.next() {
            let range = lexer.span();
            let span = span_between(range.start, range.end);

            let raw = raw.map_err(|()| LexError {
                message: format!("unexpected character: {}", lexer.slice()),
                span,
            })?;

            let kind = match raw {
                RawToken::KwLit => TokenKind::KwLit,
                RawToken::KwVal => TokenKind::KwVal,
                RawToken::KwSet => TokenKind::KwSet,
                RawToken::KwGet => TokenKind::KwGet,
                RawToken::KwDefine => TokenKind::KwDefine,
                RawToken::KwCall => TokenKind::KwCall,
                RawToken::KwIf => TokenKind::KwIf,
                RawToken::KwThen => TokenKind::KwThen,
                RawToken::KwElse => TokenKind::KwElse,
                RawToken::KwLoop => TokenKind::KwLoop,
                RawToken::KwDo => TokenKind::KwDo,
                RawToken::KwList => TokenKind::KwList,
                RawToken::KwListAt => TokenKind::KwListAt,
                RawToken::KwListSet => TokenKind::KwListSet,
                RawToken::LParen => TokenKind::LParen,
                RawToken::RParen => TokenKind::RParen,
                RawToken::Colon => TokenKind::Colon,
                RawToken::Int(n) => TokenKind::Int(n.ok_or_else(|| LexError {
                    message: format!("invalid integer literal: {}", lexer.slice()),
                    span,
                })?),
                RawToken::Float(f) => TokenKind::Float(f.ok_or_else(|| LexError {
                    message: format!("invalid float literal: {}", lexer.slice()),
                    span,
                })?),
                RawToken::Str(s) => TokenKind::Str(s),
                RawToken::Ident(name) => TokenKind::Ident(name),
            };

            tokens.push(Token { kind, span });
        }

        Ok(tokens)
    }
}
