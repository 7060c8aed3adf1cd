#![forbid(unsafe_code)]

use nimbus_ast::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    KwLit,
    KwVal,
    KwSet,
    KwGet,
    KwDefine,
    KwCall,
    KwIf,
    KwThen,
    KwElse,
    KwLoop,
    KwDo,
    KwList,
    KwListAt,
    KwListSet,

    LParen,
    RParen,
    Colon,

    Int(i64),
    Float(f64),
    Str(String),
    /// Variable, function, or type name. Operator names like `+` and `<=`
    /// are identifiers too; they only ever appear as call targets.
    Ident(String),
}

impl TokenKind {
    pub fn display(&self) -> String {
        match self {
            TokenKind::KwLit => "lit".to_string(),
            TokenKind::KwVal => "val".to_string(),
            TokenKind::KwSet => "set".to_string(),
            TokenKind::KwGet => "get".to_string(),
            TokenKind::KwDefine => "define".to_string(),
            TokenKind::KwCall => "call".to_string(),
            TokenKind::KwIf => "if".to_string(),
            TokenKind::KwThen => "then".to_string(),
            TokenKind::KwElse => "else".to_string(),
            TokenKind::KwLoop => "loop".to_string(),
            TokenKind::KwDo => "do".to_string(),
            TokenKind::KwList => "list".to_string(),
            TokenKind::KwListAt => "list_at".to_string(),
            TokenKind::KwListSet => "list_set".to_string(),
            TokenKind::LParen => "(".to_string(),
            TokenKind::RParen => ")".to_string(),
            TokenKind::Colon => ":".to_string(),
            TokenKind::Int(n) => n.to_string(),
            TokenKind::Float(f) => f.to_string(),
            TokenKind::Str(s) => format!("'{s}'"),
            TokenKind::Ident(name) => name.clone(),
        }
    }
}
