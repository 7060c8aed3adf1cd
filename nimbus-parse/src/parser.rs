#![forbid(unsafe_code)]

use nimbus_ast::{span, span_between, Expr, ExprKind, Param, Span, Type, Value};
use nimbus_lex::{Token, TokenKind};

use crate::error::ParseError;

pub struct Parser<'a> {
    tokens: &'a [Token],
    idx: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, idx: 0 }
    }

    /// Parse a whole source file: the primitive prelude followed by the
    /// file's top-level expressions.
    pub fn parse_program(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut exprs = prelude();

        while self.peek_kind().is_some() {
            exprs.push(self.parse_expr()?);
        }

        Ok(exprs)
    }

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let open = self.expect(TokenKind::LParen)?;
        let start = open.span.offset();

        let tok = self.expect_any()?;
        match tok.kind.clone() {
            TokenKind::KwLit => self.parse_literal(start),
            TokenKind::KwGet => self.parse_get_var(start),
            TokenKind::KwVal => self.parse_create_var(start),
            TokenKind::KwSet => self.parse_set_var(start),
            TokenKind::KwDefine => self.parse_define(start),
            TokenKind::KwCall => self.parse_call(start),
            TokenKind::KwIf => self.parse_if(start),
            TokenKind::KwLoop => self.parse_loop(start),
            TokenKind::KwList => self.parse_list(start),
            TokenKind::KwListAt => self.parse_list_at(start),
            TokenKind::KwListSet => self.parse_list_set(start),
            other => Err(ParseError {
                message: format!("unknown expression type: {}", other.display()),
                span: tok.span,
            }),
        }
    }

    fn parse_literal(&mut self, start: usize) -> Result<Expr, ParseError> {
        let tok = self.expect_any()?;
        let value = match tok.kind.clone() {
            TokenKind::Int(n) => Value::Int(n),
            TokenKind::Float(f) => Value::Float(f),
            TokenKind::Str(s) => Value::Str(s),
            other => {
                return Err(ParseError {
                    message: format!("expected literal value but found {}", other.display()),
                    span: tok.span,
                });
            }
        };

        let end = self.expect(TokenKind::RParen)?;
        let ty = value.ty();
        Ok(Expr::with_type(
            self.span_from(start, &end),
            ty,
            ExprKind::Literal(value),
        ))
    }

    fn parse_get_var(&mut self, start: usize) -> Result<Expr, ParseError> {
        let name = self.expect_name()?;
        let end = self.expect(TokenKind::RParen)?;
        Ok(Expr::new(
            self.span_from(start, &end),
            ExprKind::GetVar { name },
        ))
    }

    fn parse_create_var(&mut self, start: usize) -> Result<Expr, ParseError> {
        let ty = self.parse_scalar_type()?;
        let name = self.expect_name()?;
        let init = self.parse_expr()?;
        let end = self.expect(TokenKind::RParen)?;

        Ok(Expr::with_type(
            self.span_from(start, &end),
            ty,
            ExprKind::CreateVar {
                name,
                init: Box::new(init),
            },
        ))
    }

    fn parse_set_var(&mut self, start: usize) -> Result<Expr, ParseError> {
        let name = self.expect_name()?;
        let value = self.parse_expr()?;
        let end = self.expect(TokenKind::RParen)?;

        Ok(Expr::new(
            self.span_from(start, &end),
            ExprKind::SetVar {
                name,
                value: Box::new(value),
            },
        ))
    }

    fn parse_define(&mut self, start: usize) -> Result<Expr, ParseError> {
        let ret = self.parse_type()?;
        let name = self.expect_name()?;
        self.expect(TokenKind::Colon)?;

        // Parameters run until the second ':'.
        let mut params = Vec::new();
        while !matches!(self.peek_kind(), Some(TokenKind::Colon)) {
            let ty = self.parse_type()?;
            let pname = self.expect_name()?;
            params.push(Param { ty, name: pname });
        }
        self.expect(TokenKind::Colon)?;

        let (body, end) = self.parse_body()?;
        Ok(Expr::with_type(
            self.span_from(start, &end),
            Type::Unit,
            ExprKind::Define {
                name,
                ret,
                params,
                body,
            },
        ))
    }

    fn parse_call(&mut self, start: usize) -> Result<Expr, ParseError> {
        let name = self.expect_name()?;
        self.expect(TokenKind::Colon)?;

        let (args, end) = self.parse_body()?;
        Ok(Expr::new(
            self.span_from(start, &end),
            ExprKind::Call { name, args },
        ))
    }

    fn parse_if(&mut self, start: usize) -> Result<Expr, ParseError> {
        let cond = self.parse_expr()?;
        self.expect(TokenKind::KwThen)?;

        let mut then_body = Vec::new();
        while !matches!(self.peek_kind(), Some(TokenKind::KwElse)) {
            then_body.push(self.parse_expr()?);
        }
        self.expect(TokenKind::KwElse)?;

        let (else_body, end) = self.parse_body()?;
        Ok(Expr::with_type(
            self.span_from(start, &end),
            Type::Unit,
            ExprKind::If {
                cond: Box::new(cond),
                then_body,
                else_body,
            },
        ))
    }

    fn parse_loop(&mut self, start: usize) -> Result<Expr, ParseError> {
        let init = self.parse_expr()?;
        let test = self.parse_expr()?;
        let update = self.parse_expr()?;
        self.expect(TokenKind::KwDo)?;

        let (body, end) = self.parse_body()?;
        Ok(Expr::with_type(
            self.span_from(start, &end),
            Type::Unit,
            ExprKind::Loop {
                init: Box::new(init),
                test: Box::new(test),
                update: Box::new(update),
                body,
            },
        ))
    }

    fn parse_list(&mut self, start: usize) -> Result<Expr, ParseError> {
        let elem = self.parse_scalar_type()?;
        let name = self.expect_name()?;
        let size = self.parse_expr()?;
        let end = self.expect(TokenKind::RParen)?;

        Ok(Expr::new(
            self.span_from(start, &end),
            ExprKind::List {
                name,
                elem,
                size: Box::new(size),
            },
        ))
    }

    fn parse_list_at(&mut self, start: usize) -> Result<Expr, ParseError> {
        let name = self.expect_name()?;
        let index = self.parse_expr()?;
        let end = self.expect(TokenKind::RParen)?;

        Ok(Expr::new(
            self.span_from(start, &end),
            ExprKind::ListAt {
                name,
                index: Box::new(index),
            },
        ))
    }

    fn parse_list_set(&mut self, start: usize) -> Result<Expr, ParseError> {
        let name = self.expect_name()?;
        let index = self.parse_expr()?;
        let value = self.parse_expr()?;
        let end = self.expect(TokenKind::RParen)?;

        Ok(Expr::with_type(
            self.span_from(start, &end),
            Type::Unit,
            ExprKind::ListSet {
                name,
                index: Box::new(index),
                value: Box::new(value),
            },
        ))
    }

    /// Parse expressions until the closing ')'. Returns the expressions and
    /// the closing token.
    fn parse_body(&mut self) -> Result<(Vec<Expr>, Token), ParseError> {
        let mut exprs = Vec::new();
        loop {
            if matches!(self.peek_kind(), Some(TokenKind::RParen)) {
                let end = self.expect(TokenKind::RParen)?;
                return Ok((exprs, end));
            }
            exprs.push(self.parse_expr()?);
        }
    }

    /// A scalar type name: `int`, `float`, or `string`.
    fn parse_scalar_type(&mut self) -> Result<Type, ParseError> {
        let tok = self.expect_any()?;
        match &tok.kind {
            TokenKind::Ident(name) => match name.as_str() {
                "int" => Ok(Type::Int),
                "float" => Ok(Type::Float),
                "string" => Ok(Type::String),
                other => Err(ParseError {
                    message: format!("invalid type: {other}"),
                    span: tok.span,
                }),
            },
            other => Err(ParseError {
                message: format!("expected type but found {}", other.display()),
                span: tok.span,
            }),
        }
    }

    /// A scalar type or `list <scalar>` (allowed for function returns and
    /// parameters).
    fn parse_type(&mut self) -> Result<Type, ParseError> {
        if matches!(self.peek_kind(), Some(TokenKind::KwList)) {
            let list_tok = self.expect(TokenKind::KwList)?;
            let elem = self.parse_scalar_type()?;
            return Type::list_of(elem).ok_or_else(|| ParseError {
                message: format!("invalid list element type: {}", elem.display()),
                span: list_tok.span,
            });
        }
        self.parse_scalar_type()
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        let tok = self.expect_any()?;
        match &tok.kind {
            TokenKind::Ident(name) => Ok(name.clone()),
            other => Err(ParseError {
                message: format!("expected name but found {}", other.display()),
                span: tok.span,
            }),
        }
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token, ParseError> {
        let tok = self.expect_any()?;
        if tok.kind != expected {
            return Err(ParseError {
                message: format!(
                    "expected \"{}\" but found \"{}\"",
                    expected.display(),
                    tok.kind.display()
                ),
                span: tok.span,
            });
        }
        Ok(tok)
    }

    fn expect_any(&mut self) -> Result<Token, ParseError> {
        match self.tokens.get(self.idx) {
            Some(tok) => {
                self.idx += 1;
                Ok(tok.clone())
            }
            None => Err(ParseError {
                message: "unexpected end of file".to_string(),
                span: self.eof_span(),
            }),
        }
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.idx).map(|t| &t.kind)
    }

    fn span_from(&self, start: usize, end: &Token) -> Span {
        span_between(start, end.span.offset() + end.span.len())
    }

    fn eof_span(&self) -> Span {
        match self.tokens.last() {
            Some(tok) => span(tok.span.offset() + tok.span.len(), 0),
            None => span(0, 0),
        }
    }
}

/// The fixed primitive-function table installed ahead of user code.
///
/// `print` is not listed; it is variadic and special-cased by the type
/// checker.
pub fn prelude() -> Vec<Expr> {
    let mut exprs = Vec::new();

    let mut prim = |name: &str, arg_types: Vec<Type>| {
        exprs.push(Expr::with_type(
            span(0, 0),
            Type::Int,
            ExprKind::PrimFunc {
                name: name.to_string(),
                arg_types,
            },
        ));
    };

    for op in [
        "+", "-", "*", "/", "%", ">", ">=", "<", "<=", "==", "!=", "or", "and", "xor",
    ] {
        prim(op, vec![Type::Int, Type::Int]);
    }

    prim("not", vec![Type::Int]);
    prim("rand", vec![]);
    prim("srand", vec![Type::Int]);
    prim("time", vec![Type::Int]);

    exprs
}

/// Number of prelude entries preceding user expressions in a parsed program.
pub fn prelude_len() -> usize {
    prelude().len()
}
