#![forbid(unsafe_code)]

mod error;
mod parser;

use miette::IntoDiagnostic;
use nimbus_lex::Lexer;

pub use error::ParseError;
pub use parser::{prelude, prelude_len, Parser};

pub fn parse_source(src: &str) -> miette::Result<Vec<nimbus_ast::Expr>> {
    let tokens = Lexer::new(src).lex().into_diagnostic()?;
    let mut parser = Parser::new(&tokens);
    parser.parse_program().into_diagnostic()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_ast::{Expr, ExprKind, Type, Value};

    fn parse_user(src: &str) -> Vec<Expr> {
        let exprs = parse_source(src).unwrap();
        exprs.into_iter().skip(prelude_len()).collect()
    }

    #[test]
    fn prelude_precedes_user_code() {
        let exprs = parse_source("(val int x (lit 1))").unwrap();
        assert_eq!(exprs.len(), prelude_len() + 1);
        assert!(matches!(exprs[0].kind, ExprKind::PrimFunc { .. }));
        assert!(matches!(
            exprs[prelude_len()].kind,
            ExprKind::CreateVar { .. }
        ));
    }

    #[test]
    fn parse_create_var_records_declared_type() {
        let exprs = parse_user("(val float pi (lit 3.14))");
        let expr = &exprs[0];
        assert_eq!(expr.ty, Type::Float);
        let ExprKind::CreateVar { name, init } = &expr.kind else {
            panic!("expected CreateVar");
        };
        assert_eq!(name, "pi");
        assert!(matches!(&init.kind, ExprKind::Literal(Value::Float(_))));
    }

    #[test]
    fn parse_loop_form() {
        let src = "(loop (val int i (lit 0)) (call < : (get i) (lit 10)) \
                   (set i (call + : (get i) (lit 1))) do \
                   (set x (get i)))";
        let exprs = parse_user(src);
        let ExprKind::Loop {
            init,
            test,
            update,
            body,
        } = &exprs[0].kind
        else {
            panic!("expected Loop");
        };
        assert!(matches!(init.kind, ExprKind::CreateVar { .. }));
        assert!(matches!(test.kind, ExprKind::Call { .. }));
        assert!(matches!(update.kind, ExprKind::SetVar { .. }));
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn parse_if_splits_branches_at_else() {
        let src = "(if (call < : (get x) (lit 3)) then (set x (lit 1)) (set x (lit 2)) \
                   else (set x (lit 3)))";
        let exprs = parse_user(src);
        let ExprKind::If {
            then_body,
            else_body,
            ..
        } = &exprs[0].kind
        else {
            panic!("expected If");
        };
        assert_eq!(then_body.len(), 2);
        assert_eq!(else_body.len(), 1);
    }

    #[test]
    fn parse_define_with_list_param() {
        let src = "(define int sum : list int xs : (lit 0))";
        let exprs = parse_user(src);
        let ExprKind::Define {
            name,
            ret,
            params,
            body,
        } = &exprs[0].kind
        else {
            panic!("expected Define");
        };
        assert_eq!(name, "sum");
        assert_eq!(*ret, Type::Int);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].ty, Type::ListInt);
        assert_eq!(params[0].name, "xs");
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn parse_list_forms() {
        let src = "(list int a (lit 8)) (list_set a (lit 0) (lit 5)) (list_at a (lit 0))";
        let exprs = parse_user(src);
        assert!(matches!(
            exprs[0].kind,
            ExprKind::List {
                elem: Type::Int,
                ..
            }
        ));
        assert!(matches!(exprs[1].kind, ExprKind::ListSet { .. }));
        assert!(matches!(exprs[2].kind, ExprKind::ListAt { .. }));
    }

    #[test]
    fn parse_rejects_bare_keyword() {
        let err = parse_source("(frobnicate x)").unwrap_err();
        assert!(err.to_string().contains("unknown expression type"));
    }

    #[test]
    fn parse_rejects_truncated_input() {
        let err = parse_source("(val int x (lit 1)").unwrap_err();
        assert!(err.to_string().contains("unexpected end of file"));
    }

    #[test]
    fn prelude_has_all_primitives() {
        // 14 binary operators, not, rand, srand, time.
        assert_eq!(prelude_len(), 18);
        assert!(prelude()
            .iter()
            .all(|e| matches!(e.kind, ExprKind::PrimFunc { .. })));
    }
}
