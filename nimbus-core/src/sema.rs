#![forbid(unsafe_code)]

use nimbus_ast::{Env, Expr, ExprKind, Span, Type};

use crate::error::SemaError;

/// Validates types and attaches environment snapshots to every node.
///
/// After `check_program` succeeds, no node carries `Type::Undetermined` and
/// every node's `env` holds the scope visible at that node's position.
pub struct Checker {
    env: Env,
}

impl Default for Checker {
    fn default() -> Self {
        Self::new()
    }
}

impl Checker {
    pub fn new() -> Self {
        Self { env: Env::new() }
    }

    pub fn check_program(&mut self, exprs: &mut [Expr]) -> Result<(), SemaError> {
        for expr in exprs {
            self.check_expr(expr)?;
        }
        Ok(())
    }

    fn check_expr(&mut self, expr: &mut Expr) -> Result<(), SemaError> {
        let span = expr.span;
        let declared = expr.ty;

        let ty = match &mut expr.kind {
            ExprKind::Literal(value) => {
                // The parser derives the type from the literal token, so a
                // mismatch here is a compiler bug.
                if declared != value.ty() {
                    return Err(SemaError::internal(
                        span,
                        format!(
                            "literal typed {} but value is {}",
                            declared.display(),
                            value.ty().display()
                        ),
                    ));
                }
                declared
            }

            ExprKind::CreateVar { name, init } => {
                if self.env.name_in_scope(name) {
                    return Err(SemaError::Name {
                        message: format!("variable {name} already created in this scope"),
                        span,
                    });
                }
                let name = name.clone();
                self.check_expr(init)?;
                expect_type(init.span, declared, init.ty)?;
                self.env.add_variable(&name, declared);
                declared
            }

            ExprKind::SetVar { name, value } => {
                expect_undetermined(span, declared, "SetVar")?;
                let var_ty = self.lookup_variable(span, name)?;
                self.check_expr(value)?;
                expect_type(value.span, var_ty, value.ty)?;
                var_ty
            }

            ExprKind::GetVar { name } => {
                expect_undetermined(span, declared, "GetVar")?;
                self.lookup_variable(span, name)?
            }

            ExprKind::Define {
                name,
                ret,
                params,
                body,
            } => {
                if self.env.name_in_scope(name) {
                    return Err(SemaError::Name {
                        message: format!("function {name} already defined in this scope"),
                        span,
                    });
                }

                // Register the signature before checking the body so
                // recursive calls resolve.
                let mut sig = vec![*ret];
                sig.extend(params.iter().map(|p| p.ty));
                self.env.add_function(name, sig);

                self.env.push_scope();
                for param in params.iter() {
                    self.env.add_variable(&param.name, param.ty);
                }

                for e in body.iter_mut() {
                    self.check_expr(e)?;
                }

                // The last body expression is the return value.
                let Some(last) = body.last() else {
                    return Err(SemaError::Syntax {
                        message: "expected body to have an expression to return".to_string(),
                        span,
                    });
                };
                expect_type(last.span, *ret, last.ty)?;

                self.pop_scope(span)?;
                Type::Unit
            }

            ExprKind::Call { name, args } => {
                expect_undetermined(span, declared, "Call")?;

                // print is variadic after its format string; the usual
                // arity/type checks do not apply.
                if name == "print" {
                    if args.is_empty() {
                        return Err(SemaError::Call {
                            message: "print() expected one or more arguments".to_string(),
                            span,
                        });
                    }
                    for arg in args.iter_mut() {
                        self.check_expr(arg)?;
                    }
                    expect_type(args[0].span, Type::String, args[0].ty)?;
                    Type::Unit
                } else {
                    let (ret, param_tys) = self
                        .env
                        .snapshot()
                        .lookup_function(span, name)
                        .map_err(SemaError::from_lookup)?;

                    if args.len() != param_tys.len() {
                        return Err(SemaError::Call {
                            message: format!(
                                "{name}() expected {} arguments but found {}",
                                param_tys.len(),
                                args.len()
                            ),
                            span,
                        });
                    }

                    for (arg, expected) in args.iter_mut().zip(param_tys) {
                        self.check_expr(arg)?;
                        expect_type(arg.span, expected, arg.ty)?;
                    }
                    ret
                }
            }

            ExprKind::If {
                cond,
                then_body,
                else_body,
            } => {
                expect_unit(span, declared, "If")?;
                self.check_expr(cond)?;

                self.env.push_scope();
                for e in then_body.iter_mut() {
                    self.check_expr(e)?;
                }
                self.pop_scope(span)?;

                self.env.push_scope();
                for e in else_body.iter_mut() {
                    self.check_expr(e)?;
                }
                self.pop_scope(span)?;

                Type::Unit
            }

            ExprKind::Loop {
                init,
                test,
                update,
                body,
            } => {
                expect_unit(span, declared, "Loop")?;
                self.check_expr(init)?;
                self.check_expr(test)?;
                self.check_expr(update)?;

                self.env.push_scope();
                for e in body.iter_mut() {
                    self.check_expr(e)?;
                }
                self.pop_scope(span)?;

                Type::Unit
            }

            ExprKind::List { name, elem, size } => {
                expect_undetermined(span, declared, "List")?;
                if self.env.name_in_scope(name) {
                    return Err(SemaError::Name {
                        message: format!("variable {name} already created in this scope"),
                        span,
                    });
                }

                self.check_expr(size)?;
                expect_type(size.span, Type::Int, size.ty)?;

                let Some(list_ty) = Type::list_of(*elem) else {
                    return Err(SemaError::Type {
                        message: format!("invalid list element type: {}", elem.display()),
                        span,
                    });
                };
                self.env.add_variable(name, list_ty);
                list_ty
            }

            ExprKind::ListAt { name, index } => {
                expect_undetermined(span, declared, "ListAt")?;
                let list_ty = self.lookup_variable(span, name)?;
                let Some(elem) = list_ty.elem() else {
                    return Err(SemaError::Type {
                        message: format!("expected list type but got {}", list_ty.display()),
                        span,
                    });
                };

                self.check_expr(index)?;
                expect_type(index.span, Type::Int, index.ty)?;
                elem
            }

            ExprKind::ListSet { name, index, value } => {
                expect_unit(span, declared, "ListSet")?;
                let list_ty = self.lookup_variable(span, name)?;
                let Some(elem) = list_ty.elem() else {
                    return Err(SemaError::Type {
                        message: format!("expected list type but got {}", list_ty.display()),
                        span,
                    });
                };

                self.check_expr(index)?;
                expect_type(index.span, Type::Int, index.ty)?;

                self.check_expr(value)?;
                expect_type(value.span, elem, value.ty)?;
                Type::Unit
            }

            ExprKind::PrimFunc { name, arg_types } => {
                if matches!(declared, Type::Undetermined | Type::Unit) {
                    return Err(SemaError::internal(
                        span,
                        format!(
                            "primitive function {name} has bad return type: {}",
                            declared.display()
                        ),
                    ));
                }
                let mut sig = vec![declared];
                sig.extend(arg_types.iter().copied());
                self.env.add_function(name, sig);
                declared
            }

            ExprKind::ParallelLoop { .. } => {
                return Err(SemaError::internal(
                    span,
                    "parallel loop encountered before analysis",
                ));
            }
        };

        expr.ty = ty;
        expr.env = Some(self.env.snapshot());
        Ok(())
    }

    fn lookup_variable(&self, span: Span, name: &str) -> Result<Type, SemaError> {
        self.env
            .snapshot()
            .lookup_variable(span, name)
            .map_err(SemaError::from_lookup)
    }

    fn pop_scope(&mut self, span: Span) -> Result<(), SemaError> {
        if !self.env.pop_scope() {
            return Err(SemaError::internal(
                span,
                "tried popping scope without previous scope",
            ));
        }
        Ok(())
    }
}

fn expect_type(span: Span, expected: Type, actual: Type) -> Result<(), SemaError> {
    if expected != actual {
        return Err(SemaError::Type {
            message: format!(
                "expected type {} but got type {}",
                expected.display(),
                actual.display()
            ),
            span,
        });
    }
    Ok(())
}

fn expect_undetermined(span: Span, ty: Type, what: &str) -> Result<(), SemaError> {
    if ty != Type::Undetermined {
        return Err(SemaError::internal(
            span,
            format!("expected {what} to have undetermined type"),
        ));
    }
    Ok(())
}

fn expect_unit(span: Span, ty: Type, what: &str) -> Result<(), SemaError> {
    if ty != Type::Unit {
        return Err(SemaError::internal(
            span,
            format!("expected {what} to have unit type"),
        ));
    }
    Ok(())
}
