#![forbid(unsafe_code)]

use nimbus_ast::{size_base, Expr, ExprKind};

use crate::error::SemaError;

/// Every function name invoked anywhere inside `expr`, in traversal order,
/// with duplicates.
///
/// Does not descend into the bodies of functions named by a `call`; only the
/// call sites visible in this subtree are reported.
pub fn deep_find_calls(expr: &Expr) -> Result<Vec<String>, SemaError> {
    let mut out = Vec::new();
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::GetVar { .. } | ExprKind::Define { .. } => {}

        ExprKind::PrimFunc { name, .. } => out.push(name.clone()),

        ExprKind::Call { name, args } => {
            out.push(name.clone());
            for arg in args {
                out.extend(deep_find_calls(arg)?);
            }
        }

        ExprKind::CreateVar { init, .. } => out.extend(deep_find_calls(init)?),
        ExprKind::SetVar { value, .. } => out.extend(deep_find_calls(value)?),

        ExprKind::If {
            cond,
            then_body,
            else_body,
        } => {
            out.extend(deep_find_calls(cond)?);
            for e in then_body.iter().chain(else_body) {
                out.extend(deep_find_calls(e)?);
            }
        }

        ExprKind::Loop {
            init,
            test,
            update,
            body,
        } => {
            out.extend(deep_find_calls(init)?);
            out.extend(deep_find_calls(test)?);
            out.extend(deep_find_calls(update)?);
            for e in body {
                out.extend(deep_find_calls(e)?);
            }
        }

        ExprKind::List { size, .. } => out.extend(deep_find_calls(size)?),
        ExprKind::ListAt { index, .. } => out.extend(deep_find_calls(index)?),
        ExprKind::ListSet { index, value, .. } => {
            out.extend(deep_find_calls(index)?);
            out.extend(deep_find_calls(value)?);
        }

        ExprKind::ParallelLoop { .. } => {
            return Err(SemaError::internal(
                expr.span,
                format!("unexpected {} in call analysis", expr.kind.tag()),
            ));
        }
    }
    Ok(out)
}

/// Every variable name written anywhere inside `expr`, in traversal order,
/// with duplicates. `set` contributes the scalar name; `list_set` contributes
/// the list name.
pub fn deep_find_sets(expr: &Expr) -> Result<Vec<String>, SemaError> {
    let mut out = Vec::new();
    match &expr.kind {
        ExprKind::Literal(_)
        | ExprKind::GetVar { .. }
        | ExprKind::Define { .. }
        | ExprKind::PrimFunc { .. } => {}

        ExprKind::SetVar { name, value } => {
            out.push(name.clone());
            out.extend(deep_find_sets(value)?);
        }

        ExprKind::ListSet { name, index, value } => {
            out.push(name.clone());
            out.extend(deep_find_sets(index)?);
            out.extend(deep_find_sets(value)?);
        }

        ExprKind::CreateVar { init, .. } => out.extend(deep_find_sets(init)?),

        ExprKind::Call { args, .. } => {
            for arg in args {
                out.extend(deep_find_sets(arg)?);
            }
        }

        ExprKind::If {
            cond,
            then_body,
            else_body,
        } => {
            out.extend(deep_find_sets(cond)?);
            for e in then_body.iter().chain(else_body) {
                out.extend(deep_find_sets(e)?);
            }
        }

        ExprKind::Loop {
            init,
            test,
            update,
            body,
        } => {
            out.extend(deep_find_sets(init)?);
            out.extend(deep_find_sets(test)?);
            out.extend(deep_find_sets(update)?);
            for e in body {
                out.extend(deep_find_sets(e)?);
            }
        }

        ExprKind::List { size, .. } => out.extend(deep_find_sets(size)?),
        ExprKind::ListAt { index, .. } => out.extend(deep_find_sets(index)?),

        ExprKind::ParallelLoop { .. } => {
            return Err(SemaError::internal(
                expr.span,
                format!("unexpected {} in write analysis", expr.kind.tag()),
            ));
        }
    }
    Ok(out)
}

/// Variables referenced inside `expr` that were not created inside it.
///
/// Returns `(used, created)`: `used` is order-preserving and deduplicated at
/// the top of each non-`if` subtree, `created` accumulates the names this
/// subtree introduced. A name like `a.size` counts as a use of `a`. Each `if`
/// branch tracks its own created set, so a variable created in one branch
/// does not mask a use in the other.
pub fn used_not_created(
    expr: &Expr,
    created: Vec<String>,
) -> Result<(Vec<String>, Vec<String>), SemaError> {
    let mut created = created;
    let mut used: Vec<String> = Vec::new();

    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::Define { .. } | ExprKind::PrimFunc { .. } => {}

        ExprKind::GetVar { name } => used.push(name.clone()),

        ExprKind::CreateVar { name, init } => {
            created.push(name.clone());
            let (u, c) = used_not_created(init, created)?;
            used.extend(u);
            created = c;
        }

        ExprKind::SetVar { name, value } => {
            let (u, c) = used_not_created(value, created)?;
            used.extend(u);
            created = c;
            used.push(name.clone());
        }

        ExprKind::Call { args, .. } => {
            for arg in args {
                let (u, c) = used_not_created(arg, created)?;
                used.extend(u);
                created = c;
            }
        }

        ExprKind::If {
            cond,
            then_body,
            else_body,
        } => {
            let (u, c) = used_not_created(cond, created)?;
            used.extend(u);
            created = c;

            // Branch-local creations must not leak into the sibling branch,
            // so each branch filters against its own copy of the created set
            // and the result bypasses the shared filter below. Handles the
            // case where one branch shadows an outer name the other branch
            // still reads.
            for branch in [then_body, else_body] {
                let mut branch_created = created.clone();
                for e in branch {
                    let (u, c) = used_not_created(e, branch_created)?;
                    branch_created = c;
                    for x in u {
                        if !branch_created.contains(&x) {
                            used.push(x);
                        }
                    }
                }
            }
            return Ok((used, created));
        }

        ExprKind::Loop {
            init,
            test,
            update,
            body,
        } => {
            for child in [init.as_ref(), test.as_ref(), update.as_ref()] {
                let (u, c) = used_not_created(child, created)?;
                used.extend(u);
                created = c;
            }
            for e in body {
                let (u, c) = used_not_created(e, created)?;
                used.extend(u);
                created = c;
            }
        }

        ExprKind::List { name, size, .. } => {
            created.push(name.clone());
            let (u, c) = used_not_created(size, created)?;
            used.extend(u);
            created = c;
        }

        ExprKind::ListAt { name, index } => {
            let (u, c) = used_not_created(index, created)?;
            used.extend(u);
            created = c;
            used.push(name.clone());
        }

        ExprKind::ListSet { name, index, value } => {
            for child in [index.as_ref(), value.as_ref()] {
                let (u, c) = used_not_created(child, created)?;
                used.extend(u);
                created = c;
            }
            used.push(name.clone());
        }

        ExprKind::ParallelLoop { .. } => {
            return Err(SemaError::internal(
                expr.span,
                format!("unexpected {} in capture analysis", expr.kind.tag()),
            ));
        }
    }

    let mut out = Vec::new();
    for x in used {
        let base = size_base(&x).to_string();
        if !created.contains(&base) && !out.contains(&base) {
            out.push(base);
        }
    }
    Ok((out, created))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_parse::parse_source;

    fn parse_one(src: &str) -> Expr {
        let mut exprs = parse_source(src).unwrap();
        assert_eq!(exprs.len(), nimbus_parse::prelude_len() + 1);
        exprs.pop().unwrap()
    }

    #[test]
    fn finds_nested_calls() {
        let expr = parse_one("(val int x (call + : (call rand :) (lit 1)))");
        let calls = deep_find_calls(&expr).unwrap();
        assert_eq!(calls, vec!["+", "rand"]);
    }

    #[test]
    fn finds_sets_through_loop() {
        let expr = parse_one(
            "(loop (set i (lit 0)) (call < : (get i) (lit 3)) \
             (set i (call + : (get i) (lit 1))) do \
             (list_set a (get i) (lit 0)) (set acc (lit 1)))",
        );
        let sets = deep_find_sets(&expr).unwrap();
        assert_eq!(sets, vec!["i", "i", "a", "acc"]);
    }

    #[test]
    fn call_does_not_descend_into_definitions() {
        let expr = parse_one("(define int f : : (call rand :))");
        assert!(deep_find_calls(&expr).unwrap().is_empty());
        assert!(deep_find_sets(&expr).unwrap().is_empty());
    }

    #[test]
    fn created_variables_are_not_reported_used() {
        let expr = parse_one(
            "(loop (val int i (lit 0)) (call < : (get i) (get n)) \
             (set i (call + : (get i) (lit 1))) do \
             (list_set a (get i) (get k)))",
        );
        let (used, created) = used_not_created(&expr, Vec::new()).unwrap();
        assert_eq!(used, vec!["n", "k", "a"]);
        assert_eq!(created, vec!["i"]);
    }

    #[test]
    fn size_suffix_maps_to_list_name() {
        let expr = parse_one("(set n (get a.size))");
        let (used, _) = used_not_created(&expr, Vec::new()).unwrap();
        assert_eq!(used, vec!["a", "n"]);
    }

    #[test]
    fn size_use_of_created_list_is_filtered() {
        let expr = parse_one(
            "(loop (val int i (lit 0)) (call < : (get i) (lit 3)) \
             (set i (call + : (get i) (lit 1))) do \
             (list int tmp (lit 4)) (set i (get tmp.size)))",
        );
        let (used, created) = used_not_created(&expr, Vec::new()).unwrap();
        assert_eq!(used, Vec::<String>::new());
        assert_eq!(created, vec!["i", "tmp"]);
    }

    #[test]
    fn branch_creation_does_not_mask_other_branch() {
        let expr = parse_one(
            "(if (call < : (get c) (lit 1)) then \
             (val int t (lit 0)) (set x (get t)) \
             else (set x (get t)))",
        );
        let (used, created) = used_not_created(&expr, Vec::new()).unwrap();
        // then-branch's t is filtered; else-branch's use of t survives. The
        // branch path skips the dedup filter, so the second x stays.
        assert_eq!(used, vec!["c", "x", "t", "x"]);
        assert!(created.is_empty());
    }
}
