#![forbid(unsafe_code)]

use nimbus_ast::{size_base, Expr, ExprKind, Type, Value};

use crate::dataflow::{deep_find_calls, deep_find_sets, used_not_created};
use crate::error::SemaError;

/// Rewrite every loop that passes the legality checks into a `ParallelLoop`.
///
/// Declining to parallelize is never an error; loops that fail any check are
/// returned unchanged (with their children analyzed instead).
pub fn analyze_program(exprs: Vec<Expr>) -> Result<Vec<Expr>, SemaError> {
    exprs.into_iter().map(analyze_expr).collect()
}

/// Number of `ParallelLoop` nodes in an analyzed program.
pub fn parallel_loop_count(exprs: &[Expr]) -> usize {
    fn count(expr: &Expr) -> usize {
        match &expr.kind {
            ExprKind::Literal(_)
            | ExprKind::GetVar { .. }
            | ExprKind::PrimFunc { .. } => 0,
            ExprKind::CreateVar { init, .. } => count(init),
            ExprKind::SetVar { value, .. } => count(value),
            ExprKind::Define { body, .. } => body.iter().map(count).sum(),
            ExprKind::Call { args, .. } => args.iter().map(count).sum(),
            ExprKind::If {
                cond,
                then_body,
                else_body,
            } => {
                count(cond)
                    + then_body.iter().map(count).sum::<usize>()
                    + else_body.iter().map(count).sum::<usize>()
            }
            ExprKind::Loop {
                init,
                test,
                update,
                body,
            } => {
                count(init) + count(test) + count(update) + body.iter().map(count).sum::<usize>()
            }
            ExprKind::ParallelLoop { body, .. } => 1 + body.iter().map(count).sum::<usize>(),
            ExprKind::List { size, .. } => count(size),
            ExprKind::ListAt { index, .. } => count(index),
            ExprKind::ListSet { index, value, .. } => count(index) + count(value),
        }
    }
    exprs.iter().map(count).sum()
}

fn analyze_expr(mut expr: Expr) -> Result<Expr, SemaError> {
    match expr.kind {
        ExprKind::Literal(_) | ExprKind::GetVar { .. } | ExprKind::PrimFunc { .. } => Ok(expr),

        ExprKind::CreateVar { name, init } => {
            expr.kind = ExprKind::CreateVar {
                name,
                init: Box::new(analyze_expr(*init)?),
            };
            Ok(expr)
        }

        ExprKind::SetVar { name, value } => {
            expr.kind = ExprKind::SetVar {
                name,
                value: Box::new(analyze_expr(*value)?),
            };
            Ok(expr)
        }

        ExprKind::Define {
            name,
            ret,
            params,
            body,
        } => {
            expr.kind = ExprKind::Define {
                name,
                ret,
                params,
                body: analyze_program(body)?,
            };
            Ok(expr)
        }

        ExprKind::Call { name, args } => {
            expr.kind = ExprKind::Call {
                name,
                args: analyze_program(args)?,
            };
            Ok(expr)
        }

        ExprKind::If {
            cond,
            then_body,
            else_body,
        } => {
            expr.kind = ExprKind::If {
                cond: Box::new(analyze_expr(*cond)?),
                then_body: analyze_program(then_body)?,
                else_body: analyze_program(else_body)?,
            };
            Ok(expr)
        }

        ExprKind::Loop { .. } => {
            // Try the loop as-is first; only on failure analyze its children
            // for inner parallelization opportunities.
            if let Some(parallel) = maybe_parallelize_loop(&expr)? {
                return Ok(parallel);
            }
            let ExprKind::Loop {
                init,
                test,
                update,
                body,
            } = expr.kind
            else {
                unreachable!()
            };
            expr.kind = ExprKind::Loop {
                init: Box::new(analyze_expr(*init)?),
                test: Box::new(analyze_expr(*test)?),
                update: Box::new(analyze_expr(*update)?),
                body: analyze_program(body)?,
            };
            Ok(expr)
        }

        ExprKind::List { name, elem, size } => {
            expr.kind = ExprKind::List {
                name,
                elem,
                size: Box::new(analyze_expr(*size)?),
            };
            Ok(expr)
        }

        ExprKind::ListAt { name, index } => {
            expr.kind = ExprKind::ListAt {
                name,
                index: Box::new(analyze_expr(*index)?),
            };
            Ok(expr)
        }

        ExprKind::ListSet { name, index, value } => {
            expr.kind = ExprKind::ListSet {
                name,
                index: Box::new(analyze_expr(*index)?),
                value: Box::new(analyze_expr(*value)?),
            };
            Ok(expr)
        }

        ExprKind::ParallelLoop { .. } => Err(SemaError::internal(
            expr.span,
            "parallel loop fed back into analysis",
        )),
    }
}

fn flip_inequality(op: &str) -> &str {
    match op {
        "<" => ">",
        ">" => "<",
        "<=" => ">=",
        ">=" => "<=",
        other => other,
    }
}

/// Check the legality conditions and build the `ParallelLoop` replacement.
///
/// `Ok(None)` means the loop stays sequential; it is never a diagnostic.
fn maybe_parallelize_loop(expr: &Expr) -> Result<Option<Expr>, SemaError> {
    let ExprKind::Loop {
        init,
        test,
        update,
        body,
    } = &expr.kind
    else {
        return Err(SemaError::internal(
            expr.span,
            format!("expected Loop in parallelization but got {}", expr.kind.tag()),
        ));
    };

    // rand() in parallel order gives different results than sequential order
    // even under a fixed seed.
    if deep_find_calls(expr)?.iter().any(|f| f == "rand") {
        return Ok(None);
    }

    let mut referenced: Vec<String> = Vec::new();

    // Canonical init: the index starts at a literal or a single outer
    // variable.
    let (index_name, init_val) = match &init.kind {
        ExprKind::CreateVar { name, init } => (name.clone(), init.as_ref()),
        ExprKind::SetVar { name, value } => (name.clone(), value.as_ref()),
        _ => return Ok(None),
    };
    match &init_val.kind {
        ExprKind::GetVar { name } => referenced.push(name.clone()),
        ExprKind::Literal(_) => {}
        _ => return Ok(None),
    }
    let mut start_expr = init_val.clone();

    // Canonical test: index compared against exactly one literal or one
    // other variable.
    let ExprKind::Call {
        name: test_op,
        args: test_args,
    } = &test.kind
    else {
        return Ok(None);
    };
    let mut test_op = test_op.as_str();
    if !matches!(test_op, "<" | "<=" | ">" | ">=" | "!=") {
        return Ok(None);
    }
    if test_args.len() != 2 {
        return Err(SemaError::internal(
            test.span,
            format!("comparison {test_op} with {} operands", test_args.len()),
        ));
    }

    let mut end_expr: Option<Expr> = None;
    let mut saw_literal = false;
    let mut test_var_names: [Option<String>; 2] = [None, None];
    for (i, arg) in test_args.iter().enumerate() {
        match &arg.kind {
            ExprKind::Literal(_) => {
                if saw_literal {
                    // Two literal operands make a degenerate comparison.
                    return Ok(None);
                }
                saw_literal = true;
                end_expr = Some(arg.clone());
            }
            ExprKind::GetVar { name } => {
                test_var_names[i] = Some(name.clone());
                if name != &index_name {
                    end_expr = Some(arg.clone());
                    referenced.push(name.clone());
                } else if i == 1 {
                    // `10 > i` reads as `i < 10`.
                    test_op = flip_inequality(test_op);
                }
            }
            _ => return Ok(None),
        }
    }

    let operand_count =
        usize::from(saw_literal) + test_var_names.iter().filter(|x| x.is_some()).count();
    if operand_count != 2 {
        return Ok(None);
    }
    if !test_var_names
        .iter()
        .any(|x| x.as_deref() == Some(index_name.as_str()))
    {
        return Ok(None);
    }
    let Some(mut end_expr) = end_expr else {
        return Ok(None);
    };

    // Canonical update: the index plus or minus a literal 1.
    let ExprKind::SetVar {
        name: update_name,
        value: update_val,
    } = &update.kind
    else {
        return Ok(None);
    };
    if update_name != &index_name {
        return Ok(None);
    }
    let ExprKind::Call {
        name: update_op,
        args: update_args,
    } = &update_val.kind
    else {
        return Ok(None);
    };
    let update_op = update_op.as_str();
    if !matches!(update_op, "+" | "-") {
        return Ok(None);
    }
    if update_args.len() != 2 {
        return Err(SemaError::internal(
            update.span,
            format!("operator {update_op} with {} operands", update_args.len()),
        ));
    }

    let mut step_val: Option<Value> = None;
    let mut step_var: Option<String> = None;
    for arg in update_args {
        match &arg.kind {
            ExprKind::GetVar { name } => step_var = Some(name.clone()),
            ExprKind::Literal(v) => step_val = Some(v.clone()),
            _ => {}
        }
    }
    let (Some(step_val), Some(step_var)) = (step_val, step_var) else {
        return Ok(None);
    };
    if step_var != index_name {
        return Ok(None);
    }
    // Rule out updates like i = 1 - i.
    if update_op == "-" && !matches!(update_args[0].kind, ExprKind::GetVar { .. }) {
        return Ok(None);
    }
    // TODO: allow strides larger than 1.
    if step_val != Value::Int(1) {
        return Ok(None);
    }

    // Normalize to a half-open ascending range. An inclusive upper bound
    // moves the end up by one; an inclusive lower bound on a descending loop
    // moves the start up by one since the start becomes the end after the
    // swap below.
    if test_op == "<=" && update_op == "+" {
        end_expr = add_one(end_expr);
    } else if test_op == ">=" && update_op == "-" {
        start_expr = add_one(start_expr);
    }
    if update_op == "-" {
        std::mem::swap(&mut start_expr, &mut end_expr);
    }

    // A body that rewrites its own index has no statically known per-thread
    // iteration count.
    let mut body_sets = Vec::new();
    for e in body {
        body_sets.extend(deep_find_sets(e)?);
    }
    if body_sets.contains(&index_name) {
        return Ok(None);
    }

    // A scalar both read and written by the body would need cross-iteration
    // synchronization. Lists pass here; slot-level races are not checked.
    let (mut used, _) = used_not_created(expr, Vec::new())?;
    let Some(env) = &expr.env else {
        return Err(SemaError::internal(
            expr.span,
            "loop is missing its environment snapshot",
        ));
    };
    for x in &used {
        if body_sets.contains(x) {
            let ty = env
                .lookup_variable(expr.span, x)
                .map_err(SemaError::from_lookup)?;
            if ty.is_scalar() {
                return Ok(None);
            }
        }
    }

    // The capture set: body uses plus any variables the bounds reference,
    // size suffixes stripped, first-appearance order, index excluded.
    for var in referenced {
        let base = size_base(&var).to_string();
        if !used.contains(&base) {
            used.push(base);
        }
    }
    used.retain(|x| x != &index_name);

    Ok(Some(Expr {
        span: expr.span,
        ty: Type::Unit,
        env: expr.env.clone(),
        kind: ExprKind::ParallelLoop {
            index: index_name,
            start: Box::new(start_expr),
            end: Box::new(end_expr),
            captured: used,
            body: body.clone(),
        },
    }))
}

/// `bound + 1`, typed int.
fn add_one(bound: Expr) -> Expr {
    let span = bound.span;
    let one = Expr::with_type(span, Type::Int, ExprKind::Literal(Value::Int(1)));
    Expr::with_type(
        span,
        Type::Int,
        ExprKind::Call {
            name: "+".to_string(),
            args: vec![bound, one],
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::Checker;
    use nimbus_parse::parse_source;

    fn analyze(src: &str) -> Vec<Expr> {
        let mut exprs = parse_source(src).unwrap();
        Checker::new().check_program(&mut exprs).unwrap();
        analyze_program(exprs).unwrap()
    }

    fn analyze_user(src: &str) -> Vec<Expr> {
        analyze(src)
            .into_iter()
            .skip(nimbus_parse::prelude_len())
            .collect()
    }

    const SAXPY_LIKE: &str = "(val int n (lit 100)) \
         (val int k (lit 3)) \
         (list int a (lit 100)) \
         (loop (val int i (lit 0)) (call < : (get i) (get n)) \
         (set i (call + : (get i) (lit 1))) do \
         (list_set a (get i) (call * : (get k) (get i))))";

    fn as_parallel(expr: &Expr) -> (&str, &Expr, &Expr, &[String]) {
        let ExprKind::ParallelLoop {
            index,
            start,
            end,
            captured,
            ..
        } = &expr.kind
        else {
            panic!("expected ParallelLoop, got {}", expr.kind.tag());
        };
        (index, start, end, captured)
    }

    #[test]
    fn parallelizes_canonical_loop() {
        let exprs = analyze_user(SAXPY_LIKE);
        let (index, start, end, captured) = as_parallel(&exprs[3]);
        assert_eq!(index, "i");
        assert!(matches!(
            &start.kind,
            ExprKind::Literal(Value::Int(0))
        ));
        assert!(matches!(&end.kind, ExprKind::GetVar { name } if name == "n"));
        // n from the test bound, then k and a in body order.
        assert_eq!(captured, ["n", "k", "a"]);
        assert_eq!(parallel_loop_count(&exprs), 1);
    }

    #[test]
    fn rejects_rand_in_body() {
        let src = "(list int a (lit 8)) \
             (loop (val int i (lit 0)) (call < : (get i) (lit 8)) \
             (set i (call + : (get i) (lit 1))) do \
             (list_set a (get i) (call rand :)))";
        let exprs = analyze_user(src);
        assert_eq!(parallel_loop_count(&exprs), 0);
    }

    #[test]
    fn rejects_scalar_accumulation() {
        let src = "(val int acc (lit 0)) \
             (loop (val int i (lit 0)) (call < : (get i) (lit 8)) \
             (set i (call + : (get i) (lit 1))) do \
             (set acc (call + : (get acc) (get i))))";
        let exprs = analyze_user(src);
        assert_eq!(parallel_loop_count(&exprs), 0);
    }

    #[test]
    fn rejects_index_mutation_in_body() {
        let src = "(list int a (lit 8)) \
             (loop (val int i (lit 0)) (call < : (get i) (lit 8)) \
             (set i (call + : (get i) (lit 1))) do \
             (set i (lit 0)) (list_set a (get i) (lit 1)))";
        let exprs = analyze_user(src);
        assert_eq!(parallel_loop_count(&exprs), 0);
    }

    #[test]
    fn rejects_non_unit_stride() {
        let src = "(list int a (lit 8)) \
             (loop (val int i (lit 0)) (call < : (get i) (lit 8)) \
             (set i (call + : (get i) (lit 2))) do \
             (list_set a (get i) (lit 1)))";
        let exprs = analyze_user(src);
        assert_eq!(parallel_loop_count(&exprs), 0);
    }

    #[test]
    fn rejects_two_literal_comparison() {
        let src = "(list int a (lit 8)) \
             (loop (val int i (lit 0)) (call < : (lit 0) (lit 8)) \
             (set i (call + : (get i) (lit 1))) do \
             (list_set a (get i) (lit 1)))";
        let exprs = analyze_user(src);
        assert_eq!(parallel_loop_count(&exprs), 0);
    }

    #[test]
    fn accepts_not_equal_test() {
        let src = "(list int a (lit 8)) \
             (loop (val int i (lit 0)) (call != : (get i) (lit 8)) \
             (set i (call + : (get i) (lit 1))) do \
             (list_set a (get i) (lit 1)))";
        let exprs = analyze_user(src);
        let (_, start, end, _) = as_parallel(&exprs[1]);
        // No inclusive-bound adjustment applies to !=.
        assert!(matches!(&start.kind, ExprKind::Literal(Value::Int(0))));
        assert!(matches!(&end.kind, ExprKind::Literal(Value::Int(8))));
    }

    #[test]
    fn flips_reversed_comparison() {
        let src = "(list int a (lit 8)) \
             (loop (val int i (lit 0)) (call > : (lit 8) (get i)) \
             (set i (call + : (get i) (lit 1))) do \
             (list_set a (get i) (lit 1)))";
        let exprs = analyze_user(src);
        let (_, start, end, _) = as_parallel(&exprs[1]);
        assert!(matches!(&start.kind, ExprKind::Literal(Value::Int(0))));
        assert!(matches!(&end.kind, ExprKind::Literal(Value::Int(8))));
    }

    #[test]
    fn inclusive_bound_extends_end() {
        let src = "(list int a (lit 9)) \
             (loop (val int i (lit 0)) (call <= : (get i) (lit 8)) \
             (set i (call + : (get i) (lit 1))) do \
             (list_set a (get i) (lit 1)))";
        let exprs = analyze_user(src);
        let (_, _, end, _) = as_parallel(&exprs[1]);
        let ExprKind::Call { name, args } = &end.kind else {
            panic!("expected adjusted bound");
        };
        assert_eq!(name, "+");
        assert!(matches!(&args[0].kind, ExprKind::Literal(Value::Int(8))));
        assert!(matches!(&args[1].kind, ExprKind::Literal(Value::Int(1))));
    }

    #[test]
    fn descending_loop_swaps_bounds() {
        let src = "(list int a (lit 9)) \
             (loop (val int i (lit 8)) (call >= : (get i) (lit 0)) \
             (set i (call - : (get i) (lit 1))) do \
             (list_set a (get i) (lit 1)))";
        let exprs = analyze_user(src);
        let (_, start, end, _) = as_parallel(&exprs[1]);
        // i runs 8 down to 0 inclusive, so the ascending range is [0, 8+1).
        assert!(matches!(&start.kind, ExprKind::Literal(Value::Int(0))));
        let ExprKind::Call { name, args } = &end.kind else {
            panic!("expected adjusted bound as new end");
        };
        assert_eq!(name, "+");
        assert!(matches!(&args[0].kind, ExprKind::Literal(Value::Int(8))));
        assert!(matches!(&args[1].kind, ExprKind::Literal(Value::Int(1))));
    }

    #[test]
    fn capture_excludes_index_and_strips_size() {
        let src = "(list int a (lit 8)) \
             (loop (set j (lit 0)) (call < : (get j) (get a.size)) \
             (set j (call + : (get j) (lit 1))) do \
             (list_set a (get j) (lit 1)))";
        let mut exprs = parse_source(&format!("(val int j (lit 0)) {src}")).unwrap();
        Checker::new().check_program(&mut exprs).unwrap();
        let exprs = analyze_program(exprs).unwrap();
        let expr = &exprs[nimbus_parse::prelude_len() + 2];
        let (index, _, _, captured) = as_parallel(expr);
        assert_eq!(index, "j");
        assert_eq!(captured, ["a"]);
    }

    #[test]
    fn nested_loop_parallelizes_outer_only() {
        // The outer loop is canonical; once rewritten its inner loop stays
        // sequential inside the kernel body.
        let src = "(list int a (lit 8)) \
             (loop (val int i (lit 0)) (call < : (get i) (lit 8)) \
             (set i (call + : (get i) (lit 1))) do \
             (loop (val int j (lit 0)) (call < : (get j) (lit 8)) \
             (set j (call + : (get j) (lit 1))) do \
             (list_set a (get j) (get i))))";
        let exprs = analyze_user(src);
        let (_, _, _, captured) = as_parallel(&exprs[1]);
        assert_eq!(captured, ["a"]);
        assert_eq!(parallel_loop_count(&exprs), 1);
    }

    #[test]
    fn inner_loop_parallelizes_when_outer_cannot() {
        let src = "(list int a (lit 8)) \
             (loop (val int t (lit 0)) (call < : (call + : (get t) (lit 0)) (lit 4)) \
             (set t (call + : (get t) (lit 1))) do \
             (loop (val int i (lit 0)) (call < : (get i) (lit 8)) \
             (set i (call + : (get i) (lit 1))) do \
             (list_set a (get i) (get t))))";
        let exprs = analyze_user(src);
        // The outer test is not a canonical comparison, so only the inner
        // loop is rewritten.
        assert!(matches!(exprs[1].kind, ExprKind::Loop { .. }));
        assert_eq!(parallel_loop_count(&exprs), 1);
    }
}
