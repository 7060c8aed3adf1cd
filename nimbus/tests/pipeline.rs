//! End-to-end pipeline tests: parse, check, analyze, emit.

use nimbus_ast::{Expr, ExprKind};
use nimbus_backend_cuda::{emit_program, CudaArtifacts};
use nimbus_core::{analyze_program, parallel_loop_count, Checker};
use nimbus_parse::parse_source;

fn compile(src: &str) -> (Vec<Expr>, CudaArtifacts) {
    let mut exprs = parse_source(src).unwrap();
    Checker::new().check_program(&mut exprs).unwrap();
    let exprs = analyze_program(exprs).unwrap();
    let artifacts = emit_program("program", &exprs).unwrap();
    (exprs, artifacts)
}

#[test]
fn scaled_write_program_parallelizes() {
    let src = "(val int n (lit 1000)) \
               (val int k (lit 7)) \
               (list int data (lit 1000)) \
               (loop (val int i (lit 0)) (call < : (get i) (get n)) \
               (set i (call + : (get i) (lit 1))) do \
               (list_set data (get i) (call * : (get k) (get i)))) \
               (call print : (lit 'first = %d\\n') (list_at data (lit 0)))";
    let (exprs, artifacts) = compile(src);

    assert_eq!(parallel_loop_count(&exprs), 1);
    let parallel = exprs
        .iter()
        .find(|e| matches!(e.kind, ExprKind::ParallelLoop { .. }))
        .unwrap();
    let ExprKind::ParallelLoop { index, captured, .. } = &parallel.kind else {
        unreachable!();
    };
    assert_eq!(index, "i");
    assert!(captured.contains(&"n".to_string()));
    assert!(captured.contains(&"k".to_string()));
    assert!(captured.contains(&"data".to_string()));
    assert!(!captured.contains(&"i".to_string()));

    assert_eq!(artifacts.kernel_count, 1);
    assert!(artifacts
        .host_cpp
        .contains("cuda_loop1_kernel<<<nb_blocks, nb_threads>>>"));
    assert!(artifacts.device_cu.contains("data[i] = (k * i);"));
    assert!(artifacts.host_cpp.contains("printf(\"first = %d\\n\", data[0]);"));
}

#[test]
fn accumulator_program_stays_sequential() {
    let src = "(val int total (lit 0)) \
               (list int data (lit 100)) \
               (loop (val int i (lit 0)) (call < : (get i) (lit 100)) \
               (set i (call + : (get i) (lit 1))) do \
               (set total (call + : (get total) (list_at data (get i)))))";
    let (exprs, artifacts) = compile(src);

    assert_eq!(parallel_loop_count(&exprs), 0);
    assert_eq!(artifacts.kernel_count, 0);
    assert!(artifacts.host_cpp.contains("for (int i = 0;"));
    assert!(artifacts.device_cuh.is_empty());
}

#[test]
fn user_functions_survive_the_pipeline() {
    let src = "(define int clamp_add : int a int b : \
               (if (call > : (get a) (lit 100)) then (set a (lit 100)) else (set a (get a))) \
               (call + : (get a) (get b))) \
               (val int r (call clamp_add : (lit 40) (lit 2)))";
    let (_, artifacts) = compile(src);

    assert!(artifacts.host_hpp.contains("int clamp_add(int a, int b);"));
    assert!(artifacts.host_cpp.contains("return (a + b);"));
    assert!(artifacts.host_cpp.contains("int r = clamp_add(40, 2);"));
}

#[test]
fn diagnostics_carry_spans() {
    let src = "(val int x (lit 1)) (set y (lit 2))";
    let mut exprs = parse_source(src).unwrap();
    let err = Checker::new().check_program(&mut exprs).unwrap_err();
    assert!(err.to_string().contains("y does not exist"));
}
