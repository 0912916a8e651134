use chariot::runtime::{Arity, BuiltinFunction, Runtime, RuntimeError, Value};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn setq_updates_the_defining_scope_from_inside_a_closure() {
    let rt = Runtime::new();
    rt.run_source(
        "setq(counter, 0)
         declare(bump, func() { setq(counter, add(counter, 1)) })
         bump(); bump()",
    )
    .unwrap();
    assert_eq!(rt.get_variable("counter"), Some(Value::Number(2.0)));
}

#[test]
fn declare_inside_a_closure_stays_local() {
    let rt = Runtime::new();
    rt.run_source(
        "declare(f, func() { declare(tmp, 1); declareGlobal(seen, True) })
         f()",
    )
    .unwrap();
    assert_eq!(rt.get_variable("tmp"), None);
    assert_eq!(rt.get_variable("seen"), Some(Value::Boolean(true)));
}

#[test]
fn closure_parameters_default_to_nil() {
    let rt = Runtime::new();
    let result = rt
        .run_source("declare(pick, func(a, b) { b }); pick(1)")
        .unwrap();
    assert_eq!(result, Value::Nil);
}

#[test]
fn function_variables_shadow_builtins() {
    let rt = Runtime::new();
    let result = rt
        .run_source("declare(add, func(a, b) { 'shadowed' }); add(1, 2)")
        .unwrap();
    assert_eq!(result, Value::String("shadowed".to_string()));
}

#[test]
fn unknown_calls_and_symbols_are_errors() {
    let rt = Runtime::new();
    assert_eq!(
        rt.run_source("nope(1)"),
        Err(RuntimeError::UndefinedSymbol("nope".to_string()))
    );
    assert_eq!(
        rt.run_source("add(missing, 1)"),
        Err(RuntimeError::UndefinedSymbol("missing".to_string()))
    );
    assert!(matches!(
        rt.run_source("setq(x, 1); x(2)"),
        Err(RuntimeError::NotCallable(_))
    ));
}

#[test]
fn execute_in_scope_runs_the_body_against_the_given_frame() {
    let rt = Runtime::new();
    let step = rt.run_source("func() { setq(hits, add(hits, 1)) }").unwrap();
    let closure = step.as_function().unwrap().clone();

    let frame = rt.globals().child();
    frame.define("hits", Value::Number(41.0));
    rt.execute_in_scope(&closure, &frame).unwrap();

    assert_eq!(frame.get("hits"), Some(Value::Number(42.0)));
    assert_eq!(rt.get_variable("hits"), None);
}

#[test]
fn clone_runtime_isolates_globals_and_rebinds_closures() {
    let rt = Runtime::new();
    rt.run_source("setq(x, 1); declare(incr, func() { setq(x, add(x, 1)) })")
        .unwrap();

    let copy = rt.clone_runtime();
    copy.run_source("incr(); incr()").unwrap();

    assert_eq!(copy.get_variable("x"), Some(Value::Number(3.0)));
    assert_eq!(rt.get_variable("x"), Some(Value::Number(1.0)));

    rt.set_global("x", Value::Number(10.0));
    assert_eq!(copy.get_variable("x"), Some(Value::Number(3.0)));
}

#[test]
fn host_builtins_receive_the_calling_scope() {
    let rt = Runtime::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    rt.register_builtin(BuiltinFunction::new(
        "whoami",
        Arity::Fixed(0),
        move |ctx, _args| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(ctx.scope.get("me").unwrap_or(Value::Nil))
        },
    ));

    let result = rt
        .run_source("declare(f, func(me) { whoami() }); f('agent-1')")
        .unwrap();
    assert_eq!(result, Value::String("agent-1".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn parse_errors_surface_as_runtime_errors() {
    let rt = Runtime::new();
    assert!(matches!(rt.run_source("add(1,"), Err(RuntimeError::Parse(_))));
}
