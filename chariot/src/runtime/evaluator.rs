// Tree-walking evaluator for Chariot expressions

use crate::ast::{Expression, Literal};
use crate::runtime::environment::Scope;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::values::{CallContext, Closure, Value};
use crate::runtime::Runtime;
use std::sync::Arc;

/// Forms that receive their arguments unevaluated.
const SPECIAL_FORMS: &[&str] = &["setq", "declare", "declareGlobal"];

pub fn is_special_form(name: &str) -> bool {
    SPECIAL_FORMS.contains(&name)
}

pub(crate) fn eval_block(runtime: &Runtime, body: &[Expression], scope: &Scope) -> RuntimeResult<Value> {
    let mut last = Value::Nil;
    for expr in body {
        last = eval(runtime, expr, scope)?;
    }
    Ok(last)
}

pub(crate) fn eval(runtime: &Runtime, expr: &Expression, scope: &Scope) -> RuntimeResult<Value> {
    match expr {
        Expression::Literal(lit) => Ok(eval_literal(lit)),
        Expression::Identifier(name) => scope
            .get(name)
            .ok_or_else(|| RuntimeError::UndefinedSymbol(name.clone())),
        Expression::Function(def) => Ok(Value::Function(Arc::new(Closure::new(
            def.params.clone(),
            Arc::clone(&def.body),
            scope.clone(),
        )))),
        Expression::Call { name, args } => {
            if is_special_form(name) {
                return eval_special_form(runtime, name, args, scope);
            }
            eval_call(runtime, name, args, scope)
        }
    }
}

fn eval_literal(lit: &Literal) -> Value {
    match lit {
        Literal::Number(n) => Value::Number(*n),
        Literal::String(s) => Value::String(s.clone()),
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Nil => Value::Nil,
    }
}

fn eval_call(
    runtime: &Runtime,
    name: &str,
    args: &[Expression],
    scope: &Scope,
) -> RuntimeResult<Value> {
    // A function-valued variable shadows a builtin of the same name.
    let target = scope.get(name);
    let values = args
        .iter()
        .map(|arg| eval(runtime, arg, scope))
        .collect::<RuntimeResult<Vec<_>>>()?;

    match target {
        Some(Value::Function(closure)) => call_closure(runtime, &closure, values),
        Some(other) if runtime.builtin(name).is_none() => Err(RuntimeError::NotCallable(
            format!("{} ({})", name, other.type_name()),
        )),
        _ => match runtime.builtin(name) {
            Some(builtin) => {
                let ctx = CallContext { runtime, scope };
                builtin.invoke(&ctx, values)
            }
            None => Err(RuntimeError::UndefinedSymbol(name.to_string())),
        },
    }
}

fn eval_special_form(
    runtime: &Runtime,
    name: &str,
    args: &[Expression],
    scope: &Scope,
) -> RuntimeResult<Value> {
    let [target, value_expr] = args else {
        return Err(RuntimeError::ArityMismatch {
            function: name.to_string(),
            expected: "2".to_string(),
            actual: args.len(),
        });
    };
    let Some(var) = target.as_identifier() else {
        return Err(RuntimeError::type_error(name, "identifier", "expression"));
    };
    let value = eval(runtime, value_expr, scope)?;
    match name {
        "setq" => scope.assign(var, value.clone()),
        "declare" => scope.define(var, value.clone()),
        "declareGlobal" => runtime.globals().define(var, value.clone()),
        other => return Err(RuntimeError::UndefinedSymbol(other.to_string())),
    }
    Ok(value)
}

/// Calls a closure in a fresh frame under its captured scope. Parameters
/// without a matching argument are bound to nil; extra arguments are ignored.
pub(crate) fn call_closure(
    runtime: &Runtime,
    closure: &Closure,
    args: Vec<Value>,
) -> RuntimeResult<Value> {
    let frame = closure.scope.child();
    let mut args = args.into_iter();
    for param in &closure.params {
        frame.define(param.clone(), args.next().unwrap_or(Value::Nil));
    }
    eval_block(runtime, &closure.body, &frame)
}
