// Chariot Standard Library
//
// Arithmetic, comparison, logic and a handful of collection helpers. Every
// builtin is registered with an explicit arity; the runtime checks it before
// the function body runs.

use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::values::{Arity, BuiltinFunction, CallContext, Value};
use crate::runtime::Runtime;
use indexmap::IndexMap;
use itertools::Itertools;
use std::time::Duration;

pub struct StandardLibrary;

impl StandardLibrary {
    pub fn load(runtime: &Runtime) {
        Self::load_arithmetic_functions(runtime);
        Self::load_comparison_functions(runtime);
        Self::load_logic_functions(runtime);
        Self::load_collection_functions(runtime);
        Self::load_host_functions(runtime);
    }

    fn load_arithmetic_functions(runtime: &Runtime) {
        runtime.register_builtin(BuiltinFunction::new("add", Arity::Variadic(0), Self::add));
        runtime.register_builtin(BuiltinFunction::new("sub", Arity::Variadic(1), |_, args| {
            Self::fold_numbers("sub", args, |a, b| Ok(a - b)).map(Value::Number)
        }));
        runtime.register_builtin(BuiltinFunction::new("mul", Arity::Variadic(0), |_, args| {
            if args.is_empty() {
                return Ok(Value::Number(1.0));
            }
            Self::fold_numbers("mul", args, |a, b| Ok(a * b)).map(Value::Number)
        }));
        runtime.register_builtin(BuiltinFunction::new("div", Arity::Variadic(2), |_, args| {
            Self::fold_numbers("div", args, |a, b| {
                if b == 0.0 {
                    Err(RuntimeError::DivisionByZero)
                } else {
                    Ok(a / b)
                }
            })
            .map(Value::Number)
        }));
    }

    fn load_comparison_functions(runtime: &Runtime) {
        runtime.register_builtin(BuiltinFunction::new("equal", Arity::Fixed(2), |_, args| {
            Ok(Value::Boolean(args[0] == args[1]))
        }));
        runtime.register_builtin(BuiltinFunction::new("bigger", Arity::Fixed(2), |_, args| {
            Self::compare("bigger", &args[0], &args[1]).map(|o| Value::Boolean(o.is_gt()))
        }));
        runtime.register_builtin(BuiltinFunction::new("smaller", Arity::Fixed(2), |_, args| {
            Self::compare("smaller", &args[0], &args[1]).map(|o| Value::Boolean(o.is_lt()))
        }));
    }

    fn load_logic_functions(runtime: &Runtime) {
        runtime.register_builtin(BuiltinFunction::new("and", Arity::Variadic(0), |_, args| {
            Ok(Value::Boolean(args.iter().all(Value::as_condition)))
        }));
        runtime.register_builtin(BuiltinFunction::new("or", Arity::Variadic(0), |_, args| {
            Ok(Value::Boolean(args.iter().any(Value::as_condition)))
        }));
        runtime.register_builtin(BuiltinFunction::new("not", Arity::Fixed(1), |_, args| {
            Ok(Value::Boolean(!args[0].as_condition()))
        }));
    }

    fn load_collection_functions(runtime: &Runtime) {
        runtime.register_builtin(BuiltinFunction::new("array", Arity::Variadic(0), |_, args| {
            Ok(Value::Array(args))
        }));
        runtime.register_builtin(BuiltinFunction::new("map", Arity::Variadic(0), Self::map));
        runtime.register_builtin(BuiltinFunction::new("len", Arity::Fixed(1), |_, args| {
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Map(map) => map.len(),
                Value::Nil => 0,
                other => return Err(RuntimeError::type_error("len", "collection", other.type_name())),
            };
            Ok(Value::Number(n as f64))
        }));
        runtime.register_builtin(BuiltinFunction::new("getProp", Arity::Range(2, 3), |_, args| {
            let default = args.get(2).cloned().unwrap_or(Value::Nil);
            match (&args[0], &args[1]) {
                (Value::Map(map), Value::String(key)) => {
                    Ok(map.get(key).cloned().unwrap_or(default))
                }
                (Value::Array(items), Value::Number(idx)) if *idx >= 0.0 => {
                    Ok(items.get(*idx as usize).cloned().unwrap_or(default))
                }
                (target, _) => Err(RuntimeError::type_error(
                    "getProp",
                    "map or array",
                    target.type_name(),
                )),
            }
        }));
    }

    fn load_host_functions(runtime: &Runtime) {
        runtime.register_builtin(BuiltinFunction::new(
            "getVariable",
            Arity::Range(1, 2),
            |ctx: &CallContext<'_>, args| {
                let name = args[0]
                    .as_str()
                    .ok_or_else(|| RuntimeError::type_error("getVariable", "string", args[0].type_name()))?;
                Ok(ctx
                    .scope
                    .get(name)
                    .or_else(|| args.get(1).cloned())
                    .unwrap_or(Value::Nil))
            },
        ));
        runtime.register_builtin(BuiltinFunction::new("logPrint", Arity::Variadic(0), |_, args| {
            let line = args.iter().join(" ");
            tracing::info!(target: "chariot::script", "{}", line);
            Ok(Value::String(line))
        }));
        runtime.register_builtin(BuiltinFunction::new("sleep", Arity::Fixed(1), |_, args| {
            match args[0].as_number() {
                Some(ms) if ms >= 0.0 => {
                    std::thread::sleep(Duration::from_millis(ms as u64));
                    Ok(Value::Nil)
                }
                _ => Err(RuntimeError::InvalidArgument(format!(
                    "sleep expects a non-negative number of milliseconds, got {}",
                    args[0]
                ))),
            }
        }));
    }

    fn add(_ctx: &CallContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
        if args.iter().any(|v| matches!(v, Value::String(_))) {
            return Ok(Value::String(args.iter().join("")));
        }
        if args.is_empty() {
            return Ok(Value::Number(0.0));
        }
        Self::fold_numbers("add", args, |a, b| Ok(a + b)).map(Value::Number)
    }

    fn map(_ctx: &CallContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
        if args.len() % 2 != 0 {
            return Err(RuntimeError::InvalidArgument(
                "map expects key/value pairs".to_string(),
            ));
        }
        let mut map = IndexMap::new();
        for (key, value) in args.into_iter().tuples() {
            match key {
                Value::String(k) => {
                    map.insert(k, value);
                }
                other => return Err(RuntimeError::type_error("map", "string key", other.type_name())),
            }
        }
        Ok(Value::Map(map))
    }

    fn fold_numbers<F>(op: &str, args: Vec<Value>, f: F) -> RuntimeResult<f64>
    where
        F: Fn(f64, f64) -> RuntimeResult<f64>,
    {
        let mut numbers = args.into_iter().map(|v| match v {
            Value::Number(n) => Ok(n),
            other => Err(RuntimeError::type_error(op, "number", other.type_name())),
        });
        let first = match numbers.next() {
            Some(n) => n?,
            None => return Ok(0.0),
        };
        // `sub(x)` negates, mirroring the usual unary minus.
        let mut rest = numbers.peekable();
        if op == "sub" && rest.peek().is_none() {
            return Ok(-first);
        }
        rest.try_fold(first, |acc, n| f(acc, n?))
    }

    fn compare(op: &str, a: &Value, b: &Value) -> RuntimeResult<std::cmp::Ordering> {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => x
                .partial_cmp(y)
                .ok_or_else(|| RuntimeError::InvalidArgument(format!("{} cannot order NaN", op))),
            (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
            (x, y) => Err(RuntimeError::type_error(
                op,
                "two numbers or two strings",
                &format!("{} and {}", x.type_name(), y.type_name()),
            )),
        }
    }
}
