//! Script-level plan and agent functions for `chariot::Runtime`.
//!
//! Plans and agents travel through scripts as host objects (`"plan"` and
//! `"agent"`). Named-agent functions talk to the [`ScriptRegistry`] passed to
//! [`register_plan_functions`]; the runtime only keeps a weak reference so the
//! registry's lifetime stays with its owner.

use crate::agent::Agent;
use crate::config::MAX_COUNT;
use crate::error::AgentError;
use crate::execution::RunMode;
use crate::plan::Plan;
use crate::registry::AgentRegistry;
use chariot::runtime::{
    Arity, BuiltinFunction, CallContext, Closure, HostObject, Runtime, RuntimeError,
    RuntimeResult, Value,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

pub type ScriptPlan = Plan<Runtime>;
pub type ScriptAgent = Agent<Runtime>;
pub type ScriptRegistry = AgentRegistry<Runtime>;

pub const PLAN_KIND: &str = "plan";
pub const AGENT_KIND: &str = "agent";

/// Registers `plan`, the `agent*` family and the `runPlanOnce*` family.
pub fn register_plan_functions(runtime: &Runtime, registry: &Arc<ScriptRegistry>) {
    let weak = Arc::downgrade(registry);

    runtime.register_builtin(BuiltinFunction::new("plan", Arity::Fixed(6), plan_fn));
    register_agent_handles(runtime, &weak);
    register_one_shot_runs(runtime, &weak);
    register_named_agents(runtime, &weak);
}

fn upgrade(registry: &Weak<ScriptRegistry>, function: &str) -> RuntimeResult<Arc<ScriptRegistry>> {
    registry
        .upgrade()
        .ok_or_else(|| RuntimeError::host(function, "agent registry has been dropped"))
}

fn plan_fn(_ctx: &CallContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    const F: &str = "plan";
    let name = expect_name(F, "name", &args[0])?;
    let params = match &args[1] {
        Value::Nil => Vec::new(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(RuntimeError::type_error(F, "array of strings", other.type_name())),
            })
            .collect::<RuntimeResult<Vec<_>>>()?,
        other => return Err(RuntimeError::type_error(F, "params array", other.type_name())),
    };
    let trigger = optional_closure(F, "trigger", &args[2])?;
    let guard = optional_closure(F, "guard", &args[3])?;
    let steps = match &args[4] {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Function(closure) => Ok(Arc::clone(closure)),
                other => Err(RuntimeError::type_error(F, "array of step functions", other.type_name())),
            })
            .collect::<RuntimeResult<Vec<_>>>()?,
        other => return Err(RuntimeError::type_error(F, "steps array", other.type_name())),
    };
    let drop = optional_closure(F, "drop", &args[5])?;

    let plan = ScriptPlan::new(name)
        .with_params(params)
        .with_trigger(trigger)
        .with_guard(guard)
        .with_steps(steps)
        .with_drop(drop);
    Ok(Value::Host(HostObject::new(PLAN_KIND, plan)))
}

fn register_agent_handles(runtime: &Runtime, weak: &Weak<ScriptRegistry>) {
    let registry = weak.clone();
    runtime.register_builtin(BuiltinFunction::new(
        "agentNew",
        Arity::Range(0, 2),
        move |ctx, args| {
            const F: &str = "agentNew";
            let registry = upgrade(&registry, F)?;
            let defaults = registry.config();
            let max = positive_count(F, "maxConcurrent", args.first(), defaults.max_concurrent)?;
            let poll = positive_count(F, "pollSeconds", args.get(1), defaults.poll_seconds as usize)?;
            let agent = Agent::build(
                String::new(),
                ctx.runtime.clone(),
                max,
                Duration::from_secs(poll as u64),
                defaults.nudge_capacity,
                registry.events().clone(),
            );
            Ok(Value::Host(HostObject::new(AGENT_KIND, agent)))
        },
    ));

    runtime.register_builtin(BuiltinFunction::new(
        "agentRegister",
        Arity::Fixed(2),
        |_, args| {
            let agent = expect_agent("agentRegister", &args[0])?;
            let plan = expect_plan("agentRegister", &args[1])?;
            agent.register(plan.clone());
            Ok(Value::Boolean(true))
        },
    ));

    runtime.register_builtin(BuiltinFunction::new(
        "agentStart",
        Arity::Fixed(1),
        |_, args| {
            let agent = expect_agent("agentStart", &args[0])?;
            agent.start().map_err(|e| agent_error("agentStart", e))?;
            Ok(Value::Boolean(true))
        },
    ));

    runtime.register_builtin(BuiltinFunction::new(
        "agentStop",
        Arity::Fixed(1),
        |_, args| {
            expect_agent("agentStop", &args[0])?.stop();
            Ok(Value::Boolean(true))
        },
    ));
}

fn register_one_shot_runs(runtime: &Runtime, weak: &Weak<ScriptRegistry>) {
    let registry = weak.clone();
    runtime.register_builtin(BuiltinFunction::new(
        "runPlanOnce",
        Arity::Fixed(1),
        move |ctx, args| {
            const F: &str = "runPlanOnce";
            let registry = upgrade(&registry, F)?;
            let plan = expect_plan(F, &args[0])?;
            // Same runtime as the caller: step side effects on globals are visible.
            let agent = Agent::new("", ctx.runtime.clone(), 1, Duration::ZERO, registry.events().clone());
            agent
                .run_plan_once(plan)
                .map_err(|e| RuntimeError::host(F, format!("plan failed: {}", e)))?;
            Ok(Value::Boolean(true))
        },
    ));

    let registry = weak.clone();
    runtime.register_builtin(BuiltinFunction::new(
        "runPlanOnceBDI",
        Arity::Range(1, 2),
        move |ctx, args| {
            const F: &str = "runPlanOnceBDI";
            let registry = upgrade(&registry, F)?;
            let plan = expect_plan(F, &args[0])?;
            let vars = instance_vars(F, args.get(1))?;
            run_isolated(ctx.runtime, &registry, plan, vars, RunMode::Bdi)
                .map_err(|e| agent_error(F, e))
        },
    ));

    let registry = weak.clone();
    runtime.register_builtin(BuiltinFunction::new(
        "runPlanOnceEx",
        Arity::Range(1, 3),
        move |ctx, args| {
            const F: &str = "runPlanOnceEx";
            let registry = upgrade(&registry, F)?;
            let plan = expect_plan(F, &args[0])?;
            let (mode, vars_arg) = match args.get(1) {
                Some(Value::String(mode)) => (RunMode::parse_lenient(mode), args.get(2)),
                Some(_) if args.len() == 3 => {
                    return Err(RuntimeError::type_error(F, "mode string", args[1].type_name()))
                }
                other => (RunMode::Bdi, other),
            };
            let vars = instance_vars(F, vars_arg)?;
            run_isolated(ctx.runtime, &registry, plan, vars, mode).map_err(|e| agent_error(F, e))
        },
    ));
}

/// One instance on a private copy of `runtime`, so the run cannot disturb the caller.
fn run_isolated(
    runtime: &Runtime,
    registry: &ScriptRegistry,
    plan: &ScriptPlan,
    vars: Vec<(String, Value)>,
    mode: RunMode,
) -> Result<Value, AgentError> {
    let isolated = runtime.clone_runtime();
    let plan = plan.rebind(&isolated);
    let agent = Agent::new("", isolated, 1, Duration::ZERO, registry.events().clone());
    agent
        .run_plan_once_with_options(&plan, vars, mode)
        .map(Value::Boolean)
}

fn register_named_agents(runtime: &Runtime, weak: &Weak<ScriptRegistry>) {
    let registry = weak.clone();
    runtime.register_builtin(BuiltinFunction::new(
        "agentStartNamed",
        Arity::Range(2, 4),
        move |ctx, args| {
            const F: &str = "agentStartNamed";
            let registry = upgrade(&registry, F)?;
            let name = expect_name(F, "name", &args[0])?;
            let plan = expect_plan(F, &args[1])?;
            let defaults = registry.config();
            let max = positive_count(F, "maxConcurrent", args.get(2), defaults.max_concurrent)?;
            let poll = positive_count(F, "pollSeconds", args.get(3), defaults.poll_seconds as usize)?;
            registry
                .start(name, ctx.runtime, plan, max, Duration::from_secs(poll as u64))
                .map_err(|e| agent_error(F, e))?;
            Ok(Value::Boolean(true))
        },
    ));

    let registry = weak.clone();
    runtime.register_builtin(BuiltinFunction::new(
        "agentStopNamed",
        Arity::Fixed(1),
        move |_, args| {
            const F: &str = "agentStopNamed";
            let name = expect_name(F, "name", &args[0])?;
            Ok(Value::Boolean(upgrade(&registry, F)?.stop(name)))
        },
    ));

    let registry = weak.clone();
    runtime.register_builtin(BuiltinFunction::new(
        "agentList",
        Arity::Fixed(0),
        move |_, _| {
            let names = upgrade(&registry, "agentList")?.list();
            Ok(Value::Array(names.into_iter().map(Value::String).collect()))
        },
    ));

    let registry = weak.clone();
    runtime.register_builtin(BuiltinFunction::new(
        "agentPublish",
        Arity::Fixed(1),
        move |_, args| {
            const F: &str = "agentPublish";
            let name = expect_name(F, "name", &args[0])?;
            Ok(Value::Boolean(upgrade(&registry, F)?.publish(name)))
        },
    ));

    let registry = weak.clone();
    runtime.register_builtin(BuiltinFunction::new(
        "agentBelief",
        Arity::Fixed(3),
        move |_, mut args| {
            const F: &str = "agentBelief";
            let value = args.pop().unwrap_or(Value::Nil);
            let name = expect_name(F, "name", &args[0])?;
            let key = expect_name(F, "key", &args[1])?;
            Ok(Value::Boolean(upgrade(&registry, F)?.set_belief(name, key, value)))
        },
    ));

    let registry = weak.clone();
    runtime.register_builtin(BuiltinFunction::new(
        "belief",
        Arity::Fixed(2),
        move |_, args| {
            const F: &str = "belief";
            let name = expect_name(F, "name", &args[0])?;
            let key = expect_name(F, "key", &args[1])?;
            Ok(upgrade(&registry, F)?.belief(name, key).unwrap_or(Value::Nil))
        },
    ));

    let registry = weak.clone();
    runtime.register_builtin(BuiltinFunction::new(
        "agentInfo",
        Arity::Fixed(1),
        move |_, args| {
            const F: &str = "agentInfo";
            let name = expect_name(F, "name", &args[0])?;
            let Some(info) = upgrade(&registry, F)?.info(name) else {
                return Ok(Value::Nil);
            };
            let json = serde_json::to_value(&info).map_err(|e| RuntimeError::host(F, e))?;
            Ok(Value::from_json(&json))
        },
    ));

    let registry = weak.clone();
    runtime.register_builtin(BuiltinFunction::new(
        "agentBeliefs",
        Arity::Fixed(1),
        move |_, args| {
            const F: &str = "agentBeliefs";
            let name = expect_name(F, "name", &args[0])?;
            let Some(beliefs) = upgrade(&registry, F)?.beliefs(name) else {
                return Ok(Value::Nil);
            };
            let sorted: BTreeMap<_, _> = beliefs.into_iter().collect();
            Ok(Value::Map(sorted.into_iter().collect()))
        },
    ));
}

fn agent_error(function: &str, err: AgentError) -> RuntimeError {
    RuntimeError::host(function, err)
}

fn expect_name<'a>(function: &str, what: &str, value: &'a Value) -> RuntimeResult<&'a str> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::String(_) => Err(RuntimeError::InvalidArgument(format!(
            "{}: {} must be a non-empty string",
            function, what
        ))),
        other => Err(RuntimeError::type_error(function, "string", other.type_name())),
    }
}

fn expect_plan<'a>(function: &str, value: &'a Value) -> RuntimeResult<&'a ScriptPlan> {
    match value {
        Value::Host(host) => host
            .downcast_ref::<ScriptPlan>()
            .ok_or_else(|| RuntimeError::type_error(function, PLAN_KIND, host.kind())),
        other => Err(RuntimeError::type_error(function, PLAN_KIND, other.type_name())),
    }
}

fn expect_agent<'a>(function: &str, value: &'a Value) -> RuntimeResult<&'a ScriptAgent> {
    match value {
        Value::Host(host) => host
            .downcast_ref::<ScriptAgent>()
            .ok_or_else(|| RuntimeError::type_error(function, AGENT_KIND, host.kind())),
        other => Err(RuntimeError::type_error(function, AGENT_KIND, other.type_name())),
    }
}

fn optional_closure(function: &str, what: &str, value: &Value) -> RuntimeResult<Option<Arc<Closure>>> {
    match value {
        Value::Nil => Ok(None),
        Value::Function(closure) => Ok(Some(Arc::clone(closure))),
        other => Err(RuntimeError::InvalidArgument(format!(
            "{}: {} must be a function or nil, got {}",
            function,
            what,
            other.type_name()
        ))),
    }
}

/// Optional positive whole number no larger than [`MAX_COUNT`]; absent or
/// nil means `default`.
fn positive_count(
    function: &str,
    what: &str,
    value: Option<&Value>,
    default: usize,
) -> RuntimeResult<usize> {
    match value {
        None | Some(Value::Nil) => Ok(default),
        Some(Value::Number(n)) if *n > MAX_COUNT as f64 => Err(RuntimeError::InvalidArgument(
            format!("{}: {} must be at most {}, got {}", function, what, MAX_COUNT, n),
        )),
        Some(Value::Number(n)) if *n >= 1.0 && n.fract() == 0.0 => Ok(*n as usize),
        Some(other) => Err(RuntimeError::InvalidArgument(format!(
            "{}: {} must be a positive whole number, got {}",
            function, what, other
        ))),
    }
}

fn instance_vars(function: &str, value: Option<&Value>) -> RuntimeResult<Vec<(String, Value)>> {
    match value {
        None | Some(Value::Nil) => Ok(Vec::new()),
        Some(Value::Map(map)) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Some(other) => Err(RuntimeError::type_error(function, "vars map", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    fn setup() -> (Runtime, Arc<ScriptRegistry>) {
        let rt = Runtime::new();
        let registry = Arc::new(ScriptRegistry::new(EventBus::new()));
        register_plan_functions(&rt, &registry);
        (rt, registry)
    }

    #[test]
    fn plan_rejects_malformed_arguments() {
        let (rt, _registry) = setup();
        assert!(rt.run_source("plan('', nil, nil, nil, array(), nil)").is_err());
        assert!(rt.run_source("plan('p', nil, 1, nil, array(), nil)").is_err());
        assert!(rt.run_source("plan('p', nil, nil, nil, array(1), nil)").is_err());
        assert!(rt.run_source("plan('p', array(1), nil, nil, array(), nil)").is_err());
        assert!(matches!(
            rt.run_source("plan('p')"),
            Err(RuntimeError::ArityMismatch { .. })
        ));
    }

    #[test]
    fn plan_builds_a_host_object() {
        let (rt, _registry) = setup();
        let value = rt
            .run_source("plan('p', array('a'), nil, func() { true }, array(func() { 1 }), nil)")
            .unwrap();
        let plan = expect_plan("test", &value).unwrap();
        assert_eq!(plan.name, "p");
        assert_eq!(plan.params, vec!["a".to_string()]);
        assert!(plan.trigger.is_none());
        assert!(plan.guard.is_some());
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(value.type_name(), PLAN_KIND);
    }

    #[test]
    fn agent_new_validates_counts() {
        let (rt, _registry) = setup();
        assert!(rt.run_source("agentNew(0)").is_err());
        assert!(rt.run_source("agentNew(1, -3)").is_err());
        assert!(rt.run_source("agentNew(1.5)").is_err());
        let agent = rt.run_source("agentNew(2, 1)").unwrap();
        let agent = expect_agent("test", &agent).unwrap();
        assert_eq!(agent.max_concurrent(), 2);
        assert_eq!(agent.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn oversized_counts_fail_instead_of_panicking() {
        let (rt, registry) = setup();
        rt.run_source("setq(p, plan('p', nil, nil, nil, array(), nil))")
            .unwrap();

        let err = rt.run_source("agentNew(100000000000000000000)").unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument(_)), "{:?}", err);
        assert!(err.to_string().contains("maxConcurrent must be at most"), "{}", err);
        assert!(matches!(
            rt.run_source("agentStartNamed('a', p, 100000000000000000000)"),
            Err(RuntimeError::InvalidArgument(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn type_confusion_between_host_objects_is_an_error() {
        let (rt, _registry) = setup();
        rt.run_source("setq(p, plan('p', nil, nil, nil, array(), nil)); setq(a, agentNew())")
            .unwrap();
        assert!(matches!(
            rt.run_source("agentRegister(p, a)"),
            Err(RuntimeError::TypeError { .. })
        ));
        assert_eq!(
            rt.run_source("agentRegister(a, p)").unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn dropped_registry_fails_named_calls() {
        let (rt, registry) = setup();
        drop(registry);
        assert!(matches!(
            rt.run_source("agentList()"),
            Err(RuntimeError::HostError { .. })
        ));
    }
}
