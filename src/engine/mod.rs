//! Execution engine (§4.6): drives a parsed [`Workflow`] against a root
//! [`Scope`], dispatching each step's populated action facet in the fixed
//! order the source spec prescribes and turning the result into one of a
//! small set of control-flow [`Flow`] signals.

pub mod parallel;

use crate::expr::{eval, EvalContext, Expr};
use crate::limits::{
    MAX_ASSIGNMENTS_PER_STEP, MAX_CALL_STACK_DEPTH, MAX_STEPS_PER_EXECUTION,
    MAX_SWITCH_CONDITIONS_PER_STEP,
};
use crate::scope::{apply_assign, Scope};
use crate::stdlib::Registry;
use crate::value::{ErrorTag, Value, WorkflowError};
use crate::workflow::{
    CallSpec, ForIterable, ForSpec, NextTarget, Step, Subworkflow, SwitchCase, TrySpec, Workflow,
};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// An attempt to call a retry predicate that turns out not to retry at all
/// still gets at least this many further attempts once a `retry:` block is
/// present but doesn't say how many (§9, resolved open question: Workflows'
/// own default policy isn't reproduced verbatim, 3 is our stand-in).
const DEFAULT_MAX_RETRIES: u32 = 3;

/// What a step (or a list of steps) hands back to its caller.
#[derive(Debug, Clone)]
pub enum Flow {
    /// Ran to completion with no explicit transfer; resume after the
    /// containing step.
    None,
    /// `next: <name>`; resolved against the current step list before it
    /// ever escapes [`execute_steps`].
    Next(String),
    /// `next: end`; unwinds to the nearest subworkflow-call boundary.
    End,
    /// `return: ...`; unwinds to the nearest subworkflow-call boundary.
    Return(Value),
    /// `next: break`; caught by the nearest enclosing `for`.
    Break,
    /// `next: continue`; caught by the nearest enclosing `for`.
    Continue,
}

/// Cross-cutting state threaded through one execution: the parsed document,
/// the stdlib registry, call/parallel nesting depth, and the counters used
/// to enforce §5's hard limits and cooperative cancellation.
#[derive(Clone)]
pub struct ExecCtx<'a> {
    pub workflow: &'a Workflow,
    pub registry: &'a Registry,
    pub call_depth: usize,
    pub parallel_depth: usize,
    pub steps_run: Arc<AtomicU64>,
    /// Set by a caller (e.g. the execution store) to cancel the whole run.
    pub cancelled: Arc<AtomicBool>,
    /// Set when a sibling `parallel` branch fails under the default
    /// (non-`continueAll`) exception policy, so the remaining branches stop
    /// at their next step boundary instead of running to completion.
    pub local_cancel: Arc<AtomicBool>,
}

/// Run `workflow`'s `main` subworkflow to completion.
///
/// `args` is bound against `main`'s declared params the same way a `call`
/// step binds a subworkflow's params (§4.3). A run that falls off the end
/// of `main` without an explicit `return` yields `Value::Null` (§9: null
/// vs. missing return is a step-level distinction; a whole execution that
/// never returns has nothing to distinguish it from an explicit `return:
/// null`).
pub fn run(
    workflow: &Workflow,
    registry: &Registry,
    args: Value,
    cancelled: Arc<AtomicBool>,
) -> Result<Value, WorkflowError> {
    let ctx = ExecCtx {
        workflow,
        registry,
        call_depth: 0,
        parallel_depth: 0,
        steps_run: Arc::new(AtomicU64::new(0)),
        cancelled,
        local_cancel: Arc::new(AtomicBool::new(false)),
    };
    let span = tracing::info_span!("workflow_execution");
    let _enter = span.enter();
    tracing::info!("execution started");
    let scope = Scope::root();
    let result = (|| {
        bind_params(&workflow.main, &args_map(&args), &scope, &ctx)?;
        let flow = execute_steps(&workflow.main.steps, &scope, &ctx)?;
        Ok(flow_to_result(flow))
    })();
    match &result {
        Ok(_) => tracing::info!("execution finished"),
        Err(err) => tracing::info!(message = %err.message, code = err.code, "execution failed"),
    }
    result
}

fn args_map(args: &Value) -> IndexMap<String, Value> {
    match args {
        Value::Map(m) => m.clone(),
        Value::Null => IndexMap::new(),
        _ => IndexMap::new(),
    }
}

fn flow_to_result(flow: Flow) -> Value {
    match flow {
        Flow::Return(v) => v,
        _ => Value::Null,
    }
}

fn bind_params(
    sub: &Subworkflow,
    args: &IndexMap<String, Value>,
    scope: &Arc<Scope>,
    ctx: &ExecCtx,
) -> Result<(), WorkflowError> {
    for p in &sub.params {
        let value = if let Some(v) = args.get(&p.name) {
            v.clone()
        } else if p.has_default {
            eval(
                p.default.as_ref().unwrap(),
                &EvalContext {
                    scope,
                    registry: ctx.registry,
                },
            )?
        } else {
            return Err(WorkflowError::type_error(format!(
                "missing required argument '{}'",
                p.name
            )));
        };
        scope.set_local(&p.name, value);
    }
    Ok(())
}

fn check_cancelled(ctx: &ExecCtx) -> Result<(), WorkflowError> {
    if ctx.cancelled.load(Ordering::Relaxed) || ctx.local_cancel.load(Ordering::Relaxed) {
        tracing::info!("execution cancelled at step boundary");
        return Err(WorkflowError::new("execution was cancelled").with_tag(ErrorTag::OperationError));
    }
    Ok(())
}

fn bump_step_count(ctx: &ExecCtx) -> Result<(), WorkflowError> {
    let n = ctx.steps_run.fetch_add(1, Ordering::Relaxed) + 1;
    if n > MAX_STEPS_PER_EXECUTION {
        return Err(WorkflowError::resource_limit(
            "execution exceeded the maximum step count",
        ));
    }
    Ok(())
}

/// Drive one ordered list of steps (a subworkflow's body, or the nested
/// body of a `for`/`try`/`switch`/branch). `next: <name>` is resolved
/// against this list's own name→index map and never escapes as a `Flow`.
pub fn execute_steps(
    steps: &[Step],
    scope: &Arc<Scope>,
    ctx: &ExecCtx,
) -> Result<Flow, WorkflowError> {
    let index: std::collections::HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();
    let mut i = 0usize;
    while i < steps.len() {
        check_cancelled(ctx)?;
        bump_step_count(ctx)?;
        let flow = execute_step(&steps[i], scope, ctx)?;
        match flow {
            Flow::None => i += 1,
            Flow::Next(name) => match index.get(name.as_str()) {
                Some(&idx) => i = idx,
                None => {
                    return Err(WorkflowError::value_error(format!(
                        "next target '{name}' not found in this step list"
                    )))
                }
            },
            other => return Ok(other),
        }
    }
    Ok(Flow::None)
}

fn next_to_flow(next: &NextTarget) -> Flow {
    match next {
        NextTarget::Name(n) => Flow::Next(n.clone()),
        NextTarget::End => Flow::End,
        NextTarget::Break => Flow::Break,
        NextTarget::Continue => Flow::Continue,
    }
}

/// Dispatch one step's action facets in the fixed composition order (§4.6):
/// nested steps, assign, call, switch, for, try, parallel, raise, return,
/// next. The first facet that yields a non-`None` flow short-circuits the
/// rest.
fn execute_step(step: &Step, scope: &Arc<Scope>, ctx: &ExecCtx) -> Result<Flow, WorkflowError> {
    tracing::debug!(step = %step.name, "dispatching step");
    if let Some(nested) = &step.steps {
        let flow = execute_steps(nested, scope, ctx)?;
        if !matches!(flow, Flow::None) {
            return Ok(flow);
        }
    }
    if let Some(assigns) = &step.assign {
        do_assign(assigns, scope, ctx)?;
    }
    if let Some(call) = &step.call {
        do_call(call, scope, ctx)?;
    }
    if let Some(cases) = &step.switch {
        let flow = do_switch(cases, scope, ctx)?;
        if !matches!(flow, Flow::None) {
            return Ok(flow);
        }
    }
    if let Some(for_spec) = &step.for_loop {
        let flow = do_for(for_spec, scope, ctx)?;
        if !matches!(flow, Flow::None) {
            return Ok(flow);
        }
    }
    if let Some(try_spec) = &step.try_block {
        let flow = do_try(try_spec, scope, ctx)?;
        if !matches!(flow, Flow::None) {
            return Ok(flow);
        }
    }
    if let Some(par) = &step.parallel {
        parallel::do_parallel(par, scope, ctx)?;
    }
    if let Some(raise_expr) = &step.raise {
        return Err(eval_raise(raise_expr, scope, ctx)?);
    }
    if let Some(ret_expr) = &step.return_expr {
        let v = eval(
            ret_expr,
            &EvalContext {
                scope,
                registry: ctx.registry,
            },
        )?;
        return Ok(Flow::Return(v));
    }
    if let Some(next) = &step.next {
        return Ok(next_to_flow(next));
    }
    Ok(Flow::None)
}

fn eval_raise(expr: &Expr, scope: &Arc<Scope>, ctx: &ExecCtx) -> Result<WorkflowError, WorkflowError> {
    let v = eval(
        expr,
        &EvalContext {
            scope,
            registry: ctx.registry,
        },
    )?;
    Ok(match &v {
        Value::Map(_) => WorkflowError::from_value(&v),
        Value::String(s) => WorkflowError::new(s.to_string()),
        other => WorkflowError::new(other.to_string()),
    })
}

fn do_assign(assigns: &[(Expr, Expr)], scope: &Arc<Scope>, ctx: &ExecCtx) -> Result<(), WorkflowError> {
    if assigns.len() > MAX_ASSIGNMENTS_PER_STEP {
        return Err(WorkflowError::resource_limit(format!(
            "{} assignments exceeds the per-step limit of {MAX_ASSIGNMENTS_PER_STEP}",
            assigns.len()
        )));
    }
    // Held for the whole step so a sibling `parallel` branch never observes
    // a partially-applied set of assignments (§4.6, §5).
    let _guard = scope.lock_shared();
    for (target, value_expr) in assigns {
        let v = eval(
            value_expr,
            &EvalContext {
                scope,
                registry: ctx.registry,
            },
        )?;
        apply_assign(scope, ctx.registry, target, v)?;
    }
    Ok(())
}

fn do_call(call: &CallSpec, scope: &Arc<Scope>, ctx: &ExecCtx) -> Result<(), WorkflowError> {
    let mut args = IndexMap::with_capacity(call.args.len());
    for (k, expr) in &call.args {
        let v = eval(
            expr,
            &EvalContext {
                scope,
                registry: ctx.registry,
            },
        )?;
        args.insert(k.clone(), v);
    }
    let result = if let Some(sub) = ctx.workflow.subworkflow(&call.function) {
        call_subworkflow(sub, args, ctx)?
    } else {
        ctx.registry.call(&call.function, vec![Value::Map(args)])?
    };
    if let Some(result_name) = &call.result {
        scope.set(result_name, result);
    }
    Ok(())
}

/// Subworkflow calls start an isolated scope chain (no lexical access to
/// the caller's variables, only the explicit `args`), mirroring a function
/// call rather than a nested block.
pub(crate) fn call_subworkflow(
    sub: &Subworkflow,
    args: IndexMap<String, Value>,
    ctx: &ExecCtx,
) -> Result<Value, WorkflowError> {
    if ctx.call_depth + 1 > MAX_CALL_STACK_DEPTH {
        return Err(WorkflowError::recursion(format!(
            "call stack depth exceeds the limit of {MAX_CALL_STACK_DEPTH}"
        )));
    }
    tracing::debug!(subworkflow = %sub.name, depth = ctx.call_depth + 1, "calling subworkflow");
    let scope = Scope::root();
    let child_ctx = ExecCtx {
        call_depth: ctx.call_depth + 1,
        ..ctx.clone()
    };
    bind_params(sub, &args, &scope, &child_ctx)?;
    let flow = execute_steps(&sub.steps, &scope, &child_ctx)?;
    Ok(flow_to_result(flow))
}

fn do_switch(cases: &[SwitchCase], scope: &Arc<Scope>, ctx: &ExecCtx) -> Result<Flow, WorkflowError> {
    if cases.len() > MAX_SWITCH_CONDITIONS_PER_STEP {
        return Err(WorkflowError::resource_limit(format!(
            "{} switch conditions exceeds the per-step limit of {MAX_SWITCH_CONDITIONS_PER_STEP}",
            cases.len()
        )));
    }
    for case in cases {
        let matched = match &case.condition {
            None => true,
            Some(expr) => eval(
                expr,
                &EvalContext {
                    scope,
                    registry: ctx.registry,
                },
            )?
            .truthy(),
        };
        if !matched {
            continue;
        }
        // Composition order on a match (§4.6): assign, then inline steps
        // (propagating any non-NONE signal), then return, then raise, then
        // honor an inline next.
        if let Some(assigns) = &case.assign {
            do_assign(assigns, scope, ctx)?;
        }
        if let Some(steps) = &case.steps {
            let flow = execute_steps(steps, scope, ctx)?;
            if !matches!(flow, Flow::None) {
                return Ok(flow);
            }
        }
        if let Some(ret) = &case.return_expr {
            let v = eval(
                ret,
                &EvalContext {
                    scope,
                    registry: ctx.registry,
                },
            )?;
            return Ok(Flow::Return(v));
        }
        if let Some(raise_expr) = &case.raise {
            return Err(eval_raise(raise_expr, scope, ctx)?);
        }
        if let Some(next) = &case.next {
            return Ok(next_to_flow(next));
        }
        return Ok(Flow::None);
    }
    Ok(Flow::None)
}

/// Resolve a `for`'s iterable into an ordered `(index, item)` sequence.
/// Ranges are inclusive on both ends, matching the `[start, end]` literal
/// the source syntax uses; an empty range (`start > end`) yields zero
/// iterations rather than an error.
pub(crate) fn for_items(
    spec: &ForSpec,
    scope: &Arc<Scope>,
    ctx: &ExecCtx,
) -> Result<Vec<(i64, Value)>, WorkflowError> {
    match &spec.iterable {
        ForIterable::In(expr) => {
            let v = eval(
                expr,
                &EvalContext {
                    scope,
                    registry: ctx.registry,
                },
            )?;
            match v {
                Value::List(l) => Ok(l.into_iter().enumerate().map(|(i, v)| (i as i64, v)).collect()),
                Value::Map(m) => Ok(m
                    .into_iter()
                    .enumerate()
                    .map(|(i, (k, _))| (i as i64, Value::string(k)))
                    .collect()),
                other => Err(WorkflowError::type_error(format!(
                    "'for ... in' requires a list or map, got {}",
                    other.kind()
                ))),
            }
        }
        ForIterable::Range(a, b) => {
            let av = eval(
                a,
                &EvalContext {
                    scope,
                    registry: ctx.registry,
                },
            )?;
            let bv = eval(
                b,
                &EvalContext {
                    scope,
                    registry: ctx.registry,
                },
            )?;
            match (av, bv) {
                (Value::Int(lo), Value::Int(hi)) => {
                    if lo > hi {
                        Ok(Vec::new())
                    } else {
                        Ok((lo..=hi).enumerate().map(|(i, v)| (i as i64, Value::Int(v))).collect())
                    }
                }
                _ => Err(WorkflowError::type_error(
                    "'for ... range' bounds must be integers",
                )),
            }
        }
    }
}

fn do_for(spec: &ForSpec, scope: &Arc<Scope>, ctx: &ExecCtx) -> Result<Flow, WorkflowError> {
    for (idx, item) in for_items(spec, scope, ctx)? {
        // Fresh per-iteration scope: the loop and index vars don't leak
        // past the loop, but assignments to pre-existing outer vars still
        // write through (§4.4).
        let iter_scope = Scope::child(scope);
        iter_scope.set_local(&spec.value_var, item);
        if let Some(index_var) = &spec.index_var {
            iter_scope.set_local(index_var, Value::Int(idx));
        }
        match execute_steps(&spec.body, &iter_scope, ctx)? {
            Flow::None | Flow::Continue => continue,
            Flow::Break => break,
            other => return Ok(other),
        }
    }
    Ok(Flow::None)
}

fn predicate_allows(predicate: &str, err: &WorkflowError, ctx: &ExecCtx) -> Result<bool, WorkflowError> {
    match predicate {
        "http.default_retry" | "http.default_retry_predicate" => {
            Ok(crate::stdlib::http::default_retry(err))
        }
        "http.default_retry_non_idempotent" => Ok(err.has_tag(ErrorTag::ConnectionError)
            || err.has_tag(ErrorTag::TimeoutError)),
        "retry.always" => Ok(true),
        "retry.never" => Ok(false),
        other => {
            // A predicate name that isn't one of the builtins is treated
            // as a subworkflow taking the error map and returning a bool
            // (§9 open question, resolved in favor of extensibility).
            if let Some(sub) = ctx.workflow.subworkflow(other) {
                let mut args = IndexMap::new();
                args.insert("error".to_string(), err.to_value());
                Ok(call_subworkflow(sub, args, ctx)?.truthy())
            } else {
                Ok(true)
            }
        }
    }
}

/// `try`/`except`/`retry` (§4.6, §9): a retry re-executes the *entire* try
/// body from the top on every attempt, not just the step that failed.
/// `except` binds the caught error into the try's own scope, not a fresh
/// child — a handler can see everything the try body had assigned so far.
fn do_try(spec: &TrySpec, scope: &Arc<Scope>, ctx: &ExecCtx) -> Result<Flow, WorkflowError> {
    let max_retries = match &spec.retry {
        Some(r) if r.max_retries > 0 => r.max_retries as u32,
        Some(_) => DEFAULT_MAX_RETRIES,
        None => 0,
    };
    let mut attempt: u32 = 0;
    loop {
        match execute_steps(&spec.body, scope, ctx) {
            Ok(flow) => return Ok(flow),
            Err(err) => {
                if let Some(retry) = &spec.retry {
                    if attempt < max_retries && predicate_allows(&retry.predicate, &err, ctx)? {
                        let delay = (retry.backoff.initial
                            * retry.backoff.multiplier.powi(attempt as i32))
                        .min(retry.backoff.max)
                        .max(0.0);
                        tracing::info!(
                            attempt = attempt + 1,
                            delay_secs = delay,
                            message = %err.message,
                            "retrying after failure"
                        );
                        std::thread::sleep(std::time::Duration::from_secs_f64(delay));
                        attempt += 1;
                        continue;
                    }
                }
                if let Some(except) = &spec.except {
                    if let Some(as_var) = &except.as_var {
                        scope.set_local(as_var, err.to_value());
                    }
                    return execute_steps(&except.steps, scope, ctx);
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::parser::parse_source;

    fn run_src(src: &[u8], args: Value) -> Result<Value, WorkflowError> {
        let wf = parse_source(src).unwrap();
        let registry = Registry::with_builtins();
        run(&wf, &registry, args, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn simple_return() {
        let src = br#"
main:
  steps:
    - done:
        return: "hello"
"#;
        let v = run_src(src, Value::Null).unwrap();
        assert_eq!(v.as_str(), Some("hello"));
    }

    #[test]
    fn assign_then_return() {
        let src = br#"
main:
  steps:
    - init:
        assign:
          - x: 2
          - y: ${x * 3}
    - done:
        return: ${y}
"#;
        let v = run_src(src, Value::Null).unwrap();
        assert!(matches!(v, Value::Int(6)));
    }

    #[test]
    fn param_with_default_and_explicit_arg() {
        let src = br#"
main:
  params:
    - name: "world"
  steps:
    - done:
        return: ${"hi " + name}
"#;
        let v = run_src(src, Value::Null).unwrap();
        assert_eq!(v.as_str(), Some("hi world"));
        let args = Value::map([("name".to_string(), Value::string("nika"))]);
        let v2 = run_src(src, args).unwrap();
        assert_eq!(v2.as_str(), Some("hi nika"));
    }

    #[test]
    fn for_range_with_break_and_continue() {
        let src = br#"
main:
  steps:
    - init:
        assign:
          - total: 0
    - loop:
        for:
          value: i
          range: [1, 10]
          steps:
            - skip_even:
                switch:
                  - condition: ${i % 2 == 0}
                    next: continue
            - stop_at_seven:
                switch:
                  - condition: ${i == 7}
                    next: break
            - accumulate:
                assign:
                  - total: ${total + i}
    - done:
        return: ${total}
"#;
        // odd numbers 1,3,5 accumulate (7 triggers break before accumulating)
        let v = run_src(src, Value::Null).unwrap();
        assert!(matches!(v, Value::Int(9)));
    }

    #[test]
    fn subworkflow_call_with_default_param() {
        let src = br#"
greet:
  params:
    - who
    - greeting: "hello"
  steps:
    - build:
        return: ${greeting + ", " + who}

main:
  steps:
    - call_it:
        call: greet
        args:
          who: "nika"
        result: message
    - done:
        return: ${message}
"#;
        let v = run_src(src, Value::Null).unwrap();
        assert_eq!(v.as_str(), Some("hello, nika"));
    }

    #[test]
    fn try_except_returns_error_message() {
        let src = br#"
main:
  steps:
    - guarded:
        try:
          steps:
            - boom:
                raise: "kaboom"
        except:
          as: e
          steps:
            - handled:
                return: ${e.message}
"#;
        let v = run_src(src, Value::Null).unwrap();
        assert_eq!(v.as_str(), Some("kaboom"));
    }

    #[test]
    fn uncaught_raise_fails_with_structured_error() {
        let src = br#"
main:
  steps:
    - boom:
        raise:
          message: "bad input"
          code: 42
          tags: ["ValueError"]
"#;
        let err = run_src(src, Value::Null).unwrap_err();
        assert_eq!(err.message, "bad input");
        assert_eq!(err.code, 42);
        assert!(err.has_tag(ErrorTag::ValueError));
    }

    #[test]
    fn retry_does_not_retry_on_500() {
        let src = br#"
main:
  steps:
    - guarded:
        try:
          steps:
            - boom:
                raise:
                  message: "server error"
                  code: 500
                  tags: ["HttpError"]
        retry:
          predicate: http.default_retry
          max_retries: 3
"#;
        let err = run_src(src, Value::Null).unwrap_err();
        assert_eq!(err.code, 500);
    }

    #[test]
    fn recursion_limit_is_enforced() {
        let src = br#"
recurse:
  steps:
    - again:
        call: recurse
        result: ignored

main:
  steps:
    - start:
        call: recurse
        result: ignored
    - done:
        return: "unreachable"
"#;
        let err = run_src(src, Value::Null).unwrap_err();
        assert!(err.has_tag(ErrorTag::RecursionError));
    }
}
