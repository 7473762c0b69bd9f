//! `parallel` step execution (§4.6, §5).
//!
//! Branches run as OS threads bounded by a simple counting semaphore
//! (`concurrency_limit`, default 20). All stdlib calls are blocking
//! (`reqwest::blocking` etc.), so a thread-per-branch model is the natural
//! fit rather than pulling the synchronous expression evaluator into an
//! async runtime.

use super::{execute_steps, ExecCtx, Flow};
use crate::expr::{eval, EvalContext};
use crate::limits::{
    DEFAULT_PARALLEL_CONCURRENCY, MAX_PARALLEL_BRANCHES, MAX_PARALLEL_NESTING_DEPTH,
};
use crate::scope::Scope;
use crate::value::{Value, WorkflowError};
use crate::workflow::{ExceptionPolicy, ForIterable, ForSpec, ParallelSpec, Step};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

struct Semaphore {
    state: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    fn new(n: usize) -> Semaphore {
        Semaphore {
            state: Mutex::new(n),
            cv: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while *guard == 0 {
            guard = self.cv.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
        *guard -= 1;
    }

    fn release(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *guard += 1;
        self.cv.notify_one();
    }
}

/// A `parallel for` only iterates a list (§9), unlike the sequential `for`
/// which also accepts map keys and ranges — there is no well-defined way
/// to split a range or a map across concurrent branches that this emulator
/// needs to support.
fn list_items_for_parallel(
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
                other => Err(WorkflowError::type_error(format!(
                    "'parallel for' requires a list, got {}",
                    other.kind()
                ))),
            }
        }
        ForIterable::Range(_, _) => Err(WorkflowError::type_error(
            "'parallel for' does not support 'range'; use a list",
        )),
    }
}

pub fn do_parallel(par: &ParallelSpec, scope: &Arc<Scope>, ctx: &ExecCtx) -> Result<(), WorkflowError> {
    if ctx.parallel_depth + 1 > MAX_PARALLEL_NESTING_DEPTH {
        return Err(WorkflowError::parallel_nesting(format!(
            "parallel nesting exceeds the limit of {MAX_PARALLEL_NESTING_DEPTH}"
        )));
    }

    let par_scope = Scope::child_with_new_shared_lock(scope);
    for name in &par.shared {
        let v = scope.get(name)?;
        par_scope.set_local(name, v);
    }

    let branches: Vec<(Arc<Scope>, &[Step])> = match (&par.branches, &par.for_loop) {
        (Some(branches), _) => {
            if branches.len() > MAX_PARALLEL_BRANCHES {
                return Err(WorkflowError::resource_limit(format!(
                    "{} parallel branches exceeds the limit of {MAX_PARALLEL_BRANCHES}",
                    branches.len()
                )));
            }
            branches
                .iter()
                .map(|b| (Scope::child(&par_scope), b.as_slice()))
                .collect()
        }
        (None, Some(for_spec)) => list_items_for_parallel(for_spec, &par_scope, ctx)?
            .into_iter()
            .map(|(idx, item)| {
                let branch_scope = Scope::child(&par_scope);
                branch_scope.set_local(&for_spec.value_var, item);
                if let Some(index_var) = &for_spec.index_var {
                    branch_scope.set_local(index_var, Value::Int(idx));
                }
                (branch_scope, for_spec.body.as_slice())
            })
            .collect(),
        (None, None) => Vec::new(),
    };

    let concurrency = if par.concurrency_limit > 0 {
        par.concurrency_limit as usize
    } else {
        DEFAULT_PARALLEL_CONCURRENCY
    };
    let sem = Semaphore::new(concurrency.max(1));
    let local_cancel = Arc::new(AtomicBool::new(false));
    let branch_ctx = ExecCtx {
        parallel_depth: ctx.parallel_depth + 1,
        local_cancel: local_cancel.clone(),
        ..ctx.clone()
    };
    let unhandled = par.exception_policy == ExceptionPolicy::Unhandled;

    let results: Mutex<Vec<Option<Result<Flow, WorkflowError>>>> =
        Mutex::new((0..branches.len()).map(|_| None).collect());

    let branch_count = branches.len();
    tracing::debug!(branch_count, depth = branch_ctx.parallel_depth, "parallel step starting");
    std::thread::scope(|s| {
        for (i, (branch_scope, body)) in branches.into_iter().enumerate() {
            sem.acquire();
            let branch_ctx = &branch_ctx;
            let results = &results;
            let sem = &sem;
            let local_cancel = &local_cancel;
            s.spawn(move || {
                tracing::debug!(branch = i, "parallel branch spawned");
                let r = execute_steps(body, &branch_scope, branch_ctx);
                if unhandled && r.is_err() {
                    local_cancel.store(true, Ordering::Relaxed);
                }
                tracing::debug!(branch = i, ok = r.is_ok(), "parallel branch joined");
                results.lock().unwrap_or_else(|e| e.into_inner())[i] = Some(r);
                sem.release();
            });
        }
    });

    for name in &par.shared {
        let v = par_scope.get(name)?;
        scope.set(name, v);
    }

    let errors: Vec<WorkflowError> = results
        .into_inner()
        .unwrap_or_else(|e| e.into_inner())
        .into_iter()
        .filter_map(|r| r.and_then(|r| r.err()))
        .collect();
    if errors.is_empty() {
        return Ok(());
    }
    match par.exception_policy {
        ExceptionPolicy::Unhandled => Err(errors.into_iter().next().unwrap()),
        ExceptionPolicy::ContinueAll => {
            let agg = WorkflowError::unhandled_branch(errors[0].message.clone()).with_extra(
                "errors",
                Value::List(errors.iter().map(WorkflowError::to_value).collect()),
            );
            Err(agg)
        }
    }
}
