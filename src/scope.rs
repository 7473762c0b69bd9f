//! Variable scope (§4.4): a lexical chain with parent lookup, write-through
//! to the defining scope, and a shared lock installed by `parallel` steps
//! so that an assign step's evaluate-then-write sequence is atomic with
//! respect to sibling branches.

use crate::expr::{Expr, EvalContext};
use crate::stdlib::Registry;
use crate::value::{Value, WorkflowError};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

pub struct Scope {
    vars: RwLock<IndexMap<String, Value>>,
    parent: Option<Arc<Scope>>,
    shared: Option<Arc<Mutex<()>>>,
}

impl Scope {
    pub fn root() -> Arc<Scope> {
        Arc::new(Scope {
            vars: RwLock::new(IndexMap::new()),
            parent: None,
            shared: None,
        })
    }

    /// A plain child scope (subworkflow call, for-loop iteration body).
    pub fn child(parent: &Arc<Scope>) -> Arc<Scope> {
        Arc::new(Scope {
            vars: RwLock::new(IndexMap::new()),
            parent: Some(parent.clone()),
            shared: parent.shared.clone(),
        })
    }

    /// A child scope that installs a *new* shared lock, used when entering
    /// a `parallel` step. All descendant scopes (including branch scopes
    /// created with `child`) inherit this lock.
    pub fn child_with_new_shared_lock(parent: &Arc<Scope>) -> Arc<Scope> {
        Arc::new(Scope {
            vars: RwLock::new(IndexMap::new()),
            parent: Some(parent.clone()),
            shared: Some(Arc::new(Mutex::new(()))),
        })
    }

    /// Hold the shared lock (if any) for the duration of an assign step so
    /// no sibling branch observes a partially-applied step (§4.6, §5).
    pub fn lock_shared(&self) -> Option<MutexGuard<'_, ()>> {
        self.shared.as_ref().map(|m| m.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn defines_locally(&self, name: &str) -> bool {
        self.vars.read().unwrap().contains_key(name)
    }

    fn find_definer<'a>(&'a self, name: &str) -> Option<&'a Scope> {
        if self.defines_locally(name) {
            Some(self)
        } else {
            self.parent.as_deref().and_then(|p| p.find_definer(name))
        }
    }

    /// Lookup walks the chain leaf→root; a missing name at the root raises
    /// `KeyError`.
    pub fn get(&self, name: &str) -> Result<Value, WorkflowError> {
        if let Some(v) = self.vars.read().unwrap().get(name) {
            return Ok(v.clone());
        }
        match &self.parent {
            Some(p) => p.get(name),
            None => Err(WorkflowError::key_error(format!("undefined variable '{name}'"))),
        }
    }

    pub fn defines(&self, name: &str) -> bool {
        self.find_definer(name).is_some()
    }

    /// `set`: writes to the nearest enclosing scope that already defines
    /// the name; otherwise defines it in the current scope.
    pub fn set(&self, name: &str, value: Value) {
        match self.find_definer(name) {
            Some(scope) => {
                scope.vars.write().unwrap().insert(name.to_string(), value);
            }
            None => {
                self.vars.write().unwrap().insert(name.to_string(), value);
            }
        }
    }

    /// `set-local`: defines in the current scope unconditionally.
    pub fn set_local(&self, name: &str, value: Value) {
        self.vars.write().unwrap().insert(name.to_string(), value);
    }
}

/// One segment of a parsed assignment path (§4.4).
#[derive(Debug, Clone)]
enum PathSegment {
    Field(String),
    Index(Expr),
}

fn decompose_target(expr: &Expr) -> Result<(String, Vec<PathSegment>), WorkflowError> {
    match expr {
        Expr::Ident(name) => Ok((name.clone(), Vec::new())),
        Expr::Property(base, field) => {
            let (root, mut segs) = decompose_target(base)?;
            segs.push(PathSegment::Field(field.clone()));
            Ok((root, segs))
        }
        Expr::Index(base, idx) => {
            let (root, mut segs) = decompose_target(base)?;
            segs.push(PathSegment::Index((**idx).clone()));
            Ok((root, segs))
        }
        _ => Err(WorkflowError::value_error("invalid assignment target path")),
    }
}

/// Parse an assignment target such as `x`, `m.k`, `list[0]`, or
/// `m["key"].sub[3]` by reusing the expression grammar's postfix chain and
/// rejecting anything that isn't an identifier/property/index chain.
pub fn parse_assign_target(src: &str) -> Result<Expr, crate::expr::ParseError> {
    crate::expr::Parser::parse(src)
}

fn navigate_mut<'v>(
    value: &'v mut Value,
    seg: &PathSegment,
    scope: &Scope,
    registry: &Registry,
) -> Result<&'v mut Value, WorkflowError> {
    match seg {
        PathSegment::Field(field) => value
            .as_map_mut()
            .ok_or_else(|| WorkflowError::type_error("cannot navigate a non-map by field"))?
            .get_mut(field)
            .ok_or_else(|| WorkflowError::key_error(format!("key '{field}' not found"))),
        PathSegment::Index(idx_expr) => {
            let idx = crate::expr::eval(idx_expr, &EvalContext { scope, registry })?;
            match (value, idx) {
                (Value::List(items), Value::Int(i)) => {
                    if i < 0 {
                        return Err(WorkflowError::index_error("negative list indices are not permitted"));
                    }
                    let len = items.len();
                    items
                        .get_mut(i as usize)
                        .ok_or_else(|| WorkflowError::index_error(format!("index {i} out of range (len {len})")))
                }
                (Value::Map(m), Value::String(key)) => m
                    .get_mut(key.as_ref())
                    .ok_or_else(|| WorkflowError::key_error(format!("key '{key}' not found"))),
                (other, _) => Err(WorkflowError::type_error(format!(
                    "cannot index into a {}",
                    other.kind()
                ))),
            }
        }
    }
}

fn write_segment(
    container: &mut Value,
    seg: &PathSegment,
    new_value: Value,
    scope: &Scope,
    registry: &Registry,
) -> Result<(), WorkflowError> {
    match seg {
        PathSegment::Field(field) => {
            let map = container
                .as_map_mut()
                .ok_or_else(|| WorkflowError::type_error("cannot assign a field on a non-map"))?;
            map.insert(field.clone(), new_value);
            Ok(())
        }
        PathSegment::Index(idx_expr) => {
            let idx = crate::expr::eval(idx_expr, &EvalContext { scope, registry })?;
            match (container, idx) {
                (Value::List(items), Value::Int(i)) => {
                    if i < 0 {
                        return Err(WorkflowError::index_error("negative list indices are not permitted"));
                    }
                    let len = items.len();
                    let slot = items
                        .get_mut(i as usize)
                        .ok_or_else(|| WorkflowError::index_error(format!("index {i} out of range (len {len})")))?;
                    *slot = new_value;
                    Ok(())
                }
                (Value::Map(m), Value::String(key)) => {
                    m.insert(key.to_string(), new_value);
                    Ok(())
                }
                (other, _) => Err(WorkflowError::type_error(format!(
                    "cannot index into a {}",
                    other.kind()
                ))),
            }
        }
    }
}

/// Evaluate `value_expr` against `scope`, then apply it to `target_expr`
/// following the assignment path grammar (§4.4). Every segment except the
/// last is navigated (and must already exist); the final segment is
/// mutated in place on the fetched root value, which is then written back
/// through `Scope::set` write-through semantics.
pub fn apply_assign(
    scope: &Arc<Scope>,
    registry: &Registry,
    target_expr: &Expr,
    value: Value,
) -> Result<(), WorkflowError> {
    let (root, segments) = decompose_target(target_expr)?;
    if segments.is_empty() {
        scope.set(&root, value);
        return Ok(());
    }
    let mut root_value = scope.get(&root)?;
    {
        let mut cursor = &mut root_value;
        for seg in &segments[..segments.len() - 1] {
            cursor = navigate_mut(cursor, seg, scope, registry)?;
        }
        write_segment(cursor, segments.last().unwrap(), value, scope, registry)?;
    }
    scope.set(&root, root_value);
    Ok(())
}
