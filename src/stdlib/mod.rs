//! Standard library function registry (§4.5, §6.4).
//!
//! Every family function is written against a normalized `Vec<Value>` of
//! its declared named parameters, in order. [`bind`] resolves both the
//! "map-style" call (a single `Value::Map` with those field names, as
//! produced by a `call` step's `args:` block) and positional invocation
//! from inside an expression.

pub mod base64;
pub mod events;
pub mod expr_helpers;
pub mod hash;
pub mod http;
pub mod json;
pub mod list;
pub mod map;
pub mod math;
pub mod sys;
pub mod text;
pub mod time;
pub mod uuid;

use crate::value::{ErrorTag, Value, WorkflowError};
use std::collections::HashMap;
use std::sync::Arc;

type BuiltinFn = Arc<dyn Fn(Vec<Value>) -> Result<Value, WorkflowError> + Send + Sync>;

/// The dotted-name → function table every `Expr::Call` and `call` step
/// consults (§4.2, §4.6).
pub struct Registry {
    funcs: HashMap<String, BuiltinFn>,
}

impl Registry {
    pub fn empty() -> Registry {
        Registry {
            funcs: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: &str,
        f: impl Fn(Vec<Value>) -> Result<Value, WorkflowError> + Send + Sync + 'static,
    ) {
        self.funcs.insert(name.to_string(), Arc::new(f));
    }

    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, WorkflowError> {
        match self.funcs.get(name) {
            Some(f) => f(args),
            None => Err(WorkflowError::new(format!("unknown function '{name}'"))
                .with_tag(ErrorTag::NotFound)),
        }
    }

    pub fn with_builtins() -> Registry {
        let mut r = Registry::empty();
        expr_helpers::register(&mut r);
        sys::register(&mut r);
        text::register(&mut r);
        json::register(&mut r);
        base64::register(&mut r);
        math::register(&mut r);
        list::register(&mut r);
        map::register(&mut r);
        hash::register(&mut r);
        uuid::register(&mut r);
        time::register(&mut r);
        events::register(&mut r);
        http::register(&mut r);
        r
    }
}

/// Normalize a call's arguments against the function's declared parameter
/// names.
///
/// - A single `Value::Map` argument is treated as map-style when either
///   more than one name is declared, or the sole declared name is a key
///   present in the map. Missing keys bind `Value::Null`.
/// - Otherwise the arguments are treated as positional and padded with
///   `Value::Null` up to `names.len()`.
pub(crate) fn bind(args: Vec<Value>, names: &[&str]) -> Vec<Value> {
    if args.len() == 1 {
        if let Value::Map(m) = &args[0] {
            if names.len() != 1 || m.contains_key(names[0]) {
                return names
                    .iter()
                    .map(|n| m.get(*n).cloned().unwrap_or(Value::Null))
                    .collect();
            }
        }
    }
    let mut out = args;
    out.resize(names.len(), Value::Null);
    out
}

pub(crate) fn arity_error(name: &str) -> WorkflowError {
    WorkflowError::type_error(format!("'{name}' called with the wrong number of arguments"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_accepts_map_style_for_multi_arg_function() {
        let m = Value::map([
            ("source".to_string(), Value::string("abc")),
            ("start".to_string(), Value::Int(1)),
        ]);
        let bound = bind(vec![m], &["source", "start", "end"]);
        assert!(matches!(&bound[0], Value::String(s) if s.as_ref() == "abc"));
        assert!(matches!(bound[1], Value::Int(1)));
        assert!(matches!(bound[2], Value::Null));
    }

    #[test]
    fn bind_treats_lone_map_without_matching_key_as_positional() {
        let payload = Value::map([("x".to_string(), Value::Int(1))]);
        let bound = bind(vec![payload.clone()], &["data"]);
        assert!(bound[0].structural_eq(&payload));
    }

    #[test]
    fn bind_passes_through_positional_args() {
        let bound = bind(vec![Value::Int(1), Value::Int(2)], &["a", "b"]);
        assert!(matches!(bound[0], Value::Int(1)));
        assert!(matches!(bound[1], Value::Int(2)));
    }
}
