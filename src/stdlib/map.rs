//! `map.get, map.delete, map.merge, map.merge_nested` (§4.5).

use super::{bind, Registry};
use crate::value::{Value, WorkflowError};
use indexmap::IndexMap;

fn require_map<'a>(v: &'a Value, fname: &str) -> Result<&'a IndexMap<String, Value>, WorkflowError> {
    v.as_map()
        .ok_or_else(|| WorkflowError::type_error(format!("{fname} expects a map, got {}", v.kind())))
}

/// Walk a dotted key path (e.g. `"a.b.c"`) into nested maps, per `map.get`'s
/// convenience path syntax.
fn get_path<'a>(map: &'a IndexMap<String, Value>, path: &str) -> Option<&'a Value> {
    let mut cur = map;
    let mut parts = path.split('.').peekable();
    loop {
        let key = parts.next()?;
        let v = cur.get(key)?;
        match parts.peek() {
            None => return Some(v),
            Some(_) => cur = v.as_map()?,
        }
    }
}

fn merge_shallow(base: &IndexMap<String, Value>, over: &IndexMap<String, Value>) -> IndexMap<String, Value> {
    let mut out = base.clone();
    for (k, v) in over {
        out.insert(k.clone(), v.clone());
    }
    out
}

fn merge_deep(base: &IndexMap<String, Value>, over: &IndexMap<String, Value>) -> IndexMap<String, Value> {
    let mut out = base.clone();
    for (k, v) in over {
        match (out.get(k), v) {
            (Some(Value::Map(existing)), Value::Map(incoming)) => {
                out.insert(k.clone(), Value::Map(merge_deep(existing, incoming)));
            }
            _ => {
                out.insert(k.clone(), v.clone());
            }
        }
    }
    out
}

pub fn register(r: &mut Registry) {
    r.register("map.get", |args| {
        let a = bind(args, &["map", "keys"]);
        let map = require_map(&a[0], "map.get")?;
        let path = match &a[1] {
            Value::String(s) => s.to_string(),
            Value::List(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join("."),
            other => return Err(WorkflowError::type_error(format!("map.get expects a string or list of keys, got {}", other.kind()))),
        };
        Ok(get_path(map, &path).cloned().unwrap_or(Value::Null))
    });

    r.register("map.delete", |args| {
        let a = bind(args, &["map", "key"]);
        let map = require_map(&a[0], "map.delete")?;
        let key = a[1]
            .as_str()
            .ok_or_else(|| WorkflowError::type_error("map.delete expects a string key"))?;
        let mut out = map.clone();
        out.shift_remove(key);
        Ok(Value::Map(out))
    });

    r.register("map.merge", |args| {
        let a = bind(args, &["first", "second"]);
        let first = require_map(&a[0], "map.merge")?;
        let second = require_map(&a[1], "map.merge")?;
        Ok(Value::Map(merge_shallow(first, second)))
    });

    r.register("map.merge_nested", |args| {
        let a = bind(args, &["first", "second"]);
        let first = require_map(&a[0], "map.merge_nested")?;
        let second = require_map(&a[1], "map.merge_nested")?;
        Ok(Value::Map(merge_deep(first, second)))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_walks_dotted_path() {
        let r = Registry::with_builtins();
        let m = Value::map([("a".to_string(), Value::map([("b".to_string(), Value::Int(7))]))]);
        let v = r.call("map.get", vec![m, Value::string("a.b")]).unwrap();
        assert!(matches!(v, Value::Int(7)));
    }

    #[test]
    fn merge_nested_recurses_only_on_shared_map_keys() {
        let r = Registry::with_builtins();
        let first = Value::map([("a".to_string(), Value::map([("x".to_string(), Value::Int(1))]))]);
        let second = Value::map([("a".to_string(), Value::map([("y".to_string(), Value::Int(2))]))]);
        let merged = r.call("map.merge_nested", vec![first, second]).unwrap();
        let a = merged.as_map().unwrap().get("a").unwrap().as_map().unwrap();
        assert!(matches!(a.get("x").unwrap(), Value::Int(1)));
        assert!(matches!(a.get("y").unwrap(), Value::Int(2)));
    }

    #[test]
    fn merge_overwrites_non_map_conflicts() {
        let r = Registry::with_builtins();
        let first = Value::map([("a".to_string(), Value::Int(1))]);
        let second = Value::map([("a".to_string(), Value::Int(2))]);
        let merged = r.call("map.merge", vec![first, second]).unwrap();
        assert!(matches!(merged.as_map().unwrap().get("a").unwrap(), Value::Int(2)));
    }
}
