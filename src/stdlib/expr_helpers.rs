//! `default, keys, len, type, int, double, string, bool` (§4.5).

use super::{bind, Registry};
use crate::value::{Value, WorkflowError};

pub fn register(r: &mut Registry) {
    r.register("default", |args| {
        let a = bind(args, &["value", "default"]);
        Ok(if matches!(a[0], Value::Null) { a[1].clone() } else { a[0].clone() })
    });

    r.register("keys", |args| {
        let a = bind(args, &["map"]);
        match &a[0] {
            Value::Map(m) => Ok(Value::List(m.keys().map(|k| Value::string(k.clone())).collect())),
            other => Err(WorkflowError::type_error(format!("keys() expects a map, got {}", other.kind()))),
        }
    });

    r.register("len", |args| {
        let a = bind(args, &["value"]);
        let n = match &a[0] {
            Value::String(s) => s.chars().count() as i64,
            Value::Bytes(b) => b.len() as i64,
            Value::List(l) => l.len() as i64,
            Value::Map(m) => m.len() as i64,
            other => {
                return Err(WorkflowError::type_error(format!(
                    "len() is not defined for {}",
                    other.kind()
                )))
            }
        };
        Ok(Value::Int(n))
    });

    r.register("type", |args| {
        let a = bind(args, &["value"]);
        Ok(Value::string(a[0].kind()))
    });

    r.register("int", |args| {
        let a = bind(args, &["value"]);
        match &a[0] {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Double(d) => Ok(Value::Int(*d as i64)),
            Value::Bool(b) => Ok(Value::Int(*b as i64)),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| WorkflowError::value_error(format!("cannot convert '{s}' to int"))),
            other => Err(WorkflowError::type_error(format!(
                "cannot convert {} to int",
                other.kind()
            ))),
        }
    });

    r.register("double", |args| {
        let a = bind(args, &["value"]);
        match &a[0] {
            Value::Int(i) => Ok(Value::Double(*i as f64)),
            Value::Double(d) => Ok(Value::Double(*d)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| WorkflowError::value_error(format!("cannot convert '{s}' to double"))),
            other => Err(WorkflowError::type_error(format!(
                "cannot convert {} to double",
                other.kind()
            ))),
        }
    });

    r.register("string", |args| {
        let a = bind(args, &["value"]);
        Ok(Value::string(match &a[0] {
            Value::String(s) => s.to_string(),
            other => other.to_string(),
        }))
    });

    r.register("bool", |args| {
        let a = bind(args, &["value"]);
        Ok(Value::Bool(a[0].truthy()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_falls_back_only_on_null() {
        let r = Registry::with_builtins();
        assert!(matches!(r.call("default", vec![Value::Null, Value::Int(7)]).unwrap(), Value::Int(7)));
        assert!(matches!(r.call("default", vec![Value::Int(3), Value::Int(7)]).unwrap(), Value::Int(3)));
    }

    #[test]
    fn len_counts_bytes_not_utf8_chars_for_bytes() {
        let r = Registry::with_builtins();
        let v = r.call("len", vec![Value::bytes(vec![1, 2, 3])]).unwrap();
        assert!(matches!(v, Value::Int(3)));
    }

    #[test]
    fn type_returns_kind_name() {
        let r = Registry::with_builtins();
        let v = r.call("type", vec![Value::map([])]).unwrap();
        assert!(matches!(&v, Value::String(s) if s.as_ref() == "map"));
    }
}
