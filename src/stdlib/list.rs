//! `list.concat, list.prepend` (§4.5).

use super::{bind, Registry};
use crate::value::{Value, WorkflowError};

fn require_list<'a>(v: &'a Value, fname: &str) -> Result<&'a Vec<Value>, WorkflowError> {
    v.as_list()
        .ok_or_else(|| WorkflowError::type_error(format!("{fname} expects a list, got {}", v.kind())))
}

pub fn register(r: &mut Registry) {
    r.register("list.concat", |args| {
        let a = bind(args, &["list", "value"]);
        let mut out = require_list(&a[0], "list.concat")?.clone();
        out.push(a[1].clone());
        Ok(Value::List(out))
    });

    r.register("list.prepend", |args| {
        let a = bind(args, &["list", "value"]);
        let list = require_list(&a[0], "list.prepend")?;
        let mut out = Vec::with_capacity(list.len() + 1);
        out.push(a[1].clone());
        out.extend(list.iter().cloned());
        Ok(Value::List(out))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_appends_a_single_value() {
        let r = Registry::with_builtins();
        let v = r.call("list.concat", vec![Value::List(vec![Value::Int(1)]), Value::Int(2)]).unwrap();
        let Value::List(items) = v else { panic!() };
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Value::Int(2)));
    }

    #[test]
    fn prepend_puts_value_first() {
        let r = Registry::with_builtins();
        let v = r.call("list.prepend", vec![Value::List(vec![Value::Int(1)]), Value::Int(0)]).unwrap();
        let Value::List(items) = v else { panic!() };
        assert!(matches!(items[0], Value::Int(0)));
    }
}
