//! `math.abs, math.floor, math.max, math.min` (§4.5).

use super::{bind, Registry};
use crate::value::{Value, WorkflowError};

fn require_numeric(v: &Value, fname: &str) -> Result<(), WorkflowError> {
    if v.is_numeric() {
        Ok(())
    } else {
        Err(WorkflowError::type_error(format!("{fname} expects a number, got {}", v.kind())))
    }
}

pub fn register(r: &mut Registry) {
    r.register("math.abs", |args| {
        let a = bind(args, &["value"]);
        require_numeric(&a[0], "math.abs")?;
        Ok(match &a[0] {
            Value::Int(i) => Value::Int(i.abs()),
            Value::Double(d) => Value::Double(d.abs()),
            _ => unreachable!(),
        })
    });

    r.register("math.floor", |args| {
        let a = bind(args, &["value"]);
        require_numeric(&a[0], "math.floor")?;
        Ok(match &a[0] {
            Value::Int(i) => Value::Int(*i),
            Value::Double(d) => Value::Int(d.floor() as i64),
            _ => unreachable!(),
        })
    });

    r.register("math.max", |args| {
        let a = bind(args, &["x", "y"]);
        require_numeric(&a[0], "math.max")?;
        require_numeric(&a[1], "math.max")?;
        Ok(if a[0].as_f64().unwrap() >= a[1].as_f64().unwrap() { a[0].clone() } else { a[1].clone() })
    });

    r.register("math.min", |args| {
        let a = bind(args, &["x", "y"]);
        require_numeric(&a[0], "math.min")?;
        require_numeric(&a[1], "math.min")?;
        Ok(if a[0].as_f64().unwrap() <= a[1].as_f64().unwrap() { a[0].clone() } else { a[1].clone() })
    });
}
