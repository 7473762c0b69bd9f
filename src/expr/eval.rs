//! Expression evaluator (§4.2).

use super::ast::{BinOp, Expr, InterpPart, UnOp};
use crate::scope::Scope;
use crate::stdlib::Registry;
use crate::value::{Value, WorkflowError};

pub struct EvalContext<'a> {
    pub scope: &'a Scope,
    pub registry: &'a Registry,
}

pub fn eval(expr: &Expr, ctx: &EvalContext) -> Result<Value, WorkflowError> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Double(d) => Ok(Value::Double(*d)),
        Expr::Str(s) => Ok(Value::string(s.clone())),
        Expr::Ident(name) => ctx.scope.get(name),
        Expr::Unary(op, inner) => eval_unary(op, eval(inner, ctx)?),
        Expr::Binary(lhs, BinOp::And, rhs) => {
            let l = eval(lhs, ctx)?;
            if !l.truthy() {
                return Ok(l);
            }
            eval(rhs, ctx)
        }
        Expr::Binary(lhs, BinOp::Or, rhs) => {
            let l = eval(lhs, ctx)?;
            if l.truthy() {
                return Ok(l);
            }
            eval(rhs, ctx)
        }
        Expr::Binary(lhs, op, rhs) => {
            let l = eval(lhs, ctx)?;
            let r = eval(rhs, ctx)?;
            eval_binary(op, l, r)
        }
        Expr::Property(base, field) => {
            let base = eval(base, ctx)?;
            match &base {
                Value::Map(m) => m
                    .get(field)
                    .cloned()
                    .ok_or_else(|| WorkflowError::key_error(format!("key '{field}' not found"))),
                _ => Err(WorkflowError::type_error(format!(
                    "cannot access property '{field}' on a {}",
                    base.kind()
                ))),
            }
        }
        Expr::Index(base, idx) => {
            let base = eval(base, ctx)?;
            let idx = eval(idx, ctx)?;
            eval_index(&base, &idx)
        }
        Expr::Call(name, args) => {
            let mut values = Vec::with_capacity(args.len());
            for a in args {
                values.push(eval(a, ctx)?);
            }
            let full = name.join(".");
            ctx.registry.call(&full, values)
        }
        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for i in items {
                out.push(eval(i, ctx)?);
            }
            Ok(Value::List(out))
        }
        Expr::Map(entries) => {
            let mut out = indexmap::IndexMap::with_capacity(entries.len());
            for (k, v) in entries {
                out.insert(k.clone(), eval(v, ctx)?);
            }
            Ok(Value::Map(out))
        }
        Expr::Membership {
            needle,
            haystack,
            negated,
        } => {
            let n = eval(needle, ctx)?;
            let h = eval(haystack, ctx)?;
            let found = membership(&n, &h)?;
            Ok(Value::Bool(found != *negated))
        }
        Expr::Interpolation(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    InterpPart::Literal(s) => out.push_str(s),
                    InterpPart::Expr(e) => out.push_str(&eval(e, ctx)?.to_string()),
                }
            }
            Ok(Value::string(out))
        }
    }
}

fn eval_unary(op: &UnOp, v: Value) -> Result<Value, WorkflowError> {
    match (op, &v) {
        (UnOp::Not, _) => Ok(Value::Bool(!v.truthy())),
        (UnOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnOp::Neg, Value::Double(d)) => Ok(Value::Double(-d)),
        (UnOp::Neg, other) => Err(WorkflowError::type_error(format!(
            "unary '-' is not defined for {}",
            other.kind()
        ))),
    }
}

fn eval_binary(op: &BinOp, l: Value, r: Value) -> Result<Value, WorkflowError> {
    use BinOp::*;
    match op {
        Add => add(l, r),
        Sub => numeric_op(l, r, "-", |a, b| a - b, |a, b| a - b),
        Mul => numeric_op(l, r, "*", |a, b| a * b, |a, b| a * b),
        Div => divide(l, r),
        Mod => modulo(l, r),
        FloorDiv => floor_div(l, r),
        Eq => Ok(Value::Bool(l.structural_eq(&r))),
        NotEq => Ok(Value::Bool(!l.structural_eq(&r))),
        Lt => compare(l, r, |o| o.is_lt()),
        Gt => compare(l, r, |o| o.is_gt()),
        Le => compare(l, r, |o| o.is_le()),
        Ge => compare(l, r, |o| o.is_ge()),
        And | Or => unreachable!("short-circuit ops handled in eval()"),
    }
}

fn add(l: Value, r: Value) -> Result<Value, WorkflowError> {
    match (&l, &r) {
        (Value::String(a), Value::String(b)) => Ok(Value::string(format!("{a}{b}"))),
        (Value::String(_), _) | (_, Value::String(_)) if !(l.is_numeric() && r.is_numeric()) => {
            Err(WorkflowError::type_error(
                "cannot add string and non-string; convert explicitly",
            ))
        }
        (Value::List(a), Value::List(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(Value::List(out))
        }
        _ => numeric_op(l, r, "+", |a, b| a + b, |a, b| a + b),
    }
}

fn numeric_op(
    l: Value,
    r: Value,
    sym: &str,
    int_op: fn(i64, i64) -> i64,
    f_op: fn(f64, f64) -> f64,
) -> Result<Value, WorkflowError> {
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
        (a, b) if a.is_numeric() && b.is_numeric() => {
            Ok(Value::Double(f_op(a.as_f64().unwrap(), b.as_f64().unwrap())))
        }
        _ => Err(WorkflowError::type_error(format!(
            "'{sym}' is not defined for {} and {}",
            l.kind(),
            r.kind()
        ))),
    }
}

fn divide(l: Value, r: Value) -> Result<Value, WorkflowError> {
    let (a, b) = numeric_pair(&l, &r)?;
    if b == 0.0 {
        return Err(WorkflowError::zero_division("division by zero"));
    }
    Ok(Value::Double(a / b))
}

fn modulo(l: Value, r: Value) -> Result<Value, WorkflowError> {
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(WorkflowError::zero_division("modulo by zero"));
            }
            Ok(Value::Int(a % b))
        }
        _ => {
            let (a, b) = numeric_pair(&l, &r)?;
            if b == 0.0 {
                return Err(WorkflowError::zero_division("modulo by zero"));
            }
            Ok(Value::Double(a % b))
        }
    }
}

fn floor_div(l: Value, r: Value) -> Result<Value, WorkflowError> {
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(WorkflowError::zero_division("floor division by zero"));
            }
            Ok(Value::Int(floor_div_i64(*a, *b)))
        }
        _ => {
            let (a, b) = numeric_pair(&l, &r)?;
            if b == 0.0 {
                return Err(WorkflowError::zero_division("floor division by zero"));
            }
            Ok(Value::Int((a / b).floor() as i64))
        }
    }
}

fn floor_div_i64(a: i64, b: i64) -> i64 {
    let q = a / b;
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        q - 1
    } else {
        q
    }
}

fn numeric_pair(l: &Value, r: &Value) -> Result<(f64, f64), WorkflowError> {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(WorkflowError::type_error(format!(
            "expected numbers, got {} and {}",
            l.kind(),
            r.kind()
        ))),
    }
}

fn compare(l: Value, r: Value, pred: fn(std::cmp::Ordering) -> bool) -> Result<Value, WorkflowError> {
    let ord = match (&l, &r) {
        (a, b) if a.is_numeric() && b.is_numeric() => a
            .as_f64()
            .unwrap()
            .partial_cmp(&b.as_f64().unwrap())
            .ok_or_else(|| WorkflowError::value_error("NaN is not orderable"))?,
        (Value::String(a), Value::String(b)) => a.as_ref().cmp(b.as_ref()),
        _ => {
            return Err(WorkflowError::type_error(format!(
                "comparison is not defined for {} and {}",
                l.kind(),
                r.kind()
            )))
        }
    };
    Ok(Value::Bool(pred(ord)))
}

fn eval_index(base: &Value, idx: &Value) -> Result<Value, WorkflowError> {
    match base {
        Value::List(items) => {
            let Value::Int(i) = idx else {
                return Err(WorkflowError::type_error("list index must be an int"));
            };
            if *i < 0 {
                return Err(WorkflowError::index_error("negative list indices are not permitted"));
            }
            items
                .get(*i as usize)
                .cloned()
                .ok_or_else(|| WorkflowError::index_error(format!("index {i} out of range")))
        }
        Value::Map(m) => {
            let Value::String(key) = idx else {
                return Err(WorkflowError::type_error("map index must be a string"));
            };
            m.get(key.as_ref())
                .cloned()
                .ok_or_else(|| WorkflowError::key_error(format!("key '{key}' not found")))
        }
        Value::String(s) => {
            let Value::Int(i) = idx else {
                return Err(WorkflowError::type_error("string index must be an int"));
            };
            let chars: Vec<char> = s.chars().collect();
            let real_idx = if *i < 0 {
                chars.len() as i64 + i
            } else {
                *i
            };
            chars
                .get(real_idx as usize)
                .map(|c| Value::string(c.to_string()))
                .ok_or_else(|| WorkflowError::index_error(format!("index {i} out of range")))
        }
        _ => Err(WorkflowError::type_error(format!(
            "cannot index into a {}",
            base.kind()
        ))),
    }
}

fn membership(needle: &Value, haystack: &Value) -> Result<bool, WorkflowError> {
    match haystack {
        Value::List(items) => Ok(items.iter().any(|v| v.structural_eq(needle))),
        Value::Map(m) => match needle {
            Value::String(key) => Ok(m.contains_key(key.as_ref())),
            _ => Err(WorkflowError::type_error("map containment key must be a string")),
        },
        Value::String(s) => match needle {
            Value::String(sub) => Ok(s.contains(sub.as_ref())),
            _ => Err(WorkflowError::type_error("string containment needle must be a string")),
        },
        _ => Err(WorkflowError::type_error(format!(
            "'in' is not defined for container type {}",
            haystack.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::Parser;
    use crate::stdlib::Registry;

    fn eval_str(src: &str) -> Result<Value, WorkflowError> {
        let expr = Parser::parse(src).unwrap();
        let scope = Scope::root();
        let registry = Registry::with_builtins();
        eval(&expr, &EvalContext { scope: &scope, registry: &registry })
    }

    #[test]
    fn floor_div_matches_floor_of_quotient() {
        assert!(matches!(eval_str("7 // 2").unwrap(), Value::Int(3)));
        assert!(matches!(eval_str("-7 // 2").unwrap(), Value::Int(-4)));
    }

    #[test]
    fn division_by_zero_raises() {
        let err = eval_str("1 / 0").unwrap_err();
        assert!(err.has_tag(crate::value::ErrorTag::ZeroDivisionError));
    }

    #[test]
    fn string_plus_non_string_is_type_error() {
        let err = eval_str("\"a\" + 1").unwrap_err();
        assert!(err.has_tag(crate::value::ErrorTag::TypeError));
    }

    #[test]
    fn negative_list_index_rejected() {
        let err = eval_str("[1,2,3][-1]").unwrap_err();
        assert!(err.has_tag(crate::value::ErrorTag::IndexError));
    }

    #[test]
    fn and_or_short_circuit() {
        assert!(matches!(eval_str("false and (1/0 == 1)").unwrap(), Value::Bool(false)));
        assert!(matches!(eval_str("true or (1/0 == 1)").unwrap(), Value::Bool(true)));
    }
}
