//! `json.decode, json.encode, json.encode_to_string` (§4.5).

use super::{bind, Registry};
use crate::value::{Value, WorkflowError};

pub fn register(r: &mut Registry) {
    r.register("json.decode", |args| {
        let a = bind(args, &["data"]);
        let text = match &a[0] {
            Value::String(s) => s.to_string(),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            other => return Err(WorkflowError::type_error(format!("json.decode expects a string or bytes, got {}", other.kind()))),
        };
        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| WorkflowError::value_error(format!("invalid JSON: {e}")))?;
        Ok(Value::from_json(&json))
    });

    r.register("json.encode", |args| {
        let a = bind(args, &["data"]);
        let json = a[0].to_json();
        let text = serde_json::to_string_pretty(&json)
            .map_err(|e| WorkflowError::value_error(format!("cannot encode to JSON: {e}")))?;
        Ok(Value::bytes(text.into_bytes()))
    });

    r.register("json.encode_to_string", |args| {
        let a = bind(args, &["data"]);
        let json = a[0].to_json();
        let text = serde_json::to_string(&json)
            .map_err(|e| WorkflowError::value_error(format!("cannot encode to JSON: {e}")))?;
        Ok(Value::string(text))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_then_encode_to_string_round_trips_structurally() {
        let r = Registry::with_builtins();
        let decoded = r.call("json.decode", vec![Value::string(r#"{"a":1,"b":[true,null]}"#)]).unwrap();
        let encoded = r.call("json.encode_to_string", vec![decoded.clone()]).unwrap();
        let Value::String(s) = encoded else { panic!() };
        let redecoded = r.call("json.decode", vec![Value::string(s.to_string())]).unwrap();
        assert!(decoded.structural_eq(&redecoded));
    }
}
