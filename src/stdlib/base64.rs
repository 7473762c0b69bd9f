//! `base64.encode, base64.decode` (§4.5).

use super::{bind, Registry};
use crate::value::{Value, WorkflowError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub fn register(r: &mut Registry) {
    r.register("base64.encode", |args| {
        let a = bind(args, &["data"]);
        let bytes: Vec<u8> = match &a[0] {
            Value::Bytes(b) => b.to_vec(),
            Value::String(s) => s.as_bytes().to_vec(),
            other => {
                return Err(WorkflowError::type_error(format!(
                    "base64.encode expects bytes or a string, got {}",
                    other.kind()
                )))
            }
        };
        Ok(Value::string(STANDARD.encode(bytes)))
    });

    r.register("base64.decode", |args| {
        let a = bind(args, &["data"]);
        let s = a[0]
            .as_str()
            .ok_or_else(|| WorkflowError::type_error("base64.decode expects a string"))?;
        let bytes = STANDARD
            .decode(s)
            .map_err(|e| WorkflowError::value_error(format!("invalid base64: {e}")))?;
        Ok(Value::bytes(bytes))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let r = Registry::with_builtins();
        let encoded = r.call("base64.encode", vec![Value::string("hello")]).unwrap();
        let decoded = r.call("base64.decode", vec![encoded]).unwrap();
        assert!(matches!(decoded, Value::Bytes(b) if &*b == b"hello"));
    }
}
