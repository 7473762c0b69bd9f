//! `uuid.generate` (§4.5): RFC 4122 version 4.

use super::{bind, Registry};
use crate::value::Value;

pub fn register(r: &mut Registry) {
    r.register("uuid.generate", |args| {
        let _ = bind(args, &[]);
        Ok(Value::string(::uuid::Uuid::new_v4().to_string()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_distinct_well_formed_uuids() {
        let r = Registry::with_builtins();
        let a = r.call("uuid.generate", vec![]).unwrap();
        let b = r.call("uuid.generate", vec![]).unwrap();
        let Value::String(a) = a else { panic!() };
        let Value::String(b) = b else { panic!() };
        assert_eq!(a.len(), 36);
        assert_ne!(a, b);
    }
}
