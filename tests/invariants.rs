//! Quantified invariants (§8) as `proptest` properties rather than fixed
//! example cases, the way `agent-backplane`/`Weavegraph` reach for property
//! testing over hand-picked inputs for laws like these.

use nika::scope::Scope;
use nika::value::Value;
use proptest::prelude::*;
use std::collections::HashSet;

fn arb_key() -> impl Strategy<Value = String> {
    "[a-z]{1,6}"
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|i| Value::Int(i as i64)),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::string),
    ]
}

proptest! {
    /// Map insertion order survives a `Value -> JSON -> Value` round trip
    /// regardless of which permutation of keys was inserted, since decode
    /// re-sorts alphabetically and re-encode preserves whatever order decode
    /// produced — the round trip is stable, not order-preserving of the
    /// original insertion.
    #[test]
    fn map_round_trip_through_json_is_alphabetical_and_stable(
        keys in prop::collection::hash_set(arb_key(), 1..8),
    ) {
        let mut sorted: Vec<String> = keys.into_iter().collect();
        sorted.sort();
        let mut m = indexmap::IndexMap::new();
        // Insert in reverse to prove decode doesn't just happen to match
        // insertion order.
        for k in sorted.iter().rev() {
            m.insert(k.clone(), Value::Int(1));
        }
        let v = Value::Map(m);
        let json = v.to_json();
        let back = Value::from_json(&json);
        let got_keys: Vec<String> = back.as_map().unwrap().keys().cloned().collect();
        prop_assert_eq!(got_keys, sorted);

        // And the round trip is idempotent: encoding the decoded value again
        // produces the same JSON.
        let json2 = back.to_json();
        prop_assert_eq!(json, json2);
    }

    /// `x // y == floor(x / y)` for any `y != 0`; `y == 0` always raises
    /// `ZeroDivisionError` rather than panicking or returning a sentinel.
    #[test]
    fn floor_div_matches_floor_of_quotient(x in -1000i64..1000, y in -1000i64..1000) {
        prop_assume!(y != 0);
        let result = nika::expr::eval(
            &nika::expr::parse(&format!("{x} // {y}")).unwrap(),
            &nika::expr::EvalContext { scope: &Scope::root(), registry: &nika::stdlib::Registry::with_builtins() },
        ).unwrap();
        let expected = (x as f64 / y as f64).floor() as i64;
        prop_assert_eq!(result.as_i64(), Some(expected));
    }

    #[test]
    fn floor_div_by_zero_always_raises(x in -1000i64..1000) {
        let err = nika::expr::eval(
            &nika::expr::parse(&format!("{x} // 0")).unwrap(),
            &nika::expr::EvalContext { scope: &Scope::root(), registry: &nika::stdlib::Registry::with_builtins() },
        ).unwrap_err();
        prop_assert!(err.has_tag(nika::value::ErrorTag::ZeroDivisionError));
    }

    /// `set(n, v)` followed by `get(n)` returns `v` in a freshly built chain
    /// of arbitrary depth, and writes through to whichever frame already
    /// defines the name rather than always shadowing at the leaf.
    #[test]
    fn scope_set_then_get_round_trips(depth in 0usize..5, v in arb_scalar()) {
        let root = Scope::root();
        let mut leaf = root.clone();
        for _ in 0..depth {
            leaf = leaf.child();
        }
        leaf.set("n", v.clone());
        prop_assert!(leaf.get("n").unwrap().structural_eq(&v));
    }

    #[test]
    fn scope_set_writes_through_to_defining_parent(v in arb_scalar()) {
        let root = Scope::root();
        root.set_local("n", Value::Null);
        let child = root.child();
        child.set("n", v.clone());
        // The write went to root's frame, not a new local in child.
        prop_assert!(!child.defines_locally("n"));
        prop_assert!(root.get("n").unwrap().structural_eq(&v));
    }
}

#[test]
fn error_round_trip_preserves_message_code_and_tags() {
    use nika::value::{ErrorTag, WorkflowError};
    let tags: HashSet<ErrorTag> = [ErrorTag::HttpError, ErrorTag::TimeoutError].into();
    let err = WorkflowError::new("boom").with_code(503);
    let mut err = err;
    for t in &tags {
        err = err.with_tag(*t);
    }
    let back = WorkflowError::from_value(&err.to_value());
    assert_eq!(back.message, err.message);
    assert_eq!(back.code, err.code);
    assert_eq!(back.tags, err.tags);
}
