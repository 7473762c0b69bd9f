//! `events.create_callback_endpoint, events.await_callback` (§4.5).
//!
//! A callback endpoint is a resource name the workflow hands to an external
//! caller; `await_callback` blocks the calling step until something posts to
//! that endpoint through the JSON/HTTP transport (`api::http`), or until the
//! timeout elapses. The registry here is the in-process rendezvous point;
//! the transport layer delivers posted payloads via [`deliver`].

use super::{bind, Registry};
use crate::value::{Value, WorkflowError};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct CallbackTable {
    delivered: Mutex<HashMap<String, Value>>,
    ready: Condvar,
}

static TABLE: Lazy<CallbackTable> = Lazy::new(|| CallbackTable {
    delivered: Mutex::new(HashMap::new()),
    ready: Condvar::new(),
});

/// Invoked by the HTTP transport when a POST arrives at a callback URL.
/// Returns `false` if no execution is currently awaiting that id.
pub fn deliver(callback_id: &str, payload: Value) {
    let mut map = TABLE.delivered.lock().unwrap_or_else(|e| e.into_inner());
    map.insert(callback_id.to_string(), payload);
    TABLE.ready.notify_all();
}

fn await_delivery(callback_id: &str, timeout: Duration) -> Option<Value> {
    let deadline = Instant::now() + timeout;
    let mut map = TABLE.delivered.lock().unwrap_or_else(|e| e.into_inner());
    loop {
        if let Some(v) = map.remove(callback_id) {
            return Some(v);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        let (guard, result) = TABLE
            .ready
            .wait_timeout(map, remaining)
            .unwrap_or_else(|e| e.into_inner());
        map = guard;
        if result.timed_out() && !map.contains_key(callback_id) {
            return None;
        }
    }
}

pub fn register(r: &mut Registry) {
    r.register("events.create_callback_endpoint", |args| {
        let _ = bind(args, &[]);
        let id = ::uuid::Uuid::new_v4().to_string();
        Ok(Value::map([
            ("url".to_string(), Value::string(format!("/callbacks/{id}"))),
            ("id".to_string(), Value::string(id)),
        ]))
    });

    r.register("events.await_callback", |args| {
        let a = bind(args, &["callback", "timeout"]);
        let id = match &a[0] {
            Value::Map(m) => m
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| WorkflowError::value_error("callback map is missing 'id'"))?
                .to_string(),
            Value::String(s) => s.to_string(),
            other => {
                return Err(WorkflowError::type_error(format!(
                    "events.await_callback expects the callback map or id, got {}",
                    other.kind()
                )))
            }
        };
        let timeout_secs = a[1].as_f64().unwrap_or(43200.0);
        match await_delivery(&id, Duration::from_secs_f64(timeout_secs)) {
            Some(v) => Ok(v),
            None => Err(WorkflowError::new(format!("callback '{id}' was not received within the timeout"))
                .with_tag(crate::value::ErrorTag::TimeoutError)),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn await_callback_returns_once_delivered_from_another_thread() {
        let r = Registry::with_builtins();
        let endpoint = r.call("events.create_callback_endpoint", vec![]).unwrap();
        let id = endpoint.as_map().unwrap().get("id").unwrap().as_str().unwrap().to_string();
        let id_clone = id.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            deliver(&id_clone, Value::Int(99));
        });
        let v = r.call("events.await_callback", vec![endpoint, Value::Double(5.0)]).unwrap();
        assert!(matches!(v, Value::Int(99)));
    }

    #[test]
    fn await_callback_times_out_when_nothing_arrives() {
        let r = Registry::with_builtins();
        let err = r
            .call(
                "events.await_callback",
                vec![Value::string("never-delivered"), Value::Double(0.05)],
            )
            .unwrap_err();
        assert!(err.has_tag(crate::value::ErrorTag::TimeoutError));
    }
}
