//! `sys.get_env, sys.log, sys.now, sys.sleep, sys.sleep_until` (§4.5).

use super::{bind, Registry};
use crate::value::{Value, WorkflowError};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Pseudo-variables the emulator exposes when the process environment does
/// not override them.
static DEFAULT_ENV: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("GOOGLE_CLOUD_PROJECT_ID", "local-emulator-project");
    m.insert("GOOGLE_CLOUD_PROJECT_NUMBER", "0");
    m.insert("GOOGLE_CLOUD_LOCATION", "local");
    m.insert("GOOGLE_CLOUD_WORKFLOW_ID", "unknown");
    m.insert("GOOGLE_CLOUD_WORKFLOW_REVISION_ID", "unknown");
    m.insert("GOOGLE_CLOUD_WORKFLOW_EXECUTION_ID", "unknown");
    m
});

pub fn register(r: &mut Registry) {
    r.register("sys.get_env", |args| {
        let a = bind(args, &["name", "default"]);
        let name = a[0]
            .as_str()
            .ok_or_else(|| WorkflowError::type_error("sys.get_env expects a string name"))?
            .to_string();
        if let Ok(v) = std::env::var(&name) {
            return Ok(Value::string(v));
        }
        if let Some(v) = DEFAULT_ENV.get(name.as_str()) {
            return Ok(Value::string(*v));
        }
        Ok(a[1].clone())
    });

    r.register("sys.log", |args| {
        let a = bind(args, &["text", "severity", "json_payload"]);
        let severity = a[1].as_str().unwrap_or("INFO").to_uppercase();
        let message = match a[0] {
            Value::Null => a[2].to_string(),
            _ => a[0].to_string(),
        };
        match severity.as_str() {
            "ERROR" | "CRITICAL" => tracing::error!(target: "workflow", "{message}"),
            "WARNING" => tracing::warn!(target: "workflow", "{message}"),
            "DEBUG" => tracing::debug!(target: "workflow", "{message}"),
            _ => tracing::info!(target: "workflow", "{message}"),
        }
        Ok(Value::Null)
    });

    r.register("sys.now", |_args| {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Ok(Value::Double(secs))
    });

    r.register("sys.sleep", |args| {
        let a = bind(args, &["seconds"]);
        let secs = a[0]
            .as_f64()
            .ok_or_else(|| WorkflowError::type_error("sys.sleep expects a number of seconds"))?;
        if secs > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(secs));
        }
        Ok(Value::Null)
    });

    r.register("sys.sleep_until", |args| {
        let a = bind(args, &["time"]);
        let target = a[0]
            .as_str()
            .ok_or_else(|| WorkflowError::type_error("sys.sleep_until expects an RFC3339 string"))?;
        let parsed = chrono::DateTime::parse_from_rfc3339(target)
            .map_err(|e| WorkflowError::value_error(format!("invalid timestamp '{target}': {e}")))?;
        let now = chrono::Utc::now();
        let delta = parsed.with_timezone(&chrono::Utc) - now;
        if let Ok(d) = delta.to_std() {
            std::thread::sleep(d);
        }
        Ok(Value::Null)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_env_falls_back_to_emulator_default() {
        let r = Registry::with_builtins();
        let v = r
            .call("sys.get_env", vec![Value::string("GOOGLE_CLOUD_PROJECT_ID"), Value::Null])
            .unwrap();
        assert!(matches!(&v, Value::String(s) if s.as_ref() == "local-emulator-project"));
    }

    #[test]
    fn get_env_uses_caller_default_when_unset() {
        let r = Registry::with_builtins();
        let v = r
            .call(
                "sys.get_env",
                vec![Value::string("NIKA_TEST_NONEXISTENT_VAR"), Value::string("fallback")],
            )
            .unwrap();
        assert!(matches!(&v, Value::String(s) if s.as_ref() == "fallback"));
    }
}
