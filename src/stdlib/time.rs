//! `time.format, time.parse` (§4.5): RFC3339 and RFC3339-nano timestamps,
//! plus Unix-seconds conversion.

use super::{bind, Registry};
use crate::value::{Value, WorkflowError};
use chrono::{DateTime, SecondsFormat, Utc};

pub fn register(r: &mut Registry) {
    r.register("time.format", |args| {
        let a = bind(args, &["seconds"]);
        let secs = a[0]
            .as_f64()
            .ok_or_else(|| WorkflowError::type_error("time.format expects a number of seconds since the epoch"))?;
        let whole = secs.floor() as i64;
        let nanos = ((secs - whole as f64) * 1_000_000_000.0).round() as u32;
        let dt = DateTime::<Utc>::from_timestamp(whole, nanos)
            .ok_or_else(|| WorkflowError::value_error(format!("timestamp {secs} is out of range")))?;
        Ok(Value::string(dt.to_rfc3339_opts(SecondsFormat::Nanos, true)))
    });

    r.register("time.parse", |args| {
        let a = bind(args, &["value"]);
        let s = a[0]
            .as_str()
            .ok_or_else(|| WorkflowError::type_error("time.parse expects an RFC3339 string"))?;
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| WorkflowError::value_error(format!("invalid RFC3339 timestamp '{s}': {e}")))?;
        let secs = dt.timestamp() as f64 + dt.timestamp_subsec_nanos() as f64 / 1_000_000_000.0;
        Ok(Value::Double(secs))
    });
}
