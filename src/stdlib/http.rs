//! `http.get, post, put, patch, delete, request` (§4.5 HTTP family contract).
//!
//! Runs on `reqwest`'s blocking client so the synchronous expression
//! evaluator and `call` step driver never need to reach into an async
//! runtime; the JSON/HTTP transport (`api::http`) that fronts the engine is
//! the async half and offloads onto worker threads instead.

use super::{bind, Registry};
use crate::value::{ErrorTag, Value, WorkflowError};
use std::time::Duration;

use crate::limits::MAX_HTTP_RESPONSE_BYTES as MAX_RESPONSE_BYTES;
const DEFAULT_TIMEOUT_SECS: f64 = 1800.0;

fn headers_map(v: &Value) -> Result<Vec<(String, String)>, WorkflowError> {
    match v {
        Value::Null => Ok(vec![]),
        Value::Map(m) => m
            .iter()
            .map(|(k, val)| {
                let s = val
                    .as_str()
                    .ok_or_else(|| WorkflowError::type_error("header values must be strings"))?;
                Ok((k.clone(), s.to_string()))
            })
            .collect(),
        _ => Err(WorkflowError::type_error("headers must be a map")),
    }
}

fn query_pairs(v: &Value) -> Result<Vec<(String, String)>, WorkflowError> {
    match v {
        Value::Null => Ok(vec![]),
        Value::Map(m) => m
            .iter()
            .map(|(k, val)| Ok((k.clone(), val.to_string())))
            .collect(),
        _ => Err(WorkflowError::type_error("query must be a map")),
    }
}

fn looks_like_json(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| matches!(b, b'{' | b'[' | b'"'))
}

fn classify_send_error(e: &reqwest::Error) -> WorkflowError {
    if e.is_timeout() {
        WorkflowError::new(e.to_string()).with_tag(ErrorTag::TimeoutError)
    } else if e.is_connect() {
        WorkflowError::new(e.to_string()).with_tag(ErrorTag::ConnectionFailedError)
    } else {
        WorkflowError::new(e.to_string()).with_tag(ErrorTag::ConnectionError)
    }
}

fn do_request(method: reqwest::Method, args: Vec<Value>) -> Result<Value, WorkflowError> {
    let a = bind(args, &["url", "headers", "query", "body", "timeout"]);
    let url = a[0]
        .as_str()
        .ok_or_else(|| WorkflowError::type_error("http.* requires a 'url'"))?;
    let headers = headers_map(&a[1])?;
    let query = query_pairs(&a[2])?;
    let body = &a[3];
    let timeout_secs = a[4].as_f64().unwrap_or(DEFAULT_TIMEOUT_SECS);

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs_f64(timeout_secs))
        .build()
        .map_err(|e| WorkflowError::new(format!("could not build HTTP client: {e}")).with_tag(ErrorTag::SystemError))?;

    let mut builder = client.request(method, url).query(&query);
    for (k, v) in &headers {
        builder = builder.header(k, v);
    }
    // `.json()` sets Content-Type: application/json itself; a caller-supplied
    // header of the same name is added above and simply gets shadowed.
    builder = match body {
        Value::Null => builder,
        Value::Map(_) | Value::List(_) => builder.json(&body.to_json()),
        Value::String(s) => builder.body(s.to_string()),
        Value::Bytes(b) => builder.body(b.to_vec()),
        other => builder.body(other.to_string()),
    };

    let response = builder.send().map_err(|e| classify_send_error(&e))?;
    let status = response.status().as_u16() as i64;
    let mut resp_headers = indexmap::IndexMap::new();
    for (name, value) in response.headers() {
        resp_headers.insert(
            name.as_str().to_lowercase(),
            Value::string(value.to_str().unwrap_or_default()),
        );
    }
    let content_type = resp_headers.get("content-type").and_then(Value::as_str).unwrap_or("").to_string();

    let bytes = response
        .bytes()
        .map_err(|e| classify_send_error(&e))?;
    if bytes.len() > MAX_RESPONSE_BYTES {
        return Err(WorkflowError::resource_limit(format!(
            "HTTP response of {} bytes exceeds the 2 MiB limit",
            bytes.len()
        )));
    }

    let parsed_body = if content_type.contains("json") || looks_like_json(&bytes) {
        serde_json::from_slice::<serde_json::Value>(&bytes)
            .map(|j| Value::from_json(&j))
            .unwrap_or_else(|_| Value::string(String::from_utf8_lossy(&bytes).into_owned()))
    } else {
        Value::string(String::from_utf8_lossy(&bytes).into_owned())
    };

    if status >= 400 {
        return Err(WorkflowError::new(format!("HTTP request failed with status {status}"))
            .with_tag(ErrorTag::HttpError)
            .with_code(status)
            .with_extra("headers", Value::Map(resp_headers))
            .with_extra("body", parsed_body));
    }

    Ok(Value::map([
        ("code".to_string(), Value::Int(status)),
        ("headers".to_string(), Value::Map(resp_headers)),
        ("body".to_string(), parsed_body),
    ]))
}

pub fn register(r: &mut Registry) {
    r.register("http.get", |args| do_request(reqwest::Method::GET, args));
    r.register("http.post", |args| do_request(reqwest::Method::POST, args));
    r.register("http.put", |args| do_request(reqwest::Method::PUT, args));
    r.register("http.patch", |args| do_request(reqwest::Method::PATCH, args));
    r.register("http.delete", |args| do_request(reqwest::Method::DELETE, args));
    r.register("http.request", |args| {
        let a = bind(args, &["method", "url", "headers", "query", "body", "timeout"]);
        let method_str = a[0].as_str().unwrap_or("GET").to_uppercase();
        let method = reqwest::Method::from_bytes(method_str.as_bytes())
            .map_err(|_| WorkflowError::value_error(format!("invalid HTTP method '{method_str}'")))?;
        do_request(method, vec![a[1].clone(), a[2].clone(), a[3].clone(), a[4].clone(), a[5].clone()])
    });
}

/// Retry predicates recognized by the engine's retry facet (§4.6); kept
/// alongside the family that defines their default so both evolve together.
pub fn default_retry(err: &WorkflowError) -> bool {
    if err.has_tag(ErrorTag::ConnectionError) || err.has_tag(ErrorTag::TimeoutError) {
        return true;
    }
    err.has_tag(ErrorTag::HttpError) && matches!(err.code, 429 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_excludes_500() {
        let err = WorkflowError::new("boom").with_tag(ErrorTag::HttpError).with_code(500);
        assert!(!default_retry(&err));
    }

    #[test]
    fn default_retry_includes_503() {
        let err = WorkflowError::new("boom").with_tag(ErrorTag::HttpError).with_code(503);
        assert!(default_retry(&err));
    }

    #[test]
    fn looks_like_json_detects_leading_brace_after_whitespace() {
        assert!(looks_like_json(b"  \n{\"a\":1}"));
        assert!(!looks_like_json(b"plain text"));
    }
}
