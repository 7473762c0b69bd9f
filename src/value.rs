//! Runtime value model (§3/§4.1).
//!
//! `Value` is the tagged union every expression, step result, and stdlib
//! call passes around. Maps preserve insertion order (`IndexMap`) so that
//! clone/serialize/iterate round-trip identically, per the invariant in §3.

use indexmap::IndexMap;
use serde_json::Value as Json;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// The seven runtime kinds plus the shared error carrier.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(Arc<str>),
    Bytes(Arc<[u8]>),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(Arc::from(s.into()))
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(Arc::from(b.into()))
    }

    pub fn map(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Value::Map(entries.into_iter().collect())
    }

    /// `truthy(v)` is false iff v is null or the boolean false.
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Numeric coercion to f64, used by arithmetic on int/double pairs.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    /// Structural equality with int/double cross-kind comparison (§4.2).
    pub fn structural_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (a, b) if a.is_numeric() && b.is_numeric() => {
                a.as_f64().unwrap() == b.as_f64().unwrap()
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.structural_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|bv| v.structural_eq(bv)))
            }
            _ => false,
        }
    }

    /// Deep clone, mandatory before assignments that would otherwise widen
    /// aliasing of a composite value (§4.1).
    pub fn deep_clone(&self) -> Value {
        // `Value`'s own Clone already deep-copies Vec/IndexMap contents;
        // this exists as the explicit call site the engine uses so intent
        // is visible at assignment points.
        self.clone()
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number((*i).into()),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.to_string()),
            Value::Bytes(b) => Json::String(String::from_utf8_lossy(b).into_owned()),
            Value::List(l) => Json::Array(l.iter().map(Value::to_json).collect()),
            Value::Map(m) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in m {
                    obj.insert(k.clone(), v.to_json());
                }
                Json::Object(obj)
            }
        }
    }

    /// Decode a `serde_json::Value` into our `Value`. Integers that fit
    /// `i64` become `Int`, otherwise `Double`; object keys have no defined
    /// order in JSON so they are sorted alphabetically (§4.1).
    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            Json::String(s) => Value::string(s.clone()),
            Json::Array(a) => Value::List(a.iter().map(Value::from_json).collect()),
            Json::Object(o) => {
                let mut keys: Vec<&String> = o.keys().collect();
                keys.sort();
                let mut map = IndexMap::with_capacity(o.len());
                for k in keys {
                    map.insert(k.clone(), Value::from_json(&o[k]));
                }
                Value::Map(map)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::List(_) | Value::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}
impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// The closed tag vocabulary from §3. Kept as an enum so retry predicates and
/// `except` matching can't typo a tag name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorTag {
    HttpError,
    ConnectionError,
    ConnectionFailedError,
    TimeoutError,
    SystemError,
    TypeError,
    ValueError,
    KeyError,
    IndexError,
    ZeroDivisionError,
    RecursionError,
    ResourceLimitError,
    ParallelNestingError,
    UnhandledBranchError,
    NotFound,
    AuthenticationError,
    OperationError,
    ResponseTypeError,
    MemoryLimitExceededError,
    ResultSizeLimitExceededError,
}

impl ErrorTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorTag::HttpError => "HttpError",
            ErrorTag::ConnectionError => "ConnectionError",
            ErrorTag::ConnectionFailedError => "ConnectionFailedError",
            ErrorTag::TimeoutError => "TimeoutError",
            ErrorTag::SystemError => "SystemError",
            ErrorTag::TypeError => "TypeError",
            ErrorTag::ValueError => "ValueError",
            ErrorTag::KeyError => "KeyError",
            ErrorTag::IndexError => "IndexError",
            ErrorTag::ZeroDivisionError => "ZeroDivisionError",
            ErrorTag::RecursionError => "RecursionError",
            ErrorTag::ResourceLimitError => "ResourceLimitError",
            ErrorTag::ParallelNestingError => "ParallelNestingError",
            ErrorTag::UnhandledBranchError => "UnhandledBranchError",
            ErrorTag::NotFound => "NotFound",
            ErrorTag::AuthenticationError => "AuthenticationError",
            ErrorTag::OperationError => "OperationError",
            ErrorTag::ResponseTypeError => "ResponseTypeError",
            ErrorTag::MemoryLimitExceededError => "MemoryLimitExceededError",
            ErrorTag::ResultSizeLimitExceededError => "ResultSizeLimitExceededError",
        }
    }

    pub fn parse(s: &str) -> Option<ErrorTag> {
        use ErrorTag::*;
        Some(match s {
            "HttpError" => HttpError,
            "ConnectionError" => ConnectionError,
            "ConnectionFailedError" => ConnectionFailedError,
            "TimeoutError" => TimeoutError,
            "SystemError" => SystemError,
            "TypeError" => TypeError,
            "ValueError" => ValueError,
            "KeyError" => KeyError,
            "IndexError" => IndexError,
            "ZeroDivisionError" => ZeroDivisionError,
            "RecursionError" => RecursionError,
            "ResourceLimitError" => ResourceLimitError,
            "ParallelNestingError" => ParallelNestingError,
            "UnhandledBranchError" => UnhandledBranchError,
            "NotFound" => NotFound,
            "AuthenticationError" => AuthenticationError,
            "OperationError" => OperationError,
            "ResponseTypeError" => ResponseTypeError,
            "MemoryLimitExceededError" => MemoryLimitExceededError,
            "ResultSizeLimitExceededError" => ResultSizeLimitExceededError,
            _ => return None,
        })
    }
}

/// The structured workflow error (§3). Carries a message, a numeric code
/// (conventionally an HTTP-like status for `HttpError`), a tag set, and
/// sparse extras (e.g. `headers`/`body` on `HttpError`).
#[derive(Debug, Clone)]
pub struct WorkflowError {
    pub message: String,
    pub code: i64,
    pub tags: HashSet<ErrorTag>,
    pub extra: IndexMap<String, Value>,
}

impl WorkflowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: 0,
            tags: HashSet::new(),
            extra: IndexMap::new(),
        }
    }

    pub fn with_tag(mut self, tag: ErrorTag) -> Self {
        self.tags.insert(tag);
        self
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn has_tag(&self, tag: ErrorTag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::new(msg).with_tag(ErrorTag::TypeError)
    }
    pub fn value_error(msg: impl Into<String>) -> Self {
        Self::new(msg).with_tag(ErrorTag::ValueError)
    }
    pub fn key_error(msg: impl Into<String>) -> Self {
        Self::new(msg).with_tag(ErrorTag::KeyError)
    }
    pub fn index_error(msg: impl Into<String>) -> Self {
        Self::new(msg).with_tag(ErrorTag::IndexError)
    }
    pub fn zero_division(msg: impl Into<String>) -> Self {
        Self::new(msg).with_tag(ErrorTag::ZeroDivisionError)
    }
    pub fn resource_limit(msg: impl Into<String>) -> Self {
        Self::new(msg).with_tag(ErrorTag::ResourceLimitError)
    }
    pub fn recursion(msg: impl Into<String>) -> Self {
        Self::new(msg).with_tag(ErrorTag::RecursionError)
    }
    pub fn parallel_nesting(msg: impl Into<String>) -> Self {
        Self::new(msg).with_tag(ErrorTag::ParallelNestingError)
    }
    pub fn unhandled_branch(msg: impl Into<String>) -> Self {
        Self::new(msg).with_tag(ErrorTag::UnhandledBranchError)
    }

    /// Bidirectional mapping to/from a `Value` map (§3): `message`, `code`,
    /// `tags`, plus any extras merged in at the top level.
    pub fn to_value(&self) -> Value {
        let mut map = IndexMap::new();
        map.insert("message".to_string(), Value::string(self.message.clone()));
        map.insert("code".to_string(), Value::Int(self.code));
        map.insert(
            "tags".to_string(),
            Value::List(
                self.tags
                    .iter()
                    .map(|t| Value::string(t.as_str()))
                    .collect(),
            ),
        );
        for (k, v) in &self.extra {
            map.insert(k.clone(), v.clone());
        }
        Value::Map(map)
    }

    pub fn from_value(v: &Value) -> WorkflowError {
        let Some(map) = v.as_map() else {
            return WorkflowError::new(v.to_string());
        };
        let message = map
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let code = match map.get("code") {
            Some(Value::Int(i)) => *i,
            Some(Value::Double(d)) => *d as i64,
            _ => 0,
        };
        let tags = map
            .get("tags")
            .and_then(Value::as_list)
            .map(|l| {
                l.iter()
                    .filter_map(Value::as_str)
                    .filter_map(ErrorTag::parse)
                    .collect()
            })
            .unwrap_or_default();
        let extra = map
            .iter()
            .filter(|(k, _)| k.as_str() != "message" && k.as_str() != "code" && k.as_str() != "tags")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        WorkflowError {
            message,
            code,
            tags,
            extra,
        }
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkflowError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_rules() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(Value::Bool(true).truthy());
        assert!(Value::Int(0).truthy());
        assert!(Value::string("").truthy());
        assert!(Value::List(vec![]).truthy());
        assert!(Value::Map(IndexMap::new()).truthy());
    }

    #[test]
    fn numeric_structural_eq_crosses_kinds() {
        assert!(Value::Int(2).structural_eq(&Value::Double(2.0)));
        assert!(!Value::Int(2).structural_eq(&Value::string("2")));
    }

    #[test]
    fn map_preserves_insertion_order_through_json_roundtrip() {
        let mut m = IndexMap::new();
        m.insert("z".to_string(), Value::Int(1));
        m.insert("a".to_string(), Value::Int(2));
        let v = Value::Map(m);
        let json = v.to_json();
        let back = Value::from_json(&json);
        // JSON objects have no order; decode sorts alphabetically.
        let keys: Vec<&String> = back.as_map().unwrap().keys().collect();
        assert_eq!(keys, vec!["a", "z"]);
    }

    #[test]
    fn error_roundtrips_through_value() {
        let err = WorkflowError::new("boom")
            .with_code(42)
            .with_tag(ErrorTag::HttpError)
            .with_extra("body", Value::string("oops"));
        let v = err.to_value();
        let back = WorkflowError::from_value(&v);
        assert_eq!(back.message, "boom");
        assert_eq!(back.code, 42);
        assert!(back.has_tag(ErrorTag::HttpError));
        assert_eq!(back.extra.get("body").unwrap().as_str(), Some("oops"));
    }
}
