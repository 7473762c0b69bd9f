//! `text.*` family (§4.5): string/bytes conversion, regex search and
//! replace, splitting, substring, case folding, URL encoding.

use super::{bind, Registry};
use crate::value::{Value, WorkflowError};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

/// Characters left unescaped by `url_encode`/`url_encode_plus`, matching
/// the common "unreserved" RFC 3986 set.
const ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn as_str<'a>(v: &'a Value, fname: &str) -> Result<&'a str, WorkflowError> {
    v.as_str()
        .ok_or_else(|| WorkflowError::type_error(format!("{fname} expects a string")))
}

fn compile_regex(pattern: &str) -> Result<Regex, WorkflowError> {
    Regex::new(pattern).map_err(|e| WorkflowError::value_error(format!("invalid regex '{pattern}': {e}")))
}

pub fn register(r: &mut Registry) {
    r.register("text.decode", |args| {
        let a = bind(args, &["data"]);
        match &a[0] {
            Value::Bytes(b) => String::from_utf8(b.to_vec())
                .map(Value::string)
                .map_err(|e| WorkflowError::value_error(format!("not valid UTF-8: {e}"))),
            other => Err(WorkflowError::type_error(format!("text.decode expects bytes, got {}", other.kind()))),
        }
    });

    r.register("text.encode", |args| {
        let a = bind(args, &["source"]);
        let s = as_str(&a[0], "text.encode")?;
        Ok(Value::bytes(s.as_bytes().to_vec()))
    });

    r.register("text.find_all", |args| {
        let a = bind(args, &["source", "substr"]);
        let source = as_str(&a[0], "text.find_all")?;
        let substr = as_str(&a[1], "text.find_all")?;
        if substr.is_empty() {
            return Ok(Value::List(vec![]));
        }
        let mut out = Vec::new();
        let mut start = 0;
        while let Some(pos) = source[start..].find(substr) {
            out.push(Value::Int((start + pos) as i64));
            start += pos + substr.len();
        }
        Ok(Value::List(out))
    });

    r.register("text.find_all_regex", |args| {
        let a = bind(args, &["source", "pattern"]);
        let source = as_str(&a[0], "text.find_all_regex")?;
        let pattern = as_str(&a[1], "text.find_all_regex")?;
        let re = compile_regex(pattern)?;
        Ok(Value::List(
            re.find_iter(source).map(|m| Value::string(m.as_str())).collect(),
        ))
    });

    r.register("text.match_regex", |args| {
        let a = bind(args, &["source", "pattern"]);
        let source = as_str(&a[0], "text.match_regex")?;
        let pattern = as_str(&a[1], "text.match_regex")?;
        let anchored = format!("^(?:{pattern})$");
        let re = compile_regex(&anchored)?;
        Ok(Value::Bool(re.is_match(source)))
    });

    r.register("text.replace_all", |args| {
        let a = bind(args, &["source", "substr", "replacement"]);
        let source = as_str(&a[0], "text.replace_all")?;
        let substr = as_str(&a[1], "text.replace_all")?;
        let replacement = as_str(&a[2], "text.replace_all")?;
        Ok(Value::string(source.replace(substr, replacement)))
    });

    r.register("text.replace_all_regex", |args| {
        let a = bind(args, &["source", "pattern", "replacement"]);
        let source = as_str(&a[0], "text.replace_all_regex")?;
        let pattern = as_str(&a[1], "text.replace_all_regex")?;
        let replacement = as_str(&a[2], "text.replace_all_regex")?;
        let re = compile_regex(pattern)?;
        Ok(Value::string(re.replace_all(source, replacement).into_owned()))
    });

    r.register("text.split", |args| {
        let a = bind(args, &["source", "separator"]);
        let source = as_str(&a[0], "text.split")?;
        let separator = as_str(&a[1], "text.split")?;
        let parts: Vec<Value> = if separator.is_empty() {
            source.chars().map(|c| Value::string(c.to_string())).collect()
        } else {
            source.split(separator).map(Value::string).collect()
        };
        Ok(Value::List(parts))
    });

    r.register("text.substring", |args| {
        let a = bind(args, &["source", "start", "end"]);
        let source = as_str(&a[0], "text.substring")?;
        let chars: Vec<char> = source.chars().collect();
        let len = chars.len() as i64;
        let clamp = |i: i64| i.clamp(0, len) as usize;
        let start = match &a[1] {
            Value::Int(i) => clamp(*i),
            _ => 0,
        };
        let end = match &a[2] {
            Value::Int(i) => clamp(*i),
            _ => chars.len(),
        };
        if start >= end {
            return Ok(Value::string(""));
        }
        Ok(Value::string(chars[start..end].iter().collect::<String>()))
    });

    r.register("text.to_lower", |args| {
        let a = bind(args, &["source"]);
        Ok(Value::string(as_str(&a[0], "text.to_lower")?.to_lowercase()))
    });

    r.register("text.to_upper", |args| {
        let a = bind(args, &["source"]);
        Ok(Value::string(as_str(&a[0], "text.to_upper")?.to_uppercase()))
    });

    r.register("text.url_decode", |args| {
        let a = bind(args, &["source"]);
        let s = as_str(&a[0], "text.url_decode")?;
        let decoded = percent_decode_str(&s.replace('+', " "))
            .decode_utf8()
            .map_err(|e| WorkflowError::value_error(format!("invalid percent-encoding: {e}")))?;
        Ok(Value::string(decoded.into_owned()))
    });

    r.register("text.url_encode", |args| {
        let a = bind(args, &["source"]);
        let s = as_str(&a[0], "text.url_encode")?;
        Ok(Value::string(utf8_percent_encode(s, ENCODE_SET).to_string()))
    });

    r.register("text.url_encode_plus", |args| {
        let a = bind(args, &["source"]);
        let s = as_str(&a[0], "text.url_encode_plus")?;
        let encoded = utf8_percent_encode(s, ENCODE_SET).to_string().replace("%20", "+");
        Ok(Value::string(encoded))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_clamps_out_of_range_bounds() {
        let r = Registry::with_builtins();
        let v = r
            .call(
                "text.substring",
                vec![Value::string("hello"), Value::Int(-5), Value::Int(999)],
            )
            .unwrap();
        assert!(matches!(&v, Value::String(s) if s.as_ref() == "hello"));
    }

    #[test]
    fn match_regex_is_full_string_anchored() {
        let r = Registry::with_builtins();
        let yes = r.call("text.match_regex", vec![Value::string("abc123"), Value::string(r"[a-z]+\d+")]).unwrap();
        assert!(matches!(yes, Value::Bool(true)));
        let no = r.call("text.match_regex", vec![Value::string("xabc123"), Value::string(r"[a-z]+\d+")]).unwrap();
        assert!(matches!(no, Value::Bool(false)));
    }

    #[test]
    fn find_all_returns_non_overlapping_offsets() {
        let r = Registry::with_builtins();
        let v = r.call("text.find_all", vec![Value::string("aXaXa"), Value::string("a")]).unwrap();
        let Value::List(items) = v else { panic!() };
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn url_encode_plus_uses_plus_for_space() {
        let r = Registry::with_builtins();
        let v = r.call("text.url_encode_plus", vec![Value::string("a b")]).unwrap();
        assert!(matches!(&v, Value::String(s) if s.as_ref() == "a+b"));
    }
}
