//! Typed argument formatting/parsing for command and result lines.
//!
//! Values are always rendered with plain `Display`, which for every
//! numeric type Rust ships is already locale-independent (`.` as the
//! decimal point, no thousands separators) — there is no separate
//! "POSIX mode" to opt into here, just a rule never to reach for a
//! locale-aware formatter in this module.

use indexmap::IndexMap;
use std::fmt;

use crate::error::{Error, ErrorKind, Result};

/// A single typed wire value, per the `%` directive set in the wire
/// contract: integers, booleans as `yes`/`no`, bare C-strings, and
/// quoted strings that may contain whitespace or `'`.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Bool(bool),
    Char(char),
    CString(String),
    QuotedString(String),
}

impl Value {
    /// Render as it appears after the `=` in `key=value`.
    pub fn render(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::UInt(v) => v.to_string(),
            Value::Bool(v) => if *v { "yes" } else { "no" }.to_string(),
            Value::Char(v) => v.to_string(),
            Value::CString(v) => v.clone(),
            Value::QuotedString(v) => quote(v),
        }
    }
}

/// Quotes `s` in single quotes if it contains whitespace or `'`,
/// escaping `'` and `\` per the wire contract. Returns `s` unquoted
/// otherwise.
pub fn quote(s: &str) -> String {
    if !s.chars().any(|c| c.is_whitespace() || c == '\'') {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// An ordered key→value argument map, preserving insertion order and
/// unknown keys (forward compatibility).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArgumentMap(IndexMap<String, String>);

impl ArgumentMap {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: &Value) -> &mut Self {
        self.0.insert(key.into(), value.render());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses a single required `String` argument.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            Error::protocol(ErrorKind::ExpectedParameter, format!("{key}=<value>"))
        })
    }

    pub fn require_u64(&self, key: &str) -> Result<u64> {
        self.require_str(key)?.parse::<u64>().map_err(|_| {
            Error::protocol(ErrorKind::ExpectedParameter, format!("{key}=<n>"))
        })
    }

    pub fn require_u32(&self, key: &str) -> Result<u32> {
        self.require_str(key)?.parse::<u32>().map_err(|_| {
            Error::protocol(ErrorKind::ExpectedParameter, format!("{key}=<n>"))
        })
    }

    pub fn require_bool(&self, key: &str) -> Result<bool> {
        match self.require_str(key)? {
            "yes" | "1" | "true" => Ok(true),
            "no" | "0" | "false" => Ok(false),
            _ => Err(Error::protocol(
                ErrorKind::ExpectedParameter,
                format!("{key}=<yes|no>"),
            )),
        }
    }

    pub fn optional_str(&self, key: &str) -> Option<&str> {
        self.get(key)
    }

    pub fn optional_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn optional_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some("yes") | Some("1") | Some("true") => true,
            Some("no") | Some("0") | Some("false") => false,
            _ => default,
        }
    }

    /// Renders as `key=value key2=value2 …`, quoting values as needed.
    pub fn render(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={}", quote(v)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parses a `key=value …` tail with quote-aware tokenization.
    /// Single- or double-quoted values may contain escaped quotes
    /// (`\'`, `\"`) and `\\`.
    pub fn parse(input: &str) -> Result<Self> {
        let mut map = IndexMap::new();
        let mut chars = input.chars().peekable();

        loop {
            // skip whitespace
            while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                chars.next();
            }
            if chars.peek().is_none() {
                break;
            }

            // key: up to '='
            let mut key = String::new();
            while let Some(&c) = chars.peek() {
                if c == '=' {
                    break;
                }
                if c.is_whitespace() {
                    return Err(Error::Malformed(format!(
                        "expected '=' after key in argument list: {input}"
                    )));
                }
                key.push(c);
                chars.next();
            }
            match chars.next() {
                Some('=') => {},
                _ => {
                    return Err(Error::Malformed(format!(
                        "expected '=' after key '{key}' in argument list: {input}"
                    )))
                },
            }

            let value = parse_value_token(&mut chars)?;
            map.insert(key, value);
        }

        Ok(Self(map))
    }
}

fn parse_value_token(chars: &mut std::iter::Peekable<std::str::Chars>) -> Result<String> {
    match chars.peek().copied() {
        Some(q @ ('\'' | '"')) => {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    None => return Err(Error::Malformed("unterminated quoted value".into())),
                    Some('\\') => match chars.next() {
                        Some('\'') => value.push('\''),
                        Some('"') => value.push('"'),
                        Some('\\') => value.push('\\'),
                        Some(other) => {
                            value.push('\\');
                            value.push(other);
                        },
                        None => return Err(Error::Malformed("unterminated escape".into())),
                    },
                    Some(c) if c == q => break,
                    Some(c) => value.push(c),
                }
            }
            Ok(value)
        },
        _ => {
            let mut value = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
            Ok(value)
        },
    }
}

impl fmt::Display for ArgumentMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plain_values() {
        let mut m = ArgumentMap::new();
        m.set("jobUUID", "abc-123").set("name", "simple");
        let rendered = m.render();
        let parsed = ArgumentMap::parse(&rendered).unwrap();
        assert_eq!(parsed.get("jobUUID"), Some("abc-123"));
        assert_eq!(parsed.get("name"), Some("simple"));
    }

    #[test]
    fn quotes_values_with_whitespace() {
        let mut m = ArgumentMap::new();
        m.set("master", "host with spaces");
        let rendered = m.render();
        assert!(rendered.contains("'host with spaces'"));
        let parsed = ArgumentMap::parse(&rendered).unwrap();
        assert_eq!(parsed.get("master"), Some("host with spaces"));
    }

    #[test]
    fn handles_escaped_quotes() {
        let mut m = ArgumentMap::new();
        m.set("comment", "it's a \"test\"");
        let rendered = m.render();
        let parsed = ArgumentMap::parse(&rendered).unwrap();
        assert_eq!(parsed.get("comment"), Some("it's a \"test\""));
    }

    #[test]
    fn preserves_unknown_keys_and_order() {
        let parsed = ArgumentMap::parse("a=1 z=2 m=3").unwrap();
        let keys: Vec<_> = parsed.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "z", "m"]);
    }

    #[test]
    fn quote_helper_leaves_simple_tokens_bare() {
        assert_eq!(quote("simple"), "simple");
        assert_eq!(quote("has space"), "'has space'");
        assert_eq!(quote("a'b"), "'a\\'b'");
    }
}
