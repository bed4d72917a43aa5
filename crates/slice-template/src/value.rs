/*
 * value.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template values.
//!
//! [`Value`] is the dynamic type that template expressions evaluate to. Maps
//! keep insertion order so that `@foreach` over a map visits keys in the order
//! the data was supplied.

use indexmap::IndexMap;
use std::cmp::Ordering;

/// A value that can be bound in a template context.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// A null/missing value.
    #[default]
    Null,

    /// A boolean value.
    Bool(bool),

    /// An integer value.
    Int(i64),

    /// A floating point value.
    Float(f64),

    /// A string value.
    String(String),

    /// A list of values.
    List(Vec<Value>),

    /// An ordered map of string keys to values.
    Map(IndexMap<String, Value>),
}

impl Value {
    /// Check if this value is "truthy" for conditional evaluation.
    ///
    /// - `false`, `0`, `0.0`, `""`, `"0"`, empty lists/maps and null are falsy
    /// - everything else is truthy
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty() && s != "0",
            Value::List(items) => !items.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// The `empty(...)` predicate: the negation of truthiness.
    pub fn is_empty(&self) -> bool {
        !self.is_truthy()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Number of elements for collections, `None` for scalars.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::List(items) => Some(items.len()),
            Value::Map(m) => Some(m.len()),
            _ => None,
        }
    }

    /// `count(...)` semantics: collection size, 0 for null, 1 for scalars.
    pub fn count(&self) -> usize {
        match self {
            Value::Null => 0,
            other => other.len().unwrap_or(1),
        }
    }

    /// Short name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Look up a key (map) or index (list).
    pub fn get(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(key.render().as_str()),
            Value::List(items) => key
                .as_i64()
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Get a nested field by path.
    ///
    /// For example, `get_path(&["employee", "salary"])` on a Map containing
    /// `{"employee": {"salary": 50000}}` returns the salary value.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        match path.split_first() {
            None => Some(self),
            Some((first, rest)) => self
                .get(&Value::String((*first).to_string()))
                .and_then(|v| v.get_path(rest)),
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Integer view of the value, if it has one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
            }
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        match self {
            Value::Int(_) | Value::Float(_) => true,
            Value::String(s) => !s.trim().is_empty() && s.trim().parse::<f64>().is_ok(),
            _ => false,
        }
    }

    /// Render this value as a string for output.
    ///
    /// - String: returned as-is
    /// - Bool: "1" or "" (empty for false)
    /// - Int/Float: decimal form; integral floats print without a fraction
    /// - List/Map: JSON
    /// - Null: ""
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(true) => "1".to_string(),
            Value::Bool(false) => String::new(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::String(s) => s.clone(),
            Value::List(_) | Value::Map(_) => self.to_json().to_string(),
        }
    }

    /// Convert to a `serde_json::Value`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Loose equality (`==`): numeric when both sides look numeric, otherwise
    /// by truthiness against bools/null and by rendered text for the rest.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(_), _) | (_, Value::Bool(_)) | (Value::Null, _) | (_, Value::Null) => {
                self.is_truthy() == other.is_truthy()
            }
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.loose_eq(w)))
            }
            _ if self.is_numeric() && other.is_numeric() => self.as_f64() == other.as_f64(),
            _ => self.render() == other.render(),
        }
    }

    /// Strict equality (`===`): same variant and same value.
    pub fn strict_eq(&self, other: &Value) -> bool {
        self == other
    }

    /// Ordering used by `<`, `<=`, `>`, `>=`.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if self.is_numeric() && other.is_numeric() {
            return self.as_f64()?.partial_cmp(&other.as_f64()?);
        }
        match (self, other) {
            (Value::List(a), Value::List(b)) => a.len().partial_cmp(&b.len()),
            (Value::Map(a), Value::Map(b)) => a.len().partial_cmp(&b.len()),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(m) => {
                Value::Map(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        i64::try_from(n).map(Value::Int).unwrap_or(Value::Float(n as f64))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Bool(false).is_truthy());

        assert!(Value::from("hello").is_truthy());
        assert!(Value::from("false").is_truthy()); // "false" string is truthy!
        assert!(!Value::from("0").is_truthy());
        assert!(!Value::from("").is_truthy());

        assert!(Value::Int(3).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());

        assert!(Value::from(vec![false]).is_truthy()); // non-empty list
        assert!(!Value::List(vec![]).is_truthy());
        assert!(!Value::Map(IndexMap::new()).is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn test_get_path() {
        let value = Value::from(json!({"employee": {"salary": "50000"}}));

        assert_eq!(
            value.get_path(&["employee", "salary"]),
            Some(&Value::from("50000"))
        );
        assert_eq!(value.get_path(&["employee", "name"]), None);
        assert_eq!(value.get_path(&["nonexistent"]), None);
    }

    #[test]
    fn test_list_index() {
        let value = Value::from(vec!["a", "b"]);
        assert_eq!(value.get(&Value::Int(1)), Some(&Value::from("b")));
        assert_eq!(value.get(&Value::from("0")), Some(&Value::from("a")));
        assert_eq!(value.get(&Value::Int(5)), None);
    }

    #[test]
    fn test_render() {
        assert_eq!(Value::Null.render(), "");
        assert_eq!(Value::Bool(true).render(), "1");
        assert_eq!(Value::Bool(false).render(), "");
        assert_eq!(Value::Float(2.0).render(), "2");
        assert_eq!(Value::Float(2.5).render(), "2.5");
        assert_eq!(Value::from(vec![1i64, 2]).render(), "[1,2]");
    }

    #[test]
    fn test_json_map_keeps_order() {
        let value = Value::from(json!({"b": 1, "a": 2}));
        match value {
            Value::Map(m) => {
                let keys: Vec<&str> = m.keys().map(String::as_str).collect();
                assert_eq!(keys, vec!["b", "a"]);
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_loose_and_strict_equality() {
        assert!(Value::Int(1).loose_eq(&Value::from("1")));
        assert!(!Value::Int(1).strict_eq(&Value::from("1")));
        assert!(Value::Null.loose_eq(&Value::Bool(false)));
        assert!(Value::from("abc").loose_eq(&Value::from("abc")));
        assert!(!Value::from("abc").loose_eq(&Value::from("abd")));
    }

    #[test]
    fn test_compare() {
        assert_eq!(Value::Int(2).compare(&Value::from("10")), Some(Ordering::Less));
        assert_eq!(
            Value::from("b").compare(&Value::from("a")),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_count() {
        assert_eq!(Value::Null.count(), 0);
        assert_eq!(Value::from(vec![1i64, 2, 3]).count(), 3);
        assert_eq!(Value::from("x").count(), 1);
    }
}
