/*
 * functions.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Functions callable from template expressions.
//!
//! Pure built-ins live here. The translation helpers `__` and
//! `trans_choice` need the render session and are dispatched by the
//! evaluator. Applications add their own functions through a
//! [`FunctionRegistry`]; a registered name shadows a built-in of the same
//! name.

use crate::error::{TemplateError, TemplateResult};
use crate::i18n::ucfirst;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A user-registered function.
pub type UserFunction = Arc<dyn Fn(&[Value]) -> TemplateResult<Value> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, UserFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> TemplateResult<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<&UserFunction> {
        self.functions.get(name)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

fn expect_args(name: &str, args: &[Value], min: usize, max: usize) -> TemplateResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(TemplateError::eval(format!(
            "{name}() expects {expected} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

fn string_fn(name: &str, args: &[Value], f: impl Fn(&str) -> String) -> TemplateResult<Value> {
    expect_args(name, args, 1, 1)?;
    Ok(Value::String(f(&args[0].render())))
}

/// Call a pure built-in. `None` if `name` is not a built-in.
pub fn call_builtin(name: &str, args: &[Value]) -> Option<TemplateResult<Value>> {
    let result = match name {
        "count" => expect_args(name, args, 1, 1).map(|_| Value::from(args[0].count())),
        "isset" => expect_args(name, args, 1, usize::MAX)
            .map(|_| Value::Bool(args.iter().all(|v| !v.is_null()))),
        "empty" => expect_args(name, args, 1, 1).map(|_| Value::Bool(args[0].is_empty())),
        "is_null" => expect_args(name, args, 1, 1).map(|_| Value::Bool(args[0].is_null())),
        "is_array" => expect_args(name, args, 1, 1)
            .map(|_| Value::Bool(matches!(args[0], Value::List(_) | Value::Map(_)))),
        "strtoupper" => string_fn(name, args, str::to_uppercase),
        "strtolower" => string_fn(name, args, str::to_lowercase),
        "ucfirst" => string_fn(name, args, ucfirst),
        "trim" => string_fn(name, args, |s| s.trim().to_string()),
        "implode" => implode(args),
        "explode" => explode(args),
        "str_repeat" => expect_args(name, args, 2, 2).and_then(|_| {
            let times = args[1]
                .as_i64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| TemplateError::eval("str_repeat() count must be non-negative"))?;
            Ok(Value::String(args[0].render().repeat(times)))
        }),
        "in_array" => expect_args(name, args, 2, 3).map(|_| {
            let strict = args.get(2).is_some_and(Value::is_truthy);
            let found = collection_values(&args[1]).any(|item| {
                if strict {
                    item.strict_eq(&args[0])
                } else {
                    item.loose_eq(&args[0])
                }
            });
            Value::Bool(found)
        }),
        "array_keys" => expect_args(name, args, 1, 1).map(|_| match &args[0] {
            Value::Map(m) => Value::List(m.keys().map(|k| Value::from(k.as_str())).collect()),
            Value::List(items) => Value::List((0..items.len()).map(Value::from).collect()),
            _ => Value::List(Vec::new()),
        }),
        "json_encode" => {
            expect_args(name, args, 1, 1).map(|_| Value::String(args[0].to_json().to_string()))
        }
        _ => return None,
    };
    Some(result)
}

fn collection_values(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::List(items) => Box::new(items.iter()),
        Value::Map(m) => Box::new(m.values()),
        _ => Box::new(std::iter::empty()),
    }
}

/// `implode(glue, pieces)` or `implode(pieces)`.
fn implode(args: &[Value]) -> TemplateResult<Value> {
    expect_args("implode", args, 1, 2)?;
    let (glue, pieces) = match args {
        [pieces] => (String::new(), pieces),
        [glue, pieces] => (glue.render(), pieces),
        _ => unreachable!(),
    };
    let joined: Vec<String> = collection_values(pieces).map(Value::render).collect();
    Ok(Value::String(joined.join(&glue)))
}

/// `explode(separator, string)`.
fn explode(args: &[Value]) -> TemplateResult<Value> {
    expect_args("explode", args, 2, 2)?;
    let separator = args[0].render();
    if separator.is_empty() {
        return Err(TemplateError::eval("explode() separator must not be empty"));
    }
    let pieces = args[1].render();
    Ok(Value::List(
        pieces.split(separator.as_str()).map(Value::from).collect(),
    ))
}
