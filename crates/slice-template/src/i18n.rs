/*
 * i18n.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Translation lookup and pluralization.
//!
//! Keys are `file` or `file.string`. Tables are loaded lazily from a
//! [`LocaleSource`] the first time a file is referenced under the active
//! locale, and reused until the locale changes. Lookups never fail: a missing
//! key or an unloadable table degrades to the key fragment and a warning.

use crate::locale::{LocaleLines, LocaleSource};
use crate::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

static EXACT_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(\d+)\}").unwrap());
static RANGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+),\s?(\d+|\*)\]").unwrap());
static ANY_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\{\d+\}|\[\d+,\s?(?:\d+|\*)\])\s?").unwrap());

struct LoadedFile {
    locale: String,
    lines: LocaleLines,
}

/// Per-render translation state.
pub struct Translator {
    source: Arc<dyn LocaleSource>,
    locale: String,
    files: HashMap<String, LoadedFile>,
    /// Files in load order, most recent last.
    order: Vec<String>,
}

impl std::fmt::Debug for Translator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translator")
            .field("locale", &self.locale)
            .field("loaded", &self.order)
            .finish()
    }
}

impl Translator {
    pub fn new(source: Arc<dyn LocaleSource>, locale: impl Into<String>) -> Self {
        Self {
            source,
            locale: locale.into(),
            files: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Switch the active locale. Files loaded under another locale are
    /// reloaded on their next use.
    pub fn set_locale(&mut self, locale: impl Into<String>) {
        self.locale = locale.into();
    }

    fn ensure_loaded(&mut self, file: &str) {
        if self
            .files
            .get(file)
            .is_some_and(|loaded| loaded.locale == self.locale)
        {
            return;
        }
        let lines = match self.source.load(file, &self.locale) {
            Ok(lines) => {
                tracing::debug!(file, locale = %self.locale, "loaded locale table");
                lines
            }
            Err(e) => {
                tracing::warn!(file, locale = %self.locale, error = %e, "locale table unavailable");
                LocaleLines::new()
            }
        };
        self.files.insert(
            file.to_string(),
            LoadedFile {
                locale: self.locale.clone(),
                lines,
            },
        );
        self.order.retain(|f| f != file);
        self.order.push(file.to_string());
    }

    fn line(&mut self, key: &str) -> String {
        match key.split_once('.') {
            Some((file, string)) => {
                self.ensure_loaded(file);
                match self.files.get(file).and_then(|f| f.lines.get(string)) {
                    Some(line) => line.clone(),
                    None => {
                        tracing::warn!(key, locale = %self.locale, "missing translation");
                        string.to_string()
                    }
                }
            }
            None => {
                let found = self
                    .order
                    .iter()
                    .rev()
                    .filter_map(|f| self.files.get(f))
                    .find_map(|f| f.lines.get(key));
                match found {
                    Some(line) => line.clone(),
                    None => {
                        tracing::warn!(key, locale = %self.locale, "missing translation");
                        key.to_string()
                    }
                }
            }
        }
    }

    /// Resolve `key` and substitute `params` (a map; anything else means no
    /// parameters).
    pub fn resolve(&mut self, key: &str, params: &Value) -> String {
        let line = self.line(key);
        substitute(&line, params)
    }

    /// Resolve `key` and pick the segment matching `count`.
    ///
    /// `count` may be a number or a collection, in which case its size is
    /// used.
    pub fn inflect(&mut self, key: &str, count: &Value, params: &Value) -> String {
        let line = self.resolve(key, params);
        let number = match count {
            Value::List(_) | Value::Map(_) | Value::Null => count.count() as i64,
            other => other.as_i64().unwrap_or(0),
        };
        select_plural(&line, number)
    }
}

/// Placeholder substitution.
///
/// For each parameter, `:NAME`, `:Name` and `:name` are replaced with the
/// value upper-cased, capitalized and verbatim respectively. All three are
/// applied, in that order, for every parameter.
pub fn substitute(line: &str, params: &Value) -> String {
    let Value::Map(params) = params else {
        return line.to_string();
    };
    let mut line = line.to_string();
    for (name, value) in params {
        let value = value.render();
        line = line.replace(&format!(":{}", name.to_uppercase()), &value.to_uppercase());
        line = line.replace(&format!(":{}", ucfirst(name)), &ucfirst(&value));
        line = line.replace(&format!(":{name}"), &value);
    }
    line
}

/// Upper-case the first character.
pub fn ucfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn strip_marker(segment: &str) -> String {
    ANY_MARKER.replace_all(segment, "").trim().to_string()
}

/// Choose the `|`-separated segment of `line` that applies to `count`.
///
/// An exact `{N}` marker wins over a `[a,b]` / `[a,*]` range; with neither,
/// segment 0 is used for counts up to 1 and segment 1 above that.
pub fn select_plural(line: &str, count: i64) -> String {
    let segments: Vec<&str> = line.split('|').collect();

    let exact = segments.iter().find(|segment| {
        EXACT_MARKER
            .captures(segment)
            .and_then(|c| c[1].parse::<i64>().ok())
            == Some(count)
    });
    if let Some(segment) = exact {
        return strip_marker(segment);
    }

    let ranged = segments.iter().find(|segment| {
        let Some(c) = RANGE_MARKER.captures(segment) else {
            return false;
        };
        let Ok(start) = c[1].parse::<i64>() else {
            return false;
        };
        match &c[2] {
            "*" => count >= start,
            end => end.parse::<i64>().is_ok_and(|end| (start..=end).contains(&count)),
        }
    });
    if let Some(segment) = ranged {
        return strip_marker(segment);
    }

    let fallback = if count > 1 {
        segments.get(1).or(segments.first())
    } else {
        segments.first()
    };
    fallback.map(|s| strip_marker(s)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::MemoryLocaleSource;
    use pretty_assertions::assert_eq;

    const ITEMS: &str = "there {0} no items|there is {1} item|there are [2,*] items";

    fn translator() -> Translator {
        let mut source = MemoryLocaleSource::new();
        source.add(
            "messages",
            "english",
            [
                ("welcome", "Welcome, :name"),
                ("shout", "HEY :NAME"),
                ("apples", "{0} No apples|{1} One apple|[2,10] Some apples|[11,*] Many apples"),
            ],
        );
        source.add("messages", "spanish", [("welcome", "Bienvenido, :name")]);
        source.add("legacy", "english", [("title", "Legacy title")]);
        Translator::new(Arc::new(source), "english")
    }

    fn params(pairs: &[(&str, &str)]) -> Value {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn test_resolve_with_placeholder() {
        let mut t = translator();
        assert_eq!(
            t.resolve("messages.welcome", &params(&[("name", "ada")])),
            "Welcome, ada"
        );
        assert_eq!(t.resolve("messages.shout", &params(&[("name", "ada")])), "HEY ADA");
    }

    #[test]
    fn test_all_three_casings_are_replaced() {
        let line = substitute(":NAME / :Name / :name", &params(&[("name", "ada")]));
        assert_eq!(line, "ADA / Ada / ada");
    }

    #[test]
    fn test_missing_key_returns_fragment() {
        let mut t = translator();
        assert_eq!(t.resolve("messages.nope", &Value::Null), "nope");
        assert_eq!(t.resolve("unknown.key", &Value::Null), "key");
        assert_eq!(t.resolve("bare", &Value::Null), "bare");
    }

    #[test]
    fn test_bare_key_searches_loaded_tables() {
        let mut t = translator();
        assert_eq!(t.resolve("title", &Value::Null), "title");
        t.resolve("legacy.title", &Value::Null);
        assert_eq!(t.resolve("title", &Value::Null), "Legacy title");
    }

    #[test]
    fn test_switching_locale_reloads() {
        let mut t = translator();
        let p = params(&[("name", "Ana")]);
        assert_eq!(t.resolve("messages.welcome", &p), "Welcome, Ana");
        t.set_locale("spanish");
        assert_eq!(t.resolve("messages.welcome", &p), "Bienvenido, Ana");
        t.set_locale("english");
        assert_eq!(t.resolve("messages.welcome", &p), "Welcome, Ana");
    }

    #[test]
    fn test_select_plural_segments() {
        assert_eq!(select_plural(ITEMS, 0), "there no items");
        assert_eq!(select_plural(ITEMS, 1), "there is item");
        assert_eq!(select_plural(ITEMS, 5), "there are items");
    }

    #[test]
    fn test_select_plural_exact_beats_range() {
        let line = "[0,5] few|{3} three";
        assert_eq!(select_plural(line, 3), "three");
        assert_eq!(select_plural(line, 4), "few");
    }

    #[test]
    fn test_select_plural_fallback() {
        assert_eq!(select_plural("apple|apples", 1), "apple");
        assert_eq!(select_plural("apple|apples", 0), "apple");
        assert_eq!(select_plural("apple|apples", 2), "apples");
        assert_eq!(select_plural("apple", 2), "apple");
    }

    #[test]
    fn test_inflect_counts_collections() {
        let mut t = translator();
        let three = Value::from(vec![1i64, 2, 3]);
        assert_eq!(t.inflect("messages.apples", &three, &Value::Null), "Some apples");
        assert_eq!(
            t.inflect("messages.apples", &Value::Int(0), &Value::Null),
            "No apples"
        );
        assert_eq!(
            t.inflect("messages.apples", &Value::Int(50), &Value::Null),
            "Many apples"
        );
    }
}
