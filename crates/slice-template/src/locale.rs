/*
 * locale.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Locale line sources.
//!
//! A [`LocaleSource`] maps a (file, locale) pair to a flat key → string
//! table. The translator loads each table lazily and caches it for the
//! rest of a render.

use crate::error::{TemplateError, TemplateResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A flat key → line table.
pub type LocaleLines = HashMap<String, String>;

/// Trait for loading locale tables.
pub trait LocaleSource: Send + Sync {
    fn load(&self, file: &str, locale: &str) -> TemplateResult<LocaleLines>;
}

/// Locale tables held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLocaleSource {
    tables: HashMap<(String, String), LocaleLines>,
}

impl MemoryLocaleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the lines of `file` for `locale`.
    pub fn add<K, V>(
        &mut self,
        file: impl Into<String>,
        locale: impl Into<String>,
        lines: impl IntoIterator<Item = (K, V)>,
    ) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tables.insert(
            (file.into(), locale.into()),
            lines
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }
}

impl LocaleSource for MemoryLocaleSource {
    fn load(&self, file: &str, locale: &str) -> TemplateResult<LocaleLines> {
        self.tables
            .get(&(file.to_string(), locale.to_string()))
            .cloned()
            .ok_or_else(|| TemplateError::LocaleLoad {
                file: file.to_string(),
                locale: locale.to_string(),
                message: "no such locale table".to_string(),
            })
    }
}

/// Locale tables stored as JSON files: `<root>/<locale>/<file>.json`.
///
/// Each file holds an object of strings. Nested objects are flattened with
/// dotted keys, so `{"nav": {"home": "Home"}}` defines `nav.home`.
#[derive(Debug, Clone)]
pub struct JsonLocaleSource {
    root: PathBuf,
}

impl JsonLocaleSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn flatten_into(
    prefix: &str,
    value: serde_json::Value,
    out: &mut LocaleLines,
) -> Result<(), String> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, value) in map {
                let key = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(&key, value, out)?;
            }
            Ok(())
        }
        serde_json::Value::String(s) => {
            out.insert(prefix.to_string(), s);
            Ok(())
        }
        serde_json::Value::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
            Ok(())
        }
        other => Err(format!("`{prefix}` must be a string, found {other}")),
    }
}

impl LocaleSource for JsonLocaleSource {
    fn load(&self, file: &str, locale: &str) -> TemplateResult<LocaleLines> {
        let fail = |message: String| TemplateError::LocaleLoad {
            file: file.to_string(),
            locale: locale.to_string(),
            message,
        };
        if file.is_empty() || file.contains(['/', '\\', '.']) || locale.contains(['/', '\\']) {
            return Err(fail("invalid locale file name".to_string()));
        }
        let path = self.root.join(locale).join(format!("{file}.json"));
        let text = std::fs::read_to_string(&path)
            .map_err(|e| fail(format!("{}: {e}", path.display())))?;
        let json: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| fail(e.to_string()))?;
        if !json.is_object() {
            return Err(fail("top level must be an object".to_string()));
        }
        let mut lines = LocaleLines::new();
        flatten_into("", json, &mut lines).map_err(fail)?;
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_locale_source() {
        let mut source = MemoryLocaleSource::new();
        source.add("messages", "english", [("welcome", "Welcome")]);

        let lines = source.load("messages", "english").unwrap();
        assert_eq!(lines.get("welcome").map(String::as_str), Some("Welcome"));
        assert!(matches!(
            source.load("messages", "spanish"),
            Err(TemplateError::LocaleLoad { .. })
        ));
    }

    #[test]
    fn test_json_locale_source_flattens_nested_objects() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("english")).unwrap();
        std::fs::write(
            dir.path().join("english/messages.json"),
            r#"{"welcome": "Welcome, :name", "nav": {"home": "Home"}, "max": 3}"#,
        )
        .unwrap();

        let source = JsonLocaleSource::new(dir.path());
        let lines = source.load("messages", "english").unwrap();
        assert_eq!(lines.get("welcome").map(String::as_str), Some("Welcome, :name"));
        assert_eq!(lines.get("nav.home").map(String::as_str), Some("Home"));
        assert_eq!(lines.get("max").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_json_locale_source_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("english")).unwrap();
        std::fs::write(dir.path().join("english/bad.json"), r#"{"list": [1]}"#).unwrap();

        let source = JsonLocaleSource::new(dir.path());
        assert!(source.load("bad", "english").is_err());
        assert!(source.load("missing", "english").is_err());
        assert!(source.load("../secrets", "english").is_err());
    }
}
