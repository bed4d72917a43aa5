/*
 * resolver.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template resolution.
//!
//! A [`TemplateResolver`] maps a logical, dot-separated template name
//! (`pages.home`) to a source location and its modification time, and loads
//! the source text.

use crate::error::{TemplateError, TemplateResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A template name resolved to a concrete source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTemplate {
    /// The logical name that was resolved.
    pub name: String,
    /// Source location. Also the input of the cache key.
    pub path: PathBuf,
    /// Last modification time of the source, when known.
    pub modified: Option<SystemTime>,
}

/// Trait for locating and loading template sources.
pub trait TemplateResolver: Send + Sync {
    /// Resolve a logical name, failing with [`TemplateError::TemplateNotFound`].
    fn resolve(&self, name: &str) -> TemplateResult<ResolvedTemplate>;

    /// Read the source text of a resolved template.
    fn load(&self, template: &ResolvedTemplate) -> TemplateResult<String>;

    /// Whether `name` resolves.
    fn exists(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }
}

/// Resolver that loads templates from a directory.
///
/// `pages.home` with extension `.slice.html` maps to
/// `<root>/pages/home.slice.html`. Names with empty segments (`a..b`, a
/// leading dot) never resolve, so a name cannot climb out of the root.
#[derive(Debug, Clone)]
pub struct FileSystemResolver {
    root: PathBuf,
    extension: String,
}

impl FileSystemResolver {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The path a logical name maps to, or `None` if the name is malformed.
    pub fn template_path(&self, name: &str) -> Option<PathBuf> {
        let segments: Vec<&str> = name.split(['.', '/']).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        let mut path = self.root.clone();
        let (last, dirs) = segments.split_last()?;
        for dir in dirs {
            path.push(dir);
        }
        path.push(format!("{last}{}", self.extension));
        Some(path)
    }
}

impl TemplateResolver for FileSystemResolver {
    fn resolve(&self, name: &str) -> TemplateResult<ResolvedTemplate> {
        let not_found = || TemplateError::TemplateNotFound {
            name: name.to_string(),
        };
        let path = self.template_path(name).ok_or_else(not_found)?;
        let metadata = std::fs::metadata(&path).map_err(|_| not_found())?;
        if !metadata.is_file() {
            return Err(not_found());
        }
        Ok(ResolvedTemplate {
            name: name.to_string(),
            path,
            modified: metadata.modified().ok(),
        })
    }

    fn load(&self, template: &ResolvedTemplate) -> TemplateResult<String> {
        Ok(std::fs::read_to_string(&template.path)?)
    }
}

#[derive(Debug, Clone)]
struct MemoryTemplate {
    source: String,
    modified: Option<SystemTime>,
}

/// Resolver backed by an in-memory map.
///
/// Useful for testing and for templates bundled into the application. The
/// resolved path is the logical name itself.
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    templates: HashMap<String, MemoryTemplate>,
}

impl MemoryResolver {
    /// Create a new empty memory resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template, stamped with the current time.
    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.add_with_mtime(name, source, Some(SystemTime::now()))
    }

    /// Add a template with an explicit modification time.
    pub fn add_with_mtime(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
        modified: Option<SystemTime>,
    ) -> &mut Self {
        self.templates.insert(
            name.into(),
            MemoryTemplate {
                source: source.into(),
                modified,
            },
        );
        self
    }

    /// Create a resolver with the given templates.
    pub fn with_templates(
        templates: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        let mut resolver = Self::new();
        for (name, source) in templates {
            resolver.add(name, source);
        }
        resolver
    }
}

impl TemplateResolver for MemoryResolver {
    fn resolve(&self, name: &str) -> TemplateResult<ResolvedTemplate> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| TemplateError::TemplateNotFound {
                name: name.to_string(),
            })?;
        Ok(ResolvedTemplate {
            name: name.to_string(),
            path: PathBuf::from(name),
            modified: template.modified,
        })
    }

    fn load(&self, template: &ResolvedTemplate) -> TemplateResult<String> {
        self.templates
            .get(&template.name)
            .map(|t| t.source.clone())
            .ok_or_else(|| TemplateError::TemplateNotFound {
                name: template.name.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_path_maps_dots_to_directories() {
        let resolver = FileSystemResolver::new("/views", ".slice.html");
        assert_eq!(
            resolver.template_path("pages.home"),
            Some(PathBuf::from("/views/pages/home.slice.html"))
        );
        assert_eq!(
            resolver.template_path("index"),
            Some(PathBuf::from("/views/index.slice.html"))
        );
        assert_eq!(
            resolver.template_path("layouts/main"),
            Some(PathBuf::from("/views/layouts/main.slice.html"))
        );
    }

    #[test]
    fn test_template_path_rejects_empty_segments() {
        let resolver = FileSystemResolver::new("/views", ".slice.html");
        assert_eq!(resolver.template_path("..secret"), None);
        assert_eq!(resolver.template_path("a..b"), None);
        assert_eq!(resolver.template_path(""), None);
    }

    #[test]
    fn test_filesystem_resolver() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("partials")).unwrap();
        std::fs::write(dir.path().join("partials/nav.slice.html"), "<nav/>").unwrap();

        let resolver = FileSystemResolver::new(dir.path(), ".slice.html");
        let resolved = resolver.resolve("partials.nav").unwrap();
        assert!(resolved.modified.is_some());
        assert_eq!(resolver.load(&resolved).unwrap(), "<nav/>");

        assert!(resolver.exists("partials.nav"));
        assert!(!resolver.exists("partials.footer"));
        assert!(matches!(
            resolver.resolve("partials"),
            Err(TemplateError::TemplateNotFound { .. })
        ));
    }

    #[test]
    fn test_memory_resolver() {
        let mut resolver = MemoryResolver::new();
        resolver.add_with_mtime("home", "Hi", None);
        resolver.add("about", "About");

        let home = resolver.resolve("home").unwrap();
        assert_eq!(home.modified, None);
        assert_eq!(resolver.load(&home).unwrap(), "Hi");
        assert!(resolver.resolve("about").unwrap().modified.is_some());
        assert!(matches!(
            resolver.resolve("missing"),
            Err(TemplateError::TemplateNotFound { .. })
        ));
    }

    #[test]
    fn test_memory_resolver_with_templates() {
        let resolver = MemoryResolver::with_templates([("a", "content a"), ("b", "content b")]);
        assert!(resolver.exists("a"));
        assert!(resolver.exists("b"));
        assert!(!resolver.exists("c"));
    }
}
