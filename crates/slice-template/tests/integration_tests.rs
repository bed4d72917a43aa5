/*
 * integration_tests.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Integration tests for slice-template using test fixtures.
 */

use pretty_assertions::assert_eq;
use slice_template::{
    ByteCache, EngineConfig, Engine, Environment, FileSystemCache, JsonLocaleSource,
    TemplateContext, TemplateError, Value,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Helper to get the path to test fixtures
fn fixture_path(name: &str) -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    Path::new(manifest_dir).join("test-fixtures").join(name)
}

fn fixture_engine() -> Engine {
    Engine::for_directory(fixture_path(""), EngineConfig::default())
}

/// Collapse whitespace runs so assertions don't depend on fixture line breaks.
fn squash(output: &str) -> String {
    output.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn users_data() -> TemplateContext {
    let text = fs::read_to_string(fixture_path("data/users.json")).unwrap();
    TemplateContext::from_json(serde_json::from_str(&text).unwrap()).unwrap()
}

#[test]
fn test_greeting_with_default_and_include() {
    let engine = fixture_engine();

    let out = engine.render("greeting", TemplateContext::new()).unwrap();
    assert_eq!(squash(&out), r##"Hello, stranger! <a href="#">Home</a>"##);

    let out = engine.render("greeting", [("name", "Ada")]).unwrap();
    assert_eq!(squash(&out), r##"Hello, Ada! <a href="#">Home</a>"##);
}

#[test]
fn test_forelse_over_json_data() {
    let engine = fixture_engine();

    let out = engine.render("users", users_data()).unwrap();
    assert_eq!(squash(&out), "<ul> <li>Ada (admin)</li> <li>Bob</li> </ul>");

    let out = engine
        .render("users", [("users", Vec::<Value>::new())])
        .unwrap();
    assert_eq!(squash(&out), "<ul> <li>No users</li> </ul>");
}

#[test]
fn test_child_extends_layout() {
    let out = fixture_engine()
        .render("pages.child", TemplateContext::new())
        .unwrap();
    assert_eq!(
        squash(&out),
        "<title>Child</title> <nav>child > home</nav> <main> child content </main>"
    );
}

#[test]
fn test_grandchild_parent_layering() {
    let out = fixture_engine()
        .render("pages.grandchild", TemplateContext::new())
        .unwrap();
    assert_eq!(
        squash(&out),
        "<title>Child</title> <nav>grandchild > child > home</nav> <main> grandchild content </main>"
    );
}

#[test]
fn test_layout_alone_uses_defaults() {
    let out = fixture_engine()
        .render("layouts.master", TemplateContext::new())
        .unwrap();
    assert_eq!(squash(&out), "<title>Site</title> <nav>home</nav> <main></main>");
}

#[test]
fn test_each_with_empty_template() {
    let engine = fixture_engine();

    let out = engine.render("links", [("labels", vec!["a", "b"])]).unwrap();
    assert_eq!(squash(&out), r##"<a href="#">a</a> <a href="#">b</a>"##);

    let out = engine
        .render("links", [("labels", Vec::<String>::new())])
        .unwrap();
    assert_eq!(squash(&out), "<em>no links</em>");
}

#[test]
fn test_unterminated_section_is_reported() {
    let err = fixture_engine()
        .render("broken", TemplateContext::new())
        .unwrap_err();
    match err {
        TemplateError::UnterminatedSection { names } => assert_eq!(names, vec!["sidebar"]),
        other => panic!("expected UnterminatedSection, got {other}"),
    }
}

#[test]
fn test_missing_template() {
    let err = fixture_engine()
        .render("pages.missing", TemplateContext::new())
        .unwrap_err();
    assert!(matches!(err, TemplateError::TemplateNotFound { name } if name == "pages.missing"));
}

#[test]
fn test_translations_from_json_files() {
    let mut engine = fixture_engine()
        .with_locale_source(Arc::new(JsonLocaleSource::new(fixture_path("lang"))));
    let data = || TemplateContext::from([("name", Value::from("ada")), ("count", Value::Int(3))]);

    let out = engine.render("i18n", data()).unwrap();
    assert_eq!(squash(&out), "Welcome, Ada 3 apples Home");

    engine.set_locale("spanish");
    let out = engine.render("i18n", data()).unwrap();
    assert_eq!(squash(&out), "Bienvenido, Ada 3 manzanas Inicio");
}

#[test]
fn test_config_file_fixture() {
    let config = EngineConfig::from_file(fixture_path("slice.toml")).unwrap();
    assert_eq!(config.environment, Environment::Testing);
    assert_eq!(config.cache_ttl, 600);
}

#[test]
fn test_compile_is_idempotent() {
    let engine = fixture_engine();
    let first = engine.compile("pages.grandchild").unwrap();
    let second = engine.compile("pages.grandchild").unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_integer_overflow_in_templates_does_not_abort() {
    let engine = Engine::new(slice_template::MemoryResolver::with_templates([(
        "math",
        "{{ $n / -1 }}|{{ $n % -1 }}",
    )]));

    let out = engine.render("math", [("n", Value::Int(i64::MIN))]).unwrap();
    assert_eq!(out, "9223372036854775808|0");

    let out = engine.render("math", [("n", Value::Float(-1e30))]).unwrap();
    assert_eq!(out, format!("{}|0", Value::Float(1e30).render()));
}

// ── Cache behaviour against real files ─────────────────────────────────────

struct Site {
    _dir: tempfile::TempDir,
    views: PathBuf,
    cache_dir: PathBuf,
}

impl Site {
    fn new(source: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let views = dir.path().join("views");
        let cache_dir = dir.path().join("cache");
        fs::create_dir_all(&views).unwrap();
        fs::write(views.join("page.slice.html"), source).unwrap();
        Site {
            _dir: dir,
            views,
            cache_dir,
        }
    }

    fn engine(&self, environment: Environment) -> Engine {
        let config = EngineConfig {
            environment,
            ..Default::default()
        };
        Engine::for_directory(&self.views, config)
            .with_cache(Arc::new(FileSystemCache::new(&self.cache_dir)))
    }

    /// Rewrite the page with a modification time safely after any cache entry.
    fn edit(&self, source: &str) {
        let path = self.views.join("page.slice.html");
        fs::write(&path, source).unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
    }
}

#[test]
fn test_validate_mode_recompiles_edited_source() {
    let site = Site::new("v1 {{ $x }}");
    let engine = site.engine(Environment::Development);
    assert_eq!(engine.render("page", [("x", 1i64)]).unwrap(), "v1 1");

    site.edit("v2 {{ $x }}");
    assert_eq!(engine.render("page", [("x", 1i64)]).unwrap(), "v2 1");
}

#[test]
fn test_trust_mode_serves_cached_program() {
    let site = Site::new("v1 {{ $x }}");
    let engine = site.engine(Environment::Production);
    assert_eq!(engine.render("page", [("x", 1i64)]).unwrap(), "v1 1");

    site.edit("v2 {{ $x }}");
    assert_eq!(engine.render("page", [("x", 1i64)]).unwrap(), "v1 1");

    // A second engine sharing the cache directory sees the same entry.
    let other = site.engine(Environment::Production);
    assert_eq!(other.render("page", [("x", 2i64)]).unwrap(), "v1 2");
}

#[test]
fn test_corrupt_cache_entry_is_a_miss() {
    let site = Site::new("fresh");
    let engine = site.engine(Environment::Production);
    assert_eq!(engine.render("page", TemplateContext::new()).unwrap(), "fresh");

    for entry in fs::read_dir(&site.cache_dir).unwrap() {
        fs::write(entry.unwrap().path(), b"not an envelope").unwrap();
    }
    assert_eq!(engine.render("page", TemplateContext::new()).unwrap(), "fresh");

    let cache = FileSystemCache::new(&site.cache_dir);
    let key = slice_template::cache::cache_key(&site.views.join("page.slice.html"));
    assert!(cache.get(&key).unwrap().is_some());
}
