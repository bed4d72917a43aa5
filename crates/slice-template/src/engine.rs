/*
 * engine.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The [`Engine`]: configuration, collaborators and engine-global data.
//!
//! An engine is built once and shared. `render` takes `&self` and allocates
//! a fresh render session per call, so one engine can serve concurrent
//! renders; the byte cache is the only state they share.

use crate::cache::{ByteCache, CacheGate, MemoryCache};
use crate::config::EngineConfig;
use crate::context::TemplateContext;
use crate::directive::DirectiveRegistry;
use crate::error::TemplateResult;
use crate::evaluator::RenderSession;
use crate::functions::FunctionRegistry;
use crate::i18n::Translator;
use crate::locale::{LocaleSource, MemoryLocaleSource};
use crate::resolver::{FileSystemResolver, TemplateResolver};
use crate::value::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub struct Engine {
    config: EngineConfig,
    resolver: Arc<dyn TemplateResolver>,
    cache: Arc<dyn ByteCache>,
    locales: Arc<dyn LocaleSource>,
    directives: DirectiveRegistry,
    functions: FunctionRegistry,
    /// Data visible to every render, beneath the per-call data.
    globals: TemplateContext,
}

impl Engine {
    /// Engine over `resolver` with the default configuration, an in-memory
    /// byte cache and no locale tables.
    pub fn new(resolver: impl TemplateResolver + 'static) -> Self {
        Self {
            config: EngineConfig::default(),
            resolver: Arc::new(resolver),
            cache: Arc::new(MemoryCache::new()),
            locales: Arc::new(MemoryLocaleSource::new()),
            directives: DirectiveRegistry::new(),
            functions: FunctionRegistry::new(),
            globals: TemplateContext::new(),
        }
    }

    /// Engine reading templates from `root`, using the configured extension.
    pub fn for_directory(root: impl Into<PathBuf>, config: EngineConfig) -> Self {
        let resolver = FileSystemResolver::new(root, config.extension.clone());
        Self::new(resolver).with_config(config)
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ByteCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_locale_source(mut self, locales: Arc<dyn LocaleSource>) -> Self {
        self.locales = locales;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Render the template `name` with `data` layered over the global data.
    pub fn render(&self, name: &str, data: impl Into<TemplateContext>) -> TemplateResult<String> {
        tracing::debug!(template = %name, "rendering template");
        let mut context = self.globals.child();
        context.extend(data.into().flatten());
        RenderSession::new(self).run(name, &mut context)
    }

    /// Compiled program text for `name`, served from the cache when fresh.
    pub fn compile(&self, name: &str) -> TemplateResult<String> {
        self.gate().compile(name)
    }

    /// Whether the resolver knows `name`.
    pub fn exists(&self, name: &str) -> bool {
        self.resolver.exists(name)
    }

    /// Bind a global variable.
    pub fn with(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.globals.insert(name, value);
        self
    }

    /// Bind several global variables at once.
    pub fn set<K, V>(&mut self, data: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.globals.extend(data);
        self
    }

    /// Push `value` onto a global list, or concatenate it onto any other
    /// global. An unbound name is simply bound to `value`.
    pub fn append(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        match self.globals.entry(name) {
            Value::List(items) => items.push(value),
            slot if slot.is_null() => *slot = value,
            slot => *slot = Value::String(slot.render() + &value.render()),
        }
        self
    }

    pub fn unset(&mut self, name: &str) -> &mut Self {
        self.globals.remove(name);
        self
    }

    /// Global data, as seen by templates.
    pub fn globals(&self) -> &TemplateContext {
        &self.globals
    }

    /// Register a directive run over raw source before the built-in passes.
    pub fn directive<F>(&mut self, directive: F) -> &mut Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.directives.register(directive);
        self
    }

    /// Register a function callable from template expressions.
    pub fn function<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&[Value]) -> TemplateResult<Value> + Send + Sync + 'static,
    {
        self.functions.register(name, function);
        self
    }

    pub fn set_locale(&mut self, locale: impl Into<String>) -> &mut Self {
        self.config.locale = locale.into();
        self
    }

    /// A translator for the active locale, for use outside templates.
    pub fn translator(&self) -> Translator {
        Translator::new(Arc::clone(&self.locales), self.config.locale.clone())
    }

    pub(crate) fn gate(&self) -> CacheGate<'_> {
        CacheGate {
            resolver: self.resolver.as_ref(),
            cache: self.cache.as_ref(),
            directives: &self.directives,
            policy: self.config.environment.cache_policy(),
            ttl: self.config.cache_ttl(),
        }
    }

    pub(crate) fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("directives", &self.directives)
            .field("functions", &self.functions)
            .field("globals", &self.globals)
            .finish_non_exhaustive()
    }
}
