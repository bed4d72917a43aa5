/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Blade-style template compiler and renderer.
//!
//! Templates are written in HTML with an `@`-directive syntax:
//!
//! - Echo: `{{ $name }}`, with a default: `{{ $name or 'Guest' }}`
//! - Verbatim braces: `@{{ not evaluated }}`
//! - Comments: `{{-- ... --}}`
//! - Conditionals: `@if`/`@elseif`/`@else`/`@endif`, `@unless`, `@isset`, `@empty`
//! - Loops: `@foreach`, `@forelse ... @empty ... @endforelse`, `@for`, `@while`,
//!   with `@continue` / `@break` (optionally guarded)
//! - Composition: `@include`, `@includeIf`, `@each`, `@extends`
//! - Sections: `@section`/`@endsection`, `@yield`, `@show`, `@parent`
//! - Raw statements: `@php ... @endphp`
//! - Translation: `@lang(key)`, `@choice(key, count)`
//!
//! # Architecture
//!
//! Source text goes through an ordered table of rewrite passes
//! ([`compiler::PASSES`]) that turn directives into instruction tokens. The
//! resulting program text is what the byte cache stores. At render time the
//! program is parsed into a [`Template`] AST and executed by a per-render
//! session; embedded expressions are parsed into [`expr::Expr`] trees and
//! interpreted.
//!
//! # Example
//!
//! ```ignore
//! use slice_template::{Engine, MemoryResolver};
//!
//! let engine = Engine::new(MemoryResolver::with_templates([
//!     ("greeting", "Hello, {{ $name or 'stranger' }}!"),
//! ]));
//!
//! let output = engine.render("greeting", [("name", "World")])?;
//! assert_eq!(output, "Hello, World!");
//! ```

pub mod ast;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod context;
pub mod directive;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod expr;
pub mod functions;
pub mod i18n;
pub mod locale;
pub mod parser;
pub mod program;
pub mod resolver;
pub mod sections;
pub mod value;

// Re-export main types at crate root
pub use cache::{
    ByteCache, CacheGate, CacheMetadata, CachePolicy, FileSystemCache, MemoryCache, NullCache,
};
pub use config::{EngineConfig, Environment};
pub use context::TemplateContext;
pub use engine::Engine;
pub use error::{TemplateError, TemplateResult};
pub use i18n::Translator;
pub use locale::{JsonLocaleSource, LocaleLines, LocaleSource, MemoryLocaleSource};
pub use parser::Template;
pub use resolver::{FileSystemResolver, MemoryResolver, ResolvedTemplate, TemplateResolver};
pub use value::Value;
