/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template AST types.
//!
//! Compiled program text is parsed into this tree before execution. Block
//! instructions are nested here, so a well-formed tree has no dangling
//! `@endif` or unclosed `@foreach`; section open/close stay flat because
//! sections may legally straddle other blocks.

use crate::expr::{Expr, ForHeader, ForeachHeader};

/// A node in the template AST.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    /// Literal text to be output as-is.
    Literal(String),

    /// `{{ expr }}`
    Echo(Expr),

    /// `{{ $name or 'default' }}`
    EchoDefault(EchoDefault),

    /// `@{{ ... }}`, output untouched.
    Verbatim(String),

    /// `@if/@elseif/@else/@endif`, and the conditionals that `@unless`,
    /// `@isset` and `@empty` lower to.
    Conditional(Conditional),

    /// `@foreach`, or `@forelse` when `empty` is present.
    Foreach(ForeachLoop),

    /// `@for(init; cond; step)`
    For(ForLoop),

    /// `@while(cond)`
    While(WhileLoop),

    Continue,
    Break,

    /// `@each(template, collection, alias[, emptyTemplate])`
    Each(Vec<Expr>),

    /// `@include` / `@includeIf`
    Include(Include),

    /// `@extends(layout[, data])`
    Extends(Vec<Expr>),

    /// `@yield(name[, default])`
    Yield(Vec<Expr>),

    /// `@show`
    Show,

    /// `@section(name[, inline])`
    SectionOpen(Vec<Expr>),

    /// `@endsection`
    SectionClose,

    /// `@php ... @endphp`
    Code(Vec<Expr>),

    /// `@lang(key[, params])`
    Lang(Vec<Expr>),

    /// `@choice(key, count[, params])`
    Choice(Vec<Expr>),
}

/// Echo of a variable with a literal fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct EchoDefault {
    /// Variable name, without the `$`.
    pub name: String,
    pub default: String,
}

/// Conditional block.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
    /// List of (condition, body) pairs for if/elseif branches.
    pub branches: Vec<(Expr, Vec<TemplateNode>)>,
    /// Optional else branch.
    pub else_branch: Option<Vec<TemplateNode>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeachLoop {
    pub header: ForeachHeader,
    pub body: Vec<TemplateNode>,
    /// The `@empty` branch of a `@forelse`. `None` for a plain `@foreach`.
    pub empty: Option<Vec<TemplateNode>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    pub header: ForHeader,
    pub body: Vec<TemplateNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileLoop {
    pub condition: Expr,
    pub body: Vec<TemplateNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Include {
    /// Template name followed by optional extra data.
    pub args: Vec<Expr>,
    /// `@includeIf`: render nothing when the template does not exist.
    pub only_if_exists: bool,
}
