/*
 * evaluator.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template execution.
//!
//! A [`RenderSession`] owns every piece of mutable state for one top-level
//! render: the output buffer, the section stack and table, the translator
//! with its loaded locale tables, and the include depth. Templates pulled in
//! by `@include`, `@each` and `@extends` run in the same session, so a
//! layout sees the sections its children defined.
//!
//! Output goes to the innermost open section when there is one, and to the
//! session buffer otherwise. Capture buffers are owned by the session, so an
//! error anywhere simply drops them.

use crate::ast::{Conditional, ForLoop, ForeachLoop, Include, TemplateNode, WhileLoop};
use crate::context::TemplateContext;
use crate::engine::Engine;
use crate::error::{TemplateError, TemplateResult};
use crate::expr::{self, Expr, ExprEnv};
use crate::functions::call_builtin;
use crate::i18n::Translator;
use crate::parser::Template;
use crate::sections::Sections;
use crate::value::Value;

/// How a block finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Continue,
    Break,
}

/// Counts iterations of one loop against the configured limit.
struct LoopGuard {
    limit: usize,
    iterations: usize,
}

impl LoopGuard {
    fn tick(&mut self) -> TemplateResult<()> {
        self.iterations += 1;
        if self.iterations > self.limit {
            return Err(TemplateError::LoopLimitExceeded { limit: self.limit });
        }
        Ok(())
    }
}

/// State for one call to [`Engine::render`].
pub(crate) struct RenderSession<'e> {
    engine: &'e Engine,
    output: String,
    sections: Sections,
    translator: Translator,
    depth: usize,
}

impl<'e> RenderSession<'e> {
    pub(crate) fn new(engine: &'e Engine) -> Self {
        Self {
            engine,
            output: String::new(),
            sections: Sections::default(),
            translator: engine.translator(),
            depth: 0,
        }
    }

    /// Execute `name` against `context` and return everything it wrote.
    pub(crate) fn run(mut self, name: &str, context: &mut TemplateContext) -> TemplateResult<String> {
        self.render_template(name, context)?;
        if !self.sections.stack.is_empty() {
            return Err(TemplateError::UnterminatedSection {
                names: self.sections.stack.names_from(0),
            });
        }
        Ok(self.output)
    }

    fn write(&mut self, text: &str) {
        match self.sections.stack.capture() {
            Some(buffer) => buffer.push_str(text),
            None => self.output.push_str(text),
        }
    }

    fn render_template(&mut self, name: &str, context: &mut TemplateContext) -> TemplateResult<()> {
        let max_depth = self.engine.config().max_include_depth;
        if self.depth >= max_depth {
            return Err(TemplateError::RecursiveInclude {
                name: name.to_string(),
                max_depth,
            });
        }

        let program = self.engine.gate().compile(name)?;
        let template = Template::parse(&program)?;
        tracing::trace!(template = %name, depth = self.depth, "executing template");

        let open_before = self.sections.stack.depth();
        self.depth += 1;
        let result = self.exec_block(&template.nodes, context);
        self.depth -= 1;
        result?;

        if self.sections.stack.depth() > open_before {
            return Err(TemplateError::UnterminatedSection {
                names: self.sections.stack.names_from(open_before),
            });
        }
        Ok(())
    }

    fn exec_block(
        &mut self,
        nodes: &[TemplateNode],
        context: &mut TemplateContext,
    ) -> TemplateResult<Flow> {
        for node in nodes {
            let flow = self.exec_node(node, context)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_node(&mut self, node: &TemplateNode, context: &mut TemplateContext) -> TemplateResult<Flow> {
        match node {
            TemplateNode::Literal(text) | TemplateNode::Verbatim(text) => self.write(text),

            TemplateNode::Echo(expr) => {
                let value = self.eval(expr, context)?;
                self.write(&value.render());
            }

            TemplateNode::EchoDefault(echo) => {
                let text = match context.get(&echo.name) {
                    Some(value) if !value.is_null() => value.render(),
                    _ => echo.default.clone(),
                };
                self.write(&text);
            }

            TemplateNode::Conditional(conditional) => {
                return self.exec_conditional(conditional, context);
            }
            TemplateNode::Foreach(foreach) => return self.exec_foreach(foreach, context),
            TemplateNode::For(for_loop) => self.exec_for(for_loop, context)?,
            TemplateNode::While(while_loop) => self.exec_while(while_loop, context)?,
            TemplateNode::Continue => return Ok(Flow::Continue),
            TemplateNode::Break => return Ok(Flow::Break),

            TemplateNode::Each(args) => self.exec_each(args, context)?,
            TemplateNode::Include(include) => self.exec_include(include, context)?,
            TemplateNode::Extends(args) => {
                let layout = self.required_arg("@extends", args, 0, context)?.render();
                let data = self.optional_arg(args, 1, context)?;
                self.include(&layout, data, context)?;
            }

            TemplateNode::Yield(args) => {
                let name = self.required_arg("@yield", args, 0, context)?.render();
                let default = self.optional_arg(args, 1, context)?.render();
                let content = self.sections.yield_section(&name, &default);
                self.write(&content);
            }
            TemplateNode::Show => {
                let name = self
                    .sections
                    .close(None)
                    .ok_or(TemplateError::UnbalancedSection { directive: "show" })?;
                let content = self.sections.yield_section(&name, "");
                self.write(&content);
            }
            TemplateNode::SectionOpen(args) => {
                let name = self.required_arg("@section", args, 0, context)?.render();
                let inline = self.optional_arg(args, 1, context)?;
                let inline = (!inline.is_null()).then(|| inline.render());
                self.sections.open(&name, inline);
            }
            TemplateNode::SectionClose => {
                self.sections
                    .close(None)
                    .ok_or(TemplateError::UnbalancedSection {
                        directive: "endsection",
                    })?;
            }

            TemplateNode::Code(statements) => {
                for statement in statements {
                    self.eval(statement, context)?;
                }
            }

            TemplateNode::Lang(args) => {
                let key = self.required_arg("@lang", args, 0, context)?.render();
                let params = self.optional_arg(args, 1, context)?;
                let line = self.translator.resolve(&key, &params);
                self.write(&line);
            }
            TemplateNode::Choice(args) => {
                let key = self.required_arg("@choice", args, 0, context)?.render();
                let count = self.required_arg("@choice", args, 1, context)?;
                let params = self.optional_arg(args, 2, context)?;
                let line = self.translator.inflect(&key, &count, &params);
                self.write(&line);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_conditional(
        &mut self,
        conditional: &Conditional,
        context: &mut TemplateContext,
    ) -> TemplateResult<Flow> {
        for (condition, body) in &conditional.branches {
            if self.eval(condition, context)?.is_truthy() {
                return self.exec_block(body, context);
            }
        }
        match &conditional.else_branch {
            Some(body) => self.exec_block(body, context),
            None => Ok(Flow::Normal),
        }
    }

    /// `@foreach` and `@forelse`. Loop variables are bound in the enclosing
    /// scope and remain visible after the loop.
    fn exec_foreach(
        &mut self,
        foreach: &ForeachLoop,
        context: &mut TemplateContext,
    ) -> TemplateResult<Flow> {
        let source = self.eval(&foreach.header.source, context)?;
        if !matches!(source, Value::List(_) | Value::Map(_) | Value::Null) {
            tracing::warn!(
                value = source.type_name(),
                "foreach over a value that is not a collection"
            );
        }

        let items = iteration_items(&source);
        if items.is_empty() {
            return match &foreach.empty {
                Some(empty) => self.exec_block(empty, context),
                None => Ok(Flow::Normal),
            };
        }

        let mut guard = self.loop_guard();
        for (key, value) in items {
            guard.tick()?;
            if let Some(key_name) = &foreach.header.key {
                context.insert(key_name.clone(), key);
            }
            context.insert(foreach.header.value.clone(), value);
            if self.exec_block(&foreach.body, context)? == Flow::Break {
                break;
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_for(&mut self, for_loop: &ForLoop, context: &mut TemplateContext) -> TemplateResult<()> {
        let header = &for_loop.header;
        for init in &header.init {
            self.eval(init, context)?;
        }

        let mut guard = self.loop_guard();
        loop {
            // Every condition runs; the last one decides.
            let mut proceed = true;
            for condition in &header.condition {
                proceed = self.eval(condition, context)?.is_truthy();
            }
            if !proceed {
                break;
            }
            guard.tick()?;
            if self.exec_block(&for_loop.body, context)? == Flow::Break {
                break;
            }
            for step in &header.step {
                self.eval(step, context)?;
            }
        }
        Ok(())
    }

    fn exec_while(
        &mut self,
        while_loop: &WhileLoop,
        context: &mut TemplateContext,
    ) -> TemplateResult<()> {
        let mut guard = self.loop_guard();
        while self.eval(&while_loop.condition, context)?.is_truthy() {
            guard.tick()?;
            if self.exec_block(&while_loop.body, context)? == Flow::Break {
                break;
            }
        }
        Ok(())
    }

    /// `@each(template, collection, alias[, emptyTemplate])`
    fn exec_each(&mut self, args: &[Expr], context: &mut TemplateContext) -> TemplateResult<()> {
        let template = self.required_arg("@each", args, 0, context)?.render();
        let collection = self.required_arg("@each", args, 1, context)?;
        let alias = self.required_arg("@each", args, 2, context)?.render();
        let alias = alias.trim_start_matches('$');

        let items = iteration_items(&collection);
        if items.is_empty() {
            let empty = self.optional_arg(args, 3, context)?;
            if !empty.is_null() {
                self.include(&empty.render(), Value::Null, context)?;
            }
            return Ok(());
        }

        for (_, item) in items {
            let mut child = context.child();
            child.insert(alias, item);
            self.render_template(&template, &mut child)?;
        }
        Ok(())
    }

    fn exec_include(&mut self, include: &Include, context: &mut TemplateContext) -> TemplateResult<()> {
        let name = self.required_arg("@include", &include.args, 0, context)?.render();
        if include.only_if_exists && !self.engine.exists(&name) {
            tracing::debug!(template = %name, "optional include not found, skipping");
            return Ok(());
        }
        let data = self.optional_arg(&include.args, 1, context)?;
        self.include(&name, data, context)
    }

    /// Run `name` in a child of `context` with `data` (a map) bound on top.
    fn include(&mut self, name: &str, data: Value, context: &TemplateContext) -> TemplateResult<()> {
        let mut child = context.child();
        match data {
            Value::Map(bindings) => child.extend(bindings),
            Value::Null => {}
            Value::List(items) if items.is_empty() => {}
            other => {
                return Err(TemplateError::eval(format!(
                    "data passed to `{name}` must be a map, got {}",
                    other.type_name()
                )));
            }
        }
        self.render_template(name, &mut child)
    }

    fn loop_guard(&self) -> LoopGuard {
        LoopGuard {
            limit: self.engine.config().max_loop_iterations,
            iterations: 0,
        }
    }

    fn eval(&mut self, expr: &Expr, context: &mut TemplateContext) -> TemplateResult<Value> {
        let mut scope = Scope {
            session: self,
            context,
        };
        expr::evaluate(expr, &mut scope)
    }

    fn required_arg(
        &mut self,
        directive: &str,
        args: &[Expr],
        index: usize,
        context: &mut TemplateContext,
    ) -> TemplateResult<Value> {
        match args.get(index) {
            Some(expr) => self.eval(expr, context),
            None => Err(TemplateError::eval(format!(
                "{directive} expects at least {} argument(s), got {}",
                index + 1,
                args.len()
            ))),
        }
    }

    fn optional_arg(
        &mut self,
        args: &[Expr],
        index: usize,
        context: &mut TemplateContext,
    ) -> TemplateResult<Value> {
        match args.get(index) {
            Some(expr) => self.eval(expr, context),
            None => Ok(Value::Null),
        }
    }

    /// Registered functions first, then the translation helpers, then the
    /// pure built-ins.
    fn call_function(&mut self, name: &str, args: Vec<Value>) -> TemplateResult<Value> {
        if let Some(function) = self.engine.functions().get(name) {
            return function(&args);
        }
        match name {
            "__" => {
                let Some(key) = args.first() else {
                    return Err(TemplateError::eval("__() expects a translation key"));
                };
                let params = args.get(1).cloned().unwrap_or_default();
                Ok(Value::String(self.translator.resolve(&key.render(), &params)))
            }
            "trans_choice" => {
                let (Some(key), Some(count)) = (args.first(), args.get(1)) else {
                    return Err(TemplateError::eval(
                        "trans_choice() expects a translation key and a count",
                    ));
                };
                let params = args.get(2).cloned().unwrap_or_default();
                Ok(Value::String(
                    self.translator.inflect(&key.render(), count, &params),
                ))
            }
            _ => call_builtin(name, &args).unwrap_or_else(|| {
                Err(TemplateError::UnknownFunction {
                    name: name.to_string(),
                })
            }),
        }
    }
}

/// Key/value pairs a loop visits. Lists yield their indices as keys;
/// anything that is not a collection yields nothing.
fn iteration_items(collection: &Value) -> Vec<(Value, Value)> {
    match collection {
        Value::List(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (Value::from(i), item.clone()))
            .collect(),
        Value::Map(map) => map
            .iter()
            .map(|(key, item)| (Value::from(key.as_str()), item.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Expression environment: the current scope plus the session for calls.
struct Scope<'s, 'e> {
    session: &'s mut RenderSession<'e>,
    context: &'s mut TemplateContext,
}

impl ExprEnv for Scope<'_, '_> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.context.get(name)
    }

    fn variable_mut(&mut self, name: &str) -> &mut Value {
        self.context.entry(name)
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> TemplateResult<Value> {
        self.session.call_function(name, args)
    }
}
