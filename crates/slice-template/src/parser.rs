/*
 * parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Program text → AST.
//!
//! Decodes the instruction tokens produced by the compiler, parses their
//! expression payloads and nests block instructions. Structural mistakes
//! (an `@endif` with no `@if`, an unclosed `@foreach`, `@break` outside a
//! loop) are reported here, before anything is rendered.

use crate::ast::{
    Conditional, EchoDefault, ForLoop, ForeachLoop, Include, TemplateNode, WhileLoop,
};
use crate::error::{TemplateError, TemplateResult};
use crate::expr::{
    parse_arguments, parse_expression, parse_for_header, parse_foreach_header, parse_statements,
};
use crate::program::{Instruction, Segment, contains_reserved, segments};

/// A parsed, executable template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// The root nodes.
    pub nodes: Vec<TemplateNode>,
}

impl Template {
    /// Parse compiled program text.
    pub fn parse(program: &str) -> TemplateResult<Self> {
        let mut items = Vec::new();
        for segment in segments(program) {
            match segment {
                Segment::Literal(text) => {
                    if contains_reserved(text) {
                        return Err(TemplateError::parse(
                            "program text contains an unterminated instruction",
                        ));
                    }
                    items.push(Item::Text(text));
                }
                Segment::Instruction(token) => items.push(Item::Instr(Instruction::decode(token)?)),
            }
        }

        let mut parser = Parser {
            items,
            pos: 0,
            loop_depth: 0,
        };
        let (nodes, stop) = parser.parse_block(|_| false)?;
        debug_assert!(stop.is_none());
        Ok(Template { nodes })
    }
}

enum Item<'a> {
    Text(&'a str),
    Instr(Instruction),
}

struct Parser<'a> {
    items: Vec<Item<'a>>,
    pos: usize,
    loop_depth: usize,
}

/// User-facing spelling of an instruction, for error messages.
fn directive_name(instr: &Instruction) -> &'static str {
    use Instruction::*;
    match instr {
        Comment => "{{-- --}}",
        EchoDefault { .. } | Echo(_) => "{{ }}",
        Verbatim(_) => "@{{ }}",
        If(_) => "@if",
        ElseIf(_) => "@elseif",
        Else => "@else",
        EndIf => "@endif",
        Forelse(_) => "@forelse",
        ForelseEmpty => "@empty",
        EndForelse => "@endforelse",
        Foreach(_) => "@foreach",
        EndForeach => "@endforeach",
        For(_) => "@for",
        EndFor => "@endfor",
        While(_) => "@while",
        EndWhile => "@endwhile",
        Continue => "@continue",
        Break => "@break",
        Each(_) => "@each",
        IncludeIf(_) => "@includeIf",
        Include(_) => "@include",
        Extends(_) => "@extends",
        Yield(_) => "@yield",
        Show => "@show",
        Section(_) => "@section",
        EndSection => "@endsection",
        Php => "@php",
        EndPhp => "@endphp",
        Lang(_) => "@lang",
        Choice(_) => "@choice",
    }
}

impl<'a> Parser<'a> {
    /// Parse nodes until an instruction accepted by `stop` (returned, consumed)
    /// or the end of input (`None`).
    fn parse_block(
        &mut self,
        stop: impl Fn(&Instruction) -> bool,
    ) -> TemplateResult<(Vec<TemplateNode>, Option<Instruction>)> {
        let mut nodes = Vec::new();
        while self.pos < self.items.len() {
            let instr = match &self.items[self.pos] {
                Item::Text(text) => {
                    nodes.push(TemplateNode::Literal((*text).to_string()));
                    self.pos += 1;
                    continue;
                }
                Item::Instr(instr) => instr.clone(),
            };
            self.pos += 1;

            if stop(&instr) {
                return Ok((nodes, Some(instr)));
            }
            if let Some(node) = self.parse_instruction(instr)? {
                nodes.push(node);
            }
        }
        Ok((nodes, None))
    }

    fn parse_instruction(&mut self, instr: Instruction) -> TemplateResult<Option<TemplateNode>> {
        use Instruction as I;
        let node = match instr {
            I::Comment => return Ok(None),
            I::Echo(src) => TemplateNode::Echo(parse_expression(&src)?),
            I::EchoDefault { name, default } => {
                TemplateNode::EchoDefault(EchoDefault { name, default })
            }
            I::Verbatim(text) => TemplateNode::Verbatim(text),

            I::If(condition) => self.parse_conditional(&condition)?,

            I::Foreach(header) => {
                let header = parse_foreach_header(&header)?;
                let body = self.parse_loop_body("@foreach", |i| matches!(i, I::EndForeach))?;
                TemplateNode::Foreach(ForeachLoop {
                    header,
                    body,
                    empty: None,
                })
            }

            I::Forelse(header) => {
                let header = parse_foreach_header(&header)?;
                self.loop_depth += 1;
                let result =
                    self.parse_block(|i| matches!(i, I::ForelseEmpty | I::EndForelse));
                self.loop_depth -= 1;
                let (body, stop) = result?;
                let empty = match stop {
                    Some(I::ForelseEmpty) => {
                        let (empty, stop) = self.parse_block(|i| matches!(i, I::EndForelse))?;
                        if stop.is_none() {
                            return Err(unclosed("@forelse"));
                        }
                        empty
                    }
                    Some(_) => Vec::new(),
                    None => return Err(unclosed("@forelse")),
                };
                TemplateNode::Foreach(ForeachLoop {
                    header,
                    body,
                    empty: Some(empty),
                })
            }

            I::For(header) => {
                let header = parse_for_header(&header)?;
                let body = self.parse_loop_body("@for", |i| matches!(i, I::EndFor))?;
                TemplateNode::For(ForLoop { header, body })
            }

            I::While(condition) => {
                let condition = parse_expression(&condition)?;
                let body = self.parse_loop_body("@while", |i| matches!(i, I::EndWhile))?;
                TemplateNode::While(WhileLoop { condition, body })
            }

            I::Continue | I::Break if self.loop_depth == 0 => {
                return Err(TemplateError::parse(format!(
                    "{} outside of a loop",
                    directive_name(&instr)
                )));
            }
            I::Continue => TemplateNode::Continue,
            I::Break => TemplateNode::Break,

            I::Each(args) => TemplateNode::Each(parse_arguments(&args)?),
            I::IncludeIf(args) => TemplateNode::Include(Include {
                args: parse_arguments(&args)?,
                only_if_exists: true,
            }),
            I::Include(args) => TemplateNode::Include(Include {
                args: parse_arguments(&args)?,
                only_if_exists: false,
            }),
            I::Extends(args) => TemplateNode::Extends(parse_arguments(&args)?),
            I::Yield(args) => TemplateNode::Yield(parse_arguments(&args)?),
            I::Show => TemplateNode::Show,
            I::Section(args) => TemplateNode::SectionOpen(parse_arguments(&args)?),
            I::EndSection => TemplateNode::SectionClose,
            I::Lang(args) => TemplateNode::Lang(parse_arguments(&args)?),
            I::Choice(args) => TemplateNode::Choice(parse_arguments(&args)?),

            I::Php => self.parse_code_block()?,

            I::ElseIf(_)
            | I::Else
            | I::EndIf
            | I::ForelseEmpty
            | I::EndForelse
            | I::EndForeach
            | I::EndFor
            | I::EndWhile
            | I::EndPhp => {
                return Err(TemplateError::parse(format!(
                    "{} without a matching opening directive",
                    directive_name(&instr)
                )));
            }
        };
        Ok(Some(node))
    }

    fn parse_conditional(&mut self, condition: &str) -> TemplateResult<TemplateNode> {
        use Instruction as I;
        let mut branches = Vec::new();
        let mut condition = parse_expression(condition)?;
        loop {
            let (body, stop) =
                self.parse_block(|i| matches!(i, I::ElseIf(_) | I::Else | I::EndIf))?;
            branches.push((condition, body));
            match stop {
                Some(I::ElseIf(next)) => condition = parse_expression(&next)?,
                Some(I::Else) => {
                    let (else_body, stop) = self.parse_block(|i| matches!(i, I::EndIf))?;
                    if stop.is_none() {
                        return Err(unclosed("@if"));
                    }
                    return Ok(TemplateNode::Conditional(Conditional {
                        branches,
                        else_branch: Some(else_body),
                    }));
                }
                Some(_) => {
                    return Ok(TemplateNode::Conditional(Conditional {
                        branches,
                        else_branch: None,
                    }));
                }
                None => return Err(unclosed("@if")),
            }
        }
    }

    fn parse_loop_body(
        &mut self,
        opener: &'static str,
        stop: impl Fn(&Instruction) -> bool,
    ) -> TemplateResult<Vec<TemplateNode>> {
        self.loop_depth += 1;
        let result = self.parse_block(stop);
        self.loop_depth -= 1;
        match result? {
            (body, Some(_)) => Ok(body),
            (_, None) => Err(unclosed(opener)),
        }
    }

    /// `@php ... @endphp`: the enclosed text is statements, not template.
    fn parse_code_block(&mut self) -> TemplateResult<TemplateNode> {
        let mut code = String::new();
        while let Some(item) = self.items.get(self.pos) {
            self.pos += 1;
            match item {
                Item::Text(text) => code.push_str(text),
                Item::Instr(Instruction::EndPhp) => {
                    return Ok(TemplateNode::Code(parse_statements(&code)?));
                }
                Item::Instr(other) => {
                    return Err(TemplateError::parse(format!(
                        "{} is not allowed inside @php",
                        directive_name(other)
                    )));
                }
            }
        }
        Err(unclosed("@php"))
    }
}

fn unclosed(opener: &str) -> TemplateError {
    TemplateError::parse(format!("unclosed {opener} block"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_source;
    use crate::directive::DirectiveRegistry;
    use crate::expr::Expr;

    fn parse(source: &str) -> TemplateResult<Template> {
        let program = compile_source(source, &DirectiveRegistry::new())?;
        Template::parse(&program)
    }

    #[test]
    fn test_parse_literal_and_echo() {
        let template = parse("Hello {{ $name }}!").unwrap();
        assert_eq!(template.nodes.len(), 3);
        assert_eq!(template.nodes[0], TemplateNode::Literal("Hello ".to_string()));
        assert_eq!(
            template.nodes[1],
            TemplateNode::Echo(Expr::Var("name".to_string()))
        );
    }

    #[test]
    fn test_comments_produce_no_nodes() {
        let template = parse("a{{-- gone --}}b").unwrap();
        assert_eq!(
            template.nodes,
            vec![
                TemplateNode::Literal("a".to_string()),
                TemplateNode::Literal("b".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_if_elseif_else() {
        let template = parse("@if($a)1@elseif($b)2@else3@endif").unwrap();
        match &template.nodes[0] {
            TemplateNode::Conditional(cond) => {
                assert_eq!(cond.branches.len(), 2);
                assert!(cond.else_branch.is_some());
            }
            other => panic!("expected conditional, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_forelse() {
        let template = parse("@forelse($items as $i){{ $i }}@empty none@endforelse").unwrap();
        match &template.nodes[0] {
            TemplateNode::Foreach(ForeachLoop { header, body, empty }) => {
                assert_eq!(header.value, "i");
                assert_eq!(body.len(), 1);
                assert_eq!(
                    empty.as_deref(),
                    Some(&[TemplateNode::Literal(" none".to_string())][..])
                );
            }
            other => panic!("expected forelse, got {:?}", other),
        }
    }

    #[test]
    fn test_forelse_without_empty_branch() {
        let template = parse("@forelse($items as $i)x@endforelse").unwrap();
        match &template.nodes[0] {
            TemplateNode::Foreach(ForeachLoop { empty, .. }) => {
                assert_eq!(empty.as_deref(), Some(&[][..]));
            }
            other => panic!("expected forelse, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_code_block() {
        let template = parse("@php $a = 1; $b = 2; @endphp").unwrap();
        match &template.nodes[0] {
            TemplateNode::Code(statements) => assert_eq!(statements.len(), 2),
            other => panic!("expected code, got {:?}", other),
        }
    }

    #[test]
    fn test_structural_errors() {
        assert!(matches!(parse("@endif"), Err(TemplateError::ParseError { .. })));
        assert!(matches!(parse("@if($a)"), Err(TemplateError::ParseError { .. })));
        assert!(matches!(
            parse("@foreach($a as $b)"),
            Err(TemplateError::ParseError { .. })
        ));
        assert!(matches!(parse("@break"), Err(TemplateError::ParseError { .. })));
        assert!(matches!(
            parse("@php {{ $x }} @endphp"),
            Err(TemplateError::ParseError { .. })
        ));
        assert!(matches!(parse("@php $x = 1;"), Err(TemplateError::ParseError { .. })));
    }

    #[test]
    fn test_break_inside_nested_conditional_is_allowed() {
        assert!(parse("@foreach($a as $b)@if($b)@break@endif@endforeach").is_ok());
    }

    #[test]
    fn test_break_in_forelse_empty_branch_is_rejected() {
        assert!(parse("@forelse($a as $b)x@empty @break @endforelse").is_err());
    }

    #[test]
    fn test_bad_expression_is_reported() {
        assert!(matches!(
            parse("{{ $a + }}"),
            Err(TemplateError::ExpressionError { .. })
        ));
    }

    #[test]
    fn test_sections_stay_flat() {
        let template = parse("@section('a')x@endsection").unwrap();
        assert!(matches!(template.nodes[0], TemplateNode::SectionOpen(_)));
        assert_eq!(template.nodes[2], TemplateNode::SectionClose);
    }
}
