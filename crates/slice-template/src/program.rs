/*
 * program.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compiled program text.
//!
//! The rewrite pipeline turns template source into *program text*: runs of
//! literal output interleaved with instruction tokens. A token is
//! `U+E000 op [' ' payload] U+E001`; compound payloads separate their fields
//! with `U+E002`. The delimiters are private-use code points, so they never
//! collide with template text (sources that contain them are rejected before
//! the pipeline runs).
//!
//! Program text is what the cache stores. It is plain UTF-8 and can be
//! inspected with `slice compile`.

use crate::error::{TemplateError, TemplateResult};
use std::borrow::Cow;

pub const INSTR_OPEN: char = '\u{E000}';
pub const INSTR_CLOSE: char = '\u{E001}';
pub const ARG_SEP: char = '\u{E002}';

/// Whether `text` contains any of the reserved delimiter characters.
pub fn contains_reserved(text: &str) -> bool {
    text.contains([INSTR_OPEN, INSTR_CLOSE, ARG_SEP])
}

/// A single instruction in compiled program text.
///
/// Payloads are raw expression or argument text exactly as written in the
/// template; they are parsed when the program is prepared for execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `{{-- ... --}}`
    Comment,
    /// `{{ $name or 'default' }}`
    EchoDefault { name: String, default: String },
    /// `@{{ ... }}`: the braces and their content, emitted literally.
    Verbatim(String),
    Echo(String),
    If(String),
    ElseIf(String),
    Else,
    EndIf,
    Forelse(String),
    ForelseEmpty,
    EndForelse,
    Foreach(String),
    EndForeach,
    For(String),
    EndFor,
    While(String),
    EndWhile,
    Continue,
    Break,
    Each(String),
    IncludeIf(String),
    Include(String),
    Extends(String),
    Yield(String),
    Show,
    Section(String),
    EndSection,
    Php,
    EndPhp,
    Lang(String),
    Choice(String),
}

impl Instruction {
    fn parts(&self) -> (&'static str, Option<Cow<'_, str>>) {
        use Instruction::*;
        fn arg(s: &str) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(s))
        }
        match self {
            Comment => ("comment", None),
            EchoDefault { name, default } => (
                "echo-default",
                Some(Cow::Owned(format!("{name}{ARG_SEP}{default}"))),
            ),
            Verbatim(s) => ("verbatim", arg(s)),
            Echo(s) => ("echo", arg(s)),
            If(s) => ("if", arg(s)),
            ElseIf(s) => ("elseif", arg(s)),
            Else => ("else", None),
            EndIf => ("endif", None),
            Forelse(s) => ("forelse", arg(s)),
            ForelseEmpty => ("forelse-empty", None),
            EndForelse => ("endforelse", None),
            Foreach(s) => ("foreach", arg(s)),
            EndForeach => ("endforeach", None),
            For(s) => ("for", arg(s)),
            EndFor => ("endfor", None),
            While(s) => ("while", arg(s)),
            EndWhile => ("endwhile", None),
            Continue => ("continue", None),
            Break => ("break", None),
            Each(s) => ("each", arg(s)),
            IncludeIf(s) => ("include-if", arg(s)),
            Include(s) => ("include", arg(s)),
            Extends(s) => ("extends", arg(s)),
            Yield(s) => ("yield", arg(s)),
            Show => ("show", None),
            Section(s) => ("section", arg(s)),
            EndSection => ("endsection", None),
            Php => ("php", None),
            EndPhp => ("endphp", None),
            Lang(s) => ("lang", arg(s)),
            Choice(s) => ("choice", arg(s)),
        }
    }

    /// Encode as a program-text token.
    pub fn encode(&self) -> String {
        let (op, payload) = self.parts();
        match payload {
            Some(p) => format!("{INSTR_OPEN}{op} {p}{INSTR_CLOSE}"),
            None => format!("{INSTR_OPEN}{op}{INSTR_CLOSE}"),
        }
    }

    /// Decode the inside of a token (without the delimiters).
    pub fn decode(token: &str) -> TemplateResult<Instruction> {
        use Instruction::*;
        let (op, payload) = match token.split_once(' ') {
            Some((op, rest)) => (op, Some(rest)),
            None => (token, None),
        };
        let bare = |instr: Instruction| match payload {
            None => Ok(instr),
            Some(_) => Err(TemplateError::parse(format!(
                "instruction `{op}` takes no payload"
            ))),
        };
        let with = |make: fn(String) -> Instruction| match payload {
            Some(p) => Ok(make(p.to_string())),
            None => Err(TemplateError::parse(format!(
                "instruction `{op}` is missing its payload"
            ))),
        };

        match op {
            "comment" => bare(Comment),
            "echo-default" => {
                let p = payload.ok_or_else(|| {
                    TemplateError::parse("instruction `echo-default` is missing its payload")
                })?;
                let (name, default) = p.split_once(ARG_SEP).ok_or_else(|| {
                    TemplateError::parse("instruction `echo-default` has a malformed payload")
                })?;
                Ok(EchoDefault {
                    name: name.to_string(),
                    default: default.to_string(),
                })
            }
            "verbatim" => with(Verbatim),
            "echo" => with(Echo),
            "if" => with(If),
            "elseif" => with(ElseIf),
            "else" => bare(Else),
            "endif" => bare(EndIf),
            "forelse" => with(Forelse),
            "forelse-empty" => bare(ForelseEmpty),
            "endforelse" => bare(EndForelse),
            "foreach" => with(Foreach),
            "endforeach" => bare(EndForeach),
            "for" => with(For),
            "endfor" => bare(EndFor),
            "while" => with(While),
            "endwhile" => bare(EndWhile),
            "continue" => bare(Continue),
            "break" => bare(Break),
            "each" => with(Each),
            "include-if" => with(IncludeIf),
            "include" => with(Include),
            "extends" => with(Extends),
            "yield" => with(Yield),
            "show" => bare(Show),
            "section" => with(Section),
            "endsection" => bare(EndSection),
            "php" => bare(Php),
            "endphp" => bare(EndPhp),
            "lang" => with(Lang),
            "choice" => with(Choice),
            other => Err(TemplateError::parse(format!("unknown instruction `{other}`"))),
        }
    }
}

/// A piece of program text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    /// The inside of an instruction token, delimiters stripped.
    Instruction(&'a str),
}

/// Split program text into literal runs and instruction tokens.
///
/// An opening delimiter with no closing one is treated as literal text; the
/// parser rejects it later when it finds a stray delimiter.
pub fn segments(program: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = program;
    while let Some(start) = rest.find(INSTR_OPEN) {
        let body = &rest[start + INSTR_OPEN.len_utf8()..];
        let Some(end) = body.find(INSTR_CLOSE) else {
            break;
        };
        if start > 0 {
            out.push(Segment::Literal(&rest[..start]));
        }
        out.push(Segment::Instruction(&body[..end]));
        rest = &body[end + INSTR_CLOSE.len_utf8()..];
    }
    if !rest.is_empty() {
        out.push(Segment::Literal(rest));
    }
    out
}

/// Apply `f` to every literal run of `program`, copying instruction tokens
/// through untouched.
pub fn map_literals(program: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(program.len());
    for segment in segments(program) {
        match segment {
            Segment::Literal(text) => out.push_str(&f(text)),
            Segment::Instruction(token) => {
                out.push(INSTR_OPEN);
                out.push_str(token);
                out.push(INSTR_CLOSE);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_decode() {
        let instr = Instruction::If("count($items) > 0".to_string());
        let token = instr.encode();
        let inner = token
            .trim_start_matches(INSTR_OPEN)
            .trim_end_matches(INSTR_CLOSE);
        assert_eq!(Instruction::decode(inner).unwrap(), instr);

        let instr = Instruction::EchoDefault {
            name: "title".to_string(),
            default: "Untitled page".to_string(),
        };
        let token = instr.encode();
        let inner = token
            .trim_start_matches(INSTR_OPEN)
            .trim_end_matches(INSTR_CLOSE);
        assert_eq!(Instruction::decode(inner).unwrap(), instr);
    }

    #[test]
    fn test_decode_rejects_malformed_tokens() {
        assert!(Instruction::decode("frobnicate").is_err());
        assert!(Instruction::decode("if").is_err());
        assert!(Instruction::decode("endif $x").is_err());
        assert!(Instruction::decode("echo-default title").is_err());
    }

    #[test]
    fn test_segments() {
        let program = format!("a{}b{}c", Instruction::Else.encode(), Instruction::EndIf.encode());
        assert_eq!(
            segments(&program),
            vec![
                Segment::Literal("a"),
                Segment::Instruction("else"),
                Segment::Literal("b"),
                Segment::Instruction("endif"),
                Segment::Literal("c"),
            ]
        );
    }

    #[test]
    fn test_map_literals_skips_tokens() {
        let program = format!("x{}x", Instruction::Echo("$x".to_string()).encode());
        let mapped = map_literals(&program, |s| s.replace('x', "y"));
        assert_eq!(
            mapped,
            format!("y{}y", Instruction::Echo("$x".to_string()).encode())
        );
    }

    #[test]
    fn test_contains_reserved() {
        assert!(!contains_reserved("plain {{ text }}"));
        assert!(contains_reserved("bad \u{E000} text"));
    }
}
