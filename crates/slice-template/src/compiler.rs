/*
 * compiler.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The rewrite pipeline.
//!
//! Template source is lowered to program text (see [`crate::program`]) by a
//! fixed, ordered table of passes. User directives run first, on raw source.
//! Every built-in pass after that only rewrites the *literal* runs of the
//! program, so text claimed by an earlier pass is never seen again by a later
//! one. The order of [`PASSES`] is significant: for example the comment pass
//! must run before the echo pass, and `@includeIf` before `@include`.

use crate::directive::DirectiveRegistry;
use crate::error::{TemplateError, TemplateResult};
use crate::program::{Instruction, contains_reserved, map_literals};
use once_cell::sync::Lazy;
use regex::Regex;

/// A built-in rewrite pass.
pub type Pass = fn(&str) -> String;

/// The built-in passes, in execution order.
pub const PASSES: &[(&str, Pass)] = &[
    ("comment", compile_comments),
    ("ternary", compile_ternary),
    ("preserved", compile_preserved),
    ("echo", compile_echo),
    ("existence", compile_existence),
    ("forelse", compile_forelse),
    ("opening-statements", compile_opening_statements),
    ("else", compile_else),
    ("loop-control", compile_loop_control),
    ("closing-statements", compile_closing_statements),
    ("each", compile_each),
    ("unless", compile_unless),
    ("include", compile_includes),
    ("extends", compile_extends),
    ("yield", compile_yield),
    ("show", compile_show),
    ("section", compile_sections),
    ("php", compile_php),
    ("lang", compile_lang),
];

/// Compile template source to program text.
pub fn compile_source(source: &str, directives: &DirectiveRegistry) -> TemplateResult<String> {
    let text = directives.apply(source);
    if contains_reserved(&text) {
        return Err(TemplateError::parse(
            "template source contains reserved characters (U+E000..U+E002)",
        ));
    }
    Ok(PASSES
        .iter()
        .fold(text, |program, (_, pass)| pass(&program)))
}

// ── Directive scanning ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Args {
    /// The directive never takes arguments; parentheses after it are text.
    None,
    /// Arguments are consumed when present.
    Optional,
    /// Without a parenthesised argument list the directive is left as text.
    Required,
}

/// Byte index of the `)` matching the `(` at `open`, skipping over quoted
/// strings.
fn find_closing_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text[open..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Rewrite every match of `re` in `text`.
///
/// `emit` receives capture group 1 (the directive name) and the argument text
/// between the parentheses, and returns the replacement, or `None` to leave
/// the occurrence as text.
fn rewrite_directives(
    text: &str,
    re: &Regex,
    args: Args,
    mut emit: impl FnMut(&str, Option<&str>) -> Option<String>,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut search = 0;

    while let Some(caps) = re.captures_at(text, search) {
        let Some(whole) = caps.get(0) else { break };
        let name = caps.get(1).map_or("", |g| g.as_str());

        let mut end = whole.end();
        let mut arg_text = None;
        if args != Args::None {
            let after = &text[whole.end()..];
            let open = whole.end() + (after.len() - after.trim_start().len());
            if text[open..].starts_with('(') {
                if let Some(close) = find_closing_paren(text, open) {
                    arg_text = Some(&text[open + 1..close]);
                    end = close + 1;
                }
            }
        }

        let replacement = match (args, arg_text) {
            (Args::Required, None) => None,
            _ => emit(name, arg_text),
        };

        match replacement {
            Some(replacement) => {
                out.push_str(&text[last..whole.start()]);
                out.push_str(&replacement);
                last = end;
                search = end;
            }
            None => search = whole.end(),
        }
    }

    out.push_str(&text[last..]);
    out
}

fn directive_regex(names: &str) -> Regex {
    Regex::new(&format!(r"@({names})\b")).unwrap()
}

macro_rules! directive {
    ($name:ident, $names:literal) => {
        static $name: Lazy<Regex> = Lazy::new(|| directive_regex($names));
    };
}

directive!(EXISTENCE, "isset|empty");
directive!(FORELSE, "forelse");
directive!(FORELSE_EMPTY, "empty");
directive!(ENDFORELSE, "endforelse");
directive!(OPENING, "if|elseif|foreach|for|while");
directive!(ELSE, "else");
directive!(LOOP_CONTROL, "continue|break");
directive!(CLOSING, "endif|endforeach|endfor|endwhile");
directive!(EACH, "each");
directive!(UNLESS, "unless");
directive!(END_UNLESS, "endunless|endisset|endempty");
directive!(INCLUDE_IF, "includeIf");
directive!(INCLUDE, "include");
directive!(EXTENDS, "extends");
directive!(YIELD, "yield");
directive!(SHOW, "show");
directive!(SECTION, "section");
directive!(ENDSECTION, "endsection");
directive!(PHP, "php");
directive!(ENDPHP, "endphp");
directive!(LANG, "lang");
directive!(CHOICE, "choice");

fn token(instr: Instruction) -> Option<String> {
    Some(instr.encode())
}

// ── Passes ──────────────────────────────────────────────────────────────────

static COMMENT_CLOSED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{\{--.*?--\}\}").unwrap());
static COMMENT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{--[^\n]*").unwrap());

/// `{{-- ... --}}`, then the unclosed single-line `{{-- ...` form.
pub fn compile_comments(program: &str) -> String {
    map_literals(program, |text| {
        let comment = Instruction::Comment.encode();
        let text = COMMENT_CLOSED.replace_all(text, comment.as_str());
        COMMENT_LINE
            .replace_all(&text, comment.as_str())
            .into_owned()
    })
}

static TERNARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{\{\s*\$(\w+)\s+or\s+(?:'([^']*)'|"([^"]*)")\s*\}\}"#).unwrap()
});

/// `{{ $name or 'default' }}`
pub fn compile_ternary(program: &str) -> String {
    map_literals(program, |text| {
        TERNARY
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let default = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
                Instruction::EchoDefault {
                    name: caps[1].to_string(),
                    default: default.to_string(),
                }
                .encode()
            })
            .into_owned()
    })
}

static PRESERVED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@(\{\{.+?\}\})").unwrap());

/// `@{{ ... }}` is emitted as the literal braces.
pub fn compile_preserved(program: &str) -> String {
    map_literals(program, |text| {
        PRESERVED
            .replace_all(text, |caps: &regex::Captures<'_>| {
                Instruction::Verbatim(caps[1].to_string()).encode()
            })
            .into_owned()
    })
}

static ECHO: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{(.+?)\}\}").unwrap());

/// `{{ expr }}`
pub fn compile_echo(program: &str) -> String {
    map_literals(program, |text| {
        ECHO.replace_all(text, |caps: &regex::Captures<'_>| {
            Instruction::Echo(caps[1].trim().to_string()).encode()
        })
        .into_owned()
    })
}

/// `@isset(expr)` / `@empty(expr)` open a conditional on the predicate.
pub fn compile_existence(program: &str) -> String {
    map_literals(program, |text| {
        rewrite_directives(text, &EXISTENCE, Args::Required, |name, args| {
            token(Instruction::If(format!("{name}({})", args.unwrap_or_default())))
        })
    })
}

/// `@forelse(coll as item)`, the bare `@empty` branch and `@endforelse`.
pub fn compile_forelse(program: &str) -> String {
    map_literals(program, |text| {
        let text = rewrite_directives(text, &FORELSE, Args::Required, |_, args| {
            token(Instruction::Forelse(args.unwrap_or_default().trim().to_string()))
        });
        let text = rewrite_directives(&text, &FORELSE_EMPTY, Args::None, |_, _| {
            token(Instruction::ForelseEmpty)
        });
        rewrite_directives(&text, &ENDFORELSE, Args::None, |_, _| {
            token(Instruction::EndForelse)
        })
    })
}

/// `@if`, `@elseif`, `@foreach`, `@for`, `@while`.
pub fn compile_opening_statements(program: &str) -> String {
    map_literals(program, |text| {
        rewrite_directives(text, &OPENING, Args::Required, |name, args| {
            let args = args.unwrap_or_default().trim().to_string();
            token(match name {
                "if" => Instruction::If(args),
                "elseif" => Instruction::ElseIf(args),
                "foreach" => Instruction::Foreach(args),
                "for" => Instruction::For(args),
                _ => Instruction::While(args),
            })
        })
    })
}

pub fn compile_else(program: &str) -> String {
    map_literals(program, |text| {
        rewrite_directives(text, &ELSE, Args::None, |_, _| token(Instruction::Else))
    })
}

/// `@continue` / `@break`, optionally guarded by a condition.
pub fn compile_loop_control(program: &str) -> String {
    map_literals(program, |text| {
        rewrite_directives(text, &LOOP_CONTROL, Args::Optional, |name, args| {
            let control = if name == "continue" {
                Instruction::Continue
            } else {
                Instruction::Break
            };
            match args.map(str::trim).filter(|a| !a.is_empty()) {
                Some(condition) => Some(format!(
                    "{}{}{}",
                    Instruction::If(condition.to_string()).encode(),
                    control.encode(),
                    Instruction::EndIf.encode()
                )),
                None => token(control),
            }
        })
    })
}

/// `@endif`, `@endforeach`, `@endfor`, `@endwhile`.
pub fn compile_closing_statements(program: &str) -> String {
    map_literals(program, |text| {
        rewrite_directives(text, &CLOSING, Args::None, |name, _| {
            token(match name {
                "endif" => Instruction::EndIf,
                "endforeach" => Instruction::EndForeach,
                "endfor" => Instruction::EndFor,
                _ => Instruction::EndWhile,
            })
        })
    })
}

/// `@each(template, collection, alias[, emptyTemplate])`
pub fn compile_each(program: &str) -> String {
    map_literals(program, |text| {
        rewrite_directives(text, &EACH, Args::Required, |_, args| {
            token(Instruction::Each(args.unwrap_or_default().trim().to_string()))
        })
    })
}

/// `@unless(cond)` and the shared closers `@endunless`/`@endisset`/`@endempty`.
pub fn compile_unless(program: &str) -> String {
    map_literals(program, |text| {
        let text = rewrite_directives(text, &UNLESS, Args::Required, |_, args| {
            token(Instruction::If(format!("!({})", args.unwrap_or_default().trim())))
        });
        rewrite_directives(&text, &END_UNLESS, Args::None, |_, _| {
            token(Instruction::EndIf)
        })
    })
}

/// `@includeIf(...)` then `@include(...)`.
pub fn compile_includes(program: &str) -> String {
    map_literals(program, |text| {
        let text = rewrite_directives(text, &INCLUDE_IF, Args::Required, |_, args| {
            token(Instruction::IncludeIf(args.unwrap_or_default().trim().to_string()))
        });
        rewrite_directives(&text, &INCLUDE, Args::Required, |_, args| {
            token(Instruction::Include(args.unwrap_or_default().trim().to_string()))
        })
    })
}

/// `@extends(...)` is removed where it appears and appended to the end of the
/// program, so the child runs (and fills its sections) before the layout.
pub fn compile_extends(program: &str) -> String {
    let mut layouts = Vec::new();
    let mut out = map_literals(program, |text| {
        rewrite_directives(text, &EXTENDS, Args::Required, |_, args| {
            layouts.push(Instruction::Extends(args.unwrap_or_default().trim().to_string()));
            Some(String::new())
        })
    });
    for layout in layouts {
        out.push_str(&layout.encode());
    }
    out
}

/// `@yield(name[, default])`
pub fn compile_yield(program: &str) -> String {
    map_literals(program, |text| {
        rewrite_directives(text, &YIELD, Args::Required, |_, args| {
            token(Instruction::Yield(args.unwrap_or_default().trim().to_string()))
        })
    })
}

pub fn compile_show(program: &str) -> String {
    map_literals(program, |text| {
        rewrite_directives(text, &SHOW, Args::None, |_, _| token(Instruction::Show))
    })
}

/// `@section(name[, inline])` / `@endsection`
pub fn compile_sections(program: &str) -> String {
    map_literals(program, |text| {
        let text = rewrite_directives(text, &SECTION, Args::Required, |_, args| {
            token(Instruction::Section(args.unwrap_or_default().trim().to_string()))
        });
        rewrite_directives(&text, &ENDSECTION, Args::None, |_, _| {
            token(Instruction::EndSection)
        })
    })
}

/// `@php` / `@endphp`; the text between them is left for the parser to read as
/// statements.
pub fn compile_php(program: &str) -> String {
    map_literals(program, |text| {
        let text = rewrite_directives(text, &PHP, Args::None, |_, _| token(Instruction::Php));
        rewrite_directives(&text, &ENDPHP, Args::None, |_, _| {
            token(Instruction::EndPhp)
        })
    })
}

/// `@lang(key[, params])` / `@choice(key, count[, params])`
pub fn compile_lang(program: &str) -> String {
    map_literals(program, |text| {
        let text = rewrite_directives(text, &LANG, Args::Required, |_, args| {
            token(Instruction::Lang(args.unwrap_or_default().trim().to_string()))
        });
        rewrite_directives(&text, &CHOICE, Args::Required, |_, args| {
            token(Instruction::Choice(args.unwrap_or_default().trim().to_string()))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Segment, segments};
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> String {
        compile_source(source, &DirectiveRegistry::new()).unwrap()
    }

    /// Decode a program into (instruction | literal) items for comparison.
    fn decoded(program: &str) -> Vec<Result<Instruction, String>> {
        segments(program)
            .into_iter()
            .map(|s| match s {
                Segment::Literal(t) => Err(t.to_string()),
                Segment::Instruction(t) => Ok(Instruction::decode(t).unwrap()),
            })
            .collect()
    }

    fn lit(s: &str) -> Result<Instruction, String> {
        Err(s.to_string())
    }

    #[test]
    fn test_comment_runs_before_echo() {
        let program = compile("a{{-- {{ $secret }} --}}b");
        assert_eq!(
            decoded(&program),
            vec![lit("a"), Ok(Instruction::Comment), lit("b")]
        );
    }

    #[test]
    fn test_multiline_and_unclosed_comments() {
        let program = compile("{{-- one\ntwo --}}x\n{{-- to end of line\ny");
        assert_eq!(
            decoded(&program),
            vec![
                Ok(Instruction::Comment),
                lit("x\n"),
                Ok(Instruction::Comment),
                lit("\ny"),
            ]
        );
    }

    #[test]
    fn test_ternary_runs_before_echo() {
        let program = compile(r#"{{ $name or 'Guest' }} {{ $title or "None" }}"#);
        assert_eq!(
            decoded(&program),
            vec![
                Ok(Instruction::EchoDefault {
                    name: "name".to_string(),
                    default: "Guest".to_string()
                }),
                lit(" "),
                Ok(Instruction::EchoDefault {
                    name: "title".to_string(),
                    default: "None".to_string()
                }),
            ]
        );
    }

    #[test]
    fn test_preserved_braces_run_before_echo() {
        let program = compile("@{{ vue }} {{ $x }}");
        assert_eq!(
            decoded(&program),
            vec![
                Ok(Instruction::Verbatim("{{ vue }}".to_string())),
                lit(" "),
                Ok(Instruction::Echo("$x".to_string())),
            ]
        );
    }

    #[test]
    fn test_isset_and_empty_before_forelse_empty() {
        let program = compile("@forelse($items as $i)x@empty(y)@empty none@endforelse");
        assert_eq!(
            decoded(&program),
            vec![
                Ok(Instruction::Forelse("$items as $i".to_string())),
                lit("x"),
                Ok(Instruction::If("empty(y)".to_string())),
                Ok(Instruction::ForelseEmpty),
                lit(" none"),
                Ok(Instruction::EndForelse),
            ]
        );
    }

    #[test]
    fn test_opening_statements_do_not_collide() {
        let program = compile("@foreach($a as $b)@for($i = 0; $i < 1; $i++)@endfor@endforeach");
        assert_eq!(
            decoded(&program),
            vec![
                Ok(Instruction::Foreach("$a as $b".to_string())),
                Ok(Instruction::For("$i = 0; $i < 1; $i++".to_string())),
                Ok(Instruction::EndFor),
                Ok(Instruction::EndForeach),
            ]
        );
    }

    #[test]
    fn test_if_elseif_else() {
        let program = compile("@if ($a)1@elseif($b)2@else 3@endif");
        assert_eq!(
            decoded(&program),
            vec![
                Ok(Instruction::If("$a".to_string())),
                lit("1"),
                Ok(Instruction::ElseIf("$b".to_string())),
                lit("2"),
                Ok(Instruction::Else),
                lit(" 3"),
                Ok(Instruction::EndIf),
            ]
        );
    }

    #[test]
    fn test_balanced_arguments_with_quotes() {
        let program = compile("@if(in_array(')', $list))ok@endif");
        assert_eq!(
            decoded(&program)[0],
            Ok(Instruction::If("in_array(')', $list)".to_string()))
        );
    }

    #[test]
    fn test_guarded_loop_control() {
        let program = compile("@continue($i == 2)@break");
        assert_eq!(
            decoded(&program),
            vec![
                Ok(Instruction::If("$i == 2".to_string())),
                Ok(Instruction::Continue),
                Ok(Instruction::EndIf),
                Ok(Instruction::Break),
            ]
        );
    }

    #[test]
    fn test_unless_and_shared_closers() {
        let program = compile("@unless($ok)no@endunless@isset($x)y@endisset");
        assert_eq!(
            decoded(&program),
            vec![
                Ok(Instruction::If("!($ok)".to_string())),
                lit("no"),
                Ok(Instruction::EndIf),
                Ok(Instruction::If("isset($x)".to_string())),
                lit("y"),
                Ok(Instruction::EndIf),
            ]
        );
    }

    #[test]
    fn test_include_if_runs_before_include() {
        let program = compile("@includeIf('a')@include('b', ['x' => 1])");
        assert_eq!(
            decoded(&program),
            vec![
                Ok(Instruction::IncludeIf("'a'".to_string())),
                Ok(Instruction::Include("'b', ['x' => 1]".to_string())),
            ]
        );
    }

    #[test]
    fn test_extends_is_appended_last() {
        let program = compile("@extends('layouts.main')\n@section('body')hi@endsection");
        let items = decoded(&program);
        assert_eq!(
            items.last(),
            Some(&Ok(Instruction::Extends("'layouts.main'".to_string())))
        );
        assert_eq!(items[1], Ok(Instruction::Section("'body'".to_string())));
    }

    #[test]
    fn test_sections_yield_and_show() {
        let program = compile("@section('nav')n@show@yield('body', 'none')");
        assert_eq!(
            decoded(&program),
            vec![
                Ok(Instruction::Section("'nav'".to_string())),
                lit("n"),
                Ok(Instruction::Show),
                Ok(Instruction::Yield("'body', 'none'".to_string())),
            ]
        );
    }

    #[test]
    fn test_php_lang_and_choice() {
        let program = compile("@php $x = 1; @endphp@lang('messages.hi')@choice('items.count', 3)");
        assert_eq!(
            decoded(&program),
            vec![
                Ok(Instruction::Php),
                lit(" $x = 1; "),
                Ok(Instruction::EndPhp),
                Ok(Instruction::Lang("'messages.hi'".to_string())),
                Ok(Instruction::Choice("'items.count', 3".to_string())),
            ]
        );
    }

    #[test]
    fn test_directive_without_arguments_stays_text() {
        assert_eq!(compile("mail me @if you like"), "mail me @if you like");
        assert_eq!(compile("@if($unclosed"), "@if($unclosed");
    }

    #[test]
    fn test_user_directives_see_raw_source() {
        let mut directives = DirectiveRegistry::new();
        directives.register(|s| s.replace("@datetime", "{{ $now }}"));
        let program = compile_source("@datetime", &directives).unwrap();
        assert_eq!(decoded(&program), vec![Ok(Instruction::Echo("$now".to_string()))]);
    }

    #[test]
    fn test_reserved_characters_are_rejected() {
        let err = compile_source("x\u{E001}y", &DirectiveRegistry::new()).unwrap_err();
        assert!(matches!(err, TemplateError::ParseError { .. }));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let source = "@extends('l')@section('a')@parent {{ $x }}@endsection";
        assert_eq!(compile(source), compile(source));
    }
}
