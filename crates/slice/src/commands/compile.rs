/*
 * compile.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Compile command implementation
 */

//! Compile command implementation.
//!
//! `slice compile <template>` runs the template through the cache gate and
//! prints the resulting program text. With `--explain`, each literal run and
//! decoded instruction is printed on its own line, which is the easiest way
//! to see which pass claimed which directive.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use slice_template::program::{Instruction, Segment, segments};

use super::{ENV_VAR, EngineOptions, write_output};

/// Arguments for the compile command
#[derive(Debug)]
pub struct CompileArgs {
    /// Logical template name
    pub template: String,
    /// Print a segment listing instead of raw program text
    pub explain: bool,
    /// Output file path
    pub output: Option<PathBuf>,
    pub engine: EngineOptions,
}

/// Execute the compile command
pub fn execute(args: CompileArgs) -> Result<()> {
    let text = compile(&args, std::env::var(ENV_VAR).ok())?;
    write_output(args.output.as_deref(), &text)
}

fn compile(args: &CompileArgs, env_var: Option<String>) -> Result<String> {
    let config = args.engine.resolve_config(env_var)?;
    let engine = args.engine.build_engine(config)?;
    let program = engine
        .compile(&args.template)
        .with_context(|| format!("Failed to compile template '{}'", args.template))?;

    if args.explain {
        explain(&program)
    } else {
        Ok(program)
    }
}

fn explain(program: &str) -> Result<String> {
    let mut out = String::new();
    for segment in segments(program) {
        match segment {
            Segment::Literal(text) => writeln!(out, "text   {text:?}")?,
            Segment::Instruction(token) => {
                let instruction = Instruction::decode(token)?;
                writeln!(out, "instr  {instruction:?}")?;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_explain_lists_segments() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("page.slice.html"),
            "{{-- note --}}Hi {{ $name }}@if($x)!@endif",
        )
        .unwrap();
        let args = CompileArgs {
            template: "page".to_string(),
            explain: true,
            output: None,
            engine: EngineOptions {
                views: dir.path().to_path_buf(),
                ..Default::default()
            },
        };

        let listing = compile(&args, None).unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(
            lines,
            vec![
                "instr  Comment",
                "text   \"Hi \"",
                "instr  Echo(\"$name\")",
                "instr  If(\"$x\")",
                "text   \"!\"",
                "instr  EndIf",
            ]
        );
    }

    #[test]
    fn test_raw_program_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.slice.html"), "plain text").unwrap();
        let args = CompileArgs {
            template: "page".to_string(),
            explain: false,
            output: None,
            engine: EngineOptions {
                views: dir.path().to_path_buf(),
                ..Default::default()
            },
        };
        assert_eq!(compile(&args, None).unwrap(), "plain text");
        assert_eq!(compile(&args, None).unwrap(), "plain text");
    }
}
