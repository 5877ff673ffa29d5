//! Compiler driver that orchestrates the multi-stage process of
//! compiling a C translation unit into an executable: preprocess and
//! lex, parse, lower to IL, allocate registers and emit assembly, then
//! hand the `.s` file to the system toolchain to assemble and link
//! against the C runtime.

use std::fs;
use std::io;
use std::process::Command;

use anyhow::{bail, Context as _};

use crate::args::Args;
use crate::compiler::symbols::SymbolTable;
use crate::compiler::types::TypePool;
use crate::compiler::{emit, lower, parser, preproc};
use crate::error::{CompileError, ErrorCollector};

/// Executes the compilation pipeline for one C source file.
///
/// # Errors
///
/// Returns an error if the unit contained source errors (after printing
/// the diagnostics), or if any file or external tool failed.
pub fn run(args: &Args) -> anyhow::Result<()> {
    let mut errors = ErrorCollector::new();

    let tokens = preproc::preprocess(args.in_path, &mut errors)?;

    if args.stage.as_deref() == Some("lex") {
        errors.print_all();
        for token in &tokens {
            println!("{:?}", token.kind);
        }
        return finish(&errors);
    }

    let unit = parser::parse(&tokens, &mut errors);

    if args.stage.as_deref() == Some("parse") {
        errors.print_all();
        println!("{unit:#?}");
        return finish(&errors);
    }

    let mut pool = TypePool::new();
    let mut syms = SymbolTable::new();
    let mut il = lower::lower_unit(&unit, &mut pool, &mut syms, &mut errors);

    if args.stage.as_deref() == Some("il") {
        errors.print_all();
        print!("{il}");
        return finish(&errors);
    }

    // No assembly is emitted for a unit with errors; warnings are
    // printed but do not suppress output.
    errors.print_all();
    if !errors.ok() {
        return Err(CompileError::SourceErrors(errors.error_count()).into());
    }

    if args.stage.as_deref() == Some("asm") {
        emit::emit_unit(&mut il, &syms, io::stdout().lock())?;
        return Ok(());
    }

    let asm_path = args.in_path.with_extension("s");
    let file = fs::File::create(&asm_path).map_err(|source| CompileError::Io {
        action: "create assembly file",
        path: asm_path.display().to_string(),
        source,
    })?;
    emit::emit_unit(&mut il, &syms, file)?;

    if args.no_link {
        return Ok(());
    }

    // The system toolchain assembles and links against the C runtime.
    // Position-independent executables are disabled so data references
    // to external symbols stay plain PC-relative relocations.
    let status = Command::new("gcc")
        .arg("-no-pie")
        .arg(&asm_path)
        .arg("-o")
        .arg(&args.out_path)
        .status()
        .context("failed to run assembler/linker (gcc)")?;

    if !status.success() {
        bail!(CompileError::Tool(format!(
            "gcc exited with {status} while assembling '{}'",
            asm_path.display()
        )));
    }

    fs::remove_file(&asm_path).ok();
    Ok(())
}

fn finish(errors: &ErrorCollector) -> anyhow::Result<()> {
    if errors.ok() {
        Ok(())
    } else {
        Err(CompileError::SourceErrors(errors.error_count()).into())
    }
}
