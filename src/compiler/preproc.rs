//! Preprocessing
//!
//! A light preprocessing pass over the token stream: resolves `#include`
//! directives by lexing the named file and splicing its tokens in place,
//! and concatenates adjacent string literals. Comment stripping already
//! happened in the lexer; all other directives were rejected there.
//!
//! `#include <...>` searches the include directory distributed with the
//! compiler, which carries prototype-only headers for the slice of the C
//! library the compiler supports. `#include "..."` additionally searches
//! the directory of the including file first.

use std::fs;
use std::path::{Path, PathBuf};

use crate::compiler::lexer::{Lexer, Token, TokenKind};
use crate::error::{CompileError, ErrorCollector};

// Guards against include cycles; deeper nesting than this is assumed
// circular.
const MAX_INCLUDE_DEPTH: u32 = 16;

/// Reads, lexes, and preprocesses the translation unit rooted at `path`,
/// returning the merged token stream.
///
/// # Errors
///
/// Returns an error if the root file cannot be read. Problems inside
/// included files are recorded as diagnostics instead, so compilation can
/// report them with positions.
pub fn preprocess(
    path: &Path,
    errors: &mut ErrorCollector,
) -> Result<Vec<Token>, CompileError> {
    let src = fs::read(path).map_err(|source| CompileError::Io {
        action: "read input file",
        path: path.display().to_string(),
        source,
    })?;

    // Input paths are leaked so token positions can carry `'static` file
    // names; a compiler run opens a handful of files at most.
    let file: &'static str = path.display().to_string().leak();
    let tokens = Lexer::new(file, &src).lex(errors);

    // Splicing drops every inner EOF; the root file's EOF terminates the
    // merged stream.
    let eof = tokens.last().cloned().expect("lexer always emits EOF");

    let parent = path.parent().map(Path::to_owned);
    let mut out = Vec::with_capacity(tokens.len());
    splice_includes(tokens, parent.as_deref(), 0, &mut out, errors);
    out.push(eof);

    Ok(concat_string_literals(out))
}

fn splice_includes(
    tokens: Vec<Token>,
    including_dir: Option<&Path>,
    depth: u32,
    out: &mut Vec<Token>,
    errors: &mut ErrorCollector,
) {
    for token in tokens {
        let TokenKind::Include { ref path, angled } = token.kind else {
            if token.kind != TokenKind::Eof {
                out.push(token);
            }
            continue;
        };

        if depth >= MAX_INCLUDE_DEPTH {
            errors.error("maximum include depth exceeded", token.pos);
            continue;
        }

        let Some(resolved) = resolve_include(path, angled, including_dir) else {
            errors.error(format!("'{path}' file not found"), token.pos);
            continue;
        };

        let src = match fs::read(&resolved) {
            Ok(src) => src,
            Err(err) => {
                errors.error(
                    format!("could not read '{}': {err}", resolved.display()),
                    token.pos,
                );
                continue;
            }
        };

        let file: &'static str = resolved.display().to_string().leak();
        let included = Lexer::new(file, &src).lex(errors);
        let parent = resolved.parent().map(Path::to_owned);
        splice_includes(included, parent.as_deref(), depth + 1, out, errors);
    }
}

/// Search order: the including file's directory (quoted form only), then
/// the compiler's bundled include directory.
fn resolve_include(
    path: &str,
    angled: bool,
    including_dir: Option<&Path>,
) -> Option<PathBuf> {
    if !angled {
        if let Some(dir) = including_dir {
            let candidate = dir.join(path);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    for dir in bundled_include_dirs() {
        let candidate = dir.join(path);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    None
}

fn bundled_include_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    // Alongside the installed binary.
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            dirs.push(dir.join("include"));
        }
    }

    // In the source tree, for running out of a build directory.
    dirs.push(PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/include")));
    dirs
}

/// Merges adjacent string literal tokens into one, as the phase-6
/// translation rules require.
fn concat_string_literals(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());

    for token in tokens {
        if let TokenKind::StrLit(ref bytes) = token.kind {
            if let Some(Token { kind: TokenKind::StrLit(prev), .. }) = out.last_mut() {
                prev.extend_from_slice(bytes);
                continue;
            }
        }
        out.push(token);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Pos;

    fn tok(kind: TokenKind) -> Token {
        Token { kind, pos: Pos::start_of("test.c") }
    }

    #[test]
    fn adjacent_string_literals_concatenate() {
        let tokens = vec![
            tok(TokenKind::StrLit(b"foo".to_vec())),
            tok(TokenKind::StrLit(b"bar".to_vec())),
            tok(TokenKind::Eof),
        ];
        let merged = concat_string_literals(tokens);
        assert_eq!(merged[0].kind, TokenKind::StrLit(b"foobar".to_vec()));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn separated_string_literals_stay_apart() {
        let tokens = vec![
            tok(TokenKind::StrLit(b"a".to_vec())),
            tok(TokenKind::Punct(crate::compiler::lexer::Punct::Comma)),
            tok(TokenKind::StrLit(b"b".to_vec())),
        ];
        let merged = concat_string_literals(tokens);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn missing_include_reported() {
        let mut errors = ErrorCollector::new();
        let tokens = vec![tok(TokenKind::Include {
            path: "no_such_header.h".into(),
            angled: true,
        })];
        let mut out = Vec::new();
        splice_includes(tokens, None, 0, &mut out, &mut errors);
        assert!(!errors.ok());
        assert!(errors.messages()[0].contains("file not found"));
    }
}
