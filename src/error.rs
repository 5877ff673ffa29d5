//! Diagnostics and error reporting for the compiler.
//!
//! Problems found while compiling a translation unit are collected as
//! [`Diagnostic`]s rather than aborting at the first failure, so a single
//! run can report everything it knows. Fatal, non-source failures (I/O,
//! external tools) use [`CompileError`] instead.

use std::fmt;

use thiserror::Error;

/// Prints the provided error message to `stderr`.
#[macro_export]
macro_rules! print_err {
    // General error reporting: prints program name and error message.
    ($program:expr, $($arg:tt)+) => {{
        eprintln!("\x1b[1;1m{}\x1b[0m: \x1b[1;31merror:\x1b[0m {}", $program, format!($($arg)+));
    }};
}

/// Position of a token or construct in some source file.
///
/// The file name is `'static` because input paths are leaked once at
/// startup; include files are few and live for the whole run anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    /// Path of the file this position refers to.
    pub file: &'static str,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub col: u32,
}

impl Pos {
    /// Returns a new position at the start of the given file.
    pub fn start_of(file: &'static str) -> Self {
        Pos { file, line: 1, col: 1 }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Compilation continues but no assembly is emitted.
    Error,
    /// Output is still produced.
    Warning,
    /// Supplementary information attached to a previous diagnostic.
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A single issue found in the translation unit.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Issue severity.
    pub severity: Severity,
    /// Human-readable description, starting with a lowercase letter.
    pub message: String,
    /// Source position, if one is known.
    pub pos: Option<Pos>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pos {
            Some(pos) => write!(f, "{}: {}: {}", pos, self.severity, self.message),
            None => write!(f, "occ: {}: {}", self.severity, self.message),
        }
    }
}

/// Accumulates every diagnostic encountered while compiling one unit.
///
/// The collector is threaded through the whole pipeline by mutable
/// reference; the compiler is single-threaded, so no synchronization is
/// involved.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    diags: Vec<Diagnostic>,
}

impl ErrorCollector {
    /// Returns a new, empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an error at the given position.
    pub fn error(&mut self, message: impl Into<String>, pos: Pos) {
        self.diags.push(Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            pos: Some(pos),
        });
    }

    /// Records a warning at the given position.
    pub fn warn(&mut self, message: impl Into<String>, pos: Pos) {
        self.diags.push(Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            pos: Some(pos),
        });
    }

    /// Records a note at the given position.
    pub fn note(&mut self, message: impl Into<String>, pos: Pos) {
        self.diags.push(Diagnostic {
            severity: Severity::Note,
            message: message.into(),
            pos: Some(pos),
        });
    }

    /// Returns `true` iff no error-severity diagnostic has been recorded.
    ///
    /// Warnings and notes do not suppress assembly output.
    pub fn ok(&self) -> bool {
        !self.diags.iter().any(|d| d.severity == Severity::Error)
    }

    /// Number of error-severity diagnostics recorded.
    pub fn error_count(&self) -> usize {
        self.diags
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// Returns all diagnostics, sorted by source position. Diagnostics
    /// without a position sort first, preserving insertion order.
    pub fn sorted(&self) -> Vec<&Diagnostic> {
        let mut diags: Vec<&Diagnostic> = self.diags.iter().collect();
        diags.sort_by_key(|d| match d.pos {
            Some(pos) => (1, pos.file, pos.line, pos.col),
            None => (0, "", 0, 0),
        });
        diags
    }

    /// Writes every diagnostic to `stderr` in position order.
    pub fn print_all(&self) {
        for diag in self.sorted() {
            eprintln!("{diag}");
        }
    }

    /// Returns each diagnostic's message text, in insertion order.
    #[cfg(test)]
    pub fn messages(&self) -> Vec<&str> {
        self.diags.iter().map(|d| d.message.as_str()).collect()
    }
}

/// Fatal, non-diagnostic failures of a compiler run.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The unit contained source errors; diagnostics were already printed.
    #[error("{0} error(s) generated")]
    SourceErrors(usize),
    /// An input or output file could not be used.
    #[error("failed to {action} '{path}': {source}")]
    Io {
        /// What the compiler was trying to do.
        action: &'static str,
        /// Path involved.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The external assembler/linker failed.
    #[error("external tool failed: {0}")]
    Tool(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_ok_with_only_warnings() {
        let mut errors = ErrorCollector::new();
        errors.warn("incompatible pointer types", Pos::start_of("test.c"));
        assert!(errors.ok());
        assert_eq!(errors.error_count(), 0);
    }

    #[test]
    fn collector_not_ok_with_error() {
        let mut errors = ErrorCollector::new();
        errors.warn("something minor", Pos::start_of("test.c"));
        errors.error("something fatal", Pos::start_of("test.c"));
        assert!(!errors.ok());
        assert_eq!(errors.error_count(), 1);
    }

    #[test]
    fn diagnostics_sorted_by_position() {
        let mut errors = ErrorCollector::new();
        errors.error(
            "second",
            Pos { file: "test.c", line: 4, col: 1 },
        );
        errors.error(
            "first",
            Pos { file: "test.c", line: 2, col: 9 },
        );

        let sorted = errors.sorted();
        assert_eq!(sorted[0].message, "first");
        assert_eq!(sorted[1].message, "second");
    }

    #[test]
    fn diagnostic_display_format() {
        let diag = Diagnostic {
            severity: Severity::Error,
            message: "use of undeclared identifier 'x'".into(),
            pos: Some(Pos { file: "main.c", line: 3, col: 12 }),
        };
        assert_eq!(
            diag.to_string(),
            "main.c:3:12: error: use of undeclared identifier 'x'"
        );
    }
}
