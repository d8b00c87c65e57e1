//! Types for error reporting.
//!
//! Diagnostics are plain values: the components that discover problems build
//! them and hand them to a [`DiagnosticSink`]; nothing in the library prints
//! or exits on its own. A hard failure is signalled by returning [`Fatal`],
//! which the embedding driver turns into a nonzero exit.

mod sink;

use std::fmt;

use thiserror::Error;

use crate::source::SourceLocation;

pub use sink::*;

/// Sentinel propagated with `?` up to the translation-unit boundary when a
/// diagnostic is severe enough to abandon preprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("translation unit abandoned after a fatal diagnostic")]
pub struct Fatal;

pub type Result<T> = std::result::Result<T, Fatal>;

/// Diagnostic severity.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum Severity {
    /// A note.
    Note,
    /// A warning.
    Warning,
    /// An error.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Which subsystem a diagnostic originated from.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum DiagnosticKind {
    /// Bad or unterminated lexemes.
    Lex,
    /// Ill-formed directive lines, unmatched `#else`/`#endif`.
    Directive,
    /// `#include` resolution failures.
    Include,
    /// Macro definition and expansion problems.
    Macro,
    /// Errors while evaluating a `#if`/`#elif` constant expression.
    ConstExpr,
    /// `#error` and `#warning`.
    User,
}

/// Diagnostic describing a problem encountered within the code.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// The diagnostic's severity.
    pub severity: Severity,
    /// The subsystem that produced the diagnostic.
    pub kind: DiagnosticKind,
    /// The message describing the issue.
    pub message: String,
    /// Where in the source the problem was found.
    pub location: Option<SourceLocation>,
    /// Additional notes providing context.
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// Creates a new diagnostic with the severity passed in as an argument.
    /// You should generally prefer the convenience functions
    /// [`Diagnostic::error`], [`Diagnostic::warning`] and
    /// [`Diagnostic::note`] over this.
    pub fn new(severity: Severity, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location: None,
            notes: vec![],
        }
    }

    /// Creates a new error-level diagnostic with the given message.
    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, kind, message)
    }

    /// Creates a new warning-level diagnostic with the given message.
    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, kind, message)
    }

    /// Creates a new note-level diagnostic with the given message.
    pub fn note(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Note, kind, message)
    }

    /// Attaches the source position the diagnostic points at.
    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Adds a note to the diagnostic.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Emits the diagnostic to standard error.
    pub fn emit_to_stderr(&self) {
        eprintln!("{self}");
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{location} {}: {}", self.severity, self.message)?,
            None => write!(f, "{}: {}", self.severity, self.message)?,
        }
        for note in &self.notes {
            write!(f, "\n  note: {note}")?;
        }
        Ok(())
    }
}

/// Counts diagnostics of at least `Error` severity.
pub fn error_count(diagnostics: &[Diagnostic]) -> usize {
    diagnostics
        .iter()
        .filter(|diagnostic| diagnostic.severity >= Severity::Error)
        .count()
}
