//! Types for referring to source positions.
//!
//! The preprocessor works on logical lines, so positions are `(file, line)`
//! pairs rather than byte offsets. `#line` can point them at files that were
//! never opened, which is why the file component is a plain name and not a
//! handle into an open-file set.

use std::{fmt, rc::Rc};

/// A `(file, line)` position in the logical source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: Rc<str>,
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<Rc<str>>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// Position used for tokens that did not come from any file, such as
    /// injected command-line definitions.
    pub fn unknown() -> Self {
        Self {
            file: Rc::from("<command line>"),
            line: 0,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.file, self.line)
    }
}
