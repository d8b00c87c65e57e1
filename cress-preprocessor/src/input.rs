//! The input reader.
//!
//! Delivers logical preprocessing lines: physical lines with `\`-newline
//! splices joined, block comments reduced to a single space and line comments
//! stripped, each tagged with its `(file, line)` origin. Included files stack
//! on top of the primary file and are popped at their end.

use std::{
    fs, io,
    path::{Path, PathBuf},
    rc::Rc,
};

use cress_foundation::{
    errors::{Diagnostic, DiagnosticKind},
    source::SourceLocation,
};

/// One logical line, ready for the tokenizer.
#[derive(Debug, Clone)]
pub struct PrepLine {
    pub text: String,
    pub origin: SourceLocation,
}

/// A file opened by the include resolver.
pub struct ResolvedInclude {
    pub path: PathBuf,
    pub source: String,
    /// Index of the search path that yielded the file; `#include_next`
    /// resumes searching after it.
    pub search_index: usize,
}

/// Resolves `#include` names to opened files.
///
/// `search_from` is the index of the first search path to consider; passing
/// the index after the one that yielded the current file implements
/// `#include_next`.
pub trait IncludeResolver {
    fn resolve(
        &self,
        name: &str,
        angled: bool,
        current_file: Option<&Path>,
        search_from: usize,
    ) -> Option<ResolvedInclude>;
}

/// The default resolver: the current file's directory (for `"name"` only),
/// then `-I` paths, then `--isystem` paths.
#[derive(Debug, Clone, Default)]
pub struct SearchPaths {
    pub user: Vec<PathBuf>,
    pub system: Vec<PathBuf>,
}

impl IncludeResolver for SearchPaths {
    fn resolve(
        &self,
        name: &str,
        angled: bool,
        current_file: Option<&Path>,
        search_from: usize,
    ) -> Option<ResolvedInclude> {
        if !angled && search_from == 0 {
            if let Some(dir) = current_file.and_then(Path::parent) {
                let path = dir.join(name);
                if let Ok(source) = fs::read_to_string(&path) {
                    return Some(ResolvedInclude {
                        path,
                        source,
                        search_index: 0,
                    });
                }
            }
        }

        for (i, dir) in self.user.iter().chain(self.system.iter()).enumerate() {
            // Index 0 is reserved for the current file's directory.
            let search_index = i + 1;
            if search_index < search_from.max(1) {
                continue;
            }
            let path = dir.join(name);
            if let Ok(source) = fs::read_to_string(&path) {
                return Some(ResolvedInclude {
                    path,
                    source,
                    search_index,
                });
            }
        }
        None
    }
}

struct OpenFile {
    /// Name used in `__FILE__` and diagnostics; `#line` may override it.
    display_name: Rc<str>,
    /// Filesystem path, if the buffer came from disk.
    full_path: Option<PathBuf>,
    source: String,
    /// Byte offset of the next unread physical line.
    position: usize,
    /// Number reported for the next physical line; `#line` overrides it.
    next_line: u32,
    /// Search-path index that yielded this file, for `#include_next`.
    search_index: usize,
}

impl OpenFile {
    /// Reads the next physical line, without its terminator.
    fn next_physical_line(&mut self) -> Option<(String, u32)> {
        if self.position >= self.source.len() {
            return None;
        }
        let rest = &self.source[self.position..];
        let (end, advance) = match rest.find('\n') {
            Some(end) => (end, end + 1),
            None => (rest.len(), rest.len()),
        };
        let mut line = rest[..end].to_owned();
        self.position += advance;
        if line.ends_with('\r') {
            line.pop();
        }
        let number = self.next_line;
        self.next_line += 1;
        Some((line, number))
    }
}

/// Assembles logical lines from the include stack.
pub struct SourceReader {
    resolver: Box<dyn IncludeResolver>,
    stack: Vec<OpenFile>,
    location: SourceLocation,
}

impl SourceReader {
    pub fn new(resolver: Box<dyn IncludeResolver>) -> Self {
        Self {
            resolver,
            stack: vec![],
            location: SourceLocation::unknown(),
        }
    }

    /// The position of the logical line most recently produced.
    pub fn location(&self) -> SourceLocation {
        self.location.clone()
    }

    /// Opens a file from disk and makes it the active input.
    pub fn push_path(&mut self, path: &Path) -> io::Result<()> {
        let source = fs::read_to_string(path)?;
        self.push_buffer(path.to_string_lossy().into_owned(), Some(path.into()), source, 0);
        Ok(())
    }

    /// Makes an in-memory buffer the active input.
    pub fn push_source(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.push_buffer(name.into(), None, source.into(), 0);
    }

    fn push_buffer(
        &mut self,
        name: String,
        full_path: Option<PathBuf>,
        mut source: String,
        search_index: usize,
    ) {
        if let Some(stripped) = source.strip_prefix('\u{feff}') {
            source = stripped.to_owned();
        }
        self.stack.push(OpenFile {
            display_name: Rc::from(name.as_str()),
            full_path,
            source,
            position: 0,
            next_line: 1,
            search_index,
        });
    }

    /// Resolves an include name and pushes the file. `search_from` is 0 for
    /// `#include` and the current file's index + 1 for `#include_next`.
    pub fn push_include(
        &mut self,
        name: &str,
        angled: bool,
        next: bool,
    ) -> Result<(), Diagnostic> {
        let current = self.stack.last();
        let current_path = current.and_then(|file| file.full_path.as_deref());
        let search_from = if next {
            current.map(|file| file.search_index + 1).unwrap_or(0)
        } else {
            0
        };
        match self.resolver.resolve(name, angled, current_path, search_from) {
            Some(resolved) => {
                let name = resolved.path.to_string_lossy().into_owned();
                self.push_buffer(
                    name,
                    Some(resolved.path),
                    resolved.source,
                    resolved.search_index,
                );
                Ok(())
            }
            None => Err(Diagnostic::error(
                DiagnosticKind::Include,
                format!("included file '{name}' not found"),
            )
            .with_location(self.location())),
        }
    }

    /// Implements `#line`: renumbers subsequent lines of the active file and
    /// optionally renames it.
    pub fn set_line(&mut self, line: u32, file: Option<&str>) {
        if let Some(top) = self.stack.last_mut() {
            top.next_line = line;
            if let Some(file) = file {
                top.display_name = Rc::from(file);
            }
        }
    }

    /// Releases all input buffers.
    pub fn clear(&mut self) {
        self.stack.clear();
        self.location = SourceLocation::unknown();
    }

    /// Produces the next logical line, or `None` at end of input.
    pub fn get_prep_line(&mut self) -> Result<Option<PrepLine>, Diagnostic> {
        loop {
            let Some(top) = self.stack.last_mut() else {
                return Ok(None);
            };
            let Some((first, number)) = top.next_physical_line() else {
                self.stack.pop();
                continue;
            };

            let origin = SourceLocation {
                file: Rc::clone(&top.display_name),
                line: number,
            };
            let mut spliced = first;
            while spliced.ends_with('\\') {
                spliced.pop();
                match top.next_physical_line() {
                    Some((next, _)) => spliced.push_str(&next),
                    None => break,
                }
            }

            let text = strip_comments(top, spliced, &origin)?;
            self.location = origin.clone();
            return Ok(Some(PrepLine { text, origin }));
        }
    }
}

/// Elides comments from a spliced line, pulling further physical lines while
/// inside a block comment. Line comments run to the end of the logical line.
fn strip_comments(
    file: &mut OpenFile,
    spliced: String,
    origin: &SourceLocation,
) -> Result<String, Diagnostic> {
    let mut out = String::with_capacity(spliced.len());
    let mut text = spliced;

    'lines: loop {
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '"' | '\'' => {
                    // Copy the literal verbatim so comment markers inside it
                    // survive. An unterminated literal is the tokenizer's
                    // problem, not ours.
                    out.push(c);
                    while let Some(inner) = chars.next() {
                        out.push(inner);
                        match inner {
                            '\\' => {
                                if let Some(escaped) = chars.next() {
                                    out.push(escaped);
                                }
                            }
                            _ if inner == c => break,
                            _ => (),
                        }
                    }
                }
                '/' if chars.peek() == Some(&'/') => break,
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push(' ');
                    loop {
                        match chars.next() {
                            Some('*') if chars.peek() == Some(&'/') => {
                                chars.next();
                                break;
                            }
                            Some(_) => (),
                            None => {
                                // The comment continues on the next physical
                                // line; the logical line continues with it.
                                match file.next_physical_line() {
                                    Some((next, _)) => {
                                        // The rescan pushes the elision space
                                        // again, so take this one back.
                                        out.pop();
                                        let mut rest = String::from("/*");
                                        rest.push_str(&next);
                                        text = rest;
                                        continue 'lines;
                                    }
                                    None => {
                                        return Err(Diagnostic::error(
                                            DiagnosticKind::Lex,
                                            "unterminated block comment at end of file",
                                        )
                                        .with_location(origin.clone()));
                                    }
                                }
                            }
                        }
                    }
                }
                _ => out.push(c),
            }
        }
        return Ok(out);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use indoc::indoc;
    use tempfile::tempdir;

    use super::{IncludeResolver, SearchPaths, SourceReader};

    fn reader_for(source: &str) -> SourceReader {
        let mut reader = SourceReader::new(Box::<SearchPaths>::default());
        reader.push_source("test.c", source);
        reader
    }

    fn lines(source: &str) -> Vec<(String, u32)> {
        let mut reader = reader_for(source);
        let mut lines = vec![];
        while let Some(line) = reader.get_prep_line().unwrap() {
            lines.push((line.text, line.origin.line));
        }
        lines
    }

    #[test]
    fn splices_join_physical_lines() {
        assert_eq!(
            lines("a b \\\nc\nd\n"),
            vec![("a b c".into(), 1), ("d".into(), 3)]
        );
    }

    #[test]
    fn block_comments_become_one_space() {
        assert_eq!(lines("a/*x*/b\n"), vec![("a b".into(), 1)]);
        assert_eq!(
            lines("a/* first\nsecond */b\nc\n"),
            vec![("a b".into(), 1), ("c".into(), 3)]
        );
    }

    #[test]
    fn line_comments_run_to_end_of_line() {
        assert_eq!(lines("a // rest\nb\n"), vec![("a ".into(), 1), ("b".into(), 2)]);
    }

    #[test]
    fn comment_markers_inside_literals_survive() {
        assert_eq!(
            lines("s = \"/* not a comment */\"; // but this is\n"),
            vec![("s = \"/* not a comment */\"; ".into(), 1)]
        );
        assert_eq!(lines("c = '\\'';\n"), vec![("c = '\\'';".into(), 1)]);
    }

    #[test]
    fn unterminated_block_comment_is_fatal() {
        let mut reader = reader_for("a /* never closed\n");
        assert!(reader.get_prep_line().is_err());
    }

    #[test]
    fn bom_is_stripped() {
        assert_eq!(lines("\u{feff}x\n"), vec![("x".into(), 1)]);
    }

    #[test]
    fn missing_final_newline_still_yields_the_line() {
        assert_eq!(lines("x"), vec![("x".into(), 1)]);
    }

    #[test]
    fn set_line_renumbers_and_renames() {
        let mut reader = reader_for("a\nb\n");
        reader.get_prep_line().unwrap();
        reader.set_line(100, Some("other.c"));
        let line = reader.get_prep_line().unwrap().unwrap();
        assert_eq!(line.origin.line, 100);
        assert_eq!(&*line.origin.file, "other.c");
    }

    #[test]
    fn includes_stack_and_pop() {
        let mut reader = reader_for("outer1\nouter2\n");
        reader.get_prep_line().unwrap();
        reader.push_source("inner.h", "inner\n");
        let inner = reader.get_prep_line().unwrap().unwrap();
        assert_eq!(inner.text, "inner");
        assert_eq!(&*inner.origin.file, "inner.h");
        let outer = reader.get_prep_line().unwrap().unwrap();
        assert_eq!(outer.text, "outer2");
        assert_eq!(outer.origin.line, 2);
    }

    #[test]
    fn search_paths_resolve_in_order_and_support_include_next() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        fs::write(first.path().join("a.h"), "first\n").unwrap();
        fs::write(second.path().join("a.h"), "second\n").unwrap();

        let paths = SearchPaths {
            user: vec![first.path().into(), second.path().into()],
            system: vec![],
        };

        let hit = paths.resolve("a.h", true, None, 0).unwrap();
        assert_eq!(hit.source, "first\n");

        let next = paths.resolve("a.h", true, None, hit.search_index + 1).unwrap();
        assert_eq!(next.source, "second\n");

        assert!(paths.resolve("a.h", true, None, next.search_index + 1).is_none());
    }

    #[test]
    fn quoted_includes_prefer_the_current_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("main.c"), indoc! {r#"
            #include "local.h"
        "#})
        .unwrap();
        fs::write(dir.path().join("local.h"), "local\n").unwrap();

        let paths = SearchPaths::default();
        let current = dir.path().join("main.c");
        let hit = paths.resolve("local.h", false, Some(&current), 0).unwrap();
        assert_eq!(hit.source, "local\n");
        assert_eq!(hit.search_index, 0);

        // Angle brackets never look in the current directory.
        assert!(paths.resolve("local.h", true, Some(&current), 0).is_none());
    }
}
