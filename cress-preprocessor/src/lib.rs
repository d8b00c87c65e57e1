//! The cress preprocessor.
//!
//! Turns raw C source into the token stream the parser consumes: logical
//! lines are tokenized, directives interpreted, macros expanded, adjacent
//! string literals joined and preprocessing lexemes converted into typed
//! literals, all behind a lazily filled lookahead buffer.
//!
//! One [`Preprocessor`] instance serves one translation unit at a time and
//! carries all of its state; nothing here is process-global.

pub mod convert;
mod directive;
mod expand;
pub mod input;
pub mod macros;

use std::{
    collections::VecDeque,
    io::{self, Write},
    path::Path,
};

use cress_foundation::{
    errors::{Diagnostic, DiagnosticKind, Fatal, Result},
    intern::StringTable,
    source::SourceLocation,
};
use cress_lexer::{
    token::{Keyword, Punct, Token, TokenKind, TokenSeq, TokenValue},
    token_stream::TokenStream,
    tokenize::tokenize,
};
use thiserror::Error;
use tracing::debug;

use crate::{
    convert::{convert_char, convert_number, convert_string},
    directive::ConditionalStack,
    input::{IncludeResolver, PrepLine, SearchPaths, SourceReader},
    macros::{prep_number, MacroLookup, MacroTable},
};

/// Behavior toggles for one translation unit.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// `-E`: keep newlines and raw lexemes for textual output instead of
    /// converting and filtering for the parser.
    pub preprocessed_output: bool,
    /// Silence `#warning` directives.
    pub suppress_warning_directive: bool,
}

/// Failure of the `-E` driver: either a fatal diagnostic or a sink error.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error(transparent)]
    Fatal(#[from] Fatal),
    #[error("cannot write preprocessed output")]
    Io(#[from] io::Error),
}

/// The logical line currently being tokenized.
struct LineCursor {
    line: PrepLine,
    position: usize,
}

/// The preprocessor driver for one translation unit.
pub struct Preprocessor {
    strings: StringTable,
    macros: MacroTable,
    reader: SourceReader,
    conditionals: ConditionalStack,
    lookahead: VecDeque<Token>,
    line_buffer: Option<LineCursor>,
    diagnostics: Vec<Diagnostic>,
    options: Options,
}

impl Preprocessor {
    pub fn new(resolver: Box<dyn IncludeResolver>, options: Options) -> Self {
        let mut strings = StringTable::new();
        let mut macros = MacroTable::new(&mut strings);
        macros.install_predefined(&mut strings);
        Self {
            strings,
            macros,
            reader: SourceReader::new(resolver),
            conditionals: ConditionalStack::default(),
            lookahead: VecDeque::new(),
            line_buffer: None,
            diagnostics: Vec::new(),
            options,
        }
    }

    pub fn with_search_paths(paths: SearchPaths, options: Options) -> Self {
        Self::new(Box::new(paths), options)
    }

    /// Opens the primary file of the translation unit.
    pub fn push_file(&mut self, path: &Path) -> io::Result<()> {
        self.reader.push_path(path)
    }

    /// Makes an in-memory buffer the input, mainly for tests and tooling.
    pub fn push_source(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.reader.push_source(name, source);
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Releases all per-translation-unit state; the instance is reusable
    /// afterwards.
    pub fn clear(&mut self) {
        self.strings.clear();
        self.macros = MacroTable::new(&mut self.strings);
        self.macros.install_predefined(&mut self.strings);
        self.reader.clear();
        self.conditionals.clear();
        self.lookahead.clear();
        self.line_buffer = None;
        self.diagnostics.clear();
    }

    /// Records a diagnostic that abandons the translation unit.
    pub(crate) fn fatal(&mut self, diagnostic: Diagnostic) -> Fatal {
        self.diagnostics.push(diagnostic);
        Fatal
    }

    /// `-D name[=value]`: injected as a `#define` line, value defaulting
    /// to 1.
    pub fn define_from_command_line(&mut self, spec: &str) -> Result<()> {
        let (name, value) = match spec.split_once('=') {
            Some((name, value)) => (name, value),
            None => (spec, "1"),
        };
        self.inject_line(&format!("#define {name} {value}"))
    }

    /// `-U name`.
    pub fn undefine_from_command_line(&mut self, name: &str) -> Result<()> {
        self.inject_line(&format!("#undef {name}"))
    }

    /// Splices an externally provided line into the input as if it were
    /// next.
    pub fn inject_line(&mut self, text: &str) -> Result<()> {
        debug_assert!(self.line_buffer.is_none());
        self.line_buffer = Some(LineCursor {
            line: PrepLine {
                text: text.to_owned(),
                origin: SourceLocation::unknown(),
            },
            position: 0,
        });
        self.preprocess_line(0)?;
        while self
            .lookahead
            .back()
            .is_some_and(|token| token.kind == TokenKind::End)
        {
            self.lookahead.pop_back();
        }
        self.line_buffer = None;
        Ok(())
    }

    /// Produces the next raw token of the current logical line, pulling a
    /// new line from the reader as needed. End of line surfaces as a
    /// `Newline` token; end of input as `End`.
    fn get_token(&mut self) -> Result<Token> {
        if self.line_buffer.is_none() {
            match self.reader.get_prep_line() {
                Ok(Some(line)) => {
                    self.line_buffer = Some(LineCursor { line, position: 0 });
                }
                Ok(None) => return Ok(Token::new(TokenKind::End)),
                Err(diagnostic) => return Err(self.fatal(diagnostic)),
            }
        }

        let cursor = self
            .line_buffer
            .as_mut()
            .expect("line buffer was just filled");
        match tokenize(&mut self.strings, &cursor.line.text[cursor.position..]) {
            Ok((mut token, consumed)) => {
                cursor.position += consumed;
                token.origin = cursor.line.origin.clone();
                if token.kind == TokenKind::End {
                    // The string terminator means end of line; newlines
                    // themselves never occur inside a logical line.
                    let mut newline = Token::new(TokenKind::Newline);
                    newline.leading_whitespace = token.leading_whitespace;
                    newline.origin = token.origin;
                    self.line_buffer = None;
                    return Ok(newline);
                }
                Ok(token)
            }
            Err(lex_error) => {
                let location = cursor.line.origin.clone();
                Err(self.fatal(lex_error.0.with_location(location)))
            }
        }
    }

    /// True for the tokens that keep a directive line routed to the
    /// directive engine even inside a skipped block, so conditional nesting
    /// stays tracked.
    fn is_conditional_directive(&self, token: &Token) -> bool {
        match token.kind {
            TokenKind::Keyword(Keyword::If) | TokenKind::Keyword(Keyword::Else) => true,
            _ => token
                .ident_id()
                .is_some_and(|id| matches!(self.strings.get(id), "ifdef" | "ifndef" | "elif" | "endif")),
        }
    }

    /// Reads tokens up to the end of the logical line into `line`, joining
    /// function-like macro invocations that span lines, and replacing
    /// `defined` on `#if`/`#elif` lines. Returns the number of macro names
    /// seen; the line always ends with exactly one `Newline`.
    fn read_complete_line(
        &mut self,
        line: &mut TokenSeq,
        first: Token,
        directive: bool,
    ) -> Result<usize> {
        let mut macros_found = 0;
        let mut expandable = true;
        let mut token = first;
        if directive {
            expandable = token.kind == TokenKind::Keyword(Keyword::If)
                || token
                    .ident_id()
                    .is_some_and(|id| self.strings.get(id) == "elif");
            line.push(token.clone());
            token = self.get_token()?;
        }

        while token.kind != TokenKind::Newline && token.kind != TokenKind::End {
            if expandable && token.is_expandable() {
                let id = token.ident_id().expect("expandable tokens are identifiers");
                if directive && self.strings.get(id) == "defined" {
                    self.read_defined_operator(line, &token)?;
                } else {
                    let function_like = matches!(
                        self.macros.lookup(id),
                        Some(MacroLookup::Static(def)) if def.is_function_like()
                    );
                    if self.macros.lookup(id).is_some() {
                        macros_found += 1;
                    }
                    line.push(token.clone());
                    if function_like {
                        let name = self.strings.get(id).to_owned();
                        self.read_macro_invocation(line, &name)?;
                    }
                }
            } else {
                line.push(token.clone());
            }
            token = self.get_token()?;
        }

        if token.kind == TokenKind::Newline {
            line.push(token);
        } else {
            let mut newline = Token::new(TokenKind::Newline);
            newline.origin = self.reader.location();
            line.push(newline);
        }
        Ok(macros_found)
    }

    /// Reads a whole function-like invocation into `line`, balancing
    /// parentheses across as many lines as it takes.
    fn read_macro_invocation(&mut self, line: &mut TokenSeq, name: &str) -> Result<()> {
        let mut token = self.get_token()?;
        while token.kind == TokenKind::Newline {
            token = self.get_token()?;
        }
        if token.kind == TokenKind::End {
            // End of input right after the name; it stands alone.
            return Ok(());
        }
        let opened = token.is_punct(Punct::LeftParen);
        line.push(token);
        if !opened {
            return Ok(());
        }

        let mut nesting = 1u32;
        while nesting > 0 {
            let token = self.get_token()?;
            match token.kind {
                // Invocations may span lines; the newline is dropped at the
                // join.
                TokenKind::Newline => continue,
                TokenKind::End => {
                    let location = self.reader.location();
                    return Err(self.fatal(
                        Diagnostic::error(
                            DiagnosticKind::Macro,
                            format!("unbalanced invocation of macro '{name}'"),
                        )
                        .with_location(location),
                    ));
                }
                TokenKind::Punct(Punct::LeftParen) => nesting += 1,
                TokenKind::Punct(Punct::RightParen) => nesting -= 1,
                _ => (),
            }
            line.push(token);
        }
        Ok(())
    }

    /// Replaces `defined name` and `defined (name)` with 0 or 1 constants.
    fn read_defined_operator(&mut self, line: &mut TokenSeq, defined: &Token) -> Result<()> {
        let mut token = self.get_token()?;
        let parenthesized = token.is_punct(Punct::LeftParen);
        if parenthesized {
            token = self.get_token()?;
        }
        let Some(id) = token.ident_id() else {
            let location = token.origin.clone();
            return Err(self.fatal(
                Diagnostic::error(
                    DiagnosticKind::Directive,
                    "expected identifier in 'defined' clause",
                )
                .with_location(location),
            ));
        };

        let text = if self.macros.is_defined(id) { "1" } else { "0" };
        let mut constant = prep_number(&mut self.strings, text);
        constant.leading_whitespace = defined.leading_whitespace;
        constant.origin = defined.origin.clone();
        line.push(constant);

        if parenthesized {
            let close = self.get_token()?;
            if !close.is_punct(Punct::RightParen) {
                let location = close.origin.clone();
                return Err(self.fatal(
                    Diagnostic::error(
                        DiagnosticKind::Directive,
                        "expected ')' to close 'defined' clause",
                    )
                    .with_location(location),
                ));
            }
        }
        Ok(())
    }

    /// Gets the token at `i` of the working line, or extends the line with
    /// the next token from the input (skipping line boundaries, dropping a
    /// trailing newline first).
    fn skip_or_get_token(&mut self, line: &mut TokenSeq, i: usize) -> Result<Token> {
        if i + 1 == line.len() && line[i].kind == TokenKind::Newline {
            line.pop();
        }
        if i == line.len() {
            loop {
                let token = self.get_token()?;
                match token.kind {
                    TokenKind::Newline => continue,
                    TokenKind::End => {
                        let location = self.reader.location();
                        return Err(self.fatal(
                            Diagnostic::error(
                                DiagnosticKind::Macro,
                                "unexpected end of input inside a macro invocation",
                            )
                            .with_location(location),
                        ));
                    }
                    _ => {
                        line.push(token.clone());
                        return Ok(token);
                    }
                }
            }
        }
        Ok(line[i].clone())
    }

    /// Ensures the function-like invocation at `start` has all of its
    /// tokens in the line, reading more input if the current line ends
    /// mid-invocation. Returns how many slots it advanced.
    fn complete_invocation(&mut self, line: &mut TokenSeq, start: usize) -> Result<usize> {
        let mut i = start;
        let token = self.skip_or_get_token(line, i)?;
        i += 1;
        if !token.is_punct(Punct::LeftParen) {
            return Ok(i - start);
        }

        let mut nesting = 1u32;
        while nesting > 0 {
            let token = self.skip_or_get_token(line, i)?;
            i += 1;
            if token.is_punct(Punct::LeftParen) {
                nesting += 1;
            }
            if token.is_punct(Punct::RightParen) {
                nesting -= 1;
            }
        }
        Ok(i - start)
    }

    /// After a round of expansion, pulls in whatever input new partial
    /// invocations still need, and completes the line. Returns the number
    /// of function-like macros that may expand next round.
    fn refill_expanding_line(&mut self, line: &mut TokenSeq) -> Result<usize> {
        if line.is_empty() {
            return Ok(0);
        }
        let mut pending = 0;
        let mut i = 0;
        while i < line.len() {
            let token = &line[i];
            let id = match token.ident_id() {
                Some(id) if token.is_expandable() && !token.disable_expand.contains(id) => id,
                _ => {
                    i += 1;
                    continue;
                }
            };
            let function_like = matches!(
                self.macros.lookup(id),
                Some(MacroLookup::Static(def)) if def.is_function_like()
            );
            if function_like {
                i += self.complete_invocation(line, i + 1)?;
                pending += 1;
            }
            i += 1;
        }

        // Complete the line so directives never mix into the next read.
        if line.last().map(|token| token.kind) != Some(TokenKind::Newline) {
            let token = self.get_token()?;
            if token.kind == TokenKind::End {
                let mut newline = Token::new(TokenKind::Newline);
                newline.origin = self.reader.location();
                line.push(newline);
            } else {
                pending += self.read_complete_line(line, token, false)?;
            }
        }
        Ok(pending)
    }

    /// Adds a finished token to the lookahead buffer. Outside `-E` mode
    /// this is where preprocessing lexemes become typed literals and
    /// adjacent strings join.
    fn add_to_lookahead(&mut self, token: Token) -> Result<()> {
        let mut token = token;
        if !self.options.preprocessed_output {
            token = match token.kind {
                TokenKind::PrepChar => match convert_char(&self.strings, &token) {
                    Ok(converted) => converted,
                    Err(diagnostic) => return Err(self.fatal(diagnostic)),
                },
                TokenKind::PrepNumber => {
                    match convert_number(&self.strings, &token, &mut self.diagnostics) {
                        Ok(converted) => converted,
                        Err(diagnostic) => return Err(self.fatal(diagnostic)),
                    }
                }
                TokenKind::PrepString => match convert_string(&mut self.strings, &token) {
                    Ok(converted) => converted,
                    Err(diagnostic) => return Err(self.fatal(diagnostic)),
                },
                _ => token,
            };

            if token.kind == TokenKind::String {
                let joinable = self
                    .lookahead
                    .back()
                    .filter(|previous| previous.kind == TokenKind::String)
                    .and_then(Token::string_value);
                if let (Some(previous_id), Some(current_id)) = (joinable, token.string_value()) {
                    let joined = format!(
                        "{}{}",
                        self.strings.get(previous_id),
                        self.strings.get(current_id)
                    );
                    let joined = self.strings.intern(joined);
                    if let Some(previous) = self.lookahead.back_mut() {
                        previous.value = TokenValue::Str(joined);
                    }
                    debug!("token( \"{}\" )", self.strings.get(joined));
                    return Ok(());
                }
            }
        }

        debug!("token( {} )", token.spelling(&self.strings));
        self.lookahead.push_back(token);
        Ok(())
    }

    /// The buffer is ready once it holds `n` tokens, unless the last one is
    /// a string that the next line might extend.
    fn is_lookahead_ready(&self, n: usize) -> bool {
        if self.lookahead.len() < n {
            return false;
        }
        if !self.options.preprocessed_output {
            if let Some(last) = self.lookahead.back() {
                if last.kind == TokenKind::String {
                    return false;
                }
            }
        }
        true
    }

    /// Consumes whole logical lines until the lookahead holds at least `n`
    /// tokens or input ends; remaining slots are padded with `End`.
    fn preprocess_line(&mut self, n: usize) -> Result<()> {
        loop {
            let token = self.get_token()?;
            if token.kind == TokenKind::End {
                if self.conditionals.depth() > 0 {
                    let location = self.reader.location();
                    return Err(self.fatal(
                        Diagnostic::error(
                            DiagnosticKind::Directive,
                            "unterminated conditional directive at end of input",
                        )
                        .with_location(location),
                    ));
                }
                break;
            }

            if token.is_punct(Punct::Hash) {
                let name = self.get_token()?;
                if (name.kind != TokenKind::Newline && self.conditionals.in_active_block())
                    || self.is_conditional_directive(&name)
                {
                    let mut line = TokenSeq::new();
                    self.read_complete_line(&mut line, name, true)?;
                    self.process_directive(&line)?;
                } else {
                    // A skipped or null directive; drop the rest of the
                    // line.
                    self.line_buffer = None;
                }
            } else if token
                .ident_id()
                .is_some_and(|id| self.strings.get(id) == "_Pragma")
                && self.conditionals.in_active_block()
            {
                let mut line = TokenSeq::new();
                self.read_complete_line(&mut line, token, true)?;
                self.process_directive(&line)?;
            } else if self.conditionals.in_active_block() {
                let mut line = TokenSeq::new();
                let mut pending = self.read_complete_line(&mut line, token, false)?;
                while pending > 0 && self.expand_line(&mut line)? > 0 {
                    pending = self.refill_expanding_line(&mut line)?;
                }
                for token in line {
                    if token.kind != TokenKind::Newline || self.options.preprocessed_output {
                        self.add_to_lookahead(token)?;
                    }
                }
            } else {
                // An inactive non-directive line is not tokenized further.
                self.line_buffer = None;
            }

            if self.is_lookahead_ready(n) {
                break;
            }
        }

        while self.lookahead.len() < n {
            self.add_to_lookahead(Token::new(TokenKind::End))?;
        }
        Ok(())
    }

    /// Drives the whole translation unit and writes its `-E` textual form.
    pub fn preprocess(&mut self, output: &mut dyn Write) -> std::result::Result<(), PreprocessError> {
        self.options.preprocessed_output = true;
        loop {
            let token = self.next()?;
            if token.kind == TokenKind::End {
                break;
            }
            for _ in 0..token.leading_whitespace {
                output.write_all(b" ")?;
            }
            output.write_all(token.spelling(&self.strings).as_bytes())?;
        }
        Ok(())
    }
}

impl TokenStream for Preprocessor {
    fn next(&mut self) -> Result<Token> {
        if self.lookahead.is_empty() {
            self.preprocess_line(1)?;
        }
        Ok(self
            .lookahead
            .pop_front()
            .unwrap_or_else(|| Token::new(TokenKind::End)))
    }

    fn peek_n(&mut self, n: usize) -> Result<Token> {
        debug_assert!(n > 0);
        if self.lookahead.len() < n {
            self.preprocess_line(n)?;
        }
        Ok(self
            .lookahead
            .get(n - 1)
            .cloned()
            .unwrap_or_else(|| Token::new(TokenKind::End)))
    }

    fn consume(&mut self, kind: TokenKind) -> Result<Token> {
        let token = self.next()?;
        if token.kind != kind {
            let message = format!(
                "unexpected '{}', expected {}",
                token.spelling(&self.strings),
                kind.name()
            );
            let location = token.origin.clone();
            return Err(self.fatal(
                Diagnostic::error(DiagnosticKind::Lex, message).with_location(location),
            ));
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use cress_foundation::errors::Severity;
    use cress_lexer::{token::TokenKind, token_stream::TokenStream};
    use indoc::indoc;

    use crate::{input::SearchPaths, Options, Preprocessor};

    fn preprocessor_for(source: &str) -> Preprocessor {
        let mut preprocessor =
            Preprocessor::with_search_paths(SearchPaths::default(), Options::default());
        preprocessor.push_source("test.c", source);
        preprocessor
    }

    fn drain(preprocessor: &mut Preprocessor) -> Vec<String> {
        let mut spellings = vec![];
        loop {
            let token = preprocessor.next().expect("preprocessing should succeed");
            if token.kind == TokenKind::End {
                break;
            }
            assert_ne!(token.kind, TokenKind::Newline);
            assert_ne!(token.kind, TokenKind::PrepNumber);
            assert_ne!(token.kind, TokenKind::PrepString);
            assert_ne!(token.kind, TokenKind::PrepChar);
            spellings.push(token.spelling(preprocessor.strings()));
        }
        spellings
    }

    fn emitted(source: &str) -> String {
        drain(&mut preprocessor_for(source)).join(" ")
    }

    fn preprocessed_text(source: &str) -> String {
        let mut preprocessor =
            Preprocessor::with_search_paths(SearchPaths::default(), Options::default());
        preprocessor.push_source("test.c", source);
        let mut output = vec![];
        preprocessor.preprocess(&mut output).expect("-E should succeed");
        String::from_utf8(output).expect("-E output is text")
    }

    #[test]
    fn function_like_macro_expands_arguments() {
        let source = indoc! {"
            #define SQ(x) ((x)*(x))
            SQ(1+2)
        "};
        assert_eq!(emitted(source), "( ( 1 + 2 ) * ( 1 + 2 ) )");
    }

    #[test]
    fn mutually_recursive_macros_stop_expanding() {
        let source = indoc! {"
            #define A B
            #define B A
            A
        "};
        assert_eq!(emitted(source), "A");
    }

    #[test]
    fn stringification_spells_the_raw_argument() {
        let source = indoc! {"
            #define STR(x) #x
            STR(hello world)
        "};
        assert_eq!(emitted(source), "\"hello world\"");
    }

    #[test]
    fn stringification_escapes_quotes_and_backslashes() {
        let source = indoc! {r#"
            #define STR(x) #x
            STR("quoted")
        "#};
        assert_eq!(emitted(source), r#""\"quoted\"""#);
    }

    #[test]
    fn token_pasting_builds_new_tokens() {
        let source = indoc! {"
            #define CAT(a,b) a##b
            int CAT(foo,42) = 0;
        "};
        assert_eq!(emitted(source), "int foo42 = 0 ;");
    }

    #[test]
    fn pasted_tokens_are_expandable_again() {
        let source = indoc! {"
            #define CAT(a,b) a##b
            #define FOOBAR 7
            CAT(FOO,BAR)
        "};
        assert_eq!(emitted(source), "7");
    }

    #[test]
    fn defined_operator_gates_conditionals() {
        let source = indoc! {"
            #if defined(X) && Y > 0
            A
            #else
            B
            #endif
        "};
        assert_eq!(emitted(source), "B");
    }

    #[test]
    fn adjacent_string_literals_join() {
        assert_eq!(emitted("\"ab\" \"cd\"\n"), "\"abcd\"");
        let source = indoc! {r#"
            #define GREETING "hello "
            const char *s = GREETING "world";
        "#};
        assert_eq!(
            emitted(source),
            "const char * s = \"hello world\" ;"
        );
    }

    #[test]
    fn invocations_collect_arguments_across_lines() {
        let source = indoc! {"
            #define MAX(a,b) ((a)>(b)?(a):(b))
            MAX( MAX(1,2),
             3 )
        "};
        assert_eq!(
            emitted(source),
            "( ( ( ( 1 ) > ( 2 ) ? ( 1 ) : ( 2 ) ) ) > ( 3 ) ? ( ( ( 1 ) > ( 2 ) ? ( 1 ) : ( 2 ) ) ) : ( 3 ) )"
        );
    }

    #[test]
    fn object_like_chains_expand_to_fixpoint() {
        let source = indoc! {"
            #define ONE 1
            #define TWO ONE + ONE
            #define FOUR TWO + TWO
            FOUR
        "};
        assert_eq!(emitted(source), "1 + 1 + 1 + 1");
    }

    #[test]
    fn empty_macro_vanishes() {
        let source = indoc! {"
            #define NOTHING
            NOTHING
        "};
        assert_eq!(emitted(source), "");
    }

    #[test]
    fn function_like_name_without_parenthesis_stays() {
        let source = indoc! {"
            #define F(x) x
            int F;
        "};
        assert_eq!(emitted(source), "int F ;");
    }

    #[test]
    fn variadic_macros_and_comma_swallowing() {
        let source = indoc! {r#"
            #define LOG(fmt, ...) printf(fmt, ##__VA_ARGS__)
            LOG("a");
            LOG("b", 1, 2);
        "#};
        assert_eq!(
            emitted(source),
            "printf ( \"a\" ) ; printf ( \"b\" , 1 , 2 ) ;"
        );
    }

    #[test]
    fn conditional_branches_nest() {
        let source = indoc! {"
            #define A 1
            #if A
            #if 0
            no
            #else
            yes
            #endif
            #elif A
            never
            #endif
        "};
        assert_eq!(emitted(source), "yes");
    }

    #[test]
    fn elif_takes_the_first_true_branch_only() {
        let source = indoc! {"
            #if 0
            a
            #elif 1
            b
            #elif 1
            c
            #else
            d
            #endif
        "};
        assert_eq!(emitted(source), "b");
    }

    #[test]
    fn division_by_zero_is_fine_when_short_circuited() {
        let source = indoc! {"
            #if 0 && 1 / 0
            a
            #endif
            #if 1 ? 2 : 1 / 0
            b
            #endif
        "};
        assert_eq!(emitted(source), "b");
    }

    #[test]
    fn division_by_zero_in_a_live_operand_is_fatal() {
        let mut preprocessor = preprocessor_for("#if 1 / 0\n#endif\n");
        assert!(preprocessor.next().is_err());
    }

    #[test]
    fn unterminated_conditional_is_fatal_at_end_of_input() {
        let mut preprocessor = preprocessor_for("#if 1\nx\n");
        assert!((|| -> cress_foundation::errors::Result<()> {
            loop {
                if preprocessor.next()?.kind == TokenKind::End {
                    return Ok(());
                }
            }
        })()
        .is_err());
    }

    #[test]
    fn error_directive_is_fatal_with_its_message() {
        let mut preprocessor = preprocessor_for("#error this build is broken\n");
        assert!(preprocessor.next().is_err());
        let diagnostic = preprocessor
            .diagnostics()
            .iter()
            .find(|d| d.severity == Severity::Error)
            .expect("#error should be recorded");
        assert!(diagnostic.message.contains("this build is broken"));
    }

    #[test]
    fn warning_directive_warns_and_can_be_suppressed() {
        let mut preprocessor = preprocessor_for("#warning careful\nx\n");
        drain(&mut preprocessor);
        assert_eq!(preprocessor.diagnostics().len(), 1);

        let mut suppressed = Preprocessor::with_search_paths(
            SearchPaths::default(),
            Options {
                suppress_warning_directive: true,
                ..Options::default()
            },
        );
        suppressed.push_source("test.c", "#warning careful\nx\n");
        drain(&mut suppressed);
        assert!(suppressed.diagnostics().is_empty());
    }

    #[test]
    fn unknown_directives_warn_but_continue() {
        let mut preprocessor = preprocessor_for("#frobnicate\nx\n");
        assert_eq!(drain(&mut preprocessor), vec!["x"]);
        assert_eq!(preprocessor.diagnostics().len(), 1);
        assert_eq!(preprocessor.diagnostics()[0].severity, Severity::Warning);
    }

    #[test]
    fn null_directive_is_ignored() {
        assert_eq!(emitted("#\nx\n"), "x");
    }

    #[test]
    fn line_directive_renumbers_line_macro() {
        let source = indoc! {"
            #line 100 \"other.c\"
            __LINE__ __FILE__
        "};
        assert_eq!(emitted(source), "100 \"other.c\"");
    }

    #[test]
    fn file_and_line_resolve_at_use() {
        let source = "__LINE__\n__LINE__\n";
        assert_eq!(emitted(source), "1 2");
        assert_eq!(emitted("__FILE__\n"), "\"test.c\"");
    }

    #[test]
    fn predefined_macros_are_available() {
        assert_eq!(emitted("__STDC__\n"), "1");
        assert_eq!(emitted("__STDC_VERSION__\n"), "199901l");
        let date = emitted("__DATE__\n");
        assert!(date.starts_with('"') && date.ends_with('"'));
    }

    #[test]
    fn command_line_definitions_inject() {
        let mut preprocessor =
            Preprocessor::with_search_paths(SearchPaths::default(), Options::default());
        preprocessor
            .define_from_command_line("ANSWER=42")
            .expect("define should inject");
        preprocessor
            .define_from_command_line("FLAG")
            .expect("define should inject");
        preprocessor.push_source("test.c", "ANSWER FLAG\n");
        assert_eq!(drain(&mut preprocessor), vec!["42", "1"]);
    }

    #[test]
    fn undef_removes_a_definition() {
        let source = indoc! {"
            #define X 1
            #undef X
            X
        "};
        assert_eq!(emitted(source), "X");
    }

    #[test]
    fn redefinition_conflict_warns() {
        let source = indoc! {"
            #define X 1
            #define X 2
            X
        "};
        let mut preprocessor = preprocessor_for(source);
        assert_eq!(drain(&mut preprocessor), vec!["2"]);
        assert_eq!(preprocessor.diagnostics().len(), 1);
    }

    #[test]
    fn wrong_argument_count_is_fatal() {
        let source = indoc! {"
            #define TWO(a,b) a b
            TWO(1)
        "};
        let mut preprocessor = preprocessor_for(source);
        assert!(preprocessor.next().is_err());
    }

    #[test]
    fn peek_interleavings_match_plain_next() {
        let source = indoc! {"
            #define SQ(x) ((x)*(x))
            int a = SQ(3) + 1;
            \"x\" \"y\"
        "};
        let plain = drain(&mut preprocessor_for(source));

        let mut peeked = preprocessor_for(source);
        let mut collected = vec![];
        loop {
            let ahead = peeked.peek().expect("peek should succeed");
            assert_eq!(ahead.kind, peeked.peek_n(1).expect("peek_n(1)").kind);
            let _ = peeked.peek_n(4).expect("deep peek should succeed");
            let token = peeked.next().expect("next should succeed");
            assert_eq!(token.kind, ahead.kind);
            if token.kind == TokenKind::End {
                break;
            }
            collected.push(token.spelling(peeked.strings()));
        }
        assert_eq!(plain, collected);
    }

    #[test]
    fn peeking_past_end_of_input_yields_end_tokens() {
        let mut preprocessor = preprocessor_for("x\n");
        assert_eq!(
            preprocessor.peek_n(10).expect("peek_n should succeed").kind,
            TokenKind::End
        );
    }

    #[test]
    fn consume_checks_the_kind() {
        let mut preprocessor = preprocessor_for("int x;\n");
        use cress_lexer::token::Keyword;
        preprocessor
            .consume(TokenKind::Keyword(Keyword::Int))
            .expect("int is first");
        assert!(preprocessor.consume(TokenKind::Number).is_err());
    }

    #[test]
    fn preprocessed_output_keeps_spacing_and_newlines() {
        let source = "int  main ( void ) ;\n";
        assert_eq!(preprocessed_text(source), "int  main ( void ) ;\n");
    }

    #[test]
    fn preprocessed_output_round_trips() {
        let source = indoc! {r#"
            #define TIMES(a,b) a * b
            int area = TIMES(w, h);
            char *s = "one" " two";
        "#};
        let once = preprocessed_text(source);
        let twice = preprocessed_text(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn include_pulls_tokens_from_the_resolved_file() {
        use std::fs;
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("answer.h"), "#define ANSWER 42\n").expect("write header");

        let mut preprocessor = Preprocessor::with_search_paths(
            SearchPaths {
                user: vec![dir.path().into()],
                system: vec![],
            },
            Options::default(),
        );
        preprocessor.push_source("test.c", "#include <answer.h>\nANSWER\n");
        assert_eq!(drain(&mut preprocessor), vec!["42"]);
    }

    #[test]
    fn missing_include_is_fatal() {
        let mut preprocessor = preprocessor_for("#include <no/such/file.h>\n");
        assert!(preprocessor.next().is_err());
        assert!(preprocessor
            .diagnostics()
            .iter()
            .any(|d| d.severity == Severity::Error));
    }

    #[test]
    fn include_guards_behave() {
        use std::fs;
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("guarded.h"),
            indoc! {"
                #ifndef GUARDED_H
                #define GUARDED_H
                once
                #endif
            "},
        )
        .expect("write header");

        let mut preprocessor = Preprocessor::with_search_paths(
            SearchPaths {
                user: vec![dir.path().into()],
                system: vec![],
            },
            Options::default(),
        );
        preprocessor.push_source(
            "test.c",
            "#include <guarded.h>\n#include <guarded.h>\n",
        );
        assert_eq!(drain(&mut preprocessor), vec!["once"]);
    }

    #[test]
    fn clear_makes_the_instance_reusable() {
        let mut preprocessor = preprocessor_for("#define X 1\nX\n");
        assert_eq!(drain(&mut preprocessor), vec!["1"]);
        preprocessor.clear();
        preprocessor.push_source("again.c", "X\n");
        assert_eq!(drain(&mut preprocessor), vec!["X"]);
    }

    #[test]
    fn pragmas_are_ignored() {
        assert_eq!(emitted("#pragma pack(1)\nx\n"), "x");
        assert_eq!(emitted("_Pragma(\"pack(1)\")\nx\n"), "x");
    }

    #[test]
    fn skipped_blocks_do_not_expand_or_error() {
        let source = indoc! {"
            #if 0
            #define X 1
            #error never reached
            junk tokens )( that are never expanded
            #endif
            X
        "};
        assert_eq!(emitted(source), "X");
    }
}
