//! The directive engine: `#`-prefixed lines and the conditional-inclusion
//! stack.

use cress_foundation::{
    errors::{Diagnostic, DiagnosticKind, Result},
    intern::{StringId, StringTable},
    source::SourceLocation,
};
use cress_lexer::token::{
    Punct, Token, TokenFlags, TokenKind, TokenSeq, TokenValue, VA_ARGS_INDEX,
};
use tracing::debug;

use crate::{
    convert::{convert_char, convert_number},
    macros::{Macro, MacroKind},
    Preprocessor,
};

/// State of one conditional-inclusion level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Condition {
    /// The current branch is included.
    Taken,
    /// No branch has matched yet; still looking.
    Skipping,
    /// A branch was already included (or the whole group sits inside a
    /// skipped region); everything that follows is skipped.
    TakenAlready,
}

/// The `#if`/`#elif`/`#else`/`#endif` nesting stack.
#[derive(Debug, Default)]
pub(crate) struct ConditionalStack {
    stack: Vec<Condition>,
}

impl ConditionalStack {
    /// True iff tokens at this point may be emitted.
    pub(crate) fn in_active_block(&self) -> bool {
        self.stack.iter().all(|&entry| entry == Condition::Taken)
    }

    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn clear(&mut self) {
        self.stack.clear();
    }

    fn push(&mut self, condition: bool) {
        let entry = if !self.in_active_block() {
            // Nothing inside a skipped region may ever activate.
            Condition::TakenAlready
        } else if condition {
            Condition::Taken
        } else {
            Condition::Skipping
        };
        self.stack.push(entry);
    }

    /// True when the upcoming `#elif` condition decides anything, and
    /// therefore must be evaluated.
    fn elif_needs_condition(&self) -> bool {
        self.stack.last() == Some(&Condition::Skipping)
    }

    fn elif(&mut self, condition: bool) -> std::result::Result<(), ()> {
        let top = self.stack.last_mut().ok_or(())?;
        *top = match *top {
            Condition::Skipping if condition => Condition::Taken,
            Condition::Skipping => Condition::Skipping,
            Condition::Taken | Condition::TakenAlready => Condition::TakenAlready,
        };
        Ok(())
    }

    fn toggle_else(&mut self) -> std::result::Result<(), ()> {
        let top = self.stack.last_mut().ok_or(())?;
        *top = match *top {
            Condition::Skipping => Condition::Taken,
            Condition::Taken | Condition::TakenAlready => Condition::TakenAlready,
        };
        Ok(())
    }

    fn pop(&mut self) -> std::result::Result<(), ()> {
        self.stack.pop().map(|_| ()).ok_or(())
    }
}

/// # Directive dispatch
impl Preprocessor {
    /// Interprets one directive line. `line` starts with the directive name
    /// (the `#` is already consumed) or with the `_Pragma` identifier, and
    /// ends with a `Newline` token.
    pub(crate) fn process_directive(&mut self, line: &TokenSeq) -> Result<()> {
        let Some(first) = line.first() else {
            return Ok(());
        };
        let location = first.origin.clone();
        let name = match first.kind {
            TokenKind::Keyword(keyword) => keyword.spelling().to_owned(),
            TokenKind::Ident => match first.ident_id() {
                Some(id) => self.strings.get(id).to_owned(),
                None => String::new(),
            },
            _ => String::new(),
        };
        // The condition/body slice, without the trailing newline.
        let end = if line.last().is_some_and(|t| t.kind == TokenKind::Newline) {
            line.len() - 1
        } else {
            line.len()
        };
        let rest = &line[1.min(end)..end];

        match name.as_str() {
            "if" => {
                if !self.conditionals.in_active_block() {
                    self.conditionals.push(false);
                    return Ok(());
                }
                let condition = self.evaluate_condition(rest, &location)?;
                self.conditionals.push(condition);
            }
            "ifdef" | "ifndef" => {
                if !self.conditionals.in_active_block() {
                    self.conditionals.push(false);
                    return Ok(());
                }
                let Some(id) = rest.first().and_then(Token::ident_id) else {
                    return Err(self.fatal(
                        Diagnostic::error(
                            DiagnosticKind::Directive,
                            format!("expected identifier after #{name}"),
                        )
                        .with_location(location),
                    ));
                };
                let defined = self.macros.is_defined(id);
                self.conditionals
                    .push(if name == "ifdef" { defined } else { !defined });
            }
            "elif" => {
                let condition = if self.conditionals.elif_needs_condition() {
                    self.evaluate_condition(rest, &location)?
                } else {
                    false
                };
                if self.conditionals.elif(condition).is_err() {
                    return Err(self.fatal(
                        Diagnostic::error(DiagnosticKind::Directive, "#elif without #if")
                            .with_location(location),
                    ));
                }
            }
            "else" => {
                if self.conditionals.toggle_else().is_err() {
                    return Err(self.fatal(
                        Diagnostic::error(DiagnosticKind::Directive, "#else without #if")
                            .with_location(location),
                    ));
                }
            }
            "endif" => {
                if self.conditionals.pop().is_err() {
                    return Err(self.fatal(
                        Diagnostic::error(DiagnosticKind::Directive, "#endif without #if")
                            .with_location(location),
                    ));
                }
            }
            _ if !self.conditionals.in_active_block() => {
                // Inside a skipped region only the conditional family above
                // is interpreted.
            }
            "define" => self.directive_define(rest, &location)?,
            "undef" => {
                let Some(id) = rest.first().and_then(Token::ident_id) else {
                    return Err(self.fatal(
                        Diagnostic::error(
                            DiagnosticKind::Directive,
                            "expected identifier after #undef",
                        )
                        .with_location(location),
                    ));
                };
                self.macros
                    .undef(&self.strings, id, &location, &mut self.diagnostics);
            }
            "include" => self.directive_include(rest, &location, false)?,
            "include_next" => self.directive_include(rest, &location, true)?,
            "line" => self.directive_line(rest, &location)?,
            "error" => {
                let message = spell_line(&self.strings, rest);
                return Err(self.fatal(
                    Diagnostic::error(DiagnosticKind::User, format!("#error {message}"))
                        .with_location(location),
                ));
            }
            "warning" => {
                if !self.options.suppress_warning_directive {
                    let message = spell_line(&self.strings, rest);
                    self.diagnostics.push(
                        Diagnostic::warning(DiagnosticKind::User, format!("#warning {message}"))
                            .with_location(location),
                    );
                }
            }
            "pragma" => {
                debug!("ignoring #pragma {}", spell_line(&self.strings, rest));
            }
            "_Pragma" => self.pragma_operator(rest, &location)?,
            _ => {
                self.diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticKind::Directive,
                        format!("unknown directive #{name}"),
                    )
                    .with_location(location),
                );
            }
        }
        Ok(())
    }

    fn directive_define(&mut self, tokens: &[Token], location: &SourceLocation) -> Result<()> {
        let Some(name_token) = tokens.first() else {
            return Err(self.fatal(
                Diagnostic::error(DiagnosticKind::Directive, "macro name missing in #define")
                    .with_location(location.clone()),
            ));
        };
        let Some(name) = name_token.ident_id() else {
            return Err(self.fatal(
                Diagnostic::error(
                    DiagnosticKind::Directive,
                    "macro name must be an identifier",
                )
                .with_location(location.clone()),
            ));
        };

        let mut rest = &tokens[1..];
        let mut params: Vec<StringId> = vec![];
        let mut variadic = false;
        // `(` glued to the name makes the macro function-like; with a space
        // between, the parenthesis belongs to the replacement list.
        let function_like = rest
            .first()
            .is_some_and(|t| t.is_punct(Punct::LeftParen) && t.leading_whitespace == 0);
        if function_like {
            let mut index = 1;
            if rest.get(index).is_some_and(|t| t.is_punct(Punct::RightParen)) {
                index += 1;
            } else {
                loop {
                    match rest.get(index) {
                        Some(t) if t.is_punct(Punct::Ellipsis) => {
                            variadic = true;
                            index += 1;
                            if !rest.get(index).is_some_and(|t| t.is_punct(Punct::RightParen)) {
                                return Err(self.define_error(
                                    name,
                                    "expected ')' after '...'",
                                    location,
                                ));
                            }
                            index += 1;
                            break;
                        }
                        Some(t) => {
                            let Some(param) = t.ident_id() else {
                                return Err(self.define_error(
                                    name,
                                    "expected parameter name",
                                    location,
                                ));
                            };
                            if params.contains(&param) {
                                return Err(self.define_error(
                                    name,
                                    "duplicate macro parameter",
                                    location,
                                ));
                            }
                            params.push(param);
                            index += 1;
                        }
                        None => {
                            return Err(self.define_error(
                                name,
                                "missing ')' in macro parameter list",
                                location,
                            ));
                        }
                    }
                    match rest.get(index) {
                        Some(t) if t.is_punct(Punct::Comma) => index += 1,
                        Some(t) if t.is_punct(Punct::RightParen) => {
                            index += 1;
                            break;
                        }
                        _ => {
                            return Err(self.define_error(
                                name,
                                "expected ',' or ')' in macro parameter list",
                                location,
                            ));
                        }
                    }
                }
            }
            rest = &rest[index..];
        }

        let va_args = self.strings.intern("__VA_ARGS__");
        let mut replacement: TokenSeq = Vec::with_capacity(rest.len());
        for token in rest {
            let substituted = match token.ident_id() {
                Some(id) if id == va_args => {
                    if !variadic {
                        return Err(self.define_error(
                            name,
                            "'__VA_ARGS__' can only appear in a variadic macro",
                            location,
                        ));
                    }
                    Some(VA_ARGS_INDEX)
                }
                Some(id) => params
                    .iter()
                    .position(|&param| param == id)
                    .map(|position| position as u32),
                None => None,
            };
            match substituted {
                Some(index) => {
                    let mut param = Token::param(index);
                    param.leading_whitespace = token.leading_whitespace;
                    param.origin = token.origin.clone();
                    replacement.push(param);
                }
                None => replacement.push(token.clone()),
            }
        }

        // Mark the operators in-situ and validate their positions.
        for index in 0..replacement.len() {
            if replacement[index].is_punct(Punct::HashHash) {
                if index == 0 || index == replacement.len() - 1 {
                    return Err(self.define_error(
                        name,
                        "'##' cannot appear at either end of a macro",
                        location,
                    ));
                }
                replacement[index].flags |= TokenFlags::PASTE;
            } else if function_like && replacement[index].is_punct(Punct::Hash) {
                if replacement.get(index + 1).map(|t| t.kind) != Some(TokenKind::Param) {
                    return Err(self.define_error(
                        name,
                        "'#' is not followed by a macro parameter",
                        location,
                    ));
                }
                replacement[index].flags |= TokenFlags::STRINGIZE;
            }
        }

        let kind = if function_like {
            MacroKind::FunctionLike {
                params: params.len() as u32,
                variadic,
            }
        } else {
            MacroKind::ObjectLike
        };
        self.macros.define(
            &self.strings,
            Macro {
                name,
                kind,
                replacement,
            },
            location,
            &mut self.diagnostics,
        );
        Ok(())
    }

    fn define_error(
        &mut self,
        name: StringId,
        message: &str,
        location: &SourceLocation,
    ) -> cress_foundation::errors::Fatal {
        let name = self.strings.get(name).to_owned();
        self.fatal(
            Diagnostic::error(
                DiagnosticKind::Directive,
                format!("in definition of macro '{name}': {message}"),
            )
            .with_location(location.clone()),
        )
    }

    fn directive_include(
        &mut self,
        tokens: &[Token],
        location: &SourceLocation,
        next: bool,
    ) -> Result<()> {
        let mut line = tokens.to_vec();
        self.expand_line(&mut line)?;

        let (name, angled) = match line.first() {
            Some(token) if token.kind == TokenKind::PrepString => {
                let id = token.string_value().expect("string lexeme has a payload");
                let raw = self.strings.get(id);
                match raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
                    Some(inner) => (inner.to_owned(), false),
                    None => {
                        return Err(self.include_form_error(location));
                    }
                }
            }
            Some(token) if token.is_punct(Punct::Less) => {
                let mut name = String::new();
                let mut closed = false;
                for token in &line[1..] {
                    if token.is_punct(Punct::Greater) {
                        closed = true;
                        break;
                    }
                    if token.kind == TokenKind::Newline {
                        break;
                    }
                    if !name.is_empty() && token.leading_whitespace > 0 {
                        name.push(' ');
                    }
                    name.push_str(&token.spelling(&self.strings));
                }
                if !closed || name.is_empty() {
                    return Err(self.include_form_error(location));
                }
                (name, true)
            }
            _ => return Err(self.include_form_error(location)),
        };

        debug!("including {}{}{}", if angled { "<" } else { "\"" }, name, if angled { ">" } else { "\"" });
        match self.reader.push_include(&name, angled, next) {
            Ok(()) => Ok(()),
            Err(diagnostic) => Err(self.fatal(diagnostic)),
        }
    }

    fn include_form_error(&mut self, location: &SourceLocation) -> cress_foundation::errors::Fatal {
        self.fatal(
            Diagnostic::error(
                DiagnosticKind::Include,
                "expected \"FILENAME\" or <FILENAME> after #include",
            )
            .with_location(location.clone()),
        )
    }

    fn directive_line(&mut self, tokens: &[Token], location: &SourceLocation) -> Result<()> {
        let mut line = tokens.to_vec();
        self.expand_line(&mut line)?;

        let number = line
            .first()
            .filter(|t| t.kind == TokenKind::PrepNumber)
            .and_then(Token::string_value)
            .and_then(|id| self.strings.get(id).parse::<u32>().ok());
        let Some(number) = number else {
            return Err(self.fatal(
                Diagnostic::error(
                    DiagnosticKind::Directive,
                    "expected a line number after #line",
                )
                .with_location(location.clone()),
            ));
        };

        let file = match line.get(1) {
            Some(token) if token.kind == TokenKind::PrepString => {
                let id = token.string_value().expect("string lexeme has a payload");
                let raw = self.strings.get(id);
                match raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
                    Some(inner) => Some(inner.to_owned()),
                    None => {
                        return Err(self.fatal(
                            Diagnostic::error(
                                DiagnosticKind::Directive,
                                "expected a file name after the #line number",
                            )
                            .with_location(location.clone()),
                        ));
                    }
                }
            }
            _ => None,
        };

        self.reader.set_line(number, file.as_deref());
        Ok(())
    }

    /// `_Pragma ( "…" )`: destringize the operand and treat it like a
    /// `#pragma` line.
    fn pragma_operator(&mut self, tokens: &[Token], location: &SourceLocation) -> Result<()> {
        let well_formed = tokens.len() >= 3
            && tokens[0].is_punct(Punct::LeftParen)
            && tokens[1].kind == TokenKind::PrepString
            && tokens[2].is_punct(Punct::RightParen);
        if !well_formed {
            return Err(self.fatal(
                Diagnostic::error(
                    DiagnosticKind::Directive,
                    "expected a parenthesized string literal after _Pragma",
                )
                .with_location(location.clone()),
            ));
        }
        let id = tokens[1].string_value().expect("string lexeme has a payload");
        let raw = self.strings.get(id);
        let inner = raw
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .unwrap_or(raw);
        let destringized = inner.replace("\\\"", "\"").replace("\\\\", "\\");
        debug!("ignoring _Pragma({destringized:?})");
        Ok(())
    }

    /// Expands and evaluates a `#if`/`#elif` condition. `defined` was
    /// already replaced by 0/1 during line collection.
    fn evaluate_condition(
        &mut self,
        tokens: &[Token],
        location: &SourceLocation,
    ) -> Result<bool> {
        if tokens.is_empty() {
            return Err(self.fatal(
                Diagnostic::error(DiagnosticKind::Directive, "#if with no expression")
                    .with_location(location.clone()),
            ));
        }
        let mut line = tokens.to_vec();
        self.expand_line(&mut line)?;
        line.retain(|token| token.kind != TokenKind::Newline);

        let outcome = {
            let mut parser = ExprParser {
                tokens: &line,
                position: 0,
                strings: &self.strings,
                diagnostics: &mut self.diagnostics,
                location: location.clone(),
            };
            parser.eval()
        };
        match outcome {
            Ok(value) => Ok(value.truthy()),
            Err(diagnostic) => Err(self.fatal(diagnostic)),
        }
    }
}

fn spell_line(strings: &StringTable, tokens: &[Token]) -> String {
    crate::expand::spell_tokens(strings, tokens, false)
}

/// Value of a conditional expression: `intmax_t`/`uintmax_t` arithmetic.
#[derive(Debug, Clone, Copy)]
enum Val {
    Signed(i64),
    Unsigned(u64),
}

impl Val {
    fn truthy(self) -> bool {
        match self {
            Val::Signed(value) => value != 0,
            Val::Unsigned(value) => value != 0,
        }
    }

    fn as_u64(self) -> u64 {
        match self {
            Val::Signed(value) => value as u64,
            Val::Unsigned(value) => value,
        }
    }

    fn as_i64(self) -> i64 {
        match self {
            Val::Signed(value) => value,
            Val::Unsigned(value) => value as i64,
        }
    }

    fn is_unsigned(self) -> bool {
        matches!(self, Val::Unsigned(_))
    }

    fn bool(value: bool) -> Val {
        Val::Signed(value as i64)
    }
}

/// Recursive-descent evaluator for `#if` conditions.
///
/// Operands in dead branches of `&&`, `||` and `?:` are still parsed but
/// evaluated with `live == false`, so division by zero there cannot raise.
struct ExprParser<'a> {
    tokens: &'a [Token],
    position: usize,
    strings: &'a StringTable,
    diagnostics: &'a mut Vec<Diagnostic>,
    location: SourceLocation,
}

impl<'a> ExprParser<'a> {
    fn eval(&mut self) -> std::result::Result<Val, Diagnostic> {
        let value = self.conditional(true)?;
        if self.position != self.tokens.len() {
            return Err(self.error(format!(
                "unexpected {} in preprocessor expression",
                self.tokens[self.position].kind.name()
            )));
        }
        Ok(value)
    }

    fn error(&self, message: String) -> Diagnostic {
        Diagnostic::error(DiagnosticKind::ConstExpr, message)
            .with_location(self.location.clone())
    }

    fn overflow(&mut self, live: bool) {
        if live {
            self.diagnostics.push(
                Diagnostic::warning(
                    DiagnosticKind::ConstExpr,
                    "integer overflow in preprocessor expression",
                )
                .with_location(self.location.clone()),
            );
        }
    }

    fn peek_punct(&self) -> Option<Punct> {
        match self.tokens.get(self.position)?.kind {
            TokenKind::Punct(punct) => Some(punct),
            _ => None,
        }
    }

    fn eat(&mut self, punct: Punct) -> bool {
        if self.peek_punct() == Some(punct) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn conditional(&mut self, live: bool) -> std::result::Result<Val, Diagnostic> {
        let condition = self.logical_or(live)?;
        if !self.eat(Punct::Question) {
            return Ok(condition);
        }
        let truthy = condition.truthy();
        let then = self.conditional(live && truthy)?;
        if !self.eat(Punct::Colon) {
            return Err(self.error("expected ':' in conditional expression".into()));
        }
        let otherwise = self.conditional(live && !truthy)?;
        Ok(if truthy { then } else { otherwise })
    }

    fn logical_or(&mut self, live: bool) -> std::result::Result<Val, Diagnostic> {
        let mut value = self.logical_and(live)?;
        while self.eat(Punct::LogicalOr) {
            let rhs = self.logical_and(live && !value.truthy())?;
            value = Val::bool(value.truthy() || rhs.truthy());
        }
        Ok(value)
    }

    fn logical_and(&mut self, live: bool) -> std::result::Result<Val, Diagnostic> {
        let mut value = self.bit_or(live)?;
        while self.eat(Punct::LogicalAnd) {
            let rhs = self.bit_or(live && value.truthy())?;
            value = Val::bool(value.truthy() && rhs.truthy());
        }
        Ok(value)
    }

    fn bit_or(&mut self, live: bool) -> std::result::Result<Val, Diagnostic> {
        let mut value = self.bit_xor(live)?;
        while self.eat(Punct::Pipe) {
            let rhs = self.bit_xor(live)?;
            value = binary_bitwise(value, rhs, |a, b| a | b);
        }
        Ok(value)
    }

    fn bit_xor(&mut self, live: bool) -> std::result::Result<Val, Diagnostic> {
        let mut value = self.bit_and(live)?;
        while self.eat(Punct::Caret) {
            let rhs = self.bit_and(live)?;
            value = binary_bitwise(value, rhs, |a, b| a ^ b);
        }
        Ok(value)
    }

    fn bit_and(&mut self, live: bool) -> std::result::Result<Val, Diagnostic> {
        let mut value = self.equality(live)?;
        while self.eat(Punct::Amp) {
            let rhs = self.equality(live)?;
            value = binary_bitwise(value, rhs, |a, b| a & b);
        }
        Ok(value)
    }

    fn equality(&mut self, live: bool) -> std::result::Result<Val, Diagnostic> {
        let mut value = self.relational(live)?;
        loop {
            let equal = if self.eat(Punct::EqualEqual) {
                true
            } else if self.eat(Punct::NotEqual) {
                false
            } else {
                return Ok(value);
            };
            let rhs = self.relational(live)?;
            let same = if value.is_unsigned() || rhs.is_unsigned() {
                value.as_u64() == rhs.as_u64()
            } else {
                value.as_i64() == rhs.as_i64()
            };
            value = Val::bool(same == equal);
        }
    }

    fn relational(&mut self, live: bool) -> std::result::Result<Val, Diagnostic> {
        let mut value = self.shift(live)?;
        loop {
            let (swap, or_equal) = if self.eat(Punct::Less) {
                (false, false)
            } else if self.eat(Punct::LessEqual) {
                (false, true)
            } else if self.eat(Punct::Greater) {
                (true, false)
            } else if self.eat(Punct::GreaterEqual) {
                (true, true)
            } else {
                return Ok(value);
            };
            let rhs = self.shift(live)?;
            let (lhs, rhs) = if swap { (rhs, value) } else { (value, rhs) };
            let less = if lhs.is_unsigned() || rhs.is_unsigned() {
                lhs.as_u64() < rhs.as_u64()
            } else {
                lhs.as_i64() < rhs.as_i64()
            };
            let equal = if lhs.is_unsigned() || rhs.is_unsigned() {
                lhs.as_u64() == rhs.as_u64()
            } else {
                lhs.as_i64() == rhs.as_i64()
            };
            value = Val::bool(less || (or_equal && equal));
        }
    }

    fn shift(&mut self, live: bool) -> std::result::Result<Val, Diagnostic> {
        let mut value = self.additive(live)?;
        loop {
            let left = if self.eat(Punct::ShiftLeft) {
                true
            } else if self.eat(Punct::ShiftRight) {
                false
            } else {
                return Ok(value);
            };
            let rhs = self.additive(live)?;
            let amount = rhs.as_u64();
            if amount >= 64 {
                self.overflow(live);
                value = if value.is_unsigned() {
                    Val::Unsigned(0)
                } else {
                    Val::Signed(0)
                };
                continue;
            }
            value = match (value, left) {
                (Val::Unsigned(v), true) => Val::Unsigned(v.wrapping_shl(amount as u32)),
                (Val::Unsigned(v), false) => Val::Unsigned(v >> amount),
                (Val::Signed(v), true) => Val::Signed(v.wrapping_shl(amount as u32)),
                (Val::Signed(v), false) => Val::Signed(v >> amount),
            };
        }
    }

    fn additive(&mut self, live: bool) -> std::result::Result<Val, Diagnostic> {
        let mut value = self.multiplicative(live)?;
        loop {
            let add = if self.eat(Punct::Plus) {
                true
            } else if self.eat(Punct::Minus) {
                false
            } else {
                return Ok(value);
            };
            let rhs = self.multiplicative(live)?;
            value = if value.is_unsigned() || rhs.is_unsigned() {
                let (a, b) = (value.as_u64(), rhs.as_u64());
                Val::Unsigned(if add { a.wrapping_add(b) } else { a.wrapping_sub(b) })
            } else {
                let (a, b) = (value.as_i64(), rhs.as_i64());
                let checked = if add { a.checked_add(b) } else { a.checked_sub(b) };
                match checked {
                    Some(result) => Val::Signed(result),
                    None => {
                        self.overflow(live);
                        Val::Signed(if add { a.wrapping_add(b) } else { a.wrapping_sub(b) })
                    }
                }
            };
        }
    }

    fn multiplicative(&mut self, live: bool) -> std::result::Result<Val, Diagnostic> {
        let mut value = self.unary(live)?;
        loop {
            let op = if self.eat(Punct::Star) {
                '*'
            } else if self.eat(Punct::Slash) {
                '/'
            } else if self.eat(Punct::Percent) {
                '%'
            } else {
                return Ok(value);
            };
            let rhs = self.unary(live)?;
            if op != '*' && rhs.as_u64() == 0 {
                if live {
                    return Err(self.error("division by zero in preprocessor expression".into()));
                }
                value = Val::Signed(0);
                continue;
            }
            value = if value.is_unsigned() || rhs.is_unsigned() {
                let (a, b) = (value.as_u64(), rhs.as_u64());
                Val::Unsigned(match op {
                    '*' => a.wrapping_mul(b),
                    '/' => a / b,
                    _ => a % b,
                })
            } else {
                let (a, b) = (value.as_i64(), rhs.as_i64());
                match op {
                    '*' => match a.checked_mul(b) {
                        Some(result) => Val::Signed(result),
                        None => {
                            self.overflow(live);
                            Val::Signed(a.wrapping_mul(b))
                        }
                    },
                    '/' => Val::Signed(a.wrapping_div(b)),
                    _ => Val::Signed(a.wrapping_rem(b)),
                }
            };
        }
    }

    fn unary(&mut self, live: bool) -> std::result::Result<Val, Diagnostic> {
        if self.eat(Punct::Plus) {
            return self.unary(live);
        }
        if self.eat(Punct::Minus) {
            let value = self.unary(live)?;
            return Ok(match value {
                Val::Unsigned(v) => Val::Unsigned(v.wrapping_neg()),
                Val::Signed(v) => Val::Signed(v.wrapping_neg()),
            });
        }
        if self.eat(Punct::Tilde) {
            let value = self.unary(live)?;
            return Ok(match value {
                Val::Unsigned(v) => Val::Unsigned(!v),
                Val::Signed(v) => Val::Signed(!v),
            });
        }
        if self.eat(Punct::Not) {
            let value = self.unary(live)?;
            return Ok(Val::bool(!value.truthy()));
        }
        self.primary(live)
    }

    fn primary(&mut self, live: bool) -> std::result::Result<Val, Diagnostic> {
        if self.eat(Punct::LeftParen) {
            let value = self.conditional(live)?;
            if !self.eat(Punct::RightParen) {
                return Err(self.error("expected ')' in preprocessor expression".into()));
            }
            return Ok(value);
        }

        let Some(token) = self.tokens.get(self.position) else {
            return Err(self.error("expected a value in preprocessor expression".into()));
        };
        self.position += 1;
        match token.kind {
            TokenKind::PrepNumber => {
                let converted = convert_number(self.strings, token, &mut *self.diagnostics)?;
                val_of_number(&converted).ok_or_else(|| {
                    self.error("floating constant in preprocessor expression".into())
                })
            }
            TokenKind::PrepChar => {
                let converted = convert_char(self.strings, token)?;
                val_of_number(&converted)
                    .ok_or_else(|| self.error("invalid character constant".into()))
            }
            TokenKind::Number => val_of_number(token)
                .ok_or_else(|| self.error("floating constant in preprocessor expression".into())),
            // Any identifier the expander left alone evaluates to zero, and
            // keywords follow the same rule.
            TokenKind::Ident | TokenKind::Keyword(_) => Ok(Val::Signed(0)),
            TokenKind::PrepString | TokenKind::String => {
                Err(self.error("string literal in preprocessor expression".into()))
            }
            _ => Err(self.error(format!(
                "unexpected {} in preprocessor expression",
                token.kind.name()
            ))),
        }
    }
}

fn val_of_number(token: &Token) -> Option<Val> {
    match token.value {
        TokenValue::Int { value, ty } => Some(if ty.is_unsigned() {
            Val::Unsigned(value)
        } else {
            Val::Signed(value as i64)
        }),
        _ => None,
    }
}

fn binary_bitwise(lhs: Val, rhs: Val, op: impl Fn(u64, u64) -> u64) -> Val {
    let result = op(lhs.as_u64(), rhs.as_u64());
    if lhs.is_unsigned() || rhs.is_unsigned() {
        Val::Unsigned(result)
    } else {
        Val::Signed(result as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::{Condition, ConditionalStack};

    #[test]
    fn conditional_stack_takes_and_skips() {
        let mut stack = ConditionalStack::default();
        assert!(stack.in_active_block());

        stack.push(true);
        assert!(stack.in_active_block());
        stack.push(false);
        assert!(!stack.in_active_block());
        stack.toggle_else().unwrap();
        assert!(stack.in_active_block());
        stack.pop().unwrap();
        stack.pop().unwrap();
        assert!(stack.in_active_block());
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn elif_takes_only_the_first_matching_branch() {
        let mut stack = ConditionalStack::default();
        stack.push(false);
        assert!(stack.elif_needs_condition());
        stack.elif(true).unwrap();
        assert!(stack.in_active_block());

        // A later branch cannot re-take the group.
        assert!(!stack.elif_needs_condition());
        stack.elif(true).unwrap();
        assert!(!stack.in_active_block());
        stack.toggle_else().unwrap();
        assert!(!stack.in_active_block());
    }

    #[test]
    fn nothing_activates_inside_a_skipped_region() {
        let mut stack = ConditionalStack::default();
        stack.push(false);
        stack.push(true);
        assert_eq!(stack.stack.last(), Some(&Condition::TakenAlready));
        assert!(!stack.in_active_block());
        stack.toggle_else().unwrap();
        assert!(!stack.in_active_block());
        stack.elif(true).unwrap();
        assert!(!stack.in_active_block());
    }

    #[test]
    fn unmatched_else_and_endif_error() {
        let mut stack = ConditionalStack::default();
        assert!(stack.toggle_else().is_err());
        assert!(stack.elif(false).is_err());
        assert!(stack.pop().is_err());
    }
}
