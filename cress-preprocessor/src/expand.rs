//! The macro expander.
//!
//! [`Preprocessor::expand_line`] rewrites one working line in place,
//! expanding every enabled macro it can complete with the tokens present.
//! Function-like invocations whose `(`/arguments have not been read yet are
//! left untouched; the driver notices them through
//! `refill_expanding_line`, pulls more input, and calls back in. Suppression
//! of self-expansion rides on each token's `disable_expand` set, which every
//! substitution copies and extends.

use cress_foundation::{
    errors::{Diagnostic, DiagnosticKind, Result},
    intern::{StringId, StringTable},
};
use cress_lexer::{
    token::{IntType, Punct, Token, TokenFlags, TokenKind, TokenSeq, TokenValue, VA_ARGS_INDEX},
    tokenize::tokenize,
};

use crate::{
    macros::{Macro, MacroKind, MacroLookup},
    Preprocessor,
};

enum Found {
    File,
    Line,
    Object(Macro),
    Function(Macro),
}

enum Collect {
    Complete { args: Vec<TokenSeq>, end: usize },
    /// The invocation runs past the tokens present; more input is needed.
    Incomplete,
}

/// # Expansion
impl Preprocessor {
    /// One complete expansion pass over `line`. Returns the number of macro
    /// expansions performed; zero means the line is stable under the tokens
    /// it currently holds.
    pub(crate) fn expand_line(&mut self, line: &mut TokenSeq) -> Result<usize> {
        let mut count = 0;
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

            let found = match self.macros.lookup(id) {
                None => {
                    i += 1;
                    continue;
                }
                Some(MacroLookup::CurrentFile) => Found::File,
                Some(MacroLookup::CurrentLine) => Found::Line,
                Some(MacroLookup::Static(def)) if def.is_function_like() => {
                    Found::Function(def.clone())
                }
                Some(MacroLookup::Static(def)) => Found::Object(def.clone()),
            };

            match found {
                Found::File => {
                    let origin = line[i].origin.clone();
                    let mut replacement = Token::new(TokenKind::String);
                    replacement.value = TokenValue::Str(self.strings.intern(&*origin.file));
                    replacement.leading_whitespace = line[i].leading_whitespace;
                    replacement.origin = origin;
                    line[i] = replacement;
                    count += 1;
                }
                Found::Line => {
                    let origin = line[i].origin.clone();
                    let mut replacement = Token::new(TokenKind::Number);
                    replacement.value = TokenValue::Int {
                        value: u64::from(origin.line),
                        ty: IntType::Int,
                    };
                    replacement.leading_whitespace = line[i].leading_whitespace;
                    replacement.origin = origin;
                    line[i] = replacement;
                    count += 1;
                }
                Found::Object(def) => {
                    let invoker = line[i].clone();
                    let mut body = self.substitute(&def, &invoker, &[])?;
                    mark_expansion(&mut body, &invoker, id);
                    line.splice(i..=i, body);
                    count += 1;
                    // Rescan from the same position; paint guarantees
                    // progress.
                }
                Found::Function(def) => {
                    if !line
                        .get(i + 1)
                        .is_some_and(|next| next.is_punct(Punct::LeftParen))
                    {
                        // Not an invocation with the tokens present. Either
                        // the name stands alone, or the driver still has to
                        // pull the parenthesis from the next line.
                        i += 1;
                        continue;
                    }
                    match collect_args(line, i + 1, &def) {
                        Collect::Incomplete => {
                            i += 1;
                        }
                        Collect::Complete { args, end } => {
                            self.check_arity(&def, &args, &line[i])?;
                            let invoker = line[i].clone();
                            let mut body = self.substitute(&def, &invoker, &args)?;
                            mark_expansion(&mut body, &invoker, id);
                            line.splice(i..=end, body);
                            count += 1;
                        }
                    }
                }
            }
        }
        Ok(count)
    }

    fn check_arity(&mut self, def: &Macro, args: &[TokenSeq], invoker: &Token) -> Result<()> {
        let MacroKind::FunctionLike { params, variadic } = def.kind else {
            return Ok(());
        };
        let params = params as usize;
        let supplied = args.len();
        let matches = if variadic {
            supplied >= params
        } else {
            supplied == params
        };
        if matches {
            return Ok(());
        }
        let name = self.strings.get(def.name).to_owned();
        Err(self.fatal(
            Diagnostic::error(
                DiagnosticKind::Macro,
                format!(
                    "macro '{name}' expects {}{params} argument{}, {supplied} given",
                    if variadic { "at least " } else { "" },
                    if params == 1 { "" } else { "s" },
                ),
            )
            .with_location(invoker.origin.clone()),
        ))
    }

    /// Replaces `Param` tokens of `def`'s replacement list, applying
    /// stringification and concatenation. Parameters used as `#`/`##`
    /// operands substitute their raw argument; all others substitute the
    /// fully expanded form.
    fn substitute(
        &mut self,
        def: &Macro,
        invoker: &Token,
        args: &[TokenSeq],
    ) -> Result<TokenSeq> {
        let params = match def.kind {
            MacroKind::FunctionLike { params, .. } => params,
            MacroKind::ObjectLike => 0,
        };
        let mut expanded_cache: Vec<Option<TokenSeq>> = vec![None; params as usize + 1];

        let replacement = &def.replacement;
        let mut out = TokenSeq::new();
        // Token count the previous replacement item contributed; zero marks
        // an empty argument, the lhs placemarker of a paste.
        let mut previous_contribution = 0usize;
        let mut j = 0;
        while j < replacement.len() {
            let token = &replacement[j];

            if token.flags.contains(TokenFlags::PASTE) {
                j += 1;
                let Some(rhs_item) = replacement.get(j) else {
                    break;
                };
                let rhs_is_va_args = rhs_item.value == TokenValue::Param(VA_ARGS_INDEX);
                let rhs_tokens: TokenSeq = match rhs_item.value {
                    TokenValue::Param(index) => arg_slice(args, index, params).to_vec(),
                    _ => vec![rhs_item.clone()],
                };

                if rhs_is_va_args
                    && out
                        .last()
                        .is_some_and(|last| last.is_punct(Punct::Comma))
                {
                    if rhs_tokens.is_empty() {
                        // `, ## __VA_ARGS__` with no variadic arguments
                        // swallows the comma.
                        out.pop();
                        previous_contribution = 0;
                    } else {
                        // With arguments the comma stays and nothing is
                        // pasted.
                        let start = out.len();
                        out.extend(rhs_tokens);
                        previous_contribution = out.len() - start;
                    }
                    j += 1;
                    continue;
                }

                if rhs_tokens.is_empty() {
                    // Right placemarker: the left operand stays unchanged.
                    j += 1;
                    continue;
                }
                if previous_contribution == 0 || out.is_empty() {
                    // Left placemarker: the right operand passes through.
                    let start = out.len();
                    out.extend(rhs_tokens);
                    previous_contribution = out.len() - start;
                    j += 1;
                    continue;
                }

                let lhs = match out.pop() {
                    Some(lhs) => lhs,
                    None => break,
                };
                let pasted = self.paste(&lhs, &rhs_tokens[0])?;
                out.push(pasted);
                out.extend(rhs_tokens[1..].iter().cloned());
                previous_contribution = rhs_tokens.len();
                j += 1;
                continue;
            }

            if token.flags.contains(TokenFlags::STRINGIZE) {
                if let Some(TokenValue::Param(index)) =
                    replacement.get(j + 1).map(|next| next.value.clone())
                {
                    let argument = arg_slice(args, index, params);
                    let string = self.stringify(argument, token);
                    out.push(string);
                    previous_contribution = 1;
                    j += 2;
                    continue;
                }
            }

            if let TokenValue::Param(index) = token.value {
                let next_is_paste = replacement
                    .get(j + 1)
                    .is_some_and(|next| next.flags.contains(TokenFlags::PASTE));
                let substituted = if next_is_paste {
                    arg_slice(args, index, params).to_vec()
                } else {
                    self.expanded_argument(args, index, params, &mut expanded_cache)?
                };
                let start = out.len();
                out.extend(substituted);
                if let Some(first) = out.get_mut(start) {
                    first.leading_whitespace = token.leading_whitespace;
                }
                previous_contribution = out.len() - start;
                j += 1;
                continue;
            }

            out.push(token.clone());
            previous_contribution = 1;
            j += 1;
        }
        Ok(out)
    }

    /// An argument in non-operand position is expanded completely before
    /// substitution, once, and reused for every further occurrence.
    fn expanded_argument(
        &mut self,
        args: &[TokenSeq],
        index: u32,
        params: u32,
        cache: &mut [Option<TokenSeq>],
    ) -> Result<TokenSeq> {
        let slot = arg_index(index, params);
        if let Some(Some(cached)) = cache.get(slot) {
            return Ok(cached.clone());
        }
        let mut sequence = arg_slice(args, index, params).to_vec();
        self.expand_line(&mut sequence)?;
        if let Some(entry) = cache.get_mut(slot) {
            *entry = Some(sequence.clone());
        }
        Ok(sequence)
    }

    /// `a ## b`: textual concatenation re-tokenized. Anything but exactly
    /// one clean token is a macro error.
    fn paste(&mut self, lhs: &Token, rhs: &Token) -> Result<Token> {
        let text = format!(
            "{}{}",
            lhs.spelling(&self.strings),
            rhs.spelling(&self.strings)
        );
        if let Ok((mut token, consumed)) = tokenize(&mut self.strings, &text) {
            if consumed == text.len() && token.kind != TokenKind::End {
                token.leading_whitespace = lhs.leading_whitespace;
                token.origin = lhs.origin.clone();
                return Ok(token);
            }
        }
        let diagnostic = Diagnostic::error(
            DiagnosticKind::Macro,
            format!(
                "pasting '{}' and '{}' does not give a valid preprocessing token",
                lhs.spelling(&self.strings),
                rhs.spelling(&self.strings)
            ),
        )
        .with_location(lhs.origin.clone());
        Err(self.fatal(diagnostic))
    }

    /// `#param`: the raw argument tokens, spelled with single spaces where
    /// the originals were separated, as one string literal.
    fn stringify(&mut self, argument: &[Token], hash: &Token) -> Token {
        let content = spell_tokens(&self.strings, argument, true);
        let mut token = Token::new(TokenKind::String);
        token.value = TokenValue::Str(self.strings.intern(content));
        token.leading_whitespace = hash.leading_whitespace;
        token.origin = hash.origin.clone();
        token
    }
}

fn arg_index(index: u32, params: u32) -> usize {
    if index == VA_ARGS_INDEX {
        params as usize
    } else {
        index as usize
    }
}

fn arg_slice(args: &[TokenSeq], index: u32, params: u32) -> &[Token] {
    args.get(arg_index(index, params))
        .map(|argument| argument.as_slice())
        .unwrap_or(&[])
}

/// Collects the arguments of the invocation whose `(` sits at `open`.
/// Commas split arguments only at bracket depth zero; once the named
/// parameters are filled, a variadic macro keeps the rest (commas included)
/// as `__VA_ARGS__`.
fn collect_args(line: &TokenSeq, open: usize, def: &Macro) -> Collect {
    let MacroKind::FunctionLike { params, variadic } = def.kind else {
        return Collect::Incomplete;
    };
    let max_named = if variadic { params as usize } else { usize::MAX };

    let mut args: Vec<TokenSeq> = vec![TokenSeq::new()];
    let (mut paren, mut square, mut curly) = (1i32, 0i32, 0i32);
    let mut j = open + 1;
    loop {
        let Some(token) = line.get(j) else {
            return Collect::Incomplete;
        };
        match token.kind {
            TokenKind::Newline | TokenKind::End => return Collect::Incomplete,
            TokenKind::Punct(Punct::RightParen) => {
                paren -= 1;
                if paren == 0 {
                    break;
                }
                args.last_mut().expect("args starts non-empty").push(token.clone());
            }
            TokenKind::Punct(Punct::Comma)
                if paren == 1 && square <= 0 && curly <= 0 && args.len() <= max_named =>
            {
                args.push(TokenSeq::new());
            }
            _ => {
                match token.kind {
                    TokenKind::Punct(Punct::LeftParen) => paren += 1,
                    TokenKind::Punct(Punct::LeftBracket) => square += 1,
                    TokenKind::Punct(Punct::RightBracket) => square -= 1,
                    TokenKind::Punct(Punct::LeftBrace) => curly += 1,
                    TokenKind::Punct(Punct::RightBrace) => curly -= 1,
                    _ => (),
                }
                args.last_mut().expect("args starts non-empty").push(token.clone());
            }
        }
        j += 1;
    }

    // `M()` supplies zero arguments to a zero-parameter macro, not one
    // empty one.
    if params == 0 && !variadic && args.len() == 1 && args[0].is_empty() {
        args.clear();
    }
    Collect::Complete { args, end: j }
}

/// Paints every token of a finished substitution with the invoking token's
/// disable set plus the expanded macro's own name, and moves the tokens to
/// the invocation site.
fn mark_expansion(body: &mut [Token], invoker: &Token, name: StringId) {
    for token in body.iter_mut() {
        token.disable_expand.extend_from(&invoker.disable_expand);
        token.disable_expand.insert(name);
        token.origin = invoker.origin.clone();
    }
    if let Some(first) = body.first_mut() {
        first.leading_whitespace = invoker.leading_whitespace;
    }
}

/// Spells a token run the way it appeared in the source, with a single
/// space wherever the original tokens were separated. With `escape`, `\`
/// and `"` inside string and character tokens are escaped, as
/// stringification requires.
pub(crate) fn spell_tokens(strings: &StringTable, tokens: &[Token], escape: bool) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && token.leading_whitespace > 0 {
            out.push(' ');
        }
        let spelling = token.spelling(strings);
        if escape
            && matches!(
                token.kind,
                TokenKind::PrepString | TokenKind::PrepChar | TokenKind::String
            )
        {
            for c in spelling.chars() {
                if matches!(c, '"' | '\\') {
                    out.push('\\');
                }
                out.push(c);
            }
        } else {
            out.push_str(&spelling);
        }
    }
    out
}
