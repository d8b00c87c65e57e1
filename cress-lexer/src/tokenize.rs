//! Turns one logical line into raw preprocessing tokens.
//!
//! [`tokenize`] hands back one token at a time together with the number of
//! bytes it consumed; the driver advances its own cursor with that. Reaching
//! the end of the line yields an `End` token, which the driver reinterprets
//! as end-of-line because logical lines never contain a newline themselves.

use cress_foundation::{
    errors::{Diagnostic, DiagnosticKind},
    intern::StringTable,
};

use crate::token::{Keyword, Punct, Token, TokenKind, TokenValue};

/// A diagnostic produced while recognizing a lexeme. The caller attaches the
/// source location; the tokenizer only sees a bare line.
#[derive(Debug)]
pub struct LexError(pub Diagnostic);

struct Cursor<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Cursor<'a> {
    fn current_char(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn nth_char(&self, n: usize) -> Option<char> {
        self.input[self.position..].chars().nth(n)
    }

    fn advance_char(&mut self) {
        if let Some(char) = self.current_char() {
            self.position += char.len_utf8();
        }
    }

    fn lexeme(&self, start: usize) -> &'a str {
        &self.input[start..self.position]
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Recognizes the next token of `input` and returns it along with the number
/// of bytes consumed, including leading whitespace.
pub fn tokenize(strings: &mut StringTable, input: &str) -> Result<(Token, usize), LexError> {
    let mut cursor = Cursor { input, position: 0 };

    let mut leading_whitespace = 0;
    while let Some(' ' | '\t') = cursor.current_char() {
        cursor.advance_char();
        leading_whitespace += 1;
    }

    let start = cursor.position;
    let mut token = match cursor.current_char() {
        None => Token::new(TokenKind::End),
        Some(c) if is_ident_start(c) => identifier_or_prefixed_literal(strings, &mut cursor)?,
        Some(c) if c.is_ascii_digit() => preprocessing_number(strings, &mut cursor),
        Some('.') if cursor.nth_char(1).is_some_and(|c| c.is_ascii_digit()) => {
            preprocessing_number(strings, &mut cursor)
        }
        Some('"') => quoted(strings, &mut cursor, start, '"', TokenKind::PrepString)?,
        Some('\'') => quoted(strings, &mut cursor, start, '\'', TokenKind::PrepChar)?,
        Some(c) => punctuator(&mut cursor, c)?,
    };

    token.leading_whitespace = leading_whitespace;
    Ok((token, cursor.position))
}

fn identifier_or_prefixed_literal(
    strings: &mut StringTable,
    cursor: &mut Cursor,
) -> Result<Token, LexError> {
    let start = cursor.position;
    while cursor.current_char().is_some_and(is_ident_continue) {
        cursor.advance_char();
    }
    let ident = cursor.lexeme(start);

    // An encoding prefix glued to a quote starts a literal, not an
    // identifier.
    if matches!(ident, "L" | "u" | "U" | "u8") {
        match cursor.current_char() {
            Some('"') => return quoted(strings, cursor, start, '"', TokenKind::PrepString),
            Some('\'') => return quoted(strings, cursor, start, '\'', TokenKind::PrepChar),
            _ => (),
        }
    }

    if let Some(keyword) = Keyword::from_ident(ident) {
        return Ok(Token::new(TokenKind::Keyword(keyword)));
    }
    Ok(Token::ident(strings.intern(ident)))
}

/// A preprocessing number: digit or `.`-digit, followed by identifier
/// characters, `.`, and exponent signs after `e`/`E`/`p`/`P`.
fn preprocessing_number(strings: &mut StringTable, cursor: &mut Cursor) -> Token {
    let start = cursor.position;
    while let Some(c) = cursor.current_char() {
        if !(is_ident_continue(c) || c == '.') {
            break;
        }
        cursor.advance_char();
        if matches!(c, 'e' | 'E' | 'p' | 'P') && matches!(cursor.current_char(), Some('+' | '-')) {
            cursor.advance_char();
        }
    }
    let mut token = Token::new(TokenKind::PrepNumber);
    token.value = TokenValue::Str(strings.intern(cursor.lexeme(start)));
    token
}

/// A string literal or character constant, kept with its quotes, encoding
/// prefix and escapes intact. `start` points at the prefix if there is one.
fn quoted(
    strings: &mut StringTable,
    cursor: &mut Cursor,
    start: usize,
    quote: char,
    kind: TokenKind,
) -> Result<Token, LexError> {
    cursor.advance_char();
    loop {
        match cursor.current_char() {
            None => {
                let what = if quote == '"' {
                    "string literal"
                } else {
                    "character constant"
                };
                return Err(LexError(Diagnostic::error(
                    DiagnosticKind::Lex,
                    format!("unterminated {what}"),
                )));
            }
            Some('\\') => {
                cursor.advance_char();
                cursor.advance_char();
            }
            Some(c) if c == quote => {
                cursor.advance_char();
                break;
            }
            Some(_) => cursor.advance_char(),
        }
    }
    let mut token = Token::new(kind);
    token.value = TokenValue::Str(strings.intern(cursor.lexeme(start)));
    Ok(token)
}

fn punctuator(cursor: &mut Cursor, first: char) -> Result<Token, LexError> {
    use Punct::*;

    cursor.advance_char();
    let punct = match first {
        '[' => LeftBracket,
        ']' => RightBracket,
        '(' => LeftParen,
        ')' => RightParen,
        '{' => LeftBrace,
        '}' => RightBrace,
        ',' => Comma,
        ';' => Semicolon,
        '?' => Question,
        ':' => Colon,
        '~' => Tilde,
        '.' => {
            if cursor.current_char() == Some('.') && cursor.nth_char(1) == Some('.') {
                cursor.advance_char();
                cursor.advance_char();
                Ellipsis
            } else {
                Dot
            }
        }
        '-' => match cursor.current_char() {
            Some('>') => advanced(cursor, Arrow),
            Some('-') => advanced(cursor, Dec),
            Some('=') => advanced(cursor, SubAssign),
            _ => Minus,
        },
        '+' => match cursor.current_char() {
            Some('+') => advanced(cursor, Inc),
            Some('=') => advanced(cursor, AddAssign),
            _ => Plus,
        },
        '&' => match cursor.current_char() {
            Some('&') => advanced(cursor, LogicalAnd),
            Some('=') => advanced(cursor, AndAssign),
            _ => Amp,
        },
        '|' => match cursor.current_char() {
            Some('|') => advanced(cursor, LogicalOr),
            Some('=') => advanced(cursor, OrAssign),
            _ => Pipe,
        },
        '<' => match cursor.current_char() {
            Some('<') => {
                cursor.advance_char();
                if cursor.current_char() == Some('=') {
                    advanced(cursor, ShlAssign)
                } else {
                    ShiftLeft
                }
            }
            Some('=') => advanced(cursor, LessEqual),
            _ => Less,
        },
        '>' => match cursor.current_char() {
            Some('>') => {
                cursor.advance_char();
                if cursor.current_char() == Some('=') {
                    advanced(cursor, ShrAssign)
                } else {
                    ShiftRight
                }
            }
            Some('=') => advanced(cursor, GreaterEqual),
            _ => Greater,
        },
        '=' => match cursor.current_char() {
            Some('=') => advanced(cursor, EqualEqual),
            _ => Assign,
        },
        '!' => match cursor.current_char() {
            Some('=') => advanced(cursor, NotEqual),
            _ => Not,
        },
        '*' => match cursor.current_char() {
            Some('=') => advanced(cursor, MulAssign),
            _ => Star,
        },
        '/' => match cursor.current_char() {
            Some('=') => advanced(cursor, DivAssign),
            _ => Slash,
        },
        '%' => match cursor.current_char() {
            Some('=') => advanced(cursor, ModAssign),
            _ => Percent,
        },
        '^' => match cursor.current_char() {
            Some('=') => advanced(cursor, XorAssign),
            _ => Caret,
        },
        '#' => match cursor.current_char() {
            Some('#') => advanced(cursor, HashHash),
            _ => Hash,
        },
        unknown => {
            return Err(LexError(Diagnostic::error(
                DiagnosticKind::Lex,
                format!("unrecognized character {unknown:?}"),
            )))
        }
    };
    Ok(Token::punct(punct))
}

fn advanced(cursor: &mut Cursor, punct: Punct) -> Punct {
    cursor.advance_char();
    punct
}
