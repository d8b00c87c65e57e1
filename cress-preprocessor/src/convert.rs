//! Conversion of preprocessing lexemes into typed literal tokens.
//!
//! Runs as the last step before a token enters the lookahead buffer (never
//! in `-E` mode, which keeps raw spellings). Each converter keeps the input
//! token's whitespace and origin so `-E`-adjacent behavior and diagnostics
//! stay anchored.

use cress_foundation::{
    errors::{Diagnostic, DiagnosticKind, DiagnosticSink},
    intern::StringTable,
    source::SourceLocation,
};
use cress_lexer::token::{FloatType, IntType, Token, TokenKind, TokenValue};

fn retyped(original: &Token, value: TokenValue) -> Token {
    let mut token = Token::new(TokenKind::Number);
    token.value = value;
    token.leading_whitespace = original.leading_whitespace;
    token.origin = original.origin.clone();
    token
}

fn error(message: String, location: &SourceLocation) -> Diagnostic {
    Diagnostic::error(DiagnosticKind::Lex, message).with_location(location.clone())
}

/// `PREP_NUMBER → NUMBER`: integer or floating literal with base and suffix
/// handling, promoted to the smallest fitting type.
pub fn convert_number(
    strings: &StringTable,
    token: &Token,
    diagnostics: &mut dyn DiagnosticSink,
) -> Result<Token, Diagnostic> {
    let id = token
        .string_value()
        .expect("preprocessing number carries its lexeme");
    let raw = strings.get(id);

    let hex = raw.starts_with("0x") || raw.starts_with("0X");
    let is_float = if hex {
        raw.contains(['.', 'p', 'P'])
    } else {
        raw.contains(['.', 'e', 'E'])
    };
    if is_float {
        convert_float(raw, &token.origin).map(|value| retyped(token, value))
    } else {
        convert_integer(raw, &token.origin, diagnostics).map(|value| retyped(token, value))
    }
}

fn convert_integer(
    raw: &str,
    origin: &SourceLocation,
    diagnostics: &mut dyn DiagnosticSink,
) -> Result<TokenValue, Diagnostic> {
    let (digits, base) = if let Some(rest) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        (rest, 16u64)
    } else if let Some(rest) = raw.strip_prefix("0b").or_else(|| raw.strip_prefix("0B")) {
        (rest, 2)
    } else if raw.len() > 1 && raw.starts_with('0') {
        (&raw[1..], 8)
    } else {
        (raw, 10)
    };

    let mut value: u64 = 0;
    let mut consumed = 0;
    for c in digits.chars() {
        let Some(digit) = c.to_digit(base as u32) else {
            break;
        };
        value = value
            .checked_mul(base)
            .and_then(|v| v.checked_add(u64::from(digit)))
            .ok_or_else(|| error(format!("integer constant '{raw}' is too large"), origin))?;
        consumed += 1;
    }
    // A lone `0` already carries the value in octal; the other prefixes
    // need at least one digit after them.
    if consumed == 0 && base != 8 {
        return Err(error(format!("invalid integer constant '{raw}'"), origin));
    }

    let suffix = digits[consumed..].to_ascii_lowercase();
    let (unsigned, longs) = match suffix.as_str() {
        "" => (false, 0),
        "u" => (true, 0),
        "l" => (false, 1),
        "ul" | "lu" => (true, 1),
        "ll" => (false, 2),
        "ull" | "llu" => (true, 2),
        _ => {
            return Err(error(
                format!("invalid suffix '{}' on integer constant", &digits[consumed..]),
                origin,
            ))
        }
    };

    // The C99 ladder: decimal constants without `u` stay signed; other bases
    // may fall over to the unsigned type of each rank.
    use IntType::*;
    let ladder: &[IntType] = match (base == 10, unsigned, longs) {
        (true, false, 0) => &[Int, Long, LongLong],
        (true, false, 1) => &[Long, LongLong],
        (true, false, 2) => &[LongLong],
        (_, true, 0) => &[UnsignedInt, UnsignedLong, UnsignedLongLong],
        (_, true, 1) => &[UnsignedLong, UnsignedLongLong],
        (_, true, 2) => &[UnsignedLongLong],
        (false, false, 0) => &[Int, UnsignedInt, Long, UnsignedLong, LongLong, UnsignedLongLong],
        (false, false, 1) => &[Long, UnsignedLong, LongLong, UnsignedLongLong],
        (false, false, _) => &[LongLong, UnsignedLongLong],
        _ => unreachable!("longs is always 0, 1, or 2"),
    };

    let ty = ladder
        .iter()
        .copied()
        .find(|ty| value <= ty.max_value())
        .unwrap_or_else(|| {
            diagnostics.emit(
                Diagnostic::warning(
                    DiagnosticKind::Lex,
                    format!("integer constant '{raw}' is so large that it is unsigned"),
                )
                .with_location(origin.clone()),
            );
            IntType::UnsignedLongLong
        });
    Ok(TokenValue::Int { value, ty })
}

fn convert_float(raw: &str, origin: &SourceLocation) -> Result<TokenValue, Diagnostic> {
    let (body, ty) = match raw.as_bytes().last() {
        Some(b'f' | b'F') => (&raw[..raw.len() - 1], FloatType::Float),
        Some(b'l' | b'L') => (&raw[..raw.len() - 1], FloatType::LongDouble),
        _ => (raw, FloatType::Double),
    };

    let value = if body.starts_with("0x") || body.starts_with("0X") {
        parse_hex_float(&body[2..])
            .ok_or_else(|| error(format!("invalid hexadecimal floating constant '{raw}'"), origin))?
    } else {
        body.parse::<f64>()
            .map_err(|_| error(format!("invalid floating constant '{raw}'"), origin))?
    };

    let value = match ty {
        FloatType::Float => value as f32 as f64,
        _ => value,
    };
    Ok(TokenValue::Float { value, ty })
}

/// `h.hhh[pP][+-]ddd` with the `0x` prefix already removed. Hexadecimal
/// floats require the binary exponent.
fn parse_hex_float(body: &str) -> Option<f64> {
    let (mantissa_text, exponent_text) = body.split_once(['p', 'P'])?;
    let exponent: i32 = exponent_text.parse().ok()?;

    let (int_text, frac_text) = match mantissa_text.split_once('.') {
        Some((int, frac)) => (int, frac),
        None => (mantissa_text, ""),
    };
    if int_text.is_empty() && frac_text.is_empty() {
        return None;
    }

    let mut mantissa: u128 = 0;
    let mut scale: i32 = 0;
    for c in int_text.chars() {
        let digit = c.to_digit(16)?;
        if mantissa >> 120 != 0 {
            // Out of headroom; account for the digit in the exponent.
            scale += 4;
            continue;
        }
        mantissa = (mantissa << 4) | u128::from(digit);
    }
    for c in frac_text.chars() {
        let digit = c.to_digit(16)?;
        if mantissa >> 120 != 0 {
            break;
        }
        mantissa = (mantissa << 4) | u128::from(digit);
        scale -= 4;
    }

    Some(mantissa as f64 * 2f64.powi(exponent + scale))
}

/// `PREP_CHAR → NUMBER`: decodes escapes and folds the bytes into the
/// integer value of the constant. Multi-character constants concatenate.
pub fn convert_char(strings: &StringTable, token: &Token) -> Result<Token, Diagnostic> {
    let id = token
        .string_value()
        .expect("character constant carries its lexeme");
    let raw = strings.get(id);
    let inner = quoted_content(raw, '\'')
        .ok_or_else(|| error(format!("invalid character constant {raw}"), &token.origin))?;
    if inner.is_empty() {
        return Err(error("empty character constant".into(), &token.origin));
    }

    let bytes = decode_escapes(inner, &token.origin)?;
    let mut value: u64 = 0;
    for byte in bytes {
        value = value.wrapping_shl(8) | u64::from(byte);
    }
    Ok(retyped(
        token,
        TokenValue::Int {
            value,
            ty: IntType::Int,
        },
    ))
}

/// `PREP_STRING → STRING`: decodes escapes and records the byte sequence as
/// the token's content.
pub fn convert_string(strings: &mut StringTable, token: &Token) -> Result<Token, Diagnostic> {
    let id = token
        .string_value()
        .expect("string literal carries its lexeme");
    let raw = strings.get(id).to_owned();
    let inner = quoted_content(&raw, '"')
        .ok_or_else(|| error(format!("invalid string literal {raw}"), &token.origin))?;
    let bytes = decode_escapes(inner, &token.origin)?;

    let mut converted = Token::new(TokenKind::String);
    converted.value = TokenValue::Str(strings.intern(String::from_utf8_lossy(&bytes)));
    converted.leading_whitespace = token.leading_whitespace;
    converted.origin = token.origin.clone();
    Ok(converted)
}

/// Strips an optional encoding prefix and the surrounding quotes.
fn quoted_content(raw: &str, quote: char) -> Option<&str> {
    let start = raw.find(quote)?;
    let body = &raw[start + quote.len_utf8()..];
    body.strip_suffix(quote)
}

fn decode_escapes(inner: &str, origin: &SourceLocation) -> Result<Vec<u8>, Diagnostic> {
    let mut bytes = vec![];
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buffer = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buffer).as_bytes());
            continue;
        }
        let Some(escape) = chars.next() else {
            return Err(error("stray backslash in literal".into(), origin));
        };
        let byte = match escape {
            'n' => b'\n',
            't' => b'\t',
            'v' => 0x0b,
            'b' => 0x08,
            'r' => b'\r',
            'f' => 0x0c,
            'a' => 0x07,
            '\\' => b'\\',
            '\'' => b'\'',
            '"' => b'"',
            '?' => b'?',
            '0'..='7' => {
                let mut value = escape.to_digit(8).expect("octal digit checked by pattern");
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            chars.next();
                            value = value * 8 + digit;
                        }
                        None => break,
                    }
                }
                (value & 0xff) as u8
            }
            'x' => {
                let mut value: u32 = 0;
                let mut any = false;
                while let Some(digit) = chars.peek().and_then(|c| c.to_digit(16)) {
                    chars.next();
                    value = (value << 4) | digit;
                    any = true;
                }
                if !any {
                    return Err(error("'\\x' used with no following hex digits".into(), origin));
                }
                (value & 0xff) as u8
            }
            other => {
                return Err(error(format!("unknown escape sequence '\\{other}'"), origin));
            }
        };
        bytes.push(byte);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use cress_foundation::{errors::Diagnostic, intern::StringTable};
    use cress_lexer::token::{FloatType, IntType, Token, TokenKind, TokenValue};

    use super::{convert_char, convert_number, convert_string};

    fn lexeme(strings: &mut StringTable, kind: TokenKind, raw: &str) -> Token {
        let mut token = Token::new(kind);
        token.value = TokenValue::Str(strings.intern(raw));
        token
    }

    fn int_value(raw: &str) -> (u64, IntType) {
        let mut strings = StringTable::new();
        let token = lexeme(&mut strings, TokenKind::PrepNumber, raw);
        let mut diagnostics: Vec<Diagnostic> = vec![];
        let converted = convert_number(&strings, &token, &mut diagnostics).unwrap();
        match converted.value {
            TokenValue::Int { value, ty } => (value, ty),
            other => panic!("expected an integer, got {other:?}"),
        }
    }

    fn float_value(raw: &str) -> (f64, FloatType) {
        let mut strings = StringTable::new();
        let token = lexeme(&mut strings, TokenKind::PrepNumber, raw);
        let mut diagnostics: Vec<Diagnostic> = vec![];
        let converted = convert_number(&strings, &token, &mut diagnostics).unwrap();
        match converted.value {
            TokenValue::Float { value, ty } => (value, ty),
            other => panic!("expected a float, got {other:?}"),
        }
    }

    #[test]
    fn decimal_integers_promote_through_the_signed_ladder() {
        assert_eq!(int_value("42"), (42, IntType::Int));
        assert_eq!(int_value("2147483647"), (2147483647, IntType::Int));
        // One past INT_MAX: decimal constants skip unsigned int.
        assert_eq!(int_value("2147483648"), (2147483648, IntType::Long));
    }

    #[test]
    fn hex_and_octal_constants_may_go_unsigned() {
        assert_eq!(int_value("0xffffffff"), (0xffff_ffff, IntType::UnsignedInt));
        assert_eq!(int_value("0777"), (0o777, IntType::Int));
        assert_eq!(int_value("0b1011"), (11, IntType::Int));
        assert_eq!(
            int_value("0xffffffffffffffff"),
            (u64::MAX, IntType::UnsignedLongLong)
        );
    }

    #[test]
    fn suffixes_choose_the_starting_rung() {
        assert_eq!(int_value("1u"), (1, IntType::UnsignedInt));
        assert_eq!(int_value("1l"), (1, IntType::Long));
        assert_eq!(int_value("1UL"), (1, IntType::UnsignedLong));
        assert_eq!(int_value("1ll"), (1, IntType::LongLong));
        assert_eq!(int_value("1llu"), (1, IntType::UnsignedLongLong));
        // A bare zero reads as octal; its suffix must still apply.
        assert_eq!(int_value("0L"), (0, IntType::Long));
    }

    #[test]
    fn bad_integers_are_diagnosed() {
        let mut strings = StringTable::new();
        let mut diagnostics: Vec<Diagnostic> = vec![];
        for raw in ["123abc", "0x", "0xfffffffffffffffff", "1uu"] {
            let token = lexeme(&mut strings, TokenKind::PrepNumber, raw);
            assert!(
                convert_number(&strings, &token, &mut diagnostics).is_err(),
                "{raw} should not convert"
            );
        }
    }

    #[test]
    fn floats_carry_their_suffix_type() {
        assert_eq!(float_value("1.5"), (1.5, FloatType::Double));
        assert_eq!(float_value("1.5f"), (1.5, FloatType::Float));
        assert_eq!(float_value("2.5e2L"), (250.0, FloatType::LongDouble));
        assert_eq!(float_value(".5"), (0.5, FloatType::Double));
        assert_eq!(float_value("1e3"), (1000.0, FloatType::Double));
    }

    #[test]
    fn hex_floats_scale_by_powers_of_two() {
        assert_eq!(float_value("0x1.8p1"), (3.0, FloatType::Double));
        assert_eq!(float_value("0x1p-2"), (0.25, FloatType::Double));
        assert_eq!(float_value("0x.8p0"), (0.5, FloatType::Double));
    }

    #[test]
    fn hex_float_without_exponent_is_rejected() {
        let mut strings = StringTable::new();
        let mut diagnostics: Vec<Diagnostic> = vec![];
        let token = lexeme(&mut strings, TokenKind::PrepNumber, "0x1.8");
        assert!(convert_number(&strings, &token, &mut diagnostics).is_err());
    }

    #[test]
    fn character_constants_decode_and_concatenate() {
        let mut strings = StringTable::new();
        let cases = [
            ("'a'", 'a' as u64),
            (r"'\n'", 10),
            (r"'\x41'", 65),
            (r"'\0'", 0),
            (r"'\''", 39),
            ("'ab'", (('a' as u64) << 8) | 'b' as u64),
            ("L'a'", 'a' as u64),
        ];
        for (raw, expected) in cases {
            let token = lexeme(&mut strings, TokenKind::PrepChar, raw);
            let converted = convert_char(&strings, &token).unwrap();
            assert_eq!(
                converted.value,
                TokenValue::Int {
                    value: expected,
                    ty: IntType::Int
                },
                "{raw}"
            );
        }
    }

    #[test]
    fn empty_and_malformed_char_constants_are_rejected() {
        let mut strings = StringTable::new();
        for raw in ["''", r"'\q'"] {
            let token = lexeme(&mut strings, TokenKind::PrepChar, raw);
            assert!(convert_char(&strings, &token).is_err(), "{raw}");
        }
    }

    #[test]
    fn strings_decode_escapes_into_content() {
        let mut strings = StringTable::new();
        let token = lexeme(&mut strings, TokenKind::PrepString, r#""a\nb\"c""#);
        let converted = convert_string(&mut strings, &token).unwrap();
        assert_eq!(converted.kind, TokenKind::String);
        let id = converted.string_value().unwrap();
        assert_eq!(strings.get(id), "a\nb\"c");
    }

    #[test]
    fn string_prefixes_are_stripped_from_content() {
        let mut strings = StringTable::new();
        for raw in [r#"L"wide""#, r#"u8"narrow""#] {
            let token = lexeme(&mut strings, TokenKind::PrepString, raw);
            let converted = convert_string(&mut strings, &token).unwrap();
            let id = converted.string_value().unwrap();
            assert!(strings.get(id) == "wide" || strings.get(id) == "narrow");
        }
    }
}
