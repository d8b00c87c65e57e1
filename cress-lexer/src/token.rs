use std::fmt;

use bitflags::bitflags;
use cress_foundation::{
    intern::{StringId, StringTable},
    source::SourceLocation,
};

/// Declares an enum whose variants each carry a fixed spelling, and a
/// `spelling()` accessor for it.
macro_rules! spelled_enum {
    ($name:ident { $($variant:ident = $spelling:tt,)* }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),*
        }

        impl $name {
            pub const fn spelling(self) -> &'static str {
                match self {
                    $(Self::$variant => $spelling),*
                }
            }
        }
    };
}

spelled_enum!(Punct {
    LeftBracket = "[",
    RightBracket = "]",
    LeftParen = "(",
    RightParen = ")",
    LeftBrace = "{",
    RightBrace = "}",
    Dot = ".",
    Arrow = "->",
    Inc = "++",
    Dec = "--",
    Amp = "&",
    Star = "*",
    Plus = "+",
    Minus = "-",
    Tilde = "~",
    Not = "!",
    Slash = "/",
    Percent = "%",
    ShiftLeft = "<<",
    ShiftRight = ">>",
    Less = "<",
    Greater = ">",
    LessEqual = "<=",
    GreaterEqual = ">=",
    EqualEqual = "==",
    NotEqual = "!=",
    Caret = "^",
    Pipe = "|",
    LogicalAnd = "&&",
    LogicalOr = "||",
    Question = "?",
    Colon = ":",
    Semicolon = ";",
    Ellipsis = "...",
    Assign = "=",
    MulAssign = "*=",
    DivAssign = "/=",
    ModAssign = "%=",
    AddAssign = "+=",
    SubAssign = "-=",
    ShlAssign = "<<=",
    ShrAssign = ">>=",
    AndAssign = "&=",
    XorAssign = "^=",
    OrAssign = "|=",
    Comma = ",",
    Hash = "#",
    HashHash = "##",
});

spelled_enum!(Keyword {
    Auto = "auto",
    Break = "break",
    Case = "case",
    Char = "char",
    Const = "const",
    Continue = "continue",
    Default = "default",
    Do = "do",
    Double = "double",
    Else = "else",
    Enum = "enum",
    Extern = "extern",
    Float = "float",
    For = "for",
    Goto = "goto",
    If = "if",
    Inline = "inline",
    Int = "int",
    Long = "long",
    Register = "register",
    Restrict = "restrict",
    Return = "return",
    Short = "short",
    Signed = "signed",
    Sizeof = "sizeof",
    Static = "static",
    Struct = "struct",
    Switch = "switch",
    Typedef = "typedef",
    Union = "union",
    Unsigned = "unsigned",
    Void = "void",
    Volatile = "volatile",
    While = "while",
    Alignas = "_Alignas",
    Alignof = "_Alignof",
    Bool = "_Bool",
    Noreturn = "_Noreturn",
    StaticAssert = "_Static_assert",
});

impl Keyword {
    /// The fixed table probed after the tokenizer has recognized an
    /// identifier.
    pub fn from_ident(ident: &str) -> Option<Keyword> {
        const TABLE: &[Keyword] = &[
            Keyword::Auto,
            Keyword::Break,
            Keyword::Case,
            Keyword::Char,
            Keyword::Const,
            Keyword::Continue,
            Keyword::Default,
            Keyword::Do,
            Keyword::Double,
            Keyword::Else,
            Keyword::Enum,
            Keyword::Extern,
            Keyword::Float,
            Keyword::For,
            Keyword::Goto,
            Keyword::If,
            Keyword::Inline,
            Keyword::Int,
            Keyword::Long,
            Keyword::Register,
            Keyword::Restrict,
            Keyword::Return,
            Keyword::Short,
            Keyword::Signed,
            Keyword::Sizeof,
            Keyword::Static,
            Keyword::Struct,
            Keyword::Switch,
            Keyword::Typedef,
            Keyword::Union,
            Keyword::Unsigned,
            Keyword::Void,
            Keyword::Volatile,
            Keyword::While,
            Keyword::Alignas,
            Keyword::Alignof,
            Keyword::Bool,
            Keyword::Noreturn,
            Keyword::StaticAssert,
        ];
        TABLE
            .iter()
            .find(|keyword| keyword.spelling() == ident)
            .copied()
    }
}

/// Integer types a converted number literal can take, smallest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IntType {
    Int,
    UnsignedInt,
    Long,
    UnsignedLong,
    LongLong,
    UnsignedLongLong,
}

impl IntType {
    pub const fn is_unsigned(self) -> bool {
        matches!(
            self,
            IntType::UnsignedInt | IntType::UnsignedLong | IntType::UnsignedLongLong
        )
    }

    /// Suffix used by the canonical typed printing of the literal.
    pub const fn suffix(self) -> &'static str {
        match self {
            IntType::Int => "",
            IntType::UnsignedInt => "u",
            IntType::Long => "l",
            IntType::UnsignedLong => "ul",
            IntType::LongLong => "ll",
            IntType::UnsignedLongLong => "ull",
        }
    }

    /// The largest value the type can represent, as an unsigned quantity.
    pub const fn max_value(self) -> u64 {
        match self {
            IntType::Int => i32::MAX as u64,
            IntType::UnsignedInt => u32::MAX as u64,
            IntType::Long | IntType::LongLong => i64::MAX as u64,
            IntType::UnsignedLong | IntType::UnsignedLongLong => u64::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatType {
    Float,
    Double,
    LongDouble,
}

impl FloatType {
    pub const fn suffix(self) -> &'static str {
        match self {
            FloatType::Float => "f",
            FloatType::Double => "",
            FloatType::LongDouble => "L",
        }
    }
}

bitflags! {
    /// Classification flags attached to a token.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TokenFlags: u8 {
        /// The token is an identifier that could name a macro.
        const EXPANDABLE = 0x1;
        /// A `#` inside a function-like replacement list that stringifies
        /// the parameter following it.
        const STRINGIZE  = 0x2;
        /// A `##` inside a replacement list that pastes its neighbours.
        const PASTE      = 0x4;
    }
}

/// Parameter index stored in a `Param` token that refers to `__VA_ARGS__`
/// rather than a named parameter.
pub const VA_ARGS_INDEX: u32 = u32::MAX;

/// The set of macro names a token must no longer be expanded by.
///
/// Carried on the token value itself and copied on every substitution, so
/// that suppression survives arbitrarily deep rescans. Almost always empty
/// or a single entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisableExpand(Vec<StringId>);

impl DisableExpand {
    pub fn contains(&self, name: StringId) -> bool {
        self.0.contains(&name)
    }

    pub fn insert(&mut self, name: StringId) {
        if !self.0.contains(&name) {
            self.0.push(name);
        }
    }

    pub fn extend_from(&mut self, other: &DisableExpand) {
        for &name in &other.0 {
            self.insert(name);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Punct(Punct),
    Keyword(Keyword),
    Ident,
    /// A converted, typed numeric literal.
    Number,
    /// A converted string literal; the payload holds its content.
    String,
    /// A numeric lexeme that has not been converted yet.
    PrepNumber,
    /// A string lexeme, quotes and escapes intact.
    PrepString,
    /// A character-constant lexeme, quotes and escapes intact.
    PrepChar,
    Newline,
    End,
    /// Reference to the n-th macro parameter inside a replacement list.
    Param,
}

impl TokenKind {
    /// Human-readable name used in diagnostics.
    pub fn name(self) -> String {
        match self {
            TokenKind::Punct(punct) => format!("'{}'", punct.spelling()),
            TokenKind::Keyword(keyword) => format!("'{}'", keyword.spelling()),
            TokenKind::Ident => "identifier".into(),
            TokenKind::Number | TokenKind::PrepNumber => "number".into(),
            TokenKind::String | TokenKind::PrepString => "string".into(),
            TokenKind::PrepChar => "character constant".into(),
            TokenKind::Newline => "end of line".into(),
            TokenKind::End => "end of input".into(),
            TokenKind::Param => "macro parameter".into(),
        }
    }
}

/// Payload carried by a token, when its kind calls for one.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    None,
    /// Identifier spelling, raw lexeme, or string content.
    Str(StringId),
    Int {
        value: u64,
        ty: IntType,
    },
    Float {
        value: f64,
        ty: FloatType,
    },
    /// Parameter index; [`VA_ARGS_INDEX`] denotes `__VA_ARGS__`.
    Param(u32),
}

/// A single preprocessing token. Value-typed and copied freely.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: TokenValue,
    /// Number of whitespace characters preceding the token on its line.
    pub leading_whitespace: u32,
    pub flags: TokenFlags,
    pub disable_expand: DisableExpand,
    pub origin: SourceLocation,
}

/// The working line under expansion: an ordered, random-access token
/// sequence.
pub type TokenSeq = Vec<Token>;

impl Token {
    pub fn new(kind: TokenKind) -> Self {
        Self {
            kind,
            value: TokenValue::None,
            leading_whitespace: 0,
            flags: TokenFlags::empty(),
            disable_expand: DisableExpand::default(),
            origin: SourceLocation::unknown(),
        }
    }

    pub fn punct(punct: Punct) -> Self {
        Self::new(TokenKind::Punct(punct))
    }

    pub fn ident(id: StringId) -> Self {
        let mut token = Self::new(TokenKind::Ident);
        token.value = TokenValue::Str(id);
        token.flags = TokenFlags::EXPANDABLE;
        token
    }

    pub fn param(index: u32) -> Self {
        let mut token = Self::new(TokenKind::Param);
        token.value = TokenValue::Param(index);
        token
    }

    pub fn is_punct(&self, punct: Punct) -> bool {
        self.kind == TokenKind::Punct(punct)
    }

    /// The interned identifier this token names, if it is an identifier.
    pub fn ident_id(&self) -> Option<StringId> {
        match (self.kind, &self.value) {
            (TokenKind::Ident, TokenValue::Str(id)) => Some(*id),
            _ => None,
        }
    }

    /// The interned payload, whatever the kind.
    pub fn string_value(&self) -> Option<StringId> {
        match &self.value {
            TokenValue::Str(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_expandable(&self) -> bool {
        self.flags.contains(TokenFlags::EXPANDABLE)
    }

    /// Textual form of the token as it appears in `-E` output.
    pub fn spelling(&self, strings: &StringTable) -> String {
        match (&self.kind, &self.value) {
            (TokenKind::Punct(punct), _) => punct.spelling().into(),
            (TokenKind::Keyword(keyword), _) => keyword.spelling().into(),
            (TokenKind::String, TokenValue::Str(id)) => format!("\"{}\"", strings.get(*id)),
            (TokenKind::Newline, _) => "\n".into(),
            (_, TokenValue::Str(id)) => strings.get(*id).into(),
            (_, TokenValue::Int { value, ty }) => {
                if ty.is_unsigned() {
                    format!("{}{}", value, ty.suffix())
                } else {
                    format!("{}{}", *value as i64, ty.suffix())
                }
            }
            (_, TokenValue::Float { value, ty }) => format!("{:?}{}", value, ty.suffix()),
            _ => String::new(),
        }
    }
}

impl fmt::Display for Punct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spelling())
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spelling())
    }
}
