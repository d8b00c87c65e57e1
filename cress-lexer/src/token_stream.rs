use cress_foundation::errors::Result;

use crate::token::{Token, TokenKind};

/// The contract between the preprocessor and the parser.
///
/// Every token handed out satisfies the parser contract: never `Newline`,
/// `PrepNumber`, `PrepString` or `PrepChar`. A fatal diagnostic surfaces as
/// `Err(Fatal)` rather than terminating the process.
pub trait TokenStream {
    /// Removes and returns the next token.
    fn next(&mut self) -> Result<Token>;

    /// Returns the `n`-th buffered token (1-based) without removing it.
    fn peek_n(&mut self, n: usize) -> Result<Token>;

    fn peek(&mut self) -> Result<Token> {
        self.peek_n(1)
    }

    /// [`next`][Self::next], but a kind mismatch is a fatal diagnostic.
    fn consume(&mut self, kind: TokenKind) -> Result<Token>;
}

impl<T> TokenStream for &mut T
where
    T: TokenStream,
{
    fn next(&mut self) -> Result<Token> {
        <T as TokenStream>::next(self)
    }

    fn peek_n(&mut self, n: usize) -> Result<Token> {
        <T as TokenStream>::peek_n(self, n)
    }

    fn consume(&mut self, kind: TokenKind) -> Result<Token> {
        <T as TokenStream>::consume(self, kind)
    }
}
