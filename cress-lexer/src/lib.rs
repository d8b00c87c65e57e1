//! Tokens and the line tokenizer for the cress preprocessor.

pub mod token;
pub mod token_stream;
pub mod tokenize;

pub use token::{Token, TokenKind, TokenSeq};
pub use tokenize::{tokenize, LexError};
