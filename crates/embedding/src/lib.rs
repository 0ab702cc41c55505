//! Embedding crate
//!
//! Token lookup for the word-level encoder. Tables are either learned inside
//! the shared parameter store or supplied as a frozen pretrained matrix.

pub mod token;

pub use token::*;
