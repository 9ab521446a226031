//! Compiler for the C0 language, targeting the [c0](../c0/index.html) stack
//! machine.
//!
//! The main entry point is [`compile`](fn.compile.html), which takes a source
//! text and produces a [`Program`](../c0/struct.Program.html): the constant
//! pool, the `.start` stream of global initializers, and one numbered
//! function per definition. The result can be serialized as a binary image
//! or an assembly listing by the [c0file](../c0file/index.html) crate.
//!
//! Compilation is a single pass. The [`Lexer`](struct.Lexer.html) turns the
//! source into tokens, and the [`Parser`](struct.Parser.html) walks them
//! once, emitting instructions as it recognizes each construct; there is no
//! syntax tree and no recovery, the first error aborts with a
//! [`CompileError`](struct.CompileError.html) carrying a zero-based
//! line/column position.
//!
//! # The C0 Language
//!
//! C0 is a small C-like language with `int`, `char` and `void`, global and
//! local variables, `const`, user functions and two builtin statements for
//! I/O. A program is a list of global declarations followed by a list of
//! function definitions:
//!
//! ```text
//! const int LIMIT = 10;
//! int count;
//!
//! int next(int n) {
//!     return n + 1;
//! }
//!
//! void main() {
//!     count = 0;
//!     while (count < LIMIT) {
//!         print("count is ", count);
//!         count = next(count);
//!     }
//! }
//! ```
//!
//! ## Types
//!
//! `int` and `char` are the two variable types; both occupy one 4-byte slot
//! and only differ in how `print` and `scan` treat them. `double` is a
//! reserved word but is rejected by this compiler, and `void` is only valid
//! as a return type. Casts between `int` and `char` are written C-style
//! (`(char)n`) and cost nothing at runtime.
//!
//! ## Statements
//!
//! | Statement | Form |
//! |-----------|------|
//! | declaration | `[const] type name [= expr] {, name [= expr]} ;` |
//! | assignment | `name = expr ;` |
//! | conditional | `if (cond) stmt [else stmt]` |
//! | loops | `while (cond) stmt` and `do stmt while (cond) ;` |
//! | jumps | `break ;`, `continue ;`, `return [expr] ;` |
//! | output | `print(expr-or-literal {, expr-or-literal}) ;` |
//! | input | `scan(name) ;` |
//!
//! A condition is either a comparison (`<`, `<=`, `>`, `>=`, `==`, `!=`) or
//! a bare expression, which counts as "not equal to zero". `print` accepts
//! expressions, character literals and string literals, and always ends the
//! line. Declarations come before statements in a block; a `const` must be
//! initialized, and reading a variable that was never assigned or scanned
//! is an error.
//!
//! ## Literals and comments
//!
//! Integers are decimal or hexadecimal (`0x2F`); char literals support the
//! escapes `\\`, `\'`, `\"`, `\n`, `\r`, `\t` and `\xHH`, and string
//! literals use the same set. Both `//` line comments and non-nested
//! `/* */` block comments are recognized.

mod error;
mod lexer;
mod parser;
mod token;

use std::io::prelude::*;

use c0::Program;

pub use crate::error::{CompileError, ErrorKind, Position};
pub use crate::lexer::Lexer;
pub use crate::parser::Parser;
pub use crate::token::{Keyword, Token, TokenKind, TokenValue};

pub type Result<T> = std::result::Result<T, CompileError>;

/// Compiles a source text into a program.
pub fn compile(input: &str) -> Result<Program> {
    let tokens = Lexer::new(input).all_tokens()?;
    Parser::new(tokens).parse()
}

/// Compiles everything a reader yields. Read failures surface as the
/// `StreamError` kind.
pub fn compile_reader<R: Read>(reader: &mut R) -> Result<Program> {
    let mut lexer = Lexer::from_reader(reader)?;
    let tokens = lexer.all_tokens()?;
    Parser::new(tokens).parse()
}
