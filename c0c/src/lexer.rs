//! The hand-written scanner.
//!
//! The whole input is materialized into a vector of lines up front, each
//! line kept with its terminating `\n` (one is appended to an unterminated
//! final line). After that the scanner is a cursor walking bytes, with
//! single-byte `rollback` as the only way to undo a read: every literal is
//! accumulated until the first byte that cannot extend it, which is then
//! pushed back.

use std::io::prelude::*;

use crate::error::{CompileError, ErrorKind, Position};
use crate::token::{Keyword, Token, TokenKind, TokenValue};

pub struct Lexer {
    lines: Vec<Vec<u8>>,
    cursor: Position,
}

type Result<T> = std::result::Result<T, CompileError>;

fn is_hex_digit(byte: u8) -> bool {
    byte.is_ascii_hexdigit()
}

fn hex_value(byte: u8) -> u8 {
    (byte as char).to_digit(16).unwrap() as u8
}

impl Lexer {
    pub fn new(input: &str) -> Lexer {
        let mut lines = Vec::new();
        for line in input.lines() {
            let mut bytes = line.as_bytes().to_vec();
            bytes.push(b'\n');
            lines.push(bytes);
        }
        Lexer {
            lines,
            cursor: Position::new(0, 0),
        }
    }

    /// Reads a whole stream; a failing read is a `StreamError`.
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Lexer> {
        let mut input = String::new();
        reader
            .read_to_string(&mut input)
            .map_err(|_| CompileError::new(Position::new(0, 0), ErrorKind::StreamError))?;
        Ok(Lexer::new(&input))
    }

    /// The token sequence up to end of input, or the first error.
    pub fn all_tokens(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            match self.next_token() {
                Ok(token) => tokens.push(token),
                Err(err) if err.kind == ErrorKind::Eof => return Ok(tokens),
                Err(err) => return Err(err),
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token> {
        loop {
            let start = self.cursor;
            let byte = match self.next_char() {
                Some(byte) => byte,
                None => return Err(CompileError::new(self.cursor, ErrorKind::Eof)),
            };
            let token = match byte {
                b' ' | b'\t' | b'\r' | b'\n' => continue,
                b'0'..=b'9' => self.scan_number(byte, start)?,
                b'a'..=b'z' | b'A'..=b'Z' => self.scan_identifier(byte, start)?,
                b'\'' => self.scan_char_literal(start)?,
                b'"' => self.scan_string_literal(start)?,
                b'/' => match self.scan_comment_or_divide(start)? {
                    Some(token) => token,
                    None => continue,
                },
                b'<' => self.extend_with_equal(byte, start, TokenKind::Less, TokenKind::LessEqual),
                b'>' => {
                    self.extend_with_equal(byte, start, TokenKind::Greater, TokenKind::GreaterEqual)
                }
                b'=' => self.extend_with_equal(byte, start, TokenKind::Assign, TokenKind::Equal),
                b'!' => match self.peek() {
                    Some(b'=') => {
                        self.next_char();
                        Token::new(
                            TokenKind::NotEqual,
                            TokenValue::Str("!=".to_owned()),
                            start,
                            self.cursor,
                        )
                    }
                    _ => return Err(CompileError::new(start, ErrorKind::InvalidNotEqual)),
                },
                b'+' => self.punctuation(TokenKind::Plus, byte, start),
                b'-' => self.punctuation(TokenKind::Minus, byte, start),
                b'*' => self.punctuation(TokenKind::Multiply, byte, start),
                b'(' => self.punctuation(TokenKind::LeftParen, byte, start),
                b')' => self.punctuation(TokenKind::RightParen, byte, start),
                b'{' => self.punctuation(TokenKind::LeftBrace, byte, start),
                b'}' => self.punctuation(TokenKind::RightBrace, byte, start),
                b';' => self.punctuation(TokenKind::Semicolon, byte, start),
                b':' => self.punctuation(TokenKind::Colon, byte, start),
                b',' => self.punctuation(TokenKind::Comma, byte, start),
                _ => return Err(CompileError::new(start, ErrorKind::InvalidInput)),
            };
            return Ok(token);
        }
    }

    // character primitives

    fn is_eof(&self) -> bool {
        self.cursor.line as usize >= self.lines.len()
    }

    /// Returns the byte under the cursor and moves the cursor just past it;
    /// consuming the `\n` of a line moves to the start of the next one.
    fn next_char(&mut self) -> Option<u8> {
        if self.is_eof() {
            return None;
        }
        let line = &self.lines[self.cursor.line as usize];
        let byte = line[self.cursor.column as usize];
        if self.cursor.column as usize + 1 == line.len() {
            self.cursor = Position::new(self.cursor.line + 1, 0);
        } else {
            self.cursor.column += 1;
        }
        Some(byte)
    }

    fn peek(&self) -> Option<u8> {
        if self.is_eof() {
            None
        } else {
            Some(self.lines[self.cursor.line as usize][self.cursor.column as usize])
        }
    }

    /// Moves the cursor one byte back. Rolling back past the start of the
    /// input is a programmer error.
    fn rollback(&mut self) {
        if self.cursor == Position::new(0, 0) {
            panic!("rollback at the start of the input");
        }
        if self.cursor.column == 0 {
            let line = self.cursor.line - 1;
            let column = self.lines[line as usize].len() - 1;
            self.cursor = Position::new(line, column as u32);
        } else {
            self.cursor.column -= 1;
        }
    }

    // token scanners

    fn punctuation(&self, kind: TokenKind, byte: u8, start: Position) -> Token {
        Token::new(kind, TokenValue::Int(i32::from(byte)), start, self.cursor)
    }

    /// `<`, `>` and `=` may extend by one `=`.
    fn extend_with_equal(
        &mut self,
        byte: u8,
        start: Position,
        single: TokenKind,
        extended: TokenKind,
    ) -> Token {
        if self.peek() == Some(b'=') {
            self.next_char();
            let mut text = String::new();
            text.push(byte as char);
            text.push('=');
            Token::new(extended, TokenValue::Str(text), start, self.cursor)
        } else {
            self.punctuation(single, byte, start)
        }
    }

    fn scan_number(&mut self, first: u8, start: Position) -> Result<Token> {
        let mut text = String::new();
        text.push(first as char);
        loop {
            match self.next_char() {
                Some(byte @ b'0'..=b'9') => text.push(byte as char),
                Some(byte @ b'x') | Some(byte @ b'X') => {
                    text.push(byte as char);
                    return self.scan_hex(text, start);
                }
                Some(b'.') => {
                    text.push('.');
                    return self.scan_double(text, start, false);
                }
                Some(byte @ b'e') | Some(byte @ b'E') => {
                    text.push(byte as char);
                    return self.scan_double(text, start, true);
                }
                Some(_) => {
                    self.rollback();
                    break;
                }
                None => break,
            }
        }
        match text.parse::<i32>() {
            Ok(value) => Ok(Token::new(
                TokenKind::Integer,
                TokenValue::Int(value),
                start,
                self.cursor,
            )),
            // the run is all digits, so the only way to fail is overflow
            Err(_) => Err(CompileError::new(start, ErrorKind::IntegerOverflow)),
        }
    }

    /// `(0x|0X)<hex-digit>+`, entered after the `x`.
    fn scan_hex(&mut self, mut text: String, start: Position) -> Result<Token> {
        loop {
            match self.next_char() {
                Some(byte) if is_hex_digit(byte) => text.push(byte as char),
                Some(byte) if byte.is_ascii_alphabetic() => {
                    return Err(CompileError::new(start, ErrorKind::InvalidInteger));
                }
                Some(_) => {
                    self.rollback();
                    break;
                }
                None => break,
            }
        }
        let digits = &text[2..];
        if !(text.starts_with("0x") || text.starts_with("0X")) || digits.is_empty() {
            return Err(CompileError::new(start, ErrorKind::InvalidInteger));
        }
        match i32::from_str_radix(digits, 16) {
            Ok(value) => Ok(Token::new(
                TokenKind::Integer,
                TokenValue::Int(value),
                start,
                self.cursor,
            )),
            Err(_) => Err(CompileError::new(start, ErrorKind::InvalidInteger)),
        }
    }

    /// Entered from the integer run on `.` or an exponent marker. At most
    /// one decimal point, at most one exponent, a sign only directly after
    /// `e`/`E`.
    fn scan_double(&mut self, mut text: String, start: Position, entered_exp: bool) -> Result<Token> {
        let mut has_exponent = entered_exp;
        let mut sign_allowed = entered_exp;
        loop {
            match self.next_char() {
                Some(byte @ b'0'..=b'9') => {
                    text.push(byte as char);
                    sign_allowed = false;
                }
                Some(b'.') => return Err(CompileError::new(start, ErrorKind::InvalidDouble)),
                Some(byte @ b'e') | Some(byte @ b'E') => {
                    if has_exponent {
                        return Err(CompileError::new(start, ErrorKind::InvalidDouble));
                    }
                    text.push(byte as char);
                    has_exponent = true;
                    sign_allowed = true;
                }
                Some(byte @ b'+') | Some(byte @ b'-') if sign_allowed => {
                    text.push(byte as char);
                    sign_allowed = false;
                }
                Some(_) => {
                    self.rollback();
                    break;
                }
                None => break,
            }
        }
        match text.parse::<f64>() {
            Ok(value) if value.is_infinite() => {
                Err(CompileError::new(start, ErrorKind::DoubleOverflow))
            }
            Ok(value) => Ok(Token::new(
                TokenKind::Double,
                TokenValue::Float(value),
                start,
                self.cursor,
            )),
            Err(_) => Err(CompileError::new(start, ErrorKind::InvalidDouble)),
        }
    }

    fn scan_identifier(&mut self, first: u8, start: Position) -> Result<Token> {
        let mut text = String::new();
        text.push(first as char);
        loop {
            match self.next_char() {
                Some(byte) if byte.is_ascii_alphanumeric() => text.push(byte as char),
                Some(_) => {
                    self.rollback();
                    break;
                }
                None => break,
            }
        }
        // re-validate the lexeme shape: a letter, then letters and digits
        let mut bytes = text.bytes();
        let valid = bytes.next().map_or(false, |b| b.is_ascii_alphabetic())
            && bytes.all(|b| b.is_ascii_alphanumeric());
        if !valid {
            return Err(CompileError::new(start, ErrorKind::InvalidIdentifier));
        }
        let kind = if text.parse::<Keyword>().is_ok() {
            TokenKind::Reserved
        } else {
            TokenKind::Identifier
        };
        Ok(Token::new(kind, TokenValue::Str(text), start, self.cursor))
    }

    fn scan_char_literal(&mut self, start: Position) -> Result<Token> {
        let value = match self.next_char() {
            None | Some(b'\n') | Some(b'\r') | Some(b'\'') => {
                return Err(CompileError::new(start, ErrorKind::InvalidCharacter));
            }
            Some(b'\\') => self.scan_escape(start)?,
            Some(byte) if byte < 0x20 || byte == 0x7f => {
                return Err(CompileError::new(start, ErrorKind::InvalidCharacter));
            }
            Some(byte) => byte,
        };
        match self.next_char() {
            Some(b'\'') => Ok(Token::new(
                TokenKind::CharLiteral,
                TokenValue::Int(i32::from(value)),
                start,
                self.cursor,
            )),
            _ => Err(CompileError::new(
                start,
                ErrorKind::InvalidCharacterAssignment,
            )),
        }
    }

    fn scan_string_literal(&mut self, start: Position) -> Result<Token> {
        let mut bytes = Vec::new();
        loop {
            match self.next_char() {
                None | Some(b'\n') | Some(b'\r') => {
                    return Err(CompileError::new(start, ErrorKind::MissingRightQuote));
                }
                Some(b'"') => break,
                Some(b'\\') => bytes.push(self.scan_escape(start)?),
                Some(byte) if byte < 0x20 || byte == 0x7f => {
                    return Err(CompileError::new(start, ErrorKind::InvalidStringLiteral));
                }
                Some(byte) => bytes.push(byte),
            }
        }
        let text = String::from_utf8(bytes)
            .map_err(|_| CompileError::new(start, ErrorKind::InvalidStringLiteral))?;
        Ok(Token::new(
            TokenKind::StringLiteral,
            TokenValue::Str(text),
            start,
            self.cursor,
        ))
    }

    /// The byte an escape sequence denotes; the backslash is consumed.
    fn scan_escape(&mut self, start: Position) -> Result<u8> {
        match self.next_char() {
            Some(b'\\') => Ok(b'\\'),
            Some(b'\'') => Ok(b'\''),
            Some(b'"') => Ok(b'"'),
            Some(b'n') => Ok(b'\n'),
            Some(b'r') => Ok(b'\r'),
            Some(b't') => Ok(b'\t'),
            Some(b'x') => {
                let high = self.next_char();
                let low = self.next_char();
                match (high, low) {
                    (Some(high), Some(low)) if is_hex_digit(high) && is_hex_digit(low) => {
                        Ok(hex_value(high) * 16 + hex_value(low))
                    }
                    _ => Err(CompileError::new(start, ErrorKind::UnknownEscapeCharacter)),
                }
            }
            _ => Err(CompileError::new(start, ErrorKind::UnknownEscapeCharacter)),
        }
    }

    /// `//` and `/* */` produce no token; a lone `/` is division.
    fn scan_comment_or_divide(&mut self, start: Position) -> Result<Option<Token>> {
        match self.peek() {
            Some(b'/') => {
                self.next_char();
                loop {
                    match self.next_char() {
                        None | Some(b'\n') => return Ok(None),
                        Some(_) => {}
                    }
                }
            }
            Some(b'*') => {
                self.next_char();
                loop {
                    match self.next_char() {
                        None => {
                            return Err(CompileError::new(self.cursor, ErrorKind::InvalidInput));
                        }
                        Some(b'*') => match self.next_char() {
                            Some(b'/') => return Ok(None),
                            Some(_) => self.rollback(),
                            None => {}
                        },
                        Some(_) => {}
                    }
                }
            }
            _ => Ok(Some(self.punctuation(TokenKind::Divide, b'/', start))),
        }
    }
}
