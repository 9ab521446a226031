use std::error;
use std::fmt;

/// Zero-based (line, column) location in the line-split source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Position {
        Position { line, column }
    }
}

/// Everything that can stop a compilation, across both phases. Scanner
/// errors carry the cursor position at the moment of detection, parser
/// errors the end position of the last consumed token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    // input stream
    StreamError,
    Eof,
    InvalidInput,
    // lexical
    InvalidCharacter,
    InvalidCharacterAssignment,
    InvalidDouble,
    InvalidInteger,
    InvalidIdentifier,
    InvalidNotEqual,
    InvalidStringLiteral,
    UnknownEscapeCharacter,
    MissingRightQuote,
    // declarations
    DuplicateDeclaration,
    ConstantNeedValue,
    InvalidVariableDeclaration,
    InvalidVariableType,
    NeedVariableType,
    InvalidFunctionDeclaration,
    InvalidFunctionReturnType,
    NeedIdentifier,
    NeedFunctionName,
    InvalidParameter,
    // expressions and statements
    InvalidAssignment,
    InvalidCast,
    CastToVoid,
    InvalidExpression,
    IncompleteExpression,
    InvalidStatement,
    InvalidLoop,
    InvalidJump,
    IncompleteFunction,
    NeedWhileInDoWhile,
    NeedAssignSymbol,
    NeedRelationalOperator,
    NeedSemicolon,
    NeedSemicolonOrComma,
    MissingBrace,
    MissingBracket,
    ReturnInVoidFunction,
    InvalidPrint,
    InvalidScan,
    InvalidFunctionCall,
    CallFunctionInStartSection,
    // name binding
    UndeclaredIdentifier,
    UndeclaredFunction,
    NotDeclared,
    NotInitialized,
    AssignToConstant,
    // numeric ranges
    DoubleOverflow,
    IntegerOverflow,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        use self::ErrorKind::*;
        match self {
            StreamError => "StreamError",
            Eof => "EOF",
            InvalidInput => "InvalidInput",
            InvalidCharacter => "InvalidCharacter",
            InvalidCharacterAssignment => "InvalidCharacterAssignment",
            InvalidDouble => "InvalidDouble",
            InvalidInteger => "InvalidInteger",
            InvalidIdentifier => "InvalidIdentifier",
            InvalidNotEqual => "InvalidNotEqual",
            InvalidStringLiteral => "InvalidStringLiteral",
            UnknownEscapeCharacter => "UnknownEscapeCharacter",
            MissingRightQuote => "MissingRightQuote",
            DuplicateDeclaration => "DuplicateDeclaration",
            ConstantNeedValue => "ConstantNeedValue",
            InvalidVariableDeclaration => "InvalidVariableDeclaration",
            InvalidVariableType => "InvalidVariableType",
            NeedVariableType => "NeedVariableType",
            InvalidFunctionDeclaration => "InvalidFunctionDeclaration",
            InvalidFunctionReturnType => "InvalidFunctionReturnType",
            NeedIdentifier => "NeedIdentifier",
            NeedFunctionName => "NeedFunctionName",
            InvalidParameter => "InvalidParameter",
            InvalidAssignment => "InvalidAssignment",
            InvalidCast => "InvalidCast",
            CastToVoid => "CastToVoid",
            InvalidExpression => "InvalidExpression",
            IncompleteExpression => "IncompleteExpression",
            InvalidStatement => "InvalidStatement",
            InvalidLoop => "InvalidLoop",
            InvalidJump => "InvalidJump",
            IncompleteFunction => "IncompleteFunction",
            NeedWhileInDoWhile => "NeedWhileInDoWhile",
            NeedAssignSymbol => "NeedAssignSymbol",
            NeedRelationalOperator => "NeedRelationalOperator",
            NeedSemicolon => "NeedSemicolon",
            NeedSemicolonOrComma => "NeedSemicolonOrComma",
            MissingBrace => "MissingBrace",
            MissingBracket => "MissingBracket",
            ReturnInVoidFunction => "ReturnInVoidFunction",
            InvalidPrint => "InvalidPrint",
            InvalidScan => "InvalidScan",
            InvalidFunctionCall => "InvalidFunctionCall",
            CallFunctionInStartSection => "CallFunctionInStartSection",
            UndeclaredIdentifier => "UndeclaredIdentifier",
            UndeclaredFunction => "UndeclaredFunction",
            NotDeclared => "NotDeclared",
            NotInitialized => "NotInitialized",
            AssignToConstant => "AssignToConstant",
            DoubleOverflow => "DoubleOverflow",
            IntegerOverflow => "IntegerOverflow",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompileError {
    pub pos: Position,
    pub kind: ErrorKind,
}

impl CompileError {
    pub fn new(pos: Position, kind: ErrorKind) -> CompileError {
        CompileError { pos, kind }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Line: {} Column: {} Error: {}",
            self.pos.line, self.pos.column, self.kind
        )
    }
}

impl error::Error for CompileError {}
