//! The syntax-directed code generator.
//!
//! A single pass over the token stream parses and emits at the same time;
//! there is no syntax tree. Every recognizer either succeeds (expression
//! recognizers additionally yield the inferred result type) or fails with
//! the error of the first offending construct, which aborts the compile.
//!
//! Instructions land in one of two streams, picked by the [`Target`] that is
//! threaded through every recognizer: the global `.start` stream while
//! top-level declarations are being parsed, or the current function's
//! stream. Forward jumps are emitted as `nop` placeholders and rewritten
//! once their target index is known; `break`/`continue` placeholders are
//! collected per loop and patched when the loop closes.

use std::collections::HashMap;
use std::mem;

use c0::{
    Constant, Frame, Function, FunctionParam, Instruction, JumpKind, Opcode, Operand, PendingJump,
    Program, Type, Variable,
};

use crate::error::{CompileError, ErrorKind, Position};
use crate::token::{Keyword, Token, TokenKind, TokenValue};

type Result<T> = std::result::Result<T, CompileError>;

/// The instruction stream a recognizer emits into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    /// The `.start` stream of global initializers.
    Start,
    /// The function with this index.
    Function(usize),
}

fn function_index(target: Target) -> usize {
    match target {
        Target::Function(index) => index,
        Target::Start => unreachable!("statements only occur inside functions"),
    }
}

fn is_relational(kind: TokenKind) -> bool {
    match kind {
        TokenKind::Less
        | TokenKind::LessEqual
        | TokenKind::Greater
        | TokenKind::GreaterEqual
        | TokenKind::Equal
        | TokenKind::NotEqual => true,
        _ => false,
    }
}

/// The conditional jump that *skips* the guarded block, i.e. fires when the
/// source condition is false.
fn skip_opcode(kind: TokenKind) -> Opcode {
    match kind {
        TokenKind::Less => Opcode::JGE,
        TokenKind::LessEqual => Opcode::JG,
        TokenKind::Greater => Opcode::JLE,
        TokenKind::GreaterEqual => Opcode::JL,
        TokenKind::Equal => Opcode::JNE,
        TokenKind::NotEqual => Opcode::JE,
        _ => unreachable!("not a relational operator: {:?}", kind),
    }
}

/// Two sides of equal type keep it, anything mixed is an int.
fn common_type(lhs: Type, rhs: Type) -> Type {
    if lhs == rhs {
        lhs
    } else {
        Type::Int
    }
}

/// Outcome of a name lookup: the frame distance (`level`), the slot record,
/// and which of the three lifecycle maps the name was found in.
#[derive(Clone, Copy, Debug)]
struct Resolved {
    level: u16,
    var: Variable,
    constant: bool,
    uninitialized: bool,
}

pub struct Parser {
    tokens: Vec<Token>,
    offset: usize,
    /// End position of the last consumed token; errors point here.
    current_pos: Position,
    program: Program,
    globals: Frame,
    function_indices: HashMap<String, usize>,
    loop_depth: u32,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Parser {
        Parser {
            tokens,
            offset: 0,
            current_pos: Position::new(0, 0),
            program: Program::new(),
            globals: Frame::new(),
            function_indices: HashMap::new(),
            loop_depth: 0,
        }
    }

    pub fn parse(mut self) -> Result<Program> {
        self.parse_global_declarations()?;
        self.parse_function_definitions()?;
        Ok(self.program)
    }

    // token cursor

    fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.offset)?.clone();
        self.offset += 1;
        self.current_pos = token.end;
        Some(token)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.offset)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.offset + ahead)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|token| token.kind)
    }

    fn peek_keyword(&self) -> Option<Keyword> {
        self.peek().and_then(Token::keyword)
    }

    fn err<T>(&self, kind: ErrorKind) -> Result<T> {
        Err(CompileError::new(self.current_pos, kind))
    }

    fn expect(&mut self, kind: TokenKind, error: ErrorKind) -> Result<()> {
        match self.next_token() {
            Some(token) if token.kind == kind => Ok(()),
            _ => self.err(error),
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.next_token() {
            Some(token) if token.kind == TokenKind::Identifier => match token.value {
                TokenValue::Str(name) => Ok(name),
                _ => unreachable!("identifier token without text"),
            },
            _ => self.err(ErrorKind::NeedIdentifier),
        }
    }

    // emission

    fn instructions_mut(&mut self, target: Target) -> &mut Vec<Instruction> {
        match target {
            Target::Start => &mut self.program.start,
            Target::Function(index) => &mut self.program.functions[index].instructions,
        }
    }

    fn emit(&mut self, target: Target, opcode: Opcode) -> usize {
        let instructions = self.instructions_mut(target);
        let index = instructions.len();
        instructions.push(Instruction::new(index as u32, opcode));
        index
    }

    fn emit1(&mut self, target: Target, opcode: Opcode, op1: Operand) -> usize {
        let instructions = self.instructions_mut(target);
        let index = instructions.len();
        instructions.push(Instruction::with_operand(index as u32, opcode, op1));
        index
    }

    fn emit2(&mut self, target: Target, opcode: Opcode, op1: Operand, op2: Operand) -> usize {
        let instructions = self.instructions_mut(target);
        let index = instructions.len();
        instructions.push(Instruction::with_operands(index as u32, opcode, op1, op2));
        index
    }

    /// Rewrites the placeholder at `at` into a jump to `jump_target`.
    fn patch_jump(&mut self, target: Target, at: usize, opcode: Opcode, jump_target: usize) {
        let instructions = self.instructions_mut(target);
        instructions[at] =
            Instruction::with_operand(at as u32, opcode, Operand::Half(jump_target as u16));
    }

    // frames and name lookup

    fn frame(&self, target: Target) -> &Frame {
        match target {
            Target::Start => &self.globals,
            Target::Function(index) => &self.program.functions[index].frame,
        }
    }

    fn frame_mut(&mut self, target: Target) -> &mut Frame {
        match target {
            Target::Start => &mut self.globals,
            Target::Function(index) => &mut self.program.functions[index].frame,
        }
    }

    fn resolve_in(frame: &Frame, level: u16, name: &str) -> Option<Resolved> {
        frame.lookup(name).map(|var| Resolved {
            level,
            var: *var,
            constant: frame.is_constant(name),
            uninitialized: frame.is_uninitialized(name),
        })
    }

    /// Looks a name up in the local frame first, then in the globals. The
    /// globals sit at level 0 while `.start` is being emitted and at level 1
    /// from inside a function.
    fn resolve(&self, target: Target, name: &str) -> Option<Resolved> {
        if let Target::Function(index) = target {
            let local = Self::resolve_in(&self.program.functions[index].frame, 0, name);
            if local.is_some() {
                return local;
            }
            return Self::resolve_in(&self.globals, 1, name);
        }
        Self::resolve_in(&self.globals, 0, name)
    }

    fn initialize_variable(&mut self, target: Target, level: u16, name: &str) {
        match target {
            Target::Function(index) if level == 0 => {
                self.program.functions[index].frame.initialize(name)
            }
            _ => self.globals.initialize(name),
        }
    }

    // declarations

    fn parse_global_declarations(&mut self) -> Result<()> {
        loop {
            let keyword = match self.peek() {
                None => return Ok(()),
                Some(token) => token.keyword(),
            };
            match keyword {
                Some(Keyword::Const) => {
                    self.next_token();
                    self.parse_declaration(Target::Start, true)?;
                }
                Some(keyword) if keyword.as_type().is_some() => {
                    // `type ident (` opens the first function definition
                    let ident = self
                        .peek_at(1)
                        .map_or(false, |token| token.kind == TokenKind::Identifier);
                    let paren = self
                        .peek_at(2)
                        .map_or(false, |token| token.kind == TokenKind::LeftParen);
                    if ident && paren {
                        return Ok(());
                    }
                    self.parse_declaration(Target::Start, false)?;
                }
                _ => return self.err(ErrorKind::NeedVariableType),
            }
        }
    }

    /// `type declarator {"," declarator} ";"` with the (optional) `const`
    /// already consumed. Works against the frame and stream of `target`, so
    /// globals and locals share one implementation.
    fn parse_declaration(&mut self, target: Target, constant: bool) -> Result<()> {
        let ty = self.parse_variable_type()?;
        loop {
            let initialized = self.parse_declarator(target, ty, constant)?;
            match self.peek_kind() {
                Some(TokenKind::Comma) => {
                    self.next_token();
                }
                Some(TokenKind::Semicolon) => {
                    self.next_token();
                    return Ok(());
                }
                _ if initialized => return self.err(ErrorKind::NeedSemicolonOrComma),
                _ => return self.err(ErrorKind::InvalidVariableDeclaration),
            }
        }
    }

    fn parse_variable_type(&mut self) -> Result<Type> {
        let keyword = match self.next_token() {
            Some(token) => token.keyword(),
            None => return self.err(ErrorKind::NeedVariableType),
        };
        match keyword.and_then(Keyword::as_type) {
            Some(Type::Int) => Ok(Type::Int),
            Some(Type::Char) => Ok(Type::Char),
            Some(_) => self.err(ErrorKind::InvalidVariableType),
            None => self.err(ErrorKind::NeedVariableType),
        }
    }

    /// One `ident ["=" expr]`. Allocates the slot with `snew 1`; an
    /// initializer stores through `loada` like an assignment would.
    /// Returns whether the variable was initialized.
    fn parse_declarator(&mut self, target: Target, ty: Type, constant: bool) -> Result<bool> {
        let name = self.expect_identifier()?;
        if self.frame(target).is_declared(&name) {
            return self.err(ErrorKind::DuplicateDeclaration);
        }
        if constant && target == Target::Start {
            // global constants leave their name in the pool
            self.program.add_constant(Constant::Str(name.clone()));
        }
        let slot = {
            let frame = self.frame_mut(target);
            let slot = frame.alloc();
            frame
                .uninitialized
                .insert(name.clone(), Variable { slot, ty });
            slot
        };
        self.emit1(target, Opcode::SNEW, Operand::Word(1));

        match self.peek_kind() {
            Some(TokenKind::Assign) => {
                self.next_token();
                self.emit2(target, Opcode::LOADA, Operand::Half(0), Operand::Word(slot));
                let value = self.parse_expression(target)?;
                if ty == Type::Char && value == Type::Int {
                    self.emit(target, Opcode::I2C);
                }
                self.emit(target, Opcode::ISTORE);
                let frame = self.frame_mut(target);
                if constant {
                    if let Some(var) = frame.uninitialized.remove(&name) {
                        frame.constants.insert(name, var);
                    }
                } else {
                    frame.initialize(&name);
                }
                Ok(true)
            }
            Some(TokenKind::Semicolon) | Some(TokenKind::Comma) | None if constant => {
                self.err(ErrorKind::ConstantNeedValue)
            }
            _ if constant => self.err(ErrorKind::NeedAssignSymbol),
            _ => Ok(false),
        }
    }

    // functions

    fn parse_function_definitions(&mut self) -> Result<()> {
        while self.peek().is_some() {
            self.parse_function_definition()?;
        }
        Ok(())
    }

    fn parse_function_definition(&mut self) -> Result<()> {
        let keyword = match self.next_token() {
            Some(token) => token.keyword(),
            None => return self.err(ErrorKind::InvalidFunctionDeclaration),
        };
        let return_type = match keyword.and_then(Keyword::as_type) {
            Some(Type::Double) => return self.err(ErrorKind::InvalidFunctionReturnType),
            Some(ty) => ty,
            None => return self.err(ErrorKind::InvalidFunctionDeclaration),
        };

        let name = match self.next_token() {
            Some(token) if token.kind == TokenKind::Identifier => match token.value {
                TokenValue::Str(name) => name,
                _ => unreachable!("identifier token without text"),
            },
            _ => return self.err(ErrorKind::NeedFunctionName),
        };
        if self.function_indices.contains_key(&name) || self.globals.is_declared(&name) {
            return self.err(ErrorKind::DuplicateDeclaration);
        }

        // the name constant exists before any of the function's code
        let name_index = self.program.add_constant(Constant::Str(name.clone()));
        let index = self.program.functions.len();
        self.program
            .functions
            .push(Function::new(index as u16, name_index, return_type));
        self.function_indices.insert(name, index);

        self.expect(TokenKind::LeftParen, ErrorKind::InvalidFunctionDeclaration)?;
        self.parse_parameters(index)?;

        let target = Target::Function(index);
        self.parse_compound_statement(target)?;
        if return_type == Type::Void {
            self.emit(target, Opcode::RET);
        }
        Ok(())
    }

    fn parse_parameters(&mut self, index: usize) -> Result<()> {
        if self.peek_kind() == Some(TokenKind::RightParen) {
            self.next_token();
            return Ok(());
        }
        loop {
            let constant = if self.peek_keyword() == Some(Keyword::Const) {
                self.next_token();
                true
            } else {
                false
            };
            let keyword = match self.next_token() {
                Some(token) => token.keyword(),
                None => return self.err(ErrorKind::InvalidParameter),
            };
            let ty = match keyword.and_then(Keyword::as_type) {
                Some(Type::Int) => Type::Int,
                Some(Type::Char) => Type::Char,
                _ => return self.err(ErrorKind::InvalidParameter),
            };
            let name = self.expect_identifier()?;

            if self.program.functions[index].frame.is_declared(&name) {
                return self.err(ErrorKind::DuplicateDeclaration);
            }
            let function = &mut self.program.functions[index];
            let slot = function.frame.alloc();
            let var = Variable { slot, ty };
            if constant {
                function.frame.constants.insert(name.clone(), var);
            } else {
                function.frame.vars.insert(name.clone(), var);
            }
            function.params.push(FunctionParam { name, ty, constant });
            function.params_count = function.params.len() as u16;

            match self.peek_kind() {
                Some(TokenKind::Comma) => {
                    self.next_token();
                }
                Some(TokenKind::RightParen) => {
                    self.next_token();
                    return Ok(());
                }
                _ => return self.err(ErrorKind::InvalidParameter),
            }
        }
    }

    // statements

    fn parse_compound_statement(&mut self, target: Target) -> Result<()> {
        self.expect(TokenKind::LeftBrace, ErrorKind::MissingBrace)?;
        loop {
            match self.peek_keyword() {
                Some(Keyword::Const) => {
                    self.next_token();
                    self.parse_declaration(target, true)?;
                }
                Some(keyword) if keyword.as_type().is_some() => {
                    self.parse_declaration(target, false)?;
                }
                _ => break,
            }
        }
        loop {
            match self.peek_kind() {
                None => return self.err(ErrorKind::IncompleteFunction),
                Some(TokenKind::RightBrace) => {
                    self.next_token();
                    return Ok(());
                }
                _ => self.parse_statement(target)?,
            }
        }
    }

    fn parse_statement(&mut self, target: Target) -> Result<()> {
        let kind = match self.peek_kind() {
            None => return self.err(ErrorKind::IncompleteFunction),
            Some(kind) => kind,
        };
        match kind {
            TokenKind::LeftBrace => self.parse_compound_statement(target),
            TokenKind::Semicolon => {
                self.next_token();
                Ok(())
            }
            TokenKind::Identifier => self.parse_assignment_or_call(target),
            TokenKind::Reserved => match self.peek_keyword() {
                Some(Keyword::If) => self.parse_if_statement(target),
                Some(Keyword::While) => self.parse_while_statement(target),
                Some(Keyword::Do) => self.parse_do_while_statement(target),
                Some(Keyword::Return) => self.parse_return_statement(target),
                Some(Keyword::Break) => self.parse_break_continue(target, JumpKind::Break),
                Some(Keyword::Continue) => self.parse_break_continue(target, JumpKind::Continue),
                Some(Keyword::Print) => self.parse_print_statement(target),
                Some(Keyword::Scan) => self.parse_scan_statement(target),
                Some(Keyword::For) => self.err(ErrorKind::InvalidLoop),
                _ => self.err(ErrorKind::InvalidStatement),
            },
            _ => self.err(ErrorKind::InvalidStatement),
        }
    }

    fn parse_assignment_or_call(&mut self, target: Target) -> Result<()> {
        let name = self.expect_identifier()?;
        match self.peek_kind() {
            Some(TokenKind::Assign) => {
                self.next_token();
                self.parse_assignment(target, &name)?;
                self.expect(TokenKind::Semicolon, ErrorKind::NeedSemicolon)
            }
            Some(TokenKind::LeftParen) => {
                self.parse_function_call(target, &name)?;
                self.expect(TokenKind::Semicolon, ErrorKind::NeedSemicolon)
            }
            _ => self.err(ErrorKind::InvalidAssignment),
        }
    }

    /// `ident "=" expr`, with everything up to the `=` consumed. Narrows an
    /// int value with `i2c` when the target is a char.
    fn parse_assignment(&mut self, target: Target, name: &str) -> Result<()> {
        let resolved = match self.resolve(target, name) {
            Some(resolved) => resolved,
            None => return self.err(ErrorKind::NotDeclared),
        };
        if resolved.constant {
            return self.err(ErrorKind::AssignToConstant);
        }
        self.emit2(
            target,
            Opcode::LOADA,
            Operand::Half(resolved.level),
            Operand::Word(resolved.var.slot),
        );
        let value = self.parse_expression(target)?;
        if resolved.var.ty == Type::Char && value == Type::Int {
            self.emit(target, Opcode::I2C);
        }
        self.emit(target, Opcode::ISTORE);
        self.initialize_variable(target, resolved.level, name);
        Ok(())
    }

    fn parse_if_statement(&mut self, target: Target) -> Result<()> {
        self.next_token(); // if
        self.expect(TokenKind::LeftParen, ErrorKind::MissingBracket)?;
        let (condition_jump, skip) = self.parse_condition(target)?;
        self.expect(TokenKind::RightParen, ErrorKind::MissingBracket)?;

        self.parse_statement(target)?;
        let jump_around_else = self.emit(target, Opcode::NOP);
        let skip_target = self.emit(target, Opcode::NOP);
        self.patch_jump(target, condition_jump, skip, skip_target);

        if self.peek_keyword() == Some(Keyword::Else) {
            self.next_token();
            self.parse_statement(target)?;
            let end = self.emit(target, Opcode::NOP);
            self.patch_jump(target, jump_around_else, Opcode::JMP, end);
        }
        Ok(())
    }

    fn parse_while_statement(&mut self, target: Target) -> Result<()> {
        self.next_token(); // while
        let head = self.emit(target, Opcode::NOP);
        self.expect(TokenKind::LeftParen, ErrorKind::MissingBracket)?;
        let (condition_jump, skip) = self.parse_condition(target)?;
        self.expect(TokenKind::RightParen, ErrorKind::MissingBracket)?;

        let saved = self.enter_loop(target);
        self.parse_statement(target)?;
        self.emit1(target, Opcode::JMP, Operand::Half(head as u16));
        let exit = self.emit(target, Opcode::NOP);
        self.patch_jump(target, condition_jump, skip, exit);
        self.exit_loop(target, saved, exit, head);
        Ok(())
    }

    fn parse_do_while_statement(&mut self, target: Target) -> Result<()> {
        self.next_token(); // do
        let head = self.emit(target, Opcode::NOP);
        let saved = self.enter_loop(target);
        self.parse_statement(target)?;

        if self.peek_keyword() == Some(Keyword::While) {
            self.next_token();
        } else {
            return self.err(ErrorKind::NeedWhileInDoWhile);
        }
        self.expect(TokenKind::LeftParen, ErrorKind::MissingBracket)?;
        let (condition_jump, skip) = self.parse_condition(target)?;
        self.expect(TokenKind::RightParen, ErrorKind::MissingBracket)?;
        self.expect(TokenKind::Semicolon, ErrorKind::NeedSemicolon)?;

        // a true condition jumps back, so the skip opcode is reversed
        self.patch_jump(target, condition_jump, skip.reversed(), head);
        let exit = self.emit(target, Opcode::NOP);
        self.exit_loop(target, saved, exit, head);
        Ok(())
    }

    /// Saves the enclosing loop's unresolved jumps and starts a fresh list.
    fn enter_loop(&mut self, target: Target) -> Vec<PendingJump> {
        self.loop_depth += 1;
        let index = function_index(target);
        mem::replace(&mut self.program.functions[index].pending_jumps, Vec::new())
    }

    /// Patches every `break`/`continue` of the closing loop and restores the
    /// enclosing loop's list.
    fn exit_loop(
        &mut self,
        target: Target,
        saved: Vec<PendingJump>,
        break_target: usize,
        continue_target: usize,
    ) {
        let index = function_index(target);
        let pending = mem::replace(&mut self.program.functions[index].pending_jumps, saved);
        for jump in pending {
            let to = match jump.kind {
                JumpKind::Break => break_target,
                JumpKind::Continue => continue_target,
            };
            self.patch_jump(target, jump.index, Opcode::JMP, to);
        }
        self.loop_depth -= 1;
    }

    fn parse_break_continue(&mut self, target: Target, kind: JumpKind) -> Result<()> {
        self.next_token(); // break / continue
        if self.loop_depth == 0 {
            return self.err(ErrorKind::InvalidJump);
        }
        let index = self.emit(target, Opcode::NOP);
        let function = function_index(target);
        self.program.functions[function]
            .pending_jumps
            .push(PendingJump { index, kind });
        self.expect(TokenKind::Semicolon, ErrorKind::NeedSemicolon)
    }

    fn parse_return_statement(&mut self, target: Target) -> Result<()> {
        self.next_token(); // return
        let return_type = self.program.functions[function_index(target)].return_type;
        if return_type == Type::Void {
            if self.peek_kind() == Some(TokenKind::Semicolon) {
                self.next_token();
                self.emit(target, Opcode::RET);
                Ok(())
            } else {
                self.err(ErrorKind::ReturnInVoidFunction)
            }
        } else {
            self.parse_expression(target)?;
            self.emit(target, Opcode::IRET);
            self.expect(TokenKind::Semicolon, ErrorKind::NeedSemicolon)
        }
    }

    fn parse_print_statement(&mut self, target: Target) -> Result<()> {
        self.next_token(); // print
        self.expect(TokenKind::LeftParen, ErrorKind::InvalidPrint)?;
        if self.peek_kind() == Some(TokenKind::RightParen) {
            self.next_token();
        } else {
            loop {
                self.parse_printable(target)?;
                match self.peek_kind() {
                    Some(TokenKind::Comma) => {
                        self.next_token();
                    }
                    Some(TokenKind::RightParen) => {
                        self.next_token();
                        break;
                    }
                    _ => return self.err(ErrorKind::InvalidPrint),
                }
            }
        }
        self.expect(TokenKind::Semicolon, ErrorKind::NeedSemicolon)?;
        self.emit(target, Opcode::PRINTL);
        Ok(())
    }

    fn parse_printable(&mut self, target: Target) -> Result<()> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::StringLiteral => {
                let text = match &token.value {
                    TokenValue::Str(text) => text.clone(),
                    _ => unreachable!("string token without text"),
                };
                self.next_token();
                let index = self.program.intern_string(&text);
                self.emit1(target, Opcode::LOADC, Operand::Half(index));
                self.emit(target, Opcode::SPRINT);
                Ok(())
            }
            Some(token) if token.kind == TokenKind::CharLiteral => {
                let value = match token.value {
                    TokenValue::Int(value) => value,
                    _ => unreachable!("char token without value"),
                };
                self.next_token();
                self.emit1(target, Opcode::IPUSH, Operand::Word(value));
                self.emit(target, Opcode::CPRINT);
                Ok(())
            }
            _ => {
                let ty = self.parse_expression(target)?;
                match ty {
                    Type::Char => self.emit(target, Opcode::CPRINT),
                    Type::Int => self.emit(target, Opcode::IPRINT),
                    _ => return self.err(ErrorKind::InvalidPrint),
                };
                Ok(())
            }
        }
    }

    fn parse_scan_statement(&mut self, target: Target) -> Result<()> {
        self.next_token(); // scan
        self.expect(TokenKind::LeftParen, ErrorKind::InvalidScan)?;
        let name = self.expect_identifier()?;
        let resolved = match self.resolve(target, &name) {
            Some(resolved) => resolved,
            None => return self.err(ErrorKind::NotDeclared),
        };
        if resolved.constant {
            return self.err(ErrorKind::AssignToConstant);
        }
        self.emit2(
            target,
            Opcode::LOADA,
            Operand::Half(resolved.level),
            Operand::Word(resolved.var.slot),
        );
        let scan = match resolved.var.ty {
            Type::Int => Opcode::ISCAN,
            Type::Char => Opcode::CSCAN,
            _ => return self.err(ErrorKind::InvalidScan),
        };
        self.emit(target, scan);
        self.emit(target, Opcode::ISTORE);
        self.initialize_variable(target, resolved.level, &name);
        self.expect(TokenKind::RightParen, ErrorKind::InvalidScan)?;
        self.expect(TokenKind::Semicolon, ErrorKind::NeedSemicolon)
    }

    // conditions and expressions

    /// Emits the condition and a placeholder for the jump that skips the
    /// guarded code when the condition is false. Returns the placeholder's
    /// index and the skip opcode to patch it with.
    fn parse_condition(&mut self, target: Target) -> Result<(usize, Opcode)> {
        self.parse_expression(target)?;
        match self.peek_kind() {
            Some(kind) if is_relational(kind) => {
                self.next_token();
                self.parse_expression(target)?;
                self.emit(target, Opcode::ICMP);
                let jump = self.emit(target, Opcode::NOP);
                Ok((jump, skip_opcode(kind)))
            }
            Some(TokenKind::Assign) => self.err(ErrorKind::NeedRelationalOperator),
            _ => {
                // a bare expression is compared against zero
                self.emit1(target, Opcode::IPUSH, Operand::Word(0));
                self.emit(target, Opcode::ICMP);
                let jump = self.emit(target, Opcode::NOP);
                Ok((jump, Opcode::JE))
            }
        }
    }

    fn parse_expression(&mut self, target: Target) -> Result<Type> {
        let mut ty = self.parse_multiplicative_expression(target)?;
        loop {
            let opcode = match self.peek_kind() {
                Some(TokenKind::Plus) => Opcode::IADD,
                Some(TokenKind::Minus) => Opcode::ISUB,
                _ => return Ok(ty),
            };
            self.next_token();
            let rhs = self.parse_multiplicative_expression(target)?;
            self.emit(target, opcode);
            ty = common_type(ty, rhs);
        }
    }

    fn parse_multiplicative_expression(&mut self, target: Target) -> Result<Type> {
        let mut ty = self.parse_cast_expression(target)?;
        loop {
            let opcode = match self.peek_kind() {
                Some(TokenKind::Multiply) => Opcode::IMUL,
                Some(TokenKind::Divide) => Opcode::IDIV,
                _ => return Ok(ty),
            };
            self.next_token();
            let rhs = self.parse_cast_expression(target)?;
            self.emit(target, opcode);
            ty = common_type(ty, rhs);
        }
    }

    /// `{"(" type ")"}` casts cost no instructions: int and char share a
    /// representation, so only the result type changes (to the outermost
    /// cast target).
    fn parse_cast_expression(&mut self, target: Target) -> Result<Type> {
        let mut cast = None;
        loop {
            let is_cast = self.peek_kind() == Some(TokenKind::LeftParen)
                && self
                    .peek_at(1)
                    .and_then(Token::keyword)
                    .and_then(Keyword::as_type)
                    .is_some();
            if !is_cast {
                break;
            }
            self.next_token(); // (
            let ty = match self.next_token().and_then(|token| token.keyword()) {
                Some(keyword) => keyword.as_type(),
                None => None,
            };
            match ty {
                Some(Type::Void) => return self.err(ErrorKind::CastToVoid),
                Some(Type::Double) | None => return self.err(ErrorKind::InvalidCast),
                Some(_) => {}
            }
            self.expect(TokenKind::RightParen, ErrorKind::InvalidCast)?;
            if cast.is_none() {
                cast = ty;
            }
        }
        let inner = self.parse_unary_expression(target)?;
        Ok(cast.unwrap_or(inner))
    }

    fn parse_unary_expression(&mut self, target: Target) -> Result<Type> {
        let negate = match self.peek_kind() {
            Some(TokenKind::Minus) => {
                self.next_token();
                true
            }
            Some(TokenKind::Plus) => {
                self.next_token();
                false
            }
            _ => false,
        };
        let ty = self.parse_primary_expression(target)?;
        if negate {
            self.emit(target, Opcode::INEG);
        }
        Ok(ty)
    }

    fn parse_primary_expression(&mut self, target: Target) -> Result<Type> {
        let token = match self.next_token() {
            Some(token) => token,
            None => return self.err(ErrorKind::IncompleteExpression),
        };
        match token.kind {
            TokenKind::LeftParen => {
                let ty = self.parse_expression(target)?;
                self.expect(TokenKind::RightParen, ErrorKind::MissingBracket)?;
                Ok(ty)
            }
            TokenKind::Integer => {
                let value = match token.value {
                    TokenValue::Int(value) => value,
                    _ => unreachable!("integer token without value"),
                };
                self.emit1(target, Opcode::IPUSH, Operand::Word(value));
                Ok(Type::Int)
            }
            TokenKind::CharLiteral => {
                let value = match token.value {
                    TokenValue::Int(value) => value,
                    _ => unreachable!("char token without value"),
                };
                self.emit1(target, Opcode::IPUSH, Operand::Word(value));
                Ok(Type::Char)
            }
            TokenKind::Identifier => {
                let name = match token.value {
                    TokenValue::Str(name) => name,
                    _ => unreachable!("identifier token without text"),
                };
                if self.peek_kind() == Some(TokenKind::LeftParen) {
                    return self.parse_function_call(target, &name);
                }
                let resolved = match self.resolve(target, &name) {
                    Some(resolved) => resolved,
                    None => return self.err(ErrorKind::UndeclaredIdentifier),
                };
                if resolved.uninitialized {
                    return self.err(ErrorKind::NotInitialized);
                }
                self.emit2(
                    target,
                    Opcode::LOADA,
                    Operand::Half(resolved.level),
                    Operand::Word(resolved.var.slot),
                );
                self.emit(target, Opcode::ILOAD);
                Ok(resolved.var.ty)
            }
            _ => self.err(ErrorKind::InvalidExpression),
        }
    }

    /// `ident "(" [expr {"," expr}] ")"` with the identifier consumed and
    /// the `(` peeked. Arguments are emitted in source order; the call's
    /// type is the callee's return type.
    fn parse_function_call(&mut self, target: Target, name: &str) -> Result<Type> {
        if target == Target::Start {
            return self.err(ErrorKind::CallFunctionInStartSection);
        }
        let index = match self.function_indices.get(name) {
            Some(&index) => index,
            None => return self.err(ErrorKind::UndeclaredFunction),
        };
        self.next_token(); // (

        let mut arguments = 0;
        if self.peek_kind() == Some(TokenKind::RightParen) {
            self.next_token();
        } else {
            loop {
                self.parse_expression(target)?;
                arguments += 1;
                match self.peek_kind() {
                    Some(TokenKind::Comma) => {
                        self.next_token();
                    }
                    Some(TokenKind::RightParen) => {
                        self.next_token();
                        break;
                    }
                    _ => return self.err(ErrorKind::InvalidFunctionCall),
                }
            }
        }

        let callee = &self.program.functions[index];
        let (params_count, return_type) = (callee.params_count, callee.return_type);
        if arguments != usize::from(params_count) {
            return self.err(ErrorKind::InvalidFunctionCall);
        }
        self.emit1(target, Opcode::CALL, Operand::Half(index as u16));
        Ok(return_type)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lexer::Lexer;
    use matches::assert_matches;

    fn compile(source: &str) -> Program {
        let tokens = Lexer::new(source).all_tokens().unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    fn compile_err(source: &str) -> CompileError {
        let tokens = Lexer::new(source).all_tokens().unwrap();
        Parser::new(tokens).parse().unwrap_err()
    }

    fn nullary(index: u32, opcode: Opcode) -> Instruction {
        Instruction::new(index, opcode)
    }

    fn jump(index: u32, opcode: Opcode, to: u16) -> Instruction {
        Instruction::with_operand(index, opcode, Operand::Half(to))
    }

    fn ipush(index: u32, value: i32) -> Instruction {
        Instruction::with_operand(index, Opcode::IPUSH, Operand::Word(value))
    }

    fn loada(index: u32, level: u16, slot: i32) -> Instruction {
        Instruction::with_operands(index, Opcode::LOADA, Operand::Half(level), Operand::Word(slot))
    }

    fn snew(index: u32) -> Instruction {
        Instruction::with_operand(index, Opcode::SNEW, Operand::Word(1))
    }

    #[test]
    fn empty_void_main() {
        let program = compile("void main(){}");
        assert_eq!(program.constants, [Constant::Str("main".to_owned())]);
        assert!(program.start.is_empty());
        assert_eq!(program.functions.len(), 1);

        let main = &program.functions[0];
        assert_eq!(main.name_index, 0);
        assert_eq!(main.params_count, 0);
        assert_eq!(main.level, 1);
        assert_eq!(main.instructions, [nullary(0, Opcode::RET)]);
    }

    #[test]
    fn global_const_lives_on_the_stack() {
        let program = compile("const int X = 5; void main(){ print(X); }");

        // only the two names reach the pool, the value goes to slot 0
        assert_eq!(
            program.constants,
            [
                Constant::Str("X".to_owned()),
                Constant::Str("main".to_owned())
            ]
        );
        assert_eq!(
            program.start,
            [snew(0), loada(1, 0, 0), ipush(2, 5), nullary(3, Opcode::ISTORE)]
        );
        assert_eq!(program.functions[0].name_index, 1);
        assert_eq!(
            program.functions[0].instructions,
            [
                loada(0, 1, 0),
                nullary(1, Opcode::ILOAD),
                nullary(2, Opcode::IPRINT),
                nullary(3, Opcode::PRINTL),
                nullary(4, Opcode::RET),
            ]
        );
    }

    #[test]
    fn if_else_jump_shape() {
        let program = compile("void f(){ int x; scan(x); if(x<0) print(0); else print(1); }");
        let code = &program.functions[0].instructions;

        // x < 0 skips the then-branch with the inverted comparison
        assert_eq!(code[8], jump(8, Opcode::JGE, 13));
        // two placeholders follow the then-branch...
        assert_eq!(code[12], jump(12, Opcode::JMP, 17));
        assert_eq!(code[13].opcode, Opcode::NOP);
        // ...and one more follows the else-branch as the jump-around target
        assert_eq!(code[17].opcode, Opcode::NOP);
        assert_eq!(code[18], nullary(18, Opcode::RET));
    }

    #[test]
    fn if_without_else_keeps_the_placeholder() {
        let program = compile("void f(){ int x; x=1; if(x) print(x); }");
        let code = &program.functions[0].instructions;
        // bare condition compares against zero and skips with je
        let je = code.iter().find(|i| i.opcode == Opcode::JE).unwrap();
        let target = je.op1.unwrap().value() as usize;
        assert_eq!(code[target].opcode, Opcode::NOP);
        // the jump-around-else slot is never patched
        assert_eq!(code[target - 1].opcode, Opcode::NOP);
    }

    #[test]
    fn while_with_break_patches_the_exit() {
        let program = compile("void f(){ int i; i=0; while(i<10){ if(i==5) break; i=i+1; } }");
        let code = &program.functions[0].instructions;

        assert_eq!(code[4].opcode, Opcode::NOP); // loop head
        assert_eq!(code[9], jump(9, Opcode::JGE, 25)); // condition exit
        assert_eq!(code[14], jump(14, Opcode::JNE, 17)); // inner if
        assert_eq!(code[15], jump(15, Opcode::JMP, 25)); // patched break
        assert_eq!(code[24], jump(24, Opcode::JMP, 4)); // back edge
        assert_eq!(code[25].opcode, Opcode::NOP); // break target
        assert!(program.functions[0].pending_jumps.is_empty());
    }

    #[test]
    fn continue_targets_the_loop_head() {
        let program = compile("void f(){ int i; i=0; while(i<3){ continue; } }");
        let code = &program.functions[0].instructions;
        let head = 4;
        assert_eq!(code[head].opcode, Opcode::NOP);
        // the continue placeholder is rewritten into a jump to the head
        assert_eq!(code[10], jump(10, Opcode::JMP, head as u16));
    }

    #[test]
    fn do_while_reverses_the_condition() {
        let program = compile("void f(){ int i; i=0; do{ i=i+1; }while(i<3); }");
        let code = &program.functions[0].instructions;

        assert_eq!(code[4].opcode, Opcode::NOP); // head
        assert_eq!(code[15], jump(15, Opcode::JL, 4)); // jge reversed to jl
        assert_eq!(code[16].opcode, Opcode::NOP); // break target
    }

    #[test]
    fn nested_loops_restore_pending_jumps() {
        let program = compile(
            "void f(){ int i; int j; i=0; \
             while(i<3){ j=0; while(j<3){ if(j==1) break; j=j+1; } \
             if(i==2) break; i=i+1; } }",
        );
        let function = &program.functions[0];
        assert!(function.pending_jumps.is_empty());
        // every nop that survived is either a jump target or an unpatched
        // jump-around-else slot; all breaks became jumps
        let jumps: Vec<_> = function
            .instructions
            .iter()
            .filter(|i| i.opcode == Opcode::JMP)
            .collect();
        assert_eq!(jumps.len(), 4); // two back edges, two breaks
    }

    #[test]
    fn instruction_indices_are_contiguous() {
        let program = compile(
            "int g; void f(){ int i; i=0; while(i<10){ if(i==5) break; i=i+1; } } \
             void main(){ f(); }",
        );
        for function in &program.functions {
            for (position, instruction) in function.instructions.iter().enumerate() {
                assert_eq!(instruction.index as usize, position);
            }
        }
    }

    #[test]
    fn char_assignment_narrows_int_values() {
        let program = compile("void f(){ char c; c = 65; }");
        let code = &program.functions[0].instructions;
        assert_eq!(
            &code[1..5],
            &[
                loada(1, 0, 0),
                ipush(2, 65),
                nullary(3, Opcode::I2C),
                nullary(4, Opcode::ISTORE),
            ]
        );

        let program = compile("void f(){ char c; c = 'a'; }");
        let code = &program.functions[0].instructions;
        assert!(code.iter().all(|i| i.opcode != Opcode::I2C));
    }

    #[test]
    fn declaration_initializers_store_like_assignments() {
        let program = compile("void f(){ int x = 3 * 4; }");
        let code = &program.functions[0].instructions;
        assert_eq!(
            &code[..6],
            &[
                snew(0),
                loada(1, 0, 0),
                ipush(2, 3),
                ipush(3, 4),
                nullary(4, Opcode::IMUL),
                nullary(5, Opcode::ISTORE),
            ]
        );
    }

    #[test]
    fn unary_minus_negates() {
        let program = compile("void f(){ int x = -3; }");
        let code = &program.functions[0].instructions;
        assert_eq!(code[2], ipush(2, 3));
        assert_eq!(code[3].opcode, Opcode::INEG);
    }

    #[test]
    fn casts_only_change_the_type() {
        let program = compile("void f(){ char c = (char)65; print((int)c); }");
        let code = &program.functions[0].instructions;
        // no i2c: the cast already made the initializer a char
        assert!(code.iter().all(|i| i.opcode != Opcode::I2C));
        // (int)c prints with iprint, not cprint
        assert!(code.iter().any(|i| i.opcode == Opcode::IPRINT));
        assert!(code.iter().all(|i| i.opcode != Opcode::CPRINT));
    }

    #[test]
    fn calls_pass_arguments_in_source_order() {
        let program = compile(
            "int add(int a, int b){ return a+b; } \
             void main(){ print(add(1, 2)); }",
        );
        let main = &program.functions[1].instructions;
        assert_eq!(main[0], ipush(0, 1));
        assert_eq!(main[1], ipush(1, 2));
        assert_eq!(main[2], Instruction::with_operand(2, Opcode::CALL, Operand::Half(0)));
        assert!(main.iter().any(|i| i.opcode == Opcode::IPRINT));
    }

    #[test]
    fn scan_reads_by_type_and_initializes() {
        let program = compile("void f(){ int x; char c; scan(x); scan(c); x = x; }");
        let code = &program.functions[0].instructions;
        assert!(code.iter().any(|i| i.opcode == Opcode::ISCAN));
        assert!(code.iter().any(|i| i.opcode == Opcode::CSCAN));
    }

    #[test]
    fn print_interns_strings_and_chars() {
        let program = compile("void f(){ print(\"hi\", 'x', 1); print(\"hi\"); }");
        assert_eq!(
            program
                .constants
                .iter()
                .filter(|c| **c == Constant::Str("hi".to_owned()))
                .count(),
            1
        );
        let code = &program.functions[0].instructions;
        assert!(code.iter().any(|i| i.opcode == Opcode::SPRINT));
        assert!(code.iter().any(|i| i.opcode == Opcode::CPRINT));
        assert!(code.iter().any(|i| i.opcode == Opcode::IPRINT));
        assert_eq!(code.iter().filter(|i| i.opcode == Opcode::PRINTL).count(), 2);
    }

    #[test]
    fn empty_print_still_emits_the_newline() {
        let program = compile("void f(){ print(); }");
        assert_eq!(program.functions[0].instructions[0].opcode, Opcode::PRINTL);
    }

    #[test]
    fn void_functions_get_an_implicit_ret() {
        let program = compile("void f(){ return; }");
        let code = &program.functions[0].instructions;
        assert_eq!(code[0].opcode, Opcode::RET);
        assert_eq!(code[1].opcode, Opcode::RET); // implicit one at the close
    }

    #[test]
    fn declaration_errors() {
        assert_eq!(compile_err("const int x;").kind, ErrorKind::ConstantNeedValue);
        assert_eq!(compile_err("const int x 5;").kind, ErrorKind::NeedAssignSymbol);
        assert_eq!(compile_err("int x; int x;").kind, ErrorKind::DuplicateDeclaration);
        assert_eq!(compile_err("void x;").kind, ErrorKind::InvalidVariableType);
        assert_eq!(compile_err("double d;").kind, ErrorKind::InvalidVariableType);
        assert_eq!(compile_err("int 5;").kind, ErrorKind::NeedIdentifier);
        assert_eq!(compile_err("x = 1;").kind, ErrorKind::NeedVariableType);
        assert_eq!(compile_err("int x = 1, y = 2").kind, ErrorKind::NeedSemicolonOrComma);
    }

    #[test]
    fn function_errors() {
        assert_eq!(
            compile_err("double f(){ }").kind,
            ErrorKind::InvalidFunctionReturnType
        );
        assert_eq!(
            compile_err("void f(double d){ }").kind,
            ErrorKind::InvalidParameter
        );
        assert_eq!(
            compile_err("void f(){ } void f(){ }").kind,
            ErrorKind::DuplicateDeclaration
        );
        assert_eq!(compile_err("int X; void X(){ }").kind, ErrorKind::DuplicateDeclaration);
        assert_eq!(compile_err("void f()").kind, ErrorKind::MissingBrace);
        assert_eq!(compile_err("void f(){ ").kind, ErrorKind::IncompleteFunction);
    }

    #[test]
    fn statement_errors() {
        assert_eq!(
            compile_err("void f(){ do{ }while(1<2) }").kind,
            ErrorKind::NeedSemicolon
        );
        assert_eq!(
            compile_err("void f(){ do{ }(1<2); }").kind,
            ErrorKind::NeedWhileInDoWhile
        );
        assert_eq!(compile_err("void f(){ break; }").kind, ErrorKind::InvalidJump);
        assert_eq!(compile_err("void f(){ continue; }").kind, ErrorKind::InvalidJump);
        assert_eq!(compile_err("void f(){ return 1; }").kind, ErrorKind::ReturnInVoidFunction);
        assert_eq!(
            compile_err("void f(){ for(;;){ } }").kind,
            ErrorKind::InvalidLoop
        );
        assert_eq!(
            compile_err("void f(){ if(1 = 2) print(1); }").kind,
            ErrorKind::NeedRelationalOperator
        );
        assert_eq!(compile_err("void f(){ struct s; }").kind, ErrorKind::InvalidStatement);
    }

    #[test]
    fn expression_errors() {
        assert_eq!(
            compile_err("void f(){ int x = (void)1; }").kind,
            ErrorKind::CastToVoid
        );
        assert_eq!(
            compile_err("void f(){ int x = (double)1; }").kind,
            ErrorKind::InvalidCast
        );
        assert_eq!(
            compile_err("void f(){ int x = 1.5; }").kind,
            ErrorKind::InvalidExpression
        );
        assert_eq!(compile_err("void f(){ int x = ;").kind, ErrorKind::InvalidExpression);
        assert_eq!(compile_err("void f(){ int x =").kind, ErrorKind::IncompleteExpression);
    }

    #[test]
    fn binding_errors() {
        assert_eq!(
            compile_err("void f(){ print(x); }").kind,
            ErrorKind::UndeclaredIdentifier
        );
        assert_eq!(compile_err("void f(){ x = 1; }").kind, ErrorKind::NotDeclared);
        assert_eq!(compile_err("void f(){ scan(x); }").kind, ErrorKind::NotDeclared);
        assert_eq!(
            compile_err("void f(){ int x; print(x); }").kind,
            ErrorKind::NotInitialized
        );
        assert_eq!(
            compile_err("const int X = 1; void f(){ X = 2; }").kind,
            ErrorKind::AssignToConstant
        );
        assert_eq!(
            compile_err("void f(const int p){ p = 1; }").kind,
            ErrorKind::AssignToConstant
        );
        assert_eq!(
            compile_err("const int X = 1; void f(){ scan(X); }").kind,
            ErrorKind::AssignToConstant
        );
        assert_eq!(compile_err("void f(){ g(); }").kind, ErrorKind::UndeclaredFunction);
    }

    #[test]
    fn call_errors() {
        assert_eq!(
            compile_err("int x = f();").kind,
            ErrorKind::CallFunctionInStartSection
        );
        assert_eq!(
            compile_err("int f(int a){ return a; } void main(){ f(); }").kind,
            ErrorKind::InvalidFunctionCall
        );
        assert_eq!(
            compile_err("int f(int a){ return a; } void main(){ f(1, 2); }").kind,
            ErrorKind::InvalidFunctionCall
        );
    }

    #[test]
    fn globals_resolve_at_level_one_from_functions() {
        let program = compile("int g = 7; void f(){ g = g + 1; }");
        let code = &program.functions[0].instructions;
        assert_eq!(code[0], loada(0, 1, 0));
        assert_eq!(code[1], loada(1, 1, 0));
    }

    #[test]
    fn locals_shadow_globals() {
        let program = compile("int g = 7; void f(){ int g = 1; print(g); }");
        let code = &program.functions[0].instructions;
        // the print reads level 0
        assert_eq!(code[4], loada(4, 0, 0));
    }

    #[test]
    fn uninitialized_becomes_initialized_by_assignment() {
        let source = "void f(){ int x; x = 1; print(x); }";
        assert_matches!(
            compile(source).functions[0].frame.vars.get("x"),
            Some(Variable { slot: 0, ty: Type::Int })
        );
    }

    #[test]
    fn params_occupy_the_first_slots() {
        let program = compile("int f(int a, const char c){ int x = 1; return a + x; }");
        let function = &program.functions[0];
        assert_eq!(function.params_count, 2);
        assert_eq!(function.frame.vars["a"].slot, 0);
        assert_eq!(function.frame.constants["c"].slot, 1);
        assert_eq!(function.frame.vars["x"].slot, 2);
        assert_eq!(function.frame.stack_pointer, 3);
    }

    #[test]
    fn mixed_operands_infer_int() {
        // char + int prints as an int
        let program = compile("void f(){ char c = 'a'; print(c + 1); }");
        let code = &program.functions[0].instructions;
        assert!(code.iter().any(|i| i.opcode == Opcode::IPRINT));
        // char + char keeps the char type
        let program = compile("void f(){ char c = 'a'; print(c + c); }");
        let code = &program.functions[0].instructions;
        assert!(code.iter().any(|i| i.opcode == Opcode::CPRINT));
    }
}
