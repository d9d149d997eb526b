//! Single-pass compiler: tokens go straight to bytecode through a Pratt parser,
//! with no syntax tree in between.

mod rules;

use std::rc::Rc;

use crate::diagnostic::{CompileError, Location};
use crate::lexer::{Scanner, Token, TokenKind};
use crate::vm::chunk::*;
use crate::vm::inline_cache::{SiteCounts, SiteId};
use crate::vm::value::{Function, Value};

use rules::{Precedence, rule};

/// Locals per function, slot 0 included.
pub const MAX_LOCALS: usize = 256;
/// Captured variables per function.
pub const MAX_UPVALUES: usize = 256;
/// Constant pool entries per chunk.
pub const MAX_CONSTANTS: usize = 256;
/// Parameters per function and arguments per call.
pub const MAX_ARITY: usize = 255;

/// Output of a successful compile: the top-level function plus how many
/// inline-cache sites of each kind its code (and nested code) refers to.
pub struct CompiledScript {
    pub function: Rc<Function>,
    pub sites: SiteCounts,
}

/// Compile a whole program. All errors found are returned, in source order.
pub fn compile(source: &str) -> Result<CompiledScript, Vec<CompileError>> {
    let mut compiler = Compiler::new(source);
    compiler.advance();
    while !compiler.matches(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.finish()
}

/// Compile one interactive line. A lone expression running to end of input
/// is printed; anything else compiles as an ordinary program.
pub fn compile_line(source: &str) -> Result<CompiledScript, Vec<CompileError>> {
    let mut compiler = Compiler::new(source);
    compiler.advance();
    if !compiler.check(TokenKind::Eof) {
        compiler.expression();
        if compiler.errors.is_empty() && compiler.check(TokenKind::Eof) {
            compiler.emit(OP_PRINT);
            return compiler.finish();
        }
    }
    compile(source)
}

impl Compiler<'_> {
    /// Close the top-level function and hand back the script, or every error
    /// collected along the way.
    fn finish(mut self) -> Result<CompiledScript, Vec<CompileError>> {
        let (function, _) = self.end_function();
        if !self.errors.is_empty() {
            log::debug!("compile failed with {} error(s)", self.errors.len());
            return Err(self.errors);
        }
        let sites = self.sites;
        log::debug!(
            "compiled script: {} bytes, sites get={} set={} call={}",
            function.chunk.code.len(),
            sites.property_get,
            sites.property_set,
            sites.call
        );
        Ok(CompiledScript { function: Rc::new(function), sites })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local<'src> {
    name: &'src str,
    /// `None` while the initializer is still being compiled.
    depth: Option<usize>,
    is_captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

/// Per-function compile state; nested function declarations push a new one.
struct FunctionState<'src> {
    name: Option<Rc<str>>,
    kind: FunctionKind,
    arity: usize,
    chunk: Chunk,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: usize,
}

impl<'src> FunctionState<'src> {
    fn new(kind: FunctionKind, name: Option<Rc<str>>) -> Self {
        // Slot 0 holds the callee, or the receiver inside methods.
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            FunctionKind::Script | FunctionKind::Function => "",
        };
        FunctionState {
            name,
            kind,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![Local { name: slot_zero, depth: Some(0), is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SiteKind {
    PropertyGet,
    PropertySet,
    Call,
}

struct ClassState {
    has_superclass: bool,
}

pub(crate) struct Compiler<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    errors: Vec<CompileError>,
    panic_mode: bool,
    functions: Vec<FunctionState<'src>>,
    classes: Vec<ClassState>,
    sites: SiteCounts,
}

impl<'src> Compiler<'src> {
    fn new(source: &'src str) -> Self {
        Compiler {
            scanner: Scanner::new(source),
            current: Token::synthetic(""),
            previous: Token::synthetic(""),
            errors: Vec::new(),
            panic_mode: false,
            functions: vec![FunctionState::new(FunctionKind::Script, None)],
            classes: Vec::new(),
            sites: SiteCounts::default(),
        }
    }

    // ---- Token plumbing ----

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            match self.current.kind {
                TokenKind::Error(error) => self.error_at_current(&error.to_string()),
                _ => break,
            }
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    // ---- Errors ----

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let location = match token.kind {
            TokenKind::Eof => Location::End,
            TokenKind::Error(_) => Location::None,
            _ => Location::Lexeme(token.lexeme.to_string()),
        };
        self.errors.push(CompileError { line: token.line, location, message: message.to_string() });
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    /// Skip to a likely statement boundary after an error.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // ---- Emission ----

    fn state(&mut self) -> &mut FunctionState<'src> {
        let last = self.functions.len() - 1;
        &mut self.functions[last]
    }

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.state().chunk
    }

    fn emit(&mut self, byte: u8) {
        let line = self.previous.line;
        self.chunk().write(byte, line);
    }

    fn emit_pair(&mut self, a: u8, b: u8) {
        self.emit(a);
        self.emit(b);
    }

    fn emit_u16(&mut self, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.emit_pair(hi, lo);
    }

    fn emit_return(&mut self) {
        if self.state().kind == FunctionKind::Initializer {
            self.emit_pair(OP_GET_LOCAL, 0);
        } else {
            self.emit(OP_NIL);
        }
        self.emit(OP_RETURN);
    }

    /// Emit `op` with a placeholder offset; returns the operand position.
    fn emit_jump(&mut self, op: u8) -> usize {
        self.emit(op);
        self.emit_u16(u16::MAX);
        self.chunk().code.len() - 2
    }

    fn patch_jump(&mut self, operand: usize) {
        let jump = self.chunk().code.len() - operand - 2;
        match u16::try_from(jump) {
            Ok(jump) => self.chunk().patch_u16(operand, jump),
            Err(_) => self.error("Too much code to jump over."),
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit(OP_LOOP);
        let offset = self.chunk().code.len() - loop_start + 2;
        let offset = u16::try_from(offset).unwrap_or_else(|_| {
            self.error("Loop body too large.");
            0
        });
        self.emit_u16(offset);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.chunk().add_constant(value);
        if index >= MAX_CONSTANTS {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_pair(OP_CONSTANT, index);
    }

    fn identifier_constant(&mut self, name: Token<'src>) -> u8 {
        self.make_constant(Value::string(name.lexeme))
    }

    /// Allocate the next inline-cache site id of `kind`.
    fn allocate_site(&mut self, kind: SiteKind) -> SiteId {
        let counter = match kind {
            SiteKind::PropertyGet => &mut self.sites.property_get,
            SiteKind::PropertySet => &mut self.sites.property_set,
            SiteKind::Call => &mut self.sites.call,
        };
        let id = *counter;
        *counter += 1;
        match SiteId::try_from(id) {
            Ok(id) => id,
            Err(_) => {
                self.error("Too many inline cache sites.");
                0
            }
        }
    }

    fn end_function(&mut self) -> (Function, Vec<UpvalueDesc>) {
        self.emit_return();
        let state = match self.functions.pop() {
            Some(state) => state,
            None => FunctionState::new(FunctionKind::Script, None),
        };
        let function = Function {
            name: state.name,
            arity: state.arity.min(MAX_ARITY) as u8,
            upvalue_count: state.upvalues.len(),
            chunk: state.chunk,
        };
        if self.errors.is_empty() && log::log_enabled!(log::Level::Trace) {
            let name = function.name.as_deref().unwrap_or("<script>");
            log::trace!("{}", function.chunk.disassemble(name));
        }
        (function, state.upvalues)
    }

    // ---- Scopes and variables ----

    fn begin_scope(&mut self) {
        self.state().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.state().scope_depth -= 1;
        loop {
            let state = self.state();
            let depth = state.scope_depth;
            let captured = match state.locals.last() {
                Some(local) if local.depth.is_some_and(|d| d > depth) => local.is_captured,
                _ => break,
            };
            state.locals.pop();
            self.emit(if captured { OP_CLOSE_UPVALUE } else { OP_POP });
        }
    }

    fn add_local(&mut self, name: Token<'src>) {
        if self.state().locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.state().locals.push(Local { name: name.lexeme, depth: None, is_captured: false });
    }

    fn declare_variable(&mut self) {
        if self.state().scope_depth == 0 {
            return;
        }
        let name = self.previous;
        let state = self.state();
        let depth = state.scope_depth;
        let duplicate = state
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth.is_none_or(|d| d >= depth))
            .any(|local| local.name == name.lexeme);
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.state().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous)
    }

    fn mark_initialized(&mut self) {
        let state = self.state();
        if state.scope_depth == 0 {
            return;
        }
        let depth = state.scope_depth;
        if let Some(local) = state.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.state().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_pair(OP_DEFINE_GLOBAL, global);
    }

    fn resolve_local(&mut self, function: usize, name: &str) -> Option<u8> {
        let found = self.functions[function]
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name)
            .map(|(slot, local)| (slot, local.depth.is_none()));
        let (slot, uninitialized) = found?;
        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        Some(slot as u8)
    }

    fn add_upvalue(&mut self, function: usize, index: u8, is_local: bool) -> u8 {
        let desc = UpvalueDesc { index, is_local };
        let upvalues = &self.functions[function].upvalues;
        if let Some(existing) = upvalues.iter().position(|u| *u == desc) {
            return existing as u8;
        }
        if upvalues.len() == MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.functions[function].upvalues.push(desc);
        (self.functions[function].upvalues.len() - 1) as u8
    }

    fn resolve_upvalue(&mut self, function: usize, name: &str) -> Option<u8> {
        if function == 0 {
            return None;
        }
        let enclosing = function - 1;
        if let Some(local) = self.resolve_local(enclosing, name) {
            self.functions[enclosing].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(function, local, true));
        }
        let upvalue = self.resolve_upvalue(enclosing, name)?;
        Some(self.add_upvalue(function, upvalue, false))
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let current = self.functions.len() - 1;
        let (get, set, arg) = if let Some(slot) = self.resolve_local(current, name.lexeme) {
            (OP_GET_LOCAL, OP_SET_LOCAL, slot)
        } else if let Some(index) = self.resolve_upvalue(current, name.lexeme) {
            (OP_GET_UPVALUE, OP_SET_UPVALUE, index)
        } else {
            (OP_GET_GLOBAL, OP_SET_GLOBAL, self.identifier_constant(name))
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_pair(set, arg);
        } else {
            self.emit_pair(get, arg);
        }
    }

    // ---- Declarations ----

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(class_name);
        self.declare_variable();

        self.emit_pair(OP_CLASS, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassState { has_superclass: false });

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false);
            if class_name.lexeme == self.previous.lexeme {
                self.error("A class can't inherit from itself.");
            }

            self.begin_scope();
            self.add_local(Token::synthetic("super"));
            self.define_variable(0);

            self.named_variable(class_name, false);
            self.emit(OP_INHERIT);
            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit(OP_POP);

        if self.classes.pop().is_some_and(|class| class.has_superclass) {
            self.end_scope();
        }
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant(self.previous);
        let kind = if self.previous.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_pair(OP_METHOD, constant);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    /// Compile a parameter list and body, then emit the closure that wraps it.
    fn function(&mut self, kind: FunctionKind) {
        let name: Rc<str> = Rc::from(self.previous.lexeme);
        self.functions.push(FunctionState::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.state().arity += 1;
                if self.state().arity > MAX_ARITY {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_function();
        let constant = self.make_constant(Value::Function(Rc::new(function)));
        self.emit_pair(OP_CLOSURE, constant);
        for upvalue in upvalues {
            self.emit_pair(u8::from(upvalue.is_local), upvalue.index);
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit(OP_NIL);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    // ---- Statements ----

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit(OP_PRINT);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit(OP_POP);
    }

    fn return_statement(&mut self) {
        if self.state().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
            return;
        }
        if self.state().kind == FunctionKind::Initializer {
            self.error("Can't return a value from an initializer.");
        }
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
        self.emit(OP_RETURN);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit(OP_POP);
        self.statement();
        let else_jump = self.emit_jump(OP_JUMP);

        self.patch_jump(then_jump);
        self.emit(OP_POP);
        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit(OP_POP);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(OP_POP);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.matches(TokenKind::Semicolon) {
            // No initializer.
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk().code.len();
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OP_JUMP_IF_FALSE));
            self.emit(OP_POP);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OP_JUMP);
            let increment_start = self.chunk().code.len();
            self.expression();
            self.emit(OP_POP);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit(OP_POP);
        }
        self.end_scope();
    }

    // ---- Expressions ----

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    pub(crate) fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    pub(crate) fn number(&mut self, _can_assign: bool) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(value) => self.emit_constant(Value::Number(value)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    pub(crate) fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let contents = lexeme.get(1..lexeme.len().saturating_sub(1)).unwrap_or("");
        self.emit_constant(Value::string(contents));
    }

    pub(crate) fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit(OP_FALSE),
            TokenKind::True => self.emit(OP_TRUE),
            _ => self.emit(OP_NIL),
        }
    }

    pub(crate) fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous, can_assign);
    }

    pub(crate) fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Bang => self.emit(OP_NOT),
            _ => self.emit(OP_NEGATE),
        }
    }

    pub(crate) fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(rule(operator).precedence.next());
        match operator {
            TokenKind::BangEqual => self.emit_pair(OP_EQUAL, OP_NOT),
            TokenKind::EqualEqual => self.emit(OP_EQUAL),
            TokenKind::Greater => self.emit(OP_GREATER),
            TokenKind::GreaterEqual => self.emit(OP_GREATER_EQUAL),
            TokenKind::Less => self.emit(OP_LESS),
            TokenKind::LessEqual => self.emit(OP_LESS_EQUAL),
            TokenKind::Plus => self.emit(OP_ADD),
            TokenKind::Minus => self.emit(OP_SUBTRACT),
            TokenKind::Star => self.emit(OP_MULTIPLY),
            _ => self.emit(OP_DIVIDE),
        }
    }

    pub(crate) fn and(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit(OP_POP);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    pub(crate) fn or(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OP_JUMP_IF_FALSE);
        let end_jump = self.emit_jump(OP_JUMP);
        self.patch_jump(else_jump);
        self.emit(OP_POP);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    pub(crate) fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        let site = self.allocate_site(SiteKind::Call);
        self.emit_pair(OP_CALL, arg_count);
        self.emit_u16(site);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count = 0usize;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == MAX_ARITY {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(MAX_ARITY) as u8
    }

    pub(crate) fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous);

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            let site = self.allocate_site(SiteKind::PropertySet);
            self.emit_pair(OP_SET_PROPERTY, name);
            self.emit_u16(site);
        } else {
            let site = self.allocate_site(SiteKind::PropertyGet);
            self.emit_pair(OP_GET_PROPERTY, name);
            self.emit_u16(site);
        }
    }

    pub(crate) fn this(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    pub(crate) fn super_(&mut self, _can_assign: bool) {
        match self.classes.last() {
            None => self.error("Can't use 'super' outside of a class."),
            Some(class) if !class.has_superclass => {
                self.error("Can't use 'super' in a class with no superclass.")
            }
            Some(_) => {}
        }
        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous);

        self.named_variable(Token::synthetic("this"), false);
        self.named_variable(Token::synthetic("super"), false);
        self.emit_pair(OP_GET_SUPER, name);
    }
}
