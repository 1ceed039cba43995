//! Compiler that converts AST to VM bytecode
//!
//! Each chunk compiles against the locals declared by earlier chunks. The
//! chunk-root scope stays open across chunks: a top-level `let` leaves its
//! value on the stack as a new slot, and the returned locals list tells the
//! next chunk where every name lives.

use super::ast::{AssignTarget, AstExpr, AstProgram, AstStatement, BinaryOp, UnaryOp};
use super::error::{ErrorKind, ParseError, ParseResult};
use super::lexer::Span;
use crate::opcodes::Opcode;
use crate::program::header;

/// A named stack slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Local {
    pub name: String,
    /// Block nesting depth the local was declared at, 0 being the chunk root
    pub depth: usize,
    /// Reserved for closures; always false
    pub is_captured: bool,
}

/// Output of compiling one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCode {
    /// Header plus instructions
    pub bytecode: Vec<u8>,
    /// Chunk-root locals after this chunk, earlier chunks' locals first
    pub locals: Vec<Local>,
}

#[derive(Debug, Default)]
struct Scope {
    locals: Vec<Local>,
    depth: usize,
}

/// How a name resolves at a given point of compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variable {
    /// Slot relative to the current function's frame base
    Local(u16),
    /// Absolute slot in the chunk-root scope
    Root(u16),
    Global,
}

/// Compiler that translates AST to VM bytecode
pub struct Compiler {
    /// Current bytecode being generated
    bytecode: Vec<u8>,

    /// Chunk-root scope, seeded with earlier chunks' locals
    root: Scope,

    /// Scope of the function body being compiled, if any
    function: Option<Scope>,
}

impl Compiler {
    /// Create a compiler for a chunk following chunks that declared `context`
    pub fn new(context: &[Local]) -> Self {
        Compiler {
            bytecode: Vec::new(),
            root: Scope {
                locals: context.to_vec(),
                depth: 0,
            },
            function: None,
        }
    }

    /// Compile an AST program into header-prefixed bytecode
    pub fn compile(mut self, ast: &AstProgram) -> ParseResult<CompiledCode> {
        for stmt in &ast.statements {
            self.compile_stmt(stmt)?;
        }

        let mut bytecode = header().to_vec();
        bytecode.append(&mut self.bytecode);
        Ok(CompiledCode {
            bytecode,
            locals: self.root.locals,
        })
    }

    // ===== Bytecode Emission =====

    /// Emit a single opcode
    fn emit(&mut self, opcode: Opcode) {
        self.bytecode.push(opcode as u8);
    }

    /// Emit an opcode with a u16 operand (little-endian)
    fn emit_u16(&mut self, opcode: Opcode, operand: u16) {
        self.emit(opcode);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
    }

    fn emit_string(&mut self, value: &str) {
        self.bytecode
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.bytecode.extend_from_slice(value.as_bytes());
    }

    /// Emit an opcode followed by a string operand
    fn emit_with_string(&mut self, opcode: Opcode, value: &str) {
        self.emit(opcode);
        self.emit_string(value);
    }

    /// Emit a jump with a placeholder offset, returning the operand position
    fn emit_jump(&mut self, opcode: Opcode) -> usize {
        self.emit(opcode);
        let operand = self.bytecode.len();
        self.bytecode.extend_from_slice(&0i32.to_le_bytes());
        operand
    }

    /// Point a jump emitted by `emit_jump` at the current position
    fn patch_jump(&mut self, operand: usize, span: Span) -> ParseResult<()> {
        let target = self.bytecode.len() as i64;
        let offset = Self::jump_offset(target - (operand as i64 + 4), span)?;
        self.bytecode[operand..operand + 4].copy_from_slice(&offset.to_le_bytes());
        Ok(())
    }

    /// Emit a backward jump to `start`
    fn emit_loop(&mut self, start: usize, span: Span) -> ParseResult<()> {
        self.emit(Opcode::Jump);
        let end = self.bytecode.len() as i64 + 4;
        let offset = Self::jump_offset(start as i64 - end, span)?;
        self.bytecode.extend_from_slice(&offset.to_le_bytes());
        Ok(())
    }

    fn jump_offset(distance: i64, span: Span) -> ParseResult<i32> {
        i32::try_from(distance)
            .map_err(|_| too_large(format!("Jump of {} bytes is too far", distance), span))
    }

    // ===== Scopes =====

    fn scope_mut(&mut self) -> &mut Scope {
        self.function.as_mut().unwrap_or(&mut self.root)
    }

    fn begin_scope(&mut self) {
        self.scope_mut().depth += 1;
    }

    /// Close the innermost block, popping the locals it declared
    fn end_scope(&mut self) {
        let scope = self.scope_mut();
        scope.depth -= 1;
        let depth = scope.depth;
        let keep = scope
            .locals
            .iter()
            .rposition(|local| local.depth <= depth)
            .map_or(0, |i| i + 1);
        let popped = scope.locals.len() - keep;
        scope.locals.truncate(keep);

        for _ in 0..popped {
            self.emit(Opcode::Pop);
        }
    }

    /// Record that the value on top of the stack is now the local `name`
    fn declare_local(&mut self, name: &str, span: Span) -> ParseResult<()> {
        let scope = self.scope_mut();
        if scope.locals.len() > u16::MAX as usize {
            return Err(too_large(
                format!("Too many local variables to declare '{}'", name),
                span,
            ));
        }
        let depth = scope.depth;
        scope.locals.push(Local {
            name: name.to_string(),
            depth,
            is_captured: false,
        });
        Ok(())
    }

    fn resolve(&self, name: &str) -> Variable {
        if let Some(function) = &self.function {
            if let Some(slot) = function.locals.iter().rposition(|l| l.name == name) {
                return Variable::Local(slot as u16);
            }
            // Function bodies only see the chunk root's top-level bindings
            if let Some(slot) = self
                .root
                .locals
                .iter()
                .rposition(|l| l.name == name && l.depth == 0)
            {
                return Variable::Root(slot as u16);
            }
            return Variable::Global;
        }

        match self.root.locals.iter().rposition(|l| l.name == name) {
            Some(slot) => Variable::Root(slot as u16),
            None => Variable::Global,
        }
    }

    fn compile_block(&mut self, body: &[AstStatement]) -> ParseResult<()> {
        self.begin_scope();
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        self.end_scope();
        Ok(())
    }

    // ===== Expression Compilation =====

    /// Compile an expression into bytecode
    fn compile_expr(&mut self, expr: &AstExpr) -> ParseResult<()> {
        match expr {
            AstExpr::Int { value, .. } => {
                self.emit(Opcode::PushInt);
                self.bytecode.extend_from_slice(&value.to_le_bytes());
            }

            AstExpr::Float { value, .. } => {
                self.emit(Opcode::PushFloat);
                self.bytecode.extend_from_slice(&value.to_le_bytes());
            }

            AstExpr::String { value, .. } => self.emit_with_string(Opcode::PushString, value),

            AstExpr::Bool { value: true, .. } => self.emit(Opcode::PushTrue),
            AstExpr::Bool { value: false, .. } => self.emit(Opcode::PushFalse),
            AstExpr::Null { .. } => self.emit(Opcode::PushNull),

            AstExpr::Array { items, span } => {
                let count = count_operand(items.len(), "array items", *span)?;
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emit_u16(Opcode::NewArray, count);
            }

            AstExpr::Dict { entries, span } => {
                let count = count_operand(entries.len(), "dictionary entries", *span)?;
                for (key, value) in entries {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit_u16(Opcode::NewDict, count);
            }

            AstExpr::Ident { name, .. } => match self.resolve(name) {
                Variable::Local(slot) => self.emit_u16(Opcode::GetLocal, slot),
                Variable::Root(slot) => self.emit_u16(Opcode::GetRootLocal, slot),
                Variable::Global => self.emit_with_string(Opcode::GetGlobal, name),
            },

            AstExpr::Binary { op, left, right, .. } => {
                // Both operands are always evaluated, and/or included
                self.compile_expr(left)?;
                self.compile_expr(right)?;

                let opcode = match op {
                    BinaryOp::Add => Opcode::Add,
                    BinaryOp::Sub => Opcode::Sub,
                    BinaryOp::Mul => Opcode::Mul,
                    BinaryOp::Div => Opcode::Div,
                    BinaryOp::Mod => Opcode::Mod,
                    BinaryOp::Eq => Opcode::Eq,
                    BinaryOp::NotEq => Opcode::Ne,
                    BinaryOp::Lt => Opcode::Lt,
                    BinaryOp::Gt => Opcode::Gt,
                    BinaryOp::LtEq => Opcode::Le,
                    BinaryOp::GtEq => Opcode::Ge,
                    BinaryOp::And => Opcode::And,
                    BinaryOp::Or => Opcode::Or,
                };
                self.emit(opcode);
            }

            AstExpr::Unary { op, expr, .. } => {
                self.compile_expr(expr)?;
                self.emit(match op {
                    UnaryOp::Not => Opcode::Not,
                    UnaryOp::Neg => Opcode::Neg,
                });
            }

            AstExpr::FieldAccess { object, field, .. } => {
                self.compile_expr(object)?;
                self.emit_with_string(Opcode::PushString, field);
                self.emit(Opcode::GetItem);
            }

            AstExpr::IndexAccess { object, index, .. } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit(Opcode::GetItem);
            }

            AstExpr::Call { function, args, span } => {
                if args.len() > u8::MAX as usize {
                    return Err(too_large(
                        format!(
                            "Too many arguments to function '{}': {} (max 255)",
                            function,
                            args.len()
                        ),
                        *span,
                    ));
                }
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit_with_string(Opcode::CallGlobal, function);
                self.bytecode.push(args.len() as u8);
            }
        }

        Ok(())
    }

    // ===== Statement Compilation =====

    /// Compile a statement into bytecode
    fn compile_stmt(&mut self, stmt: &AstStatement) -> ParseResult<()> {
        match stmt {
            AstStatement::Let { name, value, span } => {
                // The value stays on the stack and becomes the local's slot
                self.compile_expr(value)?;
                self.declare_local(name, *span)?;
            }

            AstStatement::Assign { target, value, .. } => self.compile_assign(target, value)?,

            AstStatement::Function {
                name,
                params,
                body,
                span,
            } => self.compile_function(name, params, body, *span)?,

            AstStatement::Return { value, span } => {
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.emit(Opcode::PushNull),
                }
                if self.function.is_some() {
                    self.emit(Opcode::Return);
                } else {
                    // Only the chunk-root bindings made so far outlive the chunk
                    let bound = self.root.locals.iter().filter(|local| local.depth == 0).count();
                    let bound = count_operand(bound, "chunk-root locals", *span)?;
                    self.emit_u16(Opcode::ReturnChunk, bound);
                }
            }

            AstStatement::If {
                condition,
                then_branch,
                else_branch,
                span,
            } => {
                self.compile_expr(condition)?;
                let to_else = self.emit_jump(Opcode::JumpIfFalse);
                self.compile_block(then_branch)?;

                match else_branch {
                    Some(else_branch) => {
                        let to_end = self.emit_jump(Opcode::Jump);
                        self.patch_jump(to_else, *span)?;
                        self.compile_block(else_branch)?;
                        self.patch_jump(to_end, *span)?;
                    }
                    None => self.patch_jump(to_else, *span)?,
                }
            }

            AstStatement::While {
                condition,
                body,
                span,
            } => {
                let start = self.bytecode.len();
                self.compile_expr(condition)?;
                let exit = self.emit_jump(Opcode::JumpIfFalse);
                self.compile_block(body)?;
                self.emit_loop(start, *span)?;
                self.patch_jump(exit, *span)?;
            }

            AstStatement::Try {
                body,
                catch_name,
                catch_body,
                span,
            } => {
                let to_catch = self.emit_jump(Opcode::Try);
                self.compile_block(body)?;
                self.emit(Opcode::PopTry);
                let to_end = self.emit_jump(Opcode::Jump);

                // The handler leaves the caught value on top of the stack
                self.patch_jump(to_catch, *span)?;
                self.begin_scope();
                match catch_name {
                    Some(name) => self.declare_local(name, *span)?,
                    None => self.emit(Opcode::Pop),
                }
                for stmt in catch_body {
                    self.compile_stmt(stmt)?;
                }
                self.end_scope();
                self.patch_jump(to_end, *span)?;
            }

            AstStatement::Throw { value, .. } => {
                self.compile_expr(value)?;
                self.emit(Opcode::Throw);
            }

            AstStatement::Expr { expr, .. } => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Pop);
            }
        }

        Ok(())
    }

    /// `name := value` or `name[k1][k2] := value`
    ///
    /// A nested target rebuilds each container on the way back out: the
    /// prefixes and keys are pushed, then the value, then one SetItem per
    /// step, and finally the outermost container is stored into the variable.
    fn compile_assign(&mut self, target: &AssignTarget, value: &AstExpr) -> ParseResult<()> {
        let (store, slot) = match self.resolve(&target.name) {
            Variable::Local(slot) => (Opcode::SetLocal, slot),
            Variable::Root(slot) => (Opcode::SetRootLocal, slot),
            Variable::Global => {
                return Err(ParseError::with_kind(
                    ErrorKind::Resolution,
                    format!("Cannot assign to undeclared variable '{}'", target.name),
                    target.span,
                )
                .with_suggestion(format!("Declare it first with 'let {} := ...'", target.name))
                .boxed());
            }
        };

        let root = AstExpr::Ident {
            name: target.name.clone(),
            span: target.span,
        };
        if let Some((last, prefix)) = target.path.split_last() {
            self.compile_expr(&root)?;
            for (i, key) in prefix.iter().enumerate() {
                self.compile_expr(key)?;
                // Load the container at this step on top of its key
                self.compile_expr(&root)?;
                for step in &prefix[..=i] {
                    self.compile_expr(step)?;
                    self.emit(Opcode::GetItem);
                }
            }
            self.compile_expr(last)?;
        }
        self.compile_expr(value)?;
        for _ in &target.path {
            self.emit(Opcode::SetItem);
        }

        self.emit_u16(store, slot);
        Ok(())
    }

    /// Inline function declaration: DeclareFn header, then the body
    fn compile_function(
        &mut self,
        name: &str,
        params: &[String],
        body: &[AstStatement],
        span: Span,
    ) -> ParseResult<()> {
        if params.len() > u8::MAX as usize {
            return Err(too_large(
                format!("Function '{}' has too many parameters (max 255)", name),
                span,
            ));
        }

        self.emit_with_string(Opcode::DeclareFn, name);
        self.bytecode.push(params.len() as u8);
        let length_operand = self.bytecode.len();
        self.bytecode.extend_from_slice(&0u32.to_le_bytes());
        let body_start = self.bytecode.len();

        let enclosing = self.function.replace(Scope::default());
        for param in params {
            self.declare_local(param, span)?;
        }
        let compiled = body
            .iter()
            .try_for_each(|stmt| self.compile_stmt(stmt));
        self.function = enclosing;
        compiled?;

        // Falling off the end returns null
        self.emit(Opcode::PushNull);
        self.emit(Opcode::Return);

        let body_len = u32::try_from(self.bytecode.len() - body_start)
            .map_err(|_| too_large(format!("Function '{}' is too large", name), span))?;
        self.bytecode[length_operand..length_operand + 4].copy_from_slice(&body_len.to_le_bytes());
        Ok(())
    }
}

fn too_large(message: String, span: Span) -> Box<ParseError> {
    ParseError::with_kind(ErrorKind::TooLarge, message, span).boxed()
}

fn count_operand(count: usize, what: &str, span: Span) -> ParseResult<u16> {
    u16::try_from(count).map_err(|_| too_large(format!("Too many {} ({})", what, count), span))
}
