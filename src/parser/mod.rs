//! Recursive descent parser for the REPL language
//!
//! Converts one chunk of source text into an AST and then into position
//! independent bytecode, resolving names against the locals of earlier chunks.

pub mod ast;
pub mod compiler;
pub mod error;
pub mod lexer;

#[cfg(test)]
mod tests;

pub use ast::*;
pub use compiler::{CompiledCode, Compiler, Local};
pub use error::{ErrorKind, ParseError, ParseResult};
pub use lexer::{Lexer, Span, Token, TokenKind};

/// Parse a chunk of source into an AST
pub fn parse(source: &str) -> ParseResult<AstProgram> {
    Parser::new(Lexer::new(source))
        .parse_program()
        .map_err(|e| (*e).with_source(source).boxed())
}

/// Parse and compile a chunk, given the locals declared by earlier chunks
pub fn compile(source: &str, context: &[Local]) -> ParseResult<CompiledCode> {
    let ast = parse(source)?;
    Compiler::new(context)
        .compile(&ast)
        .map_err(|e| (*e).with_source(source).boxed())
}

/// The main parser struct
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    /// Create a new parser from a lexer
    pub fn new(mut lexer: Lexer<'a>) -> Self {
        let current = lexer.next_token();
        Parser { lexer, current }
    }

    /// Parse every statement up to the end of input
    pub fn parse_program(&mut self) -> ParseResult<AstProgram> {
        let start = self.current.span;
        let statements = self.parse_statements_until(&TokenKind::Eof)?;
        let end = statements.last().map(AstStatement::span).unwrap_or(start);

        Ok(AstProgram {
            statements,
            span: start.to(end),
        })
    }

    /// Statements, each optionally followed by ';', up to (not including) `end`
    fn parse_statements_until(&mut self, end: &TokenKind) -> ParseResult<Vec<AstStatement>> {
        let mut statements = Vec::new();
        loop {
            while self.check(&TokenKind::Semi) {
                self.advance();
            }
            if self.check(end) || self.check(&TokenKind::Eof) {
                return Ok(statements);
            }
            statements.push(self.parse_statement()?);
        }
    }

    /// Parse `{ statements }`
    fn parse_block(&mut self) -> ParseResult<(Vec<AstStatement>, Span)> {
        let open = self.expect(TokenKind::LBrace)?;
        let body = self.parse_statements_until(&TokenKind::RBrace)?;
        let close = self.expect(TokenKind::RBrace)?;
        Ok((body, open.span.to(close.span)))
    }

    /// Parse a statement
    pub fn parse_statement(&mut self) -> ParseResult<AstStatement> {
        match &self.current.kind {
            TokenKind::Let => self.parse_let(),
            TokenKind::Fun => self.parse_function(),
            TokenKind::Return => self.parse_return(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Try => self.parse_try(),
            TokenKind::Throw => {
                let start = self.advance();
                let value = self.parse_expr()?;
                Ok(AstStatement::Throw {
                    span: start.span.to(value.span()),
                    value,
                })
            }
            _ => self.parse_expr_statement(),
        }
    }

    /// let name := value
    fn parse_let(&mut self) -> ParseResult<AstStatement> {
        let start = self.advance();
        let (name, _) = self.expect_ident("variable name after 'let'")?;
        self.expect(TokenKind::Assign)?;
        let value = self.parse_expr()?;

        Ok(AstStatement::Let {
            name,
            span: start.span.to(value.span()),
            value,
        })
    }

    /// fun name(a, b) { ... }
    fn parse_function(&mut self) -> ParseResult<AstStatement> {
        let start = self.advance();
        let (name, _) = self.expect_ident("function name after 'fun'")?;

        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let (param, span) = self.expect_ident("parameter name")?;
                if params.contains(&param) {
                    return Err(ParseError::with_kind(
                        ErrorKind::InvalidStatement,
                        format!("Duplicate parameter '{}'", param),
                        span,
                    )
                    .boxed());
                }
                params.push(param);
                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance(); // consume comma
            }
        }
        self.expect(TokenKind::RParen)?;

        let (body, body_span) = self.parse_block()?;
        Ok(AstStatement::Function {
            name,
            params,
            body,
            span: start.span.to(body_span),
        })
    }

    fn parse_return(&mut self) -> ParseResult<AstStatement> {
        let start = self.advance();
        let ends_statement = matches!(
            self.current.kind,
            TokenKind::Semi | TokenKind::RBrace | TokenKind::Eof
        );
        if ends_statement {
            return Ok(AstStatement::Return {
                value: None,
                span: start.span,
            });
        }

        let value = self.parse_expr()?;
        Ok(AstStatement::Return {
            span: start.span.to(value.span()),
            value: Some(value),
        })
    }

    /// A braced block, or a single statement standing in for one
    fn parse_body(&mut self) -> ParseResult<(Vec<AstStatement>, Span)> {
        if self.check(&TokenKind::LBrace) {
            self.parse_block()
        } else {
            let statement = self.parse_statement()?;
            let span = statement.span();
            Ok((vec![statement], span))
        }
    }

    fn parse_condition(&mut self) -> ParseResult<AstExpr> {
        self.expect(TokenKind::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        Ok(condition)
    }

    /// if (cond) { ... } else if (cond) { ... } else { ... }
    fn parse_if(&mut self) -> ParseResult<AstStatement> {
        let start = self.advance();
        let condition = self.parse_condition()?;
        let (then_branch, mut span) = self.parse_body()?;

        let else_branch = if self.check(&TokenKind::Else) {
            self.advance();
            let (branch, else_span) = self.parse_body()?;
            span = else_span;
            Some(branch)
        } else {
            None
        };

        Ok(AstStatement::If {
            condition,
            then_branch,
            else_branch,
            span: start.span.to(span),
        })
    }

    fn parse_while(&mut self) -> ParseResult<AstStatement> {
        let start = self.advance();
        let condition = self.parse_condition()?;
        let (body, span) = self.parse_body()?;
        Ok(AstStatement::While {
            condition,
            body,
            span: start.span.to(span),
        })
    }

    /// try { ... } catch (e) { ... }, the catch binding being optional
    fn parse_try(&mut self) -> ParseResult<AstStatement> {
        let start = self.advance();
        let (body, _) = self.parse_block()?;
        self.expect(TokenKind::Catch)?;

        let catch_name = if self.check(&TokenKind::LParen) {
            self.advance();
            let (name, _) = self.expect_ident("name for the caught error")?;
            self.expect(TokenKind::RParen)?;
            Some(name)
        } else {
            None
        };

        let (catch_body, span) = self.parse_block()?;
        Ok(AstStatement::Try {
            body,
            catch_name,
            catch_body,
            span: start.span.to(span),
        })
    }

    /// Expression statement, or an assignment when `:=` follows
    fn parse_expr_statement(&mut self) -> ParseResult<AstStatement> {
        let expr = self.parse_expr()?;

        match &self.current.kind {
            TokenKind::Assign => {
                self.advance();
                let target = Self::assign_target(expr)?;
                let value = self.parse_expr()?;
                Ok(AstStatement::Assign {
                    span: target.span.to(value.span()),
                    target,
                    value,
                })
            }
            TokenKind::Eq => Err(ParseError::with_kind(
                ErrorKind::InvalidAssignment,
                "Unexpected '=' after expression",
                self.current.span,
            )
            .with_suggestion("Use ':=' for assignment and '==' for comparison")
            .boxed()),
            _ => Ok(AstStatement::Expr {
                span: expr.span(),
                expr,
            }),
        }
    }

    /// Turn `a`, `a[i]`, `a.b[c]` ... into an assignment target
    fn assign_target(expr: AstExpr) -> ParseResult<AssignTarget> {
        let span = expr.span();
        let mut path = Vec::new();
        let mut current = expr;

        loop {
            current = match current {
                AstExpr::Ident { name, .. } => {
                    path.reverse();
                    return Ok(AssignTarget { name, path, span });
                }
                AstExpr::IndexAccess { object, index, .. } => {
                    path.push(*index);
                    *object
                }
                AstExpr::FieldAccess {
                    object,
                    field,
                    span: field_span,
                } => {
                    path.push(AstExpr::String {
                        value: field,
                        span: field_span,
                    });
                    *object
                }
                other => {
                    return Err(ParseError::with_kind(
                        ErrorKind::InvalidAssignment,
                        "Invalid assignment target",
                        other.span(),
                    )
                    .with_suggestion("Only variables and their fields or indices can be assigned")
                    .boxed());
                }
            };
        }
    }

    /// Parse an expression
    pub fn parse_expr(&mut self) -> ParseResult<AstExpr> {
        self.parse_expr_with_precedence(0)
    }

    /// Parse expression with operator precedence climbing
    fn parse_expr_with_precedence(&mut self, min_precedence: u8) -> ParseResult<AstExpr> {
        let mut left = self.parse_unary_expr()?;

        while let Some((op, precedence)) = self.current_binary_op() {
            if precedence < min_precedence {
                break;
            }

            self.advance(); // consume operator
            let right = self.parse_expr_with_precedence(precedence + 1)?;
            let span = left.span().to(right.span());
            left = AstExpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }

        Ok(left)
    }

    /// Parse unary expression (not, -, or postfix)
    fn parse_unary_expr(&mut self) -> ParseResult<AstExpr> {
        let op = match &self.current.kind {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => {
                let primary = self.parse_primary_expr()?;
                return self.parse_postfix_expr(primary);
            }
        };

        let start = self.advance();
        let expr = self.parse_unary_expr()?;
        Ok(AstExpr::Unary {
            op,
            span: start.span.to(expr.span()),
            expr: Box::new(expr),
        })
    }

    /// Parse primary expression (literals, identifiers, containers, parentheses)
    fn parse_primary_expr(&mut self) -> ParseResult<AstExpr> {
        let tok = self.advance();
        let span = tok.span;

        match tok.kind {
            TokenKind::Int(value) => Ok(AstExpr::Int { value, span }),
            TokenKind::Float(value) => Ok(AstExpr::Float { value, span }),
            TokenKind::String(value) => Ok(AstExpr::String { value, span }),
            TokenKind::True => Ok(AstExpr::Bool { value: true, span }),
            TokenKind::False => Ok(AstExpr::Bool { value: false, span }),
            TokenKind::Null => Ok(AstExpr::Null { span }),

            // Identifiers (could be variable or function call)
            TokenKind::Ident(name) => {
                if self.check(&TokenKind::LParen) {
                    self.parse_function_call(name, span)
                } else {
                    Ok(AstExpr::Ident { name, span })
                }
            }

            // Parenthesized expression
            TokenKind::LParen => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }

            TokenKind::LBracket => {
                let items = self.parse_comma_separated(&TokenKind::RBracket, Self::parse_expr)?;
                let close = self.expect(TokenKind::RBracket)?;
                Ok(AstExpr::Array {
                    items,
                    span: span.to(close.span),
                })
            }

            TokenKind::LBrace => {
                let entries = self.parse_comma_separated(&TokenKind::RBrace, Self::parse_dict_entry)?;
                let close = self.expect(TokenKind::RBrace)?;
                Ok(AstExpr::Dict {
                    entries,
                    span: span.to(close.span),
                })
            }

            TokenKind::Invalid(text) => Err(ParseError::with_kind(
                ErrorKind::InvalidToken,
                format!("Invalid token '{}'", text),
                span,
            )
            .boxed()),

            TokenKind::Eof => Err(ParseError::with_kind(
                ErrorKind::UnexpectedEof,
                "Expected expression, found end of input",
                span,
            )
            .boxed()),

            other => Err(ParseError::with_kind(
                ErrorKind::InvalidExpression,
                format!("Expected expression, found {}", other),
                span,
            )
            .boxed()),
        }
    }

    /// `key: value`, where a bare identifier key is taken as a string
    fn parse_dict_entry(&mut self) -> ParseResult<(AstExpr, AstExpr)> {
        let key = match &self.current.kind {
            TokenKind::Ident(name) => {
                let key = AstExpr::String {
                    value: name.clone(),
                    span: self.current.span,
                };
                self.advance();
                key
            }
            _ => self.parse_expr()?,
        };
        self.expect(TokenKind::Colon)?;
        let value = self.parse_expr()?;
        Ok((key, value))
    }

    /// Items separated by commas, allowing a trailing comma, up to `close`
    fn parse_comma_separated<T>(
        &mut self,
        close: &TokenKind,
        mut item: impl FnMut(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<Vec<T>> {
        let mut items = Vec::new();
        while !self.check(close) {
            items.push(item(self)?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance(); // consume comma
        }
        Ok(items)
    }

    /// Parse postfix operators (field access, indexing)
    fn parse_postfix_expr(&mut self, mut expr: AstExpr) -> ParseResult<AstExpr> {
        loop {
            match &self.current.kind {
                // Field access: expr.field
                TokenKind::Dot => {
                    self.advance();
                    let (field, field_span) = self.expect_ident("field name after '.'")?;
                    let span = expr.span().to(field_span);
                    expr = AstExpr::FieldAccess {
                        object: Box::new(expr),
                        field,
                        span,
                    };
                }

                // Index access: expr[index]
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    let close = self.expect(TokenKind::RBracket)?;
                    let span = expr.span().to(close.span);
                    expr = AstExpr::IndexAccess {
                        object: Box::new(expr),
                        index: Box::new(index),
                        span,
                    };
                }

                TokenKind::LParen => {
                    return Err(ParseError::with_kind(
                        ErrorKind::InvalidExpression,
                        "Only named functions can be called",
                        self.current.span,
                    )
                    .boxed());
                }

                _ => break,
            }
        }
        Ok(expr)
    }

    /// Parse function call (name already consumed)
    fn parse_function_call(&mut self, function: String, name_span: Span) -> ParseResult<AstExpr> {
        self.expect(TokenKind::LParen)?;
        let args = self.parse_comma_separated(&TokenKind::RParen, Self::parse_expr)?;
        let close = self.expect(TokenKind::RParen)?;

        Ok(AstExpr::Call {
            function,
            args,
            span: name_span.to(close.span),
        })
    }

    /// Get the current binary operator and its precedence
    fn current_binary_op(&self) -> Option<(BinaryOp, u8)> {
        let (op, prec) = match &self.current.kind {
            // Logical OR (lowest precedence)
            TokenKind::Or => (BinaryOp::Or, 1),
            // Logical AND
            TokenKind::And => (BinaryOp::And, 2),
            // Equality
            TokenKind::EqEq => (BinaryOp::Eq, 3),
            TokenKind::NotEq => (BinaryOp::NotEq, 3),
            // Comparison
            TokenKind::Lt => (BinaryOp::Lt, 4),
            TokenKind::Gt => (BinaryOp::Gt, 4),
            TokenKind::LtEq => (BinaryOp::LtEq, 4),
            TokenKind::GtEq => (BinaryOp::GtEq, 4),
            // Addition/Subtraction
            TokenKind::Plus => (BinaryOp::Add, 5),
            TokenKind::Minus => (BinaryOp::Sub, 5),
            // Multiplication/Division/Modulo (highest precedence)
            TokenKind::Star => (BinaryOp::Mul, 6),
            TokenKind::Slash => (BinaryOp::Div, 6),
            TokenKind::Percent => (BinaryOp::Mod, 6),
            _ => return None,
        };
        Some((op, prec))
    }

    /// Move to the next token, returning the one consumed
    fn advance(&mut self) -> Token {
        std::mem::replace(&mut self.current, self.lexer.next_token())
    }

    /// Check if current token matches a kind
    fn check(&self, kind: &TokenKind) -> bool {
        // Any identifier matches an Ident pattern
        match (kind, &self.current.kind) {
            (TokenKind::Ident(_), TokenKind::Ident(_)) => true,
            _ => &self.current.kind == kind,
        }
    }

    /// Expect a specific token kind and advance
    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(ParseError::expected(kind, &self.current).boxed())
        }
    }

    fn expect_ident(&mut self, what: &str) -> ParseResult<(String, Span)> {
        if let TokenKind::Ident(name) = &self.current.kind {
            let name = name.clone();
            let tok = self.advance();
            return Ok((name, tok.span));
        }
        Err(ParseError::with_kind(
            ErrorKind::UnexpectedToken,
            format!("Expected {}, found {}", what, self.current.kind),
            self.current.span,
        )
        .boxed())
    }
}
