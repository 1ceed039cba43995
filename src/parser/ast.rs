//! Abstract Syntax Tree for the REPL language

use super::lexer::Span;
use std::fmt;

/// One parsed chunk of source
#[derive(Debug, Clone)]
pub struct AstProgram {
    pub statements: Vec<AstStatement>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum AstStatement {
    /// let name := value
    Let {
        name: String,
        value: AstExpr,
        span: Span,
    },
    /// target := value
    Assign {
        target: AssignTarget,
        value: AstExpr,
        span: Span,
    },
    /// fun name(params) { body }
    Function {
        name: String,
        params: Vec<String>,
        body: Vec<AstStatement>,
        span: Span,
    },
    Return {
        value: Option<AstExpr>,
        span: Span,
    },
    If {
        condition: AstExpr,
        then_branch: Vec<AstStatement>,
        /// `else if` nests another If here
        else_branch: Option<Vec<AstStatement>>,
        span: Span,
    },
    While {
        condition: AstExpr,
        body: Vec<AstStatement>,
        span: Span,
    },
    Try {
        body: Vec<AstStatement>,
        catch_name: Option<String>,
        catch_body: Vec<AstStatement>,
        span: Span,
    },
    Throw {
        value: AstExpr,
        span: Span,
    },
    Expr {
        expr: AstExpr,
        span: Span,
    },
}

impl AstStatement {
    pub fn span(&self) -> Span {
        match self {
            AstStatement::Let { span, .. }
            | AstStatement::Assign { span, .. }
            | AstStatement::Function { span, .. }
            | AstStatement::Return { span, .. }
            | AstStatement::If { span, .. }
            | AstStatement::While { span, .. }
            | AstStatement::Try { span, .. }
            | AstStatement::Throw { span, .. }
            | AstStatement::Expr { span, .. } => *span,
        }
    }
}

/// Left-hand side of `:=`: a variable, optionally followed by `[key]` or
/// `.field` steps into nested containers
#[derive(Debug, Clone)]
pub struct AssignTarget {
    pub name: String,
    pub path: Vec<AstExpr>,
    pub span: Span,
}

/// Expressions
#[derive(Debug, Clone)]
pub enum AstExpr {
    // Literals
    Int {
        value: i64,
        span: Span,
    },
    Float {
        value: f64,
        span: Span,
    },
    String {
        value: String,
        span: Span,
    },
    Bool {
        value: bool,
        span: Span,
    },
    Null {
        span: Span,
    },

    // Containers
    Array {
        items: Vec<AstExpr>,
        span: Span,
    },
    Dict {
        entries: Vec<(AstExpr, AstExpr)>,
        span: Span,
    },

    // Identifiers
    Ident {
        name: String,
        span: Span,
    },

    // Binary operations
    Binary {
        op: BinaryOp,
        left: Box<AstExpr>,
        right: Box<AstExpr>,
        span: Span,
    },

    // Unary operations
    Unary {
        op: UnaryOp,
        expr: Box<AstExpr>,
        span: Span,
    },

    // Field access (obj.field)
    FieldAccess {
        object: Box<AstExpr>,
        field: String,
        span: Span,
    },

    // Index access (obj[index])
    IndexAccess {
        object: Box<AstExpr>,
        index: Box<AstExpr>,
        span: Span,
    },

    // Function call
    Call {
        function: String,
        args: Vec<AstExpr>,
        span: Span,
    },
}

impl AstExpr {
    pub fn span(&self) -> Span {
        match self {
            AstExpr::Int { span, .. }
            | AstExpr::Float { span, .. }
            | AstExpr::String { span, .. }
            | AstExpr::Bool { span, .. }
            | AstExpr::Null { span }
            | AstExpr::Array { span, .. }
            | AstExpr::Dict { span, .. }
            | AstExpr::Ident { span, .. }
            | AstExpr::Binary { span, .. }
            | AstExpr::Unary { span, .. }
            | AstExpr::FieldAccess { span, .. }
            | AstExpr::IndexAccess { span, .. }
            | AstExpr::Call { span, .. } => *span,
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Lt,
    Gt,
    LtEq,
    GtEq,
    Eq,
    NotEq,

    // Logical
    And,
    Or,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Sub => write!(f, "-"),
            BinaryOp::Mul => write!(f, "*"),
            BinaryOp::Div => write!(f, "/"),
            BinaryOp::Mod => write!(f, "%"),
            BinaryOp::Lt => write!(f, "<"),
            BinaryOp::Gt => write!(f, ">"),
            BinaryOp::LtEq => write!(f, "<="),
            BinaryOp::GtEq => write!(f, ">="),
            BinaryOp::Eq => write!(f, "=="),
            BinaryOp::NotEq => write!(f, "!="),
            BinaryOp::And => write!(f, "and"),
            BinaryOp::Or => write!(f, "or"),
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Not => write!(f, "not"),
            UnaryOp::Neg => write!(f, "-"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::lexer::Position;

    fn span_at(column: usize) -> Span {
        Span::single(Position::new(1, column, column - 1))
    }

    #[test]
    fn test_operator_display() {
        assert_eq!(BinaryOp::Add.to_string(), "+");
        assert_eq!(BinaryOp::LtEq.to_string(), "<=");
        assert_eq!(BinaryOp::And.to_string(), "and");
        assert_eq!(UnaryOp::Neg.to_string(), "-");
        assert_eq!(UnaryOp::Not.to_string(), "not");
    }

    #[test]
    fn test_spans() {
        let expr = AstExpr::Binary {
            op: BinaryOp::Add,
            left: Box::new(AstExpr::Int {
                value: 1,
                span: span_at(1),
            }),
            right: Box::new(AstExpr::Int {
                value: 2,
                span: span_at(5),
            }),
            span: span_at(1).to(span_at(5)),
        };
        assert_eq!(expr.span().start.column, 1);
        assert_eq!(expr.span().end.column, 5);

        let stmt = AstStatement::Expr {
            span: expr.span(),
            expr,
        };
        assert_eq!(stmt.span().end.column, 5);
    }
}
