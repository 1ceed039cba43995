//! Error types for the parser and code generator

use super::lexer::{Span, Token, TokenKind};
use crate::error::CompileError;
use std::fmt;

/// Result type for parser operations
pub type ParseResult<T> = Result<T, Box<ParseError>>;

/// Error kind for categorization and better messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnexpectedToken,
    UnexpectedEof,
    InvalidToken,
    InvalidAssignment,
    InvalidExpression,
    InvalidStatement,
    /// A name used in a position that needs a variable binding
    Resolution,
    /// Code generation limits (jump distance, local count)
    TooLarge,
    Other,
}

/// Parse error with location information and helpful context
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl ParseError {
    /// Create an "expected token" error
    pub fn expected(expected: TokenKind, found: &Token) -> Self {
        let message = format!("Expected {}, found {}", expected, found.kind);
        let suggestion = Self::suggest_for_expected(&expected, &found.kind);

        ParseError {
            kind: if found.kind == TokenKind::Eof {
                ErrorKind::UnexpectedEof
            } else {
                ErrorKind::UnexpectedToken
            },
            message,
            span: found.span,
            suggestion,
            source: None,
        }
    }

    /// Create an error with a specific kind
    pub fn with_kind(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        ParseError {
            kind,
            message: message.into(),
            span,
            suggestion: None,
            source: None,
        }
    }

    /// Add a suggestion to the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add source code reference for better error display
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Convert into a boxed error for ParseResult
    pub fn boxed(self) -> Box<Self> {
        Box::new(self)
    }

    /// Suggest fixes for common "expected token" errors
    fn suggest_for_expected(expected: &TokenKind, found: &TokenKind) -> Option<String> {
        match (expected, found) {
            (_, TokenKind::Eq) => Some("Use ':=' for assignment and '==' for comparison".to_string()),
            (TokenKind::Assign, _) => Some("Bindings are declared with 'let name := value'".to_string()),
            (TokenKind::RBrace, TokenKind::Eof) => {
                Some("Add a closing brace '}' to match the opening brace".to_string())
            }
            (TokenKind::RParen, TokenKind::Eof) => {
                Some("Add a closing parenthesis ')' to match the opening parenthesis".to_string())
            }
            (TokenKind::RBracket, TokenKind::Eof) => {
                Some("Add a closing bracket ']' to match the opening bracket".to_string())
            }
            _ => None,
        }
    }

    /// Render the error with the offending source line and a caret underneath
    pub fn render(&self) -> String {
        let mut output = format!(
            "{} at {}:{}",
            self.message, self.span.start.line, self.span.start.column
        );

        if let Some(line) = self
            .source
            .as_deref()
            .and_then(|source| source.lines().nth(self.span.start.line.saturating_sub(1)))
        {
            let line_num = self.span.start.line;
            let width = line_num.to_string().len();

            let start_col = self.span.start.column.saturating_sub(1);
            let end_col = if self.span.start.line == self.span.end.line {
                self.span.end.column.saturating_sub(1)
            } else {
                line.chars().count()
            };
            let indicator_len = end_col.saturating_sub(start_col).max(1);

            output.push_str(&format!("\n{} | {}", line_num, line));
            output.push_str(&format!(
                "\n{:width$} | {}{}",
                "",
                " ".repeat(start_col),
                "^".repeat(indicator_len),
                width = width
            ));
        }

        if let Some(suggestion) = &self.suggestion {
            output.push_str(&format!("\nhelp: {}", suggestion));
        }

        output
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse error at {}: {}", self.span, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n  help: {}", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

impl From<Box<ParseError>> for CompileError {
    fn from(err: Box<ParseError>) -> Self {
        CompileError::Syntax(err.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::lexer::Position;

    fn span(line: usize, start: usize, end: usize) -> Span {
        Span::new(Position::new(line, start, start - 1), Position::new(line, end, end - 1))
    }

    #[test]
    fn test_expected_token_error() {
        let token = Token::new(TokenKind::Ident("test".to_string()), span(1, 1, 5));
        let err = ParseError::expected(TokenKind::RParen, &token);

        assert_eq!(err.kind, ErrorKind::UnexpectedToken);
        assert_eq!(err.message, "Expected ')', found identifier 'test'");
        assert!(err.suggestion.is_none());
    }

    #[test]
    fn test_expected_at_eof() {
        let token = Token::new(TokenKind::Eof, span(10, 1, 1));
        let err = ParseError::expected(TokenKind::RBrace, &token);

        assert_eq!(err.kind, ErrorKind::UnexpectedEof);
        assert!(err.suggestion.unwrap().contains("closing brace"));
    }

    #[test]
    fn test_single_equals_suggests_walrus() {
        let token = Token::new(TokenKind::Eq, span(1, 7, 8));
        let err = ParseError::expected(TokenKind::Assign, &token);
        assert!(err.suggestion.unwrap().contains(":="));
    }

    #[test]
    fn test_render_with_caret() {
        let err = ParseError::with_kind(ErrorKind::InvalidExpression, "Unexpected '*'", span(2, 5, 6))
            .with_source("let a := 1\nlet *")
            .with_suggestion("Remove the '*'");

        assert_eq!(
            err.render(),
            "Unexpected '*' at 2:5\n2 | let *\n  |     ^\nhelp: Remove the '*'"
        );
    }

    #[test]
    fn test_render_without_source() {
        let err = ParseError::with_kind(ErrorKind::Other, "Oops", span(1, 3, 4));
        assert_eq!(err.render(), "Oops at 1:3");
    }

    #[test]
    fn test_into_compile_error() {
        let err = ParseError::with_kind(ErrorKind::Other, "Oops", span(1, 1, 2)).boxed();
        assert_eq!(CompileError::from(err), CompileError::Syntax("Oops at 1:1".to_string()));
    }

    #[test]
    fn test_display() {
        let err = ParseError::with_kind(ErrorKind::Other, "Test error message", span(2, 5, 10))
            .with_suggestion("Try this fix");

        let display_output = format!("{}", err);
        assert!(display_output.contains("Parse error at 2:5-10"));
        assert!(display_output.contains("help: Try this fix"));
    }
}
