//! Lexer for the REPL language
//!
//! Converts source text into a stream of tokens with position tracking.

use std::fmt;

/// Position in source code (line and column, both 1-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Position {
            line,
            column,
            offset,
        }
    }

    pub fn start() -> Self {
        Position {
            line: 1,
            column: 1,
            offset: 0,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Span represents a range in source code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Span { start, end }
    }

    pub fn single(pos: Position) -> Self {
        Span {
            start: pos,
            end: pos,
        }
    }

    /// Span covering both `self` and `other`
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start,
            end: other.end,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start.line == self.end.line {
            write!(
                f,
                "{}:{}-{}",
                self.start.line, self.start.column, self.end.column
            )
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Token kinds of the REPL language
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Int(i64),
    Float(f64),
    String(String),
    True,
    False,
    Null,

    Ident(String),

    // Keywords
    Let,
    Fun,
    Return,
    If,
    Else,
    While,
    Try,
    Catch,
    Throw,

    // Operators
    Plus,    // +
    Minus,   // -
    Star,    // *
    Slash,   // /
    Percent, // %

    // Comparison
    Lt,    // <
    Gt,    // >
    LtEq,  // <=
    GtEq,  // >=
    EqEq,  // ==
    NotEq, // !=

    // Logical, symbolic or spelled out
    And, // && and
    Or,  // || or
    Not, // ! not

    // Assignment
    Assign, // :=
    Eq,     // =, only ever an error

    // Delimiters
    LParen,   // (
    RParen,   // )
    LBrace,   // {
    RBrace,   // }
    LBracket, // [
    RBracket, // ]

    // Punctuation
    Colon, // :
    Semi,  // ;
    Comma, // ,
    Dot,   // .

    /// Something the lexer could not make sense of
    Invalid(String),

    // End of file
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Int(n) => write!(f, "integer '{}'", n),
            TokenKind::Float(n) => write!(f, "float '{}'", n),
            TokenKind::String(s) => write!(f, "string \"{}\"", s),
            TokenKind::True => write!(f, "'true'"),
            TokenKind::False => write!(f, "'false'"),
            TokenKind::Null => write!(f, "'null'"),
            TokenKind::Ident(s) => write!(f, "identifier '{}'", s),
            TokenKind::Let => write!(f, "'let'"),
            TokenKind::Fun => write!(f, "'fun'"),
            TokenKind::Return => write!(f, "'return'"),
            TokenKind::If => write!(f, "'if'"),
            TokenKind::Else => write!(f, "'else'"),
            TokenKind::While => write!(f, "'while'"),
            TokenKind::Try => write!(f, "'try'"),
            TokenKind::Catch => write!(f, "'catch'"),
            TokenKind::Throw => write!(f, "'throw'"),
            TokenKind::Plus => write!(f, "'+'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::Star => write!(f, "'*'"),
            TokenKind::Slash => write!(f, "'/'"),
            TokenKind::Percent => write!(f, "'%'"),
            TokenKind::Lt => write!(f, "'<'"),
            TokenKind::Gt => write!(f, "'>'"),
            TokenKind::LtEq => write!(f, "'<='"),
            TokenKind::GtEq => write!(f, "'>='"),
            TokenKind::EqEq => write!(f, "'=='"),
            TokenKind::NotEq => write!(f, "'!='"),
            TokenKind::And => write!(f, "'and'"),
            TokenKind::Or => write!(f, "'or'"),
            TokenKind::Not => write!(f, "'not'"),
            TokenKind::Assign => write!(f, "':='"),
            TokenKind::Eq => write!(f, "'='"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::LBrace => write!(f, "'{{'"),
            TokenKind::RBrace => write!(f, "'}}'"),
            TokenKind::LBracket => write!(f, "'['"),
            TokenKind::RBracket => write!(f, "']'"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::Semi => write!(f, "';'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Dot => write!(f, "'.'"),
            TokenKind::Invalid(s) => write!(f, "'{}'", s),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

/// A token with its kind and source location
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Token { kind, span }
    }
}

/// The lexer tokenizes REPL source code
pub struct Lexer<'a> {
    source: &'a str,
    chars: std::str::Chars<'a>,
    current: Option<char>,
    position: Position,
    token_start: Position,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source
    pub fn new(source: &'a str) -> Self {
        let mut chars = source.chars();
        let current = chars.next();
        Lexer {
            source,
            chars,
            current,
            position: Position::start(),
            token_start: Position::start(),
        }
    }

    /// Get the source code (useful for error reporting)
    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Get the next token
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();
        self.token_start = self.position;

        let Some(ch) = self.current else {
            return self.make_token(TokenKind::Eof);
        };

        match ch {
            // Single-character tokens
            '(' => self.single_char_token(TokenKind::LParen),
            ')' => self.single_char_token(TokenKind::RParen),
            '{' => self.single_char_token(TokenKind::LBrace),
            '}' => self.single_char_token(TokenKind::RBrace),
            '[' => self.single_char_token(TokenKind::LBracket),
            ']' => self.single_char_token(TokenKind::RBracket),
            ';' => self.single_char_token(TokenKind::Semi),
            ',' => self.single_char_token(TokenKind::Comma),
            '.' => self.single_char_token(TokenKind::Dot),
            '%' => self.single_char_token(TokenKind::Percent),
            '+' => self.single_char_token(TokenKind::Plus),
            '-' => self.single_char_token(TokenKind::Minus),
            '*' => self.single_char_token(TokenKind::Star),
            '/' => self.single_char_token(TokenKind::Slash),

            // Operators that may take a second character
            ':' => self.one_or_two('=', TokenKind::Assign, TokenKind::Colon),
            '!' => self.one_or_two('=', TokenKind::NotEq, TokenKind::Not),
            '=' => self.one_or_two('=', TokenKind::EqEq, TokenKind::Eq),
            '<' => self.one_or_two('=', TokenKind::LtEq, TokenKind::Lt),
            '>' => self.one_or_two('=', TokenKind::GtEq, TokenKind::Gt),
            '&' => self.one_or_two('&', TokenKind::And, TokenKind::Invalid("&".to_string())),
            '|' => self.one_or_two('|', TokenKind::Or, TokenKind::Invalid("|".to_string())),

            // String literals
            '"' | '\'' => self.lex_string(ch),

            // Numbers
            '0'..='9' => self.lex_number(),

            // Identifiers and keywords
            c if c.is_alphabetic() || c == '_' => self.lex_ident(),

            // Unknown character
            _ => {
                self.advance();
                self.make_token(TokenKind::Invalid(ch.to_string()))
            }
        }
    }

    /// Advance to the next character
    fn advance(&mut self) {
        if let Some(ch) = self.current {
            if ch == '\n' {
                self.position.line += 1;
                self.position.column = 1;
            } else {
                self.position.column += 1;
            }
            self.position.offset += ch.len_utf8();
        }
        self.current = self.chars.next();
    }

    /// Peek at the next character without advancing
    fn peek(&self) -> Option<char> {
        self.chars.clone().next()
    }

    /// Skip whitespace and comments
    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.current {
                Some(c) if c.is_whitespace() => self.advance(),
                Some('#') => self.skip_line(),
                Some('/') if self.peek() == Some('/') => self.skip_line(),
                Some('/') if self.peek() == Some('*') => {
                    // Block comment
                    self.advance(); // /
                    self.advance(); // *
                    while self.current.is_some() {
                        if self.current == Some('*') && self.peek() == Some('/') {
                            self.advance(); // *
                            self.advance(); // /
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn skip_line(&mut self) {
        while self.current.is_some() && self.current != Some('\n') {
            self.advance();
        }
    }

    /// Create a token from the current token_start to current position
    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, Span::new(self.token_start, self.position))
    }

    /// Consume a single character and create a token
    fn single_char_token(&mut self, kind: TokenKind) -> Token {
        self.advance();
        self.make_token(kind)
    }

    fn one_or_two(&mut self, second: char, double: TokenKind, single: TokenKind) -> Token {
        self.advance();
        if self.current == Some(second) {
            self.advance();
            self.make_token(double)
        } else {
            self.make_token(single)
        }
    }

    /// Lex a string literal
    fn lex_string(&mut self, quote: char) -> Token {
        self.advance(); // consume opening quote
        let mut value = String::new();

        loop {
            match self.current {
                None => {
                    return self.make_token(TokenKind::Invalid(format!("unterminated string {}{}", quote, value)));
                }
                Some(c) if c == quote => {
                    self.advance();
                    return self.make_token(TokenKind::String(value));
                }
                Some('\\') => {
                    self.advance();
                    match self.current {
                        Some('n') => value.push('\n'),
                        Some('r') => value.push('\r'),
                        Some('t') => value.push('\t'),
                        Some(c) => value.push(c), // \\ \' \" and unknown escapes keep the char
                        None => continue,
                    }
                    self.advance();
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
    }

    fn take_digits(&mut self, value: &mut String) {
        while let Some(c @ '0'..='9') = self.current {
            value.push(c);
            self.advance();
        }
    }

    /// Lex a number (integer or float)
    fn lex_number(&mut self) -> Token {
        let mut value = String::new();
        let mut is_float = false;

        // Integer part
        self.take_digits(&mut value);

        // Decimal point
        if self.current == Some('.') && matches!(self.peek(), Some('0'..='9')) {
            is_float = true;
            value.push('.');
            self.advance();
            self.take_digits(&mut value);
        }

        // Exponent
        if let Some(e @ ('e' | 'E')) = self.current {
            is_float = true;
            value.push(e);
            self.advance();

            if let Some(sign @ ('+' | '-')) = self.current {
                value.push(sign);
                self.advance();
            }
            self.take_digits(&mut value);
        }

        if !is_float {
            if let Ok(num) = value.parse::<i64>() {
                return self.make_token(TokenKind::Int(num));
            }
        }

        // Integers too large for i64 fall back to floats
        match value.parse::<f64>() {
            Ok(num) => self.make_token(TokenKind::Float(num)),
            Err(_) => self.make_token(TokenKind::Invalid(value)),
        }
    }

    /// Lex an identifier or keyword
    fn lex_ident(&mut self) -> Token {
        let mut value = String::new();

        while let Some(ch) = self.current {
            if ch.is_alphanumeric() || ch == '_' {
                value.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let kind = match value.as_str() {
            "let" => TokenKind::Let,
            "fun" => TokenKind::Fun,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "try" => TokenKind::Try,
            "catch" => TokenKind::Catch,
            "throw" => TokenKind::Throw,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Ident(value),
        };

        self.make_token(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token();
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        tokens
    }

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind.clone()).collect()
    }

    fn ident(name: &str) -> TokenKind {
        TokenKind::Ident(name.to_string())
    }

    #[test]
    fn test_empty() {
        let tokens = lex_all("   \t\n\r\n  ");
        assert_eq!(kinds(&tokens), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_punctuation() {
        let tokens = lex_all("(){}[];:,. :=");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::LBracket,
                TokenKind::RBracket,
                TokenKind::Semi,
                TokenKind::Colon,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Assign,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_operators() {
        let tokens = lex_all("+ - * / % ! && || == != < > <= >= =");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::Not,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::Eq,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_keywords() {
        let tokens = lex_all("let fun return if else while try catch throw and or not true false null");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Let,
                TokenKind::Fun,
                TokenKind::Return,
                TokenKind::If,
                TokenKind::Else,
                TokenKind::While,
                TokenKind::Try,
                TokenKind::Catch,
                TokenKind::Throw,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Not,
                TokenKind::True,
                TokenKind::False,
                TokenKind::Null,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let tokens = lex_all("0 42 3.15 1.5e10 1e-5 99999999999999999999");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Int(0),
                TokenKind::Int(42),
                TokenKind::Float(3.15),
                TokenKind::Float(1.5e10),
                TokenKind::Float(1e-5),
                TokenKind::Float(1e20),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_strings() {
        let tokens = lex_all(r#""hello\nworld" 'it\'s' "tab\there""#);
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::String("hello\nworld".to_string()),
                TokenKind::String("it's".to_string()),
                TokenKind::String("tab\there".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let tokens = lex_all("'abc");
        assert!(matches!(tokens[0].kind, TokenKind::Invalid(_)));
    }

    #[test]
    fn test_comments() {
        let tokens = lex_all("foo # hash comment\nbar // slash comment\n/* block\n */ baz");
        assert_eq!(
            kinds(&tokens),
            vec![ident("foo"), ident("bar"), ident("baz"), TokenKind::Eof]
        );
    }

    #[test]
    fn test_position_tracking() {
        let mut lexer = Lexer::new("foo\n  bar");

        let tok1 = lexer.next_token();
        assert_eq!(tok1.kind, ident("foo"));
        assert_eq!(tok1.span.start.line, 1);
        assert_eq!(tok1.span.start.column, 1);

        let tok2 = lexer.next_token();
        assert_eq!(tok2.kind, ident("bar"));
        assert_eq!(tok2.span.start.line, 2);
        assert_eq!(tok2.span.start.column, 3);
        assert_eq!(tok2.span.start.offset, 6);
    }

    #[test]
    fn test_let_statement() {
        let tokens = lex_all("let total := items[0].price * 2");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Let,
                ident("total"),
                TokenKind::Assign,
                ident("items"),
                TokenKind::LBracket,
                TokenKind::Int(0),
                TokenKind::RBracket,
                TokenKind::Dot,
                ident("price"),
                TokenKind::Star,
                TokenKind::Int(2),
                TokenKind::Eof
            ]
        );
    }
}
