use std::{
    collections::{BTreeMap, VecDeque},
    rc::Rc,
    str::CharIndices,
};

use itertools::{PeekNth, peek_nth};
use once_cell::sync::Lazy;
use strum::{EnumString, IntoStaticStr};

use crate::{
    diagnostics::{Diagnostic, DiagnosticKind},
    middle::primitive::IntegerKind,
};

use super::SourceFile;

#[derive(Debug)]
pub struct Lexer<'source> {
    source: &'source SourceFile,
    chars: PeekNth<CharIndices<'source>>,
    position: usize,
    line: u32,
    column: u32,
    peek_buffer: VecDeque<Token>,
    diagnostics: Vec<Diagnostic>,
    finished: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub value: TokenValue,
}

/// Decoded value of a literal token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValue {
    None,
    Integer {
        value: u64,
        suffix: Option<IntegerKind>,
    },
    Boolean(bool),
    Char(char),
    String(Rc<[u8]>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /* Words */
    Keyword(Keyword), // fn
    Identifier,       // main

    /* Literals */
    BooleanLiteral, // true
    CharLiteral,    // 'A'
    IntegerLiteral, // 1
    StringLiteral,  // "hello, world"

    /* Delimiters */
    OpenParen,    // (
    CloseParen,   // )
    OpenBracket,  // [
    CloseBracket, // ]
    OpenBrace,    // {
    CloseBrace,   // }
    Semicolon,    // ;
    Comma,        // ,

    /* Other */
    Colon,  // :
    Arrow,  // ->
    Dot,    // .
    DotDot, // ..

    /* Unary Ops */
    Bang,  // !
    Tilde, // ~

    /* Unary + Binary Ops */
    Asterisk,   // *
    Minus,      // -
    BitwiseAnd, // &

    /* Binary Ops */
    Plus,                 // +
    Divide,               // /
    Modulus,              // %
    LogicalAnd,           // &&
    LogicalOr,            // ||
    BitwiseXor,           // ^
    BitwiseOr,            // |
    ShiftLeft,            // <<
    ShiftRight,           // >>
    DoubleEquals,         // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=

    /* Assignment */
    Equals,           // =
    PlusEquals,       // +=
    MinusEquals,      // -=
    MultiplyEquals,   // *=
    DivideEquals,     // /=
    ModulusEquals,    // %=
    BitwiseXorEquals, // ^=
    BitwiseAndEquals, // &=
    BitwiseOrEquals,  // |=
    ShiftLeftEquals,  // <<=
    ShiftRightEquals, // >>=

    Eof,
}

impl TokenKind {
    pub fn is_assignment_operator(&self) -> bool {
        matches!(
            self,
            Self::Equals
                | Self::PlusEquals
                | Self::MinusEquals
                | Self::MultiplyEquals
                | Self::DivideEquals
                | Self::ModulusEquals
                | Self::BitwiseXorEquals
                | Self::BitwiseAndEquals
                | Self::BitwiseOrEquals
                | Self::ShiftLeftEquals
                | Self::ShiftRightEquals
        )
    }

    pub fn is_unary_operator(&self) -> bool {
        matches!(
            self,
            Self::Asterisk | Self::Bang | Self::Tilde | Self::Minus | Self::BitwiseAnd
        )
    }

    pub fn is_open_delimiter(&self) -> bool {
        matches!(self, Self::OpenParen | Self::OpenBracket | Self::OpenBrace)
    }

    pub fn is_close_delimiter(&self) -> bool {
        matches!(self, Self::CloseParen | Self::CloseBracket | Self::CloseBrace)
    }

    /// The close delimiter matching an open delimiter
    pub fn closing_delimiter(&self) -> Option<TokenKind> {
        match self {
            Self::OpenParen => Some(Self::CloseParen),
            Self::OpenBracket => Some(Self::CloseBracket),
            Self::OpenBrace => Some(Self::CloseBrace),
            _ => None,
        }
    }

    /// Source text of tokens that always look the same
    pub fn lexeme(&self) -> Option<&'static str> {
        Some(match self {
            Self::Keyword(keyword) => (*keyword).into(),
            Self::Identifier
            | Self::BooleanLiteral
            | Self::CharLiteral
            | Self::IntegerLiteral
            | Self::StringLiteral
            | Self::Eof => return None,
            Self::OpenParen => "(",
            Self::CloseParen => ")",
            Self::OpenBracket => "[",
            Self::CloseBracket => "]",
            Self::OpenBrace => "{",
            Self::CloseBrace => "}",
            Self::Semicolon => ";",
            Self::Comma => ",",
            Self::Colon => ":",
            Self::Arrow => "->",
            Self::Dot => ".",
            Self::DotDot => "..",
            Self::Bang => "!",
            Self::Tilde => "~",
            Self::Asterisk => "*",
            Self::Minus => "-",
            Self::BitwiseAnd => "&",
            Self::Plus => "+",
            Self::Divide => "/",
            Self::Modulus => "%",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
            Self::BitwiseXor => "^",
            Self::BitwiseOr => "|",
            Self::ShiftLeft => "<<",
            Self::ShiftRight => ">>",
            Self::DoubleEquals => "==",
            Self::NotEquals => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqualTo => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqualTo => ">=",
            Self::Equals => "=",
            Self::PlusEquals => "+=",
            Self::MinusEquals => "-=",
            Self::MultiplyEquals => "*=",
            Self::DivideEquals => "/=",
            Self::ModulusEquals => "%=",
            Self::BitwiseXorEquals => "^=",
            Self::BitwiseAndEquals => "&=",
            Self::BitwiseOrEquals => "|=",
            Self::ShiftLeftEquals => "<<=",
            Self::ShiftRightEquals => ">>=",
        })
    }
}

impl core::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.lexeme() {
            Some(lexeme) => write!(f, "`{lexeme}`"),
            None => f.write_str(match self {
                Self::Identifier => "identifier",
                Self::BooleanLiteral => "boolean literal",
                Self::CharLiteral => "char literal",
                Self::IntegerLiteral => "integer literal",
                Self::StringLiteral => "string literal",
                _ => "end of file",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Keyword {
    Fn,
    Struct,
    Global,
    Let,
    Mut,
    If,
    Else,
    While,
    For,
    Return,
    Break,
    Continue,
    As,
}

/// Table of multi char tokens, longest first so that `<<=` wins over `<<`
static COMPOUND_TOKENS: Lazy<Vec<(&'static str, TokenKind)>> = Lazy::new(|| {
    let mut tokens = vec![
        ("<<=", TokenKind::ShiftLeftEquals),
        (">>=", TokenKind::ShiftRightEquals),
        ("->", TokenKind::Arrow),
        ("..", TokenKind::DotDot),
        ("==", TokenKind::DoubleEquals),
        ("!=", TokenKind::NotEquals),
        ("<=", TokenKind::LessThanOrEqualTo),
        (">=", TokenKind::GreaterThanOrEqualTo),
        ("+=", TokenKind::PlusEquals),
        ("-=", TokenKind::MinusEquals),
        ("*=", TokenKind::MultiplyEquals),
        ("/=", TokenKind::DivideEquals),
        ("%=", TokenKind::ModulusEquals),
        ("&=", TokenKind::BitwiseAndEquals),
        ("|=", TokenKind::BitwiseOrEquals),
        ("^=", TokenKind::BitwiseXorEquals),
        ("<<", TokenKind::ShiftLeft),
        (">>", TokenKind::ShiftRight),
        ("&&", TokenKind::LogicalAnd),
        ("||", TokenKind::LogicalOr),
    ];
    tokens.sort_by_key(|(text, _)| std::cmp::Reverse(text.len()));
    tokens
});

/// Table of single char tokens (matched after longer sequences are checked for)
static SINGLE_TOKENS: Lazy<BTreeMap<char, TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        ('(', TokenKind::OpenParen),
        (')', TokenKind::CloseParen),
        ('[', TokenKind::OpenBracket),
        (']', TokenKind::CloseBracket),
        ('{', TokenKind::OpenBrace),
        ('}', TokenKind::CloseBrace),
        (';', TokenKind::Semicolon),
        (',', TokenKind::Comma),
        ('.', TokenKind::Dot),
        ('!', TokenKind::Bang),
        ('~', TokenKind::Tilde),
        (':', TokenKind::Colon),
        ('*', TokenKind::Asterisk),
        ('-', TokenKind::Minus),
        ('=', TokenKind::Equals),
        ('+', TokenKind::Plus),
        ('/', TokenKind::Divide),
        ('%', TokenKind::Modulus),
        ('^', TokenKind::BitwiseXor),
        ('&', TokenKind::BitwiseAnd),
        ('|', TokenKind::BitwiseOr),
        ('<', TokenKind::LessThan),
        ('>', TokenKind::GreaterThan),
    ])
});

/// A region of source text: byte offsets plus the 1-based line and column of
/// its first character
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// The smallest span covering both `self` and `other`
    pub fn to(self, other: Span) -> Span {
        let (first, last) = if self.start <= other.start {
            (self, other)
        } else {
            (other, self)
        };

        Span {
            end: first.end.max(last.end),
            ..first
        }
    }

    /// Zero-width span at the end of `self`
    pub fn shrink_to_end(self) -> Span {
        Span {
            start: self.end,
            ..self
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Copy)]
struct Mark {
    position: usize,
    line: u32,
    column: u32,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source SourceFile) -> Self {
        Self {
            source,
            chars: peek_nth(source.contents.char_indices()),
            position: 0,
            line: 1,
            column: 1,
            peek_buffer: VecDeque::new(),
            diagnostics: Vec::new(),
            finished: false,
        }
    }

    pub fn source(&self) -> &'source SourceFile {
        self.source
    }

    /// Diagnostics recorded since the last call
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn peek(&mut self) -> Option<&Token> {
        self.peek_nth(0)
    }

    pub fn peek_nth(&mut self, n: usize) -> Option<&Token> {
        while self.peek_buffer.len() <= n {
            let token = self.lex_token()?;
            self.peek_buffer.push_back(token);
        }

        self.peek_buffer.get(n)
    }

    fn peek_char(&mut self, n: usize) -> Option<char> {
        self.chars.peek_nth(n).map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let (index, c) = self.chars.next()?;

        self.position = index + c.len_utf8();

        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }

        Some(c)
    }

    fn mark(&self) -> Mark {
        Mark {
            position: self.position,
            line: self.line,
            column: self.column,
        }
    }

    fn span_from(&self, mark: Mark) -> Span {
        Span::new(mark.position, self.position, mark.line, mark.column)
    }

    fn error(&mut self, kind: DiagnosticKind, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(kind, span, message));
    }

    fn ignore_line(&mut self) {
        while let Some(c) = self.peek_char(0) {
            if c == '\n' {
                break;
            }

            self.bump();
        }
    }

    /// Skips a `/* */` comment. Comments nest, and a backslash in front of
    /// `/*` or `*/` keeps it from opening or closing one.
    fn skip_block_comment(&mut self) {
        let start = self.mark();
        let mut depth = 0usize;

        loop {
            match (self.peek_char(0), self.peek_char(1)) {
                (Some('\\'), Some('/')) if self.peek_char(2) == Some('*') => self.bump_n(3),
                (Some('\\'), Some('*')) if self.peek_char(2) == Some('/') => self.bump_n(3),
                (Some('/'), Some('*')) => {
                    self.bump_n(2);
                    depth += 1;
                }
                (Some('*'), Some('/')) => {
                    self.bump_n(2);
                    depth -= 1;

                    if depth == 0 {
                        return;
                    }
                }
                (Some(_), _) => {
                    self.bump();
                }
                (None, _) => {
                    let span = self.span_from(start);
                    self.error(
                        DiagnosticKind::UnterminatedLiteral,
                        span,
                        format!("unterminated block comment, {depth} still open"),
                    );
                    return;
                }
            }
        }
    }

    fn bump_n(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    /// `r#name`, an identifier that may be spelled like a keyword
    fn read_raw_identifier(&mut self) -> Token {
        let start = self.mark();
        self.bump_n(2);

        while let Some(c) = self.peek_char(0) {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }

            self.bump();
        }

        Token {
            kind: TokenKind::Identifier,
            span: self.span_from(start),
            value: TokenValue::None,
        }
    }

    /// `r"..."` or `r#"..."#`: no escapes, and the literal ends at a quote
    /// followed by as many `#` as it opened with
    fn read_raw_string(&mut self) -> Token {
        let start = self.mark();
        self.bump();

        let mut hashes = 0;
        while self.peek_char(0) == Some('#') {
            self.bump();
            hashes += 1;
        }

        // Only called in front of the opening quote
        self.bump();

        let mut contents = String::new();

        loop {
            let Some(c) = self.bump() else {
                let span = self.span_from(start);
                self.error(
                    DiagnosticKind::UnterminatedLiteral,
                    span,
                    "unterminated raw string literal",
                );
                break;
            };

            if c == '"' && (0..hashes).all(|i| self.peek_char(i) == Some('#')) {
                self.bump_n(hashes);
                break;
            }

            contents.push(c);
        }

        Token {
            kind: TokenKind::StringLiteral,
            span: self.span_from(start),
            value: TokenValue::String(Rc::from(contents.into_bytes())),
        }
    }

    /// Whether a raw string starts here: `r`, any number of `#`, then `"`
    fn at_raw_string(&mut self) -> bool {
        let mut n = 1;

        while self.peek_char(n) == Some('#') {
            n += 1;
        }

        self.peek_char(0) == Some('r') && self.peek_char(n) == Some('"')
    }

    // Keyword, identifier, or boolean literal
    fn read_word(&mut self) -> Token {
        let start = self.mark();

        while let Some(c) = self.peek_char(0) {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }

            self.bump();
        }

        let span = self.span_from(start);
        let text = self.source.value_of_span(span);

        let (kind, value) = if let Ok(keyword) = text.parse() {
            (TokenKind::Keyword(keyword), TokenValue::None)
        } else {
            match text {
                "true" => (TokenKind::BooleanLiteral, TokenValue::Boolean(true)),
                "false" => (TokenKind::BooleanLiteral, TokenValue::Boolean(false)),
                _ => (TokenKind::Identifier, TokenValue::None),
            }
        };

        Token { kind, span, value }
    }

    fn read_number(&mut self) -> Token {
        let start = self.mark();

        // Consume the whole alphanumeric run so that a malformed literal is
        // reported once and lexing resumes at the following boundary
        while let Some(c) = self.peek_char(0) {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }

            self.bump();
        }

        let span = self.span_from(start);
        let value = match parse_integer_literal(self.source.value_of_span(span)) {
            Ok((value, suffix)) => TokenValue::Integer { value, suffix },
            Err(message) => {
                self.error(DiagnosticKind::InvalidNumericLiteral, span, message);

                TokenValue::Integer {
                    value: 0,
                    suffix: None,
                }
            }
        };

        Token {
            kind: TokenKind::IntegerLiteral,
            span,
            value,
        }
    }

    /// Decodes one escape sequence, the backslash having been consumed already.
    ///
    /// Returns `None` when the sequence is invalid (after reporting it) or when
    /// the literal ends right after the backslash (left to the caller).
    fn read_escape(&mut self, start: Mark) -> Option<char> {
        let escaped = match self.peek_char(0) {
            None | Some('\n') => return None,
            Some(c) => {
                self.bump();
                c
            }
        };

        let decoded = match escaped {
            'n' => Some('\n'),
            't' => Some('\t'),
            'r' => Some('\r'),
            '0' => Some('\0'),
            '\\' => Some('\\'),
            '\'' => Some('\''),
            '"' => Some('"'),
            'x' => {
                let mut value = 0;
                let mut digits = 0;

                while digits < 2 {
                    let Some(digit) = self.peek_char(0).and_then(|c| c.to_digit(16)) else {
                        break;
                    };

                    self.bump();
                    value = value * 16 + digit;
                    digits += 1;
                }

                (digits == 2 && value <= 0x7f)
                    .then(|| char::from_u32(value))
                    .flatten()
            }
            'u' => {
                if self.peek_char(0) == Some('{') {
                    self.bump();

                    let mut value: u32 = 0;
                    let mut digits = 0;

                    while let Some(digit) = self.peek_char(0).and_then(|c| c.to_digit(16)) {
                        self.bump();
                        value = value.saturating_mul(16).saturating_add(digit);
                        digits += 1;
                    }

                    let closed = self.peek_char(0) == Some('}');
                    if closed {
                        self.bump();
                    }

                    (closed && (1..=6).contains(&digits))
                        .then(|| char::from_u32(value))
                        .flatten()
                } else {
                    None
                }
            }
            _ => None,
        };

        if decoded.is_none() {
            let span = self.span_from(start);
            let text = self.source.value_of_span(span).to_owned();

            self.error(
                DiagnosticKind::InvalidEscape,
                span,
                format!("invalid escape sequence `{text}`"),
            );
        }

        decoded
    }

    /// Reads the body of a quoted literal up to `quote`, decoding escapes.
    /// Returns the decoded chars and whether any error was reported.
    fn read_quoted(&mut self, quote: char, what: &str) -> (Vec<char>, bool) {
        let start = self.mark();
        let error_count = self.diagnostics.len();

        // Opening quote
        self.bump();

        let mut chars = Vec::new();

        loop {
            match self.peek_char(0) {
                None | Some('\n') => {
                    let span = self.span_from(start);
                    self.error(
                        DiagnosticKind::UnterminatedLiteral,
                        span,
                        format!("unterminated {what} literal"),
                    );
                    break;
                }
                Some(c) if c == quote => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    let escape_start = self.mark();
                    self.bump();

                    if let Some(c) = self.read_escape(escape_start) {
                        chars.push(c);
                    }
                }
                Some(c) => {
                    self.bump();
                    chars.push(c);
                }
            }
        }

        (chars, self.diagnostics.len() > error_count)
    }

    fn read_string(&mut self) -> Token {
        let start = self.mark();
        let (chars, _) = self.read_quoted('"', "string");

        let bytes: String = chars.into_iter().collect();

        Token {
            kind: TokenKind::StringLiteral,
            span: self.span_from(start),
            value: TokenValue::String(Rc::from(bytes.into_bytes())),
        }
    }

    fn read_char(&mut self) -> Token {
        let start = self.mark();
        let (chars, had_errors) = self.read_quoted('\'', "char");
        let span = self.span_from(start);

        if !had_errors && chars.len() != 1 {
            self.error(
                DiagnosticKind::InvalidCharLiteral,
                span,
                format!(
                    "char literal must contain exactly one character, found {}",
                    chars.len()
                ),
            );
        }

        Token {
            kind: TokenKind::CharLiteral,
            span,
            value: TokenValue::Char(chars.first().copied().unwrap_or('\0')),
        }
    }

    fn read_operator(&mut self) -> Option<Token> {
        let start = self.mark();

        let compound = COMPOUND_TOKENS.iter().find(|(text, _)| {
            let expected: Vec<char> = text.chars().collect();
            (0..expected.len()).all(|i| self.chars.peek_nth(i).map(|(_, c)| *c) == Some(expected[i]))
        });

        let (length, kind) = match compound {
            Some((text, kind)) => (text.len(), *kind),
            None => (1, *SINGLE_TOKENS.get(&self.peek_char(0)?)?),
        };

        for _ in 0..length {
            self.bump();
        }

        Some(Token {
            kind,
            span: self.span_from(start),
            value: TokenValue::None,
        })
    }

    fn lex_token(&mut self) -> Option<Token> {
        loop {
            let Some(c) = self.peek_char(0) else {
                if self.finished {
                    return None;
                }

                self.finished = true;

                return Some(Token {
                    kind: TokenKind::Eof,
                    span: self.span_from(self.mark()),
                    value: TokenValue::None,
                });
            };

            let token = match c {
                // Ignore whitespace
                c if c.is_whitespace() => {
                    self.bump();
                    continue;
                }
                // Ignore comments
                '/' if self.peek_char(1) == Some('/') => {
                    self.ignore_line();
                    continue;
                }
                '/' if self.peek_char(1) == Some('*') => {
                    self.skip_block_comment();
                    continue;
                }

                'r' if self.at_raw_string() => self.read_raw_string(),
                'r' if self.peek_char(1) == Some('#')
                    && self
                        .peek_char(2)
                        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_') =>
                {
                    self.read_raw_identifier()
                }

                '"' => self.read_string(),
                '\'' => self.read_char(),

                n if n.is_ascii_digit() => self.read_number(),

                // Identifiers, keywords, and boolean literals
                a if a.is_ascii_alphabetic() || a == '_' => self.read_word(),

                _ => match self.read_operator() {
                    Some(token) => token,
                    None => {
                        let start = self.mark();
                        self.bump();

                        let span = self.span_from(start);
                        self.error(
                            DiagnosticKind::UnexpectedCharacter,
                            span,
                            format!("unexpected character `{}`", c.escape_default()),
                        );
                        continue;
                    }
                },
            };

            return Some(token);
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if let Some(token) = self.peek_buffer.pop_front() {
            return Some(token);
        }

        self.lex_token()
    }
}

/// Lexes a whole source file eagerly, returning every token (ending with
/// `Eof`) and the lexical diagnostics
pub fn tokenize(source: &SourceFile) -> (Vec<Token>, Vec<Diagnostic>) {
    let mut lexer = Lexer::new(source);
    let tokens: Vec<Token> = lexer.by_ref().collect();

    tracing::debug!(tokens = tokens.len(), "tokenized");

    (tokens, lexer.take_diagnostics())
}

/// Parses the text of an integer literal: an optional `0x`/`0b` prefix,
/// digits with optional `_` separators and an optional type suffix
fn parse_integer_literal(text: &str) -> Result<(u64, Option<IntegerKind>), String> {
    let (radix, body) = if let Some(rest) = text.strip_prefix("0x") {
        (16, rest)
    } else if let Some(rest) = text.strip_prefix("0b") {
        (2, rest)
    } else {
        (10, text)
    };

    let suffix_start = body.find(['i', 'u']).unwrap_or(body.len());
    let (digits, suffix) = body.split_at(suffix_start);

    let suffix = if suffix.is_empty() {
        None
    } else {
        Some(
            suffix
                .parse::<IntegerKind>()
                .map_err(|_| format!("invalid suffix `{suffix}` for integer literal"))?,
        )
    };

    if digits.starts_with('_') || !digits.chars().any(|c| c != '_') {
        return Err(format!("integer literal `{text}` has no digits"));
    }

    let mut value: u64 = 0;

    for c in digits.chars().filter(|c| *c != '_') {
        let digit = c
            .to_digit(radix)
            .ok_or_else(|| format!("invalid digit `{c}` in base {radix} literal"))?;

        value = value
            .checked_mul(u64::from(radix))
            .and_then(|value| value.checked_add(u64::from(digit)))
            .ok_or_else(|| format!("integer literal `{text}` does not fit in 64 bits"))?;
    }

    Ok((value, suffix))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::frontend::SourceFileOrigin;

    fn lex(text: &str) -> (Vec<Token>, Vec<Diagnostic>) {
        tokenize(&SourceFile::new(text, SourceFileOrigin::Memory))
    }

    fn kinds(text: &str) -> Vec<TokenKind> {
        lex(text).0.into_iter().map(|token| token.kind).collect()
    }

    #[test]
    fn lexes_a_function() {
        use TokenKind::*;

        assert_eq!(
            kinds("fn add(a: i32, b: i32) -> i32 { return a + b; }"),
            vec![
                Keyword(super::Keyword::Fn),
                Identifier,
                OpenParen,
                Identifier,
                Colon,
                Identifier,
                Comma,
                Identifier,
                Colon,
                Identifier,
                CloseParen,
                Arrow,
                Identifier,
                OpenBrace,
                Keyword(super::Keyword::Return),
                Identifier,
                Plus,
                Identifier,
                Semicolon,
                CloseBrace,
                Eof,
            ]
        );
    }

    #[test]
    fn longest_operator_wins() {
        use TokenKind::*;

        assert_eq!(
            kinds("a <<= b >> c && &d .. e.f"),
            vec![
                Identifier,
                ShiftLeftEquals,
                Identifier,
                ShiftRight,
                Identifier,
                LogicalAnd,
                BitwiseAnd,
                Identifier,
                DotDot,
                Identifier,
                Dot,
                Identifier,
                Eof,
            ]
        );
    }

    #[test]
    fn double_ampersand_is_one_token() {
        assert_eq!(
            kinds("&&x"),
            vec![TokenKind::LogicalAnd, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn eof_is_yielded_exactly_once() {
        let source = SourceFile::new("  // only a comment", SourceFileOrigin::Memory);
        let mut lexer = Lexer::new(&source);

        assert_eq!(lexer.next().map(|token| token.kind), Some(TokenKind::Eof));
        assert_eq!(lexer.next(), None);
        assert_eq!(lexer.next(), None);
    }

    #[test]
    fn integer_literals_decode() {
        let (tokens, diagnostics) = lex("42 0xff_u8 0b1010 1_000_000i64 18446744073709551615");

        assert!(diagnostics.is_empty());
        assert_eq!(
            tokens
                .iter()
                .take(5)
                .map(|token| token.value.clone())
                .collect::<Vec<_>>(),
            vec![
                TokenValue::Integer {
                    value: 42,
                    suffix: None
                },
                TokenValue::Integer {
                    value: 255,
                    suffix: Some(IntegerKind::U8)
                },
                TokenValue::Integer {
                    value: 10,
                    suffix: None
                },
                TokenValue::Integer {
                    value: 1_000_000,
                    suffix: Some(IntegerKind::I64)
                },
                TokenValue::Integer {
                    value: u64::MAX,
                    suffix: None
                },
            ]
        );
    }

    #[test]
    fn malformed_numbers_are_reported_and_skipped() {
        let (tokens, diagnostics) = lex("123abc + 18446744073709551616 + 0x + 5i7");

        assert_eq!(
            diagnostics.iter().map(|d| d.kind).collect::<Vec<_>>(),
            vec![DiagnosticKind::InvalidNumericLiteral; 4]
        );
        // Lexing continued past every bad literal
        assert_eq!(tokens.len(), 8);
    }

    #[test]
    fn escapes_decode() {
        let (tokens, diagnostics) = lex(r#"'\n' '\x41' '\u{1F600}' "a\tb\"\\""#);

        assert!(diagnostics.is_empty());
        assert_eq!(tokens[0].value, TokenValue::Char('\n'));
        assert_eq!(tokens[1].value, TokenValue::Char('A'));
        assert_eq!(tokens[2].value, TokenValue::Char('😀'));
        assert_eq!(tokens[3].value, TokenValue::String(Rc::from(&b"a\tb\"\\"[..])));
    }

    #[test]
    fn invalid_escape_is_reported_once() {
        let (tokens, diagnostics) = lex(r#"let s = "bad\q";"#);

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::InvalidEscape);
        assert_eq!(diagnostics[0].span.start, 12);
        assert_eq!(tokens[3].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[4].kind, TokenKind::Semicolon);
    }

    #[test]
    fn block_comments_nest() {
        use TokenKind::*;

        assert_eq!(
            kinds("a /* one /* two */ still one */ b /**/ c / * d"),
            vec![Identifier, Identifier, Identifier, Divide, Asterisk, Identifier, Eof]
        );
        assert_eq!(
            kinds(r"x /* \/* is not an opener */ y /* \*/ is not a closer */ z"),
            vec![Identifier, Identifier, Identifier, Eof]
        );
    }

    #[test]
    fn unterminated_block_comment_reaches_eof() {
        let (tokens, diagnostics) = lex("let x /* /* */\nlet y");

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::UnterminatedLiteral);
        assert_eq!(diagnostics[0].span.start, 6);
        assert_eq!(diagnostics[0].span.end, 20);
        assert_eq!(
            tokens.iter().map(|token| token.kind).collect::<Vec<_>>(),
            vec![TokenKind::Keyword(Keyword::Let), TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn raw_identifiers_and_strings() {
        let (tokens, diagnostics) = lex(r###"r#fn r"a\n" r#"say "hi""# r##"#"##"###);

        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].value, TokenValue::String(Rc::from(&b"a\\n"[..])));
        assert_eq!(tokens[2].value, TokenValue::String(Rc::from(&b"say \"hi\""[..])));
        assert_eq!(tokens[3].value, TokenValue::String(Rc::from(&b"#"[..])));
        assert_eq!(tokens[4].kind, TokenKind::Eof);

        let (_, diagnostics) = lex(r##"r#"open "##);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::UnterminatedLiteral);
    }

    #[test]
    fn unterminated_string_stops_at_newline() {
        let (tokens, diagnostics) = lex("\"abc\nx");

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::UnterminatedLiteral);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].span.line, 2);
    }

    #[test]
    fn char_literal_must_hold_one_scalar() {
        let (_, diagnostics) = lex("'ab' ''");

        assert_eq!(
            diagnostics.iter().map(|d| d.kind).collect::<Vec<_>>(),
            vec![DiagnosticKind::InvalidCharLiteral; 2]
        );
    }

    #[test]
    fn unexpected_characters_are_skipped() {
        let (tokens, diagnostics) = lex("a @ b $");

        assert_eq!(diagnostics.len(), 2);
        assert!(
            diagnostics
                .iter()
                .all(|d| d.kind == DiagnosticKind::UnexpectedCharacter)
        );
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn spans_track_lines_and_columns() {
        let (tokens, _) = lex("fn\n  main");

        assert_eq!(tokens[1].span, Span::new(5, 9, 2, 3));
    }

    const KEYWORDS: &[&str] = &[
        "fn", "struct", "global", "let", "mut", "if", "else", "while", "for", "return", "break",
        "continue", "as", "true", "false",
    ];

    fn lexeme() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z_][a-z0-9_]{0,8}".prop_filter("keywords lex differently", |word| {
                !KEYWORDS.contains(&word.as_str())
            }),
            any::<u32>().prop_map(|n| n.to_string()),
            proptest::sample::select(vec![
                "(", ")", "[", "]", "{", "}", ";", ",", ":", "->", ".", "..", "!", "~", "*",
                "-", "&", "+", "/", "%", "&&", "||", "^", "|", "<<", ">>", "==", "!=", "<",
                "<=", ">", ">=", "=", "+=", "-=", "*=", "/=", "%=", "^=", "&=", "|=", "<<=",
                ">>=",
            ])
            .prop_map(str::to_owned),
            proptest::sample::select(KEYWORDS.to_vec()).prop_map(str::to_owned),
        ]
    }

    proptest! {
        #[test]
        fn lexemes_round_trip_through_spans(lexemes in proptest::collection::vec(lexeme(), 0..32)) {
            let text = lexemes.join(" ");
            let source = SourceFile::new(text.as_str(), SourceFileOrigin::Memory);
            let (tokens, diagnostics) = tokenize(&source);

            prop_assert!(diagnostics.is_empty());
            prop_assert_eq!(tokens.len(), lexemes.len() + 1);

            for (token, lexeme) in tokens.iter().zip(&lexemes) {
                prop_assert_eq!(source.value_of_span(token.span), lexeme.as_str());
            }
        }
    }
}
