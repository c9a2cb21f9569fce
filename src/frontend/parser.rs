use super::{
    ast::{AssignmentOperator, Item, ItemKind, NodeId},
    intern::InternedSymbol,
};
use crate::{
    diagnostics::{Diagnostic, DiagnosticCollector, DiagnosticKind},
    frontend::{
        SourceFile,
        ast::{
            Assignment, AssignmentOperatorKind, BinaryOperator, BinaryOperatorKind, Block, Else,
            Expression, ExpressionKind, For, FunctionCallArgumentList, FunctionDefinition,
            FunctionParameter, FunctionParameterList, FunctionSignature, GlobalDefinition,
            Identifier, If, Literal, LiteralKind, Local, Module, Statement, StatementKind,
            StructDefinition, StructField, Type, TypeKind, UnaryOperator, UnaryOperatorKind,
            While,
        },
        lexer::{Keyword, Lexer, Span, Token, TokenKind, TokenValue},
    },
    middle::primitive::{IntegerKind, PrimitiveKind},
};

/// Why a parse function gave up. The diagnostic has already been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseFailure {
    /// Skip to a synchronization point and keep going
    Recoverable,
    /// End of file inside an open delimiter; nothing useful follows
    Fatal,
}

type ParseResult<T> = Result<T, ParseFailure>;

/// Binding power of binary operators, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    LogicalOr,
    LogicalAnd,
    Equality,
    Relational,
    BitwiseOr,
    BitwiseXor,
    BitwiseAnd,
    Shift,
    Additive,
    Multiplicative,
    Cast,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::LogicalOr => Precedence::LogicalAnd,
            Precedence::LogicalAnd => Precedence::Equality,
            Precedence::Equality => Precedence::Relational,
            Precedence::Relational => Precedence::BitwiseOr,
            Precedence::BitwiseOr => Precedence::BitwiseXor,
            Precedence::BitwiseXor => Precedence::BitwiseAnd,
            Precedence::BitwiseAnd => Precedence::Shift,
            Precedence::Shift => Precedence::Additive,
            Precedence::Additive => Precedence::Multiplicative,
            Precedence::Multiplicative | Precedence::Cast => Precedence::Cast,
        }
    }
}

fn binary_operator(kind: TokenKind) -> Option<(Precedence, BinaryOperatorKind)> {
    Some(match kind {
        TokenKind::LogicalOr => (Precedence::LogicalOr, BinaryOperatorKind::LogicalOr),
        TokenKind::LogicalAnd => (Precedence::LogicalAnd, BinaryOperatorKind::LogicalAnd),
        TokenKind::DoubleEquals => (Precedence::Equality, BinaryOperatorKind::Equals),
        TokenKind::NotEquals => (Precedence::Equality, BinaryOperatorKind::NotEquals),
        TokenKind::LessThan => (Precedence::Relational, BinaryOperatorKind::LessThan),
        TokenKind::LessThanOrEqualTo => {
            (Precedence::Relational, BinaryOperatorKind::LessThanOrEqualTo)
        }
        TokenKind::GreaterThan => (Precedence::Relational, BinaryOperatorKind::GreaterThan),
        TokenKind::GreaterThanOrEqualTo => (
            Precedence::Relational,
            BinaryOperatorKind::GreaterThanOrEqualTo,
        ),
        TokenKind::BitwiseOr => (Precedence::BitwiseOr, BinaryOperatorKind::BitwiseOr),
        TokenKind::BitwiseXor => (Precedence::BitwiseXor, BinaryOperatorKind::BitwiseXor),
        TokenKind::BitwiseAnd => (Precedence::BitwiseAnd, BinaryOperatorKind::BitwiseAnd),
        TokenKind::ShiftLeft => (Precedence::Shift, BinaryOperatorKind::ShiftLeft),
        TokenKind::ShiftRight => (Precedence::Shift, BinaryOperatorKind::ShiftRight),
        TokenKind::Plus => (Precedence::Additive, BinaryOperatorKind::Add),
        TokenKind::Minus => (Precedence::Additive, BinaryOperatorKind::Subtract),
        TokenKind::Asterisk => (Precedence::Multiplicative, BinaryOperatorKind::Multiply),
        TokenKind::Divide => (Precedence::Multiplicative, BinaryOperatorKind::Divide),
        TokenKind::Modulus => (Precedence::Multiplicative, BinaryOperatorKind::Modulus),
        _ => return None,
    })
}

fn assignment_operator(kind: TokenKind) -> Option<AssignmentOperatorKind> {
    Some(match kind {
        TokenKind::PlusEquals => AssignmentOperatorKind::Add,
        TokenKind::MinusEquals => AssignmentOperatorKind::Subtract,
        TokenKind::MultiplyEquals => AssignmentOperatorKind::Multiply,
        TokenKind::DivideEquals => AssignmentOperatorKind::Divide,
        TokenKind::ModulusEquals => AssignmentOperatorKind::Modulus,
        TokenKind::BitwiseAndEquals => AssignmentOperatorKind::BitwiseAnd,
        TokenKind::BitwiseOrEquals => AssignmentOperatorKind::BitwiseOr,
        TokenKind::BitwiseXorEquals => AssignmentOperatorKind::BitwiseXor,
        TokenKind::ShiftLeftEquals => AssignmentOperatorKind::ShiftLeft,
        TokenKind::ShiftRightEquals => AssignmentOperatorKind::ShiftRight,
        _ => return None,
    })
}

#[derive(Debug)]
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    next_node_id: u32,
    diagnostics: Vec<Diagnostic>,
    /// Open delimiters that have not been closed yet, innermost last
    delimiters: Vec<Token>,
    previous_span: Option<Span>,
    reported_unclosed: bool,
}

impl<'source> Parser<'source> {
    /// Parses a whole module, recording lexer diagnostics followed by parser
    /// diagnostics into `diagnostics`.
    pub fn parse_module(
        source_file: &'source SourceFile,
        diagnostics: &mut DiagnosticCollector,
    ) -> Module<'source> {
        let _span = tracing::debug_span!("parse", origin = %source_file.origin).entered();

        let mut parser = Self {
            lexer: Lexer::new(source_file),
            next_node_id: 0,
            diagnostics: Vec::new(),
            delimiters: Vec::new(),
            previous_span: None,
            reported_unclosed: false,
        };

        let mut items = Vec::new();

        loop {
            let token = parser.peek_token();

            match token.kind {
                TokenKind::Eof => break,
                kind if kind.is_close_delimiter() => {
                    parser.error(
                        DiagnosticKind::UnmatchedDelimiter,
                        token.span,
                        format!("unexpected closing delimiter {kind}"),
                    );
                    parser.bump();
                }
                _ => match parser.parse_module_item() {
                    Ok(item) => items.push(item),
                    Err(ParseFailure::Fatal) => break,
                    Err(ParseFailure::Recoverable) => {
                        if parser.recover_item().is_err() {
                            break;
                        }
                    }
                },
            }
        }

        if !parser.delimiters.is_empty() {
            parser.unclosed_delimiter();
        }

        tracing::debug!(
            items = items.len(),
            errors = parser.diagnostics.len(),
            "parsed module"
        );

        diagnostics.extend(parser.lexer.take_diagnostics());
        diagnostics.extend(parser.diagnostics);

        Module {
            source_file,
            items,
            node_count: parser.next_node_id,
        }
    }

    fn create_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    fn source(&self) -> &'source SourceFile {
        self.lexer.source()
    }

    fn error(&mut self, kind: DiagnosticKind, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(kind, span, message));
    }

    fn peek_token(&mut self) -> Token {
        let fallback = self.previous_span.unwrap_or_default().shrink_to_end();

        self.lexer.peek().cloned().unwrap_or(Token {
            kind: TokenKind::Eof,
            span: fallback,
            value: TokenValue::None,
        })
    }

    fn peek_kind(&mut self) -> TokenKind {
        self.lexer.peek().map_or(TokenKind::Eof, |token| token.kind)
    }

    fn check(&mut self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    /// Consumes the next token, keeping track of delimiter nesting. `Eof` is
    /// never consumed.
    fn bump(&mut self) -> Token {
        let token = self.peek_token();

        if token.kind == TokenKind::Eof {
            return token;
        }

        self.lexer.next();
        self.previous_span = Some(token.span);

        if token.kind.is_open_delimiter() {
            self.delimiters.push(token.clone());
        } else if token.kind.is_close_delimiter() {
            // Closing an outer delimiter implicitly closes everything inside it
            if let Some(position) = self
                .delimiters
                .iter()
                .rposition(|open| open.kind.closing_delimiter() == Some(token.kind))
            {
                self.delimiters.truncate(position);
            }
        }

        token
    }

    fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        self.check(kind).then(|| self.bump())
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> ParseResult<Token> {
        self.expect(TokenKind::Keyword(keyword))
    }

    fn describe(&self, token: &Token) -> String {
        match token.kind {
            TokenKind::Identifier
            | TokenKind::IntegerLiteral
            | TokenKind::BooleanLiteral
            | TokenKind::CharLiteral
            | TokenKind::StringLiteral => format!(
                "{} `{}`",
                token.kind,
                self.source().value_of_span(token.span)
            ),
            kind => kind.to_string(),
        }
    }

    /// Records an "expected X, found Y" diagnostic for the next token
    fn unexpected(&mut self, expected: &str) -> ParseFailure {
        let token = self.peek_token();

        if token.kind == TokenKind::Eof && !self.delimiters.is_empty() {
            return self.unclosed_delimiter();
        }

        let mut diagnostic = Diagnostic::error(
            DiagnosticKind::UnexpectedToken,
            token.span,
            format!("expected {expected}, found {}", self.describe(&token)),
        );

        if let Some(previous) = self.previous_span {
            diagnostic = diagnostic.with_secondary(previous, format!("expected {expected} after this"));
        }

        self.diagnostics.push(diagnostic);

        ParseFailure::Recoverable
    }

    fn unclosed_delimiter(&mut self) -> ParseFailure {
        if !self.reported_unclosed {
            self.reported_unclosed = true;

            if let Some(open) = self.delimiters.last().cloned() {
                let eof = self.peek_token().span;

                let diagnostic = Diagnostic::error(
                    DiagnosticKind::UnmatchedDelimiter,
                    open.span,
                    format!("unclosed delimiter {}", open.kind),
                )
                .with_secondary(eof, "file ends here");

                self.diagnostics.push(diagnostic);
            }
        }

        ParseFailure::Fatal
    }

    /// Skips to the end of the current statement: a `;` (consumed) or a `}`
    /// (left in place) at nesting depth `depth`
    fn recover_statement(&mut self, depth: usize) -> ParseResult<()> {
        loop {
            match self.peek_kind() {
                TokenKind::Eof if self.delimiters.is_empty() => return Ok(()),
                TokenKind::Eof => return Err(self.unclosed_delimiter()),
                TokenKind::Semicolon if self.delimiters.len() <= depth => {
                    self.bump();
                    return Ok(());
                }
                TokenKind::CloseBrace if self.delimiters.len() <= depth => return Ok(()),
                _ => {
                    self.bump();
                }
            }
        }
    }

    /// Skips to the next top level item keyword
    fn recover_item(&mut self) -> ParseResult<()> {
        loop {
            match self.peek_kind() {
                TokenKind::Eof if self.delimiters.is_empty() => return Ok(()),
                TokenKind::Eof => return Err(self.unclosed_delimiter()),
                TokenKind::Keyword(Keyword::Fn | Keyword::Struct | Keyword::Global)
                    if self.delimiters.is_empty() =>
                {
                    return Ok(());
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn parse_module_item(&mut self) -> ParseResult<Item> {
        let kind = match self.peek_kind() {
            TokenKind::Keyword(Keyword::Fn) => {
                ItemKind::FunctionDefinition(Box::new(self.parse_function_definition()?))
            }
            TokenKind::Keyword(Keyword::Struct) => {
                ItemKind::StructDefinition(Box::new(self.parse_struct_definition()?))
            }
            TokenKind::Keyword(Keyword::Global) => {
                ItemKind::GlobalDefinition(Box::new(self.parse_global_definition()?))
            }
            _ => return Err(self.unexpected("`fn`, `struct` or `global`")),
        };

        let span = match &kind {
            ItemKind::FunctionDefinition(function) => function.span,
            ItemKind::StructDefinition(struct_definition) => struct_definition.span,
            ItemKind::GlobalDefinition(global) => global.span,
        };

        Ok(Item {
            id: self.create_node_id(),
            span,
            kind,
        })
    }

    /// fn name(param: ty) -> return_type {}
    fn parse_function_definition(&mut self) -> ParseResult<FunctionDefinition> {
        let fn_keyword = self.expect_keyword(Keyword::Fn)?;

        let signature = self.parse_function_signature()?;
        let body = self.parse_block()?;

        Ok(FunctionDefinition {
            id: self.create_node_id(),
            span: fn_keyword.span.to(body.span),
            signature,
            body,
        })
    }

    /// name(param: ty) -> return_type
    fn parse_function_signature(&mut self) -> ParseResult<FunctionSignature> {
        let name = self.parse_identifier()?;
        let parameters = self.parse_function_parameter_list()?;

        let return_type = match self.eat(TokenKind::Arrow) {
            Some(_) => Some(self.parse_type()?),
            None => None,
        };

        let span = name.span.to(return_type
            .as_ref()
            .map_or(parameters.span, |return_type| return_type.span));

        Ok(FunctionSignature {
            id: self.create_node_id(),
            span,
            name,
            parameters,
            return_type,
        })
    }

    /// (a: i32, mut b: *u8)
    fn parse_function_parameter_list(&mut self) -> ParseResult<FunctionParameterList> {
        let open = self.expect(TokenKind::OpenParen)?;
        let parameters =
            self.parse_comma_separated(TokenKind::CloseParen, Self::parse_function_parameter)?;
        let close = self.expect(TokenKind::CloseParen)?;

        Ok(FunctionParameterList {
            id: self.create_node_id(),
            span: open.span.to(close.span),
            parameters,
        })
    }

    fn parse_function_parameter(&mut self) -> ParseResult<FunctionParameter> {
        let mut_keyword = self.eat(TokenKind::Keyword(Keyword::Mut));
        let name = self.parse_identifier()?;
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type()?;

        Ok(FunctionParameter {
            id: self.create_node_id(),
            span: mut_keyword.as_ref().map_or(name.span, |token| token.span).to(ty.span),
            is_mutable: mut_keyword.is_some(),
            name,
            ty,
        })
    }

    /// Parses `item (, item)* ,?` up to (but not including) `close`
    fn parse_comma_separated<T>(
        &mut self,
        close: TokenKind,
        mut parse: impl FnMut(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<Vec<T>> {
        let mut items = Vec::new();

        while !self.check(close) {
            items.push(parse(self)?);

            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }

        Ok(items)
    }

    /// struct Name { field: ty, other: ty }
    fn parse_struct_definition(&mut self) -> ParseResult<StructDefinition> {
        let struct_keyword = self.expect_keyword(Keyword::Struct)?;
        let name = self.parse_identifier()?;
        self.expect(TokenKind::OpenBrace)?;

        let mut fields = Vec::new();

        while !self.check(TokenKind::CloseBrace) {
            let field_name = self.parse_identifier()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;

            fields.push(StructField {
                id: self.create_node_id(),
                span: field_name.span.to(ty.span),
                name: field_name,
                ty,
            });

            // Fields may be separated by commas or semicolons
            if self.eat(TokenKind::Comma).is_none() && self.eat(TokenKind::Semicolon).is_none() {
                break;
            }
        }

        let close = self.expect(TokenKind::CloseBrace)?;

        Ok(StructDefinition {
            id: self.create_node_id(),
            span: struct_keyword.span.to(close.span),
            name,
            fields,
        })
    }

    /// global mut name: ty = value;
    fn parse_global_definition(&mut self) -> ParseResult<GlobalDefinition> {
        let global_keyword = self.expect_keyword(Keyword::Global)?;
        let is_mutable = self.eat(TokenKind::Keyword(Keyword::Mut)).is_some();
        let name = self.parse_identifier()?;

        let ty = match self.eat(TokenKind::Colon) {
            Some(_) => Some(self.parse_type()?),
            None => None,
        };

        self.expect(TokenKind::Equals)?;
        let initializer = Box::new(self.parse_expression()?);
        let semicolon = self.expect(TokenKind::Semicolon)?;

        Ok(GlobalDefinition {
            id: self.create_node_id(),
            span: global_keyword.span.to(semicolon.span),
            is_mutable,
            name,
            ty,
            initializer,
        })
    }

    // main
    fn parse_identifier(&mut self) -> ParseResult<Identifier> {
        let token = self.expect(TokenKind::Identifier)?;

        Ok(self.identifier_from_token(&token))
    }

    fn identifier_from_token(&mut self, token: &Token) -> Identifier {
        let text = self.source().value_of_span(token.span);

        Identifier {
            id: self.create_node_id(),
            span: token.span,
            // `r#fn` names `fn`
            name: InternedSymbol::new(text.strip_prefix("r#").unwrap_or(text)),
            resolution: Default::default(),
        }
    }

    fn parse_type(&mut self) -> ParseResult<Type> {
        let token = self.peek_token();

        let (kind, span) = match token.kind {
            // *T
            TokenKind::Asterisk => {
                self.bump();
                let pointee = self.parse_type()?;
                let span = token.span.to(pointee.span);

                (TypeKind::Pointer(Box::new(pointee)), span)
            }
            // [T] or [T; N]
            TokenKind::OpenBracket => {
                self.bump();
                let element = Box::new(self.parse_type()?);

                let length = match self.eat(TokenKind::Semicolon) {
                    Some(_) => {
                        let length = self.expect(TokenKind::IntegerLiteral)?;

                        match length.value {
                            TokenValue::Integer { value, suffix } => {
                                if suffix.is_some_and(|suffix| suffix != IntegerKind::USize) {
                                    self.error(
                                        DiagnosticKind::UnexpectedToken,
                                        length.span,
                                        format!(
                                            "expected a `usize` array length, found `{}`",
                                            self.source().value_of_span(length.span)
                                        ),
                                    );
                                }

                                Some(value)
                            }
                            _ => Some(0),
                        }
                    }
                    None => None,
                };

                let close = self.expect(TokenKind::CloseBracket)?;
                let span = token.span.to(close.span);

                match length {
                    Some(length) => (TypeKind::Array { ty: element, length }, span),
                    None => (TypeKind::Slice(element), span),
                }
            }
            // ()
            TokenKind::OpenParen => {
                self.bump();
                let close = self.expect(TokenKind::CloseParen)?;

                (TypeKind::Unit, token.span.to(close.span))
            }
            // fn(T, U) -> R
            TokenKind::Keyword(Keyword::Fn) => {
                self.bump();
                self.expect(TokenKind::OpenParen)?;
                let parameters =
                    self.parse_comma_separated(TokenKind::CloseParen, Self::parse_type)?;
                let close = self.expect(TokenKind::CloseParen)?;

                let return_type = match self.eat(TokenKind::Arrow) {
                    Some(_) => Some(Box::new(self.parse_type()?)),
                    None => None,
                };

                let span = token
                    .span
                    .to(return_type.as_ref().map_or(close.span, |ty| ty.span));

                (
                    TypeKind::Function {
                        parameters,
                        return_type,
                    },
                    span,
                )
            }
            TokenKind::Identifier => {
                self.bump();

                match self.source().value_of_span(token.span).parse::<PrimitiveKind>() {
                    Ok(primitive) => (TypeKind::Primitive(primitive), token.span),
                    Err(_) => (
                        TypeKind::Named(self.identifier_from_token(&token)),
                        token.span,
                    ),
                }
            }
            _ => return Err(self.unexpected("type")),
        };

        Ok(Type {
            id: self.create_node_id(),
            span,
            kind,
        })
    }

    fn parse_block(&mut self) -> ParseResult<Block> {
        let open = self.expect(TokenKind::OpenBrace)?;
        let depth = self.delimiters.len();

        let mut statements = Vec::new();

        loop {
            match self.peek_kind() {
                TokenKind::CloseBrace => break,
                TokenKind::Eof => return Err(self.unclosed_delimiter()),
                _ => match self.parse_statement() {
                    Ok(statement) => statements.push(statement),
                    Err(ParseFailure::Fatal) => return Err(ParseFailure::Fatal),
                    Err(ParseFailure::Recoverable) => self.recover_statement(depth)?,
                },
            }
        }

        let close = self.expect(TokenKind::CloseBrace)?;

        Ok(Block {
            id: self.create_node_id(),
            span: open.span.to(close.span),
            statements,
        })
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        let token = self.peek_token();

        let (kind, span) = match token.kind {
            TokenKind::Keyword(Keyword::Let) => {
                let local = self.parse_local()?;
                let span = local.span;

                (StatementKind::Local(Box::new(local)), span)
            }
            TokenKind::Keyword(Keyword::If) => {
                let if_statement = self.parse_if()?;
                let span = if_statement.span;

                (StatementKind::If(Box::new(if_statement)), span)
            }
            TokenKind::Keyword(Keyword::While) => {
                self.bump();
                let condition = Box::new(self.parse_expression()?);
                let body = self.parse_block()?;
                let span = token.span.to(body.span);

                let while_loop = While {
                    id: self.create_node_id(),
                    span,
                    condition,
                    body,
                };

                (StatementKind::While(Box::new(while_loop)), span)
            }
            TokenKind::Keyword(Keyword::For) => {
                let for_loop = self.parse_for()?;
                let span = for_loop.span;

                (StatementKind::For(Box::new(for_loop)), span)
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.bump();

                let value = match self.check(TokenKind::Semicolon) {
                    true => None,
                    false => Some(Box::new(self.parse_expression()?)),
                };

                let semicolon = self.expect(TokenKind::Semicolon)?;

                (StatementKind::Return(value), token.span.to(semicolon.span))
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.bump();
                let semicolon = self.expect(TokenKind::Semicolon)?;

                (StatementKind::Break, token.span.to(semicolon.span))
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.bump();
                let semicolon = self.expect(TokenKind::Semicolon)?;

                (StatementKind::Continue, token.span.to(semicolon.span))
            }
            TokenKind::OpenBrace => {
                let block = self.parse_block()?;
                let span = block.span;

                (StatementKind::Block(Box::new(block)), span)
            }
            TokenKind::Semicolon => {
                self.bump();

                (StatementKind::Empty, token.span)
            }
            _ => return self.parse_expression_statement(),
        };

        Ok(Statement {
            id: self.create_node_id(),
            span,
            kind,
        })
    }

    /// An expression followed by a semicolon. A top level assignment becomes
    /// an assignment statement.
    fn parse_expression_statement(&mut self) -> ParseResult<Statement> {
        let expression = self.parse_expression()?;
        let semicolon = self.expect(TokenKind::Semicolon)?;
        let span = expression.span.to(semicolon.span);

        let kind = match expression.kind {
            ExpressionKind::Assignment(assignment) => StatementKind::Assignment(assignment),
            kind => StatementKind::Expression(Box::new(Expression {
                kind,
                ..expression
            })),
        };

        Ok(Statement {
            id: self.create_node_id(),
            span,
            kind,
        })
    }

    /// let mut name: ty = value;
    fn parse_local(&mut self) -> ParseResult<Local> {
        let let_keyword = self.expect_keyword(Keyword::Let)?;
        let is_mutable = self.eat(TokenKind::Keyword(Keyword::Mut)).is_some();
        let name = self.parse_identifier()?;

        let ty = match self.eat(TokenKind::Colon) {
            Some(_) => Some(self.parse_type()?),
            None => None,
        };

        let initializer = match self.eat(TokenKind::Equals) {
            Some(_) => Some(Box::new(self.parse_expression()?)),
            None => None,
        };

        let semicolon = self.expect(TokenKind::Semicolon)?;

        Ok(Local {
            id: self.create_node_id(),
            span: let_keyword.span.to(semicolon.span),
            is_mutable,
            name,
            ty,
            initializer,
        })
    }

    fn parse_if(&mut self) -> ParseResult<If> {
        let if_keyword = self.expect_keyword(Keyword::If)?;
        let condition = Box::new(self.parse_expression()?);
        let positive = self.parse_block()?;

        let negative = match self.eat(TokenKind::Keyword(Keyword::Else)) {
            Some(_) if self.check(TokenKind::Keyword(Keyword::If)) => {
                Some(Else::If(Box::new(self.parse_if()?)))
            }
            Some(_) => Some(Else::Block(Box::new(self.parse_block()?))),
            None => None,
        };

        let end = match &negative {
            Some(Else::If(nested)) => nested.span,
            Some(Else::Block(block)) => block.span,
            None => positive.span,
        };

        Ok(If {
            id: self.create_node_id(),
            span: if_keyword.span.to(end),
            condition,
            positive,
            negative,
        })
    }

    /// for (init; condition; step) {}
    fn parse_for(&mut self) -> ParseResult<For> {
        let for_keyword = self.expect_keyword(Keyword::For)?;
        self.expect(TokenKind::OpenParen)?;

        let initializer = match self.peek_kind() {
            TokenKind::Semicolon => {
                self.bump();
                None
            }
            TokenKind::Keyword(Keyword::Let) => {
                let local = self.parse_local()?;

                Some(Box::new(Statement {
                    id: self.create_node_id(),
                    span: local.span,
                    kind: StatementKind::Local(Box::new(local)),
                }))
            }
            _ => Some(Box::new(self.parse_expression_statement()?)),
        };

        let condition = match self.check(TokenKind::Semicolon) {
            true => None,
            false => Some(Box::new(self.parse_expression()?)),
        };
        self.expect(TokenKind::Semicolon)?;

        let step = match self.check(TokenKind::CloseParen) {
            true => None,
            false => Some(Box::new(self.parse_expression()?)),
        };
        self.expect(TokenKind::CloseParen)?;

        let body = self.parse_block()?;

        Ok(For {
            id: self.create_node_id(),
            span: for_keyword.span.to(body.span),
            initializer,
            condition,
            step,
            body,
        })
    }

    #[cfg(test)]
    pub(crate) fn parse_expression_from(
        source_file: &'source SourceFile,
    ) -> (Option<Expression>, Vec<Diagnostic>) {
        let mut parser = Self {
            lexer: Lexer::new(source_file),
            next_node_id: 0,
            diagnostics: Vec::new(),
            delimiters: Vec::new(),
            previous_span: None,
            reported_unclosed: false,
        };

        let expression = parser.parse_expression().ok();
        let mut diagnostics = parser.lexer.take_diagnostics();
        diagnostics.append(&mut parser.diagnostics);

        (expression, diagnostics)
    }

    fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_assignment_expression()
    }

    /// Assignment is right associative: `a = b = c` is `a = (b = c)`
    fn parse_assignment_expression(&mut self) -> ParseResult<Expression> {
        let lhs = self.parse_binary_expression(Precedence::LogicalOr)?;

        if !self.peek_kind().is_assignment_operator() {
            return Ok(lhs);
        }

        let token = self.bump();
        let operator = match assignment_operator(token.kind) {
            Some(kind) => Some(AssignmentOperator {
                id: self.create_node_id(),
                span: token.span,
                kind,
            }),
            None => None,
        };

        let rhs = self.parse_assignment_expression()?;
        let span = lhs.span.to(rhs.span);

        let assignment = Assignment {
            id: self.create_node_id(),
            span,
            operator,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        };

        Ok(Expression::new(
            self.create_node_id(),
            span,
            ExpressionKind::Assignment(Box::new(assignment)),
        ))
    }

    /// Precedence climbing over the binary operator table. All binary
    /// operators are left associative.
    fn parse_binary_expression(&mut self, minimum: Precedence) -> ParseResult<Expression> {
        let mut lhs = self.parse_unary_expression()?;

        loop {
            let kind = self.peek_kind();

            if kind == TokenKind::Keyword(Keyword::As) {
                if Precedence::Cast < minimum {
                    break;
                }

                self.bump();
                let ty = self.parse_type()?;
                let span = lhs.span.to(ty.span);

                lhs = Expression::new(
                    self.create_node_id(),
                    span,
                    ExpressionKind::Cast {
                        expression: Box::new(lhs),
                        ty: Box::new(ty),
                    },
                );
                continue;
            }

            let Some((precedence, operator_kind)) = binary_operator(kind) else {
                break;
            };

            if precedence < minimum {
                break;
            }

            let token = self.bump();
            let operator = BinaryOperator {
                id: self.create_node_id(),
                span: token.span,
                kind: operator_kind,
            };

            let rhs = self.parse_binary_expression(precedence.next())?;
            let span = lhs.span.to(rhs.span);

            lhs = Expression::new(
                self.create_node_id(),
                span,
                ExpressionKind::Binary {
                    lhs: Box::new(lhs),
                    operator,
                    rhs: Box::new(rhs),
                },
            );
        }

        Ok(lhs)
    }

    fn parse_unary_expression(&mut self) -> ParseResult<Expression> {
        let token = self.peek_token();

        let kind = match token.kind {
            TokenKind::Minus => UnaryOperatorKind::Negate,
            TokenKind::Bang => UnaryOperatorKind::LogicalNot,
            TokenKind::Tilde => UnaryOperatorKind::BitwiseNot,
            TokenKind::Asterisk => UnaryOperatorKind::Deref,
            TokenKind::BitwiseAnd => UnaryOperatorKind::AddressOf,
            TokenKind::LogicalAnd => {
                self.error(
                    DiagnosticKind::UnexpectedToken,
                    token.span,
                    "expected expression, found `&&`; write `& &x` or `&(&x)` to take the \
                     address of an address",
                );

                return Err(ParseFailure::Recoverable);
            }
            _ => return self.parse_postfix_expression(),
        };

        self.bump();

        let operator = UnaryOperator {
            id: self.create_node_id(),
            span: token.span,
            kind,
        };
        let operand = self.parse_unary_expression()?;
        let span = token.span.to(operand.span);

        Ok(Expression::new(
            self.create_node_id(),
            span,
            ExpressionKind::Unary {
                operator,
                operand: Box::new(operand),
            },
        ))
    }

    /// Calls, indexing, slicing and field access
    fn parse_postfix_expression(&mut self) -> ParseResult<Expression> {
        let mut expression = self.parse_primary_expression()?;

        loop {
            expression = match self.peek_kind() {
                TokenKind::OpenParen => {
                    let open = self.bump();
                    let arguments =
                        self.parse_comma_separated(TokenKind::CloseParen, Self::parse_expression)?;
                    let close = self.expect(TokenKind::CloseParen)?;

                    let arguments = FunctionCallArgumentList {
                        id: self.create_node_id(),
                        span: open.span.to(close.span),
                        arguments,
                    };
                    let span = expression.span.to(close.span);

                    Expression::new(
                        self.create_node_id(),
                        span,
                        ExpressionKind::FunctionCall {
                            target: Box::new(expression),
                            arguments: Box::new(arguments),
                        },
                    )
                }
                TokenKind::OpenBracket => {
                    self.bump();

                    let start = match self.check(TokenKind::DotDot) {
                        true => None,
                        false => Some(Box::new(self.parse_expression()?)),
                    };

                    let kind = match (self.eat(TokenKind::DotDot), start) {
                        (Some(_), start) => {
                            let end = match self.check(TokenKind::CloseBracket) {
                                true => None,
                                false => Some(Box::new(self.parse_expression()?)),
                            };

                            ExpressionKind::Slice {
                                target: Box::new(expression),
                                start,
                                end,
                            }
                        }
                        (None, Some(index)) => ExpressionKind::Index {
                            target: Box::new(expression),
                            index,
                        },
                        // `start` is only absent when `..` is next
                        (None, None) => return Err(self.unexpected("`..`")),
                    };

                    let close = self.expect(TokenKind::CloseBracket)?;
                    let span = match &kind {
                        ExpressionKind::Slice { target, .. }
                        | ExpressionKind::Index { target, .. } => target.span.to(close.span),
                        _ => close.span,
                    };

                    Expression::new(self.create_node_id(), span, kind)
                }
                TokenKind::Dot => {
                    self.bump();
                    let field = self.parse_identifier()?;
                    let span = expression.span.to(field.span);

                    Expression::new(
                        self.create_node_id(),
                        span,
                        ExpressionKind::Field {
                            target: Box::new(expression),
                            field,
                        },
                    )
                }
                _ => break,
            };
        }

        Ok(expression)
    }

    fn parse_primary_expression(&mut self) -> ParseResult<Expression> {
        let token = self.peek_token();

        let (kind, span) = match token.kind {
            TokenKind::IntegerLiteral
            | TokenKind::BooleanLiteral
            | TokenKind::CharLiteral
            | TokenKind::StringLiteral => {
                self.bump();

                let kind = match token.value {
                    TokenValue::Integer { value, suffix } => LiteralKind::Integer { value, suffix },
                    TokenValue::Boolean(value) => LiteralKind::Boolean(value),
                    TokenValue::Char(value) => LiteralKind::Char(value),
                    TokenValue::String(bytes) => LiteralKind::String(bytes),
                    TokenValue::None => return Err(self.unexpected("literal")),
                };

                let literal = Literal {
                    id: self.create_node_id(),
                    span: token.span,
                    kind,
                };

                (ExpressionKind::Literal(Box::new(literal)), token.span)
            }
            TokenKind::Identifier => {
                self.bump();
                let identifier = self.identifier_from_token(&token);

                (ExpressionKind::Identifier(Box::new(identifier)), token.span)
            }
            // (expression)
            TokenKind::OpenParen => {
                self.bump();
                let inner = self.parse_expression()?;
                let close = self.expect(TokenKind::CloseParen)?;

                (
                    ExpressionKind::Grouping(Box::new(inner)),
                    token.span.to(close.span),
                )
            }
            // [a, b, c]
            TokenKind::OpenBracket => {
                self.bump();
                let elements =
                    self.parse_comma_separated(TokenKind::CloseBracket, Self::parse_expression)?;
                let close = self.expect(TokenKind::CloseBracket)?;

                (ExpressionKind::Array(elements), token.span.to(close.span))
            }
            _ => return Err(self.unexpected("expression")),
        };

        Ok(Expression::new(self.create_node_id(), span, kind))
    }
}

#[cfg(test)]
mod tests;
