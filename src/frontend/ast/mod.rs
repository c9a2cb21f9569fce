use std::{cell::OnceCell, rc::Rc};

use super::{SourceFile, intern::InternedSymbol};
use crate::{
    frontend::lexer::Span,
    middle::{
        primitive::{IntegerKind, PrimitiveKind},
        resolve::SymbolId,
        ty::TypeId,
    },
};

pub mod visit;

#[derive(Debug)]
pub struct Module<'source> {
    pub source_file: &'source SourceFile,
    /// Top level items in declaration order
    pub items: Vec<Item>,
    /// Number of node ids handed out while parsing
    pub node_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

#[derive(Debug)]
pub struct Item {
    pub id: NodeId,
    pub span: Span,
    pub kind: ItemKind,
}

#[derive(Debug)]
pub enum ItemKind {
    FunctionDefinition(Box<FunctionDefinition>),
    StructDefinition(Box<StructDefinition>),
    GlobalDefinition(Box<GlobalDefinition>),
}

#[derive(Debug)]
pub struct FunctionDefinition {
    pub id: NodeId,
    pub span: Span,
    pub signature: FunctionSignature,
    pub body: Block,
}

#[derive(Debug)]
pub struct FunctionSignature {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
    pub parameters: FunctionParameterList,
    pub return_type: Option<Type>,
}

#[derive(Debug)]
pub struct FunctionParameterList {
    pub id: NodeId,
    pub span: Span,
    pub parameters: Vec<FunctionParameter>,
}

#[derive(Debug)]
pub struct FunctionParameter {
    pub id: NodeId,
    pub span: Span,
    pub is_mutable: bool,
    pub name: Identifier,
    pub ty: Type,
}

#[derive(Debug)]
pub struct StructDefinition {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
    /// Fields in declaration order, which is also their layout order
    pub fields: Vec<StructField>,
}

#[derive(Debug)]
pub struct StructField {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
    pub ty: Type,
}

#[derive(Debug)]
pub struct GlobalDefinition {
    pub id: NodeId,
    pub span: Span,
    pub is_mutable: bool,
    pub name: Identifier,
    pub ty: Option<Type>,
    pub initializer: Box<Expression>,
}

#[derive(Debug)]
pub struct Type {
    pub id: NodeId,
    pub span: Span,
    pub kind: TypeKind,
}

#[derive(Debug)]
pub enum TypeKind {
    Unit,
    Primitive(PrimitiveKind),
    /// A struct name
    Named(Identifier),
    Pointer(Box<Type>),
    Slice(Box<Type>),
    Array {
        ty: Box<Type>,
        length: u64,
    },
    Function {
        parameters: Vec<Type>,
        return_type: Option<Box<Type>>,
    },
}

#[derive(Debug)]
pub struct Identifier {
    pub id: NodeId,
    pub span: Span,
    pub name: InternedSymbol,
    /// The symbol this identifier declares or refers to, set by name resolution
    pub resolution: OnceCell<SymbolId>,
}

impl Identifier {
    pub fn symbol(&self) -> Option<SymbolId> {
        self.resolution.get().copied()
    }
}

#[derive(Debug)]
pub struct Block {
    pub id: NodeId,
    pub span: Span,
    pub statements: Vec<Statement>,
}

#[derive(Debug)]
pub struct Statement {
    pub id: NodeId,
    pub span: Span,
    pub kind: StatementKind,
}

#[derive(Debug)]
pub enum StatementKind {
    /// Local (let) binding or declaration
    Local(Box<Local>),
    /// Expression terminated with a semicolon
    Expression(Box<Expression>),
    Assignment(Box<Assignment>),
    If(Box<If>),
    While(Box<While>),
    For(Box<For>),
    Return(Option<Box<Expression>>),
    Break,
    Continue,
    Block(Box<Block>),
    /// Empty statement (just a semicolon)
    Empty,
}

#[derive(Debug)]
pub struct Local {
    pub id: NodeId,
    pub span: Span,
    pub is_mutable: bool,
    pub name: Identifier,
    pub ty: Option<Type>,
    pub initializer: Option<Box<Expression>>,
}

#[derive(Debug)]
pub struct If {
    pub id: NodeId,
    pub span: Span,
    pub condition: Box<Expression>,
    pub positive: Block,
    pub negative: Option<Else>,
}

#[derive(Debug)]
pub enum Else {
    If(Box<If>),
    Block(Box<Block>),
}

#[derive(Debug)]
pub struct While {
    pub id: NodeId,
    pub span: Span,
    pub condition: Box<Expression>,
    pub body: Block,
}

#[derive(Debug)]
pub struct For {
    pub id: NodeId,
    pub span: Span,
    pub initializer: Option<Box<Statement>>,
    pub condition: Option<Box<Expression>>,
    pub step: Option<Box<Expression>>,
    pub body: Block,
}

#[derive(Debug)]
pub struct Assignment {
    pub id: NodeId,
    pub span: Span,
    /// `None` for plain `=`
    pub operator: Option<AssignmentOperator>,
    pub lhs: Box<Expression>,
    pub rhs: Box<Expression>,
}

#[derive(Debug)]
pub struct Expression {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExpressionKind,
    /// Set exactly once by the type checker
    pub ty: OnceCell<TypeId>,
}

impl Expression {
    pub fn new(id: NodeId, span: Span, kind: ExpressionKind) -> Self {
        Self {
            id,
            span,
            kind,
            ty: OnceCell::new(),
        }
    }

    pub fn ty(&self) -> Option<TypeId> {
        self.ty.get().copied()
    }

    /// Looks through any grouping parentheses
    pub fn peel_groupings(&self) -> &Expression {
        match &self.kind {
            ExpressionKind::Grouping(inner) => inner.peel_groupings(),
            _ => self,
        }
    }

    /// Whether the expression is the literal `true`, possibly parenthesized
    pub fn is_true_literal(&self) -> bool {
        matches!(
            &self.peel_groupings().kind,
            ExpressionKind::Literal(literal) if literal.kind == LiteralKind::Boolean(true)
        )
    }

    /// Whether the expression is built from literals only: a literal, a
    /// negated integer literal, or an array of constants
    pub fn is_constant(&self) -> bool {
        match &self.kind {
            ExpressionKind::Literal(_) => true,
            ExpressionKind::Grouping(inner) => inner.is_constant(),
            ExpressionKind::Unary { operator, operand } => {
                operator.kind == UnaryOperatorKind::Negate
                    && matches!(
                        &operand.peel_groupings().kind,
                        ExpressionKind::Literal(literal)
                            if matches!(literal.kind, LiteralKind::Integer { .. })
                    )
            }
            ExpressionKind::Array(elements) => elements.iter().all(Expression::is_constant),
            _ => false,
        }
    }
}

#[derive(Debug)]
pub enum ExpressionKind {
    Literal(Box<Literal>),
    Identifier(Box<Identifier>),
    Grouping(Box<Expression>),
    Array(Vec<Expression>),
    FunctionCall {
        target: Box<Expression>,
        arguments: Box<FunctionCallArgumentList>,
    },
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
    },
    Slice {
        target: Box<Expression>,
        start: Option<Box<Expression>>,
        end: Option<Box<Expression>>,
    },
    Field {
        target: Box<Expression>,
        field: Identifier,
    },
    Binary {
        lhs: Box<Expression>,
        operator: BinaryOperator,
        rhs: Box<Expression>,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Expression>,
    },
    Cast {
        expression: Box<Expression>,
        ty: Box<Type>,
    },
    Assignment(Box<Assignment>),
}

#[derive(Debug)]
pub struct FunctionCallArgumentList {
    pub id: NodeId,
    pub span: Span,
    pub arguments: Vec<Expression>,
}

#[derive(Debug)]
pub struct BinaryOperator {
    pub id: NodeId,
    pub span: Span,
    pub kind: BinaryOperatorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperatorKind {
    Add,                  // +
    Subtract,             // -
    Multiply,             // *
    Divide,               // /
    Modulus,              // %
    Equals,               // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=
    LogicalAnd,           // &&
    LogicalOr,            // ||
    BitwiseAnd,           // &
    BitwiseOr,            // |
    BitwiseXor,           // ^
    ShiftLeft,            // <<
    ShiftRight,           // >>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperatorClass {
    Arithmetic,
    Bitwise,
    Relational,
    Equality,
    Logical,
}

impl BinaryOperatorKind {
    pub fn class(self) -> BinaryOperatorClass {
        match self {
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide | Self::Modulus => {
                BinaryOperatorClass::Arithmetic
            }
            Self::BitwiseAnd
            | Self::BitwiseOr
            | Self::BitwiseXor
            | Self::ShiftLeft
            | Self::ShiftRight => BinaryOperatorClass::Bitwise,
            Self::LessThan
            | Self::LessThanOrEqualTo
            | Self::GreaterThan
            | Self::GreaterThanOrEqualTo => BinaryOperatorClass::Relational,
            Self::Equals | Self::NotEquals => BinaryOperatorClass::Equality,
            Self::LogicalAnd | Self::LogicalOr => BinaryOperatorClass::Logical,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self.class(),
            BinaryOperatorClass::Relational | BinaryOperatorClass::Equality
        )
    }
}

impl core::fmt::Display for BinaryOperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulus => "%",
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqualTo => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqualTo => ">=",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
            Self::BitwiseAnd => "&",
            Self::BitwiseOr => "|",
            Self::BitwiseXor => "^",
            Self::ShiftLeft => "<<",
            Self::ShiftRight => ">>",
        })
    }
}

#[derive(Debug)]
pub struct UnaryOperator {
    pub id: NodeId,
    pub span: Span,
    pub kind: UnaryOperatorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperatorKind {
    Deref,      // *
    AddressOf,  // &
    LogicalNot, // !
    BitwiseNot, // ~
    Negate,     // -
}

impl core::fmt::Display for UnaryOperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deref => write!(f, "*"),
            Self::AddressOf => write!(f, "&"),
            Self::LogicalNot => write!(f, "!"),
            Self::BitwiseNot => write!(f, "~"),
            Self::Negate => write!(f, "-"),
        }
    }
}

#[derive(Debug)]
pub struct Literal {
    pub id: NodeId,
    pub span: Span,
    pub kind: LiteralKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiteralKind {
    Boolean(bool), // true
    Char(char),    // 'A'
    /// 1 or 1u32
    Integer {
        value: u64,
        suffix: Option<IntegerKind>,
    },
    /// "hello, world" as UTF-8 bytes
    String(Rc<[u8]>),
}

#[derive(Debug)]
pub struct AssignmentOperator {
    pub id: NodeId,
    pub span: Span,
    pub kind: AssignmentOperatorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentOperatorKind {
    Add,        // +=
    Subtract,   // -=
    Multiply,   // *=
    Divide,     // /=
    Modulus,    // %=
    BitwiseAnd, // &=
    BitwiseOr,  // |=
    BitwiseXor, // ^=
    ShiftLeft,  // <<=
    ShiftRight, // >>=
}

impl AssignmentOperatorKind {
    /// The binary operator applied before storing
    pub fn binary_operator(self) -> BinaryOperatorKind {
        match self {
            Self::Add => BinaryOperatorKind::Add,
            Self::Subtract => BinaryOperatorKind::Subtract,
            Self::Multiply => BinaryOperatorKind::Multiply,
            Self::Divide => BinaryOperatorKind::Divide,
            Self::Modulus => BinaryOperatorKind::Modulus,
            Self::BitwiseAnd => BinaryOperatorKind::BitwiseAnd,
            Self::BitwiseOr => BinaryOperatorKind::BitwiseOr,
            Self::BitwiseXor => BinaryOperatorKind::BitwiseXor,
            Self::ShiftLeft => BinaryOperatorKind::ShiftLeft,
            Self::ShiftRight => BinaryOperatorKind::ShiftRight,
        }
    }
}
