use std::str::FromStr;

use strum::{Display, EnumIter, EnumString};

use crate::frontend::ast::{BinaryOperatorClass, BinaryOperatorKind};

/// Width and signedness of an integer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, Display)]
#[strum(serialize_all = "lowercase")]
pub enum IntegerKind {
    I8,
    I16,
    I32,
    I64,
    ISize,
    U8,
    U16,
    U32,
    U64,
    USize,
}

/// Type given to integer literals that have neither a suffix nor an expected type
pub const DEFAULT_INTEGER: IntegerKind = IntegerKind::I32;

impl IntegerKind {
    pub fn bits(self) -> u32 {
        match self {
            IntegerKind::I8 | IntegerKind::U8 => 8,
            IntegerKind::I16 | IntegerKind::U16 => 16,
            IntegerKind::I32 | IntegerKind::U32 => 32,
            IntegerKind::I64 | IntegerKind::U64 | IntegerKind::ISize | IntegerKind::USize => 64,
        }
    }

    pub fn bytes(self) -> u64 {
        u64::from(self.bits() / 8)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            IntegerKind::I8
                | IntegerKind::I16
                | IntegerKind::I32
                | IntegerKind::I64
                | IntegerKind::ISize
        )
    }

    pub fn min_value(self) -> i128 {
        if self.is_signed() {
            -(1i128 << (self.bits() - 1))
        } else {
            0
        }
    }

    pub fn max_value(self) -> i128 {
        if self.is_signed() {
            (1i128 << (self.bits() - 1)) - 1
        } else {
            (1i128 << self.bits()) - 1
        }
    }

    pub fn contains(self, value: i128) -> bool {
        (self.min_value()..=self.max_value()).contains(&value)
    }
}

/// Built-in scalar types nameable in source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    Char,
    Integer(IntegerKind),
}

impl FromStr for PrimitiveKind {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(PrimitiveKind::Bool),
            "char" => Ok(PrimitiveKind::Char),
            _ => s.parse().map(PrimitiveKind::Integer),
        }
    }
}

impl core::fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimitiveKind::Bool => write!(f, "bool"),
            PrimitiveKind::Char => write!(f, "char"),
            PrimitiveKind::Integer(kind) => write!(f, "{kind}"),
        }
    }
}

impl PrimitiveKind {
    pub fn supports_binary_op(&self, kind: BinaryOperatorKind) -> bool {
        match self {
            // Everything besides logical ops
            PrimitiveKind::Integer(_) => kind.class() != BinaryOperatorClass::Logical,
            // Only comparison ops
            PrimitiveKind::Char => matches!(
                kind.class(),
                BinaryOperatorClass::Equality | BinaryOperatorClass::Relational
            ),
            // Only equality and logical ops
            PrimitiveKind::Bool => matches!(
                kind.class(),
                BinaryOperatorClass::Equality | BinaryOperatorClass::Logical
            ),
        }
    }
}
