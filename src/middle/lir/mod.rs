//! LIR (Low-level Intermediate Representation). In this form, loops and
//! conditionals are simplified to basic blocks and branches, expression trees
//! are flattened into ordered SSA instructions and every aggregate is handled
//! through the address of its storage.

use thiserror::Error;

use crate::{
    frontend::{ast::NodeId, intern::InternedSymbol},
    index::{IndexVec, simple_index},
    middle::layout::LayoutError,
};

pub mod ast_lowering;
pub mod builder;
pub mod pretty_print;
pub mod verify;

simple_index! {
    /// Identifies a function within an LIR module
    pub struct FunctionId;
}

simple_index! {
    /// Identifies a global data declaration within an LIR module
    pub struct GlobalId;
}

simple_index! {
    /// Identifies an LIR block
    pub struct BlockId;
}

impl BlockId {
    pub const ENTRY: Self = Self(0);
}

simple_index! {
    /// Identifies an SSA value within a function
    pub struct ValueId;
}

simple_index! {
    /// Identifies a stack allocation within a function
    pub struct StackSlotId;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Module {
    pub functions: IndexVec<FunctionId, Function>,
    pub globals: IndexVec<GlobalId, GlobalData>,
}

impl Module {
    pub fn block_count(&self) -> usize {
        self.functions.iter().map(|function| function.blocks.len()).sum()
    }
}

/// Initialized static data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalData {
    pub name: InternedSymbol,
    pub is_mutable: bool,
    pub align: u64,
    pub bytes: Vec<u8>,
    /// Pointer sized locations within `bytes` which hold the address of
    /// another global
    pub relocations: Vec<Relocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub offset: u64,
    pub target: GlobalId,
}

/// Machine level value types. Aggregates only ever exist in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    I8,
    I16,
    I32,
    I64,
    Ptr,
}

impl Type {
    pub fn size(self) -> u64 {
        match self {
            Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 => 4,
            Type::I64 | Type::Ptr => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub parameters: Vec<Type>,
    pub returns: Option<Type>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: InternedSymbol,
    pub signature: Signature,
    /// Whether the first parameter is the address the (aggregate) return
    /// value is written to
    pub has_return_slot: bool,
    pub stack_slots: IndexVec<StackSlotId, StackSlot>,
    pub values: IndexVec<ValueId, ValueData>,
    pub blocks: IndexVec<BlockId, Block>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSlot {
    pub size: u64,
    pub align: u64,
    /// The variable stored here, `None` for temporaries
    pub name: Option<InternedSymbol>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueData {
    pub ty: Type,
    pub definition: ValueDefinition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDefinition {
    /// Result of an instruction in the given block
    Instruction(BlockId),
    /// The nth parameter of a block
    Parameter(BlockId, usize),
    Constant(Constant),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    /// Only the bits that fit the value's type are meaningful
    Integer(i64),
    Null,
    StackSlot(StackSlotId),
    Global(GlobalId),
    Function(FunctionId),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub parameters: Vec<ValueId>,
    pub instructions: Vec<Instruction>,
    /// Only `None` while the block is being built
    pub terminator: Option<Terminator>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub result: Option<ValueId>,
    pub kind: InstructionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionKind {
    Load {
        ty: Type,
        address: ValueId,
    },
    Store {
        address: ValueId,
        value: ValueId,
    },
    Binary {
        operator: BinaryOperator,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Produces an `i8` that is either 0 or 1
    Compare {
        condition: Condition,
        lhs: ValueId,
        rhs: ValueId,
    },
    Cast {
        kind: CastKind,
        value: ValueId,
        to: Type,
    },
    /// `base + offset + index * stride`
    Gep {
        base: ValueId,
        offset: u64,
        index: Option<(ValueId, u64)>,
    },
    Copy {
        destination: ValueId,
        source: ValueId,
        size: u64,
    },
    Call {
        callee: FunctionId,
        arguments: Vec<ValueId>,
    },
    CallIndirect {
        callee: ValueId,
        signature: Signature,
        arguments: Vec<ValueId>,
    },
}

impl InstructionKind {
    /// Every value read by the instruction, in operand order
    pub fn uses(&self) -> Vec<ValueId> {
        match self {
            InstructionKind::Load { address, .. } => vec![*address],
            InstructionKind::Store { address, value } => vec![*address, *value],
            InstructionKind::Binary { lhs, rhs, .. } | InstructionKind::Compare { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            InstructionKind::Cast { value, .. } => vec![*value],
            InstructionKind::Gep { base, index, .. } => {
                std::iter::once(*base).chain(index.map(|(index, _)| index)).collect()
            }
            InstructionKind::Copy {
                destination,
                source,
                ..
            } => vec![*destination, *source],
            InstructionKind::Call { arguments, .. } => arguments.clone(),
            InstructionKind::CallIndirect {
                callee, arguments, ..
            } => std::iter::once(*callee).chain(arguments.iter().copied()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    /// Logical (zero filling) shift right
    LShr,
    /// Arithmetic (sign filling) shift right
    AShr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Eq,
    Ne,
    SLt,
    SLe,
    SGt,
    SGe,
    ULt,
    ULe,
    UGt,
    UGe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastKind {
    Trunc,
    SExt,
    ZExt,
    PtrToInt,
    IntToPtr,
}

/// A branch target together with the values of its block parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCall {
    pub block: BlockId,
    pub arguments: Vec<ValueId>,
}

impl BlockCall {
    pub fn new(block: BlockId) -> Self {
        Self {
            block,
            arguments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Jump(BlockCall),
    Branch {
        condition: ValueId,
        then: BlockCall,
        otherwise: BlockCall,
    },
    Return(Option<ValueId>),
}

impl Terminator {
    pub fn successors(&self) -> Vec<&BlockCall> {
        match self {
            Terminator::Jump(target) => vec![target],
            Terminator::Branch {
                then, otherwise, ..
            } => vec![then, otherwise],
            Terminator::Return(_) => Vec::new(),
        }
    }

    pub fn uses(&self) -> Vec<ValueId> {
        match self {
            Terminator::Jump(target) => target.arguments.clone(),
            Terminator::Branch {
                condition,
                then,
                otherwise,
            } => std::iter::once(*condition)
                .chain(then.arguments.iter().copied())
                .chain(otherwise.arguments.iter().copied())
                .collect(),
            Terminator::Return(value) => value.iter().copied().collect(),
        }
    }
}

/// A compiler defect found while lowering a checked module. Never caused by
/// the source program itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoweringError {
    #[error("expression {0:?} was never given a type")]
    MissingType(NodeId),
    #[error("`{0}` was never given a type")]
    MissingSymbolType(InternedSymbol),
    #[error("identifier `{0}` is not bound to a symbol")]
    UnresolvedIdentifier(InternedSymbol),
    #[error("`{0}` has no storage")]
    MissingStorage(InternedSymbol),
    #[error("expression {0:?} produces no value")]
    MissingValue(NodeId),
    #[error("expression {0:?} is not addressable")]
    NotAddressable(NodeId),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("type `{0}` has no machine representation here")]
    UnsupportedType(String),
    #[error("`break` or `continue` outside of a loop")]
    LoopControlOutsideLoop,
    #[error("initializer of global `{0}` is not constant")]
    NonConstantGlobal(InternedSymbol),
    #[error("instruction emitted after the current block was terminated")]
    NoCurrentBlock,
    #[error("in `{function}`: block {block:?} has no terminator")]
    MissingTerminator {
        function: InternedSymbol,
        block: BlockId,
    },
    #[error("in `{function}`: branch to unknown block {block:?}")]
    UnknownBlock {
        function: InternedSymbol,
        block: BlockId,
    },
    #[error("in `{function}`: block {block:?} takes {expected} arguments but {found} were passed")]
    BlockArgumentMismatch {
        function: InternedSymbol,
        block: BlockId,
        expected: usize,
        found: usize,
    },
    #[error("in `{function}`: value {value:?} is defined more than once")]
    ValueRedefined {
        function: InternedSymbol,
        value: ValueId,
    },
    #[error("in `{function}`: value {value:?} is used in {block:?} where its definition does not dominate")]
    UndominatedUse {
        function: InternedSymbol,
        value: ValueId,
        block: BlockId,
    },
}
