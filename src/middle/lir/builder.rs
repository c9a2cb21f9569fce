//! Incremental construction of an LIR function, one block at a time

use crate::{
    frontend::intern::InternedSymbol,
    index::IndexVec,
    middle::lir::{
        BinaryOperator, Block, BlockCall, BlockId, CastKind, Condition, Constant, Function,
        FunctionId, Instruction, InstructionKind, LoweringError, Signature, StackSlot,
        StackSlotId, Terminator, Type, ValueData, ValueDefinition, ValueId,
    },
};

type BuildResult<T> = Result<T, LoweringError>;

#[derive(Debug)]
pub struct FunctionBuilder {
    function: Function,
    /// Block instructions are appended to. `None` right after a terminator
    /// until another block is switched to.
    current: Option<BlockId>,
}

impl FunctionBuilder {
    /// Creates the function together with its entry block, which receives
    /// the function parameters as block parameters
    pub fn new(name: InternedSymbol, signature: Signature, has_return_slot: bool) -> Self {
        let mut builder = Self {
            function: Function {
                name,
                signature,
                has_return_slot,
                stack_slots: IndexVec::new(),
                values: IndexVec::new(),
                blocks: IndexVec::new(),
            },
            current: None,
        };

        let entry = builder.create_block();
        let parameters = builder.function.signature.parameters.clone();

        for ty in parameters {
            builder.append_block_parameter(entry, ty);
        }

        builder.current = Some(entry);
        builder
    }

    pub fn create_block(&mut self) -> BlockId {
        self.function.blocks.push(Block::default())
    }

    pub fn append_block_parameter(&mut self, block: BlockId, ty: Type) -> ValueId {
        let index = self.function.blocks[block].parameters.len();
        let value = self.function.values.push(ValueData {
            ty,
            definition: ValueDefinition::Parameter(block, index),
        });

        self.function.blocks[block].parameters.push(value);
        value
    }

    pub fn block_parameters(&self, block: BlockId) -> &[ValueId] {
        &self.function.blocks[block].parameters
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current
    }

    pub fn is_terminated(&self) -> bool {
        self.current.is_none()
    }

    pub fn value_type(&self, value: ValueId) -> Type {
        self.function.values[value].ty
    }

    pub fn create_stack_slot(
        &mut self,
        size: u64,
        align: u64,
        name: Option<InternedSymbol>,
    ) -> StackSlotId {
        self.function
            .stack_slots
            .push(StackSlot { size, align, name })
    }

    pub fn constant(&mut self, ty: Type, constant: Constant) -> ValueId {
        self.function.values.push(ValueData {
            ty,
            definition: ValueDefinition::Constant(constant),
        })
    }

    pub fn integer(&mut self, ty: Type, value: i64) -> ValueId {
        self.constant(ty, Constant::Integer(value))
    }

    pub fn stack_slot_address(&mut self, slot: StackSlotId) -> ValueId {
        self.constant(Type::Ptr, Constant::StackSlot(slot))
    }

    fn push(&mut self, kind: InstructionKind, result: Option<Type>) -> BuildResult<Option<ValueId>> {
        let block = self.current.ok_or(LoweringError::NoCurrentBlock)?;

        let result = result.map(|ty| {
            self.function.values.push(ValueData {
                ty,
                definition: ValueDefinition::Instruction(block),
            })
        });

        self.function.blocks[block]
            .instructions
            .push(Instruction { result, kind });

        Ok(result)
    }

    fn push_value(&mut self, kind: InstructionKind, ty: Type) -> BuildResult<ValueId> {
        self.push(kind, Some(ty))?
            .ok_or(LoweringError::NoCurrentBlock)
    }

    pub fn load(&mut self, ty: Type, address: ValueId) -> BuildResult<ValueId> {
        self.push_value(InstructionKind::Load { ty, address }, ty)
    }

    pub fn store(&mut self, address: ValueId, value: ValueId) -> BuildResult<()> {
        self.push(InstructionKind::Store { address, value }, None)
            .map(drop)
    }

    pub fn binary(
        &mut self,
        operator: BinaryOperator,
        lhs: ValueId,
        rhs: ValueId,
    ) -> BuildResult<ValueId> {
        let ty = self.value_type(lhs);

        self.push_value(InstructionKind::Binary { operator, lhs, rhs }, ty)
    }

    pub fn compare(
        &mut self,
        condition: Condition,
        lhs: ValueId,
        rhs: ValueId,
    ) -> BuildResult<ValueId> {
        self.push_value(
            InstructionKind::Compare {
                condition,
                lhs,
                rhs,
            },
            Type::I8,
        )
    }

    pub fn cast(&mut self, kind: CastKind, value: ValueId, to: Type) -> BuildResult<ValueId> {
        self.push_value(InstructionKind::Cast { kind, value, to }, to)
    }

    pub fn gep(
        &mut self,
        base: ValueId,
        offset: u64,
        index: Option<(ValueId, u64)>,
    ) -> BuildResult<ValueId> {
        self.push_value(
            InstructionKind::Gep {
                base,
                offset,
                index,
            },
            Type::Ptr,
        )
    }

    pub fn copy(&mut self, destination: ValueId, source: ValueId, size: u64) -> BuildResult<()> {
        self.push(
            InstructionKind::Copy {
                destination,
                source,
                size,
            },
            None,
        )
        .map(drop)
    }

    pub fn call(
        &mut self,
        callee: FunctionId,
        arguments: Vec<ValueId>,
        returns: Option<Type>,
    ) -> BuildResult<Option<ValueId>> {
        self.push(InstructionKind::Call { callee, arguments }, returns)
    }

    pub fn call_indirect(
        &mut self,
        callee: ValueId,
        signature: Signature,
        arguments: Vec<ValueId>,
    ) -> BuildResult<Option<ValueId>> {
        let returns = signature.returns;

        self.push(
            InstructionKind::CallIndirect {
                callee,
                signature,
                arguments,
            },
            returns,
        )
    }

    fn terminate(&mut self, terminator: Terminator) -> BuildResult<()> {
        let block = self.current.take().ok_or(LoweringError::NoCurrentBlock)?;

        self.function.blocks[block].terminator = Some(terminator);
        Ok(())
    }

    pub fn jump(&mut self, target: BlockCall) -> BuildResult<()> {
        self.terminate(Terminator::Jump(target))
    }

    pub fn branch(
        &mut self,
        condition: ValueId,
        then: BlockCall,
        otherwise: BlockCall,
    ) -> BuildResult<()> {
        self.terminate(Terminator::Branch {
            condition,
            then,
            otherwise,
        })
    }

    pub fn ret(&mut self, value: Option<ValueId>) -> BuildResult<()> {
        self.terminate(Terminator::Return(value))
    }

    pub fn finish(self) -> Function {
        self.function
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    #[test]
    fn entry_block_receives_parameters() {
        let builder = FunctionBuilder::new(
            InternedSymbol::new("f"),
            Signature {
                parameters: vec![Type::I32, Type::Ptr],
                returns: None,
            },
            false,
        );

        let parameters = builder.block_parameters(BlockId::ENTRY).to_vec();

        assert_eq!(parameters.len(), 2);
        assert_eq!(builder.value_type(parameters[1]), Type::Ptr);
        assert_eq!(builder.current_block(), Some(BlockId::ENTRY));
    }

    #[test]
    fn terminating_closes_the_block() {
        let mut builder = FunctionBuilder::new(
            InternedSymbol::new("g"),
            Signature {
                parameters: Vec::new(),
                returns: Some(Type::I8),
            },
            false,
        );

        let one = builder.integer(Type::I8, 1);
        builder.ret(Some(one)).unwrap();

        assert!(builder.is_terminated());
        assert_eq!(
            builder.load(Type::I8, one),
            Err(LoweringError::NoCurrentBlock)
        );

        let function = builder.finish();
        assert_eq!(function.values.len(), 1);
        assert_eq!(function.blocks[BlockId::new(0)].instructions.len(), 0);
    }
}
