//! Structural checks run on every lowered function: each block ends in a
//! terminator, branches name existing blocks with the right number of
//! arguments, values are defined once and every use is dominated by its
//! definition.

use crate::{
    index::{Index, IndexVec},
    middle::lir::{BlockId, Function, LoweringError, Module, ValueDefinition, ValueId},
};

pub fn verify_module(module: &Module) -> Result<(), LoweringError> {
    module.functions.iter().try_for_each(verify_function)
}

pub fn verify_function(function: &Function) -> Result<(), LoweringError> {
    check_terminators(function)?;

    let definitions = collect_definitions(function)?;
    let dominators = Dominators::compute(function);

    for (block_id, block) in function.blocks.enumerate() {
        if !dominators.is_reachable(block_id) {
            continue;
        }

        let uses = block
            .instructions
            .iter()
            .enumerate()
            .flat_map(|(index, instruction)| {
                instruction
                    .kind
                    .uses()
                    .into_iter()
                    .map(move |value| (index + 1, value))
            })
            .chain(
                block
                    .terminator
                    .iter()
                    .flat_map(|terminator| terminator.uses())
                    .map(|value| (block.instructions.len() + 1, value)),
            );

        for (position, value) in uses {
            let dominated = match function.values.get(value).map(|data| data.definition) {
                Some(ValueDefinition::Constant(_)) => true,
                Some(_) => match definitions[value] {
                    Some((definition_block, definition_position)) if definition_block == block_id => {
                        definition_position < position
                    }
                    Some((definition_block, _)) => {
                        dominators.dominates(definition_block, block_id)
                    }
                    None => false,
                },
                None => false,
            };

            if !dominated {
                return Err(LoweringError::UndominatedUse {
                    function: function.name,
                    value,
                    block: block_id,
                });
            }
        }
    }

    Ok(())
}

fn check_terminators(function: &Function) -> Result<(), LoweringError> {
    for (block_id, block) in function.blocks.enumerate() {
        let Some(terminator) = &block.terminator else {
            return Err(LoweringError::MissingTerminator {
                function: function.name,
                block: block_id,
            });
        };

        for target in terminator.successors() {
            let Some(target_block) = function.blocks.get(target.block) else {
                return Err(LoweringError::UnknownBlock {
                    function: function.name,
                    block: target.block,
                });
            };

            if target_block.parameters.len() != target.arguments.len() {
                return Err(LoweringError::BlockArgumentMismatch {
                    function: function.name,
                    block: target.block,
                    expected: target_block.parameters.len(),
                    found: target.arguments.len(),
                });
            }
        }
    }

    Ok(())
}

/// Where each non-constant value is defined. Parameters sit at position 0,
/// the nth instruction at position n + 1.
fn collect_definitions(
    function: &Function,
) -> Result<IndexVec<ValueId, Option<(BlockId, usize)>>, LoweringError> {
    let mut definitions: IndexVec<ValueId, Option<(BlockId, usize)>> =
        IndexVec::from_raw(vec![None; function.values.len()]);

    let mut define = |value: ValueId, block: BlockId, position: usize| {
        match definitions.get_mut(value) {
            Some(slot) if slot.is_none() => {
                *slot = Some((block, position));
                Ok(())
            }
            _ => Err(LoweringError::ValueRedefined {
                function: function.name,
                value,
            }),
        }
    };

    for (block_id, block) in function.blocks.enumerate() {
        for parameter in &block.parameters {
            define(*parameter, block_id, 0)?;
        }

        for (index, instruction) in block.instructions.iter().enumerate() {
            if let Some(result) = instruction.result {
                define(result, block_id, index + 1)?;
            }
        }
    }

    Ok(definitions)
}

/// Immediate dominators of the blocks reachable from the entry, computed with
/// the iterative algorithm of Cooper, Harvey and Kennedy.
#[derive(Debug)]
pub struct Dominators {
    /// Reverse postorder number of every reachable block
    order: IndexVec<BlockId, Option<usize>>,
    /// Blocks in reverse postorder
    blocks: Vec<BlockId>,
    /// Immediate dominator of every block, by reverse postorder number
    immediate: Vec<usize>,
}

impl Dominators {
    pub fn compute(function: &Function) -> Self {
        let blocks = reverse_postorder(function);

        let mut order = IndexVec::from_raw(vec![None; function.blocks.len()]);
        for (number, block) in blocks.iter().enumerate() {
            order[*block] = Some(number);
        }

        let mut predecessors = vec![Vec::new(); blocks.len()];
        for (number, block) in blocks.iter().enumerate() {
            let Some(terminator) = &function.blocks[*block].terminator else {
                continue;
            };

            for target in terminator.successors() {
                if let Some(successor) = order.get(target.block).copied().flatten() {
                    predecessors[successor].push(number);
                }
            }
        }

        const UNSET: usize = usize::MAX;

        let mut immediate = vec![UNSET; blocks.len()];
        if !blocks.is_empty() {
            immediate[0] = 0;
        }

        let mut changed = true;
        while changed {
            changed = false;

            for number in 1..blocks.len() {
                let mut processed = predecessors[number]
                    .iter()
                    .copied()
                    .filter(|predecessor| immediate[*predecessor] != UNSET);

                let Some(first) = processed.next() else {
                    continue;
                };

                let new = processed.fold(first, |a, b| intersect(&immediate, a, b));

                if immediate[number] != new {
                    immediate[number] = new;
                    changed = true;
                }
            }
        }

        Self {
            order,
            blocks,
            immediate,
        }
    }

    fn number(&self, block: BlockId) -> Option<usize> {
        self.order.get(block).copied().flatten()
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.number(block).is_some()
    }

    /// Whether every path from the entry to `b` passes through `a`
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let (Some(a), Some(mut b)) = (self.number(a), self.number(b)) else {
            return false;
        };

        loop {
            if b == a {
                return true;
            }

            if b == 0 {
                return false;
            }

            b = self.immediate[b];
        }
    }

    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        let number = self.number(block)?;

        (number != 0).then(|| self.blocks[self.immediate[number]])
    }
}

fn intersect(immediate: &[usize], mut a: usize, mut b: usize) -> usize {
    while a != b {
        while a > b {
            a = immediate[a];
        }

        while b > a {
            b = immediate[b];
        }
    }

    a
}

fn reverse_postorder(function: &Function) -> Vec<BlockId> {
    if function.blocks.is_empty() {
        return Vec::new();
    }

    let mut visited = vec![false; function.blocks.len()];
    let mut postorder = Vec::with_capacity(function.blocks.len());
    // (block, index of the next successor to visit)
    let mut stack = vec![(BlockId::ENTRY, 0)];
    visited[BlockId::ENTRY.index()] = true;

    while let Some((block, next)) = stack.last_mut() {
        let successors = function.blocks[*block]
            .terminator
            .as_ref()
            .map(|terminator| terminator.successors())
            .unwrap_or_default();

        match successors.get(*next) {
            Some(target) => {
                *next += 1;

                let target = target.block;
                if visited.get(target.index()).is_some_and(|visited| !visited) {
                    visited[target.index()] = true;
                    stack.push((target, 0));
                }
            }
            None => {
                postorder.push(*block);
                stack.pop();
            }
        }
    }

    postorder.reverse();
    postorder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::intern::InternedSymbol,
        middle::lir::{BinaryOperator, BlockCall, Signature, Type, builder::FunctionBuilder},
    };

    fn builder(parameters: Vec<Type>, returns: Option<Type>) -> FunctionBuilder {
        FunctionBuilder::new(
            InternedSymbol::new("test"),
            Signature {
                parameters,
                returns,
            },
            false,
        )
    }

    #[test]
    fn diamond_verifies() {
        let mut b = builder(vec![Type::I8, Type::I32], Some(Type::I32));
        let parameters = b.block_parameters(BlockId::ENTRY).to_vec();

        let then = b.create_block();
        let otherwise = b.create_block();
        let merge = b.create_block();
        let result = b.append_block_parameter(merge, Type::I32);

        b.branch(parameters[0], BlockCall::new(then), BlockCall::new(otherwise))
            .unwrap();

        b.switch_to(then);
        let one = b.integer(Type::I32, 1);
        let sum = b
            .binary(BinaryOperator::Add, parameters[1], one)
            .unwrap();
        b.jump(BlockCall {
            block: merge,
            arguments: vec![sum],
        })
        .unwrap();

        b.switch_to(otherwise);
        b.jump(BlockCall {
            block: merge,
            arguments: vec![parameters[1]],
        })
        .unwrap();

        b.switch_to(merge);
        b.ret(Some(result)).unwrap();

        let function = b.finish();
        assert_eq!(verify_function(&function), Ok(()));

        let dominators = Dominators::compute(&function);
        assert_eq!(dominators.immediate_dominator(merge), Some(BlockId::ENTRY));
        assert!(dominators.dominates(BlockId::ENTRY, then));
        assert!(!dominators.dominates(then, merge));
    }

    #[test]
    fn missing_terminator_is_rejected() {
        let mut b = builder(Vec::new(), None);
        let dangling = b.create_block();
        b.jump(BlockCall::new(dangling)).unwrap();

        assert_eq!(
            verify_function(&b.finish()),
            Err(LoweringError::MissingTerminator {
                function: InternedSymbol::new("test"),
                block: dangling,
            })
        );
    }

    #[test]
    fn block_arguments_must_match_parameters() {
        let mut b = builder(Vec::new(), None);
        let target = b.create_block();
        b.append_block_parameter(target, Type::I8);
        b.jump(BlockCall::new(target)).unwrap();
        b.switch_to(target);
        b.ret(None).unwrap();

        assert!(matches!(
            verify_function(&b.finish()),
            Err(LoweringError::BlockArgumentMismatch {
                expected: 1,
                found: 0,
                ..
            })
        ));
    }

    #[test]
    fn use_outside_defining_branch_is_rejected() {
        let mut b = builder(vec![Type::I8, Type::Ptr], Some(Type::I32));
        let parameters = b.block_parameters(BlockId::ENTRY).to_vec();

        let then = b.create_block();
        let merge = b.create_block();
        b.branch(parameters[0], BlockCall::new(then), BlockCall::new(merge))
            .unwrap();

        b.switch_to(then);
        let loaded = b.load(Type::I32, parameters[1]).unwrap();
        b.jump(BlockCall::new(merge)).unwrap();

        b.switch_to(merge);
        b.ret(Some(loaded)).unwrap();

        assert_eq!(
            verify_function(&b.finish()),
            Err(LoweringError::UndominatedUse {
                function: InternedSymbol::new("test"),
                value: loaded,
                block: merge,
            })
        );
    }

    #[test]
    fn unreachable_blocks_are_not_checked_for_dominance() {
        let mut b = builder(vec![Type::Ptr], None);
        let parameter = b.block_parameters(BlockId::ENTRY)[0];
        b.ret(None).unwrap();

        let unreachable = b.create_block();
        b.switch_to(unreachable);
        let value = b.load(Type::I64, parameter).unwrap();
        b.store(parameter, value).unwrap();
        b.ret(None).unwrap();

        assert_eq!(verify_function(&b.finish()), Ok(()));
    }
}
