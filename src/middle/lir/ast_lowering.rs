//! Lowers a resolved and type checked AST into LIR.
//!
//! Every variable gets a stack slot; SSA values only ever carry scalars and
//! addresses. Aggregates (arrays, slices and structs) are represented by the
//! address of their storage and are moved with `copy`.

use hashbrown::HashMap;

use crate::{
    frontend::{
        ast::{
            self, BinaryOperatorKind, Else, ExpressionKind, ItemKind, LiteralKind,
            UnaryOperatorKind,
        },
        intern::InternedSymbol,
    },
    index::Index,
    middle::{
        layout::{Layout, layout_of, struct_layout},
        lir::{
            self, BinaryOperator, BlockCall, BlockId, CastKind, Condition, Constant, FunctionId,
            GlobalData, GlobalId, LoweringError, Relocation, Signature, StackSlotId, Type,
            ValueId, builder::FunctionBuilder, verify,
        },
        primitive::IntegerKind,
        resolve::{SymbolId, SymbolKind, SymbolTable},
        ty::{TypeId, TypeKind, TypeTable},
    },
};

type LoweringResult<T> = Result<T, LoweringError>;

/// Lowers every function and global of a module that checked without errors.
/// The result has been verified; an error here is a compiler defect.
pub fn lower_module(
    module: &ast::Module,
    symbols: &SymbolTable,
    types: &TypeTable,
) -> LoweringResult<lir::Module> {
    let _span = tracing::debug_span!("lower", origin = %module.source_file.origin).entered();

    let mut context = ModuleContext {
        symbols,
        types,
        module: lir::Module::default(),
        functions: HashMap::new(),
        globals: HashMap::new(),
        anonymous_count: 0,
    };

    // Function ids follow declaration order so calls can refer to functions
    // defined further down
    let definitions: Vec<&ast::FunctionDefinition> = module
        .items
        .iter()
        .filter_map(|item| match &item.kind {
            ItemKind::FunctionDefinition(definition) => Some(&**definition),
            _ => None,
        })
        .collect();

    for (index, definition) in definitions.iter().enumerate() {
        let symbol = context.symbol_of(&definition.signature.name)?;
        context.functions.insert(symbol, FunctionId::new(index));
    }

    for item in &module.items {
        if let ItemKind::GlobalDefinition(definition) = &item.kind {
            context.lower_global(definition)?;
        }
    }

    for definition in definitions {
        let function = BodyLoweringContext::lower(&mut context, definition)?;

        tracing::debug!(
            name = %function.name,
            blocks = function.blocks.len(),
            values = function.values.len(),
            "lowered function"
        );

        context.module.functions.push(function);
    }

    verify::verify_module(&context.module)?;

    Ok(context.module)
}

/// Machine type used to pass a value of the given type around. Aggregates
/// are passed by address; `()` has no representation.
pub fn abi_type(types: &TypeTable, ty: TypeId) -> LoweringResult<Option<Type>> {
    Ok(match types.kind(ty) {
        TypeKind::Unit => None,
        TypeKind::Bool => Some(Type::I8),
        TypeKind::Char => Some(Type::I32),
        TypeKind::Integer(kind) => Some(integer_type(kind)),
        TypeKind::Pointer(_)
        | TypeKind::Function { .. }
        | TypeKind::Array { .. }
        | TypeKind::Slice(_)
        | TypeKind::Struct(_) => Some(Type::Ptr),
        TypeKind::Error => {
            return Err(LoweringError::UnsupportedType(
                types.display(ty).to_string(),
            ));
        }
    })
}

fn integer_type(kind: IntegerKind) -> Type {
    match kind.bits() {
        8 => Type::I8,
        16 => Type::I16,
        32 => Type::I32,
        _ => Type::I64,
    }
}

/// Signature of a function type. An aggregate return value is written through
/// a hidden leading pointer parameter instead.
pub fn signature_of(types: &TypeTable, ty: TypeId) -> LoweringResult<(Signature, bool)> {
    let TypeKind::Function {
        parameters,
        return_type,
    } = types.kind(ty)
    else {
        return Err(LoweringError::UnsupportedType(
            types.display(ty).to_string(),
        ));
    };

    let has_return_slot = types.is_aggregate(return_type);

    let mut lowered = Vec::with_capacity(parameters.len() + 1);

    if has_return_slot {
        lowered.push(Type::Ptr);
    }

    for parameter in parameters.iter() {
        if let Some(ty) = abi_type(types, *parameter)? {
            lowered.push(ty);
        }
    }

    let returns = if has_return_slot {
        None
    } else {
        abi_type(types, return_type)?
    };

    Ok((
        Signature {
            parameters: lowered,
            returns,
        },
        has_return_slot,
    ))
}

struct ModuleContext<'a> {
    symbols: &'a SymbolTable,
    types: &'a TypeTable,
    module: lir::Module,
    functions: HashMap<SymbolId, FunctionId>,
    globals: HashMap<SymbolId, GlobalId>,
    /// Number of unnamed globals emitted for literals
    anonymous_count: usize,
}

impl ModuleContext<'_> {
    fn symbol_of(&self, identifier: &ast::Identifier) -> LoweringResult<SymbolId> {
        identifier
            .symbol()
            .ok_or(LoweringError::UnresolvedIdentifier(identifier.name))
    }

    fn symbol_type(&self, symbol: SymbolId) -> LoweringResult<TypeId> {
        let symbol = self.symbols.symbol(symbol);

        symbol
            .ty()
            .ok_or(LoweringError::MissingSymbolType(symbol.name))
    }

    fn anonymous_name(&mut self, prefix: &str) -> InternedSymbol {
        let name = InternedSymbol::new(&format!(".{prefix}.{}", self.anonymous_count));
        self.anonymous_count += 1;

        name
    }

    /// Emits string bytes as their own read-only global
    fn intern_string(&mut self, bytes: &[u8]) -> GlobalId {
        let name = self.anonymous_name("str");

        self.module.globals.push(GlobalData {
            name,
            is_mutable: false,
            align: 1,
            bytes: bytes.to_vec(),
            relocations: Vec::new(),
        })
    }

    /// Emits a read-only global holding the value of a constant literal
    fn constant_data(&mut self, expression: &ast::Expression, ty: TypeId) -> LoweringResult<GlobalId> {
        let name = self.anonymous_name("data");
        let layout = layout_of(self.types, ty)?;

        let mut data = GlobalData {
            name,
            is_mutable: false,
            align: layout.align,
            bytes: vec![0; layout.size as usize],
            relocations: Vec::new(),
        };

        self.write_constant(name, expression, 0, &mut data)?;

        Ok(self.module.globals.push(data))
    }

    fn lower_global(&mut self, definition: &ast::GlobalDefinition) -> LoweringResult<()> {
        let symbol = self.symbol_of(&definition.name)?;
        let ty = self.symbol_type(symbol)?;
        let layout = layout_of(self.types, ty)?;

        let mut data = GlobalData {
            name: definition.name.name,
            is_mutable: definition.is_mutable,
            align: layout.align,
            bytes: vec![0; layout.size as usize],
            relocations: Vec::new(),
        };

        self.write_constant(definition.name.name, &definition.initializer, 0, &mut data)?;

        let id = self.module.globals.push(data);
        self.globals.insert(symbol, id);

        Ok(())
    }

    /// Evaluates a constant initializer of `owner` into little endian bytes
    /// at `offset`
    fn write_constant(
        &mut self,
        owner: InternedSymbol,
        expression: &ast::Expression,
        offset: u64,
        data: &mut GlobalData,
    ) -> LoweringResult<()> {
        let ty = expression
            .ty()
            .ok_or(LoweringError::MissingType(expression.id))?;

        let write = |data: &mut GlobalData, value: i64, size: u64| {
            let start = offset as usize;
            let bytes = value.to_le_bytes();

            data.bytes[start..start + size as usize].copy_from_slice(&bytes[..size as usize]);
        };

        match &expression.kind {
            ExpressionKind::Grouping(inner) => self.write_constant(owner, inner, offset, data),
            ExpressionKind::Literal(literal) => match &literal.kind {
                LiteralKind::Boolean(value) => {
                    write(data, i64::from(*value), 1);
                    Ok(())
                }
                LiteralKind::Char(value) => {
                    write(data, i64::from(u32::from(*value)), 4);
                    Ok(())
                }
                LiteralKind::Integer { value, .. } => {
                    write(data, *value as i64, layout_of(self.types, ty)?.size);
                    Ok(())
                }
                LiteralKind::String(bytes) => {
                    let target = self.intern_string(bytes);

                    data.relocations.push(Relocation { offset, target });

                    let start = (offset + 8) as usize;
                    data.bytes[start..start + 8].copy_from_slice(&(bytes.len() as u64).to_le_bytes());

                    Ok(())
                }
            },
            ExpressionKind::Unary { operator, operand }
                if operator.kind == UnaryOperatorKind::Negate =>
            {
                match negated_literal(operand) {
                    Some(value) => {
                        write(data, value, layout_of(self.types, ty)?.size);
                        Ok(())
                    }
                    None => Err(LoweringError::NonConstantGlobal(owner)),
                }
            }
            ExpressionKind::Array(elements) => {
                let TypeKind::Array { element, .. } = self.types.kind(ty) else {
                    return Err(LoweringError::MissingType(expression.id));
                };
                let stride = layout_of(self.types, element)?.size;

                for (index, element) in elements.iter().enumerate() {
                    self.write_constant(owner, element, offset + index as u64 * stride, data)?;
                }

                Ok(())
            }
            _ => Err(LoweringError::NonConstantGlobal(owner)),
        }
    }
}

/// Value of `-literal`, wrapping for the minimum of a signed type
fn negated_literal(operand: &ast::Expression) -> Option<i64> {
    match &operand.peel_groupings().kind {
        ExpressionKind::Literal(literal) => match literal.kind {
            LiteralKind::Integer { value, .. } => Some((value as i64).wrapping_neg()),
            _ => None,
        },
        _ => None,
    }
}

enum Callee {
    Direct(FunctionId),
    /// Any expression of function type
    Indirect(ValueId),
}

struct LoopTargets {
    continue_to: BlockId,
    /// Created by the first `break` when the loop has no exit edge of its own
    break_to: Option<BlockId>,
}

struct BodyLoweringContext<'context, 'a> {
    context: &'context mut ModuleContext<'a>,
    builder: FunctionBuilder,
    storage: HashMap<SymbolId, StackSlotId>,
    /// Where aggregate return values are written
    return_slot: Option<ValueId>,
    return_type: TypeId,
    loops: Vec<LoopTargets>,
}

impl<'context, 'a> BodyLoweringContext<'context, 'a> {
    fn lower(
        context: &'context mut ModuleContext<'a>,
        definition: &ast::FunctionDefinition,
    ) -> LoweringResult<lir::Function> {
        let symbol = context.symbol_of(&definition.signature.name)?;
        let function_type = context.symbol_type(symbol)?;
        let (signature, has_return_slot) = signature_of(context.types, function_type)?;

        let TypeKind::Function { return_type, .. } = context.types.kind(function_type) else {
            return Err(LoweringError::MissingSymbolType(definition.signature.name.name));
        };

        let builder = FunctionBuilder::new(definition.signature.name.name, signature, has_return_slot);
        let mut parameters = builder.block_parameters(BlockId::ENTRY).to_vec().into_iter();

        let mut body = Self {
            context,
            builder,
            storage: HashMap::new(),
            return_slot: None,
            return_type,
            loops: Vec::new(),
        };

        if has_return_slot {
            body.return_slot = parameters.next();
        }

        let symbols = body.context.symbols;

        for variable in symbols.function_variables(symbol) {
            let layout = body.layout_of(body.context.symbol_type(variable)?)?;
            let slot = body.builder.create_stack_slot(
                layout.size,
                layout.align,
                Some(symbols.symbol(variable).name),
            );

            body.storage.insert(variable, slot);
        }

        // `()` parameters have no entry block parameter
        let mut declared = Vec::new();
        for parameter in &definition.signature.parameters.parameters {
            let symbol = body.context.symbol_of(&parameter.name)?;
            let ty = body.context.symbol_type(symbol)?;

            if ty != TypeId::UNIT {
                declared.push((symbol, ty));
            }
        }

        for ((symbol, ty), value) in declared.into_iter().zip(parameters) {
            let address = body.variable_address(symbol)?;
            body.store_value(address, value, ty)?;
        }

        body.lower_block(&definition.body)?;

        if let Some(block) = body.builder.current_block() {
            if body.return_type == TypeId::UNIT {
                body.builder.ret(None)?;
            } else {
                return Err(LoweringError::MissingTerminator {
                    function: definition.signature.name.name,
                    block,
                });
            }
        }

        Ok(body.builder.finish())
    }

    fn types(&self) -> &'a TypeTable {
        self.context.types
    }

    fn layout_of(&self, ty: TypeId) -> LoweringResult<Layout> {
        Ok(layout_of(self.types(), ty)?)
    }

    fn type_of(&self, expression: &ast::Expression) -> LoweringResult<TypeId> {
        expression
            .ty()
            .ok_or(LoweringError::MissingType(expression.id))
    }

    fn value_type(&self, ty: TypeId) -> LoweringResult<Type> {
        abi_type(self.types(), ty)?
            .ok_or_else(|| LoweringError::UnsupportedType(self.types().display(ty).to_string()))
    }

    fn variable_address(&mut self, symbol: SymbolId) -> LoweringResult<ValueId> {
        if let Some(slot) = self.storage.get(&symbol) {
            return Ok(self.builder.stack_slot_address(*slot));
        }

        if let Some(global) = self.context.globals.get(&symbol) {
            return Ok(self.builder.constant(Type::Ptr, Constant::Global(*global)));
        }

        Err(LoweringError::MissingStorage(
            self.context.symbols.symbol(symbol).name,
        ))
    }

    /// Scalars are loaded, aggregates are represented by their address and
    /// `()` is never loaded
    fn load_place(&mut self, address: ValueId, ty: TypeId) -> LoweringResult<Option<ValueId>> {
        if ty == TypeId::UNIT {
            return Ok(None);
        }

        if self.types().is_aggregate(ty) {
            return Ok(Some(address));
        }

        let value_type = self.value_type(ty)?;
        self.builder.load(value_type, address).map(Some)
    }

    fn store_value(&mut self, address: ValueId, value: ValueId, ty: TypeId) -> LoweringResult<()> {
        if self.types().is_aggregate(ty) {
            let size = self.layout_of(ty)?.size;
            self.builder.copy(address, value, size)
        } else {
            self.builder.store(address, value)
        }
    }

    fn temporary(&mut self, ty: TypeId) -> LoweringResult<ValueId> {
        let layout = self.layout_of(ty)?;
        let slot = self.builder.create_stack_slot(layout.size, layout.align, None);

        Ok(self.builder.stack_slot_address(slot))
    }

    fn lower_block(&mut self, block: &ast::Block) -> LoweringResult<()> {
        for statement in &block.statements {
            // Anything after a return, break or continue is unreachable
            if self.builder.is_terminated() {
                break;
            }

            self.lower_statement(statement)?;
        }

        Ok(())
    }

    fn lower_statement(&mut self, statement: &ast::Statement) -> LoweringResult<()> {
        match &statement.kind {
            ast::StatementKind::Local(local) => {
                if let Some(initializer) = &local.initializer {
                    let symbol = self.context.symbol_of(&local.name)?;
                    let ty = self.context.symbol_type(symbol)?;

                    // A `()` initializer only runs for its side effects
                    if let Some(value) = self.lower_expression(initializer)? {
                        let address = self.variable_address(symbol)?;
                        self.store_value(address, value, ty)?;
                    }
                }
            }
            ast::StatementKind::Expression(expression) => {
                self.lower_expression(expression)?;
            }
            ast::StatementKind::Assignment(assignment) => {
                self.lower_assignment(assignment)?;
            }
            ast::StatementKind::If(if_statement) => self.lower_if(if_statement)?,
            ast::StatementKind::While(while_loop) => self.lower_while(while_loop)?,
            ast::StatementKind::For(for_loop) => self.lower_for(for_loop)?,
            ast::StatementKind::Return(value) => self.lower_return(value.as_deref())?,
            ast::StatementKind::Break => {
                let targets = self
                    .loops
                    .last_mut()
                    .ok_or(LoweringError::LoopControlOutsideLoop)?;

                let target = match targets.break_to {
                    Some(block) => block,
                    None => *targets.break_to.insert(self.builder.create_block()),
                };
                self.builder.jump(BlockCall::new(target))?;
            }
            ast::StatementKind::Continue => {
                let target = self
                    .loops
                    .last()
                    .ok_or(LoweringError::LoopControlOutsideLoop)?
                    .continue_to;
                self.builder.jump(BlockCall::new(target))?;
            }
            ast::StatementKind::Block(block) => self.lower_block(block)?,
            ast::StatementKind::Empty => {}
        }

        Ok(())
    }

    fn lower_return(&mut self, value: Option<&ast::Expression>) -> LoweringResult<()> {
        let Some(expression) = value else {
            return self.builder.ret(None);
        };

        let value = self.lower_expression(expression)?;

        match (self.return_slot, value) {
            (Some(slot), Some(value)) => {
                let size = self.layout_of(self.return_type)?.size;

                self.builder.copy(slot, value, size)?;
                self.builder.ret(None)
            }
            (None, value) => self.builder.ret(value),
            (Some(_), None) => Err(LoweringError::MissingValue(expression.id)),
        }
    }

    fn lower_if(&mut self, if_statement: &ast::If) -> LoweringResult<()> {
        let condition = self.lower_value(&if_statement.condition)?;

        let positive = self.builder.create_block();
        let mut merge = None;

        let negative = match &if_statement.negative {
            Some(_) => self.builder.create_block(),
            None => *merge.insert(self.builder.create_block()),
        };

        self.builder.branch(
            condition,
            BlockCall::new(positive),
            BlockCall::new(negative),
        )?;

        self.builder.switch_to(positive);
        self.lower_block(&if_statement.positive)?;
        self.jump_to_merge(&mut merge)?;

        if let Some(else_branch) = &if_statement.negative {
            self.builder.switch_to(negative);

            match else_branch {
                Else::If(nested) => self.lower_if(nested)?,
                Else::Block(block) => self.lower_block(block)?,
            }

            self.jump_to_merge(&mut merge)?;
        }

        // Without a merge block both arms left the function or the loop
        if let Some(merge) = merge {
            self.builder.switch_to(merge);
        }

        Ok(())
    }

    fn jump_to_merge(&mut self, merge: &mut Option<BlockId>) -> LoweringResult<()> {
        if self.builder.is_terminated() {
            return Ok(());
        }

        let target = match merge {
            Some(block) => *block,
            None => *merge.insert(self.builder.create_block()),
        };

        self.builder.jump(BlockCall::new(target))
    }

    fn lower_while(&mut self, while_loop: &ast::While) -> LoweringResult<()> {
        let header = self.builder.create_block();
        let body = self.builder.create_block();

        self.builder.jump(BlockCall::new(header))?;

        self.builder.switch_to(header);
        let exit = self.lower_loop_condition(Some(while_loop.condition.as_ref()), body)?;

        self.builder.switch_to(body);
        let exit = self.lower_loop_body(&while_loop.body, header, exit)?;

        if !self.builder.is_terminated() {
            self.builder.jump(BlockCall::new(header))?;
        }

        self.leave_loop(exit);
        Ok(())
    }

    /// Ends the loop header. Returns the exit block, `None` when the loop can
    /// only be left through `break` or `return`.
    fn lower_loop_condition(
        &mut self,
        condition: Option<&ast::Expression>,
        body: BlockId,
    ) -> LoweringResult<Option<BlockId>> {
        match condition {
            Some(condition) if !condition.is_true_literal() => {
                let exit = self.builder.create_block();
                let condition = self.lower_value(condition)?;
                self.builder
                    .branch(condition, BlockCall::new(body), BlockCall::new(exit))?;
                Ok(Some(exit))
            }
            _ => {
                self.builder.jump(BlockCall::new(body))?;
                Ok(None)
            }
        }
    }

    /// Code after a loop that is never left stays unreachable
    fn leave_loop(&mut self, exit: Option<BlockId>) {
        if let Some(exit) = exit {
            self.builder.switch_to(exit);
        }
    }

    fn lower_for(&mut self, for_loop: &ast::For) -> LoweringResult<()> {
        if let Some(initializer) = &for_loop.initializer {
            self.lower_statement(initializer)?;
        }

        let header = self.builder.create_block();
        let body = self.builder.create_block();
        let step = self.builder.create_block();

        self.builder.jump(BlockCall::new(header))?;

        self.builder.switch_to(header);
        let exit = self.lower_loop_condition(for_loop.condition.as_deref(), body)?;

        self.builder.switch_to(body);
        let exit = self.lower_loop_body(&for_loop.body, step, exit)?;

        if !self.builder.is_terminated() {
            self.builder.jump(BlockCall::new(step))?;
        }

        self.builder.switch_to(step);
        if let Some(step) = &for_loop.step {
            self.lower_expression(step)?;
        }
        self.builder.jump(BlockCall::new(header))?;

        self.leave_loop(exit);
        Ok(())
    }

    /// Returns the block `break` jumps to, if anything leaves the loop
    fn lower_loop_body(
        &mut self,
        body: &ast::Block,
        continue_to: BlockId,
        break_to: Option<BlockId>,
    ) -> LoweringResult<Option<BlockId>> {
        self.loops.push(LoopTargets {
            continue_to,
            break_to,
        });

        let result = self.lower_block(body);

        let targets = self.loops.pop().ok_or(LoweringError::LoopControlOutsideLoop)?;
        result.map(|()| targets.break_to)
    }

    /// Lowers an expression that must produce a value
    fn lower_value(&mut self, expression: &ast::Expression) -> LoweringResult<ValueId> {
        self.lower_expression(expression)?
            .ok_or(LoweringError::MissingValue(expression.id))
    }

    /// Lowers an expression, `None` for expressions of type `()`
    fn lower_expression(&mut self, expression: &ast::Expression) -> LoweringResult<Option<ValueId>> {
        let ty = self.type_of(expression)?;

        let value = match &expression.kind {
            ExpressionKind::Literal(literal) => self.lower_literal(literal, ty)?,
            ExpressionKind::Identifier(identifier) => {
                let symbol = self.context.symbol_of(identifier)?;

                match self.context.symbols.symbol(symbol).kind {
                    SymbolKind::Function => {
                        let function = self
                            .context
                            .functions
                            .get(&symbol)
                            .copied()
                            .ok_or(LoweringError::MissingStorage(identifier.name))?;

                        self.builder.constant(Type::Ptr, Constant::Function(function))
                    }
                    _ => {
                        let address = self.variable_address(symbol)?;
                        return self.load_place(address, ty);
                    }
                }
            }
            ExpressionKind::Grouping(inner) => return self.lower_expression(inner),
            ExpressionKind::Array(_) if expression.is_constant() => {
                let global = self.context.constant_data(expression, ty)?;
                self.builder.constant(Type::Ptr, Constant::Global(global))
            }
            ExpressionKind::Array(elements) => self.lower_array(elements, ty)?,
            ExpressionKind::FunctionCall { target, arguments } => {
                return self.lower_call(target, &arguments.arguments, ty);
            }
            ExpressionKind::Index { .. } => {
                let address = self.lower_place(expression)?;
                return self.load_place(address, ty);
            }
            ExpressionKind::Slice { target, start, end } => {
                self.lower_slice(target, start.as_deref(), end.as_deref(), ty)?
            }
            ExpressionKind::Field { target, field } => {
                let target_type = self.type_of(target)?;

                match self.types().kind(target_type) {
                    TypeKind::Array { length, .. } if field.name.value() == "len" => {
                        self.lower_expression(target)?;
                        self.builder.integer(Type::I64, length as i64)
                    }
                    _ => {
                        let address = self.lower_place(expression)?;
                        return self.load_place(address, ty);
                    }
                }
            }
            ExpressionKind::Binary { lhs, operator, rhs } => {
                self.lower_binary(lhs, operator.kind, rhs)?
            }
            ExpressionKind::Unary { operator, operand } => {
                return self.lower_unary(operator.kind, operand, ty);
            }
            ExpressionKind::Cast { expression: operand, .. } => self.lower_cast(operand, ty)?,
            ExpressionKind::Assignment(assignment) => return self.lower_assignment(assignment),
        };

        Ok(Some(value))
    }

    fn lower_literal(&mut self, literal: &ast::Literal, ty: TypeId) -> LoweringResult<ValueId> {
        Ok(match &literal.kind {
            LiteralKind::Boolean(value) => self.builder.integer(Type::I8, i64::from(*value)),
            LiteralKind::Char(value) => self
                .builder
                .integer(Type::I32, i64::from(u32::from(*value))),
            LiteralKind::Integer { value, .. } => {
                let value_type = self.value_type(ty)?;
                self.builder.integer(value_type, *value as i64)
            }
            LiteralKind::String(bytes) => {
                let global = self.context.intern_string(bytes);
                let slice = self.temporary(ty)?;

                let pointer = self.builder.constant(Type::Ptr, Constant::Global(global));
                self.builder.store(slice, pointer)?;

                let length_address = self.builder.gep(slice, 8, None)?;
                let length = self.builder.integer(Type::I64, bytes.len() as i64);
                self.builder.store(length_address, length)?;

                slice
            }
        })
    }

    fn lower_array(&mut self, elements: &[ast::Expression], ty: TypeId) -> LoweringResult<ValueId> {
        let TypeKind::Array { element, .. } = self.types().kind(ty) else {
            return Err(LoweringError::UnsupportedType(
                self.types().display(ty).to_string(),
            ));
        };

        let stride = self.layout_of(element)?.size;
        let array = self.temporary(ty)?;

        for (index, expression) in elements.iter().enumerate() {
            let Some(value) = self.lower_expression(expression)? else {
                continue;
            };
            let address = self.builder.gep(array, index as u64 * stride, None)?;

            self.store_value(address, value, element)?;
        }

        Ok(array)
    }

    fn lower_call(
        &mut self,
        target: &ast::Expression,
        arguments: &[ast::Expression],
        return_type: TypeId,
    ) -> LoweringResult<Option<ValueId>> {
        let direct = match &target.peel_groupings().kind {
            ExpressionKind::Identifier(identifier) => identifier
                .symbol()
                .and_then(|symbol| self.context.functions.get(&symbol).copied()),
            _ => None,
        };

        let callee = match direct {
            Some(function) => Callee::Direct(function),
            None => Callee::Indirect(self.lower_value(target)?),
        };

        let return_slot = match self.types().is_aggregate(return_type) {
            true => Some(self.temporary(return_type)?),
            false => None,
        };

        let mut values = Vec::with_capacity(arguments.len() + 1);
        values.extend(return_slot);

        for argument in arguments {
            let ty = self.type_of(argument)?;
            let Some(value) = self.lower_expression(argument)? else {
                continue;
            };

            // The callee gets its own copy of aggregates
            if self.types().is_aggregate(ty) {
                let copy = self.temporary(ty)?;
                let size = self.layout_of(ty)?.size;

                self.builder.copy(copy, value, size)?;
                values.push(copy);
            } else {
                values.push(value);
            }
        }

        let (signature, _) = signature_of(self.types(), self.type_of(target)?)?;

        let result = match callee {
            Callee::Direct(function) => self.builder.call(function, values, signature.returns)?,
            Callee::Indirect(callee) => self.builder.call_indirect(callee, signature, values)?,
        };

        Ok(return_slot.or(result))
    }

    /// Address of a place expression. Aggregate values that are not places
    /// already are addresses.
    fn lower_place(&mut self, expression: &ast::Expression) -> LoweringResult<ValueId> {
        let ty = self.type_of(expression)?;

        match &expression.kind {
            ExpressionKind::Grouping(inner) => self.lower_place(inner),
            ExpressionKind::Identifier(identifier) => {
                let symbol = self.context.symbol_of(identifier)?;
                self.variable_address(symbol)
            }
            ExpressionKind::Unary { operator, operand }
                if operator.kind == UnaryOperatorKind::Deref =>
            {
                self.lower_value(operand)
            }
            ExpressionKind::Index { target, index } => {
                let target_type = self.type_of(target)?;
                let base = self.lower_value(target)?;
                let index = self.lower_index(index)?;
                let stride = self.layout_of(ty)?.size;

                match self.types().kind(target_type) {
                    TypeKind::Slice(_) => {
                        let pointer = self.builder.load(Type::Ptr, base)?;
                        self.builder.gep(pointer, 0, Some((index, stride)))
                    }
                    _ => self.builder.gep(base, 0, Some((index, stride))),
                }
            }
            ExpressionKind::Field { target, field } => {
                let target_type = self.type_of(target)?;
                let base = self.lower_value(target)?;

                let struct_id = match self.types().kind(target_type) {
                    TypeKind::Struct(id) => id,
                    TypeKind::Pointer(pointee) => match self.types().kind(pointee) {
                        TypeKind::Struct(id) => id,
                        _ => return Err(LoweringError::NotAddressable(expression.id)),
                    },
                    TypeKind::Slice(_) => {
                        let offset = if field.name.value() == "len" { 8 } else { 0 };
                        return self.builder.gep(base, offset, None);
                    }
                    _ => return Err(LoweringError::NotAddressable(expression.id)),
                };

                let definition = self.types().struct_definition(struct_id);
                let (index, _) = definition
                    .field(field.name)
                    .ok_or(LoweringError::NotAddressable(expression.id))?;
                let offset = struct_layout(self.types(), struct_id)?.offsets[index];

                self.builder.gep(base, offset, None)
            }
            _ if self.types().is_aggregate(ty) => self.lower_value(expression),
            _ => Err(LoweringError::NotAddressable(expression.id)),
        }
    }

    /// Lowers an index or bound, widened to 64 bits
    fn lower_index(&mut self, expression: &ast::Expression) -> LoweringResult<ValueId> {
        let ty = self.type_of(expression)?;
        let value = self.lower_value(expression)?;
        let signed = self
            .types()
            .integer_kind(ty)
            .is_some_and(IntegerKind::is_signed);

        self.convert_integer(value, signed, Type::I64)
    }

    fn lower_slice(
        &mut self,
        target: &ast::Expression,
        start: Option<&ast::Expression>,
        end: Option<&ast::Expression>,
        ty: TypeId,
    ) -> LoweringResult<ValueId> {
        let target_type = self.type_of(target)?;
        let base = self.lower_value(target)?;

        let (element, pointer, length) = match self.types().kind(target_type) {
            TypeKind::Array { element, length } => {
                // A slice is writable; constant literals live in read-only data
                let base = if target.is_constant() {
                    let copy = self.temporary(target_type)?;
                    let size = self.layout_of(target_type)?.size;
                    self.builder.copy(copy, base, size)?;
                    copy
                } else {
                    base
                };

                let length = self.builder.integer(Type::I64, length as i64);
                (element, base, length)
            }
            TypeKind::Slice(element) => {
                let pointer = self.builder.load(Type::Ptr, base)?;
                let length_address = self.builder.gep(base, 8, None)?;
                let length = self.builder.load(Type::I64, length_address)?;
                (element, pointer, length)
            }
            _ => {
                return Err(LoweringError::UnsupportedType(
                    self.types().display(target_type).to_string(),
                ));
            }
        };

        let start = match start {
            Some(start) => self.lower_index(start)?,
            None => self.builder.integer(Type::I64, 0),
        };
        let end = match end {
            Some(end) => self.lower_index(end)?,
            None => length,
        };

        let stride = self.layout_of(element)?.size;
        let first = self.builder.gep(pointer, 0, Some((start, stride)))?;
        let length = self.builder.binary(BinaryOperator::Sub, end, start)?;

        let slice = self.temporary(ty)?;
        self.builder.store(slice, first)?;
        let length_address = self.builder.gep(slice, 8, None)?;
        self.builder.store(length_address, length)?;

        Ok(slice)
    }

    fn lower_binary(
        &mut self,
        lhs: &ast::Expression,
        operator: BinaryOperatorKind,
        rhs: &ast::Expression,
    ) -> LoweringResult<ValueId> {
        if matches!(
            operator,
            BinaryOperatorKind::LogicalAnd | BinaryOperatorKind::LogicalOr
        ) {
            return self.lower_short_circuit(lhs, operator, rhs);
        }

        let operand_type = self.type_of(lhs)?;
        let lhs = self.lower_value(lhs)?;
        let rhs = self.lower_value(rhs)?;

        let signed = self
            .types()
            .integer_kind(operand_type)
            .is_some_and(IntegerKind::is_signed);

        self.emit_operation(operator, signed, lhs, rhs)
    }

    fn emit_operation(
        &mut self,
        operator: BinaryOperatorKind,
        signed: bool,
        lhs: ValueId,
        rhs: ValueId,
    ) -> LoweringResult<ValueId> {
        match operation(operator, signed) {
            Operation::Binary(operator) => self.builder.binary(operator, lhs, rhs),
            Operation::Compare(condition) => self.builder.compare(condition, lhs, rhs),
        }
    }

    /// `a && b` only evaluates `b` when `a` is true, `a || b` when it is
    /// false. The result arrives as the parameter of the merge block.
    fn lower_short_circuit(
        &mut self,
        lhs: &ast::Expression,
        operator: BinaryOperatorKind,
        rhs: &ast::Expression,
    ) -> LoweringResult<ValueId> {
        let lhs = self.lower_value(lhs)?;

        let evaluate_rhs = self.builder.create_block();
        let merge = self.builder.create_block();
        let result = self.builder.append_block_parameter(merge, Type::I8);

        let short_circuit = BlockCall {
            block: merge,
            arguments: vec![lhs],
        };

        if operator == BinaryOperatorKind::LogicalAnd {
            self.builder
                .branch(lhs, BlockCall::new(evaluate_rhs), short_circuit)?;
        } else {
            self.builder
                .branch(lhs, short_circuit, BlockCall::new(evaluate_rhs))?;
        }

        self.builder.switch_to(evaluate_rhs);
        let rhs = self.lower_value(rhs)?;
        self.builder.jump(BlockCall {
            block: merge,
            arguments: vec![rhs],
        })?;

        self.builder.switch_to(merge);
        Ok(result)
    }

    fn lower_unary(
        &mut self,
        operator: UnaryOperatorKind,
        operand: &ast::Expression,
        ty: TypeId,
    ) -> LoweringResult<Option<ValueId>> {
        let value = match operator {
            UnaryOperatorKind::Deref => {
                let address = self.lower_value(operand)?;
                return self.load_place(address, ty);
            }
            UnaryOperatorKind::AddressOf => self.lower_place(operand)?,
            UnaryOperatorKind::LogicalNot => {
                let value = self.lower_value(operand)?;
                let one = self.builder.integer(Type::I8, 1);
                self.builder.binary(BinaryOperator::Xor, value, one)?
            }
            UnaryOperatorKind::BitwiseNot => {
                let value = self.lower_value(operand)?;
                let ones = self.builder.integer(self.builder.value_type(value), -1);
                self.builder.binary(BinaryOperator::Xor, value, ones)?
            }
            UnaryOperatorKind::Negate => {
                let value_type = self.value_type(ty)?;

                match negated_literal(operand) {
                    Some(value) => self.builder.integer(value_type, value),
                    None => {
                        let value = self.lower_value(operand)?;
                        let zero = self.builder.integer(value_type, 0);
                        self.builder.binary(BinaryOperator::Sub, zero, value)?
                    }
                }
            }
        };

        Ok(Some(value))
    }

    fn lower_cast(&mut self, operand: &ast::Expression, to: TypeId) -> LoweringResult<ValueId> {
        let from = self.type_of(operand)?;
        let value = self.lower_value(operand)?;

        if from == to {
            return Ok(value);
        }

        let target = self.value_type(to)?;

        match (self.types().kind(from), self.types().kind(to)) {
            (TypeKind::Pointer(_) | TypeKind::Function { .. }, TypeKind::Pointer(_)) => Ok(value),
            (TypeKind::Pointer(_), _) => self.builder.cast(CastKind::PtrToInt, value, target),
            (_, TypeKind::Pointer(_)) => self.builder.cast(CastKind::IntToPtr, value, target),
            (TypeKind::Integer(kind), _) => self.convert_integer(value, kind.is_signed(), target),
            // bool and char are unsigned
            _ => self.convert_integer(value, false, target),
        }
    }

    fn convert_integer(&mut self, value: ValueId, signed: bool, to: Type) -> LoweringResult<ValueId> {
        let from = self.builder.value_type(value);

        if from.size() == to.size() {
            return Ok(value);
        }

        let kind = if from.size() > to.size() {
            CastKind::Trunc
        } else if signed {
            CastKind::SExt
        } else {
            CastKind::ZExt
        };

        self.builder.cast(kind, value, to)
    }

    /// Lowers an assignment. As an expression it produces the stored value,
    /// or the address of the place for aggregates.
    fn lower_assignment(&mut self, assignment: &ast::Assignment) -> LoweringResult<Option<ValueId>> {
        let ty = self.type_of(&assignment.lhs)?;
        let address = self.lower_place(&assignment.lhs)?;

        let Some(operator) = &assignment.operator else {
            let Some(value) = self.lower_expression(&assignment.rhs)? else {
                return Ok(None);
            };
            self.store_value(address, value, ty)?;

            return Ok(Some(if self.types().is_aggregate(ty) {
                address
            } else {
                value
            }));
        };

        let value_type = self.value_type(ty)?;
        let current = self.builder.load(value_type, address)?;
        let rhs = self.lower_value(&assignment.rhs)?;

        let signed = self
            .types()
            .integer_kind(ty)
            .is_some_and(IntegerKind::is_signed);
        let result = self.emit_operation(operator.kind.binary_operator(), signed, current, rhs)?;

        self.builder.store(address, result)?;
        Ok(Some(result))
    }
}

enum Operation {
    Binary(BinaryOperator),
    Compare(Condition),
}

/// Picks the machine operation for a source operator. Division, remainder,
/// right shifts and orderings depend on the signedness of the operands;
/// `bool`, `char` and pointers count as unsigned.
fn operation(operator: BinaryOperatorKind, signed: bool) -> Operation {
    use BinaryOperatorKind as Op;

    match operator {
        Op::Add => Operation::Binary(BinaryOperator::Add),
        Op::Subtract => Operation::Binary(BinaryOperator::Sub),
        Op::Multiply => Operation::Binary(BinaryOperator::Mul),
        Op::Divide if signed => Operation::Binary(BinaryOperator::SDiv),
        Op::Divide => Operation::Binary(BinaryOperator::UDiv),
        Op::Modulus if signed => Operation::Binary(BinaryOperator::SRem),
        Op::Modulus => Operation::Binary(BinaryOperator::URem),
        Op::BitwiseAnd | Op::LogicalAnd => Operation::Binary(BinaryOperator::And),
        Op::BitwiseOr | Op::LogicalOr => Operation::Binary(BinaryOperator::Or),
        Op::BitwiseXor => Operation::Binary(BinaryOperator::Xor),
        Op::ShiftLeft => Operation::Binary(BinaryOperator::Shl),
        Op::ShiftRight if signed => Operation::Binary(BinaryOperator::AShr),
        Op::ShiftRight => Operation::Binary(BinaryOperator::LShr),
        Op::Equals => Operation::Compare(Condition::Eq),
        Op::NotEquals => Operation::Compare(Condition::Ne),
        Op::LessThan if signed => Operation::Compare(Condition::SLt),
        Op::LessThan => Operation::Compare(Condition::ULt),
        Op::LessThanOrEqualTo if signed => Operation::Compare(Condition::SLe),
        Op::LessThanOrEqualTo => Operation::Compare(Condition::ULe),
        Op::GreaterThan if signed => Operation::Compare(Condition::SGt),
        Op::GreaterThan => Operation::Compare(Condition::UGt),
        Op::GreaterThanOrEqualTo if signed => Operation::Compare(Condition::SGe),
        Op::GreaterThanOrEqualTo => Operation::Compare(Condition::UGe),
    }
}
