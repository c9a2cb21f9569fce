//! Brook Type Checker
//!
//! Type checking a module has 2 main components:
//!
//!   1) analyzing struct definitions, function signatures and globals to build
//!      up the typing environment (the types of every module level symbol)
//!   2) checking every function body, attaching a type to each expression and
//!      validating each statement against the rules of the type system
//!
//! There is no inference beyond literals: an unsuffixed integer literal takes
//! the type its context expects, or the default integer type otherwise. Any
//! expression that fails to check gets the error type, which is compatible
//! with everything so one mistake yields one diagnostic.

use hashbrown::HashSet;

use crate::{
    diagnostics::{Diagnostic, DiagnosticCollector, DiagnosticKind},
    frontend::{
        ast::{
            Assignment, Block, Else, Expression, FunctionDefinition, GlobalDefinition, If,
            ItemKind, Local, Module, Statement, StatementKind, StructDefinition, Type, TypeKind,
        },
        lexer::Span,
    },
    middle::{
        layout::{LayoutError, MAX_OBJECT_SIZE, layout_of, struct_layout},
        primitive::IntegerKind,
        resolve::{SymbolId, SymbolKind, SymbolTable},
        ty::{StructField, StructId, TypeId, TypeKind as Ty, TypeTable},
    },
};

mod expr;

#[cfg(test)]
mod tests;

pub struct TypeChecker<'module, 'diagnostics> {
    symbols: &'module SymbolTable,
    types: &'module TypeTable,
    diagnostics: &'diagnostics mut DiagnosticCollector,
    /// Type of unsuffixed integer literals without an expected type
    default_integer: IntegerKind,
    /// Declared return type of the function being checked
    return_type: TypeId,
    /// Number of loops enclosing the statement being checked
    loop_depth: usize,
    /// Whether the innermost enclosing loop contains a `break`
    loop_breaks: bool,
}

impl<'module, 'diagnostics> TypeChecker<'module, 'diagnostics> {
    /// Checks every item of a resolved module, attaching types to expressions
    /// and symbols. Running it again on the same module attaches the same
    /// types.
    pub fn check_module(
        module: &'module Module<'module>,
        symbols: &'module SymbolTable,
        types: &'module TypeTable,
        default_integer: IntegerKind,
        diagnostics: &'diagnostics mut DiagnosticCollector,
    ) {
        let _span = tracing::debug_span!("type_check", origin = %module.source_file.origin).entered();

        let mut checker = Self {
            symbols,
            types,
            diagnostics,
            default_integer,
            return_type: TypeId::UNIT,
            loop_depth: 0,
            loop_breaks: false,
        };

        let structs: Vec<&StructDefinition> = module
            .items
            .iter()
            .filter_map(|item| match &item.kind {
                ItemKind::StructDefinition(definition) => Some(&**definition),
                _ => None,
            })
            .collect();

        // Every struct is declared before any field is looked at so fields
        // can name structs declared later in the module
        let declared: Vec<_> = structs
            .iter()
            .filter_map(|definition| Some((*definition, checker.declare_struct(definition)?)))
            .collect();

        for (definition, id) in &declared {
            checker.define_struct_fields(definition, *id);
        }

        checker.check_recursive_structs(&declared);
        checker.check_struct_sizes(&declared);

        for item in &module.items {
            if let ItemKind::FunctionDefinition(function) = &item.kind {
                checker.check_function_signature(function);
            }
        }

        for item in &module.items {
            if let ItemKind::GlobalDefinition(global) = &item.kind {
                checker.check_global_definition(global);
            }
        }

        for item in &module.items {
            if let ItemKind::FunctionDefinition(function) = &item.kind {
                checker.check_function_body(function);
            }
        }

        tracing::debug!(
            errors = checker.diagnostics.error_count(),
            types = checker.types.len(),
            "checked module"
        );
    }

    /// Records the type of a symbol. The type is set once; setting it again
    /// to the same type is a no-op.
    fn set_symbol_type(&self, symbol: SymbolId, ty: TypeId) {
        let cell = &self.symbols.symbol(symbol).ty;

        if let Err(ty) = cell.set(ty) {
            if cell.get() != Some(&ty) {
                tracing::error!(?symbol, "symbol type changed between checks");
                debug_assert!(false, "symbol {symbol:?} was given two different types");
            }
        }
    }

    fn symbol_type(&self, symbol: Option<SymbolId>) -> TypeId {
        symbol
            .and_then(|symbol| self.symbols.symbol(symbol).ty())
            .unwrap_or(TypeId::ERROR)
    }

    fn declare_struct(&mut self, definition: &StructDefinition) -> Option<StructId> {
        let symbol = definition.name.symbol()?;

        let ty = match self.symbols.symbol(symbol).ty() {
            Some(ty) => ty,
            None => {
                let (_, ty) = self.types.declare_struct(definition.name.name);
                self.set_symbol_type(symbol, ty);
                ty
            }
        };

        match self.types.kind(ty) {
            Ty::Struct(id) => Some(id),
            _ => None,
        }
    }

    fn define_struct_fields(&mut self, definition: &StructDefinition, id: StructId) {
        let fields = definition
            .fields
            .iter()
            .map(|field| StructField {
                name: field.name.name,
                ty: self.lower_type(&field.ty),
            })
            .collect();

        if !self.types.define_struct_fields(id, fields) {
            tracing::error!(name = %definition.name.name, "struct fields changed between checks");
        }
    }

    /// Reports every struct that contains itself by value, directly or
    /// through other structs and arrays
    fn check_recursive_structs(&mut self, structs: &[(&StructDefinition, StructId)]) {
        for (definition, id) in structs {
            let mut visited = HashSet::new();

            if self.contains_struct(*id, *id, &mut visited) {
                self.diagnostics.error(
                    DiagnosticKind::RecursiveType,
                    definition.name.span,
                    format!(
                        "struct `{}` contains itself by value and has infinite size",
                        definition.name.name
                    ),
                );
            }
        }
    }

    /// Reports struct fields and whole structs too large to lay out. Self
    /// containing structs were reported already.
    fn check_struct_sizes(&mut self, structs: &[(&StructDefinition, StructId)]) {
        for (definition, id) in structs {
            let fields = self.types.struct_definition(*id);
            let mut fields_fit = true;

            for (field, declared) in fields.fields().iter().zip(&definition.fields) {
                fields_fit &= self.check_size(field.ty, declared.ty.span) != TypeId::ERROR;
            }

            if !fields_fit {
                continue;
            }

            if let Err(LayoutError::TooLarge) = struct_layout(self.types, *id) {
                self.report_too_large(definition.name.span, &definition.name.name.to_string());
            }
        }
    }

    /// Passes `ty` through when it can be laid out, reports it and returns
    /// the error type otherwise
    fn check_size(&mut self, ty: TypeId, span: Span) -> TypeId {
        match layout_of(self.types, ty) {
            Err(LayoutError::TooLarge) => {
                let name = self.types.display(ty).to_string();
                self.report_too_large(span, &name);
                TypeId::ERROR
            }
            // Reported as `RecursiveType`
            Err(LayoutError::Recursive) | Ok(_) => ty,
        }
    }

    fn report_too_large(&mut self, span: Span, name: &str) {
        self.diagnostics.error(
            DiagnosticKind::TypeTooLarge,
            span,
            format!("`{name}` is larger than the maximum object size of {MAX_OBJECT_SIZE} bytes"),
        );
    }

    fn contains_struct(
        &self,
        container: StructId,
        target: StructId,
        visited: &mut HashSet<StructId>,
    ) -> bool {
        if !visited.insert(container) {
            return false;
        }

        let definition = self.types.struct_definition(container);

        definition.fields().iter().any(|field| {
            let mut ty = field.ty;

            while let Ty::Array { element, .. } = self.types.kind(ty) {
                ty = element;
            }

            match self.types.kind(ty) {
                Ty::Struct(id) => id == target || self.contains_struct(id, target, visited),
                _ => false,
            }
        })
    }

    /// Lowers a type annotation of a value, which must have a layout
    fn lower_sized_type(&mut self, ty: &Type) -> TypeId {
        let lowered = self.lower_type(ty);
        self.check_size(lowered, ty.span)
    }

    /// Computes the type an AST type annotation denotes
    fn lower_type(&self, ty: &Type) -> TypeId {
        match &ty.kind {
            TypeKind::Unit => TypeId::UNIT,
            TypeKind::Primitive(primitive) => self.types.primitive(*primitive),
            TypeKind::Named(identifier) => match identifier.symbol() {
                Some(symbol) if self.symbols.symbol(symbol).kind == SymbolKind::Struct => {
                    self.symbol_type(Some(symbol))
                }
                _ => TypeId::ERROR,
            },
            TypeKind::Pointer(pointee) => self.types.pointer(self.lower_type(pointee)),
            TypeKind::Slice(element) => self.types.slice(self.lower_type(element)),
            TypeKind::Array { ty, length } => self.types.array(self.lower_type(ty), *length),
            TypeKind::Function {
                parameters,
                return_type,
            } => {
                let parameters: Vec<_> = parameters.iter().map(|ty| self.lower_type(ty)).collect();
                let return_type = return_type
                    .as_ref()
                    .map_or(TypeId::UNIT, |ty| self.lower_type(ty));

                self.types.function(parameters, return_type)
            }
        }
    }

    fn check_function_signature(&mut self, function: &FunctionDefinition) {
        let signature = &function.signature;

        let parameters: Vec<_> = signature
            .parameters
            .parameters
            .iter()
            .map(|parameter| {
                let ty = self.lower_sized_type(&parameter.ty);

                if let Some(symbol) = parameter.name.symbol() {
                    self.set_symbol_type(symbol, ty);
                }

                ty
            })
            .collect();

        let return_type = signature
            .return_type
            .as_ref()
            .map_or(TypeId::UNIT, |ty| self.lower_sized_type(ty));

        if let Some(symbol) = signature.name.symbol() {
            self.set_symbol_type(symbol, self.types.function(parameters, return_type));
        }
    }

    fn check_global_definition(&mut self, global: &GlobalDefinition) {
        let declared = global.ty.as_ref().map(|ty| self.lower_sized_type(ty));

        if !global.initializer.is_constant() {
            self.diagnostics.error(
                DiagnosticKind::NonConstantInitializer,
                global.initializer.span,
                format!(
                    "initializer of global `{}` must be a constant",
                    global.name.name
                ),
            );
        }

        let ty = match declared {
            Some(declared) => {
                self.check_expected(&global.initializer, declared);
                declared
            }
            None => self.check_expression(&global.initializer, None),
        };

        if let Some(symbol) = global.name.symbol() {
            self.set_symbol_type(symbol, ty);
        }
    }

    fn check_function_body(&mut self, function: &FunctionDefinition) {
        let signature = &function.signature;

        self.return_type = match self.types.kind(self.symbol_type(signature.name.symbol())) {
            Ty::Function { return_type, .. } => return_type,
            // Duplicate definitions have no symbol of their own
            _ => signature
                .return_type
                .as_ref()
                .map_or(TypeId::UNIT, |ty| self.lower_type(ty)),
        };
        self.loop_depth = 0;
        self.loop_breaks = false;

        let diverges = self.check_block(&function.body);

        if !diverges && self.return_type != TypeId::UNIT && self.return_type != TypeId::ERROR {
            let span = signature
                .return_type
                .as_ref()
                .map_or(signature.span, |ty| ty.span);

            self.diagnostics.report(
                Diagnostic::error(
                    DiagnosticKind::MissingReturn,
                    span,
                    format!(
                        "function `{}` may reach the end of its body without returning `{}`",
                        signature.name.name,
                        self.types.display(self.return_type)
                    ),
                )
                .with_secondary(function.body.span, "not every path through this body returns"),
            );
        }
    }

    /// Checks every statement of a block. Returns whether control can never
    /// reach the end of the block.
    fn check_block(&mut self, block: &Block) -> bool {
        let mut diverges = false;
        let mut reported_unreachable = false;

        for statement in &block.statements {
            if diverges && !reported_unreachable && !matches!(statement.kind, StatementKind::Empty)
            {
                self.diagnostics.warning(
                    DiagnosticKind::UnreachableCode,
                    statement.span,
                    "unreachable statement",
                );
                reported_unreachable = true;
            }

            diverges |= self.check_statement(statement);
        }

        diverges
    }

    /// Returns whether the statement never completes normally
    fn check_statement(&mut self, statement: &Statement) -> bool {
        match &statement.kind {
            StatementKind::Local(local) => {
                self.check_local(local);
                false
            }
            StatementKind::Expression(expression) => {
                self.check_expression(expression, None);
                false
            }
            StatementKind::Assignment(assignment) => {
                self.check_assignment(assignment);
                false
            }
            StatementKind::If(if_statement) => self.check_if(if_statement),
            StatementKind::While(while_loop) => {
                self.check_condition(&while_loop.condition);
                let breaks = self.check_loop_body(&while_loop.body);

                // `while true` is only left through `break` or `return`
                while_loop.condition.is_true_literal() && !breaks
            }
            StatementKind::For(for_loop) => {
                if let Some(initializer) = &for_loop.initializer {
                    self.check_statement(initializer);
                }

                if let Some(condition) = &for_loop.condition {
                    self.check_condition(condition);
                }

                if let Some(step) = &for_loop.step {
                    self.check_expression(step, None);
                }

                let breaks = self.check_loop_body(&for_loop.body);

                let endless = for_loop
                    .condition
                    .as_ref()
                    .is_none_or(|condition| condition.is_true_literal());
                endless && !breaks
            }
            StatementKind::Return(expression) => {
                self.check_return(statement.span, expression.as_deref());
                true
            }
            StatementKind::Break | StatementKind::Continue => {
                if self.loop_depth == 0 {
                    let keyword = match statement.kind {
                        StatementKind::Break => "break",
                        _ => "continue",
                    };

                    self.diagnostics.error(
                        DiagnosticKind::InvalidLoopControl,
                        statement.span,
                        format!("`{keyword}` outside of a loop"),
                    );
                }

                if matches!(statement.kind, StatementKind::Break) {
                    self.loop_breaks = true;
                }

                true
            }
            StatementKind::Block(block) => self.check_block(block),
            StatementKind::Empty => false,
        }
    }

    /// Returns whether the body breaks out of the loop
    fn check_loop_body(&mut self, body: &Block) -> bool {
        let outer_breaks = std::mem::replace(&mut self.loop_breaks, false);

        self.loop_depth += 1;
        self.check_block(body);
        self.loop_depth -= 1;

        std::mem::replace(&mut self.loop_breaks, outer_breaks)
    }

    fn check_if(&mut self, if_statement: &If) -> bool {
        self.check_condition(&if_statement.condition);

        let positive = self.check_block(&if_statement.positive);
        let negative = match &if_statement.negative {
            Some(Else::If(nested)) => self.check_if(nested),
            Some(Else::Block(block)) => self.check_block(block),
            None => false,
        };

        positive && negative
    }

    fn check_condition(&mut self, condition: &Expression) {
        let ty = self.check_expression(condition, Some(TypeId::BOOL));

        if ty != TypeId::BOOL && ty != TypeId::ERROR {
            self.diagnostics.error(
                DiagnosticKind::InvalidConditionType,
                condition.span,
                format!(
                    "condition must be of type `bool`, found `{}`",
                    self.types.display(ty)
                ),
            );
        }
    }

    fn check_return(&mut self, span: Span, expression: Option<&Expression>) {
        match expression {
            Some(expression) => {
                self.check_expected(expression, self.return_type);
            }
            None if self.return_type != TypeId::UNIT && self.return_type != TypeId::ERROR => {
                self.diagnostics.error(
                    DiagnosticKind::TypeMismatch,
                    span,
                    format!(
                        "`return` without a value in a function returning `{}`",
                        self.types.display(self.return_type)
                    ),
                );
            }
            None => {}
        }
    }

    fn check_local(&mut self, local: &Local) {
        let declared = local.ty.as_ref().map(|ty| self.lower_sized_type(ty));

        let ty = match (declared, &local.initializer) {
            (Some(declared), Some(initializer)) => {
                self.check_expected(initializer, declared);
                declared
            }
            (None, Some(initializer)) => self.check_expression(initializer, None),
            (Some(declared), None) => declared,
            (None, None) => {
                self.diagnostics.error(
                    DiagnosticKind::TypeMismatch,
                    local.name.span,
                    format!(
                        "type annotation needed for `{}` without an initializer",
                        local.name.name
                    ),
                );
                TypeId::ERROR
            }
        };

        if let Some(symbol) = local.name.symbol() {
            self.set_symbol_type(symbol, ty);
        }
    }

    /// Checks an assignment, returning the type of the assigned place
    fn check_assignment(&mut self, assignment: &Assignment) -> TypeId {
        let place = self.check_expression(&assignment.lhs, None);
        self.check_place(&assignment.lhs, true);

        match &assignment.operator {
            None => {
                self.check_expected(&assignment.rhs, place);
            }
            Some(operator) => {
                let value = self.check_expression(&assignment.rhs, Some(place));

                if place == TypeId::ERROR || value == TypeId::ERROR {
                    return place;
                }

                if !self.types.is_integer(place) || place != value {
                    self.diagnostics.report(
                        Diagnostic::error(
                            DiagnosticKind::TypeMismatch,
                            operator.span,
                            format!(
                                "`{}=` needs two operands of the same integer type, found `{}` and `{}`",
                                operator.kind.binary_operator(),
                                self.types.display(place),
                                self.types.display(value)
                            ),
                        )
                        .with_secondary(assignment.rhs.span, "this value"),
                    );
                }
            }
        }

        place
    }

    /// Checks an expression against a required type. Reports a mismatch
    /// unless either side is the error type.
    fn check_expected(&mut self, expression: &Expression, expected: TypeId) -> TypeId {
        let actual = self.check_expression(expression, Some(expected));

        if actual != expected && actual != TypeId::ERROR && expected != TypeId::ERROR {
            self.diagnostics.error(
                DiagnosticKind::TypeMismatch,
                expression.span,
                format!(
                    "expected `{}`, found `{}`",
                    self.types.display(expected),
                    self.types.display(actual)
                ),
            );
        }

        actual
    }

    /// Points a diagnostic at the declaration of a symbol
    fn with_declaration(&self, diagnostic: Diagnostic, symbol: Option<SymbolId>) -> Diagnostic {
        match symbol {
            Some(symbol) => {
                let symbol = self.symbols.symbol(symbol);
                diagnostic.with_secondary(symbol.span, format!("`{}` declared here", symbol.name))
            }
            None => diagnostic,
        }
    }
}
