use super::TypeChecker;
use crate::{
    diagnostics::{Diagnostic, DiagnosticKind},
    frontend::{
        ast::{
            BinaryOperator, BinaryOperatorClass, Expression, ExpressionKind,
            FunctionCallArgumentList, Identifier, LiteralKind, Type, UnaryOperator,
            UnaryOperatorKind,
        },
        lexer::Span,
    },
    middle::{
        primitive::IntegerKind,
        resolve::{SymbolId, SymbolKind},
        ty::{TypeId, TypeKind},
    },
};

/// Whether an expression denotes a location in memory, and whether that
/// location may be written to
enum Place {
    Mutable,
    /// Rooted in an immutable variable
    Immutable(SymbolId),
}

impl TypeChecker<'_, '_> {
    /// Computes the type of an expression and attaches it. `expected` is only
    /// a hint used to type literals, callers check the result against it.
    pub(super) fn check_expression(
        &mut self,
        expression: &Expression,
        expected: Option<TypeId>,
    ) -> TypeId {
        let ty = match &expression.kind {
            ExpressionKind::Literal(literal) => match &literal.kind {
                LiteralKind::Boolean(_) => TypeId::BOOL,
                LiteralKind::Char(_) => TypeId::CHAR,
                LiteralKind::Integer { value, suffix } => {
                    self.check_integer_literal(literal.span, *value, *suffix, expected, false)
                }
                LiteralKind::String(_) => self.types.slice(self.types.integer(IntegerKind::U8)),
            },
            ExpressionKind::Identifier(identifier) => self.check_identifier(identifier),
            ExpressionKind::Grouping(inner) => self.check_expression(inner, expected),
            ExpressionKind::Array(elements) => self.check_array(expression.span, elements, expected),
            ExpressionKind::FunctionCall { target, arguments } => {
                self.check_call(target, arguments)
            }
            ExpressionKind::Index { target, index } => self.check_index(target, index),
            ExpressionKind::Slice { target, start, end } => {
                self.check_slice(target, start.as_deref(), end.as_deref())
            }
            ExpressionKind::Field { target, field } => self.check_field(target, field),
            ExpressionKind::Binary { lhs, operator, rhs } => {
                self.check_binary(lhs, operator, rhs, expected)
            }
            ExpressionKind::Unary { operator, operand } => {
                self.check_unary(operator, operand, expected)
            }
            ExpressionKind::Cast { expression, ty } => self.check_cast(expression, ty),
            ExpressionKind::Assignment(assignment) => self.check_assignment(assignment),
        };

        self.attach(expression, ty)
    }

    fn attach(&self, expression: &Expression, ty: TypeId) -> TypeId {
        if let Err(ty) = expression.ty.set(ty) {
            if expression.ty() != Some(ty) {
                tracing::error!(id = ?expression.id, "expression type changed between checks");
                debug_assert!(false, "expression {:?} was given two types", expression.id);
            }
        }

        ty
    }

    fn check_integer_literal(
        &mut self,
        span: Span,
        value: u64,
        suffix: Option<IntegerKind>,
        expected: Option<TypeId>,
        negated: bool,
    ) -> TypeId {
        let kind = suffix
            .or_else(|| expected.and_then(|ty| self.types.integer_kind(ty)))
            .unwrap_or(self.default_integer);

        // Negating an unsigned literal is reported by the negation itself
        let value = match negated && kind.is_signed() {
            true => -i128::from(value),
            false => i128::from(value),
        };

        if !kind.contains(value) {
            self.diagnostics.error(
                DiagnosticKind::OverflowInLiteral,
                span,
                format!(
                    "literal `{value}` does not fit in `{kind}` (range is {}..={})",
                    kind.min_value(),
                    kind.max_value()
                ),
            );
        }

        self.types.integer(kind)
    }

    /// Checks the operand of a negation so that a literal is checked against
    /// the negative range of its type
    fn check_negated_literal(&mut self, operand: &Expression, expected: Option<TypeId>) -> TypeId {
        let ty = match &operand.kind {
            ExpressionKind::Grouping(inner) => self.check_negated_literal(inner, expected),
            ExpressionKind::Literal(literal) => match &literal.kind {
                LiteralKind::Integer { value, suffix } => {
                    self.check_integer_literal(literal.span, *value, *suffix, expected, true)
                }
                _ => return self.check_expression(operand, expected),
            },
            _ => return self.check_expression(operand, expected),
        };

        self.attach(operand, ty)
    }

    fn check_identifier(&mut self, identifier: &Identifier) -> TypeId {
        let Some(symbol) = identifier.symbol() else {
            return TypeId::ERROR;
        };

        let declaration = self.symbols.symbol(symbol);

        match declaration.kind {
            SymbolKind::Struct | SymbolKind::Field => {
                let diagnostic = self.with_declaration(
                    Diagnostic::error(
                        DiagnosticKind::TypeMismatch,
                        identifier.span,
                        format!(
                            "expected a value, found {} `{}`",
                            declaration.kind, identifier.name
                        ),
                    ),
                    Some(symbol),
                );
                self.diagnostics.report(diagnostic);

                TypeId::ERROR
            }
            _ => declaration.ty().unwrap_or(TypeId::ERROR),
        }
    }

    fn check_array(
        &mut self,
        span: Span,
        elements: &[Expression],
        expected: Option<TypeId>,
    ) -> TypeId {
        let expected_element = expected.and_then(|ty| match self.types.kind(ty) {
            TypeKind::Array { element, .. } => Some(element),
            _ => None,
        });

        let Some((first, rest)) = elements.split_first() else {
            return match expected_element {
                Some(element) => self.types.array(element, 0),
                None => {
                    self.diagnostics.error(
                        DiagnosticKind::TypeMismatch,
                        span,
                        "cannot infer the element type of an empty array",
                    );
                    TypeId::ERROR
                }
            };
        };

        let element = self.check_expression(first, expected_element);

        for other in rest {
            self.check_expected(other, element);
        }

        match element {
            TypeId::ERROR => TypeId::ERROR,
            element => {
                let array = self.types.array(element, elements.len() as u64);
                self.check_size(array, span)
            }
        }
    }

    fn check_call(
        &mut self,
        target: &Expression,
        arguments: &FunctionCallArgumentList,
    ) -> TypeId {
        let target_ty = self.check_expression(target, None);

        let (parameters, return_type) = match self.types.kind(target_ty) {
            TypeKind::Function {
                parameters,
                return_type,
            } => (parameters, return_type),
            kind => {
                if kind != TypeKind::Error {
                    self.diagnostics.error(
                        DiagnosticKind::TypeMismatch,
                        target.span,
                        format!(
                            "expected a function, found `{}`",
                            self.types.display(target_ty)
                        ),
                    );
                }

                for argument in &arguments.arguments {
                    self.check_expression(argument, None);
                }

                return TypeId::ERROR;
            }
        };

        if parameters.len() != arguments.arguments.len() {
            self.diagnostics.report(
                Diagnostic::error(
                    DiagnosticKind::ArgumentMismatch,
                    arguments.span,
                    format!(
                        "this function takes {} argument{} but {} {} supplied",
                        parameters.len(),
                        if parameters.len() == 1 { "" } else { "s" },
                        arguments.arguments.len(),
                        if arguments.arguments.len() == 1 { "was" } else { "were" }
                    ),
                )
                .with_secondary(target.span, format!("`{}`", self.types.display(target_ty))),
            );

            for (i, argument) in arguments.arguments.iter().enumerate() {
                self.check_expression(argument, parameters.get(i).copied());
            }

            return return_type;
        }

        for (argument, parameter) in arguments.arguments.iter().zip(parameters.iter()) {
            let actual = self.check_expression(argument, Some(*parameter));

            if actual != *parameter && actual != TypeId::ERROR && *parameter != TypeId::ERROR {
                self.diagnostics.error(
                    DiagnosticKind::ArgumentMismatch,
                    argument.span,
                    format!(
                        "expected argument of type `{}`, found `{}`",
                        self.types.display(*parameter),
                        self.types.display(actual)
                    ),
                );
            }
        }

        return_type
    }

    /// Checks an index or slice bound, which may be any integer type
    fn check_index_operand(&mut self, index: &Expression) {
        let usize = self.types.integer(IntegerKind::USize);
        let ty = self.check_expression(index, Some(usize));

        if ty != TypeId::ERROR && !self.types.is_integer(ty) {
            self.diagnostics.error(
                DiagnosticKind::TypeMismatch,
                index.span,
                format!("index must be an integer, found `{}`", self.types.display(ty)),
            );
        }
    }

    fn check_index(&mut self, target: &Expression, index: &Expression) -> TypeId {
        let target_ty = self.check_expression(target, None);
        self.check_index_operand(index);

        match self.types.kind(target_ty) {
            TypeKind::Array { element, length } => {
                if let Some(constant) = constant_index(index) {
                    if constant >= length {
                        self.report_out_of_bounds(index.span, constant, length);
                    }
                }

                element
            }
            TypeKind::Slice(element) => element,
            TypeKind::Error => TypeId::ERROR,
            _ => {
                self.diagnostics.error(
                    DiagnosticKind::TypeMismatch,
                    target.span,
                    format!(
                        "cannot index into a value of type `{}`",
                        self.types.display(target_ty)
                    ),
                );
                TypeId::ERROR
            }
        }
    }

    fn check_slice(
        &mut self,
        target: &Expression,
        start: Option<&Expression>,
        end: Option<&Expression>,
    ) -> TypeId {
        let target_ty = self.check_expression(target, None);

        for bound in [start, end].into_iter().flatten() {
            self.check_index_operand(bound);
        }

        match self.types.kind(target_ty) {
            TypeKind::Array { element, length } => {
                let start_value = start.and_then(constant_index);
                let end_value = end.and_then(constant_index);

                let out_of_bounds = [(start, start_value), (end, end_value)]
                    .into_iter()
                    .find_map(|bound| match bound {
                        (Some(bound), Some(value)) if value > length => Some((bound, value)),
                        _ => None,
                    });

                if let Some((bound, value)) = out_of_bounds {
                    self.report_out_of_bounds(bound.span, value, length);
                } else if let (Some(start_value), Some(end_value), Some(start)) =
                    (start_value, end_value, start)
                {
                    if start_value > end_value {
                        self.diagnostics.error(
                            DiagnosticKind::IndexOutOfBounds,
                            start.span,
                            format!("slice starts at {start_value} but ends at {end_value}"),
                        );
                    }
                }

                self.types.slice(element)
            }
            TypeKind::Slice(_) => target_ty,
            TypeKind::Error => TypeId::ERROR,
            _ => {
                self.diagnostics.error(
                    DiagnosticKind::TypeMismatch,
                    target.span,
                    format!("cannot slice a value of type `{}`", self.types.display(target_ty)),
                );
                TypeId::ERROR
            }
        }
    }

    fn report_out_of_bounds(&mut self, span: Span, index: u64, length: u64) {
        self.diagnostics.error(
            DiagnosticKind::IndexOutOfBounds,
            span,
            format!("index {index} is out of bounds for an array of length {length}"),
        );
    }

    fn check_field(&mut self, target: &Expression, field: &Identifier) -> TypeId {
        let target_ty = self.check_expression(target, None);

        // One level of pointer to struct is looked through
        let base = match self.types.kind(target_ty) {
            TypeKind::Pointer(pointee)
                if matches!(self.types.kind(pointee), TypeKind::Struct(_)) =>
            {
                pointee
            }
            _ => target_ty,
        };

        let found = match self.types.kind(base) {
            TypeKind::Error => return TypeId::ERROR,
            TypeKind::Struct(id) => self
                .types
                .struct_definition(id)
                .field(field.name)
                .map(|(_, field)| field.ty),
            TypeKind::Slice(element) => match field.name.value() {
                "len" => Some(self.types.integer(IntegerKind::USize)),
                "ptr" => Some(self.types.pointer(element)),
                _ => None,
            },
            TypeKind::Array { .. } => match field.name.value() {
                "len" => Some(self.types.integer(IntegerKind::USize)),
                _ => None,
            },
            _ => None,
        };

        match found {
            Some(ty) => ty,
            None => {
                self.diagnostics.report(
                    Diagnostic::error(
                        DiagnosticKind::UnknownField,
                        field.span,
                        format!(
                            "no field `{}` on type `{}`",
                            field.name,
                            self.types.display(base)
                        ),
                    )
                    .with_secondary(target.span, format!("`{}`", self.types.display(target_ty))),
                );

                TypeId::ERROR
            }
        }
    }

    fn check_binary(
        &mut self,
        lhs: &Expression,
        operator: &BinaryOperator,
        rhs: &Expression,
        expected: Option<TypeId>,
    ) -> TypeId {
        let class = operator.kind.class();

        if class == BinaryOperatorClass::Logical {
            let lhs = self.check_expected(lhs, TypeId::BOOL);
            let rhs = self.check_expected(rhs, TypeId::BOOL);

            return match lhs == TypeId::BOOL && rhs == TypeId::BOOL {
                true => TypeId::BOOL,
                false => TypeId::ERROR,
            };
        }

        let operand_expected = match class {
            BinaryOperatorClass::Arithmetic | BinaryOperatorClass::Bitwise => {
                expected.filter(|ty| self.types.is_integer(*ty))
            }
            _ => None,
        };

        // A literal takes the type of the other operand, so the other operand
        // is checked first
        let (lhs_ty, rhs_ty) = if is_untyped_literal(lhs) && !is_untyped_literal(rhs) {
            let rhs_ty = self.check_expression(rhs, operand_expected);
            let lhs_ty = self.check_expression(lhs, Some(rhs_ty));
            (lhs_ty, rhs_ty)
        } else {
            let lhs_ty = self.check_expression(lhs, operand_expected);
            let rhs_ty = self.check_expression(rhs, Some(lhs_ty));
            (lhs_ty, rhs_ty)
        };

        if lhs_ty == TypeId::ERROR || rhs_ty == TypeId::ERROR {
            return TypeId::ERROR;
        }

        let valid = lhs_ty == rhs_ty
            && match self.types.kind(lhs_ty) {
                TypeKind::Integer(_) => true,
                TypeKind::Char | TypeKind::Pointer(_) => operator.kind.is_comparison(),
                TypeKind::Bool => class == BinaryOperatorClass::Equality,
                _ => false,
            };

        if !valid {
            self.diagnostics.report(
                Diagnostic::error(
                    DiagnosticKind::TypeMismatch,
                    operator.span,
                    format!(
                        "cannot apply `{}` to `{}` and `{}`",
                        operator.kind,
                        self.types.display(lhs_ty),
                        self.types.display(rhs_ty)
                    ),
                )
                .with_secondary(lhs.span, format!("`{}`", self.types.display(lhs_ty)))
                .with_secondary(rhs.span, format!("`{}`", self.types.display(rhs_ty))),
            );

            return TypeId::ERROR;
        }

        match operator.kind.is_comparison() {
            true => TypeId::BOOL,
            false => lhs_ty,
        }
    }

    fn check_unary(
        &mut self,
        operator: &UnaryOperator,
        operand: &Expression,
        expected: Option<TypeId>,
    ) -> TypeId {
        let expected_integer = expected.filter(|ty| self.types.is_integer(*ty));

        match operator.kind {
            UnaryOperatorKind::Deref => {
                let expected = expected.map(|ty| self.types.pointer(ty));
                let ty = self.check_expression(operand, expected);

                match self.types.kind(ty) {
                    TypeKind::Pointer(pointee) => pointee,
                    TypeKind::Error => TypeId::ERROR,
                    _ => {
                        self.report_unary_mismatch(operator, operand, ty);
                        TypeId::ERROR
                    }
                }
            }
            UnaryOperatorKind::AddressOf => {
                let pointee = expected.and_then(|ty| match self.types.kind(ty) {
                    TypeKind::Pointer(pointee) => Some(pointee),
                    _ => None,
                });

                let ty = self.check_expression(operand, pointee);

                match ty != TypeId::ERROR && self.check_place(operand, false) {
                    true => self.types.pointer(ty),
                    false => TypeId::ERROR,
                }
            }
            UnaryOperatorKind::LogicalNot => {
                match self.check_expected(operand, TypeId::BOOL) {
                    TypeId::BOOL => TypeId::BOOL,
                    _ => TypeId::ERROR,
                }
            }
            UnaryOperatorKind::BitwiseNot => {
                let ty = self.check_expression(operand, expected_integer);

                match self.types.kind(ty) {
                    TypeKind::Integer(_) => ty,
                    TypeKind::Error => TypeId::ERROR,
                    _ => {
                        self.report_unary_mismatch(operator, operand, ty);
                        TypeId::ERROR
                    }
                }
            }
            UnaryOperatorKind::Negate => {
                let ty = self.check_negated_literal(operand, expected_integer);

                match self.types.kind(ty) {
                    TypeKind::Integer(kind) if kind.is_signed() => ty,
                    TypeKind::Error => TypeId::ERROR,
                    _ => {
                        self.report_unary_mismatch(operator, operand, ty);
                        TypeId::ERROR
                    }
                }
            }
        }
    }

    fn report_unary_mismatch(&mut self, operator: &UnaryOperator, operand: &Expression, ty: TypeId) {
        let expected = match operator.kind {
            UnaryOperatorKind::Deref => "a pointer",
            UnaryOperatorKind::Negate => "a signed integer",
            _ => "an integer",
        };

        self.diagnostics.report(
            Diagnostic::error(
                DiagnosticKind::TypeMismatch,
                operator.span,
                format!(
                    "`{}` needs {expected}, found `{}`",
                    operator.kind,
                    self.types.display(ty)
                ),
            )
            .with_secondary(operand.span, "this operand"),
        );
    }

    fn check_cast(&mut self, expression: &Expression, ty: &Type) -> TypeId {
        let target = self.lower_sized_type(ty);
        let expected = self.types.is_integer(target).then_some(target);
        let source = self.check_expression(expression, expected);

        if source != TypeId::ERROR && target != TypeId::ERROR && !self.is_valid_cast(source, target)
        {
            self.diagnostics.report(
                Diagnostic::error(
                    DiagnosticKind::InvalidCast,
                    ty.span,
                    format!(
                        "cannot cast `{}` as `{}`",
                        self.types.display(source),
                        self.types.display(target)
                    ),
                )
                .with_secondary(expression.span, "this value"),
            );
        }

        target
    }

    fn is_valid_cast(&self, source: TypeId, target: TypeId) -> bool {
        if source == target {
            return true;
        }

        matches!(
            (self.types.kind(source), self.types.kind(target)),
            (TypeKind::Integer(_), TypeKind::Integer(_))
                | (TypeKind::Integer(_), TypeKind::Char)
                | (TypeKind::Char, TypeKind::Integer(_))
                | (TypeKind::Bool, TypeKind::Integer(_))
                | (TypeKind::Pointer(_), TypeKind::Pointer(_))
                | (TypeKind::Pointer(_), TypeKind::Integer(IntegerKind::USize))
                | (TypeKind::Integer(IntegerKind::USize), TypeKind::Pointer(_))
                | (TypeKind::Function { .. }, TypeKind::Pointer(_))
        )
    }

    /// Finds whether an already checked expression is a place
    fn place(&self, expression: &Expression) -> Option<Place> {
        let kind_of = |expression: &Expression| {
            self.types.kind(expression.ty().unwrap_or(TypeId::ERROR))
        };

        match &expression.kind {
            ExpressionKind::Identifier(identifier) => {
                let symbol = identifier.symbol()?;
                let declaration = self.symbols.symbol(symbol);

                match (declaration.is_variable(), declaration.is_mutable) {
                    (true, true) => Some(Place::Mutable),
                    (true, false) => Some(Place::Immutable(symbol)),
                    (false, _) => None,
                }
            }
            ExpressionKind::Grouping(inner) => self.place(inner),
            ExpressionKind::Unary { operator, operand } => match operator.kind {
                UnaryOperatorKind::Deref => self.pointee_place(operand),
                _ => None,
            },
            ExpressionKind::Index { target, .. } => match kind_of(target) {
                TypeKind::Slice(_) => self.pointee_place(target),
                TypeKind::Error => Some(Place::Mutable),
                TypeKind::Array { .. } => self.place(target),
                _ => None,
            },
            ExpressionKind::Field { target, .. } => match kind_of(target) {
                TypeKind::Pointer(_) => self.pointee_place(target),
                TypeKind::Error => Some(Place::Mutable),
                TypeKind::Struct(_) => self.place(target),
                _ => None,
            },
            _ => None,
        }
    }

    /// The place behind a pointer or slice. Pointers carry no mutability, so
    /// only an address taken right there (`*&x`, `x[..]`) keeps the
    /// mutability of the variable it points into.
    fn pointee_place(&self, pointer: &Expression) -> Option<Place> {
        let borrowed = match &pointer.peel_groupings().kind {
            ExpressionKind::Unary { operator, operand }
                if operator.kind == UnaryOperatorKind::AddressOf =>
            {
                self.place(operand)
            }
            ExpressionKind::Slice { target, .. }
                if matches!(
                    self.types.kind(target.ty().unwrap_or(TypeId::ERROR)),
                    TypeKind::Array { .. }
                ) =>
            {
                self.place(target)
            }
            _ => None,
        };

        // Not addressable operands were reported where the address was taken
        Some(borrowed.unwrap_or(Place::Mutable))
    }

    /// Reports when an expression can't be addressed (or assigned to when
    /// `assigning`). Returns whether it can.
    pub(super) fn check_place(&mut self, expression: &Expression, assigning: bool) -> bool {
        if expression.ty() == Some(TypeId::ERROR) {
            return true;
        }

        match self.place(expression) {
            Some(Place::Mutable) => true,
            Some(Place::Immutable(_)) if !assigning => true,
            Some(Place::Immutable(symbol)) => {
                let name = self.symbols.symbol(symbol).name;
                let diagnostic = self.with_declaration(
                    Diagnostic::error(
                        DiagnosticKind::ImmutableAssignment,
                        expression.span,
                        format!("cannot assign to immutable `{name}`"),
                    ),
                    Some(symbol),
                );

                self.diagnostics.report(diagnostic);
                false
            }
            None => {
                self.diagnostics.error(
                    DiagnosticKind::NotAddressable,
                    expression.span,
                    match assigning {
                        true => "cannot assign to this expression",
                        false => "cannot take the address of this expression",
                    },
                );
                false
            }
        }
    }
}

/// An integer literal whose type comes from its context
fn is_untyped_literal(expression: &Expression) -> bool {
    match &expression.peel_groupings().kind {
        ExpressionKind::Literal(literal) => {
            matches!(literal.kind, LiteralKind::Integer { suffix: None, .. })
        }
        ExpressionKind::Unary { operator, operand } => {
            operator.kind == UnaryOperatorKind::Negate && is_untyped_literal(operand)
        }
        _ => false,
    }
}

fn constant_index(expression: &Expression) -> Option<u64> {
    match &expression.peel_groupings().kind {
        ExpressionKind::Literal(literal) => match literal.kind {
            LiteralKind::Integer { value, .. } => Some(value),
            _ => None,
        },
        _ => None,
    }
}

