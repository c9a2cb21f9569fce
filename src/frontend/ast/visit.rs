//! Trait definition for an AST visitor which walks the tree in DFS order

use super::{
    Assignment, Block, Else, Expression, ExpressionKind, For, FunctionCallArgumentList,
    FunctionDefinition, FunctionParameter, FunctionParameterList, FunctionSignature,
    GlobalDefinition, Identifier, If, Item, ItemKind, Literal, Local, Module, Statement,
    StatementKind, StructDefinition, StructField, Type, TypeKind, While,
};

pub trait Visitor<'ast>: Sized {
    fn visit_item(&mut self, item: &'ast Item) {
        walk_item(self, item)
    }

    fn visit_function_definition(&mut self, function: &'ast FunctionDefinition) {
        walk_function_definition(self, function)
    }

    fn visit_function_signature(&mut self, signature: &'ast FunctionSignature) {
        walk_function_signature(self, signature)
    }

    fn visit_function_parameter_list(&mut self, parameters: &'ast FunctionParameterList) {
        walk_function_parameter_list(self, parameters)
    }

    fn visit_function_parameter(&mut self, parameter: &'ast FunctionParameter) {
        walk_function_parameter(self, parameter)
    }

    fn visit_struct_definition(&mut self, struct_definition: &'ast StructDefinition) {
        walk_struct_definition(self, struct_definition)
    }

    fn visit_struct_field(&mut self, struct_field: &'ast StructField) {
        walk_struct_field(self, struct_field)
    }

    fn visit_global_definition(&mut self, global: &'ast GlobalDefinition) {
        walk_global_definition(self, global)
    }

    fn visit_identifier(&mut self, _identifier: &'ast Identifier) {}

    fn visit_type(&mut self, ty: &'ast Type) {
        walk_type(self, ty)
    }

    fn visit_block(&mut self, block: &'ast Block) {
        walk_block(self, block)
    }

    fn visit_statement(&mut self, statement: &'ast Statement) {
        walk_statement(self, statement)
    }

    fn visit_local(&mut self, local: &'ast Local) {
        walk_local(self, local)
    }

    fn visit_if(&mut self, if_statement: &'ast If) {
        walk_if(self, if_statement)
    }

    fn visit_while(&mut self, while_loop: &'ast While) {
        walk_while(self, while_loop)
    }

    fn visit_for(&mut self, for_loop: &'ast For) {
        walk_for(self, for_loop)
    }

    fn visit_assignment(&mut self, assignment: &'ast Assignment) {
        walk_assignment(self, assignment)
    }

    fn visit_expression(&mut self, expression: &'ast Expression) {
        walk_expression(self, expression)
    }

    fn visit_literal(&mut self, _literal: &'ast Literal) {}

    fn visit_function_call_argument_list(&mut self, arguments: &'ast FunctionCallArgumentList) {
        walk_function_call_argument_list(self, arguments)
    }
}

pub fn walk_module<'a>(visitor: &mut impl Visitor<'a>, module: &'a Module<'a>) {
    for item in &module.items {
        visitor.visit_item(item);
    }
}

pub fn walk_item<'a>(visitor: &mut impl Visitor<'a>, item: &'a Item) {
    match &item.kind {
        ItemKind::FunctionDefinition(function) => {
            visitor.visit_function_definition(function);
        }
        ItemKind::StructDefinition(struct_definition) => {
            visitor.visit_struct_definition(struct_definition);
        }
        ItemKind::GlobalDefinition(global) => {
            visitor.visit_global_definition(global);
        }
    }
}

pub fn walk_function_definition<'a>(
    visitor: &mut impl Visitor<'a>,
    function: &'a FunctionDefinition,
) {
    visitor.visit_function_signature(&function.signature);
    visitor.visit_block(&function.body);
}

pub fn walk_function_signature<'a>(
    visitor: &mut impl Visitor<'a>,
    signature: &'a FunctionSignature,
) {
    visitor.visit_identifier(&signature.name);
    visitor.visit_function_parameter_list(&signature.parameters);

    if let Some(ty) = &signature.return_type {
        visitor.visit_type(ty)
    }
}

pub fn walk_function_parameter_list<'a>(
    visitor: &mut impl Visitor<'a>,
    parameters: &'a FunctionParameterList,
) {
    for parameter in &parameters.parameters {
        visitor.visit_function_parameter(parameter)
    }
}

pub fn walk_function_parameter<'a>(
    visitor: &mut impl Visitor<'a>,
    parameter: &'a FunctionParameter,
) {
    visitor.visit_identifier(&parameter.name);
    visitor.visit_type(&parameter.ty);
}

pub fn walk_struct_definition<'a>(
    visitor: &mut impl Visitor<'a>,
    struct_definition: &'a StructDefinition,
) {
    visitor.visit_identifier(&struct_definition.name);

    for field in &struct_definition.fields {
        visitor.visit_struct_field(field);
    }
}

pub fn walk_struct_field<'a>(visitor: &mut impl Visitor<'a>, field: &'a StructField) {
    visitor.visit_identifier(&field.name);
    visitor.visit_type(&field.ty);
}

pub fn walk_global_definition<'a>(visitor: &mut impl Visitor<'a>, global: &'a GlobalDefinition) {
    visitor.visit_identifier(&global.name);

    if let Some(ty) = &global.ty {
        visitor.visit_type(ty);
    }

    visitor.visit_expression(&global.initializer);
}

pub fn walk_type<'a>(visitor: &mut impl Visitor<'a>, ty: &'a Type) {
    match &ty.kind {
        TypeKind::Named(identifier) => visitor.visit_identifier(identifier),
        TypeKind::Pointer(ty) => visitor.visit_type(ty),
        TypeKind::Slice(ty) => visitor.visit_type(ty),
        TypeKind::Array { ty, .. } => visitor.visit_type(ty),
        TypeKind::Function {
            parameters,
            return_type,
        } => {
            for ty in parameters {
                visitor.visit_type(ty);
            }

            if let Some(ty) = return_type {
                visitor.visit_type(ty);
            }
        }
        TypeKind::Unit | TypeKind::Primitive(_) => {}
    }
}

pub fn walk_block<'a>(visitor: &mut impl Visitor<'a>, block: &'a Block) {
    for statement in &block.statements {
        visitor.visit_statement(statement);
    }
}

pub fn walk_statement<'a>(visitor: &mut impl Visitor<'a>, statement: &'a Statement) {
    match &statement.kind {
        StatementKind::Local(local) => visitor.visit_local(local),
        StatementKind::Expression(expression) => visitor.visit_expression(expression),
        StatementKind::Assignment(assignment) => visitor.visit_assignment(assignment),
        StatementKind::If(if_statement) => visitor.visit_if(if_statement),
        StatementKind::While(while_loop) => visitor.visit_while(while_loop),
        StatementKind::For(for_loop) => visitor.visit_for(for_loop),
        StatementKind::Return(expression) => {
            if let Some(e) = expression {
                visitor.visit_expression(e)
            }
        }
        StatementKind::Block(block) => visitor.visit_block(block),
        StatementKind::Break | StatementKind::Continue | StatementKind::Empty => {}
    }
}

pub fn walk_local<'a>(visitor: &mut impl Visitor<'a>, local: &'a Local) {
    visitor.visit_identifier(&local.name);

    if let Some(ty) = &local.ty {
        visitor.visit_type(ty);
    }

    if let Some(initializer) = &local.initializer {
        visitor.visit_expression(initializer);
    }
}

pub fn walk_if<'a>(visitor: &mut impl Visitor<'a>, if_statement: &'a If) {
    visitor.visit_expression(&if_statement.condition);
    visitor.visit_block(&if_statement.positive);

    match &if_statement.negative {
        Some(Else::If(nested)) => visitor.visit_if(nested),
        Some(Else::Block(block)) => visitor.visit_block(block),
        None => {}
    }
}

pub fn walk_while<'a>(visitor: &mut impl Visitor<'a>, while_loop: &'a While) {
    visitor.visit_expression(&while_loop.condition);
    visitor.visit_block(&while_loop.body);
}

pub fn walk_for<'a>(visitor: &mut impl Visitor<'a>, for_loop: &'a For) {
    if let Some(initializer) = &for_loop.initializer {
        visitor.visit_statement(initializer);
    }

    if let Some(condition) = &for_loop.condition {
        visitor.visit_expression(condition);
    }

    if let Some(step) = &for_loop.step {
        visitor.visit_expression(step);
    }

    visitor.visit_block(&for_loop.body);
}

pub fn walk_assignment<'a>(visitor: &mut impl Visitor<'a>, assignment: &'a Assignment) {
    visitor.visit_expression(&assignment.lhs);
    visitor.visit_expression(&assignment.rhs);
}

pub fn walk_expression<'a>(visitor: &mut impl Visitor<'a>, expression: &'a Expression) {
    match &expression.kind {
        ExpressionKind::Literal(literal) => visitor.visit_literal(literal),
        ExpressionKind::Identifier(identifier) => visitor.visit_identifier(identifier),
        ExpressionKind::Grouping(expression) => visitor.visit_expression(expression),
        ExpressionKind::Array(elements) => {
            elements.iter().for_each(|e| visitor.visit_expression(e))
        }
        ExpressionKind::FunctionCall { target, arguments } => {
            visitor.visit_expression(target);
            visitor.visit_function_call_argument_list(arguments);
        }
        ExpressionKind::Index { target, index } => {
            visitor.visit_expression(target);
            visitor.visit_expression(index);
        }
        ExpressionKind::Slice { target, start, end } => {
            visitor.visit_expression(target);

            if let Some(start) = start {
                visitor.visit_expression(start);
            }

            if let Some(end) = end {
                visitor.visit_expression(end);
            }
        }
        // Field names are looked up by the type checker, not visited as identifiers
        ExpressionKind::Field { target, .. } => visitor.visit_expression(target),
        ExpressionKind::Binary { lhs, rhs, .. } => {
            visitor.visit_expression(lhs);
            visitor.visit_expression(rhs);
        }
        ExpressionKind::Unary { operand, .. } => visitor.visit_expression(operand),
        ExpressionKind::Cast { expression, ty } => {
            visitor.visit_expression(expression);
            visitor.visit_type(ty);
        }
        ExpressionKind::Assignment(assignment) => visitor.visit_assignment(assignment),
    }
}

pub fn walk_function_call_argument_list<'a>(
    visitor: &mut impl Visitor<'a>,
    arguments: &'a FunctionCallArgumentList,
) {
    for argument in &arguments.arguments {
        visitor.visit_expression(argument)
    }
}
