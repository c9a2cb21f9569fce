use std::cell::OnceCell;

use hashbrown::HashMap;

use crate::{
    diagnostics::{Diagnostic, DiagnosticCollector, DiagnosticKind},
    frontend::{
        ast::{
            Assignment, Block, Else, Expression, ExpressionKind, For, FunctionDefinition,
            GlobalDefinition, Identifier, If, ItemKind, Local, Module, Statement, StatementKind,
            StructDefinition, Type, TypeKind,
            visit::{self, Visitor},
        },
        intern::InternedSymbol,
        lexer::Span,
    },
    index::{IndexVec, simple_index},
    middle::ty::TypeId,
};

simple_index! {
    pub struct ScopeId;
}

simple_index! {
    pub struct SymbolId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Local,
    Global,
    Parameter,
    Function,
    Struct,
    Field,
}

impl core::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SymbolKind::Local => "local variable",
            SymbolKind::Global => "global",
            SymbolKind::Parameter => "parameter",
            SymbolKind::Function => "function",
            SymbolKind::Struct => "struct",
            SymbolKind::Field => "field",
        })
    }
}

#[derive(Debug)]
pub struct Symbol {
    pub name: InternedSymbol,
    pub kind: SymbolKind,
    pub is_mutable: bool,
    /// The scope the symbol was declared in
    pub scope: ScopeId,
    /// Span of the declaring identifier
    pub span: Span,
    /// Declared type, set once by the type checker
    pub ty: OnceCell<TypeId>,
}

impl Symbol {
    pub fn ty(&self) -> Option<TypeId> {
        self.ty.get().copied()
    }

    /// Locals, parameters and globals have storage that can be addressed
    pub fn is_variable(&self) -> bool {
        matches!(
            self.kind,
            SymbolKind::Local | SymbolKind::Parameter | SymbolKind::Global
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    /// Holds the parameters of a function
    Function,
    Block,
    /// Holds the fields of a struct
    Struct,
    /// Holds the initializer binding of a `for` loop
    ForHeader,
}

#[derive(Debug)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    /// The function this scope belongs to, if any
    pub function: Option<SymbolId>,
    bindings: HashMap<InternedSymbol, SymbolId>,
    /// Declared symbols in insertion order
    pub symbols: Vec<SymbolId>,
}

/// Every scope and symbol of a compilation unit
#[derive(Debug)]
pub struct SymbolTable {
    pub scopes: IndexVec<ScopeId, Scope>,
    pub symbols: IndexVec<SymbolId, Symbol>,
    module_scope: ScopeId,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut scopes = IndexVec::new();
        let module_scope = scopes.push(Scope {
            parent: None,
            kind: ScopeKind::Module,
            function: None,
            bindings: HashMap::new(),
            symbols: Vec::new(),
        });

        Self {
            scopes,
            symbols: IndexVec::new(),
            module_scope,
        }
    }

    pub fn module_scope(&self) -> ScopeId {
        self.module_scope
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id]
    }

    pub fn push_scope(
        &mut self,
        parent: ScopeId,
        kind: ScopeKind,
        function: Option<SymbolId>,
    ) -> ScopeId {
        self.scopes.push(Scope {
            parent: Some(parent),
            kind,
            function,
            bindings: HashMap::new(),
            symbols: Vec::new(),
        })
    }

    /// Declares a symbol in `scope`. Fails with the existing symbol if the
    /// name is already bound in that same scope.
    pub fn declare(
        &mut self,
        scope: ScopeId,
        name: InternedSymbol,
        kind: SymbolKind,
        is_mutable: bool,
        span: Span,
    ) -> Result<SymbolId, SymbolId> {
        if let Some(existing) = self.scopes[scope].bindings.get(&name) {
            return Err(*existing);
        }

        let id = self.symbols.push(Symbol {
            name,
            kind,
            is_mutable,
            scope,
            span,
            ty: OnceCell::new(),
        });

        let scope = &mut self.scopes[scope];
        scope.bindings.insert(name, id);
        scope.symbols.push(id);

        Ok(id)
    }

    /// Looks for a binding only within `scope`
    pub fn lookup_shallow(&self, scope: ScopeId, name: InternedSymbol) -> Option<SymbolId> {
        self.scopes[scope].bindings.get(&name).copied()
    }

    /// Walks from `scope` outwards to the module scope looking for a binding
    pub fn lookup(&self, scope: ScopeId, name: InternedSymbol) -> Option<SymbolId> {
        let mut current = Some(scope);

        while let Some(scope) = current {
            if let Some(symbol) = self.lookup_shallow(scope, name) {
                return Some(symbol);
            }

            current = self.scopes[scope].parent;
        }

        None
    }

    /// Parameters (in order) followed by the locals of a function, in scope
    /// creation order and then insertion order
    pub fn function_variables(&self, function: SymbolId) -> impl Iterator<Item = SymbolId> + '_ {
        self.scopes
            .iter()
            .filter(move |scope| scope.function == Some(function))
            .flat_map(|scope| scope.symbols.iter().copied())
            .filter(|symbol| {
                matches!(
                    self.symbols[*symbol].kind,
                    SymbolKind::Parameter | SymbolKind::Local
                )
            })
    }

    /// Symbols declared directly in the module scope
    pub fn module_symbols(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.scopes[self.module_scope].symbols.iter().copied()
    }
}

/// Collects the declaration of every local in a function body
#[derive(Default)]
struct LocalDeclarationCollector {
    declarations: Vec<LocalDeclaration>,
    /// Spans of the blocks and `for` headers enclosing the visited statement
    regions: Vec<Span>,
}

/// A `let` statement and the part of the function it is visible in
struct LocalDeclaration {
    name: InternedSymbol,
    statement: Span,
    region: Span,
}

impl LocalDeclaration {
    /// Whether `identifier` would see this `let` once it was declared
    fn precedes(&self, identifier: &Identifier) -> bool {
        self.name == identifier.name
            && self.statement.end > identifier.span.start
            && self.region.start <= identifier.span.start
            && identifier.span.end <= self.region.end
    }
}

impl<'ast> Visitor<'ast> for LocalDeclarationCollector {
    fn visit_block(&mut self, block: &'ast Block) {
        self.regions.push(block.span);
        visit::walk_block(self, block);
        self.regions.pop();
    }

    fn visit_for(&mut self, for_loop: &'ast For) {
        self.regions.push(for_loop.span);
        visit::walk_for(self, for_loop);
        self.regions.pop();
    }

    fn visit_local(&mut self, local: &'ast Local) {
        if let Some(region) = self.regions.last() {
            self.declarations.push(LocalDeclaration {
                name: local.name.name,
                statement: local.span,
                region: *region,
            });
        }

        visit::walk_local(self, local);
    }
}

/// AST Module name resolver
///
/// Binds every identifier of a module to the symbol it declares or refers to.
pub struct Resolver<'module, 'diagnostics> {
    module: &'module Module<'module>,
    table: SymbolTable,
    diagnostics: &'diagnostics mut DiagnosticCollector,
    current_scope: ScopeId,
    current_function: Option<SymbolId>,
    /// Every `let` of the function being resolved
    function_locals: Vec<LocalDeclaration>,
}

impl<'module, 'diagnostics> Resolver<'module, 'diagnostics> {
    /// Resolves all names within a module in 2 steps.
    ///
    /// The first step binds every function, struct and global in the module
    /// scope so that items may refer to each other regardless of order.
    ///
    /// The second step traverses the item bodies, binding parameters and
    /// locals in nested scopes and resolving every identifier reference.
    /// Field accesses are not checked at this stage and are resolved during
    /// type checking.
    pub fn resolve_names(
        module: &'module Module<'module>,
        diagnostics: &'diagnostics mut DiagnosticCollector,
    ) -> SymbolTable {
        let _span = tracing::debug_span!("resolve", origin = %module.source_file.origin).entered();

        let table = SymbolTable::new();
        let module_scope = table.module_scope();

        let mut resolver = Self {
            module,
            table,
            diagnostics,
            current_scope: module_scope,
            current_function: None,
            function_locals: Vec::new(),
        };

        resolver.bind_items();

        for item in &module.items {
            match &item.kind {
                ItemKind::FunctionDefinition(function) => {
                    resolver.resolve_function_definition(function)
                }
                ItemKind::StructDefinition(struct_definition) => {
                    resolver.resolve_struct_definition(struct_definition)
                }
                ItemKind::GlobalDefinition(global) => resolver.resolve_global_definition(global),
            }
        }

        tracing::debug!(
            scopes = resolver.table.scopes.len(),
            symbols = resolver.table.symbols.len(),
            "resolved names"
        );

        resolver.table
    }

    /// Adds all the items of the module to the module scope
    fn bind_items(&mut self) {
        let module = self.module;

        for item in &module.items {
            let (name, kind, is_mutable) = match &item.kind {
                ItemKind::FunctionDefinition(function) => {
                    (&function.signature.name, SymbolKind::Function, false)
                }
                ItemKind::StructDefinition(struct_definition) => {
                    (&struct_definition.name, SymbolKind::Struct, false)
                }
                ItemKind::GlobalDefinition(global) => {
                    (&global.name, SymbolKind::Global, global.is_mutable)
                }
            };

            self.declare(name, kind, is_mutable);
        }
    }

    /// Declares `identifier` in the current scope and binds it to the new
    /// symbol
    fn declare(&mut self, identifier: &Identifier, kind: SymbolKind, is_mutable: bool) {
        match self.table.declare(
            self.current_scope,
            identifier.name,
            kind,
            is_mutable,
            identifier.span,
        ) {
            Ok(symbol) => {
                let _ = identifier.resolution.set(symbol);
            }
            Err(existing) => {
                let first = self.table.symbol(existing).span;

                self.diagnostics.report(
                    Diagnostic::error(
                        DiagnosticKind::DuplicateDeclaration,
                        identifier.span,
                        format!("`{}` is declared more than once in this scope", identifier.name),
                    )
                    .with_secondary(first, "first declared here"),
                );
            }
        }
    }

    fn with_scope(&mut self, kind: ScopeKind, resolve: impl FnOnce(&mut Self)) {
        let parent = self.current_scope;

        self.current_scope = self
            .table
            .push_scope(parent, kind, self.current_function);

        resolve(self);

        self.current_scope = parent;
    }

    /// Resolves all names within a function definition
    fn resolve_function_definition(&mut self, function: &'module FunctionDefinition) {
        self.current_function = function.signature.name.symbol();

        let mut collector = LocalDeclarationCollector::default();
        collector.visit_block(&function.body);
        self.function_locals = collector.declarations;

        // Parameter and return types are resolved before the parameters are
        // bound so a parameter can't shadow the type of a later one
        for parameter in &function.signature.parameters.parameters {
            self.resolve_type(&parameter.ty);
        }

        if let Some(return_type) = &function.signature.return_type {
            self.resolve_type(return_type);
        }

        self.with_scope(ScopeKind::Function, |resolver| {
            for parameter in &function.signature.parameters.parameters {
                resolver.declare(&parameter.name, SymbolKind::Parameter, parameter.is_mutable);
            }

            resolver.resolve_block(&function.body);
        });

        self.current_function = None;
        self.function_locals.clear();
    }

    fn resolve_struct_definition(&mut self, struct_definition: &StructDefinition) {
        // Field names never shadow the types of other fields
        for field in &struct_definition.fields {
            self.resolve_type(&field.ty);
        }

        self.with_scope(ScopeKind::Struct, |resolver| {
            for field in &struct_definition.fields {
                resolver.declare(&field.name, SymbolKind::Field, true);
            }
        });
    }

    fn resolve_global_definition(&mut self, global: &GlobalDefinition) {
        if let Some(ty) = &global.ty {
            self.resolve_type(ty);
        }

        self.resolve_expression(&global.initializer);
    }

    fn resolve_type(&mut self, ty: &Type) {
        match &ty.kind {
            TypeKind::Named(identifier) => {
                match self.table.lookup(self.current_scope, identifier.name) {
                    Some(symbol) if self.table.symbol(symbol).kind == SymbolKind::Struct => {
                        let _ = identifier.resolution.set(symbol);
                    }
                    Some(symbol) => {
                        let symbol = self.table.symbol(symbol);
                        let (kind, span) = (symbol.kind, symbol.span);

                        self.diagnostics.report(
                            Diagnostic::error(
                                DiagnosticKind::UnresolvedName,
                                identifier.span,
                                format!("`{}` is a {kind}, not a type", identifier.name),
                            )
                            .with_secondary(span, "declared here"),
                        );
                    }
                    None => self.diagnostics.error(
                        DiagnosticKind::UnresolvedName,
                        identifier.span,
                        format!("cannot find type `{}` in this scope", identifier.name),
                    ),
                }
            }
            TypeKind::Pointer(ty) | TypeKind::Slice(ty) | TypeKind::Array { ty, .. } => {
                self.resolve_type(ty)
            }
            TypeKind::Function {
                parameters,
                return_type,
            } => {
                for parameter in parameters {
                    self.resolve_type(parameter);
                }

                if let Some(return_type) = return_type {
                    self.resolve_type(return_type);
                }
            }
            // Nothing needs to be done to resolve these types
            TypeKind::Unit | TypeKind::Primitive(_) => {}
        }
    }

    fn resolve_block(&mut self, block: &Block) {
        self.with_scope(ScopeKind::Block, |resolver| {
            for statement in &block.statements {
                resolver.resolve_statement(statement)
            }
        });
    }

    fn resolve_statement(&mut self, statement: &Statement) {
        match &statement.kind {
            StatementKind::Local(local) => self.resolve_local(local),
            StatementKind::Expression(expression) => self.resolve_expression(expression),
            StatementKind::Assignment(assignment) => self.resolve_assignment(assignment),
            StatementKind::If(if_statement) => self.resolve_if(if_statement),
            StatementKind::While(while_loop) => {
                self.resolve_expression(&while_loop.condition);
                self.resolve_block(&while_loop.body);
            }
            StatementKind::For(for_loop) => self.resolve_for(for_loop),
            StatementKind::Return(expression) => {
                if let Some(expression) = expression {
                    self.resolve_expression(expression)
                }
            }
            StatementKind::Block(block) => self.resolve_block(block),
            StatementKind::Break | StatementKind::Continue | StatementKind::Empty => {}
        }
    }

    fn resolve_local(&mut self, local: &Local) {
        if let Some(ty) = &local.ty {
            self.resolve_type(ty);
        }

        // Check the expression first (we don't want this local's name to be
        // available within the initialization expression)
        if let Some(initializer) = &local.initializer {
            self.resolve_expression(initializer);
        }

        self.declare(&local.name, SymbolKind::Local, local.is_mutable);
    }

    fn resolve_if(&mut self, if_statement: &If) {
        self.resolve_expression(&if_statement.condition);
        self.resolve_block(&if_statement.positive);

        match &if_statement.negative {
            Some(Else::If(nested)) => self.resolve_if(nested),
            Some(Else::Block(block)) => self.resolve_block(block),
            None => {}
        }
    }

    fn resolve_for(&mut self, for_loop: &For) {
        self.with_scope(ScopeKind::ForHeader, |resolver| {
            if let Some(initializer) = &for_loop.initializer {
                resolver.resolve_statement(initializer);
            }

            if let Some(condition) = &for_loop.condition {
                resolver.resolve_expression(condition);
            }

            if let Some(step) = &for_loop.step {
                resolver.resolve_expression(step);
            }

            resolver.resolve_block(&for_loop.body);
        });
    }

    fn resolve_assignment(&mut self, assignment: &Assignment) {
        self.resolve_expression(&assignment.lhs);
        self.resolve_expression(&assignment.rhs);
    }

    fn resolve_expression(&mut self, expression: &Expression) {
        match &expression.kind {
            ExpressionKind::Identifier(identifier) => self.resolve_identifier(identifier),
            ExpressionKind::Grouping(expression) => self.resolve_expression(expression),
            ExpressionKind::Array(elements) => {
                for element in elements {
                    self.resolve_expression(element);
                }
            }
            ExpressionKind::FunctionCall { target, arguments } => {
                self.resolve_expression(target);

                for argument in &arguments.arguments {
                    self.resolve_expression(argument)
                }
            }
            ExpressionKind::Index { target, index } => {
                self.resolve_expression(target);
                self.resolve_expression(index);
            }
            ExpressionKind::Slice { target, start, end } => {
                self.resolve_expression(target);

                for bound in [start, end].into_iter().flatten() {
                    self.resolve_expression(bound);
                }
            }
            ExpressionKind::Field { target, .. } => self.resolve_expression(target),
            ExpressionKind::Binary { lhs, rhs, .. } => {
                self.resolve_expression(lhs);
                self.resolve_expression(rhs);
            }
            ExpressionKind::Unary { operand, .. } => self.resolve_expression(operand),
            ExpressionKind::Cast { expression, ty } => {
                self.resolve_expression(expression);
                self.resolve_type(ty);
            }
            ExpressionKind::Assignment(assignment) => self.resolve_assignment(assignment),
            ExpressionKind::Literal(_) => {}
        }
    }

    /// Resolves a value identifier (within an expression)
    fn resolve_identifier(&mut self, identifier: &Identifier) {
        if let Some(symbol) = self.table.lookup(self.current_scope, identifier.name) {
            let _ = identifier.resolution.set(symbol);
            return;
        }

        // A `let` of the same name in an enclosing block whose statement has
        // not finished yet at this point of the function
        let later = self
            .function_locals
            .iter()
            .find(|declaration| declaration.precedes(identifier))
            .map(|declaration| declaration.statement);

        match later {
            Some(declaration) => self.diagnostics.report(
                Diagnostic::error(
                    DiagnosticKind::UseBeforeDeclaration,
                    identifier.span,
                    format!("`{}` is used before its declaration", identifier.name),
                )
                .with_secondary(declaration, "declared here"),
            ),
            None => self.diagnostics.error(
                DiagnosticKind::UnresolvedName,
                identifier.span,
                format!("cannot find `{}` in this scope", identifier.name),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::frontend::{SourceFile, SourceFileOrigin, parser::Parser};

    fn resolve(text: &str) -> (Vec<DiagnosticKind>, Vec<(String, Option<SymbolId>)>, SymbolTable) {
        let source = SourceFile::new(text, SourceFileOrigin::Memory);
        let mut diagnostics = DiagnosticCollector::new();
        let module = Parser::parse_module(&source, &mut diagnostics);
        assert!(!diagnostics.has_errors(), "{:?}", diagnostics.into_vec());

        let table = Resolver::resolve_names(&module, &mut diagnostics);

        // Every identifier reference in expression position, in source order
        struct References(Vec<(String, Option<SymbolId>)>);

        impl<'ast> Visitor<'ast> for References {
            fn visit_expression(&mut self, expression: &'ast Expression) {
                if let ExpressionKind::Identifier(identifier) = &expression.kind {
                    self.0.push((identifier.name.to_string(), identifier.symbol()));
                }

                visit::walk_expression(self, expression);
            }
        }

        let mut references = References(Vec::new());
        visit::walk_module(&mut references, &module);

        (
            diagnostics.iter().map(|d| d.kind).collect(),
            references.0,
            table,
        )
    }

    #[test]
    fn shadowing_resolves_to_innermost() {
        let (diagnostics, references, table) = resolve(indoc! {"
            fn main() {
                let x: i32 = 1;
                {
                    let x: i32 = 2;
                    x;
                }
                x;
            }
        "});

        assert!(diagnostics.is_empty());

        let inner = references[0].1.expect("inner x resolves");
        let outer = references[1].1.expect("outer x resolves");

        assert_ne!(inner, outer);
        assert_eq!(table.symbol(outer).span.line, 2);
        assert_eq!(table.symbol(inner).span.line, 4);
    }

    #[test]
    fn items_are_visible_before_their_declaration() {
        let (diagnostics, references, table) = resolve(indoc! {"
            fn main() -> i32 { return helper(LIMIT); }
            fn helper(n: i32) -> i32 { return n; }
            global LIMIT: i32 = 3;
        "});

        assert!(diagnostics.is_empty());
        assert_eq!(
            references
                .iter()
                .map(|(_, symbol)| table.symbol(symbol.unwrap()).kind)
                .collect::<Vec<_>>(),
            vec![SymbolKind::Function, SymbolKind::Global, SymbolKind::Parameter]
        );
    }

    #[test]
    fn duplicate_in_same_scope_is_reported() {
        let (diagnostics, _, _) = resolve(indoc! {"
            fn f(a: i32, a: i32) {
                let b = 1;
                let b = 2;
            }
            fn f() {}
            struct S { x: i32, x: i32 }
        "});

        assert_eq!(diagnostics, vec![DiagnosticKind::DuplicateDeclaration; 4]);
    }

    #[test]
    fn parameters_can_be_shadowed_in_the_body() {
        let (diagnostics, _, _) = resolve("fn f(a: i32) { let a = 2; }");

        assert!(diagnostics.is_empty());
    }

    #[test]
    fn use_before_declaration_differs_from_unresolved() {
        let (diagnostics, _, _) = resolve(indoc! {"
            fn main() {
                y;
                let y = 1;
                let z = z;
                { let w = 1; }
                w;
                nowhere;
            }
        "});

        assert_eq!(
            diagnostics,
            vec![
                DiagnosticKind::UseBeforeDeclaration,
                DiagnosticKind::UseBeforeDeclaration,
                DiagnosticKind::UnresolvedName,
                DiagnosticKind::UnresolvedName,
            ]
        );
    }

    #[test]
    fn later_declarations_in_sibling_blocks_are_unresolved() {
        let (diagnostics, _, _) = resolve(indoc! {"
            fn main() {
                { x; }
                { let x = 1; }
                if true { let y = 2; } else { y; }
                for (let i = 0; i < 1; ) { }
                for (; j < 1; ) { let j = 0; }
            }
        "});

        assert_eq!(
            diagnostics,
            vec![
                DiagnosticKind::UnresolvedName,
                DiagnosticKind::UnresolvedName,
                DiagnosticKind::UnresolvedName,
            ]
        );
    }

    #[test]
    fn field_names_do_not_shadow_types() {
        let (diagnostics, _, table) = resolve(indoc! {"
            struct A { B: i32, c: B }
            struct B { x: i32 }
        "});

        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(
            table
                .symbols
                .iter()
                .filter(|symbol| symbol.kind == SymbolKind::Field)
                .count(),
            3
        );
    }

    #[test]
    fn non_struct_names_are_not_types() {
        let (diagnostics, _, _) = resolve(indoc! {"
            struct P { x: i32 }
            fn f(p: P, q: *Missing) {
                let g: f;
            }
        "});

        assert_eq!(
            diagnostics,
            vec![DiagnosticKind::UnresolvedName, DiagnosticKind::UnresolvedName]
        );
    }

    #[test]
    fn for_header_scopes_its_binding() {
        let (diagnostics, _, table) = resolve(indoc! {"
            fn main() {
                for (let mut i = 0; i < 3; i += 1) { i; }
                i;
            }
        "});

        assert_eq!(diagnostics, vec![DiagnosticKind::UnresolvedName]);
        assert!(table.scopes.iter().any(|scope| scope.kind == ScopeKind::ForHeader));
    }

    #[test]
    fn function_variables_follow_declaration_order() {
        let (_, _, table) = resolve(indoc! {"
            fn f(a: i32, b: i32) {
                let c = 1;
                { let d = 2; }
                let e = 3;
            }
        "});

        let function = table
            .module_symbols()
            .next()
            .expect("function symbol");
        let names: Vec<_> = table
            .function_variables(function)
            .map(|symbol| table.symbol(symbol).name.to_string())
            .collect();

        assert_eq!(names, vec!["a", "b", "c", "e", "d"]);
    }
}
