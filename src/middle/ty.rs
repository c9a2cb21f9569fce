use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use hashbrown::HashMap;
use strum::IntoEnumIterator;

use crate::{
    frontend::intern::InternedSymbol,
    index::{IndexVec, simple_index},
    middle::primitive::{IntegerKind, PrimitiveKind},
};

simple_index! {
    /// Handle to an interned type. Two handles from the same table are equal
    /// exactly when the types are equal.
    pub struct TypeId;
}

simple_index! {
    /// Identity of a struct declaration
    pub struct StructId;
}

impl TypeId {
    pub const ERROR: TypeId = TypeId(0);
    pub const UNIT: TypeId = TypeId(1);
    pub const BOOL: TypeId = TypeId(2);
    pub const CHAR: TypeId = TypeId(3);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Result of an expression that failed to check. Compatible with
    /// everything so one mistake is only reported once.
    Error,
    /// ()
    Unit,
    // true, false
    Bool,
    // 'a', '\n'
    Char,
    /// i32, u8, usize, etc.
    Integer(IntegerKind),
    /// *T
    Pointer(TypeId),
    /// [T; <length>]
    ///
    /// A fixed size, inline allocation of T's
    Array { element: TypeId, length: u64 },
    /// [T]
    ///
    /// A pointer and length to some amount of T's
    Slice(TypeId),
    /// A nominal struct type
    Struct(StructId),
    /// fn(i32, *T) -> u8
    Function {
        parameters: Arc<[TypeId]>,
        return_type: TypeId,
    },
}

impl TypeKind {
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            TypeKind::Array { .. } | TypeKind::Slice(_) | TypeKind::Struct(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    pub name: InternedSymbol,
    pub ty: TypeId,
}

#[derive(Debug)]
pub struct StructDefinition {
    pub name: InternedSymbol,
    /// Declaration order is layout order. Set once, after every struct of the
    /// unit has been declared so fields can refer to each other.
    fields: OnceLock<Arc<[StructField]>>,
}

impl StructDefinition {
    pub fn fields(&self) -> &[StructField] {
        self.fields.get().map_or(&[], |fields| &fields[..])
    }

    pub fn field(&self, name: InternedSymbol) -> Option<(usize, &StructField)> {
        self.fields()
            .iter()
            .enumerate()
            .find(|(_, field)| field.name == name)
    }
}

/// Interning table for every type of a session.
///
/// Shared by all compilation units of a [`crate::session::Session`]; reads take
/// the shared lock, insertion takes the exclusive one.
#[derive(Debug)]
pub struct TypeTable {
    inner: RwLock<TypeTableInner>,
}

#[derive(Debug, Default)]
struct TypeTableInner {
    kinds: IndexVec<TypeId, TypeKind>,
    lookup: HashMap<TypeKind, TypeId>,
    structs: IndexVec<StructId, Arc<StructDefinition>>,
}

impl TypeTableInner {
    fn insert(&mut self, kind: TypeKind) -> TypeId {
        if let Some(id) = self.lookup.get(&kind) {
            return *id;
        }

        let id = self.kinds.push(kind.clone());
        self.lookup.insert(kind, id);

        id
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeTable {
    pub fn new() -> Self {
        let mut inner = TypeTableInner::default();

        // Order must match the `TypeId` constants
        inner.insert(TypeKind::Error);
        inner.insert(TypeKind::Unit);
        inner.insert(TypeKind::Bool);
        inner.insert(TypeKind::Char);

        for kind in IntegerKind::iter() {
            inner.insert(TypeKind::Integer(kind));
        }

        Self {
            inner: RwLock::new(inner),
        }
    }

    pub fn intern(&self, kind: TypeKind) -> TypeId {
        {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

            if let Some(id) = inner.lookup.get(&kind) {
                return *id;
            }
        }

        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind)
    }

    pub fn kind(&self, ty: TypeId) -> TypeKind {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        inner.kinds.get(ty).cloned().unwrap_or(TypeKind::Error)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .kinds
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn integer(&self, kind: IntegerKind) -> TypeId {
        self.intern(TypeKind::Integer(kind))
    }

    pub fn primitive(&self, primitive: PrimitiveKind) -> TypeId {
        match primitive {
            PrimitiveKind::Bool => TypeId::BOOL,
            PrimitiveKind::Char => TypeId::CHAR,
            PrimitiveKind::Integer(kind) => self.integer(kind),
        }
    }

    pub fn pointer(&self, pointee: TypeId) -> TypeId {
        self.intern(TypeKind::Pointer(pointee))
    }

    pub fn slice(&self, element: TypeId) -> TypeId {
        self.intern(TypeKind::Slice(element))
    }

    pub fn array(&self, element: TypeId, length: u64) -> TypeId {
        self.intern(TypeKind::Array { element, length })
    }

    pub fn function(&self, parameters: impl Into<Arc<[TypeId]>>, return_type: TypeId) -> TypeId {
        self.intern(TypeKind::Function {
            parameters: parameters.into(),
            return_type,
        })
    }

    /// Creates a fresh nominal struct type. Never deduplicated.
    pub fn declare_struct(&self, name: InternedSymbol) -> (StructId, TypeId) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let id = inner.structs.push(Arc::new(StructDefinition {
            name,
            fields: OnceLock::new(),
        }));
        let ty = inner.insert(TypeKind::Struct(id));

        (id, ty)
    }

    /// Sets the fields of a declared struct. Returns `false` if the fields
    /// were already set to something else.
    pub fn define_struct_fields(&self, id: StructId, fields: Vec<StructField>) -> bool {
        let definition = self.struct_definition(id);
        let fields: Arc<[StructField]> = fields.into();

        match definition.fields.set(fields.clone()) {
            Ok(()) => true,
            Err(_) => definition.fields.get().is_some_and(|existing| *existing == fields),
        }
    }

    pub fn struct_definition(&self, id: StructId) -> Arc<StructDefinition> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        inner.structs[id].clone()
    }

    pub fn is_integer(&self, ty: TypeId) -> bool {
        matches!(self.kind(ty), TypeKind::Integer(_))
    }

    pub fn integer_kind(&self, ty: TypeId) -> Option<IntegerKind> {
        match self.kind(ty) {
            TypeKind::Integer(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn is_aggregate(&self, ty: TypeId) -> bool {
        self.kind(ty).is_aggregate()
    }

    /// A value that prints the type the way it is written in source
    pub fn display(&self, ty: TypeId) -> TypeDisplay<'_> {
        TypeDisplay { table: self, ty }
    }
}

pub struct TypeDisplay<'table> {
    table: &'table TypeTable,
    ty: TypeId,
}

impl core::fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let display = |ty| self.table.display(ty);

        match self.table.kind(self.ty) {
            TypeKind::Error => write!(f, "{{unknown}}"),
            TypeKind::Unit => write!(f, "()"),
            TypeKind::Bool => write!(f, "bool"),
            TypeKind::Char => write!(f, "char"),
            TypeKind::Integer(kind) => write!(f, "{kind}"),
            TypeKind::Pointer(pointee) => write!(f, "*{}", display(pointee)),
            TypeKind::Array { element, length } => write!(f, "[{}; {length}]", display(element)),
            TypeKind::Slice(element) => write!(f, "[{}]", display(element)),
            TypeKind::Struct(id) => write!(f, "{}", self.table.struct_definition(id).name),
            TypeKind::Function {
                parameters,
                return_type,
            } => {
                write!(f, "fn(")?;

                for (i, parameter) in parameters.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }

                    write!(f, "{}", display(*parameter))?;
                }

                write!(f, ")")?;

                if return_type != TypeId::UNIT {
                    write!(f, " -> {}", display(return_type))?;
                }

                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_types_deduplicate() {
        let table = TypeTable::new();

        let a = table.pointer(table.integer(IntegerKind::I32));
        let b = table.pointer(table.integer(IntegerKind::I32));
        let c = table.pointer(table.integer(IntegerKind::I64));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.kind(TypeId::BOOL), TypeKind::Bool);
    }

    #[test]
    fn struct_types_are_nominal() {
        let table = TypeTable::new();
        let name = InternedSymbol::new("Point");

        let (a_id, a) = table.declare_struct(name);
        let (b_id, b) = table.declare_struct(name);

        assert_ne!(a_id, b_id);
        assert_ne!(a, b);
    }

    #[test]
    fn struct_fields_are_set_once() {
        let table = TypeTable::new();
        let (id, _) = table.declare_struct(InternedSymbol::new("Pair"));
        let fields = vec![
            StructField {
                name: InternedSymbol::new("a"),
                ty: TypeId::BOOL,
            },
            StructField {
                name: InternedSymbol::new("b"),
                ty: TypeId::CHAR,
            },
        ];

        assert!(table.define_struct_fields(id, fields.clone()));
        assert!(table.define_struct_fields(id, fields));
        assert!(!table.define_struct_fields(id, Vec::new()));
        assert_eq!(
            table
                .struct_definition(id)
                .field(InternedSymbol::new("b"))
                .map(|(index, _)| index),
            Some(1)
        );
    }

    #[test]
    fn display_matches_source_syntax() {
        let table = TypeTable::new();
        let i32 = table.integer(IntegerKind::I32);
        let function = table.function(vec![table.pointer(i32), table.slice(TypeId::CHAR)], i32);

        assert_eq!(table.display(function).to_string(), "fn(*i32, [char]) -> i32");
        assert_eq!(table.display(table.array(i32, 3)).to_string(), "[i32; 3]");
        assert_eq!(table.display(TypeId::UNIT).to_string(), "()");
    }

    #[test]
    fn concurrent_interning_agrees() {
        let table = TypeTable::new();

        let ids: Vec<TypeId> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| table.array(table.integer(IntegerKind::U8), 16)))
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    }
}
