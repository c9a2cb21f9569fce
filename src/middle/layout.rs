//! Memory layout of checked types. Follows C rules: fields in declaration
//! order, each aligned to its natural alignment, with tail padding so arrays
//! of the struct stay aligned.

use thiserror::Error;

use crate::middle::ty::{StructId, TypeId, TypeKind, TypeTable};

/// Size in bytes of a pointer on every supported target
pub const POINTER_SIZE: u64 = 8;

/// Largest size of any object. Offsets and lengths must fit a signed 64 bit
/// integer.
pub const MAX_OBJECT_SIZE: u64 = i64::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Layout {
    pub size: u64,
    pub align: u64,
}

impl Layout {
    pub const fn new(size: u64, align: u64) -> Self {
        Self { size, align }
    }

    pub const fn scalar(size: u64) -> Self {
        Self::new(size, size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub layout: Layout,
    /// Byte offset of every field, in declaration order
    pub offsets: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("type is larger than {MAX_OBJECT_SIZE} bytes")]
    TooLarge,
    #[error("type contains itself by value")]
    Recursive,
}

type LayoutResult<T> = Result<T, LayoutError>;

pub fn align_to(offset: u64, align: u64) -> LayoutResult<u64> {
    offset
        .checked_next_multiple_of(align.max(1))
        .ok_or(LayoutError::TooLarge)
}

pub fn layout_of(types: &TypeTable, ty: TypeId) -> LayoutResult<Layout> {
    compute_layout(types, ty, &mut Vec::new())
}

pub fn struct_layout(types: &TypeTable, id: StructId) -> LayoutResult<StructLayout> {
    compute_struct_layout(types, id, &mut Vec::new())
}

/// `enclosing` holds the structs whose layout is being computed, so a struct
/// that contains itself is reported instead of recursing forever
fn compute_layout(
    types: &TypeTable,
    ty: TypeId,
    enclosing: &mut Vec<StructId>,
) -> LayoutResult<Layout> {
    let layout = match types.kind(ty) {
        TypeKind::Error | TypeKind::Unit => Layout::new(0, 1),
        TypeKind::Bool => Layout::scalar(1),
        TypeKind::Char => Layout::scalar(4),
        TypeKind::Integer(kind) => Layout::scalar(kind.bytes()),
        TypeKind::Pointer(_) | TypeKind::Function { .. } => Layout::scalar(POINTER_SIZE),
        // { ptr, usize }
        TypeKind::Slice(_) => Layout::new(2 * POINTER_SIZE, POINTER_SIZE),
        TypeKind::Array { element, length } => {
            let element = compute_layout(types, element, enclosing)?;
            let size = element
                .size
                .checked_mul(length)
                .ok_or(LayoutError::TooLarge)?;

            Layout::new(size, element.align)
        }
        TypeKind::Struct(id) => compute_struct_layout(types, id, enclosing)?.layout,
    };

    match layout.size <= MAX_OBJECT_SIZE {
        true => Ok(layout),
        false => Err(LayoutError::TooLarge),
    }
}

fn compute_struct_layout(
    types: &TypeTable,
    id: StructId,
    enclosing: &mut Vec<StructId>,
) -> LayoutResult<StructLayout> {
    if enclosing.contains(&id) {
        return Err(LayoutError::Recursive);
    }

    enclosing.push(id);
    let result = field_offsets(types, id, enclosing);
    enclosing.pop();

    result
}

fn field_offsets(
    types: &TypeTable,
    id: StructId,
    enclosing: &mut Vec<StructId>,
) -> LayoutResult<StructLayout> {
    let definition = types.struct_definition(id);

    let mut offsets = Vec::with_capacity(definition.fields().len());
    let mut offset = 0u64;
    let mut align = 1;

    for field in definition.fields() {
        let layout = compute_layout(types, field.ty, enclosing)?;

        offset = align_to(offset, layout.align)?;
        offsets.push(offset);

        offset = offset
            .checked_add(layout.size)
            .ok_or(LayoutError::TooLarge)?;
        align = align.max(layout.align);
    }

    let size = align_to(offset, align)?;
    if size > MAX_OBJECT_SIZE {
        return Err(LayoutError::TooLarge);
    }

    Ok(StructLayout {
        layout: Layout::new(size, align),
        offsets,
    })
}
