//! Names are resolved and types are checked here, then the checked AST is
//! lowered and flattened to LIR.

pub mod layout;
pub mod lir;
pub mod primitive;
pub mod resolve;
pub mod ty;
pub mod type_check;
