//! Frontend for the Brook language: lexing, parsing, name resolution, type
//! checking and lowering to LIR.

pub mod diagnostics;
pub mod frontend;
pub mod index;
pub mod middle;
pub mod session;

pub use session::{CompileError, CompileOptions, CompiledUnit, Session, compile_source};
