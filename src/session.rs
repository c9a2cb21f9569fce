//! Drives a compilation unit through every stage of the frontend.
//!
//! Each stage collects all of its diagnostics before the pipeline decides
//! whether to continue. A stage never runs on a module the previous stage
//! reported errors for.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use thiserror::Error;

use crate::{
    diagnostics::{Diagnostic, DiagnosticCollector, Severity},
    frontend::{SourceFile, SourceFileOrigin, parser::Parser},
    middle::{
        lir::{self, LoweringError, ast_lowering},
        primitive::{DEFAULT_INTEGER, IntegerKind},
        resolve::Resolver,
        ty::TypeTable,
        type_check::TypeChecker,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Type of integer literals that nothing else gives a type
    pub default_integer: IntegerKind,
    /// Treat every warning as an error, so a unit with warnings produces no
    /// LIR
    pub warnings_as_errors: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            default_integer: DEFAULT_INTEGER,
            warnings_as_errors: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("internal compiler error: {0}")]
    Internal(#[from] LoweringError),
    #[error("failed to read `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of compiling one source buffer
#[derive(Debug)]
pub struct CompiledUnit {
    pub source: SourceFile,
    /// `None` when any error was reported
    pub module: Option<lir::Module>,
    /// Every diagnostic, ordered by stage and then by discovery
    pub diagnostics: Vec<Diagnostic>,
}

impl CompiledUnit {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn render_diagnostics(&self) -> String {
        self.diagnostics
            .iter()
            .map(|diagnostic| diagnostic.render(&self.source))
            .collect()
    }
}

/// State shared by every unit compiled together. Types are interned in one
/// table, so a `TypeId` means the same thing in every unit of a session.
#[derive(Debug, Default)]
pub struct Session {
    types: TypeTable,
    options: CompileOptions,
}

impl Session {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            types: TypeTable::new(),
            options,
        }
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn compile_source(
        &self,
        bytes: impl Into<Vec<u8>>,
        origin: SourceFileOrigin,
    ) -> Result<CompiledUnit, CompileError> {
        let source = match SourceFile::from_bytes(bytes.into(), origin) {
            Ok(source) => source,
            Err((source, diagnostic)) => {
                return Ok(CompiledUnit {
                    source,
                    module: None,
                    diagnostics: vec![diagnostic],
                });
            }
        };

        let mut diagnostics = DiagnosticCollector::new();
        let module = self.run_pipeline(&source, &mut diagnostics)?;

        Ok(CompiledUnit {
            source,
            module,
            diagnostics: diagnostics.into_vec(),
        })
    }

    pub fn compile_file(&self, path: &Path) -> Result<CompiledUnit, CompileError> {
        let bytes = std::fs::read(path).map_err(|source| CompileError::Io {
            path: path.to_owned(),
            source,
        })?;

        self.compile_source(bytes, SourceFileOrigin::File(path.to_owned()))
    }

    /// Compiles every file in parallel. Results keep the order of `paths`.
    pub fn compile_all(&self, paths: &[PathBuf]) -> Vec<Result<CompiledUnit, CompileError>> {
        paths
            .par_iter()
            .map(|path| self.compile_file(path))
            .collect()
    }

    fn run_pipeline(
        &self,
        source: &SourceFile,
        diagnostics: &mut DiagnosticCollector,
    ) -> Result<Option<lir::Module>, CompileError> {
        let _span = tracing::debug_span!("compile", origin = %source.origin).entered();

        let module = Parser::parse_module(source, diagnostics);
        if diagnostics.has_errors() {
            return Ok(None);
        }

        let symbols = Resolver::resolve_names(&module, diagnostics);
        if diagnostics.has_errors() {
            return Ok(None);
        }

        TypeChecker::check_module(
            &module,
            &symbols,
            &self.types,
            self.options.default_integer,
            diagnostics,
        );

        if self.options.warnings_as_errors && diagnostics.warning_count() > 0 {
            let promoted = std::mem::take(diagnostics)
                .into_vec()
                .into_iter()
                .map(|diagnostic| Diagnostic {
                    severity: Severity::Error,
                    ..diagnostic
                });

            diagnostics.extend(promoted);
        }

        if diagnostics.has_errors() {
            tracing::debug!(errors = diagnostics.error_count(), "not lowering");
            return Ok(None);
        }

        let lowered = ast_lowering::lower_module(&module, &symbols, &self.types)?;

        tracing::debug!(
            functions = lowered.functions.len(),
            globals = lowered.globals.len(),
            blocks = lowered.block_count(),
            "compiled"
        );

        Ok(Some(lowered))
    }
}

/// Compiles a single buffer with a fresh session and default options
pub fn compile_source(
    bytes: impl Into<Vec<u8>>,
    origin: SourceFileOrigin,
) -> Result<CompiledUnit, CompileError> {
    Session::default().compile_source(bytes, origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticKind, Stage};

    #[test]
    fn stops_after_parse_errors() {
        // Both the syntax errors and the unresolved name are in the source,
        // but resolution never runs
        let unit = compile_source(
            "fn f() { let = 1; }\nfn g() { return nope }",
            SourceFileOrigin::Memory,
        )
        .unwrap();

        assert!(unit.module.is_none());
        assert!(!unit.diagnostics.is_empty());
        assert!(
            unit.diagnostics
                .iter()
                .all(|diagnostic| diagnostic.kind.stage() == Stage::Parse)
        );
    }

    #[test]
    fn invalid_encoding_is_a_single_diagnostic() {
        let unit = compile_source(vec![0xc3, 0x28], SourceFileOrigin::Memory).unwrap();

        assert!(unit.module.is_none());
        assert_eq!(unit.diagnostics.len(), 1);
        assert_eq!(unit.diagnostics[0].kind, DiagnosticKind::InvalidEncoding);
    }

    #[test]
    fn warnings_block_lowering_when_promoted() {
        let text = "fn f() -> i32 { return 1; return 2; }";

        let lenient = compile_source(text, SourceFileOrigin::Memory).unwrap();
        assert!(lenient.module.is_some());
        assert_eq!(lenient.diagnostics.len(), 1);
        assert_eq!(lenient.diagnostics[0].severity, Severity::Warning);

        let strict = Session::new(CompileOptions {
            warnings_as_errors: true,
            ..CompileOptions::default()
        })
        .compile_source(text, SourceFileOrigin::Memory)
        .unwrap();

        assert!(strict.module.is_none());
        assert!(strict.has_errors());
    }

    #[test]
    fn default_integer_is_configurable() {
        let session = Session::new(CompileOptions {
            default_integer: IntegerKind::I64,
            ..CompileOptions::default()
        });

        let unit = session
            .compile_source("fn f() -> i64 { let x = 1; return x; }", SourceFileOrigin::Memory)
            .unwrap();

        assert!(unit.diagnostics.is_empty(), "{:?}", unit.diagnostics);
        assert!(unit.module.is_some());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = Session::default().compile_file(Path::new("/nonexistent/brook/source.br"));

        assert!(matches!(result, Err(CompileError::Io { .. })));
    }
}
