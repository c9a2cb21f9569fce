use std::fmt::Write;

use colored::Colorize;
use strum::{Display, IntoStaticStr};

use crate::frontend::{SourceFile, lexer::Span};

/// The pipeline stage a diagnostic originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum Stage {
    #[strum(serialize = "LexError")]
    Lex,
    #[strum(serialize = "ParseError")]
    Parse,
    #[strum(serialize = "ResolveError")]
    Resolve,
    #[strum(serialize = "TypeError")]
    Type,
    #[strum(serialize = "Warning")]
    Lint,
}

/// Stable diagnostic tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum DiagnosticKind {
    /* Lexing */
    UnterminatedLiteral,
    InvalidEscape,
    InvalidNumericLiteral,
    InvalidEncoding,
    InvalidCharLiteral,
    UnexpectedCharacter,

    /* Parsing */
    UnexpectedToken,
    UnmatchedDelimiter,

    /* Resolution */
    UnresolvedName,
    DuplicateDeclaration,
    UseBeforeDeclaration,

    /* Type checking */
    TypeMismatch,
    OverflowInLiteral,
    UnknownField,
    ArgumentMismatch,
    NotAddressable,
    InvalidConditionType,
    ImmutableAssignment,
    MissingReturn,
    InvalidCast,
    IndexOutOfBounds,
    InvalidLoopControl,
    NonConstantInitializer,
    RecursiveType,
    TypeTooLarge,

    /* Warnings */
    UnreachableCode,
}

impl DiagnosticKind {
    pub fn stage(self) -> Stage {
        use DiagnosticKind::*;

        match self {
            UnterminatedLiteral | InvalidEscape | InvalidNumericLiteral | InvalidEncoding
            | InvalidCharLiteral | UnexpectedCharacter => Stage::Lex,
            UnexpectedToken | UnmatchedDelimiter => Stage::Parse,
            UnresolvedName | DuplicateDeclaration | UseBeforeDeclaration => Stage::Resolve,
            TypeMismatch | OverflowInLiteral | UnknownField | ArgumentMismatch
            | NotAddressable | InvalidConditionType | ImmutableAssignment | MissingReturn
            | InvalidCast | IndexOutOfBounds | InvalidLoopControl | NonConstantInitializer
            | RecursiveType | TypeTooLarge => Stage::Type,
            UnreachableCode => Stage::Lint,
        }
    }

    /// Fully qualified tag, e.g. `TypeError::TypeMismatch`
    pub fn tag(self) -> String {
        format!("{}::{}", self.stage(), self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondarySpan {
    pub span: Span,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Span,
    pub secondary: Vec<SecondarySpan>,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message: message.into(),
            span,
            secondary: Vec::new(),
        }
    }

    pub fn warning(kind: DiagnosticKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, span, message)
        }
    }

    pub fn with_secondary(mut self, span: Span, label: impl Into<String>) -> Self {
        self.secondary.push(SecondarySpan {
            span,
            label: label.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Renders the diagnostic with a source excerpt, colored when the
    /// `colored` crate has coloring enabled.
    pub fn render(&self, source: &SourceFile) -> String {
        let mut out = String::new();

        let header = match self.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
        };

        let _ = writeln!(
            out,
            "{header}[{}]: {}",
            self.kind.tag(),
            self.message.bold()
        );
        let _ = writeln!(
            out,
            "  {} {}:{}:{}",
            "-->".blue().bold(),
            source.origin,
            self.span.line,
            self.span.column
        );

        render_excerpt(&mut out, source, self.span, None, self.severity);

        for secondary in &self.secondary {
            render_excerpt(
                &mut out,
                source,
                secondary.span,
                Some(&secondary.label),
                Severity::Warning,
            );
        }

        out
    }
}

fn render_excerpt(
    out: &mut String,
    source: &SourceFile,
    span: Span,
    label: Option<&str>,
    severity: Severity,
) {
    let line_text = source.line_text(span.line);
    let gutter = span.line.to_string();
    let padding = " ".repeat(gutter.len());

    let width = source
        .value_of_span(span)
        .lines()
        .next()
        .map_or(1, |text| text.chars().count().max(1));
    let underline = format!(
        "{}{}",
        " ".repeat(span.column.saturating_sub(1) as usize),
        "^".repeat(width)
    );
    let underline = match severity {
        Severity::Error => underline.red().bold(),
        Severity::Warning => underline.blue().bold(),
    };

    let _ = writeln!(out, "{padding} {}", "|".blue().bold());
    let _ = writeln!(out, "{} {} {line_text}", gutter.blue().bold(), "|".blue().bold());
    let _ = match label {
        Some(label) => writeln!(out, "{padding} {} {underline} {label}", "|".blue().bold()),
        None => writeln!(out, "{padding} {} {underline}", "|".blue().bold()),
    };
}

/// Accumulates the diagnostics of one compilation unit in discovery order
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        tracing::trace!(kind = %diagnostic.kind, message = %diagnostic.message, "diagnostic");

        if diagnostic.is_error() {
            self.error_count += 1;
        }

        self.diagnostics.push(diagnostic);
    }

    pub fn error(&mut self, kind: DiagnosticKind, span: Span, message: impl Into<String>) {
        self.report(Diagnostic::error(kind, span, message));
    }

    pub fn warning(&mut self, kind: DiagnosticKind, span: Span, message: impl Into<String>) {
        self.report(Diagnostic::warning(kind, span, message));
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.report(diagnostic);
        }
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics.len() - self.error_count
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::SourceFileOrigin;

    #[test]
    fn tags_are_grouped_by_stage() {
        assert_eq!(DiagnosticKind::TypeMismatch.tag(), "TypeError::TypeMismatch");
        assert_eq!(DiagnosticKind::InvalidEscape.tag(), "LexError::InvalidEscape");
        assert_eq!(DiagnosticKind::UnmatchedDelimiter.tag(), "ParseError::UnmatchedDelimiter");
        assert_eq!(DiagnosticKind::UnreachableCode.tag(), "Warning::UnreachableCode");
    }

    #[test]
    fn collector_counts_errors_and_warnings() {
        let mut collector = DiagnosticCollector::new();

        collector.error(DiagnosticKind::UnresolvedName, Span::default(), "a");
        collector.warning(DiagnosticKind::UnreachableCode, Span::default(), "b");

        assert!(collector.has_errors());
        assert_eq!(collector.error_count(), 1);
        assert_eq!(collector.warning_count(), 1);
    }

    #[test]
    fn rendering_points_at_the_span() {
        colored::control::set_override(false);

        let source = SourceFile::new("fn main() {\n    x = 1;\n}\n", SourceFileOrigin::Memory);
        let diagnostic = Diagnostic::error(
            DiagnosticKind::UnresolvedName,
            Span::new(16, 17, 2, 5),
            "cannot find `x` in this scope",
        );

        let rendered = diagnostic.render(&source);
        let plain = String::from_utf8(strip_ansi_escapes::strip(rendered)).unwrap();

        assert_eq!(
            plain,
            indoc::indoc! {"
                error[ResolveError::UnresolvedName]: cannot find `x` in this scope
                  --> <memory>:2:5
                  |
                2 |     x = 1;
                  |     ^
            "}
        );
    }
}
