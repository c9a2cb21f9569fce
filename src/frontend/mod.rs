use std::path::PathBuf;

use crate::diagnostics::{Diagnostic, DiagnosticKind};

use self::lexer::Span;

pub mod ast;
pub mod intern;
pub mod lexer;
pub mod parser;

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(contents: impl Into<String>, origin: SourceFileOrigin) -> Self {
        let contents = contents.into();
        let line_starts = std::iter::once(0)
            .chain(contents.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        Self {
            contents,
            origin,
            line_starts,
        }
    }

    /// Validates the encoding of a raw buffer before any lexing happens.
    ///
    /// On failure the returned diagnostic points at the first invalid byte,
    /// together with a lossily decoded copy of the buffer for rendering.
    pub fn from_bytes(
        bytes: Vec<u8>,
        origin: SourceFileOrigin,
    ) -> Result<Self, (Self, Diagnostic)> {
        match String::from_utf8(bytes) {
            Ok(contents) => Ok(Self::new(contents, origin)),
            Err(error) => {
                let offset = error.utf8_error().valid_up_to();
                let lossy = String::from_utf8_lossy(error.as_bytes()).into_owned();
                let source = Self::new(lossy, origin);

                let (line, column) = source.line_column(offset);
                let span = Span::new(offset, offset + 1, line, column);
                let diagnostic = Diagnostic::error(
                    DiagnosticKind::InvalidEncoding,
                    span,
                    format!("source is not valid UTF-8 (invalid byte at offset {offset})"),
                );

                Err((source, diagnostic))
            }
        }
    }

    pub fn value_of_span(&self, span: Span) -> &str {
        self.contents.get(span.start..span.end).unwrap_or("")
    }

    /// 1-based line and column (in chars) of a byte offset
    pub fn line_column(&self, offset: usize) -> (u32, u32) {
        let line = self
            .line_starts
            .partition_point(|start| *start <= offset)
            .saturating_sub(1);
        let line_start = self.line_starts[line];
        let column = self
            .contents
            .get(line_start..offset.min(self.contents.len()))
            .map_or(offset - line_start, |prefix| prefix.chars().count());

        (line as u32 + 1, column as u32 + 1)
    }

    /// Text of a 1-based line, without its line terminator
    pub fn line_text(&self, line: u32) -> &str {
        let index = (line as usize).saturating_sub(1);
        let Some(start) = self.line_starts.get(index).copied() else {
            return "";
        };
        let end = self
            .line_starts
            .get(index + 1)
            .copied()
            .unwrap_or(self.contents.len());

        self.contents[start..end].trim_end_matches(['\n', '\r'])
    }
}

#[derive(Debug, Clone)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_columns_are_one_based() {
        let source = SourceFile::new("ab\ncd\n\nxyz", SourceFileOrigin::Memory);

        assert_eq!(source.line_column(0), (1, 1));
        assert_eq!(source.line_column(1), (1, 2));
        assert_eq!(source.line_column(3), (2, 1));
        assert_eq!(source.line_column(6), (3, 1));
        assert_eq!(source.line_column(9), (4, 3));
        assert_eq!(source.line_text(2), "cd");
        assert_eq!(source.line_text(4), "xyz");
    }

    #[test]
    fn invalid_utf8_is_rejected_before_lexing() {
        let (source, diagnostic) =
            SourceFile::from_bytes(vec![b'f', b'n', 0xff, b' '], SourceFileOrigin::Memory)
                .unwrap_err();

        assert_eq!(diagnostic.kind, DiagnosticKind::InvalidEncoding);
        assert_eq!(diagnostic.span.start, 2);
        assert!(source.contents.starts_with("fn"));
    }
}
