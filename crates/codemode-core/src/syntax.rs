//! Syntax-only check of a program, reported against the user's own lines.
//!
//! The source is parsed in the same wrapped form the compiler emits, so a
//! top-level `return` or `await` is legal here too. Type errors are never
//! reported; only what the parser rejects.

use std::panic::{self, AssertUnwindSafe};

use deno_ast::ParseDiagnostic;
use serde::{Deserialize, Serialize};

use crate::compiler::{
    parse_typescript, prepare, program_specifier, wrapper_escape, WRAPPER_ESCAPE_MESSAGE,
    WRAPPER_PREFIX,
};

/// A parse error at a 1-based line/column of the submitted source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxDiagnostic {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl std::fmt::Display for SyntaxDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "at line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxReport {
    pub valid: bool,
    pub diagnostics: Vec<SyntaxDiagnostic>,
}

impl SyntaxReport {
    fn clean() -> Self {
        Self {
            valid: true,
            diagnostics: Vec::new(),
        }
    }
}

/// Parse `source` and collect fatal and recovered parse errors.
///
/// If the parser itself breaks down the source is treated as valid and a
/// warning is logged; execution will surface any real problem.
pub fn check_syntax(source: &str) -> SyntaxReport {
    let prepared = prepare(source);

    let parsed = panic::catch_unwind(AssertUnwindSafe(|| parse_diagnostics(&prepared.text)));
    let raw = match parsed {
        Ok(Some(raw)) => raw,
        Ok(None) => return SyntaxReport::clean(),
        Err(_) => {
            tracing::warn!(
                source_bytes = source.len(),
                "syntax: parser panicked, treating program as valid"
            );
            return SyntaxReport::clean();
        }
    };

    let map = PositionMap::new(source);
    let mut diagnostics: Vec<SyntaxDiagnostic> = raw
        .into_iter()
        .map(|(line, column, message)| map.to_source(line, column, message))
        .collect();
    diagnostics.sort_by_key(|d| (d.line, d.column));
    diagnostics.dedup();

    SyntaxReport {
        valid: diagnostics.is_empty(),
        diagnostics,
    }
}

/// `(line, column, message)` for every diagnostic in the prepared text.
/// `None` when no parse could be attempted.
fn parse_diagnostics(text: &str) -> Option<Vec<(usize, usize, String)>> {
    let specifier = match program_specifier() {
        Ok(specifier) => specifier,
        Err(err) => {
            tracing::warn!(error = %err, "syntax: no program specifier, skipping check");
            return None;
        }
    };

    let raw = match parse_typescript(text, specifier) {
        Ok(parsed) => {
            let mut raw: Vec<_> = parsed.diagnostics().iter().map(position_of).collect();
            if let Some(escape) = wrapper_escape(&parsed) {
                let position = parsed.text_info_lazy().line_and_column_display(escape);
                raw.push((
                    position.line_number,
                    position.column_number,
                    WRAPPER_ESCAPE_MESSAGE.to_string(),
                ));
            }
            raw
        }
        Err(fatal) => vec![position_of(&fatal)],
    };
    Some(raw)
}

fn position_of(diagnostic: &ParseDiagnostic) -> (usize, usize, String) {
    let position = diagnostic.display_position();
    (
        position.line_number,
        position.column_number,
        diagnostic.message().to_string(),
    )
}

/// Maps positions in the wrapped text back onto the submitted source.
struct PositionMap {
    last_line: usize,
    last_line_width: usize,
}

impl PositionMap {
    fn new(source: &str) -> Self {
        let lines: Vec<&str> = source.split('\n').collect();
        Self {
            last_line: lines.len().max(1),
            last_line_width: lines.last().map_or(0, |l| l.chars().count()),
        }
    }

    fn to_source(&self, line: usize, column: usize, message: String) -> SyntaxDiagnostic {
        let prefix = WRAPPER_PREFIX.chars().count();
        let (line, column) = if line > self.last_line {
            // Errors found in the closing wrapper belong to end of input.
            (self.last_line, self.last_line_width + 1)
        } else if line <= 1 {
            (1, column.saturating_sub(prefix).max(1))
        } else {
            (line, column.max(1))
        };
        SyntaxDiagnostic {
            line,
            column,
            message,
        }
    }
}
