//! Fatal/host error handling (§7, §10.2).
//!
//! Structured workflow errors that can cross a `try`/`except` boundary live
//! in [`crate::value::WorkflowError`]; this module is for the other tier —
//! errors that always propagate straight to the execution or process
//! boundary: malformed workflow/expression source, unknown resource names,
//! and transport-level failures. `anyhow` is reserved for the CLI binary
//! boundary (`main.rs`); library code returns `EngineError`.

use thiserror::Error;

/// Implemented by every error type the CLI or API surface can render, so
/// the presentation layer doesn't need a match arm per error enum.
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("workflow source: {0}")]
    Parse(#[from] crate::workflow::parser::ParseError),

    #[error("expression: {0}")]
    Expr(#[from] crate::expr::ParseError),

    #[error("{0}")]
    Workflow(#[from] crate::value::WorkflowError),

    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("execution '{0}' not found")]
    ExecutionNotFound(String),

    #[error("execution '{0}' is not ACTIVE")]
    ExecutionNotActive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FixSuggestion for EngineError {
    fn fix_suggestion(&self) -> Option<&str> {
        Some(match self {
            EngineError::Parse(_) => {
                "Check the workflow document: exactly one 'main:' key, 'steps:' a sequence of single-key mappings"
            }
            EngineError::Expr(_) => {
                "Check the ${...} expression: balanced delimiters, known operators, 400-char limit"
            }
            EngineError::Workflow(_) => {
                "An uncaught workflow error reached the execution boundary; wrap the failing step in try/except"
            }
            EngineError::WorkflowNotFound(_) => "Deploy the workflow first, or check the resource name",
            EngineError::ExecutionNotFound(_) => "Check the execution resource name",
            EngineError::ExecutionNotActive(_) => "Only an ACTIVE execution can be cancelled",
            EngineError::Io(_) => "Check the file path exists and has the right permissions",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_a_fix_suggestion() {
        let errs: Vec<EngineError> = vec![
            EngineError::WorkflowNotFound("foo".into()),
            EngineError::ExecutionNotFound("foo".into()),
            EngineError::ExecutionNotActive("foo".into()),
        ];
        for e in errs {
            assert!(e.fix_suggestion().is_some());
        }
    }
}
