// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cogflow contributors

//! Error types for pipeline loading and execution
//!
//! Load-time errors (definition, resolution, reachability) abort registration
//! of the whole pipeline set; runtime errors abort the run and carry the pipe
//! path leading to the failure.

use miette::Diagnostic;
use thiserror::Error;

/// Result type for cogflow operations
pub type CogflowResult<T> = Result<T, CogflowError>;

/// Main error type for cogflow
#[derive(Error, Debug, Diagnostic)]
pub enum CogflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Definition Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipe '{pipe}' has an invalid definition: {reason}")]
    #[diagnostic(code(cogflow::pipe_definition))]
    PipeDefinition {
        pipe: String,
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Pipe code '{code}' is defined more than once")]
    #[diagnostic(
        code(cogflow::duplicate_pipe),
        help("Pipe codes are unique across all loaded domains")
    )]
    DuplicatePipe { code: String },

    #[error("Pipe '{pipe}' references unknown pipe '{reference}'")]
    #[diagnostic(
        code(cogflow::unknown_pipe_ref),
        help("Check that '{reference}' is defined in one of the loaded domains")
    )]
    UnknownPipeRef { pipe: String, reference: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Concept Resolution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Unknown concept '{name}' (resolved in domain '{domain}')")]
    #[diagnostic(
        code(cogflow::unknown_concept),
        help("Declare the concept in the domain's [concept] section or qualify it as 'domain.Name'")
    )]
    UnknownConcept { name: String, domain: String },

    #[error("Concept '{code}' is already registered")]
    #[diagnostic(code(cogflow::duplicate_concept))]
    DuplicateConcept { code: String },

    #[error("Concept '{concept}' refines unknown concept '{target}'")]
    #[diagnostic(code(cogflow::unknown_refinement_target))]
    UnknownRefinementTarget { concept: String, target: String },

    #[error("Cyclic refinement detected: {}", cycle.join(" -> "))]
    #[diagnostic(
        code(cogflow::cyclic_refinement),
        help("Refinement must form a DAG rooted at the native concepts")
    )]
    CyclicRefinement { cycle: Vec<String> },

    // ─────────────────────────────────────────────────────────────────────────
    // Reachability Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipe '{pipe}' requires input '{binding}' which is not available at that point")]
    #[diagnostic(
        code(cogflow::unresolved_input),
        help("'{binding}' must be a root input or the result of an earlier step of '{controller}'")
    )]
    UnresolvedInput {
        controller: String,
        pipe: String,
        binding: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Runtime Binding Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Binding '{name}' already exists in this scope")]
    #[diagnostic(
        code(cogflow::duplicate_binding),
        help("Working memory is append-only within a scope; pick a distinct result name")
    )]
    DuplicateBinding { name: String },

    #[error("Binding '{name}' not found in working memory")]
    #[diagnostic(code(cogflow::missing_binding))]
    MissingBinding { name: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipe '{code}' not found in library")]
    #[diagnostic(code(cogflow::pipe_not_found))]
    PipeNotFound { code: String },

    #[error("{kind} collaborator failed: {message}")]
    #[diagnostic(code(cogflow::collaborator_failed))]
    Collaborator { kind: String, message: String },

    #[error("No {kind} collaborator is registered")]
    #[diagnostic(
        code(cogflow::collaborator_missing),
        help("Register a {kind} worker on the CollaboratorSet before running this pipe")
    )]
    CollaboratorMissing { kind: String },

    #[error("Condition discriminant '{discriminant}' matched no pipe")]
    #[diagnostic(
        code(cogflow::unmatched_condition),
        help("Add the discriminant to pipe_map or set default_pipe_code")
    )]
    UnmatchedCondition { discriminant: String },

    #[error("Failed to evaluate expression '{expression}': {reason}")]
    #[diagnostic(code(cogflow::expression_evaluation))]
    ExpressionEvaluation { expression: String, reason: String },

    #[error("Batch input '{binding}' is not a list")]
    #[diagnostic(
        code(cogflow::batch_input),
        help("batch_over must name a binding whose content is an ordered list")
    )]
    BatchInput { binding: String },

    #[error("Pipe '{pipe}' failed (path: {path})")]
    #[diagnostic(code(cogflow::pipe_run))]
    PipeRun {
        pipe: String,
        path: String,
        #[source]
        source: Box<CogflowError>,
    },

    #[error("Execution failed: {message}")]
    #[diagnostic(code(cogflow::execution_failed))]
    ExecutionFailed { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Parse Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(cogflow::toml_error))]
    Toml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(cogflow::json_error))]
    Json { message: String },
}

impl From<toml::de::Error> for CogflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for CogflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl CogflowError {
    /// Create a pipe definition error without extra help text
    pub fn pipe_definition(pipe: &str, reason: impl Into<String>) -> Self {
        Self::PipeDefinition {
            pipe: pipe.to_string(),
            reason: reason.into(),
            help: None,
        }
    }

    /// Create a pipe definition error for two fields that cannot both be set
    pub fn mutually_exclusive(pipe: &str, first: &str, second: &str) -> Self {
        Self::PipeDefinition {
            pipe: pipe.to_string(),
            reason: format!("'{first}' and '{second}' are mutually exclusive"),
            help: Some(format!("Set at most one of '{first}' and '{second}'")),
        }
    }

    /// Wrap a runtime error with the pipe path leading to the failure.
    ///
    /// Only the innermost frame wraps, so the recorded path is the full
    /// path from the root pipe down to the failure point.
    pub fn at_pipe(self, pipe: &str, path: &[String]) -> Self {
        match self {
            wrapped @ Self::PipeRun { .. } => wrapped,
            source => Self::PipeRun {
                pipe: pipe.to_string(),
                path: path.join(" -> "),
                source: Box::new(source),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_pipe_wraps_once() {
        let path = vec!["outer".to_string(), "inner".to_string()];
        let err = CogflowError::MissingBinding { name: "x".into() }.at_pipe("inner", &path);

        match &err {
            CogflowError::PipeRun { pipe, path, source } => {
                assert_eq!(pipe, "inner");
                assert_eq!(path, "outer -> inner");
                assert!(matches!(**source, CogflowError::MissingBinding { .. }));
            }
            _ => panic!("Expected PipeRun"),
        }

        // A second wrap must keep the innermost path
        let rewrapped = err.at_pipe("outer", &["outer".to_string()]);
        match rewrapped {
            CogflowError::PipeRun { path, .. } => assert_eq!(path, "outer -> inner"),
            _ => panic!("Expected PipeRun"),
        }
    }

    #[test]
    fn test_mutually_exclusive_message() {
        let err = CogflowError::mutually_exclusive("p", "expression", "expression_template");
        assert!(err.to_string().contains("mutually exclusive"));
    }
}
