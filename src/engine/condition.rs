// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cogflow contributors

//! Condition expression evaluation
//!
//! Produces the string discriminant a condition dispatches on: either a
//! dotted projection over working memory ("binding.field.subfield") or a
//! literal template whose `{{ ... }}` placeholders hold such projections.

use regex::Regex;

use crate::errors::{CogflowError, CogflowResult};
use crate::memory::WorkingMemory;
use crate::pipes::ConditionExpression;

const PLACEHOLDER: &str = r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}";

/// Evaluate a condition expression against the current memory
pub(crate) fn evaluate(
    expression: &ConditionExpression,
    memory: &WorkingMemory,
) -> CogflowResult<String> {
    match expression {
        ConditionExpression::Direct(path) => evaluate_path(path, memory),
        ConditionExpression::Template(template) => evaluate_template(template, memory),
    }
}

/// Resolve a dotted projection: the first segment names a binding, the rest
/// navigate into its payload
fn evaluate_path(path: &str, memory: &WorkingMemory) -> CogflowResult<String> {
    let mut segments = path.split('.');
    let binding = segments.next().filter(|s| !s.is_empty()).ok_or_else(|| {
        CogflowError::ExpressionEvaluation {
            expression: path.to_string(),
            reason: "empty expression".into(),
        }
    })?;

    let stuff = memory.get(binding)?;
    let mut content = stuff.content.clone();
    for field in segments {
        content = content
            .project(field)
            .ok_or_else(|| CogflowError::ExpressionEvaluation {
                expression: path.to_string(),
                reason: format!("cannot project field '{field}'"),
            })?;
    }

    Ok(content.to_display_string().trim().to_string())
}

/// Substitute every `{{ binding.field }}` placeholder in a literal template
fn evaluate_template(template: &str, memory: &WorkingMemory) -> CogflowResult<String> {
    let placeholder =
        Regex::new(PLACEHOLDER).map_err(|e| CogflowError::ExpressionEvaluation {
            expression: template.to_string(),
            reason: e.to_string(),
        })?;

    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for captures in placeholder.captures_iter(template) {
        let matched = captures
            .get(0)
            .ok_or_else(|| CogflowError::ExpressionEvaluation {
                expression: template.to_string(),
                reason: "malformed placeholder".into(),
            })?;
        rendered.push_str(&template[last..matched.start()]);
        rendered.push_str(&evaluate_path(&captures[1], memory)?);
        last = matched.end();
    }
    rendered.push_str(&template[last..]);

    Ok(rendered.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Stuff, StuffContent};

    fn memory() -> WorkingMemory {
        let mut memory = WorkingMemory::new();
        memory
            .bind("category", Stuff::text("native.Text", "technical"))
            .unwrap();
        memory
            .bind(
                "analysis",
                Stuff::new(
                    "t.Analysis",
                    StuffContent::Structured(serde_json::json!({
                        "severity": "high",
                        "details": { "area": "network" },
                    })),
                ),
            )
            .unwrap();
        memory
            .bind("score", Stuff::new("native.Number", StuffContent::Number(7.0)))
            .unwrap();
        memory
    }

    #[test]
    fn test_direct_binding() {
        let result = evaluate(
            &ConditionExpression::Direct("category".into()),
            &memory(),
        )
        .unwrap();
        assert_eq!(result, "technical");
    }

    #[test]
    fn test_structured_field_projection() {
        let result = evaluate(
            &ConditionExpression::Direct("analysis.severity".into()),
            &memory(),
        )
        .unwrap();
        assert_eq!(result, "high");
    }

    #[test]
    fn test_nested_field_projection() {
        let result = evaluate(
            &ConditionExpression::Direct("analysis.details.area".into()),
            &memory(),
        )
        .unwrap();
        assert_eq!(result, "network");
    }

    #[test]
    fn test_number_renders_as_integer() {
        let result = evaluate(&ConditionExpression::Direct("score".into()), &memory()).unwrap();
        assert_eq!(result, "7");
    }

    #[test]
    fn test_missing_binding_fails() {
        let result = evaluate(&ConditionExpression::Direct("absent".into()), &memory());
        assert!(matches!(result, Err(CogflowError::MissingBinding { .. })));
    }

    #[test]
    fn test_unknown_field_fails() {
        let result = evaluate(
            &ConditionExpression::Direct("analysis.missing_field".into()),
            &memory(),
        );
        assert!(matches!(
            result,
            Err(CogflowError::ExpressionEvaluation { .. })
        ));
    }

    #[test]
    fn test_template_substitution() {
        let result = evaluate(
            &ConditionExpression::Template(
                "{{ category }}-{{ analysis.severity }}".into(),
            ),
            &memory(),
        )
        .unwrap();
        assert_eq!(result, "technical-high");
    }

    #[test]
    fn test_template_trims_surrounding_whitespace() {
        let result = evaluate(
            &ConditionExpression::Template("  {{ category }}  ".into()),
            &memory(),
        )
        .unwrap();
        assert_eq!(result, "technical");
    }

    #[test]
    fn test_template_without_placeholders_is_literal() {
        let result = evaluate(
            &ConditionExpression::Template("fallback".into()),
            &memory(),
        )
        .unwrap();
        assert_eq!(result, "fallback");
    }
}
