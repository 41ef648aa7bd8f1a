// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cogflow contributors

//! Pipe library
//!
//! Turns raw domain definitions into a validated, immutable library: concepts
//! registered and checked for cycles, every pipe parsed into its typed
//! blueprint, per-variant schema rules enforced, and the static reachability
//! check run over every controller. Loading is all-or-nothing: any failure
//! aborts registration of the whole pipeline set.

use std::collections::HashMap;
use std::sync::Arc;

use super::blueprint::{
    BatchSpec, ConditionBlueprint, ConditionExpression, FuncBlueprint, ImgGenBlueprint,
    LlmBlueprint, OcrBlueprint, OutputMultiplicity, ParallelBlueprint, PipeBlueprint, PipeCommon,
    PromptSource, SequenceBlueprint, SubPipeBlueprint,
};
use super::definition::{
    ConceptDefinition, ConditionDefinition, DomainDefinition, LlmDefinition, PipeDefinition,
    SubPipeDefinition,
};
use super::reachability;
use crate::concepts::{is_native_name, qualify, Concept, ConceptRegistry};
use crate::errors::CogflowError;

/// Validated pipe graph: the concept registry plus all pipe blueprints,
/// keyed by pipe code
#[derive(Debug, Clone)]
pub struct PipeLibrary {
    registry: ConceptRegistry,
    pipes: HashMap<String, Arc<PipeBlueprint>>,
}

impl PipeLibrary {
    /// Parse and build a library from TOML documents, one per domain
    pub fn load_toml(sources: &[&str]) -> Result<Self, CogflowError> {
        let definitions = sources
            .iter()
            .map(|s| DomainDefinition::from_toml(s))
            .collect::<Result<Vec<_>, _>>()?;
        Self::build(definitions)
    }

    /// Build a library from parsed domain definitions
    pub fn build(definitions: Vec<DomainDefinition>) -> Result<Self, CogflowError> {
        let mut registry = ConceptRegistry::new();
        register_concepts(&mut registry, &definitions)?;
        registry.validate_acyclic()?;

        let mut pipes: HashMap<String, Arc<PipeBlueprint>> = HashMap::new();
        for definition in &definitions {
            for (code, pipe_def) in &definition.pipe {
                if pipes.contains_key(code) {
                    return Err(CogflowError::DuplicatePipe { code: code.clone() });
                }
                let blueprint = build_pipe(code, &definition.domain, pipe_def, &registry)?;
                pipes.insert(code.clone(), Arc::new(blueprint));
            }
        }

        validate_pipe_refs(&pipes)?;
        reachability::check_all(&pipes)?;

        Ok(Self { registry, pipes })
    }

    /// Look up a pipe blueprint by code
    pub fn get(&self, code: &str) -> Result<Arc<PipeBlueprint>, CogflowError> {
        self.pipes
            .get(code)
            .cloned()
            .ok_or_else(|| CogflowError::PipeNotFound {
                code: code.to_string(),
            })
    }

    /// The concept registry backing this library
    pub fn registry(&self) -> &ConceptRegistry {
        &self.registry
    }

    /// All pipe codes, sorted
    pub fn pipe_codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.pipes.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }

    pub(crate) fn pipes(&self) -> &HashMap<String, Arc<PipeBlueprint>> {
        &self.pipes
    }
}

/// Register all concepts of a definition batch.
///
/// Refinement targets may reference concepts declared later in the batch, so
/// registration retries until a full pass makes no progress.
fn register_concepts(
    registry: &mut ConceptRegistry,
    definitions: &[DomainDefinition],
) -> Result<(), CogflowError> {
    let mut pending: Vec<Concept> = Vec::new();

    for definition in definitions {
        for (name, concept_def) in &definition.concept {
            let code = qualify(&definition.domain, name);
            let concept = match concept_def {
                ConceptDefinition::Definition(text) => Concept::new(code, text.clone()),
                ConceptDefinition::Full {
                    definition: text,
                    structure,
                    refines,
                } => Concept {
                    code,
                    definition: text.clone(),
                    structure: structure.clone(),
                    refines: refines
                        .targets()
                        .iter()
                        .map(|t| qualify_concept_ref(t, &definition.domain))
                        .collect(),
                },
            };
            pending.push(concept);
        }
    }

    while !pending.is_empty() {
        let mut still_pending = Vec::new();
        let mut blocked_error = None;
        let before = pending.len();

        for concept in pending {
            match registry.register(concept.clone()) {
                Ok(()) => {}
                Err(err @ CogflowError::UnknownRefinementTarget { .. }) => {
                    blocked_error = Some(err);
                    still_pending.push(concept);
                }
                Err(other) => return Err(other),
            }
        }

        if still_pending.len() == before {
            // No progress: the remaining refinement targets really are unknown
            return Err(blocked_error.unwrap_or(CogflowError::ExecutionFailed {
                message: "concept registration stalled".into(),
            }));
        }
        pending = still_pending;
    }

    Ok(())
}

/// Qualify a refinement target lexically (existence is checked at registration)
fn qualify_concept_ref(name: &str, domain: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else if is_native_name(name) {
        qualify("native", name)
    } else {
        qualify(domain, name)
    }
}

/// Build and schema-check one pipe blueprint
fn build_pipe(
    code: &str,
    domain: &str,
    definition: &PipeDefinition,
    registry: &ConceptRegistry,
) -> Result<PipeBlueprint, CogflowError> {
    let common = build_common(code, domain, definition, registry)?;

    match definition {
        PipeDefinition::Llm(def) => build_llm(code, common, def),
        PipeDefinition::Ocr(def) => {
            let input_concept = common
                .inputs
                .get(OcrBlueprint::INPUT_NAME)
                .ok_or_else(|| CogflowError::PipeDefinition {
                    pipe: code.to_string(),
                    reason: format!("missing required input '{}'", OcrBlueprint::INPUT_NAME),
                    help: Some("Ocr pipes read the document to scan from 'ocr_input'".into()),
                })?;

            let is_image = registry.is_refinement_of(input_concept, "native.Image");
            let is_pdf = registry.is_refinement_of(input_concept, "native.PDF");
            if !is_image && !is_pdf {
                return Err(CogflowError::pipe_definition(
                    code,
                    format!("'ocr_input' must be an Image or PDF, got '{input_concept}'"),
                ));
            }

            if !registry.is_refinement_of(&common.output, "native.Page") {
                return Err(CogflowError::PipeDefinition {
                    pipe: code.to_string(),
                    reason: format!("output must refine Page, got '{}'", common.output),
                    help: Some("Ocr pipes produce an ordered list of pages".into()),
                });
            }

            Ok(PipeBlueprint::Ocr(OcrBlueprint {
                common,
                include_page_views: def.page_views.unwrap_or(false),
            }))
        }
        PipeDefinition::ImgGen(def) => {
            let prompt_input = if def.img_gen_prompt.is_some() {
                None
            } else {
                let mut text_inputs = common
                    .inputs
                    .iter()
                    .filter(|(_, concept)| registry.is_refinement_of(concept, "native.Text"));
                let first = text_inputs.next();
                if text_inputs.next().is_some() {
                    return Err(CogflowError::pipe_definition(
                        code,
                        "several Text inputs; the prompt source is ambiguous",
                    ));
                }
                let (name, _) = first.ok_or_else(|| CogflowError::PipeDefinition {
                    pipe: code.to_string(),
                    reason: "no prompt source".into(),
                    help: Some(
                        "Set 'img_gen_prompt' or declare exactly one Text input".into(),
                    ),
                })?;
                Some(name.clone())
            };

            Ok(PipeBlueprint::ImgGen(ImgGenBlueprint {
                common,
                static_prompt: def.img_gen_prompt.clone(),
                prompt_input,
                aspect_ratio: def.aspect_ratio.clone(),
                seed: def.seed,
            }))
        }
        PipeDefinition::Func(def) => {
            if def.function_name.is_empty() {
                return Err(CogflowError::pipe_definition(code, "function_name is empty"));
            }
            Ok(PipeBlueprint::Func(FuncBlueprint {
                common,
                function_name: def.function_name.clone(),
            }))
        }
        PipeDefinition::Sequence(def) => {
            if def.steps.is_empty() {
                return Err(CogflowError::pipe_definition(code, "steps is empty"));
            }
            let steps = def
                .steps
                .iter()
                .map(|step| build_sub_pipe(code, step))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(PipeBlueprint::Sequence(SequenceBlueprint { common, steps }))
        }
        PipeDefinition::Parallel(def) => {
            if def.parallels.is_empty() {
                return Err(CogflowError::pipe_definition(code, "parallels is empty"));
            }
            if !def.add_each_output && def.combined_output.is_none() {
                return Err(CogflowError::PipeDefinition {
                    pipe: code.to_string(),
                    reason: "no output mode".into(),
                    help: Some(
                        "Enable add_each_output and/or set combined_output".into(),
                    ),
                });
            }
            let branches = def
                .parallels
                .iter()
                .map(|branch| {
                    if branch.result.is_none() {
                        return Err(CogflowError::pipe_definition(
                            code,
                            format!("parallel branch '{}' must declare a result name", branch.pipe),
                        ));
                    }
                    build_sub_pipe(code, branch)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(PipeBlueprint::Parallel(ParallelBlueprint {
                common,
                branches,
                add_each_output: def.add_each_output,
                combined_output: def.combined_output.clone(),
            }))
        }
        PipeDefinition::Condition(def) => build_condition(code, common, def),
    }
}

fn build_common(
    code: &str,
    domain: &str,
    definition: &PipeDefinition,
    registry: &ConceptRegistry,
) -> Result<PipeCommon, CogflowError> {
    let raw = match definition {
        PipeDefinition::Llm(d) => &d.common,
        PipeDefinition::Ocr(d) => &d.common,
        PipeDefinition::ImgGen(d) => &d.common,
        PipeDefinition::Func(d) => &d.common,
        PipeDefinition::Sequence(d) => &d.common,
        PipeDefinition::Parallel(d) => &d.common,
        PipeDefinition::Condition(d) => &d.common,
    };

    let mut inputs = std::collections::BTreeMap::new();
    for (name, concept_ref) in &raw.inputs {
        inputs.insert(name.clone(), registry.resolve(concept_ref, domain)?);
    }

    Ok(PipeCommon {
        code: code.to_string(),
        domain: domain.to_string(),
        definition: raw.definition.clone(),
        inputs,
        output: registry.resolve(&raw.output, domain)?,
    })
}

fn build_llm(
    code: &str,
    common: PipeCommon,
    def: &LlmDefinition,
) -> Result<PipeBlueprint, CogflowError> {
    let system_prompt = match (&def.system_prompt, &def.system_prompt_template) {
        (Some(_), Some(_)) => {
            return Err(CogflowError::mutually_exclusive(
                code,
                "system_prompt",
                "system_prompt_template",
            ))
        }
        (Some(text), None) => Some(PromptSource::Verbatim(text.clone())),
        (None, Some(template)) => Some(PromptSource::Template(template.clone())),
        (None, None) => None,
    };

    let user_prompt = match (&def.prompt, &def.prompt_template) {
        (Some(_), Some(_)) => {
            return Err(CogflowError::mutually_exclusive(code, "prompt", "prompt_template"))
        }
        (Some(text), None) => Some(PromptSource::Verbatim(text.clone())),
        (None, Some(template)) => Some(PromptSource::Template(template.clone())),
        (None, None) => None,
    };

    let multiplicity = resolve_multiplicity(code, def.nb_output, def.multiple_output)?;

    Ok(PipeBlueprint::Llm(LlmBlueprint {
        common,
        system_prompt,
        user_prompt,
        model: def.model.clone(),
        multiplicity,
    }))
}

fn build_condition(
    code: &str,
    common: PipeCommon,
    def: &ConditionDefinition,
) -> Result<PipeBlueprint, CogflowError> {
    let expression = match (&def.expression, &def.expression_template) {
        (Some(_), Some(_)) => {
            return Err(CogflowError::mutually_exclusive(
                code,
                "expression",
                "expression_template",
            ))
        }
        (Some(expr), None) => ConditionExpression::Direct(expr.clone()),
        (None, Some(template)) => ConditionExpression::Template(template.clone()),
        (None, None) => {
            return Err(CogflowError::pipe_definition(
                code,
                "one of 'expression' and 'expression_template' is required",
            ))
        }
    };

    if def.pipe_map.is_empty() {
        return Err(CogflowError::pipe_definition(code, "pipe_map is empty"));
    }

    Ok(PipeBlueprint::Condition(ConditionBlueprint {
        common,
        expression,
        pipe_map: def.pipe_map.clone(),
        default_pipe_code: def.default_pipe_code.clone(),
        alias: def.add_alias_from_expression_to.clone(),
    }))
}

fn build_sub_pipe(
    controller: &str,
    def: &SubPipeDefinition,
) -> Result<SubPipeBlueprint, CogflowError> {
    let batch = match (&def.batch_over, &def.batch_as) {
        (Some(over), Some(element)) => Some(BatchSpec {
            over: over.clone(),
            element: element.clone(),
        }),
        (None, None) => None,
        _ => {
            return Err(CogflowError::PipeDefinition {
                pipe: controller.to_string(),
                reason: format!(
                    "step '{}' sets only one of batch_over/batch_as",
                    def.pipe
                ),
                help: Some("batch_over and batch_as are both present or both absent".into()),
            })
        }
    };

    let multiplicity = resolve_multiplicity(controller, def.nb_output, def.multiple_output)?;

    Ok(SubPipeBlueprint {
        pipe: def.pipe.clone(),
        result: def.result.clone(),
        multiplicity,
        batch,
    })
}

fn resolve_multiplicity(
    pipe: &str,
    nb_output: Option<u32>,
    multiple_output: Option<bool>,
) -> Result<OutputMultiplicity, CogflowError> {
    match (nb_output, multiple_output) {
        (Some(_), Some(_)) => Err(CogflowError::mutually_exclusive(
            pipe,
            "nb_output",
            "multiple_output",
        )),
        (Some(0), None) => Err(CogflowError::pipe_definition(pipe, "nb_output must be at least 1")),
        (Some(n), None) => Ok(OutputMultiplicity::Fixed(n)),
        (None, Some(true)) => Ok(OutputMultiplicity::Variable),
        (None, Some(false)) | (None, None) => Ok(OutputMultiplicity::Single),
    }
}

/// Check that every referenced pipe code exists in the library
fn validate_pipe_refs(pipes: &HashMap<String, Arc<PipeBlueprint>>) -> Result<(), CogflowError> {
    let check = |pipe: &str, reference: &str| -> Result<(), CogflowError> {
        if pipes.contains_key(reference) {
            Ok(())
        } else {
            Err(CogflowError::UnknownPipeRef {
                pipe: pipe.to_string(),
                reference: reference.to_string(),
            })
        }
    };

    for blueprint in pipes.values() {
        match blueprint.as_ref() {
            PipeBlueprint::Sequence(seq) => {
                for step in &seq.steps {
                    check(seq.common.code.as_str(), &step.pipe)?;
                }
            }
            PipeBlueprint::Parallel(par) => {
                for branch in &par.branches {
                    check(par.common.code.as_str(), &branch.pipe)?;
                }
            }
            PipeBlueprint::Condition(cond) => {
                for reference in cond.pipe_map.values() {
                    check(cond.common.code.as_str(), reference)?;
                }
                if let Some(default) = &cond.default_pipe_code {
                    check(cond.common.code.as_str(), default)?;
                }
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(sources: &[&str]) -> Result<PipeLibrary, CogflowError> {
        PipeLibrary::load_toml(sources)
    }

    const SUMMARIZE: &str = r#"
domain = "doc"

[concept]
Invoice = "A supplier invoice"

[pipe.summarize]
type = "LLM"
definition = "Summarize an invoice"
inputs = { invoice = "Invoice" }
output = "Text"
prompt_template = "Summarize: @invoice"
"#;

    #[test]
    fn test_build_valid_library() {
        let library = load(&[SUMMARIZE]).unwrap();
        assert_eq!(library.pipe_codes(), vec!["summarize"]);
        assert!(library.registry().get("doc.Invoice").is_some());
    }

    #[test]
    fn test_unknown_pipe_fails_lookup() {
        let library = load(&[SUMMARIZE]).unwrap();
        assert!(matches!(
            library.get("nope"),
            Err(CogflowError::PipeNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_pipe_code_across_domains_fails() {
        let other = r#"
domain = "finance"

[pipe.summarize]
type = "Func"
definition = "Summarize numbers"
output = "Text"
function_name = "sum"
"#;
        let result = load(&[SUMMARIZE, other]);
        assert!(matches!(result, Err(CogflowError::DuplicatePipe { .. })));
    }

    #[test]
    fn test_unknown_input_concept_fails() {
        let source = r#"
domain = "doc"

[pipe.p]
type = "LLM"
definition = "Uses a concept nobody declared"
inputs = { x = "Mystery" }
output = "Text"
"#;
        let result = load(&[source]);
        assert!(matches!(result, Err(CogflowError::UnknownConcept { .. })));
    }

    #[test]
    fn test_concept_forward_reference_resolves() {
        // "Alpha" refines "Zeta", declared after it in the map order
        let source = r#"
domain = "d"

[concept.Alpha]
definition = "Refines a later concept"
refines = "Zeta"

[concept.Zeta]
definition = "Declared last"
"#;
        let library = load(&[source]).unwrap();
        assert!(library.registry().is_refinement_of("d.Alpha", "d.Zeta"));
    }

    #[test]
    fn test_llm_exclusive_prompt_sources() {
        let source = r#"
domain = "d"

[pipe.p]
type = "LLM"
definition = "Both user prompt sources set"
output = "Text"
prompt = "verbatim"
prompt_template = "template"
"#;
        let result = load(&[source]);
        assert!(matches!(result, Err(CogflowError::PipeDefinition { .. })));
    }

    #[test]
    fn test_llm_exclusive_output_multiplicity() {
        let source = r#"
domain = "d"

[pipe.p]
type = "LLM"
definition = "Both multiplicities set"
output = "Text"
nb_output = 3
multiple_output = true
"#;
        let result = load(&[source]);
        assert!(matches!(result, Err(CogflowError::PipeDefinition { .. })));
    }

    #[test]
    fn test_ocr_requires_typed_ocr_input() {
        let missing = r#"
domain = "d"

[pipe.scan]
type = "Ocr"
definition = "No ocr_input declared"
output = "Page"
"#;
        assert!(matches!(
            load(&[missing]),
            Err(CogflowError::PipeDefinition { .. })
        ));

        let wrong_type = r#"
domain = "d"

[pipe.scan]
type = "Ocr"
definition = "ocr_input is text"
inputs = { ocr_input = "Text" }
output = "Page"
"#;
        assert!(matches!(
            load(&[wrong_type]),
            Err(CogflowError::PipeDefinition { .. })
        ));

        let valid = r#"
domain = "d"

[concept.Scan]
definition = "A scanned document"
refines = "Image"

[pipe.scan]
type = "Ocr"
definition = "ocr_input refines Image"
inputs = { ocr_input = "Scan" }
output = "Page"
"#;
        assert!(load(&[valid]).is_ok());
    }

    #[test]
    fn test_sequence_batch_pairing_enforced() {
        let source = r#"
domain = "d"

[pipe.work]
type = "Func"
definition = "Work"
inputs = { item = "Text" }
output = "Text"
function_name = "work"

[pipe.seq]
type = "Sequence"
definition = "Batch with only one half of the pair"
inputs = { items = "Text" }
output = "Text"
steps = [
    { pipe = "work", result = "results", batch_over = "items" },
]
"#;
        let result = load(&[source]);
        assert!(matches!(result, Err(CogflowError::PipeDefinition { .. })));
    }

    #[test]
    fn test_parallel_requires_result_and_output_mode() {
        let no_result = r#"
domain = "d"

[pipe.work]
type = "Func"
definition = "Work"
inputs = { x = "Text" }
output = "Text"
function_name = "work"

[pipe.par]
type = "Parallel"
definition = "Branch without result"
inputs = { x = "Text" }
output = "Text"
add_each_output = true
parallels = [
    { pipe = "work" },
]
"#;
        assert!(matches!(
            load(&[no_result]),
            Err(CogflowError::PipeDefinition { .. })
        ));

        let no_mode = r#"
domain = "d"

[pipe.work]
type = "Func"
definition = "Work"
inputs = { x = "Text" }
output = "Text"
function_name = "work"

[pipe.par]
type = "Parallel"
definition = "Neither output mode"
inputs = { x = "Text" }
output = "Text"
parallels = [
    { pipe = "work", result = "y" },
]
"#;
        assert!(matches!(
            load(&[no_mode]),
            Err(CogflowError::PipeDefinition { .. })
        ));
    }

    #[test]
    fn test_condition_requires_exactly_one_expression() {
        let neither = r#"
domain = "d"

[pipe.handle]
type = "Func"
definition = "Handle"
output = "Text"
function_name = "handle"

[pipe.route]
type = "Condition"
definition = "No expression at all"
output = "Text"

[pipe.route.pipe_map]
a = "handle"
"#;
        assert!(matches!(
            load(&[neither]),
            Err(CogflowError::PipeDefinition { .. })
        ));

        let both = r#"
domain = "d"

[pipe.handle]
type = "Func"
definition = "Handle"
output = "Text"
function_name = "handle"

[pipe.route]
type = "Condition"
definition = "Both expression forms"
output = "Text"
expression = "x"
expression_template = "{{ x }}"

[pipe.route.pipe_map]
a = "handle"
"#;
        assert!(matches!(
            load(&[both]),
            Err(CogflowError::PipeDefinition { .. })
        ));
    }

    #[test]
    fn test_unknown_pipe_reference_fails() {
        let source = r#"
domain = "d"

[pipe.seq]
type = "Sequence"
definition = "References a pipe that does not exist"
inputs = { x = "Text" }
output = "Text"
steps = [
    { pipe = "ghost", result = "y" },
]
"#;
        let result = load(&[source]);
        assert!(matches!(result, Err(CogflowError::UnknownPipeRef { .. })));
    }
}
