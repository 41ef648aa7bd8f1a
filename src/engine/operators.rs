// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cogflow contributors

//! Operator pipe execution
//!
//! Operators read their declared inputs from working memory, invoke the
//! corresponding collaborator, and bind the result under the pipe's output
//! name. Collaborator failures are surfaced, not retried.

use std::collections::BTreeMap;

use super::{PipeEngine, PipeOutput};
use crate::collaborators::{FuncJob, ImgGenJob, LlmJob, OcrJob, WorkerOutput};
use crate::errors::{CogflowError, CogflowResult};
use crate::memory::{Stuff, StuffContent, WorkingMemory};
use crate::pipes::{
    FuncBlueprint, ImgGenBlueprint, LlmBlueprint, OcrBlueprint, OutputMultiplicity, PipeCommon,
};

pub(crate) async fn run_llm(
    engine: &PipeEngine,
    blueprint: &LlmBlueprint,
    memory: WorkingMemory,
    output_name: Option<&str>,
    multiplicity: Option<OutputMultiplicity>,
) -> CogflowResult<PipeOutput> {
    let inputs = collect_inputs(&blueprint.common, &memory)?;
    let multiplicity = multiplicity.unwrap_or(blueprint.multiplicity);

    let structure_hint = engine
        .library()
        .registry()
        .get(&blueprint.common.output)
        .and_then(|concept| concept.structure.clone());

    let job = LlmJob {
        system_prompt: blueprint.system_prompt.clone(),
        user_prompt: blueprint.user_prompt.clone(),
        model: blueprint.model.clone(),
        structure_hint,
        inputs,
        output_concept: blueprint.common.output.clone(),
        multiplicity,
    };

    let worker = engine.collaborators().llm()?.clone();
    let output = {
        let _permit = engine.throttle().await?;
        worker.generate(job).await?
    };

    let stuff = wrap_output(&blueprint.common.output, output, multiplicity)?;
    bind_result(memory, &blueprint.common, output_name, stuff)
}

pub(crate) async fn run_ocr(
    engine: &PipeEngine,
    blueprint: &OcrBlueprint,
    memory: WorkingMemory,
    output_name: Option<&str>,
) -> CogflowResult<PipeOutput> {
    let input = memory.get(OcrBlueprint::INPUT_NAME)?.clone();

    let job = OcrJob {
        input,
        include_page_views: blueprint.include_page_views,
    };

    let worker = engine.collaborators().ocr()?.clone();
    let pages = {
        let _permit = engine.throttle().await?;
        worker.extract_pages(job).await?
    };

    // OCR always produces an ordered list of pages
    let stuff = Stuff::list(blueprint.common.output.clone(), pages);
    bind_result(memory, &blueprint.common, output_name, stuff)
}

pub(crate) async fn run_img_gen(
    engine: &PipeEngine,
    blueprint: &ImgGenBlueprint,
    memory: WorkingMemory,
    output_name: Option<&str>,
) -> CogflowResult<PipeOutput> {
    let prompt = match (&blueprint.static_prompt, &blueprint.prompt_input) {
        (Some(text), _) => text.clone(),
        (None, Some(binding)) => memory
            .get(binding)?
            .content
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| CogflowError::ExecutionFailed {
                message: format!("prompt binding '{binding}' is not text"),
            })?,
        (None, None) => {
            // Unreachable for validated blueprints
            return Err(CogflowError::ExecutionFailed {
                message: "image-generation pipe has no prompt source".into(),
            });
        }
    };

    let job = ImgGenJob {
        prompt,
        aspect_ratio: blueprint.aspect_ratio.clone(),
        seed: blueprint.seed,
    };

    let worker = engine.collaborators().img_gen()?.clone();
    let image = {
        let _permit = engine.throttle().await?;
        worker.generate_image(job).await?
    };

    let stuff = Stuff::new(blueprint.common.output.clone(), image);
    bind_result(memory, &blueprint.common, output_name, stuff)
}

pub(crate) async fn run_func(
    engine: &PipeEngine,
    blueprint: &FuncBlueprint,
    memory: WorkingMemory,
    output_name: Option<&str>,
    multiplicity: Option<OutputMultiplicity>,
) -> CogflowResult<PipeOutput> {
    let inputs = collect_inputs(&blueprint.common, &memory)?;
    let multiplicity = multiplicity.unwrap_or_default();

    let job = FuncJob {
        function_name: blueprint.function_name.clone(),
        inputs,
    };

    let worker = engine.collaborators().func()?.clone();
    let output = {
        let _permit = engine.throttle().await?;
        worker.call(job).await?
    };

    let stuff = wrap_output(&blueprint.common.output, output, multiplicity)?;
    bind_result(memory, &blueprint.common, output_name, stuff)
}

/// Read every declared input from memory
fn collect_inputs(
    common: &PipeCommon,
    memory: &WorkingMemory,
) -> CogflowResult<BTreeMap<String, Stuff>> {
    let mut inputs = BTreeMap::new();
    for name in common.inputs.keys() {
        inputs.insert(name.clone(), memory.get(name)?.clone());
    }
    Ok(inputs)
}

/// Check a collaborator result against the requested multiplicity and wrap
/// it as a Stuff of the pipe's output concept
fn wrap_output(
    concept: &str,
    output: WorkerOutput,
    multiplicity: OutputMultiplicity,
) -> CogflowResult<Stuff> {
    let content = match (multiplicity, output) {
        (OutputMultiplicity::Single, WorkerOutput::Single(content)) => content,
        (OutputMultiplicity::Single, WorkerOutput::Multiple(items)) => {
            return Err(CogflowError::Collaborator {
                kind: "operator".into(),
                message: format!("expected one output, got {}", items.len()),
            })
        }
        (OutputMultiplicity::Fixed(n), WorkerOutput::Multiple(items)) => {
            if items.len() != n as usize {
                return Err(CogflowError::Collaborator {
                    kind: "operator".into(),
                    message: format!("expected {n} outputs, got {}", items.len()),
                });
            }
            StuffContent::List(items)
        }
        (OutputMultiplicity::Fixed(n), WorkerOutput::Single(_)) => {
            return Err(CogflowError::Collaborator {
                kind: "operator".into(),
                message: format!("expected {n} outputs, got one"),
            })
        }
        (OutputMultiplicity::Variable, WorkerOutput::Multiple(items)) => {
            StuffContent::List(items)
        }
        // A variable-output call that yields one item is a one-element list
        (OutputMultiplicity::Variable, WorkerOutput::Single(content)) => {
            StuffContent::List(vec![content])
        }
    };

    Ok(Stuff::new(concept, content))
}

/// Bind the operator result and assemble the pipe output
fn bind_result(
    mut memory: WorkingMemory,
    common: &PipeCommon,
    output_name: Option<&str>,
    stuff: Stuff,
) -> CogflowResult<PipeOutput> {
    let name = output_name
        .map(str::to_string)
        .unwrap_or_else(|| crate::concepts::default_binding_name(&common.output));
    memory.bind(&name, stuff.clone())?;
    Ok(PipeOutput { memory, main: stuff })
}
