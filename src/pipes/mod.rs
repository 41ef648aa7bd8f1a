// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cogflow contributors

//! Pipe definitions, blueprints, and the library validator
//!
//! Raw definitions ([`definition`]) are what serde parses out of the TOML
//! dialect; blueprints ([`blueprint`]) are their validated, concept-resolved
//! form; [`PipeLibrary`] builds the latter from the former, enforcing the
//! per-variant schema rules and the static reachability check.

mod blueprint;
mod definition;
mod library;
mod reachability;

pub use blueprint::{
    BatchSpec, ConditionBlueprint, ConditionExpression, FuncBlueprint, ImgGenBlueprint,
    LlmBlueprint, OcrBlueprint, OutputMultiplicity, ParallelBlueprint, PipeBlueprint, PipeCommon,
    PromptSource, SequenceBlueprint, SubPipeBlueprint,
};
pub use definition::{
    CommonFields, ConceptDefinition, ConditionDefinition, DomainDefinition, FuncDefinition,
    ImgGenDefinition, LlmDefinition, OcrDefinition, ParallelDefinition, PipeDefinition,
    RefinesList, SequenceDefinition, SubPipeDefinition,
};
pub use library::PipeLibrary;

pub(crate) use reachability::result_name;
