// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cogflow contributors

//! Raw pipe-graph definitions
//!
//! Defines the schema of the declarative TOML dialect: one document per
//! domain, with a concept section and a pipe section. These structures are
//! exactly what serde sees; validation and concept resolution happen in
//! [`crate::pipes::PipeLibrary`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::CogflowError;

/// A domain definition parsed from one TOML document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainDefinition {
    /// Domain code, e.g. "doc_analysis"
    pub domain: String,

    /// Domain description
    #[serde(default)]
    pub definition: Option<String>,

    /// Concept section: concept name -> definition
    #[serde(default)]
    pub concept: BTreeMap<String, ConceptDefinition>,

    /// Pipe section: pipe code -> definition
    #[serde(default)]
    pub pipe: BTreeMap<String, PipeDefinition>,
}

impl DomainDefinition {
    /// Parse a domain definition from TOML text
    pub fn from_toml(toml_text: &str) -> Result<Self, CogflowError> {
        toml::from_str(toml_text).map_err(Into::into)
    }
}

/// A concept entry: either a bare definition string or a full blueprint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConceptDefinition {
    /// Just the natural-language definition
    Definition(String),

    /// Full blueprint with structure and refinement edges
    Full {
        definition: String,
        #[serde(default)]
        structure: Option<String>,
        #[serde(default)]
        refines: RefinesList,
    },
}

/// One or several refinement targets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RefinesList {
    One(String),
    Many(Vec<String>),
}

impl Default for RefinesList {
    fn default() -> Self {
        Self::Many(vec![])
    }
}

impl RefinesList {
    /// The targets as a slice regardless of spelling
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Self::One(target) => vec![target.as_str()],
            Self::Many(targets) => targets.iter().map(String::as_str).collect(),
        }
    }
}

/// A pipe definition, dispatched on the `type` discriminant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipeDefinition {
    /// Text/structure generation through an LLM backend
    #[serde(rename = "LLM")]
    Llm(LlmDefinition),

    /// Page extraction from an image or PDF
    Ocr(OcrDefinition),

    /// Image generation from a prompt
    ImgGen(ImgGenDefinition),

    /// Registered function call
    Func(FuncDefinition),

    /// Ordered steps over shared working memory
    Sequence(SequenceDefinition),

    /// Concurrent branches from a shared snapshot
    Parallel(ParallelDefinition),

    /// Dynamic dispatch on a string discriminant
    Condition(ConditionDefinition),
}

impl PipeDefinition {
    /// The `type` discriminant as written in definitions
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Llm(_) => "LLM",
            Self::Ocr(_) => "Ocr",
            Self::ImgGen(_) => "ImgGen",
            Self::Func(_) => "Func",
            Self::Sequence(_) => "Sequence",
            Self::Parallel(_) => "Parallel",
            Self::Condition(_) => "Condition",
        }
    }
}

/// Fields shared by every pipe definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonFields {
    /// Natural-language description of the pipe
    pub definition: String,

    /// Declared inputs: binding name -> concept reference
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,

    /// Concept reference of the output
    pub output: String,
}

/// LLM operator definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmDefinition {
    #[serde(flatten)]
    pub common: CommonFields,

    /// Verbatim system prompt (exclusive with `system_prompt_template`)
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// System prompt template (exclusive with `system_prompt`)
    #[serde(default)]
    pub system_prompt_template: Option<String>,

    /// Verbatim user prompt (exclusive with `prompt_template`)
    #[serde(default)]
    pub prompt: Option<String>,

    /// User prompt template (exclusive with `prompt`)
    #[serde(default)]
    pub prompt_template: Option<String>,

    /// Model selector, passed through to the collaborator
    #[serde(default)]
    pub model: Option<String>,

    /// Generate exactly N outputs (exclusive with `multiple_output`)
    #[serde(default)]
    pub nb_output: Option<u32>,

    /// Let the model decide how many outputs (exclusive with `nb_output`)
    #[serde(default)]
    pub multiple_output: Option<bool>,
}

/// OCR operator definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrDefinition {
    #[serde(flatten)]
    pub common: CommonFields,

    /// Also capture a rendered view of each page
    #[serde(default)]
    pub page_views: Option<bool>,
}

/// Image-generation operator definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImgGenDefinition {
    #[serde(flatten)]
    pub common: CommonFields,

    /// Static prompt; when absent the prompt is read from the declared input
    #[serde(default)]
    pub img_gen_prompt: Option<String>,

    #[serde(default)]
    pub aspect_ratio: Option<String>,

    #[serde(default)]
    pub seed: Option<u64>,
}

/// Function operator definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuncDefinition {
    #[serde(flatten)]
    pub common: CommonFields,

    /// Name of the registered function to call
    pub function_name: String,
}

/// Sequence controller definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceDefinition {
    #[serde(flatten)]
    pub common: CommonFields,

    /// Steps in execution order
    pub steps: Vec<SubPipeDefinition>,
}

/// Parallel controller definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelDefinition {
    #[serde(flatten)]
    pub common: CommonFields,

    /// Branches, all forked from the pre-parallel snapshot
    pub parallels: Vec<SubPipeDefinition>,

    /// Merge each branch result into the parent memory
    #[serde(default)]
    pub add_each_output: bool,

    /// Bind an aggregate of all branch outputs under this name
    #[serde(default)]
    pub combined_output: Option<String>,
}

/// Condition controller definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionDefinition {
    #[serde(flatten)]
    pub common: CommonFields,

    /// Dotted projection over working memory (exclusive with template)
    #[serde(default)]
    pub expression: Option<String>,

    /// Template with `{{ binding.field }}` placeholders (exclusive with expression)
    #[serde(default)]
    pub expression_template: Option<String>,

    /// Discriminant -> pipe code
    #[serde(default)]
    pub pipe_map: BTreeMap<String, String>,

    /// Fallback pipe when the discriminant matches no map entry
    #[serde(default)]
    pub default_pipe_code: Option<String>,

    /// Bind the discriminant under this name before dispatch
    #[serde(default)]
    pub add_alias_from_expression_to: Option<String>,
}

/// A reference to another pipe inside a controller body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubPipeDefinition {
    /// Code of the referenced pipe
    pub pipe: String,

    /// Binding name for the result; derived from the output concept if absent
    #[serde(default)]
    pub result: Option<String>,

    /// Ask the referenced pipe for exactly N outputs
    #[serde(default)]
    pub nb_output: Option<u32>,

    /// Ask the referenced pipe for an open-ended list of outputs
    #[serde(default)]
    pub multiple_output: Option<bool>,

    /// Fan out over each element of this list binding
    #[serde(default)]
    pub batch_over: Option<String>,

    /// Binding name for the current element inside each batch branch
    #[serde(default)]
    pub batch_as: Option<String>,
}
