// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cogflow contributors

//! Validated pipe blueprints
//!
//! The typed form of a pipe graph: every concept reference is resolved to a
//! qualified code, every per-variant schema rule has been enforced, and the
//! structures are immutable and shared read-only across concurrent runs.

use std::collections::BTreeMap;

use crate::concepts::default_binding_name;

/// Fields shared by every validated pipe
#[derive(Debug, Clone)]
pub struct PipeCommon {
    /// Pipe code, unique across all loaded domains
    pub code: String,

    /// Domain the pipe was defined in
    pub domain: String,

    /// Natural-language description
    pub definition: String,

    /// Declared inputs: binding name -> qualified concept code
    pub inputs: BTreeMap<String, String>,

    /// Qualified concept code of the output
    pub output: String,
}

/// A validated pipe, one variant per pipe kind
#[derive(Debug, Clone)]
pub enum PipeBlueprint {
    Llm(LlmBlueprint),
    Ocr(OcrBlueprint),
    ImgGen(ImgGenBlueprint),
    Func(FuncBlueprint),
    Sequence(SequenceBlueprint),
    Parallel(ParallelBlueprint),
    Condition(ConditionBlueprint),
}

impl PipeBlueprint {
    /// The shared fields of any variant
    pub fn common(&self) -> &PipeCommon {
        match self {
            Self::Llm(p) => &p.common,
            Self::Ocr(p) => &p.common,
            Self::ImgGen(p) => &p.common,
            Self::Func(p) => &p.common,
            Self::Sequence(p) => &p.common,
            Self::Parallel(p) => &p.common,
            Self::Condition(p) => &p.common,
        }
    }

    /// Pipe code
    pub fn code(&self) -> &str {
        &self.common().code
    }

    /// True for controller pipes (they orchestrate other pipes)
    pub fn is_controller(&self) -> bool {
        matches!(
            self,
            Self::Sequence(_) | Self::Parallel(_) | Self::Condition(_)
        )
    }

    /// The default binding name for this pipe's output
    pub fn default_output_name(&self) -> String {
        default_binding_name(&self.common().output)
    }
}

/// A prompt, either verbatim text or a template for the collaborator to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    Verbatim(String),
    Template(String),
}

/// How many outputs an operator produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMultiplicity {
    /// One output (the default)
    #[default]
    Single,

    /// Exactly N outputs, as an ordered list
    Fixed(u32),

    /// An open-ended ordered list
    Variable,
}

impl OutputMultiplicity {
    /// True when the operator result is a list
    pub fn is_list(&self) -> bool {
        !matches!(self, Self::Single)
    }
}

/// Validated LLM operator
#[derive(Debug, Clone)]
pub struct LlmBlueprint {
    pub common: PipeCommon,
    pub system_prompt: Option<PromptSource>,
    pub user_prompt: Option<PromptSource>,
    pub model: Option<String>,
    pub multiplicity: OutputMultiplicity,
}

/// Validated OCR operator
#[derive(Debug, Clone)]
pub struct OcrBlueprint {
    pub common: PipeCommon,
    pub include_page_views: bool,
}

impl OcrBlueprint {
    /// Name of the input every OCR pipe must declare
    pub const INPUT_NAME: &'static str = "ocr_input";
}

/// Validated image-generation operator
#[derive(Debug, Clone)]
pub struct ImgGenBlueprint {
    pub common: PipeCommon,
    /// Static prompt; when `None` the prompt binding is read at runtime
    pub static_prompt: Option<String>,
    /// Input binding carrying the prompt text, when no static prompt is set
    pub prompt_input: Option<String>,
    pub aspect_ratio: Option<String>,
    pub seed: Option<u64>,
}

/// Validated function operator
#[derive(Debug, Clone)]
pub struct FuncBlueprint {
    pub common: PipeCommon,
    pub function_name: String,
}

/// Validated sequence controller
#[derive(Debug, Clone)]
pub struct SequenceBlueprint {
    pub common: PipeCommon,
    pub steps: Vec<SubPipeBlueprint>,
}

/// Validated parallel controller
#[derive(Debug, Clone)]
pub struct ParallelBlueprint {
    pub common: PipeCommon,
    pub branches: Vec<SubPipeBlueprint>,
    pub add_each_output: bool,
    pub combined_output: Option<String>,
}

/// Validated condition controller
#[derive(Debug, Clone)]
pub struct ConditionBlueprint {
    pub common: PipeCommon,
    pub expression: ConditionExpression,
    pub pipe_map: BTreeMap<String, String>,
    pub default_pipe_code: Option<String>,
    pub alias: Option<String>,
}

/// The discriminant source of a condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionExpression {
    /// Dotted projection over working memory, e.g. "category.label"
    Direct(String),

    /// Literal template with `{{ binding.field }}` placeholders
    Template(String),
}

/// Batch fan-out configuration of a sub-pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSpec {
    /// Binding holding the list to fan out over
    pub over: String,

    /// Name the current element is bound under in each branch
    pub element: String,
}

/// A validated reference to another pipe inside a controller body
#[derive(Debug, Clone)]
pub struct SubPipeBlueprint {
    /// Code of the referenced pipe
    pub pipe: String,

    /// Binding name for the result; `None` falls back to the referenced
    /// pipe's default output name
    pub result: Option<String>,

    /// Output multiplicity requested from the referenced pipe
    pub multiplicity: OutputMultiplicity,

    /// Batch fan-out; `over` and `element` are always paired
    pub batch: Option<BatchSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common(code: &str) -> PipeCommon {
        PipeCommon {
            code: code.into(),
            domain: "test".into(),
            definition: "test pipe".into(),
            inputs: BTreeMap::new(),
            output: "native.Text".into(),
        }
    }

    #[test]
    fn test_is_controller() {
        let seq = PipeBlueprint::Sequence(SequenceBlueprint {
            common: common("seq"),
            steps: vec![],
        });
        let func = PipeBlueprint::Func(FuncBlueprint {
            common: common("f"),
            function_name: "noop".into(),
        });

        assert!(seq.is_controller());
        assert!(!func.is_controller());
    }

    #[test]
    fn test_default_output_name_from_concept() {
        let mut c = common("p");
        c.output = "doc.PageSummary".into();
        let pipe = PipeBlueprint::Func(FuncBlueprint {
            common: c,
            function_name: "noop".into(),
        });
        assert_eq!(pipe.default_output_name(), "page_summary");
    }

    #[test]
    fn test_multiplicity_is_list() {
        assert!(!OutputMultiplicity::Single.is_list());
        assert!(OutputMultiplicity::Fixed(3).is_list());
        assert!(OutputMultiplicity::Variable.is_list());
    }
}
