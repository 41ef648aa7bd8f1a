// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cogflow contributors

//! External collaborators
//!
//! Operator pipes delegate their actual work to collaborator implementations
//! behind these traits: LLM generation, OCR page extraction, image
//! generation, and registered function calls. Collaborators are black boxes
//! to the engine; only their input/output typing contract matters here.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::CogflowError;
use crate::memory::{Stuff, StuffContent};
use crate::pipes::{OutputMultiplicity, PromptSource};

/// One-or-many payloads returned by a collaborator call
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutput {
    Single(StuffContent),
    Multiple(Vec<StuffContent>),
}

/// An LLM generation request
#[derive(Debug, Clone)]
pub struct LlmJob {
    /// System prompt source, if the pipe declares one
    pub system_prompt: Option<PromptSource>,

    /// User prompt source, if the pipe declares one
    pub user_prompt: Option<PromptSource>,

    /// Model selector, passed through untouched
    pub model: Option<String>,

    /// Structure name of the output concept, when it declares one
    pub structure_hint: Option<String>,

    /// Resolved declared inputs, by binding name
    pub inputs: BTreeMap<String, Stuff>,

    /// Qualified code of the concept the output must instantiate
    pub output_concept: String,

    /// How many outputs the pipe asks for
    pub multiplicity: OutputMultiplicity,
}

/// An OCR page-extraction request
#[derive(Debug, Clone)]
pub struct OcrJob {
    /// The image or PDF payload to scan
    pub input: Stuff,

    /// Also produce a rendered view of each page
    pub include_page_views: bool,
}

/// An image-generation request
#[derive(Debug, Clone)]
pub struct ImgGenJob {
    /// Prompt text
    pub prompt: String,

    pub aspect_ratio: Option<String>,

    pub seed: Option<u64>,
}

/// A registered-function call request
#[derive(Debug, Clone)]
pub struct FuncJob {
    /// Name the function was registered under
    pub function_name: String,

    /// Resolved declared inputs, by binding name
    pub inputs: BTreeMap<String, Stuff>,
}

/// LLM backend
#[async_trait]
pub trait LlmWorker: Send + Sync {
    /// Generate one or several payloads for the job.
    ///
    /// When the job's multiplicity is `Fixed(n)` the worker must return
    /// `Multiple` with exactly `n` items; `Variable` returns `Multiple` with
    /// any number of items.
    async fn generate(&self, job: LlmJob) -> Result<WorkerOutput, CogflowError>;
}

/// OCR backend
#[async_trait]
pub trait OcrWorker: Send + Sync {
    /// Extract the document's pages, in page order
    async fn extract_pages(&self, job: OcrJob) -> Result<Vec<StuffContent>, CogflowError>;
}

/// Image-generation backend
#[async_trait]
pub trait ImgGenWorker: Send + Sync {
    /// Generate one image payload for the prompt
    async fn generate_image(&self, job: ImgGenJob) -> Result<StuffContent, CogflowError>;
}

/// Registered-function backend
#[async_trait]
pub trait FuncWorker: Send + Sync {
    /// Call the named function with the resolved inputs
    async fn call(&self, job: FuncJob) -> Result<WorkerOutput, CogflowError>;
}

/// The collaborator implementations an engine dispatches to.
///
/// Every slot is optional; running a pipe whose collaborator is missing
/// fails with `CollaboratorMissing`.
#[derive(Clone, Default)]
pub struct CollaboratorSet {
    llm: Option<Arc<dyn LlmWorker>>,
    ocr: Option<Arc<dyn OcrWorker>>,
    img_gen: Option<Arc<dyn ImgGenWorker>>,
    func: Option<Arc<dyn FuncWorker>>,
}

impl CollaboratorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_llm(mut self, worker: Arc<dyn LlmWorker>) -> Self {
        self.llm = Some(worker);
        self
    }

    pub fn with_ocr(mut self, worker: Arc<dyn OcrWorker>) -> Self {
        self.ocr = Some(worker);
        self
    }

    pub fn with_img_gen(mut self, worker: Arc<dyn ImgGenWorker>) -> Self {
        self.img_gen = Some(worker);
        self
    }

    pub fn with_func(mut self, worker: Arc<dyn FuncWorker>) -> Self {
        self.func = Some(worker);
        self
    }

    pub fn llm(&self) -> Result<&Arc<dyn LlmWorker>, CogflowError> {
        self.llm.as_ref().ok_or_else(|| missing("LLM"))
    }

    pub fn ocr(&self) -> Result<&Arc<dyn OcrWorker>, CogflowError> {
        self.ocr.as_ref().ok_or_else(|| missing("OCR"))
    }

    pub fn img_gen(&self) -> Result<&Arc<dyn ImgGenWorker>, CogflowError> {
        self.img_gen.as_ref().ok_or_else(|| missing("image-generation"))
    }

    pub fn func(&self) -> Result<&Arc<dyn FuncWorker>, CogflowError> {
        self.func.as_ref().ok_or_else(|| missing("function"))
    }
}

impl std::fmt::Debug for CollaboratorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaboratorSet")
            .field("llm", &self.llm.is_some())
            .field("ocr", &self.ocr.is_some())
            .field("img_gen", &self.img_gen.is_some())
            .field("func", &self.func.is_some())
            .finish()
    }
}

fn missing(kind: &str) -> CogflowError {
    CogflowError::CollaboratorMissing {
        kind: kind.to_string(),
    }
}
