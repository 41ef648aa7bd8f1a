// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cogflow contributors

//! # cogflow - Typed AI-Workflow Engine
//!
//! `cogflow` executes declarative AI workflows: typed graphs of reusable
//! pipes operating over a shared, named working memory, with static
//! validation, controlled concurrency, conditional branching, and batch
//! fan-out.
//!
//! ## Features
//!
//! - **Concept typing** - Domain-qualified data types with a refinement
//!   hierarchy, checked at load time
//! - **Static validation** - Every declared input is proven reachable before
//!   a graph is allowed to run
//! - **Concurrent execution** - Bounded parallel branches and batch fan-out
//!   with order-preserving joins and fail-fast cancellation
//! - **Pluggable collaborators** - LLM, OCR, image-generation, and function
//!   backends behind async traits
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use cogflow::{CollaboratorSet, PipeEngine, PipeLibrary, Stuff, WorkingMemory};
//!
//! # async fn demo(collaborators: CollaboratorSet) -> cogflow::CogflowResult<()> {
//! let library = Arc::new(PipeLibrary::load_toml(&[r#"
//! domain = "demo"
//!
//! [pipe.summarize]
//! type = "LLM"
//! definition = "Summarize the text"
//! inputs = { text = "Text" }
//! output = "Text"
//! prompt_template = "Summarize: @text"
//! "#])?);
//!
//! let engine = PipeEngine::new(library, collaborators);
//! let mut memory = WorkingMemory::new();
//! memory.bind("text", Stuff::text("native.Text", "Long article..."))?;
//!
//! let output = engine.run_as("summarize", memory, "summary").await?;
//! println!("{}", output.main.content.to_display_string());
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod concepts;
pub mod engine;
pub mod errors;
pub mod memory;
pub mod pipes;

// Re-export commonly used types
pub use collaborators::{
    CollaboratorSet, FuncJob, FuncWorker, ImgGenJob, ImgGenWorker, LlmJob, LlmWorker, OcrJob,
    OcrWorker, WorkerOutput,
};
pub use concepts::{Concept, ConceptRegistry};
pub use engine::{EngineOptions, PipeEngine, PipeOutput};
pub use errors::{CogflowError, CogflowResult};
pub use memory::{Stuff, StuffContent, WorkingMemory};
pub use pipes::{DomainDefinition, PipeBlueprint, PipeLibrary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
