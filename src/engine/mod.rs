// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cogflow contributors

//! Pipe execution engine
//!
//! Recursive descent over the validated pipe graph, keyed by pipe code.
//! Operator pipes call external collaborators and bind their results;
//! controller pipes implement sequence, parallel, conditional, and batch
//! semantics with bounded concurrency and fail-fast sibling cancellation.

mod condition;
mod controllers;
mod operators;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::collaborators::CollaboratorSet;
use crate::errors::{CogflowError, CogflowResult};
use crate::memory::{Stuff, WorkingMemory};
use crate::pipes::{OutputMultiplicity, PipeBlueprint, PipeLibrary};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maximum number of collaborator calls in flight at once
    pub max_concurrency: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { max_concurrency: 8 }
    }
}

/// Result of running a pipe
#[derive(Debug, Clone)]
pub struct PipeOutput {
    /// Working memory after the run, all bindings included
    pub memory: WorkingMemory,

    /// The pipe's main result
    pub main: Stuff,
}

/// Executes validated pipes against working memory.
///
/// The library and collaborator set are immutable and shared; each call to
/// [`PipeEngine::run`] owns its own working memory root, so one engine can
/// serve concurrent runs. The engine itself is a cheap clonable handle.
#[derive(Clone)]
pub struct PipeEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    library: Arc<PipeLibrary>,
    collaborators: CollaboratorSet,
    limiter: Semaphore,
}

impl PipeEngine {
    /// Create an engine with default options
    pub fn new(library: Arc<PipeLibrary>, collaborators: CollaboratorSet) -> Self {
        Self::with_options(library, collaborators, EngineOptions::default())
    }

    /// Create an engine with explicit options
    pub fn with_options(
        library: Arc<PipeLibrary>,
        collaborators: CollaboratorSet,
        options: EngineOptions,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                library,
                collaborators,
                limiter: Semaphore::new(options.max_concurrency.max(1)),
            }),
        }
    }

    /// The library this engine executes from
    pub fn library(&self) -> &Arc<PipeLibrary> {
        &self.inner.library
    }

    /// Run a pipe against the given working memory.
    ///
    /// Operator results bind under the pipe's default output name; controller
    /// pipes bind whatever their body declares.
    pub async fn run(&self, pipe_code: &str, memory: WorkingMemory) -> CogflowResult<PipeOutput> {
        self.execute(pipe_code.to_string(), memory, None, None, Vec::new())
            .await
    }

    /// Run a pipe, binding the main result under an explicit name
    pub async fn run_as(
        &self,
        pipe_code: &str,
        memory: WorkingMemory,
        output_name: &str,
    ) -> CogflowResult<PipeOutput> {
        self.execute(
            pipe_code.to_string(),
            memory,
            Some(output_name.to_string()),
            None,
            Vec::new(),
        )
        .await
    }

    /// Recursive execution entry point.
    ///
    /// Boxed because controllers recurse through spawned tasks; `path` is the
    /// chain of pipe codes leading here, used for error context.
    pub(crate) fn execute(
        &self,
        code: String,
        memory: WorkingMemory,
        output_name: Option<String>,
        multiplicity: Option<OutputMultiplicity>,
        mut path: Vec<String>,
    ) -> Pin<Box<dyn Future<Output = CogflowResult<PipeOutput>> + Send>> {
        let engine = self.clone();
        Box::pin(async move {
            let blueprint = engine.library().get(&code)?;
            path.push(code.clone());
            tracing::debug!(pipe = %code, depth = path.len(), "running pipe");

            let result = match blueprint.as_ref() {
                PipeBlueprint::Llm(bp) => {
                    operators::run_llm(&engine, bp, memory, output_name.as_deref(), multiplicity)
                        .await
                }
                PipeBlueprint::Ocr(bp) => {
                    operators::run_ocr(&engine, bp, memory, output_name.as_deref()).await
                }
                PipeBlueprint::ImgGen(bp) => {
                    operators::run_img_gen(&engine, bp, memory, output_name.as_deref()).await
                }
                PipeBlueprint::Func(bp) => {
                    operators::run_func(&engine, bp, memory, output_name.as_deref(), multiplicity)
                        .await
                }
                PipeBlueprint::Sequence(bp) => {
                    controllers::run_sequence(&engine, bp, memory, &path).await
                }
                PipeBlueprint::Parallel(bp) => {
                    controllers::run_parallel(&engine, bp, memory, &path).await
                }
                PipeBlueprint::Condition(bp) => {
                    controllers::run_condition(&engine, bp, memory, output_name, &path).await
                }
            };

            if let Err(error) = &result {
                tracing::debug!(pipe = %code, %error, "pipe failed");
            }
            result.map_err(|e| e.at_pipe(&code, &path))
        })
    }

    /// Acquire a slot from the collaborator-call limiter
    pub(crate) async fn throttle(&self) -> CogflowResult<tokio::sync::SemaphorePermit<'_>> {
        self.inner
            .limiter
            .acquire()
            .await
            .map_err(|_| CogflowError::ExecutionFailed {
                message: "concurrency limiter closed".into(),
            })
    }

    pub(crate) fn collaborators(&self) -> &CollaboratorSet {
        &self.inner.collaborators
    }
}

impl std::fmt::Debug for PipeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeEngine")
            .field("pipes", &self.inner.library.pipe_codes().len())
            .field("collaborators", &self.inner.collaborators)
            .finish()
    }
}
