// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cogflow contributors

//! Static reachability check
//!
//! Simulates working-memory population symbolically for every controller,
//! without invoking any collaborator: each referenced pipe's declared inputs
//! must be satisfiable from the names available at that point of the walk.
//! A malformed graph fails at load time and can never begin execution.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::blueprint::{PipeBlueprint, SubPipeBlueprint};
use crate::errors::CogflowError;

/// Run the reachability check over every controller in the library
pub(crate) fn check_all(pipes: &HashMap<String, Arc<PipeBlueprint>>) -> Result<(), CogflowError> {
    for blueprint in pipes.values() {
        match blueprint.as_ref() {
            PipeBlueprint::Sequence(seq) => check_sequence(seq, pipes)?,
            PipeBlueprint::Parallel(par) => check_parallel(par, pipes)?,
            PipeBlueprint::Condition(cond) => check_condition(cond, pipes)?,
            _ => {}
        }
    }
    Ok(())
}

fn check_sequence(
    seq: &super::blueprint::SequenceBlueprint,
    pipes: &HashMap<String, Arc<PipeBlueprint>>,
) -> Result<(), CogflowError> {
    let mut available: HashSet<String> =
        seq.common.inputs.keys().cloned().collect();

    for step in &seq.steps {
        check_sub_pipe(&seq.common.code, step, &available, pipes)?;
        add_step_results(step, &mut available, pipes);
    }

    Ok(())
}

fn check_parallel(
    par: &super::blueprint::ParallelBlueprint,
    pipes: &HashMap<String, Arc<PipeBlueprint>>,
) -> Result<(), CogflowError> {
    // All branches see the same pre-parallel snapshot
    let available: HashSet<String> =
        par.common.inputs.keys().cloned().collect();

    for branch in &par.branches {
        check_sub_pipe(&par.common.code, branch, &available, pipes)?;
    }

    Ok(())
}

fn check_condition(
    cond: &super::blueprint::ConditionBlueprint,
    pipes: &HashMap<String, Arc<PipeBlueprint>>,
) -> Result<(), CogflowError> {
    let available: HashSet<String> =
        cond.common.inputs.keys().cloned().collect();

    let mut referenced: Vec<&String> = cond.pipe_map.values().collect();
    if let Some(default) = &cond.default_pipe_code {
        referenced.push(default);
    }

    for reference in referenced {
        let Some(target) = pipes.get(reference) else {
            continue; // unknown refs are reported by the ref check
        };
        for binding in target.common().inputs.keys() {
            // The alias binding is written before dispatch, so a referenced
            // pipe may read it even though it is not a condition input
            if cond.alias.as_deref() == Some(binding.as_str()) {
                continue;
            }
            if !available.contains(binding) {
                return Err(CogflowError::UnresolvedInput {
                    controller: cond.common.code.clone(),
                    pipe: reference.clone(),
                    binding: binding.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Check one sub-pipe against the currently available name set
fn check_sub_pipe(
    controller: &str,
    sub: &SubPipeBlueprint,
    available: &HashSet<String>,
    pipes: &HashMap<String, Arc<PipeBlueprint>>,
) -> Result<(), CogflowError> {
    let Some(target) = pipes.get(&sub.pipe) else {
        return Ok(()); // unknown refs are reported by the ref check
    };

    if let Some(batch) = &sub.batch {
        if !available.contains(&batch.over) {
            return Err(CogflowError::UnresolvedInput {
                controller: controller.to_string(),
                pipe: sub.pipe.clone(),
                binding: batch.over.clone(),
            });
        }
    }

    for binding in target.common().inputs.keys() {
        // The batch element is bound by the fan-out itself
        if sub
            .batch
            .as_ref()
            .is_some_and(|batch| batch.element == *binding)
        {
            continue;
        }
        if !available.contains(binding) {
            return Err(CogflowError::UnresolvedInput {
                controller: controller.to_string(),
                pipe: sub.pipe.clone(),
                binding: binding.clone(),
            });
        }
    }

    Ok(())
}

/// Names a completed step makes available to later steps
fn add_step_results(
    sub: &SubPipeBlueprint,
    available: &mut HashSet<String>,
    pipes: &HashMap<String, Arc<PipeBlueprint>>,
) {
    available.insert(result_name(sub, pipes));

    if let Some(target) = pipes.get(&sub.pipe) {
        match target.as_ref() {
            // A condition binds its discriminant alias in the caller's scope
            PipeBlueprint::Condition(cond) => {
                if let Some(alias) = &cond.alias {
                    available.insert(alias.clone());
                }
            }
            // A merged parallel exposes its branch results and aggregate
            PipeBlueprint::Parallel(par) => {
                if par.add_each_output {
                    for branch in &par.branches {
                        available.insert(result_name(branch, pipes));
                    }
                }
                if let Some(combined) = &par.combined_output {
                    available.insert(combined.clone());
                }
            }
            _ => {}
        }
    }
}

/// The binding name a sub-pipe's result lands under
pub(crate) fn result_name(
    sub: &SubPipeBlueprint,
    pipes: &HashMap<String, Arc<PipeBlueprint>>,
) -> String {
    if let Some(result) = &sub.result {
        return result.clone();
    }
    pipes
        .get(&sub.pipe)
        .map(|target| target.default_output_name())
        .unwrap_or_else(|| sub.pipe.clone())
}
