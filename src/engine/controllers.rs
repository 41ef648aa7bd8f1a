// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cogflow contributors

//! Controller pipe execution
//!
//! Sequence, parallel, and condition semantics: strict step ordering,
//! branch isolation through forked memory views, order-preserving batch
//! collection, and fail-fast sibling cancellation on the first error.

use tokio::task::JoinSet;

use super::{condition, PipeEngine, PipeOutput};
use crate::errors::{CogflowError, CogflowResult};
use crate::memory::{Stuff, StuffContent, WorkingMemory};
use crate::pipes::{
    result_name, ConditionBlueprint, OutputMultiplicity, ParallelBlueprint, SequenceBlueprint,
    SubPipeBlueprint,
};

pub(crate) async fn run_sequence(
    engine: &PipeEngine,
    blueprint: &SequenceBlueprint,
    memory: WorkingMemory,
    path: &[String],
) -> CogflowResult<PipeOutput> {
    let mut memory = memory;
    let mut main = None;

    // Steps run strictly in declared order; each observes all bindings
    // produced by earlier steps
    for step in &blueprint.steps {
        let (next, step_main) =
            run_sub_pipe(engine.clone(), step.clone(), memory, path.to_vec()).await?;
        memory = next;
        main = Some(step_main);
    }

    let main = main.ok_or_else(|| CogflowError::ExecutionFailed {
        message: "sequence has no steps".into(),
    })?;
    Ok(PipeOutput { memory, main })
}

pub(crate) async fn run_parallel(
    engine: &PipeEngine,
    blueprint: &ParallelBlueprint,
    mut memory: WorkingMemory,
    path: &[String],
) -> CogflowResult<PipeOutput> {
    let mut join_set: JoinSet<CogflowResult<(usize, WorkingMemory, Stuff)>> = JoinSet::new();

    // Every branch forks the same pre-parallel snapshot; branches never
    // observe each other's writes
    for (index, branch) in blueprint.branches.iter().enumerate() {
        let fork = memory.fork();
        let engine = engine.clone();
        let branch = branch.clone();
        let path = path.to_vec();
        join_set.spawn(async move {
            let (branch_memory, main) = run_sub_pipe(engine, branch, fork, path).await?;
            Ok((index, branch_memory, main))
        });
    }

    let mut collected: Vec<Option<(WorkingMemory, Stuff)>> = Vec::new();
    collected.resize_with(blueprint.branches.len(), || None);
    join_all(&mut join_set, |(index, branch_memory, main)| {
        collected[index] = Some((branch_memory, main));
    })
    .await?;

    // Merge in declaration order; branches write disjoint names, so the
    // result does not depend on completion order
    let mut mains = Vec::with_capacity(collected.len());
    for slot in collected {
        let (branch_memory, main) = slot.ok_or_else(branch_vanished)?;
        if blueprint.add_each_output {
            memory.merge(branch_memory)?;
        }
        mains.push(main);
    }

    let main = if let Some(combined_name) = &blueprint.combined_output {
        let combined = Stuff::list(
            blueprint.common.output.clone(),
            mains.iter().map(|stuff| stuff.content.clone()).collect(),
        );
        memory.bind(combined_name, combined.clone())?;
        combined
    } else {
        mains.last().cloned().ok_or_else(branch_vanished)?
    };

    Ok(PipeOutput { memory, main })
}

pub(crate) async fn run_condition(
    engine: &PipeEngine,
    blueprint: &ConditionBlueprint,
    mut memory: WorkingMemory,
    output_name: Option<String>,
    path: &[String],
) -> CogflowResult<PipeOutput> {
    let discriminant = condition::evaluate(&blueprint.expression, &memory)?;

    let chosen = blueprint
        .pipe_map
        .get(&discriminant)
        .or(blueprint.default_pipe_code.as_ref())
        .ok_or_else(|| CogflowError::UnmatchedCondition {
            discriminant: discriminant.clone(),
        })?
        .clone();

    tracing::debug!(discriminant = %discriminant, pipe = %chosen, "condition dispatch");

    if let Some(alias) = &blueprint.alias {
        memory.bind(alias, Stuff::text("native.Text", discriminant.clone()))?;
    }

    // The only dynamic-dispatch point: exactly one matched pipe runs
    engine
        .execute(chosen, memory, output_name, None, path.to_vec())
        .await
}

/// Run one sub-pipe reference: either a single execution binding its result,
/// or a concurrent batch fan-out collecting an order-preserving list.
async fn run_sub_pipe(
    engine: PipeEngine,
    step: SubPipeBlueprint,
    mut memory: WorkingMemory,
    path: Vec<String>,
) -> CogflowResult<(WorkingMemory, Stuff)> {
    let name = result_name(&step, engine.library().pipes());
    let multiplicity = step_multiplicity(&step);

    let Some(batch) = &step.batch else {
        let out = engine
            .execute(
                step.pipe.clone(),
                memory,
                Some(name.clone()),
                multiplicity,
                path,
            )
            .await?;
        let mut memory = out.memory;
        // Controllers bind their own internal names; alias the declared
        // result to the main output if nothing claimed it
        if !memory.contains(&name) {
            memory.bind(&name, out.main.clone())?;
        }
        return Ok((memory, out.main));
    };

    let list_stuff = memory.get(&batch.over)?.clone();
    let Some(items) = list_stuff.content.as_list() else {
        return Err(CogflowError::BatchInput {
            binding: batch.over.clone(),
        });
    };
    let element_concept = list_stuff.concept.clone();
    let output_concept = engine.library().get(&step.pipe)?.common().output.clone();

    tracing::debug!(pipe = %step.pipe, count = items.len(), "batch fan-out");

    let mut join_set: JoinSet<CogflowResult<(usize, Stuff)>> = JoinSet::new();
    for (index, item) in items.iter().enumerate() {
        // One forked view per element, with the element bound under the
        // declared name
        let mut branch = memory.fork();
        branch.bind(
            &batch.element,
            Stuff::new(element_concept.clone(), item.clone()),
        )?;

        let engine = engine.clone();
        let pipe = step.pipe.clone();
        let path = path.clone();
        join_set.spawn(async move {
            let out = engine.execute(pipe, branch, None, multiplicity, path).await?;
            Ok((index, out.main))
        });
    }

    let mut collected: Vec<Option<StuffContent>> = Vec::new();
    collected.resize_with(items.len(), || None);
    join_all(&mut join_set, |(index, main)| {
        collected[index] = Some(main.content);
    })
    .await?;

    // Ordering is restored by index, independent of completion order
    let contents = collected
        .into_iter()
        .map(|slot| slot.ok_or_else(branch_vanished))
        .collect::<CogflowResult<Vec<_>>>()?;

    let stuff = Stuff::list(output_concept, contents);
    memory.bind(&name, stuff.clone())?;
    Ok((memory, stuff))
}

/// Await every task in the set, failing fast: the first error aborts all
/// siblings still in flight and nothing of theirs is collected.
async fn join_all<T: 'static>(
    join_set: &mut JoinSet<CogflowResult<T>>,
    mut on_done: impl FnMut(T),
) -> CogflowResult<()> {
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(value)) => on_done(value),
            Ok(Err(error)) => {
                join_set.abort_all();
                while join_set.join_next().await.is_some() {}
                return Err(error);
            }
            Err(join_error) if join_error.is_cancelled() => {}
            Err(join_error) => {
                join_set.abort_all();
                while join_set.join_next().await.is_some() {}
                return Err(CogflowError::ExecutionFailed {
                    message: join_error.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// A sub-pipe's multiplicity override, when it requests one
fn step_multiplicity(step: &SubPipeBlueprint) -> Option<OutputMultiplicity> {
    (step.multiplicity != OutputMultiplicity::Single).then_some(step.multiplicity)
}

fn branch_vanished() -> CogflowError {
    CogflowError::ExecutionFailed {
        message: "branch completed without reporting a result".into(),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::super::test_support::*;
    use super::*;
    use crate::collaborators::{CollaboratorSet, FuncJob, FuncWorker, WorkerOutput};
    use crate::pipes::PipeLibrary;

    const CHAIN: &str = r#"
domain = "t"

[concept]
Shout = "Uppercased text"
Excited = "Text with an exclamation mark"
Reversed = "Text reversed"

[pipe.shout]
type = "Func"
definition = "Uppercase"
inputs = { text = "Text" }
output = "Shout"
function_name = "upper"

[pipe.excite]
type = "Func"
definition = "Add an exclamation mark"
inputs = { shouted = "Shout" }
output = "Excited"
function_name = "exclaim"

[pipe.reverse]
type = "Func"
definition = "Reverse the text"
inputs = { excited = "Excited" }
output = "Reversed"
function_name = "reverse"

[pipe.flow]
type = "Sequence"
definition = "Shout, excite, reverse"
inputs = { text = "Text" }
output = "Reversed"
steps = [
    { pipe = "shout", result = "shouted" },
    { pipe = "excite", result = "excited" },
    { pipe = "reverse", result = "reversed" },
]
"#;

    #[tokio::test]
    async fn test_sequence_runs_in_order_and_accumulates() {
        let engine = engine_for(&[CHAIN]);
        let memory = memory_with_text("text", "hello");

        let output = engine.run("flow", memory).await.unwrap();

        // Final memory is exactly the root input plus one result per step
        assert_eq!(
            output.memory.binding_names(),
            vec!["excited", "reversed", "shouted", "text"]
        );
        assert_eq!(output.main.content.as_text(), Some("!OLLEH"));
        assert_eq!(output.main.concept, "t.Reversed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_preserves_input_order() {
        let source = r#"
domain = "t"

[concept]
Shout = "Uppercased text"

[pipe.slow_shout]
type = "Func"
definition = "Uppercase, slower for shorter items"
inputs = { item = "Text" }
output = "Shout"
function_name = "slow_upper"

[pipe.flow]
type = "Sequence"
definition = "Uppercase every item"
inputs = { items = "Text" }
output = "Shout"
steps = [
    { pipe = "slow_shout", result = "shouts", batch_over = "items", batch_as = "item" },
]
"#;
        let engine = engine_for(&[source]);
        // slow_upper sleeps longer for shorter items, so completion order is
        // the reverse of input order
        let memory = memory_with_list("items", &["a", "bb", "ccc", "dddd", "eeeee"]);

        let output = engine.run("flow", memory).await.unwrap();

        let shouts = output.memory.get("shouts").unwrap();
        let items = shouts.content.as_list().unwrap();
        assert_eq!(items.len(), 5);
        let texts: Vec<_> = items
            .iter()
            .map(|c| c.as_text().unwrap().to_string())
            .collect();
        assert_eq!(texts, vec!["A", "BB", "CCC", "DDDD", "EEEEE"]);
        assert_eq!(shouts.concept, "t.Shout");
    }

    #[tokio::test]
    async fn test_batch_over_non_list_fails() {
        let source = r#"
domain = "t"

[pipe.noop]
type = "Func"
definition = "Uppercase"
inputs = { item = "Text" }
output = "Text"
function_name = "upper"

[pipe.flow]
type = "Sequence"
definition = "Batch over a scalar"
inputs = { items = "Text" }
output = "Text"
steps = [
    { pipe = "noop", result = "results", batch_over = "items", batch_as = "item" },
]
"#;
        let engine = engine_for(&[source]);
        let memory = memory_with_text("items", "not a list");

        let error = engine.run("flow", memory).await.unwrap_err();
        assert!(matches!(root_cause(error), CogflowError::BatchInput { .. }));
    }

    const PARALLEL: &str = r#"
domain = "t"

[concept]
Shout = "Uppercased text"
Reversed = "Text reversed"

[pipe.shout]
type = "Func"
definition = "Uppercase"
inputs = { text = "Text" }
output = "Shout"
function_name = "upper"

[pipe.reverse]
type = "Func"
definition = "Reverse"
inputs = { text = "Text" }
output = "Reversed"
function_name = "reverse"

[pipe.both]
type = "Parallel"
definition = "Shout and reverse the same input"
inputs = { text = "Text" }
output = "Text"
add_each_output = true
parallels = [
    { pipe = "shout", result = "shouted" },
    { pipe = "reverse", result = "reversed" },
]
"#;

    #[tokio::test]
    async fn test_parallel_isolation_and_merge() {
        let engine = engine_for(&[PARALLEL]);
        let memory = memory_with_text("text", "abc");

        let output = engine.run("both", memory).await.unwrap();

        // Both branches read x and wrote distinct names
        assert_eq!(
            output.memory.binding_names(),
            vec!["reversed", "shouted", "text"]
        );
        assert_eq!(
            output.memory.get("shouted").unwrap().content.as_text(),
            Some("ABC")
        );
        assert_eq!(
            output.memory.get("reversed").unwrap().content.as_text(),
            Some("cba")
        );
    }

    #[tokio::test]
    async fn test_parallel_combined_output() {
        let source = r#"
domain = "t"

[concept]
Shout = "Uppercased text"
Reversed = "Text reversed"

[pipe.shout]
type = "Func"
definition = "Uppercase"
inputs = { text = "Text" }
output = "Shout"
function_name = "upper"

[pipe.reverse]
type = "Func"
definition = "Reverse"
inputs = { text = "Text" }
output = "Reversed"
function_name = "reverse"

[pipe.both]
type = "Parallel"
definition = "Aggregate branch outputs"
inputs = { text = "Text" }
output = "Text"
combined_output = "analysis"
parallels = [
    { pipe = "shout", result = "shouted" },
    { pipe = "reverse", result = "reversed" },
]
"#;
        let engine = engine_for(&[source]);
        let memory = memory_with_text("text", "ab");

        let output = engine.run("both", memory).await.unwrap();

        // Branch locals are not merged without add_each_output; only the
        // aggregate appears, in declaration order
        assert_eq!(output.memory.binding_names(), vec!["analysis", "text"]);
        let combined = output.memory.get("analysis").unwrap();
        assert_eq!(
            combined.content.as_list().unwrap(),
            &[
                StuffContent::Text("AB".into()),
                StuffContent::Text("ba".into()),
            ]
        );
        assert_eq!(output.main, *combined);
    }

    /// Worker whose slow functions record completions, to observe
    /// cancellation
    struct CountingFuncs {
        completions: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FuncWorker for CountingFuncs {
        async fn call(&self, job: FuncJob) -> CogflowResult<WorkerOutput> {
            match job.function_name.as_str() {
                "slow_ok" => {
                    tokio::time::sleep(Duration::from_secs(600)).await;
                    self.completions.fetch_add(1, Ordering::SeqCst);
                    Ok(WorkerOutput::Single(StuffContent::Text("done".into())))
                }
                "fail_fast" => Err(CogflowError::Collaborator {
                    kind: "function".into(),
                    message: "branch exploded".into(),
                }),
                other => Err(CogflowError::Collaborator {
                    kind: "function".into(),
                    message: format!("unknown function '{other}'"),
                }),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_fail_fast_cancels_siblings() {
        let source = r#"
domain = "t"

[pipe.slow_a]
type = "Func"
definition = "Slow branch"
inputs = { text = "Text" }
output = "Text"
function_name = "slow_ok"

[pipe.boom]
type = "Func"
definition = "Failing branch"
inputs = { text = "Text" }
output = "Text"
function_name = "fail_fast"

[pipe.fan]
type = "Parallel"
definition = "Two slow branches around a failing one"
inputs = { text = "Text" }
output = "Text"
add_each_output = true
parallels = [
    { pipe = "slow_a", result = "a" },
    { pipe = "boom", result = "b" },
    { pipe = "slow_a", result = "c" },
]
"#;
        let completions = Arc::new(AtomicUsize::new(0));
        let library = Arc::new(PipeLibrary::load_toml(&[source]).unwrap());
        let collaborators = CollaboratorSet::new().with_func(Arc::new(CountingFuncs {
            completions: Arc::clone(&completions),
        }));
        let engine = PipeEngine::new(library, collaborators);
        let memory = memory_with_text("text", "x");

        let error = engine.run("fan", memory).await.unwrap_err();

        assert!(matches!(
            root_cause(error),
            CogflowError::Collaborator { .. }
        ));
        // The slow siblings were cancelled, not awaited to completion, and
        // no partial result was merged
        assert_eq!(completions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sequence_fail_fast_stops_later_steps() {
        let source = r#"
domain = "t"

[pipe.boom]
type = "Func"
definition = "Failing step"
inputs = { text = "Text" }
output = "Text"
function_name = "fail"

[pipe.shout]
type = "Func"
definition = "Uppercase"
inputs = { text = "Text" }
output = "Text"
function_name = "upper"

[pipe.flow]
type = "Sequence"
definition = "Fails on the first step"
inputs = { text = "Text" }
output = "Text"
steps = [
    { pipe = "boom", result = "never" },
    { pipe = "shout", result = "also_never" },
]
"#;
        let engine = engine_for(&[source]);
        let memory = memory_with_text("text", "x");

        let error = engine.run("flow", memory).await.unwrap_err();
        assert!(matches!(
            root_cause(error),
            CogflowError::Collaborator { .. }
        ));
    }

    const ROUTING: &str = r#"
domain = "t"

[pipe.handle_technical]
type = "Func"
definition = "Technical handler"
inputs = { ticket = "Text" }
output = "Text"
function_name = "upper"

[pipe.handle_billing]
type = "Func"
definition = "Billing handler"
inputs = { ticket = "Text" }
output = "Text"
function_name = "exclaim"

[pipe.handle_other]
type = "Func"
definition = "Fallback handler"
inputs = { ticket = "Text" }
output = "Text"
function_name = "reverse"

[pipe.route]
type = "Condition"
definition = "Route by category"
inputs = { category = "Text", ticket = "Text" }
output = "Text"
expression = "category"
default_pipe_code = "handle_other"

[pipe.route.pipe_map]
technical = "handle_technical"
billing = "handle_billing"

[pipe.route_no_default]
type = "Condition"
definition = "Route with no fallback"
inputs = { category = "Text", ticket = "Text" }
output = "Text"
expression = "category"

[pipe.route_no_default.pipe_map]
technical = "handle_technical"
billing = "handle_billing"
"#;

    fn routing_memory(category: &str) -> WorkingMemory {
        let mut memory = memory_with_text("category", category);
        memory
            .bind("ticket", Stuff::text("native.Text", "printer on fire"))
            .unwrap();
        memory
    }

    #[tokio::test]
    async fn test_condition_routes_on_exact_match() {
        let engine = engine_for(&[ROUTING]);

        let output = engine.run("route", routing_memory("technical")).await.unwrap();
        assert_eq!(output.main.content.as_text(), Some("PRINTER ON FIRE"));
    }

    #[tokio::test]
    async fn test_condition_falls_back_to_default() {
        let engine = engine_for(&[ROUTING]);

        let output = engine.run("route", routing_memory("other")).await.unwrap();
        assert_eq!(output.main.content.as_text(), Some("erif no retnirp"));
    }

    #[tokio::test]
    async fn test_condition_unmatched_without_default_fails() {
        let engine = engine_for(&[ROUTING]);

        let error = engine
            .run("route_no_default", routing_memory("other"))
            .await
            .unwrap_err();
        match root_cause(error) {
            CogflowError::UnmatchedCondition { discriminant } => {
                assert_eq!(discriminant, "other");
            }
            other => panic!("Expected UnmatchedCondition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_condition_alias_binds_discriminant() {
        let source = r#"
domain = "t"

[pipe.handle]
type = "Func"
definition = "Handler"
inputs = { ticket = "Text" }
output = "Text"
function_name = "upper"

[pipe.route]
type = "Condition"
definition = "Route and record the discriminant"
inputs = { category = "Text", ticket = "Text" }
output = "Text"
expression = "category"
add_alias_from_expression_to = "routed_as"

[pipe.route.pipe_map]
technical = "handle"
"#;
        let engine = engine_for(&[source]);

        let output = engine.run("route", routing_memory("technical")).await.unwrap();
        assert_eq!(
            output.memory.get("routed_as").unwrap().content.as_text(),
            Some("technical")
        );
    }
}
