// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cogflow contributors

//! Concept registry
//!
//! Stores concept definitions and the refinement hierarchy. Built once per
//! loaded pipeline set and treated as immutable for the rest of the process.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

use super::{is_native_name, qualify, Concept, NATIVE_CONCEPTS, NATIVE_DOMAIN};
use crate::errors::CogflowError;

/// Registry of concepts, keyed by domain-qualified code
#[derive(Debug, Clone)]
pub struct ConceptRegistry {
    concepts: HashMap<String, Concept>,
}

impl ConceptRegistry {
    /// Create a registry with the native concepts pre-registered
    pub fn new() -> Self {
        let mut concepts = HashMap::new();

        for name in NATIVE_CONCEPTS {
            let code = qualify(NATIVE_DOMAIN, name);
            let refines = match *name {
                "Anything" => vec![],
                "Page" => vec![qualify(NATIVE_DOMAIN, "TextAndImages")],
                _ => vec![qualify(NATIVE_DOMAIN, "Anything")],
            };
            concepts.insert(
                code.clone(),
                Concept {
                    code,
                    definition: format!("Native {name} concept"),
                    structure: None,
                    refines,
                },
            );
        }

        Self { concepts }
    }

    /// Register a concept under its domain-qualified code.
    ///
    /// Every `refines` entry must already resolve, either to a native concept
    /// or to a previously registered one.
    pub fn register(&mut self, concept: Concept) -> Result<(), CogflowError> {
        if self.concepts.contains_key(&concept.code) {
            return Err(CogflowError::DuplicateConcept {
                code: concept.code.clone(),
            });
        }

        for target in &concept.refines {
            if !self.concepts.contains_key(target) {
                return Err(CogflowError::UnknownRefinementTarget {
                    concept: concept.code.clone(),
                    target: target.clone(),
                });
            }
        }

        self.concepts.insert(concept.code.clone(), concept);
        Ok(())
    }

    /// Resolve a concept reference to its qualified code.
    ///
    /// Unqualified names are prefixed with `context_domain`, except native
    /// concept names which always resolve globally.
    pub fn resolve(&self, name: &str, context_domain: &str) -> Result<String, CogflowError> {
        let code = if name.contains('.') {
            name.to_string()
        } else if is_native_name(name) {
            qualify(NATIVE_DOMAIN, name)
        } else {
            qualify(context_domain, name)
        };

        if self.concepts.contains_key(&code) {
            Ok(code)
        } else {
            Err(CogflowError::UnknownConcept {
                name: name.to_string(),
                domain: context_domain.to_string(),
            })
        }
    }

    /// Look up a concept by qualified code
    pub fn get(&self, code: &str) -> Option<&Concept> {
        self.concepts.get(code)
    }

    /// Check whether `a` is a refinement of `b` (reflexive, transitive).
    ///
    /// Every concept is a refinement of `native.Anything`.
    pub fn is_refinement_of(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        if b == qualify(NATIVE_DOMAIN, "Anything") {
            return self.concepts.contains_key(a);
        }

        // BFS over refines edges
        let mut visited = HashSet::new();
        let mut queue = vec![a.to_string()];
        while let Some(code) = queue.pop() {
            if !visited.insert(code.clone()) {
                continue;
            }
            let Some(concept) = self.concepts.get(&code) else {
                continue;
            };
            for target in &concept.refines {
                if target == b {
                    return true;
                }
                queue.push(target.clone());
            }
        }
        false
    }

    /// Validate that refinement edges form a DAG.
    ///
    /// Run once after all registrations of a domain batch.
    pub fn validate_acyclic(&self) -> Result<(), CogflowError> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut indices: HashMap<&str, NodeIndex> = HashMap::new();

        for code in self.concepts.keys() {
            let node = graph.add_node(code.as_str());
            indices.insert(code.as_str(), node);
        }

        for concept in self.concepts.values() {
            let from = indices[concept.code.as_str()];
            for target in &concept.refines {
                if let Some(&to) = indices.get(target.as_str()) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        match toposort(&graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => {
                let start = graph[cycle.node_id()].to_string();
                Err(CogflowError::CyclicRefinement {
                    cycle: self.trace_cycle(&start),
                })
            }
        }
    }

    /// Follow refines edges from `start` until a code repeats
    fn trace_cycle(&self, start: &str) -> Vec<String> {
        let mut path = vec![start.to_string()];
        let mut seen = HashSet::from([start.to_string()]);
        let mut current = start.to_string();

        while let Some(concept) = self.concepts.get(&current) {
            let Some(next) = concept.refines.first() else {
                break;
            };
            path.push(next.clone());
            if !seen.insert(next.clone()) {
                break;
            }
            current = next.clone();
        }

        path
    }

    /// Number of registered concepts, natives included
    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    /// True if no concepts are registered
    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }
}

impl Default for ConceptRegistry {
    fn default() -> Self {
        Self::new()
    }
}
