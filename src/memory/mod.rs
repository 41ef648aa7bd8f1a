// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cogflow contributors

//! Working memory
//!
//! The per-run, append-only name->value store shared across a pipeline's
//! pipes. Batch and parallel branches operate on forked views: a read-only
//! snapshot of the parent bindings plus a branch-local write set, merged back
//! into the parent only after the branch completes successfully.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::CogflowError;

/// Payload of a working-memory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StuffContent {
    /// Plain text
    Text(String),

    /// Numeric value
    Number(f64),

    /// Image or PDF payload, held by reference
    Document(String),

    /// Structured payload, opaque to the engine
    Structured(serde_json::Value),

    /// Ordered list of payloads (batch inputs, multi-output results)
    List(Vec<StuffContent>),
}

impl StuffContent {
    /// Borrow as text, if this is a text payload
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Borrow as a list, if this is a list payload
    pub fn as_list(&self) -> Option<&[StuffContent]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Render the payload as a plain string, as used by condition expressions
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Number(number) => {
                if number.fract() == 0.0 {
                    format!("{}", *number as i64)
                } else {
                    number.to_string()
                }
            }
            Self::Document(uri) => uri.clone(),
            Self::Structured(value) => match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            Self::List(items) => items
                .iter()
                .map(Self::to_display_string)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Navigate a field path into a structured payload
    pub fn project(&self, field: &str) -> Option<StuffContent> {
        match self {
            Self::Structured(value) => value.get(field).map(|v| Self::Structured(v.clone())),
            // "text" on a text payload is the payload itself
            Self::Text(_) if field == "text" => Some(self.clone()),
            _ => None,
        }
    }
}

/// The unit of data exchanged between pipes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stuff {
    /// Qualified code of the concept this payload instantiates
    pub concept: String,

    /// The payload itself
    pub content: StuffContent,
}

impl Stuff {
    pub fn new(concept: impl Into<String>, content: StuffContent) -> Self {
        Self {
            concept: concept.into(),
            content,
        }
    }

    /// Text payload shorthand
    pub fn text(concept: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(concept, StuffContent::Text(text.into()))
    }

    /// List payload shorthand
    pub fn list(concept: impl Into<String>, items: Vec<StuffContent>) -> Self {
        Self::new(concept, StuffContent::List(items))
    }
}

/// Append-only binding store for one pipeline run scope
#[derive(Debug, Clone, Default)]
pub struct WorkingMemory {
    /// Bindings inherited from the parent scope (read-only)
    base: BTreeMap<String, Arc<Stuff>>,

    /// Bindings owned by this scope
    local: BTreeMap<String, Arc<Stuff>>,
}

impl WorkingMemory {
    /// Create an empty root memory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a root memory from named root inputs
    pub fn from_inputs(
        inputs: impl IntoIterator<Item = (String, Stuff)>,
    ) -> Result<Self, CogflowError> {
        let mut memory = Self::new();
        for (name, stuff) in inputs {
            memory.bind(&name, stuff)?;
        }
        Ok(memory)
    }

    /// Bind a value under a new name in this scope.
    ///
    /// Re-binding a name that this scope already owns is an error; shadowing
    /// a name inherited from an outer scope is allowed.
    pub fn bind(&mut self, name: &str, stuff: Stuff) -> Result<(), CogflowError> {
        self.bind_arc(name, Arc::new(stuff))
    }

    fn bind_arc(&mut self, name: &str, stuff: Arc<Stuff>) -> Result<(), CogflowError> {
        if self.local.contains_key(name) {
            return Err(CogflowError::DuplicateBinding {
                name: name.to_string(),
            });
        }
        self.local.insert(name.to_string(), stuff);
        Ok(())
    }

    /// Read a binding, local names shadowing inherited ones
    pub fn get(&self, name: &str) -> Result<&Stuff, CogflowError> {
        self.local
            .get(name)
            .or_else(|| self.base.get(name))
            .map(Arc::as_ref)
            .ok_or_else(|| CogflowError::MissingBinding {
                name: name.to_string(),
            })
    }

    /// Check whether a name is visible in this scope
    pub fn contains(&self, name: &str) -> bool {
        self.local.contains_key(name) || self.base.contains_key(name)
    }

    /// Fork a child view: all current bindings become the child's read-only
    /// snapshot, and the child starts with an empty local write set.
    pub fn fork(&self) -> Self {
        let mut base = self.base.clone();
        for (name, stuff) in &self.local {
            base.insert(name.clone(), Arc::clone(stuff));
        }
        Self {
            base,
            local: BTreeMap::new(),
        }
    }

    /// Merge a completed child branch back into this scope.
    ///
    /// Branches must write disjoint names: a child binding whose name is
    /// already visible here is a `DuplicateBindingError`.
    pub fn merge(&mut self, child: WorkingMemory) -> Result<(), CogflowError> {
        for (name, stuff) in child.local {
            if self.contains(&name) {
                return Err(CogflowError::DuplicateBinding { name });
            }
            self.local.insert(name, stuff);
        }
        Ok(())
    }

    /// All visible binding names, sorted
    pub fn binding_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .base
            .keys()
            .chain(self.local.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Number of visible bindings
    pub fn len(&self) -> usize {
        self.binding_names().len()
    }

    /// True if no bindings are visible
    pub fn is_empty(&self) -> bool {
        self.base.is_empty() && self.local.is_empty()
    }
}
