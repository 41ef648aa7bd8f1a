// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cogflow contributors

//! Concept model
//!
//! Concepts are named, domain-qualified data types with a natural-language
//! definition and an optional structural payload type. Refinement edges
//! ("is-a-more-specific-version-of") form a DAG rooted at the native concepts.

mod registry;

pub use registry::ConceptRegistry;

use serde::{Deserialize, Serialize};

/// Domain that owns the pre-registered native concepts
pub const NATIVE_DOMAIN: &str = "native";

/// Local names of the native concepts, resolved globally from any domain
pub const NATIVE_CONCEPTS: &[&str] = &[
    "Text",
    "Image",
    "PDF",
    "TextAndImages",
    "Number",
    "Page",
    "LlmPrompt",
    "Anything",
];

/// A named, domain-qualified data type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    /// Domain-qualified code, e.g. "legal.Contract"
    pub code: String,

    /// Natural-language definition
    pub definition: String,

    /// Optional structural payload type name
    #[serde(default)]
    pub structure: Option<String>,

    /// Codes of the concepts this one refines (direct edges only)
    #[serde(default)]
    pub refines: Vec<String>,
}

impl Concept {
    /// Create a concept with no structure and no refinement edges
    pub fn new(code: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            definition: definition.into(),
            structure: None,
            refines: vec![],
        }
    }

    /// The domain part of the code
    pub fn domain(&self) -> &str {
        self.code.split_once('.').map_or("", |(d, _)| d)
    }

    /// The local name part of the code
    pub fn local_name(&self) -> &str {
        self.code.split_once('.').map_or(self.code.as_str(), |(_, n)| n)
    }
}

/// Check whether an unqualified name is a native concept name
pub fn is_native_name(name: &str) -> bool {
    NATIVE_CONCEPTS.contains(&name)
}

/// Qualify a local concept name with a domain
pub fn qualify(domain: &str, name: &str) -> String {
    format!("{domain}.{name}")
}

/// Derive the default binding name for a concept: snake_case of its local name
pub fn default_binding_name(code: &str) -> String {
    let local = code.split_once('.').map_or(code, |(_, n)| n);
    let chars: Vec<char> = local.chars().collect();
    let mut out = String::with_capacity(local.len() + 4);
    for (i, &ch) in chars.iter().enumerate() {
        if ch.is_uppercase() {
            // Word boundary: previous char is lowercase, or this starts the
            // tail of an acronym ("OcrPage" -> ocr_page, "PDF" -> pdf)
            let after_lower = i > 0 && chars[i - 1].is_lowercase();
            let before_lower = i > 0 && chars[i - 1].is_uppercase()
                && chars.get(i + 1).is_some_and(|c| c.is_lowercase());
            if after_lower || before_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
