//! Debug-indicator patterns: compilation and per-line matching.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// A configured pattern before compilation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PatternSpec {
    /// Stable identifier reported with each violation.
    pub id: String,
    /// Regular expression, always matched case-insensitively.
    pub regex: String,
}

impl PatternSpec {
    pub fn new(id: impl Into<String>, regex: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            regex: regex.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    id: String,
    regex: Regex,
}

/// Patterns compiled in configured order.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<CompiledPattern>,
}

impl PatternSet {
    /// Compile every spec case-insensitively.
    ///
    /// A spec whose regex does not compile is logged and dropped; the rest
    /// still load.
    pub fn compile(specs: &[PatternSpec]) -> Self {
        let mut patterns = Vec::with_capacity(specs.len());
        for spec in specs {
            match RegexBuilder::new(&spec.regex).case_insensitive(true).build() {
                Ok(regex) => patterns.push(CompiledPattern {
                    id: spec.id.clone(),
                    regex,
                }),
                Err(e) => log::warn!("dropping pattern '{}': {e}", spec.id),
            }
        }
        Self { patterns }
    }

    /// Id of the first pattern that matches anywhere in `line`.
    pub fn match_line(&self, line: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(line))
            .map(|p| p.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Ids in match order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.id.as_str())
    }
}
