//! Disease label space: the stable index ↔ name mapping the classifier was fit on.
//!
//! Persisted as a JSON array where position is the label index.

use std::collections::HashSet;

use symptomatic_core::MappingError;

/// Ordered disease labels. Predictions are indices into this space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSpace {
    names: Vec<String>,
}

impl LabelSpace {
    /// Build from names in index order.
    pub fn from_names(names: Vec<String>) -> Result<Self, MappingError> {
        if names.is_empty() {
            return Err(MappingError::Empty);
        }
        let mut seen = HashSet::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(MappingError::Blank(i));
            }
            if !seen.insert(name.as_str()) {
                return Err(MappingError::DuplicateName(name.clone()));
            }
        }
        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Decode a predicted index back to its label.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}
