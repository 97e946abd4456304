//! Symptom keyword vocabulary, extraction, and multi-hot features.
//!
//! Matching is plain substring containment on cleaned text, so `ache`
//! also matches inside `headache` and `stomachache`. The classifier head
//! was fit on features built this way.

use std::collections::HashMap;

use thiserror::Error;

use crate::text::CleanedText;

/// Built-in symptom terms, in their default index order.
pub const SYMPTOM_KEYWORDS: &[&str] = &[
    "pain",
    "ache",
    "fever",
    "swelling",
    "nausea",
    "vomiting",
    "headache",
    "cough",
    "dizziness",
    "fatigue",
    "anxiety",
    "depression",
    "shortness",
    "breath",
    "insomnia",
    "palpitations",
    "chest",
    "nervousness",
];

/// A persisted `name → index` mapping is not a dense, duplicate-free index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("mapping is empty")]
    Empty,
    #[error("index {index} is missing (mapping has {len} entries)")]
    Gap { index: usize, len: usize },
    #[error("index {index} is assigned to both {first:?} and {second:?}")]
    DuplicateIndex {
        index: usize,
        first: String,
        second: String,
    },
    #[error("entry {0:?} appears more than once")]
    DuplicateName(String),
    #[error("entry at index {0} is blank")]
    Blank(usize),
}

/// Ordered symptom vocabulary. Position in the vocabulary is the feature slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordVocabulary {
    terms: Vec<String>,
}

/// Multi-hot keyword vector, one slot per vocabulary entry.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordFeatures(Vec<f32>);

impl KeywordFeatures {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of slots set to 1.0.
    pub fn active(&self) -> usize {
        self.0.iter().filter(|&&v| v > 0.0).count()
    }
}

impl KeywordVocabulary {
    /// The built-in 18-term vocabulary, indexed by position in [`SYMPTOM_KEYWORDS`].
    pub fn builtin() -> Self {
        Self {
            terms: SYMPTOM_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Build from an ordered list of terms.
    pub fn from_terms<I, S>(terms: I) -> Result<Self, MappingError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let terms: Vec<String> = terms.into_iter().map(Into::into).collect();
        if terms.is_empty() {
            return Err(MappingError::Empty);
        }
        let mut seen = HashMap::with_capacity(terms.len());
        for (i, term) in terms.iter().enumerate() {
            if term.trim().is_empty() {
                return Err(MappingError::Blank(i));
            }
            if seen.insert(term.as_str(), i).is_some() {
                return Err(MappingError::DuplicateName(term.clone()));
            }
        }
        Ok(Self { terms })
    }

    /// Build from a persisted `keyword → index` mapping.
    ///
    /// Indices must cover `0..len` exactly once.
    pub fn from_index_map(map: &HashMap<String, usize>) -> Result<Self, MappingError> {
        if map.is_empty() {
            return Err(MappingError::Empty);
        }
        let len = map.len();
        let mut slots: Vec<Option<&str>> = vec![None; len];
        for (term, &index) in map {
            // Out-of-range indices leave a hole below `len`, reported as a gap.
            if index >= len {
                continue;
            }
            if let Some(first) = slots[index] {
                let (first, second) = if first < term.as_str() {
                    (first, term.as_str())
                } else {
                    (term.as_str(), first)
                };
                return Err(MappingError::DuplicateIndex {
                    index,
                    first: first.to_string(),
                    second: second.to_string(),
                });
            }
            slots[index] = Some(term.as_str());
        }
        if let Some(index) = slots.iter().position(Option::is_none) {
            return Err(MappingError::Gap { index, len });
        }
        Self::from_terms(slots.into_iter().flatten())
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn index_of(&self, term: &str) -> Option<usize> {
        self.terms.iter().position(|t| t == term)
    }

    /// Vocabulary terms occurring anywhere in `text`, in vocabulary order.
    pub fn extract(&self, text: &CleanedText) -> Vec<String> {
        self.terms
            .iter()
            .filter(|term| text.as_str().contains(term.as_str()))
            .cloned()
            .collect()
    }

    /// Multi-hot vector for `matched`. Terms outside the vocabulary are ignored.
    pub fn featurize(&self, matched: &[String]) -> KeywordFeatures {
        let mut features = vec![0.0f32; self.terms.len()];
        for term in matched {
            match self.index_of(term) {
                Some(i) => features[i] = 1.0,
                None => tracing::debug!(term = %term, "keyword not in vocabulary, skipped"),
            }
        }
        KeywordFeatures(features)
    }
}
