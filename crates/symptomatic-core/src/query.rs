//! Incoming symptom queries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("'symptoms' field is required")]
    Empty,
}

/// Symptoms as sent by a client: a list of phrases or one comma-separated string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SymptomQuery {
    List(Vec<String>),
    Text(String),
}

impl SymptomQuery {
    /// Non-blank symptom phrases, trimmed.
    pub fn phrases(&self) -> Vec<&str> {
        let raw: Vec<&str> = match self {
            Self::List(items) => items.iter().map(String::as_str).collect(),
            Self::Text(text) => text.split(',').collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Join all phrases into one lowercase string, ready for cleaning.
    pub fn to_text(&self) -> Result<String, QueryError> {
        let phrases = self.phrases();
        if phrases.is_empty() {
            return Err(QueryError::Empty);
        }
        Ok(phrases.join(" ").to_lowercase())
    }
}

impl From<Vec<String>> for SymptomQuery {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

impl From<&str> for SymptomQuery {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}
