//! Prediction results and the `/predict` response body.

use serde::{Deserialize, Serialize};

/// Outcome of one pass through the inference pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub matched_keywords: Vec<String>,
    pub predicted_disease: String,
    /// Index into the label space.
    pub label_index: usize,
    /// Softmax probability of the predicted label, in `[0, 1]`.
    pub confidence: f32,
}

/// JSON body returned by `POST /predict` on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub matched_keywords: Vec<String>,
    pub predicted_disease: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl PredictResponse {
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }
}

impl From<Prediction> for PredictResponse {
    fn from(p: Prediction) -> Self {
        Self {
            matched_keywords: p.matched_keywords,
            predicted_disease: p.predicted_disease,
            confidence: p.confidence,
            explanation: None,
        }
    }
}
