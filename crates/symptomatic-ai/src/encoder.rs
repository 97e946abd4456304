use symptomatic_core::CleanedText;

use crate::error::InferenceError;

/// Produces the pooled sentence vector the classifier head consumes.
///
/// Implementations must be shareable across request threads; any mutable
/// runtime state (an ONNX session) is guarded internally.
pub trait TextEncoder: Send + Sync {
    /// Width of the pooled vector, when the encoder can tell before running.
    fn hidden_size(&self) -> Option<usize>;

    fn encode(&self, text: &CleanedText) -> Result<Vec<f32>, InferenceError>;
}
