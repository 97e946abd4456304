//! Artifact manifest: the architecture a set of head weights was trained with.
//!
//! Keyword-projection and fusion widths differ between trained artifacts
//! (18→32 or 18→48, fusion→128 or →192), so they are pinned per artifact
//! rather than compiled in.

use serde::{Deserialize, Serialize};

pub const DEFAULT_HIDDEN_SIZE: usize = 768;
pub const DEFAULT_MAX_LENGTH: usize = 64;
pub const DEFAULT_POOLED_OUTPUT: &str = "pooler_output";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactManifest {
    /// Width of the encoder's pooled output.
    pub hidden_size: usize,
    /// Output width of `keyword_fc`. Inferred from the weights when unset.
    pub keyword_width: Option<usize>,
    /// Output width of `fc`. Inferred from the weights when unset.
    pub fusion_width: Option<usize>,
    /// Token sequence width the head was fit on.
    pub max_length: usize,
    /// Name of the pooled output in `encoder.onnx`.
    pub pooled_output: String,
    /// Rows in the encoder's word-embedding table, checked against the tokenizer.
    pub encoder_vocab_size: Option<usize>,
}

impl Default for ArtifactManifest {
    fn default() -> Self {
        Self {
            hidden_size: DEFAULT_HIDDEN_SIZE,
            keyword_width: None,
            fusion_width: None,
            max_length: DEFAULT_MAX_LENGTH,
            pooled_output: DEFAULT_POOLED_OUTPUT.to_string(),
            encoder_vocab_size: None,
        }
    }
}
