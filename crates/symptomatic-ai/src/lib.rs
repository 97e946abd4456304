//! Inference layer: keyword-fusion classifier head, artifact loading, and the
//! ONNX Runtime encoder for the pretrained biomedical language model.

pub mod artifact;
pub mod context;
pub mod encoder;
mod error;
pub mod head;
pub mod labels;
pub mod manifest;
pub mod weights;

#[cfg(feature = "onnx")]
mod onnx;

#[cfg(test)]
mod testutil;

pub use artifact::{ArtifactDir, HeadArtifact};
pub use context::{InferenceContext, LoadOptions};
pub use encoder::TextEncoder;
pub use error::{ArtifactError, InferenceError, PredictError};
pub use head::{Distribution, FusionHead, Linear};
pub use labels::LabelSpace;
pub use manifest::ArtifactManifest;
pub use weights::{HeadSpec, ShapeMismatch, ShapePolicy};

#[cfg(feature = "onnx")]
pub use onnx::{OnnxEncoder, SymptomTokenizer};
