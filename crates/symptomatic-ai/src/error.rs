use std::path::PathBuf;

use symptomatic_core::{MappingError, QueryError};
use thiserror::Error;

use crate::weights::ShapeMismatch;

/// Failure to build an [`InferenceContext`](crate::InferenceContext) from disk.
///
/// Always fatal: the process must not serve traffic without a loaded artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact file not found: {0}")]
    Missing(PathBuf),

    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid {file}: {source}")]
    InvalidMapping {
        file: &'static str,
        source: MappingError,
    },

    #[error("load tokenizer: {0}")]
    Tokenizer(String),

    #[error("safetensors: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("tensor {name} has dtype {dtype}, expected F32")]
    Dtype { name: String, dtype: String },

    #[error("tensor {0} not found in head weights")]
    MissingTensor(String),

    #[error("incompatible head weights: {}", describe(.0))]
    ShapeMismatch(Vec<ShapeMismatch>),

    #[error("layer {layer}: {detail}")]
    Layer { layer: &'static str, detail: String },

    #[error("encoder produces {actual}-dim pooled output, head expects {expected}")]
    EncoderWidth { expected: usize, actual: usize },

    #[error("onnx runtime: {0}")]
    Onnx(String),
}

/// Failure during a single forward pass.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("{layer}: expected input width {expected}, got {actual}")]
    Shape {
        layer: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("tokenize: {0}")]
    Tokenizer(String),

    #[error("onnx runtime: {0}")]
    Onnx(String),

    #[error("encoder lock poisoned")]
    Poisoned,

    #[error("classifier produced no logits")]
    EmptyLogits,

    #[error("label index {index} outside label space of {len}")]
    LabelOutOfRange { index: usize, len: usize },
}

/// Outcome of [`InferenceContext::predict`](crate::InferenceContext::predict) when no
/// prediction is made.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error(transparent)]
    InvalidInput(#[from] QueryError),

    #[error("No matching keywords found")]
    NoKeywordMatch,

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

fn describe(mismatches: &[ShapeMismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
