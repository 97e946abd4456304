//! ONNX Runtime encoder for the pretrained biomedical language model.
//!
//! `encoder.onnx` is the BERT-style encoder exported with a pooled output
//! (`[batch, hidden]`); `tokenizer.json` is the WordPiece tokenizer it was
//! trained with.

use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use symptomatic_core::{CleanedText, TokenEncoding};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::info;

use crate::encoder::TextEncoder;
use crate::error::{ArtifactError, InferenceError};
use crate::weights::ShapeMismatch;

const PAD_TOKEN: &str = "[PAD]";

/// Tokenizer pinned to the fixed sequence width the head was fit on.
pub struct SymptomTokenizer {
    inner: Tokenizer,
    max_length: usize,
    pad_id: i64,
}

impl SymptomTokenizer {
    pub fn load(path: &Path, max_length: usize) -> Result<Self, ArtifactError> {
        let mut inner =
            Tokenizer::from_file(path).map_err(|e| ArtifactError::Tokenizer(e.to_string()))?;

        let (pad_id, pad_token) = match inner.get_padding() {
            Some(p) => (p.pad_id, p.pad_token.clone()),
            None => (inner.token_to_id(PAD_TOKEN).unwrap_or(0), PAD_TOKEN.to_string()),
        };

        inner
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| ArtifactError::Tokenizer(format!("set truncation: {e}")))?;
        inner.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_length),
            pad_id,
            pad_token,
            ..Default::default()
        }));

        Ok(Self {
            inner,
            max_length,
            pad_id: i64::from(pad_id),
        })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Compare the tokenizer's vocabulary with the encoder's embedding rows.
    pub fn check_vocab(&self, encoder_vocab_size: Option<usize>) -> Option<ShapeMismatch> {
        let expected = encoder_vocab_size?;
        let actual = self.vocab_size();
        (expected != actual).then(|| ShapeMismatch {
            tensor: "encoder.word_embeddings".to_string(),
            expected: vec![expected],
            actual: Some(vec![actual]),
        })
    }

    pub fn encode(&self, text: &CleanedText) -> Result<TokenEncoding, InferenceError> {
        let encoding = self
            .inner
            .encode(text.as_str(), true)
            .map_err(|e| InferenceError::Tokenizer(e.to_string()))?;
        let widen = |v: &[u32]| v.iter().map(|&x| i64::from(x)).collect::<Vec<_>>();
        Ok(TokenEncoding::fit(
            widen(encoding.get_ids()),
            widen(encoding.get_attention_mask()),
            widen(encoding.get_type_ids()),
            self.max_length,
            self.pad_id,
        ))
    }
}

/// [`TextEncoder`] backed by an ONNX Runtime session.
///
/// A session run needs exclusive access, so concurrent requests serialize on
/// the lock.
pub struct OnnxEncoder {
    session: Mutex<Session>,
    tokenizer: SymptomTokenizer,
    pooled_index: usize,
    hidden_size: Option<usize>,
    takes_token_types: bool,
}

impl OnnxEncoder {
    pub fn load(
        model_path: &Path,
        tokenizer: SymptomTokenizer,
        pooled_output: &str,
    ) -> Result<Self, ArtifactError> {
        let session = Session::builder()
            .map_err(|e| ArtifactError::Onnx(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| ArtifactError::Onnx(e.to_string()))?;

        let pooled_index = session
            .outputs()
            .iter()
            .position(|o| o.name() == pooled_output)
            .ok_or_else(|| {
                ArtifactError::Onnx(format!("encoder has no output named {pooled_output:?}"))
            })?;
        let hidden_size = infer_dim(session.outputs()[pooled_index].dtype());
        let takes_token_types = session
            .inputs()
            .iter()
            .any(|i| i.name() == "token_type_ids");

        info!(
            model = %model_path.display(),
            pooled_output,
            hidden_size = ?hidden_size,
            max_length = tokenizer.max_length(),
            "loaded encoder"
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            pooled_index,
            hidden_size,
            takes_token_types,
        })
    }
}

impl TextEncoder for OnnxEncoder {
    fn hidden_size(&self) -> Option<usize> {
        self.hidden_size
    }

    fn encode(&self, text: &CleanedText) -> Result<Vec<f32>, InferenceError> {
        let encoding = self.tokenizer.encode(text)?;
        let shape = [1i64, encoding.len() as i64];
        let tensor = |v: &[i64]| {
            Tensor::from_array((shape, v.to_vec().into_boxed_slice()))
                .map_err(|e| InferenceError::Onnx(e.to_string()))
        };
        let ids = tensor(encoding.input_ids())?;
        let mask = tensor(encoding.attention_mask())?;

        let mut session = self.session.lock().map_err(|_| InferenceError::Poisoned)?;
        let outputs = if self.takes_token_types {
            let types = tensor(encoding.token_type_ids())?;
            session.run(ort::inputs![
                "input_ids" => ids,
                "attention_mask" => mask,
                "token_type_ids" => types,
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => ids,
                "attention_mask" => mask,
            ])
        }
        .map_err(|e| InferenceError::Onnx(e.to_string()))?;

        let (output_shape, data) = outputs[self.pooled_index]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Onnx(e.to_string()))?;
        let dims: &[i64] = output_shape;
        if dims.len() != 2 || dims[0] != 1 {
            return Err(InferenceError::Onnx(format!(
                "unexpected pooled output shape {dims:?}, expected [1, hidden]"
            )));
        }
        Ok(data.to_vec())
    }
}

/// Last dimension of a tensor output, if the model declares it statically.
fn infer_dim(output_type: &ort::value::ValueType) -> Option<usize> {
    match output_type {
        ort::value::ValueType::Tensor { shape, .. } => shape
            .last()
            .and_then(|&d| if d > 0 { Some(d as usize) } else { None }),
        _ => None,
    }
}
