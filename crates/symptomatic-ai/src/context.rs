//! The assembled inference pipeline, built once at startup and shared by `Arc`.

use symptomatic_core::{KeywordVocabulary, Prediction, SymptomQuery, clean_text};
use tracing::{debug, info};

use crate::artifact::HeadArtifact;
use crate::encoder::TextEncoder;
use crate::error::{ArtifactError, InferenceError, PredictError};
use crate::head::FusionHead;
use crate::labels::LabelSpace;
use crate::manifest::ArtifactManifest;
use crate::weights::{ShapeMismatch, ShapePolicy};

/// Knobs applied while loading an artifact directory.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub policy: ShapePolicy,
    /// Overrides the manifest's token sequence width.
    pub max_length: Option<usize>,
}

pub struct InferenceContext {
    manifest: ArtifactManifest,
    vocabulary: KeywordVocabulary,
    labels: LabelSpace,
    head: FusionHead,
    encoder: Box<dyn TextEncoder>,
    patched: Vec<ShapeMismatch>,
}

impl std::fmt::Debug for InferenceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceContext")
            .field("labels", &self.labels.len())
            .field("keywords", &self.vocabulary.len())
            .field("hidden_size", &self.head.hidden_size())
            .field("patched", &self.patched.len())
            .finish_non_exhaustive()
    }
}

impl InferenceContext {
    /// Pair a loaded head with an encoder, checking the pooled width agrees.
    pub fn new(
        artifact: HeadArtifact,
        encoder: Box<dyn TextEncoder>,
    ) -> Result<Self, ArtifactError> {
        if let Some(actual) = encoder.hidden_size() {
            if actual != artifact.head.hidden_size() {
                return Err(ArtifactError::EncoderWidth {
                    expected: artifact.head.hidden_size(),
                    actual,
                });
            }
        }
        Ok(Self {
            manifest: artifact.manifest,
            vocabulary: artifact.keywords,
            labels: artifact.labels,
            head: artifact.head,
            encoder,
            patched: artifact.patched,
        })
    }

    /// Load a complete artifact directory with the ONNX Runtime encoder.
    ///
    /// Order: manifest, tokenizer, labels, keywords, head weights, encoder
    /// session. Any failure is fatal.
    #[cfg(feature = "onnx")]
    pub fn load(
        dir: &crate::artifact::ArtifactDir,
        options: &LoadOptions,
    ) -> Result<Self, ArtifactError> {
        use crate::artifact::{ENCODER_FILE, TOKENIZER_FILE};
        use crate::onnx::{OnnxEncoder, SymptomTokenizer};

        let mut manifest = dir.load_manifest()?.unwrap_or_default();
        if let Some(max_length) = options.max_length {
            manifest.max_length = max_length;
        }

        let tokenizer = SymptomTokenizer::load(&dir.require(TOKENIZER_FILE)?, manifest.max_length)?;
        let vocab_drift = tokenizer.check_vocab(manifest.encoder_vocab_size);
        if let Some(mismatch) = &vocab_drift {
            if options.policy == ShapePolicy::Strict {
                return Err(ArtifactError::ShapeMismatch(vec![mismatch.clone()]));
            }
            tracing::warn!(
                expected = ?mismatch.expected,
                actual = ?mismatch.actual,
                "tokenizer vocabulary does not match encoder embeddings"
            );
        }

        let mut artifact = HeadArtifact::load(dir, manifest, options.policy)?;
        artifact.patched.extend(vocab_drift);

        let encoder = OnnxEncoder::load(
            &dir.require(ENCODER_FILE)?,
            tokenizer,
            &artifact.manifest.pooled_output,
        )?;

        let context = Self::new(artifact, Box::new(encoder))?;
        info!(
            dir = %dir.path().display(),
            labels = context.labels.len(),
            keywords = context.vocabulary.len(),
            max_length = context.manifest.max_length,
            policy = %options.policy,
            "loaded artifact"
        );
        Ok(context)
    }

    /// Run the full pipeline for one query.
    pub fn predict(&self, query: &SymptomQuery) -> Result<Prediction, PredictError> {
        let text = clean_text(&query.to_text()?);
        let matched = self.vocabulary.extract(&text);
        if matched.is_empty() {
            debug!(text = %text, "no keywords matched");
            return Err(PredictError::NoKeywordMatch);
        }

        let features = self.vocabulary.featurize(&matched);
        let pooled = self.encoder.encode(&text)?;
        let distribution = self.head.predict(&pooled, features.as_slice())?;

        let (label_index, confidence) = distribution.top().ok_or(InferenceError::EmptyLogits)?;
        let predicted = self
            .labels
            .name(label_index)
            .ok_or(InferenceError::LabelOutOfRange {
                index: label_index,
                len: self.labels.len(),
            })?;

        info!(
            matched = ?matched,
            predicted,
            index = label_index,
            confidence,
            "prediction"
        );

        Ok(Prediction {
            matched_keywords: matched,
            predicted_disease: predicted.to_string(),
            label_index,
            confidence,
        })
    }

    pub fn manifest(&self) -> &ArtifactManifest {
        &self.manifest
    }

    pub fn vocabulary(&self) -> &KeywordVocabulary {
        &self.vocabulary
    }

    pub fn labels(&self) -> &LabelSpace {
        &self.labels
    }

    pub fn head(&self) -> &FusionHead {
        &self.head
    }

    /// Incompatibilities accepted under [`ShapePolicy::Patch`]: head tensors
    /// that were zero-filled, plus any tokenizer vocabulary drift. Empty under
    /// [`ShapePolicy::Strict`].
    pub fn patched_tensors(&self) -> &[ShapeMismatch] {
        &self.patched
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::testutil::head_tensors;
    use crate::weights::{HeadSpec, read_tensors};
    use symptomatic_core::{CleanedText, QueryError, SYMPTOM_KEYWORDS};

    const HIDDEN: usize = 4;

    /// Returns a fixed vector and records every text it was asked to encode.
    struct RecordingEncoder {
        width: usize,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingEncoder {
        fn new(width: usize) -> Self {
            Self {
                width,
                seen: Arc::default(),
            }
        }
    }

    impl TextEncoder for RecordingEncoder {
        fn hidden_size(&self) -> Option<usize> {
            None
        }

        fn encode(&self, text: &CleanedText) -> Result<Vec<f32>, InferenceError> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(vec![0.25; self.width])
        }
    }

    struct FixedWidth(usize);

    impl TextEncoder for FixedWidth {
        fn hidden_size(&self) -> Option<usize> {
            Some(self.0)
        }

        fn encode(&self, _: &CleanedText) -> Result<Vec<f32>, InferenceError> {
            Ok(vec![0.0; self.0])
        }
    }

    fn artifact() -> HeadArtifact {
        let spec = HeadSpec {
            num_keywords: SYMPTOM_KEYWORDS.len(),
            hidden_size: HIDDEN,
            keyword_width: 8,
            fusion_width: 6,
            num_labels: 5,
        };
        let bytes = crate::testutil::safetensors_bytes(&head_tensors(&spec));
        let (head, patched) = spec
            .build(&read_tensors(&bytes).unwrap(), ShapePolicy::Strict)
            .unwrap();
        HeadArtifact {
            manifest: ArtifactManifest {
                hidden_size: HIDDEN,
                ..Default::default()
            },
            labels: LabelSpace::from_names((0..5).map(|i| format!("Disease {i}")).collect())
                .unwrap(),
            keywords: KeywordVocabulary::builtin(),
            head,
            patched,
        }
    }

    fn context() -> InferenceContext {
        InferenceContext::new(artifact(), Box::new(RecordingEncoder::new(HIDDEN))).unwrap()
    }

    fn query(parts: &[&str]) -> SymptomQuery {
        SymptomQuery::from(parts.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn predicts_with_matched_keywords_in_vocabulary_order() {
        let ctx = context();
        let p = ctx.predict(&query(&["persistent cough", "high fever"])).unwrap();
        assert_eq!(p.matched_keywords, ["fever", "cough"]);
        assert!(p.label_index < ctx.labels().len());
        assert_eq!(ctx.labels().name(p.label_index), Some(p.predicted_disease.as_str()));
        assert!((0.0..=1.0).contains(&p.confidence));
    }

    #[test]
    fn prediction_is_deterministic() {
        let ctx = context();
        let q = SymptomQuery::from("headache, nausea");
        assert_eq!(ctx.predict(&q).unwrap(), ctx.predict(&q).unwrap());
    }

    #[test]
    fn substring_matches_are_reported() {
        let ctx = context();
        let p = ctx.predict(&SymptomQuery::from("headache")).unwrap();
        assert_eq!(p.matched_keywords, ["ache", "headache"]);
    }

    #[test]
    fn no_keyword_is_reported_as_such() {
        let ctx = context();
        let err = ctx.predict(&query(&["purple elephant"])).unwrap_err();
        assert!(matches!(err, PredictError::NoKeywordMatch));
        assert_eq!(err.to_string(), "No matching keywords found");
    }

    #[test]
    fn empty_query_is_invalid_input() {
        let ctx = context();
        for q in [query(&[]), query(&["  ", ""]), SymptomQuery::from(" , ")] {
            let err = ctx.predict(&q).unwrap_err();
            assert!(matches!(err, PredictError::InvalidInput(QueryError::Empty)));
        }
    }

    #[test]
    fn encoder_sees_cleaned_text() {
        let encoder = RecordingEncoder::new(HIDDEN);
        let seen = Arc::clone(&encoder.seen);
        let ctx = InferenceContext::new(artifact(), Box::new(encoder)).unwrap();

        ctx.predict(&query(&["High FEVER!!", "cough"])).unwrap();
        ctx.predict(&query(&["purple elephant"])).unwrap_err();

        // Unmatched queries never reach the encoder.
        assert_eq!(*seen.lock().unwrap(), ["high fever cough"]);
    }

    #[test]
    fn encoder_width_checked_at_construction() {
        let err = InferenceContext::new(artifact(), Box::new(FixedWidth(HIDDEN + 1))).unwrap_err();
        assert!(matches!(
            err,
            ArtifactError::EncoderWidth {
                expected: HIDDEN,
                actual: 5
            }
        ));
        assert!(InferenceContext::new(artifact(), Box::new(FixedWidth(HIDDEN))).is_ok());
    }

    #[test]
    fn wrong_pooled_width_is_an_inference_error() {
        let ctx = InferenceContext::new(artifact(), Box::new(RecordingEncoder::new(HIDDEN + 2)))
            .unwrap();
        let err = ctx.predict(&query(&["fever"])).unwrap_err();
        assert!(matches!(
            err,
            PredictError::Inference(InferenceError::Shape {
                layer: "pooled",
                ..
            })
        ));
    }

    #[test]
    fn exposes_patch_report() {
        let ctx = context();
        assert!(ctx.patched_tensors().is_empty());
        assert_eq!(ctx.vocabulary().len(), 18);
        assert_eq!(ctx.manifest().hidden_size, HIDDEN);
    }
}
