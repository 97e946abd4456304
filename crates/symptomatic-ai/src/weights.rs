//! Classifier-head weights from `head.safetensors`.
//!
//! Every tensor the head needs is checked against the shape implied by the
//! artifact (keyword count, label count, manifest widths). What happens on a
//! mismatch is decided by [`ShapePolicy`]; a mismatch is never loaded
//! silently.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use safetensors::{Dtype, SafeTensors};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ArtifactError;
use crate::head::{FusionHead, Linear};
use crate::manifest::ArtifactManifest;

pub const KEYWORD_FC_WEIGHT: &str = "keyword_fc.weight";
pub const KEYWORD_FC_BIAS: &str = "keyword_fc.bias";
pub const FC_WEIGHT: &str = "fc.weight";
pub const FC_BIAS: &str = "fc.bias";
pub const CLASSIFIER_WEIGHT: &str = "classifier.weight";
pub const CLASSIFIER_BIAS: &str = "classifier.bias";

/// What to do when a persisted tensor does not fit the architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShapePolicy {
    /// Refuse to load.
    #[default]
    Strict,
    /// Drop the tensor, substitute zeros of the expected shape, and log it.
    Patch,
}

impl FromStr for ShapePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "patch" => Ok(Self::Patch),
            other => Err(format!("unknown shape policy {other:?} (expected strict or patch)")),
        }
    }
}

impl fmt::Display for ShapePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strict => "strict",
            Self::Patch => "patch",
        })
    }
}

/// A persisted tensor whose shape differs from what the head requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShapeMismatch {
    pub tensor: String,
    pub expected: Vec<usize>,
    /// `None` when the tensor is absent.
    pub actual: Option<Vec<usize>>,
}

impl fmt::Display for ShapeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual {
            Some(actual) => write!(
                f,
                "{}: expected {:?}, found {:?}",
                self.tensor, self.expected, actual
            ),
            None => write!(f, "{}: expected {:?}, missing", self.tensor, self.expected),
        }
    }
}

/// A decoded f32 tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Decode every tensor in a safetensors buffer. Only F32 is accepted.
pub fn read_tensors(bytes: &[u8]) -> Result<BTreeMap<String, RawTensor>, ArtifactError> {
    let st = SafeTensors::deserialize(bytes)?;
    let mut out = BTreeMap::new();
    for (name, view) in st.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(ArtifactError::Dtype {
                name,
                dtype: format!("{:?}", view.dtype()),
            });
        }
        let data = view
            .data()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        out.insert(
            name,
            RawTensor {
                shape: view.shape().to_vec(),
                data,
            },
        );
    }
    Ok(out)
}

/// Architecture of a fusion head, fully resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadSpec {
    pub num_keywords: usize,
    pub hidden_size: usize,
    pub keyword_width: usize,
    pub fusion_width: usize,
    pub num_labels: usize,
}

impl HeadSpec {
    /// Resolve widths from the manifest, falling back to the rows of the
    /// persisted weight matrices when the manifest leaves them unset.
    pub fn resolve(
        manifest: &ArtifactManifest,
        num_keywords: usize,
        num_labels: usize,
        tensors: &BTreeMap<String, RawTensor>,
    ) -> Result<Self, ArtifactError> {
        let keyword_width = match manifest.keyword_width {
            Some(w) => w,
            None => {
                let w = leading_dim(tensors, KEYWORD_FC_WEIGHT)?;
                info!(keyword_width = w, "keyword width inferred from head weights");
                w
            }
        };
        let fusion_width = match manifest.fusion_width {
            Some(w) => w,
            None => {
                let w = leading_dim(tensors, FC_WEIGHT)?;
                info!(fusion_width = w, "fusion width inferred from head weights");
                w
            }
        };
        Ok(Self {
            num_keywords,
            hidden_size: manifest.hidden_size,
            keyword_width,
            fusion_width,
            num_labels,
        })
    }

    /// Shape every head tensor must have, in PyTorch `[out, in]` layout.
    pub fn expected_shapes(&self) -> [(&'static str, Vec<usize>); 6] {
        [
            (
                KEYWORD_FC_WEIGHT,
                vec![self.keyword_width, self.num_keywords],
            ),
            (KEYWORD_FC_BIAS, vec![self.keyword_width]),
            (
                FC_WEIGHT,
                vec![self.fusion_width, self.hidden_size + self.keyword_width],
            ),
            (FC_BIAS, vec![self.fusion_width]),
            (CLASSIFIER_WEIGHT, vec![self.num_labels, self.fusion_width]),
            (CLASSIFIER_BIAS, vec![self.num_labels]),
        ]
    }

    /// Compare persisted tensors against [`expected_shapes`](Self::expected_shapes).
    pub fn check(&self, tensors: &BTreeMap<String, RawTensor>) -> Vec<ShapeMismatch> {
        self.expected_shapes()
            .into_iter()
            .filter_map(|(name, expected)| {
                let actual = tensors.get(name).map(|t| t.shape.clone());
                (actual.as_ref() != Some(&expected)).then(|| ShapeMismatch {
                    tensor: name.to_string(),
                    expected,
                    actual,
                })
            })
            .collect()
    }

    /// Build the head, applying `policy` to any incompatible tensor.
    ///
    /// Returns the head and the tensors that were patched (empty under
    /// [`ShapePolicy::Strict`]).
    pub fn build(
        &self,
        tensors: &BTreeMap<String, RawTensor>,
        policy: ShapePolicy,
    ) -> Result<(FusionHead, Vec<ShapeMismatch>), ArtifactError> {
        let mismatches = self.check(tensors);
        if !mismatches.is_empty() {
            if policy == ShapePolicy::Strict {
                return Err(ArtifactError::ShapeMismatch(mismatches));
            }
            for m in &mismatches {
                warn!(
                    tensor = %m.tensor,
                    expected = ?m.expected,
                    actual = ?m.actual,
                    "dropped incompatible head tensor, substituting zeros; predictions will degrade"
                );
            }
        }

        let expected = self.expected_shapes();
        let unused = tensors
            .keys()
            .filter(|k| !expected.iter().any(|(n, _)| *n == k.as_str()))
            .count();
        if unused > 0 {
            debug!(unused, "head weights contain tensors the head does not use");
        }

        let take = |name: &str| -> Vec<f32> {
            match tensors.get(name) {
                Some(t) if !mismatches.iter().any(|m| m.tensor == name) => t.data.clone(),
                _ => {
                    let len = expected
                        .iter()
                        .find(|(n, _)| *n == name)
                        .map(|(_, shape)| shape.iter().product())
                        .unwrap_or(0);
                    vec![0.0; len]
                }
            }
        };

        let keyword_fc = Linear::new(
            "keyword_fc",
            take(KEYWORD_FC_WEIGHT),
            take(KEYWORD_FC_BIAS),
            self.keyword_width,
            self.num_keywords,
        )?;
        let fc = Linear::new(
            "fc",
            take(FC_WEIGHT),
            take(FC_BIAS),
            self.fusion_width,
            self.hidden_size + self.keyword_width,
        )?;
        let classifier = Linear::new(
            "classifier",
            take(CLASSIFIER_WEIGHT),
            take(CLASSIFIER_BIAS),
            self.num_labels,
            self.fusion_width,
        )?;

        let head = FusionHead::new(keyword_fc, fc, classifier)?;
        Ok((head, mismatches))
    }
}

fn leading_dim(tensors: &BTreeMap<String, RawTensor>, name: &str) -> Result<usize, ArtifactError> {
    tensors
        .get(name)
        .and_then(|t| t.shape.first().copied())
        .ok_or_else(|| ArtifactError::MissingTensor(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{head_tensors, safetensors_bytes};

    fn spec() -> HeadSpec {
        HeadSpec {
            num_keywords: 3,
            hidden_size: 2,
            keyword_width: 2,
            fusion_width: 2,
            num_labels: 3,
        }
    }

    fn tensors_for(spec: &HeadSpec) -> BTreeMap<String, RawTensor> {
        read_tensors(&safetensors_bytes(&head_tensors(spec))).unwrap()
    }

    #[test]
    fn reads_f32_tensors() {
        let tensors = tensors_for(&spec());
        assert_eq!(tensors.len(), 6);
        assert_eq!(tensors[KEYWORD_FC_WEIGHT].shape, vec![2, 3]);
        assert_eq!(tensors[FC_WEIGHT].shape, vec![2, 4]);
        assert_eq!(tensors[CLASSIFIER_BIAS].data.len(), 3);
    }

    #[test]
    fn rejects_non_f32() {
        let bytes = crate::testutil::safetensors_i64("step", &[7, 8]);
        let err = read_tensors(&bytes).unwrap_err();
        assert!(matches!(err, ArtifactError::Dtype { ref name, .. } if name == "step"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            read_tensors(b"not a safetensors file").unwrap_err(),
            ArtifactError::SafeTensors(_)
        ));
    }

    #[test]
    fn builds_matching_head() {
        let spec = spec();
        let (head, patched) = spec.build(&tensors_for(&spec), ShapePolicy::Strict).unwrap();
        assert!(patched.is_empty());
        assert_eq!(head.hidden_size(), 2);
        assert_eq!(head.num_labels(), 3);
    }

    #[test]
    fn strict_fails_fast_on_mismatch() {
        let spec = spec();
        let trained_on_more_keywords = HeadSpec {
            num_keywords: 4,
            ..spec
        };
        let tensors = tensors_for(&trained_on_more_keywords);

        let err = spec.build(&tensors, ShapePolicy::Strict).unwrap_err();
        match err {
            ArtifactError::ShapeMismatch(list) => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].tensor, KEYWORD_FC_WEIGHT);
                assert_eq!(list[0].expected, vec![2, 3]);
                assert_eq!(list[0].actual, Some(vec![2, 4]));
            }
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn patch_drops_mismatched_tensor_and_reports_it() {
        let spec = spec();
        let tensors = tensors_for(&HeadSpec {
            num_keywords: 4,
            ..spec
        });

        let (head, patched) = spec.build(&tensors, ShapePolicy::Patch).unwrap();
        assert_eq!(head.num_keywords(), 3);
        assert_eq!(patched.len(), 1);
        assert_eq!(patched[0].tensor, KEYWORD_FC_WEIGHT);

        // Zeroed keyword projection: keyword features no longer move the logits.
        let a = head.logits(&[0.5, 0.5], &[1.0, 0.0, 0.0]).unwrap();
        let b = head.logits(&[0.5, 0.5], &[0.0, 1.0, 1.0]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn patch_fills_missing_tensor() {
        let spec = spec();
        let mut tensors = tensors_for(&spec);
        tensors.remove(CLASSIFIER_BIAS);

        assert!(matches!(
            spec.build(&tensors, ShapePolicy::Strict),
            Err(ArtifactError::ShapeMismatch(_))
        ));

        let (_, patched) = spec.build(&tensors, ShapePolicy::Patch).unwrap();
        assert_eq!(
            patched,
            vec![ShapeMismatch {
                tensor: CLASSIFIER_BIAS.into(),
                expected: vec![3],
                actual: None,
            }]
        );
    }

    #[test]
    fn resolve_prefers_manifest_widths() {
        let tensors = tensors_for(&spec());
        let manifest = ArtifactManifest {
            hidden_size: 2,
            keyword_width: Some(48),
            fusion_width: Some(192),
            ..Default::default()
        };
        let resolved = HeadSpec::resolve(&manifest, 3, 3, &tensors).unwrap();
        assert_eq!(resolved.keyword_width, 48);
        assert_eq!(resolved.fusion_width, 192);

        // The declared widths do not match these weights.
        assert!(!resolved.check(&tensors).is_empty());
    }

    #[test]
    fn resolve_infers_widths_from_weights() {
        let tensors = tensors_for(&spec());
        let manifest = ArtifactManifest {
            hidden_size: 2,
            ..Default::default()
        };
        let resolved = HeadSpec::resolve(&manifest, 3, 3, &tensors).unwrap();
        assert_eq!(resolved, spec());
    }

    #[test]
    fn resolve_without_weights_or_manifest_fails() {
        let err = HeadSpec::resolve(&ArtifactManifest::default(), 3, 3, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, ArtifactError::MissingTensor(ref n) if n == KEYWORD_FC_WEIGHT));
    }

    #[test]
    fn policy_parses() {
        assert_eq!("strict".parse::<ShapePolicy>().unwrap(), ShapePolicy::Strict);
        assert_eq!("PATCH".parse::<ShapePolicy>().unwrap(), ShapePolicy::Patch);
        assert!("lenient".parse::<ShapePolicy>().is_err());
        assert_eq!(ShapePolicy::default(), ShapePolicy::Strict);
    }

    #[test]
    fn mismatch_display() {
        let m = ShapeMismatch {
            tensor: FC_WEIGHT.into(),
            expected: vec![192, 816],
            actual: Some(vec![128, 800]),
        };
        assert_eq!(
            m.to_string(),
            "fc.weight: expected [192, 816], found [128, 800]"
        );
    }
}
