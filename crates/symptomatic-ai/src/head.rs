//! Keyword-fusion classification head.
//!
//! Sits on top of the encoder's pooled output:
//!
//! ```text
//! keywords ─ keyword_fc ─ relu ─┐
//!                               ├─ concat ─ fc ─ relu ─ classifier ─ softmax
//! pooled ───────────────────────┘
//! ```
//!
//! Dropout between `fc` and `classifier` only exists at training time and is
//! the identity here.

use crate::error::{ArtifactError, InferenceError};

/// Dense layer in PyTorch `nn.Linear` layout: `weight` is `[out, in]`, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    name: &'static str,
    weight: Vec<f32>,
    bias: Vec<f32>,
    in_dim: usize,
    out_dim: usize,
}

impl Linear {
    pub fn new(
        name: &'static str,
        weight: Vec<f32>,
        bias: Vec<f32>,
        out_dim: usize,
        in_dim: usize,
    ) -> Result<Self, ArtifactError> {
        if weight.len() != out_dim * in_dim {
            return Err(ArtifactError::Layer {
                layer: name,
                detail: format!(
                    "weight has {} values, expected {out_dim}x{in_dim}",
                    weight.len()
                ),
            });
        }
        if bias.len() != out_dim {
            return Err(ArtifactError::Layer {
                layer: name,
                detail: format!("bias has {} values, expected {out_dim}", bias.len()),
            });
        }
        Ok(Self {
            name,
            weight,
            bias,
            in_dim,
            out_dim,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// `weight · x + bias`.
    pub fn forward(&self, x: &[f32]) -> Result<Vec<f32>, InferenceError> {
        if x.len() != self.in_dim {
            return Err(InferenceError::Shape {
                layer: self.name,
                expected: self.in_dim,
                actual: x.len(),
            });
        }
        Ok(self
            .weight
            .chunks_exact(self.in_dim)
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>() + b)
            .collect())
    }
}

/// The three trainable layers behind the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionHead {
    keyword_fc: Linear,
    fc: Linear,
    classifier: Linear,
}

/// Softmax distribution over the label space.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    probs: Vec<f32>,
}

impl Distribution {
    pub fn from_logits(logits: &[f32]) -> Self {
        Self {
            probs: softmax(logits),
        }
    }

    pub fn probs(&self) -> &[f32] {
        &self.probs
    }

    /// Most probable label index and its probability mass.
    pub fn top(&self) -> Option<(usize, f32)> {
        argmax(&self.probs)
    }
}

impl FusionHead {
    /// Chain three layers, checking that their widths line up.
    pub fn new(keyword_fc: Linear, fc: Linear, classifier: Linear) -> Result<Self, ArtifactError> {
        if fc.in_dim() <= keyword_fc.out_dim() {
            return Err(ArtifactError::Layer {
                layer: fc.name(),
                detail: format!(
                    "input width {} leaves no room for the pooled output next to {} keyword features",
                    fc.in_dim(),
                    keyword_fc.out_dim()
                ),
            });
        }
        if classifier.in_dim() != fc.out_dim() {
            return Err(ArtifactError::Layer {
                layer: classifier.name(),
                detail: format!(
                    "input width {} does not match fc output width {}",
                    classifier.in_dim(),
                    fc.out_dim()
                ),
            });
        }
        Ok(Self {
            keyword_fc,
            fc,
            classifier,
        })
    }

    /// Width of the pooled encoder output this head consumes.
    pub fn hidden_size(&self) -> usize {
        self.fc.in_dim() - self.keyword_fc.out_dim()
    }

    pub fn num_keywords(&self) -> usize {
        self.keyword_fc.in_dim()
    }

    pub fn keyword_width(&self) -> usize {
        self.keyword_fc.out_dim()
    }

    pub fn fusion_width(&self) -> usize {
        self.fc.out_dim()
    }

    pub fn num_labels(&self) -> usize {
        self.classifier.out_dim()
    }

    /// Unnormalised per-label scores.
    pub fn logits(&self, pooled: &[f32], keywords: &[f32]) -> Result<Vec<f32>, InferenceError> {
        if pooled.len() != self.hidden_size() {
            return Err(InferenceError::Shape {
                layer: "pooled",
                expected: self.hidden_size(),
                actual: pooled.len(),
            });
        }

        let mut kw = self.keyword_fc.forward(keywords)?;
        relu(&mut kw);

        let mut fused = Vec::with_capacity(pooled.len() + kw.len());
        fused.extend_from_slice(pooled);
        fused.extend_from_slice(&kw);

        let mut hidden = self.fc.forward(&fused)?;
        relu(&mut hidden);

        self.classifier.forward(&hidden)
    }

    pub fn predict(
        &self,
        pooled: &[f32],
        keywords: &[f32],
    ) -> Result<Distribution, InferenceError> {
        let logits = self.logits(pooled, keywords)?;
        Ok(Distribution::from_logits(&logits))
    }
}

fn relu(v: &mut [f32]) {
    for x in v.iter_mut() {
        *x = x.max(0.0);
    }
}

/// Numerically stable softmax (max-subtracted).
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index and value of the largest element. The first one wins on ties; NaN never wins.
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best
}
