//! Artifact report for `symptomatic inspect`.
//!
//! Reads everything except the encoder session and renders a grouped card:
//! manifest, head tensors (with any shape mismatch against the labels and
//! keywords, plus tokenizer vocabulary drift), and the label/keyword spaces.

use std::fmt;

use anyhow::Context;
use symptomatic_ai::artifact::TOKENIZER_FILE;
use symptomatic_ai::{
    ArtifactDir, ArtifactManifest, HeadSpec, ShapeMismatch, ShapePolicy, SymptomTokenizer,
};

const MAX_LIST_ITEMS: usize = 10;

pub struct Report {
    pub dir: String,
    pub policy: ShapePolicy,
    /// `None` when the artifact ships no manifest and defaults apply.
    pub manifest: Option<ArtifactManifest>,
    pub tensors: Vec<(String, Vec<usize>)>,
    pub head: Option<HeadSpec>,
    pub mismatches: Vec<ShapeMismatch>,
    pub labels: Vec<String>,
    pub keywords: Vec<String>,
    pub tokenizer_vocab: Option<usize>,
}

impl Report {
    pub fn collect(dir: &ArtifactDir, policy: ShapePolicy) -> anyhow::Result<Self> {
        let manifest = dir.load_manifest()?;
        let effective = manifest.clone().unwrap_or_default();
        let labels = dir.load_labels()?;
        let keywords = dir.load_keywords()?;
        let tensors = dir.load_head_tensors()?;

        // Widths may be unresolvable when the weights are incomplete; report what exists.
        let head = HeadSpec::resolve(&effective, keywords.len(), labels.len(), &tensors).ok();
        let mut mismatches = head.map(|h| h.check(&tensors)).unwrap_or_default();

        let tokenizer_vocab = match dir.require(TOKENIZER_FILE) {
            Ok(path) => {
                let tokenizer = SymptomTokenizer::load(&path, effective.max_length)
                    .context("loading tokenizer")?;
                mismatches.extend(tokenizer.check_vocab(effective.encoder_vocab_size));
                Some(tokenizer.vocab_size())
            }
            Err(_) => None,
        };

        Ok(Self {
            dir: dir.path().display().to_string(),
            policy,
            manifest,
            tensors: tensors
                .into_iter()
                .map(|(name, t)| (name, t.shape))
                .collect(),
            head,
            mismatches,
            labels: labels.names().to_vec(),
            keywords: keywords.terms().to_vec(),
            tokenizer_vocab,
        })
    }
}

// ── Rendering ──

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} ===", self.dir)?;
        writeln!(f)?;

        let m = self.manifest.clone().unwrap_or_default();
        let source = if self.manifest.is_some() {
            "manifest.json"
        } else {
            "defaults (no manifest.json)"
        };
        writeln!(f, "Manifest")?;
        row(f, "source", source)?;
        row(f, "hidden_size", m.hidden_size)?;
        row(f, "max_length", m.max_length)?;
        row(f, "pooled_output", &m.pooled_output)?;
        row(f, "keyword_width", optional(m.keyword_width))?;
        row(f, "fusion_width", optional(m.fusion_width))?;
        row(f, "encoder_vocab_size", optional(m.encoder_vocab_size))?;
        row(f, "tokenizer_vocab_size", optional(self.tokenizer_vocab))?;
        writeln!(f)?;

        writeln!(f, "Head Tensors")?;
        for (name, shape) in &self.tensors {
            row(f, name, format!("{shape:?}"))?;
        }
        if let Some(h) = &self.head {
            row(
                f,
                "architecture",
                format!(
                    "{} -> {} | {}+{} -> {} -> {}",
                    h.num_keywords,
                    h.keyword_width,
                    h.hidden_size,
                    h.keyword_width,
                    h.fusion_width,
                    h.num_labels
                ),
            )?;
        }
        writeln!(f)?;

        writeln!(f, "Compatibility")?;
        row(f, "shape_policy", self.policy)?;
        if self.head.is_none() {
            row(f, "head", "widths unresolved (head weights incomplete)")?;
        }
        if self.mismatches.is_empty() {
            if self.head.is_some() {
                row(f, "status", "ok")?;
            }
        } else {
            let verdict = match self.policy {
                ShapePolicy::Strict => "load would fail",
                ShapePolicy::Patch => "load would patch",
            };
            let count = self.mismatches.len();
            row(f, "status", format!("{count} mismatch(es), {verdict}"))?;
            for mismatch in &self.mismatches {
                writeln!(f, "  - {mismatch}")?;
            }
        }
        writeln!(f)?;

        writeln!(f, "Labels ({})", self.labels.len())?;
        list(f, &self.labels)?;
        writeln!(f)?;

        writeln!(f, "Keywords ({})", self.keywords.len())?;
        list(f, &self.keywords)
    }
}

fn row(f: &mut fmt::Formatter<'_>, key: &str, value: impl fmt::Display) -> fmt::Result {
    writeln!(f, "  {key:<26} {value}")
}

fn optional(value: Option<usize>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn list(f: &mut fmt::Formatter<'_>, items: &[String]) -> fmt::Result {
    for (i, item) in items.iter().take(MAX_LIST_ITEMS).enumerate() {
        writeln!(f, "  {i:>4}  {item}")?;
    }
    if items.len() > MAX_LIST_ITEMS {
        writeln!(f, "  ... {} more", items.len() - MAX_LIST_ITEMS)?;
    }
    Ok(())
}
