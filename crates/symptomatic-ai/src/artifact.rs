//! On-disk artifact directory: file layout and the JSON/safetensors readers.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use symptomatic_core::KeywordVocabulary;
use tracing::{debug, info};

use crate::error::ArtifactError;
use crate::head::FusionHead;
use crate::labels::LabelSpace;
use crate::manifest::ArtifactManifest;
use crate::weights::{HeadSpec, RawTensor, ShapeMismatch, ShapePolicy, read_tensors};

pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const ENCODER_FILE: &str = "encoder.onnx";
pub const HEAD_FILE: &str = "head.safetensors";
pub const LABELS_FILE: &str = "labels.json";
pub const KEYWORDS_FILE: &str = "keywords.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// `keywords.json` is normally a `{"term": index}` map; an ordered array is
/// accepted as well.
#[derive(Deserialize)]
#[serde(untagged)]
enum KeywordFile {
    Map(HashMap<String, usize>),
    List(Vec<String>),
}

/// A directory holding one trained classifier artifact.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    root: PathBuf,
}

impl ArtifactDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Path of `name` inside the directory, or `Missing` if it does not exist.
    pub fn require(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        let path = self.root.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ArtifactError::Missing(path))
        }
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.require(name)?;
        std::fs::read(&path).map_err(|source| ArtifactError::Io { path, source })
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T, ArtifactError> {
        let bytes = self.read(name)?;
        serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Json {
            path: self.root.join(name),
            source,
        })
    }

    /// `manifest.json`, if the artifact ships one.
    pub fn load_manifest(&self) -> Result<Option<ArtifactManifest>, ArtifactError> {
        if !self.root.join(MANIFEST_FILE).is_file() {
            debug!(dir = %self.root.display(), "no manifest, using defaults");
            return Ok(None);
        }
        self.read_json(MANIFEST_FILE).map(Some)
    }

    pub fn load_labels(&self) -> Result<LabelSpace, ArtifactError> {
        let names: Vec<String> = self.read_json(LABELS_FILE)?;
        LabelSpace::from_names(names).map_err(|source| ArtifactError::InvalidMapping {
            file: LABELS_FILE,
            source,
        })
    }

    pub fn load_keywords(&self) -> Result<KeywordVocabulary, ArtifactError> {
        let vocabulary = match self.read_json(KEYWORDS_FILE)? {
            KeywordFile::Map(map) => KeywordVocabulary::from_index_map(&map),
            KeywordFile::List(terms) => KeywordVocabulary::from_terms(terms),
        };
        vocabulary.map_err(|source| ArtifactError::InvalidMapping {
            file: KEYWORDS_FILE,
            source,
        })
    }

    pub fn load_head_tensors(&self) -> Result<BTreeMap<String, RawTensor>, ArtifactError> {
        read_tensors(&self.read(HEAD_FILE)?)
    }
}

/// Everything in an artifact except the encoder: labels, keywords, and the
/// classifier head built from them.
#[derive(Debug, Clone)]
pub struct HeadArtifact {
    pub manifest: ArtifactManifest,
    pub labels: LabelSpace,
    pub keywords: KeywordVocabulary,
    pub head: FusionHead,
    /// Tensors replaced with zeros under [`ShapePolicy::Patch`].
    pub patched: Vec<ShapeMismatch>,
}

impl HeadArtifact {
    /// Load labels, keywords, and head weights, sizing the head from them.
    pub fn load(
        dir: &ArtifactDir,
        manifest: ArtifactManifest,
        policy: ShapePolicy,
    ) -> Result<Self, ArtifactError> {
        let labels = dir.load_labels()?;
        let keywords = dir.load_keywords()?;
        let tensors = dir.load_head_tensors()?;

        let spec = HeadSpec::resolve(&manifest, keywords.len(), labels.len(), &tensors)?;
        let (head, patched) = spec.build(&tensors, policy)?;

        info!(
            labels = labels.len(),
            keywords = keywords.len(),
            keyword_width = spec.keyword_width,
            fusion_width = spec.fusion_width,
            patched = patched.len(),
            "loaded classifier head"
        );

        Ok(Self {
            manifest,
            labels,
            keywords,
            head,
            patched,
        })
    }
}
