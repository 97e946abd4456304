//! Fixtures shared by unit tests: in-memory safetensors and artifact directories.

use std::collections::HashMap;
use std::path::Path;

use safetensors::Dtype;
use safetensors::tensor::TensorView;

use crate::weights::HeadSpec;

pub(crate) type NamedTensor = (String, Vec<usize>, Vec<f32>);

/// Deterministic non-zero weights for every tensor `spec` requires.
pub(crate) fn head_tensors(spec: &HeadSpec) -> Vec<NamedTensor> {
    spec.expected_shapes()
        .into_iter()
        .map(|(name, shape)| {
            let n: usize = shape.iter().product();
            let data = (0..n).map(|i| ((i % 7) as f32 - 3.0) * 0.1).collect();
            (name.to_string(), shape, data)
        })
        .collect()
}

pub(crate) fn safetensors_bytes(tensors: &[NamedTensor]) -> Vec<u8> {
    let raw: Vec<(String, Vec<usize>, Vec<u8>)> = tensors
        .iter()
        .map(|(name, shape, data)| {
            let bytes = data.iter().flat_map(|v| v.to_le_bytes()).collect();
            (name.clone(), shape.clone(), bytes)
        })
        .collect();
    let views: HashMap<String, TensorView<'_>> = raw
        .iter()
        .map(|(name, shape, bytes)| {
            let view = TensorView::new(Dtype::F32, shape.clone(), bytes).unwrap();
            (name.clone(), view)
        })
        .collect();
    safetensors::serialize(views, &None).unwrap()
}

pub(crate) fn safetensors_i64(name: &str, values: &[i64]) -> Vec<u8> {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    let view = TensorView::new(Dtype::I64, vec![values.len()], &bytes).unwrap();
    let views: HashMap<String, TensorView<'_>> = HashMap::from([(name.to_string(), view)]);
    safetensors::serialize(views, &None).unwrap()
}

/// Write labels, keywords, and head weights for `spec` into `dir`.
pub(crate) fn write_head_artifact(dir: &Path, spec: &HeadSpec, keywords: &[&str]) {
    assert_eq!(keywords.len(), spec.num_keywords);
    let labels: Vec<String> = (0..spec.num_labels).map(|i| format!("Disease {i}")).collect();
    std::fs::write(
        dir.join(crate::artifact::LABELS_FILE),
        serde_json::to_vec(&labels).unwrap(),
    )
    .unwrap();
    let keyword_map: HashMap<&str, usize> =
        keywords.iter().enumerate().map(|(i, k)| (*k, i)).collect();
    std::fs::write(
        dir.join(crate::artifact::KEYWORDS_FILE),
        serde_json::to_vec(&keyword_map).unwrap(),
    )
    .unwrap();
    std::fs::write(
        dir.join(crate::artifact::HEAD_FILE),
        safetensors_bytes(&head_tensors(spec)),
    )
    .unwrap();
}
