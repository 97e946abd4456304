//! Fixed-width token encodings fed to the encoder.

/// Token ids, attention mask, and segment ids, all the same length.
///
/// The classifier head was fit on sequences of one fixed width (64 for the
/// deployed artifact); [`TokenEncoding::fit`] enforces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEncoding {
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
    token_type_ids: Vec<i64>,
}

impl TokenEncoding {
    /// Truncate or pad the three sequences to exactly `max_length` positions.
    ///
    /// Padding uses `pad_id` for ids and 0 for mask and segment ids.
    /// Missing segment ids are treated as all zero.
    pub fn fit(
        mut input_ids: Vec<i64>,
        mut attention_mask: Vec<i64>,
        mut token_type_ids: Vec<i64>,
        max_length: usize,
        pad_id: i64,
    ) -> Self {
        if attention_mask.len() < input_ids.len() {
            attention_mask.resize(input_ids.len(), 1);
        }
        input_ids.resize(max_length, pad_id);
        attention_mask.resize(max_length, 0);
        token_type_ids.resize(max_length, 0);
        Self {
            input_ids,
            attention_mask,
            token_type_ids,
        }
    }

    pub fn input_ids(&self) -> &[i64] {
        &self.input_ids
    }

    pub fn attention_mask(&self) -> &[i64] {
        &self.attention_mask
    }

    pub fn token_type_ids(&self) -> &[i64] {
        &self.token_type_ids
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of non-padding positions.
    pub fn attended(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m != 0).count()
    }
}
