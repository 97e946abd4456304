//! Symptom text normalisation.
//!
//! The same cleaning must run when keyword features are built for training
//! and when a request arrives, otherwise keyword and token features drift
//! from what the classifier head was fit on.

use std::fmt;

/// Text that has been through [`clean_text`].
///
/// Only contains `[a-z0-9-]` runs separated by single spaces, with no
/// leading or trailing whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CleanedText(String);

impl CleanedText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for CleanedText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CleanedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalise free text for keyword matching and tokenisation.
///
/// 1. Lowercase
/// 2. Drop every character that is not an ASCII letter, digit, `-` or whitespace
/// 3. Collapse whitespace runs to a single space
/// 4. Trim
///
/// Dropped characters do not introduce a space: `"short-ness!of"` becomes
/// `"short-nessof"`. The ASCII separators U+001C to U+001F count as
/// whitespace, as they do for a regex `\s`.
pub fn clean_text(text: &str) -> CleanedText {
    let lowered = text.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut pending_space = false;

    for ch in lowered.chars() {
        if is_space(ch) {
            pending_space = true;
        } else if ch.is_ascii_alphanumeric() || ch == '-' {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        }
    }

    CleanedText(out)
}

fn is_space(ch: char) -> bool {
    ch.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&ch)
}
