pub mod encoding;
pub mod keywords;
pub mod prediction;
pub mod query;
pub mod text;

pub use encoding::TokenEncoding;
pub use keywords::{KeywordFeatures, KeywordVocabulary, MappingError, SYMPTOM_KEYWORDS};
pub use prediction::{PredictResponse, Prediction};
pub use query::{QueryError, SymptomQuery};
pub use text::{CleanedText, clean_text};
