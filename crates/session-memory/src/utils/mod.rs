//! Utilities module - text processing and keyword extraction

pub mod keywords;
pub mod text_utils;

pub use keywords::KeywordExtractor;
pub use text_utils::TextUtils;
