//! Built-in extractors

mod keyword;
mod rule;
mod scripted;

pub use keyword::KeywordExtractor;
pub use rule::RuleExtractor;
pub use scripted::StaticExtractor;
