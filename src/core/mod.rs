pub mod documents;
pub mod llm;
pub mod prompt;
