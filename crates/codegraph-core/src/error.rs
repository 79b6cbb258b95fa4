//! Error types for the parsing engine and content-hash cache.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("unsupported language for file: {0}")]
    UnsupportedLanguage(String),

    #[error("tree-sitter failed to set language: {0}")]
    LanguageSetup(String),

    #[error("tree-sitter failed to parse file: {0}")]
    ParseFailed(String),

    #[error("failed to compile tree-sitter query for {language}: {message}")]
    QueryCompile { language: String, message: String },

    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ParserError>;
