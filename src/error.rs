use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("HTML rewriting error: {0}")]
    Rewrite(#[from] lol_html::errors::RewritingError),

    #[error("Invalid {set} pattern #{index} `{pattern}`: {source}")]
    InvalidPattern {
        set: &'static str,
        index: usize,
        pattern: String,
        source: regex::Error,
    },

    #[error("Empty {set} pattern #{index} would match every script")]
    EmptyPattern { set: &'static str, index: usize },

    #[error("Not UTF-8 (invalid byte at offset {valid_up_to}), documents in other charsets are left as they are")]
    NotUtf8 { valid_up_to: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("Command `{command}` exited with {status}")]
    CommandFailed { command: String, status: String },

    #[error("{0}")]
    Pipeline(String),
}
