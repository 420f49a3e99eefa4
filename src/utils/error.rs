use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipstackError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error("Zip archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("Failed to parse {file_kind}: {message}")]
    ParseError {
        file_kind: &'static str,
        message: String,
    },

    #[error("Unsupported configuration: {message}")]
    UnsupportedConfiguration { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type Result<T> = std::result::Result<T, PipstackError>;
