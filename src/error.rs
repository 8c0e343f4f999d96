use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Invalid parallelism: {0}")]
    InvalidParallelism(String),
}

pub type Result<T> = std::result::Result<T, Error>;
