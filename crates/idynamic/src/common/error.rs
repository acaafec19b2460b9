use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdynError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),
}

impl From<toml::de::Error> for IdynError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}
