use thiserror::Error;

use crate::classifier::ClassifyError;

#[derive(Debug, Error)]
pub enum SieveError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifyError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
