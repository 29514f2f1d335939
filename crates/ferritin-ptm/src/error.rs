use thiserror::Error;

pub type Result<T> = std::result::Result<T, PtmError>;

#[derive(Debug, Error)]
pub enum PtmError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("malformed data in {source_name}: {message}")]
    DataFormat {
        source_name: String,
        message: String,
    },

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("label `{0}` is not in the label set")]
    UnknownLabel(String),

    #[error("dataset `{0}` has no records")]
    EmptyDataset(String),

    #[error("dataset `{0}` has not been encoded")]
    NotEncoded(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Pretrained(#[from] anyhow::Error),
}

impl PtmError {
    pub fn data_format(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        PtmError::DataFormat {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}
