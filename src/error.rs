use thiserror::Error;

/// Failures raised by the persistence layer.
///
/// Formula and structural problems never surface here: those degrade to
/// `#ERROR`, `0` or a silent no-op inside the workbook.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Binary encoding error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Remote store rejected request with status {0}")]
    Status(u16),

    #[error("Remote store unreachable: {0}")]
    Transport(String),

    #[error("No authenticated owner for remote operation")]
    Unauthorized,

    #[error("Snapshot for `{0}` is not a valid workbook")]
    InvalidSnapshot(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },
}

pub type StoreResult<T> = Result<T, StoreError>;
