use shared::error::ApiException;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed data: {0}")]
    Data(String),
    #[error("persistence error for key '{key}': {source}")]
    Persistence { key: String, source: anyhow::Error },
    #[error("server rejected request: {0}")]
    Api(#[from] ApiException),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
