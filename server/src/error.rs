use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("packet codec error: {0}")]
    Codec(#[from] bincode::Error),
}
