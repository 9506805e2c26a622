use thiserror::Error;

pub type SealResult<T> = Result<T, SealError>;

#[derive(Debug, Error)]
pub enum SealError {
    #[error("config error: {0}")]
    Config(String),

    #[error("verification error: {0}")]
    Verification(String),

    #[error("notification error: {0}")]
    Notify(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
