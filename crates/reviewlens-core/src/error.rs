use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("batch budget must be positive")]
    ZeroBudget,

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}
