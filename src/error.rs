use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdkError {
    #[error("Animal not found: {0}")]
    AnimalNotFound(String),

    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    #[error("Factor not found: {0}")]
    FactorNotFound(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation: {0}")]
    Validation(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
}
