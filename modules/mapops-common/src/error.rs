use thiserror::Error;

#[derive(Error, Debug)]
pub enum MapOpsError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Evaluation timed out: {0}")]
    EvaluationTimeout(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
