#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} '{id}'")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("No resource available: {0}")]
    NoResource(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
