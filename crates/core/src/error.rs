/// Errors raised by the pure domain layer.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Input failed a structural or format check.
    #[error("Validation failed: {0}")]
    Validation(String),
}
