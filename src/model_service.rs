use ndarray::Array4;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Session mutex poisoned: {0}")]
    SessionPoisoned(String),
    #[error("Failed to build input tensor: {0}")]
    Input(String),
    #[error("Inference failed: {0}")]
    Run(String),
    #[error("Failed to extract output tensor: {0}")]
    Output(String),
}

/// A loaded classification model. Implementations are shared read-only
/// between request handlers, so `scores` takes `&self`.
pub trait ModelService: Send + Sync + 'static {
    /// Number of independent model instances behind this service.
    fn instances(&self) -> usize {
        1
    }

    /// Runs a forward pass on a `[1, H, W, C]` batch and returns the score
    /// vector of the single batch element.
    fn scores(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError>;
}
