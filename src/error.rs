use thiserror::Error;

/// Errors that can occur while building experiment shapes or execution contexts
///
/// The store itself never fails: reads that don't match a type come back as
/// `None`, and writes that don't change anything are absorbed silently.
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// A bounded range was built with its lower bound above its upper bound
    /// (or with an incomparable bound such as NaN)
    #[error("Inverted range: lower bound {low} is not <= upper bound {high}")]
    InvertedRange { low: String, high: String },
    /// The dedicated thread behind a worker context could not be started
    #[error("Failed to spawn execution context thread")]
    Spawn(#[source] std::io::Error),
}

impl ExperimentError {
    pub(crate) fn inverted<T: std::fmt::Debug>(low: &T, high: &T) -> Self {
        ExperimentError::InvertedRange {
            low: format!("{:?}", low),
            high: format!("{:?}", high),
        }
    }
}
