/// Error types shared across the crate.
///
/// Every failure is raised synchronously at the call that detects it; the
/// library performs no retries and no recovery. Validation always happens
/// before any buffer is written, so a returned error never leaves a tensor,
/// layer or optimizer in a partially mutated state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A tensor or layer input/output shape mismatch.
    Shape(String),
    /// An invalid hyperparameter combination, e.g. an input smaller than the
    /// effective kernel span under valid padding, or an optimizer bound to
    /// parameters whose shapes changed between steps.
    Config(String),
    /// A call arrived in the wrong order, e.g. backward without a matching
    /// prior forward.
    State(String),
}

impl Error {
    pub fn shape(msg: impl Into<String>) -> Self {
        Error::Shape(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Error::State(msg.into())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Shape(msg) => write!(f, "shape mismatch: {}", msg),
            Error::Config(msg) => write!(f, "invalid configuration: {}", msg),
            Error::State(msg) => write!(f, "invalid call sequence: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
