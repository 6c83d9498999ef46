// Numeric trait bounds shared by every component of the crate.
// rand_distr re-exports num_traits, so the float abstractions come from there
// instead of pulling in an extra dependency.

pub use rand_distr::num_traits::{Float, One, Zero};

/// Scalar type every tensor, layer and optimizer is generic over.
///
/// Covers exactly the IEEE-754 float types; the `from_f64`/`to_f64` hooks let
/// hyperparameters and initializer samples be written once in f64 and lowered
/// to the working precision.
pub trait Real:
    ndarray::LinalgScalar
    + ndarray::ScalarOperand
    + Float
    + std::fmt::Debug
    + std::fmt::Display
    + Send
    + Sync
    + 'static
{
    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
}

impl Real for f32 {
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Real for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(self) -> f64 {
        self
    }
}
