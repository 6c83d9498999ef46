//! Neural network building blocks with hand-derived gradients.
//!
//! The crate is organized around three ideas:
//!
//! - [`Tensor`]: an owned, row-major n-dimensional float buffer backed by
//!   `ndarray`, the single data type every component exchanges.
//! - [`conv`]: padding/shape arithmetic and the im2col/col2im engine that
//!   lowers convolution to matrix multiplication.
//! - [`nn`]: layers implementing the forward/backward/parameters contract,
//!   plus initializers, activations, losses and gradient-descent optimizers.
//!
//! There is no differentiation graph. Every layer caches exactly the forward
//! intermediates its analytic backward pass needs, and every backward formula
//! is written out by hand. That keeps the data flow inspectable end to end:
//! a forward pass, a loss gradient, a chain of backward calls and an
//! optimizer step are all plain function calls over tensors.
//!
//! ```rust
//! use ironlearn::nn::{Init, Layer, Linear, Loss, Optimizer, Sgd};
//! use ironlearn::Tensor;
//!
//! # fn main() -> Result<(), ironlearn::Error> {
//! let mut layer = Linear::<f64>::new(2, 1, true, Init::GlorotUniform)?;
//! let mut optimizer = Sgd::with_defaults(0.1)?;
//!
//! let x = Tensor::from_vec(vec![0.5, -1.0], &[1, 2])?;
//! let target = Tensor::from_vec(vec![2.0], &[1, 1])?;
//!
//! for _ in 0..100 {
//!     layer.zero_gradients();
//!     let prediction = layer.forward(&x)?;
//!     let grad = Loss::Mse.gradient(&prediction, &target)?;
//!     layer.backward(&grad)?;
//!     optimizer.step(&mut layer.parameters_mut())?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod conv;
pub mod error;
pub mod nn;
pub mod number;
pub mod tensor;

pub use error::Error;
pub use number::Real;
pub use tensor::Tensor;
