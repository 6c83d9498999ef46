// Neural network building blocks: the layer contract, parameters,
// initializers, activation/loss collaborators, concrete layers and the
// optimizer engine. Every gradient is hand-derived; there is no
// differentiation graph behind these modules.

pub mod activations;
pub mod init;
pub mod layers;
pub mod losses;
pub mod optim;
pub mod parameter;

pub use activations::{Activation, ActivationLayer};
pub use init::Init;
pub use layers::{BatchNorm, Conv1d, Conv2d, Deconv2d, Flatten, Linear, Pool2d, PoolMode};
pub use losses::Loss;
pub use optim::{AdaGrad, Adam, Optimizer, RmsProp, Sgd};
pub use parameter::Parameter;

use crate::error::Error;
use crate::number::Real;
use crate::tensor::Tensor;

/// The capability set every layer implements.
///
/// A layer owns its parameters, their gradient accumulators and a cache of
/// forward-pass intermediates. `forward` writes the cache, `backward`
/// consumes it: calling `backward` without a prior `forward`, or twice
/// without an intervening `forward`, fails with [`Error::State`] instead of
/// silently producing stale gradients.
pub trait Layer<T>
where
    T: Real,
{
    /// Compute the layer output. Does not mutate the caller's input tensor;
    /// the only caller-invisible effect is writing the internal cache.
    fn forward(&mut self, input: &Tensor<T>) -> Result<Tensor<T>, Error>;

    /// Consume the most recent forward cache, accumulate parameter gradients
    /// and return the gradient with respect to the input.
    fn backward(&mut self, grad_output: &Tensor<T>) -> Result<Tensor<T>, Error>;

    /// Stable, ordered list of learnable parameters. Parameter-free layers
    /// return an empty list.
    fn parameters(&self) -> Vec<&Parameter<T>> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter<T>> {
        Vec::new()
    }

    /// Reset all gradient accumulators. Call once per minibatch, before the
    /// backward passes whose gradients should sum together.
    fn zero_gradients(&mut self) {
        for param in self.parameters_mut() {
            param.zero_grad();
        }
    }

    fn name(&self) -> &str;
}
