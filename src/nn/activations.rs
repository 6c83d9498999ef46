// Elementwise activation functions. A tagged variant rather than a trait
// hierarchy: each variant is a pure forward function plus its analytic
// derivative, applied elementwise over tensors.

use crate::error::Error;
use crate::nn::{Layer, Parameter};
use crate::number::{Float, One, Real, Zero};
use crate::tensor::Tensor;

/// Elementwise activation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    /// f(x) = x.
    #[default]
    Identity,
    /// f(x) = max(0, x).
    Relu,
    /// f(x) = 1 / (1 + e^-x).
    Sigmoid,
    /// f(x) = tanh(x).
    Tanh,
}

impl Activation {
    fn value<T: Real>(&self, x: T) -> T {
        match self {
            Activation::Identity => x,
            Activation::Relu => {
                if x > T::zero() {
                    x
                } else {
                    T::zero()
                }
            }
            Activation::Sigmoid => T::one() / (T::one() + (-x).exp()),
            Activation::Tanh => x.tanh(),
        }
    }

    fn derivative<T: Real>(&self, x: T) -> T {
        match self {
            Activation::Identity => T::one(),
            Activation::Relu => {
                if x > T::zero() {
                    T::one()
                } else {
                    T::zero()
                }
            }
            Activation::Sigmoid => {
                let s = self.value(x);
                s * (T::one() - s)
            }
            Activation::Tanh => {
                let t = x.tanh();
                T::one() - t * t
            }
        }
    }

    /// Apply the function elementwise.
    pub fn apply<T: Real>(&self, input: &Tensor<T>) -> Tensor<T> {
        input.map(|v| self.value(v))
    }

    /// Chain the upstream gradient through the derivative at `input`.
    pub fn gradient<T: Real>(
        &self,
        input: &Tensor<T>,
        upstream: &Tensor<T>,
    ) -> Result<Tensor<T>, Error> {
        input.map(|v| self.derivative(v)).mul(upstream)
    }
}

/// Adapter that lets an [`Activation`] participate in a layer stack with the
/// same forward/backward cache discipline as any parameterized layer.
#[derive(Debug, Clone)]
pub struct ActivationLayer<T>
where
    T: Real,
{
    activation: Activation,
    cache: Option<Tensor<T>>,
}

impl<T> ActivationLayer<T>
where
    T: Real,
{
    pub fn new(activation: Activation) -> Self {
        Self {
            activation,
            cache: None,
        }
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }
}

impl<T> Layer<T> for ActivationLayer<T>
where
    T: Real,
{
    fn forward(&mut self, input: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let output = self.activation.apply(input);
        self.cache = Some(input.clone());
        Ok(output)
    }

    fn backward(&mut self, grad_output: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let input = self.cache.take().ok_or_else(|| {
            Error::state("activation backward called without a cached forward pass")
        })?;
        self.activation.gradient(&input, grad_output)
    }

    fn parameters(&self) -> Vec<&Parameter<T>> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter<T>> {
        Vec::new()
    }

    fn name(&self) -> &str {
        match self.activation {
            Activation::Identity => "identity",
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
        }
    }
}
