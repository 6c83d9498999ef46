// src/nn/optim/rmsprop.rs

use ndarray::Zip;

use crate::error::Error;
use crate::nn::Parameter;
use crate::nn::optim::{Optimizer, bind_slots};
use crate::number::{One, Real};
use crate::tensor::Tensor;

/// RMSProp: AdaGrad with an exponentially decaying accumulator, so old
/// gradients stop dominating the per-coordinate scale.
///
/// `c = decay * c + (1 - decay) * grad^2; p = p - lr * grad / (sqrt(c) + eps)`.
#[derive(Debug)]
pub struct RmsProp<T>
where
    T: Real,
{
    learning_rate: T,
    decay: T,
    eps: T,
    cache: Vec<Tensor<T>>,
}

impl<T> RmsProp<T>
where
    T: Real,
{
    pub fn new(learning_rate: T, decay: T, eps: T) -> Result<Self, Error> {
        if learning_rate <= T::zero() {
            return Err(Error::config("learning rate must be positive"));
        }
        if decay < T::zero() || decay >= T::one() {
            return Err(Error::config("decay must lie in [0, 1)"));
        }
        if eps <= T::zero() {
            return Err(Error::config("eps must be positive"));
        }
        Ok(Self {
            learning_rate,
            decay,
            eps,
            cache: Vec::new(),
        })
    }

    pub fn with_defaults(learning_rate: T) -> Result<Self, Error> {
        Self::new(learning_rate, T::from_f64(0.9), T::from_f64(1e-7))
    }

    pub fn decay(&self) -> T {
        self.decay
    }
}

impl<T> Optimizer<T> for RmsProp<T>
where
    T: Real,
{
    fn step(&mut self, parameters: &mut [&mut Parameter<T>]) -> Result<(), Error> {
        bind_slots(&mut self.cache, parameters)?;
        let lr = self.learning_rate;
        let decay = self.decay;
        let eps = self.eps;

        for (cache, param) in self.cache.iter_mut().zip(parameters.iter_mut()) {
            Zip::from(param.data.array_mut())
                .and(cache.array_mut())
                .and(param.grad.array())
                .for_each(|p, c, &g| {
                    *c = decay * *c + (T::one() - decay) * g * g;
                    *p = *p - lr * g / (c.sqrt() + eps);
                });
        }
        Ok(())
    }

    fn reset_state(&mut self) {
        self.cache.clear();
    }

    fn learning_rate(&self) -> T {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: T) {
        self.learning_rate = learning_rate;
    }
}
