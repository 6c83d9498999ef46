// src/nn/optim/adagrad.rs

use ndarray::Zip;

use crate::error::Error;
use crate::nn::Parameter;
use crate::nn::optim::{Optimizer, bind_slots};
use crate::number::Real;
use crate::tensor::Tensor;

/// AdaGrad: per-coordinate learning rates from the running sum of squared
/// gradients.
///
/// `a = a + grad^2; p = p - lr * grad / (sqrt(a) + eps)`.
/// The accumulator only grows, so effective step sizes decay monotonically.
#[derive(Debug)]
pub struct AdaGrad<T>
where
    T: Real,
{
    learning_rate: T,
    eps: T,
    accumulator: Vec<Tensor<T>>,
}

impl<T> AdaGrad<T>
where
    T: Real,
{
    pub fn new(learning_rate: T, eps: T) -> Result<Self, Error> {
        if learning_rate <= T::zero() {
            return Err(Error::config("learning rate must be positive"));
        }
        if eps <= T::zero() {
            return Err(Error::config("eps must be positive"));
        }
        Ok(Self {
            learning_rate,
            eps,
            accumulator: Vec::new(),
        })
    }

    pub fn with_defaults(learning_rate: T) -> Result<Self, Error> {
        Self::new(learning_rate, T::from_f64(1e-7))
    }
}

impl<T> Optimizer<T> for AdaGrad<T>
where
    T: Real,
{
    fn step(&mut self, parameters: &mut [&mut Parameter<T>]) -> Result<(), Error> {
        bind_slots(&mut self.accumulator, parameters)?;
        let lr = self.learning_rate;
        let eps = self.eps;

        for (accumulator, param) in self.accumulator.iter_mut().zip(parameters.iter_mut()) {
            Zip::from(param.data.array_mut())
                .and(accumulator.array_mut())
                .and(param.grad.array())
                .for_each(|p, a, &g| {
                    *a = *a + g * g;
                    *p = *p - lr * g / (a.sqrt() + eps);
                });
        }
        Ok(())
    }

    fn reset_state(&mut self) {
        self.accumulator.clear();
    }

    fn learning_rate(&self) -> T {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: T) {
        self.learning_rate = learning_rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_step_normalizes_gradient() {
        let mut param = Parameter::new(Tensor::<f64>::zeros(&[1]));
        param.accumulate(&Tensor::filled(&[1], 2.0)).unwrap();

        let mut opt = AdaGrad::with_defaults(1.0).unwrap();
        let mut params = [&mut param];
        opt.step(&mut params).unwrap();

        // a = 4, update = -2 / (2 + eps).
        assert_relative_eq!(param.data.at(&[0]), -1.0, max_relative = 1e-6);
    }

    #[test]
    fn test_step_sizes_shrink_with_history() {
        let mut param = Parameter::new(Tensor::<f64>::zeros(&[1]));
        let mut opt = AdaGrad::with_defaults(0.5).unwrap();

        let mut previous = 0.0;
        let mut last_step = f64::INFINITY;
        for _ in 0..4 {
            param.zero_grad();
            param.accumulate(&Tensor::filled(&[1], 1.0)).unwrap();
            let mut params = [&mut param];
            opt.step(&mut params).unwrap();

            let step = (param.data.at(&[0]) - previous).abs();
            assert!(step < last_step);
            previous = param.data.at(&[0]);
            last_step = step;
        }
    }

    #[test]
    fn test_rejects_bad_hyperparameters() {
        assert!(matches!(AdaGrad::new(-0.1, 1e-7), Err(Error::Config(_))));
        assert!(matches!(AdaGrad::new(0.1, 0.0), Err(Error::Config(_))));
    }
}
