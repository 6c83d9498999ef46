// src/nn/optim/sgd.rs

use ndarray::Zip;

use crate::error::Error;
use crate::nn::Parameter;
use crate::nn::optim::{Optimizer, bind_slots};
use crate::number::Real;
use crate::tensor::Tensor;

/// Stochastic gradient descent with classical momentum.
///
/// Update rule per parameter:
/// `v = momentum * v - lr * grad; p = p + v`.
/// With `momentum = 0` this degenerates to plain gradient descent.
#[derive(Debug)]
pub struct Sgd<T>
where
    T: Real,
{
    learning_rate: T,
    momentum: T,
    velocity: Vec<Tensor<T>>,
}

impl<T> Sgd<T>
where
    T: Real,
{
    pub fn new(learning_rate: T, momentum: T) -> Result<Self, Error> {
        if learning_rate <= T::zero() {
            return Err(Error::config("learning rate must be positive"));
        }
        if momentum < T::zero() || momentum >= T::one() {
            return Err(Error::config("momentum must lie in [0, 1)"));
        }
        Ok(Self {
            learning_rate,
            momentum,
            velocity: Vec::new(),
        })
    }

    /// Momentum-free gradient descent.
    pub fn with_defaults(learning_rate: T) -> Result<Self, Error> {
        Self::new(learning_rate, T::zero())
    }

    pub fn momentum(&self) -> T {
        self.momentum
    }
}

impl<T> Optimizer<T> for Sgd<T>
where
    T: Real,
{
    fn step(&mut self, parameters: &mut [&mut Parameter<T>]) -> Result<(), Error> {
        bind_slots(&mut self.velocity, parameters)?;
        let lr = self.learning_rate;
        let momentum = self.momentum;

        for (velocity, param) in self.velocity.iter_mut().zip(parameters.iter_mut()) {
            Zip::from(velocity.array_mut())
                .and(param.grad.array())
                .for_each(|v, &g| *v = momentum * *v - lr * g);
            Zip::from(param.data.array_mut())
                .and(velocity.array())
                .for_each(|p, &v| *p = *p + v);
        }
        Ok(())
    }

    fn reset_state(&mut self) {
        self.velocity.clear();
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
    fn test_zero_momentum_is_plain_gradient_descent() {
        let mut param = Parameter::new(Tensor::<f64>::filled(&[2], 1.0));
        param.accumulate(&Tensor::filled(&[2], 0.5)).unwrap();

        let mut opt = Sgd::with_defaults(0.1).unwrap();
        let mut params = [&mut param];
        opt.step(&mut params).unwrap();

        assert_relative_eq!(param.data.at(&[0]), 0.95);
        assert_relative_eq!(param.data.at(&[1]), 0.95);
    }

    #[test]
    fn test_momentum_accumulates_velocity() {
        let mut param = Parameter::new(Tensor::<f64>::zeros(&[1]));
        let mut opt = Sgd::new(0.1, 0.9).unwrap();

        // Constant gradient of 1 for two steps.
        param.accumulate(&Tensor::filled(&[1], 1.0)).unwrap();
        let mut params = [&mut param];
        opt.step(&mut params).unwrap();
        // v1 = -0.1; p = -0.1.
        assert_relative_eq!(param.data.at(&[0]), -0.1);

        param.zero_grad();
        param.accumulate(&Tensor::filled(&[1], 1.0)).unwrap();
        let mut params = [&mut param];
        opt.step(&mut params).unwrap();
        // v2 = 0.9 * -0.1 - 0.1 = -0.19; p = -0.29.
        assert_relative_eq!(param.data.at(&[0]), -0.29);
    }

    #[test]
    fn test_reset_state_forgets_velocity() {
        let mut param = Parameter::new(Tensor::<f64>::zeros(&[1]));
        let mut opt = Sgd::new(0.1, 0.9).unwrap();

        param.accumulate(&Tensor::filled(&[1], 1.0)).unwrap();
        let mut params = [&mut param];
        opt.step(&mut params).unwrap();
        opt.reset_state();

        param.zero_grad();
        param.accumulate(&Tensor::filled(&[1], 1.0)).unwrap();
        let mut params = [&mut param];
        opt.step(&mut params).unwrap();
        // Velocity restarted, so the second step matches the first.
        assert_relative_eq!(param.data.at(&[0]), -0.2);
    }

    #[test]
    fn test_rejects_bad_hyperparameters() {
        assert!(matches!(Sgd::new(0.0, 0.0), Err(Error::Config(_))));
        assert!(matches!(Sgd::new(0.1, 1.0), Err(Error::Config(_))));
        assert!(matches!(Sgd::new(0.1, -0.1), Err(Error::Config(_))));
    }
}
