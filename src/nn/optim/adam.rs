// src/nn/optim/adam.rs

use ndarray::Zip;

use crate::error::Error;
use crate::nn::Parameter;
use crate::nn::optim::{Optimizer, bind_slots};
use crate::number::{One, Real};
use crate::tensor::Tensor;

/// Adam: first and second gradient moments with bias correction.
///
/// Per step `t` (counting from 1):
/// `m = b1 * m + (1 - b1) * g; v = b2 * v + (1 - b2) * g^2;`
/// `p = p - lr * (m / (1 - b1^t)) / (sqrt(v / (1 - b2^t)) + eps)`.
#[derive(Debug)]
pub struct Adam<T>
where
    T: Real,
{
    learning_rate: T,
    beta1: T,
    beta2: T,
    eps: T,
    step_count: u64,
    first_moment: Vec<Tensor<T>>,
    second_moment: Vec<Tensor<T>>,
}

impl<T> Adam<T>
where
    T: Real,
{
    pub fn new(learning_rate: T, beta1: T, beta2: T, eps: T) -> Result<Self, Error> {
        if learning_rate <= T::zero() {
            return Err(Error::config("learning rate must be positive"));
        }
        if beta1 < T::zero() || beta1 >= T::one() {
            return Err(Error::config("beta1 must lie in [0, 1)"));
        }
        if beta2 < T::zero() || beta2 >= T::one() {
            return Err(Error::config("beta2 must lie in [0, 1)"));
        }
        if eps <= T::zero() {
            return Err(Error::config("eps must be positive"));
        }
        Ok(Self {
            learning_rate,
            beta1,
            beta2,
            eps,
            step_count: 0,
            first_moment: Vec::new(),
            second_moment: Vec::new(),
        })
    }

    pub fn with_defaults(learning_rate: T) -> Result<Self, Error> {
        Self::new(
            learning_rate,
            T::from_f64(0.9),
            T::from_f64(0.999),
            T::from_f64(1e-8),
        )
    }

    /// Number of completed steps, which drives the bias correction.
    pub fn step_count(&self) -> u64 {
        self.step_count
    }
}

impl<T> Optimizer<T> for Adam<T>
where
    T: Real,
{
    fn step(&mut self, parameters: &mut [&mut Parameter<T>]) -> Result<(), Error> {
        bind_slots(&mut self.first_moment, parameters)?;
        bind_slots(&mut self.second_moment, parameters)?;

        self.step_count += 1;
        let lr = self.learning_rate;
        let (beta1, beta2) = (self.beta1, self.beta2);
        let eps = self.eps;
        // Bias correction shrinks toward 1 as the moment estimates warm up.
        let t = self.step_count as i32;
        let correction1 = T::one() - beta1.powi(t);
        let correction2 = T::one() - beta2.powi(t);

        for ((param, m), v) in parameters
            .iter_mut()
            .zip(self.first_moment.iter_mut())
            .zip(self.second_moment.iter_mut())
        {
            Zip::from(param.data.array_mut())
                .and(m.array_mut())
                .and(v.array_mut())
                .and(param.grad.array())
                .for_each(|p, m, v, &g| {
                    *m = beta1 * *m + (T::one() - beta1) * g;
                    *v = beta2 * *v + (T::one() - beta2) * g * g;
                    let m_hat = *m / correction1;
                    let v_hat = *v / correction2;
                    *p = *p - lr * m_hat / (v_hat.sqrt() + eps);
                });
        }
        Ok(())
    }

    fn reset_state(&mut self) {
        self.step_count = 0;
        self.first_moment.clear();
        self.second_moment.clear();
    }

    fn learning_rate(&self) -> T {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: T) {
        self.learning_rate = learning_rate;
    }
}
