// src/nn/layers/batchnorm.rs
// Batch normalization over the channel axis. Statistics are taken per
// channel across every other axis, so one layer serves both
// [batch, features] dense inputs and [batch, channels, h, w] feature maps.

use crate::error::Error;
use crate::nn::{Layer, Parameter};
use crate::number::Real;
use crate::tensor::Tensor;

#[derive(Debug)]
struct BatchNormCache<T>
where
    T: Real,
{
    x_hat: Tensor<T>,
    inv_std: Vec<T>,
    batch_stats: bool,
}

/// Batch normalization: per-channel standardization with a learned affine
/// map.
///
/// Training mode normalizes with the current minibatch's mean and biased
/// variance and blends them into the running statistics
/// (`running = momentum * running + (1 - momentum) * batch`). Evaluation
/// mode normalizes with the running statistics instead; a backward pass is
/// only defined after a training-mode forward.
#[derive(Debug)]
pub struct BatchNorm<T>
where
    T: Real,
{
    /// Learned per-channel scale, initialized to ones.
    pub gamma: Parameter<T>,
    /// Learned per-channel shift, initialized to zeros.
    pub beta: Parameter<T>,
    pub channels: usize,
    pub momentum: T,
    pub eps: T,
    pub running_mean: Tensor<T>,
    pub running_var: Tensor<T>,
    training: bool,
    cache: Option<BatchNormCache<T>>,
}

impl<T> BatchNorm<T>
where
    T: Real,
{
    pub fn new(channels: usize, momentum: T, eps: T) -> Result<Self, Error> {
        if channels == 0 {
            return Err(Error::config("channel count must be at least 1"));
        }
        if momentum < T::zero() || momentum >= T::one() {
            return Err(Error::config("momentum must lie in [0, 1)"));
        }
        if eps <= T::zero() {
            return Err(Error::config("eps must be positive"));
        }
        Ok(Self {
            gamma: Parameter::new_named(Tensor::filled(&[channels], T::one()), "gamma"),
            beta: Parameter::new_named(Tensor::zeros(&[channels]), "beta"),
            channels,
            momentum,
            eps,
            running_mean: Tensor::zeros(&[channels]),
            running_var: Tensor::filled(&[channels], T::one()),
            training: true,
            cache: None,
        })
    }

    pub fn with_defaults(channels: usize) -> Result<Self, Error> {
        Self::new(channels, T::from_f64(0.9), T::from_f64(1e-5))
    }

    /// Switch between minibatch statistics (training) and running
    /// statistics (evaluation).
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Restore the running statistics to their initial mean-0 / variance-1
    /// state.
    pub fn reset_running_stats(&mut self) {
        self.running_mean = Tensor::zeros(&[self.channels]);
        self.running_var = Tensor::filled(&[self.channels], T::one());
    }

    pub fn num_parameters(&self) -> usize {
        self.gamma.size() + self.beta.size()
    }

    /// `(batch, inner, n)` where `inner` is the per-channel plane size and
    /// `n` the number of elements each channel statistic is taken over.
    fn layout(&self, shape: &[usize]) -> Result<(usize, usize, usize), Error> {
        if shape.len() < 2 {
            return Err(Error::shape(format!(
                "batchnorm expects at least a [batch, channels] input, got {:?}",
                shape
            )));
        }
        if shape[1] != self.channels {
            return Err(Error::shape(format!(
                "input has {} channels, layer expects {}",
                shape[1], self.channels
            )));
        }
        let batch = shape[0];
        let inner: usize = shape[2..].iter().product();
        Ok((batch, inner, batch * inner))
    }
}

impl<T> Layer<T> for BatchNorm<T>
where
    T: Real,
{
    fn forward(&mut self, input: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let shape = input.shape();
        let (batch, inner, n) = self.layout(shape)?;
        let n_t = T::from_f64(n as f64);
        let channels = self.channels;

        let src = input.as_slice()?;
        let gamma = self.gamma.data.as_slice()?;
        let beta = self.beta.data.as_slice()?;

        let mut out = vec![T::zero(); src.len()];
        let mut x_hat = vec![T::zero(); src.len()];
        let mut inv_std = vec![T::zero(); channels];

        for c in 0..channels {
            let (mean, var) = if self.training {
                let mut sum = T::zero();
                for b in 0..batch {
                    let base = (b * channels + c) * inner;
                    for i in 0..inner {
                        sum = sum + src[base + i];
                    }
                }
                let mean = sum / n_t;

                let mut sq = T::zero();
                for b in 0..batch {
                    let base = (b * channels + c) * inner;
                    for i in 0..inner {
                        let d = src[base + i] - mean;
                        sq = sq + d * d;
                    }
                }
                // Biased variance; the same statistic is blended into the
                // running estimate.
                let var = sq / n_t;

                let m = self.momentum;
                self.running_mean
                    .set(&[c], m * self.running_mean.at(&[c]) + (T::one() - m) * mean);
                self.running_var
                    .set(&[c], m * self.running_var.at(&[c]) + (T::one() - m) * var);
                (mean, var)
            } else {
                (self.running_mean.at(&[c]), self.running_var.at(&[c]))
            };

            let scale = T::one() / (var + self.eps).sqrt();
            inv_std[c] = scale;
            for b in 0..batch {
                let base = (b * channels + c) * inner;
                for i in 0..inner {
                    let xh = (src[base + i] - mean) * scale;
                    x_hat[base + i] = xh;
                    out[base + i] = gamma[c] * xh + beta[c];
                }
            }
        }

        self.cache = Some(BatchNormCache {
            x_hat: Tensor::from_vec(x_hat, shape)?,
            inv_std,
            batch_stats: self.training,
        });
        Tensor::from_vec(out, shape)
    }

    fn backward(&mut self, grad_output: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let cache = self.cache.take().ok_or_else(|| {
            Error::state("batchnorm backward called without a cached forward pass")
        })?;
        if !cache.batch_stats {
            return Err(Error::state(
                "batchnorm backward after an evaluation-mode forward",
            ));
        }
        let shape = grad_output.shape();
        if shape != cache.x_hat.shape() {
            return Err(Error::shape(format!(
                "output gradient shape {:?} does not match forward output {:?}",
                shape,
                cache.x_hat.shape()
            )));
        }
        let (batch, inner, n) = self.layout(shape)?;
        let n_t = T::from_f64(n as f64);
        let channels = self.channels;

        let g = grad_output.as_slice()?;
        let x_hat = cache.x_hat.as_slice()?;
        let gamma = self.gamma.data.as_slice()?;

        let mut dx = vec![T::zero(); g.len()];
        let mut dgamma = vec![T::zero(); channels];
        let mut dbeta = vec![T::zero(); channels];

        for c in 0..channels {
            let mut sum_g = T::zero();
            let mut sum_g_xh = T::zero();
            for b in 0..batch {
                let base = (b * channels + c) * inner;
                for i in 0..inner {
                    sum_g = sum_g + g[base + i];
                    sum_g_xh = sum_g_xh + g[base + i] * x_hat[base + i];
                }
            }
            dgamma[c] = sum_g_xh;
            dbeta[c] = sum_g;

            // dX = gamma * inv_std / n * (n * g - sum(g) - x_hat * sum(g * x_hat)),
            // the analytic gradient through the batch mean and variance.
            let scale = gamma[c] * cache.inv_std[c] / n_t;
            for b in 0..batch {
                let base = (b * channels + c) * inner;
                for i in 0..inner {
                    let idx = base + i;
                    dx[idx] = scale * (n_t * g[idx] - sum_g - x_hat[idx] * sum_g_xh);
                }
            }
        }

        self.gamma
            .accumulate(&Tensor::from_vec(dgamma, &[channels])?)?;
        self.beta
            .accumulate(&Tensor::from_vec(dbeta, &[channels])?)?;
        Tensor::from_vec(dx, shape)
    }

    fn parameters(&self) -> Vec<&Parameter<T>> {
        vec![&self.gamma, &self.beta]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter<T>> {
        vec![&mut self.gamma, &mut self.beta]
    }

    fn name(&self) -> &str {
        "batchnorm"
    }
}
