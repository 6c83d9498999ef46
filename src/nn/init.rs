// Weight initialization strategies. Sampling happens in f64 and is lowered
// to the working precision, so f32 and f64 layers draw from the same
// distributions.

use rand::rng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::error::Error;
use crate::number::Real;
use crate::tensor::Tensor;

/// Weight initialization strategy.
///
/// `fan_in`/`fan_out` are supplied by the layer (for a convolution kernel,
/// the receptive-field sizes `in_ch * kh * kw` and `out_ch * kh * kw`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Init {
    Zeros,
    /// Uniform over `(-a, a)` with `a = sqrt(6 / (fan_in + fan_out))`.
    #[default]
    GlorotUniform,
    /// Normal with `std = sqrt(2 / (fan_in + fan_out))`.
    GlorotNormal,
    /// Uniform over `(-a, a)` with `a = sqrt(6 / fan_in)`, for ReLU stacks.
    HeUniform,
    /// Normal with `std = sqrt(2 / fan_in)`, for ReLU stacks.
    HeNormal,
}

impl Init {
    /// Draw a tensor of the given shape.
    pub fn sample<T>(
        &self,
        shape: &[usize],
        fan_in: usize,
        fan_out: usize,
    ) -> Result<Tensor<T>, Error>
    where
        T: Real,
    {
        let size: usize = shape.iter().product();
        let mut rng = rng();

        let lower = |values: Vec<f64>| -> Result<Tensor<T>, Error> {
            Tensor::from_vec(values.into_iter().map(T::from_f64).collect(), shape)
        };

        match self {
            Init::Zeros => Ok(Tensor::zeros(shape)),
            Init::GlorotUniform => {
                let a = (6.0 / (fan_in + fan_out) as f64).sqrt();
                let uniform = Uniform::new(-a, a)
                    .map_err(|e| Error::config(format!("glorot uniform bounds: {}", e)))?;
                lower((0..size).map(|_| uniform.sample(&mut rng)).collect())
            }
            Init::GlorotNormal => {
                let std = (2.0 / (fan_in + fan_out) as f64).sqrt();
                let normal = Normal::new(0.0, std)
                    .map_err(|e| Error::config(format!("glorot normal std: {}", e)))?;
                lower((0..size).map(|_| normal.sample(&mut rng)).collect())
            }
            Init::HeUniform => {
                let a = (6.0 / fan_in as f64).sqrt();
                let uniform = Uniform::new(-a, a)
                    .map_err(|e| Error::config(format!("he uniform bounds: {}", e)))?;
                lower((0..size).map(|_| uniform.sample(&mut rng)).collect())
            }
            Init::HeNormal => {
                let std = (2.0 / fan_in as f64).sqrt();
                let normal = Normal::new(0.0, std)
                    .map_err(|e| Error::config(format!("he normal std: {}", e)))?;
                lower((0..size).map(|_| normal.sample(&mut rng)).collect())
            }
        }
    }
}
