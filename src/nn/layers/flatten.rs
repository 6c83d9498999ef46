// src/nn/layers/flatten.rs

use crate::error::Error;
use crate::nn::{Layer, Parameter};
use crate::number::Real;
use crate::tensor::Tensor;

/// Collapses every axis after the batch axis, turning `[batch, d1, .., dn]`
/// into `[batch, d1 * .. * dn]`. The bridge between convolutional feature
/// maps and fully connected layers.
#[derive(Debug, Default)]
pub struct Flatten {
    cache: Option<Vec<usize>>,
}

impl Flatten {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> Layer<T> for Flatten
where
    T: Real,
{
    fn forward(&mut self, input: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let shape = input.shape();
        if shape.is_empty() {
            return Err(Error::shape("cannot flatten a scalar tensor"));
        }
        let batch = shape[0];
        let rest: usize = shape[1..].iter().product();
        let output = input.reshape(&[batch, rest])?;
        self.cache = Some(shape.to_vec());
        Ok(output)
    }

    fn backward(&mut self, grad_output: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let shape = self.cache.take().ok_or_else(|| {
            Error::state("flatten backward called without a cached forward pass")
        })?;
        let rest: usize = shape[1..].iter().product();
        if grad_output.shape() != [shape[0], rest] {
            return Err(Error::shape(format!(
                "output gradient shape {:?} does not match [{}, {}]",
                grad_output.shape(),
                shape[0],
                rest
            )));
        }
        grad_output.reshape(&shape)
    }

    fn parameters(&self) -> Vec<&Parameter<T>> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter<T>> {
        Vec::new()
    }

    fn name(&self) -> &str {
        "flatten"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_restores_shape() {
        let mut layer = Flatten::new();
        let input = Tensor::<f64>::from_vec((0..24).map(|v| v as f64).collect(), &[2, 3, 2, 2])
            .unwrap();
        let flat = layer.forward(&input).unwrap();
        assert_eq!(flat.shape(), &[2, 12]);
        // Row-major order is preserved.
        assert_eq!(flat.at(&[0, 5]), 5.0);

        let restored = layer.backward(&flat).unwrap();
        assert_eq!(restored, input);
    }

    #[test]
    fn test_backward_requires_forward() {
        let mut layer = Flatten::new();
        let grad = Tensor::<f64>::zeros(&[2, 12]);
        assert!(matches!(layer.backward(&grad), Err(Error::State(_))));
    }

    #[test]
    fn test_backward_validates_shape() {
        let mut layer = Flatten::new();
        let input = Tensor::<f64>::zeros(&[2, 3, 4]);
        layer.forward(&input).unwrap();
        let wrong = Tensor::<f64>::zeros(&[2, 13]);
        assert!(matches!(layer.backward(&wrong), Err(Error::Shape(_))));
    }
}
