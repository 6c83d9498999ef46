use ndarray::Zip;

use crate::error::Error;
use crate::number::{Real, Zero};
use crate::tensor::Tensor;

/// A learnable tensor paired with its gradient accumulator.
///
/// The gradient buffer always has the same shape as the data buffer and is
/// exclusively owned by the layer holding the parameter. Backward passes
/// accumulate into it; `zero_grad` resets it once per minibatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter<T>
where
    T: Real,
{
    /// The learnable values.
    pub data: Tensor<T>,
    /// Accumulated gradient, same shape as `data`.
    pub grad: Tensor<T>,
    /// Optional name for debugging.
    pub name: Option<String>,
}

impl<T> Parameter<T>
where
    T: Real,
{
    pub fn new(data: Tensor<T>) -> Self {
        let grad = Tensor::zeros(data.shape());
        Self {
            data,
            grad,
            name: None,
        }
    }

    pub fn new_named(data: Tensor<T>, name: impl Into<String>) -> Self {
        let mut param = Self::new(data);
        param.name = Some(name.into());
        param
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn size(&self) -> usize {
        self.data.size()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Reset the gradient accumulator to zero.
    pub fn zero_grad(&mut self) {
        self.grad.array_mut().fill(T::zero());
    }

    /// Add `delta` into the gradient accumulator.
    ///
    /// Accumulation rather than overwrite is what makes summed gradients
    /// across repeated backward calls (weight sharing) come out right.
    pub fn accumulate(&mut self, delta: &Tensor<T>) -> Result<(), Error> {
        if delta.shape() != self.data.shape() {
            return Err(Error::shape(format!(
                "gradient shape {:?} does not match parameter shape {:?}",
                delta.shape(),
                self.data.shape()
            )));
        }
        Zip::from(self.grad.array_mut())
            .and(delta.array())
            .for_each(|g, &d| *g = *g + d);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grad_matches_data_shape() {
        let param = Parameter::new(Tensor::<f64>::filled(&[2, 3], 1.0));
        assert_eq!(param.grad.shape(), &[2, 3]);
        assert_eq!(param.grad.sum(), 0.0);
    }

    #[test]
    fn test_accumulate_sums_contributions() {
        let mut param = Parameter::new(Tensor::<f64>::zeros(&[2]));
        let delta = Tensor::from_vec(vec![1.0, 2.0], &[2]).unwrap();
        param.accumulate(&delta).unwrap();
        param.accumulate(&delta).unwrap();
        assert_eq!(param.grad.at(&[0]), 2.0);
        assert_eq!(param.grad.at(&[1]), 4.0);

        param.zero_grad();
        assert_eq!(param.grad.sum(), 0.0);
    }

    #[test]
    fn test_accumulate_rejects_shape_mismatch() {
        let mut param = Parameter::new(Tensor::<f64>::zeros(&[2]));
        let delta = Tensor::zeros(&[3]);
        assert!(matches!(param.accumulate(&delta), Err(Error::Shape(_))));
    }
}
