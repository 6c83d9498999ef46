// Scalar loss collaborators: pure functions over prediction/target pairs.

use crate::error::Error;
use crate::number::Real;
use crate::tensor::Tensor;

/// Scalar loss function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Loss {
    /// Mean squared error, averaged over every element.
    #[default]
    Mse,
}

impl Loss {
    /// Evaluate the loss.
    pub fn loss<T: Real>(&self, prediction: &Tensor<T>, target: &Tensor<T>) -> Result<T, Error> {
        match self {
            Loss::Mse => {
                let diff = prediction.sub(target)?;
                let n = T::from_f64(prediction.size() as f64);
                Ok(diff.mul(&diff)?.sum() / n)
            }
        }
    }

    /// Gradient of the loss with respect to the prediction.
    pub fn gradient<T: Real>(
        &self,
        prediction: &Tensor<T>,
        target: &Tensor<T>,
    ) -> Result<Tensor<T>, Error> {
        match self {
            Loss::Mse => {
                let n = T::from_f64(prediction.size() as f64);
                let scale = T::from_f64(2.0) / n;
                Ok(prediction.sub(target)?.mul_scalar(scale))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mse_value() {
        let pred = Tensor::<f64>::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[4]).unwrap();
        let target = Tensor::from_vec(vec![1.0, 1.0, 1.0, 1.0], &[4]).unwrap();
        let loss = Loss::Mse.loss(&pred, &target).unwrap();
        // (0 + 1 + 4 + 9) / 4
        assert_relative_eq!(loss, 3.5);
    }

    #[test]
    fn test_mse_gradient_matches_finite_difference() {
        let pred = Tensor::<f64>::from_vec(vec![0.3, -0.7, 1.1], &[3]).unwrap();
        let target = Tensor::from_vec(vec![0.0, 0.5, 1.0], &[3]).unwrap();
        let grad = Loss::Mse.gradient(&pred, &target).unwrap();

        let eps = 1e-6;
        for i in 0..3 {
            let mut plus = pred.clone();
            plus.set(&[i], pred.at(&[i]) + eps);
            let mut minus = pred.clone();
            minus.set(&[i], pred.at(&[i]) - eps);
            let numeric = (Loss::Mse.loss(&plus, &target).unwrap()
                - Loss::Mse.loss(&minus, &target).unwrap())
                / (2.0 * eps);
            assert_relative_eq!(grad.at(&[i]), numeric, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_mse_shape_check() {
        let pred = Tensor::<f64>::zeros(&[3]);
        let target = Tensor::zeros(&[4]);
        assert!(Loss::Mse.loss(&pred, &target).is_err());
    }
}
