// src/nn/optim/mod.rs
// Gradient-descent optimizers. Each keeps per-parameter state tensors in
// slots bound lazily on the first step, indexed by parameter position, so a
// layer stack can hand the same parameter list to `step` every iteration.

pub mod adagrad;
pub mod adam;
pub mod rmsprop;
pub mod sgd;

pub use adagrad::AdaGrad;
pub use adam::Adam;
pub use rmsprop::RmsProp;
pub use sgd::Sgd;

use crate::error::Error;
use crate::nn::Parameter;
use crate::number::Real;
use crate::tensor::Tensor;

/// Gradient-descent update rule.
///
/// `step` consumes the gradients currently accumulated on the parameters; it
/// does not clear them. Callers zero gradients between iterations.
pub trait Optimizer<T>
where
    T: Real,
{
    /// Apply one update to every parameter, in place.
    fn step(&mut self, parameters: &mut [&mut Parameter<T>]) -> Result<(), Error>;

    /// Forget all accumulated state; the next step starts fresh.
    fn reset_state(&mut self);

    fn learning_rate(&self) -> T;

    fn set_learning_rate(&mut self, learning_rate: T);
}

/// Bind one zero-initialized state tensor per parameter on the first step;
/// afterwards verify the parameter list still matches the bound slots.
pub(crate) fn bind_slots<T>(
    slots: &mut Vec<Tensor<T>>,
    parameters: &[&mut Parameter<T>],
) -> Result<(), Error>
where
    T: Real,
{
    if slots.is_empty() {
        slots.extend(parameters.iter().map(|p| Tensor::zeros(p.shape())));
        return Ok(());
    }
    if slots.len() != parameters.len() {
        return Err(Error::config(format!(
            "optimizer was bound to {} parameters but received {}",
            slots.len(),
            parameters.len()
        )));
    }
    for (i, (slot, param)) in slots.iter().zip(parameters.iter()).enumerate() {
        if slot.shape() != param.shape() {
            return Err(Error::config(format!(
                "parameter {} changed shape from {:?} to {:?} since binding",
                i,
                slot.shape(),
                param.shape()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_slots_detects_parameter_changes() {
        let mut a = Parameter::new(Tensor::<f64>::zeros(&[2, 2]));
        let mut b = Parameter::new(Tensor::<f64>::zeros(&[3]));
        let mut slots = Vec::new();

        {
            let params = [&mut a, &mut b];
            bind_slots(&mut slots, &params).unwrap();
        }
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[1].shape(), &[3]);

        // Fewer parameters than bound slots.
        let params = [&mut a];
        assert!(matches!(
            bind_slots(&mut slots, &params),
            Err(Error::Config(_))
        ));

        // Same count, different shape.
        let mut c = Parameter::new(Tensor::<f64>::zeros(&[4]));
        let params = [&mut a, &mut c];
        assert!(matches!(
            bind_slots(&mut slots, &params),
            Err(Error::Config(_))
        ));
    }
}
