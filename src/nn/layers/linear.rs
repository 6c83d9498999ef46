// src/nn/layers/linear.rs
// Fully connected layer: y = x W^T + b over [batch, features] inputs.

use ndarray::{Array2, Axis, Ix2};

use crate::error::Error;
use crate::nn::{Init, Layer, Parameter};
use crate::number::Real;
use crate::tensor::Tensor;

/// Fully connected layer over `[batch, in_features]` inputs.
///
/// Weight shape is `[out_features, in_features]`; bias is `[out_features]`.
#[derive(Debug)]
pub struct Linear<T>
where
    T: Real,
{
    pub weight: Parameter<T>,
    pub bias: Option<Parameter<T>>,
    pub in_features: usize,
    pub out_features: usize,
    cache: Option<Array2<T>>,
}

impl<T> Linear<T>
where
    T: Real,
{
    pub fn new(
        in_features: usize,
        out_features: usize,
        bias: bool,
        init: Init,
    ) -> Result<Self, Error> {
        if in_features == 0 || out_features == 0 {
            return Err(Error::config("feature counts must be at least 1"));
        }
        let weight = init.sample(&[out_features, in_features], in_features, out_features)?;
        let bias_param =
            bias.then(|| Parameter::new_named(Tensor::zeros(&[out_features]), "bias"));

        Ok(Self {
            weight: Parameter::new_named(weight, "weight"),
            bias: bias_param,
            in_features,
            out_features,
            cache: None,
        })
    }

    /// Build a layer around explicit weight/bias tensors.
    pub fn from_tensors(weight: Tensor<T>, bias: Option<Tensor<T>>) -> Result<Self, Error> {
        let shape = weight.shape();
        if shape.len() != 2 {
            return Err(Error::shape(format!(
                "linear weight must be 2D [out_features, in_features], got {:?}",
                shape
            )));
        }
        let (out_features, in_features) = (shape[0], shape[1]);
        if in_features == 0 || out_features == 0 {
            return Err(Error::config("feature counts must be at least 1"));
        }

        let bias_param = match bias {
            Some(b) => {
                if b.shape() != [out_features] {
                    return Err(Error::shape(format!(
                        "linear bias shape {:?} does not match [{}]",
                        b.shape(),
                        out_features
                    )));
                }
                Some(Parameter::new_named(b, "bias"))
            }
            None => None,
        };

        Ok(Self {
            weight: Parameter::new_named(weight, "weight"),
            bias: bias_param,
            in_features,
            out_features,
            cache: None,
        })
    }

    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.size() + self.bias.as_ref().map_or(0, |b| b.size())
    }

    fn check_input(&self, shape: &[usize]) -> Result<(), Error> {
        if shape.len() != 2 {
            return Err(Error::shape(format!(
                "linear expects a 2D [batch, features] input, got {:?}",
                shape
            )));
        }
        if shape[1] != self.in_features {
            return Err(Error::shape(format!(
                "input has {} features, layer expects {}",
                shape[1], self.in_features
            )));
        }
        Ok(())
    }

    fn weight_view(&self) -> Result<Array2<T>, Error> {
        self.weight
            .data
            .array()
            .clone()
            .into_dimensionality::<Ix2>()
            .map_err(|e| Error::shape(e.to_string()))
    }
}

impl<T> Layer<T> for Linear<T>
where
    T: Real,
{
    fn forward(&mut self, input: &Tensor<T>) -> Result<Tensor<T>, Error> {
        self.check_input(input.shape())?;
        let x = input
            .array()
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| Error::shape(e.to_string()))?;
        let w = self.weight_view()?;

        let mut out = x.dot(&w.t());
        if let Some(bias) = self.bias.as_ref() {
            let b = bias
                .data
                .array()
                .view()
                .into_dimensionality::<ndarray::Ix1>()
                .map_err(|e| Error::shape(e.to_string()))?;
            out = out + &b;
        }

        self.cache = Some(x.to_owned());
        Ok(Tensor::from_array(out.into_dyn()))
    }

    fn backward(&mut self, grad_output: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let x = self.cache.take().ok_or_else(|| {
            Error::state("linear backward called without a cached forward pass")
        })?;
        if grad_output.shape() != [x.nrows(), self.out_features] {
            return Err(Error::shape(format!(
                "output gradient shape {:?} does not match [{}, {}]",
                grad_output.shape(),
                x.nrows(),
                self.out_features
            )));
        }
        let g = grad_output
            .array()
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| Error::shape(e.to_string()))?;

        let weight_grad = Tensor::from_array(g.t().dot(&x).into_dyn());
        self.weight.accumulate(&weight_grad)?;
        if let Some(bias) = self.bias.as_mut() {
            let summed = g.sum_axis(Axis(0));
            bias.accumulate(&Tensor::from_vec(summed.to_vec(), &[self.out_features])?)?;
        }

        let w = self.weight_view()?;
        Ok(Tensor::from_array(g.dot(&w).into_dyn()))
    }

    fn parameters(&self) -> Vec<&Parameter<T>> {
        let mut params = vec![&self.weight];
        if let Some(ref bias) = self.bias {
            params.push(bias);
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter<T>> {
        let mut params = vec![&mut self.weight];
        if let Some(ref mut bias) = self.bias {
            params.push(bias);
        }
        params
    }

    fn name(&self) -> &str {
        "linear"
    }
}
