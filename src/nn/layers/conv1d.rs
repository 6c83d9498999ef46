// src/nn/layers/conv1d.rs
// 1D convolution over [batch, channels, length] sequences. Internally the
// input is viewed as a height-1 image so the 2D im2col path does the work;
// the height axis gets a trivial kernel and valid padding.

use ndarray::{Array2, Ix2};

use crate::conv::{ConvGeometry, Padding};
use crate::error::Error;
use crate::nn::layers::utils::{conv_backward, conv_forward};
use crate::nn::{Init, Layer, Parameter};
use crate::number::Real;
use crate::tensor::Tensor;

#[derive(Debug)]
struct Conv1dCache<T>
where
    T: Real,
{
    cols: Array2<T>,
    geometry: ConvGeometry,
}

/// 1D convolution over `[batch, in_channels, length]` inputs.
///
/// Weight shape is `[out_channels, in_channels, kernel]`. Unlike the 2D
/// layer, [`Padding::Causal`] is accepted here: all padding goes before the
/// sequence, so `output[t]` never depends on inputs later than `t`.
#[derive(Debug)]
pub struct Conv1d<T>
where
    T: Real,
{
    pub weight: Parameter<T>,
    pub bias: Option<Parameter<T>>,
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub dilation: usize,
    pub padding: Padding,
    cache: Option<Conv1dCache<T>>,
}

impl<T> Conv1d<T>
where
    T: Real,
{
    /// Create a 1D convolutional layer with initialized weights.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        dilation: usize,
        padding: Padding,
        bias: bool,
        init: Init,
    ) -> Result<Self, Error> {
        check_conv1d_config(in_channels, out_channels, kernel_size, stride, dilation)?;

        let fan_in = in_channels * kernel_size;
        let fan_out = out_channels * kernel_size;
        let weight = init.sample(&[out_channels, in_channels, kernel_size], fan_in, fan_out)?;

        let bias_param =
            bias.then(|| Parameter::new_named(Tensor::zeros(&[out_channels]), "bias"));

        Ok(Self {
            weight: Parameter::new_named(weight, "weight"),
            bias: bias_param,
            in_channels,
            out_channels,
            kernel_size,
            stride,
            dilation,
            padding,
            cache: None,
        })
    }

    /// Build a layer around explicit weight/bias tensors.
    pub fn from_tensors(
        weight: Tensor<T>,
        bias: Option<Tensor<T>>,
        stride: usize,
        dilation: usize,
        padding: Padding,
    ) -> Result<Self, Error> {
        let shape = weight.shape();
        if shape.len() != 3 {
            return Err(Error::shape(format!(
                "conv1d weight must be 3D [out_ch, in_ch, kernel], got {:?}",
                shape
            )));
        }
        let (out_channels, in_channels, kernel_size) = (shape[0], shape[1], shape[2]);
        check_conv1d_config(in_channels, out_channels, kernel_size, stride, dilation)?;

        let bias_param = match bias {
            Some(b) => {
                if b.shape() != [out_channels] {
                    return Err(Error::shape(format!(
                        "conv1d bias shape {:?} does not match [{}]",
                        b.shape(),
                        out_channels
                    )));
                }
                Some(Parameter::new_named(b, "bias"))
            }
            None => None,
        };

        Ok(Self {
            weight: Parameter::new_named(weight, "weight"),
            bias: bias_param,
            in_channels,
            out_channels,
            kernel_size,
            stride,
            dilation,
            padding,
            cache: None,
        })
    }

    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    /// Output shape for a given `[batch, channels, length]` input shape.
    pub fn output_shape(&self, input_shape: &[usize]) -> Result<[usize; 3], Error> {
        let geometry = self.geometry(input_shape)?;
        let [batch, channels, _, length] = geometry.output_shape(self.out_channels);
        Ok([batch, channels, length])
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.size() + self.bias.as_ref().map_or(0, |b| b.size())
    }

    fn geometry(&self, input_shape: &[usize]) -> Result<ConvGeometry, Error> {
        if input_shape.len() != 3 {
            return Err(Error::shape(format!(
                "conv1d expects a 3D [batch, channels, length] input, got {:?}",
                input_shape
            )));
        }
        if input_shape[1] != self.in_channels {
            return Err(Error::shape(format!(
                "input has {} channels, layer expects {}",
                input_shape[1], self.in_channels
            )));
        }
        ConvGeometry::for_input(
            &[input_shape[0], input_shape[1], 1, input_shape[2]],
            (1, self.kernel_size),
            (1, self.stride),
            (1, self.dilation),
            (Padding::Valid, self.padding),
        )
    }

    fn weight_matrix(&self) -> Result<Array2<T>, Error> {
        let patch = self.in_channels * self.kernel_size;
        let reshaped = self.weight.data.reshape(&[self.out_channels, patch])?;
        reshaped
            .array()
            .clone()
            .into_dimensionality::<Ix2>()
            .map_err(|e| Error::shape(e.to_string()))
    }
}

fn check_conv1d_config(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    dilation: usize,
) -> Result<(), Error> {
    if in_channels == 0 || out_channels == 0 {
        return Err(Error::config("channel counts must be at least 1"));
    }
    if kernel_size == 0 {
        return Err(Error::config("kernel size must be at least 1"));
    }
    if stride == 0 {
        return Err(Error::config("stride must be at least 1"));
    }
    if dilation == 0 {
        return Err(Error::config("dilation must be at least 1"));
    }
    Ok(())
}

impl<T> Layer<T> for Conv1d<T>
where
    T: Real,
{
    fn forward(&mut self, input: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let geometry = self.geometry(input.shape())?;
        let input4 = input.reshape(&geometry.input_shape())?;
        let weight_matrix = self.weight_matrix()?;
        let bias = self.bias.as_ref().map(|b| &b.data);

        let result = conv_forward(&input4, &weight_matrix, bias, &geometry)?;
        let [batch, channels, _, length] = geometry.output_shape(self.out_channels);
        let output = result.output.reshape(&[batch, channels, length])?;

        self.cache = Some(Conv1dCache {
            cols: result.cols,
            geometry,
        });
        Ok(output)
    }

    fn backward(&mut self, grad_output: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let cache = self.cache.take().ok_or_else(|| {
            Error::state("conv1d backward called without a cached forward pass")
        })?;
        let expected = cache.geometry.output_shape(self.out_channels);
        if grad_output.shape() != [expected[0], expected[1], expected[3]] {
            return Err(Error::shape(format!(
                "output gradient shape {:?} does not match forward output {:?}",
                grad_output.shape(),
                [expected[0], expected[1], expected[3]]
            )));
        }
        let grad4 = grad_output.reshape(&expected)?;
        let weight_matrix = self.weight_matrix()?;

        let grads = conv_backward(
            &grad4,
            &cache.cols,
            &weight_matrix,
            &cache.geometry,
            self.bias.is_some(),
        )?;

        let weight_grad = Tensor::from_array(grads.weight.into_dyn()).reshape(&[
            self.out_channels,
            self.in_channels,
            self.kernel_size,
        ])?;
        self.weight.accumulate(&weight_grad)?;
        if let (Some(bias), Some(bias_grad)) = (self.bias.as_mut(), grads.bias) {
            bias.accumulate(&bias_grad)?;
        }

        let input_shape = cache.geometry.input_shape();
        grads
            .input
            .reshape(&[input_shape[0], input_shape[1], input_shape[3]])
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
        "conv1d"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn averaging_layer(padding: Padding) -> Conv1d<f64> {
        let weight = Tensor::filled(&[1, 1, 3], 1.0);
        Conv1d::from_tensors(weight, None, 1, 1, padding).unwrap()
    }

    #[test]
    fn test_valid_sliding_sums() {
        let mut layer = averaging_layer(Padding::Valid);
        let input =
            Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[1, 1, 6]).unwrap();
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.shape(), &[1, 1, 4]);
        assert_eq!(output.at(&[0, 0, 0]), 6.0);
        assert_eq!(output.at(&[0, 0, 3]), 15.0);
    }

    #[test]
    fn test_causal_padding_preserves_length() {
        let mut layer = averaging_layer(Padding::Causal);
        let input =
            Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0], &[1, 1, 5]).unwrap();
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.shape(), &[1, 1, 5]);
        // All padding precedes the sequence, so step 0 sees only x[0].
        assert_eq!(output.at(&[0, 0, 0]), 1.0);
        assert_eq!(output.at(&[0, 0, 1]), 3.0);
        assert_eq!(output.at(&[0, 0, 4]), 12.0);
    }

    #[test]
    fn test_causal_output_ignores_the_future() {
        let weight =
            Tensor::from_vec(vec![0.5, -1.0, 2.0, 0.25, 1.5, -0.75], &[1, 2, 3]).unwrap();
        let mut layer = Conv1d::from_tensors(weight, None, 1, 1, Padding::Causal).unwrap();

        let base: Vec<f64> = (0..16).map(|v| (v as f64) * 0.3 - 2.0).collect();
        let input = Tensor::from_vec(base.clone(), &[1, 2, 8]).unwrap();
        let baseline = layer.forward(&input).unwrap();

        // Perturb the last time step of both channels; earlier outputs must
        // not move.
        let mut bumped = base;
        bumped[7] += 10.0;
        bumped[15] -= 10.0;
        let perturbed = Tensor::from_vec(bumped, &[1, 2, 8]).unwrap();
        let shifted = layer.forward(&perturbed).unwrap();

        for t in 0..7 {
            assert_eq!(baseline.at(&[0, 0, t]), shifted.at(&[0, 0, t]));
        }
        assert_ne!(baseline.at(&[0, 0, 7]), shifted.at(&[0, 0, 7]));
    }

    #[test]
    fn test_backward_gradient_counts_windows() {
        let mut layer = averaging_layer(Padding::Valid);
        let input = Tensor::filled(&[1, 1, 5], 1.0);
        layer.forward(&input).unwrap();
        let upstream = Tensor::filled(&[1, 1, 3], 1.0);
        let grad = layer.backward(&upstream).unwrap();

        // Window coverage counts: 1, 2, 3, 2, 1.
        assert_eq!(grad.at(&[0, 0, 0]), 1.0);
        assert_eq!(grad.at(&[0, 0, 2]), 3.0);
        assert_eq!(grad.at(&[0, 0, 4]), 1.0);
        // dW[k] sums input over the 3 valid windows.
        assert_eq!(layer.weight.grad.at(&[0, 0, 0]), 3.0);
    }

    #[test]
    fn test_dilated_output_length() {
        let weight = Tensor::<f64>::filled(&[1, 1, 2], 1.0);
        let mut layer = Conv1d::from_tensors(weight, None, 1, 3, Padding::Valid).unwrap();
        let input = Tensor::from_vec((1..=7).map(|v| v as f64).collect(), &[1, 1, 7]).unwrap();
        let output = layer.forward(&input).unwrap();
        // Effective span 4: outputs pair x[t] with x[t + 3].
        assert_eq!(output.shape(), &[1, 1, 4]);
        assert_eq!(output.at(&[0, 0, 0]), 5.0);
        assert_eq!(output.at(&[0, 0, 3]), 11.0);
    }

    #[test]
    fn test_rejects_bad_input_rank() {
        let mut layer = averaging_layer(Padding::Valid);
        let input = Tensor::zeros(&[1, 1, 5, 5]);
        assert!(matches!(layer.forward(&input), Err(Error::Shape(_))));
    }

    #[test]
    fn test_backward_requires_forward() {
        let mut layer = averaging_layer(Padding::Valid);
        let upstream = Tensor::filled(&[1, 1, 3], 1.0);
        assert!(matches!(layer.backward(&upstream), Err(Error::State(_))));
    }
}
