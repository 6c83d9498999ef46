// src/nn/layers/conv2d.rs
// 2D convolutional layer built on the im2col engine. The kernel is reshaped
// to a [out_channels, in_channels * kh * kw] matrix so the whole forward pass
// is a single matrix multiply against the column matrix.

use ndarray::{Array2, Ix2};

use crate::conv::{ConvGeometry, Padding};
use crate::error::Error;
use crate::nn::layers::utils::{conv_backward, conv_forward};
use crate::nn::{Init, Layer, Parameter};
use crate::number::Real;
use crate::tensor::Tensor;

#[derive(Debug)]
struct Conv2dCache<T>
where
    T: Real,
{
    cols: Array2<T>,
    geometry: ConvGeometry,
}

/// 2D convolution over `[batch, in_channels, height, width]` inputs.
///
/// Weight shape is `[out_channels, in_channels, kernel_h, kernel_w]`; bias,
/// when present, is `[out_channels]`. The forward pass caches the im2col
/// matrix and resolved geometry; one backward call produces the weight, bias
/// and input gradients together.
#[derive(Debug)]
pub struct Conv2d<T>
where
    T: Real,
{
    pub weight: Parameter<T>,
    pub bias: Option<Parameter<T>>,
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: (usize, usize),
    pub stride: (usize, usize),
    pub dilation: (usize, usize),
    pub padding: Padding,
    cache: Option<Conv2dCache<T>>,
}

impl<T> Conv2d<T>
where
    T: Real,
{
    /// Create a 2D convolutional layer with initialized weights.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        stride: (usize, usize),
        dilation: (usize, usize),
        padding: Padding,
        bias: bool,
        init: Init,
    ) -> Result<Self, Error> {
        check_conv2d_config(in_channels, out_channels, kernel_size, stride, dilation, padding)?;

        let (kh, kw) = kernel_size;
        let fan_in = in_channels * kh * kw;
        let fan_out = out_channels * kh * kw;
        let weight = init.sample(&[out_channels, in_channels, kh, kw], fan_in, fan_out)?;

        let bias_param = bias.then(|| {
            Parameter::new_named(Tensor::zeros(&[out_channels]), "bias")
        });

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

    /// Stride-1, undilated, valid-padding layer with Glorot weights.
    pub fn with_defaults(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
    ) -> Result<Self, Error> {
        Self::new(
            in_channels,
            out_channels,
            kernel_size,
            (1, 1),
            (1, 1),
            Padding::Valid,
            true,
            Init::default(),
        )
    }

    /// Build a layer around explicit weight/bias tensors. Used when the caller
    /// wants deterministic parameters.
    pub fn from_tensors(
        weight: Tensor<T>,
        bias: Option<Tensor<T>>,
        stride: (usize, usize),
        dilation: (usize, usize),
        padding: Padding,
    ) -> Result<Self, Error> {
        let shape = weight.shape();
        if shape.len() != 4 {
            return Err(Error::shape(format!(
                "conv2d weight must be 4D [out_ch, in_ch, kh, kw], got {:?}",
                shape
            )));
        }
        let (out_channels, in_channels) = (shape[0], shape[1]);
        let kernel_size = (shape[2], shape[3]);
        check_conv2d_config(in_channels, out_channels, kernel_size, stride, dilation, padding)?;

        let bias_param = match bias {
            Some(b) => {
                if b.shape() != [out_channels] {
                    return Err(Error::shape(format!(
                        "conv2d bias shape {:?} does not match [{}]",
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

    /// Output shape for a given input shape, without running a forward pass.
    pub fn output_shape(&self, input_shape: &[usize]) -> Result<[usize; 4], Error> {
        let geometry = self.geometry(input_shape)?;
        Ok(geometry.output_shape(self.out_channels))
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.size() + self.bias.as_ref().map_or(0, |b| b.size())
    }

    fn geometry(&self, input_shape: &[usize]) -> Result<ConvGeometry, Error> {
        if input_shape.len() == 4 && input_shape[1] != self.in_channels {
            return Err(Error::shape(format!(
                "input has {} channels, layer expects {}",
                input_shape[1], self.in_channels
            )));
        }
        ConvGeometry::for_input(
            input_shape,
            self.kernel_size,
            self.stride,
            self.dilation,
            (self.padding, self.padding),
        )
    }

    fn weight_matrix(&self) -> Result<Array2<T>, Error> {
        let patch = self.in_channels * self.kernel_size.0 * self.kernel_size.1;
        let reshaped = self.weight.data.reshape(&[self.out_channels, patch])?;
        reshaped
            .array()
            .clone()
            .into_dimensionality::<Ix2>()
            .map_err(|e| Error::shape(e.to_string()))
    }
}

fn check_conv2d_config(
    in_channels: usize,
    out_channels: usize,
    kernel_size: (usize, usize),
    stride: (usize, usize),
    dilation: (usize, usize),
    padding: Padding,
) -> Result<(), Error> {
    if in_channels == 0 || out_channels == 0 {
        return Err(Error::config("channel counts must be at least 1"));
    }
    if kernel_size.0 == 0 || kernel_size.1 == 0 {
        return Err(Error::config("kernel size must be at least 1"));
    }
    if stride.0 == 0 || stride.1 == 0 {
        return Err(Error::config("stride must be at least 1"));
    }
    if dilation.0 == 0 || dilation.1 == 0 {
        return Err(Error::config("dilation must be at least 1"));
    }
    if padding == Padding::Causal {
        return Err(Error::config(
            "causal padding is defined for temporal axes; use Conv1d",
        ));
    }
    Ok(())
}

impl<T> Layer<T> for Conv2d<T>
where
    T: Real,
{
    fn forward(&mut self, input: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let geometry = self.geometry(input.shape())?;
        let weight_matrix = self.weight_matrix()?;
        let bias = self.bias.as_ref().map(|b| &b.data);

        let result = conv_forward(input, &weight_matrix, bias, &geometry)?;
        self.cache = Some(Conv2dCache {
            cols: result.cols,
            geometry,
        });
        Ok(result.output)
    }

    fn backward(&mut self, grad_output: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let cache = self.cache.take().ok_or_else(|| {
            Error::state("conv2d backward called without a cached forward pass")
        })?;
        let weight_matrix = self.weight_matrix()?;

        let grads = conv_backward(
            grad_output,
            &cache.cols,
            &weight_matrix,
            &cache.geometry,
            self.bias.is_some(),
        )?;

        let (kh, kw) = self.kernel_size;
        let weight_grad = Tensor::from_array(grads.weight.into_dyn())
            .reshape(&[self.out_channels, self.in_channels, kh, kw])?;
        self.weight.accumulate(&weight_grad)?;
        if let (Some(bias), Some(bias_grad)) = (self.bias.as_mut(), grads.bias) {
            bias.accumulate(&bias_grad)?;
        }

        Ok(grads.input)
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
        "conv2d"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones_kernel_layer(padding: Padding) -> Conv2d<f64> {
        let weight = Tensor::filled(&[1, 1, 3, 3], 1.0);
        Conv2d::from_tensors(weight, None, (1, 1), (1, 1), padding).unwrap()
    }

    fn counting_input() -> Tensor<f64> {
        Tensor::from_vec((1..=25).map(|v| v as f64).collect(), &[1, 1, 5, 5]).unwrap()
    }

    #[test]
    fn test_same_padding_hand_convolution() {
        // All-ones 3x3 kernel on a 5x5 grid of 1..25: each output is the sum
        // of the in-bounds 3x3 neighborhood.
        let mut layer = ones_kernel_layer(Padding::Same);
        let output = layer.forward(&counting_input()).unwrap();
        assert_eq!(output.shape(), &[1, 1, 5, 5]);

        // Corner: 1 + 2 + 6 + 7.
        assert_eq!(output.at(&[0, 0, 0, 0]), 16.0);
        // Center: rows 1..=3, cols 1..=3 of the grid.
        assert_eq!(output.at(&[0, 0, 2, 2]), 117.0);
        // Bottom-right corner: 19 + 20 + 24 + 25.
        assert_eq!(output.at(&[0, 0, 4, 4]), 88.0);
    }

    #[test]
    fn test_all_ones_upstream_gradient_is_neighbor_count() {
        // With all-ones weights and an all-ones upstream gradient, the input
        // gradient at each position is the number of windows covering it.
        let mut layer = ones_kernel_layer(Padding::Same);
        layer.forward(&counting_input()).unwrap();
        let upstream = Tensor::filled(&[1, 1, 5, 5], 1.0);
        let grad = layer.backward(&upstream).unwrap();

        assert_eq!(grad.at(&[0, 0, 0, 0]), 4.0);
        assert_eq!(grad.at(&[0, 0, 0, 2]), 6.0);
        assert_eq!(grad.at(&[0, 0, 2, 2]), 9.0);
        assert_eq!(grad.at(&[0, 0, 4, 4]), 4.0);
    }

    #[test]
    fn test_bias_gradient_sums_over_batch_and_space() {
        let weight = Tensor::filled(&[2, 1, 3, 3], 0.0);
        let bias = Tensor::zeros(&[2]);
        let mut layer =
            Conv2d::from_tensors(weight, Some(bias), (1, 1), (1, 1), Padding::Same).unwrap();

        let input = Tensor::filled(&[2, 1, 4, 4], 1.0);
        layer.forward(&input).unwrap();
        let upstream = Tensor::filled(&[2, 2, 4, 4], 1.0);
        layer.backward(&upstream).unwrap();

        // 2 batches * 16 positions per channel.
        assert_eq!(layer.bias.as_ref().unwrap().grad.at(&[0]), 32.0);
        assert_eq!(layer.bias.as_ref().unwrap().grad.at(&[1]), 32.0);
    }

    #[test]
    fn test_valid_output_shape() {
        let layer = Conv2d::<f64>::new(
            3,
            8,
            (3, 3),
            (2, 2),
            (1, 1),
            Padding::Valid,
            true,
            Init::GlorotUniform,
        )
        .unwrap();
        let shape = layer.output_shape(&[4, 3, 9, 9]).unwrap();
        assert_eq!(shape, [4, 8, 4, 4]);
        assert_eq!(layer.num_parameters(), 8 * 3 * 3 * 3 + 8);
    }

    #[test]
    fn test_rejects_channel_mismatch() {
        let mut layer = Conv2d::<f64>::with_defaults(3, 4, (3, 3)).unwrap();
        let input = Tensor::zeros(&[1, 2, 5, 5]);
        assert!(matches!(layer.forward(&input), Err(Error::Shape(_))));
    }

    #[test]
    fn test_rejects_causal_padding() {
        let err = Conv2d::<f64>::new(
            1,
            1,
            (3, 3),
            (1, 1),
            (1, 1),
            Padding::Causal,
            true,
            Init::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_backward_requires_forward() {
        let mut layer = ones_kernel_layer(Padding::Same);
        let upstream = Tensor::filled(&[1, 1, 5, 5], 1.0);
        assert!(matches!(layer.backward(&upstream), Err(Error::State(_))));

        layer.forward(&counting_input()).unwrap();
        layer.backward(&upstream).unwrap();
        // Cache is consumed: a second backward needs a fresh forward.
        assert!(matches!(layer.backward(&upstream), Err(Error::State(_))));
    }

    #[test]
    fn test_gradients_accumulate_until_zeroed() {
        let mut layer = ones_kernel_layer(Padding::Same);
        let input = counting_input();
        let upstream = Tensor::filled(&[1, 1, 5, 5], 1.0);

        layer.forward(&input).unwrap();
        layer.backward(&upstream).unwrap();
        let single = layer.weight.grad.clone();

        layer.forward(&input).unwrap();
        layer.backward(&upstream).unwrap();
        let doubled = layer.weight.grad.clone();
        assert_eq!(doubled, single.add(&single).unwrap());

        layer.zero_gradients();
        layer.forward(&input).unwrap();
        layer.backward(&upstream).unwrap();
        assert_eq!(layer.weight.grad, single);
    }

    #[test]
    fn test_stride_and_dilation_shapes() {
        let weight = Tensor::<f64>::filled(&[1, 1, 2, 2], 1.0);
        let mut layer =
            Conv2d::from_tensors(weight, None, (1, 1), (2, 2), Padding::Valid).unwrap();
        let input = Tensor::filled(&[1, 1, 5, 5], 1.0);
        let output = layer.forward(&input).unwrap();
        // Effective span 3 on both axes.
        assert_eq!(output.shape(), &[1, 1, 3, 3]);
        assert_eq!(output.at(&[0, 0, 0, 0]), 4.0);
    }
}
