// src/nn/layers/deconv2d.rs
// Transposed 2D convolution (deconvolution). The layer is the exact adjoint
// of Conv2d with the same kernel/stride/dilation/padding: its forward pass is
// the convolution's input gradient (col2im scatter) and its backward pass is
// the convolution's forward gather, so the two engine primitives swap roles.

use ndarray::{Array2, Axis, Ix2};

use crate::conv::{ConvGeometry, Padding, col2im, im2col};
use crate::error::Error;
use crate::nn::layers::utils::{matrix_to_output, output_to_matrix};
use crate::nn::{Init, Layer, Parameter};
use crate::number::Real;
use crate::tensor::Tensor;

#[derive(Debug)]
struct Deconv2dCache<T>
where
    T: Real,
{
    input_matrix: Array2<T>,
    geometry: ConvGeometry,
}

/// Transposed 2D convolution over `[batch, in_channels, height, width]`
/// inputs.
///
/// Weight shape is `[in_channels, out_channels, kernel_h, kernel_w]` (input
/// channels leading, mirroring the adjoint relationship with [`Conv2d`]).
/// With stride `s` the layer upsamples: each output axis has length
/// `s * (in - 1) + span - pad_before - pad_after`.
///
/// [`Conv2d`]: crate::nn::Conv2d
#[derive(Debug)]
pub struct Deconv2d<T>
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
    cache: Option<Deconv2dCache<T>>,
}

impl<T> Deconv2d<T>
where
    T: Real,
{
    /// Create a transposed convolutional layer with initialized weights.
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
        check_deconv2d_config(in_channels, out_channels, kernel_size, stride, dilation, padding)?;

        let (kh, kw) = kernel_size;
        let fan_in = in_channels * kh * kw;
        let fan_out = out_channels * kh * kw;
        let weight = init.sample(&[in_channels, out_channels, kh, kw], fan_in, fan_out)?;

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
        stride: (usize, usize),
        dilation: (usize, usize),
        padding: Padding,
    ) -> Result<Self, Error> {
        let shape = weight.shape();
        if shape.len() != 4 {
            return Err(Error::shape(format!(
                "deconv2d weight must be 4D [in_ch, out_ch, kh, kw], got {:?}",
                shape
            )));
        }
        let (in_channels, out_channels) = (shape[0], shape[1]);
        let kernel_size = (shape[2], shape[3]);
        check_deconv2d_config(in_channels, out_channels, kernel_size, stride, dilation, padding)?;

        let bias_param = match bias {
            Some(b) => {
                if b.shape() != [out_channels] {
                    return Err(Error::shape(format!(
                        "deconv2d bias shape {:?} does not match [{}]",
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
        Ok(self.geometry(input_shape)?.input_shape())
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.size() + self.bias.as_ref().map_or(0, |b| b.size())
    }

    /// The resolved geometry describes the convolution this layer is the
    /// adjoint of, so its image side is this layer's output.
    fn geometry(&self, input_shape: &[usize]) -> Result<ConvGeometry, Error> {
        if input_shape.len() == 4 && input_shape[1] != self.in_channels {
            return Err(Error::shape(format!(
                "input has {} channels, layer expects {}",
                input_shape[1], self.in_channels
            )));
        }
        ConvGeometry::for_transposed_input(
            input_shape,
            self.out_channels,
            self.kernel_size,
            self.stride,
            self.dilation,
            (self.padding, self.padding),
        )
    }

    /// Weight as a `[in_channels, out_channels * kh * kw]` matrix, matching
    /// the column layout of the engine.
    fn weight_matrix(&self) -> Result<Array2<T>, Error> {
        let patch = self.out_channels * self.kernel_size.0 * self.kernel_size.1;
        let reshaped = self.weight.data.reshape(&[self.in_channels, patch])?;
        reshaped
            .array()
            .clone()
            .into_dimensionality::<Ix2>()
            .map_err(|e| Error::shape(e.to_string()))
    }
}

fn check_deconv2d_config(
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
            "causal padding has no transposed counterpart",
        ));
    }
    Ok(())
}

impl<T> Layer<T> for Deconv2d<T>
where
    T: Real,
{
    fn forward(&mut self, input: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let geometry = self.geometry(input.shape())?;
        // Each input position becomes one engine row; its product with the
        // weight matrix is the full patch it scatters into the output.
        let input_matrix = output_to_matrix(input)?;
        let weight_matrix = self.weight_matrix()?;
        let cols = input_matrix.dot(&weight_matrix);
        let mut output = col2im(&cols, &geometry)?;

        if let Some(bias) = self.bias.as_ref() {
            let values = bias.data.as_slice()?;
            for (c, &value) in values.iter().enumerate() {
                output
                    .array_mut()
                    .index_axis_mut(Axis(1), c)
                    .mapv_inplace(|v| v + value);
            }
        }

        self.cache = Some(Deconv2dCache {
            input_matrix,
            geometry,
        });
        Ok(output)
    }

    fn backward(&mut self, grad_output: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let cache = self.cache.take().ok_or_else(|| {
            Error::state("deconv2d backward called without a cached forward pass")
        })?;
        let expected = cache.geometry.input_shape();
        if grad_output.shape() != expected {
            return Err(Error::shape(format!(
                "output gradient shape {:?} does not match forward output {:?}",
                grad_output.shape(),
                expected
            )));
        }

        // The backward pass is a plain convolution gather over the upstream
        // gradient.
        let grad_cols = im2col(grad_output, &cache.geometry)?;

        let (kh, kw) = self.kernel_size;
        let weight_grad = Tensor::from_array(cache.input_matrix.t().dot(&grad_cols).into_dyn())
            .reshape(&[self.in_channels, self.out_channels, kh, kw])?;
        self.weight.accumulate(&weight_grad)?;

        if let Some(bias) = self.bias.as_mut() {
            let mut sums = vec![T::zero(); self.out_channels];
            for (c, sum) in sums.iter_mut().enumerate() {
                *sum = grad_output.array().index_axis(Axis(1), c).sum();
            }
            bias.accumulate(&Tensor::from_vec(sums, &[self.out_channels])?)?;
        }

        let weight_matrix = self.weight_matrix()?;
        let input_grad = grad_cols.dot(&weight_matrix.t());
        let [batch, _, in_h, in_w] = cache.geometry.output_shape(self.in_channels);
        matrix_to_output(&input_grad, batch, self.in_channels, in_h, in_w)
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
        "deconv2d"
    }
}
