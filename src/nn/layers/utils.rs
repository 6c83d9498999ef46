// src/nn/layers/utils.rs
// Shared plumbing for the im2col-based layers: layout conversions between
// [batch, channels, h, w] tensors and the row-major matrices the engine
// multiplies, plus the forward/backward formulas Conv1d and Conv2d share.

use ndarray::{Array2, Axis, Ix1};

use crate::conv::{ConvGeometry, col2im, im2col};
use crate::error::Error;
use crate::number::{Real, Zero};
use crate::tensor::Tensor;

/// Reorder a `[batch, channels, h, w]` tensor into a
/// `[batch * h * w, channels]` matrix whose rows follow im2col row order.
pub(crate) fn output_to_matrix<T>(output: &Tensor<T>) -> Result<Array2<T>, Error>
where
    T: Real,
{
    let shape = output.shape();
    if shape.len() != 4 {
        return Err(Error::shape(format!(
            "expected a 4D tensor, got {:?}",
            shape
        )));
    }
    let (batch, channels, h, w) = (shape[0], shape[1], shape[2], shape[3]);
    let src = output.as_slice()?;

    let mut matrix = Array2::<T>::zeros((batch * h * w, channels));
    let Some(dst) = matrix.as_slice_mut() else {
        return Err(Error::shape("matrix storage is not contiguous"));
    };
    for b in 0..batch {
        for c in 0..channels {
            let plane = ((b * channels + c) * h) * w;
            for y in 0..h {
                for x in 0..w {
                    let row = (b * h + y) * w + x;
                    dst[row * channels + c] = src[plane + y * w + x];
                }
            }
        }
    }
    Ok(matrix)
}

/// Inverse of [`output_to_matrix`].
pub(crate) fn matrix_to_output<T>(
    matrix: &Array2<T>,
    batch: usize,
    channels: usize,
    h: usize,
    w: usize,
) -> Result<Tensor<T>, Error>
where
    T: Real,
{
    if matrix.shape() != [batch * h * w, channels] {
        return Err(Error::shape(format!(
            "matrix shape {:?} does not match [{} * {} * {}, {}]",
            matrix.shape(),
            batch,
            h,
            w,
            channels
        )));
    }
    let Some(src) = matrix.as_slice() else {
        return Err(Error::shape("matrix storage is not contiguous"));
    };

    let mut dst = vec![T::zero(); batch * channels * h * w];
    for b in 0..batch {
        for c in 0..channels {
            let plane = ((b * channels + c) * h) * w;
            for y in 0..h {
                for x in 0..w {
                    let row = (b * h + y) * w + x;
                    dst[plane + y * w + x] = src[row * channels + c];
                }
            }
        }
    }
    Tensor::from_vec(dst, &[batch, channels, h, w])
}

pub(crate) struct ConvForward<T>
where
    T: Real,
{
    pub output: Tensor<T>,
    /// The im2col matrix, cached for the backward pass.
    pub cols: Array2<T>,
}

/// Forward convolution: `im2col(input) x weight_matrix^T + bias`, reshaped to
/// `[batch, out_channels, out_h, out_w]`.
pub(crate) fn conv_forward<T>(
    input: &Tensor<T>,
    weight_matrix: &Array2<T>,
    bias: Option<&Tensor<T>>,
    geometry: &ConvGeometry,
) -> Result<ConvForward<T>, Error>
where
    T: Real,
{
    let cols = im2col(input, geometry)?;
    let mut out2d = cols.dot(&weight_matrix.t());
    if let Some(bias) = bias {
        let bias_row = bias
            .array()
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(|_| Error::shape(format!("bias must be 1D, got {:?}", bias.shape())))?;
        out2d = out2d + &bias_row;
    }

    let out_channels = weight_matrix.shape()[0];
    let output = matrix_to_output(
        &out2d,
        geometry.batch,
        out_channels,
        geometry.height.output,
        geometry.width.output,
    )?;
    Ok(ConvForward { output, cols })
}

pub(crate) struct ConvGradients<T>
where
    T: Real,
{
    /// Weight gradient in matrix form `[out_channels, channels * kh * kw]`.
    pub weight: Array2<T>,
    /// Bias gradient `[out_channels]`, present when the layer has a bias.
    pub bias: Option<Tensor<T>>,
    /// Gradient with respect to the layer input.
    pub input: Tensor<T>,
}

/// Backward convolution. One call produces all three gradients: weights via
/// `grad^T x cols`, bias via summation over batch and spatial axes, input via
/// `col2im(grad x weight_matrix)`.
pub(crate) fn conv_backward<T>(
    grad_output: &Tensor<T>,
    cols: &Array2<T>,
    weight_matrix: &Array2<T>,
    geometry: &ConvGeometry,
    has_bias: bool,
) -> Result<ConvGradients<T>, Error>
where
    T: Real,
{
    let out_channels = weight_matrix.shape()[0];
    let expected = geometry.output_shape(out_channels);
    if grad_output.shape() != expected {
        return Err(Error::shape(format!(
            "output gradient shape {:?} does not match forward output {:?}",
            grad_output.shape(),
            expected
        )));
    }

    let grad_matrix = output_to_matrix(grad_output)?;
    let weight = grad_matrix.t().dot(cols);
    let bias = if has_bias {
        let summed = grad_matrix.sum_axis(Axis(0));
        Some(Tensor::from_vec(summed.to_vec(), &[out_channels])?)
    } else {
        None
    };
    let input = col2im(&grad_matrix.dot(weight_matrix), geometry)?;

    Ok(ConvGradients {
        weight,
        bias,
        input,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_round_trip() {
        let data: Vec<f64> = (0..2 * 3 * 2 * 2).map(|v| v as f64).collect();
        let t = Tensor::from_vec(data, &[2, 3, 2, 2]).unwrap();
        let m = output_to_matrix(&t).unwrap();
        assert_eq!(m.shape(), &[8, 3]);
        // Row 0 is (b=0, y=0, x=0) across channels.
        assert_eq!(m.row(0).to_vec(), vec![0.0, 4.0, 8.0]);

        let back = matrix_to_output(&m, 2, 3, 2, 2).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_matrix_to_output_shape_check() {
        let m = Array2::<f64>::zeros((4, 3));
        assert!(matrix_to_output(&m, 2, 3, 2, 2).is_err());
    }
}
