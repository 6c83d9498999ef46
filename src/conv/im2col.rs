// src/conv/im2col.rs
// Lowers sliding receptive fields to a matrix so convolution becomes a single
// matrix multiply, plus the exact adjoint scatter used for gradients.

use ndarray::Array2;

use super::padding::{AxisGeometry, Padding};
use crate::error::Error;
use crate::number::{Real, Zero};
use crate::tensor::Tensor;

/// Resolved geometry of a 2D convolution over a `[batch, channels, h, w]`
/// input: both spatial axes plus the batch/channel bookkeeping the engine
/// needs to address rows and columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvGeometry {
    pub batch: usize,
    pub channels: usize,
    pub height: AxisGeometry,
    pub width: AxisGeometry,
}

impl ConvGeometry {
    /// Resolve the geometry of a convolution applied to `input_shape`.
    pub fn for_input(
        input_shape: &[usize],
        kernel: (usize, usize),
        stride: (usize, usize),
        dilation: (usize, usize),
        padding: (Padding, Padding),
    ) -> Result<Self, Error> {
        let [batch, channels, in_h, in_w] = check_4d(input_shape)?;
        Ok(Self {
            batch,
            channels,
            height: AxisGeometry::resolve(in_h, kernel.0, stride.0, dilation.0, padding.0)?,
            width: AxisGeometry::resolve(in_w, kernel.1, stride.1, dilation.1, padding.1)?,
        })
    }

    /// Resolve the geometry a transposed convolution is the adjoint of.
    ///
    /// `input_shape` is the transposed layer's input; `channels` is the
    /// transposed layer's output channel count. The returned geometry's
    /// "input" side is the transposed layer's output tensor, so `im2col` and
    /// `col2im` against it implement the transposed forward and backward.
    pub fn for_transposed_input(
        input_shape: &[usize],
        channels: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
        dilation: (usize, usize),
        padding: (Padding, Padding),
    ) -> Result<Self, Error> {
        let [batch, _, in_h, in_w] = check_4d(input_shape)?;
        Ok(Self {
            batch,
            channels,
            height: AxisGeometry::resolve_transposed(
                in_h, kernel.0, stride.0, dilation.0, padding.0,
            )?,
            width: AxisGeometry::resolve_transposed(
                in_w, kernel.1, stride.1, dilation.1, padding.1,
            )?,
        })
    }

    /// Shape of the image-side tensor: `[batch, channels, in_h, in_w]`.
    pub fn input_shape(&self) -> [usize; 4] {
        [self.batch, self.channels, self.height.input, self.width.input]
    }

    /// Shape of the convolution output for `out_channels` filters.
    pub fn output_shape(&self, out_channels: usize) -> [usize; 4] {
        [
            self.batch,
            out_channels,
            self.height.output,
            self.width.output,
        ]
    }

    /// Number of rows in the column matrix: one per `(batch, out_y, out_x)`.
    pub fn rows(&self) -> usize {
        self.batch * self.height.output * self.width.output
    }

    /// Number of columns: one per `(channel, ky, kx)`, channel-major.
    pub fn patch_len(&self) -> usize {
        self.channels * self.height.kernel * self.width.kernel
    }
}

fn check_4d(shape: &[usize]) -> Result<[usize; 4], Error> {
    if shape.len() != 4 {
        return Err(Error::shape(format!(
            "expected a 4D [batch, channels, height, width] input, got {:?}",
            shape
        )));
    }
    Ok([shape[0], shape[1], shape[2], shape[3]])
}

/// Gather the dilated receptive field of every output position into one row
/// of a `[batch * out_h * out_w, channels * kh * kw]` matrix.
///
/// Positions falling in padding read as zero; no padded copy of the input is
/// materialized. Row `r` corresponds to `(b, oy, ox)` in row-major order and
/// column `c` to `(channel, ky, kx)` channel-major, matching the
/// `[out_channels, channels * kh * kw]` weight reshape used by the layers.
pub fn im2col<T>(input: &Tensor<T>, geometry: &ConvGeometry) -> Result<Array2<T>, Error>
where
    T: Real,
{
    if input.shape() != geometry.input_shape() {
        return Err(Error::shape(format!(
            "im2col input shape {:?} does not match resolved geometry {:?}",
            input.shape(),
            geometry.input_shape()
        )));
    }
    let src = input.as_slice()?;

    let h = &geometry.height;
    let w = &geometry.width;
    let (channels, in_h, in_w) = (geometry.channels, h.input, w.input);
    let patch_len = geometry.patch_len();

    let mut cols = Array2::<T>::zeros((geometry.rows(), patch_len));
    let Some(dst) = cols.as_slice_mut() else {
        return Err(Error::shape("column matrix is not contiguous"));
    };

    for b in 0..geometry.batch {
        for oy in 0..h.output {
            for ox in 0..w.output {
                let row = (b * h.output + oy) * w.output + ox;
                let row_base = row * patch_len;
                for c in 0..channels {
                    let src_base = (b * channels + c) * in_h;
                    for ky in 0..h.kernel {
                        let iy = (oy * h.stride + ky * h.dilation) as isize
                            - h.pad_before as isize;
                        if iy < 0 || iy >= in_h as isize {
                            continue;
                        }
                        let src_row = (src_base + iy as usize) * in_w;
                        let dst_row = row_base + (c * h.kernel + ky) * w.kernel;
                        for kx in 0..w.kernel {
                            let ix = (ox * w.stride + kx * w.dilation) as isize
                                - w.pad_before as isize;
                            if ix < 0 || ix >= in_w as isize {
                                continue;
                            }
                            dst[dst_row + kx] = src[src_row + ix as usize];
                        }
                    }
                }
            }
        }
    }

    Ok(cols)
}

/// Exact adjoint of [`im2col`]: scatter each matrix row back over its
/// receptive-field footprint in an input-shaped tensor, summing contributions
/// where receptive fields overlap. Entries that came from padding are
/// discarded.
pub fn col2im<T>(cols: &Array2<T>, geometry: &ConvGeometry) -> Result<Tensor<T>, Error>
where
    T: Real,
{
    let expected = [geometry.rows(), geometry.patch_len()];
    if cols.shape() != expected {
        return Err(Error::shape(format!(
            "col2im matrix shape {:?} does not match resolved geometry {:?}",
            cols.shape(),
            expected
        )));
    }
    let Some(src) = cols.as_slice() else {
        return Err(Error::shape("column matrix is not contiguous"));
    };

    let h = &geometry.height;
    let w = &geometry.width;
    let (channels, in_h, in_w) = (geometry.channels, h.input, w.input);
    let patch_len = geometry.patch_len();

    let mut dst = vec![T::zero(); geometry.batch * channels * in_h * in_w];

    for b in 0..geometry.batch {
        for oy in 0..h.output {
            for ox in 0..w.output {
                let row = (b * h.output + oy) * w.output + ox;
                let row_base = row * patch_len;
                for c in 0..channels {
                    let dst_base = (b * channels + c) * in_h;
                    for ky in 0..h.kernel {
                        let iy = (oy * h.stride + ky * h.dilation) as isize
                            - h.pad_before as isize;
                        if iy < 0 || iy >= in_h as isize {
                            continue;
                        }
                        let dst_row = (dst_base + iy as usize) * in_w;
                        let src_row = row_base + (c * h.kernel + ky) * w.kernel;
                        for kx in 0..w.kernel {
                            let ix = (ox * w.stride + kx * w.dilation) as isize
                                - w.pad_before as isize;
                            if ix < 0 || ix >= in_w as isize {
                                continue;
                            }
                            let at = dst_row + ix as usize;
                            // Overlapping receptive fields must sum, not
                            // overwrite.
                            dst[at] = dst[at] + src[src_row + kx];
                        }
                    }
                }
            }
        }
    }

    let shape = geometry.input_shape();
    Tensor::from_vec(dst, &shape)
}
