// src/nn/layers/pooling.rs
// Spatial pooling over [batch, channels, h, w] feature maps. Window geometry
// is resolved with the same padding arithmetic as the convolutions; the
// layer itself walks windows directly since there is no kernel to multiply.

use crate::conv::{ConvGeometry, Padding};
use crate::error::Error;
use crate::nn::{Layer, Parameter};
use crate::number::Real;
use crate::tensor::Tensor;

/// Pooling reduction applied to each window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    /// Maximum over the in-bounds positions of the window.
    Max,
    /// Mean over the full window; padded positions count as zero.
    Mean,
}

#[derive(Debug)]
struct PoolCache {
    geometry: ConvGeometry,
    /// Flat input index of the winning element per output element.
    /// `None` when the whole window fell in padding. Only kept for max mode.
    argmax: Option<Vec<Option<usize>>>,
}

/// 2D pooling layer. Parameterless: `parameters()` is empty and backward
/// only routes the upstream gradient.
#[derive(Debug)]
pub struct Pool2d {
    pub mode: PoolMode,
    pub kernel_size: (usize, usize),
    pub stride: (usize, usize),
    pub padding: Padding,
    cache: Option<PoolCache>,
}

impl Pool2d {
    pub fn new(
        mode: PoolMode,
        kernel_size: (usize, usize),
        stride: (usize, usize),
        padding: Padding,
    ) -> Result<Self, Error> {
        if kernel_size.0 == 0 || kernel_size.1 == 0 {
            return Err(Error::config("kernel size must be at least 1"));
        }
        if stride.0 == 0 || stride.1 == 0 {
            return Err(Error::config("stride must be at least 1"));
        }
        if padding == Padding::Causal {
            return Err(Error::config(
                "causal padding is defined for temporal axes, not pooling windows",
            ));
        }
        Ok(Self {
            mode,
            kernel_size,
            stride,
            padding,
            cache: None,
        })
    }

    /// Non-overlapping max pooling with a square window.
    pub fn max(size: usize) -> Result<Self, Error> {
        Self::new(PoolMode::Max, (size, size), (size, size), Padding::Valid)
    }

    /// Non-overlapping mean pooling with a square window.
    pub fn mean(size: usize) -> Result<Self, Error> {
        Self::new(PoolMode::Mean, (size, size), (size, size), Padding::Valid)
    }

    fn geometry(&self, input_shape: &[usize]) -> Result<ConvGeometry, Error> {
        ConvGeometry::for_input(
            input_shape,
            self.kernel_size,
            self.stride,
            (1, 1),
            (self.padding, self.padding),
        )
    }
}

impl<T> Layer<T> for Pool2d
where
    T: Real,
{
    fn forward(&mut self, input: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let geometry = self.geometry(input.shape())?;
        let src = input.as_slice()?;

        let h = geometry.height.clone();
        let w = geometry.width.clone();
        let (batch, channels) = (geometry.batch, geometry.channels);
        let window = T::from_f64((h.kernel * w.kernel) as f64);

        let out_len = batch * channels * h.output * w.output;
        let mut out = vec![T::zero(); out_len];
        let mut argmax = match self.mode {
            PoolMode::Max => Some(vec![None; out_len]),
            PoolMode::Mean => None,
        };

        let mut at = 0;
        for b in 0..batch {
            for c in 0..channels {
                let plane = (b * channels + c) * h.input;
                for oy in 0..h.output {
                    for ox in 0..w.output {
                        let mut best: Option<(usize, T)> = None;
                        let mut sum = T::zero();
                        for ky in 0..h.kernel {
                            let iy = (oy * h.stride + ky) as isize - h.pad_before as isize;
                            if iy < 0 || iy >= h.input as isize {
                                continue;
                            }
                            let row = (plane + iy as usize) * w.input;
                            for kx in 0..w.kernel {
                                let ix = (ox * w.stride + kx) as isize - w.pad_before as isize;
                                if ix < 0 || ix >= w.input as isize {
                                    continue;
                                }
                                let idx = row + ix as usize;
                                let v = src[idx];
                                sum = sum + v;
                                // First maximum wins on ties.
                                if best.is_none_or(|(_, m)| v > m) {
                                    best = Some((idx, v));
                                }
                            }
                        }
                        out[at] = match self.mode {
                            PoolMode::Max => best.map_or(T::zero(), |(_, v)| v),
                            PoolMode::Mean => sum / window,
                        };
                        if let Some(argmax) = argmax.as_mut() {
                            argmax[at] = best.map(|(idx, _)| idx);
                        }
                        at += 1;
                    }
                }
            }
        }

        let output = Tensor::from_vec(
            out,
            &[batch, channels, h.output, w.output],
        )?;
        self.cache = Some(PoolCache { geometry, argmax });
        Ok(output)
    }

    fn backward(&mut self, grad_output: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let cache = self.cache.take().ok_or_else(|| {
            Error::state("pooling backward called without a cached forward pass")
        })?;
        let geometry = cache.geometry;
        let expected = geometry.output_shape(geometry.channels);
        if grad_output.shape() != expected {
            return Err(Error::shape(format!(
                "output gradient shape {:?} does not match forward output {:?}",
                grad_output.shape(),
                expected
            )));
        }
        let src = grad_output.as_slice()?;

        let h = &geometry.height;
        let w = &geometry.width;
        let (batch, channels) = (geometry.batch, geometry.channels);
        let window = T::from_f64((h.kernel * w.kernel) as f64);
        let mut dst = vec![T::zero(); batch * channels * h.input * w.input];

        match cache.argmax {
            // Max: the winner of each window takes the whole gradient.
            Some(argmax) => {
                for (at, winner) in argmax.iter().enumerate() {
                    if let Some(idx) = winner {
                        dst[*idx] = dst[*idx] + src[at];
                    }
                }
            }
            // Mean: each in-bounds position gets an equal share.
            None => {
                let mut at = 0;
                for b in 0..batch {
                    for c in 0..channels {
                        let plane = (b * channels + c) * h.input;
                        for oy in 0..h.output {
                            for ox in 0..w.output {
                                let share = src[at] / window;
                                for ky in 0..h.kernel {
                                    let iy = (oy * h.stride + ky) as isize
                                        - h.pad_before as isize;
                                    if iy < 0 || iy >= h.input as isize {
                                        continue;
                                    }
                                    let row = (plane + iy as usize) * w.input;
                                    for kx in 0..w.kernel {
                                        let ix = (ox * w.stride + kx) as isize
                                            - w.pad_before as isize;
                                        if ix < 0 || ix >= w.input as isize {
                                            continue;
                                        }
                                        let idx = row + ix as usize;
                                        dst[idx] = dst[idx] + share;
                                    }
                                }
                                at += 1;
                            }
                        }
                    }
                }
            }
        }

        Tensor::from_vec(dst, &geometry.input_shape())
    }

    fn parameters(&self) -> Vec<&Parameter<T>> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter<T>> {
        Vec::new()
    }

    fn name(&self) -> &str {
        match self.mode {
            PoolMode::Max => "max_pool2d",
            PoolMode::Mean => "mean_pool2d",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_input() -> Tensor<f64> {
        Tensor::from_vec((1..=16).map(|v| v as f64).collect(), &[1, 1, 4, 4]).unwrap()
    }

    #[test]
    fn test_max_pool_picks_window_maxima() {
        let mut layer = Pool2d::max(2).unwrap();
        let output = layer.forward(&counting_input()).unwrap();
        assert_eq!(output.shape(), &[1, 1, 2, 2]);
        assert_eq!(output.at(&[0, 0, 0, 0]), 6.0);
        assert_eq!(output.at(&[0, 0, 0, 1]), 8.0);
        assert_eq!(output.at(&[0, 0, 1, 1]), 16.0);
    }

    #[test]
    fn test_max_pool_routes_gradient_to_winners() {
        let mut layer = Pool2d::max(2).unwrap();
        layer.forward(&counting_input()).unwrap();
        let upstream =
            Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]).unwrap();
        let grad = layer.backward(&upstream).unwrap();

        // Only the four window maxima receive gradient.
        assert_eq!(grad.at(&[0, 0, 1, 1]), 1.0);
        assert_eq!(grad.at(&[0, 0, 1, 3]), 2.0);
        assert_eq!(grad.at(&[0, 0, 3, 1]), 3.0);
        assert_eq!(grad.at(&[0, 0, 3, 3]), 4.0);
        assert_eq!(grad.at(&[0, 0, 0, 0]), 0.0);
        assert_eq!(grad.sum(), 10.0);
    }

    #[test]
    fn test_mean_pool_forward_and_backward() {
        let mut layer = Pool2d::mean(2).unwrap();
        let output = layer.forward(&counting_input()).unwrap();
        assert_eq!(output.at(&[0, 0, 0, 0]), 3.5);
        assert_eq!(output.at(&[0, 0, 1, 1]), 13.5);

        let upstream = Tensor::filled(&[1, 1, 2, 2], 1.0);
        let grad = layer.backward(&upstream).unwrap();
        // Every input position is in exactly one window of four.
        assert_eq!(grad.at(&[0, 0, 0, 0]), 0.25);
        assert_eq!(grad.at(&[0, 0, 3, 3]), 0.25);
        assert_eq!(grad.sum(), 4.0);
    }

    #[test]
    fn test_mean_pool_same_padding_counts_zeros() {
        // 3x3 window over a 2x2 input with same padding: padded positions
        // dilute the mean.
        let mut layer =
            Pool2d::new(PoolMode::Mean, (3, 3), (1, 1), Padding::Same).unwrap();
        let input = Tensor::filled(&[1, 1, 2, 2], 9.0);
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.shape(), &[1, 1, 2, 2]);
        // Each window sees the four real elements and five zeros.
        assert_eq!(output.at(&[0, 0, 0, 0]), 4.0);
    }

    #[test]
    fn test_max_pool_ties_go_to_first() {
        let mut layer = Pool2d::max(2).unwrap();
        let input = Tensor::filled(&[1, 1, 2, 2], 5.0);
        layer.forward(&input).unwrap();
        let upstream = Tensor::filled(&[1, 1, 1, 1], 1.0);
        let grad = layer.backward(&upstream).unwrap();
        assert_eq!(grad.at(&[0, 0, 0, 0]), 1.0);
        assert_eq!(grad.sum(), 1.0);
    }

    #[test]
    fn test_rejects_causal_padding() {
        let err =
            Pool2d::new(PoolMode::Max, (2, 2), (2, 2), Padding::Causal).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_backward_requires_forward() {
        let mut layer = Pool2d::max(2).unwrap();
        let upstream = Tensor::<f64>::zeros(&[1, 1, 2, 2]);
        assert!(matches!(layer.backward(&upstream), Err(Error::State(_))));
    }
}
