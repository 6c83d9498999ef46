// src/conv/padding.rs
// Padding and output-size arithmetic for one spatial axis. This is the single
// source of truth consumed by the im2col engine and inverted by the
// transposed-convolution layer.

use crate::error::Error;

/// Padding mode for one spatial axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// No padding; the kernel only visits fully valid positions.
    Valid,
    /// Pad so the output size is `ceil(input / stride)`, split evenly with
    /// the extra element after.
    Same,
    /// Same total padding as `Same`, placed entirely before the input.
    /// Output position `t` then depends only on inputs at positions `<= t`,
    /// which is what temporal convolutions need.
    Causal,
    /// Pad by the full effective kernel span minus one on both sides.
    Full,
    /// Explicit `(before, after)` element counts.
    Explicit(usize, usize),
}

/// Extent of a dilated kernel: `dilation * (kernel - 1) + 1`.
///
/// Both arguments must be at least 1; [`AxisGeometry::resolve`] validates
/// them before calling this.
pub fn effective_span(kernel: usize, dilation: usize) -> usize {
    debug_assert!(kernel >= 1, "kernel size must be at least 1");
    debug_assert!(dilation >= 1, "dilation must be at least 1");
    dilation * (kernel - 1) + 1
}

/// Fully resolved geometry of one spatial axis of a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisGeometry {
    pub input: usize,
    pub kernel: usize,
    pub stride: usize,
    pub dilation: usize,
    pub pad_before: usize,
    pub pad_after: usize,
    pub output: usize,
}

impl AxisGeometry {
    /// Resolve a padding mode against a concrete input size.
    pub fn resolve(
        input: usize,
        kernel: usize,
        stride: usize,
        dilation: usize,
        padding: Padding,
    ) -> Result<Self, Error> {
        check_axis_config(input, kernel, stride, dilation)?;
        let span = effective_span(kernel, dilation);

        let (pad_before, pad_after) = match padding {
            Padding::Valid => (0, 0),
            Padding::Same | Padding::Causal => {
                let output = input.div_ceil(stride);
                let total = ((output - 1) * stride + span).saturating_sub(input);
                match padding {
                    Padding::Causal => (total, 0),
                    _ => (total / 2, total - total / 2),
                }
            }
            Padding::Full => (span - 1, span - 1),
            Padding::Explicit(before, after) => (before, after),
        };

        let padded = input + pad_before + pad_after;
        if padded < span {
            return Err(Error::config(format!(
                "input size {} with padding ({}, {}) is smaller than the effective kernel span {}",
                input, pad_before, pad_after, span
            )));
        }
        let output = (padded - span) / stride + 1;

        Ok(Self {
            input,
            kernel,
            stride,
            dilation,
            pad_before,
            pad_after,
            output,
        })
    }

    /// Resolve the axis geometry of a transposed convolution.
    ///
    /// `input` here is the transposed layer's input size; the returned
    /// geometry describes the convolution this layer is the adjoint of, so
    /// its `output` equals `input` and its `input` is the transposed layer's
    /// output size `stride * (input - 1) + span - pad_before - pad_after`.
    pub fn resolve_transposed(
        input: usize,
        kernel: usize,
        stride: usize,
        dilation: usize,
        padding: Padding,
    ) -> Result<Self, Error> {
        check_axis_config(input, kernel, stride, dilation)?;
        let span = effective_span(kernel, dilation);

        let (pad_before, pad_after, output) = match padding {
            Padding::Causal => {
                return Err(Error::config(
                    "causal padding is not defined for transposed convolution",
                ));
            }
            Padding::Valid => (0, 0, stride * (input - 1) + span),
            Padding::Same => {
                // Mirror of the Same rule: the adjoint convolution maps
                // output -> ceil(output / stride) = input.
                let output = input * stride;
                let total = (stride * (input - 1) + span).saturating_sub(output);
                (total / 2, total - total / 2, output)
            }
            Padding::Full => {
                let trimmed = (stride * (input - 1) + span).checked_sub(2 * (span - 1));
                match trimmed {
                    Some(output) if output >= 1 => (span - 1, span - 1, output),
                    _ => {
                        return Err(Error::config(format!(
                            "full padding leaves no output for input size {} and kernel span {}",
                            input, span
                        )));
                    }
                }
            }
            Padding::Explicit(before, after) => {
                let trimmed = (stride * (input - 1) + span).checked_sub(before + after);
                match trimmed {
                    Some(output) if output >= 1 => (before, after, output),
                    _ => {
                        return Err(Error::config(format!(
                            "padding ({}, {}) leaves no output for input size {} and kernel span {}",
                            before, after, input, span
                        )));
                    }
                }
            }
        };

        Ok(Self {
            input: output,
            kernel,
            stride,
            dilation,
            pad_before,
            pad_after,
            output: input,
        })
    }
}

fn check_axis_config(
    input: usize,
    kernel: usize,
    stride: usize,
    dilation: usize,
) -> Result<(), Error> {
    if input == 0 {
        return Err(Error::config("input axis has size 0"));
    }
    if kernel == 0 {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_span() {
        assert_eq!(effective_span(3, 1), 3);
        assert_eq!(effective_span(3, 2), 5);
        assert_eq!(effective_span(1, 4), 1);
    }

    #[test]
    #[should_panic(expected = "kernel size must be at least 1")]
    fn test_effective_span_rejects_zero_kernel() {
        effective_span(0, 1);
    }

    #[test]
    fn test_valid_output_size() {
        // O = floor((I - E) / S) + 1
        let g = AxisGeometry::resolve(7, 3, 1, 1, Padding::Valid).unwrap();
        assert_eq!((g.pad_before, g.pad_after, g.output), (0, 0, 5));

        let g = AxisGeometry::resolve(7, 3, 2, 1, Padding::Valid).unwrap();
        assert_eq!(g.output, 3);

        let g = AxisGeometry::resolve(7, 3, 1, 2, Padding::Valid).unwrap();
        assert_eq!(g.output, 3); // span 5
    }

    #[test]
    fn test_valid_rejects_small_input() {
        let err = AxisGeometry::resolve(2, 3, 1, 1, Padding::Valid).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        // Dilation grows the span past the input.
        let err = AxisGeometry::resolve(4, 3, 1, 2, Padding::Valid).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_same_output_is_ceil_of_input_over_stride() {
        for input in 1..=12usize {
            for stride in 1..=3usize {
                for kernel in 1..=4usize {
                    for dilation in 1..=2usize {
                        let g =
                            AxisGeometry::resolve(input, kernel, stride, dilation, Padding::Same)
                                .unwrap();
                        assert_eq!(g.output, input.div_ceil(stride));
                        assert!(g.pad_before <= g.pad_after);
                    }
                }
            }
        }
    }

    #[test]
    fn test_causal_puts_all_padding_before() {
        let same = AxisGeometry::resolve(8, 3, 1, 2, Padding::Same).unwrap();
        let causal = AxisGeometry::resolve(8, 3, 1, 2, Padding::Causal).unwrap();
        assert_eq!(causal.output, same.output);
        assert_eq!(
            causal.pad_before,
            same.pad_before + same.pad_after
        );
        assert_eq!(causal.pad_after, 0);
    }

    #[test]
    fn test_full_padding() {
        // With stride 1, O = I + E - 1.
        let g = AxisGeometry::resolve(5, 3, 1, 1, Padding::Full).unwrap();
        assert_eq!((g.pad_before, g.pad_after), (2, 2));
        assert_eq!(g.output, 7);
    }

    #[test]
    fn test_explicit_padding() {
        let g = AxisGeometry::resolve(5, 3, 1, 1, Padding::Explicit(1, 0)).unwrap();
        assert_eq!(g.output, 4);
    }

    #[test]
    fn test_rejects_degenerate_axis() {
        assert!(AxisGeometry::resolve(0, 3, 1, 1, Padding::Same).is_err());
        assert!(AxisGeometry::resolve(5, 0, 1, 1, Padding::Same).is_err());
        assert!(AxisGeometry::resolve(5, 3, 0, 1, Padding::Same).is_err());
        assert!(AxisGeometry::resolve(5, 3, 1, 0, Padding::Same).is_err());
    }

    #[test]
    fn test_transposed_inverts_forward_arithmetic() {
        // Any transposed geometry must round-trip through the forward rule.
        for input in 1..=8usize {
            for stride in 1..=3usize {
                for kernel in 1..=4usize {
                    for padding in [Padding::Valid, Padding::Same] {
                        let t =
                            AxisGeometry::resolve_transposed(input, kernel, stride, 1, padding)
                                .unwrap();
                        assert_eq!(t.output, input);
                        let forward = AxisGeometry::resolve(
                            t.input,
                            kernel,
                            stride,
                            1,
                            Padding::Explicit(t.pad_before, t.pad_after),
                        )
                        .unwrap();
                        assert_eq!(forward.output, input);
                    }
                }
            }
        }
    }

    #[test]
    fn test_transposed_same_scales_by_stride() {
        let t = AxisGeometry::resolve_transposed(4, 3, 2, 1, Padding::Same).unwrap();
        assert_eq!(t.input, 8);
    }

    #[test]
    fn test_transposed_rejects_causal() {
        let err = AxisGeometry::resolve_transposed(4, 3, 1, 1, Padding::Causal).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_transposed_rejects_padding_that_consumes_output() {
        let err =
            AxisGeometry::resolve_transposed(1, 3, 1, 1, Padding::Explicit(2, 2)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
