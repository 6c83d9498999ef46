// Convolution arithmetic engine: padding/output-size resolution and the
// im2col/col2im lowering the convolutional layers are built on.

pub mod im2col;
pub mod padding;

pub use im2col::{ConvGeometry, col2im, im2col};
pub use padding::{AxisGeometry, Padding, effective_span};
