// src/nn/layers/mod.rs
// Layer implementations. The convolutional layers share the im2col plumbing
// in `utils`; the rest are self-contained.

pub mod batchnorm;
pub mod conv1d;
pub mod conv2d;
pub mod deconv2d;
pub mod flatten;
pub mod linear;
pub mod pooling;

mod utils;

pub use batchnorm::BatchNorm;
pub use conv1d::Conv1d;
pub use conv2d::Conv2d;
pub use deconv2d::Deconv2d;
pub use flatten::Flatten;
pub use linear::Linear;
pub use pooling::{Pool2d, PoolMode};
