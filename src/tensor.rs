// src/tensor.rs
// Dense, row-major tensor type backing every layer and optimizer in the crate.
// Thin wrapper over ndarray::ArrayD so matrix multiplication and views come
// from ndarray instead of hand-rolled loops.

use ndarray::{ArrayD, ArrayView2, ArrayViewD, ArrayViewMutD, Axis, Ix2, IxDyn};

use crate::error::Error;
use crate::number::Real;

/// An owned, contiguous block of float values plus its shape.
///
/// Invariant: `size() == shape().iter().product()`. All operations validate
/// shapes before touching any data, so a failed call never observes a
/// half-written tensor.
///
/// # Examples
///
/// ```rust
/// use ironlearn::Tensor;
///
/// let t = Tensor::<f64>::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
/// assert_eq!(t.shape(), &[2, 2]);
/// assert_eq!(t.at(&[1, 0]), 3.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T>
where
    T: Real,
{
    data: ArrayD<T>,
}

impl<T> Tensor<T>
where
    T: Real,
{
    /// Zero-filled tensor with the given shape.
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            data: ArrayD::zeros(IxDyn(shape)),
        }
    }

    /// Tensor with every element set to `value`.
    pub fn filled(shape: &[usize], value: T) -> Self {
        Self {
            data: ArrayD::from_elem(IxDyn(shape), value),
        }
    }

    /// Build a tensor from flat data in row-major order.
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self, Error> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(Error::shape(format!(
                "cannot build tensor of shape {:?} from {} elements",
                shape,
                data.len()
            )));
        }
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(|data| Self { data })
            .map_err(|e| Error::shape(e.to_string()))
    }

    pub fn from_array(data: ArrayD<T>) -> Self {
        Self { data }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Element access by multi-index. Panics on an out-of-bounds index, like
    /// slice indexing does.
    pub fn at(&self, index: &[usize]) -> T {
        self.data[IxDyn(index)]
    }

    pub fn set(&mut self, index: &[usize], value: T) {
        self.data[IxDyn(index)] = value;
    }

    /// Flat row-major view of the data.
    pub fn as_slice(&self) -> Result<&[T], Error> {
        self.data
            .as_slice()
            .ok_or_else(|| Error::shape("tensor storage is not contiguous".to_string()))
    }

    /// Borrow the underlying ndarray storage.
    pub fn array(&self) -> &ArrayD<T> {
        &self.data
    }

    pub fn array_mut(&mut self) -> &mut ArrayD<T> {
        &mut self.data
    }

    /// Reinterpret the data under a new shape with the same total length.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self, Error> {
        let expected: usize = shape.iter().product();
        if self.size() != expected {
            return Err(Error::shape(format!(
                "cannot reshape {:?} ({} elements) into {:?} ({} elements)",
                self.shape(),
                self.size(),
                shape,
                expected
            )));
        }
        self.data
            .clone()
            .into_shape_with_order(IxDyn(shape))
            .map(|data| Self { data })
            .map_err(|e| Error::shape(e.to_string()))
    }

    /// View of one entry along the leading batch axis, sharing storage with
    /// the owner.
    pub fn batch_view(&self, index: usize) -> Result<ArrayViewD<'_, T>, Error> {
        self.check_batch_index(index)?;
        Ok(self.data.index_axis(Axis(0), index))
    }

    /// Mutable view along the leading batch axis; writes through the view are
    /// visible to the owner.
    pub fn batch_view_mut(&mut self, index: usize) -> Result<ArrayViewMutD<'_, T>, Error> {
        self.check_batch_index(index)?;
        Ok(self.data.index_axis_mut(Axis(0), index))
    }

    fn check_batch_index(&self, index: usize) -> Result<(), Error> {
        if self.ndim() == 0 {
            return Err(Error::shape("cannot take a batch view of a scalar tensor"));
        }
        let batch = self.shape()[0];
        if index >= batch {
            return Err(Error::shape(format!(
                "batch index {} out of range for batch size {}",
                index, batch
            )));
        }
        Ok(())
    }

    fn check_same_shape(&self, other: &Self, op: &str) -> Result<(), Error> {
        if self.shape() != other.shape() {
            return Err(Error::shape(format!(
                "elementwise {} requires matching shapes, got {:?} and {:?}",
                op,
                self.shape(),
                other.shape()
            )));
        }
        Ok(())
    }

    pub fn add(&self, other: &Self) -> Result<Self, Error> {
        self.check_same_shape(other, "add")?;
        Ok(Self::from_array(&self.data + &other.data))
    }

    pub fn sub(&self, other: &Self) -> Result<Self, Error> {
        self.check_same_shape(other, "sub")?;
        Ok(Self::from_array(&self.data - &other.data))
    }

    pub fn mul(&self, other: &Self) -> Result<Self, Error> {
        self.check_same_shape(other, "mul")?;
        Ok(Self::from_array(&self.data * &other.data))
    }

    pub fn div(&self, other: &Self) -> Result<Self, Error> {
        self.check_same_shape(other, "div")?;
        Ok(Self::from_array(&self.data / &other.data))
    }

    pub fn add_scalar(&self, value: T) -> Self {
        Self::from_array(&self.data + value)
    }

    pub fn mul_scalar(&self, value: T) -> Self {
        Self::from_array(&self.data * value)
    }

    /// Elementwise map into a new tensor.
    pub fn map(&self, f: impl Fn(T) -> T) -> Self {
        Self::from_array(self.data.map(|&v| f(v)))
    }

    pub fn sum(&self) -> T {
        self.data.sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    /// Matrix multiply for 2D tensors: `[m, k] x [k, n] -> [m, n]`.
    pub fn matmul(&self, other: &Self) -> Result<Self, Error> {
        let lhs: ArrayView2<T> = self
            .data
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| Error::shape(format!("matmul requires a 2D lhs, got {:?}", self.shape())))?;
        let rhs: ArrayView2<T> = other
            .data
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| {
                Error::shape(format!("matmul requires a 2D rhs, got {:?}", other.shape()))
            })?;
        if lhs.shape()[1] != rhs.shape()[0] {
            return Err(Error::shape(format!(
                "matmul inner dimensions disagree: {:?} x {:?}",
                self.shape(),
                other.shape()
            )));
        }
        Ok(Self::from_array(lhs.dot(&rhs).into_dyn()))
    }
}
