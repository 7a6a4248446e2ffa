//! Tensor type for dense n-dimensional f32 data.

use serde::{Deserialize, Serialize};

/// A dense row-major tensor of f32 values, rank 1 to 4.
///
/// Activations flow through the network as `(images, height, width,
/// channels)` tensors until a flatten or dense layer collapses them to
/// `(images, units)`.
///
/// # Examples
///
/// ```
/// use percibir::primitives::Tensor;
///
/// let t = Tensor::from_vec(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).expect("data length matches shape");
/// assert_eq!(t.dims(), &[2, 3]);
/// assert_eq!(t.element_count(), 6);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    dims: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a tensor of zeros.
    #[must_use]
    pub fn zeros(dims: &[usize]) -> Self {
        let count = dims.iter().product();
        Self {
            dims: dims.to_vec(),
            data: vec![0.0; count],
        }
    }

    /// Creates a tensor from owned data.
    ///
    /// # Errors
    ///
    /// Returns an error if data length doesn't match the shape's element
    /// count.
    pub fn from_vec(dims: &[usize], data: Vec<f32>) -> Result<Self, &'static str> {
        let count: usize = dims.iter().product();
        if data.len() != count {
            return Err("Data length must equal the product of the dimensions");
        }
        Ok(Self {
            dims: dims.to_vec(),
            data,
        })
    }

    /// Returns the shape.
    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns the total number of elements.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.data.len()
    }

    /// Returns the underlying data as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Returns the underlying data as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the tensor and returns the underlying data.
    #[must_use]
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Reinterprets the shape without touching the data.
    ///
    /// # Errors
    ///
    /// Returns an error if the new shape's element count differs.
    pub fn reshape(&mut self, dims: &[usize]) -> Result<(), &'static str> {
        let count: usize = dims.iter().product();
        if count != self.data.len() {
            return Err("Reshape must preserve the element count");
        }
        self.dims = dims.to_vec();
        Ok(())
    }

    /// Row-major offset of an index tuple.
    ///
    /// # Panics
    ///
    /// Panics if `index` has a different rank than the tensor.
    #[must_use]
    pub fn offset(&self, index: &[usize]) -> usize {
        assert_eq!(index.len(), self.dims.len());
        let mut offset = 0;
        for (i, &idx) in index.iter().enumerate() {
            offset = offset * self.dims[i] + idx;
        }
        offset
    }

    /// Element count of one entry along the first dimension.
    ///
    /// For a `(N, H, W, C)` activation this is the size of a single image.
    #[must_use]
    pub fn stride_of_first(&self) -> usize {
        self.dims.iter().skip(1).product()
    }

    /// Immutable view of entry `index` along the first dimension.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn first_dim_slice(&self, index: usize) -> &[f32] {
        let stride = self.stride_of_first();
        &self.data[index * stride..(index + 1) * stride]
    }

    /// Mutable view of entry `index` along the first dimension.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn first_dim_slice_mut(&mut self, index: usize) -> &mut [f32] {
        let stride = self.stride_of_first();
        &mut self.data[index * stride..(index + 1) * stride]
    }
}
