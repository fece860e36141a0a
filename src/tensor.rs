//! Tensor Container
//!
//! A minimal tensor type backing the dropout transform. Tensors store a flat
//! data vector in row-major order together with a shape, which is all the
//! transform needs: it treats its input as a sequence of elements and never
//! indexes across dimensions.
//!
//! The element type is generic over [`num_traits::Float`] so the same code
//! serves single and double precision.

use num_traits::Float;
use rayon::prelude::*;

/// A multi-dimensional array of floating-point values
///
/// # Fields
///
/// - `data`: Flat array of values in row-major order
/// - `shape`: Dimensions (e.g., `[2, 3]` for a 2x3 matrix)
#[derive(Clone, Debug)]
pub struct Tensor<T> {
    /// Flat storage of all tensor elements
    pub data: Vec<T>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
}

impl<T: Float + Send + Sync> Tensor<T> {
    /// Create a new tensor with given data and shape
    ///
    /// # Panics
    ///
    /// Panics if the product of shape dimensions doesn't equal data length
    ///
    /// # Example
    ///
    /// ```rust
    /// # use puck::Tensor;
    /// let tensor = Tensor::new(vec![1.0f32, 2.0, 3.0, 4.0], vec![2, 2]);
    /// assert_eq!(tensor.shape, vec![2, 2]);
    /// ```
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> Self {
        let expected_size: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_size,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_size
        );

        Self { data, shape }
    }

    /// Create a tensor filled with zeros
    ///
    /// # Example
    ///
    /// ```rust
    /// # use puck::Tensor;
    /// let tensor = Tensor::<f32>::zeros(vec![3, 4]);
    /// assert_eq!(tensor.count(), 12);
    /// ```
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        let data = vec![T::zero(); size];
        Self::new(data, shape)
    }

    /// Total number of elements
    pub fn count(&self) -> usize {
        self.data.len()
    }

    /// Multiply all elements by scalar
    pub fn mul_scalar(&self, scalar: T) -> Tensor<T> {
        let result = self.data.par_iter().map(|&x| x * scalar).collect();
        Tensor::new(result, self.shape.clone())
    }
}
