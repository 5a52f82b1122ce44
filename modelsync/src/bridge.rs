/// Read/write access to one trainable tensor's flat values.
///
/// The engine moves snapshots through this seam and never owns tensor
/// storage; each call touches only the tensor it is given.
pub trait ParamTensor {
    /// Number of elements in the tensor.
    fn len(&self) -> usize;

    /// Whether the tensor holds no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the tensor's current values into `out`.
    ///
    /// `out.len()` always equals `self.len()`.
    fn copy_to(&self, out: &mut [f32]);

    /// Overwrites the tensor's values from `src`.
    ///
    /// `src.len()` always equals `self.len()`.
    fn assign(&mut self, src: &[f32]);
}

/// Heap-backed tensor used by tests and the simulation binary.
#[derive(Debug, Clone, PartialEq)]
pub struct VecTensor(Vec<f32>);

impl VecTensor {
    /// Wraps an owned flat value vector.
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// Creates a zero-filled tensor of `len` elements.
    pub fn zeros(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    /// The tensor's current values.
    pub fn values(&self) -> &[f32] {
        &self.0
    }

    /// Mutable view of the tensor's values.
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.0
    }
}

impl ParamTensor for VecTensor {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn copy_to(&self, out: &mut [f32]) {
        out.copy_from_slice(&self.0);
    }

    fn assign(&mut self, src: &[f32]) {
        self.0.copy_from_slice(src);
    }
}
