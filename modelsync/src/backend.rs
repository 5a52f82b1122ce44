use crate::{bridge::ParamTensor, layout::ParamLayout};

/// Where staging copies between the model and the buffers run.
///
/// The scheduler is generic over the backend and never branches on the
/// variant. The host backend copies synchronously; a device-accelerated
/// backend would enqueue transfers on its own stream and complete them
/// in `fence`.
pub trait ComputeBackend {
    /// Copies a tensor's live values into a staging slice.
    fn stage_out<T: ParamTensor + ?Sized>(&mut self, tensor: &T, dst: &mut [f32]);

    /// Writes a staging slice back into a tensor.
    fn stage_in<T: ParamTensor + ?Sized>(&mut self, tensor: &mut T, src: &[f32]);

    /// Completes any in-flight staging copies.
    fn fence(&mut self) {}
}

/// Host-memory backend: staging copies are plain slice copies.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostBackend;

impl ComputeBackend for HostBackend {
    fn stage_out<T: ParamTensor + ?Sized>(&mut self, tensor: &T, dst: &mut [f32]) {
        tensor.copy_to(dst);
    }

    fn stage_in<T: ParamTensor + ?Sized>(&mut self, tensor: &mut T, src: &[f32]) {
        tensor.assign(src);
    }
}

/// Copies every tensor's live values into `dst` at its layout offset.
pub(crate) fn stage_all_out<B, T>(
    backend: &mut B,
    tensors: &[T],
    layout: &ParamLayout,
    dst: &mut [f32],
) where
    B: ComputeBackend,
    T: ParamTensor,
{
    for (i, tensor) in tensors.iter().enumerate() {
        backend.stage_out(tensor, &mut dst[layout.range(i)]);
    }
    backend.fence();
}

/// Writes `src` back into every tensor from its layout offset.
pub(crate) fn stage_all_in<B, T>(
    backend: &mut B,
    tensors: &mut [T],
    layout: &ParamLayout,
    src: &[f32],
) where
    B: ComputeBackend,
    T: ParamTensor,
{
    for (i, tensor) in tensors.iter_mut().enumerate() {
        backend.stage_in(tensor, &src[layout.range(i)]);
    }
    backend.fence();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::VecTensor;

    #[test]
    fn host_staging_roundtrip() {
        let layout = ParamLayout::plan(&[2, 3]).unwrap();
        let tensors = vec![
            VecTensor::new(vec![1.0, 2.0]),
            VecTensor::new(vec![3.0, 4.0, 5.0]),
        ];

        let mut backend = HostBackend;
        let mut flat = vec![0.0; layout.total_len()];
        stage_all_out(&mut backend, &tensors, &layout, &mut flat);
        assert_eq!(flat, [1.0, 2.0, 3.0, 4.0, 5.0]);

        let mut restored = vec![VecTensor::zeros(2), VecTensor::zeros(3)];
        stage_all_in(&mut backend, &mut restored, &layout, &flat);
        assert_eq!(restored, tensors);
    }
}
