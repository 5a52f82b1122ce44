use std::mem;

use rayon::prelude::*;

use crate::{
    backend::{self, ComputeBackend},
    bridge::ParamTensor,
    layout::ParamLayout,
};

/// Owned staging buffers for one worker's synchronization rounds.
///
/// All buffers span the full flattened parameter space: the rotating
/// cache slots, the delta buffer, and the two dedicated checkpoint
/// buffers. The pool is moved wholesale into the transfer task for the
/// duration of a round, so exclusive ownership is what guarantees that
/// no buffer is ever touched by two threads at once.
#[derive(Debug)]
pub struct StagingPool {
    slots: Vec<Box<[f32]>>,
    delta: Box<[f32]>,
    local_stash: Box<[f32]>,
    server_stash: Box<[f32]>,
}

impl StagingPool {
    /// Reserves `slot_count` cache slots plus the delta and checkpoint
    /// buffers, all zeroed and `total_len` elements long.
    pub fn allocate(total_len: usize, slot_count: usize) -> Self {
        Self {
            slots: (0..slot_count)
                .map(|_| vec![0.0; total_len].into_boxed_slice())
                .collect(),
            delta: vec![0.0; total_len].into_boxed_slice(),
            local_stash: vec![0.0; total_len].into_boxed_slice(),
            server_stash: vec![0.0; total_len].into_boxed_slice(),
        }
    }

    /// Round-robin successor of `current`.
    pub fn next_slot(&self, current: usize) -> usize {
        (current + 1) % self.slots.len()
    }

    /// Number of cache slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Read view of a cache slot.
    pub fn slot(&self, idx: usize) -> &[f32] {
        &self.slots[idx]
    }

    /// Mutable view of a cache slot.
    pub fn slot_mut(&mut self, idx: usize) -> &mut [f32] {
        &mut self.slots[idx]
    }

    /// Read view of the delta buffer.
    pub fn delta(&self) -> &[f32] {
        &self.delta
    }

    /// Mutable view of the delta buffer.
    pub fn delta_mut(&mut self) -> &mut [f32] {
        &mut self.delta
    }

    /// Read view of the stashed local checkpoint snapshot.
    pub fn local_stash(&self) -> &[f32] {
        &self.local_stash
    }

    /// Mutable view of the local checkpoint buffer.
    pub fn local_stash_mut(&mut self) -> &mut [f32] {
        &mut self.local_stash
    }

    /// Read view of the pulled server checkpoint snapshot.
    pub fn server_stash(&self) -> &[f32] {
        &self.server_stash
    }

    /// Mutable view of the server checkpoint buffer.
    pub fn server_stash_mut(&mut self) -> &mut [f32] {
        &mut self.server_stash
    }

    /// Copies every tensor's live values into cache slot `slot`.
    pub fn gather<B, T>(
        &mut self,
        compute: &mut B,
        tensors: &[T],
        layout: &ParamLayout,
        slot: usize,
    ) where
        B: ComputeBackend,
        T: ParamTensor,
    {
        backend::stage_all_out(compute, tensors, layout, &mut self.slots[slot]);
    }

    /// Writes cache slot `slot` back into every tensor.
    pub fn scatter<B, T>(
        &mut self,
        compute: &mut B,
        tensors: &mut [T],
        layout: &ParamLayout,
        slot: usize,
    ) where
        B: ComputeBackend,
        T: ParamTensor,
    {
        backend::stage_all_in(compute, tensors, layout, &self.slots[slot]);
    }

    /// Initializes every other slot from slot 0 so all slots start from
    /// the same snapshot.
    pub fn mirror_slots(&mut self) {
        if let Some((first, rest)) = self.slots.split_first_mut() {
            for slot in rest {
                slot.copy_from_slice(first);
            }
        }
    }

    /// `delta = slot - delta`, elementwise over the full length.
    ///
    /// Turns the stored baseline into the outgoing difference.
    pub fn diff_into_delta(&mut self, slot: usize) {
        self.delta
            .par_iter_mut()
            .zip(self.slots[slot].par_iter())
            .for_each(|(d, s)| *d = *s - *d);
    }

    /// `slot = slot - delta`, elementwise over the full length.
    ///
    /// Turns the local snapshot into the local-minus-merged deviation.
    pub fn diff_into_slot(&mut self, slot: usize) {
        self.slots[slot]
            .par_iter_mut()
            .zip(self.delta.par_iter())
            .for_each(|(s, d)| *s -= *d);
    }

    /// Re-seeds the delta buffer with a copy of cache slot `slot`.
    pub fn seed_delta(&mut self, slot: usize) {
        self.delta.copy_from_slice(&self.slots[slot]);
    }

    /// Swaps cache slot `slot` with the delta buffer.
    pub fn swap_slot_delta(&mut self, slot: usize) {
        mem::swap(&mut self.slots[slot], &mut self.delta);
    }
}
