use std::num::NonZeroUsize;

use crate::{
    coefficient::RampPolicy,
    error::{Result, SyncErr},
};

/// Synchronization strategy selected at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncStrategy {
    /// Push the weighted difference from the last merged snapshot.
    DeltaAccumulation,
    /// Pull the merged snapshot first, then push `alpha` times the
    /// local deviation from it.
    ElasticAveraging { alpha: f32 },
}

/// Construction-time configuration of the synchronization engine.
///
/// Immutable once handed to the engine; every knob is validated before
/// any buffer is allocated or any table call is made.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    workers: NonZeroUsize,
    pipelined: bool,
    momentum: f32,
    elastic: f32,
    ramp: RampPolicy,
}

impl SyncConfig {
    /// Creates a configuration for `workers` training workers.
    ///
    /// Defaults: pipelined transfers, delta accumulation, no ramp.
    pub fn new(workers: NonZeroUsize) -> Self {
        Self {
            workers,
            pipelined: true,
            momentum: 0.0,
            elastic: 0.0,
            ramp: RampPolicy::None,
        }
    }

    /// Enables or disables the pipelined transfer path.
    pub fn with_pipelining(mut self, pipelined: bool) -> Self {
        self.pipelined = pipelined;
        self
    }

    /// Sets the momentum blending coefficient (delta accumulation).
    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    /// Sets the elastic blending coefficient (elastic averaging).
    pub fn with_elastic(mut self, elastic: f32) -> Self {
        self.elastic = elastic;
        self
    }

    /// Sets the ramp schedule for the push weight.
    pub fn with_ramp(mut self, ramp: RampPolicy) -> Self {
        self.ramp = ramp;
        self
    }

    /// Checks the configuration's internal consistency.
    ///
    /// # Returns
    /// A `Config` error if both blending coefficients are nonzero, or a
    /// ramp schedule has zero rounds.
    pub fn validate(&self) -> Result<()> {
        if self.momentum != 0.0 && self.elastic != 0.0 {
            return Err(SyncErr::Config {
                reason: "momentum and elastic blending are mutually exclusive",
            });
        }

        if let RampPolicy::Linearly { rounds, .. } | RampPolicy::Staircase { rounds, .. } =
            self.ramp
        {
            if rounds == 0 {
                return Err(SyncErr::Config {
                    reason: "a ramp schedule needs at least one round",
                });
            }
        }

        Ok(())
    }

    /// Number of training workers.
    pub fn workers(&self) -> usize {
        self.workers.get()
    }

    /// Whether transfers overlap the next round's computation.
    pub fn pipelined(&self) -> bool {
        self.pipelined
    }

    /// Number of cache slots the staging pool needs.
    pub fn slot_count(&self) -> usize {
        if self.pipelined { 2 } else { 1 }
    }

    /// The configured ramp schedule.
    pub fn ramp(&self) -> RampPolicy {
        self.ramp
    }

    /// The strategy implied by the blending coefficients.
    pub fn strategy(&self) -> SyncStrategy {
        if self.elastic != 0.0 {
            SyncStrategy::ElasticAveraging {
                alpha: self.elastic,
            }
        } else {
            SyncStrategy::DeltaAccumulation
        }
    }
}
