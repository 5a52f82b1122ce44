use std::sync::Arc;

use log::{debug, error};
use paramtable::ParameterTable;
use tokio::{sync::mpsc, task};

use crate::{
    config::SyncStrategy,
    error::Result,
    layout::PartitionMap,
    staging::StagingPool,
};

/// The single table holding the model's weights.
pub(crate) const WEIGHTS_TABLE: usize = 0;

/// One round's worth of work for the transfer task.
///
/// The descriptor owns the staging pool while the round is in flight,
/// so the caller cannot touch any staging buffer until the pool comes
/// back in the matching `RoundOutcome`.
pub(crate) struct RoundDescriptor {
    pub pool: StagingPool,
    pub active: usize,
    pub factor: f32,
    pub round: u64,
}

/// Completion message handing the pool back to the scheduler.
pub(crate) struct RoundOutcome {
    pub pool: StagingPool,
    pub result: Result<()>,
}

/// Executes one synchronization transfer against the table.
///
/// On entry the active slot holds the local snapshot and, for delta
/// accumulation, the delta buffer holds the last merged snapshot. On
/// success the active slot holds the freshly merged snapshot and the
/// delta buffer holds the next push baseline (delta accumulation) or
/// the post-push residual (elastic averaging).
pub(crate) async fn run_round<T>(
    table: &T,
    strategy: SyncStrategy,
    partitions: &PartitionMap,
    pool: &mut StagingPool,
    active: usize,
    factor: f32,
) -> Result<()>
where
    T: ParameterTable + Sync,
{
    match strategy {
        SyncStrategy::DeltaAccumulation => {
            task::block_in_place(|| pool.diff_into_delta(active));

            for p in 0..partitions.partitions() {
                table
                    .add(WEIGHTS_TABLE, p, &pool.delta()[partitions.range(p)], factor)
                    .await?;
            }
            table
                .batch_load(
                    WEIGHTS_TABLE,
                    pool.slot_mut(active),
                    partitions.offsets(),
                    partitions.sizes(),
                )
                .await?;

            task::block_in_place(|| pool.seed_delta(active));
        }

        SyncStrategy::ElasticAveraging { alpha } => {
            table
                .batch_load(
                    WEIGHTS_TABLE,
                    pool.delta_mut(),
                    partitions.offsets(),
                    partitions.sizes(),
                )
                .await?;

            task::block_in_place(|| pool.diff_into_slot(active));

            for p in 0..partitions.partitions() {
                table
                    .add(WEIGHTS_TABLE, p, &pool.slot(active)[partitions.range(p)], alpha)
                    .await?;
            }

            // Slot takes the merged snapshot, delta keeps the residual.
            pool.swap_slot_delta(active);
        }
    }

    Ok(())
}

/// Spawns the long-lived background transfer worker.
///
/// The worker handles one round descriptor at a time and answers every
/// descriptor with a `RoundOutcome`; closing the descriptor channel
/// stops it.
pub(crate) fn spawn_transfer_task<T>(
    table: Arc<T>,
    strategy: SyncStrategy,
    partitions: PartitionMap,
) -> (mpsc::Sender<RoundDescriptor>, mpsc::Receiver<RoundOutcome>)
where
    T: ParameterTable + Send + Sync + 'static,
{
    let (descriptor_tx, mut descriptor_rx) = mpsc::channel::<RoundDescriptor>(1);
    let (outcome_tx, outcome_rx) = mpsc::channel::<RoundOutcome>(1);

    tokio::spawn(async move {
        while let Some(mut job) = descriptor_rx.recv().await {
            debug!(round = job.round, slot = job.active; "transfer round started");

            let result = run_round(
                &*table,
                strategy,
                &partitions,
                &mut job.pool,
                job.active,
                job.factor,
            )
            .await;

            if let Err(e) = &result {
                error!(round = job.round; "transfer round failed: {e}");
            }

            let outcome = RoundOutcome {
                pool: job.pool,
                result,
            };
            if outcome_tx.send(outcome).await.is_err() {
                break;
            }
        }
    });

    (descriptor_tx, outcome_rx)
}
