use std::sync::Arc;

use log::{debug, info};
use paramtable::{ElementKind, ParameterTable};
use tokio::sync::mpsc;

use crate::{
    backend::{self, ComputeBackend, HostBackend},
    bridge::ParamTensor,
    coefficient::RampPolicy,
    config::{SyncConfig, SyncStrategy},
    error::{Result, SyncErr},
    layout::{ParamLayout, PartitionMap},
    staging::StagingPool,
    transfer::{self, RoundDescriptor, RoundOutcome, WEIGHTS_TABLE},
};

/// Channels to the long-lived background transfer task.
struct TransferLink {
    descriptor_tx: mpsc::Sender<RoundDescriptor>,
    outcome_rx: mpsc::Receiver<RoundOutcome>,
}

/// Asynchronous model-parameter synchronization engine.
///
/// One instance per training worker. The engine keeps staged snapshots
/// of the flattened model, exchanges weighted deltas with the parameter
/// table, and, when pipelined, overlaps round *k*'s transfer with the
/// computation feeding round *k + 1* through double-buffered cache
/// slots. The staging pool travels to the transfer task and back each
/// round, so at most one transfer is ever in flight and no buffer is
/// shared between threads.
pub struct ModelSync<T, B = HostBackend> {
    table: Arc<T>,
    compute: B,
    layout: ParamLayout,
    partitions: PartitionMap,
    strategy: SyncStrategy,
    ramp: RampPolicy,
    workers: usize,
    rounds: u64,
    active: usize,
    pool: Option<StagingPool>,
    link: Option<TransferLink>,
}

impl<T, B> std::fmt::Debug for ModelSync<T, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSync")
            .field("workers", &self.workers)
            .field("rounds", &self.rounds)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl<T> ModelSync<T, HostBackend>
where
    T: ParameterTable + Send + Sync + 'static,
{
    /// Builds an engine staging through host memory.
    ///
    /// # Arguments
    /// * `table` - The shared parameter-table client.
    /// * `tensors` - The trainable tensors, in model order.
    /// * `cfg` - Validated-on-entry engine configuration.
    ///
    /// # Returns
    /// A `Config` error for an inconsistent configuration or an empty
    /// tensor set; a `Table` error if configuring the table fails.
    pub async fn new<M: ParamTensor>(
        table: Arc<T>,
        tensors: &[M],
        cfg: SyncConfig,
    ) -> Result<Self> {
        Self::with_backend(table, tensors, cfg, HostBackend).await
    }
}

impl<T, B> ModelSync<T, B>
where
    T: ParameterTable + Send + Sync + 'static,
    B: ComputeBackend,
{
    /// Builds an engine over an explicit compute backend.
    ///
    /// See [`ModelSync::new`] for the argument and error contract.
    pub async fn with_backend<M: ParamTensor>(
        table: Arc<T>,
        tensors: &[M],
        cfg: SyncConfig,
        compute: B,
    ) -> Result<Self> {
        cfg.validate()?;

        let lengths: Vec<usize> = tensors.iter().map(|t| t.len()).collect();
        let layout = ParamLayout::plan(&lengths)?;
        let partitions = PartitionMap::new(layout.total_len(), cfg.workers());

        table
            .configure(
                WEIGHTS_TABLE,
                cfg.workers(),
                partitions.max_len(),
                ElementKind::F32,
            )
            .await?;

        let pool = StagingPool::allocate(layout.total_len(), cfg.slot_count());
        let link = cfg.pipelined().then(|| {
            let (descriptor_tx, outcome_rx) =
                transfer::spawn_transfer_task(Arc::clone(&table), cfg.strategy(), partitions.clone());
            TransferLink {
                descriptor_tx,
                outcome_rx,
            }
        });

        info!(
            workers = cfg.workers(),
            pipelined = cfg.pipelined(),
            total_len = layout.total_len();
            "synchronization engine ready"
        );

        Ok(Self {
            table,
            compute,
            layout,
            partitions,
            strategy: cfg.strategy(),
            ramp: cfg.ramp(),
            workers: cfg.workers(),
            rounds: 0,
            active: 0,
            pool: Some(pool),
            link,
        })
    }

    /// Establishes the globally consistent starting snapshot.
    ///
    /// Pushes an evenly weighted copy of the local model into every
    /// partition, rendezvouses with the other workers so all initial
    /// contributions are merged, then pulls the merged result into
    /// every cache slot and the delta baseline. The model itself is not
    /// rewritten; the first synchronization round adopts the merged
    /// values.
    ///
    /// # Errors
    /// Any table failure, including a failed barrier, is fatal:
    /// training cannot proceed without a consistent start state.
    pub async fn init<M: ParamTensor>(&mut self, tensors: &[M]) -> Result<()> {
        let mut pool = self.acquire_pool().await?;
        let result = self.run_init(tensors, &mut pool).await;
        self.pool = Some(pool);
        self.active = 0;
        result
    }

    async fn run_init<M: ParamTensor>(
        &mut self,
        tensors: &[M],
        pool: &mut StagingPool,
    ) -> Result<()> {
        pool.gather(&mut self.compute, tensors, &self.layout, 0);
        pool.seed_delta(0);

        let factor = 1.0 / self.workers as f32;
        for p in 0..self.partitions.partitions() {
            self.table
                .add(
                    WEIGHTS_TABLE,
                    p,
                    &pool.delta()[self.partitions.range(p)],
                    factor,
                )
                .await?;
        }

        self.table.barrier().await?;
        self.table
            .batch_load(
                WEIGHTS_TABLE,
                pool.slot_mut(0),
                self.partitions.offsets(),
                self.partitions.sizes(),
            )
            .await?;

        pool.mirror_slots();
        pool.seed_delta(0);

        info!(workers = self.workers; "initial model snapshot merged");
        Ok(())
    }

    /// Runs one synchronization round.
    ///
    /// Pipelined: joins the previous round's transfer, rotates the
    /// active slot, stages the local snapshot into it, writes the
    /// previous merged snapshot from the partner slot back into the
    /// model, and hands the round to the transfer task without waiting
    /// for it. Non-pipelined: performs the same transfer inline and
    /// writes the merged result back before returning.
    ///
    /// # Errors
    /// Any table failure aborts the round without touching the model;
    /// a pipelined round's failure surfaces on the call that joins it.
    pub async fn sync<M: ParamTensor>(&mut self, tensors: &mut [M]) -> Result<()> {
        self.rounds = self.rounds.wrapping_add(1);
        let round = self.rounds;
        let factor = self.push_factor(round);

        let mut pool = self.acquire_pool().await?;

        match &mut self.link {
            Some(link) => {
                self.active = pool.next_slot(self.active);
                let partner = pool.next_slot(self.active);

                pool.gather(&mut self.compute, tensors, &self.layout, self.active);
                pool.scatter(&mut self.compute, tensors, &self.layout, partner);

                debug!(round = round, slot = self.active, factor = factor; "round handed to transfer task");
                let descriptor = RoundDescriptor {
                    pool,
                    active: self.active,
                    factor,
                    round,
                };
                link.descriptor_tx
                    .send(descriptor)
                    .await
                    .map_err(|_| SyncErr::TransferTaskGone)?;
            }

            None => {
                pool.gather(&mut self.compute, tensors, &self.layout, self.active);

                let result = transfer::run_round(
                    &*self.table,
                    self.strategy,
                    &self.partitions,
                    &mut pool,
                    self.active,
                    factor,
                )
                .await;

                if result.is_ok() {
                    pool.scatter(&mut self.compute, tensors, &self.layout, self.active);
                }
                self.pool = Some(pool);
                result?;

                debug!(round = round, factor = factor; "round merged synchronously");
            }
        }

        Ok(())
    }

    /// Swaps the live model for the store's current merged snapshot.
    ///
    /// The live values are stashed first so [`ModelSync::restore_local`]
    /// can undo the swap after a checkpoint pass. Synchronous and
    /// slot-rotation free: both directions go through the dedicated
    /// checkpoint buffers.
    pub async fn load_from_store<M: ParamTensor>(&mut self, tensors: &mut [M]) -> Result<()> {
        let mut pool = self.acquire_pool().await?;
        let result = self.run_load_from_store(tensors, &mut pool).await;
        self.pool = Some(pool);
        result
    }

    async fn run_load_from_store<M: ParamTensor>(
        &mut self,
        tensors: &mut [M],
        pool: &mut StagingPool,
    ) -> Result<()> {
        backend::stage_all_out(&mut self.compute, tensors, &self.layout, pool.local_stash_mut());

        self.table
            .batch_load(
                WEIGHTS_TABLE,
                pool.server_stash_mut(),
                self.partitions.offsets(),
                self.partitions.sizes(),
            )
            .await?;

        backend::stage_all_in(&mut self.compute, tensors, &self.layout, pool.server_stash());
        Ok(())
    }

    /// Restores the live model stashed by the last
    /// [`ModelSync::load_from_store`].
    pub async fn restore_local<M: ParamTensor>(&mut self, tensors: &mut [M]) -> Result<()> {
        let pool = self.acquire_pool().await?;
        backend::stage_all_in(&mut self.compute, tensors, &self.layout, pool.local_stash());
        self.pool = Some(pool);
        Ok(())
    }

    /// Cross-worker learning-rate synchronization.
    ///
    /// # Errors
    /// Always returns `Unimplemented`; kept as an explicit placeholder.
    pub fn learning_rate_sync(&mut self) -> Result<()> {
        Err(SyncErr::Unimplemented {
            what: "learning-rate synchronization",
        })
    }

    /// Joins any outstanding transfer and stops the transfer task.
    pub async fn shutdown(mut self) -> Result<()> {
        let result = self.acquire_pool().await.map(drop);
        self.link = None;
        result
    }

    /// Completed synchronization rounds.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// The planned flat layout.
    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    /// The partition map addressing the table's rows.
    pub fn partitions(&self) -> &PartitionMap {
        &self.partitions
    }

    /// The strategy selected at construction.
    pub fn strategy(&self) -> SyncStrategy {
        self.strategy
    }

    /// The join point: hands the staging pool back to the caller.
    ///
    /// A new round must not touch any staging buffer until the previous
    /// round's transfer has returned the pool; a failed transfer keeps
    /// the pool and surfaces its error here.
    async fn acquire_pool(&mut self) -> Result<StagingPool> {
        if let Some(pool) = self.pool.take() {
            return Ok(pool);
        }

        let link = self.link.as_mut().ok_or(SyncErr::TransferTaskGone)?;
        let RoundOutcome { pool, result } = link
            .outcome_rx
            .recv()
            .await
            .ok_or(SyncErr::TransferTaskGone)?;

        match result {
            Ok(()) => Ok(pool),
            Err(e) => {
                self.pool = Some(pool);
                Err(e)
            }
        }
    }

    /// Effective push weight for `round`.
    ///
    /// Elastic averaging always pushes its fixed coefficient; delta
    /// accumulation pushes an even `1 / workers` share unless a ramp
    /// schedule overrides it.
    fn push_factor(&self, round: u64) -> f32 {
        match self.strategy {
            SyncStrategy::ElasticAveraging { alpha } => alpha,
            SyncStrategy::DeltaAccumulation => {
                if self.ramp.is_none() {
                    1.0 / self.workers as f32
                } else {
                    self.ramp.factor(round)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        num::NonZeroUsize,
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        time::Duration,
    };

    use paramtable::{MemoryTable, TableErr};
    use tokio::time::sleep;

    use super::*;
    use crate::bridge::VecTensor;

    fn workers(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn assert_close(got: &[f32], expected: &[f32]) {
        assert_eq!(got.len(), expected.len());
        for (i, (g, e)) in got.iter().zip(expected).enumerate() {
            assert!((g - e).abs() < 1e-5, "index {i}: got {g}, expected {e}");
        }
    }

    async fn store_snapshot<T, B>(table: &MemoryTable, engine: &ModelSync<T, B>) -> Vec<f32>
    where
        T: ParameterTable + Send + Sync + 'static,
        B: ComputeBackend,
    {
        let mut out = vec![0.0; engine.layout().total_len()];
        table
            .batch_load(
                WEIGHTS_TABLE,
                &mut out,
                engine.partitions().offsets(),
                engine.partitions().sizes(),
            )
            .await
            .unwrap();
        out
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn construction_rejects_both_blending_coefficients() {
        let table = Arc::new(MemoryTable::new(1));
        let tensors = vec![VecTensor::zeros(4)];
        let cfg = SyncConfig::new(workers(1))
            .with_momentum(0.3)
            .with_elastic(0.5);

        let err = ModelSync::new(table, &tensors, cfg).await.unwrap_err();
        assert!(matches!(err, SyncErr::Config { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn construction_rejects_an_empty_model() {
        let table = Arc::new(MemoryTable::new(1));
        let tensors: Vec<VecTensor> = Vec::new();
        let cfg = SyncConfig::new(workers(1));

        let err = ModelSync::new(table, &tensors, cfg).await.unwrap_err();
        assert!(matches!(err, SyncErr::Config { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn single_worker_roundtrip_reproduces_the_local_snapshot() {
        let table = Arc::new(MemoryTable::new(1));
        let mut tensors = vec![
            VecTensor::new(vec![1.0, 2.0, 3.0]),
            VecTensor::new(vec![4.0, 5.0]),
        ];
        let cfg = SyncConfig::new(workers(1)).with_pipelining(false);

        let mut engine = ModelSync::new(Arc::clone(&table), &tensors, cfg)
            .await
            .unwrap();
        engine.init(&tensors).await.unwrap();

        // Local training step between synchronization rounds.
        let trained = [10.0, 20.0, 30.0, 40.0, 50.0];
        tensors[0].values_mut().copy_from_slice(&trained[..3]);
        tensors[1].values_mut().copy_from_slice(&trained[3..]);

        engine.sync(&mut tensors).await.unwrap();
        assert_eq!(engine.rounds(), 1);

        // With one worker and factor 1 the merged snapshot is the local one.
        assert_close(tensors[0].values(), &trained[..3]);
        assert_close(tensors[1].values(), &trained[3..]);
        let merged = store_snapshot(&table, &engine).await;
        assert_close(&merged, &trained);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn init_with_three_zero_workers_merges_to_zero() {
        const SIZES: [usize; 2] = [3, 5];

        let table = Arc::new(MemoryTable::new(3));
        let mut handles = Vec::new();

        for _ in 0..3 {
            let table = Arc::clone(&table);
            handles.push(tokio::spawn(async move {
                let tensors: Vec<VecTensor> =
                    SIZES.iter().map(|&len| VecTensor::zeros(len)).collect();
                let cfg = SyncConfig::new(workers(3));
                let mut engine = ModelSync::new(table, &tensors, cfg).await?;

                assert_eq!(engine.layout().total_len(), 8);
                assert_eq!(engine.layout().offsets(), [0, 3]);
                assert_eq!(engine.partitions().offsets(), [0, 3, 6]);
                assert_eq!(engine.partitions().sizes(), [3, 3, 2]);

                engine.init(&tensors).await?;
                engine.shutdown().await?;
                Ok::<_, SyncErr>(())
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let map = PartitionMap::new(8, 3);
        let mut merged = vec![1.0; 8];
        table
            .batch_load(WEIGHTS_TABLE, &mut merged, map.offsets(), map.sizes())
            .await
            .unwrap();
        assert_close(&merged, &[0.0; 8]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn elastic_round_pushes_a_fraction_and_adopts_the_merged_snapshot() {
        let table = Arc::new(MemoryTable::new(1));
        let mut tensors = vec![VecTensor::new(vec![2.0, 4.0])];
        let cfg = SyncConfig::new(workers(1))
            .with_pipelining(false)
            .with_elastic(0.5);

        let mut engine = ModelSync::new(Arc::clone(&table), &tensors, cfg)
            .await
            .unwrap();
        assert_eq!(engine.strategy(), SyncStrategy::ElasticAveraging { alpha: 0.5 });
        engine.init(&tensors).await.unwrap();

        tensors[0].values_mut().copy_from_slice(&[4.0, 8.0]);
        engine.sync(&mut tensors).await.unwrap();

        // The model adopts the pre-push merged snapshot.
        assert_close(tensors[0].values(), &[2.0, 4.0]);
        // The store moved half of the local deviation.
        let merged = store_snapshot(&table, &engine).await;
        assert_close(&merged, &[3.0, 6.0]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn checkpoint_swap_and_restore() {
        let table = Arc::new(MemoryTable::new(1));
        let mut tensors = vec![VecTensor::new(vec![1.0, 1.0, 1.0])];
        let cfg = SyncConfig::new(workers(1)).with_pipelining(false);

        let mut engine = ModelSync::new(Arc::clone(&table), &tensors, cfg)
            .await
            .unwrap();
        engine.init(&tensors).await.unwrap();

        tensors[0].values_mut().copy_from_slice(&[7.0, 8.0, 9.0]);

        engine.load_from_store(&mut tensors).await.unwrap();
        assert_close(tensors[0].values(), &[1.0, 1.0, 1.0]);

        engine.restore_local(&mut tensors).await.unwrap();
        assert_close(tensors[0].values(), &[7.0, 8.0, 9.0]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn learning_rate_sync_is_an_explicit_placeholder() {
        let table = Arc::new(MemoryTable::new(1));
        let tensors = vec![VecTensor::zeros(2)];
        let cfg = SyncConfig::new(workers(1)).with_pipelining(false);

        let mut engine = ModelSync::new(table, &tensors, cfg).await.unwrap();
        let err = engine.learning_rate_sync().unwrap_err();
        assert!(matches!(err, SyncErr::Unimplemented { .. }));
    }

    /// Table wrapper that records whether two transfer windows ever
    /// overlapped on the store.
    struct ProbeTable {
        inner: MemoryTable,
        active_calls: AtomicUsize,
        overlapped: AtomicBool,
    }

    impl ProbeTable {
        fn new(inner: MemoryTable) -> Self {
            Self {
                inner,
                active_calls: AtomicUsize::new(0),
                overlapped: AtomicBool::new(false),
            }
        }

        fn enter(&self) {
            if self.active_calls.fetch_add(1, Ordering::SeqCst) != 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
        }

        fn leave(&self) {
            self.active_calls.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl ParameterTable for ProbeTable {
        async fn configure(
            &self,
            table_id: usize,
            partitions: usize,
            max_partition_len: usize,
            kind: ElementKind,
        ) -> std::result::Result<(), TableErr> {
            self.inner
                .configure(table_id, partitions, max_partition_len, kind)
                .await
        }

        async fn add(
            &self,
            table_id: usize,
            partition: usize,
            delta: &[f32],
            weight: f32,
        ) -> std::result::Result<(), TableErr> {
            self.enter();
            sleep(Duration::from_millis(2)).await;
            let ret = self.inner.add(table_id, partition, delta, weight).await;
            self.leave();
            ret
        }

        async fn batch_load(
            &self,
            table_id: usize,
            out: &mut [f32],
            offsets: &[usize],
            sizes: &[usize],
        ) -> std::result::Result<(), TableErr> {
            self.enter();
            sleep(Duration::from_millis(2)).await;
            let ret = self.inner.batch_load(table_id, out, offsets, sizes).await;
            self.leave();
            ret
        }

        async fn barrier(&self) -> std::result::Result<(), TableErr> {
            self.inner.barrier().await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pipelined_rounds_never_overlap_on_the_store() {
        let table = Arc::new(ProbeTable::new(MemoryTable::new(1)));
        let mut tensors = vec![VecTensor::new(vec![0.5; 32])];
        let cfg = SyncConfig::new(workers(1));

        let mut engine = ModelSync::new(Arc::clone(&table), &tensors, cfg)
            .await
            .unwrap();
        engine.init(&tensors).await.unwrap();

        for _ in 0..5 {
            for v in tensors[0].values_mut() {
                *v += 0.25;
            }
            engine.sync(&mut tensors).await.unwrap();
        }

        assert_eq!(engine.rounds(), 5);
        engine.shutdown().await.unwrap();
        assert!(!table.overlapped.load(Ordering::SeqCst));
    }
}
