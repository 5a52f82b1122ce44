use std::{num::NonZeroUsize, sync::Arc};

use modelsync::{ModelSync, PartitionMap, SyncConfig, SyncErr, VecTensor};
use paramtable::{MemoryTable, ParameterTable};
use rand::{Rng, SeedableRng, rngs::StdRng};

const SIZES: [usize; 2] = [3, 5];
const TOTAL: usize = 8;
const WORKERS: usize = 3;

fn worker_model(worker_id: usize) -> Vec<VecTensor> {
    SIZES
        .iter()
        .map(|&len| VecTensor::new(vec![(worker_id + 1) as f32; len]))
        .collect()
}

fn assert_close(got: &[f32], expected: &[f32]) {
    assert_eq!(got.len(), expected.len());
    for (i, (g, e)) in got.iter().zip(expected).enumerate() {
        assert!((g - e).abs() < 1e-4, "index {i}: got {g}, expected {e}");
    }
}

async fn store_snapshot(table: &MemoryTable) -> Vec<f32> {
    let map = PartitionMap::new(TOTAL, WORKERS);
    let mut out = vec![0.0; TOTAL];
    table
        .batch_load(0, &mut out, map.offsets(), map.sizes())
        .await
        .unwrap();
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn init_merges_every_workers_contribution_into_the_average() {
    let table = Arc::new(MemoryTable::new(WORKERS));
    let mut handles = Vec::new();

    for worker_id in 0..WORKERS {
        let table = Arc::clone(&table);
        handles.push(tokio::spawn(async move {
            let tensors = worker_model(worker_id);
            let cfg = SyncConfig::new(NonZeroUsize::new(WORKERS).unwrap()).with_pipelining(false);
            let mut engine = ModelSync::new(table, &tensors, cfg).await?;
            engine.init(&tensors).await?;
            Ok::<_, SyncErr>(())
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Models hold 1.0, 2.0 and 3.0; the evenly weighted merge is 2.0.
    assert_close(&store_snapshot(&table).await, &[2.0; TOTAL]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_idle_delta_round_leaves_the_average_in_place() {
    let table = Arc::new(MemoryTable::new(WORKERS));
    let mut handles = Vec::new();

    for worker_id in 0..WORKERS {
        let table = Arc::clone(&table);
        handles.push(tokio::spawn(async move {
            let mut tensors = worker_model(worker_id);
            let cfg = SyncConfig::new(NonZeroUsize::new(WORKERS).unwrap()).with_pipelining(false);
            let mut engine = ModelSync::new(table, &tensors, cfg).await?;
            engine.init(&tensors).await?;

            // No local training: every worker pushes (local - average) / 3,
            // and those deltas cancel exactly once all three land.
            engine.sync(&mut tensors).await?;
            Ok::<_, SyncErr>(())
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_close(&store_snapshot(&table).await, &[2.0; TOTAL]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pipelined_training_rounds_complete_and_stay_finite() {
    const ROUNDS: usize = 4;

    let table = Arc::new(MemoryTable::new(WORKERS));
    let mut handles = Vec::new();

    for worker_id in 0..WORKERS {
        let table = Arc::clone(&table);
        handles.push(tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(worker_id as u64);
            let mut tensors: Vec<VecTensor> = SIZES
                .iter()
                .map(|&len| {
                    VecTensor::new((0..len).map(|_| rng.random_range(-1.0..1.0)).collect())
                })
                .collect();
            let cfg = SyncConfig::new(NonZeroUsize::new(WORKERS).unwrap());
            let mut engine = ModelSync::new(table, &tensors, cfg).await?;
            engine.init(&tensors).await?;

            for _ in 0..ROUNDS {
                for tensor in &mut tensors {
                    for v in tensor.values_mut() {
                        *v *= 0.9;
                    }
                }
                engine.sync(&mut tensors).await?;
            }

            assert_eq!(engine.rounds(), ROUNDS as u64);
            engine.shutdown().await?;
            Ok::<_, SyncErr>(())
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let merged = store_snapshot(&table).await;
    assert!(merged.iter().all(|v| v.is_finite()));
    // Decay plus averaging can only shrink the merged weights.
    assert!(merged.iter().all(|v| v.abs() <= 3.0));
}
