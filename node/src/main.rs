use std::{env, io, num::NonZeroUsize, sync::Arc};

use futures::future::try_join_all;
use log::{debug, info};
use modelsync::{ModelSync, RampPolicy, Result, SyncConfig, VecTensor};
use paramtable::MemoryTable;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::signal;

const DEFAULT_WORKERS: usize = 3;
const DEFAULT_ROUNDS: usize = 10;

/// Toy model: two weight tensors and their biases.
const TENSOR_SIZES: [usize; 4] = [256, 16, 64, 4];

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let workers = env_usize("WORKERS", DEFAULT_WORKERS)?;
    let rounds = env_usize("ROUNDS", DEFAULT_ROUNDS)?;
    let workers = NonZeroUsize::new(workers)
        .ok_or_else(|| io::Error::other("WORKERS must be nonzero"))?;

    let table = Arc::new(MemoryTable::new(workers.get()));
    info!(workers = workers.get(), rounds = rounds; "starting simulated cluster");

    let handles: Vec<_> = (0..workers.get())
        .map(|worker_id| {
            let table = Arc::clone(&table);
            tokio::spawn(async move { run_worker(worker_id, workers, rounds, table).await })
        })
        .collect();

    tokio::select! {
        ret = try_join_all(handles) => {
            for worker_ret in ret.map_err(io::Error::other)? {
                worker_ret.map_err(io::Error::other)?;
            }
            info!("all workers finished");
        }
        _ = signal::ctrl_c() => {
            info!("received SIGTERM");
        }
    }

    Ok(())
}

/// One simulated training worker: seeds a model, merges the initial
/// state with the cluster, then alternates a toy local step with a
/// pipelined synchronization round.
async fn run_worker(
    worker_id: usize,
    workers: NonZeroUsize,
    rounds: usize,
    table: Arc<MemoryTable>,
) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(worker_id as u64);
    let mut tensors: Vec<VecTensor> = TENSOR_SIZES
        .iter()
        .map(|&len| VecTensor::new((0..len).map(|_| rng.random_range(-1.0..1.0)).collect()))
        .collect();

    let cfg = SyncConfig::new(workers).with_ramp(RampPolicy::Linearly {
        coefficient: 0.2,
        rounds: 4,
    });
    let mut engine = ModelSync::new(table, &tensors, cfg).await?;
    engine.init(&tensors).await?;

    for round in 0..rounds {
        // Toy local step: decay the weights as if a gradient landed.
        for tensor in &mut tensors {
            for v in tensor.values_mut() {
                *v *= 0.9;
            }
        }

        engine.sync(&mut tensors).await?;
        debug!(worker_id = worker_id, round = round; "round synchronized");
    }

    engine.shutdown().await?;
    info!(worker_id = worker_id; "worker finished");
    Ok(())
}

fn env_usize(key: &str, default: usize) -> io::Result<usize> {
    match env::var(key) {
        Ok(value) => value.parse().map_err(io::Error::other),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(io::Error::other(e)),
    }
}
