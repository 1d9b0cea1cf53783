//! Concurrent assembly of many notices.
//!
//! Each notice gets its own document and runs on the blocking pool; the
//! pipeline itself is shared read-only. Results come back in input order.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use noticemerge_shared::{NoticeMergeError, Result};

use crate::pipeline::{Assembly, AssemblyPipeline, AssemblyProgress};
use crate::producer::Notice;

/// Assemble every notice with at most `workers` assemblies in flight.
#[instrument(skip_all, fields(notices = notices.len(), workers = workers))]
pub async fn assemble_all<N>(
    pipeline: Arc<AssemblyPipeline<N>>,
    notices: Vec<N>,
    workers: usize,
    progress: &dyn AssemblyProgress,
) -> Result<Vec<Assembly>>
where
    N: Notice + Send + 'static,
{
    let start = Instant::now();
    let total = notices.len();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));

    info!(total, workers = workers.max(1), "starting batch assembly");
    progress.started(total);

    let mut handles: Vec<JoinHandle<Result<Assembly>>> = Vec::with_capacity(total);
    for notice in notices {
        let pipeline = Arc::clone(&pipeline);
        let sem = Arc::clone(&semaphore);

        handles.push(tokio::spawn(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| NoticeMergeError::Worker(format!("semaphore closed: {e}")))?;
            tokio::task::spawn_blocking(move || pipeline.assemble(&notice))
                .await
                .map_err(|e| NoticeMergeError::Worker(format!("assembly task failed: {e}")))
        }));
    }

    let mut assemblies = Vec::with_capacity(total);
    for handle in handles {
        let assembly = handle
            .await
            .map_err(|e| NoticeMergeError::Worker(format!("worker join failed: {e}")))??;
        progress.finished(&assembly.summary, assemblies.len() + 1, total);
        assemblies.push(assembly);
    }

    progress.done(total);
    info!(
        total,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "batch assembly complete"
    );

    Ok(assemblies)
}
