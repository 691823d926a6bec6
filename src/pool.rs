//! Parallel processing of many locations.
//!
//! Items are split into contiguous chunks, one per worker. Each worker runs
//! on the blocking thread pool, builds its own state (typically a reader
//! stack) with `init` and processes its chunk in order. Readers are
//! therefore never shared between workers. Results come back in input
//! order.

use crate::constants::DEFAULT_PARALLEL_WORKERS;
use crate::error::{Result, SmError};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task;
use tracing::{debug, warn};

/// What a failing item does to the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Log the failure and leave a gap in the results.
    Ignore,
    /// Stop and return the error of the first failing item.
    #[default]
    FailFast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
    pub error_policy: ErrorPolicy,
    pub show_progress: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_PARALLEL_WORKERS,
            error_policy: ErrorPolicy::FailFast,
            show_progress: false,
        }
    }
}

impl PoolConfig {
    /// One worker per logical CPU.
    pub fn all_cores() -> Self {
        Self {
            workers: num_cpus::get(),
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message("locations");
        pb
    }
}

fn run_chunk<I, S, T, Init, F>(
    chunk: Vec<(usize, I)>,
    init: &Init,
    func: &F,
    policy: ErrorPolicy,
    pb: &ProgressBar,
) -> Vec<(usize, Result<T>)>
where
    Init: Fn() -> Result<S>,
    F: Fn(&mut S, I) -> Result<T>,
{
    let mut state = match init() {
        Ok(state) => state,
        Err(e) => {
            let reason = format!("worker setup failed: {}", e);
            pb.inc(chunk.len() as u64);
            return chunk
                .into_iter()
                .map(|(i, _)| (i, Err(SmError::Worker { reason: reason.clone() })))
                .collect();
        }
    };

    let mut results = Vec::with_capacity(chunk.len());
    for (i, item) in chunk {
        let result = func(&mut state, item);
        pb.inc(1);
        let failed = result.is_err();
        results.push((i, result));
        if failed && policy == ErrorPolicy::FailFast {
            break;
        }
    }
    results
}

/// Apply `func` to every item on `config.workers` workers.
///
/// `init` runs once per worker and builds the state `func` gets mutable
/// access to. Under [`ErrorPolicy::Ignore`] failed items are `None`.
///
/// # Errors
/// * Under [`ErrorPolicy::FailFast`], the error of the lowest-indexed
///   failing item
/// * `SmError::Worker` when a worker thread panics
pub async fn parallel_process<I, S, T, Init, F>(
    items: Vec<I>,
    init: Init,
    func: F,
    config: &PoolConfig,
) -> Result<Vec<Option<T>>>
where
    I: Send + 'static,
    S: 'static,
    T: Send + 'static,
    Init: Fn() -> Result<S> + Send + Sync + 'static,
    F: Fn(&mut S, I) -> Result<T> + Send + Sync + 'static,
{
    let total = items.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let workers = config.workers.clamp(1, total);
    let chunk_size = total.div_ceil(workers);
    let policy = config.error_policy;
    let pb = config.progress_bar(total);
    let init = Arc::new(init);
    let func = Arc::new(func);

    let mut chunks = Vec::with_capacity(workers);
    let mut numbered = items.into_iter().enumerate();
    loop {
        let chunk: Vec<(usize, I)> = numbered.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        chunks.push(chunk);
    }
    debug!("Processing {} items in {} chunks of up to {}", total, chunks.len(), chunk_size);

    let outputs = stream::iter(chunks)
        .map(|chunk| {
            let init = Arc::clone(&init);
            let func = Arc::clone(&func);
            let pb = pb.clone();
            async move { task::spawn_blocking(move || run_chunk(chunk, &*init, &*func, policy, &pb)).await }
        })
        .buffer_unordered(workers)
        .collect::<Vec<_>>()
        .await;

    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut first_error: Option<(usize, SmError)> = None;
    let mut failures = 0;

    for output in outputs {
        let chunk = output.map_err(|e| SmError::Worker {
            reason: e.to_string(),
        })?;
        for (i, result) in chunk {
            match result {
                Ok(value) => results[i] = Some(value),
                Err(e) => {
                    failures += 1;
                    match policy {
                        ErrorPolicy::Ignore => warn!("Item {} failed: {}", i, e),
                        ErrorPolicy::FailFast => {
                            if first_error.as_ref().is_none_or(|(j, _)| i < *j) {
                                first_error = Some((i, e));
                            }
                        }
                    }
                }
            }
        }
    }

    pb.finish_and_clear();
    if let Some((_, e)) = first_error {
        return Err(e);
    }
    if failures > 0 {
        warn!("{} of {} items failed and were skipped", failures, total);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let items: Vec<u64> = (0..25).collect();
        let config = PoolConfig::default().with_workers(4);
        let results = parallel_process(items, || Ok(()), |_, x| Ok(x * 2), &config)
            .await
            .unwrap();
        let values: Vec<u64> = results.into_iter().map(Option::unwrap).collect();
        assert_eq!(values, (0..25).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_state_built_once_per_worker() {
        let inits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&inits);
        let config = PoolConfig::default().with_workers(3);
        let results = parallel_process(
            (0..9).collect::<Vec<u32>>(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(0u32)
            },
            |seen: &mut u32, x| {
                *seen += 1;
                Ok(x)
            },
            &config,
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 9);
        assert_eq!(inits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_ignore_policy_leaves_gaps() {
        let config = PoolConfig::default()
            .with_workers(2)
            .with_error_policy(ErrorPolicy::Ignore);
        let results = parallel_process(
            vec![1i64, -1, 2, -2],
            || Ok(()),
            |_, x| {
                if x < 0 {
                    Err(SmError::unsupported("negative", None))
                } else {
                    Ok(x)
                }
            },
            &config,
        )
        .await
        .unwrap();
        assert_eq!(results, vec![Some(1), None, Some(2), None]);
    }

    #[tokio::test]
    async fn test_fail_fast_returns_first_error() {
        let config = PoolConfig::default().with_workers(2);
        let result = parallel_process(
            vec![0usize, 1, 2, 3],
            || Ok(()),
            |_, x| {
                if x >= 1 {
                    Err(SmError::Worker { reason: format!("item {}", x) })
                } else {
                    Ok(x)
                }
            },
            &config,
        )
        .await;
        match result.unwrap_err() {
            SmError::Worker { reason } => assert_eq!(reason, "item 1"),
            other => panic!("Expected Worker error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_setup() {
        let config = PoolConfig::default()
            .with_workers(1)
            .with_error_policy(ErrorPolicy::Ignore);
        let results = parallel_process(
            vec![1, 2],
            || -> Result<()> { Err(SmError::config_not_found("x", None)) },
            |_, x: i32| Ok(x),
            &config,
        )
        .await
        .unwrap();
        assert_eq!(results, vec![None, None]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let results = parallel_process(Vec::<u8>::new(), || Ok(()), |_, x| Ok(x), &PoolConfig::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
