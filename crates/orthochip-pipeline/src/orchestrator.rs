//! Batch Orchestrator: skip rule, sequential and parallel execution, and
//! the single-writer batch log.

use crate::points::{build_requests, QueryPoint};
use crate::tile::TilePipeline;
use orthochip_core::error::{OrthochipError, Result};
use orthochip_core::models::{BatchCounts, BatchLog, ChipSpec, ExecutionMode, TileRequest, TileState};
use orthochip_core::ports::BatchLogStore;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Instant;

/// How a batch is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub mode: ExecutionMode,
    /// Worker count in parallel mode; defaults to available parallelism
    pub workers: Option<usize>,
    /// Flush the batch log after this many new rows
    pub flush_every: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { mode: ExecutionMode::Sequential, workers: None, flush_every: 100 }
    }
}

impl BatchOptions {
    fn worker_count(&self) -> usize {
        self.workers
            .filter(|&n| n > 0)
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
    }
}

/// Progress snapshot handed to the caller after every tile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn done(&self) -> usize {
        self.processed + self.skipped
    }
}

/// Outcome of one orchestrator run
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub mode: ExecutionMode,
    pub workers: usize,
    /// Tiles handled in this run
    pub progress: BatchProgress,
    /// Totals over the whole batch log, including earlier runs
    pub counts: BatchCounts,
    pub flushes: usize,
    pub elapsed_secs: f64,
}

/// Owns the batch log and drives tiles through the pipeline
pub struct BatchOrchestrator {
    pipeline: TilePipeline,
    log_store: Arc<dyn BatchLogStore>,
    options: BatchOptions,
}

/// Batch log plus flush bookkeeping; only the orchestrator thread touches it
struct LogWriter<'a> {
    store: &'a dyn BatchLogStore,
    log: BatchLog,
    flush_every: usize,
    pending: usize,
    flushes: usize,
}

impl LogWriter<'_> {
    fn record(&mut self, state: &TileState) -> Result<()> {
        self.log.record(state.summary());
        self.pending += 1;
        if self.pending >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.store.flush(&self.log)?;
        self.pending = 0;
        self.flushes += 1;
        Ok(())
    }
}

impl BatchOrchestrator {
    pub fn new(
        pipeline: TilePipeline,
        log_store: Arc<dyn BatchLogStore>,
        options: BatchOptions,
    ) -> Result<Self> {
        if options.flush_every == 0 {
            return Err(OrthochipError::ConfigInvalid {
                key: "flush_every".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(Self { pipeline, log_store, options })
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Build requests from query points and run them
    ///
    /// Points rejected by request validation are logged as failed tiles.
    pub fn run_points<F>(
        &self,
        points: &[QueryPoint],
        spec: &Arc<ChipSpec>,
        progress: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(BatchProgress),
    {
        let (requests, rejected) = build_requests(points, spec);
        self.execute(&requests, rejected, progress)
    }

    /// Run every request to completion or recorded failure
    pub fn run<F>(&self, requests: &[TileRequest], progress: F) -> Result<BatchReport>
    where
        F: FnMut(BatchProgress),
    {
        self.execute(requests, Vec::new(), progress)
    }

    fn execute<F>(
        &self,
        requests: &[TileRequest],
        rejected: Vec<TileState>,
        mut progress: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(BatchProgress),
    {
        let started = Instant::now();
        let log = self.log_store.load()?;
        let resumed = log.len();

        let mut writer = LogWriter {
            store: self.log_store.as_ref(),
            log,
            flush_every: self.options.flush_every,
            pending: 0,
            flushes: 0,
        };
        let mut tally = BatchProgress { total: requests.len() + rejected.len(), ..Default::default() };

        for state in &rejected {
            writer.record(state)?;
            tally.processed += 1;
            tally.failed += 1;
            progress(tally);
        }

        // Skip rule: both outputs on disk means the tile is done
        let sink = self.pipeline.sink();
        let mut pending = Vec::with_capacity(requests.len());
        for request in requests {
            if sink.outputs_exist(request.id()) {
                tracing::warn!(id = %request.id(), "Outputs exist, skipping tile");
                if !writer.log.contains(request.id()) {
                    writer.record(&TileState::skipped(request.id()))?;
                }
                tally.skipped += 1;
                progress(tally);
            } else {
                pending.push(request);
            }
        }

        tracing::info!(
            mode = %self.options.mode,
            total = tally.total,
            pending = pending.len(),
            skipped = tally.skipped,
            resumed_rows = resumed,
            "Starting batch"
        );

        let workers = match self.options.mode {
            ExecutionMode::Sequential => {
                for request in pending {
                    let state = self.pipeline.process_guarded(request);
                    Self::account(&mut tally, &state);
                    writer.record(&state)?;
                    progress(tally);
                }
                1
            }
            ExecutionMode::Parallel => {
                self.run_parallel(&pending, &mut writer, &mut tally, &mut progress)?
            }
        };

        writer.flush()?;

        let report = BatchReport {
            mode: self.options.mode,
            workers,
            progress: tally,
            counts: writer.log.counts(),
            flushes: writer.flushes,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        tracing::info!(
            processed = tally.processed,
            skipped = tally.skipped,
            failed = tally.failed,
            flushes = report.flushes,
            elapsed_secs = report.elapsed_secs,
            "Batch finished"
        );
        Ok(report)
    }

    /// Workers send finished states over a channel; this thread is the only log writer
    fn run_parallel<F>(
        &self,
        pending: &[&TileRequest],
        writer: &mut LogWriter<'_>,
        tally: &mut BatchProgress,
        progress: &mut F,
    ) -> Result<usize>
    where
        F: FnMut(BatchProgress),
    {
        let workers = self.options.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("orthochip-worker-{}", i))
            .build()
            .map_err(|e| OrthochipError::ConfigInvalid {
                key: "workers".to_string(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel::<TileState>();
        let pipeline = &self.pipeline;
        // Set once the log writer has failed; no new tile may start after that
        let stopped = &AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(move || {
                pool.install(|| {
                    pending.par_iter().for_each_with(tx, |tx, request| {
                        if stopped.load(Ordering::Acquire) {
                            return;
                        }
                        if tx.send(pipeline.process_guarded(request)).is_err() {
                            stopped.store(true, Ordering::Release);
                        }
                    });
                });
            });

            let drained = rx.iter().try_for_each(|state| {
                Self::account(tally, &state);
                writer.record(&state)?;
                progress(*tally);
                Ok::<(), OrthochipError>(())
            });
            if let Err(e) = drained {
                stopped.store(true, Ordering::Release);
                tracing::error!(error = %e, "Batch log write failed, stopping workers");
                return Err(e);
            }
            Ok(())
        })?;

        Ok(workers)
    }

    fn account(tally: &mut BatchProgress, state: &TileState) {
        tally.processed += 1;
        if !state.raster_ok() || !state.vector_ok() {
            tally.failed += 1;
        }
    }
}
