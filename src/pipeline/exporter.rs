// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Export orchestration

use super::{ComputeWorker, ExportBundle, TilingPlan, WorkItem, WorkSplitter, WorkerShared};
use crate::config::{ExportConfig, OffsetMode};
use crate::coords::{
    ElevationService, HttpElevationService, OffsetResolver, Projection, RateLimiter,
};
use crate::db::StoreConnector;
use crate::error::{ExportError, Result};
use crate::export::ExportWriter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Per-object progress notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Queued,
    Exported { gmlid: String },
    Skipped { gmlid: String },
    Failed { gmlid: String },
}

type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Outcome of one export run
#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    pub tiles: usize,
    pub queued: usize,
    pub exported: usize,
    /// Objects without renderable geometry
    pub skipped: usize,
    /// Objects dropped because of geometry or store errors
    pub failed: usize,
    /// Artifacts dropped because of I/O errors
    pub write_failures: usize,
    pub cancelled: bool,
    pub files: Vec<PathBuf>,
    pub elapsed: Duration,
}

#[derive(Default)]
struct Counters {
    exported: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    write_failures: AtomicUsize,
}

/// Runs the splitter, compute and writer stages
pub struct Exporter {
    config: Arc<ExportConfig>,
    connector: Arc<dyn StoreConnector>,
    elevation: Option<Arc<dyn ElevationService>>,
    cancel: Arc<AtomicBool>,
    progress: Option<ProgressCallback>,
}

impl Exporter {
    pub fn new(config: ExportConfig, connector: Arc<dyn StoreConnector>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            connector,
            elevation: None,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
        })
    }

    /// Use this service instead of the configured HTTP endpoint.
    pub fn with_elevation_service(mut self, service: Arc<dyn ElevationService>) -> Self {
        self.elevation = Some(service);
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Flag that stops the export when set; safe to set from any thread.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Stop enqueueing work. Items already queued are still exported.
    pub fn shutdown(&self) {
        info!("Export shutdown requested");
        self.cancel.store(true, Ordering::Relaxed);
    }

    fn notify(&self, event: ProgressEvent) {
        if let Some(progress) = &self.progress {
            progress(event);
        }
    }

    fn elevation_service(&self) -> Result<Option<Arc<dyn ElevationService>>> {
        let altitude = &self.config.altitude;
        if altitude.offset != OffsetMode::GenericAttribute || !altitude.call_elevation_service {
            return Ok(None);
        }
        if let Some(service) = &self.elevation {
            return Ok(Some(Arc::clone(service)));
        }
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(
            self.config.elevation.min_interval_ms,
        )));
        Ok(Some(Arc::new(HttpElevationService::new(&self.config.elevation, limiter)?)))
    }

    /// Run the export to completion or cancellation.
    ///
    /// Store errors while enumerating abort the run; per-object errors are
    /// counted in the summary.
    pub fn run(&self) -> Result<ExportSummary> {
        let started = Instant::now();
        let config = &self.config;

        let projection = Arc::new(Projection::from_config(&config.crs)?);
        let offsets = OffsetResolver::new(
            &config.altitude,
            Arc::clone(&projection),
            self.elevation_service()?,
        );
        let shared = WorkerShared::new(Arc::clone(config), Arc::clone(&projection), offsets);

        let split_store = self.connector.connect()?;
        let splitter = WorkSplitter::new(&config.selection, &projection, &self.cancel);
        let extent = splitter.extent(split_store.as_ref(), &config.tiling)?;
        let plan = TilingPlan::from_config(&config.tiling, extent)?;
        info!(
            tiles = plan.len(),
            crs = %projection.crs_name(),
            forms = ?config.selection.forms,
            "Starting export"
        );

        let writer = ExportWriter::new(Arc::clone(config), &plan)?;
        let counters = Counters::default();
        let workers = config.pipeline.compute_workers();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("citykml-compute-{}", i))
            .build()
            .map_err(|err| ExportError::Config(format!("cannot start compute workers: {}", err)))?;

        let capacity = config.pipeline.queue_capacity;
        let (work_tx, work_rx) = mpsc::sync_channel::<WorkItem>(capacity);
        let (bundle_tx, bundle_rx) = mpsc::sync_channel::<ExportBundle>(capacity);
        let work_rx = Mutex::new(work_rx);
        let bundle_rx = Mutex::new(bundle_rx);

        let plan_ref = &plan;
        let shared_ref = &shared;
        let counters_ref = &counters;
        let writer_ref = &writer;
        let work_ref = &work_rx;
        let bundle_ref = &bundle_rx;

        let split_result = std::thread::scope(|scope| {
            let splitter_thread = scope.spawn(move || {
                let mut sink = |item: WorkItem| {
                    if work_tx.send(item).is_err() {
                        return false;
                    }
                    self.notify(ProgressEvent::Queued);
                    true
                };
                splitter.run(split_store.as_ref(), plan_ref, &mut sink)
            });

            for _ in 0..config.pipeline.writer_workers.max(1) {
                scope.spawn(move || self.write_loop(writer_ref, bundle_ref, counters_ref));
            }

            pool.scope(|pool_scope| {
                for _ in 0..workers {
                    let sender = bundle_tx.clone();
                    pool_scope.spawn(move |_| {
                        self.compute_loop(shared_ref, work_ref, sender, counters_ref)
                    });
                }
            });
            drop(bundle_tx);

            match splitter_thread.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        });

        let stats = split_result?;
        let files = writer.finish()?;

        let summary = ExportSummary {
            tiles: plan.len(),
            queued: stats.items,
            exported: counters.exported.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            write_failures: counters.write_failures.load(Ordering::Relaxed),
            cancelled: stats.cancelled,
            files,
            elapsed: started.elapsed(),
        };
        info!(
            exported = summary.exported,
            skipped = summary.skipped,
            failed = summary.failed,
            write_failures = summary.write_failures,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Export finished"
        );
        Ok(summary)
    }

    fn compute_loop(
        &self,
        shared: &WorkerShared,
        queue: &Mutex<Receiver<WorkItem>>,
        sink: SyncSender<ExportBundle>,
        counters: &Counters,
    ) {
        let worker = match self.connector.connect() {
            Ok(store) => Some(ComputeWorker::new(store, shared)),
            Err(err) => {
                error!(error = %err, "Compute worker cannot open the store");
                None
            }
        };

        while let Some(item) = next(queue) {
            let gmlid = item.gmlid().to_string();
            // without a connection the worker only drains its share of the queue
            let Some(worker) = &worker else {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                self.notify(ProgressEvent::Failed { gmlid });
                continue;
            };
            match worker.process(item) {
                Ok(Some(bundle)) => {
                    if sink.send(bundle).is_err() {
                        warn!(gmlid = %gmlid, "Writers stopped, dropping object");
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(None) => {
                    counters.skipped.fetch_add(1, Ordering::Relaxed);
                    self.notify(ProgressEvent::Skipped { gmlid });
                }
                Err(err) => {
                    error!(gmlid = %gmlid, error = %err, "Object export failed");
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    self.notify(ProgressEvent::Failed { gmlid });
                }
            }
        }
    }

    fn write_loop(
        &self,
        writer: &ExportWriter,
        queue: &Mutex<Receiver<ExportBundle>>,
        counters: &Counters,
    ) {
        while let Some(bundle) = next(queue) {
            let gmlid = bundle.item.gmlid().to_string();
            match writer.write(bundle) {
                Ok(()) => {
                    counters.exported.fetch_add(1, Ordering::Relaxed);
                    self.notify(ProgressEvent::Exported { gmlid });
                }
                Err(err) => {
                    error!(gmlid = %gmlid, error = %err, "Writing object failed");
                    counters.write_failures.fetch_add(1, Ordering::Relaxed);
                    self.notify(ProgressEvent::Failed { gmlid });
                }
            }
        }
    }
}

/// Take the next message from a shared receiver, `None` once all senders
/// are gone.
fn next<T>(queue: &Mutex<Receiver<T>>) -> Option<T> {
    let receiver = queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    receiver.recv().ok()
}
