//! Job orchestration: validation, scheduling, checkpointing, merging

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use polystat_core::{CompositeRasterView, GeoTiffSource, RasterSource, ZoneCollection};
use polystat_parallel::{
    CheckpointManager, Chunk, ChunkRunner, JobContext, MemoryBudget, ResumeStatus, schedule,
};
use tracing::{debug, info, warn};

use crate::config::JobConfig;
use crate::error::{Result, ZonalError};
use crate::fingerprint::fingerprint;
use crate::layout::OutputLayout;
use crate::pipeline::{ZonePipeline, zone_bytes};
use crate::postprocess;
use crate::table::{ChunkOutput, Diagnostic, ResultTable};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    /// Stopped through the [`JobContext`]; the checkpoint, if any, is kept
    Cancelled,
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// Complete, post-processing columns included, when `status` is
    /// `Completed`; rows of finished chunks only otherwise
    pub table: ResultTable,
    pub diagnostics: Vec<Diagnostic>,
    pub status: JobStatus,
    pub fingerprint: String,
    pub total_chunks: usize,
    /// Chunks restored from a checkpoint instead of being computed
    pub resumed_chunks: usize,
}

/// Batch zonal statistics over a fixed set of rasters.
///
/// The composite view is opened once and shared read-only by every worker.
/// Zones are split into chunks of `chunk_size`; chunk results are merged in
/// chunk order, so the table never depends on the worker count.
#[derive(Debug)]
pub struct ZonalProcessor {
    config: JobConfig,
    view: CompositeRasterView,
    checkpoint_dir: Option<PathBuf>,
}

impl ZonalProcessor {
    pub fn new(config: JobConfig, sources: Vec<Arc<dyn RasterSource>>) -> Result<Self> {
        let mut problems = Vec::new();
        if sources.is_empty() {
            problems.push("at least one raster is required".to_string());
        }
        problems.extend(config.problems());
        if !problems.is_empty() {
            return Err(ZonalError::Config(problems));
        }

        let view = CompositeRasterView::new(sources)?;
        info!(
            layers = view.layers().len(),
            width = view.width(),
            height = view.height(),
            "opened rasters"
        );
        Ok(Self {
            config,
            view,
            checkpoint_dir: None,
        })
    }

    /// Open GeoTIFF files, named by their file stems
    pub fn open<P: AsRef<Path>>(config: JobConfig, paths: &[P]) -> Result<Self> {
        let sources = paths
            .iter()
            .map(|p| GeoTiffSource::open(p).map(|s| Arc::new(s) as Arc<dyn RasterSource>))
            .collect::<polystat_core::Result<Vec<_>>>()?;
        Self::new(config, sources)
    }

    /// Record progress under `dir` and resume from it when possible
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn view(&self) -> &CompositeRasterView {
        &self.view
    }

    /// Resolve and validate the output columns for `zones`
    pub fn layout(&self, zones: &ZoneCollection) -> Result<OutputLayout> {
        OutputLayout::new(&self.config, &self.view, zones)
    }

    /// Fail before any work when a single zone can never fit the budget
    fn check_budget(&self, zones: &ZoneCollection, budget: &MemoryBudget) -> Result<()> {
        for zone in zones.iter() {
            let Some(window) = zone.bounds().and_then(|b| self.view.window_for_bounds(b)) else {
                continue;
            };
            let bytes = zone_bytes(&self.view, &window);
            if budget.check(bytes).is_err() {
                return Err(ZonalError::ResourceExhausted {
                    zone: zone.id.clone(),
                    requested: bytes,
                    limit: budget.limit(),
                });
            }
        }
        Ok(())
    }

    /// Process every zone.
    ///
    /// Progress is reported once per chunk through `context`, which also
    /// pauses and cancels the run. Per-zone failures end up in the
    /// diagnostics; only configuration, raster and checkpoint I/O problems
    /// fail the job.
    pub fn run(&self, zones: &ZoneCollection, context: &JobContext) -> Result<JobOutcome> {
        let layout = self.layout(zones)?;
        let budget = MemoryBudget::new(self.config.memory_limit);
        self.check_budget(zones, &budget)?;

        let fingerprint = fingerprint(&self.config, &self.view, zones)?;
        let ids: Vec<String> = zones.iter().map(|z| z.id.clone()).collect();
        let chunks = schedule(&ids, self.config.chunk_size);
        info!(
            zones = zones.len(),
            chunks = chunks.len(),
            columns = layout.columns().len(),
            fingerprint = &fingerprint[..12],
            "starting zonal statistics"
        );

        let checkpoint = match &self.checkpoint_dir {
            Some(dir) => Some(self.open_checkpoint(dir, &fingerprint, chunks.len())?),
            None => None,
        };

        let mut outputs: BTreeMap<usize, ChunkOutput> = BTreeMap::new();
        if let Some(cp) = &checkpoint {
            for index in cp.completed() {
                match cp.load_chunk::<ChunkOutput>(index) {
                    Ok(output) => {
                        outputs.insert(index, output);
                    }
                    Err(e) => warn!(chunk = index, error = %e, "checkpointed chunk unreadable, recomputing"),
                }
            }
        }
        let resumed_chunks = outputs.len();
        let pending: Vec<Chunk> = chunks
            .iter()
            .filter(|c| !outputs.contains_key(&c.index))
            .cloned()
            .collect();

        let start_message = if resumed_chunks > 0 {
            format!("resumed {} of {} chunks", resumed_chunks, chunks.len())
        } else {
            format!("processing {} zones", zones.len())
        };
        context.start(resumed_chunks, chunks.len(), Some(start_message));

        let pipeline = ZonePipeline::new(&self.config, &self.view, &layout, &budget);
        let mut failure: Option<ZonalError> = None;
        let summary = ChunkRunner::new(self.config.processing_mode()).run(
            &pending,
            context,
            |chunk| -> Result<ChunkOutput> {
                let output = pipeline.process_chunk(&zones.zones[chunk.range()]);
                if let Some(cp) = &checkpoint {
                    cp.record_completion(chunk.index, &output)?;
                }
                debug!(
                    chunk = chunk.index,
                    zones = chunk.len(),
                    diagnostics = output.diagnostics.len(),
                    "chunk done"
                );
                Ok(output)
            },
            |chunk, result| match result {
                Ok(output) => {
                    outputs.insert(chunk.index, output);
                    context.advance(
                        1,
                        Some(format!("chunk {} of {}", chunk.index + 1, chunks.len())),
                    );
                }
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            },
        )?;
        if let Some(e) = failure {
            return Err(e);
        }

        let finished = outputs.len() == chunks.len();
        let mut table = ResultTable::new(layout.columns().to_vec());
        let mut diagnostics = Vec::new();
        for output in outputs.into_values() {
            table.extend(output.rows);
            diagnostics.extend(output.diagnostics);
        }

        let status = if !finished {
            info!(
                completed = resumed_chunks + summary.completed,
                skipped = summary.skipped,
                "job cancelled"
            );
            JobStatus::Cancelled
        } else {
            if let Some(cp) = checkpoint {
                cp.mark_completed()?;
                cp.remove()?;
            }
            postprocess::apply(&self.config.post_processing, &mut table);
            info!(
                rows = table.len(),
                diagnostics = diagnostics.len(),
                "zonal statistics complete"
            );
            JobStatus::Completed
        };

        Ok(JobOutcome {
            table,
            diagnostics,
            status,
            fingerprint,
            total_chunks: chunks.len(),
            resumed_chunks,
        })
    }

    fn open_checkpoint(
        &self,
        dir: &Path,
        fingerprint: &str,
        total_chunks: usize,
    ) -> Result<CheckpointManager> {
        let (manager, status) =
            CheckpointManager::open(dir, fingerprint, total_chunks, self.config.checkpoint_expiry())?;
        match &status {
            ResumeStatus::Fresh => debug!(dir = %dir.display(), "new checkpoint"),
            ResumeStatus::Resumed { completed } => info!(
                dir = %dir.display(),
                completed = completed.len(),
                total = total_chunks,
                "resuming from checkpoint"
            ),
            ResumeStatus::Discarded(reason) => warn!(
                dir = %dir.display(),
                %reason,
                "checkpoint discarded, starting over"
            ),
        }
        Ok(manager)
    }
}
