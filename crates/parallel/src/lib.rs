//! # polystat parallel
//!
//! Execution machinery for batch zonal jobs.
//!
//! This crate provides:
//! - Deterministic chunking of the zone sequence
//! - A bounded worker pool that merges chunk results in order
//! - A shared memory ceiling with blocking reservations
//! - Job control (progress, pause/resume, cancel)
//! - A crash-resumable checkpoint of completed chunks

pub mod budget;
pub mod checkpoint;
pub mod chunk;
pub mod context;
pub mod error;
pub mod strategy;

pub use budget::{MemoryBudget, Reservation};
pub use checkpoint::{CheckpointManager, CheckpointState, DEFAULT_EXPIRY, DiscardReason, ResumeStatus};
pub use chunk::{Chunk, ChunkIterator, schedule};
pub use context::{JobContext, Progress};
pub use error::{ParallelError, Result};
pub use strategy::{ChunkRunner, ProcessingMode, RunSummary, num_cpus};
