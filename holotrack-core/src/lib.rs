//! holotrack-core: Core types for holographic particle pipelines.
//!
//! This crate provides the frame entity shared by every stage, the
//! order-preserving work queues that connect stages, and the worker
//! runtime that drives each stage on its own thread.
//!

pub mod error;
pub mod file;
pub mod queue;
pub mod rect;
pub mod segment;
pub mod worker;

pub use error::{Error, Result};
pub use file::{File, FileParam, FileQueue, FileStatus};
pub use queue::WorkQueue;
pub use rect::Rect;
pub use segment::{FocusMethod, Particle, Segment};
pub use worker::{relay, spawn, Cycle, Pipeline, Ports, StageHandle, Worker, WorkerConfig, WorkerState};
