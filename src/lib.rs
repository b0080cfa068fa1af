//! Atelier: progressive media generation for narrative game sessions
//!
//! Queues image and video generation jobs, serves them in viewing order through
//! an ordered fallback chain of external providers, polls long-running
//! operations in the background and caches results by request fingerprint. A
//! heuristic classifier adds video jobs for dramatic moments as play unfolds.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod fallback;
pub mod job;
pub mod logging;
pub mod pipeline;
pub mod plan;
pub mod poller;
pub mod provider;
pub mod storage;
pub mod trigger;
pub mod types;

pub use error::PipelineError;
pub use job::{AssetLocator, GenerationJob, JobDescriptor};
pub use pipeline::{GenerationPipeline, PipelineBuilder, TurnObservation, TurnOutcome};
pub use types::{Category, JobId, JobStatus};
