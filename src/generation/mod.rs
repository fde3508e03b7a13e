mod api;
mod cache;
mod client;
mod types;

pub use api::{GenerationJobApi, HttpJobApi};
pub use cache::GenerationCache;
pub use client::{AbortFlag, GenerationJobClient};
pub use types::{
    prompt_for, GenerationJob, GenerationOutcome, GenerationParams, JobState, JobStatus,
};
