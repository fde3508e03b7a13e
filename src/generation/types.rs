use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::config::GenerationConfig;

/// Prompt templates for the built-in moods
const MOOD_PROMPTS: &[(&str, &str)] = &[
    ("battle", "epic orchestral battle music, driving percussion, brass stabs, high tension"),
    ("tavern", "lively medieval tavern music, lute and fiddle, warm crowd ambience"),
    ("exploration", "adventurous exploration theme, sweeping strings, hopeful and curious"),
    ("mystery", "dark mysterious ambience, low drones, sparse piano, unresolved tension"),
    ("calm", "calm peaceful ambience, soft pads, gentle harp, slow tempo"),
    ("dungeon", "ominous dungeon ambience, dripping water, distant echoes, deep rumble"),
    ("victory", "triumphant victory fanfare, bright brass, celebratory choir"),
];

/// Prompt for a mood key; unknown keys are used verbatim in a generic template
pub fn prompt_for(key: &str) -> String {
    MOOD_PROMPTS
        .iter()
        .find(|(mood, _)| *mood == key)
        .map(|(_, prompt)| prompt.to_string())
        .unwrap_or_else(|| {
            format!(
                "{} themed background music, loopable, instrumental",
                key.replace(['_', '-'], " ")
            )
        })
}

/// Input parameters of one generation request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    pub prompt: String,
    pub model_variant: String,
    pub duration_secs: u32,
    pub output_format: String,
}

impl GenerationParams {
    pub fn for_mood(key: &str, config: &GenerationConfig) -> Self {
        Self {
            prompt: prompt_for(key),
            model_variant: config.model_variant.clone(),
            duration_secs: config.duration_secs,
            output_format: config.output_format.clone(),
        }
    }

    /// Same request with the variant swapped for a known-good one
    pub fn with_variant(&self, variant: &str) -> Self {
        Self {
            model_variant: variant.to_string(),
            ..self.clone()
        }
    }

    /// JSON `input` object for the job API
    pub fn to_input(&self) -> Value {
        json!({
            "prompt": self.prompt,
            "model_version": self.model_variant,
            "duration": self.duration_secs,
            "output_format": self.output_format,
            "normalization_strategy": "loudness",
        })
    }
}

/// Job creation response
#[derive(Debug, Deserialize)]
pub struct CreatedJob {
    pub id: String,
}

/// Job status response as returned by the API
#[derive(Debug, Deserialize)]
pub struct JobStatusResponse {
    #[allow(dead_code)]
    pub id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// Normalized job state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Succeeded,
    Failed,
}

/// Normalized job status
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub state: JobState,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl JobStatus {
    pub fn pending() -> Self {
        Self {
            state: JobState::Pending,
            output: None,
            error: None,
        }
    }

    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            state: JobState::Succeeded,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            output: None,
            error: Some(error.into()),
        }
    }
}

impl From<JobStatusResponse> for JobStatus {
    fn from(response: JobStatusResponse) -> Self {
        let state = match response.status.as_str() {
            "succeeded" => JobState::Succeeded,
            "failed" | "canceled" | "cancelled" => JobState::Failed,
            _ => JobState::Pending,
        };

        // Output is either a single URL or a list whose first entry is the artifact
        let output = match response.output {
            Some(Value::String(url)) => Some(url),
            Some(Value::Array(items)) => items
                .into_iter()
                .find_map(|v| v.as_str().map(str::to_string)),
            _ => None,
        };

        let error = response.error.and_then(|e| match e {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        });

        Self {
            state,
            output,
            error,
        }
    }
}

/// A generation job tracked by the client
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub key: String,
    pub job_id: String,
    pub state: JobState,
    pub result_locator: Option<String>,
    pub submitted_at: Instant,
}

/// Result of `GenerationJobClient::submit`
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub job: GenerationJob,
    /// Locator of the generated artifact
    pub locator: String,
    /// The API signalled rate limiting at least once along the way
    pub rate_limited: bool,
    /// Served from the in-memory cache without contacting the API
    pub cached: bool,
}
