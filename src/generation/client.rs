use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::StatusCode;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::GenerationConfig;
use crate::error::{GenerationError, JobApiError};

use super::api::GenerationJobApi;
use super::cache::GenerationCache;
use super::types::{GenerationJob, GenerationOutcome, GenerationParams, JobState};

/// Cancellation flag checked on every poll tick
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Retry bookkeeping for one job
#[derive(Default)]
struct RetryState {
    rate_limited: bool,
    rate_limit_attempts: u32,
    transport_errors: u32,
}

/// Submits generation jobs, polls them to completion and caches results by key
pub struct GenerationJobClient {
    api: Arc<dyn GenerationJobApi>,
    config: GenerationConfig,
    cache: GenerationCache,
}

impl GenerationJobClient {
    pub fn new(api: Arc<dyn GenerationJobApi>, config: GenerationConfig) -> Self {
        let cache = GenerationCache::new(config.cache_ttl);
        Self { api, config, cache }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn cache(&self) -> &GenerationCache {
        &self.cache
    }

    pub async fn submit(
        &self,
        key: &str,
        params: &GenerationParams,
    ) -> Result<GenerationOutcome, GenerationError> {
        self.submit_with_abort(key, params, &AbortFlag::new()).await
    }

    /// Resolve `key` to a generated artifact locator.
    ///
    /// Cache hits return without contacting the API. Rate limiting is
    /// retried with backoff and reported on the outcome.
    #[instrument(skip(self, params, abort))]
    pub async fn submit_with_abort(
        &self,
        key: &str,
        params: &GenerationParams,
        abort: &AbortFlag,
    ) -> Result<GenerationOutcome, GenerationError> {
        if let Some(mut outcome) = self.cache.get(key) {
            outcome.cached = true;
            return Ok(outcome);
        }

        let mut rng = StdRng::from_entropy();
        let mut state = RetryState::default();

        let job_id = self.create_job(params, abort, &mut state, &mut rng).await?;
        let submitted_at = Instant::now();
        info!(key, job_id = %job_id, "Generation job submitted");

        let locator = self.poll_job(&job_id, abort, &mut state, &mut rng).await?;
        info!(
            key,
            job_id = %job_id,
            elapsed_ms = submitted_at.elapsed().as_millis() as u64,
            rate_limited = state.rate_limited,
            "Generation job succeeded"
        );

        let outcome = GenerationOutcome {
            job: GenerationJob {
                key: key.to_string(),
                job_id,
                state: JobState::Succeeded,
                result_locator: Some(locator.clone()),
                submitted_at,
            },
            locator,
            rate_limited: state.rate_limited,
            cached: false,
        };
        self.cache.insert(key, outcome.clone());
        Ok(outcome)
    }

    async fn create_job(
        &self,
        params: &GenerationParams,
        abort: &AbortFlag,
        state: &mut RetryState,
        rng: &mut StdRng,
    ) -> Result<String, GenerationError> {
        let mut params = params.clone();
        let mut fell_back = false;

        loop {
            if abort.is_aborted() {
                return Err(GenerationError::Cancelled);
            }

            match self
                .api
                .create(&self.config.model_version, &params.to_input())
                .await
            {
                Ok(job_id) => return Ok(job_id),
                Err(JobApiError::InvalidParams(detail)) => {
                    if fell_back || params.model_variant == self.config.fallback_variant {
                        return Err(GenerationError::InvalidParams(detail));
                    }
                    warn!(
                        variant = %params.model_variant,
                        fallback = %self.config.fallback_variant,
                        detail = %detail,
                        "Parameters rejected, retrying with fallback variant"
                    );
                    params = params.with_variant(&self.config.fallback_variant);
                    fell_back = true;
                }
                Err(e) => self.handle_retryable(e, state, rng).await?,
            }
        }
    }

    async fn poll_job(
        &self,
        job_id: &str,
        abort: &AbortFlag,
        state: &mut RetryState,
        rng: &mut StdRng,
    ) -> Result<String, GenerationError> {
        let started = Instant::now();
        let ceiling = self.config.max_poll_duration;
        let mut polls: u32 = 0;

        loop {
            if abort.is_aborted() {
                debug!(job_id, "Generation job aborted");
                return Err(GenerationError::Cancelled);
            }
            let waited = started.elapsed();
            if waited >= ceiling {
                return Err(GenerationError::Timeout(ceiling));
            }

            sleep(self.poll_interval(polls).min(ceiling - waited)).await;
            polls += 1;
            if abort.is_aborted() {
                return Err(GenerationError::Cancelled);
            }

            match self.api.status(job_id).await {
                Ok(status) => {
                    state.transport_errors = 0;
                    match status.state {
                        JobState::Pending => continue,
                        JobState::Succeeded => {
                            return status.output.ok_or_else(|| {
                                GenerationError::Malformed("succeeded without output".into())
                            })
                        }
                        JobState::Failed => {
                            return Err(GenerationError::Failed(
                                status.error.unwrap_or_else(|| "unknown error".into()),
                            ))
                        }
                    }
                }
                Err(JobApiError::InvalidParams(detail)) => {
                    return Err(GenerationError::Failed(detail))
                }
                Err(e) => self.handle_retryable(e, state, rng).await?,
            }
        }
    }

    /// Back off after a rate limit or transport error, or fail once the
    /// retry budget or the circuit breaker is exhausted
    async fn handle_retryable(
        &self,
        error: JobApiError,
        state: &mut RetryState,
        rng: &mut StdRng,
    ) -> Result<(), GenerationError> {
        let delay = match error {
            JobApiError::RateLimited { retry_after } => {
                state.rate_limited = true;
                state.rate_limit_attempts += 1;
                if state.rate_limit_attempts > self.config.max_rate_limit_retries {
                    return Err(GenerationError::RateLimited {
                        attempts: state.rate_limit_attempts,
                    });
                }
                self.backoff_delay(state.rate_limit_attempts, retry_after, rng)
            }
            JobApiError::Transport(msg) => {
                state.transport_errors += 1;
                if state.transport_errors >= self.config.circuit_breaker_threshold {
                    warn!(errors = state.transport_errors, last = %msg, "Circuit breaker open");
                    return Err(GenerationError::CircuitOpen(state.transport_errors));
                }
                warn!(errors = state.transport_errors, error = %msg, "Transport error, retrying");
                self.backoff_delay(state.transport_errors, None, rng)
            }
            JobApiError::Status(code) => {
                return Err(StatusCode::from_u16(code)
                    .map(GenerationError::HttpStatus)
                    .unwrap_or_else(|_| GenerationError::Failed(format!("HTTP {}", code))))
            }
            JobApiError::Malformed(msg) => return Err(GenerationError::Malformed(msg)),
            JobApiError::InvalidParams(detail) => {
                return Err(GenerationError::InvalidParams(detail))
            }
        };

        debug!(delay_ms = delay.as_millis() as u64, "Backing off");
        sleep(delay).await;
        Ok(())
    }

    /// Poll interval after `polls` completed polls
    pub fn poll_interval(&self, polls: u32) -> Duration {
        if polls < self.config.fast_poll_count {
            self.config.fast_poll_interval
        } else {
            self.config.slow_poll_interval
        }
    }

    /// Exponential backoff with jitter. A server hint replaces the
    /// exponential base and is never shortened by the cap.
    pub fn backoff_delay(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
        rng: &mut impl Rng,
    ) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = retry_after
            .unwrap_or_else(|| self.config.initial_backoff.saturating_mul(1u32 << exponent));

        let max_jitter = self.config.backoff_jitter.as_millis() as u64;
        let jitter = if max_jitter == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.gen_range(0..=max_jitter))
        };

        let cap = self.config.max_backoff.max(retry_after.unwrap_or_default());
        (base + jitter).min(cap)
    }

    /// Evict expired cache entries
    pub fn sweep(&self) -> usize {
        self.cache.sweep()
    }

    /// Run `sweep` every `every` until the handle is aborted
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}
