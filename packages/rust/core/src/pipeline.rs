//! Answer pipeline: cache lookup, then a rate-limit-aware request loop.
//!
//! ```text
//! Idle ──hit──────────────────────────────▶ Succeeded { cached }
//!  │
//!  └─miss─▶ Attempting ──ok──────────────▶ Succeeded
//!              │  ▲
//!              │  └──── Backoff ◀── 429 (budget left)
//!              ├─ 429 (budget spent) ────▶ Failed(RateLimited)
//!              └─ anything else ─────────▶ Failed(RequestFailed)
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use chatbox_shared::{Answer, Query, RetryConfig};

use crate::cache::{AnswerCache, CacheStats};
use crate::transport::{Transport, TransportError};

/// Shown when every attempt was rate limited.
pub const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// Shown for every other failure.
pub const REQUEST_FAILED_MESSAGE: &str = "Sorry, something went wrong. Please try again!";

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// Terminal outcome of a submit that produced no answer.
///
/// `Display` is the fixed user-facing message; the underlying cause is only
/// logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Failure {
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,
    #[error("Sorry, something went wrong. Please try again!")]
    RequestFailed,
}

impl Failure {
    pub fn message(&self) -> &'static str {
        match self {
            Self::RateLimited => RATE_LIMITED_MESSAGE,
            Self::RequestFailed => REQUEST_FAILED_MESSAGE,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy and per-call state
// ---------------------------------------------------------------------------

/// Attempt budget and initial backoff for rate-limited requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles after each retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
        }
    }
}

/// Bookkeeping for one submit. Created on a cache miss, dropped on exit.
#[derive(Debug)]
struct RetryState {
    attempts: u32,
    delay: Duration,
    max_attempts: u32,
}

impl RetryState {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempts: 0,
            delay: policy.base_delay,
            max_attempts: policy.max_attempts.max(1),
        }
    }

    /// 1-based number of the attempt about to run.
    fn attempt(&self) -> u32 {
        self.attempts + 1
    }

    /// Record a 429. Returns how long to wait before retrying, or `None`
    /// once the budget is spent.
    fn backoff(&mut self) -> Option<Duration> {
        if self.attempts + 1 >= self.max_attempts {
            return None;
        }
        let wait = self.delay;
        self.delay = self.delay.saturating_mul(2);
        self.attempts += 1;
        Some(wait)
    }
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// Where a submit currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    /// Request number `attempt` (1-based) is in flight.
    Attempting { attempt: u32 },
    /// Attempt `attempt` was rate limited; sleeping `delay` before the next.
    Backoff { attempt: u32, delay: Duration },
    /// An answer is available. `cached` is true when no request was made.
    Succeeded { cached: bool },
    Failed(Failure),
}

/// Callback for reporting pipeline progress.
pub trait PipelineObserver: Send + Sync {
    fn state_changed(&self, state: &PipelineState);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl PipelineObserver for SilentObserver {
    fn state_changed(&self, _state: &PipelineState) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Turns queries into answers, memoizing successes for the session.
///
/// The pipeline does not enforce single-flight; callers hold a
/// [`FlightPermit`](crate::flight::FlightPermit) around each submit.
pub struct AnswerPipeline<T> {
    transport: T,
    policy: RetryPolicy,
    cache: Mutex<AnswerCache>,
}

impl<T: Transport> AnswerPipeline<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self::with_cache(transport, policy, AnswerCache::new())
    }

    pub fn with_cache(transport: T, policy: RetryPolicy, cache: AnswerCache) -> Self {
        Self {
            transport,
            policy,
            cache: Mutex::new(cache),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache().stats()
    }

    pub fn cached_answers(&self) -> usize {
        self.cache().len()
    }

    /// Answer `query` from the cache or the remote service.
    ///
    /// Only HTTP 429 is retried. A failure never touches the cache.
    #[instrument(skip_all, fields(query_len = query.as_str().len()))]
    pub async fn submit(
        &self,
        query: &Query,
        observer: &dyn PipelineObserver,
    ) -> Result<Answer, Failure> {
        observer.state_changed(&PipelineState::Idle);

        let cached = self.cache().lookup(query);
        if let Some(answer) = cached {
            debug!("cache hit");
            observer.state_changed(&PipelineState::Succeeded { cached: true });
            return Ok(answer);
        }

        let mut retry = RetryState::new(&self.policy);

        loop {
            let attempt = retry.attempt();
            observer.state_changed(&PipelineState::Attempting { attempt });
            info!(attempt, max_attempts = retry.max_attempts, "sending request");

            let error = match self.transport.generate(query).await {
                Ok(response) => match response.first_text() {
                    Some(text) => {
                        let answer = Answer(text.to_string());
                        self.cache().insert(query.clone(), answer.clone());
                        info!(attempt, answer_len = answer.as_str().len(), "answer received");
                        observer.state_changed(&PipelineState::Succeeded { cached: false });
                        return Ok(answer);
                    }
                    None => TransportError::Decode(format!(
                        "response had {} candidate(s) but no text part",
                        response.candidates.len()
                    )),
                },
                Err(e) => e,
            };

            let failure = if error.is_rate_limited() {
                match retry.backoff() {
                    Some(delay) => {
                        warn!(attempt, ?delay, error = %error, "rate limited, backing off");
                        observer.state_changed(&PipelineState::Backoff { attempt, delay });
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    None => {
                        warn!(attempt, error = %error, "rate limited, retry budget exhausted");
                        Failure::RateLimited
                    }
                }
            } else {
                warn!(attempt, error = %error, "request failed");
                Failure::RequestFailed
            };

            observer.state_changed(&PipelineState::Failed(failure));
            return Err(failure);
        }
    }

    fn cache(&self) -> MutexGuard<'_, AnswerCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTransport, RecordingObserver, status};
    use crate::transport::GenerateContentResponse;

    fn q(s: &str) -> Query {
        Query::new(s).unwrap()
    }

    fn pipeline(transport: FakeTransport) -> AnswerPipeline<FakeTransport> {
        AnswerPipeline::new(transport, RetryPolicy::default())
    }

    #[test]
    fn failure_messages_are_fixed() {
        assert_eq!(Failure::RateLimited.to_string(), RATE_LIMITED_MESSAGE);
        assert_eq!(Failure::RequestFailed.to_string(), REQUEST_FAILED_MESSAGE);
        assert_eq!(Failure::RateLimited.message(), RATE_LIMITED_MESSAGE);
    }

    #[test]
    fn retry_state_doubles_until_budget_spent() {
        let mut state = RetryState::new(&RetryPolicy::default());
        assert_eq!(state.attempt(), 1);
        assert_eq!(state.backoff(), Some(Duration::from_millis(2000)));
        assert_eq!(state.attempt(), 2);
        assert_eq!(state.backoff(), Some(Duration::from_millis(4000)));
        assert_eq!(state.attempt(), 3);
        assert_eq!(state.backoff(), None);
    }

    #[test]
    fn single_attempt_policy_never_backs_off() {
        let policy = RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::from_millis(1),
        };
        let mut state = RetryState::new(&policy);
        assert_eq!(state.backoff(), None);
    }

    #[test]
    fn policy_from_config() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn successful_round_trip_then_cache_hit() {
        let pipeline = pipeline(FakeTransport::always(Ok(
            GenerateContentResponse::with_text("4"),
        )));

        let first = pipeline.submit(&q("2+2?"), &SilentObserver).await;
        assert_eq!(first, Ok(Answer("4".into())));
        assert_eq!(pipeline.transport().calls(), 1);

        let second = pipeline.submit(&q("2+2?"), &SilentObserver).await;
        assert_eq!(second, Ok(Answer("4".into())));
        assert_eq!(pipeline.transport().calls(), 1);
        assert_eq!(pipeline.cache_stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[tokio::test]
    async fn prefilled_cache_makes_no_calls() {
        let mut cache = AnswerCache::new();
        cache.insert(q("capital of France?"), Answer("Paris".into()));
        let pipeline = AnswerPipeline::with_cache(
            FakeTransport::always(Err(status(500))),
            RetryPolicy::default(),
            cache,
        );
        let observer = RecordingObserver::default();

        let answer = pipeline.submit(&q("capital of France?"), &observer).await;
        assert_eq!(answer, Ok(Answer("Paris".into())));
        assert_eq!(pipeline.transport().calls(), 0);
        assert_eq!(
            observer.states(),
            vec![PipelineState::Idle, PipelineState::Succeeded { cached: true }]
        );
    }

    #[tokio::test]
    async fn cache_is_exact_match_only() {
        let pipeline = pipeline(FakeTransport::always(Ok(
            GenerateContentResponse::with_text("hello!"),
        )));

        pipeline.submit(&q("Hi"), &SilentObserver).await.unwrap();
        pipeline.submit(&q("hi"), &SilentObserver).await.unwrap();
        assert_eq!(pipeline.transport().calls(), 2);
        assert_eq!(pipeline.cached_answers(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_429_exhausts_three_attempts() {
        let pipeline = pipeline(FakeTransport::always(Err(status(429))));
        let observer = RecordingObserver::default();

        let result = pipeline.submit(&q("busy?"), &observer).await;
        assert_eq!(result, Err(Failure::RateLimited));
        assert_eq!(pipeline.transport().calls(), 3);
        assert_eq!(pipeline.cached_answers(), 0);

        let gaps = pipeline.transport().gaps();
        assert_eq!(
            gaps,
            vec![Duration::from_millis(2000), Duration::from_millis(4000)]
        );

        assert_eq!(
            observer.states(),
            vec![
                PipelineState::Idle,
                PipelineState::Attempting { attempt: 1 },
                PipelineState::Backoff {
                    attempt: 1,
                    delay: Duration::from_millis(2000)
                },
                PipelineState::Attempting { attempt: 2 },
                PipelineState::Backoff {
                    attempt: 2,
                    delay: Duration::from_millis(4000)
                },
                PipelineState::Attempting { attempt: 3 },
                PipelineState::Failed(Failure::RateLimited),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_one_429() {
        let pipeline = pipeline(FakeTransport::scripted(
            vec![Err(status(429))],
            Ok(GenerateContentResponse::with_text("done")),
        ));

        let result = pipeline.submit(&q("retry me"), &SilentObserver).await;
        assert_eq!(result, Ok(Answer("done".into())));
        assert_eq!(pipeline.transport().calls(), 2);
        assert_eq!(pipeline.transport().gaps(), vec![Duration::from_millis(2000)]);
        assert_eq!(pipeline.cached_answers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_fails_fast() {
        let pipeline = pipeline(FakeTransport::always(Err(status(500))));

        let result = pipeline.submit(&q("boom"), &SilentObserver).await;
        assert_eq!(result, Err(Failure::RequestFailed));
        assert_eq!(pipeline.transport().calls(), 1);
        assert_eq!(pipeline.cached_answers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn network_error_is_not_retried() {
        let pipeline = pipeline(FakeTransport::always(Err(TransportError::Network(
            "connection reset".into(),
        ))));

        let result = pipeline.submit(&q("hello"), &SilentObserver).await;
        assert_eq!(result, Err(Failure::RequestFailed));
        assert_eq!(pipeline.transport().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn error_after_429_stops_retrying() {
        let pipeline = pipeline(FakeTransport::scripted(
            vec![Err(status(429)), Err(status(503))],
            Ok(GenerateContentResponse::with_text("never")),
        ));

        let result = pipeline.submit(&q("flaky"), &SilentObserver).await;
        assert_eq!(result, Err(Failure::RequestFailed));
        assert_eq!(pipeline.transport().calls(), 2);
    }

    #[tokio::test]
    async fn zero_candidates_is_request_failed() {
        let pipeline = pipeline(FakeTransport::always(Ok(
            GenerateContentResponse::default(),
        )));
        let observer = RecordingObserver::default();

        let result = pipeline.submit(&q("empty?"), &observer).await;
        assert_eq!(result, Err(Failure::RequestFailed));
        assert_eq!(pipeline.transport().calls(), 1);
        assert_eq!(pipeline.cached_answers(), 0);
        assert_eq!(
            observer.states().last(),
            Some(&PipelineState::Failed(Failure::RequestFailed))
        );
    }

    #[tokio::test]
    async fn failure_then_success_is_not_served_from_cache() {
        let pipeline = pipeline(FakeTransport::scripted(
            vec![Err(status(500))],
            Ok(GenerateContentResponse::with_text("second time lucky")),
        ));

        assert!(pipeline.submit(&q("again"), &SilentObserver).await.is_err());
        let ok = pipeline.submit(&q("again"), &SilentObserver).await;
        assert_eq!(ok, Ok(Answer("second time lucky".into())));
        assert_eq!(pipeline.transport().calls(), 2);
    }
}
