//! Ordered transport fallback
//!
//! Each request walks the candidate list in priority order. The first
//! transport that produces a response wins; a failed attempt is followed by
//! a linear backoff before the next candidate. The list itself is shared and
//! never changes, so one request's failures do not affect the next.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Result, ShroudError};
use crate::models::{TargetRequest, TransportCandidate, UpstreamResponse};

/// One HTTP exchange with the target over a given transport
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(
        &self,
        transport: &TransportCandidate,
        request: &TargetRequest,
    ) -> Result<UpstreamResponse>;
}

/// Source of delays between attempts
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Timing of the fallback walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound for a single attempt
    pub attempt_timeout: Duration,
    /// Delay after the first failure; grows linearly with each attempt
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Delay after the failed attempt with zero-based index `attempt`
    pub fn backoff(&self, attempt: usize) -> Duration {
        self.backoff_base
            .saturating_mul(u32::try_from(attempt + 1).unwrap_or(u32::MAX))
    }

    /// Longest walk over `candidates` transports: every attempt times out,
    /// with a backoff between consecutive attempts
    pub fn worst_case(&self, candidates: usize) -> Duration {
        (0..candidates).fold(Duration::ZERO, |total, attempt| {
            let total = total.saturating_add(self.attempt_timeout);
            if attempt + 1 < candidates {
                total.saturating_add(self.backoff(attempt))
            } else {
                total
            }
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_millis(8000),
            backoff_base: Duration::from_millis(250),
        }
    }
}

/// Successful fetch and the transport that produced it
#[derive(Debug)]
pub struct FetchOutcome {
    pub response: UpstreamResponse,
    pub transport: TransportCandidate,
    pub attempts: usize,
}

/// Walks the transport candidates for each request
pub struct TransportSelector {
    candidates: Arc<[TransportCandidate]>,
    upstream: Arc<dyn Upstream>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl TransportSelector {
    pub fn new(
        candidates: Arc<[TransportCandidate]>,
        upstream: Arc<dyn Upstream>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            candidates,
            upstream,
            clock: Arc::new(TokioClock),
            policy,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn candidates(&self) -> &[TransportCandidate] {
        &self.candidates
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetch `request`, falling back through the candidates in order
    ///
    /// Fails with `UpstreamTimeout` when every attempt timed out and with
    /// `UpstreamUnreachable` otherwise; both carry the last failure. An error
    /// that another transport cannot fix is returned as is.
    pub async fn fetch(&self, request: &TargetRequest) -> Result<FetchOutcome> {
        let total = self.candidates.len();
        let mut all_timeouts = true;
        let mut last_failure: Option<(&TransportCandidate, ShroudError)> = None;

        for (attempt, candidate) in self.candidates.iter().enumerate() {
            debug!(
                host = request.host(),
                transport = %candidate,
                attempt = attempt + 1,
                total,
                "Trying transport"
            );

            let result = tokio::time::timeout(
                self.policy.attempt_timeout,
                self.upstream.fetch(candidate, request),
            )
            .await
            .unwrap_or(Err(ShroudError::Timeout));

            match result {
                Ok(response) => {
                    return Ok(FetchOutcome {
                        response,
                        transport: candidate.clone(),
                        attempts: attempt + 1,
                    })
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(
                        host = request.host(),
                        transport = %candidate,
                        attempt = attempt + 1,
                        total,
                        error = %e,
                        "Transport attempt failed"
                    );
                    all_timeouts &= e.is_timeout();
                    last_failure = Some((candidate, e));

                    if attempt + 1 < total {
                        self.clock.sleep(self.policy.backoff(attempt)).await;
                    }
                }
            }
        }

        let Some((candidate, error)) = last_failure else {
            return Err(ShroudError::UpstreamUnreachable {
                detail: "no transports configured".to_string(),
            });
        };

        let detail = format!(
            "{} transport(s) failed; last attempt via {}: {}",
            total, candidate, error
        );

        if all_timeouts {
            Err(ShroudError::UpstreamTimeout {
                detail: Some(detail),
            })
        } else {
            Err(ShroudError::UpstreamUnreachable { detail })
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingClock, ScriptedUpstream};
    use super::*;
    use crate::models::{ProxyCredentials, TransportKind};
    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};
    use url::Url;

    fn candidates() -> Arc<[TransportCandidate]> {
        TransportCandidate::chain([
            TransportCandidate::relay(
                TransportKind::Socks5,
                "127.0.0.1:1080",
                Some(ProxyCredentials {
                    username: "u".to_string(),
                    password: "p".to_string(),
                }),
            ),
            TransportCandidate::relay(TransportKind::HttpProxy, "127.0.0.1:3128", None),
        ])
    }

    fn request() -> TargetRequest {
        TargetRequest::new(
            Method::GET,
            Url::parse("http://example.com/").unwrap(),
            HeaderMap::new(),
            None,
        )
    }

    fn ok(_: &TargetRequest) -> Result<UpstreamResponse> {
        Ok(UpstreamResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(b"ok"),
        ))
    }

    fn refused(_: &TargetRequest) -> Result<UpstreamResponse> {
        Err(ShroudError::ProxyConnectionFailed("connection refused".to_string()))
    }

    fn timed_out(_: &TargetRequest) -> Result<UpstreamResponse> {
        Err(ShroudError::Timeout)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_millis(100),
        }
    }

    fn selector(upstream: Arc<ScriptedUpstream>, clock: Arc<RecordingClock>) -> TransportSelector {
        TransportSelector::new(candidates(), upstream, policy()).with_clock(clock)
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = policy();
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(300));
    }

    #[test]
    fn worst_case_counts_backoff_between_attempts_only() {
        let policy = policy();
        assert_eq!(policy.worst_case(0), Duration::ZERO);
        assert_eq!(policy.worst_case(1), Duration::from_secs(5));
        // 3 x 5s + 100ms + 200ms
        assert_eq!(policy.worst_case(3), Duration::from_millis(15_300));
    }

    #[tokio::test]
    async fn first_success_stops_the_walk() {
        let upstream = Arc::new(ScriptedUpstream::default().on(TransportKind::Socks5, ok));
        let clock = Arc::new(RecordingClock::default());

        let outcome = selector(upstream.clone(), clock.clone())
            .fetch(&request())
            .await
            .unwrap();

        assert_eq!(outcome.transport.kind, TransportKind::Socks5);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(upstream.calls().len(), 1);
        assert!(clock.sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_direct_once_each() {
        let upstream = Arc::new(
            ScriptedUpstream::default()
                .on(TransportKind::Socks5, refused)
                .on(TransportKind::HttpProxy, timed_out)
                .on(TransportKind::Direct, ok),
        );
        let clock = Arc::new(RecordingClock::default());

        let outcome = selector(upstream.clone(), clock.clone())
            .fetch(&request())
            .await
            .unwrap();

        assert!(outcome.transport.is_direct());
        assert_eq!(outcome.attempts, 3);
        let kinds: Vec<_> = upstream.calls().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![
                TransportKind::Socks5,
                TransportKind::HttpProxy,
                TransportKind::Direct
            ]
        );
        assert_eq!(
            *clock.sleeps.lock().unwrap(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn all_timeouts_is_a_gateway_timeout_naming_the_last_transport() {
        let upstream = Arc::new(
            ScriptedUpstream::default()
                .on(TransportKind::Socks5, timed_out)
                .on(TransportKind::HttpProxy, timed_out)
                .on(TransportKind::Direct, timed_out),
        );
        let clock = Arc::new(RecordingClock::default());

        let err = selector(upstream.clone(), clock.clone())
            .fetch(&request())
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        let detail = err.detail().unwrap();
        assert!(detail.contains("3 transport(s) failed"));
        assert!(detail.contains("last attempt via direct"));
        assert_eq!(upstream.calls().len(), 3);
        // no backoff after the final candidate
        assert_eq!(clock.sleeps.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn mixed_failures_are_unreachable() {
        let upstream = Arc::new(
            ScriptedUpstream::default()
                .on(TransportKind::Socks5, timed_out)
                .on(TransportKind::HttpProxy, timed_out)
                .on(TransportKind::Direct, refused),
        );

        let err = selector(upstream, Arc::new(RecordingClock::default()))
            .fetch(&request())
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.detail().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn attempt_timeout_bounds_a_slow_transport() {
        let upstream =
            Arc::new(ScriptedUpstream::default().with_delay(Duration::from_millis(500)));
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(20),
            backoff_base: Duration::from_millis(1),
        };
        let selector = TransportSelector::new(candidates(), upstream.clone(), policy)
            .with_clock(Arc::new(RecordingClock::default()));

        let err = selector.fetch(&request()).await.unwrap_err();
        assert!(matches!(err, ShroudError::UpstreamTimeout { .. }));
        assert_eq!(upstream.calls().len(), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_ends_the_walk() {
        let upstream = Arc::new(
            ScriptedUpstream::default()
                .on(TransportKind::Socks5, |_| {
                    Err(ShroudError::ResponseTooLarge { limit: 10 })
                })
                .on(TransportKind::Direct, ok),
        );

        let err = selector(upstream.clone(), Arc::new(RecordingClock::default()))
            .fetch(&request())
            .await
            .unwrap_err();

        assert!(matches!(err, ShroudError::ResponseTooLarge { limit: 10 }));
        assert_eq!(upstream.calls().len(), 1);
    }
}
