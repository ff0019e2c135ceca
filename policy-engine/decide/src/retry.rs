use mesh_policy_core::retry::{RetryPolicy, UpstreamOutcome};
use rand::Rng;
use std::{future::Future, time::Duration};
use tokio::time;
use tracing::{debug, trace};

/// Bounds the randomized delay between attempts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

/// Classifies an error returned by an upstream attempt.
pub trait UpstreamError {
    fn outcome(&self) -> UpstreamOutcome;
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError<E> {
    /// The last attempt failed and was not retried.
    #[error("upstream failed after {attempts} attempt(s): {error}")]
    Upstream { attempts: u32, error: E },

    /// The last attempt exceeded the per-try timeout and was not retried.
    #[error("attempt {attempts} timed out after {timeout:?}")]
    PerTryTimeout { attempts: u32, timeout: Duration },

    /// The route's overall timeout elapsed. Nothing is retried past this point.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

enum Failure<E> {
    Upstream(E),
    PerTryTimeout(Duration),
}

/// Runs `attempt` until it succeeds, the retry policy declines to retry its failure, or the
/// retry budget is spent.
///
/// Each call to `attempt` is passed its 1-based attempt number and is bounded by the policy's
/// per-try timeout, if any. `timeout` bounds the whole exchange, including backoff.
pub async fn execute<T, E, F, Fut>(
    policy: &RetryPolicy,
    timeout: Option<Duration>,
    backoff: Backoff,
    mut attempt: F,
) -> Result<T, AttemptError<E>>
where
    E: UpstreamError,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = async {
        let mut n = 0;
        loop {
            n += 1;
            let res = match policy.per_try_timeout {
                Some(per_try) => match time::timeout(per_try, attempt(n)).await {
                    Ok(res) => res.map_err(Failure::Upstream),
                    Err(_) => Err(Failure::PerTryTimeout(per_try)),
                },
                None => attempt(n).await.map_err(Failure::Upstream),
            };
            let failure = match res {
                Ok(rsp) => {
                    trace!(attempt = n, "upstream succeeded");
                    return Ok(rsp);
                }
                Err(failure) => failure,
            };

            let outcome = match &failure {
                Failure::Upstream(error) => error.outcome(),
                Failure::PerTryTimeout(_) => UpstreamOutcome::Timeout,
            };
            if n > policy.attempts || !policy.is_retryable(&outcome) {
                debug!(attempts = n, %outcome, "giving up");
                return Err(failure.into_error(n));
            }

            let delay = backoff.delay(n, &mut rand::thread_rng());
            debug!(attempt = n, %outcome, ?delay, "retrying");
            time::sleep(delay).await;
        }
    };

    match timeout {
        Some(timeout) => time::timeout(timeout, attempts)
            .await
            .unwrap_or_else(|_| {
                debug!(?timeout, "request timed out");
                Err(AttemptError::Timeout(timeout))
            }),
        None => attempts.await,
    }
}

// === impl Backoff ===

impl Backoff {
    /// Retries are attempted immediately.
    pub const NONE: Self = Self {
        base: Duration::ZERO,
        max: Duration::ZERO,
    };

    /// A uniformly random delay before the `retry`th retry. The upper bound doubles with each
    /// retry, starting at `base` and never exceeding `max`.
    pub fn delay<R: Rng>(&self, retry: u32, rng: &mut R) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        let ceiling = self.base.saturating_mul(factor).min(self.max);
        if ceiling.is_zero() {
            return Duration::ZERO;
        }
        rng.gen_range(Duration::ZERO..=ceiling)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(25),
            max: Duration::from_millis(250),
        }
    }
}

// === impl AttemptError ===

impl<E: UpstreamError> AttemptError<E> {
    /// The outcome the client observes.
    pub fn outcome(&self) -> UpstreamOutcome {
        match self {
            Self::Upstream { error, .. } => error.outcome(),
            Self::PerTryTimeout { .. } | Self::Timeout(_) => UpstreamOutcome::Timeout,
        }
    }
}

impl<E> Failure<E> {
    fn into_error(self, attempts: u32) -> AttemptError<E> {
        match self {
            Self::Upstream(error) => AttemptError::Upstream { attempts, error },
            Self::PerTryTimeout(timeout) => AttemptError::PerTryTimeout { attempts, timeout },
        }
    }
}

impl UpstreamError for UpstreamOutcome {
    fn outcome(&self) -> UpstreamOutcome {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_policy_core::{http_route::StatusCode, retry::RetryCondition};
    use rand::{rngs::StdRng, SeedableRng};

    const UNAVAILABLE: UpstreamOutcome = UpstreamOutcome::Status(StatusCode::SERVICE_UNAVAILABLE);

    fn policy(attempts: u32, per_try_timeout: Option<Duration>) -> RetryPolicy {
        RetryPolicy {
            attempts,
            per_try_timeout,
            conditions: vec![RetryCondition::GatewayError],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let res = execute(&policy(2, None), None, Backoff::default(), |n| async move {
            if n < 3 {
                Err(UNAVAILABLE)
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(res, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_attempts_are_spent() {
        let mut calls = 0;
        let res = execute(&policy(2, None), None, Backoff::default(), |_| {
            calls += 1;
            async { Err::<(), _>(UNAVAILABLE) }
        })
        .await;
        assert_eq!(
            res,
            Err(AttemptError::Upstream {
                attempts: 3,
                error: UNAVAILABLE
            })
        );
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn only_configured_conditions_are_retried() {
        let not_found = UpstreamOutcome::Status(StatusCode::NOT_FOUND);
        let mut calls = 0;
        let res = execute(&policy(5, None), None, Backoff::default(), |_| {
            calls += 1;
            async move { Err::<(), _>(not_found) }
        })
        .await;
        assert_eq!(
            res,
            Err(AttemptError::Upstream {
                attempts: 1,
                error: not_found
            })
        );
        assert_eq!(calls, 1);

        let res = execute(&RetryPolicy::disabled(), None, Backoff::default(), |_| async {
            Err::<(), _>(UNAVAILABLE)
        })
        .await;
        assert_eq!(res.unwrap_err().outcome(), UNAVAILABLE);
    }

    #[tokio::test(start_paused = true)]
    async fn per_try_timeouts_are_retried() {
        let start = time::Instant::now();
        let res = execute(
            &policy(2, Some(Duration::from_secs(1))),
            None,
            Backoff::NONE,
            |n| async move {
                if n == 1 {
                    time::sleep(Duration::from_secs(10)).await;
                }
                Ok::<_, UpstreamOutcome>(n)
            },
        )
        .await;
        assert_eq!(res, Ok(2));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn per_try_timeouts_need_a_matching_condition() {
        let policy = RetryPolicy {
            conditions: vec![RetryCondition::Retriable4xx],
            ..policy(2, Some(Duration::from_secs(1)))
        };
        let res = execute(&policy, None, Backoff::NONE, |_| async {
            time::sleep(Duration::from_secs(10)).await;
            Ok::<_, UpstreamOutcome>(())
        })
        .await;
        assert_eq!(
            res,
            Err(AttemptError::PerTryTimeout {
                attempts: 1,
                timeout: Duration::from_secs(1)
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn overall_timeout_bounds_retries() {
        let mut calls = 0;
        let start = time::Instant::now();
        let res = execute(
            &policy(10, Some(Duration::from_secs(1))),
            Some(Duration::from_millis(2_500)),
            Backoff::NONE,
            |_| {
                calls += 1;
                async {
                    time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, UpstreamOutcome>(())
                }
            },
        )
        .await;
        assert_eq!(res, Err(AttemptError::Timeout(Duration::from_millis(2_500))));
        assert_eq!(res.unwrap_err().outcome(), UpstreamOutcome::Timeout);
        assert_eq!(start.elapsed(), Duration::from_millis(2_500));
        assert_eq!(calls, 3);
    }

    #[test]
    fn backoff_is_bounded() {
        let backoff = Backoff::default();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..1_000 {
            assert!(backoff.delay(1, &mut rng) <= Duration::from_millis(25));
            assert!(backoff.delay(3, &mut rng) <= Duration::from_millis(100));
            assert!(backoff.delay(10, &mut rng) <= Duration::from_millis(250));
        }
        assert_eq!(Backoff::NONE.delay(4, &mut rng), Duration::ZERO);
    }
}
