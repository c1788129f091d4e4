use std::time::{Duration, SystemTime};

use http::StatusCode;
use rand::RngExt;

use crate::response::HttpResponse;
use crate::util::parse_retry_after;

/// Computes how long to wait before the next attempt.
///
/// `attempt` is zero-based and counts the retries performed so far, so the
/// wait before the first retry is computed with `attempt == 0`. `response` is
/// the response of the attempt that just failed, if one was received; its body
/// has already been drained.
pub trait Backoff: Send + Sync {
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt: usize,
        response: Option<&HttpResponse>,
    ) -> Duration;
}

impl<F> Backoff for F
where
    F: Fn(Duration, Duration, usize, Option<&HttpResponse>) -> Duration + Send + Sync,
{
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt: usize,
        response: Option<&HttpResponse>,
    ) -> Duration {
        self(min, max, attempt, response)
    }
}

/// `min * 2^attempt`, clamped to `max`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExponentialBackoff;

impl Backoff for ExponentialBackoff {
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt: usize,
        _response: Option<&HttpResponse>,
    ) -> Duration {
        let Ok(exponent) = u32::try_from(attempt) else {
            return max;
        };
        let Some(multiplier) = 2_u32.checked_pow(exponent) else {
            return max;
        };
        match min.checked_mul(multiplier) {
            Some(wait) if wait <= max => wait,
            _ => max,
        }
    }
}

/// Linear backoff with jitter: a value drawn uniformly from `[min, max)` and
/// multiplied by `attempt + 1`.
///
/// `min` and `max` bound the jitter, not the result. Setting both to one
/// second yields a strictly linear 1s, 2s, 3s, ... sequence; a wide spread
/// such as 100ms..20s yields heavily randomized waits. When `max <= min` the
/// wait is `min * (attempt + 1)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinearJitterBackoff;

impl Backoff for LinearJitterBackoff {
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt: usize,
        _response: Option<&HttpResponse>,
    ) -> Duration {
        let factor = u32::try_from(attempt.saturating_add(1)).unwrap_or(u32::MAX);
        if max <= min {
            return min.saturating_mul(factor);
        }

        let low = min.as_nanos().min(u64::MAX as u128) as u64;
        let high = max.as_nanos().min(u64::MAX as u128) as u64;
        if high <= low {
            return min.saturating_mul(factor);
        }
        let mut rng = rand::rng();
        let sampled = Duration::from_nanos(rng.random_range(low..high));
        sampled.saturating_mul(factor)
    }
}

/// Honors a `Retry-After` header on 429 and 503 responses, clamped to `max`,
/// and defers to the wrapped strategy otherwise.
#[derive(Clone, Copy, Debug, Default)]
pub struct RespectRetryAfter<B> {
    inner: B,
}

impl<B> RespectRetryAfter<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }
}

impl<B> Backoff for RespectRetryAfter<B>
where
    B: Backoff,
{
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt: usize,
        response: Option<&HttpResponse>,
    ) -> Duration {
        if let Some(response) = response
            && matches!(
                response.status(),
                StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
            )
            && let Some(wait) = parse_retry_after(response.headers(), SystemTime::now())
        {
            return wait.min(max);
        }
        self.inner.backoff(min, max, attempt, response)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::header::RETRY_AFTER;
    use http::{HeaderValue, StatusCode};

    use super::{Backoff, ExponentialBackoff, LinearJitterBackoff, RespectRetryAfter};
    use crate::response::{HttpResponse, empty_body};

    fn response_with(status: StatusCode, retry_after: Option<&'static str>) -> HttpResponse {
        let mut response = http::Response::new(empty_body());
        *response.status_mut() = status;
        if let Some(value) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from_static(value));
        }
        response
    }

    #[test]
    fn exponential_backoff_doubles_from_min() {
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        let waits: Vec<_> = (0..6)
            .map(|attempt| ExponentialBackoff.backoff(min, max, attempt, None))
            .collect();
        assert_eq!(
            waits,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
                Duration::from_secs(30),
            ]
        );
    }

    #[test]
    fn exponential_backoff_is_monotonic_and_bounded() {
        let min = Duration::from_millis(3);
        let max = Duration::from_secs(7);
        let mut previous = Duration::ZERO;
        for attempt in 0..200 {
            let wait = ExponentialBackoff.backoff(min, max, attempt, None);
            assert!(wait >= previous, "attempt {attempt} went backwards");
            assert!(wait <= max, "attempt {attempt} exceeded max");
            previous = wait;
        }
        assert_eq!(ExponentialBackoff.backoff(min, max, usize::MAX, None), max);
    }

    #[test]
    fn linear_jitter_degrades_to_linear_when_bounds_collapse() {
        let one = Duration::from_secs(1);
        for attempt in 0..5 {
            assert_eq!(
                LinearJitterBackoff.backoff(one, one, attempt, None),
                one * (attempt as u32 + 1)
            );
        }
    }

    #[test]
    fn linear_jitter_stays_within_scaled_bounds() {
        let min = Duration::from_millis(800);
        let max = Duration::from_millis(1200);
        for attempt in 0..4 {
            let factor = attempt as u32 + 1;
            for _ in 0..128 {
                let wait = LinearJitterBackoff.backoff(min, max, attempt, None);
                assert!(wait >= min * factor);
                assert!(wait < max * factor);
            }
        }
    }

    #[test]
    fn retry_after_is_honored_for_throttled_responses() {
        let backoff = RespectRetryAfter::new(ExponentialBackoff);
        let min = Duration::from_millis(10);
        let max = Duration::from_secs(5);

        let throttled = response_with(StatusCode::TOO_MANY_REQUESTS, Some("2"));
        assert_eq!(
            backoff.backoff(min, max, 0, Some(&throttled)),
            Duration::from_secs(2)
        );

        let too_long = response_with(StatusCode::SERVICE_UNAVAILABLE, Some("120"));
        assert_eq!(backoff.backoff(min, max, 0, Some(&too_long)), max);

        let ignored = response_with(StatusCode::INTERNAL_SERVER_ERROR, Some("2"));
        assert_eq!(backoff.backoff(min, max, 1, Some(&ignored)), min * 2);

        assert_eq!(backoff.backoff(min, max, 2, None), min * 4);
    }

    #[test]
    fn closures_act_as_backoff_strategies() {
        let constant = |_min: Duration,
                        _max: Duration,
                        _attempt: usize,
                        _response: Option<&HttpResponse>| Duration::from_millis(42);
        assert_eq!(
            constant.backoff(Duration::ZERO, Duration::ZERO, 9, None),
            Duration::from_millis(42)
        );
    }
}
