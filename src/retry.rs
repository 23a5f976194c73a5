use rand::Rng;
use std::thread::sleep;
use std::time::Duration;

/// Jittered exponential backoff for blocking transport calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

/// The last error of an operation that ran out of attempts or hit a
/// non-retryable failure.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: usize,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: f64) -> Self {
        let clamped_base = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: clamped_base,
            max_delay_ms: max_delay_ms.max(clamped_base),
            jitter_pct: if jitter_pct.is_nan() { 0.0 } else { jitter_pct.clamp(0.0, 1.0) },
        }
    }

    /// Immediate retries with no sleeping in between; used by tests.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_pct: 0.0,
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(u32::try_from(attempt).unwrap_or(u32::MAX));
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        let jittered = if self.jitter_pct > 0.0 && delay > 0 {
            let spread = (delay as f64 * self.jitter_pct) as i64;
            let delta = rand::thread_rng().gen_range(-spread..=spread);
            delay.saturating_add_signed(delta)
        } else {
            delay
        };
        Duration::from_millis(jittered)
    }

    /// Run `op` until it succeeds, fails with an error `retryable` rejects, or
    /// the attempt budget is spent. `op` receives the zero-based attempt number.
    pub fn run<T, E>(
        &self,
        mut op: impl FnMut(usize) -> Result<T, E>,
        retryable: impl Fn(&E) -> bool,
    ) -> Result<T, Exhausted<E>> {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(val) => return Ok(val),
                Err(error) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !retryable(&error) {
                        return Err(Exhausted { error, attempts: attempt });
                    }
                    let delay = self.next_delay(attempt - 1);
                    if !delay.is_zero() {
                        sleep(delay);
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 100, 2_000, 0.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clamps_input_parameters() {
        let policy = RetryPolicy::new(0, 0, 0, 2.0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay_ms, 1);
        assert_eq!(policy.max_delay_ms, 1);
        assert_eq!(policy.jitter_pct, 1.0);
    }

    #[test]
    fn next_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(5, 100, 500, 0.0);
        let delays: Vec<_> = (0..5).map(|attempt| policy.next_delay(attempt)).collect();
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
        assert_eq!(delays[3], Duration::from_millis(500)); // capped
        assert_eq!(delays[4], Duration::from_millis(500));
    }

    #[test]
    fn retries_until_success() {
        let policy = RetryPolicy::immediate(3);
        let result: Result<usize, Exhausted<&str>> =
            policy.run(|attempt| if attempt < 2 { Err("boom") } else { Ok(attempt) }, |_| true);
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn stops_after_max_attempts() {
        let policy = RetryPolicy::immediate(2);
        let mut calls = 0;
        let err = policy
            .run(|_| -> Result<(), &str> { calls += 1; Err("down") }, |_| true)
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(calls, 2);
    }

    #[test]
    fn non_retryable_fails_fast() {
        let policy = RetryPolicy::immediate(5);
        let err = policy.run(|_| -> Result<(), &str> { Err("fatal") }, |_| false).unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(err.error, "fatal");
    }
}
