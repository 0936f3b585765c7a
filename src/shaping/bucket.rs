use std::sync::Mutex;
use std::time::{Duration, Instant};

const MIN_BURST_BYTES: f64 = 32.0 * 1024.0;
const BURST_WINDOW_SECS: f64 = 0.2;

struct State {
    rate_bytes_per_sec: f64,
    burst_bytes: f64,
    tokens: f64,
    last: Instant,
}

impl State {
    fn recalc_burst(&mut self) {
        self.burst_bytes = (self.rate_bytes_per_sec * BURST_WINDOW_SECS).max(MIN_BURST_BYTES);
        if self.tokens > self.burst_bytes {
            self.tokens = self.burst_bytes;
        }
    }
}

/// A single-resource shaper that blocks the caller until `n` bytes may pass
/// at a configured byte-per-second rate.
///
/// The refill/reserve arithmetic is guarded by a plain synchronous mutex
/// (the critical section never awaits); any required sleep happens after
/// the guard is dropped. Advancing the bucket's virtual clock into the
/// future before releasing the lock reserves that time slot for the caller
/// that computed it, so concurrent callers are served strictly FCFS by
/// arrival at the mutex.
pub struct TokenBucket {
    state: Mutex<State>,
}

impl TokenBucket {
    /// Creates a bucket at the given rate, in bytes/sec. Starts with a full
    /// burst of tokens so small initial writes are not throttled.
    pub fn new(rate_bytes_per_sec: f64) -> Self {
        let mut state = State {
            rate_bytes_per_sec,
            burst_bytes: 0.0,
            tokens: 0.0,
            last: Instant::now(),
        };
        state.recalc_burst();
        state.tokens = state.burst_bytes;
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn set_rate(&self, rate_bytes_per_sec: f64) {
        let mut state = self.state.lock().expect("token bucket poisoned");
        state.rate_bytes_per_sec = rate_bytes_per_sec;
        state.recalc_burst();
    }

    /// Blocks until `n` bytes may pass. Returns immediately if `n == 0` or
    /// the bucket's rate is non-positive (rate <= 0 means "no enforcement",
    /// not "blocked").
    ///
    /// `last` is a virtual clock: a waiter that finds it already in the
    /// future (because an earlier concurrent waiter reserved that slot)
    /// must sleep not just its own marginal deficit but the *gap* between
    /// its own real arrival time and the point its reservation lands on,
    /// or back-to-back concurrent waiters would all wake up at roughly the
    /// same real time instead of being serialized.
    pub async fn wait(&self, n: usize) {
        if n == 0 {
            return;
        }

        let sleep_for = {
            let mut state = self.state.lock().expect("token bucket poisoned");
            if state.rate_bytes_per_sec <= 0.0 {
                return;
            }

            let arrival = Instant::now();
            let mut now = arrival;
            if now < state.last {
                now = state.last;
            }

            let elapsed = now.duration_since(state.last).as_secs_f64();
            if elapsed > 0.0 {
                state.tokens = (state.tokens + elapsed * state.rate_bytes_per_sec)
                    .min(state.burst_bytes);
                state.last = now;
            }

            let need = n as f64;
            if state.tokens >= need {
                state.tokens -= need;
                None
            } else {
                let missing = need - state.tokens;
                let wait_secs = missing / state.rate_bytes_per_sec;
                let new_last = now + Duration::from_secs_f64(wait_secs);
                state.tokens = 0.0;
                state.last = new_last;
                Some(new_last.saturating_duration_since(arrival))
            }
        };

        if let Some(duration) = sleep_for {
            tokio::time::sleep(duration).await;
        }
    }
}
