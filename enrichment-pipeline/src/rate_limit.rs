use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

use crate::provider::RateLimitConfig;

struct LimiterState {
    window_start: Instant,
    used: u32,
    last_request: Option<Instant>,
}

/// Token-bucket throttle for one provider's outbound calls.
///
/// At most `max_requests` per `window`, with `request_delay` between
/// consecutive calls. All mutations serialize under one async lock.
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState {
                window_start: Instant::now(),
                used: 0,
                last_request: None,
            }),
        }
    }

    /// Waits until the next request is allowed, then records it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                if now.duration_since(state.window_start) >= self.config.window {
                    state.window_start = now;
                    state.used = 0;
                }

                let wait = if state.used >= self.config.max_requests {
                    self.config.window - now.duration_since(state.window_start)
                } else if let Some(last) = state.last_request {
                    self.config
                        .request_delay
                        .saturating_sub(now.duration_since(last))
                } else {
                    Duration::ZERO
                };

                if wait.is_zero() {
                    state.used += 1;
                    state.last_request = Some(now);
                    return;
                }
                wait
            };
            sleep(wait).await;
        }
    }
}
