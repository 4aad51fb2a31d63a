//! Adaptive outbound throttle.
//!
//! A single delay is applied before every relay attempt. It shrinks slowly
//! while relays succeed and jumps to the platform's flood-wait (plus margin)
//! when one is reported. No jitter, no per-destination state.

use std::{sync::Mutex, time::Duration};

use {courier_config::RateLimitConfig, tracing::debug};

pub struct AdaptiveRateLimiter {
    config: RateLimitConfig,
    current_ms: Mutex<f64>,
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let initial = clamp(&config, config.base_delay_ms as f64);
        Self {
            config,
            current_ms: Mutex::new(initial),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Current delay in milliseconds.
    #[must_use]
    pub fn current_delay_ms(&self) -> f64 {
        *self.current_ms.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn current_delay(&self) -> Duration {
        Duration::from_secs_f64(self.current_delay_ms() / 1000.0)
    }

    /// Sleep for the current delay. Call before each outbound relay.
    pub async fn throttle(&self) {
        let delay = self.current_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn on_success(&self) {
        let mut current = self.current_ms.lock().unwrap_or_else(|e| e.into_inner());
        *current = clamp(&self.config, *current * self.config.speedup_factor);
    }

    /// The platform asked for `seconds` of cooldown; the margin-adjusted wait
    /// replaces the current delay.
    pub fn on_flood_wait(&self, seconds: u64) {
        let mut current = self.current_ms.lock().unwrap_or_else(|e| e.into_inner());
        *current = clamp(
            &self.config,
            seconds as f64 * 1000.0 * self.config.flood_margin,
        );
        debug!(seconds, delay_ms = *current, "rate limiter backing off");
    }

    pub fn reset(&self) {
        let mut current = self.current_ms.lock().unwrap_or_else(|e| e.into_inner());
        *current = clamp(&self.config, self.config.base_delay_ms as f64);
    }
}

impl Default for AdaptiveRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

fn clamp(config: &RateLimitConfig, value: f64) -> f64 {
    let min = config.min_delay_ms as f64;
    let max = (config.max_delay_ms as f64).max(min);
    value.clamp(min, max)
}
