//! Tunables for the background services. Every field has a default, so an
//! empty config section is valid.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// Seconds between sweeps of the store.
  pub sweep_interval_secs: u64,
  /// How far ahead a sweep looks, in seconds.
  pub sweep_window_secs:   u64,
  /// Seconds between polls of the time queue.
  pub poll_interval_secs:  u64,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      sweep_interval_secs: 600,
      sweep_window_secs:   600,
      poll_interval_secs:  60,
    }
  }
}

impl SchedulerConfig {
  pub fn sweep_interval(&self) -> Duration { Duration::from_secs(self.sweep_interval_secs.max(1)) }

  pub fn poll_interval(&self) -> Duration { Duration::from_secs(self.poll_interval_secs.max(1)) }

  pub fn sweep_window(&self) -> chrono::Duration {
    let secs = i64::try_from(self.sweep_window_secs).unwrap_or(i64::MAX);
    chrono::Duration::seconds(secs.min(i64::MAX / 1_000))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
  /// Pause after an empty fetch, in milliseconds.
  pub idle_backoff_ms: u64,
  /// Maximum signals fetched per round.
  pub batch_size:      usize,
  /// Signals remembered per group for duplicate suppression; 0 disables it.
  pub dedup_capacity:  usize,
}

impl Default for ConsumerConfig {
  fn default() -> Self {
    Self {
      idle_backoff_ms: 500,
      batch_size:      64,
      dedup_capacity:  1024,
    }
  }
}

impl ConsumerConfig {
  pub fn idle_backoff(&self) -> Duration { Duration::from_millis(self.idle_backoff_ms) }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
  pub from_address: String,
}

impl Default for NotifyConfig {
  fn default() -> Self { Self { from_address: "noreply@cadence.local".into() } }
}
