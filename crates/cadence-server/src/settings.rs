//! Server configuration: a TOML file overlaid with `CADENCE__*` environment
//! variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use cadence_engine::{ConsumerConfig, NotifyConfig, SchedulerConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub store_path: PathBuf,
  pub scheduler:  SchedulerConfig,
  pub consumer:   ConsumerConfig,
  pub notify:     NotifyConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      store_path: PathBuf::from("cadence.db"),
      scheduler:  SchedulerConfig::default(),
      consumer:   ConsumerConfig::default(),
      notify:     NotifyConfig::default(),
    }
  }
}

impl ServerConfig {
  /// Load from `path` (optional) and the environment, e.g.
  /// `CADENCE__SCHEDULER__POLL_INTERVAL_SECS=5`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path.to_path_buf()).required(false))
      .add_source(
        config::Environment::with_prefix("CADENCE")
          .prefix_separator("__")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .with_context(|| format!("failed to read config from {}", path.display()))?;

    let mut cfg: Self = settings
      .try_deserialize()
      .context("failed to deserialise ServerConfig")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(toml: &str) -> ServerConfig {
    config::Config::builder()
      .add_source(config::File::from_str(toml, config::FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap()
  }

  #[test]
  fn empty_file_uses_defaults() {
    let cfg = parse("");
    assert_eq!(cfg.store_path, PathBuf::from("cadence.db"));
    assert_eq!(cfg.scheduler.sweep_interval_secs, 600);
    assert_eq!(cfg.consumer.batch_size, 64);
  }

  #[test]
  fn sections_override_individual_fields() {
    let cfg = parse(
      r#"
      store_path = "/var/lib/cadence.db"

      [scheduler]
      poll_interval_secs = 5

      [notify]
      from_address = "calendar@example.com"
      "#,
    );
    assert_eq!(cfg.store_path, PathBuf::from("/var/lib/cadence.db"));
    assert_eq!(cfg.scheduler.poll_interval_secs, 5);
    assert_eq!(cfg.scheduler.sweep_window_secs, 600);
    assert_eq!(cfg.notify.from_address, "calendar@example.com");
  }

  #[test]
  fn missing_file_is_not_an_error() {
    let cfg = ServerConfig::load(Path::new("/nonexistent/cadence.toml")).unwrap();
    assert_eq!(cfg.consumer.dedup_capacity, 1024);
  }

  #[test]
  fn tilde_expands_to_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(expand_tilde(Path::new("~/cal.db")), PathBuf::from(home).join("cal.db"));
    assert_eq!(expand_tilde(Path::new("/abs.db")), PathBuf::from("/abs.db"));
  }
}
