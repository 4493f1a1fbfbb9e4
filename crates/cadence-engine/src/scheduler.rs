//! [`LifecycleScheduler`]: moves occurrences from the store into the time
//! queue, and due markers from the queue onto the signal bus.
//!
//! Two periodic cycles run independently:
//!
//! - **sweep** loads occurrences with a boundary inside the next window and
//!   upserts their markers, scored by epoch seconds;
//! - **poll** publishes a signal for every marker whose score has passed,
//!   then removes the marker.
//!
//! Each cycle holds its own [`CycleGuard`], so a tick that arrives while the
//! previous run of the same cycle is still going is skipped.

use std::{collections::HashSet, sync::Arc};

use cadence_core::{
  Error, Result,
  event::OccurrenceStatus,
  signal::{MarkerKey, Signal, SignalBus, TimeQueue},
  store::EventStore,
};
use chrono::{DateTime, Utc};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{config::SchedulerConfig, guard::CycleGuard};

pub struct LifecycleScheduler<S, Q, B> {
  store:       Arc<S>,
  queue:       Arc<Q>,
  bus:         Arc<B>,
  config:      SchedulerConfig,
  sweep_guard: CycleGuard,
  poll_guard:  CycleGuard,
}

impl<S, Q, B> LifecycleScheduler<S, Q, B>
where
  S: EventStore + 'static,
  Q: TimeQueue + 'static,
  B: SignalBus + 'static,
{
  pub fn new(store: Arc<S>, queue: Arc<Q>, bus: Arc<B>, config: SchedulerConfig) -> Self {
    Self {
      store,
      queue,
      bus,
      config,
      sweep_guard: CycleGuard::default(),
      poll_guard: CycleGuard::default(),
    }
  }

  /// Queue markers for every occurrence with a boundary in
  /// `[now, now + window]`. Returns the number of markers written, or `None`
  /// if another sweep is in progress.
  ///
  /// Scheduled occurrences get a start and an end marker; active ones only an
  /// end marker. When two occurrences of one event fall in the window, the
  /// earlier boundary claims the key and the later one is picked up by a
  /// subsequent sweep.
  pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<Option<usize>> {
    let Some(_token) = self.sweep_guard.try_enter() else {
      return Ok(None);
    };

    let until = now
      .checked_add_signed(self.config.sweep_window())
      .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let occurrences = self
      .store
      .occurrences_in_window(now, until)
      .await
      .map_err(Into::<Error>::into)?;

    let mut written = HashSet::new();
    for occurrence in &occurrences {
      let event_id = occurrence.event_id;
      let markers = match occurrence.status {
        OccurrenceStatus::Scheduled => vec![
          (MarkerKey::start(event_id), occurrence.start_time),
          (MarkerKey::end(event_id), occurrence.end_time),
        ],
        OccurrenceStatus::Active => vec![(MarkerKey::end(event_id), occurrence.end_time)],
        OccurrenceStatus::Completed | OccurrenceStatus::Cancelled => continue,
      };
      for (key, at) in markers {
        if !written.insert(key) {
          continue;
        }
        self
          .queue
          .upsert(key, at.timestamp())
          .await
          .map_err(Error::transient)?;
      }
    }

    debug!(occurrences = occurrences.len(), markers = written.len(), "sweep finished");
    Ok(Some(written.len()))
  }

  /// Publish a signal for every marker due at `now` and remove it. Returns the
  /// number of signals published, or `None` if another poll is in progress.
  ///
  /// A marker is removed only after its signal is on the bus; if publishing
  /// fails the marker stays queued for the next poll.
  pub async fn poll_at(&self, now: DateTime<Utc>) -> Result<Option<usize>> {
    let Some(_token) = self.poll_guard.try_enter() else {
      return Ok(None);
    };

    let due = self
      .queue
      .due(now.timestamp())
      .await
      .map_err(Error::transient)?;

    let mut published = 0;
    for marker in due {
      let Some(at) = DateTime::from_timestamp(marker.score, 0) else {
        warn!(marker = %marker.key, score = marker.score, "dropping marker with invalid score");
        self.queue.remove(marker.key).await.map_err(Error::transient)?;
        continue;
      };
      let signal = Signal::new(marker.key.event_id, marker.key.phase.topic(), at);
      self.bus.publish(signal).await.map_err(Error::transient)?;
      self.queue.remove(marker.key).await.map_err(Error::transient)?;
      published += 1;
      debug!(event_id = signal.event_id, topic = %signal.topic, "lifecycle signal published");
    }
    Ok(Some(published))
  }

  /// Run the sweep and poll loops until `shutdown` flips or its sender is
  /// dropped. Cycles run inline, so a joined handle has no cycle in flight.
  pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    vec![
      tokio::spawn(Arc::clone(&self).run_sweeps(shutdown.clone())),
      tokio::spawn(self.run_polls(shutdown)),
    ]
  }

  async fn run_sweeps(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
    let period = self.config.sweep_interval();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(?period, "sweep loop started");

    loop {
      tokio::select! {
        _ = ticker.tick() => match self.sweep_at(Utc::now()).await {
          Ok(Some(_)) => {}
          Ok(None) => warn!("previous sweep still running, skipping cycle"),
          Err(e) => error!(error = %e, "sweep failed"),
        },
        _ = shutdown.changed() => break,
      }
    }
    info!("sweep loop stopped");
  }

  async fn run_polls(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
    let period = self.config.poll_interval();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(?period, "poll loop started");

    loop {
      tokio::select! {
        _ = ticker.tick() => match self.poll_at(Utc::now()).await {
          Ok(Some(_)) => {}
          Ok(None) => warn!("previous poll still running, skipping cycle"),
          Err(e) => error!(error = %e, "poll failed"),
        },
        _ = shutdown.changed() => break,
      }
    }
    info!("poll loop stopped");
  }
}
