//! [`LifecycleConsumer`]: one receive loop per consumer group, applying
//! lifecycle transitions and fanning out notifications.
//!
//! Delivery is at-least-once. Every handler is idempotent against the store,
//! and each group additionally remembers the signals it has handled recently
//! so exact replays are skipped without touching the store.

use std::{
  collections::{HashSet, VecDeque},
  sync::Arc,
};

use cadence_core::{
  Error, Result,
  event::EventId,
  signal::{Signal, SignalBus, Topic},
  store::EventStore,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
  config::{ConsumerConfig, NotifyConfig},
  notify::{Message, Notifier, compose},
};

// ─── Groups ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  /// Scheduled → active, and schedule the next occurrence.
  StartUpdater,
  /// Active → completed.
  EndUpdater,
  /// Notify every grant holder.
  Notify,
}

/// A named reader of one topic with its own committed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerGroup {
  pub name:  &'static str,
  pub topic: Topic,
  pub role:  Role,
}

pub const GROUPS: [ConsumerGroup; 5] = [
  ConsumerGroup { name: "start-updater", topic: Topic::EventStart, role: Role::StartUpdater },
  ConsumerGroup { name: "notif-pusher-start", topic: Topic::EventStart, role: Role::Notify },
  ConsumerGroup { name: "end-updater", topic: Topic::EventEnd, role: Role::EndUpdater },
  ConsumerGroup { name: "notif-pusher-end", topic: Topic::EventEnd, role: Role::Notify },
  ConsumerGroup { name: "notif-pusher-direct", topic: Topic::SendNotif, role: Role::Notify },
];

// ─── Dedup ───────────────────────────────────────────────────────────────────

type SignalKey = (EventId, Topic, i64);

/// Bounded set of recently handled signals, evicting the oldest first.
#[derive(Debug)]
pub struct SeenSignals {
  capacity: usize,
  keys:     HashSet<SignalKey>,
  order:    VecDeque<SignalKey>,
}

impl SeenSignals {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity,
      keys: HashSet::with_capacity(capacity),
      order: VecDeque::with_capacity(capacity),
    }
  }

  fn key(signal: &Signal) -> SignalKey {
    (signal.event_id, signal.topic, signal.emitted_at.timestamp())
  }

  pub fn contains(&self, signal: &Signal) -> bool { self.keys.contains(&Self::key(signal)) }

  pub fn insert(&mut self, signal: &Signal) {
    if self.capacity == 0 {
      return;
    }
    let key = Self::key(signal);
    if !self.keys.insert(key) {
      return;
    }
    self.order.push_back(key);
    while self.order.len() > self.capacity {
      if let Some(oldest) = self.order.pop_front() {
        self.keys.remove(&oldest);
      }
    }
  }

  pub fn len(&self) -> usize { self.order.len() }

  pub fn is_empty(&self) -> bool { self.order.is_empty() }
}

// ─── Consumer ────────────────────────────────────────────────────────────────

pub struct LifecycleConsumer<S, B, N> {
  store:        Arc<S>,
  bus:          Arc<B>,
  notifier:     Arc<N>,
  config:       ConsumerConfig,
  from_address: String,
}

impl<S, B, N> LifecycleConsumer<S, B, N>
where
  S: EventStore + 'static,
  B: SignalBus + 'static,
  N: Notifier + 'static,
{
  pub fn new(
    store: Arc<S>,
    bus: Arc<B>,
    notifier: Arc<N>,
    config: ConsumerConfig,
    notify: NotifyConfig,
  ) -> Self {
    Self { store, bus, notifier, config, from_address: notify.from_address }
  }

  /// Apply one signal for `role`. Duplicate and stale signals resolve to
  /// no-ops.
  pub async fn handle(&self, role: Role, signal: &Signal) -> Result<()> {
    match role {
      Role::StartUpdater => self.start(signal).await,
      Role::EndUpdater => self.end(signal).await,
      Role::Notify => self.push_notifications(signal).await,
    }
  }

  async fn start(&self, signal: &Signal) -> Result<()> {
    let event_id = signal.event_id;
    let activation = self
      .store
      .activate_due(event_id, signal.emitted_at)
      .await
      .map_err(Into::<Error>::into)?;

    match activation {
      Some(activation) => {
        info!(
          event_id,
          occurrence_id = activation.occurrence.occurrence_id,
          "occurrence started"
        );
        if let Some(next) = &activation.next {
          info!(
            event_id,
            occurrence_id = next.occurrence_id,
            start = %next.start_time,
            "next occurrence scheduled"
          );
        }
      }
      None => debug!(event_id, "no scheduled occurrence due, ignoring start signal"),
    }
    Ok(())
  }

  async fn end(&self, signal: &Signal) -> Result<()> {
    let event_id = signal.event_id;
    let completed = self
      .store
      .complete_due(event_id, signal.emitted_at)
      .await
      .map_err(Into::<Error>::into)?;

    match completed {
      Some(occurrence) => {
        info!(event_id, occurrence_id = occurrence.occurrence_id, "occurrence completed")
      }
      None => debug!(event_id, "no active occurrence due, ignoring end signal"),
    }
    Ok(())
  }

  /// Notify every grant holder. A failed delivery is logged and does not stop
  /// delivery to the remaining recipients.
  async fn push_notifications(&self, signal: &Signal) -> Result<()> {
    let event_id = signal.event_id;
    let Some(record) = self.store.get_event(event_id).await.map_err(Into::<Error>::into)? else {
      debug!(event_id, "event no longer exists, skipping notifications");
      return Ok(());
    };

    let grants = self.store.list_grants(event_id).await.map_err(Into::<Error>::into)?;
    let recipients = self
      .store
      .get_users(grants.iter().map(|g| g.user_id).collect())
      .await
      .map_err(Into::<Error>::into)?;

    let (subject, body) = compose(signal.topic, &record.info, signal.emitted_at);
    let mut delivered = 0;
    for user in &recipients {
      let message = Message {
        from:    self.from_address.clone(),
        to:      user.email.clone(),
        subject: subject.clone(),
        body:    body.clone(),
      };
      match self.notifier.deliver(&message).await {
        Ok(()) => delivered += 1,
        Err(e) => warn!(event_id, to = %user.email, error = %e, "notification delivery failed"),
      }
    }

    debug!(event_id, topic = %signal.topic, delivered, recipients = recipients.len(), "notifications pushed");
    Ok(())
  }

  /// Fetch and handle one batch for `group`, then commit past it. Handler
  /// failures are logged and the signal is still committed. Returns the
  /// number of signals fetched.
  pub async fn process_batch(&self, group: ConsumerGroup, seen: &mut SeenSignals) -> Result<usize> {
    let deliveries = self
      .bus
      .fetch(group.topic, group.name, self.config.batch_size.max(1))
      .await
      .map_err(Error::transient)?;
    let Some(last) = deliveries.last().map(|d| d.offset) else {
      return Ok(0);
    };

    for delivery in &deliveries {
      let signal = &delivery.signal;
      if seen.contains(signal) {
        debug!(group = group.name, event_id = signal.event_id, "duplicate signal skipped");
        continue;
      }
      match self.handle(group.role, signal).await {
        Ok(()) => seen.insert(signal),
        Err(e) => error!(
          group = group.name,
          event_id = signal.event_id,
          offset = delivery.offset,
          error = %e,
          "signal handler failed"
        ),
      }
    }

    self
      .bus
      .commit(group.topic, group.name, last + 1)
      .await
      .map_err(Error::transient)?;
    Ok(deliveries.len())
  }

  /// Start one receive loop per entry of [`GROUPS`].
  pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    GROUPS
      .iter()
      .map(|group| tokio::spawn(Arc::clone(&self).run(*group, shutdown.clone())))
      .collect()
  }

  async fn run(self: Arc<Self>, group: ConsumerGroup, mut shutdown: watch::Receiver<bool>) {
    let mut seen = SeenSignals::new(self.config.dedup_capacity);
    info!(group = group.name, topic = %group.topic, "consumer started");

    loop {
      if *shutdown.borrow() {
        break;
      }
      let idle = match self.process_batch(group, &mut seen).await {
        Ok(fetched) => fetched == 0,
        Err(e) => {
          error!(group = group.name, error = %e, "consumer round failed");
          true
        }
      };
      if idle {
        tokio::select! {
          _ = tokio::time::sleep(self.config.idle_backoff()) => {}
          _ = shutdown.changed() => break,
        }
      }
    }
    info!(group = group.name, "consumer stopped");
  }
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;

  fn signal(event_id: EventId, secs: i64) -> Signal {
    Signal::new(
      event_id,
      Topic::EventStart,
      Utc.timestamp_opt(1_900_000_000 + secs, 0).unwrap(),
    )
  }

  #[test]
  fn seen_set_is_bounded() {
    let mut seen = SeenSignals::new(2);
    seen.insert(&signal(1, 0));
    seen.insert(&signal(1, 0));
    assert_eq!(seen.len(), 1);
    seen.insert(&signal(2, 0));
    seen.insert(&signal(3, 0));
    assert_eq!(seen.len(), 2);
    assert!(!seen.contains(&signal(1, 0)));
    assert!(seen.contains(&signal(3, 0)));
  }

  #[test]
  fn emission_time_distinguishes_signals() {
    let mut seen = SeenSignals::new(8);
    seen.insert(&signal(1, 0));
    assert!(!seen.contains(&signal(1, 60)));
  }

  #[test]
  fn zero_capacity_disables_dedup() {
    let mut seen = SeenSignals::new(0);
    seen.insert(&signal(1, 0));
    assert!(seen.is_empty());
  }

  #[test]
  fn every_topic_has_a_notifier_group() {
    for topic in Topic::ALL {
      assert!(GROUPS.iter().any(|g| g.topic == topic && g.role == Role::Notify));
    }
  }
}
