//! End-to-end tests: the service, scheduler, and consumer running over the
//! SQLite store and bus.

use std::{io, sync::Arc, time::Duration as StdDuration};

use cadence_core::{
  Error,
  access::{AccessLevel, ShareTarget},
  event::{EventUpdate, NewEvent, OccurrenceStatus, RecurrencePattern, whole_seconds},
  field::{Field, TypedValue},
  signal::{MarkerKey, Signal, SignalBus, Topic},
  store::EventStore,
  user::UserId,
};
use cadence_store_sqlite::{SqliteSignalBus, SqliteStore};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

use crate::{
  ConsumerConfig, EventService, GROUPS, LifecycleConsumer, LifecycleScheduler, LogNotifier,
  MemoryTimeQueue, NotifyConfig, SchedulerConfig,
  consumer::{ConsumerGroup, SeenSignals},
  notify::{Message, Notifier},
};

struct Harness {
  store:   Arc<SqliteStore>,
  bus:     Arc<SqliteSignalBus>,
  queue:   Arc<MemoryTimeQueue>,
  service: EventService<SqliteStore, SqliteSignalBus>,
}

async fn harness() -> Harness {
  let store = Arc::new(SqliteStore::open_in_memory().await.expect("in-memory store"));
  let bus = Arc::new(store.signal_bus());
  Harness {
    service: EventService::new(Arc::clone(&store), Arc::clone(&bus)),
    queue: Arc::new(MemoryTimeQueue::new()),
    store,
    bus,
  }
}

impl Harness {
  async fn user(&self, email: &str) -> UserId {
    self.store.add_user(email.into()).await.unwrap().user_id
  }

  fn scheduler(&self) -> LifecycleScheduler<SqliteStore, MemoryTimeQueue, SqliteSignalBus> {
    LifecycleScheduler::new(
      Arc::clone(&self.store),
      Arc::clone(&self.queue),
      Arc::clone(&self.bus),
      SchedulerConfig::default(),
    )
  }

  fn consumer<N: Notifier + 'static>(
    &self,
    notifier: Arc<N>,
  ) -> LifecycleConsumer<SqliteStore, SqliteSignalBus, N> {
    LifecycleConsumer::new(
      Arc::clone(&self.store),
      Arc::clone(&self.bus),
      notifier,
      ConsumerConfig::default(),
      NotifyConfig::default(),
    )
  }
}

fn group(name: &str) -> ConsumerGroup {
  *GROUPS.iter().find(|g| g.name == name).unwrap()
}

fn in_an_hour() -> DateTime<Utc> { whole_seconds(Utc::now()) + Duration::hours(1) }

fn daily(title: &str, start: DateTime<Utc>) -> NewEvent {
  NewEvent::new(title, start, start + Duration::minutes(30))
    .recurring(RecurrencePattern { day: 1, ..Default::default() })
}

fn retitle(title: &str) -> EventUpdate {
  EventUpdate { title: Some(title.into()), ..Default::default() }
}

/// Records every delivery and fails for one address.
#[derive(Default)]
struct RecordingNotifier {
  failing: Option<String>,
  sent:    std::sync::Mutex<Vec<Message>>,
}

impl RecordingNotifier {
  fn failing_for(address: &str) -> Self {
    Self { failing: Some(address.into()), ..Default::default() }
  }

  fn recipients(&self) -> Vec<String> {
    let mut to: Vec<_> = self.sent.lock().unwrap().iter().map(|m| m.to.clone()).collect();
    to.sort();
    to
  }
}

impl Notifier for RecordingNotifier {
  type Error = io::Error;

  async fn deliver(&self, message: &Message) -> Result<(), io::Error> {
    if self.failing.as_deref() == Some(message.to.as_str()) {
      return Err(io::Error::other("mailbox unavailable"));
    }
    self.sent.lock().unwrap().push(message.clone());
    Ok(())
  }
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_lifecycle() {
  let h = harness().await;
  let owner = h.user("owner@example.com").await;
  let start = in_an_hour();

  let created = h.service.create_event(daily("A", start), owner).await.unwrap();
  let id = created.info.event_id;
  assert_eq!(created.info.version, 1);

  let outcome = h.service.update_event(id, owner, retitle("B")).await.unwrap();
  assert_eq!(outcome.version, 2);

  let log = h.service.changelog(id, owner).await.unwrap();
  assert_eq!(log.len(), 1);
  assert_eq!(log[0].version, 2);
  assert_eq!(log[0].changes[0].field, Field::Title);
  assert_eq!(log[0].changes[0].new, Some(TypedValue::Text("B".into())));

  let diff = h.service.diff(id, owner, 1, 2).await.unwrap();
  assert_eq!(serde_json::to_value(&diff).unwrap(), serde_json::json!({ "title": ["A", "B"] }));

  let rolled = h.service.rollback(id, owner, 1).await.unwrap();
  assert_eq!(rolled.version, 1);
  assert_eq!(rolled.discarded, 1);
  let record = h.service.get_event(id, owner).await.unwrap();
  assert_eq!(record.info.title, "A");
  assert!(h.service.changelog(id, owner).await.unwrap().is_empty());

  // Five minutes before the start, the sweep queues the start marker.
  let scheduler = h.scheduler();
  scheduler.sweep_at(start - Duration::minutes(5)).await.unwrap();
  assert_eq!(h.queue.score(MarkerKey::start(id)).await, Some(start.timestamp()));

  assert_eq!(scheduler.poll_at(start - Duration::seconds(1)).await.unwrap(), Some(0));
  assert_eq!(scheduler.poll_at(start).await.unwrap(), Some(1));
  assert_eq!(h.queue.score(MarkerKey::start(id)).await, None);

  let consumer = h.consumer(Arc::new(LogNotifier));
  let mut seen = SeenSignals::new(16);
  let fetched = consumer.process_batch(group("start-updater"), &mut seen).await.unwrap();
  assert_eq!(fetched, 1);

  let occurrences = h.store.list_occurrences(id).await.unwrap();
  assert_eq!(occurrences.len(), 2);
  assert_eq!(occurrences[0].status, OccurrenceStatus::Active);
  assert_eq!(occurrences[1].status, OccurrenceStatus::Scheduled);
  assert_eq!(occurrences[1].start_time, start + Duration::seconds(86_400));

  // A replayed start signal neither re-activates nor schedules twice, even
  // with an empty dedup set.
  h.bus.publish(Signal::new(id, Topic::EventStart, start)).await.unwrap();
  let mut fresh = SeenSignals::new(16);
  consumer.process_batch(group("start-updater"), &mut fresh).await.unwrap();
  assert_eq!(h.store.list_occurrences(id).await.unwrap().len(), 2);

  // Ending the active occurrence.
  h.bus.publish(Signal::new(id, Topic::EventEnd, start + Duration::minutes(30))).await.unwrap();
  consumer.process_batch(group("end-updater"), &mut seen).await.unwrap();
  let occurrences = h.store.list_occurrences(id).await.unwrap();
  assert_eq!(occurrences[0].status, OccurrenceStatus::Completed);

  // Access: a writer may roll back, a reader may not.
  let writer = h.user("writer@example.com").await;
  let reader = h.user("reader@example.com").await;
  h.service
    .share(id, owner, vec![
      ShareTarget { user_id: writer, level: AccessLevel::Write },
      ShareTarget { user_id: reader, level: AccessLevel::Read },
    ])
    .await
    .unwrap();

  h.service.update_event(id, owner, retitle("C")).await.unwrap();
  let err = h.service.rollback(id, reader, 1).await.unwrap_err();
  assert!(matches!(err, Error::Authorization(_)));
  assert_eq!(h.service.rollback(id, writer, 1).await.unwrap().version, 1);
}

#[tokio::test]
async fn resweep_does_not_duplicate_markers() {
  let h = harness().await;
  let owner = h.user("owner@example.com").await;
  let start = in_an_hour();
  let id = h.service.create_event(daily("Standup", start), owner).await.unwrap().info.event_id;

  let scheduler = h.scheduler();
  let now = start - Duration::minutes(1);
  assert_eq!(scheduler.sweep_at(now).await.unwrap(), Some(2));
  assert_eq!(scheduler.sweep_at(now).await.unwrap(), Some(2));
  assert_eq!(h.queue.len().await, 2);
  assert_eq!(h.queue.score(MarkerKey::end(id)).await, Some((start + Duration::minutes(30)).timestamp()));
}

#[tokio::test]
async fn sweep_ignores_occurrences_outside_window() {
  let h = harness().await;
  let owner = h.user("owner@example.com").await;
  let start = in_an_hour();
  h.service.create_event(daily("Later", start), owner).await.unwrap();

  let scheduler = h.scheduler();
  assert_eq!(scheduler.sweep_at(start - Duration::minutes(30)).await.unwrap(), Some(0));
  assert_eq!(h.queue.len().await, 0);
}

#[tokio::test]
async fn cancelled_occurrence_is_not_started() {
  let h = harness().await;
  let owner = h.user("owner@example.com").await;
  let start = in_an_hour();
  let id = h.service.create_event(daily("Off", start), owner).await.unwrap().info.event_id;

  let cancelled = h.service.cancel_event(id, owner).await.unwrap();
  assert_eq!(cancelled.status, OccurrenceStatus::Cancelled);
  assert_eq!(h.scheduler().sweep_at(start - Duration::minutes(1)).await.unwrap(), Some(0));

  h.bus.publish(Signal::new(id, Topic::EventStart, start)).await.unwrap();
  let consumer = h.consumer(Arc::new(LogNotifier));
  consumer
    .process_batch(group("start-updater"), &mut SeenSignals::new(4))
    .await
    .unwrap();
  let occurrences = h.store.list_occurrences(id).await.unwrap();
  assert_eq!(occurrences.len(), 1);
  assert_eq!(occurrences[0].status, OccurrenceStatus::Cancelled);
}

// ─── Notifications ───────────────────────────────────────────────────────────

#[tokio::test]
async fn update_publishes_send_notif() {
  let h = harness().await;
  let owner = h.user("owner@example.com").await;
  let id = h.service.create_event(daily("A", in_an_hour()), owner).await.unwrap().info.event_id;

  // No-op update: nothing published.
  h.service.update_event(id, owner, retitle("A")).await.unwrap();
  assert!(h.bus.fetch(Topic::SendNotif, "observer", 10).await.unwrap().is_empty());

  h.service.update_event(id, owner, retitle("B")).await.unwrap();
  let deliveries = h.bus.fetch(Topic::SendNotif, "observer", 10).await.unwrap();
  assert_eq!(deliveries.len(), 1);
  assert_eq!(deliveries[0].signal.event_id, id);
}

#[tokio::test]
async fn failed_delivery_does_not_block_other_recipients() {
  let h = harness().await;
  let owner = h.user("owner@example.com").await;
  let bob = h.user("bob@example.com").await;
  let carol = h.user("carol@example.com").await;
  let id = h.service.create_event(daily("A", in_an_hour()), owner).await.unwrap().info.event_id;
  h.service
    .share(id, owner, vec![
      ShareTarget { user_id: bob, level: AccessLevel::Read },
      ShareTarget { user_id: carol, level: AccessLevel::Write },
    ])
    .await
    .unwrap();

  h.service.update_event(id, owner, retitle("B")).await.unwrap();

  let notifier = Arc::new(RecordingNotifier::failing_for("bob@example.com"));
  let consumer = h.consumer(Arc::clone(&notifier));
  let fetched = consumer
    .process_batch(group("notif-pusher-direct"), &mut SeenSignals::new(4))
    .await
    .unwrap();
  assert_eq!(fetched, 1);
  assert_eq!(notifier.recipients(), vec!["carol@example.com", "owner@example.com"]);

  let sent = notifier.sent.lock().unwrap();
  assert_eq!(sent[0].subject, format!("Event {id} updated: B"));
  assert_eq!(sent[0].from, NotifyConfig::default().from_address);
}

#[tokio::test]
async fn groups_read_the_same_topic_independently() {
  let h = harness().await;
  let owner = h.user("owner@example.com").await;
  let start = in_an_hour();
  let id = h.service.create_event(daily("A", start), owner).await.unwrap().info.event_id;
  h.bus.publish(Signal::new(id, Topic::EventStart, start)).await.unwrap();

  let notifier = Arc::new(RecordingNotifier::default());
  let consumer = h.consumer(Arc::clone(&notifier));
  let mut seen = SeenSignals::new(4);
  assert_eq!(consumer.process_batch(group("start-updater"), &mut seen).await.unwrap(), 1);
  assert_eq!(consumer.process_batch(group("start-updater"), &mut seen).await.unwrap(), 0);

  let mut seen = SeenSignals::new(4);
  assert_eq!(consumer.process_batch(group("notif-pusher-start"), &mut seen).await.unwrap(), 1);
  assert_eq!(notifier.recipients(), vec!["owner@example.com"]);
}

#[tokio::test]
async fn dedup_skips_exact_replays() {
  let h = harness().await;
  let owner = h.user("owner@example.com").await;
  let id = h.service.create_event(daily("A", in_an_hour()), owner).await.unwrap().info.event_id;

  let signal = Signal::new(id, Topic::SendNotif, Utc::now());
  h.bus.publish(signal).await.unwrap();
  h.bus.publish(signal).await.unwrap();

  let notifier = Arc::new(RecordingNotifier::default());
  let consumer = h.consumer(Arc::clone(&notifier));
  let mut seen = SeenSignals::new(4);
  assert_eq!(consumer.process_batch(group("notif-pusher-direct"), &mut seen).await.unwrap(), 2);
  assert_eq!(notifier.recipients().len(), 1);
}

// ─── Access ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_share_changes_nothing() {
  let h = harness().await;
  let owner = h.user("owner@example.com").await;
  let bob = h.user("bob@example.com").await;
  let id = h.service.create_event(daily("A", in_an_hour()), owner).await.unwrap().info.event_id;

  let err = h
    .service
    .share(id, owner, vec![ShareTarget { user_id: owner, level: AccessLevel::Write }])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Authorization(_)));

  let err = h
    .service
    .share(id, owner, vec![
      ShareTarget { user_id: bob, level: AccessLevel::Write },
      ShareTarget { user_id: 9_999, level: AccessLevel::Read },
    ])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(_)));

  let grants = h.service.list_permissions(id, owner).await.unwrap();
  assert_eq!(grants.len(), 1);
  assert_eq!(grants[0].user_id, owner);
  assert_eq!(grants[0].level, AccessLevel::Owner);
}

#[tokio::test]
async fn missing_event_and_missing_grant_are_distinguished() {
  let h = harness().await;
  let owner = h.user("owner@example.com").await;
  let stranger = h.user("stranger@example.com").await;
  let id = h.service.create_event(daily("A", in_an_hour()), owner).await.unwrap().info.event_id;

  let err = h.service.get_event(id, stranger).await.unwrap_err();
  assert!(matches!(err, Error::Authorization(_)));
  let err = h.service.get_event(id + 100, owner).await.unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn only_owner_manages_permissions() {
  let h = harness().await;
  let owner = h.user("owner@example.com").await;
  let writer = h.user("writer@example.com").await;
  let reader = h.user("reader@example.com").await;
  let id = h.service.create_event(daily("A", in_an_hour()), owner).await.unwrap().info.event_id;
  h.service
    .share(id, owner, vec![
      ShareTarget { user_id: writer, level: AccessLevel::Write },
      ShareTarget { user_id: reader, level: AccessLevel::Read },
    ])
    .await
    .unwrap();

  let err = h.service.remove_permission(id, writer, reader).await.unwrap_err();
  assert!(matches!(err, Error::Authorization(_)));
  let err = h.service.delete_event(id, writer).await.unwrap_err();
  assert!(matches!(err, Error::Authorization(_)));
  assert_eq!(h.service.list_permissions(id, reader).await.unwrap().len(), 3);

  h.service.remove_permission(id, owner, reader).await.unwrap();
  let err = h.service.get_event(id, reader).await.unwrap_err();
  assert!(matches!(err, Error::Authorization(_)));

  h.service.delete_event(id, owner).await.unwrap();
  let err = h.service.get_event(id, owner).await.unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
}

// ─── History ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn history_matches_live_state_at_current_version() {
  let h = harness().await;
  let owner = h.user("owner@example.com").await;
  let start = in_an_hour();
  let id = h.service.create_event(daily("A", start), owner).await.unwrap().info.event_id;

  h.service.update_event(id, owner, retitle("B")).await.unwrap();
  h.service
    .update_event(id, owner, EventUpdate {
      location: Some("Room 4".into()),
      start_time: Some(start + Duration::hours(1)),
      end_time: Some(start + Duration::hours(2)),
      ..Default::default()
    })
    .await
    .unwrap();

  let live = h.service.get_event(id, owner).await.unwrap().state();
  assert_eq!(live.version, 3);
  assert_eq!(h.service.history(id, owner, 3).await.unwrap(), live);

  let v1 = h.service.history(id, owner, 1).await.unwrap();
  assert_eq!(v1.title, "A");
  assert_eq!(v1.location, None);
  assert_eq!(v1.start_time, start);
  assert_eq!(v1.duration_secs(), 1_800);

  let err = h.service.history(id, owner, 4).await.unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));

  h.service.rollback(id, owner, 2).await.unwrap();
  let live = h.service.get_event(id, owner).await.unwrap().state();
  assert_eq!(live.title, "B");
  assert_eq!(live.start_time, start);
  assert_eq!(h.service.history(id, owner, 2).await.unwrap(), live);
  assert_eq!(h.service.history(id, owner, 1).await.unwrap(), v1);
}

#[tokio::test]
async fn rollback_after_the_series_advances_keeps_times_ordered() {
  let h = harness().await;
  let owner = h.user("owner@example.com").await;
  let start = in_an_hour();
  let id = h.service.create_event(daily("A", start), owner).await.unwrap().info.event_id;

  let end = start + Duration::hours(1);
  h.service
    .update_event(id, owner, EventUpdate { end_time: Some(end), ..Default::default() })
    .await
    .unwrap();
  h.store.activate_due(id, start).await.unwrap().unwrap();
  h.store.complete_due(id, end).await.unwrap().unwrap();

  let v1 = h.service.history(id, owner, 1).await.unwrap();
  assert_eq!(v1.start_time, start + Duration::days(1));
  assert!(v1.start_time < v1.end_time);

  h.service.rollback(id, owner, 1).await.unwrap();
  assert_eq!(h.service.get_event(id, owner).await.unwrap().state(), v1);
}

#[tokio::test]
async fn diff_bounds_are_checked() {
  let h = harness().await;
  let owner = h.user("owner@example.com").await;
  let id = h.service.create_event(daily("A", in_an_hour()), owner).await.unwrap().info.event_id;
  h.service.update_event(id, owner, retitle("B")).await.unwrap();
  h.service.update_event(id, owner, retitle("C")).await.unwrap();

  assert!(matches!(h.service.diff(id, owner, 2, 2).await, Err(Error::Conflict(_))));
  assert!(matches!(h.service.diff(id, owner, 2, 1).await, Err(Error::Conflict(_))));
  assert!(matches!(h.service.diff(id, owner, 1, 4).await, Err(Error::NotFound(_))));

  let diff = h.service.diff(id, owner, 1, 3).await.unwrap();
  assert_eq!(serde_json::to_value(&diff).unwrap(), serde_json::json!({ "title": ["A", "C"] }));
}

#[tokio::test]
async fn create_rejects_past_start() {
  let h = harness().await;
  let owner = h.user("owner@example.com").await;
  let past = whole_seconds(Utc::now()) - Duration::hours(1);

  let err = h.service.create_event(daily("Late", past), owner).await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)));

  let err = h
    .service
    .create_events(vec![daily("Ok", in_an_hour()), daily("Late", past)], owner)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(_)));
  assert!(h.service.list_events(owner, &Default::default()).await.unwrap().is_empty());
}

// ─── Background loops ────────────────────────────────────────────────────────

#[tokio::test]
async fn background_loops_stop_on_shutdown() {
  let h = harness().await;
  let (tx, rx) = watch::channel(false);

  let scheduler = Arc::new(h.scheduler());
  let consumer = Arc::new(h.consumer(Arc::new(LogNotifier)));
  let mut handles = Arc::clone(&scheduler).spawn(rx.clone());
  handles.extend(consumer.spawn(rx));
  assert_eq!(handles.len(), 2 + GROUPS.len());

  tokio::time::sleep(StdDuration::from_millis(50)).await;
  tx.send(true).unwrap();

  for handle in handles {
    tokio::time::timeout(StdDuration::from_secs(5), handle)
      .await
      .expect("loop did not stop")
      .unwrap();
  }

  // No cycle outlives its loop.
  assert!(scheduler.sweep_at(Utc::now()).await.unwrap().is_some());
  assert!(scheduler.poll_at(Utc::now()).await.unwrap().is_some());
}
