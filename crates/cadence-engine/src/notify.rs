//! Notification composition and the delivery seam.
//!
//! Email transport is not part of this crate; [`LogNotifier`] records each
//! message through `tracing` instead.

use std::{convert::Infallible, future::Future};

use cadence_core::{event::EventInfo, signal::Topic};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;

/// One outbound message to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
  pub from:    String,
  pub to:      String,
  pub subject: String,
  pub body:    String,
}

/// Subject and body for a signal on `topic` about `info`, emitted at `at`.
pub fn compose(topic: Topic, info: &EventInfo, at: DateTime<Utc>) -> (String, String) {
  let id = info.event_id;
  let title = &info.title;
  match topic {
    Topic::EventStart => (
      format!("Event {id} started: {title}"),
      format!("\"{title}\" (event {id}) has started and is now live."),
    ),
    Topic::EventEnd => (
      format!("Event {id} ended: {title}"),
      format!("\"{title}\" (event {id}) has ended. Thank you for attending!"),
    ),
    Topic::SendNotif => (
      format!("Event {id} updated: {title}"),
      format!(
        "\"{title}\" (event {id}) was updated at {}. Please check the latest details.",
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
      ),
    ),
  }
}

/// Delivers a single message. Implementations should not retry; failures are
/// logged by the caller and do not affect other recipients.
pub trait Notifier: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn deliver<'a>(
    &'a self,
    message: &'a Message,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

/// Logs every message at `INFO`.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  type Error = Infallible;

  async fn deliver(&self, message: &Message) -> Result<(), Infallible> {
    info!(
      from = %message.from,
      to = %message.to,
      subject = %message.subject,
      "notification sent"
    );
    Ok(())
  }
}
