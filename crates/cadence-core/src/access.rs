//! Access grants and the guard that checks them against actions.

use serde::{Deserialize, Serialize};

use crate::{Error, Result, event::EventId, user::UserId};

/// Access level held by a user on one event. Ordered `Read < Write < Owner`.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccessLevel {
  Read,
  Write,
  Owner,
}

/// A persisted grant. Unique per `(user_id, event_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
  pub event_id: EventId,
  pub user_id:  UserId,
  pub level:    AccessLevel,
}

/// One entry of a share request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareTarget {
  pub user_id: UserId,
  pub level:   AccessLevel,
}

/// Everything an actor can ask to do with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Action {
  Read,
  History,
  Diff,
  Changelog,
  ListPermissions,
  Update,
  Rollback,
  Cancel,
  Delete,
  Share,
  RemovePermission,
}

impl Action {
  /// The minimum level that permits this action.
  pub fn required(self) -> AccessLevel {
    match self {
      Self::Read
      | Self::History
      | Self::Diff
      | Self::Changelog
      | Self::ListPermissions => AccessLevel::Read,
      Self::Update | Self::Rollback | Self::Cancel => AccessLevel::Write,
      Self::Delete | Self::Share | Self::RemovePermission => AccessLevel::Owner,
    }
  }
}

/// Check the actor's grant (if any) against `action`.
pub fn authorize(grant: Option<&AccessGrant>, action: Action) -> Result<AccessLevel> {
  let Some(grant) = grant else {
    return Err(Error::unauthorized(format!("no access grant permits {action}")));
  };
  let required = action.required();
  if grant.level < required {
    return Err(Error::unauthorized(format!(
      "{action} on event {} requires {required} access, user {} holds {}",
      grant.event_id, grant.user_id, grant.level
    )));
  }
  Ok(grant.level)
}

/// Validate a share request before any grant is written. User existence is
/// checked by the store, inside the transaction that writes the grants.
///
/// `existing` holds the event's current grants.
pub fn check_share(
  actor: UserId,
  targets: &[ShareTarget],
  existing: &[AccessGrant],
) -> Result<()> {
  if targets.is_empty() {
    return Err(Error::validation("share request names no users"));
  }
  for (i, target) in targets.iter().enumerate() {
    if target.user_id == actor {
      return Err(Error::unauthorized("cannot change your own access level"));
    }
    if target.level == AccessLevel::Owner {
      return Err(Error::validation("owner access cannot be granted by sharing"));
    }
    if targets[..i].iter().any(|t| t.user_id == target.user_id) {
      return Err(Error::validation(format!(
        "user {} appears more than once in the share request",
        target.user_id
      )));
    }
    let demotes_owner = existing
      .iter()
      .any(|g| g.user_id == target.user_id && g.level == AccessLevel::Owner);
    if demotes_owner {
      return Err(Error::unauthorized(format!(
        "user {} owns this event and cannot be demoted",
        target.user_id
      )));
    }
  }
  Ok(())
}

/// Validate removal of `target`'s grant by `actor`.
pub fn check_removal(
  actor: UserId,
  target: UserId,
  grant: Option<&AccessGrant>,
) -> Result<()> {
  if actor == target {
    return Err(Error::unauthorized("cannot remove your own access"));
  }
  match grant {
    None => Err(Error::not_found(format!("grant for user {target}"))),
    Some(g) if g.level == AccessLevel::Owner => Err(Error::unauthorized(format!(
      "owner grant of user {target} cannot be removed"
    ))),
    Some(_) => Ok(()),
  }
}
