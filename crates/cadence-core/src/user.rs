//! Users known to the store. They stand in for the account system and supply
//! share-target checks and notification addresses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub user_id:    UserId,
  pub email:      String,
  pub created_at: DateTime<Utc>,
}
