//! [`MemoryTimeQueue`]: an in-process time-ordered marker set.
//!
//! Markers are lost on restart. The sweep re-derives them from the store on
//! its next run, including end markers of occurrences already active.

use std::{
  collections::{BTreeSet, HashMap},
  convert::Infallible,
};

use cadence_core::signal::{Marker, MarkerKey, TimeQueue};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
  scores:  HashMap<MarkerKey, i64>,
  ordered: BTreeSet<(i64, MarkerKey)>,
}

/// One entry per key; re-inserting a key moves it to its new score.
#[derive(Default)]
pub struct MemoryTimeQueue {
  inner: Mutex<Inner>,
}

impl MemoryTimeQueue {
  pub fn new() -> Self { Self::default() }

  pub async fn len(&self) -> usize { self.inner.lock().await.scores.len() }

  pub async fn score(&self, key: MarkerKey) -> Option<i64> {
    self.inner.lock().await.scores.get(&key).copied()
  }
}

impl TimeQueue for MemoryTimeQueue {
  type Error = Infallible;

  async fn upsert(&self, key: MarkerKey, score: i64) -> Result<(), Infallible> {
    let mut inner = self.inner.lock().await;
    if let Some(previous) = inner.scores.insert(key, score) {
      inner.ordered.remove(&(previous, key));
    }
    inner.ordered.insert((score, key));
    Ok(())
  }

  async fn due(&self, max_score: i64) -> Result<Vec<Marker>, Infallible> {
    let inner = self.inner.lock().await;
    Ok(
      inner
        .ordered
        .iter()
        .take_while(|(score, _)| *score <= max_score)
        .map(|&(score, key)| Marker { key, score })
        .collect(),
    )
  }

  async fn remove(&self, key: MarkerKey) -> Result<bool, Infallible> {
    let mut inner = self.inner.lock().await;
    match inner.scores.remove(&key) {
      Some(score) => Ok(inner.ordered.remove(&(score, key))),
      None => Ok(false),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn upsert_overwrites_instead_of_duplicating() {
    let q = MemoryTimeQueue::new();
    q.upsert(MarkerKey::start(1), 100).await.unwrap();
    q.upsert(MarkerKey::start(1), 100).await.unwrap();
    q.upsert(MarkerKey::start(1), 250).await.unwrap();
    assert_eq!(q.len().await, 1);
    assert!(q.due(200).await.unwrap().is_empty());
    assert_eq!(q.due(250).await.unwrap(), vec![Marker { key: MarkerKey::start(1), score: 250 }]);
  }

  #[tokio::test]
  async fn due_is_ordered_and_inclusive() {
    let q = MemoryTimeQueue::new();
    q.upsert(MarkerKey::end(1), 300).await.unwrap();
    q.upsert(MarkerKey::start(2), 100).await.unwrap();
    q.upsert(MarkerKey::start(1), 200).await.unwrap();

    let keys: Vec<_> = q.due(300).await.unwrap().into_iter().map(|m| m.key).collect();
    assert_eq!(keys, vec![MarkerKey::start(2), MarkerKey::start(1), MarkerKey::end(1)]);
    assert_eq!(q.due(99).await.unwrap().len(), 0);
  }

  #[tokio::test]
  async fn remove_reports_presence() {
    let q = MemoryTimeQueue::new();
    q.upsert(MarkerKey::end(4), 10).await.unwrap();
    assert!(q.remove(MarkerKey::end(4)).await.unwrap());
    assert!(!q.remove(MarkerKey::end(4)).await.unwrap());
    assert_eq!(q.len().await, 0);
    assert_eq!(q.score(MarkerKey::end(4)).await, None);
  }
}
