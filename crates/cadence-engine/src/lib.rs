//! Services built on the `cadence-core` traits: the access-checked
//! [`EventService`], the in-memory [`MemoryTimeQueue`], and the lifecycle
//! pipeline ([`LifecycleScheduler`] feeding [`LifecycleConsumer`] through a
//! signal bus).
//!
//! Everything here is generic over the store, queue, bus, and notifier, and
//! is constructed explicitly and shared through `Arc`.

pub mod config;
pub mod consumer;
pub mod guard;
pub mod notify;
pub mod queue;
pub mod scheduler;
pub mod service;

pub use config::{ConsumerConfig, NotifyConfig, SchedulerConfig};
pub use consumer::{GROUPS, LifecycleConsumer};
pub use notify::{LogNotifier, Notifier};
pub use queue::MemoryTimeQueue;
pub use scheduler::LifecycleScheduler;
pub use service::EventService;

#[cfg(test)]
mod tests;
