//! SQLite backend for the Cadence event store and signal bus.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime.

mod bus;
mod encode;
mod schema;
mod store;

pub mod error;

pub use bus::SqliteSignalBus;
pub use error::{Error, Result};
pub use store::SqliteStore;
