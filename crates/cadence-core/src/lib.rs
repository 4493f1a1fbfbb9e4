//! Core types and trait definitions for the Cadence event scheduler.
//!
//! This crate is deliberately free of database and runtime dependencies.
//! It holds the versioning algorithms (change tracking, diff folding,
//! reconstruction) as pure functions over domain types, and the traits that
//! storage, queue, and bus backends implement.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod access;
pub mod error;
pub mod event;
pub mod field;
pub mod history;
pub mod signal;
pub mod store;
pub mod tracker;
pub mod user;

pub use error::{Error, Result};
