//! Service-worker style cache controller: lifecycle plus request routing.
//!
//! The controller reacts to three events - install, activate, fetch - the
//! way a browser service worker would, but as an explicit object driven by
//! its host (or a test harness) rather than an implicit event bus.

mod controller;
mod policy;

pub use controller::{
  CacheController, ResponseSource, Routed, WorkerConfig, WorkerState, WriteTask,
};
pub use policy::{classify, RequestClass};
