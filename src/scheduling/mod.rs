//! # Scheduling - the asynchronous worker and its objects
//!
//! A periodic [`AsyncWorker`] thread drives any number of attached
//! [`AsyncObject`]s: each tick drains submitted [`Change`]s into the
//! object's canonical settings and rebroadcasts fresh snapshots to every
//! consumer [`Instance`]. Producers and consumers stay on their own
//! threads and touch only lock-free paths; all the locking lives here, on
//! the worker side.

mod async_object;
mod change;
mod worker;

pub use async_object::{
    AsyncObject, FromSettings, Instance, Producer, DEFAULT_INSTANCE_NODES, DEFAULT_PRODUCER_NODES,
};
pub use change::{Change, DEFAULT_CHANGE_CAPACITY};
pub use worker::{AsyncWorker, Tick, DEFAULT_PERIOD_MS};
