//! # janus
//!
//! A small toolkit for sharing mutable state between non-realtime
//! producer threads and realtime consumer threads without blocking the
//! realtime path. Everything rests on one primitive: a lock-free,
//! multi-producer multi-consumer, pop-all LIFO stack of intrusive nodes,
//! paired with a free-list that recycles node storage. The hot paths do
//! no heap allocation, take no mutex and make no system calls.
//!
//! Three facilities are built on the primitive:
//!
//! - [`Messenger`]: a typed channel with send / receive-all /
//!   receive-last / recycle operations over the stack pair.
//! - [`RealtimeObject`]: a latest-value handoff to a single realtime
//!   thread, returning superseded versions for off-thread destruction.
//! - [`AsyncObject`]: a broadcast coordinator where a worker thread
//!   applies queued changes to a canonical settings value and delivers a
//!   fresh snapshot to every consumer.
//!
//! ## Quick Start
//!
//! ```
//! use janus::{AsyncObject, AsyncWorker};
//!
//! let object = AsyncObject::<i32, i32>::new(0);
//! let mut instance = object.create_instance();
//! let producer = object.create_producer();
//!
//! let mut worker = AsyncWorker::with_period(10);
//! worker.attach(object.clone())?;
//! worker.start()?;
//!
//! // any thread, realtime included:
//! producer.try_submit(|settings| *settings += 1);
//!
//! // consumer thread:
//! if instance.update() {
//!     let _snapshot = instance.get();
//! }
//!
//! worker.stop();
//! # Ok::<(), janus::JanusError>(())
//! ```

pub mod error;
pub mod messaging;
pub mod realtime;
pub mod scheduling;

pub use error::{JanusError, JanusResult};
pub use messaging::{Chain, LifoStack, Messenger, NodeBox};
pub use realtime::{RealtimeObject, RealtimeView};
pub use scheduling::{AsyncObject, AsyncWorker, Change, FromSettings, Instance, Producer, Tick};
