//! # Messaging - the lock-free message primitive
//!
//! A multi-producer multi-consumer, pop-all LIFO stack of intrusive nodes
//! ([`LifoStack`]), plus the typed channel built directly on it
//! ([`Messenger`]): a live stack paired with a free-list that recycles
//! node storage. The hot paths perform no heap allocation, no mutex
//! acquisition and no system calls.
//!
//! | Operation | Path | Cost |
//! |-----------|------|------|
//! | `Messenger::try_send` | realtime | pop-all + CAS push |
//! | `Messenger::send` | non-realtime | same, may allocate when starved |
//! | `Messenger::receive_all` | realtime | one atomic exchange |
//! | `Messenger::receive_last` | realtime | exchange + free-list splice |
//! | `Messenger::recycle` | realtime | O(n) walk + CAS splice |
//!
//! Delivery is LIFO at the primitive level; consumers that need send
//! order replay a received [`Chain`] with [`Chain::for_each_fifo`].

mod lifo;
mod messenger;
mod node;


pub use lifo::LifoStack;
pub use messenger::Messenger;
pub use node::{Chain, Iter, NodeBox};
