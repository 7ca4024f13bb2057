//! Messenger - a typed channel pairing a live stack with a free-list.
//!
//! The `live` stack carries messages in flight; the `free` stack recycles
//! node storage so that steady-state traffic allocates nothing. Senders
//! pop the free-list, load a payload into the head node, splice the rest
//! back and push onto `live`; receivers pop the live chain and eventually
//! recycle it. Both hot paths are a bounded number of atomic operations
//! with no locks and no syscalls.

use super::lifo::LifoStack;
use super::node::{Chain, NodeBox};

/// A lock-free channel of recyclable message nodes.
///
/// Sends are safe from any number of threads. Receiving is intended for a
/// logically single consumer at a time: the stack algorithm tolerates
/// several threads racing on the pop, but whichever caller wins owns the
/// returned chain and is responsible for recycling it.
pub struct Messenger<T> {
    live: LifoStack<T>,
    free: LifoStack<T>,
}

impl<T> Messenger<T> {
    /// An empty messenger with no preallocated nodes.
    pub const fn new() -> Self {
        Self {
            live: LifoStack::new(),
            free: LifoStack::new(),
        }
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Send a message already wrapped in a node. Never allocates.
    pub fn send_node(&self, node: NodeBox<T>) {
        self.live.push(node);
    }

    /// Splice a whole chain of loaded nodes onto the live stack.
    ///
    /// Used by the handoff layers to migrate returned values in bulk
    /// without touching their payloads.
    pub fn send_chain(&self, chain: Chain<T>) {
        self.live.push_chain(chain);
    }

    /// Send a message, reusing a free node when one is available.
    ///
    /// Returns `true` if a recycled node was used, `false` if a fresh node
    /// had to be heap-allocated. Not realtime-safe on the `false` path;
    /// preallocate enough nodes to keep it on the `true` path, or use
    /// [`Messenger::try_send`] from realtime threads.
    pub fn send(&self, message: T) -> bool {
        let mut storage = self.free.pop_all();
        if let Some(mut node) = storage.take_first() {
            node.replace(message);
            self.free.push_chain(storage);
            self.live.push(node);
            true
        } else {
            self.live.push(NodeBox::new(message));
            false
        }
    }

    /// Realtime-safe send: succeeds only if a free node is available.
    ///
    /// On an empty free-list the message is handed back unchanged and the
    /// live stack is untouched. Wait-free, allocation-free.
    pub fn try_send(&self, message: T) -> Result<(), T> {
        let mut storage = self.free.pop_all();
        match storage.take_first() {
            Some(mut node) => {
                node.replace(message);
                self.free.push_chain(storage);
                self.live.push(node);
                Ok(())
            }
            None => Err(message),
        }
    }

    // ------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------

    /// Take every pending message as an owned chain (newest first).
    ///
    /// Walk it with [`Chain::for_each_fifo`] to process messages in send
    /// order, then hand the chain back via [`Messenger::recycle`].
    pub fn receive_all(&self) -> Chain<T> {
        self.live.pop_all()
    }

    /// Take only the most recently sent message, discarding older ones.
    ///
    /// The older messages' nodes (payloads still in them) are spliced onto
    /// the free-list; their payloads are dropped whenever those nodes are
    /// reused by a later send. Returns `None` when nothing is pending.
    pub fn receive_last(&self) -> Option<NodeBox<T>> {
        let mut chain = self.live.pop_all();
        let newest = chain.take_first()?;
        self.free.push_chain(chain);
        Some(newest)
    }

    // ------------------------------------------------------------------
    // Storage management
    // ------------------------------------------------------------------

    /// Return a chain of nodes to the free-list.
    pub fn recycle(&self, chain: Chain<T>) {
        self.free.push_chain(chain);
    }

    /// Return a single node to the free-list.
    pub fn recycle_node(&self, node: NodeBox<T>) {
        self.free.push(node);
    }

    /// Take the whole free-list, e.g. to count or rebalance storage.
    pub fn pop_free(&self) -> Chain<T> {
        self.free.pop_all()
    }

    /// Preallocate `n` default-initialized nodes onto the free-list.
    ///
    /// Not realtime-safe; call during setup.
    pub fn preallocate(&self, n: usize)
    where
        T: Default,
    {
        self.preallocate_with(n, T::default);
    }

    /// Preallocate `n` nodes initialized by `init` onto the free-list.
    ///
    /// Not realtime-safe; call during setup.
    pub fn preallocate_with(&self, n: usize, mut init: impl FnMut() -> T) {
        let mut chain = Chain::new();
        for _ in 0..n {
            chain.push_front(NodeBox::new(init()));
        }
        self.free.push_chain(chain);
    }

    /// Drain all pending messages onto the free-list without observing them.
    pub fn discard_all(&self) {
        self.free.push_chain(self.live.pop_all());
    }

    /// Drop the free-list, releasing its node storage.
    pub fn free_storage(&self) {
        drop(self.free.pop_all());
    }
}

impl<T> Default for Messenger<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Dropping a Messenger drops both stacks, which free any remaining nodes
// together with their payloads.
