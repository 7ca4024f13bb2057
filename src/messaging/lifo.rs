//! The pop-all MPMC LIFO stack, the primitive everything else rests on.
//!
//! The stack is a single atomic head pointer over intrusive nodes. It
//! supports `push`, `push_chain` and `pop_all`, but deliberately not
//! `pop`: removing the entire chain in one atomic exchange is what makes
//! the algorithm immune to the classic ABA hazard of CAS-based pops. The
//! only CAS is in `push`, and a successful push needs nothing more than
//! the observed head being a valid linkable address, which holds because
//! nodes are never freed while linked (frees happen from owned [`Chain`]s
//! after they have been popped).

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use super::node::{Chain, MessageNode, NodeBox};

/// Lock-free multi-producer multi-consumer pop-all LIFO stack.
///
/// Any number of threads may push concurrently; any number may race on
/// `pop_all` (each winner takes whatever chain was linked at that
/// instant). An individual push is a short CAS loop; `pop_all` is a single
/// atomic exchange.
pub struct LifoStack<T> {
    head: AtomicPtr<MessageNode<T>>,
}

// SAFETY: nodes are exclusively owned by the stack while linked, and the
// push/pop_all protocol transfers that ownership with Release/Acquire
// ordering. Payloads only need to be able to cross threads.
unsafe impl<T: Send> Send for LifoStack<T> {}
unsafe impl<T: Send> Sync for LifoStack<T> {}

impl<T> LifoStack<T> {
    /// An empty stack.
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Push a detached node, making it the new head.
    pub fn push(&self, node: NodeBox<T>) {
        let raw = node.into_raw();
        // SAFETY: `into_raw` yields an exclusively owned, unlinked node;
        // it is both head and tail of a one-node chain.
        unsafe { self.push_raw(raw, raw) }
    }

    /// Splice a whole owned chain onto the stack in one atomic operation.
    ///
    /// The chain's internal order is preserved: its head stays in front of
    /// its tail, and the tail ends up linked to the previous stack head.
    /// Pushing an empty chain is a no-op.
    pub fn push_chain(&self, chain: Chain<T>) {
        if let Some((head, tail)) = chain.into_raw_parts() {
            // SAFETY: `into_raw_parts` hands over exclusive ownership of a
            // well-formed chain from `head` to `tail`.
            unsafe { self.push_raw(head, tail) }
        }
    }

    /// Link the chain `head ..= tail` in front of the current head.
    ///
    /// Release on success publishes every payload write made before the
    /// call; Acquire on failure resynchronizes the retry with the head
    /// observed from other producers.
    ///
    /// # Safety
    ///
    /// The caller must exclusively own the chain, `tail` must be reachable
    /// from `head` via `next` links, and no node in it may be linked
    /// anywhere else.
    unsafe fn push_raw(&self, head: NonNull<MessageNode<T>>, tail: NonNull<MessageNode<T>>) {
        let mut old = self.head.load(Ordering::Relaxed);
        loop {
            (*tail.as_ptr()).next = old;
            match self.head.compare_exchange_weak(
                old,
                head.as_ptr(),
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => old = actual,
            }
        }
    }

    /// Atomically take the entire chain, leaving the stack empty.
    ///
    /// Returns the owned chain; its head is the most recently pushed node.
    /// The Acquire exchange pairs with the Release in `push`, so payload
    /// writes made before a push are visible through the returned chain.
    pub fn pop_all(&self) -> Chain<T> {
        let head = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        // SAFETY: the exchange transferred exclusive ownership of the whole
        // chain to us; nothing else can reach these nodes anymore.
        unsafe { Chain::from_raw(head) }
    }
}

impl<T> Default for LifoStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LifoStack<T> {
    fn drop(&mut self) {
        // Chain::drop frees the nodes and their payloads.
        drop(self.pop_all());
    }
}
