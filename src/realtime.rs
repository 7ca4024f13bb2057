//! Latest-value handoff to a single realtime thread.
//!
//! A [`RealtimeObject`] shares one heap-owned value between non-realtime
//! writers and exactly one realtime reader. Writers build new versions
//! off-thread and send them over; the reader always observes the newest
//! version and returns superseded ones for off-thread destruction, so the
//! realtime path never allocates, frees or blocks.
//!
//! Construction yields a handle pair, in the same spirit as a
//! producer/consumer channel split:
//!
//! ```
//! use janus::realtime::RealtimeObject;
//!
//! let (object, mut view) = RealtimeObject::new(0u64);
//! object.set(7);
//! // on the realtime thread:
//! assert_eq!(*view.get(), 7);
//! ```
//!
//! Internally two [`Messenger`]s form a closed loop: `to_rt` carries fresh
//! boxed values in, `from_rt` carries retired ones out, and the emptied
//! nodes circulate back onto `to_rt`'s free-list. With the default
//! preallocation the loop reaches a steady state where neither direction
//! allocates.

use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::messaging::Messenger;

/// Nodes preallocated for the handoff loop. Enough to absorb a long burst
/// of writes between two realtime polls.
pub const DEFAULT_REALTIME_NODES: usize = 128;

struct Shared<T> {
    /// Fresh versions travelling to the realtime thread.
    to_rt: Messenger<Option<Box<T>>>,
    /// Retired versions travelling back for destruction.
    from_rt: Messenger<Option<Box<T>>>,
    /// The value currently held by the realtime side, for non-realtime
    /// observation. Null once the view has been dropped.
    published: AtomicPtr<T>,
    /// Serializes writers; also the retirement lock: boxes are only
    /// dropped while it is held, which is what makes `read` sound.
    writer: Mutex<()>,
}

/// Non-realtime handle: set, change and observe the shared value.
///
/// Clonable; concurrent writers serialize on an internal mutex.
pub struct RealtimeObject<T> {
    shared: Arc<Shared<T>>,
}

/// Realtime handle: polls for the newest version of the value.
///
/// There is exactly one view per object, and its operations take
/// `&mut self`, so the single-consumer contract is enforced by the type
/// system rather than by documentation.
pub struct RealtimeView<T> {
    current: Box<T>,
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> RealtimeObject<T> {
    /// Create the handle pair with the default node preallocation.
    pub fn new(initial: T) -> (RealtimeObject<T>, RealtimeView<T>) {
        Self::with_capacity(initial, DEFAULT_REALTIME_NODES)
    }

    /// Create the handle pair, preallocating `nodes` handoff nodes.
    ///
    /// With `nodes == 0` every `set` allocates a node (the loop still
    /// works, it just is not allocation-free until nodes circulate).
    pub fn with_capacity(initial: T, nodes: usize) -> (RealtimeObject<T>, RealtimeView<T>) {
        let shared = Arc::new(Shared {
            to_rt: Messenger::new(),
            from_rt: Messenger::new(),
            published: AtomicPtr::new(ptr::null_mut()),
            writer: Mutex::new(()),
        });
        shared.to_rt.preallocate(nodes);

        let current = Box::new(initial);
        shared
            .published
            .store(&*current as *const T as *mut T, Ordering::Release);

        (
            RealtimeObject {
                shared: shared.clone(),
            },
            RealtimeView { current, shared },
        )
    }

    /// Publish a new version of the value.
    ///
    /// Also reclaims any versions the realtime side has retired since the
    /// last call, dropping them on this thread.
    pub fn set(&self, value: T) {
        let _guard = self.shared.writer.lock();
        self.shared.reclaim_retired();
        self.shared.to_rt.send(Some(Box::new(value)));
    }

    /// Copy the current value, apply `change`, publish the result.
    ///
    /// Returns `false` without publishing if the realtime view has been
    /// dropped.
    pub fn change(&self, change: impl FnOnce(&mut T)) -> bool
    where
        T: Clone,
    {
        let _guard = self.shared.writer.lock();
        let ptr = self.shared.published.load(Ordering::Acquire);
        if ptr.is_null() {
            return false;
        }
        // SAFETY: published values are retired and dropped only under
        // `writer`, which we hold.
        let mut copy = unsafe { (*ptr).clone() };
        change(&mut copy);
        self.shared.reclaim_retired();
        self.shared.to_rt.send(Some(Box::new(copy)));
        true
    }

    /// Like [`RealtimeObject::change`], gated on a predicate over the
    /// current value. The change is applied and published only when
    /// `predicate` returns true.
    pub fn change_if(
        &self,
        change: impl FnOnce(&mut T),
        predicate: impl FnOnce(&T) -> bool,
    ) -> bool
    where
        T: Clone,
    {
        let _guard = self.shared.writer.lock();
        let ptr = self.shared.published.load(Ordering::Acquire);
        if ptr.is_null() {
            return false;
        }
        // SAFETY: as in `change`; retirement requires `writer`.
        let value = unsafe { &*ptr };
        if !predicate(value) {
            return false;
        }
        let mut copy = value.clone();
        change(&mut copy);
        self.shared.reclaim_retired();
        self.shared.to_rt.send(Some(Box::new(copy)));
        true
    }

    /// Observe the value currently held by the realtime side.
    ///
    /// The closure runs under the writer mutex; keep it short. The
    /// observed value may already have been superseded by the time the
    /// closure runs, but it is always a version the realtime side actually
    /// held. Returns `None` once the realtime view has been dropped.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let _guard = self.shared.writer.lock();
        let ptr = self.shared.published.load(Ordering::Acquire);
        if ptr.is_null() {
            return None;
        }
        // SAFETY: retirement of published values requires `writer`, which
        // we hold for the duration of the closure; the value itself is
        // immutable after publication.
        Some(f(unsafe { &*ptr }))
    }
}

impl<T> Clone for RealtimeObject<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Shared<T> {
    /// Drop every retired value and feed the emptied nodes back into the
    /// delivery free-list. Caller must hold `writer`.
    fn reclaim_retired(&self) {
        let mut retired = self.from_rt.receive_all();
        if retired.is_empty() {
            return;
        }
        retired.for_each(|slot| {
            slot.take();
        });
        self.to_rt.recycle(retired);
    }
}

impl<T: Send + 'static> RealtimeView<T> {
    /// Get the newest version of the value. Wait-free, allocation-free.
    ///
    /// If new versions arrived since the last call, the newest one becomes
    /// current and every superseded version (including the previously
    /// current one) is shipped back for off-thread destruction.
    pub fn get(&mut self) -> &T {
        let mut fresh = self.shared.to_rt.receive_all();
        if let Some(mut node) = fresh.take_first() {
            if let Some(newest) = node.payload_mut().take() {
                let old = mem::replace(&mut self.current, newest);
                *node.payload_mut() = Some(old);
                self.shared
                    .published
                    .store(&*self.current as *const T as *mut T, Ordering::Release);
            }
            // The node now carries the retired value; older versions ride
            // back in their own nodes.
            self.shared.from_rt.send_node(node);
            if !fresh.is_empty() {
                self.shared.from_rt.send_chain(fresh);
            }
        }
        &self.current
    }
}

impl<T> Drop for RealtimeView<T> {
    fn drop(&mut self) {
        // Unpublish under the writer mutex so no reader can still be
        // dereferencing the pointer when `current` is freed below.
        let _guard = self.shared.writer.lock();
        self.shared.published.store(ptr::null_mut(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[derive(Clone)]
    struct Tracked {
        value: i32,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn realtime_side_sees_the_latest_set() {
        let (object, mut view) = RealtimeObject::new(0);
        assert_eq!(*view.get(), 0);

        object.set(7);
        assert_eq!(*view.get(), 7);
    }

    #[test]
    fn get_without_new_versions_returns_the_same_value() {
        let (object, mut view) = RealtimeObject::new(1);
        object.set(2);

        let first = view.get() as *const i32;
        let second = view.get() as *const i32;
        assert_eq!(first, second, "no intervening set, same storage");
        assert_eq!(*view.get(), 2);
    }

    #[test]
    fn intermediate_versions_are_skipped() {
        let (object, mut view) = RealtimeObject::new(0);
        for i in 1..=5 {
            object.set(i);
        }
        assert_eq!(*view.get(), 5, "only the newest version is observed");
    }

    #[test]
    fn retired_versions_are_reclaimed_by_the_next_set() {
        let drops = Arc::new(AtomicUsize::new(0));
        let tracked = |value| Tracked {
            value,
            drops: drops.clone(),
        };

        let (object, mut view) = RealtimeObject::new(tracked(0));
        object.set(tracked(1));
        assert_eq!(view.get().value, 1);
        // The initial version is now retired but not yet freed.
        assert_eq!(drops.load(Ordering::Relaxed), 0);

        object.set(tracked(2));
        assert_eq!(drops.load(Ordering::Relaxed), 1, "set reclaims retirees");
        assert_eq!(view.get().value, 2);
    }

    #[test]
    fn read_observes_the_realtime_current_value() {
        let (object, mut view) = RealtimeObject::new(10);
        assert_eq!(object.read(|v| *v), Some(10));

        object.set(11);
        // Not yet picked up by the realtime side.
        assert_eq!(object.read(|v| *v), Some(10));

        view.get();
        assert_eq!(object.read(|v| *v), Some(11));
    }

    #[test]
    fn read_after_view_drop_returns_none() {
        let (object, view) = RealtimeObject::new(1);
        drop(view);
        assert_eq!(object.read(|v| *v), None);
        assert!(!object.change(|v| *v += 1));
    }

    #[test]
    fn change_copies_and_publishes() {
        let (object, mut view) = RealtimeObject::new(10);
        assert!(object.change(|v| *v += 5));
        assert_eq!(*view.get(), 15);
    }

    #[test]
    fn change_if_respects_the_predicate() {
        let (object, mut view) = RealtimeObject::new(10);

        assert!(!object.change_if(|v| *v = 0, |v| *v > 100));
        assert_eq!(*view.get(), 10);

        assert!(object.change_if(|v| *v = 0, |v| *v == 10));
        assert_eq!(*view.get(), 0);
    }

    #[test]
    fn handoff_is_allocation_free_once_primed() {
        let (object, mut view) = RealtimeObject::with_capacity(0usize, 4);

        // Prime and then cycle many times; the node pool must not grow,
        // which we can observe indirectly: every set finds a free node.
        for i in 1..=100usize {
            object.set(i);
            assert_eq!(*view.get(), i);
        }
    }

    #[test]
    fn writers_and_reader_converge_under_contention() {
        const WRITES: i32 = 2000;

        let (object, mut view) = RealtimeObject::new(0);
        let writer = {
            let object = object.clone();
            thread::spawn(move || {
                for i in 1..=WRITES {
                    object.set(i);
                }
            })
        };

        let mut last = 0;
        loop {
            let seen = *view.get();
            assert!(seen >= last, "observed value went backwards");
            last = seen;
            if seen == WRITES {
                break;
            }
            std::hint::spin_loop();
        }
        writer.join().unwrap();
    }

    #[test]
    fn no_value_is_leaked_at_shutdown() {
        let drops = Arc::new(AtomicUsize::new(0));
        let total = 50;
        {
            let (object, mut view) = RealtimeObject::new(Tracked {
                value: 0,
                drops: drops.clone(),
            });
            for i in 1..total {
                object.set(Tracked {
                    value: i,
                    drops: drops.clone(),
                });
                if i % 3 == 0 {
                    view.get();
                }
            }
        }
        assert_eq!(
            drops.load(Ordering::Relaxed),
            total as usize,
            "initial value plus every set value dropped exactly once"
        );
    }
}
