//! Broadcast coordination of a settings value and its derived snapshots.
//!
//! An [`AsyncObject`] owns the canonical `Settings`. Any thread can hold a
//! [`Producer`] and enqueue [`Change`]s; a worker applies them in
//! submission order and, whenever anything changed, builds one fresh `Obj`
//! snapshot per attached [`Instance`] and delivers it. Consumers poll
//! their instance: [`Instance::update`] swaps in the newest snapshot
//! wait-free and returns the stale one for worker-side destruction.
//!
//! The settings value is touched only by the worker, under the object's
//! mutex; snapshots are immutable after construction. Change closures must
//! not reach back into the object (they run while its mutex is held).
//!
//! ```
//! use janus::scheduling::AsyncObject;
//!
//! let object = AsyncObject::<i32, i32>::new(0);
//! let mut instance = object.create_instance();
//! let producer = object.create_producer();
//!
//! producer.submit(|settings| *settings += 1);
//! object.tick(); // normally done by an AsyncWorker
//!
//! assert!(instance.update());
//! assert_eq!(*instance.get(), 1);
//! ```

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::change::{Change, DEFAULT_CHANGE_CAPACITY};
use super::worker::Tick;
use crate::messaging::Messenger;

/// Snapshot nodes preallocated per instance direction.
pub const DEFAULT_INSTANCE_NODES: usize = 8;

/// Change nodes preallocated per producer.
pub const DEFAULT_PRODUCER_NODES: usize = 32;

/// Construction of a consumer snapshot from the canonical settings.
///
/// Blanket-implemented via `Clone` when the snapshot type is the settings
/// type itself; implement it directly for derived snapshot types.
pub trait FromSettings<S> {
    fn from_settings(settings: &S) -> Self;
}

impl<S: Clone> FromSettings<S> for S {
    fn from_settings(settings: &S) -> S {
        settings.clone()
    }
}

struct InstanceShared<Obj> {
    /// Fresh snapshots travelling to the consumer.
    to_instance: Messenger<Option<Box<Obj>>>,
    /// Stale snapshots travelling back for destruction.
    from_instance: Messenger<Option<Box<Obj>>>,
}

struct ProducerShared<Settings, const CAP: usize> {
    changes: Messenger<Change<Settings, CAP>>,
}

struct State<Obj, Settings, const CAP: usize> {
    settings: Settings,
    instances: Vec<Arc<InstanceShared<Obj>>>,
    producers: Vec<Arc<ProducerShared<Settings, CAP>>>,
}

/// Shared coordinator for one settings value and its consumers.
///
/// Created behind an [`Arc`]; instances and producers each keep a
/// reference, so the object always outlives its handles and they can
/// deregister themselves on drop.
pub struct AsyncObject<Obj, Settings, const CAP: usize = DEFAULT_CHANGE_CAPACITY> {
    state: Mutex<State<Obj, Settings, CAP>>,
    attached: AtomicBool,
}

impl<Obj, Settings, const CAP: usize> AsyncObject<Obj, Settings, CAP> {
    /// Create a coordinator around the initial settings.
    pub fn new(settings: Settings) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                settings,
                instances: Vec::new(),
                producers: Vec::new(),
            }),
            attached: AtomicBool::new(false),
        })
    }

    /// Register a new consumer, handing it a snapshot of the current
    /// settings. Takes the object mutex; not realtime-safe.
    pub fn create_instance(self: &Arc<Self>) -> Instance<Obj, Settings, CAP>
    where
        Obj: FromSettings<Settings>,
    {
        let mut state = self.state.lock();
        let shared = Arc::new(InstanceShared {
            to_instance: Messenger::new(),
            from_instance: Messenger::new(),
        });
        shared.to_instance.preallocate(DEFAULT_INSTANCE_NODES);
        let local = Box::new(Obj::from_settings(&state.settings));
        state.instances.push(shared.clone());
        Instance {
            local,
            shared,
            object: self.clone(),
        }
    }

    /// Register a new change producer with a preallocated free-list.
    /// Takes the object mutex; not realtime-safe.
    pub fn create_producer(self: &Arc<Self>) -> Producer<Obj, Settings, CAP> {
        let mut state = self.state.lock();
        let shared = Arc::new(ProducerShared {
            changes: Messenger::new(),
        });
        shared.changes.preallocate(DEFAULT_PRODUCER_NODES);
        state.producers.push(shared.clone());
        Producer {
            shared,
            object: self.clone(),
        }
    }

    /// Apply pending changes and rebroadcast snapshots.
    ///
    /// Normally invoked by an [`AsyncWorker`](super::AsyncWorker) through
    /// [`Tick`]; callable directly for manual or test-driven pumping. The
    /// object mutex is held for the whole pass, so membership changes
    /// serialize against it.
    pub fn tick(&self)
    where
        Obj: FromSettings<Settings>,
    {
        let mut state = self.state.lock();
        let State {
            settings,
            instances,
            producers,
        } = &mut *state;

        // Reclaim snapshots the consumers have returned; the emptied nodes
        // go back onto the delivery free-lists, closing the storage loop.
        for instance in instances.iter() {
            let mut returned = instance.from_instance.receive_all();
            if !returned.is_empty() {
                returned.for_each(|slot| {
                    slot.take();
                });
                instance.to_instance.recycle(returned);
            }
        }

        // Apply changes in submission order, producer by producer.
        let mut any_change = false;
        for producer in producers.iter() {
            let mut changes = producer.changes.receive_all();
            if !changes.is_empty() {
                any_change = true;
                changes.for_each_fifo(|change| change.invoke(settings));
            }
            producer.changes.recycle(changes);
        }

        // Discard undelivered snapshots and deliver fresh ones, so a slow
        // consumer always wakes up to the newest state.
        if any_change {
            for instance in instances.iter() {
                let mut undelivered = instance.to_instance.receive_all();
                undelivered.for_each(|slot| {
                    slot.take();
                });
                instance.to_instance.recycle(undelivered);
                instance
                    .to_instance
                    .send(Some(Box::new(Obj::from_settings(settings))));
            }
        }
    }

    fn remove_instance(&self, target: &Arc<InstanceShared<Obj>>) {
        let mut state = self.state.lock();
        state.instances.retain(|i| !Arc::ptr_eq(i, target));
    }

    fn remove_producer(&self, target: &Arc<ProducerShared<Settings, CAP>>) {
        let mut state = self.state.lock();
        state.producers.retain(|p| !Arc::ptr_eq(p, target));
    }
}

impl<Obj, Settings, const CAP: usize> Tick for AsyncObject<Obj, Settings, CAP>
where
    Obj: FromSettings<Settings> + Send + 'static,
    Settings: Send + 'static,
{
    fn tick(&self) {
        AsyncObject::tick(self);
    }

    fn on_attach(&self) -> bool {
        !self.attached.swap(true, Ordering::AcqRel)
    }

    fn on_detach(&self) {
        self.attached.store(false, Ordering::Release);
    }
}

/// A consumer's handle on the asynchronous object.
///
/// Owns a local snapshot; `update`/`get` belong to one consumer thread,
/// enforced by the `&mut self` receivers.
pub struct Instance<Obj, Settings, const CAP: usize = DEFAULT_CHANGE_CAPACITY> {
    local: Box<Obj>,
    shared: Arc<InstanceShared<Obj>>,
    object: Arc<AsyncObject<Obj, Settings, CAP>>,
}

impl<Obj, Settings, const CAP: usize> Instance<Obj, Settings, CAP> {
    /// Swap in the newest delivered snapshot, if any.
    ///
    /// Wait-free and allocation-free: the stale snapshot rides back to the
    /// worker in the node the fresh one arrived in. Returns `true` iff a
    /// swap occurred.
    pub fn update(&mut self) -> bool {
        match self.shared.to_instance.receive_last() {
            Some(mut node) => {
                if let Some(fresh) = node.payload_mut().take() {
                    let stale = mem::replace(&mut self.local, fresh);
                    *node.payload_mut() = Some(stale);
                }
                self.shared.from_instance.send_node(node);
                true
            }
            None => false,
        }
    }

    /// The local snapshot. Stable until the next successful `update`.
    pub fn get(&self) -> &Obj {
        &self.local
    }

    /// Mutable access to the local snapshot. Purely consumer-local;
    /// the worker never sees these edits.
    pub fn get_mut(&mut self) -> &mut Obj {
        &mut self.local
    }
}

impl<Obj, Settings, const CAP: usize> Drop for Instance<Obj, Settings, CAP> {
    fn drop(&mut self) {
        self.object.remove_instance(&self.shared);
    }
}

/// A producer's handle for submitting changes to the settings.
pub struct Producer<Obj, Settings, const CAP: usize = DEFAULT_CHANGE_CAPACITY> {
    shared: Arc<ProducerShared<Settings, CAP>>,
    object: Arc<AsyncObject<Obj, Settings, CAP>>,
}

impl<Obj, Settings, const CAP: usize> Producer<Obj, Settings, CAP> {
    /// Enqueue a change, allocating a node if the free-list is empty.
    ///
    /// Returns `true` iff a recycled node was used (the allocation-free
    /// path). The change runs on the worker thread during its next tick.
    pub fn submit(&self, change: impl FnMut(&mut Settings) + Send + 'static) -> bool {
        self.shared.changes.send(Change::new(change))
    }

    /// Realtime-safe enqueue: fails (dropping the change) when no free
    /// node is available. Wait-free, allocation-free.
    pub fn try_submit(&self, change: impl FnMut(&mut Settings) + Send + 'static) -> bool {
        self.shared.changes.try_send(Change::new(change)).is_ok()
    }

    /// Grow this producer's free-list. Not realtime-safe.
    pub fn preallocate(&self, nodes: usize) {
        self.shared.changes.preallocate(nodes);
    }
}

impl<Obj, Settings, const CAP: usize> Drop for Producer<Obj, Settings, CAP> {
    fn drop(&mut self) {
        self.object.remove_producer(&self.shared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changes_are_applied_and_broadcast() {
        let object = AsyncObject::<i32, i32>::new(0);
        let mut instance = object.create_instance();
        let producer = object.create_producer();

        for _ in 0..50 {
            producer.submit(|s| *s += 1);
        }
        object.tick();

        assert!(instance.update());
        assert_eq!(*instance.get(), 50);
    }

    #[test]
    fn changes_from_both_producers_all_apply() {
        let object = AsyncObject::<i32, i32>::new(0);
        let mut instance = object.create_instance();
        let a = object.create_producer();
        let b = object.create_producer();

        for _ in 0..100 {
            a.submit(|s| *s += 1);
            b.submit(|s| *s += 1);
        }
        object.tick();

        assert!(instance.update());
        assert_eq!(*instance.get(), 200);
    }

    #[test]
    fn single_producer_changes_apply_in_submission_order() {
        let object = AsyncObject::<i32, i32>::new(0);
        let mut instance = object.create_instance();
        let producer = object.create_producer();

        producer.submit(|s| *s += 1);
        producer.submit(|s| *s *= 10);
        producer.submit(|s| *s += 2);
        object.tick();

        instance.update();
        assert_eq!(*instance.get(), 12, "(0 + 1) * 10 + 2, strictly in order");
    }

    #[test]
    fn update_without_worker_activity_returns_false() {
        let object = AsyncObject::<i32, i32>::new(3);
        let mut instance = object.create_instance();
        let producer = object.create_producer();

        assert!(!instance.update());
        assert_eq!(*instance.get(), 3);

        producer.submit(|s| *s += 1);
        object.tick();
        assert!(instance.update());
        assert!(!instance.update(), "second update has nothing new");
        assert_eq!(*instance.get(), 4);
    }

    #[test]
    fn tick_without_changes_sends_nothing() {
        let object = AsyncObject::<i32, i32>::new(0);
        let mut instance = object.create_instance();
        object.tick();
        assert!(!instance.update());
    }

    #[test]
    fn slow_consumer_skips_to_the_newest_snapshot() {
        let object = AsyncObject::<i32, i32>::new(0);
        let mut instance = object.create_instance();
        let producer = object.create_producer();

        producer.submit(|s| *s = 1);
        object.tick();
        producer.submit(|s| *s = 2);
        object.tick();

        assert!(instance.update());
        assert_eq!(*instance.get(), 2, "undelivered snapshot was replaced");
        assert!(!instance.update());
    }

    #[test]
    fn every_instance_receives_its_own_snapshot() {
        let object = AsyncObject::<i32, i32>::new(0);
        let mut first = object.create_instance();
        let mut second = object.create_instance();
        let producer = object.create_producer();

        producer.submit(|s| *s = 9);
        object.tick();

        assert!(first.update());
        assert!(second.update());
        assert_eq!(*first.get(), 9);
        assert_eq!(*second.get(), 9);
    }

    #[test]
    fn late_instances_start_from_current_settings() {
        let object = AsyncObject::<i32, i32>::new(0);
        let producer = object.create_producer();

        producer.submit(|s| *s = 7);
        object.tick();

        let instance = object.create_instance();
        assert_eq!(*instance.get(), 7);
    }

    #[test]
    fn try_submit_exhausts_and_recovers_with_ticks() {
        let object = AsyncObject::<i32, i32>::new(0);
        let _instance = object.create_instance();
        let producer = object.create_producer();

        for _ in 0..DEFAULT_PRODUCER_NODES {
            assert!(producer.try_submit(|s| *s += 1));
        }
        assert!(
            !producer.try_submit(|s| *s += 1),
            "free-list exhausted, change refused"
        );

        object.tick();
        assert!(
            producer.try_submit(|s| *s += 1),
            "tick recycled the change nodes"
        );
    }

    #[test]
    fn snapshots_can_be_a_different_type_than_settings() {
        #[derive(Clone)]
        struct Gain {
            db: f32,
        }

        struct Curve {
            linear: f32,
        }

        impl FromSettings<Gain> for Curve {
            fn from_settings(settings: &Gain) -> Self {
                Curve {
                    linear: 10f32.powf(settings.db / 20.0),
                }
            }
        }

        let object = AsyncObject::<Curve, Gain>::new(Gain { db: 0.0 });
        let mut instance = object.create_instance();
        let producer = object.create_producer();

        assert!((instance.get().linear - 1.0).abs() < 1e-6);

        producer.submit(|s: &mut Gain| s.db = 20.0);
        object.tick();
        instance.update();
        assert!((instance.get().linear - 10.0).abs() < 1e-4);
    }

    #[test]
    fn handles_deregister_on_drop() {
        let object = AsyncObject::<i32, i32>::new(0);
        let instance = object.create_instance();
        let producer = object.create_producer();

        producer.submit(|s| *s += 1);
        drop(instance);
        drop(producer);

        // Membership is gone; a tick has nobody to apply or deliver for.
        object.tick();
        let mut replacement = object.create_instance();
        assert!(!replacement.update());
        assert_eq!(*replacement.get(), 0, "pending change died with its producer");
    }

    #[test]
    fn local_snapshot_edits_do_not_leak_upstream() {
        let object = AsyncObject::<i32, i32>::new(5);
        let mut instance = object.create_instance();
        let producer = object.create_producer();

        *instance.get_mut() = 999;
        producer.submit(|s| *s += 1);
        object.tick();
        instance.update();
        assert_eq!(*instance.get(), 6, "snapshot rebuilt from settings");
    }
}
