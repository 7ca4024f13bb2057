//! The periodic worker thread driving asynchronous objects.
//!
//! An [`AsyncWorker`] owns one background thread that repeatedly ticks
//! every attached object, then sleeps for the configured period. Objects
//! implement [`Tick`]; attachment is mutex-guarded and an object belongs
//! to at most one worker at a time.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{JanusError, JanusResult};

/// Default tick period in milliseconds.
pub const DEFAULT_PERIOD_MS: u64 = 250;

/// An object a worker can drive.
///
/// `tick` runs on the worker thread, once per iteration, with the
/// worker's membership lock held; it should do its own locking and return
/// promptly. The attach hooks let an object veto double-attachment.
pub trait Tick: Send + Sync {
    /// One unit of asynchronous work.
    fn tick(&self);

    /// Called when a worker adopts the object. Return `false` to refuse
    /// (e.g. the object is already attached elsewhere).
    fn on_attach(&self) -> bool {
        true
    }

    /// Called when a worker releases the object.
    fn on_detach(&self) {}
}

struct WorkerShared {
    objects: Mutex<Vec<Arc<dyn Tick>>>,
    stop: AtomicBool,
    running: AtomicBool,
    period_ms: AtomicU64,
}

/// A periodic scheduler for [`Tick`] objects.
///
/// The worker thread is not realtime: it may lock, sleep and allocate.
/// Start and stop are idempotent; dropping the worker stops the thread
/// and detaches every object.
pub struct AsyncWorker {
    shared: Arc<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

impl AsyncWorker {
    /// A stopped worker with the default period.
    pub fn new() -> Self {
        Self::with_period(DEFAULT_PERIOD_MS)
    }

    /// A stopped worker ticking every `period_ms` milliseconds.
    pub fn with_period(period_ms: u64) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                objects: Mutex::new(Vec::new()),
                stop: AtomicBool::new(false),
                running: AtomicBool::new(false),
                period_ms: AtomicU64::new(period_ms),
            }),
            thread: None,
        }
    }

    /// Attach an object; it will be ticked from the next iteration on.
    ///
    /// Fails if the object is already attached, to this worker or any
    /// other.
    pub fn attach(&self, object: Arc<dyn Tick>) -> JanusResult<()> {
        let mut objects = self.shared.objects.lock();
        if objects
            .iter()
            .any(|o| ptr::eq(Arc::as_ptr(o).cast::<()>(), Arc::as_ptr(&object).cast::<()>()))
        {
            return Err(JanusError::scheduling("object is already attached to this worker"));
        }
        if !object.on_attach() {
            return Err(JanusError::scheduling("object is already attached to a worker"));
        }
        objects.push(object);
        log::debug!("object attached ({} total)", objects.len());
        Ok(())
    }

    /// Detach an object. Returns `false` if it was not attached here.
    pub fn detach(&self, object: &dyn Tick) -> bool {
        let mut objects = self.shared.objects.lock();
        let target = (object as *const dyn Tick).cast::<()>();
        match objects
            .iter()
            .position(|o| ptr::eq(Arc::as_ptr(o).cast::<()>(), target))
        {
            Some(index) => {
                objects.remove(index).on_detach();
                log::debug!("object detached ({} remain)", objects.len());
                true
            }
            None => false,
        }
    }

    /// Spawn the worker thread. A no-op if it is already running.
    pub fn start(&mut self) -> JanusResult<()> {
        if self.shared.running.load(Ordering::Acquire) {
            return Ok(());
        }
        self.shared.stop.store(false, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("janus-worker".into())
            .spawn(move || worker_loop(&shared));
        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                log::debug!("worker started (period {}ms)", self.period());
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Stop and join the worker thread. A no-op if it is not running.
    ///
    /// Blocks for up to one period while the thread finishes its sleep.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::warn!("worker thread panicked");
            }
        }
        self.shared.running.store(false, Ordering::Release);
    }

    /// Whether the worker thread is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Change the tick period; takes effect on the next iteration.
    pub fn set_period(&self, period_ms: u64) {
        self.shared.period_ms.store(period_ms, Ordering::Release);
    }

    /// The current tick period in milliseconds.
    pub fn period(&self) -> u64 {
        self.shared.period_ms.load(Ordering::Acquire)
    }
}

fn worker_loop(shared: &WorkerShared) {
    loop {
        {
            let objects = shared.objects.lock();
            for object in objects.iter() {
                object.tick();
            }
        }
        if shared.stop.load(Ordering::Acquire) {
            return;
        }
        thread::sleep(Duration::from_millis(shared.period_ms.load(Ordering::Acquire)));
        if shared.stop.load(Ordering::Acquire) {
            return;
        }
    }
}

impl Default for AsyncWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AsyncWorker {
    fn drop(&mut self) {
        self.stop();
        let mut objects = self.shared.objects.lock();
        for object in objects.drain(..) {
            object.on_detach();
        }
    }
}
