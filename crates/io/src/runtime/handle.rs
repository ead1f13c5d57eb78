use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::trace;

type Task = Box<dyn FnOnce()>;

thread_local! {
    static CURRENT: RefCell<Option<Handle>> = const { RefCell::new(None) };
}

pub(crate) struct Shared {
    ticks: RefCell<VecDeque<Task>>,
    wakeup: Notify,
    active_handles: Cell<usize>,
}

/// A cheap, clonable reference to a running [`EventLoop`](super::EventLoop).
///
/// Sockets and servers capture the handle of the loop they were created on, so every
/// completion they schedule lands back on that loop.
#[derive(Clone)]
pub struct Handle {
    shared: Rc<Shared>,
}

impl Handle {
    pub(crate) fn new() -> Self {
        Self {
            shared: Rc::new(Shared { ticks: RefCell::new(VecDeque::new()), wakeup: Notify::new(), active_handles: Cell::new(0) }),
        }
    }

    /// Returns the handle of the loop running on this thread.
    ///
    /// # Panics
    ///
    /// Panics when no [`EventLoop`](super::EventLoop) is running on this thread.
    pub fn current() -> Self {
        match Self::try_current() {
            Some(handle) => handle,
            None => panic!("there is no event loop running on this thread, call EventLoop::run first"),
        }
    }

    pub fn try_current() -> Option<Self> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Queues `task` to run on a later loop iteration.
    ///
    /// Tasks run in submission order and never inside the call that queued them.
    pub fn next_tick<F>(&self, task: F)
    where
        F: FnOnce() + 'static,
    {
        self.shared.ticks.borrow_mut().push_back(Box::new(task));
        self.shared.wakeup.notify_one();
    }

    /// Number of handles currently keeping the loop alive.
    pub fn active_handles(&self) -> usize {
        self.shared.active_handles.get()
    }

    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        tokio::task::spawn_local(future)
    }

    pub(crate) fn acquire(&self) {
        self.shared.active_handles.set(self.shared.active_handles.get() + 1);
    }

    pub(crate) fn release(&self) {
        let active = self.shared.active_handles.get().saturating_sub(1);
        self.shared.active_handles.set(active);
        // the driver may be parked waiting for the last handle
        self.shared.wakeup.notify_one();
    }

    pub(crate) fn enter(&self) -> EnterGuard {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(self.clone()));
        EnterGuard { previous }
    }

    fn is_idle(&self) -> bool {
        self.shared.ticks.borrow().is_empty() && self.shared.active_handles.get() == 0
    }

    /// Runs the batch of tasks queued before this call; returns whether more work was queued meanwhile.
    fn run_ticks(&self) -> bool {
        let batch = std::mem::take(&mut *self.shared.ticks.borrow_mut());
        if !batch.is_empty() {
            trace!(tasks = batch.len(), "run deferred tasks");
        }
        for task in batch {
            task();
        }
        !self.shared.ticks.borrow().is_empty()
    }

    pub(crate) async fn drive(&self) {
        loop {
            if self.run_ticks() {
                // let reactor tasks make progress between two batches
                tokio::task::yield_now().await;
                continue;
            }

            if self.is_idle() {
                trace!("event loop is idle");
                return;
            }

            self.shared.wakeup.notified().await;
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("pending_ticks", &self.shared.ticks.borrow().len())
            .field("active_handles", &self.shared.active_handles.get())
            .finish()
    }
}

pub(crate) struct EnterGuard {
    previous: Option<Handle>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}
