use std::fmt;
use std::io;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::task::LocalSet;
use tracing::warn;

use super::Handle;

/// Owns the tokio runtime backing one single threaded loop.
pub struct EventLoop {
    runtime: Runtime,
    handle: Handle,
}

impl EventLoop {
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { runtime, handle: Handle::new() })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Runs `setup` inside the loop, then keeps iterating until no deferred task is queued
    /// and no referenced handle is left.
    pub fn run<F>(&self, setup: F)
    where
        F: FnOnce(),
    {
        let local = LocalSet::new();
        let handle = self.handle.clone();
        local.block_on(&self.runtime, async move {
            let _guard = handle.enter();
            setup();
            handle.drive().await;
        });
    }

    /// Like [`run`](Self::run), but gives up after `timeout`.
    ///
    /// Returns `true` when the loop ran out of work before the deadline.
    pub fn run_for<F>(&self, timeout: Duration, setup: F) -> bool
    where
        F: FnOnce(),
    {
        let local = LocalSet::new();
        let handle = self.handle.clone();
        local.block_on(&self.runtime, async move {
            let _guard = handle.enter();
            setup();
            match tokio::time::timeout(timeout, handle.drive()).await {
                Ok(()) => true,
                Err(_) => {
                    warn!(?timeout, active_handles = handle.active_handles(), "event loop did not drain in time");
                    false
                }
            }
        })
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop").field("handle", &self.handle).finish_non_exhaustive()
    }
}
