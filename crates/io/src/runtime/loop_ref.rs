use std::cell::Cell;
use std::fmt;

use super::Handle;

/// Keeps the loop alive while referenced, like a libuv handle that is active and ref'ed.
pub(crate) struct LoopRef {
    handle: Handle,
    referenced: Cell<bool>,
    released: Cell<bool>,
}

impl LoopRef {
    pub(crate) fn new(handle: &Handle) -> Self {
        handle.acquire();
        Self { handle: handle.clone(), referenced: Cell::new(true), released: Cell::new(false) }
    }

    pub(crate) fn ref_handle(&self) {
        if !self.released.get() && !self.referenced.replace(true) {
            self.handle.acquire();
        }
    }

    pub(crate) fn unref_handle(&self) {
        if !self.released.get() && self.referenced.replace(false) {
            self.handle.release();
        }
    }

    pub(crate) fn has_ref(&self) -> bool {
        !self.released.get() && self.referenced.get()
    }

    /// Drops the reference for good; later `ref_handle` calls are no-ops.
    pub(crate) fn release(&self) {
        self.unref_handle();
        self.released.set(true);
    }
}

impl Drop for LoopRef {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for LoopRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopRef").field("referenced", &self.has_ref()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EventLoop;

    #[test]
    fn ref_and_unref_are_balanced() {
        let event_loop = EventLoop::new().unwrap();
        let handle = event_loop.handle().clone();

        let loop_ref = LoopRef::new(&handle);
        assert_eq!(handle.active_handles(), 1);

        loop_ref.unref_handle();
        loop_ref.unref_handle();
        assert_eq!(handle.active_handles(), 0);

        loop_ref.ref_handle();
        loop_ref.ref_handle();
        assert_eq!(handle.active_handles(), 1);

        loop_ref.release();
        loop_ref.ref_handle();
        assert_eq!(handle.active_handles(), 0);
        assert!(!loop_ref.has_ref());
    }

    #[test]
    fn dropping_releases_the_reference() {
        let event_loop = EventLoop::new().unwrap();
        let handle = event_loop.handle().clone();
        {
            let _loop_ref = LoopRef::new(&handle);
            assert_eq!(handle.active_handles(), 1);
        }
        assert_eq!(handle.active_handles(), 0);
    }
}
