//! The single threaded event loop and its deferred task queue.
//!
//! Every callback this crate hands to application code runs on the thread that called
//! [`EventLoop::run`]. Reactor completions are driven by tokio tasks spawned on a
//! [`tokio::task::LocalSet`], while "next tick" work is kept in an explicit FIFO queue that
//! the loop drains once per iteration.
//!
//! # Example
//!
//! ```
//! use micro_io::runtime::{next_tick, EventLoop};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let event_loop = EventLoop::new().unwrap();
//! let order = Rc::new(RefCell::new(Vec::new()));
//!
//! let seen = Rc::clone(&order);
//! event_loop.run(move || {
//!     let first = Rc::clone(&seen);
//!     next_tick(move || first.borrow_mut().push("a"));
//!     let second = Rc::clone(&seen);
//!     next_tick(move || second.borrow_mut().push("b"));
//!     seen.borrow_mut().push("setup");
//! });
//!
//! assert_eq!(*order.borrow(), ["setup", "a", "b"]);
//! ```

mod event_loop;
mod handle;
mod loop_ref;

pub use event_loop::EventLoop;
pub use handle::Handle;
pub(crate) use loop_ref::LoopRef;

/// Schedules `task` on the loop driving the current thread.
///
/// # Panics
///
/// Panics when called outside of [`EventLoop::run`].
pub fn next_tick<F>(task: F)
where
    F: FnOnce() + 'static,
{
    Handle::current().next_tick(task);
}
