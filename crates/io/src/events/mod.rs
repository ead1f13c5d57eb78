//! Typed publish/subscribe used by every component of the crate.
//!
//! Each component declares one payload enum implementing [`Event`] and a matching `Copy`
//! kind enum used as the subscription key. Listeners receive the payload by reference.

mod emitter;

pub use emitter::{EventEmitter, ListenerId};

use std::fmt;

/// A payload that can be dispatched through an [`EventEmitter`].
pub trait Event: 'static {
    type Kind: Copy + Eq + fmt::Debug + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Anything that embeds an [`EventEmitter`] and lets callers subscribe to it.
pub trait EventSource {
    type Event: Event;

    fn emitter(&self) -> &EventEmitter<Self::Event>;

    fn on<F>(&self, kind: <Self::Event as Event>::Kind, listener: F) -> ListenerId
    where
        F: Fn(&Self::Event) + 'static,
    {
        self.emitter().on(kind, listener)
    }

    fn once<F>(&self, kind: <Self::Event as Event>::Kind, listener: F) -> ListenerId
    where
        F: FnOnce(&Self::Event) + 'static,
    {
        self.emitter().once(kind, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.emitter().remove_listener(id)
    }

    fn listener_count(&self, kind: <Self::Event as Event>::Kind) -> usize {
        self.emitter().listener_count(kind)
    }
}
