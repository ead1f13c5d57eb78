use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::Event;

/// Identifies one registration, returned by [`EventEmitter::on`] and [`EventEmitter::once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Rc<dyn Fn(&E)>;

struct Registration<E: Event> {
    id: ListenerId,
    kind: E::Kind,
    once: bool,
    listener: Listener<E>,
}

/// Ordered listener registry for one event enum.
///
/// Emission works on a snapshot: listeners added or removed by a running listener only
/// affect later emissions. Listeners may emit recursively.
pub struct EventEmitter<E: Event> {
    registrations: RefCell<Vec<Registration<E>>>,
    next_id: Cell<u64>,
}

impl<E: Event> EventEmitter<E> {
    pub fn new() -> Self {
        Self { registrations: RefCell::new(Vec::new()), next_id: Cell::new(0) }
    }

    pub fn on<F>(&self, kind: E::Kind, listener: F) -> ListenerId
    where
        F: Fn(&E) + 'static,
    {
        self.register(kind, false, Rc::new(listener))
    }

    /// Registers a listener that is removed right before its first invocation.
    pub fn once<F>(&self, kind: E::Kind, listener: F) -> ListenerId
    where
        F: FnOnce(&E) + 'static,
    {
        let slot = Cell::new(Some(listener));
        self.register(
            kind,
            true,
            Rc::new(move |event: &E| {
                if let Some(listener) = slot.take() {
                    listener(event);
                }
            }),
        )
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut registrations = self.registrations.borrow_mut();
        let before = registrations.len();
        registrations.retain(|registration| registration.id != id);
        registrations.len() != before
    }

    /// Removes every listener for `kind`, or every listener at all when `kind` is `None`.
    pub fn remove_all_listeners(&self, kind: Option<E::Kind>) {
        let removed = {
            let mut registrations = self.registrations.borrow_mut();
            match kind {
                Some(kind) => {
                    let (removed, kept): (Vec<_>, Vec<_>) = registrations.drain(..).partition(|registration| registration.kind == kind);
                    *registrations = kept;
                    removed
                }
                None => std::mem::take(&mut *registrations),
            }
        };
        // closures may own the emitter's host, drop them outside the borrow
        drop(removed);
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.registrations.borrow().iter().filter(|registration| registration.kind == kind).count()
    }

    /// Dispatches `event` to its listeners in registration order; returns whether any ran.
    pub fn emit(&self, event: E) -> bool {
        let kind = event.kind();
        let snapshot: Vec<Listener<E>> = {
            let mut registrations = self.registrations.borrow_mut();
            let mut snapshot = Vec::new();
            registrations.retain(|registration| {
                if registration.kind != kind {
                    return true;
                }
                snapshot.push(Rc::clone(&registration.listener));
                !registration.once
            });
            snapshot
        };

        for listener in &snapshot {
            listener(&event);
        }
        !snapshot.is_empty()
    }

    fn register(&self, kind: E::Kind, once: bool, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.registrations.borrow_mut().push(Registration { id, kind, once, listener });
        id
    }
}

impl<E: Event> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registrations = self.registrations.borrow();
        f.debug_list().entries(registrations.iter().map(|registration| (registration.kind, registration.id))).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Sample {
        Ping(u32),
        Pong,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum SampleKind {
        Ping,
        Pong,
    }

    impl Event for Sample {
        type Kind = SampleKind;

        fn kind(&self) -> SampleKind {
            match self {
                Sample::Ping(_) => SampleKind::Ping,
                Sample::Pong => SampleKind::Pong,
            }
        }
    }

    #[test]
    fn emit_reports_whether_anyone_listened() {
        let emitter = EventEmitter::<Sample>::new();
        assert!(!emitter.emit(Sample::Pong));

        let seen = Rc::new(Cell::new(0));
        let counter = Rc::clone(&seen);
        emitter.on(SampleKind::Ping, move |event| {
            if let Sample::Ping(n) = event {
                counter.set(counter.get() + n);
            }
        });

        assert!(emitter.emit(Sample::Ping(2)));
        assert!(emitter.emit(Sample::Ping(3)));
        assert!(!emitter.emit(Sample::Pong));
        assert_eq!(seen.get(), 5);
    }

    #[test]
    fn once_listener_runs_a_single_time() {
        let emitter = EventEmitter::<Sample>::new();
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        emitter.once(SampleKind::Pong, move |_| counter.set(counter.get() + 1));

        assert_eq!(emitter.listener_count(SampleKind::Pong), 1);
        assert!(emitter.emit(Sample::Pong));
        assert!(!emitter.emit(Sample::Pong));
        assert_eq!(calls.get(), 1);
        assert_eq!(emitter.listener_count(SampleKind::Pong), 0);
    }

    #[test]
    fn listeners_added_during_emit_wait_for_the_next_emit() {
        let emitter = Rc::new(EventEmitter::<Sample>::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_emitter = Rc::clone(&emitter);
        let inner_log = Rc::clone(&log);
        emitter.once(SampleKind::Pong, move |_| {
            inner_log.borrow_mut().push("first");
            let late_log = Rc::clone(&inner_log);
            inner_emitter.on(SampleKind::Pong, move |_| late_log.borrow_mut().push("late"));
        });

        emitter.emit(Sample::Pong);
        assert_eq!(*log.borrow(), ["first"]);

        emitter.emit(Sample::Pong);
        assert_eq!(*log.borrow(), ["first", "late"]);
    }

    #[test]
    fn removed_listener_still_runs_in_the_current_emit() {
        let emitter = Rc::new(EventEmitter::<Sample>::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let second_id = Rc::new(Cell::new(None));
        let remover = Rc::clone(&emitter);
        let to_remove = Rc::clone(&second_id);
        let first_log = Rc::clone(&log);
        emitter.on(SampleKind::Pong, move |_| {
            first_log.borrow_mut().push("first");
            if let Some(id) = to_remove.get() {
                remover.remove_listener(id);
            }
        });
        let second_log = Rc::clone(&log);
        second_id.set(Some(emitter.on(SampleKind::Pong, move |_| second_log.borrow_mut().push("second"))));

        emitter.emit(Sample::Pong);
        emitter.emit(Sample::Pong);
        assert_eq!(*log.borrow(), ["first", "second", "first"]);
    }

    #[test]
    fn recursive_emit_is_allowed() {
        let emitter = Rc::new(EventEmitter::<Sample>::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let nested = Rc::clone(&emitter);
        let ping_log = Rc::clone(&log);
        emitter.on(SampleKind::Ping, move |event| {
            ping_log.borrow_mut().push(format!("{event:?}"));
            nested.emit(Sample::Pong);
        });
        let pong_log = Rc::clone(&log);
        emitter.on(SampleKind::Pong, move |_| pong_log.borrow_mut().push("pong".to_string()));

        emitter.emit(Sample::Ping(7));
        assert_eq!(*log.borrow(), ["Ping(7)", "pong"]);
    }

    #[test]
    fn remove_all_listeners_by_kind() {
        let emitter = EventEmitter::<Sample>::new();
        emitter.on(SampleKind::Ping, |_| {});
        emitter.on(SampleKind::Pong, |_| {});
        emitter.on(SampleKind::Pong, |_| {});

        emitter.remove_all_listeners(Some(SampleKind::Pong));
        assert_eq!(emitter.listener_count(SampleKind::Pong), 0);
        assert_eq!(emitter.listener_count(SampleKind::Ping), 1);

        emitter.remove_all_listeners(None);
        assert_eq!(emitter.listener_count(SampleKind::Ping), 0);
    }
}
