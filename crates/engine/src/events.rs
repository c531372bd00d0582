use std::cell::{Cell, RefCell};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Output,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Callback = Box<dyn FnMut(Stream, &str)>;

/// Output/error chunks emitted by an engine while a program runs.
///
/// Lives on the worker thread that owns the engine, so callbacks need not be
/// `Send`. Callbacks must not subscribe or unsubscribe from inside `emit`.
#[derive(Default)]
pub struct EventStream {
    subscribers: RefCell<Vec<(SubscriberId, Callback)>>,
    next_id: Cell<u64>,
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("subscribers", &self.subscribers.borrow().len())
            .finish()
    }
}

impl EventStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: FnMut(Stream, &str) + 'static,
    {
        let id = SubscriberId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscribers.borrow_mut().push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    pub fn emit(&self, stream: Stream, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        for (_, callback) in self.subscribers.borrow_mut().iter_mut() {
            callback(stream, chunk);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn chunks_arrive_in_emission_order() {
        let events = EventStream::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = events.subscribe(move |stream, chunk| {
            sink.borrow_mut().push((stream, chunk.to_string()));
        });

        events.emit(Stream::Output, "a");
        events.emit(Stream::Error, "b");
        events.emit(Stream::Output, "");
        assert!(events.unsubscribe(id));
        events.emit(Stream::Output, "dropped");

        assert_eq!(
            *seen.borrow(),
            vec![(Stream::Output, "a".to_string()), (Stream::Error, "b".to_string())]
        );
        assert!(!events.unsubscribe(id));
        assert_eq!(events.subscriber_count(), 0);
    }
}
