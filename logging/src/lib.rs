//! Buffered event logging shared by the chronoflow engine and its hosts.
//!
//! A [`Logger`] is a cheaply clonable handle that stamps events with the
//! elapsed time since a common origin, buffers them, and hands batches to a
//! boxed action. A [`Registry`] maps stream names to type-erased loggers so
//! that independent subsystems can publish differently typed event streams
//! without knowing about one another.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Default number of buffered events before a logger flushes on its own.
const DEFAULT_BUFFER: usize = 1024;

/// A name → typed logger map.
pub struct Registry {
    /// An instant common to all logging statements.
    time: Instant,
    /// A map from names to typed loggers.
    map: HashMap<String, Box<dyn Any>>,
}

impl Registry {
    /// Creates a new registry whose loggers all measure elapsed time from `time`.
    pub fn new(time: Instant) -> Self {
        Registry {
            time,
            map: HashMap::new(),
        }
    }

    /// Binds a stream name to an action on batches of log events.
    ///
    /// Returns any previously installed logger rather than silently
    /// re-pointing handles that were already given out: existing handles keep
    /// writing to the old destination, new `get` calls see the new one.
    pub fn insert<T: 'static, F>(&mut self, name: &str, action: F) -> Option<Box<dyn Any>>
    where
        F: Fn(&Duration, &[(Duration, T)]) + 'static,
    {
        let logger = Logger::<T>::new(self.time, Box::new(action));
        self.map.insert(name.to_owned(), Box::new(logger))
    }

    /// Removes a bound logger, closing the stream for new `get` calls.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Any>> {
        self.map.remove(name)
    }

    /// Retrieves a shared logger, if one of the right type has been inserted.
    pub fn get<T: 'static>(&self, name: &str) -> Option<Logger<T>> {
        self.map
            .get(name)
            .and_then(|entry| entry.downcast_ref::<Logger<T>>())
            .cloned()
    }
}

/// A buffering logger.
///
/// Events are stamped when logged but may be delivered later; the action sees
/// one stream of events with non-decreasing timestamps, plus a lower bound on
/// the timestamp of any event it could still see.
pub struct Logger<T> {
    time: Instant,
    action: Rc<dyn Fn(&Duration, &[(Duration, T)])>,
    buffer: Rc<RefCell<Vec<(Duration, T)>>>,
}

impl<T> Clone for Logger<T> {
    fn clone(&self) -> Self {
        Logger {
            time: self.time,
            action: Rc::clone(&self.action),
            buffer: Rc::clone(&self.buffer),
        }
    }
}

impl<T> Logger<T> {
    /// Allocates a new shareable logger bound to a write destination.
    pub fn new(time: Instant, action: Box<dyn Fn(&Duration, &[(Duration, T)])>) -> Self {
        Logger {
            time,
            action: action.into(),
            buffer: Rc::new(RefCell::new(Vec::with_capacity(DEFAULT_BUFFER))),
        }
    }

    /// Logs an event, flushing if the buffer has reached capacity.
    pub fn log(&self, event: T) {
        let mut buffer = self.buffer.borrow_mut();
        buffer.push((self.time.elapsed(), event));
        if buffer.len() >= buffer.capacity() {
            // Not `self.flush()`: the buffer is already borrowed.
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }

    /// Logs each event in an iterator, flushing at most once at the end.
    pub fn log_many<I: IntoIterator<Item = T>>(&self, events: I) {
        {
            let mut buffer = self.buffer.borrow_mut();
            for event in events {
                buffer.push((self.time.elapsed(), event));
            }
        }
        if self.buffer.borrow().len() >= DEFAULT_BUFFER {
            self.flush();
        }
    }

    /// Flushes buffered events and communicates the new minimal timestamp.
    pub fn flush(&self) {
        let buffer = self.buffer.borrow();
        (self.action)(&self.time.elapsed(), &buffer[..]);
        drop(buffer);
        self.buffer.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_round_trip() {
        let mut registry = Registry::new(Instant::now());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        registry.insert::<u64, _>("counts", move |_lower, batch| {
            seen2.borrow_mut().extend(batch.iter().map(|(_, e)| *e));
        });

        let logger = registry.get::<u64>("counts").expect("logger registered");
        logger.log(3);
        logger.log(4);
        logger.flush();
        assert_eq!(&*seen.borrow(), &[3, 4]);

        // Wrongly typed retrieval misses; removal closes the stream.
        assert!(registry.get::<String>("counts").is_none());
        assert!(registry.remove("counts").is_some());
        assert!(registry.get::<u64>("counts").is_none());
    }
}
