//! Consumers of raw records and decoded messages.
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::prelude::*;

/// Accepts items one at a time, in the order they were delivered.
///
/// What a sink does with an item, e.g., write a file or a database row, is entirely up to the
/// implementation.
pub trait Sink<T>: Send {
    /// # Errors
    /// If the item could not be handled. The item is dropped and the sink keeps receiving.
    fn accept(&mut self, item: T) -> Result<()>;

    /// Called once after the last item.
    ///
    /// # Errors
    /// If buffered output could not be written.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: Send, S: Sink<T> + ?Sized> Sink<T> for Box<S> {
    fn accept(&mut self, item: T) -> Result<()> {
        (**self).accept(item)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Forwards to a channel, e.g., to hand items to code that is not a [Sink].
impl<T: Send> Sink<T> for Sender<T> {
    fn accept(&mut self, item: T) -> Result<()> {
        self.send(item)
            .map_err(|_| Error::Sink("channel receiver dropped".to_string()))
    }
}

/// Consume `items` on a new thread named `name`, handing each to `sink`.
///
/// The thread exits once every sender for `items` is dropped.
///
/// # Errors
/// If the thread cannot be spawned.
pub fn spawn_sink<T, S>(name: &str, items: Receiver<T>, mut sink: S) -> Result<JoinHandle<()>>
where
    T: Send + 'static,
    S: Sink<T> + 'static,
{
    let thread_name = name.to_string();
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut count = 0usize;
            let mut failed = 0usize;
            for item in items {
                count += 1;
                if let Err(err) = sink.accept(item) {
                    failed += 1;
                    warn!(sink = %thread_name, "failed to accept item: {err}");
                }
            }
            if let Err(err) = sink.flush() {
                warn!(sink = %thread_name, "failed to flush: {err}");
            }
            debug!(sink = %thread_name, count, failed, "sink thread exit");
        })?;
    Ok(handle)
}
