//! Wiring of a source, the decoder stage, and sinks into threads connected by queues.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::TimeDelta;
use crossbeam::channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info};

use crate::codec::{AisCodec, DecodedMessage};
use crate::decoder::{MessageDecoder, Summary};
use crate::distributor::{Distributor, QueuePolicy};
use crate::prelude::*;
use crate::reassembly::Keying;
use crate::sink::{spawn_sink, Sink};
use crate::source::{run_source, RawRecord, Source};

/// Signals the single fatal cause that ends a pipeline. Only the first signal is kept.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: Sender<Error>,
}

impl SupervisorHandle {
    pub fn signal(&self, err: Error) {
        if self.tx.try_send(err).is_err() {
            debug!("supervisor already signaled");
        }
    }
}

/// Waits for the fatal cause.
pub struct Supervisor {
    rx: Receiver<Error>,
}

impl Supervisor {
    pub fn pair() -> (Self, SupervisorHandle) {
        let (tx, rx) = bounded(1);
        (Supervisor { rx }, SupervisorHandle { tx })
    }

    /// Block until a cause is signaled. If every handle is dropped without a signal, e.g.,
    /// because the signaling thread panicked, the cause is [Error::Disconnected].
    pub fn wait(self) -> Error {
        self.rx.recv().unwrap_or(Error::Disconnected)
    }
}

/// Signals [Error::ThreadExited] if the owning thread unwinds.
struct PanicGuard {
    thread_name: &'static str,
    handle: SupervisorHandle,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(thread = self.thread_name, "thread panicked");
            self.handle
                .signal(Error::ThreadExited(self.thread_name.to_string()));
        }
    }
}

/// Outcome of [Pipeline::run].
#[derive(Debug)]
pub struct Shutdown {
    pub cause: Error,
    pub summary: Summary,
}

/// Builder for a complete ingestion process.
///
/// A running pipeline has one thread reading the source, one thread parsing, reassembling, and
/// decoding, and one thread per sink. Raw records are broadcast to the decoder and every raw sink,
/// decoded messages to every message sink. A slow sink never blocks the reader.
///
/// # Example
/// ```no_run
/// use aischomp::{DecodedMessage, Pipeline, UdpSource};
/// use crossbeam::channel::unbounded;
///
/// let (tx, _rx) = unbounded::<DecodedMessage>();
/// let source = UdpSource::bind("0.0.0.0:4001").unwrap();
/// let shutdown = Pipeline::new()
///     .with_message_sink("printer", Box::new(tx))
///     .run(source)
///     .unwrap();
/// eprintln!("stopped: {}", shutdown.cause);
/// ```
pub struct Pipeline {
    decoder: MessageDecoder,
    queue_policy: QueuePolicy,
    raw_sinks: Vec<(String, Box<dyn Sink<RawRecord>>)>,
    message_sinks: Vec<(String, Box<dyn Sink<DecodedMessage>>)>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline {
            decoder: MessageDecoder::new(),
            queue_policy: QueuePolicy::default(),
            raw_sinks: Vec::default(),
            message_sinks: Vec::default(),
        }
    }

    pub fn with_codec(mut self, codec: Box<dyn AisCodec>) -> Self {
        self.decoder = self.decoder.with_codec(codec);
        self
    }

    pub fn with_ttl(mut self, ttl: TimeDelta) -> Self {
        self.decoder = self.decoder.with_ttl(ttl);
        self
    }

    pub fn with_keying(mut self, keying: Keying) -> Self {
        self.decoder = self.decoder.with_keying(keying);
        self
    }

    /// Policy for every queue between threads.
    pub fn with_queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }

    /// Add a sink receiving every raw record, in arrival order.
    pub fn with_raw_sink(mut self, name: &str, sink: Box<dyn Sink<RawRecord>>) -> Self {
        self.raw_sinks.push((name.to_string(), sink));
        self
    }

    /// Add a sink receiving every decoded message.
    pub fn with_message_sink(mut self, name: &str, sink: Box<dyn Sink<DecodedMessage>>) -> Self {
        self.message_sinks.push((name.to_string(), sink));
        self
    }

    /// Start all threads and block until a fatal error ends the source or the reader or decoder
    /// thread panics.
    ///
    /// On the fatal cause the reader stops; the decoder drains what was already read and exits,
    /// then every sink drains its queue. All threads are joined before returning.
    ///
    /// # Errors
    /// If a thread cannot be spawned.
    pub fn run<S>(self, source: S) -> Result<Shutdown>
    where
        S: Source + 'static,
    {
        let (supervisor, handle) = Supervisor::pair();
        let running = Arc::new(AtomicBool::new(true));
        let mut sinks: Vec<(String, JoinHandle<()>)> = Vec::default();

        let mut raw = Distributor::default();
        let decoder_rx = raw.register("decoder", self.queue_policy);
        for (name, sink) in self.raw_sinks {
            let rx = raw.register(&name, self.queue_policy);
            sinks.push((name.clone(), spawn_sink(&name, rx, sink)?));
        }

        let mut messages = Distributor::default();
        for (name, sink) in self.message_sinks {
            let rx = messages.register(&name, self.queue_policy);
            sinks.push((name.clone(), spawn_sink(&name, rx, sink)?));
        }

        let mut decoder = self.decoder;
        let decoder_guard = PanicGuard {
            thread_name: "decoder",
            handle: handle.clone(),
        };
        let decoder_handle = thread::Builder::new()
            .name("decoder".into())
            .spawn(move || {
                let _guard = decoder_guard;
                for record in decoder_rx {
                    if let Some(msg) = decoder.process(&record) {
                        messages.publish(msg);
                    }
                }
                debug!("decoder thread exit");
                decoder.into_summary()
            })?;

        let reader_running = Arc::clone(&running);
        let reader_guard = PanicGuard {
            thread_name: "reader",
            handle,
        };
        let reader_handle = thread::Builder::new()
            .name("reader".into())
            .spawn(move || {
                let guard = reader_guard;
                let mut source = source;
                let mut raw = raw;
                if let Some(err) = run_source(&mut source, &mut raw, &reader_running) {
                    guard.handle.signal(err);
                }
                debug!("reader thread exit");
            })?;

        let cause = supervisor.wait();
        info!("shutting down: {cause}");
        running.store(false, Ordering::Relaxed);

        if reader_handle.join().is_err() {
            error!("reader thread panicked");
        }
        let summary = match decoder_handle.join() {
            Ok(summary) => summary,
            Err(_) => {
                error!("decoder thread panicked");
                Summary::default()
            }
        };
        for (name, sink) in sinks {
            if sink.join().is_err() {
                error!(sink = %name, "sink thread panicked");
            }
        }
        info!(?summary, "shutdown complete");

        Ok(Shutdown { cause, summary })
    }
}
