//! Ingestion sources producing [RawRecord]s from a UDP socket or a serial line.
mod lines;
mod serial;
mod udp;

pub use lines::*;
pub use serial::*;
pub use udp::*;

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::distributor::Distributor;
use crate::prelude::*;

/// One accepted line or datagram, exactly as received.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub received_at: DateTime<Utc>,
    /// Sender address, for sources that have one.
    pub source_address: Option<String>,
    pub source_port: Option<u16>,
    pub bytes: Vec<u8>,
}

impl RawRecord {
    /// Record with no sender information, as produced by a serial line.
    pub fn new(received_at: DateTime<Utc>, bytes: Vec<u8>) -> Self {
        RawRecord {
            received_at,
            source_address: None,
            source_port: None,
            bytes,
        }
    }

    pub fn with_sender(mut self, addr: SocketAddr) -> Self {
        self.source_address = Some(addr.ip().to_string());
        self.source_port = Some(addr.port());
        self
    }
}

impl Display for RawRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RawRecord{{t={}, addr={:?}, port={:?}, bytes={:?}}}",
            self.received_at,
            self.source_address,
            self.source_port,
            String::from_utf8_lossy(&self.bytes)
        )
    }
}

/// A physical ingestion channel.
pub trait Source: Send {
    /// Name used in logs and fatal error messages.
    fn name(&self) -> &str;

    /// Wait for data, then hand every complete record to `emit`.
    ///
    /// Should return, possibly without emitting anything, within a bounded time so the caller
    /// can stop reading.
    ///
    /// # Errors
    /// [Error::Eof] when the channel is gone for good. Any other error is treated as
    /// transient by [run_source].
    fn read_records(&mut self, emit: &mut dyn FnMut(RawRecord)) -> Result<()>;
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read_records(&mut self, emit: &mut dyn FnMut(RawRecord)) -> Result<()> {
        (**self).read_records(emit)
    }
}

/// Read from `source` while `running` is set, publishing each record to `distributor`.
///
/// Transient errors are logged and reading continues. Returns the fatal error the source
/// reported, or `None` once `running` is cleared.
pub fn run_source<S>(
    source: &mut S,
    distributor: &mut Distributor<RawRecord>,
    running: &AtomicBool,
) -> Option<Error>
where
    S: Source + ?Sized,
{
    debug!(source = source.name(), "starting");
    while running.load(Ordering::Relaxed) {
        let zult = source.read_records(&mut |record| {
            debug!(%record, "put");
            distributor.publish(record);
        });
        match zult {
            Ok(()) => {}
            Err(err) if err.is_fatal() => {
                error!(source = source.name(), "{err}");
                return Some(err);
            }
            Err(err) => warn!(source = source.name(), "while reading: {err}"),
        }
    }
    debug!(source = source.name(), "stopped");
    None
}
