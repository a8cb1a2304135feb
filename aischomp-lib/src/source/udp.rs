use std::io::ErrorKind;
use std::net::{ToSocketAddrs, UdpSocket};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, trace};

use super::{RawRecord, Source};
use crate::prelude::*;

/// Receives whole datagrams from a bound UDP socket, one [RawRecord] per datagram.
pub struct UdpSource {
    name: String,
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpSource {
    /// Receive buffer size. Generous upper limit for an NMEA sentence; longer datagrams are
    /// truncated by the OS.
    pub const DEFAULT_BUFFER_SIZE: usize = 20 * 85;

    /// Longest a single read blocks, so the reading thread can notice a shutdown.
    pub const READ_TIMEOUT: Duration = Duration::from_millis(250);

    /// Bind a socket to `addr`.
    ///
    /// # Errors
    /// If the socket cannot be bound.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        Self::from_socket(socket)
    }

    /// Use an already bound socket. Its read timeout is set to [Self::READ_TIMEOUT].
    ///
    /// # Errors
    /// If the read timeout cannot be set.
    pub fn from_socket(socket: UdpSocket) -> Result<Self> {
        socket.set_read_timeout(Some(Self::READ_TIMEOUT))?;
        let name = match socket.local_addr() {
            Ok(addr) => format!("udp:{addr}"),
            Err(_) => "udp".to_string(),
        };
        info!(%name, size = Self::DEFAULT_BUFFER_SIZE, "listening");
        Ok(UdpSource {
            name,
            socket,
            buf: vec![0u8; Self::DEFAULT_BUFFER_SIZE],
        })
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buf = vec![0u8; size];
        self
    }

    /// Local address of the bound socket.
    ///
    /// # Errors
    /// If the address cannot be retrieved from the OS.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl Source for UdpSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_records(&mut self, emit: &mut dyn FnMut(RawRecord)) -> Result<()> {
        let (num, sender) = match self.socket.recv_from(&mut self.buf) {
            Ok(zult) => zult,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                trace!(source = %self.name, "no datagram within timeout");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let record = RawRecord::new(Utc::now(), self.buf[..num].to_vec()).with_sender(sender);
        emit(record);
        Ok(())
    }
}
