use std::io::{ErrorKind, Read};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, SerialPort, StopBits};
use tracing::{info, trace};

use super::{LineBuffer, RawRecord, Source};
use crate::error::is_link_gone;
use crate::prelude::*;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial line settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SerialConfig {
    pub device: String,
    pub baud_rate: u32,
    /// Bits per character, 5 through 8.
    pub data_bits: u8,
    pub parity: Parity,
    /// 1 or 2
    pub stop_bits: u8,
    /// How long a single readiness wait may block before the read loop goes around again.
    pub read_timeout: Duration,
}

impl SerialConfig {
    pub const DEFAULT_BAUD_RATE: u32 = 115_200;

    pub fn new(device: &str) -> Self {
        SerialConfig {
            device: device.to_string(),
            baud_rate: Self::DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            read_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: u8) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn data_bits(&self) -> Result<DataBits> {
        match self.data_bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            n => Err(Error::Config(format!("unsupported data bits {n}"))),
        }
    }

    fn stop_bits(&self) -> Result<StopBits> {
        match self.stop_bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            n => Err(Error::Config(format!("unsupported stop bits {n}"))),
        }
    }

    fn parity(&self) -> serialport::Parity {
        match self.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }

    /// Open the configured device.
    ///
    /// # Errors
    /// If the settings are not supported or the device cannot be opened.
    pub fn open(&self) -> Result<SerialSource<Box<dyn SerialPort>>> {
        let port = serialport::new(&self.device, self.baud_rate)
            .data_bits(self.data_bits()?)
            .parity(self.parity())
            .stop_bits(self.stop_bits()?)
            .flow_control(FlowControl::None)
            .timeout(self.read_timeout)
            .open()?;
        info!(config = ?self, "opened serial device");
        Ok(SerialSource::new(&self.device, port))
    }
}

/// Reads a byte stream and produces one [RawRecord] per terminated line.
///
/// Reads block until the reader has data available (for a serial port this is a poll on the
/// device with the configured timeout). Every read takes all currently available bytes, up to
/// [SerialSource::READ_SIZE].
pub struct SerialSource<R>
where
    R: Read + Send,
{
    name: String,
    reader: R,
    lines: LineBuffer,
    chunk: Vec<u8>,
}

impl<R> SerialSource<R>
where
    R: Read + Send,
{
    pub const READ_SIZE: usize = 65536;

    /// Wrap any byte reader. `name` identifies the device in logs and errors.
    pub fn new(name: &str, reader: R) -> Self {
        SerialSource {
            name: name.to_string(),
            reader,
            lines: LineBuffer::new(),
            chunk: vec![0u8; Self::READ_SIZE],
        }
    }

    pub fn with_line_buffer(mut self, lines: LineBuffer) -> Self {
        self.lines = lines;
        self
    }

    fn eof(&self) -> Error {
        Error::Eof {
            source_name: self.name.clone(),
        }
    }
}

impl<R> Source for SerialSource<R>
where
    R: Read + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn read_records(&mut self, emit: &mut dyn FnMut(RawRecord)) -> Result<()> {
        let num = match self.reader.read(&mut self.chunk) {
            Ok(0) => return Err(self.eof()),
            Ok(num) => num,
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                trace!(source = %self.name, "no data");
                return Ok(());
            }
            Err(err) if is_link_gone(err.kind()) => return Err(self.eof()),
            Err(err) => return Err(Error::Io(err)),
        };

        let received_at = Utc::now();
        for line in self.lines.extend(&self.chunk[..num]) {
            emit(RawRecord::new(received_at, line));
        }
        Ok(())
    }
}
