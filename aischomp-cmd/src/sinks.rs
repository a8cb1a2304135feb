use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use aischomp::{DecodedMessage, RawRecord, Sink};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// Seconds since the Unix epoch with microsecond resolution.
fn epoch_secs(t: &DateTime<Utc>) -> String {
    format!("{}.{:06}", t.timestamp(), t.timestamp_subsec_micros())
}

/// Open `path` for appending, writing `header` first if the file does not exist yet.
fn open_csv(path: &Path, header: &str) -> Result<BufWriter<File>> {
    let exists = path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {path:?}"))?;
    let mut writer = BufWriter::new(file);
    if !exists {
        writeln!(writer, "{header}").with_context(|| format!("writing header to {path:?}"))?;
        writer.flush()?;
        info!("created {path:?}");
    }
    Ok(writer)
}

/// Raw records as `t,ipAddr,port,body` rows.
pub struct RawCsv {
    writer: BufWriter<File>,
}

impl RawCsv {
    pub const HEADER: &'static str = "t,ipAddr,port,body";

    pub fn create(path: &Path) -> Result<Self> {
        Ok(RawCsv {
            writer: open_csv(path, Self::HEADER)?,
        })
    }
}

impl Sink<RawRecord> for RawCsv {
    fn accept(&mut self, record: RawRecord) -> aischomp::Result<()> {
        let body = String::from_utf8_lossy(&record.bytes);
        writeln!(
            self.writer,
            "{},{},{},'{}'",
            epoch_secs(&record.received_at),
            record.source_address.unwrap_or_default(),
            record.source_port.map(|p| p.to_string()).unwrap_or_default(),
            body.trim()
        )?;
        // Each row is flushed so a killed process loses nothing already received
        self.writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> aischomp::Result<()> {
        Ok(self.writer.flush()?)
    }
}

/// Decoded messages as `t,mmsi,msg_type,payload` rows.
pub struct DecodedCsv {
    writer: BufWriter<File>,
}

impl DecodedCsv {
    pub const HEADER: &'static str = "t,mmsi,msg_type,payload";

    pub fn create(path: &Path) -> Result<Self> {
        Ok(DecodedCsv {
            writer: open_csv(path, Self::HEADER)?,
        })
    }
}

impl Sink<DecodedMessage> for DecodedCsv {
    fn accept(&mut self, msg: DecodedMessage) -> aischomp::Result<()> {
        writeln!(
            self.writer,
            "{},{},{},{}",
            epoch_secs(&msg.received_at),
            msg.mmsi().map(|v| v.to_string()).unwrap_or_default(),
            msg.msg_type().map(|v| v.to_string()).unwrap_or_default(),
            msg.get("payload").and_then(|v| v.as_str()).unwrap_or_default(),
        )?;
        self.writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> aischomp::Result<()> {
        Ok(self.writer.flush()?)
    }
}

/// One JSON document per line.
pub struct JsonLines<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLines<W> {
    pub fn new(writer: W) -> Self {
        JsonLines { writer }
    }
}

impl<T: Serialize, W: Write + Send> Sink<T> for JsonLines<W> {
    fn accept(&mut self, item: T) -> aischomp::Result<()> {
        serde_json::to_writer(&mut self.writer, &item)
            .map_err(|err| aischomp::Error::Sink(format!("serializing to json: {err}")))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> aischomp::Result<()> {
        Ok(self.writer.flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aischomp::{AisCodec, EnvelopeCodec};

    fn message() -> DecodedMessage {
        DecodedMessage {
            received_at: DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap(),
            fields: EnvelopeCodec
                .decode("15NPOOPP00o?b=bE`UNv4?w428D?", 0)
                .unwrap(),
        }
    }

    #[test]
    fn raw_csv_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        let t = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let mut sink = RawCsv::create(&path).unwrap();
        sink.accept(
            RawRecord::new(t, b"!AIVDM,1,1,,A,AB,0*00\r\n".to_vec())
                .with_sender("10.1.2.3:4001".parse().unwrap()),
        )
        .unwrap();
        drop(sink);
        let mut sink = RawCsv::create(&path).unwrap();
        sink.accept(RawRecord::new(t, b"$GPGGA".to_vec())).unwrap();
        drop(sink);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "t,ipAddr,port,body\n\
             1700000000.000000,10.1.2.3,4001,'!AIVDM,1,1,,A,AB,0*00'\n\
             1700000000.000000,,,'$GPGGA'\n"
        );
    }

    #[test]
    fn decoded_csv_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ais.csv");

        let mut sink = DecodedCsv::create(&path).unwrap();
        sink.accept(message()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "t,mmsi,msg_type,payload\n\
             1700000000.250000,367533950,1,15NPOOPP00o?b=bE`UNv4?w428D?\n"
        );
    }

    #[test]
    fn json_lines() {
        let mut sink = JsonLines::new(Vec::new());
        Sink::<DecodedMessage>::accept(&mut sink, message()).unwrap();
        Sink::<DecodedMessage>::accept(&mut sink, message()).unwrap();

        let text = String::from_utf8(sink.writer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["mmsi"], 367_533_950);
        assert_eq!(value["received_at"], "2023-11-14T22:13:20.250Z");
    }
}
