//! Raw record to decoded message processing, i.e., parsing, reassembly, and codec, run as a
//! single stage.
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::{AisCodec, DecodedMessage, EnvelopeCodec};
use crate::reassembly::{CompletedPayload, FragmentReassembler, Keying};
use crate::sentence::parse_sentence;
use crate::source::RawRecord;
use crate::Error;

/// Counts of everything that happened while processing records.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub records: usize,
    /// Recognized AIVDM/AIVDO sentences with a valid checksum.
    pub sentences: usize,
    pub ignored: usize,
    pub unrecognized: usize,
    pub checksum_mismatches: usize,
    pub malformed: usize,
    pub single_fragment: usize,
    pub multipart_completed: usize,
    /// Partial messages dropped after their time-to-live.
    pub evicted: usize,
    pub decoded: usize,
    pub decode_failures: usize,
}

impl Summary {
    /// Payloads completed, single fragment or multipart.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.single_fragment + self.multipart_completed
    }

    /// Every recoverable condition that was logged as a warning.
    #[must_use]
    pub fn warnings(&self) -> usize {
        self.unrecognized
            + self.checksum_mismatches
            + self.malformed
            + self.evicted
            + self.decode_failures
    }
}

/// Parses raw records, reassembles multipart messages, and decodes completed payloads.
///
/// Every failure is handled here: it is logged, counted in the [Summary], and the record is
/// dropped. Nothing is returned to the caller but successfully decoded messages.
pub struct MessageDecoder {
    reassembler: FragmentReassembler,
    codec: Box<dyn AisCodec>,
    summary: Summary,
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageDecoder {
    pub fn new() -> Self {
        MessageDecoder {
            reassembler: FragmentReassembler::new(),
            codec: Box::new(EnvelopeCodec),
            summary: Summary::default(),
        }
    }

    pub fn with_codec(mut self, codec: Box<dyn AisCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Time-to-live for partial multipart messages.
    pub fn with_ttl(mut self, ttl: TimeDelta) -> Self {
        self.reassembler = self.reassembler.with_ttl(ttl);
        self
    }

    pub fn with_keying(mut self, keying: Keying) -> Self {
        self.reassembler = self.reassembler.with_keying(keying);
        self
    }

    /// Process a record, using the current time for partial message eviction.
    pub fn process(&mut self, record: &RawRecord) -> Option<DecodedMessage> {
        self.process_at(record, Utc::now())
    }

    pub fn process_at(&mut self, record: &RawRecord, now: DateTime<Utc>) -> Option<DecodedMessage> {
        let completed = self.complete_at(record, now)?;
        match self
            .codec
            .decode(&completed.armored_payload, completed.fill_bits)
        {
            Ok(fields) => {
                self.summary.decoded += 1;
                Some(DecodedMessage {
                    received_at: completed.received_at,
                    fields,
                })
            }
            Err(err) => {
                self.summary.decode_failures += 1;
                warn!(payload = %completed.armored_payload, "decode failed: {err}");
                None
            }
        }
    }

    /// Parse and reassemble without decoding. Returns a payload when `record` completes a message.
    pub fn complete_at(
        &mut self,
        record: &RawRecord,
        now: DateTime<Utc>,
    ) -> Option<CompletedPayload> {
        self.summary.records += 1;

        let sentence = match parse_sentence(&record.bytes, record.received_at) {
            Ok(Some(sentence)) => sentence,
            Ok(None) => {
                self.summary.ignored += 1;
                debug!(%record, "ignored");
                return None;
            }
            Err(err) => {
                match err {
                    Error::ChecksumMismatch { .. } => self.summary.checksum_mismatches += 1,
                    Error::Malformed(_) => self.summary.malformed += 1,
                    _ => self.summary.unrecognized += 1,
                }
                let line = String::from_utf8_lossy(&record.bytes);
                warn!(addr = ?record.source_address, line = %line.trim(), "{err}");
                return None;
            }
        };
        self.summary.sentences += 1;

        let multipart = sentence.total_fragments > 1;
        let evicted_before = self.reassembler.evicted();
        let completed = self.reassembler.push_at(sentence, now);
        self.summary.evicted += self.reassembler.evicted() - evicted_before;

        let completed = completed?;
        if multipart {
            self.summary.multipart_completed += 1;
        } else {
            self.summary.single_fragment += 1;
        }
        Some(completed)
    }

    /// Evict expired partial messages without processing a record.
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let num = self.reassembler.expire(now);
        self.summary.evicted += num;
        num
    }

    /// Partial messages currently waiting for fragments.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.reassembler.len()
    }

    #[must_use]
    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    /// Consume the decoder, returning its final summary.
    #[must_use]
    pub fn into_summary(self) -> Summary {
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use crate::sentence::checksum;
    use serde_json::{Map, Value};
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    fn record(body: &str, t: DateTime<Utc>) -> RawRecord {
        let line = format!("!{body}*{:02X}", checksum(body.as_bytes()));
        RawRecord::new(t, line.into_bytes())
    }

    struct Failing;

    impl AisCodec for Failing {
        fn decode(&self, _: &str, _: u8) -> std::result::Result<Map<String, Value>, CodecError> {
            Err(CodecError::FillBits(9))
        }
    }

    #[test]
    fn decodes_single_fragment() {
        let t = Utc::now();
        let mut decoder = MessageDecoder::new();

        let msg = decoder
            .process_at(
                &record("AIVDM,1,1,,A,15NPOOPP00o?b=bE`UNv4?w428D?,0", t),
                t,
            )
            .unwrap();

        assert_eq!(msg.received_at, t);
        assert_eq!(msg.mmsi(), Some(367_533_950));
        let summary = decoder.summary();
        assert_eq!(summary.records, 1);
        assert_eq!(summary.single_fragment, 1);
        assert_eq!(summary.decoded, 1);
        assert_eq!(summary.warnings(), 0);
    }

    #[test]
    fn failures_are_counted_not_returned() {
        let t = Utc::now();
        let mut decoder = MessageDecoder::new();

        let lines: Vec<RawRecord> = vec![
            RawRecord::new(t, b"$GPGGA,1*00".to_vec()),
            RawRecord::new(t, b"!AIVDM,1,1,,A,15NP,0*7A".to_vec()),
            RawRecord::new(t, b"$AITXT,01,01,91,FREQ*00".to_vec()),
            record("AIVDM,3,4,1,A,AB,0", t),
            // Too short for the envelope
            record("AIVDM,1,1,,A,15NP,0", t),
        ];
        for line in &lines {
            assert!(decoder.process_at(line, t).is_none());
        }

        let summary = decoder.summary();
        assert_eq!(summary.records, 5);
        assert_eq!(summary.unrecognized, 1);
        assert_eq!(summary.checksum_mismatches, 1);
        assert_eq!(summary.ignored, 1);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.sentences, 1);
        assert_eq!(summary.single_fragment, 1);
        assert_eq!(summary.decode_failures, 1);
        assert_eq!(summary.warnings(), 4);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn rejected_sentence_is_logged() {
        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let t = Utc::now();
        tracing::subscriber::with_default(subscriber, || {
            let mut decoder = MessageDecoder::new();
            let record = RawRecord::new(t, b"!AIVDM,1,1,,A,15NP,0*7A\r".to_vec());
            assert!(decoder.process_at(&record, t).is_none());
        });

        let logs = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("line=!AIVDM,1,1,,A,15NP,0*7A"), "{logs}");
    }

    #[test]
    fn multipart_and_eviction_counts() {
        let t0 = Utc::now();
        let t1 = t0 + TimeDelta::seconds(1);
        let t2 = t0 + TimeDelta::seconds(100);
        let mut decoder = MessageDecoder::new().with_codec(Box::new(Failing));

        assert!(decoder.complete_at(&record("AIVDM,2,1,3,A,AB,0", t0), t0).is_none());
        let completed = decoder
            .complete_at(&record("AIVDM,2,2,3,A,CD,0", t1), t1)
            .unwrap();
        assert_eq!(completed.armored_payload, "ABCD");
        assert_eq!(completed.received_at, t0);

        decoder.complete_at(&record("AIVDM,2,1,4,A,AB,0", t1), t1);
        assert_eq!(decoder.pending(), 1);
        assert_eq!(decoder.expire(t2), 1);

        let summary = decoder.into_summary();
        assert_eq!(summary.multipart_completed, 1);
        assert_eq!(summary.evicted, 1);
        assert_eq!(summary.completed(), 1);
    }

    #[test]
    fn codec_failure_is_counted() {
        let t = Utc::now();
        let mut decoder = MessageDecoder::new().with_codec(Box::new(Failing));

        assert!(decoder
            .process_at(&record("AIVDM,1,1,,B,H,0", t), t)
            .is_none());
        assert_eq!(decoder.summary().decode_failures, 1);
    }
}
