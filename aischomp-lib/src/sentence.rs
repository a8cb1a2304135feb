//! Recognition and validation of AIS NMEA sentences.
//!
//! Only `!AIVDM`/`!AIVDO` encapsulation sentences are parsed. A small set of proprietary and
//! receiver status sentences commonly interleaved with them are recognized as ignorable; anything
//! else is an error.
use std::fmt::Display;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// Talker and formatter of an AIS encapsulation sentence.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Talker {
    /// Reports received from other vessels
    Aivdm,
    /// Own vessel reports
    Aivdo,
}

impl Display for Talker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Talker::Aivdm => write!(f, "AIVDM"),
            Talker::Aivdo => write!(f, "AIVDO"),
        }
    }
}

/// A validated AIS encapsulation sentence.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParsedSentence {
    pub talker: Talker,
    pub total_fragments: u8,
    /// One-based, at most `total_fragments`.
    pub fragment_number: u8,
    /// Groups the fragments of a multipart message. Usually absent for single fragment messages.
    pub sequence_id: Option<char>,
    /// Radio channel, usually `A` or `B`.
    pub channel: Option<char>,
    /// ASCII armored 6-bit payload chunk.
    pub payload: String,
    /// Number of padding bits at the end of the payload, 0 through 5.
    pub fill_bits: u8,
    pub received_at: DateTime<Utc>,
}

fn sentence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?-u)^\s*!((AIVD[MO]),(\d+),(\d+),(\d?),(\w?),(.*),(\d+))\*([0-9A-Za-z]{2})\s*$",
        )
        .expect("sentence regex to compile")
    })
}

fn ignorable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?-u)^\s*\$(PFEC|AI(ALR|ABK|TXT)),").expect("ignorable regex to compile")
    })
}

/// NMEA checksum, the XOR of every byte of `body`, where `body` is everything between the
/// leading `!` or `$` and the `*`.
#[must_use]
pub fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0, |acc, b| acc ^ b)
}

/// Returns true if `line` is one of the sentence types that is known to occur on an AIS feed and
/// is deliberately not processed.
#[must_use]
pub fn is_ignorable(line: &[u8]) -> bool {
    ignorable_re().is_match(line)
}

fn malformed(what: &str, line: &[u8]) -> Error {
    Error::Malformed(format!("{what}: {}", String::from_utf8_lossy(line).trim()))
}

fn number(dat: &[u8], what: &str, line: &[u8]) -> Result<u8> {
    std::str::from_utf8(dat)
        .ok()
        .and_then(|s| s.parse::<u8>().ok())
        .ok_or_else(|| malformed(what, line))
}

fn optional_char(dat: &[u8]) -> Option<char> {
    dat.first().map(|b| char::from(*b))
}

/// Classify a single line.
///
/// Returns `Ok(None)` for ignorable sentences.
///
/// # Errors
/// [Error::Unrecognized] if the line is neither an AIS sentence nor ignorable,
/// [Error::ChecksumMismatch] if the transmitted checksum does not match the computed one, and
/// [Error::Malformed] if a numeric field is not a number or out of range.
pub fn parse_sentence(line: &[u8], received_at: DateTime<Utc>) -> Result<Option<ParsedSentence>> {
    let Some(caps) = sentence_re().captures(line) else {
        if is_ignorable(line) {
            return Ok(None);
        }
        return Err(Error::Unrecognized(
            String::from_utf8_lossy(line).trim().to_string(),
        ));
    };

    // All groups participate in every match
    let body = &caps[1];
    let transmitted = std::str::from_utf8(&caps[9])
        .ok()
        .and_then(|s| u8::from_str_radix(s, 16).ok())
        .ok_or_else(|| malformed("checksum is not hex", line))?;
    let computed = checksum(body);
    if transmitted != computed {
        return Err(Error::ChecksumMismatch {
            transmitted,
            computed,
        });
    }

    let talker = if &caps[2] == b"AIVDM" {
        Talker::Aivdm
    } else {
        Talker::Aivdo
    };
    let total_fragments = number(&caps[3], "total fragments", line)?;
    let fragment_number = number(&caps[4], "fragment number", line)?;
    let fill_bits = number(&caps[8], "fill bits", line)?;
    if total_fragments == 0 {
        return Err(malformed("zero total fragments", line));
    }
    if fragment_number == 0 || fragment_number > total_fragments {
        return Err(malformed("fragment number out of range", line));
    }
    if fill_bits > 5 {
        return Err(malformed("fill bits out of range", line));
    }
    let payload =
        String::from_utf8(caps[7].to_vec()).map_err(|_| malformed("payload not ascii", line))?;

    Ok(Some(ParsedSentence {
        talker,
        total_fragments,
        fragment_number,
        sequence_id: optional_char(&caps[5]),
        channel: optional_char(&caps[6]),
        payload,
        fill_bits,
        received_at,
    }))
}
