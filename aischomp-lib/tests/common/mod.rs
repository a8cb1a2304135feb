#![allow(dead_code)]
use std::path::PathBuf;

use aischomp::sentence::checksum;
use aischomp::{RawRecord, Sink};
use chrono::{DateTime, Utc};
use crossbeam::channel::{unbounded, Receiver};

pub fn fixture_path(name: &str) -> PathBuf {
    let mut path =
        PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
    path.push("tests/fixtures");
    path.push(name);
    path
}

/// Complete sentence for `body`, i.e., everything between `!` and `*`, with a valid checksum.
pub fn sentence(body: &str) -> String {
    format!("!{body}*{:02X}", checksum(body.as_bytes()))
}

pub fn record(line: &str, t: DateTime<Utc>) -> RawRecord {
    RawRecord::new(t, line.as_bytes().to_vec())
}

/// A sink that forwards everything it accepts to the returned receiver.
pub fn collector<T: Send + 'static>() -> (Box<dyn Sink<T>>, Receiver<T>) {
    let (tx, rx) = unbounded();
    (Box::new(tx), rx)
}
