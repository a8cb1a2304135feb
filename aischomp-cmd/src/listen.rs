use std::io::stdout;
use std::path::PathBuf;

use aischomp::{Keying, Pipeline, QueuePolicy, Source};
use anyhow::{bail, Result};
use chrono::TimeDelta;
use clap::Args;
use tracing::info;

use crate::sinks::{DecodedCsv, JsonLines, RawCsv};

#[derive(Debug, Clone, Copy)]
pub enum KeyingArg {
    SequenceChannel,
    Sequence,
}

impl clap::ValueEnum for KeyingArg {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::SequenceChannel, Self::Sequence]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::SequenceChannel => Some(clap::builder::PossibleValue::new("sequence-channel")),
            Self::Sequence => Some(clap::builder::PossibleValue::new("sequence")),
        }
    }
}

impl From<KeyingArg> for Keying {
    fn from(value: KeyingArg) -> Self {
        match value {
            KeyingArg::SequenceChannel => Keying::SequenceIdAndChannel,
            KeyingArg::Sequence => Keying::SequenceId,
        }
    }
}

/// Outputs and processing options shared by every listening command.
#[derive(Args, Debug, Clone)]
pub struct ListenArgs {
    /// Append raw records to this CSV file.
    #[arg(long, value_name = "path")]
    pub raw_csv: Option<PathBuf>,

    /// Append decoded messages to this CSV file.
    #[arg(long, value_name = "path")]
    pub decoded_csv: Option<PathBuf>,

    /// Write decoded messages to stdout as JSON, one per line.
    #[arg(long, action)]
    pub json: bool,

    /// Seconds to wait for the remaining fragments of a multipart message.
    #[arg(long, default_value_t = 60, value_name = "secs")]
    pub ttl: i64,

    /// How fragments are grouped into multipart messages.
    #[arg(long, default_value = "sequence-channel")]
    pub keying: KeyingArg,

    /// Bound every queue to this many items, dropping the oldest when full.
    ///
    /// By default queues are unbounded.
    #[arg(long, value_name = "num")]
    pub queue_capacity: Option<usize>,
}

impl ListenArgs {
    fn pipeline(&self) -> Result<Pipeline> {
        if self.raw_csv.is_none() && self.decoded_csv.is_none() && !self.json {
            bail!("no outputs; use at least one of --raw-csv, --decoded-csv, --json");
        }
        let Some(ttl) = TimeDelta::try_seconds(self.ttl) else {
            bail!("invalid ttl {}", self.ttl);
        };

        let mut pipeline = Pipeline::new()
            .with_ttl(ttl)
            .with_keying(self.keying.into())
            .with_queue_policy(match self.queue_capacity {
                Some(num) => QueuePolicy::DropOldest(num),
                None => QueuePolicy::Unbounded,
            });
        if let Some(ref path) = self.raw_csv {
            pipeline = pipeline.with_raw_sink("raw_csv", Box::new(RawCsv::create(path)?));
        }
        if let Some(ref path) = self.decoded_csv {
            pipeline =
                pipeline.with_message_sink("decoded_csv", Box::new(DecodedCsv::create(path)?));
        }
        if self.json {
            pipeline = pipeline.with_message_sink("json", Box::new(JsonLines::new(stdout())));
        }
        Ok(pipeline)
    }
}

/// Run until `source` ends. Ending is always an error for a listener.
pub fn listen<S: Source + 'static>(source: S, args: &ListenArgs) -> Result<()> {
    let name = source.name().to_string();
    let shutdown = args.pipeline()?.run(source)?;
    info!(
        records = shutdown.summary.records,
        decoded = shutdown.summary.decoded,
        warnings = shutdown.summary.warnings(),
        "{name} finished"
    );
    Err(shutdown.cause.into())
}
