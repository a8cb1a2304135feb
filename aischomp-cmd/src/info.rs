use std::collections::BTreeMap;
use std::io::{stdout, BufRead, BufReader, Write};
use std::path::Path;

use aischomp::{MessageDecoder, RawRecord, Summary};
use anyhow::{Context, Result};
use chrono::Utc;
use handlebars::handlebars_helper;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

#[derive(Default, Debug, Clone, Serialize)]
struct TypeSummary {
    count: usize,
    vessels: usize,
}

#[derive(Debug, Clone, Serialize)]
struct Info {
    filename: String,
    summary: Summary,
    /// Multipart messages never completed
    incomplete: usize,
    vessels: usize,
    msg_types: BTreeMap<u64, TypeSummary>,
}

fn summarize(fpath: &Path) -> Result<Info> {
    let reader = BufReader::new(std::fs::File::open(fpath).context("opening input")?);
    let mut decoder = MessageDecoder::new();
    let mut vessels: BTreeMap<u64, Vec<u64>> = BTreeMap::default();
    let mut msg_types: BTreeMap<u64, TypeSummary> = BTreeMap::default();

    for (idx, line) in reader.split(b'\n').enumerate() {
        let mut line = line.with_context(|| format!("reading line {}", idx + 1))?;
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.is_empty() {
            continue;
        }
        let Some(msg) = decoder.process(&RawRecord::new(Utc::now(), line)) else {
            continue;
        };
        let (Some(msg_type), Some(mmsi)) = (msg.msg_type(), msg.mmsi()) else {
            debug!("message without type or mmsi at line {}", idx + 1);
            continue;
        };
        let types = vessels.entry(mmsi).or_default();
        let summary = msg_types.entry(msg_type).or_default();
        summary.count += 1;
        if !types.contains(&msg_type) {
            types.push(msg_type);
            summary.vessels += 1;
        }
    }

    Ok(Info {
        filename: fpath.to_string_lossy().to_string(),
        incomplete: decoder.pending(),
        vessels: vessels.len(),
        msg_types,
        summary: decoder.into_summary(),
    })
}

pub fn info(fpath: &Path, format: &Format) -> Result<()> {
    let info = summarize(fpath)?;

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &info).context("serializing to json")
        }
        Format::Text => {
            let data = render_text(&info).context("serializing info")?;
            stdout()
                .write_all(data.as_bytes())
                .context("writing to stdout")
        }
    }
}

fn render_text(info: &Info) -> Result<String> {
    handlebars_helper!(left_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => String::new(),
            _ => v.to_string()
        };
        let width = usize::try_from(num).unwrap_or(0).max(v.len());
        format!("{v:>width$}")
    });
    let mut hb = handlebars::Handlebars::new();
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_template_string("info", TEXT_TEMPLATE)
        .context("registering template")?;

    hb.render("info", &info).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ filename }}
===========================================================
Lines:         {{ summary.records }}
Sentences:     {{ summary.sentences }}
Ignored:       {{ summary.ignored }}
Unrecognized:  {{ summary.unrecognized }}
Bad checksum:  {{ summary.checksum_mismatches }}
Malformed:     {{ summary.malformed }}
Single:        {{ summary.single_fragment }}
Multipart:     {{ summary.multipart_completed }}
Incomplete:    {{ incomplete }}
Decoded:       {{ summary.decoded }}
Failed:        {{ summary.decode_failures }}
Vessels:       {{ vessels }}
-----------------------------------------------------------
Type     Count   Vessels
-----------------------------------------------------------
{{ #each msg_types }}{{ lpad 4 @key }}  {{ lpad 8 count }}  {{ lpad 8 vessels }}
{{/each }}
";
