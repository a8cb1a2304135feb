#![doc = include_str!("../README.md")]

mod error;

pub mod codec;
pub mod decoder;
pub mod distributor;
pub mod pipeline;
pub mod reassembly;
pub mod sentence;
pub mod sink;
pub mod source;

pub use codec::{AisCodec, DecodedMessage, EnvelopeCodec};
pub use decoder::{MessageDecoder, Summary};
pub use distributor::{Distributor, QueuePolicy};
pub use error::{CodecError, Error, Result};
pub use pipeline::{Pipeline, Shutdown};
pub use reassembly::{CompletedPayload, FragmentReassembler, Keying};
pub use sentence::{parse_sentence, ParsedSentence, Talker};
pub use sink::Sink;
pub use source::{RawRecord, SerialConfig, SerialSource, Source, UdpSource};

pub mod prelude {
    pub use crate::error::{CodecError, Error, Result};
}
