//! Reassembly of multipart AIS messages.
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::sentence::ParsedSentence;

/// How fragments are grouped into a multipart message.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Keying {
    /// Group by sequence id and radio channel. Two senders reusing a sequence id at the same time
    /// on different channels are kept apart.
    #[default]
    SequenceIdAndChannel,
    /// Group by sequence id alone.
    SequenceId,
}

/// Identity of a multipart group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub sequence_id: Option<char>,
    pub channel: Option<char>,
}

impl Keying {
    fn key(self, sentence: &ParsedSentence) -> GroupKey {
        match self {
            Keying::SequenceIdAndChannel => GroupKey {
                sequence_id: sentence.sequence_id,
                channel: sentence.channel,
            },
            Keying::SequenceId => GroupKey {
                sequence_id: sentence.sequence_id,
                channel: None,
            },
        }
    }
}

/// A whole armored payload, from a single fragment or from a completed multipart group.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompletedPayload {
    pub armored_payload: String,
    pub fill_bits: u8,
    /// Receive time of the first fragment seen for the message.
    pub received_at: DateTime<Utc>,
}

/// Fragments of a multipart message collected so far.
#[derive(Debug, Clone)]
pub struct PartialMessage {
    chunks: BTreeMap<u8, String>,
    fill_bits: u8,
    first_seen_at: DateTime<Utc>,
}

impl PartialMessage {
    fn new(first_seen_at: DateTime<Utc>) -> Self {
        PartialMessage {
            chunks: BTreeMap::new(),
            fill_bits: 0,
            first_seen_at,
        }
    }

    /// Fragment numbers received so far, ascending.
    pub fn fragment_numbers(&self) -> Vec<u8> {
        self.chunks.keys().copied().collect()
    }

    pub fn first_seen_at(&self) -> DateTime<Utc> {
        self.first_seen_at
    }

    fn concat(self) -> String {
        self.chunks.into_values().collect()
    }
}

/// Accumulates fragments until a message is complete.
///
/// Single fragment sentences are completed immediately. Fragments of multipart messages are
/// grouped by [Keying] and may arrive in any order; the payload is joined in fragment number order
/// once as many distinct fragments as the message declares have been seen. A repeated fragment
/// number replaces the earlier chunk.
///
/// Groups that do not complete within the time-to-live of their first fragment are evicted. There
/// is no timer; expired groups are swept each time a fragment is pushed, or when [expire] is
/// called.
///
/// [expire]: FragmentReassembler::expire
#[derive(Debug)]
pub struct FragmentReassembler {
    ttl: TimeDelta,
    keying: Keying,
    partials: HashMap<GroupKey, PartialMessage>,
    evicted: usize,
}

impl Default for FragmentReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentReassembler {
    /// Default time-to-live of a partial message, in seconds.
    pub const DEFAULT_TTL_SECS: i64 = 60;

    pub fn new() -> Self {
        FragmentReassembler {
            ttl: TimeDelta::seconds(Self::DEFAULT_TTL_SECS),
            keying: Keying::default(),
            partials: HashMap::new(),
            evicted: 0,
        }
    }

    pub fn with_ttl(mut self, ttl: TimeDelta) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_keying(mut self, keying: Keying) -> Self {
        self.keying = keying;
        self
    }

    /// Add a sentence, using the current time for eviction.
    pub fn push(&mut self, sentence: ParsedSentence) -> Option<CompletedPayload> {
        self.push_at(sentence, Utc::now())
    }

    /// Add a sentence, evicting groups older than the time-to-live as of `now` first. Returns the
    /// completed payload if this sentence completed a message.
    pub fn push_at(
        &mut self,
        sentence: ParsedSentence,
        now: DateTime<Utc>,
    ) -> Option<CompletedPayload> {
        self.expire(now);

        if sentence.total_fragments <= 1 {
            trace!(payload = %sentence.payload, "single fragment");
            return Some(CompletedPayload {
                armored_payload: sentence.payload,
                fill_bits: sentence.fill_bits,
                received_at: sentence.received_at,
            });
        }

        let key = self.keying.key(&sentence);
        let partial = self
            .partials
            .entry(key)
            .or_insert_with(|| PartialMessage::new(sentence.received_at));
        if sentence.fragment_number == sentence.total_fragments {
            partial.fill_bits = sentence.fill_bits;
        }
        partial
            .chunks
            .insert(sentence.fragment_number, sentence.payload);
        trace!(
            ?key,
            fragment = sentence.fragment_number,
            total = sentence.total_fragments,
            "fragment"
        );

        if partial.chunks.len() < usize::from(sentence.total_fragments) {
            return None;
        }
        let partial = self.partials.remove(&key)?;
        debug!(?key, total = sentence.total_fragments, "completed multipart");
        let fill_bits = partial.fill_bits;
        let received_at = partial.first_seen_at;
        Some(CompletedPayload {
            armored_payload: partial.concat(),
            fill_bits,
            received_at,
        })
    }

    /// Drop every group whose first fragment is older than the time-to-live as of `now`. Returns
    /// the number of groups evicted.
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.ttl;
        let before = self.partials.len();
        self.partials.retain(|key, partial| {
            if partial.first_seen_at >= cutoff {
                return true;
            }
            warn!(
                sequence_id = ?key.sequence_id,
                channel = ?key.channel,
                fragments = ?partial.fragment_numbers(),
                "partial message expired"
            );
            false
        });
        let num = before - self.partials.len();
        self.evicted += num;
        num
    }

    /// Groups currently waiting for fragments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partials.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }

    pub fn get(&self, key: &GroupKey) -> Option<&PartialMessage> {
        self.partials.get(key)
    }

    /// Total groups evicted over the lifetime of this reassembler.
    #[must_use]
    pub fn evicted(&self) -> usize {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentence::Talker;
    use rand::seq::SliceRandom;

    fn fragment(
        total: u8,
        num: u8,
        seq: char,
        payload: &str,
        fill_bits: u8,
        t: DateTime<Utc>,
    ) -> ParsedSentence {
        ParsedSentence {
            talker: Talker::Aivdm,
            total_fragments: total,
            fragment_number: num,
            sequence_id: Some(seq),
            channel: Some('A'),
            payload: payload.to_string(),
            fill_bits,
            received_at: t,
        }
    }

    #[test]
    fn single_fragment_fast_path() {
        let t = Utc::now();
        let mut reassembler = FragmentReassembler::new();
        let mut sentence = fragment(1, 1, '0', "15NP", 3, t);
        sentence.sequence_id = None;

        let completed = reassembler.push_at(sentence, t).unwrap();

        assert_eq!(completed.armored_payload, "15NP");
        assert_eq!(completed.fill_bits, 3);
        assert_eq!(completed.received_at, t);
        assert!(reassembler.is_empty());
    }

    #[test]
    fn out_of_order_fragments() {
        let t0 = Utc::now();
        let t1 = t0 + TimeDelta::seconds(1);
        let mut reassembler = FragmentReassembler::new();

        assert!(reassembler
            .push_at(fragment(2, 2, '3', "CD", 2, t0), t0)
            .is_none());
        assert_eq!(reassembler.len(), 1);
        let completed = reassembler
            .push_at(fragment(2, 1, '3', "AB", 0, t1), t1)
            .unwrap();

        assert_eq!(completed.armored_payload, "ABCD");
        assert_eq!(completed.fill_bits, 2, "fill bits come from the final fragment");
        assert_eq!(completed.received_at, t0, "timestamp of the first fragment seen");
        assert!(reassembler.is_empty());
    }

    #[test]
    fn any_arrival_order_concatenates_in_fragment_order() {
        let t = Utc::now();
        let chunks = ["A", "B", "C", "D", "E"];
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let mut order: Vec<u8> = (1..=5).collect();
            order.shuffle(&mut rng);
            let mut reassembler = FragmentReassembler::new();
            let mut completed = Vec::new();
            for num in order {
                let chunk = chunks[usize::from(num) - 1];
                let fill = if num == 5 { 4 } else { 0 };
                completed.extend(reassembler.push_at(fragment(5, num, '1', chunk, fill, t), t));
            }
            assert_eq!(completed.len(), 1);
            assert_eq!(completed[0].armored_payload, "ABCDE");
            assert_eq!(completed[0].fill_bits, 4);
        }
    }

    #[test]
    fn stale_group_is_evicted_before_insert() {
        let t0 = Utc::now();
        let t1 = t0 + TimeDelta::seconds(61);
        let mut reassembler = FragmentReassembler::new();

        assert!(reassembler
            .push_at(fragment(2, 1, '5', "AB", 0, t0), t0)
            .is_none());
        // The late fragment starts a new group rather than completing the expired one
        assert!(reassembler
            .push_at(fragment(2, 2, '5', "CD", 0, t1), t1)
            .is_none());

        assert_eq!(reassembler.evicted(), 1);
        assert_eq!(reassembler.len(), 1);
        let key = GroupKey {
            sequence_id: Some('5'),
            channel: Some('A'),
        };
        let partial = reassembler.get(&key).unwrap();
        assert_eq!(partial.fragment_numbers(), vec![2]);
        assert_eq!(partial.first_seen_at(), t1);
    }

    #[test]
    fn group_at_exactly_ttl_is_kept() {
        let t0 = Utc::now();
        let mut reassembler = FragmentReassembler::new();
        reassembler.push_at(fragment(2, 1, '5', "AB", 0, t0), t0);

        assert_eq!(reassembler.expire(t0 + TimeDelta::seconds(60)), 0);
        assert_eq!(reassembler.expire(t0 + TimeDelta::seconds(61)), 1);
        assert!(reassembler.is_empty());
    }

    #[test]
    fn expire_is_independent_of_arrivals() {
        let t0 = Utc::now();
        let mut reassembler = FragmentReassembler::new().with_ttl(TimeDelta::seconds(5));
        reassembler.push_at(fragment(3, 1, '1', "A", 0, t0), t0);
        reassembler.push_at(fragment(3, 1, '2', "A", 0, t0 + TimeDelta::seconds(4)), t0);

        assert_eq!(reassembler.expire(t0 + TimeDelta::seconds(6)), 1);
        assert_eq!(reassembler.len(), 1);
    }

    #[test]
    fn channels_are_kept_apart_by_default() {
        let t = Utc::now();
        let mut reassembler = FragmentReassembler::new();
        let mut b = fragment(2, 2, '1', "XX", 0, t);
        b.channel = Some('B');

        assert!(reassembler.push_at(fragment(2, 1, '1', "AB", 0, t), t).is_none());
        assert!(reassembler.push_at(b, t).is_none());
        assert_eq!(reassembler.len(), 2);
    }

    #[test]
    fn sequence_id_keying_merges_channels() {
        let t = Utc::now();
        let mut reassembler = FragmentReassembler::new().with_keying(Keying::SequenceId);
        let mut b = fragment(2, 2, '1', "CD", 0, t);
        b.channel = Some('B');

        assert!(reassembler.push_at(fragment(2, 1, '1', "AB", 0, t), t).is_none());
        let completed = reassembler.push_at(b, t).unwrap();
        assert_eq!(completed.armored_payload, "ABCD");
    }

    #[test]
    fn duplicate_fragment_replaces_chunk() {
        let t = Utc::now();
        let mut reassembler = FragmentReassembler::new();

        assert!(reassembler.push_at(fragment(2, 1, '1', "old", 0, t), t).is_none());
        assert!(reassembler.push_at(fragment(2, 1, '1', "AB", 0, t), t).is_none());
        let completed = reassembler.push_at(fragment(2, 2, '1', "CD", 0, t), t).unwrap();

        assert_eq!(completed.armored_payload, "ABCD");
    }

    #[test]
    fn out_of_range_fragment_only_pollutes_its_group() {
        let t = Utc::now();
        let mut reassembler = FragmentReassembler::new();

        assert!(reassembler.push_at(fragment(2, 7, '1', "ZZ", 0, t), t).is_none());
        // Distinct count reaches the total, so the group completes with the stray chunk
        let completed = reassembler.push_at(fragment(2, 1, '1', "AB", 0, t), t).unwrap();
        assert_eq!(completed.armored_payload, "ABZZ");
    }
}
