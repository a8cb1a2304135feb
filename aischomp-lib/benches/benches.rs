use aischomp::sentence::{checksum, parse_sentence};
use aischomp::{AisCodec, EnvelopeCodec, FragmentReassembler};
use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use rand::seq::SliceRandom;

fn sentence(body: &str) -> Vec<u8> {
    format!("!{body}*{:02X}\r\n", checksum(body.as_bytes())).into_bytes()
}

fn bench_parse(c: &mut Criterion) {
    let line = sentence("AIVDM,1,1,,A,15NPOOPP00o?b=bE`UNv4?w428D?,0");
    let mut group = c.benchmark_group("sentence");
    group.throughput(Throughput::Bytes(line.len() as u64));
    group.bench_function("parse", |b| {
        let now = Utc::now();
        b.iter(|| {
            parse_sentence(&line, now).unwrap().unwrap();
        });
    });
    group.bench_function("checksum", |b| {
        b.iter(|| checksum(&line));
    });
    group.finish();
}

fn bench_reassemble(c: &mut Criterion) {
    let now = Utc::now();
    let mut rng = rand::thread_rng();
    let mut fragments: Vec<_> = (1..=5)
        .map(|num| {
            let body = format!("AIVDM,5,{num},1,A,55NPOOPP00o?b=bE`UNv4?w428D?,0");
            parse_sentence(&sentence(&body), now).unwrap().unwrap()
        })
        .collect();
    fragments.shuffle(&mut rng);

    let mut group = c.benchmark_group("reassembly");
    group.throughput(Throughput::Elements(fragments.len() as u64));
    group.bench_function("five_fragments", |b| {
        let mut reassembler = FragmentReassembler::new();
        b.iter(|| {
            let mut completed = None;
            for frag in &fragments {
                completed = reassembler.push_at(frag.clone(), now);
            }
            assert!(completed.is_some());
        });
    });
    group.finish();
}

fn bench_envelope(c: &mut Criterion) {
    c.bench_function("envelope_decode", |b| {
        b.iter(|| EnvelopeCodec.decode("15NPOOPP00o?b=bE`UNv4?w428D?", 0).unwrap());
    });
}

criterion_group!(benches, bench_parse, bench_reassemble, bench_envelope);
criterion_main!(benches);
