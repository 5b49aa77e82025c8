//! Update-stream to lookup integration tests
//!
//! Drives the parser and the classifier directly, without the worker.

use std::time::Duration;

use sbdb_core::{Classifier, CompleteHash, FileBackend, LookupKey, MemoryBackend, Prefix, TableUpdate};
use sbdb_updater::{ParseError, ProtocolParser};

const PHISH_URL: &str = "http://phish.example/";
const PHISH_FRAGMENT: &str = "phish.example/";

fn prefix_of(fragment: &str) -> Prefix {
    CompleteHash::of_fragment(fragment).prefix()
}

/// `[domain][count = 0]`: one prefix entry
fn add_payload(prefix: Prefix) -> Vec<u8> {
    let mut payload = prefix.as_bytes().to_vec();
    payload.push(0);
    payload
}

/// `[domain][count = 0][addchunk]`: knocks out `prefix` from `add_chunk`
fn sub_payload(prefix: Prefix, add_chunk: u32) -> Vec<u8> {
    let mut payload = add_payload(prefix);
    payload.extend_from_slice(&add_chunk.to_be_bytes());
    payload
}

fn chunk(header: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = format!("{}:{}\n", header, payload.len()).into_bytes();
    out.extend_from_slice(payload);
    out
}

fn parse(stream: &[u8]) -> Vec<TableUpdate> {
    let mut parser = ProtocolParser::new();
    parser.append_stream(stream).unwrap();
    parser.finish_stream().unwrap();
    parser.forget_table_updates()
}

fn classifier() -> Classifier {
    Classifier::with_backend(Box::new(MemoryBackend::new()), Duration::from_secs(2700)).unwrap()
}

fn matches(c: &Classifier, url: &str) -> usize {
    c.check(&LookupKey::parse(url).unwrap()).len()
}

#[test]
fn test_single_add_chunk_matches() {
    let mut stream = b"i:test-phish\n".to_vec();
    stream.extend(chunk("a:1:4", &add_payload(prefix_of(PHISH_FRAGMENT))));

    let updates = parse(&stream);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].table_name(), "test-phish");
    assert!(updates[0].add_chunks.contains(1));
    assert_eq!(updates[0].add_prefixes.len(), 1);

    let mut c = classifier();
    c.apply_updates(updates).unwrap();
    let results = c.check(&LookupKey::parse(PHISH_URL).unwrap());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].table, "test-phish");
    assert_eq!(results[0].prefix, prefix_of(PHISH_FRAGMENT));
    assert!(!results[0].is_confirmed());
    assert!(!results[0].noise);
}

#[test]
fn test_eight_byte_single_prefix_add_is_rejected() {
    // a domain-only add entry is [prefix][count = 0]: five bytes, not eight
    let mut payload = add_payload(prefix_of(PHISH_FRAGMENT));
    payload.extend_from_slice(&[0, 0, 0]);
    assert_eq!(payload.len(), 8);
    let mut stream = b"i:test-phish\n".to_vec();
    stream.extend(chunk("a:1:4", &payload));

    let mut parser = ProtocolParser::new();
    assert!(matches!(
        parser.append_stream(&stream),
        Err(ParseError::PayloadMismatch { chunk: 1, .. })
    ));
    assert!(parser.status().is_err());
}

#[test]
fn test_sub_removes_add_from_earlier_update() {
    let prefix = prefix_of(PHISH_FRAGMENT);
    let mut c = classifier();

    let mut first = b"i:test-phish\n".to_vec();
    first.extend(chunk("a:1:4", &add_payload(prefix)));
    c.apply_updates(parse(&first)).unwrap();
    assert_eq!(matches(&c, PHISH_URL), 1);

    let mut second = b"i:test-phish\n".to_vec();
    second.extend(chunk("s:2:4", &sub_payload(prefix, 1)));
    c.apply_updates(parse(&second)).unwrap();
    assert_eq!(matches(&c, PHISH_URL), 0);
    assert_eq!(c.table_request(), "test-phish;a:1:s:2\n");
}

#[test]
fn test_add_and_sub_in_one_update() {
    let prefix = prefix_of(PHISH_FRAGMENT);
    let mut stream = b"i:test-phish\n".to_vec();
    stream.extend(chunk("a:1:4", &add_payload(prefix)));
    stream.extend(chunk("s:2:4", &sub_payload(prefix, 1)));

    let mut c = classifier();
    c.apply_updates(parse(&stream)).unwrap();
    assert_eq!(matches(&c, PHISH_URL), 0);
}

#[test]
fn test_sub_for_other_chunk_keeps_prefix() {
    let prefix = prefix_of(PHISH_FRAGMENT);
    let mut stream = b"i:test-phish\n".to_vec();
    stream.extend(chunk("a:1:4", &add_payload(prefix)));
    stream.extend(chunk("s:2:4", &sub_payload(prefix, 7)));

    let mut c = classifier();
    c.apply_updates(parse(&stream)).unwrap();
    assert_eq!(matches(&c, PHISH_URL), 1);
    // the sub waits for add chunk 7
    assert_eq!(c.store("test-phish").unwrap().pending_subs(), 1);

    let mut later = b"i:test-phish\n".to_vec();
    later.extend(chunk("a:7:4", &add_payload(prefix)));
    c.apply_updates(parse(&later)).unwrap();
    // chunk 1's copy survives, chunk 7's copy was knocked out on arrival
    assert_eq!(matches(&c, PHISH_URL), 1);
    assert_eq!(c.store("test-phish").unwrap().pending_subs(), 0);
}

#[test]
fn test_bad_hash_size_poisons_parser() {
    let mut parser = ProtocolParser::new();
    assert!(parser.append_stream(b"i:test-phish\n").is_ok());
    assert!(matches!(
        parser.append_stream(b"a:1:5:8\n"),
        Err(ParseError::UnsupportedHashSize { chunk: 1, size: 5 })
    ));
    assert!(parser.status().is_err());

    let mut good = b"i:other\n".to_vec();
    good.extend(chunk("a:1:4", &add_payload(prefix_of(PHISH_FRAGMENT))));
    assert!(parser.append_stream(&good).is_err());
    assert!(parser.table_updates().is_empty());

    parser.begin();
    parser.append_stream(&good).unwrap();
    parser.finish_stream().unwrap();
    assert_eq!(parser.table_updates().len(), 1);
}

#[test]
fn test_expiring_twice_matches_expiring_once() {
    let mut stream = b"i:test-malware\n".to_vec();
    stream.extend(chunk("a:1:4", &add_payload(prefix_of("one.example/"))));
    stream.extend(chunk("a:2:4", &add_payload(prefix_of("two.example/"))));

    let mut once = classifier();
    once.apply_updates(parse(&stream)).unwrap();
    once.apply_updates(parse(b"i:test-malware\nad:1\n")).unwrap();

    let mut twice = classifier();
    twice.apply_updates(parse(&stream)).unwrap();
    twice.apply_updates(parse(b"i:test-malware\nad:1\n")).unwrap();
    twice.apply_updates(parse(b"i:test-malware\nad:1\n")).unwrap();

    assert_eq!(once.store("test-malware"), twice.store("test-malware"));
    assert_eq!(matches(&twice, "http://one.example/"), 0);
    assert_eq!(matches(&twice, "http://two.example/"), 1);
}

#[test]
fn test_fragmentation_does_not_change_result() {
    let mut stream = b"n:1200\ni:test-phish\nad:3-4\n".to_vec();
    for (n, fragment) in ["a.example/", "b.example/x/", "c.example/?q=1"].iter().enumerate() {
        stream.extend(chunk(&format!("a:{}:4", n + 10), &add_payload(prefix_of(fragment))));
    }
    stream.extend(chunk("s:20:4", &sub_payload(prefix_of("a.example/"), 10)));
    stream.extend_from_slice(b"i:test-malware-digest256\n");
    stream.extend(chunk("a:5:32", &CompleteHash::of_fragment("m.example/").0));
    stream.extend_from_slice(b"u:more.example/next\n");

    let mut whole = ProtocolParser::new();
    whole.append_stream(&stream).unwrap();
    whole.finish_stream().unwrap();

    for step in [1usize, 2, 3, 7, 13, 64] {
        let mut split = ProtocolParser::new();
        for piece in stream.chunks(step) {
            split.append_stream(piece).unwrap();
        }
        split.finish_stream().unwrap();
        assert_eq!(split.table_updates(), whole.table_updates(), "step {}", step);
        assert_eq!(split.forwards(), whole.forwards());
        assert_eq!(split.update_wait(), 1200);
    }
}

#[test]
fn test_digest_table_complete_hash() {
    let hash = CompleteHash::of_fragment("m.example/");
    let mut stream = b"i:test-malware-digest256\n".to_vec();
    stream.extend(chunk("a:5:32", &hash.0));

    let mut c = classifier();
    c.apply_updates(parse(&stream)).unwrap();
    let results = c.check(&LookupKey::parse("http://m.example/").unwrap());
    assert_eq!(results.len(), 1);
    assert!(results[0].complete);
    assert!(results[0].is_confirmed());

    let mut sub = 5u32.to_be_bytes().to_vec();
    sub.extend_from_slice(&hash.0);
    let mut removal = b"i:test-malware-digest256\n".to_vec();
    removal.extend(chunk("s:6:32", &sub));
    c.apply_updates(parse(&removal)).unwrap();
    assert_eq!(matches(&c, "http://m.example/"), 0);
}

#[test]
fn test_on_disk_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut stream = b"i:test-phish\n".to_vec();
    stream.extend(chunk("a:1:4", &add_payload(prefix_of(PHISH_FRAGMENT))));

    {
        let backend = FileBackend::open(dir.path()).unwrap();
        let mut c = Classifier::with_backend(Box::new(backend), Duration::from_secs(60)).unwrap();
        c.apply_updates(parse(&stream)).unwrap();
    }

    let backend = FileBackend::open(dir.path()).unwrap();
    let c = Classifier::with_backend(Box::new(backend), Duration::from_secs(60)).unwrap();
    assert_eq!(c.table_request(), "test-phish;a:1\n");
    assert_eq!(matches(&c, PHISH_URL), 1);
}
