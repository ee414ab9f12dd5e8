#![allow(missing_docs)]

use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use keyscope::{
    AbortReason, Event, GeneratedKeyspace, IndexConfig, KeyEvent, KeyKind, KeyName, MemoryStore,
    Notification, PipelineState, Row, Session,
};

const DEADLINE: Duration = Duration::from_secs(60);
const QUIET: Duration = Duration::from_millis(50);

/// Feeds notifications to `session`, recording them, until `done` holds.
fn pump(
    session: &mut Session,
    rx: &Receiver<Notification>,
    log: &mut Vec<Notification>,
    mut done: impl FnMut(&mut Session) -> bool,
) {
    let deadline = Instant::now() + DEADLINE;
    loop {
        while let Ok(notification) = rx.try_recv() {
            deliver(session, log, notification);
        }
        if done(session) {
            return;
        }
        assert!(Instant::now() < deadline, "pipeline did not settle in time");
        if let Ok(notification) = rx.recv_timeout(Duration::from_millis(10)) {
            deliver(session, log, notification);
        }
    }
}

fn deliver(session: &mut Session, log: &mut Vec<Notification>, notification: Notification) {
    session.handle(&notification);
    log.push(notification);
}

/// Delivers whatever arrives until the stream goes quiet.
fn drain(session: &mut Session, rx: &Receiver<Notification>, log: &mut Vec<Notification>) {
    while let Ok(notification) = rx.recv_timeout(QUIET) {
        deliver(session, log, notification);
    }
}

fn settle(session: &mut Session, rx: &Receiver<Notification>, done: impl FnMut(&mut Session) -> bool) {
    let mut log = Vec::new();
    pump(session, rx, &mut log, done);
    drain(session, rx, &mut log);
}

fn finished(session: &Session) -> bool {
    !matches!(session.status().state, PipelineState::Idle | PipelineState::Scanning)
}

fn complete(session: &Session) -> bool {
    session.status().state == PipelineState::Complete
}

fn config() -> IndexConfig {
    let mut config = IndexConfig::default();
    config.filter.debounce = Duration::from_millis(5);
    config
}

fn key_strings(session: &Session) -> Vec<String> {
    session.keys().iter().map(|k| k.as_str().to_string()).collect()
}

#[test]
fn duplicate_batches_index_each_key_once() {
    let store = MemoryStore::generated(&GeneratedKeyspace::new(20_000, 7));
    store.set_duplicates(true);
    let expected = store.len() as u64;
    let mut config = config();
    config.scan_count = 100;
    let (mut session, rx) = Session::open(Box::new(store), config).unwrap();
    session.refresh().unwrap();
    settle(&mut session, &rx, |s| complete(s));

    let status = session.status();
    assert_eq!(session.key_count(), expected);
    assert_eq!(status.distinct, expected);
    assert!(status.keys_seen > status.distinct, "duplicates were delivered");
    assert_eq!(status.progress(), Some(1.0));
}

#[test]
fn changes_mid_scan_never_deliver_older_generations_afterwards() {
    let store = MemoryStore::generated(&GeneratedKeyspace::new(1_000_000, 42));
    store.set_latency(Duration::from_millis(1));
    let (mut session, rx) = Session::open(Box::new(store), config()).unwrap();
    let first = session.refresh().unwrap();
    let mut log = Vec::new();
    pump(&mut session, &rx, &mut log, |s| s.status().batches >= 10);

    let query = session.set_query("user:1").unwrap();
    assert!(query.filter > first.filter);
    let rescan = session.refresh_matching(Some("user:*")).unwrap();
    assert!(rescan.scan > first.scan);
    pump(&mut session, &rx, &mut log, |s| {
        let status = s.status();
        status.generation == rescan && status.batches >= 3
    });
    session.cancel_scan().unwrap();
    pump(&mut session, &rx, &mut log, |s| finished(s));
    drain(&mut session, &rx, &mut log);

    for pair in log.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert_eq!(b.seq, a.seq + 1, "notifications are gap-free and ordered");
        assert!(b.generation.epoch >= a.generation.epoch);
        assert!(b.generation.scan >= a.generation.scan);
        assert!(b.generation.filter >= a.generation.filter);
    }
    let first_new_scan = log
        .iter()
        .position(|n| n.generation.scan >= rescan.scan)
        .expect("rescan notifications delivered");
    assert!(log[first_new_scan..]
        .iter()
        .all(|n| n.generation.scan >= rescan.scan));
    let first_new_query = log
        .iter()
        .position(|n| n.generation.filter >= query.filter)
        .expect("notifications after the query change");
    assert!(log[first_new_query..]
        .iter()
        .all(|n| n.generation.filter >= query.filter));

    let stale = log
        .iter()
        .find(|n| matches!(n.event, Event::Pipeline(_)) && n.generation.scan < rescan.scan)
        .expect("status of the first scan");
    assert!(!session.handle(stale));

    let status = session.status();
    assert!(matches!(
        status.state,
        PipelineState::Aborted(AbortReason::Cancelled | AbortReason::Superseded)
    ));
    assert_eq!(status.pattern.as_deref(), Some("user:*"));
    let partial = session.key_count();
    assert!(partial > 0 && partial < 1_000_000);
    assert!(session
        .keys()
        .iter()
        .all(|key| key.as_str().starts_with("user:")));
}

#[test]
fn connection_loss_keeps_partial_data() {
    let store = MemoryStore::generated(&GeneratedKeyspace::new(10_000, 9));
    let handle = store.clone();
    let total = store.len() as u64;
    let mut config = config();
    config.scan_count = 1000;
    handle.fail_after(3);
    let (mut session, rx) = Session::open(Box::new(store), config).unwrap();
    session.refresh().unwrap();
    settle(&mut session, &rx, |s| finished(s));

    let status = session.status();
    assert_eq!(status.state, PipelineState::Aborted(AbortReason::ConnectionLost));
    assert!(status.last_error.as_deref().unwrap_or_default().contains("connection"));
    let partial = session.key_count();
    assert!(partial > 0 && partial < total, "partial = {partial}");
    assert!(!session.visible_rows(10).is_empty());

    handle.restore();
    session.refresh().unwrap();
    settle(&mut session, &rx, |s| complete(s));
    assert_eq!(session.key_count(), total);
    assert!(session.status().last_error.is_none());
}

#[test]
fn rescan_prunes_deleted_keys() {
    let store = MemoryStore::from_keys(["a:1", "a:2", "b:1"]);
    let (mut session, rx) = Session::open(Box::new(store.clone()), config()).unwrap();
    session.refresh().unwrap();
    settle(&mut session, &rx, |s| complete(s));
    assert_eq!(session.key_count(), 3);

    store.remove("a:2");
    store.insert("c:1", KeyKind::String);
    session.refresh().unwrap();
    settle(&mut session, &rx, |s| {
        complete(s) && s.record(&KeyName::from("c:1")).is_some()
    });
    assert_eq!(key_strings(&session), vec!["a:1", "b:1", "c:1"]);
}

#[test]
fn match_pattern_restricts_the_index_and_its_pruning() {
    let store = MemoryStore::from_keys(["user:1", "user:2", "session:1", "cache:x"]);
    let (mut session, rx) = Session::open(Box::new(store.clone()), config()).unwrap();
    session.refresh_matching(Some("user:*")).unwrap();
    settle(&mut session, &rx, |s| complete(s));
    assert_eq!(key_strings(&session), vec!["user:1", "user:2"]);
    assert_eq!(session.status().pattern.as_deref(), Some("user:*"));

    session
        .apply(KeyEvent::Created(KeyName::from("session:9")))
        .unwrap();
    store.remove("user:2");
    session.refresh().unwrap();
    settle(&mut session, &rx, |s| {
        complete(s) && s.record(&KeyName::from("user:2")).is_none()
    });
    assert_eq!(key_strings(&session), vec!["session:9", "user:1"]);

    session.refresh_matching(None).unwrap();
    settle(&mut session, &rx, |s| complete(s) && s.key_count() == 3);
    assert_eq!(key_strings(&session), vec!["cache:x", "session:1", "user:1"]);
}

#[test]
fn malformed_names_become_single_opaque_segments() {
    let store = MemoryStore::from_keys(["user:1"]);
    store.insert_raw(b"bad\xff:x".to_vec(), KeyKind::String);
    let (mut session, rx) = Session::open(Box::new(store), config()).unwrap();
    session.refresh().unwrap();
    settle(&mut session, &rx, |s| complete(s));

    assert_eq!(session.status().malformed, 1);
    assert_eq!(session.key_count(), 2);
    let opaque = session
        .keys()
        .into_iter()
        .find(KeyName::is_opaque)
        .expect("opaque key indexed");
    assert!(opaque.as_str().contains(':'));
    let rows = session.visible_rows(10);
    assert!(matches!(&rows[0], Row::Node { label, .. } if label == "user"));
    match rows.last() {
        Some(Row::Leaf { depth, name, label, .. }) => {
            assert_eq!(*depth, 0);
            assert_eq!(name, &opaque);
            assert_eq!(label.as_str(), opaque.as_str());
        }
        other => panic!("unexpected row {other:?}"),
    }
}

#[test]
fn undecodable_names_keep_their_own_records() {
    let store = MemoryStore::new();
    store.insert_raw(b"k\xff".to_vec(), KeyKind::Hash);
    store.insert_raw(b"k\xfe".to_vec(), KeyKind::List);
    store.insert("k\u{fffd}", KeyKind::String);
    let (mut session, rx) = Session::open(Box::new(store), config()).unwrap();
    session.refresh().unwrap();
    settle(&mut session, &rx, |s| complete(s));

    assert_eq!(session.key_count(), 3);
    assert_eq!(session.status().malformed, 2);

    let rows = session.visible_rows(10);
    assert_eq!(rows.len(), 3);
    assert_eq!(session.inspect_visible(&rows).unwrap(), 3);
    settle(&mut session, &rx, |s| {
        s.visible_rows(10).iter().all(|row| !row.needs_description())
    });

    let kind_of = |name: &KeyName| {
        session
            .record(name)
            .and_then(|record| record.meta)
            .map(|meta| meta.kind)
    };
    assert_eq!(kind_of(&KeyName::opaque(b"k\xff".to_vec())), Some(KeyKind::Hash));
    assert_eq!(kind_of(&KeyName::opaque(b"k\xfe".to_vec())), Some(KeyKind::List));
    assert_eq!(kind_of(&KeyName::from("k\u{fffd}")), Some(KeyKind::String));
}
