#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use carevault_kernel_contracts::appointment::AppointmentId;
use carevault_storage::kv::{
    JournalKeyValueStore, KeyValueStore, LocalKeyValueStore, NotifiedState,
};
use carevault_storage::StorageError;

fn temp_journal(tag: &str) -> std::path::PathBuf {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock must be >= unix epoch")
        .as_nanos();
    std::env::temp_dir()
        .join(format!("carevault_kv_{tag}_{seed}"))
        .join("notified_state.jsonl")
}

fn appt(id: &str) -> AppointmentId {
    AppointmentId::new(id).unwrap()
}

#[test]
fn at_kv_db_01_marks_survive_reopen() {
    let path = temp_journal("reopen");
    {
        let store = JournalKeyValueStore::open(&path).expect("journal must open");
        let mut state = NotifiedState::new(store);
        state.mark_notified(&appt("appt_000001")).unwrap();
        state.mark_notified(&appt("appt_000002")).unwrap();
        state.forget(&appt("appt_000002")).unwrap();
    }

    let reopened = NotifiedState::new(JournalKeyValueStore::open(&path).unwrap());
    assert!(reopened.is_notified(&appt("appt_000001")).unwrap());
    assert!(!reopened.is_notified(&appt("appt_000002")).unwrap());

    let lines = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .count();
    assert_eq!(lines, 3);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn at_kv_db_02_repeat_set_does_not_grow_journal() {
    let path = temp_journal("idempotent");
    let mut store = JournalKeyValueStore::open(&path).unwrap();
    store.set("notification_sent_a", "true").unwrap();
    store.set("notification_sent_a", "true").unwrap();
    store.remove("notification_sent_missing").unwrap();
    let lines = std::fs::read_to_string(&path).unwrap().lines().count();
    assert_eq!(lines, 1);
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn at_kv_db_03_compact_keeps_only_live_keys() {
    let path = temp_journal("compact");
    let mut store = JournalKeyValueStore::open(&path).unwrap();
    for i in 0..5 {
        store.set(&format!("k{i}"), "true").unwrap();
    }
    for i in 0..3 {
        store.remove(&format!("k{i}")).unwrap();
    }
    store.compact().unwrap();
    let lines = std::fs::read_to_string(&path).unwrap().lines().count();
    assert_eq!(lines, 2);

    let reopened = JournalKeyValueStore::open(&path).unwrap();
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.get("k4").unwrap().as_deref(), Some("true"));
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn at_kv_db_04_unknown_schema_version_fails_replay() {
    let path = temp_journal("schema");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        "{\"schema_version\":1,\"op\":\"set\",\"key\":\"a\",\"value\":\"true\"}\n\
         {\"schema_version\":9,\"op\":\"set\",\"key\":\"b\",\"value\":\"true\"}\n",
    )
    .unwrap();
    match JournalKeyValueStore::open(&path) {
        Err(StorageError::Journal { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected journal error, got {other:?}"),
    }
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn at_kv_db_05_torn_final_line_is_dropped_and_repaired() {
    let path = temp_journal("torn");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        "{\"schema_version\":1,\"op\":\"set\",\"key\":\"notification_sent_a\",\"value\":\"true\"}\n\
         {\"schema_version\":1,\"op\":\"se",
    )
    .unwrap();

    let mut store = JournalKeyValueStore::open(&path).expect("torn tail must not block open");
    assert_eq!(store.get("notification_sent_a").unwrap().as_deref(), Some("true"));
    assert_eq!(store.len(), 1);

    store.set("notification_sent_b", "true").unwrap();
    let reopened = JournalKeyValueStore::open(&path).unwrap();
    assert_eq!(reopened.len(), 2);
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.lines().all(|l| l.ends_with('}')));
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn at_kv_db_06_corrupt_middle_line_still_fails_replay() {
    let path = temp_journal("middle");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        "{\"schema_version\":1,\"op\":\"se\n\
         {\"schema_version\":1,\"op\":\"set\",\"key\":\"b\",\"value\":\"true\"}\n",
    )
    .unwrap();
    match JournalKeyValueStore::open(&path) {
        Err(StorageError::Journal { line, .. }) => assert_eq!(line, 1),
        other => panic!("expected journal error, got {other:?}"),
    }
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn at_kv_db_07_unopenable_journal_falls_back_to_memory() {
    let path = temp_journal("fallback");
    // A directory where the journal file should be cannot be replayed.
    std::fs::create_dir_all(&path).unwrap();

    let mut store = LocalKeyValueStore::open_or_volatile(&path);
    assert!(!store.is_durable());
    store.set("notification_sent_a", "true").unwrap();
    assert_eq!(store.get("notification_sent_a").unwrap().as_deref(), Some("true"));

    let good = temp_journal("durable");
    assert!(LocalKeyValueStore::open_or_volatile(&good).is_durable());
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
    let _ = std::fs::remove_dir_all(good.parent().unwrap());
}
