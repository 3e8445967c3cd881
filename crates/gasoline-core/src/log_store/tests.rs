use super::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};

fn entry(level: LogLevel, message: &str) -> LogEntry {
    LogEntry::new(level, message)
}

fn file_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_validate_rejects_bad_levels_and_oversized() {
    let huge = "x".repeat(MAX_ENTRY_SIZE + 1);
    let (valid, rejected) = validate_log_entries(vec![
        json!({"level": "error", "message": "boom"}),
        json!({"level": "fatal", "message": "nope"}),
        json!({"message": "no level"}),
        json!({"level": "log", "message": huge}),
        json!("not an object"),
        json!({"level": "debug", "tabId": 3, "custom": {"k": 1}}),
    ]);

    assert_eq!(valid.len(), 2);
    assert_eq!(rejected, 4);
    assert_eq!(valid[0].message.as_deref(), Some("boom"));
    assert_eq!(valid[1].tab_id, Some(3));
    assert_eq!(valid[1].extra["custom"], json!({"k": 1}));
}

#[test]
fn test_validate_rejects_oversized_nested_values() {
    let huge = "x".repeat(2 * MAX_ENTRY_SIZE);
    let (valid, rejected) = validate_log_entries(vec![
        json!({"level": "info", "args": [huge.clone()]}),
        json!({"level": "warn", "data": {"inner": {"blob": huge}}}),
        json!({"level": "info", "args": ["small", {"k": "v"}]}),
    ]);
    assert_eq!(rejected, 2);
    assert_eq!(valid.len(), 1);
    assert_eq!(valid[0].level, LogLevel::Info);
}

#[test]
fn test_unknown_fields_round_trip() {
    let raw = json!({"level": "warn", "message": "m", "ts": "2026-03-01T12:00:00Z", "stack": "at x"});
    let (valid, _) = validate_log_entries(vec![raw.clone()]);
    assert_eq!(serde_json::to_value(&valid[0]).unwrap(), raw);
}

#[test]
fn test_append_then_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("gasoline.jsonl");

    let store = LogStore::open(&path, 100, None);
    store.add_entries(vec![entry(LogLevel::Info, "one"), entry(LogLevel::Error, "two")]);
    store.add_entries(vec![entry(LogLevel::Log, "three")]);
    assert_eq!(file_lines(&path).len(), 3);
    assert_eq!(store.error_total_added(), 1);

    let reopened = LogStore::open(&path, 100, None);
    let messages: Vec<_> = reopened
        .entries()
        .into_iter()
        .filter_map(|e| e.message)
        .collect();
    assert_eq!(messages, vec!["one", "two", "three"]);
    assert_eq!(reopened.total_added(), 3);
}

#[test]
fn test_rotation_rewrites_file_with_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gasoline.jsonl");

    let store = LogStore::open(&path, 3, None);
    for i in 0..5 {
        store.add_entries(vec![entry(LogLevel::Info, &format!("m{}", i))]);
    }

    let lines = file_lines(&path);
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("m2"));
    assert!(lines[2].contains("m4"));
    assert!(!dir.path().join("gasoline.jsonl.tmp").exists());
    assert_eq!(store.total_added(), 5);
}

#[test]
fn test_load_skips_malformed_lines_and_trims() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gasoline.jsonl");
    let mut contents = String::new();
    for i in 0..6 {
        contents.push_str(&format!("{{\"level\":\"info\",\"message\":\"m{}\"}}\n", i));
        contents.push_str("{not json\n\n");
    }
    fs::write(&path, contents).unwrap();

    let store = LogStore::open(&path, 4, None);
    let messages: Vec<_> = store.entries().into_iter().filter_map(|e| e.message).collect();
    assert_eq!(messages, vec!["m2", "m3", "m4", "m5"]);
}

#[test]
fn test_reader_skips_lines_over_the_limit() {
    let long = format!("{{\"level\":\"info\",\"message\":\"{}\"}}", "y".repeat(200));
    let input = format!(
        "{{\"level\":\"info\",\"message\":\"before\"}}\n{}\n{{\"level\":\"error\",\"message\":\"after\"}}",
        long
    );

    let entries = read_entries(std::io::Cursor::new(input.as_bytes()), 100).unwrap();
    let messages: Vec<_> = entries.into_iter().filter_map(|e| e.message).collect();
    assert_eq!(messages, vec!["before", "after"]);

    let entries = read_entries(std::io::Cursor::new(input.as_bytes()), long.len()).unwrap();
    assert_eq!(entries.len(), 3);
}

#[test]
fn test_concurrent_batches_reach_file_in_memory_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gasoline.jsonl");
    let store = Arc::new(LogStore::open(&path, 10_000, None));

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..50 {
                    store.add_entries(vec![
                        entry(LogLevel::Info, &format!("w{}-{}-a", w, i)),
                        entry(LogLevel::Info, &format!("w{}-{}-b", w, i)),
                    ]);
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let in_memory: Vec<_> = store.entries().into_iter().filter_map(|e| e.message).collect();
    let on_disk: Vec<_> = LogStore::open(&path, 10_000, None)
        .entries()
        .into_iter()
        .filter_map(|e| e.message)
        .collect();
    assert_eq!(in_memory.len(), 400);
    assert_eq!(on_disk, in_memory);
}

#[test]
fn test_callback_fires_once_per_batch_with_inserted_entries() {
    let store = LogStore::in_memory(2);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        let seen = seen.clone();
        store.on_entries(Arc::new(move |batch: &[LogEntry]| {
            calls.fetch_add(1, Ordering::SeqCst);
            seen.fetch_add(batch.len(), Ordering::SeqCst);
        }));
    }

    store.add_entries((0..5).map(|i| entry(LogLevel::Log, &i.to_string())).collect());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(seen.load(Ordering::SeqCst), 5);
    assert_eq!(store.len(), 2);
}

#[test]
fn test_callback_may_reenter_store() {
    let store = Arc::new(LogStore::in_memory(10));
    let weak = Arc::downgrade(&store);
    store.on_entries(Arc::new(move |_batch: &[LogEntry]| {
        if let Some(store) = weak.upgrade() {
            assert!(store.len() > 0);
        }
    }));
    store.add_entries(vec![entry(LogLevel::Info, "x")]);
}

#[test]
fn test_ttl_hides_old_entries_but_not_loaded_ones() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gasoline.jsonl");
    fs::write(&path, "{\"level\":\"info\",\"message\":\"from disk\"}\n").unwrap();

    let store = LogStore::open(&path, 10, Some(Duration::from_millis(20)));
    store.add_entries(vec![entry(LogLevel::Info, "fresh")]);
    assert_eq!(store.entries().len(), 2);

    std::thread::sleep(Duration::from_millis(40));
    let remaining: Vec<_> = store.entries().into_iter().filter_map(|e| e.message).collect();
    assert_eq!(remaining, vec!["from disk"]);
}

#[test]
fn test_sequences_survive_ttl_filter() {
    let store = LogStore::in_memory(10);
    store.add_entries(vec![entry(LogLevel::Info, "a"), entry(LogLevel::Info, "b")]);
    let seq = store.sequenced();
    assert_eq!(seq[0].sequence, 1);
    assert_eq!(seq[1].sequence, 2);
}

#[test]
fn test_clear_truncates_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gasoline.jsonl");
    let store = LogStore::open(&path, 10, None);
    store.add_entries(vec![entry(LogLevel::Info, "a")]);

    store.clear_entries();
    assert!(store.is_empty());
    assert_eq!(fs::read_to_string(&path).unwrap(), "");
}

#[test]
fn test_write_failure_becomes_warning() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the file should be makes every write fail.
    let path = dir.path().join("blocked");
    fs::create_dir_all(&path).unwrap();

    let store = LogStore::open(&path, 10, None);
    assert_eq!(store.add_entries(vec![entry(LogLevel::Info, "a")]), 1);
    assert_eq!(store.len(), 1);

    let warnings = store.take_warnings();
    assert!(warnings.iter().any(|w| w.starts_with("log_append_failed")));
}

#[test]
fn test_warnings_are_one_shot_and_deduplicated() {
    let store = LogStore::in_memory(1);
    store.add_warning("disk full");
    store.add_warning("disk full");
    store.add_warning("");
    assert_eq!(store.take_warnings(), vec!["disk full".to_string()]);
    assert!(store.take_warnings().is_empty());

    store.add_warning("disk full");
    assert!(store.take_warnings().is_empty());
}
