use super::*;

#[test]
fn test_cursor_expired_names_lost_range() {
    let error = Error::CursorExpired {
        requested: 200,
        oldest: 501,
    };

    let msg = error.to_string();
    assert!(msg.contains("cursor expired"));
    assert!(msg.contains("Requested sequence 200"));
    assert!(msg.contains("oldest available is 501"));
    assert!(msg.contains("Lost entries: 200 to 500"));
}

#[test]
fn test_query_timeout_message() {
    let error = Error::QueryTimeout("q-7".to_string());
    assert_eq!(error.to_string(), "timeout waiting for result q-7");
    assert!(error.user_message().contains("q-7"));
    assert!(error.suggestion().unwrap().contains("extension"));
}

#[test]
fn test_ownership_mismatch_message() {
    let error = Error::OwnershipMismatch {
        port: 7900,
        lock_pid: 51515,
        pid_file_pid: 51516,
    };

    let msg = error.to_string();
    assert!(msg.contains("ownership mismatch"));
    assert!(msg.contains("51515"));
    assert!(msg.contains("51516"));
    assert!(error.suggestion().unwrap().contains("7900"));
}

#[test]
fn test_format_error_for_cli() {
    let error = Error::TakeoverFailed(7890);

    let output = format_error_for_cli(&error);
    assert!(output.contains("7890"));
    assert!(output.contains("gasoline --stop 7890"));
}

#[test]
fn test_internal_has_no_suggestion() {
    let error = Error::Internal("boom".to_string());
    assert!(error.suggestion().is_none());
}
