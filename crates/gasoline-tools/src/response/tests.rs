use super::*;

#[test]
fn test_structured_error_rendering() {
    let result = ToolError::missing_param("what").to_result();
    assert!(result.is_error);

    let text = result.first_text();
    assert!(text.starts_with("Error: missing_param — Required parameter 'what' is missing"));

    let body = result.json_body().unwrap();
    assert_eq!(body["error"], "missing_param");
    assert_eq!(body["param"], "what");
    assert_eq!(body["retryable"], false);
    assert!(!body["retry"].as_str().unwrap().is_empty());
    assert!(body.get("hint").is_none());
    assert!(body.get("final").is_none());
}

#[test]
fn test_every_code_reports_retryable() {
    let codes = [
        ErrorCode::InvalidJson,
        ErrorCode::MissingParam,
        ErrorCode::InvalidParam,
        ErrorCode::UnknownMode,
        ErrorCode::UnknownTool,
        ErrorCode::ExtTimeout,
        ErrorCode::ExtError,
        ErrorCode::PilotDisabled,
        ErrorCode::NotInitialized,
        ErrorCode::NoData,
        ErrorCode::Internal,
        ErrorCode::PathNotAllowed,
        ErrorCode::RateLimited,
        ErrorCode::CursorExpired,
        ErrorCode::MarshalFailed,
    ];
    for code in codes {
        let body = ToolError::new(code, "m", "r").to_result().json_body().unwrap();
        assert_eq!(body["error"], code.as_str());
        assert_eq!(body["retryable"], code.is_retryable());
    }
    assert!(ErrorCode::ExtTimeout.is_retryable());
    assert!(!ErrorCode::Internal.is_retryable());
}

#[test]
fn test_unknown_mode_hint_is_alphabetical() {
    let err = ToolError::unknown_mode("observe", "nope", "what", &["logs", "errors", "actions"]);
    assert_eq!(err.hint.as_deref(), Some("Valid values: actions, errors, logs"));
    assert_eq!(err.param.as_deref(), Some("what"));
}

#[test]
fn test_final_flag_serializes_as_final() {
    let body = ToolError::new(ErrorCode::NoData, "gone", "start over")
        .with_final(true)
        .to_result()
        .json_body()
        .unwrap();
    assert_eq!(body["final"], true);
}

#[test]
fn test_json_response_layout() {
    let result = json_response("2 items", &serde_json::json!({"count": 2}));
    assert!(!result.is_error);
    assert_eq!(result.first_text(), "2 items\n{\"count\":2}");

    let bare = json_response("", &serde_json::json!([1]));
    assert_eq!(bare.first_text(), "[1]");

    assert!(json_error_response("failed", &serde_json::json!({})).is_error);
}

#[test]
fn test_warning_blocks() {
    let mut result = text_response("ok");
    append_warnings(&mut result, &[]);
    assert_eq!(result.content.len(), 1);

    append_warnings(&mut result, &["a".into(), "b".into()]);
    assert_eq!(result.content[1].text, "_warnings: a; b");

    prepend_warning(&mut result, "WARNING: stale");
    assert_eq!(result.content[0].text, "WARNING: stale\n\nok");
}

#[test]
fn test_truncate_respects_char_boundaries() {
    assert_eq!(truncate("short", 10), "short");
    assert_eq!(truncate("abcdef", 3), "abc...");
    assert_eq!(truncate("héllo", 2), "h...");
}
