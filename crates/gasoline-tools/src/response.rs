//! Tool response construction
//!
//! Successful responses are a summary line followed by compact JSON.
//! Failures are [`ToolError`] envelopes rendered as
//! `Error: <code> — <message>` plus the JSON envelope, with `isError` set
//! so agents recognize them.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::{ContentBlock, ToolResult};

/// Structured error codes surfaced to agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Arguments failed to parse
    InvalidJson,
    /// A required parameter is absent
    MissingParam,
    /// A parameter has an unusable value
    InvalidParam,
    /// Discriminator (`what`, `action`, `format`) not recognized
    UnknownMode,
    /// Tool name not recognized
    UnknownTool,
    /// No result from the extension before the deadline
    ExtTimeout,
    /// Extension returned an error or malformed payload
    ExtError,
    /// AI Web Pilot is off
    PilotDisabled,
    /// A required subsystem is unavailable
    NotInitialized,
    /// Lookup target not found
    NoData,
    /// Unexpected server-side failure
    Internal,
    /// Filesystem path violates policy
    PathNotAllowed,
    /// Too many tool calls
    RateLimited,
    /// Pagination cursor fell off the ring buffer
    CursorExpired,
    /// Response could not be serialized
    MarshalFailed,
}

impl ErrorCode {
    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::MissingParam => "missing_param",
            Self::InvalidParam => "invalid_param",
            Self::UnknownMode => "unknown_mode",
            Self::UnknownTool => "unknown_tool",
            Self::ExtTimeout => "ext_timeout",
            Self::ExtError => "ext_error",
            Self::PilotDisabled => "pilot_disabled",
            Self::NotInitialized => "not_initialized",
            Self::NoData => "no_data",
            Self::Internal => "internal",
            Self::PathNotAllowed => "path_not_allowed",
            Self::RateLimited => "rate_limited",
            Self::CursorExpired => "cursor_expired",
            Self::MarshalFailed => "marshal_failed",
        }
    }

    /// Whether calling again unchanged can succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExtTimeout
                | Self::ExtError
                | Self::PilotDisabled
                | Self::RateLimited
                | Self::CursorExpired
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured tool error envelope
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{code}: {message}")]
pub struct ToolError {
    /// Error code
    #[serde(rename = "error")]
    pub code: ErrorCode,
    /// What went wrong
    pub message: String,
    /// What to do next
    pub retry: String,
    /// Whether retrying can help
    pub retryable: bool,
    /// Offending parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// Extra guidance (valid values, diagnostics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Set when the command this error describes will not change again
    #[serde(rename = "final", skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,
}

impl ToolError {
    /// New error with the code's default retryability
    pub fn new(code: ErrorCode, message: impl Into<String>, retry: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry: retry.into(),
            retryable: code.is_retryable(),
            param: None,
            hint: None,
            is_final: None,
        }
    }

    /// Name the offending parameter
    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    /// Attach a hint
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Mark the error as final
    #[must_use]
    pub fn with_final(mut self, is_final: bool) -> Self {
        self.is_final = Some(is_final);
        self
    }

    /// `invalid_json` for arguments that failed to decode
    pub fn invalid_json(err: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidJson,
            format!("Invalid JSON arguments: {}", err),
            "Fix JSON syntax and call again",
        )
    }

    /// `missing_param` naming the field
    pub fn missing_param(param: &str) -> Self {
        Self::new(
            ErrorCode::MissingParam,
            format!("Required parameter '{}' is missing", param),
            format!("Add the '{}' parameter and call again", param),
        )
        .with_param(param)
    }

    /// `unknown_mode` listing the valid values alphabetically
    pub fn unknown_mode(kind: &str, value: &str, param: &str, valid: &[&str]) -> Self {
        Self::new(
            ErrorCode::UnknownMode,
            format!("Unknown {} {}: {}", kind, param, value),
            format!("Use a valid value for '{}'", param),
        )
        .with_param(param)
        .with_hint(format!("Valid values: {}", sorted_list(valid)))
    }

    /// `internal` error; never worth retrying
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message, "Internal error - do not retry")
    }

    /// Render as an MCP tool result
    #[must_use]
    pub fn to_result(&self) -> ToolResult {
        let body = serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"error":"{}","retryable":false}}"#, self.code.as_str())
        });
        ToolResult {
            content: vec![ContentBlock::text(format!(
                "Error: {} — {}\n{}",
                self.code.as_str(),
                self.message,
                body
            ))],
            is_error: true,
        }
    }
}

impl From<ToolError> for ToolResult {
    fn from(err: ToolError) -> Self {
        err.to_result()
    }
}

/// Handler outcome; errors are rendered as structured tool errors
pub type ToolOutcome = std::result::Result<ToolResult, ToolError>;

/// Comma-separated, alphabetically sorted list
#[must_use]
pub fn sorted_list(values: &[&str]) -> String {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join(", ")
}

/// Single text block
pub fn text_response(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![ContentBlock::text(text)],
        is_error: false,
    }
}

fn summary_with_json(summary: &str, data: &impl Serialize) -> Result<String, ToolError> {
    let body = serde_json::to_string(data).map_err(|e| {
        ToolError::new(
            ErrorCode::MarshalFailed,
            format!("Failed to serialize response: {}", e),
            "Internal error - do not retry",
        )
    })?;
    Ok(if summary.is_empty() {
        body
    } else {
        format!("{}\n{}", summary, body)
    })
}

/// Summary line followed by compact JSON
pub fn json_response(summary: &str, data: &impl Serialize) -> ToolResult {
    match summary_with_json(summary, data) {
        Ok(text) => text_response(text),
        Err(e) => e.to_result(),
    }
}

/// Like [`json_response`] but flagged as an error
pub fn json_error_response(summary: &str, data: &impl Serialize) -> ToolResult {
    let mut result = json_response(summary, data);
    result.is_error = true;
    result
}

/// Append accumulated warnings as an extra content block
pub fn append_warnings(result: &mut ToolResult, warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    result
        .content
        .push(ContentBlock::text(format!("_warnings: {}", warnings.join("; "))));
}

/// Prepend a warning to the first text block
pub fn prepend_warning(result: &mut ToolResult, warning: &str) {
    match result.content.first_mut() {
        Some(block) if block.block_type == "text" => {
            block.text = format!("{}\n\n{}", warning, block.text);
        }
        _ => result.content.insert(0, ContentBlock::text(warning)),
    }
}

/// Truncate to at most `max` bytes on a char boundary, appending `...`
#[must_use]
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// JSON value for a tool result (used by the dispatcher)
#[must_use]
pub fn result_value(result: &ToolResult) -> Value {
    serde_json::to_value(result).unwrap_or_else(|_| {
        json!({
            "content": [{"type": "text", "text": "Internal error: failed to marshal result"}],
            "isError": true,
        })
    })
}

#[cfg(test)]
mod tests;
