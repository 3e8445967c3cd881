//! Gasoline Core - Browser Telemetry Store and Command Broker
//!
//! This crate holds the state shared between the browser-facing HTTP
//! endpoints and the agent-facing MCP tools:
//! - Buffers: bounded ring buffers with eviction-aware sequence numbers
//! - Capture: per-stream telemetry, tab tracking and pilot state
//! - Log store: JSONL-backed console log mirror
//! - Pagination: cursor paging across ring-buffer eviction
//! - Queries: pending-query broker and async command results
//! - Readiness: extension freshness classification
//! - State / Lifecycle: state directory, lock files and daemon takeover

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod annotations;
pub mod buffers;
pub mod capture;
pub mod error;
pub mod lifecycle;
pub mod log_store;
pub mod pagination;
pub mod queries;
pub mod rate_limiter;
pub mod readiness;
pub mod sessions;
pub mod shutdown;
pub mod state;
pub mod telemetry;

pub use annotations::{AnnotationSession, AnnotationStore, NamedSession};
pub use buffers::RingBuffer;
pub use capture::{BufferCapacities, BufferCounts, Capture, Stream, TrackingState};
pub use error::{format_error_for_cli, Error, Result, UserFriendlyError};
pub use lifecycle::{
    enforce_startup_policy, force_cleanup, stop_daemon, DaemonRegistration, ForceCleanupSummary,
    LaunchOptions, ProcessProbe, StartupDecision, StopOutcome,
};
pub use log_store::{validate_log_entries, LogStore};
pub use pagination::{
    build_cursor, paginate, paginate_filtered, parse_cursor, Cursor, CursorParams, PageMetadata,
    Sequenced,
};
pub use queries::{
    BrokerConfig, CommandResult, CommandStatus, PendingQuery, PendingQueryResponse, QueryBroker,
};
pub use rate_limiter::{RateLimitConfig, RateLimitResult, ToolCallLimiter};
pub use readiness::{classify, PilotSource, PilotStatus, PilotVerdict, ReadinessInput};
pub use sessions::{MemorySnapshotStore, SnapshotStore, SnapshotSummary, StateSnapshot};
pub use shutdown::{ShutdownController, ShutdownReason};
pub use state::{resolve_state_dir, DaemonFileLock, DaemonLockRecord, StatePaths};
pub use telemetry::{
    ConnectionState, EnhancedAction, ExtensionLog, LogEntry, LogLevel, NetworkBody,
    NetworkWaterfallEntry, PerformanceSnapshot, WebSocketEvent,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
