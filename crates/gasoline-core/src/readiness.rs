//! Plugin readiness classification
//!
//! Fuses the two liveness channels of the extension (the `/pending-queries`
//! long-poll and the `/settings` heartbeat) with the AI Web Pilot toggle
//! into a verdict deciding whether a browser command may be dispatched.
//! The fused view is optimistic: either fresh channel counts as alive, and
//! staleness only produces a warning.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;

/// A channel older than this is stale
pub const FRESHNESS_THRESHOLD: Duration = Duration::seconds(5);

/// Raw readiness inputs, read under the capture lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessInput {
    /// AI Web Pilot toggle as last reported
    pub pilot_enabled: bool,
    /// Last `/pending-queries` poll
    pub last_poll_at: Option<DateTime<Utc>>,
    /// Last `/settings` post (or pilot toggle change)
    pub pilot_updated_at: Option<DateTime<Utc>>,
}

/// Outcome of the readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PilotVerdict {
    /// Extension never connected
    Off,
    /// Extension alive but the pilot toggle is off
    OnPilotDisabled,
    /// Command may be dispatched, optionally with a staleness warning
    OnPilotEnabled {
        /// Warning to prepend to the success summary
        warning: Option<String>,
    },
}

/// Rejection details for verdicts that refuse the command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Structured error code
    pub code: &'static str,
    /// Short message
    pub message: &'static str,
    /// Corrective action
    pub hint: &'static str,
}

const NOT_CONNECTED_HINT: &str = "The browser extension has never connected to the server. Please verify that:\n\
1. The Gasoline extension is installed and enabled in the browser\n\
2. The browser with the extension is running\n\
3. The extension's server URL is configured correctly\n\
4. Check the extension popup to verify connection status";

const PILOT_DISABLED_HINT: &str = "The extension is connected but AI Web Pilot is turned OFF. \
Open the Gasoline extension popup and enable 'AI Control', then retry this command.";

impl PilotVerdict {
    /// Whether the command should be attempted
    #[must_use]
    pub fn should_accept(&self) -> bool {
        matches!(self, Self::OnPilotEnabled { .. })
    }

    /// Staleness warning, if any
    #[must_use]
    pub fn warning(&self) -> Option<&str> {
        match self {
            Self::OnPilotEnabled { warning } => warning.as_deref(),
            _ => None,
        }
    }

    /// Error details when the command must be rejected
    #[must_use]
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::Off => Some(Rejection {
                code: "ext_timeout",
                message: "Extension not connected",
                hint: NOT_CONNECTED_HINT,
            }),
            Self::OnPilotDisabled => Some(Rejection {
                code: "pilot_disabled",
                message: "AI Web Pilot is disabled",
                hint: PILOT_DISABLED_HINT,
            }),
            Self::OnPilotEnabled { .. } => None,
        }
    }
}

fn age(now: DateTime<Utc>, at: Option<DateTime<Utc>>) -> Option<Duration> {
    at.map(|at| now - at)
}

fn is_fresh(age: Option<Duration>) -> bool {
    age.is_some_and(|a| a < FRESHNESS_THRESHOLD)
}

fn secs(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}

/// Classify readiness at `now`
#[must_use]
pub fn classify(input: &ReadinessInput, now: DateTime<Utc>) -> PilotVerdict {
    if input.last_poll_at.is_none() && input.pilot_updated_at.is_none() {
        return PilotVerdict::Off;
    }

    let poll_age = age(now, input.last_poll_at);
    let settings_age = age(now, input.pilot_updated_at);

    if is_fresh(poll_age) {
        if !input.pilot_enabled {
            return PilotVerdict::OnPilotDisabled;
        }
        return PilotVerdict::OnPilotEnabled { warning: None };
    }

    if is_fresh(settings_age) {
        if !input.pilot_enabled {
            return PilotVerdict::OnPilotDisabled;
        }
        let poll_secs = poll_age.map(secs).unwrap_or(0.0);
        return PilotVerdict::OnPilotEnabled {
            warning: Some(format!(
                "WARNING: Extension polling is stale (last poll {:.1}s ago, but settings POST is active). \
The plugin may be experiencing delays. If this command fails, inform the user that the browser \
extension may need attention or the page may need to be refreshed.",
                poll_secs
            )),
        };
    }

    // Both channels stale: attempt anyway and let the timeout path report failure.
    let last_connection = match (input.last_poll_at, input.pilot_updated_at) {
        (Some(p), Some(s)) => Some(p.max(s)),
        (p, s) => p.or(s),
    };
    let stale_message = match last_connection {
        Some(at) => format!(
            "Last connection from browser plugin was at {} ({:.1} seconds ago)",
            at.to_rfc3339_opts(SecondsFormat::Secs, true),
            secs(now - at)
        ),
        None => "Last connection from browser plugin was: never (server may have just started)"
            .to_string(),
    };

    PilotVerdict::OnPilotEnabled {
        warning: Some(format!(
            "WARNING: Extension connection is stale. {}\n\
The command will be attempted, but may fail. If it fails, inform the user to:\n\
1. Check that the browser with Gasoline extension is still running\n\
2. Reload the browser extension if the connection doesn't resume\n\
3. Refresh the web page to re-establish connection\n\
4. Verify the extension popup shows 'Connected'",
            stale_message
        )),
    }
}

/// Liveness source reported by `/pilot-status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PilotSource {
    /// Poll channel is fresh
    ExtensionPoll,
    /// Only the settings heartbeat is fresh
    SettingsHeartbeat,
    /// Both channels stale
    Stale,
    /// Extension never connected
    NeverConnected,
}

/// Pilot toggle state with freshness details
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PilotStatus {
    /// Whether AI Web Pilot is enabled
    pub enabled: bool,
    /// Which channel the status is derived from
    pub source: PilotSource,
    /// Whether the extension is considered connected
    pub extension_connected: bool,
    /// RFC 3339 time of the freshest contact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
    /// Human-readable age of the freshest contact, e.g. `2.3s`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll_ago: Option<String>,
}

/// Pilot status at `now`
#[must_use]
pub fn pilot_status(input: &ReadinessInput, now: DateTime<Utc>) -> PilotStatus {
    let mut status = PilotStatus {
        enabled: input.pilot_enabled,
        source: PilotSource::NeverConnected,
        extension_connected: false,
        last_update: None,
        last_poll_ago: None,
    };

    let stamp = |status: &mut PilotStatus, at: DateTime<Utc>| {
        status.last_update = Some(at.to_rfc3339_opts(SecondsFormat::Secs, true));
        status.last_poll_ago = Some(format!("{:.1}s", secs(now - at)));
    };

    match (input.last_poll_at, input.pilot_updated_at) {
        (None, None) => {}
        (Some(poll), _) if is_fresh(Some(now - poll)) => {
            status.source = PilotSource::ExtensionPoll;
            status.extension_connected = true;
            stamp(&mut status, poll);
        }
        (_, Some(settings)) if is_fresh(Some(now - settings)) => {
            status.source = PilotSource::SettingsHeartbeat;
            status.extension_connected = true;
            stamp(&mut status, settings);
        }
        (poll, settings) => {
            status.source = PilotSource::Stale;
            let latest = match (poll, settings) {
                (Some(p), Some(s)) => p.max(s),
                (p, s) => p.or(s).unwrap_or(now),
            };
            stamp(&mut status, latest);
        }
    }
    status
}
