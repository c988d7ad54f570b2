//! Read-time node health derivation.
//!
//! Nodes never transition to offline in storage. A reader computes health
//! from the time since the last heartbeat and treats a stale node as offline
//! and ineligible for new claims.

use chrono::Duration;
use serde::Serialize;

use crate::types::Timestamp;

/// Default staleness threshold: five minutes without a heartbeat.
pub const DEFAULT_STALE_THRESHOLD_SECS: i64 = 300;

/// Health of a node as seen by a reader at a specific instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeHealth {
    /// Heartbeating and not holding a run.
    Online,
    /// Heartbeating and holding a run.
    Busy,
    /// Never heartbeated, or last heartbeat older than the threshold.
    Offline,
}

impl NodeHealth {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeHealth::Online => "online",
            NodeHealth::Busy => "busy",
            NodeHealth::Offline => "offline",
        }
    }
}

/// Whether a heartbeat timestamp is too old to trust.
///
/// A node that has never heartbeated is stale.
pub fn is_stale(last_heartbeat_at: Option<Timestamp>, now: Timestamp, threshold: Duration) -> bool {
    match last_heartbeat_at {
        Some(last) => now - last > threshold,
        None => true,
    }
}

/// Whole seconds elapsed since the last heartbeat, if any.
pub fn seconds_since(last_heartbeat_at: Option<Timestamp>, now: Timestamp) -> Option<i64> {
    last_heartbeat_at.map(|last| (now - last).num_seconds().max(0))
}

/// Derive the health shown to operators.
///
/// Staleness wins over the stored busy flag: a busy node that stopped
/// heartbeating is reported offline so its stuck run is easy to spot.
pub fn derive_health(
    holds_run: bool,
    last_heartbeat_at: Option<Timestamp>,
    now: Timestamp,
    threshold: Duration,
) -> NodeHealth {
    if is_stale(last_heartbeat_at, now, threshold) {
        NodeHealth::Offline
    } else if holds_run {
        NodeHealth::Busy
    } else {
        NodeHealth::Online
    }
}
