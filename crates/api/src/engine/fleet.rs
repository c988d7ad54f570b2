//! Operator-facing node views with health derived at read time.

use chrono::Duration;
use forge_core::health::{self, NodeHealth};
use forge_core::node_keys;
use forge_core::types::{DbId, Timestamp};
use forge_db::models::node::Node;
use forge_db::models::status::NodeStatus;
use serde::Serialize;

/// A node as shown to operators.
///
/// `status` is what storage last recorded. `health` is what an operator
/// should believe: a node whose heartbeat is older than the staleness
/// threshold is `offline` even if storage still says `busy`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub id: DbId,
    pub name: String,
    pub node_type: String,
    pub status: &'static str,
    pub health: NodeHealth,
    pub stale: bool,
    pub seconds_since_heartbeat: Option<i64>,
    pub capabilities: serde_json::Value,
    pub api_key_masked: String,
    pub last_heartbeat_at: Option<Timestamp>,
    pub current_run_id: Option<DbId>,
    pub deregistered_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl NodeSummary {
    pub fn from_node(node: Node, now: Timestamp, stale_threshold: Duration) -> Self {
        let stale = health::is_stale(node.last_heartbeat_at, now, stale_threshold);
        let health = if node.is_deregistered() {
            NodeHealth::Offline
        } else {
            health::derive_health(
                node.current_run_id.is_some(),
                node.last_heartbeat_at,
                now,
                stale_threshold,
            )
        };

        Self {
            id: node.id,
            status: NodeStatus::from_id(node.status_id).map_or("unknown", NodeStatus::name),
            health,
            stale,
            seconds_since_heartbeat: health::seconds_since(node.last_heartbeat_at, now),
            api_key_masked: node_keys::mask_key(&node.api_key_suffix),
            name: node.name,
            node_type: node.node_type,
            capabilities: node.capabilities,
            last_heartbeat_at: node.last_heartbeat_at,
            current_run_id: node.current_run_id,
            deregistered_at: node.deregistered_at,
            created_at: node.created_at,
        }
    }

    /// Holds a run but has stopped heartbeating: the run is probably stuck.
    pub fn has_stuck_run(&self) -> bool {
        self.stale && self.current_run_id.is_some()
    }
}

/// Fleet-wide counts over active (non-deregistered) nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FleetStats {
    pub total_nodes: usize,
    pub online: usize,
    pub busy: usize,
    pub offline: usize,
    /// Nodes holding a run while stale.
    pub stuck_runs: usize,
}

impl FleetStats {
    pub fn from_summaries(summaries: &[NodeSummary]) -> Self {
        summaries
            .iter()
            .filter(|s| s.deregistered_at.is_none())
            .fold(Self::default(), |mut stats, s| {
                stats.total_nodes += 1;
                match s.health {
                    NodeHealth::Online => stats.online += 1,
                    NodeHealth::Busy => stats.busy += 1,
                    NodeHealth::Offline => stats.offline += 1,
                }
                if s.has_stuck_run() {
                    stats.stuck_runs += 1;
                }
                stats
            })
    }
}
