use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::quantity::Quantity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Local,
    Child,
    Peer,
    Parent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Inactive,
    Unreachable,
}

/// A snapshot of a node's (local or mirrored) resource capacity.
///
/// Invariant: `total == available + used` whenever the registry's lock is
/// not held. Snapshots returned to callers are copies, never a live
/// reference into the registry's tables (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub node_id: String,
    pub role: NodeRole,
    pub total: Quantity,
    pub available: Quantity,
    pub used: Quantity,
    pub address: Option<String>,
    pub status: NodeStatus,
    pub last_updated: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl NodeCapacity {
    pub fn new(node_id: impl Into<String>, role: NodeRole, total: Quantity) -> Self {
        Self {
            node_id: node_id.into(),
            role,
            total,
            available: total,
            used: Quantity::ZERO,
            address: None,
            status: NodeStatus::Active,
            last_updated: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Pointwise invariant check, used by property tests: all four
    /// quantities on both `available` and `used` are non-negative and
    /// `total == available + used`.
    pub fn invariant_holds(&self) -> bool {
        self.available.is_non_negative()
            && self.used.is_non_negative()
            && self.available.add(&self.used) == self.total
    }
}
