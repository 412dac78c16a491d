use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::quantity::Quantity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationState {
    Allocated,
    Released,
}

/// A ledger entry recording that a workload currently owns part of a
/// node's capacity. Created atomically with the capacity subtraction
/// that funds it (spec §3); released exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub id: u64,
    pub workload_id: String,
    pub node_id: String,
    pub amount: Quantity,
    pub allocated_at: DateTime<Utc>,
    pub state: AllocationState,
}

impl Allocation {
    pub fn new(id: u64, workload_id: impl Into<String>, node_id: impl Into<String>, amount: Quantity) -> Self {
        Self {
            id,
            workload_id: workload_id.into(),
            node_id: node_id.into(),
            amount,
            allocated_at: Utc::now(),
            state: AllocationState::Allocated,
        }
    }

    pub fn is_released(&self) -> bool {
        matches!(self.state, AllocationState::Released)
    }
}
