pub mod allocation;
pub mod capacity;
pub mod quantity;
pub mod workload;

pub use allocation::{Allocation, AllocationState};
pub use capacity::{NodeCapacity, NodeRole, NodeStatus};
pub use quantity::Quantity;
pub use workload::{Workload, WorkloadKind, WorkloadStatus};
