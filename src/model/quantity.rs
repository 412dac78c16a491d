use serde::{Deserialize, Serialize};

/// Fractional CPU, Kubernetes-style: 1000 millicpu == 1 whole core.
pub type MilliCpu = i64;

/// A resource quantity: CPU (millicpu), GPU count, memory and storage in
/// bytes. All four components are carried as `i64` so that arithmetic
/// never silently wraps the way an unsigned type would on underflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Quantity {
    pub cpu_millis: MilliCpu,
    pub gpu: i64,
    pub memory_bytes: i64,
    pub storage_bytes: i64,
}

impl Quantity {
    pub const ZERO: Quantity = Quantity {
        cpu_millis: 0,
        gpu: 0,
        memory_bytes: 0,
        storage_bytes: 0,
    };

    pub fn new(cpu_millis: MilliCpu, gpu: i64, memory_bytes: i64, storage_bytes: i64) -> Self {
        Self {
            cpu_millis,
            gpu,
            memory_bytes,
            storage_bytes,
        }
    }

    /// Pointwise `self >= other`.
    pub fn satisfies(&self, other: &Quantity) -> bool {
        self.cpu_millis >= other.cpu_millis
            && self.gpu >= other.gpu
            && self.memory_bytes >= other.memory_bytes
            && self.storage_bytes >= other.storage_bytes
    }

    /// True if every component is non-negative.
    pub fn is_non_negative(&self) -> bool {
        self.cpu_millis >= 0 && self.gpu >= 0 && self.memory_bytes >= 0 && self.storage_bytes >= 0
    }

    pub fn add(&self, other: &Quantity) -> Quantity {
        Quantity {
            cpu_millis: self.cpu_millis + other.cpu_millis,
            gpu: self.gpu + other.gpu,
            memory_bytes: self.memory_bytes + other.memory_bytes,
            storage_bytes: self.storage_bytes + other.storage_bytes,
        }
    }

    /// Exact subtraction. Returns `None` if the result would have a
    /// negative component — underflow is an allocator bug and must be
    /// rejected by the caller rather than silently clamped (spec §3).
    pub fn checked_sub(&self, other: &Quantity) -> Option<Quantity> {
        let result = Quantity {
            cpu_millis: self.cpu_millis - other.cpu_millis,
            gpu: self.gpu - other.gpu,
            memory_bytes: self.memory_bytes - other.memory_bytes,
            storage_bytes: self.storage_bytes - other.storage_bytes,
        };
        if result.is_non_negative() {
            Some(result)
        } else {
            None
        }
    }

    /// Saturating subtraction for display purposes only (spec §3: "All
    /// arithmetic is saturating at zero only for downstream display").
    pub fn saturating_sub(&self, other: &Quantity) -> Quantity {
        Quantity {
            cpu_millis: (self.cpu_millis - other.cpu_millis).max(0),
            gpu: (self.gpu - other.gpu).max(0),
            memory_bytes: (self.memory_bytes - other.memory_bytes).max(0),
            storage_bytes: (self.storage_bytes - other.storage_bytes).max(0),
        }
    }
}
