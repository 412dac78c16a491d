//! Pluggable placement strategies over the set of known neighbour
//! capacities.

use crate::model::{NodeCapacity, NodeRole, Quantity};

/// Hierarchy bias from spec §4.2: local > child > peer. Local is handled
/// before a strategy is ever consulted, so only child/peer/parent matter
/// here; parent never appears among delegation candidates but is ranked
/// last for completeness.
fn role_rank(role: NodeRole) -> u8 {
    match role {
        NodeRole::Local => 0,
        NodeRole::Child => 1,
        NodeRole::Peer => 2,
        NodeRole::Parent => 3,
    }
}

/// Where a workload should run, as decided by a [`Strategy`] together with
/// the scheduler's local-first policy.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Local,
    DelegateTo(String),
    Reject(String),
}

pub trait Strategy: Send + Sync {
    /// Picks a neighbour able to satisfy `requirements` from `candidates`,
    /// or `None` if none can. Candidates are already filtered to `Active`
    /// nodes by the caller.
    fn pick(&self, requirements: &Quantity, candidates: &[NodeCapacity]) -> Option<String>;
}

/// Picks the first candidate whose available capacity satisfies the
/// request, scanning children before peers (spec §4.2 step 2/3); within
/// a role, ties break by node id for determinism.
#[derive(Default)]
pub struct FirstFitStrategy;

impl Strategy for FirstFitStrategy {
    fn pick(&self, requirements: &Quantity, candidates: &[NodeCapacity]) -> Option<String> {
        let mut sorted: Vec<&NodeCapacity> = candidates.iter().collect();
        sorted.sort_by(|a, b| {
            role_rank(a.role)
                .cmp(&role_rank(b.role))
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        sorted
            .into_iter()
            .find(|node| node.available.satisfies(requirements))
            .map(|node| node.node_id.clone())
    }
}

/// Scores every satisfying candidate by spec §4.2's formula —
/// `(available.cpu - req.cpu)/available.cpu + (available.mem - req.mem)/available.mem`,
/// lower is a tighter fit — and picks the lowest score. Ties break by the
/// first-fit hierarchy order (local > child > peer), then node id.
#[derive(Default)]
pub struct BestFitStrategy;

impl BestFitStrategy {
    fn score(node: &NodeCapacity, req: &Quantity) -> f64 {
        let cpu_term = if node.available.cpu_millis > 0 {
            (node.available.cpu_millis - req.cpu_millis) as f64 / node.available.cpu_millis as f64
        } else {
            0.0
        };
        let mem_term = if node.available.memory_bytes > 0 {
            (node.available.memory_bytes - req.memory_bytes) as f64 / node.available.memory_bytes as f64
        } else {
            0.0
        };
        cpu_term + mem_term
    }
}

impl Strategy for BestFitStrategy {
    fn pick(&self, requirements: &Quantity, candidates: &[NodeCapacity]) -> Option<String> {
        let mut scored: Vec<(&NodeCapacity, f64)> = candidates
            .iter()
            .filter(|node| node.available.satisfies(requirements))
            .map(|node| (node, Self::score(node, requirements)))
            .collect();
        scored.sort_by(|(a, a_score), (b, b_score)| {
            a_score
                .partial_cmp(b_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| role_rank(a.role).cmp(&role_rank(b.role)))
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        scored.into_iter().next().map(|(node, _)| node.node_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeRole;

    fn node(id: &str, available_cpu: i64) -> NodeCapacity {
        let mut capacity = NodeCapacity::new(id, NodeRole::Child, Quantity::new(available_cpu, 0, 0, 0));
        capacity.available = Quantity::new(available_cpu, 0, 0, 0);
        capacity
    }

    #[test]
    fn first_fit_prefers_lowest_node_id_among_satisfying_candidates() {
        let strategy = FirstFitStrategy;
        let candidates = vec![node("b", 2000), node("a", 1500)];
        let requirements = Quantity::new(1000, 0, 0, 0);
        assert_eq!(strategy.pick(&requirements, &candidates), Some("a".to_string()));
    }

    #[test]
    fn best_fit_prefers_tightest_fit() {
        let strategy = BestFitStrategy;
        let candidates = vec![node("roomy", 4000), node("tight", 1200)];
        let requirements = Quantity::new(1000, 0, 0, 0);
        assert_eq!(strategy.pick(&requirements, &candidates), Some("tight".to_string()));
    }

    #[test]
    fn no_candidate_satisfies_returns_none() {
        let strategy = FirstFitStrategy;
        let candidates = vec![node("a", 100)];
        let requirements = Quantity::new(1000, 0, 0, 0);
        assert_eq!(strategy.pick(&requirements, &candidates), None);
    }
}
