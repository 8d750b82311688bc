//! Capacity validation and zone sizing policy.
//!
//! Everything here runs before any node is touched; a violation surfaces as
//! `InvalidSpecification` and aborts the prepare with the inventory unchanged.

use quarry_alloc::ResourceLimits;
use quarry_core::{Capacity, ClusterResources, ClusterSpec, Zone};

use crate::error::{ProvisionError, ProvisionResult};

/// Structural validity of a capacity request, checked against the raw request
/// so that nonsense is rejected even where zone policy would paper over it.
pub fn validate(zone: &Zone, cluster: &ClusterSpec, capacity: &Capacity) -> ProvisionResult<()> {
    let invalid = |message: String| Err(ProvisionError::InvalidSpecification(message));

    let min = &capacity.min;
    let max = &capacity.max;
    if min.nodes == 0 || min.groups == 0 {
        return invalid(format!("cluster {} must have at least one node and one group", cluster.id));
    }
    if min.nodes > max.nodes || min.groups > max.groups {
        return invalid(format!(
            "cluster {}: min size [{} nodes, {} groups] exceeds max size [{} nodes, {} groups]",
            cluster.id, min.nodes, min.groups, max.nodes, max.groups
        ));
    }
    if min.nodes % min.groups != 0 || max.nodes % max.groups != 0 {
        return invalid(format!(
            "the node count in cluster {} must be divisible by its group count",
            cluster.id
        ));
    }
    if !max.node_resources.satisfies(&min.node_resources) {
        return invalid(format!(
            "cluster {}: max node resources must be at least the min node resources",
            cluster.id
        ));
    }
    let limits = ResourceLimits::for_cluster(cluster.cluster_type);
    if let Some(violation) = limits.violation(&min.node_resources) {
        return invalid(format!("node resources in cluster {}: {violation}", cluster.id));
    }
    if zone.environment.is_production() && capacity.can_fail && min.nodes < 2 {
        return invalid(format!(
            "cluster {} must have at least 2 nodes in production to be redundant",
            cluster.id
        ));
    }
    Ok(())
}

/// What the zone actually allocates for a request. Dev and test zones shrink
/// everything to a single node, staging deploys a downscaled copy, production
/// allocates what was asked. `required` requests are taken literally in every
/// zone.
pub fn effective_capacity(zone: &Zone, capacity: Capacity) -> Capacity {
    use quarry_core::Environment::*;
    if capacity.required {
        return capacity;
    }
    match zone.environment {
        Production => capacity,
        Staging => Capacity {
            min: staging_size(capacity.min),
            max: staging_size(capacity.max),
            ..capacity
        },
        Dev | Test => Capacity {
            min: single_node(capacity.min),
            max: single_node(capacity.max),
            ..capacity
        },
    }
}

/// A tenth of the production size, floored at two nodes so that staging still
/// exercises the multi-node paths, in a single group.
fn staging_size(size: ClusterResources) -> ClusterResources {
    let nodes = (size.nodes / 10).max(2).min(size.nodes.max(1));
    ClusterResources::new(nodes, 1, size.node_resources)
}

fn single_node(size: ClusterResources) -> ClusterResources {
    ClusterResources::new(1, 1, size.node_resources)
}
