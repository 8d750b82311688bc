//! Lower bounds on node resources.
//!
//! Anything below these minimums cannot run the node agent plus a workload,
//! so requests for less are invalid and free nodes with less are never
//! allocated.

use quarry_core::{ClusterType, NodeResources};

#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub min_vcpu: f64,
    pub min_memory_gb: f64,
    pub min_disk_gb: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits { min_vcpu: 0.5, min_memory_gb: 4.0, min_disk_gb: 10.0 }
    }
}

impl ResourceLimits {
    /// Minimums by cluster type. Clusters that store data need disk for the
    /// indexes plus transaction logs; stateless containers can be small.
    pub fn for_cluster(cluster_type: ClusterType) -> Self {
        match cluster_type {
            ClusterType::Container => ResourceLimits::default(),
            ClusterType::Content | ClusterType::Combined => {
                ResourceLimits { min_disk_gb: 50.0, ..ResourceLimits::default() }
            }
        }
    }

    pub fn within(&self, resources: &NodeResources) -> bool {
        self.violation(resources).is_none()
    }

    /// The first dimension below its minimum, phrased for an error message.
    pub fn violation(&self, resources: &NodeResources) -> Option<String> {
        if resources.vcpu < self.min_vcpu {
            return Some(format!("vcpu must be at least {}, got {}", self.min_vcpu, resources.vcpu));
        }
        if resources.memory_gb < self.min_memory_gb {
            return Some(format!(
                "memory must be at least {} Gb, got {} Gb",
                self.min_memory_gb, resources.memory_gb
            ));
        }
        if resources.disk_gb < self.min_disk_gb {
            return Some(format!(
                "disk must be at least {} Gb, got {} Gb",
                self.min_disk_gb, resources.disk_gb
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimums() {
        let limits = ResourceLimits::default();
        assert!(limits.within(&NodeResources::new(0.5, 4.0, 10.0, 0.1)));
        assert!(!limits.within(&NodeResources::new(0.4, 4.0, 10.0, 0.1)));
        assert!(!limits.within(&NodeResources::new(1.0, 2.0, 10.0, 0.1)));
        assert!(!limits.within(&NodeResources::new(1.0, 4.0, 5.0, 0.1)));
    }

    #[test]
    fn test_violation_names_the_dimension() {
        let limits = ResourceLimits::default();
        let message = limits.violation(&NodeResources::new(1.0, 2.0, 100.0, 0.1));
        assert!(message.is_some_and(|m| m.contains("memory")));
    }

    #[test]
    fn test_content_clusters_need_more_disk() {
        let thin = NodeResources::new(2.0, 8.0, 20.0, 0.3);
        assert!(ResourceLimits::for_cluster(ClusterType::Container).within(&thin));
        assert!(!ResourceLimits::for_cluster(ClusterType::Content).within(&thin));
        assert!(!ResourceLimits::for_cluster(ClusterType::Combined).within(&thin));
        assert!(ResourceLimits::for_cluster(ClusterType::Content)
            .within(&NodeResources::new(2.0, 8.0, 50.0, 0.3)));
    }
}
