pub mod capacity;
pub mod cluster;
pub mod flavor;
pub mod ids;
pub mod resources;
pub mod zone;

pub use capacity::Capacity;
pub use cluster::{ClusterMembership, ClusterSpec, ClusterType};
pub use flavor::{Flavor, FlavorCatalog};
pub use ids::{ApplicationId, ClusterId};
pub use resources::{ClusterResources, DiskSpeed, NodeResources, StorageType};
pub use zone::{Environment, Zone};
