//! Named flavors and the flavors.toml catalog parser.

use crate::resources::{DiskSpeed, NodeResources, StorageType};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A named resource envelope operators can refer to when registering nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flavor {
    pub name: String,
    pub resources: NodeResources,
}

impl Flavor {
    pub fn new(name: &str, resources: NodeResources) -> Self {
        Flavor { name: name.to_string(), resources }
    }
}

/// The set of flavors known to a zone, loaded from a TOML catalog:
///
/// ```toml
/// [[flavor]]
/// name = "d-4-16"
/// vcpu = 4
/// memory_gb = 16
/// disk_gb = 100
/// bandwidth_gbps = 1
/// disk_speed = "fast"      # optional, defaults to fast
/// storage_type = "local"   # optional, defaults to any
/// ```
#[derive(Debug, Clone, Default)]
pub struct FlavorCatalog {
    flavors: Vec<Flavor>,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    flavor: Vec<FlavorEntry>,
}

#[derive(Deserialize)]
struct FlavorEntry {
    name: String,
    vcpu: f64,
    memory_gb: f64,
    disk_gb: f64,
    bandwidth_gbps: f64,
    disk_speed: Option<DiskSpeed>,
    storage_type: Option<StorageType>,
}

impl FlavorCatalog {
    pub fn new(flavors: Vec<Flavor>) -> Self {
        FlavorCatalog { flavors }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let file: CatalogFile = toml::from_str(content)?;
        let flavors = file
            .flavor
            .into_iter()
            .map(|e| Flavor {
                name: e.name,
                resources: NodeResources {
                    vcpu: e.vcpu,
                    memory_gb: e.memory_gb,
                    disk_gb: e.disk_gb,
                    bandwidth_gbps: e.bandwidth_gbps,
                    disk_speed: e.disk_speed.unwrap_or(DiskSpeed::Fast),
                    storage_type: e.storage_type.unwrap_or(StorageType::Any),
                },
            })
            .collect();
        Ok(FlavorCatalog { flavors })
    }

    pub fn get(&self, name: &str) -> Option<&Flavor> {
        self.flavors.iter().find(|f| f.name == name)
    }

    pub fn flavors(&self) -> &[Flavor] {
        &self.flavors
    }
}
