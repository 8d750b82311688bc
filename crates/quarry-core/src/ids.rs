//! Identities for applications and clusters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The owner of a set of clusters: tenant, application, and instance name.
///
/// Instances whose name ends in `-t` are tester instances, deployed next to
/// the real instance to run verification traffic. Some placement rules are
/// relaxed for them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId {
    pub tenant: String,
    pub application: String,
    pub instance: String,
}

impl ApplicationId {
    pub fn new(tenant: &str, application: &str, instance: &str) -> Self {
        ApplicationId {
            tenant: tenant.to_string(),
            application: application.to_string(),
            instance: instance.to_string(),
        }
    }

    pub fn is_tester(&self) -> bool {
        self.instance.ends_with("-t")
    }

    /// Stable string form used as a store key: `tenant.application.instance`.
    pub fn serialized(&self) -> String {
        format!("{}.{}.{}", self.tenant, self.application, self.instance)
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.tenant, self.application, self.instance)
    }
}

/// Name of a cluster within an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub String);

impl ClusterId {
    pub fn new(id: &str) -> Self {
        ClusterId(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
