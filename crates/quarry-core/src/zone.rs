//! Zone configuration passed explicitly to everything that needs it.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    Staging,
    Dev,
    Test,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }

    pub fn parse(s: &str) -> Option<Environment> {
        match s {
            "production" | "prod" => Some(Environment::Production),
            "staging" => Some(Environment::Staging),
            "dev" => Some(Environment::Dev),
            "test" => Some(Environment::Test),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Dev => "dev",
            Environment::Test => "test",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The zone this control plane instance manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    pub environment: Environment,
}

impl Zone {
    pub fn new(environment: Environment) -> Self {
        Zone { environment }
    }

    pub fn production() -> Self {
        Zone::new(Environment::Production)
    }
}
