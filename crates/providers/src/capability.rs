//! Optional provider behaviours and the set a provider advertises.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One behaviour a provider may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Request/response generation. Every provider has it.
    Execute,
    /// Incremental chunk delivery before final totals.
    Stream,
    /// Tool/function calling with a tool-choice policy.
    Tools,
    /// Dynamic model discovery.
    ListModels,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Execute => "execute",
            Capability::Stream => "stream",
            Capability::Tools => "tools",
            Capability::ListModels => "list_models",
        }
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The capability set of one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn execute_only() -> Self {
        Self::default().with(Capability::Execute)
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
