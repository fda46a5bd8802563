//! Name-indexed provider directory and the selection policy.
//!
//! Populated once at startup and then shared read-only behind an `Arc`, so
//! lookups take no lock.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::capability::{Capabilities, Capability};
use crate::error::ProviderError;
use crate::provider::Provider;

/// Public description of a registered provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub name: String,
    pub default_model: String,
    pub capabilities: Capabilities,
}

/// Inputs to provider selection, highest priority first.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Explicit override on the request.
    pub requested: Option<String>,
    pub tenant_default: Option<String>,
    pub global_default: Option<String>,
    /// The request carries tool definitions.
    pub wants_tools: bool,
}

impl Selection {
    pub fn requested(mut self, name: Option<String>) -> Self {
        self.requested = name;
        self
    }

    pub fn tenant_default(mut self, name: Option<String>) -> Self {
        self.tenant_default = name;
        self
    }

    pub fn global_default(mut self, name: Option<String>) -> Self {
        self.global_default = name;
        self
    }

    pub fn with_tools(mut self, wants_tools: bool) -> Self {
        self.wants_tools = wants_tools;
        self
    }

    /// First non-empty name in priority order, ignoring capabilities.
    pub fn resolved_name(&self) -> Option<&str> {
        [&self.requested, &self.tenant_default, &self.global_default]
            .into_iter()
            .filter_map(|n| n.as_deref())
            .map(str::trim)
            .find(|n| !n.is_empty())
    }

    fn defaults(&self) -> impl Iterator<Item = &str> {
        [&self.tenant_default, &self.global_default]
            .into_iter()
            .filter_map(|n| n.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }

    fn explicit(&self) -> Option<&str> {
        self.requested.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl core::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> &mut Self {
        let name = provider.name().to_string();
        info!(
            provider = %name,
            capabilities = ?provider.capabilities().iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            "registered provider"
        );
        self.providers.insert(name, provider);
        self
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Providers offering `capability`, sorted by name.
    pub fn with_capability(&self, capability: Capability) -> Vec<Arc<dyn Provider>> {
        self.names()
            .into_iter()
            .filter_map(|n| self.providers.get(&n).cloned())
            .filter(|p| p.capabilities().contains(capability))
            .collect()
    }

    pub fn describe(&self) -> Vec<ProviderInfo> {
        self.names()
            .into_iter()
            .filter_map(|n| self.providers.get(&n))
            .map(|p| ProviderInfo {
                name: p.name().to_string(),
                default_model: p.default_model().to_string(),
                capabilities: p.capabilities(),
            })
            .collect()
    }

    /// Resolve a provider: explicit override, then tenant default, then global default.
    ///
    /// When tools are requested an explicit override must support them. Without
    /// an override, the first tools-capable default wins, then the first
    /// tools-capable registered provider by name.
    pub fn select(&self, selection: &Selection) -> Result<Arc<dyn Provider>, ProviderError> {
        if let Some(name) = selection.explicit() {
            let provider = self.get(name)?;
            if selection.wants_tools {
                provider.require_tools()?;
            }
            return Ok(provider);
        }

        if selection.wants_tools {
            let preferred = selection
                .defaults()
                .filter_map(|n| self.providers.get(n))
                .find(|p| p.capabilities().contains(Capability::Tools))
                .cloned();
            if let Some(p) = preferred {
                return Ok(p);
            }
            if let Some(p) = self.with_capability(Capability::Tools).into_iter().next() {
                return Ok(p);
            }
            return Err(match selection.resolved_name() {
                Some(name) => ProviderError::CapabilityNotSupported {
                    provider: name.to_string(),
                    capability: Capability::Tools,
                },
                None => ProviderError::NoneResolved,
            });
        }

        match selection.defaults().next() {
            Some(name) => self.get(name),
            None => Err(ProviderError::NoneResolved),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{EchoProvider, StubProvider};

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new()
            .with(Arc::new(StubProvider::new()))
            .with(Arc::new(EchoProvider::new()))
    }

    fn sel() -> Selection {
        Selection::default()
    }

    fn select_err(r: &ProviderRegistry, s: &Selection) -> ProviderError {
        match r.select(s) {
            Ok(p) => panic!("unexpected provider {}", p.name()),
            Err(e) => e,
        }
    }

    #[test]
    fn explicit_override_beats_defaults() {
        let r = registry();
        let s = sel()
            .requested(Some("echo".into()))
            .tenant_default(Some("stub".into()))
            .global_default(Some("stub".into()));
        assert_eq!(r.select(&s).unwrap().name(), "echo");
    }

    #[test]
    fn tenant_default_beats_global_default() {
        let r = registry();
        let s = sel().tenant_default(Some("echo".into())).global_default(Some("stub".into()));
        assert_eq!(r.select(&s).unwrap().name(), "echo");

        let s = sel().global_default(Some("stub".into()));
        assert_eq!(r.select(&s).unwrap().name(), "stub");
    }

    #[test]
    fn blank_names_are_skipped() {
        let r = registry();
        let s = sel().requested(Some("  ".into())).global_default(Some("echo".into()));
        assert_eq!(r.select(&s).unwrap().name(), "echo");
        assert_eq!(s.resolved_name(), Some("echo"));
    }

    #[test]
    fn nothing_configured_is_an_error() {
        assert_eq!(select_err(&registry(), &sel()), ProviderError::NoneResolved);
    }

    #[test]
    fn unknown_name_is_not_found() {
        let s = sel().requested(Some("nope".into()));
        assert_eq!(select_err(&registry(), &s), ProviderError::NotFound("nope".into()));
    }

    #[test]
    fn tools_prefer_capable_provider_over_plain_default() {
        let r = registry();
        let s = sel().tenant_default(Some("echo".into())).with_tools(true);
        assert_eq!(r.select(&s).unwrap().name(), "stub");
    }

    #[test]
    fn explicit_provider_without_tools_is_rejected() {
        let r = registry();
        let s = sel().requested(Some("echo".into())).with_tools(true);
        assert_eq!(
            select_err(&r, &s),
            ProviderError::CapabilityNotSupported {
                provider: "echo".into(),
                capability: Capability::Tools
            }
        );
    }

    #[test]
    fn no_tools_provider_anywhere() {
        let r = ProviderRegistry::new().with(Arc::new(EchoProvider::new()));
        let s = sel().global_default(Some("echo".into())).with_tools(true);
        assert!(matches!(
            r.select(&s),
            Err(ProviderError::CapabilityNotSupported { capability: Capability::Tools, .. })
        ));
    }

    #[test]
    fn capability_query_reflects_accessors() {
        let r = registry();
        let echo = r.get("echo").unwrap();
        assert_eq!(echo.capabilities(), Capabilities::execute_only());
        assert!(echo.require_streaming().is_err());
        assert!(echo.require_model_lister().is_err());

        let stub = r.get("stub").unwrap();
        let all = [
            Capability::Execute,
            Capability::Stream,
            Capability::Tools,
            Capability::ListModels,
        ];
        for cap in all {
            assert!(stub.capabilities().contains(cap));
        }
        assert!(stub.require_streaming().is_ok());
    }

    #[test]
    fn describe_is_sorted() {
        let infos = registry().describe();
        let names: Vec<_> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "stub"]);
    }
}
