use std::collections::BTreeSet;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::info;

/// Error raised while loading or mutating component enablement.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    #[error("component source unavailable: {0}")]
    Unavailable(String),
    #[error("component enablement cache has not been initialized")]
    NotInitialized,
}

/// Authoritative per-deployment feature switches.
#[async_trait]
pub trait ComponentSource: Send + Sync {
    async fn enabled_components(&self) -> Result<BTreeSet<String>, ComponentError>;
}

/// Component source backed by a fixed list, typically read from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticComponentSource {
    enabled: BTreeSet<String>,
}

impl StaticComponentSource {
    pub fn new<I, S>(enabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: enabled.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ComponentSource for StaticComponentSource {
    async fn enabled_components(&self) -> Result<BTreeSet<String>, ComponentError> {
        Ok(self.enabled.clone())
    }
}

/// Process-local cache over a [`ComponentSource`].
///
/// Until [`ComponentGate::initialize`] succeeds every lookup answers `None`
/// ("unknown"), and callers must skip work rather than guess.
#[derive(Debug, Default)]
pub struct ComponentGate {
    enabled: RwLock<Option<BTreeSet<String>>>,
}

impl ComponentGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn initialize(&self, source: &dyn ComponentSource) -> Result<(), ComponentError> {
        let enabled = source.enabled_components().await?;
        info!(components = ?enabled, "component enablement cache initialized");
        *self.enabled.write().expect("component gate lock poisoned") = Some(enabled);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.enabled
            .read()
            .expect("component gate lock poisoned")
            .is_some()
    }

    /// `None` while the cache is uninitialized.
    pub fn is_enabled(&self, component_id: &str) -> Option<bool> {
        self.enabled
            .read()
            .expect("component gate lock poisoned")
            .as_ref()
            .map(|enabled| enabled.contains(component_id))
    }

    /// Flip a component at runtime. Returns whether the state changed.
    pub fn set_enabled(&self, component_id: &str, enabled: bool) -> Result<bool, ComponentError> {
        let mut guard = self.enabled.write().expect("component gate lock poisoned");
        let components = guard.as_mut().ok_or(ComponentError::NotInitialized)?;
        let changed = if enabled {
            components.insert(component_id.to_string())
        } else {
            components.remove(component_id)
        };
        if changed {
            info!(component = component_id, enabled, "component enablement changed");
        }
        Ok(changed)
    }

    pub fn enabled_components(&self) -> Option<Vec<String>> {
        self.enabled
            .read()
            .expect("component gate lock poisoned")
            .as_ref()
            .map(|enabled| enabled.iter().cloned().collect())
    }
}
