//! Device configuration database.
//!
//! Device config files describe per-product knowledge that cannot be queried
//! from the device itself, most importantly the semantics of its association
//! groups. Parsing of the on-disk format is the driver's concern; the core
//! consumes the resolved records through the [`ConfigManager`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Configured metadata for one association group of a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationConfig {
    pub label: String,
    pub max_nodes: u8,
    pub is_lifeline: bool,
    /// The group must stay a plain association group even on nodes that
    /// support multi-channel associations.
    pub no_endpoint: bool,
}

impl AssociationConfig {
    /// A plain group with the given label.
    #[must_use]
    pub fn new(label: impl Into<String>, max_nodes: u8) -> Self {
        Self {
            label: label.into(),
            max_nodes,
            is_lifeline: false,
            no_endpoint: false,
        }
    }

    /// Mark the group as the lifeline.
    #[must_use]
    pub const fn lifeline(mut self) -> Self {
        self.is_lifeline = true;
        self
    }

    /// Pin the group to plain associations.
    #[must_use]
    pub const fn without_endpoints(mut self) -> Self {
        self.no_endpoint = true;
        self
    }
}

/// Resolved configuration record for one product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    pub label: Option<String>,
    /// Association group metadata keyed by 1-based group id.
    pub associations: HashMap<u8, AssociationConfig>,
}

/// Lookup table from the manufacturer triple to device configuration.
#[derive(Debug, Default)]
pub struct ConfigManager {
    configs: RwLock<HashMap<(u16, u16, u16), Arc<DeviceConfig>>>,
}

impl ConfigManager {
    /// Create an empty config database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a configuration record for a product.
    pub fn register(
        &self,
        manufacturer_id: u16,
        product_type: u16,
        product_id: u16,
        config: DeviceConfig,
    ) {
        self.configs
            .write()
            .insert((manufacturer_id, product_type, product_id), Arc::new(config));
    }

    /// Look up the configuration for a product.
    #[must_use]
    pub fn lookup(
        &self,
        manufacturer_id: u16,
        product_type: u16,
        product_id: u16,
    ) -> Option<Arc<DeviceConfig>> {
        self.configs
            .read()
            .get(&(manufacturer_id, product_type, product_id))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_manufacturer_triple() {
        let manager = ConfigManager::new();
        let mut config = DeviceConfig {
            label: Some("Test Plug".into()),
            ..Default::default()
        };
        config
            .associations
            .insert(1, AssociationConfig::new("Lifeline", 1).lifeline());
        manager.register(0x010F, 0x0600, 0x1000, config);

        let found = manager.lookup(0x010F, 0x0600, 0x1000).expect("registered");
        assert_eq!(found.label.as_deref(), Some("Test Plug"));
        assert!(found.associations[&1].is_lifeline);

        assert!(manager.lookup(0x010F, 0x0600, 0x1001).is_none());
    }

    #[test]
    fn association_config_builders() {
        let config = AssociationConfig::new("Group 2", 5).without_endpoints();
        assert_eq!(config.max_nodes, 5);
        assert!(config.no_endpoint);
        assert!(!config.is_lifeline);
    }
}
