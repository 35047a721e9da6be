use dashmap::DashMap;
use tracing::{info, warn};

use crate::core::config::ResourceConfig;
use crate::core::error::CatalogError;
use crate::core::types::{Resource, ResourceId, ResourceKind};

/// In-memory catalog of live resources backed by `DashMap`.
///
/// A resource missing from the catalog is "dead": its cached buckets are
/// never current and its files are deleted on the next rebuild.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: DashMap<ResourceId, Resource>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
        }
    }

    /// Build a registry from configured resources, skipping invalid entries.
    pub fn from_config(entries: &[ResourceConfig]) -> Self {
        let registry = Self::new();
        for entry in entries {
            match entry.to_resource() {
                Ok(resource) => registry.register(resource),
                Err(e) => warn!(error = %e, "skipping configured resource"),
            }
        }
        registry
    }

    /// Add or replace a resource.
    pub fn register(&self, resource: Resource) {
        info!(resource_id = %resource.id, kind = %resource.kind, name = %resource.name, "resource registered");
        self.resources.insert(resource.id, resource);
    }

    /// Remove a resource from the catalog. Returns the removed entry.
    pub fn get(&self, resource_id: ResourceId) -> Option<Resource> {
        self.resources.get(&resource_id).map(|r| r.clone())
    }

    pub fn resolve(&self, resource_id: ResourceId) -> Result<Resource, CatalogError> {
        self.get(resource_id)
            .ok_or(CatalogError::ResourceNotFound { resource_id })
    }

    /// List resources, optionally filtered by kind, ordered by id.
    pub fn list(&self, kind: Option<ResourceKind>) -> Vec<Resource> {
        let mut list: Vec<Resource> = self
            .resources
            .iter()
            .filter(|r| kind.map(|k| r.value().kind == k).unwrap_or(true))
            .map(|r| r.value().clone())
            .collect();
        list.sort_by_key(|r| r.id);
        list
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    use crate::core::types::FileFormat;

    pub(crate) fn resource(id: i32, kind: ResourceKind) -> Resource {
        Resource {
            id: ResourceId::new(id),
            name: format!("resource-{id}"),
            kind,
            time_zone: chrono_tz::UTC,
            frequency: Duration::minutes(5),
            station_format: FileFormat::Csv,
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = ResourceRegistry::new();
        registry.register(resource(7, ResourceKind::WeatherCamera));

        assert!(registry.get(ResourceId::new(7)).is_some());
        assert_eq!(registry.resolve(ResourceId::new(7)).unwrap().name, "resource-7");
        assert!(registry.resolve(ResourceId::new(8)).is_err());
    }

    #[test]
    fn test_list_filters_by_kind_in_id_order() {
        let registry = ResourceRegistry::new();
        registry.register(resource(9, ResourceKind::WeatherStation));
        registry.register(resource(2, ResourceKind::WeatherCamera));
        registry.register(resource(4, ResourceKind::WeatherStation));

        let stations = registry.list(Some(ResourceKind::WeatherStation));
        let ids: Vec<i32> = stations.iter().map(|r| r.id.get()).collect();
        assert_eq!(ids, vec![4, 9]);
        assert_eq!(registry.list(None).len(), 3);
    }

    #[test]
    fn test_from_config_skips_invalid_entries() {
        let entries = vec![
            ResourceConfig {
                id: 1,
                name: "ok".to_string(),
                kind: ResourceKind::WeatherCamera,
                time_zone: chrono_tz::UTC,
                frequency_secs: 60,
                station_format: FileFormat::Csv,
            },
            ResourceConfig {
                id: 2,
                name: "bad".to_string(),
                kind: ResourceKind::WeatherStation,
                time_zone: chrono_tz::UTC,
                frequency_secs: 0,
                station_format: FileFormat::Csv,
            },
        ];
        let registry = ResourceRegistry::from_config(&entries);
        assert_eq!(registry.len(), 1);
    }
}
