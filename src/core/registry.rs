//! Route registry
//!
//! Concurrent map of registered routes keyed by id, with a secondary index
//! from consumed endpoint to route id.

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use log::debug;

use super::error::{RunnerError, RunnerResult};
use crate::pipeline::RouteDefinition;

pub struct RouteRegistry {
    routes: DashMap<String, Arc<RouteDefinition>>,
    endpoints: DashMap<String, String>,
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
            endpoints: DashMap::new(),
        }
    }

    pub fn get_route(&self, id: &str) -> Option<Arc<RouteDefinition>> {
        self.routes.get(id).map(|entry| entry.value().clone())
    }

    /// Route consuming the given endpoint, if any
    pub fn route_for_endpoint(&self, endpoint: &str) -> Option<Arc<RouteDefinition>> {
        let id = self.endpoints.get(endpoint)?.value().clone();
        self.get_route(&id)
    }

    pub fn contains_route(&self, id: &str) -> bool {
        self.routes.contains_key(id)
    }

    /// Insert a route. Fails if the id or the consumed endpoint is taken.
    pub fn insert_route(&self, id: String, route: Arc<RouteDefinition>) -> RunnerResult<()> {
        let endpoint = route.from.clone();

        let endpoint_slot = match self.endpoints.entry(endpoint.clone()) {
            Entry::Occupied(owner) => {
                return Err(RunnerError::Registration {
                    route: id,
                    reason: format!(
                        "endpoint '{endpoint}' is already consumed by route '{}'",
                        owner.get()
                    ),
                });
            }
            Entry::Vacant(slot) => slot,
        };

        match self.routes.entry(id.clone()) {
            Entry::Occupied(_) => Err(RunnerError::Registration {
                route: id,
                reason: "a route with this id is already registered".to_string(),
            }),
            Entry::Vacant(slot) => {
                debug!("Inserting route with ID: {id}");
                endpoint_slot.insert(id);
                slot.insert(route);
                Ok(())
            }
        }
    }

    pub fn remove_route(&self, id: &str) -> Option<Arc<RouteDefinition>> {
        debug!("Removing route with ID: {id}");
        let (_, route) = self.routes.remove(id)?;
        self.endpoints
            .remove_if(&route.from, |_, owner| owner.as_str() == id);
        Some(route)
    }

    pub fn list_route_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .routes
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn get_stats(&self) -> RegistryStats {
        RegistryStats {
            route_count: self.routes.len(),
        }
    }
}

/// Statistics about registry contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub route_count: usize,
}
