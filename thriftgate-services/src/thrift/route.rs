//! Method-name route table.
//!
//! A minimal concrete implementation of the core route traits: each route
//! maps an exact Thrift method name to an upstream cluster, with an optional
//! catch-all entry. Richer matching (service prefixes, header matching,
//! weighted clusters, runtime updates) belongs to the surrounding
//! application.

use std::{collections::HashMap, rc::Rc};

use serde::{Deserialize, Serialize};
use service_async::{AsyncMakeService, MakeService};
use thriftgate_core::{
    bail_into,
    route::{Route, RouteEntry},
    thrift::MessageMetadata,
    AnyResult,
};

use crate::AnyError;

/// Configuration for a single route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Exact method name to match. An empty string matches every method and
    /// acts as the catch-all entry.
    #[serde(default)]
    pub method_name: String,

    /// Name of the upstream cluster receiving matched messages.
    pub cluster: String,
}

struct MethodNameRouteEntry {
    cluster: String,
}

impl RouteEntry for MethodNameRouteEntry {
    fn cluster_name(&self) -> &str {
        &self.cluster
    }
}

struct ResolvedRoute {
    entry: MethodNameRouteEntry,
}

impl Route for ResolvedRoute {
    fn route_entry(&self) -> Option<&dyn RouteEntry> {
        Some(&self.entry)
    }
}

/// Compiled route table.
pub struct RouteMatcher {
    methods: HashMap<String, Rc<ResolvedRoute>>,
    catch_all: Option<Rc<ResolvedRoute>>,
}

impl RouteMatcher {
    pub fn new(routes: impl IntoIterator<Item = RouteConfig>) -> AnyResult<Self> {
        let mut methods: HashMap<String, Rc<ResolvedRoute>> = HashMap::new();
        let mut catch_all = None;
        for route in routes {
            if route.cluster.is_empty() {
                bail_into!("route for method '{}' has an empty cluster", route.method_name);
            }
            let resolved = Rc::new(ResolvedRoute {
                entry: MethodNameRouteEntry {
                    cluster: route.cluster,
                },
            });
            if route.method_name.is_empty() {
                if catch_all.replace(resolved).is_some() {
                    bail_into!("duplicate catch-all route");
                }
            } else if methods.insert(route.method_name.clone(), resolved).is_some() {
                bail_into!("duplicate route for method '{}'", route.method_name);
            }
        }
        Ok(RouteMatcher { methods, catch_all })
    }

    /// Resolves a message to a route, exact method match first.
    pub fn route(&self, metadata: &MessageMetadata) -> Option<Rc<dyn Route>> {
        self.methods
            .get(&metadata.method_name)
            .or(self.catch_all.as_ref())
            .map(|r| r.clone() as Rc<dyn Route>)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RouteFactoryError {
    #[error("invalid route table: {0:?}")]
    InvalidRoutes(#[from] AnyError),
}

/// Factory for building [`RouteMatcher`] instances from configuration.
///
/// Recreating the matcher through the factory is how a route-table update
/// is rolled out: the surrounding stack swaps the matcher, in-flight
/// messages keep the route they already resolved.
pub struct RouteMatcherFactory {
    routes: Vec<RouteConfig>,
}

impl RouteMatcherFactory {
    pub fn new(routes: Vec<RouteConfig>) -> Self {
        RouteMatcherFactory { routes }
    }
}

impl MakeService for RouteMatcherFactory {
    type Service = RouteMatcher;
    type Error = RouteFactoryError;

    fn make_via_ref(&self, _old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        Ok(RouteMatcher::new(self.routes.clone())?)
    }
}

impl AsyncMakeService for RouteMatcherFactory {
    type Service = RouteMatcher;
    type Error = RouteFactoryError;

    async fn make_via_ref(
        &self,
        _old: Option<&Self::Service>,
    ) -> Result<Self::Service, Self::Error> {
        Ok(RouteMatcher::new(self.routes.clone())?)
    }
}
