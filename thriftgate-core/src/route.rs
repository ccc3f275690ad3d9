//! Route resolution surface consumed by the router filter.
//!
//! How a route table is configured and matched is the concern of the
//! surrounding application; the router only needs to turn a matched route
//! into the name of an upstream cluster.

/// Resolved routing decision for a single message.
pub trait RouteEntry {
    /// Name of the upstream cluster matched messages are forwarded to.
    fn cluster_name(&self) -> &str;
}

/// A matched route.
pub trait Route {
    /// The entry for this route, absent when the table had no match.
    fn route_entry(&self) -> Option<&dyn RouteEntry>;
}
