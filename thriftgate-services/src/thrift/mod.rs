//! Thrift request routing for a layer-7 proxy.
//!
//! This module provides the streaming router filter that forwards Thrift
//! RPC calls from downstream clients to upstream clusters, plus a minimal
//! method-name route table to resolve messages to clusters.
//!
//! # Submodules
//!
//! - [`router`]: the streaming decoder filter bridging downstream events to
//!   an upstream connection.
//! - [`route`]: method-name route table implementing the core route traits.
//!
//! # Key Components
//!
//! - [`Router`](router::Router): the decoder filter. Resolves a route and a
//!   cluster per message, checks a connection out of the cluster's pool,
//!   re-encodes the message with the upstream-negotiated codecs, and feeds
//!   the response back to the downstream decoder.
//! - [`RouterFilterFactory`](router::RouterFilterFactory): `service_async`
//!   factory producing router instances for the filter chain.
//! - [`RouteMatcher`](route::RouteMatcher): compiled method-name route
//!   table.

pub mod route;
pub mod router;

pub use route::{RouteConfig, RouteMatcher, RouteMatcherFactory};
pub use router::{Router, RouterFilterFactory};
