//! Upstream cluster and connection-pool surface.
//!
//! The pool multiplexes callers onto a bounded set of upstream TCP
//! connections with explicit check-out ([`ConnectionPool::new_connection`])
//! and check-in ([`ConnectionData::release`]). Between those two points the
//! checked-out connection is exclusively owned by its tenant, which also
//! makes the tenant the receiver of the connection's read-side events
//! ([`UpstreamCallbacks`]).
//!
//! Acquisition may complete synchronously (an idle connection is reused) or
//! asynchronously; the asynchronous completion is delivered by the event
//! loop to the requester's [`ConnPoolCallbacks`] implementation. Everything
//! runs on a single per-worker thread, so callbacks never race.

use std::any::Any;

use bytes::BytesMut;
use http::HeaderMap;

use crate::{
    connection::{Connection, ConnectionEvent},
    thrift::{protocol::ProtocolType, transport::TransportType},
};

/// Why a pool acquisition failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolFailureReason {
    /// The pool is at its connection limit and cannot queue the request.
    Overflow,
    LocalConnectionFailure,
    RemoteConnectionFailure,
    Timeout,
}

/// Typed sticky storage attached to a pooled connection record.
///
/// The slot survives check-in/check-out cycles, so a protocol can memoize
/// per-connection negotiation results (e.g. a completed upgrade) across
/// successive tenants.
#[derive(Default)]
pub struct ConnectionStateSlot(Option<Box<dyn Any>>);

impl ConnectionStateSlot {
    pub fn set<T: Any>(&mut self, state: T) {
        self.0 = Some(Box::new(state));
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|s| s.downcast_ref())
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0.as_deref_mut().and_then(|s| s.downcast_mut())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

/// A checked-out pooled connection plus its sticky record.
///
/// Dropping the value does NOT check the connection back in: a tenant that
/// closes the connection simply drops it, and the pool reclaims the record
/// from the connection's own close event.
pub trait ConnectionData {
    fn connection(&mut self) -> &mut dyn Connection;

    fn connection_state(&mut self) -> &mut ConnectionStateSlot;

    /// Checks the connection back into the pool for reuse.
    fn release(self: Box<Self>);
}

/// Cancellation handle for a pending acquisition.
pub trait CancelHandle {
    fn cancel(self: Box<Self>);
}

/// Outcome of a connection request against the pool.
pub enum PoolRequest {
    /// An idle connection was available; the caller owns it immediately.
    Ready(Box<dyn ConnectionData>),
    /// Acquisition is in flight; completion arrives via
    /// [`ConnPoolCallbacks`].
    Pending(Box<dyn CancelHandle>),
}

/// Shared per-cluster TCP connection pool.
pub trait ConnectionPool {
    fn new_connection(&mut self) -> PoolRequest;
}

/// Receiver of an asynchronous pool acquisition outcome.
pub trait ConnPoolCallbacks<CX> {
    fn on_pool_ready(&mut self, cx: &mut CX, conn: Box<dyn ConnectionData>);
    fn on_pool_failure(&mut self, cx: &mut CX, reason: PoolFailureReason);
}

/// Read-side events of an exclusively owned upstream connection, delivered
/// to whichever component currently holds its [`ConnectionData`].
pub trait UpstreamCallbacks<CX> {
    fn on_upstream_data(&mut self, cx: &mut CX, buffer: &mut BytesMut, end_stream: bool);
    fn on_event(&mut self, cx: &mut CX, event: ConnectionEvent);
}

/// Per-request criteria for load-balancer subset selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataMatchCriteria {
    pub criteria: Vec<(String, String)>,
}

/// Per-request context offered to upstream host selection.
///
/// All queries default to absent; a caller overrides only what it can
/// answer. This keeps load-balancer integration an extension point without
/// API churn.
pub trait LoadBalancerContext {
    /// Hash key for consistent-hashing load balancers.
    fn compute_hash_key(&mut self) -> Option<u64> {
        None
    }

    fn metadata_match_criteria(&mut self) -> Option<&MetadataMatchCriteria> {
        None
    }

    fn downstream_headers(&mut self) -> Option<&HeaderMap> {
        None
    }

    fn downstream_connection(&mut self) -> Option<&mut dyn Connection> {
        None
    }
}

/// Immutable snapshot of a cluster's router-relevant configuration.
#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    pub name: String,
    /// Clusters in maintenance mode accept no new requests.
    pub maintenance_mode: bool,
    /// Upstream transport; `Auto` inherits the downstream type.
    pub transport: TransportType,
    /// Upstream protocol; `Auto` inherits the downstream type.
    pub protocol: ProtocolType,
}

impl ClusterSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        ClusterSnapshot {
            name: name.into(),
            maintenance_mode: false,
            transport: TransportType::Auto,
            protocol: ProtocolType::Auto,
        }
    }
}

/// Upstream cluster registry, thread-local to a worker.
pub trait ClusterManager {
    /// Snapshot of the named cluster; `None` when the cluster is unknown.
    fn get(&self, name: &str) -> Option<ClusterSnapshot>;

    /// TCP connection pool for the named cluster; `None` when no healthy
    /// host is available.
    fn tcp_conn_pool(
        &mut self,
        name: &str,
        context: &mut dyn LoadBalancerContext,
    ) -> Option<&mut dyn ConnectionPool>;
}
