//! Streaming Thrift request router filter.
//!
//! The router bridges a downstream Thrift decoder to an upstream cluster:
//! it receives each downstream message as a stream of structural events,
//! resolves a route and a cluster at `message_begin`, checks a connection
//! out of the cluster's pool, re-encodes the message with the
//! upstream-negotiated transport and protocol, and then owns the upstream
//! read side until a complete reply has been fed back to the downstream
//! decoder.
//!
//! # Key Components
//!
//! - [`Router`]: the decoder filter. Also implements the pool and upstream
//!   connection callback traits, since it is the tenant of whatever the
//!   pool hands out.
//! - [`RouterFilterFactory`]: `service_async` factory producing router
//!   instances from a shared cluster manager and codec registry.
//!
//! # Flow control
//!
//! `message_begin` is the only event that suspends the decoder: on a missed
//! route or cluster check (a local reply is sent), on asynchronous pool
//! acquisition, and while a protocol upgrade handshake is in flight. All
//! other events forward to the encoder and continue. The decoder is resumed
//! with `continue_decoding` once the upstream connection is ready for the
//! request.
//!
//! # Failure mapping
//!
//! Two-way calls surface failures as Thrift application exceptions through
//! `send_local_reply`; one-way messages have no reply channel, so their
//! only failure signal is dropping the downstream connection. A truncated
//! response also drops the downstream connection, because partial response
//! bytes may already have been forwarded.

mod upstream;

#[cfg(test)]
mod mock;

use std::{convert::Infallible, mem, rc::Rc};

use bytes::BytesMut;
use service_async::{AsyncMakeService, MakeService};
use thriftgate_core::{
    connection::{Connection, ConnectionCloseType, ConnectionEvent},
    filter::{DecoderFilter, DecoderFilterBase, DecoderFilterCallbacks, FilterStatus},
    route::Route,
    thrift::{
        protocol::{CodecFactory, ProtocolType},
        transport::TransportType,
        AppException, AppExceptionType, FieldType, MessageMetadata, MessageType,
    },
    upstream::{
        ClusterManager, ConnPoolCallbacks, ConnectionData, LoadBalancerContext, PoolFailureReason,
        PoolRequest, UpstreamCallbacks,
    },
};
use tracing::{debug, trace};

use upstream::{ReleaseAt, ResponseOutcome, UpstreamRequest, UpstreamState};

/// Streaming Thrift router filter.
///
/// One instance handles one downstream message; the factory creates a fresh
/// router per message. The per-stream filter context `CX` is passed into
/// every event by the dispatch loop.
pub struct Router<CM, F> {
    cluster_manager: CM,
    codecs: F,
    route: Option<Rc<dyn Route>>,
    upstream: Option<UpstreamRequest>,
    local_reply_sent: bool,
}

impl<CM, F> Router<CM, F>
where
    CM: ClusterManager,
    F: CodecFactory,
{
    pub fn new(cluster_manager: CM, codecs: F) -> Self {
        Router {
            cluster_manager,
            codecs,
            route: None,
            upstream: None,
            local_reply_sent: false,
        }
    }

    /// Route resolved for the in-flight message. Pinned at `message_begin`
    /// so later table swaps do not affect this request.
    pub fn route(&self) -> Option<&Rc<dyn Route>> {
        self.route.as_ref()
    }

    fn send_local_reply<CX: DecoderFilterCallbacks>(&mut self, cx: &mut CX, reply: AppException) {
        // one local reply per router lifetime; later failures are moot
        if self.local_reply_sent {
            return;
        }
        self.local_reply_sent = true;
        cx.send_local_reply(reply, true);
    }

    /// Routes a failure to the downstream side. One-way messages have no
    /// reply channel, so their only failure signal is dropping the
    /// downstream connection; two-way calls get the exception as a local
    /// reply.
    fn send_failure<CX: DecoderFilterCallbacks>(
        &mut self,
        cx: &mut CX,
        message_type: MessageType,
        reply: AppException,
    ) {
        if message_type == MessageType::Oneway {
            cx.reset_downstream_connection();
        } else {
            self.send_local_reply(cx, reply);
        }
    }

    fn send_connection_failure<CX: DecoderFilterCallbacks>(
        &mut self,
        cx: &mut CX,
        message_type: MessageType,
    ) {
        self.send_failure(
            cx,
            message_type,
            AppException::new(AppExceptionType::InternalError, "connection failure"),
        );
    }

    /// Brings a pool-returned connection into service: runs the upgrade
    /// check, then either parks the request behind the handshake or emits
    /// the buffered `write_message_begin`. `resume` is set on the
    /// asynchronous path, where the decoder was suspended and needs an
    /// explicit kick.
    fn start_upstream<CX: DecoderFilterCallbacks>(
        &mut self,
        cx: &mut CX,
        mut conn: Box<dyn ConnectionData>,
        resume: bool,
    ) -> FilterStatus {
        let up = match self.upstream.as_mut() {
            Some(up) => up,
            None => {
                conn.connection().close(ConnectionCloseType::NoFlush);
                return FilterStatus::Continue;
            }
        };

        if up.protocol.supports_upgrade() {
            let parser = up.protocol.attempt_upgrade(
                up.transport.as_mut(),
                conn.connection_state(),
                &mut up.buffer,
            );
            if let Some(parser) = parser {
                debug!(cluster = %up.cluster, "starting upstream protocol upgrade");
                let request = up.buffer.split().freeze();
                conn.connection().write(request, false);
                up.state = UpstreamState::Upgrading { conn, parser };
                return FilterStatus::StopIteration;
            }
            trace!("upgrade already settled on this connection");
        }

        up.write_message_begin();
        up.state = UpstreamState::Connected { conn };
        if resume {
            cx.continue_decoding();
        }
        FilterStatus::Continue
    }
}

impl<CM, F> DecoderFilterBase for Router<CM, F>
where
    CM: ClusterManager,
    F: CodecFactory,
{
    fn on_destroy(&mut self) {
        if let Some(mut up) = self.upstream.take() {
            trace!(cluster = %up.cluster, "destroying router with request in flight");
            up.teardown();
        }
        self.route = None;
    }

    fn reset_upstream_connection(&mut self) {
        if let Some(up) = self.upstream.as_mut() {
            up.close_connection();
        }
    }
}

impl<CM, F, CX> DecoderFilter<CX> for Router<CM, F>
where
    CM: ClusterManager,
    F: CodecFactory,
    CX: DecoderFilterCallbacks,
{
    fn transport_begin(
        &mut self,
        _cx: &mut CX,
        _metadata: Option<&MessageMetadata>,
    ) -> FilterStatus {
        FilterStatus::Continue
    }

    fn transport_end(&mut self, _cx: &mut CX) -> FilterStatus {
        FilterStatus::Continue
    }

    fn message_begin(&mut self, cx: &mut CX, metadata: &MessageMetadata) -> FilterStatus {
        let route = cx.route();
        let cluster_name = match route
            .as_ref()
            .and_then(|r| r.route_entry())
            .map(|e| e.cluster_name().to_owned())
        {
            Some(name) => name,
            None => {
                debug!(method = %metadata.method_name, "no route match");
                self.send_failure(
                    cx,
                    metadata.message_type,
                    AppException::new(
                        AppExceptionType::UnknownMethod,
                        format!("no route for method '{}'", metadata.method_name),
                    ),
                );
                return FilterStatus::StopIteration;
            }
        };
        self.route = route;

        let cluster = match self.cluster_manager.get(&cluster_name) {
            Some(cluster) => cluster,
            None => {
                self.send_failure(
                    cx,
                    metadata.message_type,
                    AppException::new(
                        AppExceptionType::InternalError,
                        format!("unknown cluster '{cluster_name}'"),
                    ),
                );
                return FilterStatus::StopIteration;
            }
        };
        if cluster.maintenance_mode {
            self.send_failure(
                cx,
                metadata.message_type,
                AppException::new(
                    AppExceptionType::InternalError,
                    format!("maintenance mode for cluster '{cluster_name}'"),
                ),
            );
            return FilterStatus::StopIteration;
        }
        debug!(method = %metadata.method_name, cluster = %cluster_name, "routing message");

        let transport_type = match cluster.transport {
            TransportType::Auto => cx.downstream_transport_type(),
            other => other,
        };
        let protocol_type = match cluster.protocol {
            ProtocolType::Auto => cx.downstream_protocol_type(),
            other => other,
        };

        let mut lb_context = RouterLbContext { cx: &mut *cx };
        let pool_request = self
            .cluster_manager
            .tcp_conn_pool(&cluster_name, &mut lb_context)
            .map(|pool| pool.new_connection());
        let Some(pool_request) = pool_request else {
            self.send_failure(
                cx,
                metadata.message_type,
                AppException::new(
                    AppExceptionType::InternalError,
                    format!("no healthy upstream for '{cluster_name}'"),
                ),
            );
            return FilterStatus::StopIteration;
        };

        let release_at = match metadata.message_type {
            MessageType::Oneway => ReleaseAt::AfterWrite,
            _ => ReleaseAt::AfterResponse,
        };
        self.upstream = Some(UpstreamRequest::new(
            cluster_name.clone(),
            metadata.clone(),
            self.codecs.create_transport(transport_type),
            self.codecs.create_protocol(protocol_type),
            release_at,
        ));

        match pool_request {
            PoolRequest::Pending(cancel) => {
                trace!(cluster = %cluster_name, "waiting for upstream connection");
                if let Some(up) = self.upstream.as_mut() {
                    up.state = UpstreamState::PoolPending { cancel };
                }
                FilterStatus::StopIteration
            }
            PoolRequest::Ready(conn) => self.start_upstream(cx, conn, false),
        }
    }

    fn message_end(&mut self, _cx: &mut CX) -> FilterStatus {
        let Some(mut up) = self.upstream.take() else {
            return FilterStatus::Continue;
        };
        up.send_request_frame();
        trace!(method = %up.metadata.method_name, cluster = %up.cluster, "request written upstream");
        match up.release_at {
            ReleaseAt::AfterWrite => up.release_connection(),
            ReleaseAt::AfterResponse => {
                up.begin_response();
                self.upstream = Some(up);
            }
        }
        FilterStatus::Continue
    }

    fn struct_begin(&mut self, _cx: &mut CX, name: &str) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol.write_struct_begin(&mut up.buffer, name);
        }
        FilterStatus::Continue
    }

    fn struct_end(&mut self, _cx: &mut CX) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol
                .write_field_begin(&mut up.buffer, "", FieldType::Stop, 0);
            up.protocol.write_struct_end(&mut up.buffer);
        }
        FilterStatus::Continue
    }

    fn field_begin(
        &mut self,
        _cx: &mut CX,
        name: &str,
        field_type: FieldType,
        field_id: i16,
    ) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol
                .write_field_begin(&mut up.buffer, name, field_type, field_id);
        }
        FilterStatus::Continue
    }

    fn field_end(&mut self, _cx: &mut CX) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol.write_field_end(&mut up.buffer);
        }
        FilterStatus::Continue
    }

    fn map_begin(
        &mut self,
        _cx: &mut CX,
        key_type: FieldType,
        value_type: FieldType,
        size: u32,
    ) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol
                .write_map_begin(&mut up.buffer, key_type, value_type, size);
        }
        FilterStatus::Continue
    }

    fn map_end(&mut self, _cx: &mut CX) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol.write_map_end(&mut up.buffer);
        }
        FilterStatus::Continue
    }

    fn list_begin(&mut self, _cx: &mut CX, elem_type: FieldType, size: u32) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol.write_list_begin(&mut up.buffer, elem_type, size);
        }
        FilterStatus::Continue
    }

    fn list_end(&mut self, _cx: &mut CX) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol.write_list_end(&mut up.buffer);
        }
        FilterStatus::Continue
    }

    fn set_begin(&mut self, _cx: &mut CX, elem_type: FieldType, size: u32) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol.write_set_begin(&mut up.buffer, elem_type, size);
        }
        FilterStatus::Continue
    }

    fn set_end(&mut self, _cx: &mut CX) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol.write_set_end(&mut up.buffer);
        }
        FilterStatus::Continue
    }

    fn bool_value(&mut self, _cx: &mut CX, value: bool) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol.write_bool(&mut up.buffer, value);
        }
        FilterStatus::Continue
    }

    fn byte_value(&mut self, _cx: &mut CX, value: i8) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol.write_byte(&mut up.buffer, value);
        }
        FilterStatus::Continue
    }

    fn int16_value(&mut self, _cx: &mut CX, value: i16) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol.write_i16(&mut up.buffer, value);
        }
        FilterStatus::Continue
    }

    fn int32_value(&mut self, _cx: &mut CX, value: i32) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol.write_i32(&mut up.buffer, value);
        }
        FilterStatus::Continue
    }

    fn int64_value(&mut self, _cx: &mut CX, value: i64) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol.write_i64(&mut up.buffer, value);
        }
        FilterStatus::Continue
    }

    fn double_value(&mut self, _cx: &mut CX, value: f64) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol.write_double(&mut up.buffer, value);
        }
        FilterStatus::Continue
    }

    fn string_value(&mut self, _cx: &mut CX, value: &str) -> FilterStatus {
        if let Some(up) = self.upstream.as_mut() {
            up.protocol.write_string(&mut up.buffer, value);
        }
        FilterStatus::Continue
    }
}

impl<CM, F, CX> ConnPoolCallbacks<CX> for Router<CM, F>
where
    CM: ClusterManager,
    F: CodecFactory,
    CX: DecoderFilterCallbacks,
{
    fn on_pool_ready(&mut self, cx: &mut CX, conn: Box<dyn ConnectionData>) {
        trace!("upstream connection ready");
        // the pending cancel handle is replaced by the live connection
        self.start_upstream(cx, conn, true);
    }

    fn on_pool_failure(&mut self, cx: &mut CX, reason: PoolFailureReason) {
        let Some(up) = self.upstream.take() else {
            return;
        };
        debug!(?reason, cluster = %up.cluster, "upstream connection failure");
        let reply = match reason {
            PoolFailureReason::Overflow => {
                AppException::new(AppExceptionType::InternalError, "too many connections")
            }
            PoolFailureReason::LocalConnectionFailure
            | PoolFailureReason::RemoteConnectionFailure
            | PoolFailureReason::Timeout => {
                AppException::new(AppExceptionType::InternalError, "connection failure")
            }
        };
        self.send_failure(cx, up.metadata.message_type, reply);
    }
}

impl<CM, F, CX> UpstreamCallbacks<CX> for Router<CM, F>
where
    CM: ClusterManager,
    F: CodecFactory,
    CX: DecoderFilterCallbacks,
{
    fn on_upstream_data(&mut self, cx: &mut CX, buffer: &mut BytesMut, end_stream: bool) {
        let Some(mut up) = self.upstream.take() else {
            trace!("discarding upstream data with no request in flight");
            return;
        };
        match mem::replace(&mut up.state, UpstreamState::Idle) {
            UpstreamState::Upgrading {
                mut conn,
                mut parser,
            } => {
                if parser.on_data(buffer) {
                    debug!(cluster = %up.cluster, "upstream protocol upgrade complete");
                    up.protocol.complete_upgrade(conn.connection_state(), parser);
                    up.write_message_begin();
                    up.state = UpstreamState::Connected { conn };
                    self.upstream = Some(up);
                    cx.continue_decoding();
                } else if end_stream {
                    debug!(cluster = %up.cluster, "upstream closed during upgrade");
                    conn.connection().close(ConnectionCloseType::NoFlush);
                    self.send_connection_failure(cx, up.metadata.message_type);
                } else {
                    up.state = UpstreamState::Upgrading { conn, parser };
                    self.upstream = Some(up);
                }
            }
            UpstreamState::AwaitingResponse { conn, mut response } => {
                let outcome = response.on_data(
                    cx,
                    up.transport.as_ref(),
                    up.protocol.as_ref(),
                    buffer,
                    end_stream,
                );
                match outcome {
                    ResponseOutcome::Incomplete => {
                        up.state = UpstreamState::AwaitingResponse { conn, response };
                        self.upstream = Some(up);
                    }
                    ResponseOutcome::Complete => {
                        trace!(cluster = %up.cluster, "upstream response complete");
                        conn.release();
                    }
                    ResponseOutcome::Truncated => {
                        debug!(cluster = %up.cluster, "upstream response truncated");
                        conn.release();
                        cx.reset_downstream_connection();
                    }
                    ResponseOutcome::Reset => {
                        let mut conn = conn;
                        conn.connection().close(ConnectionCloseType::NoFlush);
                    }
                }
            }
            other => {
                up.state = other;
                self.upstream = Some(up);
            }
        }
    }

    fn on_event(&mut self, cx: &mut CX, event: ConnectionEvent) {
        if event == ConnectionEvent::Connected {
            return;
        }
        // a close event with nothing in flight (or after release) is benign
        let Some(up) = self.upstream.take() else {
            return;
        };
        if up.holds_connection() {
            debug!(?event, cluster = %up.cluster, "upstream closed before response completion");
            self.send_connection_failure(cx, up.metadata.message_type);
        } else {
            self.upstream = Some(up);
        }
    }
}

struct RouterLbContext<'a, CX> {
    cx: &'a mut CX,
}

impl<CX: DecoderFilterCallbacks> LoadBalancerContext for RouterLbContext<'_, CX> {
    // hash key, metadata match and headers stay unimplemented; host
    // selection falls back to the cluster default
    fn downstream_connection(&mut self) -> Option<&mut dyn Connection> {
        Some(self.cx.downstream_connection())
    }
}

/// Factory for creating [`Router`] instances.
///
/// A router handles a single downstream message; the factory carries the
/// worker-local cluster manager and codec registry shared by all of them.
pub struct RouterFilterFactory<CM, F> {
    cluster_manager: CM,
    codecs: F,
}

impl<CM, F> RouterFilterFactory<CM, F> {
    pub fn new(cluster_manager: CM, codecs: F) -> Self {
        RouterFilterFactory {
            cluster_manager,
            codecs,
        }
    }
}

impl<CM, F> MakeService for RouterFilterFactory<CM, F>
where
    CM: ClusterManager + Clone,
    F: CodecFactory + Clone,
{
    type Service = Router<CM, F>;
    type Error = Infallible;

    fn make_via_ref(&self, _old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        Ok(Router::new(
            self.cluster_manager.clone(),
            self.codecs.clone(),
        ))
    }
}

impl<CM, F> AsyncMakeService for RouterFilterFactory<CM, F>
where
    CM: ClusterManager + Clone,
    F: CodecFactory + Clone,
{
    type Service = Router<CM, F>;
    type Error = Infallible;

    async fn make_via_ref(
        &self,
        _old: Option<&Self::Service>,
    ) -> Result<Self::Service, Self::Error> {
        Ok(Router::new(
            self.cluster_manager.clone(),
            self.codecs.clone(),
        ))
    }
}
