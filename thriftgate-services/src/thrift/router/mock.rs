//! Mock collaborators for the router tests.
//!
//! The encoder mocks record every call into a shared, ordered op log so
//! tests can assert the exact write sequence, including where socket writes
//! land relative to encoder calls.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use bytes::{Bytes, BytesMut};
use thriftgate_core::{
    connection::{Connection, ConnectionCloseType},
    filter::{DecoderFilterCallbacks, UpstreamResponseStatus},
    route::{Route, RouteEntry},
    thrift::{
        protocol::{CodecFactory, Protocol, ProtocolType, ThriftObject},
        transport::{Transport, TransportType},
        AppException, FieldType, MessageMetadata,
    },
    upstream::{
        CancelHandle, ClusterManager, ClusterSnapshot, ConnectionData, ConnectionPool,
        ConnectionStateSlot, LoadBalancerContext, PoolRequest,
    },
};

pub(crate) type OpLog = Rc<RefCell<Vec<String>>>;

fn log_op(log: &OpLog, op: impl Into<String>) {
    log.borrow_mut().push(op.into());
}

// ---------------------------------------------------------------- routes

struct MockRouteEntry {
    cluster: String,
}

impl RouteEntry for MockRouteEntry {
    fn cluster_name(&self) -> &str {
        &self.cluster
    }
}

struct MockRoute {
    entry: Option<MockRouteEntry>,
}

impl Route for MockRoute {
    fn route_entry(&self) -> Option<&dyn RouteEntry> {
        self.entry.as_ref().map(|e| e as &dyn RouteEntry)
    }
}

pub(crate) fn route_to(cluster: &str) -> Rc<dyn Route> {
    Rc::new(MockRoute {
        entry: Some(MockRouteEntry {
            cluster: cluster.to_string(),
        }),
    })
}

pub(crate) fn route_without_entry() -> Rc<dyn Route> {
    Rc::new(MockRoute { entry: None })
}

// ----------------------------------------------------------- connections

#[derive(Clone, Default)]
pub(crate) struct MockConnection {
    log: OpLog,
    writes: Rc<RefCell<Vec<(Bytes, bool)>>>,
    closes: Rc<RefCell<Vec<ConnectionCloseType>>>,
}

impl Connection for MockConnection {
    fn write(&mut self, data: Bytes, end_stream: bool) {
        log_op(&self.log, format!("connWrite(end_stream={end_stream})"));
        self.writes.borrow_mut().push((data, end_stream));
    }

    fn close(&mut self, close_type: ConnectionCloseType) {
        log_op(&self.log, format!("connClose({close_type:?})"));
        self.closes.borrow_mut().push(close_type);
    }
}

/// Test-side view of a connection handed to the router.
pub(crate) struct ConnProbe {
    pub released: Rc<Cell<bool>>,
    pub writes: Rc<RefCell<Vec<(Bytes, bool)>>>,
    pub closes: Rc<RefCell<Vec<ConnectionCloseType>>>,
}

pub(crate) struct MockConnectionData {
    conn: MockConnection,
    state: ConnectionStateSlot,
    released: Rc<Cell<bool>>,
}

impl MockConnectionData {
    pub fn new(log: &OpLog) -> (Box<Self>, ConnProbe) {
        Self::with_state(log, ConnectionStateSlot::default())
    }

    pub fn with_state(log: &OpLog, state: ConnectionStateSlot) -> (Box<Self>, ConnProbe) {
        let conn = MockConnection {
            log: log.clone(),
            ..Default::default()
        };
        let released = Rc::new(Cell::new(false));
        let probe = ConnProbe {
            released: released.clone(),
            writes: conn.writes.clone(),
            closes: conn.closes.clone(),
        };
        (
            Box::new(MockConnectionData {
                conn,
                state,
                released,
            }),
            probe,
        )
    }
}

impl ConnectionData for MockConnectionData {
    fn connection(&mut self) -> &mut dyn Connection {
        &mut self.conn
    }

    fn connection_state(&mut self) -> &mut ConnectionStateSlot {
        &mut self.state
    }

    fn release(self: Box<Self>) {
        self.released.set(true);
    }
}

// ------------------------------------------------------------------ pool

pub(crate) struct MockCancelHandle {
    cancelled: Rc<Cell<bool>>,
}

impl MockCancelHandle {
    pub fn new() -> (Box<Self>, Rc<Cell<bool>>) {
        let cancelled = Rc::new(Cell::new(false));
        (
            Box::new(MockCancelHandle {
                cancelled: cancelled.clone(),
            }),
            cancelled,
        )
    }
}

impl CancelHandle for MockCancelHandle {
    fn cancel(self: Box<Self>) {
        self.cancelled.set(true);
    }
}

#[derive(Default)]
pub(crate) struct MockPool {
    next: Option<PoolRequest>,
}

impl ConnectionPool for MockPool {
    fn new_connection(&mut self) -> PoolRequest {
        self.next.take().expect("pool request not scripted")
    }
}

pub(crate) struct MockClusterManager {
    pub clusters: HashMap<String, ClusterSnapshot>,
    pub pool: MockPool,
    pub healthy: bool,
    pub saw_downstream_connection: Rc<Cell<bool>>,
}

impl MockClusterManager {
    pub fn with_cluster(name: &str) -> Self {
        let mut clusters = HashMap::new();
        clusters.insert(name.to_string(), ClusterSnapshot::new(name));
        MockClusterManager {
            clusters,
            pool: MockPool::default(),
            healthy: true,
            saw_downstream_connection: Rc::new(Cell::new(false)),
        }
    }

    pub fn script(&mut self, request: PoolRequest) {
        self.pool.next = Some(request);
    }
}

impl ClusterManager for MockClusterManager {
    fn get(&self, name: &str) -> Option<ClusterSnapshot> {
        self.clusters.get(name).cloned()
    }

    fn tcp_conn_pool(
        &mut self,
        name: &str,
        context: &mut dyn LoadBalancerContext,
    ) -> Option<&mut dyn ConnectionPool> {
        self.saw_downstream_connection
            .set(context.downstream_connection().is_some());
        if !self.healthy || !self.clusters.contains_key(name) {
            return None;
        }
        Some(&mut self.pool)
    }
}

// ---------------------------------------------------------------- codecs

pub(crate) struct MockTransport {
    log: OpLog,
    transport_type: TransportType,
}

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn transport_type(&self) -> TransportType {
        self.transport_type
    }

    fn encode_frame(&mut self, buffer: &mut BytesMut, metadata: &MessageMetadata, message: BytesMut) {
        log_op(&self.log, format!("encodeFrame({})", metadata.method_name));
        buffer.extend_from_slice(b"frame:");
        buffer.extend_from_slice(&message);
    }
}

/// Sticky per-connection upgrade memo, as a real upgrade-capable protocol
/// would persist it.
pub(crate) struct UpgradeMemo {
    pub upgraded: bool,
}

pub(crate) struct MockUpgradeParser {
    remaining: usize,
}

impl ThriftObject for MockUpgradeParser {
    fn on_data(&mut self, buffer: &mut BytesMut) -> bool {
        buffer.clear();
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }
}

pub(crate) struct MockProtocol {
    log: OpLog,
    protocol_type: ProtocolType,
    upgradeable: bool,
    upgrade_feeds: usize,
}

impl MockProtocol {
    fn op(&mut self, buffer: &mut BytesMut, op: String) {
        buffer.extend_from_slice(op.as_bytes());
        buffer.extend_from_slice(b";");
        log_op(&self.log, op);
    }
}

impl Protocol for MockProtocol {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn protocol_type(&self) -> ProtocolType {
        self.protocol_type
    }

    fn write_message_begin(&mut self, buffer: &mut BytesMut, metadata: &MessageMetadata) {
        self.op(
            buffer,
            format!(
                "writeMessageBegin({}, {:?}, {})",
                metadata.method_name, metadata.message_type, metadata.sequence_id
            ),
        );
    }

    fn write_message_end(&mut self, buffer: &mut BytesMut) {
        self.op(buffer, "writeMessageEnd".to_string());
    }

    fn write_struct_begin(&mut self, buffer: &mut BytesMut, name: &str) {
        self.op(buffer, format!("writeStructBegin({name})"));
    }

    fn write_struct_end(&mut self, buffer: &mut BytesMut) {
        self.op(buffer, "writeStructEnd".to_string());
    }

    fn write_field_begin(
        &mut self,
        buffer: &mut BytesMut,
        name: &str,
        field_type: FieldType,
        field_id: i16,
    ) {
        self.op(buffer, format!("writeFieldBegin({name}, {field_type:?}, {field_id})"));
    }

    fn write_field_end(&mut self, buffer: &mut BytesMut) {
        self.op(buffer, "writeFieldEnd".to_string());
    }

    fn write_map_begin(
        &mut self,
        buffer: &mut BytesMut,
        key_type: FieldType,
        value_type: FieldType,
        size: u32,
    ) {
        self.op(buffer, format!("writeMapBegin({key_type:?}, {value_type:?}, {size})"));
    }

    fn write_map_end(&mut self, buffer: &mut BytesMut) {
        self.op(buffer, "writeMapEnd".to_string());
    }

    fn write_list_begin(&mut self, buffer: &mut BytesMut, elem_type: FieldType, size: u32) {
        self.op(buffer, format!("writeListBegin({elem_type:?}, {size})"));
    }

    fn write_list_end(&mut self, buffer: &mut BytesMut) {
        self.op(buffer, "writeListEnd".to_string());
    }

    fn write_set_begin(&mut self, buffer: &mut BytesMut, elem_type: FieldType, size: u32) {
        self.op(buffer, format!("writeSetBegin({elem_type:?}, {size})"));
    }

    fn write_set_end(&mut self, buffer: &mut BytesMut) {
        self.op(buffer, "writeSetEnd".to_string());
    }

    fn write_bool(&mut self, buffer: &mut BytesMut, value: bool) {
        self.op(buffer, format!("writeBool({value})"));
    }

    fn write_byte(&mut self, buffer: &mut BytesMut, value: i8) {
        self.op(buffer, format!("writeByte({value})"));
    }

    fn write_i16(&mut self, buffer: &mut BytesMut, value: i16) {
        self.op(buffer, format!("writeInt16({value})"));
    }

    fn write_i32(&mut self, buffer: &mut BytesMut, value: i32) {
        self.op(buffer, format!("writeInt32({value})"));
    }

    fn write_i64(&mut self, buffer: &mut BytesMut, value: i64) {
        self.op(buffer, format!("writeInt64({value})"));
    }

    fn write_double(&mut self, buffer: &mut BytesMut, value: f64) {
        self.op(buffer, format!("writeDouble({value})"));
    }

    fn write_string(&mut self, buffer: &mut BytesMut, value: &str) {
        self.op(buffer, format!("writeString({value})"));
    }

    fn supports_upgrade(&self) -> bool {
        self.upgradeable
    }

    fn attempt_upgrade(
        &mut self,
        _transport: &mut dyn Transport,
        conn_state: &mut ConnectionStateSlot,
        buffer: &mut BytesMut,
    ) -> Option<Box<dyn ThriftObject>> {
        if conn_state
            .get::<UpgradeMemo>()
            .is_some_and(|memo| memo.upgraded)
        {
            log_op(&self.log, "attemptUpgrade(skip)");
            return None;
        }
        log_op(&self.log, "attemptUpgrade");
        buffer.extend_from_slice(b"upgrade request");
        Some(Box::new(MockUpgradeParser {
            remaining: self.upgrade_feeds,
        }))
    }

    fn complete_upgrade(
        &mut self,
        conn_state: &mut ConnectionStateSlot,
        _response: Box<dyn ThriftObject>,
    ) {
        log_op(&self.log, "completeUpgrade");
        conn_state.set(UpgradeMemo { upgraded: true });
    }
}

#[derive(Clone)]
pub(crate) struct MockCodecs {
    pub log: OpLog,
    pub upgradeable: bool,
    pub upgrade_feeds: usize,
    pub created_transports: Rc<RefCell<Vec<TransportType>>>,
    pub created_protocols: Rc<RefCell<Vec<ProtocolType>>>,
}

impl MockCodecs {
    pub fn new(log: &OpLog) -> Self {
        MockCodecs {
            log: log.clone(),
            upgradeable: false,
            upgrade_feeds: 1,
            created_transports: Rc::default(),
            created_protocols: Rc::default(),
        }
    }

    pub fn upgradeable(log: &OpLog) -> Self {
        let mut codecs = Self::new(log);
        codecs.upgradeable = true;
        codecs
    }
}

impl CodecFactory for MockCodecs {
    fn create_transport(&self, transport_type: TransportType) -> Box<dyn Transport> {
        self.created_transports.borrow_mut().push(transport_type);
        Box::new(MockTransport {
            log: self.log.clone(),
            transport_type,
        })
    }

    fn create_protocol(&self, protocol_type: ProtocolType) -> Box<dyn Protocol> {
        self.created_protocols.borrow_mut().push(protocol_type);
        Box::new(MockProtocol {
            log: self.log.clone(),
            protocol_type,
            upgradeable: self.upgradeable,
            upgrade_feeds: self.upgrade_feeds,
        })
    }
}

// --------------------------------------------------------------- context

pub(crate) struct MockContext {
    pub route: Option<Rc<dyn Route>>,
    pub downstream_transport: TransportType,
    pub downstream_protocol: ProtocolType,
    pub downstream_conn: MockConnection,
    pub local_replies: Vec<AppException>,
    pub reset_downstream: usize,
    pub continue_decoding: usize,
    pub response_started: Vec<(TransportType, ProtocolType)>,
    pub upstream_data_results: VecDeque<UpstreamResponseStatus>,
    pub upstream_data_calls: usize,
}

impl MockContext {
    pub fn new() -> Self {
        MockContext {
            route: None,
            downstream_transport: TransportType::Framed,
            downstream_protocol: ProtocolType::Binary,
            downstream_conn: MockConnection::default(),
            local_replies: Vec::new(),
            reset_downstream: 0,
            continue_decoding: 0,
            response_started: Vec::new(),
            upstream_data_results: VecDeque::new(),
            upstream_data_calls: 0,
        }
    }

    pub fn with_route(cluster: &str) -> Self {
        let mut cx = Self::new();
        cx.route = Some(route_to(cluster));
        cx
    }
}

impl DecoderFilterCallbacks for MockContext {
    fn downstream_connection(&mut self) -> &mut dyn Connection {
        &mut self.downstream_conn
    }

    fn route(&self) -> Option<Rc<dyn Route>> {
        self.route.clone()
    }

    fn downstream_transport_type(&self) -> TransportType {
        self.downstream_transport
    }

    fn downstream_protocol_type(&self) -> ProtocolType {
        self.downstream_protocol
    }

    fn send_local_reply(&mut self, reply: AppException, _end_stream: bool) {
        self.local_replies.push(reply);
    }

    fn start_upstream_response(&mut self, transport: &dyn Transport, protocol: &dyn Protocol) {
        self.response_started
            .push((transport.transport_type(), protocol.protocol_type()));
    }

    fn upstream_data(&mut self, _buffer: &mut BytesMut) -> UpstreamResponseStatus {
        self.upstream_data_calls += 1;
        self.upstream_data_results
            .pop_front()
            .unwrap_or(UpstreamResponseStatus::MoreData)
    }

    fn reset_downstream_connection(&mut self) {
        self.reset_downstream += 1;
    }

    fn continue_decoding(&mut self) {
        self.continue_decoding += 1;
    }
}
