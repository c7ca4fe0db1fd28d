//! 测试用的协作方假实现

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cluster::forwarder::NodeForwarder;
use crate::cluster::{ClusterClient, NodeInfo, RpcResponse};
use crate::config::DeliverConfig;
use crate::conn::{ConnContext, ConnTransport, DeviceFlag, DeviceLevel};
use crate::deliver::traits::{
    Channel, ChannelProvider, ConversationManager, RetryManager, UserDirectory, Webhook,
};
use crate::deliver::DeliverContext;
use crate::error::{DeliveryError, DeliveryResult};
use crate::message::{DeliverRequest, Message, RetryMessage};
use crate::metrics::DeliverMetrics;
use crate::protocol::{channel_to_key, FrameType, SendPacket};
use crate::tag::{MemoryTagManager, NodeUsers, ReceiverTag};

pub(crate) const TEST_AES_KEY: &str = "0123456789abcdef";
pub(crate) const TEST_AES_IV: &str = "fedcba9876543210";
pub(crate) const TEST_PROTO_VERSION: u8 = 4;

/// 跨mock共享的顺序日志，用来断言"先登记重试再写入"这类时序
#[derive(Default)]
pub(crate) struct EventLog {
    entries: Mutex<Vec<String>>,
}

impl EventLog {
    pub(crate) fn push(&self, entry: String) {
        self.entries.lock().push(entry);
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub(crate) fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }
}

/// 记录写入的连接端点
pub(crate) struct MockTransport {
    label: String,
    pub(crate) writes: Mutex<Vec<(Vec<u8>, FrameType)>>,
    pub(crate) direct_writes: Mutex<Vec<(Vec<u8>, u32)>>,
    pub(crate) closed: AtomicBool,
    pub(crate) fail_writes: AtomicBool,
    log: Arc<EventLog>,
}

impl MockTransport {
    pub(crate) fn new(label: impl Into<String>, log: Arc<EventLog>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            writes: Mutex::new(Vec::new()),
            direct_writes: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            log,
        })
    }

    pub(crate) fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    pub(crate) fn written_frames(&self) -> Vec<(Vec<u8>, FrameType)> {
        self.writes.lock().clone()
    }
}

impl ConnTransport for MockTransport {
    fn write(&self, data: &[u8], frame_type: FrameType) -> DeliveryResult<()> {
        self.log.push(format!("write:{}", self.label));
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DeliveryError::ConnWrite("mock write failure".to_string()));
        }
        self.writes.lock().push((data.to_vec(), frame_type));
        Ok(())
    }

    fn write_directly(&self, data: &[u8], recv_frame_count: u32) -> DeliveryResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DeliveryError::ConnWrite("mock write failure".to_string()));
        }
        self.direct_writes
            .lock()
            .push((data.to_vec(), recv_frame_count));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) fn make_conn(
    uid: &str,
    device_id: &str,
    device_level: DeviceLevel,
    conn_id: i64,
    log: Arc<EventLog>,
) -> (Arc<ConnContext>, Arc<MockTransport>) {
    let transport = MockTransport::new(format!("{}#{}", uid, conn_id), log);
    let conn = Arc::new(ConnContext::new(
        uid,
        device_id,
        DeviceFlag::App,
        device_level,
        conn_id,
        TEST_PROTO_VERSION,
        TEST_AES_KEY,
        TEST_AES_IV,
        transport.clone(),
    ));
    (conn, transport)
}

/// 内存用户连接目录
#[derive(Default)]
pub(crate) struct MockUserDirectory {
    users: Mutex<HashMap<String, Vec<Arc<ConnContext>>>>,
}

impl MockUserDirectory {
    pub(crate) fn insert(&self, uid: &str, conns: Vec<Arc<ConnContext>>) {
        self.users.lock().insert(uid.to_string(), conns);
    }
}

impl UserDirectory for MockUserDirectory {
    fn conns(&self, uid: &str) -> Option<Vec<Arc<ConnContext>>> {
        self.users.lock().get(uid).cloned()
    }

    fn conn_by_id(&self, uid: &str, conn_id: i64) -> Option<Arc<ConnContext>> {
        self.users
            .lock()
            .get(uid)
            .and_then(|conns| conns.iter().find(|c| c.conn_id == conn_id).cloned())
    }

    fn remove_conn_by_id(&self, uid: &str, conn_id: i64) {
        if let Some(conns) = self.users.lock().get_mut(uid) {
            conns.retain(|c| c.conn_id != conn_id);
        }
    }
}

#[derive(Default)]
pub(crate) struct MockRetryManager {
    pub(crate) entries: Mutex<Vec<RetryMessage>>,
    log: Mutex<Option<Arc<EventLog>>>,
}

impl MockRetryManager {
    pub(crate) fn with_log(log: Arc<EventLog>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            log: Mutex::new(Some(log)),
        }
    }

    pub(crate) fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }
}

impl RetryManager for MockRetryManager {
    fn add_retry(&self, retry: RetryMessage) {
        if let Some(log) = self.log.lock().as_ref() {
            log.push(format!("retry:{}", retry.message_id));
        }
        self.entries.lock().push(retry);
    }
}

#[derive(Default)]
pub(crate) struct MockWebhook {
    pub(crate) notifications: Mutex<Vec<(i64, Vec<String>)>>,
}

impl Webhook for MockWebhook {
    fn notify_offline_msg(&self, message: &Message, offline_uids: &[String]) {
        self.notifications
            .lock()
            .push((message.message_id, offline_uids.to_vec()));
    }
}

#[derive(Default)]
pub(crate) struct MockConversationManager {
    pub(crate) pushes: Mutex<Vec<(String, u8, Vec<String>, usize)>>,
}

impl ConversationManager for MockConversationManager {
    fn push(&self, channel_id: &str, channel_type: u8, uids: &[String], messages: &[Message]) {
        self.pushes.lock().push((
            channel_id.to_string(),
            channel_type,
            uids.to_vec(),
            messages.len(),
        ));
    }
}

/// 可编排的集群客户端
pub(crate) struct MockCluster {
    pub(crate) leader_id: Mutex<u64>,
    pub(crate) leader_error: AtomicBool,
    pub(crate) is_leader: AtomicBool,
    pub(crate) requests: Mutex<Vec<(u64, String, Vec<u8>)>>,
    pub(crate) response: Mutex<Option<RpcResponse>>,
    pub(crate) request_delay: Mutex<Option<Duration>>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self {
            leader_id: Mutex::new(1),
            leader_error: AtomicBool::new(false),
            is_leader: AtomicBool::new(true),
            requests: Mutex::new(Vec::new()),
            response: Mutex::new(None),
            request_delay: Mutex::new(None),
        }
    }
}

impl MockCluster {
    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn leader_of_channel_for_read(
        &self,
        _channel_id: &str,
        _channel_type: u8,
    ) -> DeliveryResult<NodeInfo> {
        if self.leader_error.load(Ordering::SeqCst) {
            return Err(DeliveryError::Cluster("mock leader lookup error".to_string()));
        }
        Ok(NodeInfo {
            id: *self.leader_id.lock(),
        })
    }

    async fn is_leader_of_channel(
        &self,
        _channel_id: &str,
        _channel_type: u8,
    ) -> DeliveryResult<bool> {
        Ok(self.is_leader.load(Ordering::SeqCst))
    }

    async fn request(
        &self,
        to_node_id: u64,
        path: &str,
        body: Vec<u8>,
    ) -> DeliveryResult<RpcResponse> {
        self.requests
            .lock()
            .push((to_node_id, path.to_string(), body));
        let delay = *self.request_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.response.lock().clone();
        Ok(response.unwrap_or_else(RpcResponse::ok))
    }
}

/// 计数并返回预置tag的频道句柄
pub(crate) struct MockChannel {
    pub(crate) make_calls: AtomicUsize,
    pub(crate) tag: Mutex<Option<Arc<ReceiverTag>>>,
}

impl MockChannel {
    pub(crate) fn with_tag(tag: ReceiverTag) -> Arc<Self> {
        Arc::new(Self {
            make_calls: AtomicUsize::new(0),
            tag: Mutex::new(Some(Arc::new(tag))),
        })
    }

    pub(crate) fn empty() -> Arc<Self> {
        Arc::new(Self {
            make_calls: AtomicUsize::new(0),
            tag: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn make_receiver_tag(&self) -> DeliveryResult<Arc<ReceiverTag>> {
        self.make_calls.fetch_add(1, Ordering::SeqCst);
        self.tag
            .lock()
            .clone()
            .ok_or_else(|| DeliveryError::TagRpc("mock channel has no tag".to_string()))
    }
}

pub(crate) struct MockChannelProvider {
    pub(crate) channel: Arc<MockChannel>,
}

impl ChannelProvider for MockChannelProvider {
    fn load_or_create_channel(&self, _channel_id: &str, _channel_type: u8) -> Arc<dyn Channel> {
        self.channel.clone()
    }
}

/// 测试装置：协作方假实现加上组装好的投递上下文
pub(crate) struct TestHarness {
    pub(crate) ctx: Arc<DeliverContext>,
    pub(crate) cluster: Arc<MockCluster>,
    pub(crate) tag_manager: Arc<MemoryTagManager>,
    pub(crate) directory: Arc<MockUserDirectory>,
    pub(crate) retry: Arc<MockRetryManager>,
    pub(crate) conversation: Arc<MockConversationManager>,
    pub(crate) webhook: Arc<MockWebhook>,
    pub(crate) metrics: Arc<DeliverMetrics>,
    pub(crate) log: Arc<EventLog>,
}

pub(crate) fn harness(node_id: u64) -> TestHarness {
    harness_with_config(DeliverConfig::new(node_id))
}

pub(crate) fn harness_with_config(config: DeliverConfig) -> TestHarness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let log = Arc::new(EventLog::default());
    let cluster = Arc::new(MockCluster::default());
    let tag_manager = Arc::new(MemoryTagManager::new());
    let directory = Arc::new(MockUserDirectory::default());
    let retry = Arc::new(MockRetryManager::with_log(log.clone()));
    let conversation = Arc::new(MockConversationManager::default());
    let webhook = Arc::new(MockWebhook::default());
    let metrics = Arc::new(DeliverMetrics::new());
    let forwarder = Arc::new(NodeForwarder::new(
        cluster.clone(),
        metrics.clone(),
        config.forward_queue_capacity,
    ));
    let ctx = Arc::new(DeliverContext {
        config,
        cluster: cluster.clone(),
        tag_manager: tag_manager.clone(),
        user_directory: directory.clone(),
        retry_manager: retry.clone(),
        conversation_manager: conversation.clone(),
        webhook: webhook.clone(),
        forwarder,
        metrics: metrics.clone(),
    });
    TestHarness {
        ctx,
        cluster,
        tag_manager,
        directory,
        retry,
        conversation,
        webhook,
        metrics,
        log,
    }
}

pub(crate) fn make_message(
    from_uid: &str,
    from_device_id: &str,
    message_id: i64,
    channel_id: &str,
    channel_type: u8,
    payload: &[u8],
) -> Message {
    Message {
        message_id,
        message_seq: 1,
        from_uid: from_uid.to_string(),
        from_device_id: from_device_id.to_string(),
        from_conn_id: 0,
        from_node_id: 0,
        send_packet: SendPacket {
            client_msg_no: format!("cli-{}", message_id),
            channel_id: channel_id.to_string(),
            channel_type,
            payload: payload.to_vec(),
            ..Default::default()
        },
    }
}

pub(crate) fn make_request(
    channel_id: &str,
    channel_type: u8,
    tag_key: &str,
    messages: Vec<Message>,
    channel: Arc<dyn Channel>,
) -> DeliverRequest {
    DeliverRequest {
        channel_id: channel_id.to_string(),
        channel_type,
        channel_key: channel_to_key(channel_id, channel_type),
        tag_key: tag_key.to_string(),
        messages,
        channel,
    }
}

pub(crate) fn node_users(node_id: u64, uids: &[&str]) -> NodeUsers {
    NodeUsers {
        node_id,
        uids: uids.iter().map(|s| s.to_string()).collect(),
    }
}
