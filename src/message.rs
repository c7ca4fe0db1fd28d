//! 投递域模型

use std::fmt;
use std::sync::Arc;

use crate::deliver::traits::Channel;
use crate::protocol::SendPacket;

/// 一条待投递的频道消息（投递期间不可变）
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub message_id: i64,
    pub message_seq: u32,
    pub from_uid: String,
    pub from_device_id: String,
    pub from_conn_id: i64,
    pub from_node_id: u64,
    pub send_packet: SendPacket,
}

/// 一次投递请求：同一频道的一批消息加上受众tag
#[derive(Clone)]
pub struct DeliverRequest {
    pub channel_id: String,
    pub channel_type: u8,
    /// 频道唯一键，见 [`crate::protocol::channel_to_key`]
    pub channel_key: String,
    /// 受众快照句柄
    pub tag_key: String,
    pub messages: Vec<Message>,
    /// 频道句柄，tag缺失且本节点是leader时用来现场构建
    pub channel: Arc<dyn Channel>,
}

impl fmt::Debug for DeliverRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliverRequest")
            .field("channel_id", &self.channel_id)
            .field("channel_type", &self.channel_type)
            .field("tag_key", &self.tag_key)
            .field("messages", &self.messages.len())
            .finish()
    }
}

/// 重试队列条目：只有存储的消息才登记
#[derive(Debug, Clone)]
pub struct RetryMessage {
    pub uid: String,
    pub conn_id: i64,
    pub message_id: i64,
    pub recv_packet_data: Vec<u8>,
}
