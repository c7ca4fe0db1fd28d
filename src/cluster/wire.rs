//! 节点间RPC载荷
//!
//! 节点间转发使用protobuf编码，和域模型之间通过From互转。

use std::sync::Arc;

use crate::deliver::traits::Channel;
use crate::message::{DeliverRequest, Message};
use crate::protocol::{channel_to_key, Framer, SendPacket, Setting};

/// tag查询请求
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TagReq {
    #[prost(string, tag = "1")]
    pub channel_id: String,
    #[prost(uint32, tag = "2")]
    pub channel_type: u32,
    #[prost(string, tag = "3")]
    pub tag_key: String,
    /// 发起查询的节点（leader按该节点返回分片）
    #[prost(uint64, tag = "4")]
    pub node_id: u64,
}

/// tag查询响应
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TagResp {
    #[prost(string, tag = "1")]
    pub tag_key: String,
    #[prost(string, repeated, tag = "2")]
    pub uids: Vec<String>,
}

/// 转发的发送包
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ForwardedSendPacket {
    #[prost(bool, tag = "1")]
    pub red_dot: bool,
    #[prost(bool, tag = "2")]
    pub sync_once: bool,
    #[prost(bool, tag = "3")]
    pub no_persist: bool,
    #[prost(uint32, tag = "4")]
    pub setting: u32,
    #[prost(uint64, tag = "5")]
    pub client_seq: u64,
    #[prost(string, tag = "6")]
    pub client_msg_no: String,
    #[prost(string, tag = "7")]
    pub stream_no: String,
    #[prost(string, tag = "8")]
    pub channel_id: String,
    #[prost(uint32, tag = "9")]
    pub channel_type: u32,
    #[prost(uint32, tag = "10")]
    pub expire: u32,
    #[prost(string, tag = "11")]
    pub topic: String,
    #[prost(bytes = "vec", tag = "12")]
    pub payload: Vec<u8>,
}

/// 转发的频道消息
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ForwardedMessage {
    #[prost(int64, tag = "1")]
    pub message_id: i64,
    #[prost(uint32, tag = "2")]
    pub message_seq: u32,
    #[prost(string, tag = "3")]
    pub from_uid: String,
    #[prost(string, tag = "4")]
    pub from_device_id: String,
    #[prost(int64, tag = "5")]
    pub from_conn_id: i64,
    #[prost(uint64, tag = "6")]
    pub from_node_id: u64,
    #[prost(message, optional, tag = "7")]
    pub send_packet: Option<ForwardedSendPacket>,
}

/// 一个频道的一批待投递消息
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelMessages {
    #[prost(string, tag = "1")]
    pub channel_id: String,
    #[prost(uint32, tag = "2")]
    pub channel_type: u32,
    #[prost(string, tag = "3")]
    pub tag_key: String,
    #[prost(message, repeated, tag = "4")]
    pub messages: Vec<ForwardedMessage>,
}

/// `/wk/deliver` 的请求体
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelMessagesSet {
    #[prost(message, repeated, tag = "1")]
    pub channel_messages: Vec<ChannelMessages>,
}

/// 转发的sendack回执
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ForwardSendackPacket {
    #[prost(string, tag = "1")]
    pub uid: String,
    #[prost(string, tag = "2")]
    pub device_id: String,
    #[prost(int64, tag = "3")]
    pub conn_id: i64,
    #[prost(uint64, tag = "4")]
    pub client_seq: u64,
    #[prost(string, tag = "5")]
    pub client_msg_no: String,
    #[prost(int64, tag = "6")]
    pub message_id: i64,
    #[prost(uint32, tag = "7")]
    pub message_seq: u32,
    #[prost(uint32, tag = "8")]
    pub reason_code: u32,
}

/// `/wk/forwardSendack` 的请求体
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ForwardSendackPacketSet {
    #[prost(message, repeated, tag = "1")]
    pub packets: Vec<ForwardSendackPacket>,
}

/// `/wk/connWrite` 的请求体
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ForwardWriteReq {
    #[prost(string, tag = "1")]
    pub uid: String,
    #[prost(int64, tag = "2")]
    pub conn_id: i64,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
    #[prost(uint32, tag = "4")]
    pub recv_frame_count: u32,
}

/// 一个用户在某节点上的连接清单（节点ping/pong使用）
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserConns {
    #[prost(string, tag = "1")]
    pub uid: String,
    #[prost(int64, repeated, tag = "2")]
    pub conn_ids: Vec<i64>,
}

/// leader下发的节点ping请求体
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodePingReq {
    #[prost(message, repeated, tag = "1")]
    pub pings: Vec<UserConns>,
}

impl From<&SendPacket> for ForwardedSendPacket {
    fn from(packet: &SendPacket) -> Self {
        Self {
            red_dot: packet.framer.red_dot,
            sync_once: packet.framer.sync_once,
            no_persist: packet.framer.no_persist,
            setting: u32::from(packet.setting.0),
            client_seq: packet.client_seq,
            client_msg_no: packet.client_msg_no.clone(),
            stream_no: packet.stream_no.clone(),
            channel_id: packet.channel_id.clone(),
            channel_type: u32::from(packet.channel_type),
            expire: packet.expire,
            topic: packet.topic.clone(),
            payload: packet.payload.clone(),
        }
    }
}

impl From<ForwardedSendPacket> for SendPacket {
    fn from(packet: ForwardedSendPacket) -> Self {
        Self {
            framer: Framer {
                red_dot: packet.red_dot,
                sync_once: packet.sync_once,
                no_persist: packet.no_persist,
                dup: false,
            },
            setting: Setting(packet.setting as u8),
            client_seq: packet.client_seq,
            client_msg_no: packet.client_msg_no,
            stream_no: packet.stream_no,
            channel_id: packet.channel_id,
            channel_type: packet.channel_type as u8,
            expire: packet.expire,
            topic: packet.topic,
            payload: packet.payload,
        }
    }
}

impl From<&Message> for ForwardedMessage {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.message_id,
            message_seq: message.message_seq,
            from_uid: message.from_uid.clone(),
            from_device_id: message.from_device_id.clone(),
            from_conn_id: message.from_conn_id,
            from_node_id: message.from_node_id,
            send_packet: Some(ForwardedSendPacket::from(&message.send_packet)),
        }
    }
}

impl From<ForwardedMessage> for Message {
    fn from(message: ForwardedMessage) -> Self {
        Self {
            message_id: message.message_id,
            message_seq: message.message_seq,
            from_uid: message.from_uid,
            from_device_id: message.from_device_id,
            from_conn_id: message.from_conn_id,
            from_node_id: message.from_node_id,
            send_packet: message.send_packet.map(SendPacket::from).unwrap_or_default(),
        }
    }
}

impl From<&DeliverRequest> for ChannelMessages {
    fn from(req: &DeliverRequest) -> Self {
        Self {
            channel_id: req.channel_id.clone(),
            channel_type: u32::from(req.channel_type),
            tag_key: req.tag_key.clone(),
            messages: req.messages.iter().map(ForwardedMessage::from).collect(),
        }
    }
}

impl ChannelMessages {
    /// 还原为投递请求，频道句柄由调用方注入
    pub fn into_deliver_request(self, channel: Arc<dyn Channel>) -> DeliverRequest {
        let channel_type = self.channel_type as u8;
        DeliverRequest {
            channel_key: channel_to_key(&self.channel_id, channel_type),
            channel_id: self.channel_id,
            channel_type,
            tag_key: self.tag_key,
            messages: self.messages.into_iter().map(Message::from).collect(),
            channel,
        }
    }
}
