//! 投递引擎依赖的外部协作方接口
//!
//! 投递核心通过这些窄接口与频道子系统、接入层、重试队列、webhook分发器
//! 和最近会话服务协作，避免反向依赖整个server。

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::conn::{ConnContext, DeviceLevel};
use crate::error::DeliveryResult;
use crate::message::{Message, RetryMessage};
use crate::tag::ReceiverTag;

/// 频道句柄，由频道子系统提供
#[async_trait]
pub trait Channel: Send + Sync {
    /// 构建最新的接收者tag。构建成功后由频道子系统写入tag缓存。
    async fn make_receiver_tag(&self) -> DeliveryResult<Arc<ReceiverTag>>;
}

/// 按频道标识拿到频道句柄
pub trait ChannelProvider: Send + Sync {
    fn load_or_create_channel(&self, channel_id: &str, channel_type: u8) -> Arc<dyn Channel>;
}

/// 用户连接目录，由接入层（session reactor）实现，要求内部线程安全
pub trait UserDirectory: Send + Sync {
    /// 用户的全部连接。用户完全未知时返回 `None`，
    /// 已知但没有任何连接时返回空集合。
    fn conns(&self, uid: &str) -> Option<Vec<Arc<ConnContext>>>;

    /// 是否有主设备在线
    fn has_master_device(&self, uid: &str) -> bool {
        self.conns(uid)
            .map(|conns| {
                conns
                    .iter()
                    .any(|conn| conn.device_level == DeviceLevel::Master)
            })
            .unwrap_or(false)
    }

    /// 按连接ID查找连接
    fn conn_by_id(&self, uid: &str, conn_id: i64) -> Option<Arc<ConnContext>>;

    /// 按连接ID移除连接（连接本身的close由调用方负责）
    fn remove_conn_by_id(&self, uid: &str, conn_id: i64);
}

/// 重试队列：登记成功写入后等待recvack的消息
pub trait RetryManager: Send + Sync {
    fn add_retry(&self, retry: RetryMessage);
}

/// 最近会话更新入口（即发即弃）
pub trait ConversationManager: Send + Sync {
    fn push(&self, channel_id: &str, channel_type: u8, uids: &[String], messages: &[Message]);
}

/// 离线webhook通道（即发即弃，内部排队）
pub trait Webhook: Send + Sync {
    fn notify_offline_msg(&self, message: &Message, offline_uids: &[String]);
}

/// 投递给离线webhook分发器的事件载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineMsgEvent {
    pub channel_id: String,
    pub channel_type: u8,
    pub message_id: i64,
    pub message_seq: u32,
    pub client_msg_no: String,
    pub from_uid: String,
    /// base64编码的原始payload
    pub payload: String,
    /// 需要离线推送的用户
    pub to_uids: Vec<String>,
}

impl OfflineMsgEvent {
    pub fn from_message(message: &Message, offline_uids: &[String]) -> Self {
        Self {
            channel_id: message.send_packet.channel_id.clone(),
            channel_type: message.send_packet.channel_type,
            message_id: message.message_id,
            message_seq: message.message_seq,
            client_msg_no: message.send_packet.client_msg_no.clone(),
            from_uid: message.from_uid.clone(),
            payload: STANDARD.encode(&message.send_packet.payload),
            to_uids: offline_uids.to_vec(),
        }
    }
}
