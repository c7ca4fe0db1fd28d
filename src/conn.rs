//! 连接上下文
//!
//! 投递引擎只是连接的消费者：连接的生命周期由接入层管理，这里只持有
//! 身份信息、协商好的加密参数和一个写入端点。

use std::fmt;
use std::sync::Arc;

use crate::error::DeliveryResult;
use crate::protocol::FrameType;

/// 设备类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceFlag {
    #[default]
    App = 0,
    Web = 1,
    Pc = 2,
}

/// 设备等级
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceLevel {
    /// 从设备
    #[default]
    Slave = 0,
    /// 主设备，离线时即使有从设备在线也要触发离线推送
    Master = 1,
}

/// 连接写入端点，由接入层实现
pub trait ConnTransport: Send + Sync {
    /// 写入一帧已编码数据
    fn write(&self, data: &[u8], frame_type: FrameType) -> DeliveryResult<()>;

    /// 直接写入已编码好的数据，`recv_frame_count` 是其中包含的recv帧数，
    /// 供接入层统计下行帧
    fn write_directly(&self, data: &[u8], recv_frame_count: u32) -> DeliveryResult<()>;

    /// 关闭连接
    fn close(&self);

    /// 连接是否已关闭
    fn is_closed(&self) -> bool;
}

/// 连接上下文
#[derive(Clone)]
pub struct ConnContext {
    pub uid: String,
    pub device_id: String,
    pub device_flag: DeviceFlag,
    pub device_level: DeviceLevel,
    /// 本节点分配的连接ID
    pub conn_id: i64,
    /// 连接真实所在的节点
    pub real_node_id: u64,
    /// 连接在真实节点上的ID（代理场景）
    pub proxy_conn_id: i64,
    /// 认证时协商的协议版本
    pub proto_version: u8,
    /// 认证时协商的AES密钥
    pub aes_key: String,
    /// 认证时协商的AES向量
    pub aes_iv: String,
    transport: Arc<dyn ConnTransport>,
}

impl ConnContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uid: impl Into<String>,
        device_id: impl Into<String>,
        device_flag: DeviceFlag,
        device_level: DeviceLevel,
        conn_id: i64,
        proto_version: u8,
        aes_key: impl Into<String>,
        aes_iv: impl Into<String>,
        transport: Arc<dyn ConnTransport>,
    ) -> Self {
        Self {
            uid: uid.into(),
            device_id: device_id.into(),
            device_flag,
            device_level,
            conn_id,
            real_node_id: 0,
            proxy_conn_id: 0,
            proto_version,
            aes_key: aes_key.into(),
            aes_iv: aes_iv.into(),
            transport,
        }
    }

    /// 设置代理信息（连接真实所在节点及其连接ID）
    pub fn with_proxy(mut self, real_node_id: u64, proxy_conn_id: i64) -> Self {
        self.real_node_id = real_node_id;
        self.proxy_conn_id = proxy_conn_id;
        self
    }

    pub fn write(&self, data: &[u8], frame_type: FrameType) -> DeliveryResult<()> {
        self.transport.write(data, frame_type)
    }

    pub fn write_directly(&self, data: &[u8], recv_frame_count: u32) -> DeliveryResult<()> {
        self.transport.write_directly(data, recv_frame_count)
    }

    pub fn close(&self) {
        self.transport.close()
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }
}

impl fmt::Debug for ConnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnContext")
            .field("uid", &self.uid)
            .field("device_id", &self.device_id)
            .field("device_flag", &self.device_flag)
            .field("device_level", &self.device_level)
            .field("conn_id", &self.conn_id)
            .field("real_node_id", &self.real_node_id)
            .field("proxy_conn_id", &self.proxy_conn_id)
            .field("proto_version", &self.proto_version)
            .finish()
    }
}
