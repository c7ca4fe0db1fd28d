//! 集群协作接口
//!
//! 投递核心消费的集群RPC（leader查询、节点间请求）以及对外暴露的
//! 入站处理器。共识与日志复制由集群层实现，这里只依赖其窄接口。

pub mod forwarder;
pub mod handlers;
pub mod wire;

use async_trait::async_trait;

use crate::error::DeliveryResult;

/// 投递消息（将需要投递的消息转发给对应用户的逻辑节点）
pub const PATH_DELIVER: &str = "/wk/deliver";
/// 通过tag获取目标节点需要投递的用户集合
pub const PATH_GET_NODE_UIDS_BY_TAG: &str = "/wk/getNodeUidsByTag";
/// 转发sendack回执到源节点
pub const PATH_FORWARD_SENDACK: &str = "/wk/forwardSendack";
/// 转发连接写数据
pub const PATH_CONN_WRITE: &str = "/wk/connWrite";

/// RPC响应状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
    NotFound,
    /// 当前节点不是频道leader
    NotChannelLeader,
    /// 目标连接不存在
    ConnNotFound,
}

impl Status {
    pub fn to_u32(self) -> u32 {
        match self {
            Status::Ok => 1,
            Status::Error => 2,
            Status::NotFound => 3,
            Status::NotChannelLeader => 1001,
            Status::ConnNotFound => 1002,
        }
    }

    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => Status::Ok,
            3 => Status::NotFound,
            1001 => Status::NotChannelLeader,
            1002 => Status::ConnNotFound,
            _ => Status::Error,
        }
    }
}

/// RPC响应
#[derive(Debug, Clone)]
pub struct RpcResponse {
    pub status: Status,
    pub body: Vec<u8>,
}

impl RpcResponse {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            body: Vec::new(),
        }
    }

    pub fn ok_with(body: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            body,
        }
    }

    pub fn error(status: Status, msg: impl Into<String>) -> Self {
        Self {
            status,
            body: msg.into().into_bytes(),
        }
    }
}

/// 集群节点信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: u64,
}

/// 集群RPC客户端，由集群层实现
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// 读路径的频道leader查询，允许返回略旧但有效的leader
    async fn leader_of_channel_for_read(
        &self,
        channel_id: &str,
        channel_type: u8,
    ) -> DeliveryResult<NodeInfo>;

    /// 强一致的leader判断
    async fn is_leader_of_channel(
        &self,
        channel_id: &str,
        channel_type: u8,
    ) -> DeliveryResult<bool>;

    /// 向指定节点发起请求
    async fn request(
        &self,
        to_node_id: u64,
        path: &str,
        body: Vec<u8>,
    ) -> DeliveryResult<RpcResponse>;
}
