//! 投递服务错误类型定义

use thiserror::Error;

/// 投递服务错误类型
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// 投递者收件箱已满（轮询重试次数耗尽）
    #[error("Deliver inbox full after {0} attempts")]
    InboxFull(usize),

    /// 频道leader查询失败
    #[error("Leader lookup failed: {0}")]
    LeaderLookup(String),

    /// tag RPC 超时
    #[error("Tag request to node {0} timed out")]
    TagRpcTimeout(u64),

    /// tag RPC 失败
    #[error("Tag request failed: {0}")]
    TagRpc(String),

    /// 当前节点不是频道leader
    #[error("Not the leader of channel {0}")]
    NotChannelLeader(String),

    /// payload 加密失败
    #[error("Encrypt failed: {0}")]
    Encrypt(String),

    /// MsgKey 生成失败
    #[error("MsgKey failed: {0}")]
    MsgKey(String),

    /// 数据包编码失败
    #[error("Encode failed: {0}")]
    Encode(String),

    /// 数据包解码失败
    #[error("Decode failed: {0}")]
    Decode(String),

    /// 连接写入失败
    #[error("Connection write failed: {0}")]
    ConnWrite(String),

    /// 连接未找到
    #[error("Connection not found: uid={uid} conn_id={conn_id}")]
    ConnNotFound { uid: String, conn_id: i64 },

    /// 密钥长度非法（仅支持 16/24/32 字节）
    #[error("Invalid AES key length: {0}")]
    InvalidKeyLength(usize),

    /// IV 长度非法
    #[error("Invalid AES iv length: {0}")]
    InvalidIvLength(usize),

    /// 无效的参数
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// 集群 RPC 失败
    #[error("Cluster request failed: {0}")]
    Cluster(String),

    /// 其他错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 投递服务结果类型
pub type DeliveryResult<T> = Result<T, DeliveryError>;
