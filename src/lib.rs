//! Flare Delivery 消息投递核心
//!
//! 分布式IM服务端的投递子系统：给定一批频道消息和标识受众的接收者tag，
//! 在集群内解析受众分片，转发非本节点的投递，对本地每个接收者连接
//! 加密构帧写入，存储消息登记重试，不可达用户汇总给离线webhook。
//!
//! 频道共识、接入层、tag构建引擎、webhook分发器、重试调度器和最近会话
//! 服务都是外部协作方，通过 [`deliver::traits`] 与 [`cluster::ClusterClient`]
//! 的接口接入。

pub mod cluster;
pub mod config;
pub mod conn;
pub mod crypto;
pub mod deliver;
pub mod error;
pub mod message;
pub mod metrics;
pub mod protocol;
pub mod tag;

#[cfg(test)]
mod testsupport;

pub use cluster::forwarder::NodeForwarder;
pub use cluster::handlers::ClusterHandlers;
pub use cluster::{ClusterClient, NodeInfo, RpcResponse, Status};
pub use config::DeliverConfig;
pub use conn::{ConnContext, ConnTransport, DeviceFlag, DeviceLevel};
pub use deliver::traits::{
    Channel, ChannelProvider, ConversationManager, OfflineMsgEvent, RetryManager, UserDirectory,
    Webhook,
};
pub use deliver::{DeliverContext, DeliverManager};
pub use error::{DeliveryError, DeliveryResult};
pub use message::{DeliverRequest, Message, RetryMessage};
pub use metrics::{DeliverMetrics, MetricsSnapshot};
pub use tag::{MemoryTagManager, NodeUsers, ReceiverTag, TagManager};
