//! 投递服务配置模块

use std::env;
use std::time::Duration;

/// 投递服务配置
#[derive(Debug, Clone)]
pub struct DeliverConfig {
    /// 投递者（worker）数量
    pub worker_count: usize,
    /// 每个投递者的收件箱容量
    pub inbox_capacity: usize,
    /// 收件箱满时的最大轮询重试次数，超过后丢弃请求
    pub max_retry: usize,
    /// 本节点ID
    pub node_id: u64,
    /// 系统账号uid，单聊中该账号发的消息不显示发送者
    pub system_uid: String,
    /// 是否开启按消息的trace日志
    pub trace_on: bool,
    /// 连接最大空闲时间（认证通过后透传给连接层）
    pub conn_idle_time: Duration,
    /// 每个目标节点的转发队列容量
    pub forward_queue_capacity: usize,
}

impl Default for DeliverConfig {
    fn default() -> Self {
        Self {
            worker_count: 32,
            inbox_capacity: 1024,
            max_retry: 10,
            node_id: 0,
            system_uid: "____system".to_string(),
            trace_on: false,
            conn_idle_time: Duration::from_secs(90),
            forward_queue_capacity: 1024,
        }
    }
}

impl DeliverConfig {
    /// 创建指定节点ID的默认配置
    pub fn new(node_id: u64) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    /// 从环境变量加载配置（未设置的项使用默认值）
    pub fn from_env(node_id: u64) -> Self {
        let defaults = Self::new(node_id);

        let worker_count = env::var("DELIVER_WORKER_COUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|count: &usize| *count > 0)
            .unwrap_or(defaults.worker_count);

        let inbox_capacity = env::var("DELIVER_INBOX_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|cap: &usize| *cap > 0)
            .unwrap_or(defaults.inbox_capacity);

        let max_retry = env::var("DELIVER_MAX_RETRY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_retry);

        let system_uid = env::var("DELIVER_SYSTEM_UID").unwrap_or(defaults.system_uid);

        let trace_on = env::var("DELIVER_TRACE_ON")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.trace_on);

        let conn_idle_time = env::var("DELIVER_CONN_IDLE_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.conn_idle_time);

        let forward_queue_capacity = env::var("DELIVER_FORWARD_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|cap: &usize| *cap > 0)
            .unwrap_or(defaults.forward_queue_capacity);

        Self {
            worker_count,
            inbox_capacity,
            max_retry,
            node_id,
            system_uid,
            trace_on,
            conn_idle_time,
            forward_queue_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeliverConfig::new(1);
        assert_eq!(config.node_id, 1);
        assert_eq!(config.worker_count, 32);
        assert_eq!(config.inbox_capacity, 1024);
        assert_eq!(config.max_retry, 10);
        assert!(!config.trace_on);
    }
}
