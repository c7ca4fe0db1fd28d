//! 投递指标统计
//!
//! 进程内原子计数器，供运维面板和测试观察投递行为

use std::sync::atomic::{AtomicU64, Ordering};

/// 投递指标
#[derive(Debug, Default)]
pub struct DeliverMetrics {
    /// 成功提交到投递者收件箱的请求数
    pub submitted: AtomicU64,
    /// 收件箱全满被丢弃的请求数
    pub dropped: AtomicU64,
    /// 成功写入连接的数据包数
    pub packets_written: AtomicU64,
    /// 转发给其他节点的请求数
    pub forwarded: AtomicU64,
    /// 转发失败次数
    pub forward_failed: AtomicU64,
    /// 触发离线webhook的消息数
    pub offline_notified: AtomicU64,
}

impl DeliverMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_packets_written(&self) {
        self.packets_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_forward_failed(&self) {
        self.forward_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_offline_notified(&self) {
        self.offline_notified.fetch_add(1, Ordering::Relaxed);
    }

    /// 当前计数快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            packets_written: self.packets_written.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            forward_failed: self.forward_failed.load(Ordering::Relaxed),
            offline_notified: self.offline_notified.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub dropped: u64,
    pub packets_written: u64,
    pub forwarded: u64,
    pub forward_failed: u64,
    pub offline_notified: u64,
}
