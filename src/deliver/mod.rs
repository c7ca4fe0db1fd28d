//! 消息投递核心
//!
//! 固定数量的投递者各持有一个有界收件箱，提交侧按轮询非阻塞入队，
//! 全满时重试若干次后丢弃（丢失由上游提案层兜底）。每个投递者串行
//! 消费自己的批次，见 [`engine`]。

pub mod engine;
pub mod traits;
pub mod worker;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::cluster::forwarder::NodeForwarder;
use crate::cluster::ClusterClient;
use crate::config::DeliverConfig;
use crate::deliver::traits::{ConversationManager, RetryManager, UserDirectory, Webhook};
use crate::message::DeliverRequest;
use crate::metrics::DeliverMetrics;
use crate::tag::TagManager;

/// 投递引擎的协作方集合
///
/// 只向投递核心暴露需要的窄接口，不回指server整体。
pub struct DeliverContext {
    pub config: DeliverConfig,
    pub cluster: Arc<dyn ClusterClient>,
    pub tag_manager: Arc<dyn TagManager>,
    pub user_directory: Arc<dyn UserDirectory>,
    pub retry_manager: Arc<dyn RetryManager>,
    pub conversation_manager: Arc<dyn ConversationManager>,
    pub webhook: Arc<dyn Webhook>,
    pub forwarder: Arc<NodeForwarder>,
    pub metrics: Arc<DeliverMetrics>,
}

/// 投递管理器：投递者池与轮询分发
pub struct DeliverManager {
    ctx: Arc<DeliverContext>,
    senders: Vec<mpsc::Sender<DeliverRequest>>,
    receivers: Mutex<Option<Vec<mpsc::Receiver<DeliverRequest>>>>,
    next_index: AtomicUsize,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DeliverManager {
    pub fn new(ctx: Arc<DeliverContext>) -> Self {
        let worker_count = ctx.config.worker_count.max(1);
        let inbox_capacity = ctx.config.inbox_capacity.max(1);
        let mut senders = Vec::with_capacity(worker_count);
        let mut receivers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let (tx, rx) = mpsc::channel(inbox_capacity);
            senders.push(tx);
            receivers.push(rx);
        }
        Self {
            ctx,
            senders,
            receivers: Mutex::new(Some(receivers)),
            next_index: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// 启动投递者。重复调用无效果。
    pub fn start(&self) {
        let Some(receivers) = self.receivers.lock().take() else {
            return;
        };
        let mut handles = self.handles.lock();
        for (index, rx) in receivers.into_iter().enumerate() {
            handles.push(tokio::spawn(worker::run(
                index,
                rx,
                self.ctx.clone(),
                self.shutdown.clone(),
            )));
        }
    }

    /// 停止投递者池与节点转发器。收件箱中未处理的请求被丢弃。
    pub fn stop(&self) {
        self.shutdown.cancel();
        self.ctx.forwarder.stop();
    }

    /// 提交一次投递请求
    ///
    /// 按轮询选择投递者做非阻塞入队；目标收件箱满则换下一个，超过
    /// `max_retry` 次后丢弃并记录。
    pub fn submit(&self, req: DeliverRequest) {
        let worker_count = self.senders.len();
        let mut req = req;
        let mut retry = 0usize;
        loop {
            if retry > self.ctx.config.max_retry {
                self.ctx.metrics.incr_dropped();
                error!(
                    channel_id = %req.channel_id,
                    channel_type = req.channel_type,
                    retry = retry,
                    "Deliver inbox full, request dropped"
                );
                return;
            }
            let index = self.next_index.fetch_add(1, Ordering::Relaxed) % worker_count;
            match self.senders[index].try_send(req) {
                Ok(()) => {
                    self.ctx.metrics.incr_submitted();
                    return;
                }
                Err(mpsc::error::TrySendError::Full(back)) => {
                    req = back;
                    retry += 1;
                }
                Err(mpsc::error::TrySendError::Closed(back)) => {
                    self.ctx.metrics.incr_dropped();
                    error!(
                        channel_id = %back.channel_id,
                        "Deliver worker stopped, request dropped"
                    );
                    return;
                }
            }
        }
    }

    /// 协作方集合
    pub fn context(&self) -> &Arc<DeliverContext> {
        &self.ctx
    }

    /// 各投递者收件箱的剩余容量（测试与运维观察用）
    pub fn inbox_remaining(&self) -> Vec<usize> {
        self.senders.iter().map(|tx| tx.capacity()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::DeliverConfig;
    use crate::conn::DeviceLevel;
    use crate::protocol::CHANNEL_TYPE_GROUP;
    use crate::testsupport::*;

    fn config(node_id: u64, worker_count: usize, inbox_capacity: usize) -> DeliverConfig {
        DeliverConfig {
            worker_count,
            inbox_capacity,
            ..DeliverConfig::new(node_id)
        }
    }

    /// 测试：无竞争时N次提交轮询命中每个投递者各一次
    #[tokio::test]
    async fn test_round_robin_dispatch() {
        let h = harness_with_config(config(1, 4, 8));
        let manager = DeliverManager::new(h.ctx.clone());

        for i in 0..4 {
            let message = make_message("carol", "d1", i, "g1", CHANNEL_TYPE_GROUP, b"hi");
            let req =
                make_request("g1", CHANNEL_TYPE_GROUP, "tag", vec![message], MockChannel::empty());
            manager.submit(req);
        }

        assert_eq!(manager.inbox_remaining(), vec![7, 7, 7, 7]);
        assert_eq!(h.metrics.snapshot().submitted, 4);
    }

    /// 测试：所有收件箱都满时请求被丢弃并计数
    #[tokio::test]
    async fn test_submit_drops_when_saturated() {
        let h = harness_with_config(config(1, 2, 1));
        let manager = DeliverManager::new(h.ctx.clone());

        for i in 0..3 {
            let message = make_message("carol", "d1", i, "g1", CHANNEL_TYPE_GROUP, b"hi");
            let req =
                make_request("g1", CHANNEL_TYPE_GROUP, "tag", vec![message], MockChannel::empty());
            manager.submit(req);
        }

        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.submitted, 2);
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(manager.inbox_remaining(), vec![0, 0]);
    }

    /// 测试：启动后投递者消费收件箱完成真实投递
    #[tokio::test]
    async fn test_worker_processes_submitted_request() {
        let h = harness_with_config(config(1, 2, 16));
        h.tag_manager
            .add_or_update_receiver_tag("tag-m", vec![node_users(1, &["alice"])]);
        let (c1, t1) = make_conn("alice", "da", DeviceLevel::Master, 1, h.log.clone());
        h.directory.insert("alice", vec![c1]);

        let manager = DeliverManager::new(h.ctx.clone());
        manager.start();

        let message = make_message("carol", "d1", 5, "g1", CHANNEL_TYPE_GROUP, b"hi");
        let req = make_request("g1", CHANNEL_TYPE_GROUP, "tag-m", vec![message], MockChannel::empty());
        manager.submit(req);

        for _ in 0..100 {
            if t1.write_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(t1.write_count(), 1);
        manager.stop();
    }
}
