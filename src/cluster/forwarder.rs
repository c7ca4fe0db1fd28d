//! 节点转发器
//!
//! 非本节点分片的投递请求按目标节点排队，由每个节点独立的发货协程
//! 合并成一个 [`ChannelMessagesSet`] 批量发出。重试交给上游的提案层，
//! 这里只记录失败。

use std::sync::Arc;

use dashmap::DashMap;
use prost::Message as ProstMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::cluster::wire::{ChannelMessages, ChannelMessagesSet};
use crate::cluster::{ClusterClient, Status, PATH_DELIVER};
use crate::message::DeliverRequest;
use crate::metrics::DeliverMetrics;

/// 节点转发器
pub struct NodeForwarder {
    cluster: Arc<dyn ClusterClient>,
    metrics: Arc<DeliverMetrics>,
    queue_capacity: usize,
    queues: DashMap<u64, mpsc::Sender<DeliverRequest>>,
    shutdown: CancellationToken,
}

impl NodeForwarder {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        metrics: Arc<DeliverMetrics>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            cluster,
            metrics,
            queue_capacity,
            queues: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// 把请求排入目标节点的转发队列。队列满时丢弃并计数。
    pub fn forward(&self, node_id: u64, req: DeliverRequest) {
        let sender = self
            .queues
            .entry(node_id)
            .or_insert_with(|| self.spawn_shipper(node_id))
            .clone();
        match sender.try_send(req) {
            Ok(()) => self.metrics.incr_forwarded(),
            Err(e) => {
                self.metrics.incr_forward_failed();
                warn!(
                    node_id = node_id,
                    error = %e,
                    "Forward queue full, deliver request dropped"
                );
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    fn spawn_shipper(&self, node_id: u64) -> mpsc::Sender<DeliverRequest> {
        let (tx, mut rx) = mpsc::channel::<DeliverRequest>(self.queue_capacity);
        let cluster = self.cluster.clone();
        let metrics = self.metrics.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => {
                        let Some(req) = maybe else {
                            return;
                        };
                        let mut batch = vec![req];
                        while let Ok(req) = rx.try_recv() {
                            batch.push(req);
                        }
                        ship(cluster.as_ref(), metrics.as_ref(), node_id, &batch).await;
                    }
                    _ = shutdown.cancelled() => {
                        return;
                    }
                }
            }
        });
        tx
    }
}

/// 把一批请求合并成一个集合发给目标节点
async fn ship(
    cluster: &dyn ClusterClient,
    metrics: &DeliverMetrics,
    node_id: u64,
    batch: &[DeliverRequest],
) {
    let set = ChannelMessagesSet {
        channel_messages: batch.iter().map(ChannelMessages::from).collect(),
    };
    match cluster.request(node_id, PATH_DELIVER, set.encode_to_vec()).await {
        Ok(resp) if resp.status == Status::Ok => {
            debug!(
                node_id = node_id,
                requests = batch.len(),
                "Forwarded deliver requests"
            );
        }
        Ok(resp) => {
            metrics.incr_forward_failed();
            error!(
                node_id = node_id,
                status = resp.status.to_u32(),
                body = %String::from_utf8_lossy(&resp.body),
                "Forward deliver rejected by peer"
            );
        }
        Err(e) => {
            metrics.incr_forward_failed();
            error!(
                node_id = node_id,
                error = %e,
                "Forward deliver request failed"
            );
        }
    }
}
