//! 投递者循环
//!
//! 每个投递者单线程串行：阻塞等首个请求，非阻塞把收件箱里攒下的请求
//! 一次性排干成一个批次，逐个处理后再回到等待。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::deliver::{engine, DeliverContext};
use crate::message::DeliverRequest;

pub(crate) async fn run(
    index: usize,
    mut rx: mpsc::Receiver<DeliverRequest>,
    ctx: Arc<DeliverContext>,
    shutdown: CancellationToken,
) {
    debug!(worker = index, "Deliver worker started");
    let mut batch: Vec<DeliverRequest> = Vec::new();
    loop {
        tokio::select! {
            maybe = rx.recv() => {
                let Some(req) = maybe else {
                    debug!(worker = index, "Deliver worker inbox closed");
                    return;
                };
                batch.push(req);
                while let Ok(req) = rx.try_recv() {
                    batch.push(req);
                }
                for req in batch.drain(..) {
                    engine::handle_deliver_req(&ctx, req).await;
                }
            }
            _ = shutdown.cancelled() => {
                debug!(worker = index, "Deliver worker stopped");
                return;
            }
        }
    }
}
