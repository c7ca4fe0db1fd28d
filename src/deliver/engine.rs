//! 投递引擎
//!
//! 处理一次投递请求：解析接收者tag，按节点分片拆分本地投递与转发，
//! 对本地每个 `(连接, 消息)` 组合构帧加密写入，存储消息先登记重试，
//! 离线用户汇总后通知webhook。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use prost::Message as ProstMessage;
use tracing::{debug, error, trace};

use crate::cluster::wire::{TagReq, TagResp};
use crate::cluster::{ClusterClient as _, Status, PATH_GET_NODE_UIDS_BY_TAG};
use crate::conn::ConnContext;
use crate::crypto;
use crate::deliver::traits::{
    Channel as _, ConversationManager as _, RetryManager as _, UserDirectory as _, Webhook as _,
};
use crate::deliver::DeliverContext;
use crate::error::{DeliveryError, DeliveryResult};
use crate::message::{DeliverRequest, Message, RetryMessage};
use crate::protocol::{
    encode_recv_packet, FrameType, Framer, RecvPacket, StreamFlag, CHANNEL_TYPE_PERSON,
};
use crate::tag::{NodeUsers, ReceiverTag, TagManager as _};

/// tag查询RPC的超时时间
const TAG_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// 处理一次投递请求
pub async fn handle_deliver_req(ctx: &Arc<DeliverContext>, req: DeliverRequest) {
    // ================== 获取tag信息 ==================
    let tag = match resolve_receiver_tag(ctx, &req).await {
        Ok(tag) => tag,
        Err(e) => {
            error!(
                channel_id = %req.channel_id,
                channel_type = req.channel_type,
                tag_key = %req.tag_key,
                error = %e,
                "Resolve receiver tag failed, deliver request abandoned"
            );
            return;
        }
    };

    // ================== 投递消息 ==================
    for node_users in &tag.users {
        if node_users.node_id == ctx.config.node_id {
            // 更新最近会话
            ctx.conversation_manager.push(
                &req.channel_id,
                req.channel_type,
                &node_users.uids,
                &req.messages,
            );
            // 投递本节点负责的用户
            deliver_to_uids(ctx, &req, &node_users.uids);
        } else {
            // 非本节点的转发给对应节点去投递
            if ctx.config.trace_on {
                for message in &req.messages {
                    trace!(
                        client_msg_no = %message.send_packet.client_msg_no,
                        to_node_id = node_users.node_id,
                        "Forward deliver request"
                    );
                }
            }
            ctx.forwarder.forward(node_users.node_id, req.clone());
        }
    }
}

/// 解析接收者tag：优先本地缓存，缺失时本节点是leader就现场构建，
/// 否则向leader请求本节点的分片。
async fn resolve_receiver_tag(
    ctx: &Arc<DeliverContext>,
    req: &DeliverRequest,
) -> DeliveryResult<Arc<ReceiverTag>> {
    if let Some(tag) = ctx.tag_manager.get_receiver_tag(&req.tag_key) {
        return Ok(tag);
    }

    let leader = ctx
        .cluster
        .leader_of_channel_for_read(&req.channel_id, req.channel_type)
        .await
        .map_err(|e| DeliveryError::LeaderLookup(e.to_string()))?;

    if leader.id == ctx.config.node_id {
        // 本节点是leader且tag不存在，现场构建
        if ctx.config.trace_on {
            for message in &req.messages {
                trace!(
                    client_msg_no = %message.send_packet.client_msg_no,
                    tag_key = %req.tag_key,
                    "Make receiver tag"
                );
            }
        }
        return req.channel.make_receiver_tag().await;
    }

    if ctx.config.trace_on {
        for message in &req.messages {
            trace!(
                client_msg_no = %message.send_packet.client_msg_no,
                tag_key = %req.tag_key,
                leader_id = leader.id,
                "Request receiver tag from leader"
            );
        }
    }
    let resp = request_node_channel_tag(
        ctx,
        leader.id,
        TagReq {
            channel_id: req.channel_id.clone(),
            channel_type: u32::from(req.channel_type),
            tag_key: req.tag_key.clone(),
            node_id: ctx.config.node_id,
        },
    )
    .await?;

    Ok(ctx.tag_manager.add_or_update_receiver_tag(
        &resp.tag_key,
        vec![NodeUsers {
            node_id: ctx.config.node_id,
            uids: resp.uids,
        }],
    ))
}

/// 向leader请求本节点在该tag下负责的用户集合
async fn request_node_channel_tag(
    ctx: &Arc<DeliverContext>,
    node_id: u64,
    tag_req: TagReq,
) -> DeliveryResult<TagResp> {
    let body = tag_req.encode_to_vec();
    let resp = tokio::time::timeout(
        TAG_RPC_TIMEOUT,
        ctx.cluster.request(node_id, PATH_GET_NODE_UIDS_BY_TAG, body),
    )
    .await
    .map_err(|_| DeliveryError::TagRpcTimeout(node_id))?
    .map_err(|e| DeliveryError::TagRpc(e.to_string()))?;

    if resp.status != Status::Ok {
        return Err(DeliveryError::TagRpc(format!(
            "status: {}, err: {}",
            resp.status.to_u32(),
            String::from_utf8_lossy(&resp.body)
        )));
    }
    TagResp::decode(resp.body.as_slice()).map_err(|e| DeliveryError::Decode(e.to_string()))
}

/// 投递给本节点负责的用户集合
pub(crate) fn deliver_to_uids(ctx: &Arc<DeliverContext>, req: &DeliverRequest, uids: &[String]) {
    if uids.is_empty() {
        return;
    }

    // ================== 接收者分类 ==================
    // 离线用户（只要主设备不在线就算离线）
    let mut webhook_offline_uids: Vec<String> = Vec::with_capacity(uids.len());
    // 所有客户端都不在线的用户数量
    let mut offline_user_count = 0usize;
    // 在线用户的连接对象
    let mut all_conns: Vec<Arc<ConnContext>> = Vec::with_capacity(uids.len() / 2);
    // 只要一个客户端在线就算在线
    let mut online_user_count = 0usize;

    for to_uid in uids {
        let Some(conns) = ctx.user_directory.conns(to_uid) else {
            // 用户不在线
            webhook_offline_uids.push(to_uid.clone());
            offline_user_count += 1;
            continue;
        };
        if conns.is_empty() {
            webhook_offline_uids.push(to_uid.clone());
            offline_user_count += 1;
            continue;
        }
        // 没有主设备在线也要推离线，比如web在线手机离线时手机仍需收到推送
        if !ctx.user_directory.has_master_device(to_uid) {
            webhook_offline_uids.push(to_uid.clone());
        }
        all_conns.extend(conns);
        online_user_count += 1;
    }

    if ctx.config.trace_on {
        for message in &req.messages {
            if message.send_packet.channel_type == CHANNEL_TYPE_PERSON {
                let to_uid = &message.send_packet.channel_id;
                if uids.iter().any(|uid| uid == to_uid) {
                    trace!(
                        client_msg_no = %message.send_packet.client_msg_no,
                        to_uid = %to_uid,
                        online_conns = all_conns.len(),
                        "Deliver person channel message"
                    );
                }
            }
        }
    }

    debug!(
        channel_id = %req.channel_id,
        channel_type = req.channel_type,
        online_users = online_user_count,
        offline_users = offline_user_count,
        conns = all_conns.len(),
        "Deliver classified recipients"
    );

    // ================== 逐连接发包 ==================
    for conn in &all_conns {
        for message in &req.messages {
            // 自己发的不投回自己
            if conn.uid == message.from_uid && conn.device_id == message.from_device_id {
                continue;
            }
            emit_packet(ctx, req, conn, message);
        }
    }

    // ================== 离线webhook ==================
    if !webhook_offline_uids.is_empty() {
        for message in &req.messages {
            ctx.webhook.notify_offline_msg(message, &webhook_offline_uids);
            ctx.metrics.incr_offline_notified();
        }
    }
}

/// 为一个 `(连接, 消息)` 组合构帧并写入
fn emit_packet(
    ctx: &Arc<DeliverContext>,
    req: &DeliverRequest,
    conn: &Arc<ConnContext>,
    message: &Message,
) {
    let send_packet = &message.send_packet;

    debug!(
        message_id = message.message_id,
        uid = %conn.uid,
        device_id = %conn.device_id,
        conn_id = conn.conn_id,
        channel_id = %req.channel_id,
        channel_type = req.channel_type,
        "Deliver message to connection"
    );

    // 发送者是系统账号时单聊不显示发送者
    let mut from_uid = message.from_uid.clone();
    if send_packet.channel_type == CHANNEL_TYPE_PERSON && from_uid == ctx.config.system_uid {
        from_uid = String::new();
    }

    let mut recv_packet = RecvPacket {
        framer: Framer {
            red_dot: send_packet.framer.red_dot,
            sync_once: send_packet.framer.sync_once,
            no_persist: send_packet.framer.no_persist,
            dup: false,
        },
        setting: send_packet.setting,
        message_id: message.message_id,
        message_seq: message.message_seq,
        client_msg_no: send_packet.client_msg_no.clone(),
        stream_no: send_packet.stream_no.clone(),
        stream_flag: StreamFlag::Ing,
        from_uid,
        expire: send_packet.expire,
        channel_id: send_packet.channel_id.clone(),
        channel_type: send_packet.channel_type,
        topic: send_packet.topic.clone(),
        timestamp: Utc::now().timestamp() as i32,
        payload: send_packet.payload.clone(),
        msg_key: String::new(),
        // 不参与编码，透传给发送端
        client_seq: send_packet.client_seq,
    };

    // 单聊时channelId换成对方：A给B发消息，B看到的频道是A，A看到的是B
    if recv_packet.channel_type == CHANNEL_TYPE_PERSON && recv_packet.channel_id == conn.uid {
        recv_packet.channel_id = recv_packet.from_uid.clone();
    }

    // 自己的消息不显示红点
    if conn.uid == recv_packet.from_uid {
        recv_packet.framer.red_dot = false;
    }

    // payload内容加密
    let payload_enc = match crypto::aes_encrypt_pkcs7_base64(
        &recv_packet.payload,
        conn.aes_key.as_bytes(),
        conn.aes_iv.as_bytes(),
    ) {
        Ok(enc) => enc,
        Err(e) => {
            error!(uid = %conn.uid, error = %e, "Encrypt payload failed");
            return;
        }
    };
    recv_packet.payload = payload_enc.into_bytes();

    // 对内容签名，防止中间人篡改
    let verify_str = recv_packet.verify_string();
    recv_packet.msg_key =
        match crypto::make_msg_key(&verify_str, conn.aes_key.as_bytes(), conn.aes_iv.as_bytes()) {
            Ok(key) => key,
            Err(e) => {
                error!(uid = %conn.uid, error = %e, "Make msg key failed");
                return;
            }
        };

    let recv_packet_data = match encode_recv_packet(&recv_packet, conn.proto_version) {
        Ok(data) => data,
        Err(e) => {
            error!(
                uid = %conn.uid,
                channel_id = %recv_packet.channel_id,
                channel_type = recv_packet.channel_type,
                error = %e,
                "Encode recv packet failed"
            );
            return;
        }
    };

    // 只有存储的消息才重试，且必须在写入前登记
    if !recv_packet.framer.no_persist {
        ctx.retry_manager.add_retry(RetryMessage {
            uid: conn.uid.clone(),
            conn_id: conn.conn_id,
            message_id: message.message_id,
            recv_packet_data: recv_packet_data.clone(),
        });
    }

    if let Err(e) = conn.write(&recv_packet_data, FrameType::Recv) {
        error!(
            uid = %conn.uid,
            channel_id = %recv_packet.channel_id,
            channel_type = recv_packet.channel_type,
            error = %e,
            "Write recv packet failed"
        );
        // 写不进去就关闭连接，让客户端重连走离线同步，避免丢消息假象
        if !conn.is_closed() {
            conn.close();
        }
        return;
    }
    ctx.metrics.incr_packets_written();
}
