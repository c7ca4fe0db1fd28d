//! 集群入站处理器
//!
//! 其他节点调用本节点的RPC入口。传输层负责把路径路由到对应方法，
//! 这里只做解码、校验和业务分发。

use std::sync::Arc;

use prost::Message as ProstMessage;
use tracing::{debug, error, info};

use crate::cluster::wire::{
    ChannelMessagesSet, ForwardSendackPacketSet, ForwardWriteReq, NodePingReq, TagReq, TagResp,
    UserConns,
};
use crate::cluster::{ClusterClient as _, RpcResponse, Status};
use crate::deliver::traits::{Channel as _, ChannelProvider, UserDirectory as _};
use crate::deliver::DeliverManager;
use crate::protocol::{encode_sendack_packet, FrameType, SendackPacket};
use crate::tag::TagManager as _;

/// 集群入站处理器集合
pub struct ClusterHandlers {
    manager: Arc<DeliverManager>,
    channels: Arc<dyn ChannelProvider>,
}

impl ClusterHandlers {
    pub fn new(manager: Arc<DeliverManager>, channels: Arc<dyn ChannelProvider>) -> Self {
        Self { manager, channels }
    }

    /// `/wk/deliver`：接收其他节点转发来的投递请求
    pub async fn handle_deliver(&self, body: &[u8]) -> RpcResponse {
        let set = match ChannelMessagesSet::decode(body) {
            Ok(set) => set,
            Err(e) => {
                error!(error = %e, "Decode ChannelMessagesSet failed");
                return RpcResponse::error(Status::Error, e.to_string());
            }
        };
        for channel_messages in set.channel_messages {
            let channel = self.channels.load_or_create_channel(
                &channel_messages.channel_id,
                channel_messages.channel_type as u8,
            );
            self.manager
                .submit(channel_messages.into_deliver_request(channel));
        }
        RpcResponse::ok()
    }

    /// `/wk/getNodeUidsByTag`：leader按tag返回指定节点负责投递的用户集合
    pub async fn get_node_uids_by_tag(&self, body: &[u8]) -> RpcResponse {
        let req = match TagReq::decode(body) {
            Ok(req) => req,
            Err(e) => {
                error!(error = %e, "Decode TagReq failed");
                return RpcResponse::error(Status::Error, e.to_string());
            }
        };
        if req.channel_id.is_empty() {
            return RpcResponse::error(Status::Error, "channelId is empty");
        }
        if req.node_id == 0 {
            return RpcResponse::error(Status::Error, "nodeId is 0");
        }
        if req.tag_key.is_empty() {
            return RpcResponse::error(Status::Error, "tagKey is empty");
        }

        let ctx = self.manager.context();
        let channel_type = req.channel_type as u8;
        let is_leader = match ctx
            .cluster
            .is_leader_of_channel(&req.channel_id, channel_type)
            .await
        {
            Ok(is_leader) => is_leader,
            Err(e) => {
                error!(
                    channel_id = %req.channel_id,
                    channel_type = channel_type,
                    error = %e,
                    "Leader check failed"
                );
                return RpcResponse::error(Status::Error, e.to_string());
            }
        };
        if !is_leader {
            error!(
                channel_id = %req.channel_id,
                channel_type = channel_type,
                "Not the leader of channel"
            );
            return RpcResponse::error(Status::NotChannelLeader, "not the channel leader");
        }

        let tag = match ctx.tag_manager.get_receiver_tag(&req.tag_key) {
            Some(tag) => tag,
            None => {
                let channel = self
                    .channels
                    .load_or_create_channel(&req.channel_id, channel_type);
                match channel.make_receiver_tag().await {
                    Ok(tag) => tag,
                    Err(e) => {
                        error!(
                            channel_id = %req.channel_id,
                            channel_type = channel_type,
                            error = %e,
                            "Make receiver tag failed"
                        );
                        return RpcResponse::error(Status::Error, e.to_string());
                    }
                }
            }
        };

        let resp = TagResp {
            tag_key: tag.key.clone(),
            uids: tag.uids_of_node(req.node_id),
        };
        RpcResponse::ok_with(resp.encode_to_vec())
    }

    /// `/wk/forwardSendack`：把回执写回发送者所在的连接
    pub async fn handle_forward_sendack(&self, body: &[u8]) -> RpcResponse {
        let set = match ForwardSendackPacketSet::decode(body) {
            Ok(set) => set,
            Err(e) => {
                error!(error = %e, "Decode ForwardSendackPacketSet failed");
                return RpcResponse::error(Status::Error, e.to_string());
            }
        };
        if set.packets.is_empty() {
            return RpcResponse::ok();
        }

        let ctx = self.manager.context();
        for packet in &set.packets {
            let Some(conn) = ctx.user_directory.conn_by_id(&packet.uid, packet.conn_id) else {
                error!(
                    uid = %packet.uid,
                    conn_id = packet.conn_id,
                    device_id = %packet.device_id,
                    "Forward sendack: conn not found"
                );
                return RpcResponse::error(Status::ConnNotFound, "conn not found");
            };
            let sendack = SendackPacket {
                client_seq: packet.client_seq,
                client_msg_no: packet.client_msg_no.clone(),
                message_id: packet.message_id,
                message_seq: packet.message_seq,
                reason_code: packet.reason_code as u8,
                ..Default::default()
            };
            let data = match encode_sendack_packet(&sendack, conn.proto_version) {
                Ok(data) => data,
                Err(e) => {
                    error!(uid = %packet.uid, error = %e, "Encode sendack failed");
                    return RpcResponse::error(Status::Error, e.to_string());
                }
            };
            if let Err(e) = conn.write(&data, FrameType::Sendack) {
                error!(uid = %packet.uid, error = %e, "Write sendack failed");
                return RpcResponse::error(Status::Error, e.to_string());
            }
        }
        RpcResponse::ok()
    }

    /// `/wk/connWrite`：把已编码的帧直接写入指定连接
    pub async fn handle_conn_write(&self, body: &[u8]) -> RpcResponse {
        let req = match ForwardWriteReq::decode(body) {
            Ok(req) => req,
            Err(e) => {
                error!(error = %e, "Decode ForwardWriteReq failed");
                return RpcResponse::error(Status::Error, e.to_string());
            }
        };
        if req.data.is_empty() {
            return RpcResponse::ok();
        }
        let ctx = self.manager.context();
        let Some(conn) = ctx.user_directory.conn_by_id(&req.uid, req.conn_id) else {
            error!(
                uid = %req.uid,
                conn_id = req.conn_id,
                "Conn write: conn not found"
            );
            return RpcResponse::error(Status::ConnNotFound, "conn not found");
        };
        let _ = conn.write_directly(&req.data, req.recv_frame_count);
        RpcResponse::ok()
    }

    /// 节点ping：leader下发它所知的连接清单，清掉本地多余的代理连接
    pub fn handle_node_ping(&self, from_node_id: u64, body: &[u8]) {
        let req = match NodePingReq::decode(body) {
            Ok(req) => req,
            Err(e) => {
                error!(error = %e, "Decode NodePingReq failed");
                return;
            }
        };
        let ctx = self.manager.context();
        for ping in &req.pings {
            let Some(conns) = ctx.user_directory.conns(&ping.uid) else {
                continue;
            };
            for conn in &conns {
                if conn.real_node_id != from_node_id {
                    continue;
                }
                let exist = ping
                    .conn_ids
                    .iter()
                    .any(|&conn_id| conn.conn_id == conn_id && conn.real_node_id == from_node_id);
                if !exist {
                    info!(
                        uid = %ping.uid,
                        real_node_id = conn.real_node_id,
                        conn_id = conn.conn_id,
                        proxy_conn_id = conn.proxy_conn_id,
                        "Node ping: close stale conn"
                    );
                    ctx.user_directory.remove_conn_by_id(&ping.uid, conn.conn_id);
                    conn.close();
                }
            }
        }
    }

    /// 节点pong：真实节点报告连接清单，按 `(realNodeId, proxyConnId)`
    /// 匹配，清掉真实节点已经不存在的连接
    pub fn handle_node_pong(&self, from_node_id: u64, body: &[u8]) {
        let user_conns = match UserConns::decode(body) {
            Ok(conns) => conns,
            Err(e) => {
                error!(error = %e, "Decode UserConns failed");
                return;
            }
        };
        if user_conns.uid.is_empty() {
            info!("Node pong: uid is empty");
            return;
        }
        let ctx = self.manager.context();
        let Some(current_conns) = ctx.user_directory.conns(&user_conns.uid) else {
            debug!(uid = %user_conns.uid, "Node pong: user not found");
            return;
        };

        for current_conn in &current_conns {
            if current_conn.real_node_id != from_node_id {
                continue;
            }
            let exist = user_conns.conn_ids.iter().any(|&conn_id| {
                current_conn.real_node_id == from_node_id
                    && current_conn.proxy_conn_id == conn_id
            });
            if !exist {
                info!(
                    uid = %user_conns.uid,
                    real_node_id = current_conn.real_node_id,
                    conn_id = current_conn.conn_id,
                    proxy_conn_id = current_conn.proxy_conn_id,
                    "Node pong: close stale conn"
                );
                ctx.user_directory
                    .remove_conn_by_id(&user_conns.uid, current_conn.conn_id);
                current_conn.close();
            }
        }
    }
}
