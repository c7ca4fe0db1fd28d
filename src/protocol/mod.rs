//! 客户端二进制协议
//!
//! 定义服务端与客户端之间的帧结构（RecvPacket/SendackPacket等）以及按协议
//! 版本的编解码。集群节点间的RPC载荷不走这里，见 `crate::cluster::wire`。

pub mod codec;
pub mod packet;

pub use codec::{decode_recv_packet, decode_sendack_packet, encode_recv_packet, encode_sendack_packet};
pub use packet::{
    channel_to_key, Framer, FrameType, RecvPacket, SendPacket, SendackPacket, Setting, StreamFlag,
    CHANNEL_TYPE_GROUP, CHANNEL_TYPE_PERSON, PROTO_VERSION_EXPIRE,
};
