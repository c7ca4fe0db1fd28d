//! 协议帧类型定义

/// 单聊频道
pub const CHANNEL_TYPE_PERSON: u8 = 1;
/// 群聊频道
pub const CHANNEL_TYPE_GROUP: u8 = 2;

/// 从该协议版本开始，recv帧携带expire字段
pub const PROTO_VERSION_EXPIRE: u8 = 3;

/// 帧类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Unknown = 0,
    Connect = 1,
    Connack = 2,
    Send = 3,
    Sendack = 4,
    Recv = 5,
    Recvack = 6,
    Ping = 7,
    Pong = 8,
    Disconnect = 9,
}

impl FrameType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => FrameType::Connect,
            2 => FrameType::Connack,
            3 => FrameType::Send,
            4 => FrameType::Sendack,
            5 => FrameType::Recv,
            6 => FrameType::Recvack,
            7 => FrameType::Ping,
            8 => FrameType::Pong,
            9 => FrameType::Disconnect,
            _ => FrameType::Unknown,
        }
    }
}

/// 帧头标志位
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Framer {
    /// 客户端是否显示红点
    pub red_dot: bool,
    /// 是否只同步一次
    pub sync_once: bool,
    /// 是否不存储
    pub no_persist: bool,
    /// 是否为重发帧
    pub dup: bool,
}

impl Framer {
    /// 合成帧头字节：高4位帧类型，低4位标志位
    pub fn to_header_byte(&self, frame_type: FrameType) -> u8 {
        ((frame_type as u8) << 4)
            | (u8::from(self.dup) << 3)
            | (u8::from(self.sync_once) << 2)
            | (u8::from(self.red_dot) << 1)
            | u8::from(self.no_persist)
    }

    /// 从帧头字节还原标志位
    pub fn from_header_byte(b: u8) -> Self {
        Self {
            dup: b & (1 << 3) != 0,
            sync_once: b & (1 << 2) != 0,
            red_dot: b & (1 << 1) != 0,
            no_persist: b & 1 != 0,
        }
    }
}

/// 消息设置位
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Setting(pub u8);

impl Setting {
    const RECEIPT: u8 = 1 << 7;
    const STREAM: u8 = 1 << 6;
    const TOPIC: u8 = 1 << 3;

    /// 是否开启消息回执
    pub fn receipt(&self) -> bool {
        self.0 & Self::RECEIPT != 0
    }

    /// 是否为流式消息
    pub fn stream(&self) -> bool {
        self.0 & Self::STREAM != 0
    }

    /// 是否携带topic
    pub fn topic(&self) -> bool {
        self.0 & Self::TOPIC != 0
    }

    pub fn with_stream(mut self) -> Self {
        self.0 |= Self::STREAM;
        self
    }

    pub fn with_topic(mut self) -> Self {
        self.0 |= Self::TOPIC;
        self
    }

    pub fn with_receipt(mut self) -> Self {
        self.0 |= Self::RECEIPT;
        self
    }
}

/// 流式消息标志
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamFlag {
    /// 流式传输中
    #[default]
    Ing = 0,
    /// 流开始
    Start = 1,
    /// 流结束
    End = 2,
}

impl StreamFlag {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => StreamFlag::Start,
            2 => StreamFlag::End,
            _ => StreamFlag::Ing,
        }
    }
}

/// 客户端上行的发送包（投递时只读）
#[derive(Debug, Clone, Default)]
pub struct SendPacket {
    pub framer: Framer,
    pub setting: Setting,
    pub client_seq: u64,
    pub client_msg_no: String,
    pub stream_no: String,
    pub channel_id: String,
    pub channel_type: u8,
    pub expire: u32,
    pub topic: String,
    pub payload: Vec<u8>,
}

/// 服务端下行的接收包
#[derive(Debug, Clone, Default)]
pub struct RecvPacket {
    pub framer: Framer,
    pub setting: Setting,
    pub msg_key: String,
    pub message_id: i64,
    pub message_seq: u32,
    pub client_msg_no: String,
    pub stream_no: String,
    pub stream_flag: StreamFlag,
    pub from_uid: String,
    pub expire: u32,
    pub channel_id: String,
    pub channel_type: u8,
    pub topic: String,
    pub timestamp: i32,
    pub payload: Vec<u8>,
    /// 不参与编码，透传给发送端做ACK关联
    pub client_seq: u64,
}

impl RecvPacket {
    /// 防篡改校验串：MsgKey 的签名输入
    ///
    /// payload 在调用前必须已经是加密后的base64串
    pub fn verify_string(&self) -> String {
        format!(
            "{}{}{}{}{}{}{}{}",
            self.message_id,
            self.message_seq,
            self.client_msg_no,
            self.timestamp,
            self.from_uid,
            self.channel_id,
            self.channel_type,
            String::from_utf8_lossy(&self.payload),
        )
    }
}

/// 发送回执包
#[derive(Debug, Clone, Default)]
pub struct SendackPacket {
    pub framer: Framer,
    pub client_seq: u64,
    pub client_msg_no: String,
    pub message_id: i64,
    pub message_seq: u32,
    pub reason_code: u8,
}

/// 频道唯一键
pub fn channel_to_key(channel_id: &str, channel_type: u8) -> String {
    format!("{}-{}", channel_id, channel_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_byte_round_trip() {
        let framer = Framer {
            red_dot: true,
            sync_once: false,
            no_persist: true,
            dup: false,
        };
        let b = framer.to_header_byte(FrameType::Recv);
        assert_eq!(b >> 4, FrameType::Recv as u8);
        assert_eq!(Framer::from_header_byte(b), framer);
    }

    #[test]
    fn test_setting_bits() {
        let setting = Setting::default().with_stream().with_topic();
        assert!(setting.stream());
        assert!(setting.topic());
        assert!(!setting.receipt());
    }

    #[test]
    fn test_verify_string_is_deterministic() {
        let packet = RecvPacket {
            message_id: 42,
            message_seq: 7,
            client_msg_no: "no-1".to_string(),
            timestamp: 1700000000,
            from_uid: "alice".to_string(),
            channel_id: "bob".to_string(),
            channel_type: CHANNEL_TYPE_PERSON,
            payload: b"cipher".to_vec(),
            ..Default::default()
        };
        assert_eq!(packet.verify_string(), packet.verify_string());
        assert!(packet.verify_string().contains("alice"));
    }

    #[test]
    fn test_channel_to_key() {
        assert_eq!(channel_to_key("g1", CHANNEL_TYPE_GROUP), "g1-2");
    }
}
