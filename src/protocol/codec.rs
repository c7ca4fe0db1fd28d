//! 帧编解码
//!
//! 帧结构：1字节帧头（高4位帧类型+低4位标志位）+ 变长剩余长度 + 帧体。
//! recv帧体的expire字段只在协议版本 >= [`PROTO_VERSION_EXPIRE`] 时编码，
//! 流式段只在setting的stream位开启时编码。

use bytes::BufMut;

use crate::error::{DeliveryError, DeliveryResult};
use crate::protocol::packet::{
    FrameType, Framer, RecvPacket, SendackPacket, Setting, StreamFlag, PROTO_VERSION_EXPIRE,
};

/// 编码recv帧
pub fn encode_recv_packet(packet: &RecvPacket, proto_version: u8) -> DeliveryResult<Vec<u8>> {
    let mut body = Vec::with_capacity(64 + packet.payload.len());
    body.put_u8(packet.setting.0);
    put_str(&mut body, &packet.msg_key)?;
    put_str(&mut body, &packet.from_uid)?;
    put_str(&mut body, &packet.channel_id)?;
    body.put_u8(packet.channel_type);
    if proto_version >= PROTO_VERSION_EXPIRE {
        body.put_u32(packet.expire);
    }
    put_str(&mut body, &packet.client_msg_no)?;
    if packet.setting.stream() {
        put_str(&mut body, &packet.stream_no)?;
        body.put_u8(packet.stream_flag as u8);
    }
    body.put_i64(packet.message_id);
    body.put_u32(packet.message_seq);
    body.put_i32(packet.timestamp);
    if packet.setting.topic() {
        put_str(&mut body, &packet.topic)?;
    }
    body.extend_from_slice(&packet.payload);

    Ok(assemble_frame(
        packet.framer.to_header_byte(FrameType::Recv),
        body,
    ))
}

/// 解码recv帧
pub fn decode_recv_packet(data: &[u8], proto_version: u8) -> DeliveryResult<RecvPacket> {
    let (header, body) = split_frame(data)?;
    if FrameType::from_u8(header >> 4) != FrameType::Recv {
        return Err(DeliveryError::Decode(format!(
            "unexpected frame type: {}",
            header >> 4
        )));
    }
    let mut r = Reader::new(body);
    let mut packet = RecvPacket {
        framer: Framer::from_header_byte(header),
        setting: Setting(r.read_u8()?),
        ..Default::default()
    };
    packet.msg_key = r.read_str()?;
    packet.from_uid = r.read_str()?;
    packet.channel_id = r.read_str()?;
    packet.channel_type = r.read_u8()?;
    if proto_version >= PROTO_VERSION_EXPIRE {
        packet.expire = r.read_u32()?;
    }
    packet.client_msg_no = r.read_str()?;
    if packet.setting.stream() {
        packet.stream_no = r.read_str()?;
        packet.stream_flag = StreamFlag::from_u8(r.read_u8()?);
    }
    packet.message_id = r.read_i64()?;
    packet.message_seq = r.read_u32()?;
    packet.timestamp = r.read_i32()?;
    if packet.setting.topic() {
        packet.topic = r.read_str()?;
    }
    packet.payload = r.take_rest().to_vec();
    Ok(packet)
}

/// 编码sendack帧
pub fn encode_sendack_packet(packet: &SendackPacket, _proto_version: u8) -> DeliveryResult<Vec<u8>> {
    let mut body = Vec::with_capacity(32);
    body.put_u64(packet.client_seq);
    put_str(&mut body, &packet.client_msg_no)?;
    body.put_i64(packet.message_id);
    body.put_u32(packet.message_seq);
    body.put_u8(packet.reason_code);

    Ok(assemble_frame(
        packet.framer.to_header_byte(FrameType::Sendack),
        body,
    ))
}

/// 解码sendack帧
pub fn decode_sendack_packet(data: &[u8], _proto_version: u8) -> DeliveryResult<SendackPacket> {
    let (header, body) = split_frame(data)?;
    if FrameType::from_u8(header >> 4) != FrameType::Sendack {
        return Err(DeliveryError::Decode(format!(
            "unexpected frame type: {}",
            header >> 4
        )));
    }
    let mut r = Reader::new(body);
    Ok(SendackPacket {
        framer: Framer::from_header_byte(header),
        client_seq: r.read_u64()?,
        client_msg_no: r.read_str()?,
        message_id: r.read_i64()?,
        message_seq: r.read_u32()?,
        reason_code: r.read_u8()?,
    })
}

fn assemble_frame(header: u8, body: Vec<u8>) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + 4 + body.len());
    frame.put_u8(header);
    put_varint(&mut frame, body.len() as u64);
    frame.extend_from_slice(&body);
    frame
}

fn split_frame(data: &[u8]) -> DeliveryResult<(u8, &[u8])> {
    if data.is_empty() {
        return Err(DeliveryError::Decode("empty frame".to_string()));
    }
    let header = data[0];
    let (body_len, varint_len) = get_varint(&data[1..])?;
    let body_start = 1 + varint_len;
    let body_end = body_start + body_len as usize;
    if data.len() < body_end {
        return Err(DeliveryError::Decode(format!(
            "frame truncated: want {} bytes, have {}",
            body_end,
            data.len()
        )));
    }
    Ok((header, &data[body_start..body_end]))
}

/// 字符串编码：2字节大端长度 + utf8字节
fn put_str(buf: &mut Vec<u8>, s: &str) -> DeliveryResult<()> {
    if s.len() > u16::MAX as usize {
        return Err(DeliveryError::Encode(format!(
            "string too long: {} bytes",
            s.len()
        )));
    }
    buf.put_u16(s.len() as u16);
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// 剩余长度编码：每字节7位，最高位为续传标志
fn put_varint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let mut b = (v & 0x7f) as u8;
        v >>= 7;
        if v > 0 {
            b |= 0x80;
        }
        buf.put_u8(b);
        if v == 0 {
            break;
        }
    }
}

fn get_varint(data: &[u8]) -> DeliveryResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, b) in data.iter().enumerate() {
        value |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
        if shift > 35 {
            return Err(DeliveryError::Decode("varint overflow".to_string()));
        }
    }
    Err(DeliveryError::Decode("varint truncated".to_string()))
}

/// 帧体读取器，所有读取都做边界检查
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> DeliveryResult<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(DeliveryError::Decode(format!(
                "body truncated at offset {}",
                self.pos
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> DeliveryResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> DeliveryResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> DeliveryResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32(&mut self) -> DeliveryResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    fn read_u64(&mut self) -> DeliveryResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_i64(&mut self) -> DeliveryResult<i64> {
        Ok(self.read_u64()? as i64)
    }

    fn read_str(&mut self) -> DeliveryResult<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DeliveryError::Decode(format!("invalid utf8 string: {}", e)))
    }

    fn take_rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }
}
