//! Field-by-field payload codec.
//!
//! A payload is `[u8 type][u32 body length][body]`. Every integer is
//! big-endian, bools are a single 0/1 byte and strings are a `u32` byte length
//! followed by UTF-8 bytes, so the layout never depends on the host.

use crate::error::ProtocolError;
use crate::message::{Message, MessageType};

/// Type byte plus the body length field.
pub const PAYLOAD_HEADER_LEN: usize = 5;

/// Appends fixed-order fields to a byte buffer.
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_u8(u8::from(value))
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_len(value.len());
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    pub fn put_u32_list(&mut self, values: &[u32]) -> &mut Self {
        self.put_len(values.len());
        for value in values {
            self.put_u32(*value);
        }
        self
    }

    pub fn put_str_list(&mut self, values: &[String]) -> &mut Self {
        self.put_len(values.len());
        for value in values {
            self.put_str(value);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    // Lengths above u32::MAX cannot be represented; such payloads are far past
    // any frame limit and are clamped rather than silently wrapped.
    fn put_len(&mut self, len: usize) {
        self.put_u32(u32::try_from(len).unwrap_or(u32::MAX));
    }
}

/// Reads fixed-order fields from a byte slice, tracking the offset.
#[derive(Debug)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                offset: self.offset,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::InvalidBool(other)),
        }
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    pub fn read_u32_list(&mut self) -> Result<Vec<u32>, ProtocolError> {
        let count = self.read_u32()? as usize;
        // A hostile count must not drive the allocation.
        let mut values = Vec::with_capacity(count.min(self.remaining() / 4));
        for _ in 0..count {
            values.push(self.read_u32()?);
        }
        Ok(values)
    }

    pub fn read_string_list(&mut self) -> Result<Vec<String>, ProtocolError> {
        let count = self.read_u32()? as usize;
        let mut values = Vec::with_capacity(count.min(self.remaining() / 4));
        for _ in 0..count {
            values.push(self.read_string()?);
        }
        Ok(values)
    }

    /// Fails if any bytes were left unread.
    pub fn finish(self) -> Result<(), ProtocolError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }
}

/// Encodes a message into a payload (without the frame header).
pub fn encode(message: &Message) -> Vec<u8> {
    let body = encode_body(message);
    let mut out = FieldWriter::with_capacity(PAYLOAD_HEADER_LEN + body.len());
    out.put_u8(message.kind()).put_u32(body.len() as u32);
    let mut out = out.into_inner();
    out.extend_from_slice(&body);
    out
}

/// Decodes a payload produced by [`encode`].
///
/// Unknown type bytes decode to [`Message::Unknown`] without looking at the
/// body; whether such a message is acceptable is the receiver's decision.
pub fn decode(payload: &[u8]) -> Result<Message, ProtocolError> {
    let mut header = FieldReader::new(payload);
    let kind = header.read_u8()?;
    let declared = header.read_u32()? as usize;
    let body = &payload[PAYLOAD_HEADER_LEN..];
    if declared != body.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }

    match MessageType::from_u8(kind) {
        Some(kind) => decode_body(kind, body),
        None => Ok(Message::Unknown {
            kind,
            body: body.to_vec(),
        }),
    }
}

fn encode_body(message: &Message) -> Vec<u8> {
    let mut w = FieldWriter::new();
    match message {
        Message::Connect { name } => {
            w.put_str(name);
        }
        Message::ConnectResponse { player_id } => {
            w.put_u32(*player_id);
        }
        Message::Disconnect
        | Message::JoinGame
        | Message::LeaveGame
        | Message::UpgradeListRequest => {}
        Message::GameStart { match_id } => {
            w.put_u32(*match_id);
        }
        Message::GameEnd { match_id, winner } => {
            w.put_u32(*match_id).put_u32(*winner);
        }
        Message::PlayerMove { x, y, unit_ids } => {
            w.put_i32(*x).put_i32(*y).put_u32_list(unit_ids);
        }
        Message::PlayerBuild {
            x,
            y,
            building_type,
        } => {
            w.put_i32(*x).put_i32(*y).put_u32(*building_type);
        }
        Message::PlayerAttack {
            attacker_id,
            target_id,
        } => {
            w.put_u32(*attacker_id).put_u32(*target_id);
        }
        Message::PlayerHarvest {
            unit_id,
            resource_id,
        } => {
            w.put_u32(*unit_id).put_u32(*resource_id);
        }
        Message::ResourceUpdate { resources } => {
            w.put_u32(resources.len() as u32);
            for (name, amount) in resources {
                w.put_str(name).put_u32(*amount);
            }
        }
        Message::Chat { team_only, text } => {
            w.put_bool(*team_only).put_str(text);
        }
        Message::RequestUpgrade { name } | Message::RequestTechnology { name } => {
            w.put_str(name);
        }
        Message::UpgradeResponse {
            success,
            name,
            new_level,
        } => {
            w.put_bool(*success).put_str(name).put_i32(*new_level);
        }
        Message::TechnologyResponse { success, name } => {
            w.put_bool(*success).put_str(name);
        }
        Message::UpgradeListResponse {
            upgrades,
            technologies,
        } => {
            w.put_str_list(upgrades).put_str_list(technologies);
        }
        Message::Error { reason } => {
            w.put_str(reason);
        }
        Message::Heartbeat { timestamp } => {
            w.put_u64(*timestamp);
        }
        Message::Unknown { body, .. } => return body.clone(),
    }
    w.into_inner()
}

fn decode_body(kind: MessageType, body: &[u8]) -> Result<Message, ProtocolError> {
    let mut r = FieldReader::new(body);
    let message = match kind {
        MessageType::Connect => Message::Connect {
            name: r.read_string()?,
        },
        MessageType::ConnectResponse => Message::ConnectResponse {
            player_id: r.read_u32()?,
        },
        MessageType::Disconnect => Message::Disconnect,
        MessageType::JoinGame => Message::JoinGame,
        MessageType::LeaveGame => Message::LeaveGame,
        MessageType::GameStart => Message::GameStart {
            match_id: r.read_u32()?,
        },
        MessageType::GameEnd => Message::GameEnd {
            match_id: r.read_u32()?,
            winner: r.read_u32()?,
        },
        MessageType::PlayerMove => Message::PlayerMove {
            x: r.read_i32()?,
            y: r.read_i32()?,
            unit_ids: r.read_u32_list()?,
        },
        MessageType::PlayerBuild => Message::PlayerBuild {
            x: r.read_i32()?,
            y: r.read_i32()?,
            building_type: r.read_u32()?,
        },
        MessageType::PlayerAttack => Message::PlayerAttack {
            attacker_id: r.read_u32()?,
            target_id: r.read_u32()?,
        },
        MessageType::PlayerHarvest => Message::PlayerHarvest {
            unit_id: r.read_u32()?,
            resource_id: r.read_u32()?,
        },
        MessageType::ResourceUpdate => {
            let count = r.read_u32()? as usize;
            let mut resources = Vec::with_capacity(count.min(r.remaining() / 8));
            for _ in 0..count {
                let name = r.read_string()?;
                let amount = r.read_u32()?;
                resources.push((name, amount));
            }
            Message::ResourceUpdate { resources }
        }
        MessageType::ChatMessage => Message::Chat {
            team_only: r.read_bool()?,
            text: r.read_string()?,
        },
        MessageType::RequestUpgrade => Message::RequestUpgrade {
            name: r.read_string()?,
        },
        MessageType::UpgradeResponse => Message::UpgradeResponse {
            success: r.read_bool()?,
            name: r.read_string()?,
            new_level: r.read_i32()?,
        },
        MessageType::RequestTechnology => Message::RequestTechnology {
            name: r.read_string()?,
        },
        MessageType::TechnologyResponse => Message::TechnologyResponse {
            success: r.read_bool()?,
            name: r.read_string()?,
        },
        MessageType::UpgradeListRequest => Message::UpgradeListRequest,
        MessageType::UpgradeListResponse => Message::UpgradeListResponse {
            upgrades: r.read_string_list()?,
            technologies: r.read_string_list()?,
        },
        MessageType::Error => Message::Error {
            reason: r.read_string()?,
        },
        MessageType::Heartbeat => Message::Heartbeat {
            timestamp: r.read_u64()?,
        },
    };
    r.finish()?;
    Ok(message)
}
