use crate::{Message, MessageType, ProtocolError, Result, MAX_FRAME_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec for encoding/decoding messages with length-prefixed framing.
///
/// Frame format: [4-byte length (big-endian)] [1-byte message type] [payload].
/// The length covers the type byte plus the payload, so a receiver can
/// reconstruct exactly one message per frame even when the stream delivers
/// partial or coalesced reads.
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Need at least the length prefix and the type byte.
        if src.len() < 5 {
            return Ok(None);
        }

        // Peek the length prefix without consuming it.
        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[0..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        // A valid frame carries at least the type byte.
        if length == 0 {
            return Err(ProtocolError::EmptyFrame);
        }
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(length));
        }

        // Accumulate until the whole frame has arrived.
        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);

        let msg_type_byte = src.get_u8();
        let msg_type = MessageType::from_u8(msg_type_byte)
            .ok_or(ProtocolError::InvalidMessageType(msg_type_byte))?;

        let payload = src.split_to(length - 1);

        let message = match msg_type {
            MessageType::HandshakeRequest => {
                Message::HandshakeRequest(bincode::deserialize(&payload)?)
            }
            MessageType::HandshakeResponse => {
                Message::HandshakeResponse(bincode::deserialize(&payload)?)
            }
            MessageType::Heartbeat => Message::Heartbeat(bincode::deserialize(&payload)?),
            MessageType::TaskRequest => Message::TaskRequest(bincode::deserialize(&payload)?),
            MessageType::TaskResponse => Message::TaskResponse(bincode::deserialize(&payload)?),
            MessageType::SubmitTask => Message::SubmitTask(bincode::deserialize(&payload)?),
            MessageType::SubmitResponse => {
                Message::SubmitResponse(bincode::deserialize(&payload)?)
            }
        };

        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let payload = match &item {
            Message::HandshakeRequest(req) => bincode::serialize(req)?,
            Message::HandshakeResponse(resp) => bincode::serialize(resp)?,
            Message::Heartbeat(hb) => bincode::serialize(hb)?,
            Message::TaskRequest(req) => bincode::serialize(req)?,
            Message::TaskResponse(resp) => bincode::serialize(resp)?,
            Message::SubmitTask(req) => bincode::serialize(req)?,
            Message::SubmitResponse(resp) => bincode::serialize(resp)?,
        };

        let total_length = 1 + payload.len();
        if total_length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(total_length));
        }

        dst.reserve(4 + total_length);
        dst.put_u32(total_length as u32);
        dst.put_u8(item.message_type().as_u8());
        dst.put_slice(&payload);

        Ok(())
    }
}
