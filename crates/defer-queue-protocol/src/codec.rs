use crate::{Message, MessageType, ProtocolError, Result, MAX_FRAME_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec for encoding/decoding messages with length-prefixed framing
///
/// Frame format: [4-byte length (big-endian)] [1-byte message type] [payload]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Length prefix + message type
        if src.len() < 5 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[0..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(length));
        }
        if length == 0 {
            return Err(ProtocolError::EmptyFrame);
        }

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
            MessageType::Authenticate => Message::Authenticate(bincode::deserialize(&payload)?),
            MessageType::CreateQueue => Message::CreateQueue(bincode::deserialize(&payload)?),
            MessageType::GetQueue => Message::GetQueue(bincode::deserialize(&payload)?),
            MessageType::DeleteQueue => Message::DeleteQueue(bincode::deserialize(&payload)?),
            MessageType::SendMessage => Message::SendMessage(bincode::deserialize(&payload)?),
            MessageType::ReceiveMessages => {
                Message::ReceiveMessages(bincode::deserialize(&payload)?)
            }
            MessageType::DeleteMessage => Message::DeleteMessage(bincode::deserialize(&payload)?),
            MessageType::SetVisibilityTimeout => {
                Message::SetVisibilityTimeout(bincode::deserialize(&payload)?)
            }
            MessageType::Ack => Message::Ack(bincode::deserialize(&payload)?),
            MessageType::Nack => Message::Nack(bincode::deserialize(&payload)?),
        };

        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let payload = match &item {
            Message::Authenticate(req) => bincode::serialize(req)?,
            Message::CreateQueue(req) | Message::GetQueue(req) | Message::DeleteQueue(req) => {
                bincode::serialize(req)?
            }
            Message::SendMessage(req) => bincode::serialize(req)?,
            Message::ReceiveMessages(req) => bincode::serialize(req)?,
            Message::DeleteMessage(req) => bincode::serialize(req)?,
            Message::SetVisibilityTimeout(req) => bincode::serialize(req)?,
            Message::Ack(resp) => bincode::serialize(resp)?,
            Message::Nack(resp) => bincode::serialize(resp)?,
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
