use std::io;

use bytes::{Buf, BufMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::Message;
use crate::{blockinfo::BlockInfo, Bitfield, BLOCK_LEN};

/// The largest legal frame on the wire: the 9 byte Block message header plus
/// one block's worth of payload. Anything claiming to be longer than this is
/// a malformed or hostile peer, not a message we simply haven't buffered
/// enough of yet.
const MAX_MESSAGE_LEN: u32 = 9 + BLOCK_LEN;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Block = 7,
    Cancel = 8,
    Port = 9,
}

impl TryFrom<u8> for MessageId {
    type Error = io::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Choke),
            1 => Ok(Self::Unchoke),
            2 => Ok(Self::Interested),
            3 => Ok(Self::NotInterested),
            4 => Ok(Self::Have),
            5 => Ok(Self::Bitfield),
            6 => Ok(Self::Request),
            7 => Ok(Self::Block),
            8 => Ok(Self::Cancel),
            9 => Ok(Self::Port),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown message id {value}"),
            )),
        }
    }
}

/// Frames the post-handshake peer wire protocol: a 4 byte big-endian length
/// prefix followed by an optional 1 byte id and a variable length payload.
/// `length == 0` is the keep-alive message and carries neither id nor
/// payload.
pub struct PeerCodec;

impl Encoder<Message> for PeerCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: Message, buf: &mut bytes::BytesMut) -> io::Result<()> {
        match msg {
            Message::KeepAlive => {
                buf.put_u32(0);
            }
            Message::Choke => encode_empty(buf, MessageId::Choke),
            Message::Unchoke => encode_empty(buf, MessageId::Unchoke),
            Message::Interested => encode_empty(buf, MessageId::Interested),
            Message::NotInterested => encode_empty(buf, MessageId::NotInterested),
            Message::Have { piece_index } => {
                buf.put_u32(1 + 4);
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(piece_index as u32);
            }
            Message::BitField(bitfield) => {
                // `as_raw_slice` always rounds up to a whole number of
                // bytes, so the payload length must too: `bitfield.len()`
                // itself need not be a multiple of 8 (e.g. a torrent whose
                // piece count isn't).
                let payload_len = bitfield.as_raw_slice().len();
                buf.put_u32(1 + payload_len as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.extend_from_slice(bitfield.as_raw_slice());
            }
            Message::Request(BlockInfo {
                piece_index,
                offset,
                len,
            }) => encode_block_info(buf, MessageId::Request, piece_index, offset, len),
            Message::Cancel(BlockInfo {
                piece_index,
                offset,
                len,
            }) => encode_block_info(buf, MessageId::Cancel, piece_index, offset, len),
            Message::Block {
                piece_index,
                offset,
                data,
            } => {
                buf.put_u32(1 + 4 + 4 + data.len() as u32);
                buf.put_u8(MessageId::Block as u8);
                buf.put_u32(piece_index as u32);
                buf.put_u32(offset);
                buf.extend_from_slice(&data);
            }
            Message::Port { listen_port } => {
                buf.put_u32(1 + 2);
                buf.put_u8(MessageId::Port as u8);
                buf.put_u16(listen_port);
            }
        }
        Ok(())
    }
}

fn encode_empty(buf: &mut bytes::BytesMut, id: MessageId) {
    buf.put_u32(1);
    buf.put_u8(id as u8);
}

fn encode_block_info(
    buf: &mut bytes::BytesMut,
    id: MessageId,
    piece_index: usize,
    offset: u32,
    len: u32,
) {
    buf.put_u32(1 + 4 + 4 + 4);
    buf.put_u8(id as u8);
    buf.put_u32(piece_index as u32);
    buf.put_u32(offset);
    buf.put_u32(len);
}

/// Validates that `payload_len` (the frame length minus the 1 byte id,
/// already known to be `<= MAX_MESSAGE_LEN`) matches what `id` requires
/// before any field is read out of it, so a peer lying about its own
/// message's length can't desync the stream or underflow a subtraction.
fn check_payload_len(id: MessageId, payload_len: usize) -> io::Result<()> {
    let valid = match id {
        MessageId::Choke
        | MessageId::Unchoke
        | MessageId::Interested
        | MessageId::NotInterested => payload_len == 0,
        MessageId::Have => payload_len == 4,
        MessageId::Bitfield => true,
        MessageId::Request | MessageId::Cancel => payload_len == 12,
        MessageId::Block => payload_len >= 8,
        MessageId::Port => payload_len == 2,
    };
    if valid {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message id {id:?} has payload length {payload_len}"),
        ))
    }
}

impl Decoder for PeerCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut bytes::BytesMut) -> io::Result<Option<Message>> {
        if buf.len() < 4 {
            return Ok(None);
        }

        // peek the length prefix without consuming: we may not have the
        // whole frame yet and want to retry on the next read.
        let mut len_buf = [0; 4];
        len_buf.copy_from_slice(&buf[0..4]);
        let msg_len = u32::from_be_bytes(len_buf);

        if msg_len == 0 {
            buf.advance(4);
            return Ok(Some(Message::KeepAlive));
        }

        if msg_len > MAX_MESSAGE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message length {msg_len} exceeds maximum {MAX_MESSAGE_LEN}"),
            ));
        }

        if (buf.len() as u64) < 4 + msg_len as u64 {
            // not enough bytes buffered yet, reserve room for the rest so
            // the next read doesn't have to reallocate.
            buf.reserve(4 + msg_len as usize - buf.len());
            return Ok(None);
        }

        buf.advance(4);
        let id = MessageId::try_from(buf.get_u8())?;
        let payload_len = msg_len as usize - 1;

        check_payload_len(id, payload_len)?;

        let msg = match id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => {
                let piece_index = buf.get_u32() as usize;
                Message::Have { piece_index }
            }
            MessageId::Bitfield => {
                let mut bytes = vec![0; payload_len];
                buf.copy_to_slice(&mut bytes);
                Message::BitField(Bitfield::from_vec(bytes))
            }
            MessageId::Request => {
                let piece_index = buf.get_u32() as usize;
                let offset = buf.get_u32();
                let len = buf.get_u32();
                Message::Request(BlockInfo {
                    piece_index,
                    offset,
                    len,
                })
            }
            MessageId::Cancel => {
                let piece_index = buf.get_u32() as usize;
                let offset = buf.get_u32();
                let len = buf.get_u32();
                Message::Cancel(BlockInfo {
                    piece_index,
                    offset,
                    len,
                })
            }
            MessageId::Block => {
                let piece_index = buf.get_u32() as usize;
                let offset = buf.get_u32();
                let mut data = vec![0; payload_len - 4 - 4];
                buf.copy_to_slice(&mut data);
                Message::Block {
                    piece_index,
                    offset,
                    data: data.into(),
                }
            }
            MessageId::Port => {
                let listen_port = buf.get_u16();
                Message::Port { listen_port }
            }
        };

        Ok(Some(msg))
    }
}
