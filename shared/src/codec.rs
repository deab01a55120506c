//! Length-prefixed framing for the controller link
//!
//! Every envelope travels as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: protobuf Envelope ]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::Envelope;

/// Maximum message size (64 KiB); scripts are small and the controller is too
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024;

const PREFIX_LEN: usize = 4;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("Invalid message length prefix: {0}")]
    InvalidLength(u32),

    #[error("Protobuf decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    EncodeError(#[from] prost::EncodeError),
}

/// Encode an Envelope into a single frame
pub fn encode(envelope: &Envelope) -> Result<Bytes, CodecError> {
    let msg_len = envelope.encoded_len();
    if msg_len > MAX_MESSAGE_SIZE as usize {
        return Err(CodecError::MessageTooLarge(msg_len));
    }

    let mut buf = BytesMut::with_capacity(PREFIX_LEN + msg_len);
    buf.put_u32(msg_len as u32);
    envelope.encode(&mut buf)?;

    Ok(buf.freeze())
}

/// Try to take one complete frame off the front of `buf`
///
/// `Ok(None)` means more bytes are needed; the buffer is left untouched.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
    if buf.len() < PREFIX_LEN {
        return Ok(None);
    }

    let msg_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if msg_len > MAX_MESSAGE_SIZE {
        return Err(CodecError::InvalidLength(msg_len));
    }

    if buf.len() < PREFIX_LEN + msg_len as usize {
        return Ok(None);
    }

    buf.advance(PREFIX_LEN);
    let msg_bytes = buf.split_to(msg_len as usize);

    Ok(Some(Envelope::decode(msg_bytes)?))
}

/// Accumulates stream reads and yields whole envelopes
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Append freshly read bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Call repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<Envelope>, CodecError> {
        decode(&mut self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{envelope::Payload, Command, CommandType, MessageType};

    fn create_test_envelope() -> Envelope {
        Envelope::new(
            "test-device",
            MessageType::MsgCommand,
            1,
            Payload::Command(Command::run_script(
                3,
                "while True:\n    print('hi')\n    time.sleep(1)\n",
            )),
        )
    }

    #[test]
    fn test_script_survives_framing() {
        let original = create_test_envelope();

        let encoded = encode(&original).expect("encode failed");
        let len_prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len_prefix as usize, encoded.len() - PREFIX_LEN);

        let mut buf = BytesMut::from(&encoded[..]);
        let decoded = decode(&mut buf).expect("decode failed").expect("no message");

        match decoded.payload {
            Some(Payload::Command(cmd)) => {
                assert_eq!(cmd.command_id, 3);
                assert!(cmd.source.contains("time.sleep(1)"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
        assert!(buf.is_empty(), "buffer should be empty after decode");
    }

    #[test]
    fn test_partial_frame_waits() {
        let encoded = encode(&create_test_envelope()).expect("encode failed");

        let mut buf = BytesMut::from(&encoded[..5]);
        assert!(decode(&mut buf).expect("partial data is not an error").is_none());
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_decoder_drains_back_to_back_frames() {
        let run = encode(&create_test_envelope()).expect("encode failed");
        let stop = encode(&Envelope::new(
            "test-device",
            MessageType::MsgCommand,
            2,
            Payload::Command(Command::control(4, CommandType::CmdStop)),
        ))
        .expect("encode failed");

        let mut decoder = FrameDecoder::new();
        decoder.extend(&run[..7]);
        assert!(decoder.decode_next().expect("decode error").is_none());

        decoder.extend(&run[7..]);
        decoder.extend(&stop);

        let first = decoder.decode_next().expect("decode error").expect("first frame");
        let second = decoder.decode_next().expect("decode error").expect("second frame");
        assert_eq!(first.header.map(|h| h.sequence_id), Some(1));
        assert_eq!(second.header.map(|h| h.sequence_id), Some(2));
        assert!(decoder.decode_next().expect("decode error").is_none());
    }

    #[test]
    fn test_oversized_script_rejected_on_encode() {
        let source = "x = 1\n".repeat(MAX_MESSAGE_SIZE as usize / 6 + 1);
        let envelope = Envelope::new(
            "test-device",
            MessageType::MsgCommand,
            1,
            Payload::Command(Command::run_script(1, source)),
        );

        assert!(matches!(encode(&envelope), Err(CodecError::MessageTooLarge(_))));
    }

    #[test]
    fn test_bad_length_prefix() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_MESSAGE_SIZE + 1);
        buf.put_bytes(0, 16);

        assert!(matches!(decode(&mut buf), Err(CodecError::InvalidLength(_))));
    }
}
