//! Wire protocol for the SFTP-style file service.
//!
//! This module provides the packet framing, field codec and typed
//! request/response vocabulary shared by the client multiplexer and the
//! server session dispatcher.
//!
//! # Architecture
//!
//! One channel message carries exactly one frame. Requests carry a 32-bit
//! id that the matching response echoes, so many requests may be in flight
//! on one connection and complete in any order. Only the INIT/VERSION
//! handshake pair goes without an id.
//!
//! # Frame Format
//!
//! ```text
//! +----------+--------+--------------+------------------+---------+
//! |  length  | opcode | [request id] | [extension name] | payload |
//! +----------+--------+--------------+------------------+---------+
//! ```

pub mod charset;
mod packet;
mod request;
mod response;
mod status;
mod types;

pub use packet::{
    frame, DecodeError, EncodeError, Packet, PacketKind, PacketReader, PacketType, PacketWriter,
    DEFAULT_MAX_PACKET_SIZE, MAX_FRAME_SIZE,
};
pub use request::Request;
pub use response::Response;
pub use status::{
    errno_from_tag, errno_status, errno_tag, io_error_status, status_errno,
    INTERNAL_ERROR_MESSAGE, INVALID_HANDLE_MESSAGE,
};
pub use types::{
    attr_flags, extension, file_type, FileAttrs, Item, OpenFlags, OpenMode, StatusCode, VfsStats,
    BLOCKS_EXTENSION, MAX_READ_BLOCK_LENGTH, MAX_WRITE_BLOCK_LENGTH, PROTOCOL_VERSION,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_response_exchange() {
        // A read request and its data response, matched by id.
        let req = Request::Read {
            handle: 2,
            offset: 4096,
            len: MAX_READ_BLOCK_LENGTH,
        };
        let bytes = req.encode(41, DEFAULT_MAX_PACKET_SIZE).unwrap();
        let packet = Packet::parse(bytes).unwrap();
        assert_eq!(packet.id, Some(41));
        assert_eq!(Request::decode(&packet).unwrap(), req);

        let data = vec![7u8; MAX_READ_BLOCK_LENGTH as usize];
        let resp = Response::Data(data.clone());
        let bytes = resp.encode(41, DEFAULT_MAX_PACKET_SIZE).unwrap();
        let packet = Packet::parse(bytes).unwrap();
        assert_eq!(packet.id, Some(41));
        assert_eq!(Response::decode(&packet).unwrap(), Response::Data(data));
    }
}
