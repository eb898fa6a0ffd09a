//! Packet framing and primitive field codec.
//!
//! # Frame Format
//!
//! ```text
//! +----------+--------+--------------+-------------------+---------+
//! |  length  | opcode | [request id] | [extension name]  | payload |
//! | (4 bytes)|(1 byte)|  (4 bytes)   | (string, EXTENDED)|         |
//! +----------+--------+--------------+-------------------+---------+
//! ```
//!
//! - Length is a big-endian u32 covering everything after itself
//! - The request id is absent only for INIT and VERSION
//! - Strings and opaque data are a big-endian u32 byte length followed by
//!   the bytes

use super::charset::{self, Encoded};

/// Largest frame a reader will accept from the wire.
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Default limit for frames we produce. Leaves room for a full data block
/// plus header.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 34000;

/// Operation codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Init = 1,
    Version = 2,
    Open = 3,
    Close = 4,
    Read = 5,
    Write = 6,
    Lstat = 7,
    Fstat = 8,
    Setstat = 9,
    Fsetstat = 10,
    Opendir = 11,
    Readdir = 12,
    Remove = 13,
    Mkdir = 14,
    Rmdir = 15,
    Realpath = 16,
    Stat = 17,
    Rename = 18,
    Readlink = 19,
    Symlink = 20,
    Status = 101,
    Handle = 102,
    Data = 103,
    Name = 104,
    Attrs = 105,
    Extended = 200,
    ExtendedReply = 201,
    VfsStats = 202,
}

impl PacketType {
    /// Try to convert from a u8. Returns `None` for unknown opcodes.
    pub fn from_u8_opt(v: u8) -> Option<Self> {
        use PacketType::*;
        Some(match v {
            1 => Init,
            2 => Version,
            3 => Open,
            4 => Close,
            5 => Read,
            6 => Write,
            7 => Lstat,
            8 => Fstat,
            9 => Setstat,
            10 => Fsetstat,
            11 => Opendir,
            12 => Readdir,
            13 => Remove,
            14 => Mkdir,
            15 => Rmdir,
            16 => Realpath,
            17 => Stat,
            18 => Rename,
            19 => Readlink,
            20 => Symlink,
            101 => Status,
            102 => Handle,
            103 => Data,
            104 => Name,
            105 => Attrs,
            200 => Extended,
            201 => ExtendedReply,
            202 => VfsStats,
            _ => return None,
        })
    }

    /// Whether frames of this type carry a request id.
    pub fn has_request_id(self) -> bool {
        !matches!(self, PacketType::Init | PacketType::Version)
    }
}

/// Packet type: a built-in opcode or a named extension (opcode EXTENDED).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketKind {
    Builtin(PacketType),
    Extended(String),
}

impl PacketKind {
    pub fn opcode(&self) -> PacketType {
        match self {
            PacketKind::Builtin(t) => *t,
            PacketKind::Extended(_) => PacketType::Extended,
        }
    }
}

impl From<PacketType> for PacketKind {
    fn from(t: PacketType) -> Self {
        PacketKind::Builtin(t)
    }
}

/// Errors produced while decoding a frame or its fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unexpected end of packet")]
    UnexpectedEndOfPacket,

    #[error("Invalid packet received: {0}")]
    InvalidPacket(String),

    #[error("Unknown packet type {0}")]
    UnknownPacketType(u8),

    #[error("Invalid handle")]
    InvalidHandle,
}

/// Errors produced while building a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("Not enough space in packet: need {needed} bytes, {remaining} left")]
    NoSpace { needed: usize, remaining: usize },

    #[error("Request id presence does not match packet type {0:?}")]
    RequestIdMismatch(PacketType),
}

/// Build a complete frame: header, then whatever `body` writes.
pub fn frame<F>(
    kind: &PacketKind,
    id: Option<u32>,
    max_size: usize,
    body: F,
) -> Result<Vec<u8>, EncodeError>
where
    F: FnOnce(&mut PacketWriter) -> Result<(), EncodeError>,
{
    let opcode = kind.opcode();
    if opcode.has_request_id() != id.is_some() {
        return Err(EncodeError::RequestIdMismatch(opcode));
    }

    let mut w = PacketWriter::with_limit(max_size);
    // Length placeholder, patched in finish().
    w.write_u32(0)?;
    w.write_u8(opcode as u8)?;
    if let Some(id) = id {
        w.write_u32(id)?;
    }
    if let PacketKind::Extended(name) = kind {
        w.write_string(name)?;
    }
    body(&mut w)?;
    Ok(w.finish())
}

/// Bounded big-endian writer.
#[derive(Debug)]
pub struct PacketWriter {
    buf: Vec<u8>,
    limit: usize,
}

impl PacketWriter {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(limit.min(4096)),
            limit,
        }
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.buf.len())
    }

    fn reserve(&self, needed: usize) -> Result<(), EncodeError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(EncodeError::NoSpace { needed, remaining });
        }
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), EncodeError> {
        self.reserve(1)?;
        self.buf.push(v);
        Ok(())
    }

    pub fn write_i16(&mut self, v: i16) -> Result<(), EncodeError> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<(), EncodeError> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<(), EncodeError> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), EncodeError> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<(), EncodeError> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), EncodeError> {
        self.write_bytes(&v.to_be_bytes())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        self.reserve(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Length-prefixed UTF-8 string. Fails without writing anything when the
    /// whole string does not fit.
    pub fn write_string(&mut self, s: &str) -> Result<(), EncodeError> {
        self.reserve(4)?;
        let start = self.buf.len();
        let room = (self.remaining() - 4).min(s.len());
        self.buf.resize(start + 4 + room, 0);

        match charset::encode_bounded(s, &mut self.buf[start + 4..]) {
            Encoded::Complete { bytes } => {
                self.buf[start..start + 4].copy_from_slice(&(bytes as u32).to_be_bytes());
                self.buf.truncate(start + 4 + bytes);
                Ok(())
            }
            Encoded::Partial { .. } | Encoded::NoFit => {
                self.buf.truncate(start);
                Err(EncodeError::NoSpace {
                    needed: 4 + s.len(),
                    remaining: self.remaining(),
                })
            }
        }
    }

    /// Length-prefixed opaque bytes.
    pub fn write_data(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        self.reserve(4 + data.len())?;
        self.buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Handles are always a 4-byte opaque value.
    pub fn write_handle(&mut self, handle: u32) -> Result<(), EncodeError> {
        self.reserve(8)?;
        self.buf.extend_from_slice(&4u32.to_be_bytes());
        self.buf.extend_from_slice(&handle.to_be_bytes());
        Ok(())
    }

    /// Patch the length prefix and return the frame.
    pub fn finish(mut self) -> Vec<u8> {
        let len = (self.buf.len() - 4) as u32;
        self.buf[..4].copy_from_slice(&len.to_be_bytes());
        self.buf
    }
}

/// A validated frame.
#[derive(Debug, Clone)]
pub struct Packet {
    pub kind: PacketKind,
    pub id: Option<u32>,
    frame: Vec<u8>,
    body_start: usize,
}

impl Packet {
    /// Validate a frame and split its header from the payload.
    pub fn parse(frame: Vec<u8>) -> Result<Self, DecodeError> {
        if frame.len() < 5 {
            return Err(DecodeError::InvalidPacket(format!(
                "frame of {} bytes is shorter than the header",
                frame.len()
            )));
        }
        let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        if declared != frame.len() - 4 {
            return Err(DecodeError::InvalidPacket(format!(
                "length prefix {} does not match frame of {} bytes",
                declared,
                frame.len() - 4
            )));
        }
        if frame.len() > MAX_FRAME_SIZE {
            return Err(DecodeError::InvalidPacket(format!(
                "frame of {} bytes exceeds limit",
                frame.len()
            )));
        }

        let opcode =
            PacketType::from_u8_opt(frame[4]).ok_or(DecodeError::UnknownPacketType(frame[4]))?;

        let mut reader = PacketReader::new(&frame[5..]);
        let id = if opcode.has_request_id() {
            Some(reader.read_u32()?)
        } else {
            None
        };
        let kind = if opcode == PacketType::Extended {
            PacketKind::Extended(reader.read_string()?)
        } else {
            PacketKind::Builtin(opcode)
        };
        let body_start = 5 + reader.position();

        Ok(Self {
            kind,
            id,
            frame,
            body_start,
        })
    }

    pub fn opcode(&self) -> PacketType {
        self.kind.opcode()
    }

    pub fn payload(&self) -> &[u8] {
        &self.frame[self.body_start..]
    }

    pub fn reader(&self) -> PacketReader<'_> {
        PacketReader::new(self.payload())
    }
}

/// Big-endian field reader over a payload.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::UnexpectedEndOfPacket);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    /// Length-prefixed UTF-8 string; malformed bytes become U+FFFD.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let bytes = self.read_data()?;
        Ok(charset::decode(bytes))
    }

    /// Length-prefixed opaque bytes as a view into the payload.
    pub fn read_data(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Length-prefixed opaque bytes, copied.
    pub fn read_data_owned(&mut self) -> Result<Vec<u8>, DecodeError> {
        Ok(self.read_data()?.to_vec())
    }

    /// A handle: length must be exactly 4.
    pub fn read_handle(&mut self) -> Result<u32, DecodeError> {
        let len = self.read_u32()?;
        if len != 4 {
            return Err(DecodeError::InvalidHandle);
        }
        self.read_u32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let bytes = frame(&PacketType::Open.into(), Some(7), 1024, |w| {
            w.write_string("a.txt")?;
            w.write_u32(0x1a)
        })
        .unwrap();

        // length, opcode, id
        assert_eq!(&bytes[..4], &((bytes.len() - 4) as u32).to_be_bytes());
        assert_eq!(bytes[4], 3);
        assert_eq!(&bytes[5..9], &7u32.to_be_bytes());

        let packet = Packet::parse(bytes).unwrap();
        assert_eq!(packet.kind, PacketKind::Builtin(PacketType::Open));
        assert_eq!(packet.id, Some(7));
        let mut r = packet.reader();
        assert_eq!(r.read_string().unwrap(), "a.txt");
        assert_eq!(r.read_u32().unwrap(), 0x1a);
        assert!(r.is_empty());
    }

    #[test]
    fn test_init_has_no_request_id() {
        let bytes = frame(&PacketType::Init.into(), None, 64, |w| w.write_u32(3)).unwrap();
        assert_eq!(bytes.len(), 4 + 1 + 4);
        let packet = Packet::parse(bytes).unwrap();
        assert_eq!(packet.id, None);
        assert_eq!(packet.reader().read_u32().unwrap(), 3);

        assert_eq!(
            frame(&PacketType::Init.into(), Some(1), 64, |_| Ok(())),
            Err(EncodeError::RequestIdMismatch(PacketType::Init))
        );
    }

    #[test]
    fn test_extended_name_follows_id() {
        let kind = PacketKind::Extended("statvfs@openssh.com".into());
        let bytes = frame(&kind, Some(42), 256, |w| w.write_string("/")).unwrap();
        let packet = Packet::parse(bytes).unwrap();
        assert_eq!(packet.kind, kind);
        assert_eq!(packet.opcode(), PacketType::Extended);
        assert_eq!(packet.id, Some(42));
        assert_eq!(packet.reader().read_string().unwrap(), "/");
    }

    #[test]
    fn test_length_mismatch_is_invalid() {
        let mut bytes = frame(&PacketType::Close.into(), Some(1), 64, |w| w.write_handle(9)).unwrap();
        bytes.push(0);
        assert!(matches!(
            Packet::parse(bytes),
            Err(DecodeError::InvalidPacket(_))
        ));
    }

    #[test]
    fn test_unknown_opcode() {
        let bytes = vec![0, 0, 0, 5, 99, 0, 0, 0, 1];
        assert_eq!(
            Packet::parse(bytes).unwrap_err(),
            DecodeError::UnknownPacketType(99)
        );
    }

    #[test]
    fn test_read_past_end() {
        let mut r = PacketReader::new(&[0, 0, 0, 10, b'a']);
        assert_eq!(r.read_string(), Err(DecodeError::UnexpectedEndOfPacket));

        let mut r = PacketReader::new(&[1, 2]);
        assert_eq!(r.read_u32(), Err(DecodeError::UnexpectedEndOfPacket));
    }

    #[test]
    fn test_handle_must_be_four_bytes() {
        let mut r = PacketReader::new(&[0, 0, 0, 4, 0, 0, 0, 9]);
        assert_eq!(r.read_handle().unwrap(), 9);

        let mut r = PacketReader::new(&[0, 0, 0, 2, 0, 9]);
        assert_eq!(r.read_handle(), Err(DecodeError::InvalidHandle));
    }

    #[test]
    fn test_writer_enforces_limit() {
        let err = frame(&PacketType::Write.into(), Some(1), 32, |w| {
            w.write_data(&[0u8; 64])
        })
        .unwrap_err();
        assert!(matches!(err, EncodeError::NoSpace { .. }));

        // A string that does not fit leaves the writer untouched.
        let mut w = PacketWriter::with_limit(10);
        w.write_u32(0).unwrap();
        assert!(w.write_string("\u{20ac}\u{20ac}").is_err());
        assert_eq!(w.position(), 4);
        w.write_string("ab").unwrap();
        assert_eq!(w.position(), 10);
    }

    #[test]
    fn test_integer_widths() {
        let bytes = frame(&PacketType::Data.into(), Some(1), 128, |w| {
            w.write_i16(-2)?;
            w.write_u16(0xbeef)?;
            w.write_i32(-70000)?;
            w.write_i64(-1)?;
            w.write_u64(u64::MAX - 1)
        })
        .unwrap();
        let packet = Packet::parse(bytes).unwrap();
        let mut r = packet.reader();
        assert_eq!(r.read_i16().unwrap(), -2);
        assert_eq!(r.read_u16().unwrap(), 0xbeef);
        assert_eq!(r.read_i32().unwrap(), -70000);
        assert_eq!(r.read_i64().unwrap(), -1);
        assert_eq!(r.read_u64().unwrap(), u64::MAX - 1);
    }

    #[test]
    fn test_data_view_and_copy() {
        let payload = [0, 0, 0, 3, 1, 2, 3, 0, 0, 0, 1, 9];
        let mut r = PacketReader::new(&payload);
        let view = r.read_data().unwrap();
        assert_eq!(view, &[1, 2, 3]);
        assert_eq!(r.read_data_owned().unwrap(), vec![9]);
    }
}
