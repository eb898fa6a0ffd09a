//! Server-to-client responses.

use super::packet::{frame, DecodeError, EncodeError, Packet, PacketKind, PacketType};
use super::status::{errno_status, io_error_status, status_errno, INVALID_HANDLE_MESSAGE};
use super::types::{FileAttrs, Item, StatusCode, VfsStats};

/// Responses from server to client.
///
/// Every request is answered by exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Handshake reply: protocol version plus (name, value) extension pairs.
    Version {
        version: u32,
        extensions: Vec<(String, String)>,
    },

    /// Completion status (success, EOF or an error).
    Status { code: StatusCode, message: String },

    /// Newly opened file or directory.
    Handle(u32),

    /// File contents.
    Data(Vec<u8>),

    /// Directory entries, or a single resolved path.
    Name(Vec<Item>),

    /// File attributes.
    Attrs(FileAttrs),

    /// Content hashes from `check-file-handle`.
    Hashes { algorithm: String, hashes: Vec<u8> },

    /// Filesystem statistics.
    VfsStats(VfsStats),
}

impl Response {
    pub fn ok() -> Self {
        Response::status(StatusCode::Ok, StatusCode::Ok.message())
    }

    pub fn eof() -> Self {
        Response::status(StatusCode::Eof, StatusCode::Eof.message())
    }

    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        Response::Status {
            code,
            message: message.into(),
        }
    }

    /// Create an error response from an errno.
    pub fn error(errno: i32) -> Self {
        let (code, message) = errno_status(errno);
        Response::Status { code, message }
    }

    pub fn invalid_handle() -> Self {
        Response::status(StatusCode::Failure, INVALID_HANDLE_MESSAGE)
    }

    /// A single path, as returned by REALPATH and READLINK.
    pub fn path(path: impl Into<String>) -> Self {
        Response::Name(vec![Item {
            filename: path.into(),
            longname: String::new(),
            attrs: FileAttrs::default(),
        }])
    }

    /// Check if this is a success status.
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            Response::Status {
                code: StatusCode::Ok,
                ..
            }
        )
    }

    /// Errno equivalent for a failure status, `None` for anything else.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Response::Status { code, message } if *code != StatusCode::Ok => {
                Some(status_errno(*code, message))
            }
            _ => None,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Response::Version { .. } => PacketType::Version,
            Response::Status { .. } => PacketType::Status,
            Response::Handle(_) => PacketType::Handle,
            Response::Data(_) => PacketType::Data,
            Response::Name(_) => PacketType::Name,
            Response::Attrs(_) => PacketType::Attrs,
            Response::Hashes { .. } => PacketType::ExtendedReply,
            Response::VfsStats(_) => PacketType::VfsStats,
        }
    }

    /// Frame this response. `id` is ignored for VERSION.
    pub fn encode(&self, id: u32, max_size: usize) -> Result<Vec<u8>, EncodeError> {
        let kind = PacketKind::Builtin(self.packet_type());
        let id = kind.opcode().has_request_id().then_some(id);
        frame(&kind, id, max_size, |w| match self {
            Response::Version {
                version,
                extensions,
            } => {
                w.write_u32(*version)?;
                for (name, value) in extensions {
                    w.write_string(name)?;
                    w.write_string(value)?;
                }
                Ok(())
            }
            Response::Status { code, message } => {
                w.write_u32(*code as u32)?;
                w.write_string(message)?;
                // language tag
                w.write_string("")
            }
            Response::Handle(handle) => w.write_handle(*handle),
            Response::Data(data) => w.write_data(data),
            Response::Name(items) => {
                w.write_u32(items.len() as u32)?;
                for item in items {
                    item.encode(w)?;
                }
                Ok(())
            }
            Response::Attrs(attrs) => attrs.encode(w),
            Response::Hashes { algorithm, hashes } => {
                w.write_string(algorithm)?;
                w.write_data(hashes)
            }
            Response::VfsStats(stats) => stats.encode(w),
        })
    }

    /// Decode the payload of a response packet.
    pub fn decode(packet: &Packet) -> Result<Self, DecodeError> {
        let mut r = packet.reader();
        let response = match packet.opcode() {
            PacketType::Version => {
                let version = r.read_u32()?;
                let mut extensions = Vec::new();
                while !r.is_empty() {
                    extensions.push((r.read_string()?, r.read_string()?));
                }
                Response::Version {
                    version,
                    extensions,
                }
            }
            PacketType::Status => {
                let code = StatusCode::from_u32(r.read_u32()?);
                // Message and language tag are optional in practice.
                let message = if r.is_empty() {
                    code.message().to_string()
                } else {
                    r.read_string()?
                };
                Response::Status { code, message }
            }
            PacketType::Handle => Response::Handle(r.read_handle()?),
            PacketType::Data => Response::Data(r.read_data_owned()?),
            PacketType::Name => {
                let count = r.read_u32()?;
                let mut items = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    items.push(Item::decode(&mut r)?);
                }
                Response::Name(items)
            }
            PacketType::Attrs => Response::Attrs(FileAttrs::decode(&mut r)?),
            PacketType::ExtendedReply => Response::Hashes {
                algorithm: r.read_string()?,
                hashes: r.read_data_owned()?,
            },
            PacketType::VfsStats => Response::VfsStats(VfsStats::decode(&mut r)?),
            other => {
                return Err(DecodeError::InvalidPacket(format!(
                    "{:?} is not a response",
                    other
                )))
            }
        };
        Ok(response)
    }
}

impl From<std::io::Error> for Response {
    fn from(err: std::io::Error) -> Self {
        let (code, message) = io_error_status(&err);
        Response::Status { code, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::DEFAULT_MAX_PACKET_SIZE;

    fn roundtrip(resp: &Response) -> Response {
        let bytes = resp.encode(9, DEFAULT_MAX_PACKET_SIZE).unwrap();
        let packet = Packet::parse(bytes).unwrap();
        assert_eq!(packet.id.is_some(), resp.packet_type() != PacketType::Version);
        Response::decode(&packet).unwrap()
    }

    #[test]
    fn test_error_responses() {
        let resp = Response::error(libc::ENOENT);
        assert_eq!(
            resp,
            Response::Status {
                code: StatusCode::NoSuchFile,
                message: "ENOENT".into()
            }
        );
        assert_eq!(resp.errno(), Some(libc::ENOENT));
        assert!(!resp.is_ok());

        assert!(Response::ok().is_ok());
        assert_eq!(Response::ok().errno(), None);
        assert_eq!(Response::error(libc::EEXIST).errno(), Some(libc::EEXIST));
    }

    #[test]
    fn test_from_io_error() {
        let resp: Response = std::io::Error::from_raw_os_error(libc::ENOTDIR).into();
        assert_eq!(resp.errno(), Some(libc::ENOTDIR));
    }

    #[test]
    fn test_version_extension_pairs() {
        let resp = Response::Version {
            version: 3,
            extensions: vec![("hardlink@openssh.com".into(), "1".into())],
        };
        assert_eq!(roundtrip(&resp), resp);
    }

    #[test]
    fn test_name_listing() {
        let resp = Response::Name(vec![
            Item::new("a", FileAttrs::new().with_size(1)),
            Item::new("b", FileAttrs::new().with_size(2)),
        ]);
        assert_eq!(roundtrip(&resp), resp);
    }

    #[test]
    fn test_status_without_message() {
        let bytes = frame(&PacketType::Status.into(), Some(1), 64, |w| w.write_u32(1)).unwrap();
        let packet = Packet::parse(bytes).unwrap();
        assert_eq!(Response::decode(&packet).unwrap(), Response::eof());
    }
}
